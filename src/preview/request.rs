//! Preview request and result types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::Metric;

/// Logical identity a debounced preview stream is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey {
    pub dataset_id: String,
    pub column: String,
    pub metric: Metric,
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.dataset_id, self.column, self.metric)
    }
}

/// A hypothetical computation. Never touches the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    pub dataset_id: String,
    pub column: String,
    pub metric: Metric,
    pub epsilon: f64,
}

impl PreviewRequest {
    pub fn new(
        dataset_id: impl Into<String>,
        column: impl Into<String>,
        metric: Metric,
        epsilon: f64,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            column: column.into(),
            metric,
            epsilon,
        }
    }

    pub fn channel(&self) -> ChannelKey {
        ChannelKey {
            dataset_id: self.dataset_id.clone(),
            column: self.column.clone(),
            metric: self.metric,
        }
    }

    /// Why this request cannot produce a preview, if it cannot.
    pub fn degenerate_reason(&self) -> Option<&'static str> {
        if self.dataset_id.trim().is_empty() {
            Some("no dataset selected")
        } else if self.column.trim().is_empty() {
            Some("no column selected")
        } else if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            Some("epsilon must be positive")
        } else if !self.metric.supports_preview() {
            Some("metric has no preview")
        } else {
            None
        }
    }
}

/// Values returned by the preview collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewValues {
    #[serde(alias = "actual_value")]
    pub actual_value: f64,
    #[serde(alias = "private_value")]
    pub private_value: f64,
}

/// An applied preview for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResult {
    pub channel: ChannelKey,
    pub epsilon: f64,
    pub actual_value: f64,
    pub private_value: f64,
    /// Sequence number of the request that produced this result.
    pub sequence: u64,
}

//! Job parameters as collected by the wizard.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ConsoleError, ConsoleResult};
use crate::query::{Mechanism, Metric};

pub const DEFAULT_EPSILON: f64 = 1.0;
pub const DEFAULT_GAUSSIAN_DELTA: f64 = 1e-5;

/// Job fields accumulated across wizard steps. Nothing here is validated
/// until the wizard tries to advance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDraft {
    pub dataset_id: Option<String>,
    /// Empty means all numeric columns.
    pub columns: Vec<String>,
    pub metrics: BTreeSet<Metric>,
    pub epsilon: f64,
    /// Only used by the Gaussian mechanism.
    pub delta: f64,
    pub mechanism: Mechanism,
    pub budget_scope_id: Option<String>,
}

impl Default for JobDraft {
    fn default() -> Self {
        Self {
            dataset_id: None,
            columns: Vec::new(),
            metrics: BTreeSet::new(),
            epsilon: DEFAULT_EPSILON,
            delta: DEFAULT_GAUSSIAN_DELTA,
            mechanism: Mechanism::default(),
            budget_scope_id: None,
        }
    }
}

impl JobDraft {
    /// A dataset must be selected.
    pub fn validate_target(&self) -> ConsoleResult<&str> {
        match self.dataset_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(ConsoleError::validation("select a dataset first")),
        }
    }

    /// Epsilon, metrics, mechanism parameters and the optional per-job cap.
    pub fn validate_parameters(&self, max_epsilon_per_job: Option<f64>) -> ConsoleResult<()> {
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(ConsoleError::validation(format!(
                "epsilon must be greater than 0 (got {})",
                self.epsilon
            )));
        }
        if let Some(cap) = max_epsilon_per_job {
            if self.epsilon > cap {
                return Err(ConsoleError::validation(format!(
                    "epsilon {} exceeds the per-job limit of {}",
                    self.epsilon, cap
                )));
            }
        }
        if self.metrics.is_empty() {
            return Err(ConsoleError::validation("select at least one metric"));
        }
        if self.mechanism == Mechanism::Gaussian && !(self.delta > 0.0 && self.delta < 1.0) {
            return Err(ConsoleError::validation(format!(
                "the gaussian mechanism needs 0 < delta < 1 (got {})",
                self.delta
            )));
        }
        Ok(())
    }

    /// Freeze the draft into a submittable spec.
    pub fn to_spec(&self, max_epsilon_per_job: Option<f64>) -> ConsoleResult<JobSpec> {
        let dataset_id = self.validate_target()?.to_string();
        self.validate_parameters(max_epsilon_per_job)?;

        Ok(JobSpec {
            dataset_id,
            columns: self.columns.clone(),
            metrics: self.metrics.iter().copied().collect(),
            epsilon: self.epsilon,
            delta: match self.mechanism {
                Mechanism::Laplace => 0.0,
                Mechanism::Gaussian => self.delta,
            },
            mechanism: self.mechanism,
            budget_scope_id: self.budget_scope_id.clone(),
        })
    }
}

/// Immutable job request sent to the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub dataset_id: String,
    pub columns: Vec<String>,
    pub metrics: Vec<Metric>,
    pub epsilon: f64,
    #[serde(default)]
    pub delta: f64,
    #[serde(default)]
    pub mechanism: Mechanism,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_scope_id: Option<String>,
}

/// Response of the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub results: Vec<serde_json::Value>,
}

/// Accepts `"42"` and `42` alike.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}

//! Query vocabulary shared by previews and jobs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConsoleError;

/// Aggregate computed over a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Count,
    Sum,
    Mean,
    Variance,
    Std,
    Histogram,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Count,
        Metric::Sum,
        Metric::Mean,
        Metric::Variance,
        Metric::Std,
        Metric::Histogram,
    ];

    /// Whether the preview collaborator can compute this metric.
    pub fn supports_preview(&self) -> bool {
        matches!(self, Metric::Count | Metric::Sum | Metric::Mean)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Count => "count",
            Metric::Sum => "sum",
            Metric::Mean => "mean",
            Metric::Variance => "variance",
            Metric::Std => "std",
            Metric::Histogram => "histogram",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Metric::ALL
            .into_iter()
            .find(|metric| metric.as_str() == needle)
            .ok_or_else(|| ConsoleError::validation(format!("unknown metric '{}'", s)))
    }
}

/// Noise mechanism the execution collaborator applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mechanism {
    /// epsilon-DP; delta is always 0.
    #[default]
    Laplace,
    /// (epsilon, delta)-DP; requires 0 < delta < 1.
    Gaussian,
}

impl Mechanism {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanism::Laplace => "laplace",
            Mechanism::Gaussian => "gaussian",
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mechanism {
    type Err = ConsoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "laplace" => Ok(Mechanism::Laplace),
            "gaussian" => Ok(Mechanism::Gaussian),
            _ => Err(ConsoleError::validation(format!("unknown mechanism '{}'", s))),
        }
    }
}

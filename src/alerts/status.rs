//! Usage status bands.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ledger::UsageRatio;

/// Lower bound (inclusive) of the `Moderate` band, in percent.
pub const MODERATE_FROM_PCT: f64 = 40.0;
/// Lower bound (inclusive) of the `HighUsage` band, in percent.
pub const HIGH_USAGE_FROM_PCT: f64 = 60.0;
/// Lower bound (inclusive) of the `Critical` band, in percent.
pub const CRITICAL_FROM_PCT: f64 = 80.0;

/// Severity band for a single usage percentage. Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageBand {
    /// Under 40%
    Healthy,
    /// 40% up to 60%
    Moderate,
    /// 60% up to 80%
    HighUsage,
    /// 80% and above
    Critical,
}

impl UsageBand {
    /// Band for a usage percentage in `[0, 100]`.
    pub fn from_pct(pct: f64) -> Self {
        if pct >= CRITICAL_FROM_PCT {
            UsageBand::Critical
        } else if pct >= HIGH_USAGE_FROM_PCT {
            UsageBand::HighUsage
        } else if pct >= MODERATE_FROM_PCT {
            UsageBand::Moderate
        } else {
            UsageBand::Healthy
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            UsageBand::Healthy => "Healthy",
            UsageBand::Moderate => "Moderate",
            UsageBand::HighUsage => "High Usage",
            UsageBand::Critical => "Critical",
        }
    }
}

impl fmt::Display for UsageBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Bands for both parameters of a scope plus the overall (worse) band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeStatus {
    pub epsilon: UsageBand,
    pub delta: UsageBand,
    pub overall: UsageBand,
}

impl ScopeStatus {
    /// Classify epsilon and delta independently; overall is the worse of the two.
    pub fn from_ratio(ratio: UsageRatio) -> Self {
        let epsilon = UsageBand::from_pct(ratio.epsilon_pct);
        let delta = UsageBand::from_pct(ratio.delta_pct);
        Self {
            epsilon,
            delta,
            overall: epsilon.max(delta),
        }
    }
}

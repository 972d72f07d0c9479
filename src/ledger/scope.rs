//! Budget scope model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::ScopeStatus;
use crate::error::{ConsoleError, ConsoleResult};

/// Total delta assigned when a scope is created without one.
pub const DEFAULT_TOTAL_DELTA: f64 = 5e-5;

/// Slack allowed when comparing floating-point budget sums, relative to the
/// scope total, so that e.g. `0.1 + 0.2` can consume a total of `0.3`.
pub const BUDGET_TOLERANCE: f64 = 1e-12;

/// One accountable unit of privacy budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetScope {
    pub id: String,
    pub name: String,
    pub total_epsilon: f64,
    pub total_delta: f64,
    pub consumed_epsilon: f64,
    pub consumed_delta: f64,
    pub created_at: DateTime<Utc>,
}

/// Budget left in a scope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Remaining {
    pub epsilon: f64,
    pub delta: f64,
}

/// Consumption as percentages of the totals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageRatio {
    pub epsilon_pct: f64,
    pub delta_pct: f64,
}

impl UsageRatio {
    /// The higher of the two percentages.
    pub fn max_pct(&self) -> f64 {
        self.epsilon_pct.max(self.delta_pct)
    }
}

impl BudgetScope {
    /// Create a scope with nothing consumed.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        total_epsilon: f64,
        total_delta: f64,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            total_epsilon,
            total_delta,
            consumed_epsilon: 0.0,
            consumed_delta: 0.0,
            created_at: Utc::now(),
        }
    }

    /// `total - consumed` for each parameter, never negative.
    pub fn remaining(&self) -> Remaining {
        Remaining {
            epsilon: (self.total_epsilon - self.consumed_epsilon).max(0.0),
            delta: (self.total_delta - self.consumed_delta).max(0.0),
        }
    }

    /// `consumed / total * 100`, 0 when the total is 0.
    pub fn usage_ratio(&self) -> UsageRatio {
        UsageRatio {
            epsilon_pct: percent(self.consumed_epsilon, self.total_epsilon),
            delta_pct: percent(self.consumed_delta, self.total_delta),
        }
    }

    /// Status bands derived from the current usage.
    pub fn status(&self) -> ScopeStatus {
        ScopeStatus::from_ratio(self.usage_ratio())
    }

    /// Whether `epsilon` and `delta` both fit in the remaining budget.
    pub fn can_afford(&self, epsilon: f64, delta: f64) -> bool {
        fits(self.consumed_epsilon, epsilon, self.total_epsilon)
            && fits(self.consumed_delta, delta, self.total_delta)
    }

    /// Copy with `epsilon`/`delta` added to the totals.
    pub(crate) fn allocated(&self, epsilon: f64, delta: f64) -> ConsoleResult<Self> {
        validate_amount("epsilon", epsilon)?;
        validate_amount("delta", delta)?;
        let mut next = self.clone();
        next.total_epsilon += epsilon;
        next.total_delta += delta;
        if !next.total_epsilon.is_finite() || !next.total_delta.is_finite() {
            return Err(ConsoleError::validation(format!(
                "allocating epsilon {} / delta {} would overflow the totals of scope '{}'",
                epsilon, delta, self.id
            )));
        }
        Ok(next)
    }

    /// Copy with `epsilon`/`delta` consumed, or `BudgetExceeded` if either
    /// does not fit. Both counters move together or neither does.
    pub(crate) fn consumed(&self, epsilon: f64, delta: f64) -> ConsoleResult<Self> {
        validate_amount("epsilon", epsilon)?;
        validate_amount("delta", delta)?;
        if !self.can_afford(epsilon, delta) {
            let remaining = self.remaining();
            return Err(ConsoleError::BudgetExceeded {
                scope_id: self.id.clone(),
                detail: format!(
                    "requested epsilon {} / delta {} but only epsilon {} / delta {} remain",
                    epsilon, delta, remaining.epsilon, remaining.delta
                ),
            });
        }
        // `min` only absorbs rounding inside the relative tolerance.
        let mut next = self.clone();
        next.consumed_epsilon = (self.consumed_epsilon + epsilon).min(self.total_epsilon);
        next.consumed_delta = (self.consumed_delta + delta).min(self.total_delta);
        Ok(next)
    }

    /// Copy with both consumed counters back at zero.
    pub(crate) fn cleared(&self) -> Self {
        let mut next = self.clone();
        next.consumed_epsilon = 0.0;
        next.consumed_delta = 0.0;
        next
    }
}

fn fits(consumed: f64, requested: f64, total: f64) -> bool {
    consumed + requested <= total + total * BUDGET_TOLERANCE
}

fn percent(consumed: f64, total: f64) -> f64 {
    if total <= 0.0 {
        0.0
    } else {
        consumed / total * 100.0
    }
}

/// Budget amounts must be finite and non-negative.
pub(crate) fn validate_amount(name: &str, value: f64) -> ConsoleResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConsoleError::validation(format!(
            "{} must be a finite, non-negative number (got {})",
            name, value
        )));
    }
    Ok(())
}

/// Scope ids double as storage file names.
pub(crate) fn validate_scope_id(id: &str) -> ConsoleResult<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(ConsoleError::validation(format!(
            "scope id '{}' must be non-empty and contain only letters, digits, '-' or '_'",
            id
        )));
    }
    Ok(())
}

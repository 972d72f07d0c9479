//! Budget usage bands and threshold alerts.
//!
//! - **UsageBand / ScopeStatus**: Healthy / Moderate / High Usage / Critical,
//!   computed independently for epsilon and delta
//! - **evaluate**: pure function from a scope and its rules to the triggered rule ids
//! - **AlertBook**: rule registry with a per-rule notification latch
//! - **AlertMonitor**: background observer of ledger changes

mod monitor;
mod rules;
mod status;

pub use monitor::{AlertEvent, AlertMonitor, LogNotifier, Notifier};
pub use rules::{evaluate, AlertBook, AlertRule, AlertTransitions};
pub use status::{
    ScopeStatus, UsageBand, CRITICAL_FROM_PCT, HIGH_USAGE_FROM_PCT, MODERATE_FROM_PCT,
};

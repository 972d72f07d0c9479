//! Core of a differential-privacy query console.
//!
//! - [`ledger`]: per-scope epsilon/delta accounting that never overspends
//! - [`preview`]: debounced, sequence-gated utility previews
//! - [`wizard`]: the job creation state machine
//! - [`alerts`]: usage bands and threshold alerts
//! - [`api`]: collaborator traits and their HTTP client
//! - [`server`]: the local ledger and alert service
//!
//! Configuration is always passed in explicitly; see [`config::ConsoleConfig`].

pub mod alerts;
pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod ledger;
pub mod preview;
pub mod query;
pub mod server;
pub mod timeout;
pub mod wizard;

pub use config::ConsoleConfig;
pub use error::{ConsoleError, ConsoleResult};
pub use ledger::{BudgetLedger, BudgetScope};
pub use preview::PreviewEngine;
pub use query::{Mechanism, Metric};
pub use wizard::JobWizard;

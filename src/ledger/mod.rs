//! Privacy budget ledger.
//!
//! This module keeps per-scope epsilon/delta allocation and consumption and
//! enforces the no-overspend invariant:
//! `0 <= consumed <= total` for both parameters after every mutation.
//!
//! # Overview
//!
//! - **BudgetScope**: one accountable unit (dataset or named ledger)
//! - **BudgetLedger**: allocate / consume / reset / remaining / usage ratio,
//!   serialized per scope
//! - **LedgerStore**: optional durable per-scope snapshots
//!
//! # Example
//!
//! ```ignore
//! use dpconsole::ledger::BudgetLedger;
//!
//! let ledger = BudgetLedger::in_memory();
//! ledger.create_scope("ds_001", "customer_events", 10.0, 1e-5).await?;
//!
//! ledger.consume("ds_001", 4.0, 0.0).await?;
//! let remaining = ledger.remaining("ds_001").await?;
//! assert_eq!(remaining.epsilon, 6.0);
//! ```

mod scope;
mod store;
mod tracker;

pub use scope::{BudgetScope, Remaining, UsageRatio, BUDGET_TOLERANCE, DEFAULT_TOTAL_DELTA};
pub use store::LedgerStore;
pub(crate) use store::write_json_atomic;
pub use tracker::{BudgetLedger, LedgerChange, LedgerEvent};

//! Audit trail for ledger and alert mutations.

pub mod record;
pub mod store;

pub use record::{AuditAction, AuditRecord, AUDIT_SCHEMA_VERSION};
pub use store::AuditTrail;

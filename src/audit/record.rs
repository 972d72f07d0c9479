use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current audit schema version.
pub const AUDIT_SCHEMA_VERSION: u32 = 1;

/// Audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    BudgetCreated,
    BudgetAllocated,
    BudgetConsumed,
    BudgetReset,
    AlertCreated,
    AlertDeleted,
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub schema_version: u32,
    pub recorded_at: DateTime<Utc>,
    pub action: AuditAction,
    /// Scope the action applied to, when there is one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
    pub details: Value,
}

impl AuditRecord {
    /// Create a new audit record stamped with the current time.
    pub fn new(action: AuditAction, scope_id: Option<String>, details: Value) -> Self {
        Self {
            schema_version: AUDIT_SCHEMA_VERSION,
            recorded_at: Utc::now(),
            action,
            scope_id,
            details,
        }
    }
}

//! Error taxonomy shared by the ledger, preview engine, wizard and HTTP layers.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by console operations.
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// Input rejected before any network call (missing dataset, epsilon <= 0, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    /// The requested epsilon/delta does not fit in the scope's remaining budget.
    #[error("Privacy budget exceeded for scope '{scope_id}': {detail}")]
    BudgetExceeded { scope_id: String, detail: String },

    #[error("Budget scope not found: {0}")]
    ScopeNotFound(String),

    #[error("Budget scope already exists: {0}")]
    ScopeExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Collaborator unreachable or returned a malformed/unexpected response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A network-bound operation gave up waiting.
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout { operation: String, after: Duration },

    /// Wizard action not allowed in the current step.
    #[error("Invalid wizard step: {0}")]
    InvalidStep(String),

    /// A commit for this wizard is already outstanding.
    #[error("A job submission is already in flight")]
    SubmissionInFlight,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}

impl From<tokio::task::JoinError> for ConsoleError {
    fn from(err: tokio::task::JoinError) -> Self {
        ConsoleError::Io(io::Error::other(err))
    }
}

/// Result type for console operations.
pub type ConsoleResult<T> = Result<T, ConsoleError>;

impl ConsoleError {
    /// Stable snake_case label, used in HTTP error bodies and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            ConsoleError::Validation(_) => "validation",
            ConsoleError::BudgetExceeded { .. } => "budget_exceeded",
            ConsoleError::ScopeNotFound(_) => "scope_not_found",
            ConsoleError::ScopeExists(_) => "scope_exists",
            ConsoleError::NotFound(_) => "not_found",
            ConsoleError::Transport(_) => "transport",
            ConsoleError::Timeout { .. } => "timeout",
            ConsoleError::InvalidStep(_) => "invalid_step",
            ConsoleError::SubmissionInFlight => "submission_in_flight",
            ConsoleError::Io(_) => "io",
            ConsoleError::Json(_) => "json",
            ConsoleError::Config(_) => "config",
        }
    }

    /// Whether the user can act on the error (edit input, retry) rather than
    /// it being a fault in the system itself.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConsoleError::Validation(_)
                | ConsoleError::BudgetExceeded { .. }
                | ConsoleError::Transport(_)
                | ConsoleError::Timeout { .. }
                | ConsoleError::SubmissionInFlight
        )
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        ConsoleError::Validation(message.into())
    }
}

//! Timeout configuration for network-bound operations.
//!
//! Every collaborator call (ledger reads, previews, job commits) runs under a
//! deadline so that a dead collaborator surfaces as [`ConsoleError::Timeout`]
//! instead of looking like a request that is still pending.

use std::future::Future;
use std::time::Duration;

use crate::error::{ConsoleError, ConsoleResult};

/// Deadlines applied to collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Maximum time for plain ledger, alert and dataset requests.
    /// Default: 10 seconds
    pub request_timeout: Duration,

    /// Maximum time for a single dispatched preview computation.
    /// Default: 15 seconds
    pub preview_timeout: Duration,

    /// Maximum time for a job commit.
    /// Default: 120 seconds (jobs execute synchronously on the collaborator)
    pub commit_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            preview_timeout: Duration::from_secs(15),
            commit_timeout: Duration::from_secs(120),
        }
    }
}

impl TimeoutConfig {
    /// Creates a new TimeoutConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the plain request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the preview computation timeout.
    pub fn with_preview_timeout(mut self, timeout: Duration) -> Self {
        self.preview_timeout = timeout;
        self
    }

    /// Sets the job commit timeout.
    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }
}

/// Runs `future` under `limit`, mapping expiry to [`ConsoleError::Timeout`].
pub async fn with_deadline<T, F>(operation: &str, limit: Duration, future: F) -> ConsoleResult<T>
where
    F: Future<Output = ConsoleResult<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(ConsoleError::Timeout {
            operation: operation.to_string(),
            after: limit,
        }),
    }
}

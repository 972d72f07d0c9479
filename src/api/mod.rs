//! Collaborator boundaries.
//!
//! The core talks to the ledger, preview, job execution, alert and dataset
//! services only through these traits. [`HttpClient`] implements all of them
//! over HTTP+JSON; [`BudgetLedger`](crate::ledger::BudgetLedger) implements
//! [`LedgerApi`] in process.

mod http;
mod local;
mod types;

use async_trait::async_trait;

use crate::alerts::AlertRule;
use crate::error::ConsoleResult;
use crate::ledger::BudgetScope;
use crate::preview::{PreviewRequest, PreviewValues};
use crate::wizard::{JobResult, JobSpec};

pub use http::HttpClient;
pub use types::{BudgetAmount, Dataset, DatasetColumn, ErrorBody, NewAlert, NewScope};

#[async_trait]
pub trait LedgerApi: Send + Sync {
    async fn list_scopes(&self) -> ConsoleResult<Vec<BudgetScope>>;
    async fn get_scope(&self, scope_id: &str) -> ConsoleResult<BudgetScope>;
    async fn create_scope(&self, scope: &NewScope) -> ConsoleResult<BudgetScope>;
    async fn allocate(&self, scope_id: &str, amount: BudgetAmount) -> ConsoleResult<BudgetScope>;
    async fn consume(&self, scope_id: &str, amount: BudgetAmount) -> ConsoleResult<BudgetScope>;
    async fn reset(&self, scope_id: &str) -> ConsoleResult<BudgetScope>;
}

#[async_trait]
pub trait AlertApi: Send + Sync {
    async fn list_alerts(&self, scope_id: &str) -> ConsoleResult<Vec<AlertRule>>;
    async fn create_alert(&self, scope_id: &str, alert: &NewAlert) -> ConsoleResult<AlertRule>;
    async fn delete_alert(&self, alert_id: u64) -> ConsoleResult<()>;
}

/// Computes the actual and noised value of a single preview.
#[async_trait]
pub trait PreviewCompute: Send + Sync {
    async fn preview(&self, request: &PreviewRequest) -> ConsoleResult<PreviewValues>;
}

/// Executes committed jobs. The executor is the authoritative budget check.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn submit(&self, spec: &JobSpec) -> ConsoleResult<JobResult>;
    async fn get_job(&self, job_id: &str) -> ConsoleResult<JobResult>;
}

/// Read-only dataset and schema lookup.
#[async_trait]
pub trait DatasetApi: Send + Sync {
    async fn list_datasets(&self) -> ConsoleResult<Vec<Dataset>>;
    async fn get_dataset(&self, dataset_id: &str) -> ConsoleResult<Dataset>;
}

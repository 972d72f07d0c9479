//! HTTP+JSON client for every collaborator.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::alerts::AlertRule;
use crate::api::types::{BudgetAmount, Dataset, ErrorBody, NewAlert, NewScope};
use crate::api::{AlertApi, DatasetApi, JobExecutor, LedgerApi, PreviewCompute};
use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, ConsoleResult};
use crate::ledger::BudgetScope;
use crate::preview::{PreviewRequest, PreviewValues};
use crate::timeout::TimeoutConfig;
use crate::wizard::{JobResult, JobSpec};

/// The scopes a request's error responses refer to.
#[derive(Debug, Clone, Copy, Default)]
struct ScopeRef<'a> {
    /// Scope named in the request path; a 404 means it does not exist.
    path: Option<&'a str>,
    /// Scope a budget rejection is attributed to.
    budget: Option<&'a str>,
}

impl<'a> ScopeRef<'a> {
    const NONE: ScopeRef<'static> = ScopeRef {
        path: None,
        budget: None,
    };

    fn path(scope_id: &'a str) -> Self {
        Self {
            path: Some(scope_id),
            budget: Some(scope_id),
        }
    }

    fn budget(scope_id: Option<&'a str>) -> Self {
        Self {
            path: None,
            budget: scope_id,
        }
    }
}

/// Client for the console's collaborators, rooted at a configured base URL.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    timeouts: TimeoutConfig,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, timeouts: TimeoutConfig) -> ConsoleResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("dpconsole/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConsoleError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeouts,
        })
    }

    pub fn from_config(config: &ConsoleConfig) -> ConsoleResult<Self> {
        Self::new(config.base_url(), config.timeouts())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{}", self.base_url, path))
            .timeout(self.timeouts.request_timeout)
    }

    /// Send, map failures, and decode the JSON body.
    ///
    /// `scopes` says which scope a 404 or a budget rejection refers to.
    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        limit: Duration,
        request: RequestBuilder,
        scopes: ScopeRef<'_>,
    ) -> ConsoleResult<T> {
        let response = self.send(operation, limit, request, scopes).await?;
        response
            .json()
            .await
            .map_err(|e| transport_error(e, operation, limit))
    }

    async fn send(
        &self,
        operation: &str,
        limit: Duration,
        request: RequestBuilder,
        scopes: ScopeRef<'_>,
    ) -> ConsoleResult<Response> {
        let response = request
            .timeout(limit)
            .send()
            .await
            .map_err(|e| transport_error(e, operation, limit))?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response, scopes).await)
        }
    }
}

fn transport_error(err: reqwest::Error, operation: &str, after: Duration) -> ConsoleError {
    if err.is_timeout() {
        ConsoleError::Timeout {
            operation: operation.to_string(),
            after,
        }
    } else if err.is_decode() {
        ConsoleError::Transport(format!("{}: malformed response: {}", operation, err))
    } else {
        ConsoleError::Transport(format!("{}: {}", operation, err))
    }
}

async fn error_from_response(response: Response, scopes: ScopeRef<'_>) -> ConsoleError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let (message, kind) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.error, body.kind),
        Err(_) => (text.trim().to_string(), String::new()),
    };
    classify(status, message, &kind, scopes)
}

fn classify(status: StatusCode, message: String, kind: &str, scopes: ScopeRef<'_>) -> ConsoleError {
    if kind == "budget_exceeded" || message.to_ascii_lowercase().contains("budget exceeded") {
        return ConsoleError::BudgetExceeded {
            scope_id: scopes.budget.unwrap_or_default().to_string(),
            detail: message,
        };
    }
    match (status, kind) {
        (StatusCode::NOT_FOUND, _) => match scopes.path {
            Some(id) => ConsoleError::ScopeNotFound(id.to_string()),
            None if message.is_empty() => ConsoleError::NotFound(format!("HTTP {}", status)),
            None => ConsoleError::NotFound(message),
        },
        (_, "scope_exists") => {
            ConsoleError::ScopeExists(scopes.path.unwrap_or(&message).to_string())
        }
        (_, "validation") => ConsoleError::Validation(message),
        _ if message.is_empty() => ConsoleError::Transport(format!("HTTP {}", status)),
        _ => ConsoleError::Transport(format!("HTTP {}: {}", status, message)),
    }
}

#[async_trait]
impl LedgerApi for HttpClient {
    async fn list_scopes(&self) -> ConsoleResult<Vec<BudgetScope>> {
        let request = self.request(Method::GET, "scopes");
        self.send_json("list scopes", self.timeouts.request_timeout, request, ScopeRef::NONE)
            .await
    }

    async fn get_scope(&self, scope_id: &str) -> ConsoleResult<BudgetScope> {
        let request = self.request(Method::GET, &format!("scope/{}", scope_id));
        self.send_json("get scope", self.timeouts.request_timeout, request, ScopeRef::path(scope_id))
            .await
    }

    async fn create_scope(&self, scope: &NewScope) -> ConsoleResult<BudgetScope> {
        let request = self.request(Method::POST, "scopes").json(scope);
        self.send_json("create scope", self.timeouts.request_timeout, request, ScopeRef::NONE)
            .await
            .map_err(|err| match err {
                ConsoleError::ScopeExists(_) => ConsoleError::ScopeExists(scope.id.clone()),
                other => other,
            })
    }

    async fn allocate(&self, scope_id: &str, amount: BudgetAmount) -> ConsoleResult<BudgetScope> {
        let request = self
            .request(Method::POST, &format!("scope/{}/allocate", scope_id))
            .json(&amount);
        self.send_json("allocate budget", self.timeouts.request_timeout, request, ScopeRef::path(scope_id))
            .await
    }

    async fn consume(&self, scope_id: &str, amount: BudgetAmount) -> ConsoleResult<BudgetScope> {
        let request = self
            .request(Method::POST, &format!("scope/{}/consume", scope_id))
            .json(&amount);
        self.send_json("consume budget", self.timeouts.request_timeout, request, ScopeRef::path(scope_id))
            .await
    }

    async fn reset(&self, scope_id: &str) -> ConsoleResult<BudgetScope> {
        let request = self.request(Method::POST, &format!("scope/{}/reset", scope_id));
        self.send_json("reset budget", self.timeouts.request_timeout, request, ScopeRef::path(scope_id))
            .await
    }
}

#[async_trait]
impl AlertApi for HttpClient {
    async fn list_alerts(&self, scope_id: &str) -> ConsoleResult<Vec<AlertRule>> {
        let request = self.request(Method::GET, &format!("scope/{}/alerts", scope_id));
        self.send_json("list alerts", self.timeouts.request_timeout, request, ScopeRef::path(scope_id))
            .await
    }

    async fn create_alert(&self, scope_id: &str, alert: &NewAlert) -> ConsoleResult<AlertRule> {
        let request = self
            .request(Method::POST, &format!("scope/{}/alerts", scope_id))
            .json(alert);
        self.send_json("create alert", self.timeouts.request_timeout, request, ScopeRef::path(scope_id))
            .await
    }

    async fn delete_alert(&self, alert_id: u64) -> ConsoleResult<()> {
        let request = self.request(Method::DELETE, &format!("alerts/{}", alert_id));
        self.send("delete alert", self.timeouts.request_timeout, request, ScopeRef::NONE)
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl PreviewCompute for HttpClient {
    async fn preview(&self, request: &PreviewRequest) -> ConsoleResult<PreviewValues> {
        let http_request = self.request(Method::POST, "preview").json(request);
        self.send_json("preview", self.timeouts.preview_timeout, http_request, ScopeRef::NONE)
            .await
    }
}

#[async_trait]
impl JobExecutor for HttpClient {
    async fn submit(&self, spec: &JobSpec) -> ConsoleResult<JobResult> {
        let request = self.request(Method::POST, "jobs").json(spec);
        self.send_json(
            "job commit",
            self.timeouts.commit_timeout,
            request,
            ScopeRef::budget(spec.budget_scope_id.as_deref()),
        )
        .await
    }

    async fn get_job(&self, job_id: &str) -> ConsoleResult<JobResult> {
        let request = self.request(Method::GET, &format!("jobs/{}", job_id));
        self.send_json("get job", self.timeouts.request_timeout, request, ScopeRef::NONE)
            .await
    }
}

#[async_trait]
impl DatasetApi for HttpClient {
    async fn list_datasets(&self) -> ConsoleResult<Vec<Dataset>> {
        let request = self.request(Method::GET, "datasets");
        self.send_json("list datasets", self.timeouts.request_timeout, request, ScopeRef::NONE)
            .await
    }

    async fn get_dataset(&self, dataset_id: &str) -> ConsoleResult<Dataset> {
        let request = self.request(Method::GET, &format!("datasets/{}", dataset_id));
        self.send_json("get dataset", self.timeouts.request_timeout, request, ScopeRef::NONE)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client =
            HttpClient::new("http://127.0.0.1:8000/api/", TimeoutConfig::default()).expect("client");
        assert_eq!(client.base_url(), "http://127.0.0.1:8000/api");
    }

    #[test]
    fn test_classify_budget_exceeded_by_kind_or_text() {
        let by_kind = classify(
            StatusCode::CONFLICT,
            "not enough epsilon".to_string(),
            "budget_exceeded",
            ScopeRef::path("ds_001"),
        );
        assert!(matches!(
            by_kind,
            ConsoleError::BudgetExceeded { ref scope_id, .. } if scope_id == "ds_001"
        ));

        let by_text = classify(
            StatusCode::BAD_REQUEST,
            "Privacy Budget Exceeded".to_string(),
            "",
            ScopeRef::NONE,
        );
        assert!(matches!(by_text, ConsoleError::BudgetExceeded { .. }));
    }

    #[test]
    fn test_classify_not_found() {
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, String::new(), "", ScopeRef::path("ds_9")),
            ConsoleError::ScopeNotFound(id) if id == "ds_9"
        ));
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, "job 4".to_string(), "", ScopeRef::NONE),
            ConsoleError::NotFound(_)
        ));
    }

    #[test]
    fn test_classify_other_failures_are_transport() {
        let err = classify(
            StatusCode::INTERNAL_SERVER_ERROR,
            "database is locked".to_string(),
            "",
            ScopeRef::NONE,
        );
        assert!(matches!(err, ConsoleError::Transport(ref m) if m.contains("database is locked")));
        assert!(matches!(
            classify(StatusCode::BAD_GATEWAY, String::new(), "", ScopeRef::NONE),
            ConsoleError::Transport(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, "epsilon".to_string(), "validation", ScopeRef::NONE),
            ConsoleError::Validation(_)
        ));
    }

    #[test]
    fn test_classify_job_commit_errors() {
        let scopes = ScopeRef::budget(Some("ds_001"));
        let missing_dataset = classify(
            StatusCode::NOT_FOUND,
            "Dataset not found".to_string(),
            "",
            scopes,
        );
        assert!(matches!(
            missing_dataset,
            ConsoleError::NotFound(ref m) if m == "Dataset not found"
        ));

        let over_budget = classify(
            StatusCode::CONFLICT,
            "not enough epsilon".to_string(),
            "budget_exceeded",
            scopes,
        );
        assert!(matches!(
            over_budget,
            ConsoleError::BudgetExceeded { ref scope_id, .. } if scope_id == "ds_001"
        ));
    }

    #[tokio::test]
    async fn test_unreachable_collaborator_is_transport_error() {
        // Port 9 (discard) is not expected to accept HTTP connections.
        let client = HttpClient::new(
            "http://127.0.0.1:9",
            TimeoutConfig::default().with_request_timeout(Duration::from_secs(2)),
        )
        .expect("client");
        let err = client.list_scopes().await.expect_err("unreachable");
        assert!(matches!(
            err,
            ConsoleError::Transport(_) | ConsoleError::Timeout { .. }
        ));
    }
}

//! Ledger, alert and wizard flows over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dpconsole::alerts::{AlertEvent, AlertMonitor, LogNotifier};
use dpconsole::api::{AlertApi, BudgetAmount, HttpClient, JobExecutor, LedgerApi, NewAlert, NewScope};
use dpconsole::server::AppState;
use dpconsole::timeout::TimeoutConfig;
use dpconsole::wizard::{JobResult, JobSpec, StepKind};
use dpconsole::{ConsoleError, ConsoleResult, JobWizard, Metric};
use tempfile::TempDir;

use crate::support::TestServer;

fn client_for(server: &TestServer) -> HttpClient {
    HttpClient::new(server.base_url(), TimeoutConfig::default()).expect("Failed to build client")
}

fn new_scope(id: &str, total_epsilon: f64) -> NewScope {
    NewScope {
        id: id.to_string(),
        name: format!("{} ledger", id),
        total_epsilon,
        total_delta: 1e-5,
    }
}

#[tokio::test]
async fn test_ledger_roundtrip() {
    let server = TestServer::start(AppState::in_memory()).await;
    let client = client_for(&server);

    client
        .create_scope(&new_scope("ds_001", 10.0))
        .await
        .expect("create scope");
    assert!(matches!(
        client.create_scope(&new_scope("ds_001", 1.0)).await,
        Err(ConsoleError::ScopeExists(id)) if id == "ds_001"
    ));

    let scope = client
        .consume("ds_001", BudgetAmount { epsilon: 4.0, delta: 0.0 })
        .await
        .expect("consume");
    assert_eq!(scope.remaining().epsilon, 6.0);
    assert_eq!(scope.remaining().delta, 1e-5);

    let scope = client
        .allocate("ds_001", BudgetAmount { epsilon: 2.0, delta: 0.0 })
        .await
        .expect("allocate");
    assert_eq!(scope.total_epsilon, 12.0);
    assert_eq!(scope.consumed_epsilon, 4.0);

    let scope = client.reset("ds_001").await.expect("reset");
    assert_eq!(scope.remaining().epsilon, 12.0);

    let scopes = client.list_scopes().await.expect("list");
    assert_eq!(scopes.len(), 1);
}

#[tokio::test]
async fn test_budget_exceeded_and_missing_scope_are_typed() {
    let server = TestServer::start(AppState::in_memory()).await;
    let client = client_for(&server);
    client
        .create_scope(&new_scope("ds_001", 10.0))
        .await
        .expect("create scope");
    client
        .consume("ds_001", BudgetAmount { epsilon: 9.0, delta: 0.0 })
        .await
        .expect("consume");

    let err = client
        .consume("ds_001", BudgetAmount { epsilon: 2.0, delta: 0.0 })
        .await
        .expect_err("over budget");
    assert!(matches!(err, ConsoleError::BudgetExceeded { ref scope_id, .. } if scope_id == "ds_001"));
    assert_eq!(
        client.get_scope("ds_001").await.expect("get").consumed_epsilon,
        9.0
    );

    let err = client.get_scope("nope").await.expect_err("missing");
    assert!(matches!(err, ConsoleError::ScopeNotFound(id) if id == "nope"));

    let err = client
        .allocate("ds_001", BudgetAmount { epsilon: -1.0, delta: 0.0 })
        .await
        .expect_err("negative");
    assert!(matches!(err, ConsoleError::Validation(_)));
}

#[tokio::test]
async fn test_alerts_roundtrip_with_monitor() {
    let server = TestServer::start(AppState::in_memory()).await;
    let client = client_for(&server);
    client
        .create_scope(&new_scope("ds_001", 10.0))
        .await
        .expect("create scope");

    let (monitor, mut events) =
        AlertMonitor::new(Arc::clone(&server.state.alerts), Arc::new(LogNotifier));
    monitor.start(server.state.ledger.subscribe()).await;

    let rule = client
        .create_alert(
            "ds_001",
            &NewAlert {
                threshold: 80.0,
                target: "dpo@example.org".to_string(),
            },
        )
        .await
        .expect("create alert");
    assert!(!rule.triggered);

    client
        .consume("ds_001", BudgetAmount { epsilon: 8.5, delta: 0.0 })
        .await
        .expect("consume");

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("alert in time")
        .expect("monitor running");
    assert!(matches!(event, AlertEvent::Raised { ref rule, .. } if rule.scope_id == "ds_001"));

    let rules = client.list_alerts("ds_001").await.expect("list alerts");
    assert_eq!(rules.len(), 1);
    assert!(rules[0].triggered);

    client.delete_alert(rule.id).await.expect("delete");
    assert!(client.list_alerts("ds_001").await.expect("list").is_empty());
    assert!(matches!(
        client.delete_alert(rule.id).await,
        Err(ConsoleError::NotFound(_))
    ));

    monitor.stop().await;
}

/// Books the job's budget on the ledger, as the execution service does.
struct BookingExecutor {
    ledger: HttpClient,
}

#[async_trait]
impl JobExecutor for BookingExecutor {
    async fn submit(&self, spec: &JobSpec) -> ConsoleResult<JobResult> {
        if let Some(scope_id) = &spec.budget_scope_id {
            self.ledger
                .consume(
                    scope_id,
                    BudgetAmount {
                        epsilon: spec.epsilon,
                        delta: spec.delta,
                    },
                )
                .await?;
        }
        Ok(JobResult {
            id: "42".to_string(),
            status: "completed".to_string(),
            results: Vec::new(),
        })
    }

    async fn get_job(&self, job_id: &str) -> ConsoleResult<JobResult> {
        Err(ConsoleError::NotFound(job_id.to_string()))
    }
}

#[tokio::test]
async fn test_wizard_against_remote_ledger() {
    let server = TestServer::start(AppState::in_memory()).await;
    let client = Arc::new(client_for(&server));
    client
        .create_scope(&new_scope("ds_001", 10.0))
        .await
        .expect("create scope");

    let executor = Arc::new(BookingExecutor {
        ledger: client_for(&server),
    });
    let wizard = JobWizard::new(executor).with_ledger(client.clone());

    wizard.select_dataset("ds_001").expect("dataset");
    wizard.next().expect("configure");
    wizard.set_metrics([Metric::Count, Metric::Mean]).expect("metrics");
    wizard.set_epsilon(1.5).expect("epsilon");
    wizard.bind_scope(Some("ds_001")).expect("bind");
    wizard.next().expect("review");

    let result = wizard.submit().await.expect("submit");
    assert_eq!(result.id, "42");
    assert_eq!(wizard.step(), StepKind::Completed);

    // The ledger reflects the executor's booking, not a wizard-side consume.
    let scope = client.get_scope("ds_001").await.expect("get");
    assert_eq!(scope.consumed_epsilon, 1.5);
}

#[tokio::test]
async fn test_persisted_server_state_survives_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    {
        let server = TestServer::start(AppState::open(temp_dir.path()).expect("open")).await;
        let client = client_for(&server);
        client
            .create_scope(&new_scope("ds_001", 10.0))
            .await
            .expect("create scope");
        client
            .consume("ds_001", BudgetAmount { epsilon: 3.0, delta: 0.0 })
            .await
            .expect("consume");
    }

    let server = TestServer::start(AppState::open(temp_dir.path()).expect("reopen")).await;
    let scope = client_for(&server)
        .get_scope("ds_001")
        .await
        .expect("get after restart");
    assert_eq!(scope.consumed_epsilon, 3.0);

    let audit = server
        .state
        .ledger
        .audit_trail()
        .expect("audit trail")
        .load()
        .expect("load audit");
    assert_eq!(audit.len(), 2);
}

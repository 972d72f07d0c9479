//! Dataset catalog, job execution and preview collaborators over real HTTP.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dpconsole::api::{DatasetApi, HttpClient, JobExecutor};
use dpconsole::preview::{PreviewEvent, PreviewRequest};
use dpconsole::wizard::{JobSpec, StepKind};
use dpconsole::{ConsoleConfig, ConsoleError, JobWizard, Metric, PreviewEngine};
use serde_json::{json, Value};

use crate::support::StubServer;

fn customer_events() -> Value {
    json!({
        "id": "ds_001",
        "name": "customer_events",
        "description": "Checkout events",
        "row_count": 125000,
        "columns": [
            {"name": "amount", "dtype": "float64", "min_val": 0.0, "max_val": 500.0},
            {"name": "age", "dtype": "int32"},
            {"name": "email", "dtype": "string", "is_pii": true},
            {"name": "region", "dtype": "string", "is_categorical": true}
        ]
    })
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"detail": "Dataset not found"})),
    )
        .into_response()
}

async fn list_datasets() -> Json<Value> {
    Json(json!([customer_events(), {"id": 7, "name": "payroll"}]))
}

async fn get_dataset(Path(id): Path<String>) -> Response {
    match id.as_str() {
        "ds_001" => Json(customer_events()).into_response(),
        _ => not_found(),
    }
}

async fn submit_job(Json(spec): Json<JobSpec>) -> Response {
    if spec.dataset_id != "ds_001" {
        return not_found();
    }
    Json(json!({
        "id": 42,
        "status": "completed",
        "results": spec.columns.iter().map(|c| json!({"column": c})).collect::<Vec<_>>()
    }))
    .into_response()
}

async fn preview(Json(request): Json<PreviewRequest>) -> Json<Value> {
    Json(json!({
        "actualValue": 100.0,
        "privateValue": 100.0 + request.epsilon
    }))
}

pub(crate) async fn start_catalog() -> StubServer {
    let router = Router::new()
        .route("/api/datasets", get(list_datasets))
        .route("/api/datasets/{id}", get(get_dataset))
        .route("/api/jobs", post(submit_job))
        .route("/api/preview", post(preview));
    StubServer::start(router).await
}

fn config_for(server: &StubServer) -> ConsoleConfig {
    ConsoleConfig::default()
        .with_base_url(server.base_url())
        .with_debounce(Duration::from_millis(20))
}

#[tokio::test]
async fn test_dataset_catalog_roundtrip() {
    let server = start_catalog().await;
    let client = HttpClient::from_config(&config_for(&server)).expect("client");

    let datasets = client.list_datasets().await.expect("list");
    assert_eq!(datasets.len(), 2);
    assert_eq!(datasets[1].id, "7");

    let dataset = client.get_dataset("ds_001").await.expect("get");
    assert_eq!(dataset.row_count, Some(125_000));
    let numeric: Vec<&str> = dataset.numeric_columns().map(|c| c.name.as_str()).collect();
    assert_eq!(numeric, vec!["amount", "age"]);
    assert!(dataset.columns[2].is_pii);

    match client.get_dataset("ds_404").await {
        Err(ConsoleError::NotFound(message)) => assert_eq!(message, "Dataset not found"),
        other => panic!("expected not found, got {:?}", other),
    }
}

#[tokio::test]
async fn test_job_for_unknown_dataset_is_not_a_missing_scope() {
    let server = start_catalog().await;
    let client = HttpClient::from_config(&config_for(&server)).expect("client");

    let spec = JobSpec {
        dataset_id: "ds_404".to_string(),
        columns: vec!["amount".to_string()],
        metrics: vec![Metric::Mean],
        epsilon: 1.0,
        delta: 0.0,
        mechanism: Default::default(),
        budget_scope_id: Some("ds_001".to_string()),
    };
    match client.submit(&spec).await {
        Err(ConsoleError::NotFound(message)) => assert_eq!(message, "Dataset not found"),
        other => panic!("expected not found, got {:?}", other),
    }
}

#[tokio::test]
async fn test_wizard_uses_catalog_schema() {
    let server = start_catalog().await;
    let config = config_for(&server);
    let client = Arc::new(HttpClient::from_config(&config).expect("client"));
    let (engine, mut events) = PreviewEngine::from_config(client.clone(), &config);
    let wizard = JobWizard::from_config(client.clone(), &config)
        .with_datasets(client)
        .with_preview(engine);

    assert!(matches!(
        wizard.choose_dataset("ds_404").await,
        Err(ConsoleError::NotFound(_))
    ));
    assert_eq!(wizard.step(), StepKind::SelectTarget);

    wizard.choose_dataset("ds_001").await.expect("dataset");
    assert!(wizard.set_columns(vec!["salary".to_string()]).is_err());
    wizard.next().expect("configure");
    wizard.set_epsilon(0.5).expect("epsilon");
    wizard.set_metrics([Metric::Sum]).expect("metrics");

    let mut previewed = Vec::new();
    while previewed.len() < 2 {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("preview in time")
            .expect("event");
        if let PreviewEvent::Ready(result) = event {
            assert_eq!(result.private_value, 100.5);
            previewed.push(result.channel.column);
        }
    }
    previewed.sort();
    assert_eq!(previewed, vec!["age", "amount"]);

    wizard.next().expect("review");
    let result = wizard.submit().await.expect("submit");
    assert_eq!(result.id, "42");
    assert_eq!(wizard.step(), StepKind::Completed);
}

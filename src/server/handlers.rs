//! Ledger and alert endpoints.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::alerts::{evaluate, AlertBook, AlertRule, ScopeStatus};
use crate::api::{BudgetAmount, LedgerApi, NewAlert, NewScope};
use crate::error::ConsoleResult;
use crate::ledger::{BudgetScope, Remaining, UsageRatio};
use crate::server::extract::ApiJson;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Derived view of a scope for dashboards.
#[derive(Debug, Serialize)]
pub struct ScopeSummary {
    pub scope: BudgetScope,
    pub remaining: Remaining,
    pub usage: UsageRatio,
    pub status: ScopeStatus,
    pub triggered_alerts: BTreeSet<u64>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn list_scopes(State(state): State<AppState>) -> Json<Vec<BudgetScope>> {
    Json(state.ledger.list().await)
}

pub async fn create_scope(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<NewScope>,
) -> ConsoleResult<(StatusCode, Json<BudgetScope>)> {
    let scope = LedgerApi::create_scope(state.ledger.as_ref(), &body).await?;
    Ok((StatusCode::CREATED, Json(scope)))
}

pub async fn get_scope(
    State(state): State<AppState>,
    Path(scope_id): Path<String>,
) -> ConsoleResult<Json<BudgetScope>> {
    Ok(Json(state.ledger.get(&scope_id).await?))
}

pub async fn scope_summary(
    State(state): State<AppState>,
    Path(scope_id): Path<String>,
) -> ConsoleResult<Json<ScopeSummary>> {
    let scope = state.ledger.get(&scope_id).await?;
    let triggered_alerts = evaluate(&scope, &state.alerts.rules_for(&scope_id));
    Ok(Json(ScopeSummary {
        remaining: scope.remaining(),
        usage: scope.usage_ratio(),
        status: scope.status(),
        triggered_alerts,
        scope,
    }))
}

pub async fn allocate(
    State(state): State<AppState>,
    Path(scope_id): Path<String>,
    ApiJson(amount): ApiJson<BudgetAmount>,
) -> ConsoleResult<Json<BudgetScope>> {
    let scope = state
        .ledger
        .allocate(&scope_id, amount.epsilon, amount.delta)
        .await?;
    Ok(Json(scope))
}

pub async fn consume(
    State(state): State<AppState>,
    Path(scope_id): Path<String>,
    ApiJson(amount): ApiJson<BudgetAmount>,
) -> ConsoleResult<Json<BudgetScope>> {
    let scope = state
        .ledger
        .consume(&scope_id, amount.epsilon, amount.delta)
        .await?;
    Ok(Json(scope))
}

pub async fn reset(
    State(state): State<AppState>,
    Path(scope_id): Path<String>,
) -> ConsoleResult<Json<BudgetScope>> {
    Ok(Json(state.ledger.reset(&scope_id).await?))
}

pub async fn list_alerts(
    State(state): State<AppState>,
    Path(scope_id): Path<String>,
) -> ConsoleResult<Json<Vec<AlertRule>>> {
    state.ledger.get(&scope_id).await?;
    Ok(Json(state.alerts.rules_for(&scope_id)))
}

pub async fn create_alert(
    State(state): State<AppState>,
    Path(scope_id): Path<String>,
    ApiJson(body): ApiJson<NewAlert>,
) -> ConsoleResult<(StatusCode, Json<AlertRule>)> {
    state.ledger.get(&scope_id).await?;
    let rule = with_alerts(&state, move |alerts| {
        alerts.add_rule(&scope_id, body.threshold, &body.target)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

pub async fn delete_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<u64>,
) -> ConsoleResult<StatusCode> {
    with_alerts(&state, move |alerts| alerts.remove_rule(alert_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Runs alert book mutations, which write the rules file, on the blocking pool.
async fn with_alerts<T, F>(state: &AppState, work: F) -> ConsoleResult<T>
where
    F: FnOnce(&AlertBook) -> ConsoleResult<T> + Send + 'static,
    T: Send + 'static,
{
    let alerts = Arc::clone(&state.alerts);
    tokio::task::spawn_blocking(move || work(&alerts)).await?
}

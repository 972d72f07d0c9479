//! Local ledger and alert service.
//!
//! Serves the ledger and alert collaborator endpoints under `/api`, so a
//! console configured with `api.base_url = "http://<bind>/api"` can use it
//! directly.
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/api/scopes` | list scopes |
//! | POST | `/api/scopes` | create a scope |
//! | GET | `/api/scope/{id}` | one scope |
//! | GET | `/api/scope/{id}/summary` | remaining, usage, bands, triggered alerts |
//! | POST | `/api/scope/{id}/allocate` | add to totals |
//! | POST | `/api/scope/{id}/consume` | book a committed job |
//! | POST | `/api/scope/{id}/reset` | zero consumption |
//! | GET, POST | `/api/scope/{id}/alerts` | list / add alert rules |
//! | DELETE | `/api/alerts/{id}` | remove an alert rule |

mod error;
pub mod extract;
pub mod handlers;

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::alerts::AlertBook;
use crate::error::ConsoleResult;
use crate::ledger::BudgetLedger;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<BudgetLedger>,
    pub alerts: Arc<AlertBook>,
}

impl AppState {
    pub fn new(ledger: Arc<BudgetLedger>, alerts: Arc<AlertBook>) -> Self {
        Self { ledger, alerts }
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(BudgetLedger::in_memory()),
            Arc::new(AlertBook::in_memory()),
        )
    }

    /// State persisted under `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>) -> ConsoleResult<Self> {
        let data_dir = data_dir.as_ref();
        Ok(Self::new(
            Arc::new(BudgetLedger::open(data_dir)?),
            Arc::new(AlertBook::open(data_dir)?),
        ))
    }
}

/// The full application router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/scopes",
            get(handlers::list_scopes).post(handlers::create_scope),
        )
        .route("/scope/{id}", get(handlers::get_scope))
        .route("/scope/{id}/summary", get(handlers::scope_summary))
        .route("/scope/{id}/allocate", post(handlers::allocate))
        .route("/scope/{id}/consume", post(handlers::consume))
        .route("/scope/{id}/reset", post(handlers::reset))
        .route(
            "/scope/{id}/alerts",
            get(handlers::list_alerts).post(handlers::create_alert),
        )
        .route("/alerts/{id}", delete(handlers::delete_alert));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> ConsoleResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "dpconsole server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

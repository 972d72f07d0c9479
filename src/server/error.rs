use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::api::ErrorBody;
use crate::error::ConsoleError;

pub(crate) fn status_for(err: &ConsoleError) -> StatusCode {
    match err {
        ConsoleError::Validation(_) => StatusCode::BAD_REQUEST,
        ConsoleError::ScopeNotFound(_) | ConsoleError::NotFound(_) => StatusCode::NOT_FOUND,
        ConsoleError::ScopeExists(_) | ConsoleError::BudgetExceeded { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ConsoleError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            tracing::error!(error = %self, kind = self.kind(), "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

//! Request extractors whose rejections use the console error body.

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::Json;

use crate::error::ConsoleError;

/// `Json<T>` whose rejection is a `Validation` error, so malformed bodies get
/// the same `{"error", "kind"}` reply as every other failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ConsoleError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ConsoleError::validation(format!(
                "invalid request body: {}",
                rejection.body_text()
            ))),
        }
    }
}

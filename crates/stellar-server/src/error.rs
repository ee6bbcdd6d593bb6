//! Error types for the sync server's HTTP layer.
//!
//! [`ApiError`] converts into an Axum response with a small JSON body via
//! its [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use stellar_core::runtime::RuntimeError;

/// Errors returned by REST handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The sync store actor is not running.
    #[error("sync store unavailable: {0}")]
    StoreUnavailable(#[from] RuntimeError),

    /// No route matched the request path.
    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

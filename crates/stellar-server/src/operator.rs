//! Operator (admin) REST handlers.
//!
//! These are the server-side counterparts of the admin dashboard's buttons.
//! They submit the same events a device would, with no origin, so every
//! connected device receives the resulting broadcast.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/operator/reset` | Return every device to the initial state |
//! | `POST` | `/api/operator/countdown` | Start the countdown-to-launch now |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use stellar_types::ClientMessage;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

/// Generic success response.
#[derive(Debug, serde::Serialize)]
struct OperatorResponse {
    /// Whether the operation was queued.
    ok: bool,
    /// Human-readable message.
    message: &'static str,
}

/// Reset the shared state and cancel all timers.
pub async fn reset(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.store.submit(None, ClientMessage::ResetState).await?;
    info!("Operator reset requested");
    Ok(Json(OperatorResponse {
        ok: true,
        message: "State reset",
    }))
}

/// Start the countdown-to-launch, superseding any countdown in progress.
pub async fn countdown(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    state.store.submit(None, ClientMessage::StartCountdown).await?;
    info!("Operator countdown requested");
    Ok(Json(OperatorResponse {
        ok: true,
        message: "Countdown started",
    }))
}

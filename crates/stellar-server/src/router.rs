//! Axum router construction for the sync server.
//!
//! Assembles REST, operator and `WebSocket` routes into one [`Router`] with
//! request tracing and permissive CORS, since the displays are served from
//! a different origin.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{handlers, operator, ws};

/// Build the complete Axum router.
///
/// The router includes:
/// - `GET /` -- minimal HTML status page
/// - `GET /ws` -- device `WebSocket`
/// - `GET /api/state` -- authoritative shared state
/// - `GET /api/status` -- store status
/// - `POST /api/operator/reset` -- reset everything
/// - `POST /api/operator/countdown` -- start the countdown
///
/// Unmatched paths return a JSON 404.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/ws", get(ws::ws_sync))
        .route("/api/state", get(handlers::get_state))
        .route("/api/status", get(handlers::get_status))
        .route("/api/operator/reset", post(operator::reset))
        .route("/api/operator/countdown", post(operator::countdown))
        .fallback(handlers::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

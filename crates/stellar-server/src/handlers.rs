//! REST API endpoint handlers for the sync server.
//!
//! All reads go through the [`SyncHandle`](stellar_core::SyncHandle), so a
//! REST reader sees exactly the state a device connecting at the same
//! instant would receive.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `GET` | `/api/state` | Current authoritative shared state |
//! | `GET` | `/api/status` | Store status: clients, timers, counters |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::Uri;
use axum::response::{Html, IntoResponse};

use crate::error::ApiError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET / -- minimal HTML status page
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page showing the live state and API links.
pub async fn index(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let status = state.store.status().await?;
    let scene = status.state;
    let clients = status.connected_clients;
    let snaps = scene.snap_count;
    let threshold = state.config.timing.snap_threshold;
    let (x, y) = (scene.star_position.x, scene.star_position.y);
    let pulse = if scene.pulse_active { "ACTIVE" } else { "idle" };
    let countdown = if scene.countdown_active { "RUNNING" } else { "idle" };

    Ok(Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Stellar Sync Server</title>
    <style>
        body {{
            background: #05070d;
            color: #c9d1d9;
            font-family: 'Inter', 'Segoe UI', sans-serif;
            padding: 2rem;
            max-width: 800px;
            margin: 0 auto;
        }}
        h1 {{ color: #ffb72b; margin-bottom: 0.25rem; }}
        .subtitle {{ color: #8b949e; margin-top: 0; }}
        .metric {{
            display: inline-block;
            background: #0d1320;
            border: 1px solid #24304a;
            border-radius: 6px;
            padding: 1rem 1.5rem;
            margin: 0.5rem 0.5rem 0.5rem 0;
            min-width: 120px;
        }}
        .metric .label {{ color: #8b949e; font-size: 0.85rem; }}
        .metric .value {{ color: #ffb72b; font-size: 1.5rem; font-weight: bold; }}
        a {{ color: #58a6ff; text-decoration: none; }}
        ul {{ list-style: none; padding: 0; }}
        li {{ padding: 0.3rem 0; }}
        hr {{ border: none; border-top: 1px solid #24304a; margin: 1.5rem 0; }}
    </style>
</head>
<body>
    <h1>Stellar Sync Server</h1>
    <p class="subtitle">Authoritative scene state for every connected display</p>

    <div>
        <div class="metric">
            <div class="label">Devices</div>
            <div class="value">{clients}</div>
        </div>
        <div class="metric">
            <div class="label">Snaps</div>
            <div class="value">{snaps}/{threshold}</div>
        </div>
        <div class="metric">
            <div class="label">Pulse</div>
            <div class="value">{pulse}</div>
        </div>
        <div class="metric">
            <div class="label">Countdown</div>
            <div class="value">{countdown}</div>
        </div>
        <div class="metric">
            <div class="label">Star</div>
            <div class="value">{x:.1}, {y:.1}</div>
        </div>
    </div>

    <hr>

    <h3>Endpoints</h3>
    <ul>
        <li>GET <a href="/api/state">/api/state</a></li>
        <li>GET <a href="/api/status">/api/status</a></li>
        <li>GET /ws (WebSocket)</li>
        <li>POST /api/operator/reset</li>
        <li>POST /api/operator/countdown</li>
    </ul>
</body>
</html>"#
    )))
}

// ---------------------------------------------------------------------------
// GET /api/state
// ---------------------------------------------------------------------------

/// Return the current authoritative shared state.
pub async fn get_state(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.snapshot().await?))
}

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

/// Return connected-device count, armed timers and event counters.
pub async fn get_status(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.store.status().await?))
}

/// JSON 404 for unmatched routes.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(uri.path().to_owned())
}

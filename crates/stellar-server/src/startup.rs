//! Background startup helper.
//!
//! [`spawn_server`] launches the sync server on a background Tokio task so
//! it can run next to other work in the same process (a kiosk shell, an
//! integration test).

use std::sync::Arc;

use stellar_core::config::ServerSection;
use tokio::task::JoinHandle;

use crate::server::{ServerError, socket_addr, start_server};
use crate::state::AppState;

/// Errors that can occur when spawning the sync server.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The server failed to bind or start.
    #[error("server start error: {0}")]
    Server(#[from] ServerError),
}

/// Spawn the sync server on a background Tokio task.
///
/// The address is validated before the task is spawned so obvious
/// misconfigurations surface immediately; the bind itself happens on the
/// task and is logged if it fails.
///
/// # Errors
///
/// Returns [`StartupError::Server`] if `host:port` is not a valid address.
pub fn spawn_server(
    config: ServerSection,
    state: Arc<AppState>,
) -> Result<JoinHandle<()>, StartupError> {
    let addr = socket_addr(&config)?;

    let handle = tokio::spawn(async move {
        if let Err(e) = start_server(&config, state).await {
            tracing::error!(error = %e, "Sync server exited with error");
        }
    });

    tracing::info!(%addr, "Sync server spawned on background task");
    Ok(handle)
}

//! Shared application state for the sync server.
//!
//! [`AppState`] carries only a [`SyncHandle`]; handlers never touch the
//! shared scene directly. Every read and write goes through the actor.

use std::sync::Arc;

use stellar_core::SyncHandle;
use stellar_core::config::StellarConfig;

/// Shared state for the Axum application.
///
/// Wrapped in [`Arc`] and injected via Axum's `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Handle to the sync store actor.
    pub store: SyncHandle,
    /// Loaded configuration, served read-only.
    pub config: Arc<StellarConfig>,
}

impl AppState {
    /// Bundle a store handle with the configuration it was started from.
    pub fn new(store: SyncHandle, config: StellarConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }
}

//! Sync server binary for the Stellar installation.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `$STELLAR_CONFIG` (default
//!    `stellar-config.yaml`), falling back to defaults when absent
//! 2. Initialize structured logging (tracing)
//! 3. Spawn the sync store actor
//! 4. Serve HTTP + `WebSocket` until `Ctrl-C`

use std::path::PathBuf;
use std::sync::Arc;

use stellar_core::config::{ConfigError, LoggingConfig, StellarConfig};
use stellar_server::{AppState, ServerError, start_server};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Top-level error for the server binary.
#[derive(Debug, thiserror::Error)]
enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The HTTP server failed to bind or serve.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: ServerError,
    },
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let (config, path) = load_config()?;
    init_tracing(&config.logging);

    info!(
        config = %path.display(),
        host = %config.server.host,
        port = config.server.port,
        pulse_ms = config.timing.pulse_duration_ms,
        choreography = ?config.timing.choreography(),
        "Configuration loaded"
    );

    let (store, store_task) = stellar_core::spawn(config.timing.clone(), &config.server);
    let server = config.server.clone();
    let state = Arc::new(AppState::new(store, config));

    let result = start_server(&server, state).await;

    // Upgraded sockets may still hold handles; the actor need not drain.
    store_task.abort();
    info!("stellar-server stopped");
    result.map_err(AppError::from)
}

/// Read the config file named by `STELLAR_CONFIG`, or defaults if missing.
fn load_config() -> Result<(StellarConfig, PathBuf), ConfigError> {
    let path = std::env::var_os("STELLAR_CONFIG")
        .map_or_else(|| PathBuf::from("stellar-config.yaml"), PathBuf::from);
    let config = if path.exists() {
        StellarConfig::from_file(&path)?
    } else {
        // Still applies PORT / STELLAR_HOST.
        StellarConfig::parse("")?
    };
    Ok((config, path))
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

//! Sync server for the Stellar installation.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **`WebSocket` endpoint** (`/ws`) through which every display sends
//!   its gesture events and receives state broadcasts
//! - **REST endpoints** for reading the authoritative state and store
//!   status
//! - **Operator REST endpoints** for resetting the scene and starting the
//!   countdown from the admin dashboard
//! - **Minimal HTML status page** (`GET /`)
//!
//! # Architecture
//!
//! The shared scene lives inside the `stellar-core` sync actor. Handlers
//! and per-connection relays hold only a cloneable handle to it, so every
//! mutation is serialised in one place and every broadcast leaves the
//! actor in mutation order.

pub mod error;
pub mod handlers;
pub mod operator;
pub mod router;
pub mod server;
pub mod startup;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use router::build_router;
pub use server::{ServerError, serve, start_server};
pub use startup::spawn_server;
pub use state::AppState;

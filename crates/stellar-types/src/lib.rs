//! Shared type definitions for the Stellar installation.
//!
//! This crate is the single source of truth for every value that crosses a
//! process boundary: the shared scene state, classified gestures, and the
//! named channel events. Types flow downstream to `TypeScript` via `ts-rs`
//! for the browser front-end.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for connection identifiers
//! - [`state`] -- [`SharedState`], [`FullState`] and [`StarPosition`]
//! - [`gesture`] -- [`GestureEvent`] produced by the classifier
//! - [`messages`] -- [`ClientMessage`] / [`ServerMessage`] wire frames

pub mod gesture;
pub mod ids;
pub mod messages;
pub mod state;

// Re-export all public types at crate root for convenience.
pub use gesture::{GestureEvent, GestureKind};
pub use ids::ClientId;
pub use messages::{ClientMessage, ServerMessage};
pub use state::{FullState, SharedState, StarPosition};

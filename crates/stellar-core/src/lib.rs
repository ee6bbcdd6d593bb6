//! Authoritative shared-state engine for the Stellar installation.
//!
//! This crate owns the server side of the synchronisation core: every
//! device's gesture events funnel into one [`SyncStore`], which applies them
//! one at a time, owns the pulse and auto-reset timers, and produces the
//! broadcasts the relay fans out.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `stellar-config.yaml` into
//!   strongly-typed structs.
//! - [`store`] -- The [`SyncStore`] state machine and its [`Effect`]s.
//! - [`timer`] -- Cancellable, generation-tagged one-shot [`TimerSlot`]s.
//! - [`runtime`] -- The actor that serialises all mutation, and the
//!   cloneable [`SyncHandle`] used to reach it.
//!
//! [`SyncStore`]: store::SyncStore
//! [`Effect`]: store::Effect
//! [`TimerSlot`]: timer::TimerSlot
//! [`SyncHandle`]: runtime::SyncHandle

pub mod config;
pub mod runtime;
pub mod store;
pub mod timer;

pub use runtime::{spawn, StoreStatus, Subscription, SyncHandle};
pub use store::{Audience, Envelope};

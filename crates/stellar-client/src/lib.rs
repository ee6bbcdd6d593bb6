//! Device-side half of the Stellar installation.
//!
//! Each device runs one [`ClientSession`]: landmark frames from the hand
//! tracker go through the [`GestureClassifier`], self-originated effects are
//! predicted locally by the [`ClientReconciler`], and the resulting events
//! leave through an [`EventEmitter`]. Server pushes flow back into the same
//! reconciler.
//!
//! # Modules
//!
//! - [`landmarks`] -- Validated hand-landmark frames
//! - [`classifier`] -- Frame-to-gesture state machines
//! - [`emitter`] -- Gesture-to-channel adapter
//! - [`reconciler`] -- Local view, prediction, and server reconciliation
//! - [`session`] -- Per-device wiring, connectivity, and status line

pub mod classifier;
pub mod emitter;
pub mod landmarks;
pub mod reconciler;
pub mod session;

pub use classifier::{GestureClassifier, GestureStream};
pub use emitter::{EmitError, EventEmitter};
pub use landmarks::{Hand, Landmark, LandmarkFrame};
pub use reconciler::{ClientReconciler, ClientView, ScenePhase, SceneUpdate};
pub use session::{ClientSession, Connectivity, GestureStatus, Tracking};

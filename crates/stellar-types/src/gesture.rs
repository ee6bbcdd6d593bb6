//! Discrete gesture events produced by the per-device classifier.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::ClientId;

/// What the classifier recognised in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[ts(export, export_to = "bindings/")]
pub enum GestureKind {
    /// A thumb/index snap; `count` is the device's running tally in the
    /// current snap window, starting at 1.
    Snap {
        /// Local tally after this snap.
        count: u8,
    },
    /// A closed fist on any tracked hand.
    Fist,
    /// Both hands moved together; already scaled to scene units with y up.
    TwoHandMove {
        /// Horizontal displacement.
        dx: f64,
        /// Vertical displacement.
        dy: f64,
    },
    /// Nothing recognised this frame.
    None,
}

impl GestureKind {
    /// Short label used in log lines.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Snap { .. } => "snap",
            Self::Fist => "fist",
            Self::TwoHandMove { .. } => "two-hand-move",
            Self::None => "none",
        }
    }

    /// Whether this is the `None` placeholder.
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// One classified event.
///
/// `at_ms` is the device-local frame timestamp. The server orders events by
/// arrival and never trusts this clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct GestureEvent {
    /// The recognised gesture.
    pub kind: GestureKind,
    /// Originating device, once known.
    pub origin: Option<ClientId>,
    /// Device-local timestamp of the frame that produced the event.
    #[ts(type = "number")]
    pub at_ms: u64,
}

impl GestureEvent {
    /// Create an event with no origin attached yet.
    pub const fn local(kind: GestureKind, at_ms: u64) -> Self {
        Self {
            kind,
            origin: None,
            at_ms,
        }
    }

    /// Attach the originating client.
    #[must_use]
    pub const fn with_origin(mut self, origin: ClientId) -> Self {
        self.origin = Some(origin);
        self
    }
}

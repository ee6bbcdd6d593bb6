//! Named events exchanged over the publish/subscribe channel.
//!
//! Every frame on the wire is a JSON object of the form
//! `{"event": "<name>", "data": <payload>}`; events without a payload omit
//! `data`. [`ClientMessage`] flows device -> server and [`ServerMessage`]
//! flows server -> device.
//!
//! | Event | Direction | Payload |
//! |-------|-----------|---------|
//! | `trigger-pulse` | client -> server | none |
//! | `update-position` | client -> server | `{x, y}` displacement |
//! | `snap-detected` | client -> server | `{count}` |
//! | `start-countdown` | client -> server | none |
//! | `reset-state` | client -> server | none |
//! | `sync-state` | server -> one client | full state |
//! | `pulse-triggered` | server -> all | none |
//! | `pulse-ended` | server -> all | none |
//! | `position-updated` | server -> all but sender | `{x, y}` displacement |
//! | `snap-updated` | server -> all | `{count}` |
//! | `countdown-started` | server -> all | none |
//! | `state-reset` | server -> all | full state |

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::state::FullState;

/// Events a device sends to the server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
#[ts(export, export_to = "bindings/")]
pub enum ClientMessage {
    /// A fist was recognised; start (or extend) the pulse.
    TriggerPulse,
    /// Two-hand navigation moved the star by `(x, y)`.
    UpdatePosition {
        /// Horizontal displacement.
        x: f64,
        /// Vertical displacement.
        y: f64,
    },
    /// A snap was recognised; `count` is the device's local tally.
    SnapDetected {
        /// Local tally after this snap.
        count: u8,
    },
    /// Admin/manual path: start the countdown-to-launch immediately.
    StartCountdown,
    /// Admin path: return every device to the initial state.
    ResetState,
}

impl ClientMessage {
    /// Wire name of the event.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TriggerPulse => "trigger-pulse",
            Self::UpdatePosition { .. } => "update-position",
            Self::SnapDetected { .. } => "snap-detected",
            Self::StartCountdown => "start-countdown",
            Self::ResetState => "reset-state",
        }
    }

    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error for unknown events or malformed
    /// payloads.
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error if encoding fails.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Events the server pushes to devices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
#[ts(export, export_to = "bindings/")]
pub enum ServerMessage {
    /// Full state for a device that just connected (or resubscribed).
    SyncState(FullState),
    /// The pulse effect started or was extended.
    PulseTriggered,
    /// The pulse window elapsed.
    PulseEnded,
    /// Another device moved the star by `(x, y)`.
    PositionUpdated {
        /// Horizontal displacement.
        x: f64,
        /// Vertical displacement.
        y: f64,
    },
    /// The authoritative snap tally changed.
    SnapUpdated {
        /// Current tally.
        count: u8,
    },
    /// The countdown-to-launch choreography began; the snap tally is now 0.
    CountdownStarted,
    /// Everything returned to the given (initial) state.
    StateReset(FullState),
}

impl ServerMessage {
    /// Wire name of the event.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SyncState(_) => "sync-state",
            Self::PulseTriggered => "pulse-triggered",
            Self::PulseEnded => "pulse-ended",
            Self::PositionUpdated { .. } => "position-updated",
            Self::SnapUpdated { .. } => "snap-updated",
            Self::CountdownStarted => "countdown-started",
            Self::StateReset(_) => "state-reset",
        }
    }

    /// Whether the message carries the full state rather than a delta.
    pub const fn is_full_state(&self) -> bool {
        matches!(self, Self::SyncState(_) | Self::StateReset(_))
    }

    /// Readdress a full-state message to one device. Deltas are returned
    /// unchanged.
    #[must_use]
    pub const fn with_moves_applied(self, moves_applied: u32) -> Self {
        match self {
            Self::SyncState(full) => Self::SyncState(full.with_moves_applied(moves_applied)),
            Self::StateReset(full) => Self::StateReset(full.with_moves_applied(moves_applied)),
            other => other,
        }
    }

    /// Parse a text frame.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error for unknown events or malformed
    /// payloads.
    pub fn parse(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// Returns the underlying JSON error if encoding fails.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

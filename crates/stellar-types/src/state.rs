//! The shared scene state every connected device converges to.
//!
//! [`SharedState`] is what the server holds authoritatively. It ships in
//! full on `sync-state` and `state-reset`, wrapped in a [`FullState`] that
//! tells the receiving device how many of its own moves are already
//! included. Field names are camelCase on the wire to match the browser
//! front-end.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Cumulative offset of the star, driven by two-hand navigation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct StarPosition {
    /// Horizontal offset in scene units.
    pub x: f64,
    /// Vertical offset in scene units (positive is up).
    pub y: f64,
}

impl StarPosition {
    /// Construct a position from its components.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Return this position shifted by `(dx, dy)`.
    #[must_use]
    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// The singleton scene state shared by all displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SharedState {
    /// Star offset accumulated from two-hand navigation.
    pub star_position: StarPosition,
    /// Whether the stellar pulse effect is currently playing.
    pub pulse_active: bool,
    /// Snaps counted toward the launch threshold in the current window.
    pub snap_count: u8,
    /// Whether the countdown-to-launch choreography is running.
    pub countdown_active: bool,
}

impl SharedState {
    /// The state every session starts from and every reset returns to.
    pub const INITIAL: Self = Self {
        star_position: StarPosition::new(0.0, 0.0),
        pulse_active: false,
        snap_count: 0,
        countdown_active: false,
    };

    /// Whether the state equals [`SharedState::INITIAL`].
    pub fn is_initial(&self) -> bool {
        *self == Self::INITIAL
    }
}

/// A full state addressed to one device.
///
/// A device's own star moves are never echoed back to it, so when a full
/// state replaces its view it cannot tell which of the moves it already
/// sent are baked in. `movesApplied` is the number of `update-position`
/// events from this connection the server had processed when the state was
/// taken; the device re-applies the rest on top.
///
/// On the wire the state fields sit next to `movesApplied` in one object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct FullState {
    /// The authoritative state.
    #[serde(flatten)]
    pub state: SharedState,
    /// Own moves already folded into `state`.
    #[serde(default)]
    pub moves_applied: u32,
}

impl FullState {
    /// A full state that includes none of the receiver's moves.
    pub const fn new(state: SharedState) -> Self {
        Self {
            state,
            moves_applied: 0,
        }
    }

    /// Readdress to a device whose first `moves_applied` moves are included.
    #[must_use]
    pub const fn with_moves_applied(self, moves_applied: u32) -> Self {
        Self {
            state: self.state,
            moves_applied,
        }
    }
}

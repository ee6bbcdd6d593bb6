//! Local scene state and its reconciliation with the server.
//!
//! Self-originated pulses and star moves are applied to the [`ClientView`]
//! as soon as they are classified. The server does not echo a move back to
//! its sender, so the local copy already holds it. A pulse is echoed to
//! everyone; the reconciler matches echoes against a count of unconfirmed
//! local pulses so the effect is not restarted.
//!
//! Because own moves are never echoed, the reconciler keeps a log of the
//! moves it has sent on the current connection. A full state names how many
//! of them it already contains; the rest are replayed on top of it.
//!
//! Snap counts, countdowns and resets are never predicted. They change only
//! when the server says so.

use std::collections::VecDeque;

use stellar_core::config::TimingConfig;
use stellar_types::{FullState, GestureEvent, GestureKind, ServerMessage, SharedState};
use tracing::{debug, trace, warn};

/// Sent moves kept for replay. At 30 frames a second this spans well over
/// any round trip.
const MOVE_LOG_CAPACITY: usize = 1024;

/// One `update-position` sent on the current connection.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SentMove {
    seq: u32,
    dx: f64,
    dy: f64,
}

/// Where the launch choreography is for this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenePhase {
    /// No countdown running.
    Idle,
    /// Counting down; whole seconds left, rounded up.
    Countdown {
        /// Seconds remaining before launch.
        remaining_secs: u64,
    },
    /// Countdown finished; the launch animation plays until the server
    /// resets.
    Launching,
}

/// What changed in the scene after an input, for the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SceneUpdate {
    /// Nothing visible changed.
    Unchanged,
    /// The whole state was replaced (`sync-state` or `state-reset`).
    Replaced,
    /// A pulse started (local prediction or another device's fist).
    PulseStarted,
    /// The server confirmed a pulse already shown locally.
    PulseConfirmed,
    /// The pulse effect ended.
    PulseEnded,
    /// The star moved by the given displacement.
    StarMoved {
        /// Horizontal displacement.
        dx: f64,
        /// Vertical displacement.
        dy: f64,
    },
    /// The authoritative snap tally changed.
    SnapProgress {
        /// New tally.
        count: u8,
    },
    /// The countdown began.
    CountdownStarted,
}

/// The device's local copy of the shared scene.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientView {
    /// Last server-confirmed state, plus this device's own moves.
    pub shared: SharedState,
    /// End of a locally predicted pulse not yet confirmed by the server.
    pub predicted_pulse_until_ms: Option<u64>,
    /// Local pulses sent but not yet echoed back.
    pub pending_pulses: u32,
    /// Local time at which the current countdown was observed to start.
    pub countdown_started_ms: Option<u64>,
    /// Whether a full state has been received since the last disconnect.
    pub synced: bool,
}

impl ClientView {
    /// A view before any server contact.
    pub const fn new() -> Self {
        Self {
            shared: SharedState::INITIAL,
            predicted_pulse_until_ms: None,
            pending_pulses: 0,
            countdown_started_ms: None,
            synced: false,
        }
    }

    /// Whether the pulse effect should currently be drawn.
    pub fn pulse_visible(&self, now_ms: u64) -> bool {
        self.shared.pulse_active
            || self
                .predicted_pulse_until_ms
                .is_some_and(|until| now_ms < until)
    }
}

impl Default for ClientView {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies local predictions and server pushes to a [`ClientView`].
#[derive(Debug, Clone)]
pub struct ClientReconciler {
    view: ClientView,
    timing: TimingConfig,
    moves_sent: u32,
    sent_moves: VecDeque<SentMove>,
}

impl ClientReconciler {
    /// Create a reconciler; `timing` must match the server's.
    pub const fn new(timing: TimingConfig) -> Self {
        Self {
            view: ClientView::new(),
            timing,
            moves_sent: 0,
            sent_moves: VecDeque::new(),
        }
    }

    /// The current local view.
    pub const fn view(&self) -> &ClientView {
        &self.view
    }

    /// Countdown progress at `now_ms`.
    pub fn phase(&self, now_ms: u64) -> ScenePhase {
        let started = self
            .view
            .countdown_started_ms
            .filter(|_| self.view.shared.countdown_active);
        let Some(started) = started else {
            return ScenePhase::Idle;
        };
        let elapsed = now_ms.saturating_sub(started);
        let countdown = self.timing.countdown_ms;
        if elapsed < countdown {
            ScenePhase::Countdown {
                remaining_secs: countdown.saturating_sub(elapsed).div_ceil(1000),
            }
        } else {
            ScenePhase::Launching
        }
    }

    /// Apply a self-originated gesture optimistically.
    ///
    /// Only fists and two-hand moves are predicted; every other gesture
    /// returns [`SceneUpdate::Unchanged`].
    pub fn predict(&mut self, event: &GestureEvent) -> SceneUpdate {
        match event.kind {
            GestureKind::Fist => {
                let was_visible = self.view.pulse_visible(event.at_ms);
                self.view.pending_pulses = self.view.pending_pulses.saturating_add(1);
                self.view.predicted_pulse_until_ms =
                    Some(event.at_ms.saturating_add(self.timing.pulse_duration_ms));
                if was_visible {
                    SceneUpdate::Unchanged
                } else {
                    SceneUpdate::PulseStarted
                }
            }
            GestureKind::TwoHandMove { dx, dy } => {
                self.view.shared.star_position = self.view.shared.star_position.offset(dx, dy);
                SceneUpdate::StarMoved { dx, dy }
            }
            GestureKind::Snap { .. } | GestureKind::None => SceneUpdate::Unchanged,
        }
    }

    /// Note that a predicted move went out on the wire.
    ///
    /// Call once per `update-position` actually handed to the transport, in
    /// send order.
    pub fn record_sent_move(&mut self, dx: f64, dy: f64) {
        if self.sent_moves.len() >= MOVE_LOG_CAPACITY {
            warn!(capacity = MOVE_LOG_CAPACITY, "move log full, dropping oldest");
            self.sent_moves.pop_front();
        }
        self.sent_moves.push_back(SentMove {
            seq: self.moves_sent,
            dx,
            dy,
        });
        self.moves_sent = self.moves_sent.saturating_add(1);
    }

    /// Moves sent on this connection that no full state has covered yet.
    pub fn unacknowledged_moves(&self) -> usize {
        self.sent_moves.len()
    }

    /// Apply one server push received at local time `now_ms`.
    pub fn apply(&mut self, message: ServerMessage, now_ms: u64) -> SceneUpdate {
        trace!(event = message.name(), "server message");
        match message {
            ServerMessage::SyncState(full) | ServerMessage::StateReset(full) => {
                self.replace(full, now_ms);
                SceneUpdate::Replaced
            }
            ServerMessage::PulseTriggered => {
                let was_visible = self.view.pulse_visible(now_ms);
                self.view.shared.pulse_active = true;
                if self.view.pending_pulses > 0 {
                    self.view.pending_pulses = self.view.pending_pulses.saturating_sub(1);
                    if self.view.pending_pulses == 0 {
                        self.view.predicted_pulse_until_ms = None;
                    }
                    SceneUpdate::PulseConfirmed
                } else if was_visible {
                    SceneUpdate::Unchanged
                } else {
                    SceneUpdate::PulseStarted
                }
            }
            ServerMessage::PulseEnded => {
                self.view.shared.pulse_active = false;
                if self.view.pulse_visible(now_ms) {
                    SceneUpdate::Unchanged
                } else {
                    SceneUpdate::PulseEnded
                }
            }
            ServerMessage::PositionUpdated { x, y } => {
                self.view.shared.star_position = self.view.shared.star_position.offset(x, y);
                SceneUpdate::StarMoved { dx: x, dy: y }
            }
            ServerMessage::SnapUpdated { count } => {
                self.view.shared.snap_count = count;
                SceneUpdate::SnapProgress { count }
            }
            ServerMessage::CountdownStarted => {
                self.view.shared.snap_count = 0;
                self.view.shared.countdown_active = true;
                self.view.countdown_started_ms = Some(now_ms);
                SceneUpdate::CountdownStarted
            }
        }
    }

    /// Expire a local pulse prediction the server never confirmed.
    pub fn tick(&mut self, now_ms: u64) -> SceneUpdate {
        match self.view.predicted_pulse_until_ms {
            Some(until) if now_ms >= until => {
                debug!(
                    unconfirmed = self.view.pending_pulses,
                    "local pulse expired before confirmation"
                );
                self.view.predicted_pulse_until_ms = None;
                self.view.pending_pulses = 0;
                if self.view.shared.pulse_active {
                    SceneUpdate::Unchanged
                } else {
                    SceneUpdate::PulseEnded
                }
            }
            _ => SceneUpdate::Unchanged,
        }
    }

    /// Forget server-derived freshness after a disconnect. The view is kept
    /// on screen until the next `sync-state` replaces it.
    ///
    /// Move numbering restarts with the next connection.
    pub fn mark_disconnected(&mut self) {
        self.view.synced = false;
        self.view.pending_pulses = 0;
        self.moves_sent = 0;
        self.sent_moves.clear();
    }

    fn replace(&mut self, full: FullState, now_ms: u64) {
        self.sent_moves.retain(|m| m.seq >= full.moves_applied);
        let mut state = full.state;
        for m in &self.sent_moves {
            state.star_position = state.star_position.offset(m.dx, m.dy);
        }
        debug!(
            snap_count = state.snap_count,
            countdown_active = state.countdown_active,
            replayed = self.sent_moves.len(),
            "full state received"
        );
        // Joining mid-countdown: the true start is unknown, count from now.
        let countdown_started_ms = if state.countdown_active {
            self.view.countdown_started_ms.or(Some(now_ms))
        } else {
            None
        };
        self.view = ClientView {
            shared: state,
            predicted_pulse_until_ms: None,
            pending_pulses: 0,
            countdown_started_ms,
            synced: true,
        };
    }
}

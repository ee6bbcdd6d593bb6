//! Per-device session: classifier, prediction, emitter and reconciler.
//!
//! A [`ClientSession`] is created when a device opens its channel and
//! dropped when it goes away. It owns only device-local state and talks to
//! the server exclusively through the [`EventEmitter`] and incoming
//! [`ServerMessage`]s.

use std::fmt;

use stellar_core::config::{GestureConfig, TimingConfig};
use stellar_types::{ClientId, ClientMessage, GestureEvent, GestureKind, ServerMessage};
use tracing::{debug, info, warn};

use crate::classifier::GestureClassifier;
use crate::emitter::{EmitError, EventEmitter, forward};
use crate::landmarks::LandmarkFrame;
use crate::reconciler::{ClientReconciler, ClientView, ScenePhase, SceneUpdate};

/// Channel state as seen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// The channel is open.
    Connected,
    /// The channel is down; gestures are still classified but not sent.
    Disconnected,
}

/// Whether the hand-tracking source is producing frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tracking {
    /// Frames are arriving.
    Active,
    /// The camera or model failed; the UI shows a degraded-mode message.
    Unavailable {
        /// Human-readable cause.
        reason: String,
    },
}

/// The gesture line shown on the device overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureStatus {
    /// No hands in frame.
    NoHands,
    /// At least one hand, nothing recognised.
    HandDetected,
    /// Two hands steering the star.
    Navigating,
    /// A fist is held.
    Pulse,
    /// A snap fired with the given local tally.
    Snap {
        /// Local tally shown as `n/threshold`.
        count: u8,
        /// Tally that triggers the countdown.
        threshold: u8,
    },
}

impl GestureStatus {
    /// Derive the status for a frame from its classified events.
    pub fn from_frame(frame: &LandmarkFrame, events: &[GestureEvent], threshold: u8) -> Self {
        let snap = events.iter().find_map(|e| match e.kind {
            GestureKind::Snap { count } => Some(count),
            _ => None,
        });
        if let Some(count) = snap {
            return Self::Snap { count, threshold };
        }
        if frame.hands.iter().any(crate::landmarks::Hand::is_fist) {
            return Self::Pulse;
        }
        match frame.hand_count() {
            0 => Self::NoHands,
            2 => Self::Navigating,
            _ => Self::HandDetected,
        }
    }
}

impl fmt::Display for GestureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHands => write!(f, "No Hands Detected"),
            Self::HandDetected => write!(f, "Hand Detected"),
            Self::Navigating => write!(f, "Navigating Star"),
            Self::Pulse => write!(f, "Stellar Pulse!"),
            Self::Snap { count, threshold } => write!(f, "Snap Detected! ({count}/{threshold})"),
        }
    }
}

/// Everything one device holds for the lifetime of its channel.
#[derive(Debug)]
pub struct ClientSession<E> {
    client_id: Option<ClientId>,
    classifier: GestureClassifier,
    reconciler: ClientReconciler,
    emitter: E,
    connectivity: Connectivity,
    tracking: Tracking,
    gesture_status: GestureStatus,
}

impl<E: EventEmitter> ClientSession<E> {
    /// Create a disconnected session.
    pub const fn new(emitter: E, gesture: GestureConfig, timing: TimingConfig) -> Self {
        Self {
            client_id: None,
            classifier: GestureClassifier::new(gesture),
            reconciler: ClientReconciler::new(timing),
            emitter,
            connectivity: Connectivity::Disconnected,
            tracking: Tracking::Active,
            gesture_status: GestureStatus::NoHands,
        }
    }

    /// Server-assigned id, once connected.
    pub const fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    /// Current channel state.
    pub const fn connectivity(&self) -> Connectivity {
        self.connectivity
    }

    /// Current tracking state.
    pub const fn tracking(&self) -> &Tracking {
        &self.tracking
    }

    /// The local scene view.
    pub const fn view(&self) -> &ClientView {
        self.reconciler.view()
    }

    /// Countdown progress at `now_ms`.
    pub fn phase(&self, now_ms: u64) -> ScenePhase {
        self.reconciler.phase(now_ms)
    }

    /// The channel opened. The server follows up with `sync-state`.
    pub fn on_connected(&mut self, client_id: ClientId) {
        info!(%client_id, "connected");
        self.client_id = Some(client_id);
        self.connectivity = Connectivity::Connected;
    }

    /// The channel dropped.
    pub fn on_disconnected(&mut self) {
        if self.connectivity == Connectivity::Connected {
            warn!(client_id = ?self.client_id, "disconnected");
        }
        self.connectivity = Connectivity::Disconnected;
        self.reconciler.mark_disconnected();
    }

    /// The tracking source failed. Classification stops until frames
    /// arrive again.
    pub fn on_tracking_unavailable(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "hand tracking unavailable");
        self.classifier.reset();
        self.tracking = Tracking::Unavailable { reason };
    }

    /// Classify a frame, predict its local effects and send its events.
    ///
    /// Returns the scene updates produced by local prediction. While
    /// disconnected nothing is sent; the next `sync-state` restores the
    /// authoritative view.
    ///
    /// Every event of the frame is predicted before anything is sent, so a
    /// transport failure never costs a gesture its local effect.
    ///
    /// # Errors
    ///
    /// Returns the first [`EmitError`] the transport reported. A closed
    /// transport also marks the session disconnected.
    pub fn on_frame(&mut self, frame: &LandmarkFrame) -> Result<Vec<SceneUpdate>, EmitError> {
        if matches!(self.tracking, Tracking::Unavailable { .. }) {
            info!("hand tracking resumed");
            self.tracking = Tracking::Active;
        }

        let origin = self.client_id;
        let events: Vec<GestureEvent> = self
            .classifier
            .classify(frame)
            .into_iter()
            .map(|event| origin.map_or(event, |id| event.with_origin(id)))
            .collect();
        self.gesture_status =
            GestureStatus::from_frame(frame, &events, self.classifier.config().snap_threshold);

        let updates: Vec<SceneUpdate> = events
            .iter()
            .map(|event| self.reconciler.predict(event))
            .filter(|update| *update != SceneUpdate::Unchanged)
            .collect();
        if self.connectivity == Connectivity::Disconnected {
            return Ok(updates);
        }

        let forwarded = forward(&self.emitter, events);
        for message in &forwarded.sent {
            debug!(event = message.name(), "sent");
            if let ClientMessage::UpdatePosition { x, y } = *message {
                self.reconciler.record_sent_move(x, y);
            }
        }
        if forwarded.closed {
            self.on_disconnected();
        }
        forwarded.error.map_or(Ok(updates), Err)
    }

    /// Apply a decoded server push.
    pub fn on_server_message(&mut self, message: ServerMessage, now_ms: u64) -> SceneUpdate {
        self.reconciler.apply(message, now_ms)
    }

    /// Decode and apply a server text frame. Malformed frames are logged
    /// and dropped.
    pub fn on_server_frame(&mut self, frame: &str, now_ms: u64) -> Option<SceneUpdate> {
        match ServerMessage::parse(frame) {
            Ok(message) => Some(self.on_server_message(message, now_ms)),
            Err(err) => {
                warn!(error = %err, "dropping malformed server frame");
                None
            }
        }
    }

    /// Advance local timers.
    pub fn tick(&mut self, now_ms: u64) -> SceneUpdate {
        self.reconciler.tick(now_ms)
    }

    /// The overlay status line.
    pub fn status_line(&self) -> String {
        match &self.tracking {
            Tracking::Unavailable { reason } => format!("Camera unavailable: {reason}"),
            Tracking::Active => self.gesture_status.to_string(),
        }
    }
}

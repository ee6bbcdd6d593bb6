//! The authoritative scene state and its transition rules.
//!
//! [`SyncStore`] is a plain synchronous state machine: [`SyncStore::apply`]
//! takes one event and the arrival instant and returns the [`Effect`]s the
//! caller must carry out, in order. It never touches timers or channels
//! itself, which keeps every rule testable without a runtime. The actor in
//! [`crate::runtime`] owns the only instance and feeds it one event at a
//! time, so each read-modify-write is atomic with respect to every other.
//!
//! # Transitions
//!
//! | Event | Effect |
//! |-------|--------|
//! | `trigger-pulse` | `pulseActive = true`, re-arm the pulse timer, `pulse-triggered` to all |
//! | `update-position` | move the star, `position-updated` to everyone but the sender |
//! | `snap-detected` | windowed tally update, `snap-updated` to all; at the threshold also start the countdown |
//! | `start-countdown` | tally to 0, `countdownActive = true`, arm the auto-reset, `countdown-started` to all |
//! | `reset-state` | back to the initial state, cancel both timers, `state-reset` to all |
//! | pulse timer | `pulseActive = false`, `pulse-ended` to all |
//! | auto-reset timer | same as `reset-state` when a countdown is active |

use std::time::Duration;

use stellar_types::{ClientId, ClientMessage, FullState, ServerMessage, SharedState};
use tokio::time::Instant;
use tracing::debug;

use crate::config::TimingConfig;
use crate::timer::TimerKind;

/// How close to the end of the snap window a repeated `(origin, count)`
/// pair is still treated as a fresh snap rather than a redelivery.
const REDELIVERY_SLACK: Duration = Duration::from_millis(500);

/// Errors for events the store refuses to apply.
///
/// None of these are fatal; the caller logs and drops the event. State is
/// never mutated when an error is returned.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// A snap must count at least one.
    #[error("snap count must be at least 1")]
    ZeroSnapCount,

    /// The reported tally is below what the store already counted.
    #[error("snap count {count} regresses below current tally {current}")]
    SnapRegression {
        /// Count carried by the event.
        count: u8,
        /// Tally held by the store.
        current: u8,
    },

    /// The same device reported the same tally twice within the window.
    #[error("duplicate snap {count} from {origin}")]
    DuplicateSnap {
        /// Device that sent the duplicate.
        origin: ClientId,
        /// Count carried by both events.
        count: u8,
    },

    /// A position delta that is NaN or infinite.
    #[error("non-finite position delta ({x}, {y})")]
    NonFiniteDelta {
        /// Horizontal component.
        x: f64,
        /// Vertical component.
        y: f64,
    },
}

/// Which connected devices a broadcast is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Every connected device.
    All,
    /// Every device except the one that caused the change.
    AllExcept(ClientId),
    /// A single device.
    Only(ClientId),
}

impl Audience {
    /// Whether `client` should receive a message with this audience.
    pub fn includes(self, client: ClientId) -> bool {
        match self {
            Self::All => true,
            Self::AllExcept(excluded) => excluded != client,
            Self::Only(target) => target == client,
        }
    }
}

/// A server message together with its audience.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    /// Who receives the message.
    pub audience: Audience,
    /// The message itself.
    pub message: ServerMessage,
}

impl Envelope {
    /// Address `message` to every device.
    pub const fn to_all(message: ServerMessage) -> Self {
        Self {
            audience: Audience::All,
            message,
        }
    }
}

/// Something the caller must do after a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Effect {
    /// Publish a message.
    Broadcast(Envelope),
    /// Arm (or re-arm) the timer of `kind`.
    Arm {
        /// Which timer.
        kind: TimerKind,
        /// Delay until it fires.
        after: Duration,
    },
    /// Cancel the timer of the given kind if armed.
    Cancel(TimerKind),
}

/// An input to the store.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoreEvent {
    /// A named event from a device, or from the operator API when `origin`
    /// is `None`.
    Client {
        /// Sending device.
        origin: Option<ClientId>,
        /// The event.
        message: ClientMessage,
    },
    /// A store-owned timer elapsed.
    TimerElapsed(TimerKind),
}

/// The authoritative shared state.
#[derive(Debug, Clone)]
pub struct SyncStore {
    state: SharedState,
    last_snap_at: Option<Instant>,
    last_snap: Option<(Option<ClientId>, u8)>,
    timing: TimingConfig,
}

impl SyncStore {
    /// Create a store in the initial state.
    pub const fn new(timing: TimingConfig) -> Self {
        Self {
            state: SharedState::INITIAL,
            last_snap_at: None,
            last_snap: None,
            timing,
        }
    }

    /// The current authoritative state.
    pub const fn state(&self) -> SharedState {
        self.state
    }

    /// Apply one event that arrived at `now`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] for malformed or out-of-range events; the
    /// state is left untouched in that case.
    pub fn apply(&mut self, event: StoreEvent, now: Instant) -> Result<Vec<Effect>, StoreError> {
        match event {
            StoreEvent::Client { origin, message } => match message {
                ClientMessage::TriggerPulse => Ok(self.trigger_pulse()),
                ClientMessage::UpdatePosition { x, y } => self.move_star(origin, x, y),
                ClientMessage::SnapDetected { count } => self.record_snap(origin, count, now),
                ClientMessage::StartCountdown => {
                    self.state.snap_count = 0;
                    self.last_snap = None;
                    Ok(self.start_countdown())
                }
                ClientMessage::ResetState => Ok(self.reset()),
            },
            StoreEvent::TimerElapsed(TimerKind::PulseExpiry) => Ok(self.end_pulse()),
            StoreEvent::TimerElapsed(TimerKind::AutoReset) => {
                if self.state.countdown_active {
                    Ok(self.reset())
                } else {
                    debug!("auto-reset elapsed with no countdown active, ignoring");
                    Ok(Vec::new())
                }
            }
        }
    }

    fn trigger_pulse(&mut self) -> Vec<Effect> {
        self.state.pulse_active = true;
        vec![
            Effect::Arm {
                kind: TimerKind::PulseExpiry,
                after: self.timing.pulse_duration(),
            },
            Effect::Broadcast(Envelope::to_all(ServerMessage::PulseTriggered)),
        ]
    }

    fn end_pulse(&mut self) -> Vec<Effect> {
        if !self.state.pulse_active {
            return Vec::new();
        }
        self.state.pulse_active = false;
        vec![Effect::Broadcast(Envelope::to_all(ServerMessage::PulseEnded))]
    }

    fn move_star(
        &mut self,
        origin: Option<ClientId>,
        x: f64,
        y: f64,
    ) -> Result<Vec<Effect>, StoreError> {
        if !(x.is_finite() && y.is_finite()) {
            return Err(StoreError::NonFiniteDelta { x, y });
        }
        self.state.star_position = self.state.star_position.offset(x, y);
        let audience = origin.map_or(Audience::All, Audience::AllExcept);
        Ok(vec![Effect::Broadcast(Envelope {
            audience,
            message: ServerMessage::PositionUpdated { x, y },
        })])
    }

    fn record_snap(
        &mut self,
        origin: Option<ClientId>,
        count: u8,
        now: Instant,
    ) -> Result<Vec<Effect>, StoreError> {
        if count == 0 {
            return Err(StoreError::ZeroSnapCount);
        }

        let window = self.timing.snap_reset_window();
        let since_last = self.last_snap_at.map(|at| now.saturating_duration_since(at));
        let window_expired = since_last.is_none_or(|gap| gap > window);
        let current = if window_expired { 0 } else { self.state.snap_count };

        // Device tallies reset on the device's frame clock, the window here
        // runs on arrival time. Near the edge a repeat is a fresh snap.
        let redelivery_window = window.saturating_sub(REDELIVERY_SLACK);
        let maybe_redelivered = since_last.is_some_and(|gap| gap < redelivery_window);
        let repeated = maybe_redelivered && self.last_snap == Some((origin, count));
        if let Some(origin) = origin.filter(|_| repeated) {
            return Err(StoreError::DuplicateSnap { origin, count });
        }
        if count < current {
            return Err(StoreError::SnapRegression { count, current });
        }

        // Two devices reporting the same tally both count.
        let threshold = self.timing.snap_threshold;
        let next = count.max(current.saturating_add(1)).min(threshold);

        self.state.snap_count = next;
        self.last_snap_at = Some(now);
        self.last_snap = Some((origin, count));

        let mut effects = vec![Effect::Broadcast(Envelope::to_all(
            ServerMessage::SnapUpdated { count: next },
        ))];
        if next >= threshold {
            effects.extend(self.start_countdown());
        }
        Ok(effects)
    }

    fn start_countdown(&mut self) -> Vec<Effect> {
        self.state.snap_count = 0;
        self.state.countdown_active = true;
        self.last_snap = None;
        vec![
            Effect::Arm {
                kind: TimerKind::AutoReset,
                after: self.timing.choreography(),
            },
            Effect::Broadcast(Envelope::to_all(ServerMessage::CountdownStarted)),
        ]
    }

    fn reset(&mut self) -> Vec<Effect> {
        self.state = SharedState::INITIAL;
        self.last_snap_at = None;
        self.last_snap = None;
        vec![
            Effect::Cancel(TimerKind::PulseExpiry),
            Effect::Cancel(TimerKind::AutoReset),
            Effect::Broadcast(Envelope::to_all(ServerMessage::StateReset(FullState::new(
                self.state,
            )))),
        ]
    }
}

impl Default for SyncStore {
    fn default() -> Self {
        Self::new(TimingConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn snap(origin: ClientId, count: u8) -> StoreEvent {
        StoreEvent::Client {
            origin: Some(origin),
            message: ClientMessage::SnapDetected { count },
        }
    }

    fn from(origin: ClientId, message: ClientMessage) -> StoreEvent {
        StoreEvent::Client {
            origin: Some(origin),
            message,
        }
    }

    fn broadcasts(effects: &[Effect]) -> Vec<ServerMessage> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Broadcast(envelope) => Some(envelope.message),
                _ => None,
            })
            .collect()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn four_quick_snaps_start_countdown() {
        let mut store = SyncStore::default();
        let client = ClientId::new();
        let t0 = Instant::now();
        let mut observed = Vec::new();

        for (i, at) in [0_u64, 400, 800, 1200].into_iter().enumerate() {
            let count = u8::try_from(i + 1).unwrap_or(u8::MAX);
            let effects = store.apply(snap(client, count), t0 + ms(at));
            observed.extend(broadcasts(&effects.unwrap_or_default()));
        }

        assert_eq!(
            observed,
            vec![
                ServerMessage::SnapUpdated { count: 1 },
                ServerMessage::SnapUpdated { count: 2 },
                ServerMessage::SnapUpdated { count: 3 },
                ServerMessage::SnapUpdated { count: 4 },
                ServerMessage::CountdownStarted,
            ]
        );
        assert_eq!(store.state().snap_count, 0);
        assert!(store.state().countdown_active);
    }

    #[test]
    fn snap_after_window_restarts_tally() {
        let mut store = SyncStore::default();
        let client = ClientId::new();
        let t0 = Instant::now();

        let first = store.apply(snap(client, 1), t0).unwrap_or_default();
        let second = store.apply(snap(client, 1), t0 + ms(4000)).unwrap_or_default();

        assert_eq!(broadcasts(&first), vec![ServerMessage::SnapUpdated { count: 1 }]);
        assert_eq!(broadcasts(&second), vec![ServerMessage::SnapUpdated { count: 1 }]);
        assert_eq!(store.state().snap_count, 1);
    }

    #[test]
    fn stale_high_count_after_window_is_accepted_from_zero() {
        let mut store = SyncStore::default();
        let client = ClientId::new();
        let t0 = Instant::now();
        let _ = store.apply(snap(client, 1), t0);
        let _ = store.apply(snap(client, 2), t0 + ms(500));

        // Window elapsed: prior tally discarded, count 1 is not a regression.
        let effects = store.apply(snap(ClientId::new(), 1), t0 + ms(3600));
        assert!(effects.is_ok());
        assert_eq!(store.state().snap_count, 1);
    }

    #[test]
    fn racing_devices_with_same_tally_both_count() {
        let mut store = SyncStore::default();
        let t0 = Instant::now();
        let _ = store.apply(snap(ClientId::new(), 1), t0);
        let _ = store.apply(snap(ClientId::new(), 1), t0 + ms(10));
        assert_eq!(store.state().snap_count, 2);
    }

    #[test]
    fn redelivered_snap_is_dropped() {
        let mut store = SyncStore::default();
        let client = ClientId::new();
        let t0 = Instant::now();
        let _ = store.apply(snap(client, 1), t0);
        let result = store.apply(snap(client, 1), t0 + ms(20));
        assert_eq!(result, Err(StoreError::DuplicateSnap { origin: client, count: 1 }));
        assert_eq!(store.state().snap_count, 1);
    }

    #[test]
    fn repeat_near_window_edge_is_a_fresh_snap() {
        let mut store = SyncStore::default();
        let client = ClientId::new();
        let t0 = Instant::now();
        let _ = store.apply(snap(client, 1), t0);

        // The device restarted its own tally after 3 s of frame time but
        // the frame arrived a little early.
        let result = store.apply(snap(client, 1), t0 + ms(2800));
        assert!(result.is_ok());
        assert_eq!(store.state().snap_count, 2);

        let redelivered = store.apply(snap(client, 1), t0 + ms(2850));
        assert_eq!(
            redelivered,
            Err(StoreError::DuplicateSnap { origin: client, count: 1 })
        );
    }

    #[test]
    fn regressing_snap_is_dropped_without_mutation() {
        let mut store = SyncStore::default();
        let a = ClientId::new();
        let t0 = Instant::now();
        let _ = store.apply(snap(a, 1), t0);
        let _ = store.apply(snap(a, 2), t0 + ms(400));
        let _ = store.apply(snap(a, 3), t0 + ms(800));
        let before = store.state();

        let result = store.apply(snap(ClientId::new(), 1), t0 + ms(900));
        assert_eq!(result, Err(StoreError::SnapRegression { count: 1, current: 3 }));
        assert_eq!(store.state(), before);
    }

    #[test]
    fn zero_count_is_rejected() {
        let mut store = SyncStore::default();
        let result = store.apply(snap(ClientId::new(), 0), Instant::now());
        assert_eq!(result, Err(StoreError::ZeroSnapCount));
        assert!(store.state().is_initial());
    }

    #[test]
    fn oversized_count_clamps_to_threshold() {
        let mut store = SyncStore::default();
        let effects = store
            .apply(snap(ClientId::new(), 9), Instant::now())
            .unwrap_or_default();
        assert_eq!(
            broadcasts(&effects),
            vec![ServerMessage::SnapUpdated { count: 4 }, ServerMessage::CountdownStarted]
        );
        assert_eq!(store.state().snap_count, 0);
    }

    #[test]
    fn snap_count_never_exceeds_threshold() {
        let mut store = SyncStore::default();
        let t0 = Instant::now();
        let clients: Vec<ClientId> = (0..3).map(|_| ClientId::new()).collect();
        let mut at = 0_u64;
        for round in 1_u8..=12 {
            for client in &clients {
                at += 100;
                let _ = store.apply(snap(*client, round % 5), t0 + ms(at));
                assert!(store.state().snap_count < 4);
            }
        }
    }

    #[test]
    fn pulse_arms_and_rearms_expiry() {
        let mut store = SyncStore::default();
        let client = ClientId::new();
        let effects = store
            .apply(from(client, ClientMessage::TriggerPulse), Instant::now())
            .unwrap_or_default();

        assert!(store.state().pulse_active);
        assert_eq!(
            effects,
            vec![
                Effect::Arm { kind: TimerKind::PulseExpiry, after: ms(2000) },
                Effect::Broadcast(Envelope::to_all(ServerMessage::PulseTriggered)),
            ]
        );

        let again = store
            .apply(from(client, ClientMessage::TriggerPulse), Instant::now())
            .unwrap_or_default();
        assert_eq!(again, effects);
    }

    #[test]
    fn pulse_expiry_clears_flag_once() {
        let mut store = SyncStore::default();
        let now = Instant::now();
        let _ = store.apply(from(ClientId::new(), ClientMessage::TriggerPulse), now);

        let ended = store
            .apply(StoreEvent::TimerElapsed(TimerKind::PulseExpiry), now)
            .unwrap_or_default();
        assert_eq!(broadcasts(&ended), vec![ServerMessage::PulseEnded]);
        assert!(!store.state().pulse_active);

        let again = store
            .apply(StoreEvent::TimerElapsed(TimerKind::PulseExpiry), now)
            .unwrap_or_default();
        assert!(again.is_empty());
    }

    #[test]
    fn position_skips_sender() {
        let mut store = SyncStore::default();
        let client = ClientId::new();
        let effects = store
            .apply(
                from(client, ClientMessage::UpdatePosition { x: 1.5, y: -0.5 }),
                Instant::now(),
            )
            .unwrap_or_default();
        let _ = store.apply(
            from(ClientId::new(), ClientMessage::UpdatePosition { x: 0.5, y: 0.5 }),
            Instant::now(),
        );

        assert_eq!(
            effects,
            vec![Effect::Broadcast(Envelope {
                audience: Audience::AllExcept(client),
                message: ServerMessage::PositionUpdated { x: 1.5, y: -0.5 },
            })]
        );
        let position = store.state().star_position;
        assert!((position.x - 2.0).abs() < f64::EPSILON);
        assert!(position.y.abs() < f64::EPSILON);
    }

    #[test]
    fn non_finite_position_is_rejected() {
        let mut store = SyncStore::default();
        let result = store.apply(
            from(ClientId::new(), ClientMessage::UpdatePosition { x: f64::NAN, y: 0.0 }),
            Instant::now(),
        );
        assert!(matches!(result, Err(StoreError::NonFiniteDelta { .. })));
        assert!(store.state().is_initial());
    }

    #[test]
    fn explicit_countdown_zeroes_tally_and_arms_reset() {
        let mut store = SyncStore::default();
        let client = ClientId::new();
        let now = Instant::now();
        let _ = store.apply(snap(client, 1), now);
        let _ = store.apply(snap(client, 2), now + ms(400));

        let effects = store
            .apply(from(client, ClientMessage::StartCountdown), now + ms(500))
            .unwrap_or_default();
        assert_eq!(store.state().snap_count, 0);
        assert!(store.state().countdown_active);
        assert!(effects.contains(&Effect::Arm { kind: TimerKind::AutoReset, after: ms(6000) }));
    }

    #[test]
    fn reset_cancels_timers_and_is_idempotent() {
        let mut store = SyncStore::default();
        let client = ClientId::new();
        let now = Instant::now();
        let _ = store.apply(from(client, ClientMessage::TriggerPulse), now);
        let _ = store.apply(from(client, ClientMessage::StartCountdown), now);
        let _ = store.apply(from(client, ClientMessage::UpdatePosition { x: 3.0, y: 4.0 }), now);

        let first = store
            .apply(from(client, ClientMessage::ResetState), now)
            .unwrap_or_default();
        let after_first = store.state();
        let second = store
            .apply(from(client, ClientMessage::ResetState), now)
            .unwrap_or_default();

        assert!(after_first.is_initial());
        assert_eq!(store.state(), after_first);
        assert_eq!(first, second);
        assert!(first.contains(&Effect::Cancel(TimerKind::PulseExpiry)));
        assert!(first.contains(&Effect::Cancel(TimerKind::AutoReset)));
    }

    #[test]
    fn auto_reset_only_acts_during_countdown() {
        let mut store = SyncStore::default();
        let now = Instant::now();
        let idle = store
            .apply(StoreEvent::TimerElapsed(TimerKind::AutoReset), now)
            .unwrap_or_default();
        assert!(idle.is_empty());

        let _ = store.apply(from(ClientId::new(), ClientMessage::StartCountdown), now);
        let fired = store
            .apply(StoreEvent::TimerElapsed(TimerKind::AutoReset), now + ms(6000))
            .unwrap_or_default();
        assert_eq!(
            broadcasts(&fired),
            vec![ServerMessage::StateReset(FullState::new(SharedState::INITIAL))]
        );
        assert!(store.state().is_initial());
    }

    #[test]
    fn audience_filtering() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert!(Audience::All.includes(a));
        assert!(!Audience::AllExcept(a).includes(a));
        assert!(Audience::AllExcept(a).includes(b));
        assert!(Audience::Only(b).includes(b));
        assert!(!Audience::Only(b).includes(a));
    }
}

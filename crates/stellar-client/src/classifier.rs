//! Frame-by-frame gesture classification.
//!
//! [`GestureClassifier`] turns noisy landmark frames into discrete, debounced
//! [`GestureEvent`]s. Three detectors run on every frame:
//!
//! - **Snap**: a two-state hysteresis machine per tracked hand over the
//!   thumb-to-index distance. A snap fires on `Closed -> Open`, subject to a
//!   debounce, and advances a tally shared by both hands. The tally restarts
//!   when snaps are spaced wider than the reset window and wraps to zero once
//!   it reaches the threshold.
//! - **Fist**: stateless per frame, rate-limited by the gesture debounce.
//! - **Two-hand navigation**: frame-to-frame displacement of the midpoint
//!   between both wrists, scaled and with `y` inverted to screen-space up.
//!
//! Timestamps come from the frames themselves, so the classifier is
//! deterministic and needs no clock.

use stellar_core::config::GestureConfig;
use stellar_types::{GestureEvent, GestureKind};
use tracing::{debug, trace};

use crate::landmarks::{Hand, LandmarkFrame};

/// Per-hand snap machine state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SnapPhase {
    /// Thumb and index apart.
    #[default]
    Open,
    /// Thumb and index pinched together.
    Closed,
}

impl SnapPhase {
    /// Advance on a new pinch distance. Returns the next phase and whether
    /// this step was a `Closed -> Open` release.
    fn step(self, distance: f64, config: &GestureConfig) -> (Self, bool) {
        match self {
            Self::Open if distance < config.close_threshold => (Self::Closed, false),
            Self::Closed if distance > config.open_threshold => (Self::Open, true),
            phase => (phase, false),
        }
    }
}

/// Running snap count shared by every hand on this device.
#[derive(Debug, Clone, Copy, Default)]
struct SnapTally {
    count: u8,
    last_fired_ms: Option<u64>,
}

impl SnapTally {
    /// Register a snap release at `now_ms`. Returns the new count, or
    /// `None` when the release falls inside the debounce window.
    fn register(&mut self, now_ms: u64, config: &GestureConfig) -> Option<u8> {
        if let Some(last) = self.last_fired_ms {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < config.snap_debounce_ms {
                return None;
            }
            if elapsed > config.snap_reset_window_ms {
                self.count = 0;
            }
        }

        self.count = self.count.saturating_add(1);
        self.last_fired_ms = Some(now_ms);
        let fired = self.count;
        if fired >= config.snap_threshold {
            self.count = 0;
        }
        Some(fired)
    }
}

/// Classifies landmark frames into gesture events.
#[derive(Debug, Clone)]
pub struct GestureClassifier {
    config: GestureConfig,
    phases: Vec<SnapPhase>,
    tally: SnapTally,
    last_fist_ms: Option<u64>,
    nav_reference: Option<(f64, f64)>,
}

impl GestureClassifier {
    /// Create a classifier with the given thresholds.
    pub const fn new(config: GestureConfig) -> Self {
        Self {
            config,
            phases: Vec::new(),
            tally: SnapTally {
                count: 0,
                last_fired_ms: None,
            },
            last_fist_ms: None,
            nav_reference: None,
        }
    }

    /// The thresholds in use.
    pub const fn config(&self) -> &GestureConfig {
        &self.config
    }

    /// Current local snap tally (0 after a wrap).
    pub const fn snap_tally(&self) -> u8 {
        self.tally.count
    }

    /// Phase of the snap machine for the hand at `index`.
    pub fn snap_phase(&self, index: usize) -> SnapPhase {
        self.phases.get(index).copied().unwrap_or_default()
    }

    /// Return every detector to its initial state.
    pub fn reset(&mut self) {
        self.phases.clear();
        self.tally = SnapTally::default();
        self.last_fist_ms = None;
        self.nav_reference = None;
    }

    /// Classify one frame.
    ///
    /// Always returns at least one event; a frame in which nothing fired
    /// yields a single [`GestureKind::None`].
    pub fn classify(&mut self, frame: &LandmarkFrame) -> Vec<GestureEvent> {
        let now = frame.timestamp_ms;

        if frame.hands.is_empty() {
            // Tracking dropout: hand-local machines restart, the tally survives.
            self.phases.clear();
            self.nav_reference = None;
            return vec![GestureEvent::local(GestureKind::None, now)];
        }

        let mut events = Vec::with_capacity(2);

        let snapped = self.detect_snap(&frame.hands, now);
        if let Some(count) = snapped {
            events.push(GestureEvent::local(GestureKind::Snap { count }, now));
        }

        if self.detect_fist(&frame.hands, now) {
            events.push(GestureEvent::local(GestureKind::Fist, now));
        }

        if let Some((dx, dy)) = self.detect_navigation(&frame.hands) {
            if snapped.is_none() {
                events.push(GestureEvent::local(GestureKind::TwoHandMove { dx, dy }, now));
            }
        }

        if events.is_empty() {
            events.push(GestureEvent::local(GestureKind::None, now));
        }
        events
    }

    fn detect_snap(&mut self, hands: &[Hand], now: u64) -> Option<u8> {
        self.phases.resize(hands.len(), SnapPhase::Open);

        let mut fired = None;
        for (index, (hand, phase)) in hands.iter().zip(self.phases.iter_mut()).enumerate() {
            let (next, released) = phase.step(hand.pinch_distance(), &self.config);
            if next != *phase {
                trace!(hand = index, from = ?*phase, to = ?next, "snap phase changed");
            }
            *phase = next;
            if released && fired.is_none() {
                fired = self.tally.register(now, &self.config);
                if let Some(count) = fired {
                    debug!(hand = index, count, "snap fired");
                }
            }
        }
        fired
    }

    fn detect_fist(&mut self, hands: &[Hand], now: u64) -> bool {
        if !hands.iter().any(Hand::is_fist) {
            return false;
        }
        let ready = self
            .last_fist_ms
            .is_none_or(|last| now.saturating_sub(last) >= self.config.gesture_debounce_ms);
        if ready {
            self.last_fist_ms = Some(now);
            debug!("fist fired");
        }
        ready
    }

    /// Scaled midpoint displacement since the previous two-hand frame.
    fn detect_navigation(&mut self, hands: &[Hand]) -> Option<(f64, f64)> {
        let [left, right] = hands else {
            self.nav_reference = None;
            return None;
        };

        let (lw, rw) = (left.wrist(), right.wrist());
        let midpoint = (f64::midpoint(lw.x, rw.x), f64::midpoint(lw.y, rw.y));
        let previous = self.nav_reference.replace(midpoint)?;

        let (dx, dy) = (midpoint.0 - previous.0, midpoint.1 - previous.1);
        if dx.hypot(dy) <= self.config.move_noise_floor {
            return None;
        }
        let sensitivity = self.config.move_sensitivity;
        Some((dx * sensitivity, -dy * sensitivity))
    }
}

/// Lazy adapter classifying frames as they are pulled from a source.
///
/// Yields one event at a time; frames producing several events are
/// buffered. The stream ends only when the frame source does.
#[derive(Debug)]
pub struct GestureStream<I> {
    frames: I,
    classifier: GestureClassifier,
    pending: std::collections::VecDeque<GestureEvent>,
}

impl<I> GestureStream<I>
where
    I: Iterator<Item = LandmarkFrame>,
{
    /// Wrap a frame source.
    pub fn new(frames: I, config: GestureConfig) -> Self {
        Self {
            frames,
            classifier: GestureClassifier::new(config),
            pending: std::collections::VecDeque::new(),
        }
    }

    /// Drop buffered events and reset the classifier, as after a camera
    /// restart.
    pub fn restart(&mut self) {
        self.pending.clear();
        self.classifier.reset();
    }

    /// The underlying classifier.
    pub const fn classifier(&self) -> &GestureClassifier {
        &self.classifier
    }
}

impl<I> Iterator for GestureStream<I>
where
    I: Iterator<Item = LandmarkFrame>,
{
    type Item = GestureEvent;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let frame = self.frames.next()?;
            self.pending.extend(self.classifier.classify(&frame));
        }
    }
}

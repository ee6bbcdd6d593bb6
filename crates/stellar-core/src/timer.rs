//! Cancellable one-shot timers owned by the sync store.
//!
//! A [`TimerSlot`] holds at most one armed timer. Arming aborts whatever
//! was armed before, so timers of one kind never stack. Expiry is not a
//! callback: the sleeping task posts a message into the store's own command
//! queue, where it is serialised with client events like any other input.
//!
//! Every arm bumps the slot's generation. A task aborted after it already
//! enqueued its message would otherwise fire late; the store drops any
//! firing whose generation is no longer current.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// The timers the store owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Clears `pulseActive` after the pulse window.
    PulseExpiry,
    /// Returns everything to the initial state after the launch choreography.
    AutoReset,
}

impl TimerKind {
    /// Short label used in log lines.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PulseExpiry => "pulse_expiry",
            Self::AutoReset => "auto_reset",
        }
    }
}

/// Slot holding at most one armed timer of a single [`TimerKind`].
#[derive(Debug)]
pub struct TimerSlot {
    kind: TimerKind,
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    /// Create an empty slot.
    pub const fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            generation: 0,
            handle: None,
        }
    }

    /// The kind of timer this slot holds.
    pub const fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Generation of the most recently armed timer.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a timer is armed and has not yet fired or been cancelled.
    pub const fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    /// Arm the slot, superseding any timer armed before.
    ///
    /// After `after` elapses, `make_message(generation)` is posted to
    /// `queue`. The task holds only a weak sender, so a pending timer never
    /// keeps the store alive on its own. Returns the new generation.
    pub fn arm<T, F>(
        &mut self,
        after: Duration,
        queue: &mpsc::WeakSender<T>,
        make_message: F,
    ) -> u64
    where
        T: Send + 'static,
        F: FnOnce(u64) -> T + Send + 'static,
    {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        let kind = self.kind;
        let queue = queue.clone();

        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if let Some(tx) = queue.upgrade() {
                trace!(timer = kind.as_str(), generation, "timer elapsed");
                // A closed queue means the store is shutting down.
                let _ = tx.send(make_message(generation)).await;
            }
        }));

        generation
    }

    /// Cancel the armed timer, if any. Returns whether one was armed.
    pub fn cancel(&mut self) -> bool {
        self.handle.take().is_some_and(|handle| {
            handle.abort();
            true
        })
    }

    /// Accept a firing reported by the timer task.
    ///
    /// Returns `true` and disarms the slot only when `generation` is the
    /// live timer; stale or cancelled firings return `false`.
    pub fn accept_firing(&mut self, generation: u64) -> bool {
        if self.handle.is_some() && generation == self.generation {
            self.handle = None;
            true
        } else {
            false
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

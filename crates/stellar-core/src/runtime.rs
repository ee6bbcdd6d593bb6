//! The sync store actor: the single serialisation point for shared state.
//!
//! [`SyncRuntime`] owns the [`SyncStore`], both [`TimerSlot`]s, and the
//! sending half of the broadcast channel. It drains one command queue, one
//! command at a time. Connection handlers, the operator API, and timer
//! tasks all hold only a [`SyncHandle`] and never see the state directly.
//!
//! Broadcasts are published from inside the actor, immediately after the
//! transition that produced them, so the order of messages on the channel
//! is the order of mutations. New subscribers are registered inside the
//! actor too: the snapshot handed to a joining device and the position of
//! its receiver in the stream are taken at the same logical instant.
//!
//! The actor also counts the `update-position` events it has taken from
//! each device. Full-state messages are addressed to every device
//! separately, carrying that device's count, so a device can tell which of
//! its own in-flight moves a snapshot already contains.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use stellar_types::{ClientId, ClientMessage, FullState, SharedState};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ServerSection, TimingConfig};
use crate::store::{Audience, Effect, Envelope, StoreEvent, SyncStore};
use crate::timer::{TimerKind, TimerSlot};

/// Errors returned by [`SyncHandle`] calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// The actor has stopped; no further commands can be processed.
    #[error("sync store is not running")]
    Closed,
}

/// What a device gets when it (re)subscribes.
#[derive(Debug)]
pub struct Subscription {
    /// Authoritative state at the instant of subscription.
    pub state: SharedState,
    /// How many of this device's moves `state` already includes.
    pub moves_applied: u32,
    /// Every envelope published after `state` was taken.
    pub receiver: broadcast::Receiver<Envelope>,
}

impl Subscription {
    /// The snapshot as it is sent to the device.
    pub const fn full_state(&self) -> FullState {
        FullState::new(self.state).with_moves_applied(self.moves_applied)
    }
}

/// Point-in-time view of the store for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    /// Authoritative state.
    pub state: SharedState,
    /// Devices currently connected.
    pub connected_clients: usize,
    /// Whether the pulse-expiry timer is armed.
    pub pulse_timer_armed: bool,
    /// Whether the auto-reset timer is armed.
    pub reset_timer_armed: bool,
    /// Events applied since start.
    pub events_applied: u64,
    /// Events rejected since start.
    pub events_rejected: u64,
    /// When the store started.
    pub started_at: DateTime<Utc>,
}

/// Commands accepted by the actor.
#[derive(Debug)]
pub enum StoreCommand {
    /// Apply a named event from a device (or the operator when `None`).
    Submit {
        /// Sending device.
        origin: Option<ClientId>,
        /// The event.
        message: ClientMessage,
    },
    /// Register a device and hand back a snapshot plus receiver.
    Connect {
        /// The joining device.
        client: ClientId,
        /// Where to send the subscription.
        reply: oneshot::Sender<Subscription>,
    },
    /// Hand an already-registered device a fresh snapshot plus receiver.
    Resync {
        /// The lagging device.
        client: ClientId,
        /// Where to send the subscription.
        reply: oneshot::Sender<Subscription>,
    },
    /// Forget a device.
    Disconnect {
        /// The departing device.
        client: ClientId,
    },
    /// Report the current status.
    Status {
        /// Where to send the status.
        reply: oneshot::Sender<StoreStatus>,
    },
    /// A store-owned timer elapsed.
    TimerFired {
        /// Which timer.
        kind: TimerKind,
        /// Generation it was armed with.
        generation: u64,
    },
}

/// Cloneable handle for talking to the actor.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl SyncHandle {
    /// Queue a named event for application.
    ///
    /// Returns once the event is queued; rejection of malformed events is
    /// logged by the actor and not reported back.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] if the actor has stopped.
    pub async fn submit(
        &self,
        origin: Option<ClientId>,
        message: ClientMessage,
    ) -> Result<(), RuntimeError> {
        self.send(StoreCommand::Submit { origin, message }).await
    }

    /// Register a device and receive its initial snapshot and receiver.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] if the actor has stopped.
    pub async fn connect(&self, client: ClientId) -> Result<Subscription, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Connect { client, reply }).await?;
        rx.await.map_err(|_closed| RuntimeError::Closed)
    }

    /// Replace a lagging device's receiver with a fresh snapshot and receiver.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] if the actor has stopped.
    pub async fn resync(&self, client: ClientId) -> Result<Subscription, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Resync { client, reply }).await?;
        rx.await.map_err(|_closed| RuntimeError::Closed)
    }

    /// Forget a device. Shared state is unaffected.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] if the actor has stopped.
    pub async fn disconnect(&self, client: ClientId) -> Result<(), RuntimeError> {
        self.send(StoreCommand::Disconnect { client }).await
    }

    /// Fetch the current status.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] if the actor has stopped.
    pub async fn status(&self) -> Result<StoreStatus, RuntimeError> {
        let (reply, rx) = oneshot::channel();
        self.send(StoreCommand::Status { reply }).await?;
        rx.await.map_err(|_closed| RuntimeError::Closed)
    }

    /// Fetch the current authoritative state.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] if the actor has stopped.
    pub async fn snapshot(&self) -> Result<SharedState, RuntimeError> {
        Ok(self.status().await?.state)
    }

    async fn send(&self, command: StoreCommand) -> Result<(), RuntimeError> {
        self.tx
            .send(command)
            .await
            .map_err(|_closed| RuntimeError::Closed)
    }
}

/// The actor owning the shared state.
#[derive(Debug)]
pub struct SyncRuntime {
    store: SyncStore,
    pulse: TimerSlot,
    auto_reset: TimerSlot,
    out: broadcast::Sender<Envelope>,
    rx: mpsc::Receiver<StoreCommand>,
    queue: mpsc::WeakSender<StoreCommand>,
    /// Connected devices and the moves taken from each.
    clients: BTreeMap<ClientId, u32>,
    events_applied: u64,
    events_rejected: u64,
    started_at: DateTime<Utc>,
}

impl SyncRuntime {
    /// Build an actor and the handle used to reach it.
    ///
    /// Nothing runs until [`run`](Self::run) is awaited; see
    /// [`spawn`] for the usual entry point.
    pub fn new(
        timing: TimingConfig,
        command_capacity: usize,
        broadcast_capacity: usize,
    ) -> (Self, SyncHandle) {
        let (tx, rx) = mpsc::channel(command_capacity.max(1));
        let (out, _) = broadcast::channel(broadcast_capacity.max(1));
        let runtime = Self {
            store: SyncStore::new(timing),
            pulse: TimerSlot::new(TimerKind::PulseExpiry),
            auto_reset: TimerSlot::new(TimerKind::AutoReset),
            out,
            rx,
            queue: tx.downgrade(),
            clients: BTreeMap::new(),
            events_applied: 0,
            events_rejected: 0,
            started_at: Utc::now(),
        };
        (runtime, SyncHandle { tx })
    }

    /// Process commands until every [`SyncHandle`] has been dropped.
    pub async fn run(mut self) {
        info!("Sync store started");
        while let Some(command) = self.rx.recv().await {
            self.handle(command);
        }
        info!(
            events_applied = self.events_applied,
            events_rejected = self.events_rejected,
            "Sync store stopped"
        );
    }

    fn handle(&mut self, command: StoreCommand) {
        match command {
            StoreCommand::Submit { origin, message } => {
                debug!(
                    origin = ?origin,
                    event = message.name(),
                    "Applying client event"
                );
                let moved = matches!(message, ClientMessage::UpdatePosition { .. });
                let sender = origin.filter(|_| moved);
                if let Some(moves) = sender.and_then(|c| self.clients.get_mut(&c)) {
                    *moves = moves.saturating_add(1);
                }
                self.apply(StoreEvent::Client { origin, message });
            }
            StoreCommand::Connect { client, reply } => {
                self.clients.insert(client, 0);
                if reply.send(self.subscribe(client)).is_err() {
                    // The connection went away before it heard back.
                    self.clients.remove(&client);
                    return;
                }
                info!(
                    client = %client,
                    connected = self.clients.len(),
                    "Client connected"
                );
            }
            StoreCommand::Resync { client, reply } => {
                debug!(client = %client, "Resynchronising lagging client");
                let _ = reply.send(self.subscribe(client));
            }
            StoreCommand::Disconnect { client } => {
                if self.clients.remove(&client).is_some() {
                    info!(
                        client = %client,
                        connected = self.clients.len(),
                        "Client disconnected"
                    );
                } else {
                    debug!(client = %client, "Disconnect for unknown client");
                }
            }
            StoreCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            StoreCommand::TimerFired { kind, generation } => {
                let slot = match kind {
                    TimerKind::PulseExpiry => &mut self.pulse,
                    TimerKind::AutoReset => &mut self.auto_reset,
                };
                if slot.accept_firing(generation) {
                    debug!(timer = kind.as_str(), generation, "Timer fired");
                    self.apply(StoreEvent::TimerElapsed(kind));
                } else {
                    debug!(
                        timer = kind.as_str(),
                        generation,
                        "Ignoring superseded timer firing"
                    );
                }
            }
        }
    }

    fn apply(&mut self, event: StoreEvent) {
        match self.store.apply(event, Instant::now()) {
            Ok(effects) => {
                self.events_applied = self.events_applied.saturating_add(1);
                for effect in effects {
                    self.execute(effect);
                }
            }
            Err(e) => {
                self.events_rejected = self.events_rejected.saturating_add(1);
                warn!(error = %e, "Dropped event");
            }
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Broadcast(envelope) if envelope.message.is_full_state() => {
                for (&client, &moves) in &self.clients {
                    if !envelope.audience.includes(client) {
                        continue;
                    }
                    let addressed = Envelope {
                        audience: Audience::Only(client),
                        message: envelope.message.with_moves_applied(moves),
                    };
                    // Err only when every receiver is gone.
                    let _ = self.out.send(addressed);
                }
                debug!(
                    event = envelope.message.name(),
                    devices = self.clients.len(),
                    "Broadcast full state per device"
                );
            }
            Effect::Broadcast(envelope) => {
                // Err only when no device is connected.
                let receivers = self.out.send(envelope).unwrap_or(0);
                debug!(
                    event = envelope.message.name(),
                    receivers,
                    "Broadcast"
                );
            }
            Effect::Arm { kind, after } => {
                let slot = match kind {
                    TimerKind::PulseExpiry => &mut self.pulse,
                    TimerKind::AutoReset => &mut self.auto_reset,
                };
                let generation = slot.arm(after, &self.queue, move |generation| {
                    StoreCommand::TimerFired { kind, generation }
                });
                debug!(
                    timer = kind.as_str(),
                    generation,
                    after_ms = u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
                    "Timer armed"
                );
            }
            Effect::Cancel(kind) => {
                let slot = match kind {
                    TimerKind::PulseExpiry => &mut self.pulse,
                    TimerKind::AutoReset => &mut self.auto_reset,
                };
                if slot.cancel() {
                    debug!(timer = kind.as_str(), "Timer cancelled");
                }
            }
        }
    }

    fn subscribe(&self, client: ClientId) -> Subscription {
        Subscription {
            state: self.store.state(),
            moves_applied: self.clients.get(&client).copied().unwrap_or(0),
            receiver: self.out.subscribe(),
        }
    }

    fn status(&self) -> StoreStatus {
        StoreStatus {
            state: self.store.state(),
            connected_clients: self.clients.len(),
            pulse_timer_armed: self.pulse.is_armed(),
            reset_timer_armed: self.auto_reset.is_armed(),
            events_applied: self.events_applied,
            events_rejected: self.events_rejected,
            started_at: self.started_at,
        }
    }
}

/// Spawn the actor on a background Tokio task.
///
/// The task ends once every returned (or cloned) [`SyncHandle`] is dropped.
pub fn spawn(timing: TimingConfig, server: &ServerSection) -> (SyncHandle, JoinHandle<()>) {
    let (runtime, handle) =
        SyncRuntime::new(timing, server.command_capacity, server.broadcast_capacity);
    let task = tokio::spawn(runtime.run());
    (handle, task)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use stellar_types::ServerMessage;

    use super::*;

    fn spawn_default() -> (SyncHandle, JoinHandle<()>) {
        spawn(TimingConfig::default(), &ServerSection::default())
    }

    #[tokio::test]
    async fn connect_returns_current_state() {
        let (handle, _task) = spawn_default();
        handle
            .submit(None, ClientMessage::UpdatePosition { x: 2.0, y: 3.0 })
            .await
            .ok();

        let sub = handle.connect(ClientId::new()).await;
        assert!(sub.is_ok());
        let state = sub.map(|s| s.state).unwrap_or_default();
        assert!((state.star_position.x - 2.0).abs() < f64::EPSILON);

        let status = handle.status().await.ok();
        assert_eq!(status.map(|s| s.connected_clients), Some(1));
    }

    #[tokio::test]
    async fn subscription_sees_only_later_broadcasts() {
        let (handle, _task) = spawn_default();
        let early = ClientId::new();
        let Ok(mut early_sub) = handle.connect(early).await else {
            return;
        };
        handle.submit(Some(early), ClientMessage::TriggerPulse).await.ok();

        let late = ClientId::new();
        let Ok(mut late_sub) = handle.connect(late).await else {
            return;
        };
        assert!(late_sub.state.pulse_active);
        handle
            .submit(Some(early), ClientMessage::SnapDetected { count: 1 })
            .await
            .ok();

        let first = early_sub.receiver.recv().await.ok();
        assert_eq!(first.map(|e| e.message), Some(ServerMessage::PulseTriggered));
        let late_first = late_sub.receiver.recv().await.ok();
        assert_eq!(
            late_first.map(|e| e.message),
            Some(ServerMessage::SnapUpdated { count: 1 })
        );
    }

    #[tokio::test]
    async fn disconnect_leaves_state_alone() {
        let (handle, _task) = spawn_default();
        let client = ClientId::new();
        let _sub = handle.connect(client).await;
        handle.submit(Some(client), ClientMessage::StartCountdown).await.ok();
        handle.disconnect(client).await.ok();

        let status = handle.status().await.ok();
        assert_eq!(status.as_ref().map(|s| s.connected_clients), Some(0));
        assert_eq!(status.map(|s| s.state.countdown_active), Some(true));
    }

    #[tokio::test]
    async fn rejected_events_are_counted_not_fatal() {
        let (handle, _task) = spawn_default();
        handle
            .submit(None, ClientMessage::SnapDetected { count: 0 })
            .await
            .ok();
        handle.submit(None, ClientMessage::TriggerPulse).await.ok();

        let status = handle.status().await.ok();
        assert_eq!(status.as_ref().map(|s| s.events_rejected), Some(1));
        assert_eq!(status.map(|s| s.state.pulse_active), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn pulse_timer_is_cancelled_by_reset() {
        let (handle, _task) = spawn_default();
        let client = ClientId::new();
        let Ok(mut sub) = handle.connect(client).await else {
            return;
        };
        handle.submit(Some(client), ClientMessage::TriggerPulse).await.ok();
        handle.submit(Some(client), ClientMessage::ResetState).await.ok();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let status = handle.status().await.ok();
        assert_eq!(status.map(|s| s.pulse_timer_armed), Some(false));

        let mut seen = Vec::new();
        while let Ok(envelope) = sub.receiver.try_recv() {
            seen.push(envelope.message);
        }
        assert_eq!(
            seen,
            vec![
                ServerMessage::PulseTriggered,
                ServerMessage::StateReset(FullState::new(SharedState::INITIAL)),
            ]
        );
    }

    #[tokio::test]
    async fn moves_are_counted_per_device() {
        let (handle, _task) = spawn_default();
        let mover = ClientId::new();
        let other = ClientId::new();
        let Ok(_mover_sub) = handle.connect(mover).await else {
            return;
        };
        let Ok(mut other_sub) = handle.connect(other).await else {
            return;
        };
        for _ in 0..3 {
            handle
                .submit(Some(mover), ClientMessage::UpdatePosition { x: 1.0, y: 0.0 })
                .await
                .ok();
        }
        handle.submit(Some(mover), ClientMessage::TriggerPulse).await.ok();

        let resynced = handle.resync(mover).await.ok();
        assert_eq!(resynced.as_ref().map(|s| s.moves_applied), Some(3));
        let x = resynced.map(|s| s.full_state().state.star_position.x);
        assert!(x.is_some_and(|x| (x - 3.0).abs() < f64::EPSILON));

        handle.submit(None, ClientMessage::ResetState).await.ok();
        let _ = handle.status().await;
        let mut resets = Vec::new();
        while let Ok(envelope) = other_sub.receiver.try_recv() {
            if envelope.message.is_full_state() {
                resets.push(envelope);
            }
        }
        // One addressed copy per device, each with that device's count.
        assert_eq!(resets.len(), 2);
        for (client, moves) in [(mover, 3), (other, 0)] {
            let reset = FullState::new(SharedState::INITIAL).with_moves_applied(moves);
            assert!(resets.contains(&Envelope {
                audience: Audience::Only(client),
                message: ServerMessage::StateReset(reset),
            }));
        }
    }

    #[tokio::test]
    async fn store_stops_when_handles_drop() {
        let (handle, task) = spawn_default();
        drop(handle);
        assert!(task.await.is_ok());
    }

    #[test]
    fn position_broadcast_audience_excludes_sender() {
        let client = ClientId::new();
        let envelope = Envelope {
            audience: Audience::AllExcept(client),
            message: ServerMessage::PositionUpdated { x: 0.0, y: 1.0 },
        };
        assert!(!envelope.audience.includes(client));
    }
}

//! Forwarding classified gestures to the sync server.
//!
//! The emitter is a thin seam between the classifier and whatever transport
//! carries [`ClientMessage`]s. The browser build writes frames to a
//! WebSocket; in-process callers and tests hand a tokio channel sender.

use stellar_types::{ClientMessage, GestureEvent, GestureKind};
use tokio::sync::mpsc;
use tracing::trace;

/// Failures delivering a message to the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    /// The transport is gone; the session should treat itself as offline.
    #[error("transport closed")]
    Closed,

    /// The outbound queue is full and the message was dropped.
    #[error("outbound queue full, dropped {event}")]
    Backpressure {
        /// Wire name of the dropped event.
        event: &'static str,
    },
}

/// Sink for client-to-server events.
pub trait EventEmitter {
    /// Hand one message to the transport without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EmitError`] when the transport cannot accept the message.
    fn emit(&self, message: ClientMessage) -> Result<(), EmitError>;
}

impl EventEmitter for mpsc::UnboundedSender<ClientMessage> {
    fn emit(&self, message: ClientMessage) -> Result<(), EmitError> {
        self.send(message).map_err(|_closed| EmitError::Closed)
    }
}

impl EventEmitter for mpsc::Sender<ClientMessage> {
    fn emit(&self, message: ClientMessage) -> Result<(), EmitError> {
        self.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(dropped) => EmitError::Backpressure {
                event: dropped.name(),
            },
            mpsc::error::TrySendError::Closed(_) => EmitError::Closed,
        })
    }
}

/// Map a classified gesture to the channel event it produces, if any.
pub const fn to_message(event: &GestureEvent) -> Option<ClientMessage> {
    match event.kind {
        GestureKind::Snap { count } => Some(ClientMessage::SnapDetected { count }),
        GestureKind::Fist => Some(ClientMessage::TriggerPulse),
        GestureKind::TwoHandMove { dx, dy } => Some(ClientMessage::UpdatePosition { x: dx, y: dy }),
        GestureKind::None => None,
    }
}

/// What [`forward`] handed to the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Forwarded {
    /// Messages the transport accepted, in send order.
    pub sent: Vec<ClientMessage>,
    /// The first failure, if any.
    pub error: Option<EmitError>,
    /// Whether the transport went away; forwarding stopped there.
    pub closed: bool,
}

/// Emit every event that maps to a channel message.
///
/// A full queue drops only the message that did not fit and forwarding
/// carries on; a closed transport stops it.
pub fn forward<E, I>(emitter: &E, events: I) -> Forwarded
where
    E: EventEmitter + ?Sized,
    I: IntoIterator<Item = GestureEvent>,
{
    let mut out = Forwarded::default();
    for message in events.into_iter().filter_map(|e| to_message(&e)) {
        match emitter.emit(message) {
            Ok(()) => {
                trace!(event = message.name(), "emit");
                out.sent.push(message);
            }
            Err(err) => {
                out.closed = err == EmitError::Closed;
                out.error.get_or_insert(err);
                if out.closed {
                    break;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_maps_to_nothing() {
        assert_eq!(to_message(&GestureEvent::local(GestureKind::None, 0)), None);
    }

    #[test]
    fn gestures_map_to_named_events() {
        let snap = GestureEvent::local(GestureKind::Snap { count: 3 }, 0);
        assert_eq!(to_message(&snap), Some(ClientMessage::SnapDetected { count: 3 }));

        let fist = GestureEvent::local(GestureKind::Fist, 0);
        assert_eq!(to_message(&fist), Some(ClientMessage::TriggerPulse));

        let moved = GestureEvent::local(GestureKind::TwoHandMove { dx: 1.5, dy: -2.0 }, 0);
        assert_eq!(
            to_message(&moved),
            Some(ClientMessage::UpdatePosition { x: 1.5, y: -2.0 })
        );
    }

    #[test]
    fn forward_skips_none_and_lists_sent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = [
            GestureEvent::local(GestureKind::None, 0),
            GestureEvent::local(GestureKind::Fist, 1),
            GestureEvent::local(GestureKind::Snap { count: 1 }, 2),
        ];
        let forwarded = forward(&tx, events);
        assert_eq!(
            forwarded.sent,
            vec![ClientMessage::TriggerPulse, ClientMessage::SnapDetected { count: 1 }]
        );
        assert_eq!(forwarded.error, None);
        assert_eq!(rx.try_recv().ok(), Some(ClientMessage::TriggerPulse));
        assert_eq!(rx.try_recv().ok(), Some(ClientMessage::SnapDetected { count: 1 }));
    }

    #[test]
    fn forward_carries_on_past_a_full_queue() {
        let (tx, mut rx) = mpsc::channel::<ClientMessage>(1);
        let events = [
            GestureEvent::local(GestureKind::Snap { count: 1 }, 0),
            GestureEvent::local(GestureKind::Fist, 0),
        ];
        let forwarded = forward(&tx, events);
        assert_eq!(forwarded.sent, vec![ClientMessage::SnapDetected { count: 1 }]);
        assert_eq!(
            forwarded.error,
            Some(EmitError::Backpressure { event: "trigger-pulse" })
        );

        rx.try_recv().ok();
        let forwarded = forward(&tx, [GestureEvent::local(GestureKind::Fist, 1)]);
        assert_eq!(forwarded.sent, vec![ClientMessage::TriggerPulse]);
    }

    #[test]
    fn forward_stops_at_closed_transport() {
        let (tx, rx) = mpsc::unbounded_channel::<ClientMessage>();
        drop(rx);
        let events = [
            GestureEvent::local(GestureKind::Fist, 0),
            GestureEvent::local(GestureKind::Snap { count: 1 }, 0),
        ];
        let forwarded = forward(&tx, events);
        assert!(forwarded.sent.is_empty());
        assert!(forwarded.closed);
        assert_eq!(forwarded.error, Some(EmitError::Closed));
    }

    #[test]
    fn closed_transport_is_reported() {
        let (tx, rx) = mpsc::unbounded_channel::<ClientMessage>();
        drop(rx);
        assert_eq!(tx.emit(ClientMessage::TriggerPulse), Err(EmitError::Closed));
    }

    #[test]
    fn full_bounded_queue_drops_with_backpressure() {
        let (tx, _rx) = mpsc::channel::<ClientMessage>(1);
        assert_eq!(tx.emit(ClientMessage::TriggerPulse), Ok(()));
        assert_eq!(
            tx.emit(ClientMessage::StartCountdown),
            Err(EmitError::Backpressure {
                event: "start-countdown"
            })
        );
    }
}

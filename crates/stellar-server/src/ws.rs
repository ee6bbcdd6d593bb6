//! `WebSocket` endpoint and the per-connection relay.
//!
//! Each device connects to `GET /ws` and is assigned a fresh [`ClientId`].
//! The relay then:
//!
//! 1. registers the device with the sync store and sends it `sync-state`,
//! 2. forwards every broadcast envelope whose audience includes the device,
//! 3. parses inbound text frames and submits them to the store.
//!
//! Malformed frames are logged and dropped. A device that falls behind the
//! broadcast buffer is resubscribed and sent a fresh `sync-state` instead of
//! the deltas it missed. Whatever ends the connection, the device is
//! deregistered; the shared state is never touched by a disconnect.
//!
//! The relay itself is generic over a text [`Sink`] and [`Stream`] so it can
//! be driven by in-memory channels in tests.

use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use stellar_core::runtime::RuntimeError;
use stellar_core::{Subscription, SyncHandle};
use stellar_types::{ClientId, ClientMessage, ServerMessage};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::state::AppState;

/// Reasons a relay stopped early.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The sync store stopped.
    #[error("sync store error: {0}")]
    Store(#[from] RuntimeError),

    /// An outbound frame could not be encoded.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The device's socket rejected a frame.
    #[error("send failed: {0}")]
    Send(String),
}

/// Upgrade an HTTP request to a `WebSocket` and relay sync traffic.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_sync(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let client = ClientId::new();
    let (sink, stream) = socket.split();

    let outbound = sink.with(|text: String| {
        future::ready(Ok::<_, axum::Error>(Message::Text(text.into())))
    });
    let inbound = stream
        .take_while(|frame| {
            future::ready(matches!(frame, Ok(m) if !matches!(m, Message::Close(_))))
        })
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(text.as_str().to_owned()),
                Ok(Message::Binary(_)) => {
                    debug!("ignoring binary frame");
                    None
                }
                _ => None,
            })
        });

    if let Err(e) = relay(client, &state.store, Box::pin(outbound), Box::pin(inbound)).await {
        debug!(%client, error = %e, "relay ended with error");
    }
}

/// Relay one device's traffic until either side goes away.
///
/// The device is always deregistered before this returns.
///
/// # Errors
///
/// Returns [`RelayError`] if the store stops, or the sink rejects a frame.
pub async fn relay<S, R>(
    client: ClientId,
    store: &SyncHandle,
    mut outbound: S,
    mut inbound: R,
) -> Result<(), RelayError>
where
    S: Sink<String> + Unpin,
    S::Error: Display,
    R: Stream<Item = String> + Unpin,
{
    let subscription = store.connect(client).await?;
    let result = pump(client, store, subscription, &mut outbound, &mut inbound).await;

    // The store may already be gone during shutdown.
    if let Err(e) = store.disconnect(client).await {
        debug!(%client, error = %e, "disconnect not delivered");
    }
    let _ = outbound.close().await;
    result
}

async fn pump<S, R>(
    client: ClientId,
    store: &SyncHandle,
    subscription: Subscription,
    outbound: &mut S,
    inbound: &mut R,
) -> Result<(), RelayError>
where
    S: Sink<String> + Unpin,
    S::Error: Display,
    R: Stream<Item = String> + Unpin,
{
    send(outbound, ServerMessage::SyncState(subscription.full_state())).await?;
    let mut receiver = subscription.receiver;

    loop {
        tokio::select! {
            received = receiver.recv() => match received {
                Ok(envelope) => {
                    if envelope.audience.includes(client) {
                        send(outbound, envelope.message).await?;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(%client, skipped, "client lagged, resyncing");
                    let fresh = store.resync(client).await?;
                    send(outbound, ServerMessage::SyncState(fresh.full_state())).await?;
                    receiver = fresh.receiver;
                }
                Err(RecvError::Closed) => {
                    debug!(%client, "broadcast closed");
                    return Ok(());
                }
            },
            frame = inbound.next() => match frame {
                Some(text) => match ClientMessage::parse(&text) {
                    Ok(message) => store.submit(Some(client), message).await?,
                    Err(e) => warn!(%client, error = %e, "Dropped malformed frame"),
                },
                None => {
                    debug!(%client, "client closed connection");
                    return Ok(());
                }
            },
        }
    }
}

async fn send<S>(outbound: &mut S, message: ServerMessage) -> Result<(), RelayError>
where
    S: Sink<String> + Unpin,
    S::Error: Display,
{
    let frame = message.to_frame()?;
    outbound
        .send(frame)
        .await
        .map_err(|e| RelayError::Send(e.to_string()))
}

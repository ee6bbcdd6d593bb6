//! Two devices driving one sync actor must converge on the same scene.

#![allow(
    clippy::unwrap_used,
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing
)]

use std::time::Duration;

use stellar_client::landmarks::{INDEX_PIP, INDEX_TIP, LANDMARK_COUNT, THUMB_TIP, WRIST};
use stellar_client::{ClientSession, Hand, Landmark, LandmarkFrame, ScenePhase};
use stellar_core::config::{GestureConfig, ServerSection, TimingConfig};
use stellar_core::{Subscription, SyncHandle, spawn};
use stellar_types::{ClientId, ClientMessage, ServerMessage};
use tokio::sync::mpsc;

type Session = ClientSession<mpsc::UnboundedSender<ClientMessage>>;

struct Device {
    id: ClientId,
    session: Session,
    outbox: mpsc::UnboundedReceiver<ClientMessage>,
    sub: Subscription,
}

impl Device {
    async fn join(handle: &SyncHandle) -> Self {
        let (tx, outbox) = mpsc::unbounded_channel();
        let mut session =
            ClientSession::new(tx, GestureConfig::default(), TimingConfig::default());
        let id = ClientId::new();
        let sub = handle.connect(id).await.unwrap();
        session.on_connected(id);
        session.on_server_message(ServerMessage::SyncState(sub.full_state()), 0);
        Self {
            id,
            session,
            outbox,
            sub,
        }
    }

    /// Push everything this device queued to the server.
    async fn flush(&mut self, handle: &SyncHandle) {
        while let Ok(message) = self.outbox.try_recv() {
            handle.submit(Some(self.id), message).await.unwrap();
        }
    }

    /// Apply every broadcast addressed to this device.
    fn receive(&mut self, now_ms: u64) -> Vec<ServerMessage> {
        let mut seen = Vec::new();
        while let Ok(envelope) = self.sub.receiver.try_recv() {
            if envelope.audience.includes(self.id) {
                self.session.on_server_message(envelope.message, now_ms);
                seen.push(envelope.message);
            }
        }
        seen
    }
}

/// Open hand at `wrist`; `pinch` is the thumb-index gap.
fn hand(wrist: (f64, f64), pinch: f64, fist: bool) -> Hand {
    let (wx, wy) = wrist;
    let mut points = [Landmark::new(wx, wy - 0.1, 0.0); LANDMARK_COUNT];
    let tip_y = if fist { wy - 0.05 } else { wy - 0.2 };
    for (tip, pip) in [(INDEX_TIP, INDEX_PIP), (12, 10), (16, 14), (20, 18)] {
        points[pip] = Landmark::new(wx, wy - 0.1, 0.0);
        points[tip] = Landmark::new(wx, tip_y, 0.0);
    }
    points[WRIST] = Landmark::new(wx, wy, 0.0);
    points[THUMB_TIP] = Landmark::new(wx, tip_y + pinch, 0.0);
    Hand::new(points).unwrap()
}

/// Both hands with their wrist midpoint at `(x, 0.5)`.
fn two_hands(at: u64, x: f64) -> LandmarkFrame {
    LandmarkFrame::new(at, vec![hand((x - 0.1, 0.5), 0.2, false), hand((x + 0.1, 0.5), 0.2, false)])
}

async fn assert_star_matches_server(handle: &SyncHandle, session: &Session) {
    let server = handle.snapshot().await.unwrap().star_position;
    let local = session.view().shared.star_position;
    assert!((local.x - server.x).abs() < 1e-9, "local {local:?} server {server:?}");
    assert!((local.y - server.y).abs() < 1e-9, "local {local:?} server {server:?}");
}

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn start() -> SyncHandle {
    spawn(TimingConfig::default(), &ServerSection::default()).0
}

#[tokio::test(start_paused = true)]
async fn pulse_from_one_device_reaches_both() {
    let handle = start();
    let mut a = Device::join(&handle).await;
    let mut b = Device::join(&handle).await;

    let frame = LandmarkFrame::new(0, vec![hand((0.5, 0.8), 0.2, true)]);
    a.session.on_frame(&frame).unwrap();
    assert!(a.session.view().pulse_visible(0));

    a.flush(&handle).await;
    settle().await;
    assert_eq!(a.receive(10), vec![ServerMessage::PulseTriggered]);
    assert_eq!(b.receive(10), vec![ServerMessage::PulseTriggered]);
    assert_eq!(a.session.view().pending_pulses, 0);
    assert!(b.session.view().shared.pulse_active);

    tokio::time::sleep(Duration::from_millis(2001)).await;
    settle().await;
    a.receive(2011);
    b.receive(2011);
    assert!(!a.session.view().pulse_visible(2011));
    assert!(!b.session.view().pulse_visible(2011));
}

#[tokio::test(start_paused = true)]
async fn star_position_converges() {
    let handle = start();
    let mut a = Device::join(&handle).await;
    let mut b = Device::join(&handle).await;

    for (i, x) in [0.50, 0.52, 0.55, 0.51].into_iter().enumerate() {
        let at = u64::try_from(i).unwrap() * 33;
        let both = vec![hand((x - 0.1, 0.5), 0.2, false), hand((x + 0.1, 0.5), 0.2, false)];
        a.session.on_frame(&LandmarkFrame::new(at, both)).unwrap();
    }
    a.flush(&handle).await;
    settle().await;

    assert!(a.receive(200).is_empty());
    assert_eq!(b.receive(200).len(), 3);

    let server = handle.snapshot().await.unwrap().star_position;
    for device in [&a, &b] {
        let local = device.session.view().shared.star_position;
        assert!((local.x - server.x).abs() < 1e-9);
        assert!((local.y - server.y).abs() < 1e-9);
    }
}

#[tokio::test(start_paused = true)]
async fn four_snaps_start_countdown_everywhere() {
    let handle = start();
    let mut a = Device::join(&handle).await;
    let mut b = Device::join(&handle).await;

    for i in 0..4_u64 {
        let at = i * 400;
        let one = |pinch| vec![hand((0.5, 0.8), pinch, false)];
        a.session.on_frame(&LandmarkFrame::new(at, one(0.05))).unwrap();
        a.session.on_frame(&LandmarkFrame::new(at + 50, one(0.2))).unwrap();
        a.flush(&handle).await;
        settle().await;
        tokio::time::advance(Duration::from_millis(400)).await;
    }

    let seen = b.receive(1600);
    assert_eq!(seen.last(), Some(&ServerMessage::CountdownStarted));
    assert_eq!(seen.len(), 5);
    a.receive(1600);

    for device in [&a, &b] {
        assert_eq!(device.session.view().shared.snap_count, 0);
        assert!(device.session.view().shared.countdown_active);
        assert_eq!(device.session.phase(1600), ScenePhase::Countdown { remaining_secs: 3 });
    }
}

#[tokio::test(start_paused = true)]
async fn late_joiner_starts_from_current_state() {
    let handle = start();
    let mut a = Device::join(&handle).await;
    handle
        .submit(Some(a.id), ClientMessage::UpdatePosition { x: 4.0, y: -2.0 })
        .await
        .unwrap();
    settle().await;
    a.receive(0);

    let late = Device::join(&handle).await;
    let pos = late.session.view().shared.star_position;
    assert!((pos.x - 4.0).abs() < 1e-9);
    assert!((pos.y + 2.0).abs() < 1e-9);
    assert!(late.session.view().synced);
}

#[tokio::test(start_paused = true)]
async fn moves_sent_before_first_sync_state_survive_it() {
    let handle = start();
    let (tx, mut outbox) = mpsc::unbounded_channel();
    let mut session: Session =
        ClientSession::new(tx, GestureConfig::default(), TimingConfig::default());
    let id = ClientId::new();
    let sub = handle.connect(id).await.unwrap();
    session.on_connected(id);

    // The device steers before its snapshot has been delivered.
    for (at, x) in [(0, 0.5), (33, 0.55), (66, 0.6)] {
        session.on_frame(&two_hands(at, x)).unwrap();
    }
    while let Ok(message) = outbox.try_recv() {
        handle.submit(Some(id), message).await.unwrap();
    }
    settle().await;
    assert_eq!(handle.status().await.unwrap().events_applied, 2);

    session.on_server_message(ServerMessage::SyncState(sub.full_state()), 100);
    assert!(session.view().synced);
    assert_star_matches_server(&handle, &session).await;
}

#[tokio::test(start_paused = true)]
async fn moves_sent_during_resync_survive_it() {
    let handle = start();
    let mut a = Device::join(&handle).await;

    a.session.on_frame(&two_hands(0, 0.5)).unwrap();
    a.session.on_frame(&two_hands(33, 0.55)).unwrap();
    a.flush(&handle).await;
    settle().await;

    // The snapshot is taken after the first move and before the second.
    let fresh = handle.resync(a.id).await.unwrap();
    assert_eq!(fresh.moves_applied, 1);
    a.session.on_frame(&two_hands(66, 0.6)).unwrap();
    a.flush(&handle).await;
    settle().await;

    a.session.on_server_message(ServerMessage::SyncState(fresh.full_state()), 100);
    a.sub = fresh;
    assert_star_matches_server(&handle, &a.session).await;
    assert!(a.receive(100).is_empty());
    assert_star_matches_server(&handle, &a.session).await;
}

#[tokio::test(start_paused = true)]
async fn moves_sent_across_a_reset_survive_it() {
    let handle = start();
    let mut a = Device::join(&handle).await;
    let mut b = Device::join(&handle).await;

    a.session.on_frame(&two_hands(0, 0.5)).unwrap();
    a.session.on_frame(&two_hands(33, 0.55)).unwrap();
    a.flush(&handle).await;
    handle.submit(Some(b.id), ClientMessage::ResetState).await.unwrap();
    settle().await;

    // The second move leaves before the reset reaches the device.
    a.session.on_frame(&two_hands(66, 0.6)).unwrap();
    a.flush(&handle).await;
    settle().await;

    let seen = a.receive(100);
    assert!(matches!(
        seen.as_slice(),
        [ServerMessage::StateReset(full)] if full.moves_applied == 1
    ));
    b.receive(100);
    assert_star_matches_server(&handle, &a.session).await;
    assert_star_matches_server(&handle, &b.session).await;
    assert!(handle.snapshot().await.unwrap().star_position.x > 1.0);
}

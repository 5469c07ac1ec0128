//! Integration tests for end-to-end WebSocket collaboration.
//!
//! These tests start a real relay and connect real channels and sessions,
//! verifying the full sync pipeline.

use std::time::Duration;

use collabx_core::{ConnectionState, TextTarget};
use collabx_sync::{
    ClientConfig, ReconnectPolicy, RelayConfig, RelayServer, SessionEvent, SessionHandle,
    SessionRunner, TransportChannel, TransportError,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message;

/// Start a relay on a free port, return the port and a handle for stats.
async fn start_test_relay() -> (u16, RelayServer) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let relay = RelayServer::new(RelayConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        broadcast_capacity: 64,
        max_peers_per_room: 10,
    });
    let server = relay.clone();
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    (port, relay)
}

/// Wait until the relay sees exactly `n` connections.
async fn wait_for_connections(relay: &RelayServer, n: u64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while relay.stats().await.active_connections != n {
        assert!(Instant::now() < deadline, "relay never reached {n} connections");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_rooms(relay: &RelayServer, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while relay.rooms().room_count().await != n {
        assert!(Instant::now() < deadline, "relay never reached {n} rooms");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn room_url(port: u16, doc: &str) -> String {
    format!("ws://127.0.0.1:{port}/ws/{doc}")
}

/// Next binary payload on a raw client, if any arrives within `wait`.
async fn next_binary<S>(reader: &mut S, wait: Duration) -> Option<Vec<u8>>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.checked_duration_since(Instant::now())?;
        match timeout(remaining, reader.next()).await {
            Ok(Some(Ok(Message::Binary(data)))) => return Some(data.into()),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

#[tokio::test]
async fn test_relay_rejects_unknown_path() {
    let (port, _relay) = start_test_relay().await;

    let result = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/health")).await;
    assert!(result.is_err(), "Only /ws/{{doc_id}} is served");
}

#[tokio::test]
async fn test_relay_forwards_to_others_not_sender() {
    let (port, relay) = start_test_relay().await;

    let (alice, _) = tokio_tungstenite::connect_async(room_url(port, "doc")).await.unwrap();
    let (bob, _) = tokio_tungstenite::connect_async(room_url(port, "doc")).await.unwrap();
    let (carol, _) = tokio_tungstenite::connect_async(room_url(port, "doc")).await.unwrap();
    wait_for_connections(&relay, 3).await;

    let (mut alice_tx, mut alice_rx) = alice.split();
    let (_bob_tx, mut bob_rx) = bob.split();
    let (_carol_tx, mut carol_rx) = carol.split();

    alice_tx.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();

    let wait = Duration::from_secs(2);
    assert_eq!(next_binary(&mut bob_rx, wait).await, Some(vec![1, 2, 3]));
    assert_eq!(next_binary(&mut carol_rx, wait).await, Some(vec![1, 2, 3]));
    assert_eq!(next_binary(&mut alice_rx, Duration::from_millis(200)).await, None);

    let stats = relay.stats().await;
    assert_eq!(stats.relayed_frames, 1);
    assert_eq!(stats.relayed_bytes, 3);
    assert_eq!(stats.active_rooms, 1);
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let (port, relay) = start_test_relay().await;

    let (notes, _) = tokio_tungstenite::connect_async(room_url(port, "notes")).await.unwrap();
    let (other, _) = tokio_tungstenite::connect_async(room_url(port, "other")).await.unwrap();
    let (other_peer, _) = tokio_tungstenite::connect_async(room_url(port, "other")).await.unwrap();
    wait_for_connections(&relay, 3).await;
    assert_eq!(relay.rooms().active_documents().await, vec!["notes", "other"]);

    let (_notes_tx, mut notes_rx) = notes.split();
    let (mut other_tx, _other_rx) = other.split();
    let (_peer_tx, mut peer_rx) = other_peer.split();

    other_tx.send(Message::Binary(vec![9; 8].into())).await.unwrap();

    assert_eq!(next_binary(&mut peer_rx, Duration::from_secs(2)).await, Some(vec![9; 8]));
    assert_eq!(next_binary(&mut notes_rx, Duration::from_millis(200)).await, None);
}

#[tokio::test]
async fn test_empty_rooms_are_removed() {
    let (port, relay) = start_test_relay().await;

    let (mut alice, _) = tokio_tungstenite::connect_async(room_url(port, "doc")).await.unwrap();
    let (mut bob, _) = tokio_tungstenite::connect_async(room_url(port, "doc")).await.unwrap();
    wait_for_connections(&relay, 2).await;
    assert_eq!(relay.rooms().room_count().await, 1);

    alice.close(None).await.unwrap();
    wait_for_connections(&relay, 1).await;
    assert_eq!(relay.rooms().room_count().await, 1);

    bob.close(None).await.unwrap();
    wait_for_rooms(&relay, 0).await;
    assert_eq!(relay.stats().await.total_connections, 2);
}

#[tokio::test]
async fn test_lagging_member_is_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let relay = RelayServer::new(RelayConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        broadcast_capacity: 4,
        max_peers_per_room: 10,
    });
    let server = relay.clone();
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });

    let (alice, _) = tokio_tungstenite::connect_async(room_url(port, "doc")).await.unwrap();
    let (bob, _) = tokio_tungstenite::connect_async(room_url(port, "doc")).await.unwrap();
    wait_for_connections(&relay, 2).await;

    // Bob reads nothing while Alice floods the room
    let (mut alice_tx, _alice_rx) = alice.split();
    let (_bob_tx, mut bob_rx) = bob.split();
    const FRAMES: usize = 200;
    for i in 0..FRAMES {
        let frame = vec![i as u8; 256 * 1024];
        alice_tx.send(Message::Binary(frame.into())).await.unwrap();
    }

    let mut received = 0;
    let closed = timeout(Duration::from_secs(10), async {
        loop {
            match bob_rx.next().await {
                Some(Ok(Message::Binary(_))) => received += 1,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;

    assert!(closed.is_ok(), "a member that lost frames must be disconnected");
    assert!(received < FRAMES);
    wait_for_connections(&relay, 1).await;
}

#[tokio::test]
async fn test_channels_exchange_frames() {
    let (port, relay) = start_test_relay().await;

    let alice = TransportChannel::new(room_url(port, "doc"), ReconnectPolicy::default());
    let bob = TransportChannel::new(room_url(port, "doc"), ReconnectPolicy::default());

    let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
    bob.on_message(move |bytes| {
        let _ = bob_tx.send(bytes);
    });

    alice.connect().await.unwrap();
    bob.connect().await.unwrap();
    assert_eq!(alice.state(), ConnectionState::Connected);
    wait_for_connections(&relay, 2).await;

    alice.send(vec![4, 5, 6]);
    let received = timeout(Duration::from_secs(2), bob_rx.recv()).await.unwrap();
    assert_eq!(received, Some(vec![4, 5, 6]));

    alice.disconnect();
    alice.disconnect();
    assert_eq!(alice.state(), ConnectionState::Disconnected);
    wait_for_connections(&relay, 1).await;

    // A disposed channel stays down and drops sends
    alice.send(vec![7]);
    assert_eq!(alice.connect().await, Err(TransportError::Disposed));
    assert!(timeout(Duration::from_millis(200), bob_rx.recv()).await.is_err());

    bob.disconnect();
}

#[tokio::test]
async fn test_second_connect_supersedes_first() {
    let (port, relay) = start_test_relay().await;
    let channel = TransportChannel::new(room_url(port, "doc"), ReconnectPolicy::default());

    let (first, second) = tokio::join!(channel.connect(), channel.connect());
    assert_eq!(first, Err(TransportError::Superseded));
    assert_eq!(second, Ok(()));

    // Only the winning socket stays in the room
    tokio::time::sleep(Duration::from_millis(200)).await;
    wait_for_connections(&relay, 1).await;
    channel.disconnect();
}

#[tokio::test]
async fn test_channel_reconnects_when_relay_appears() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let channel = TransportChannel::new(
        room_url(port, "doc"),
        ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(200),
            max_attempts: 20,
        },
    );
    let (opened_tx, mut opened_rx) = mpsc::unbounded_channel();
    channel.on_open(move || {
        let _ = opened_tx.send(());
    });

    assert!(channel.connect().await.is_err());

    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let relay = RelayServer::with_defaults();
    tokio::spawn(async move {
        let _ = relay.serve(listener).await;
    });

    let opened = timeout(Duration::from_secs(5), opened_rx.recv()).await;
    assert_eq!(opened.unwrap(), Some(()));
    assert_eq!(channel.state(), ConnectionState::Connected);
    channel.disconnect();
}

fn client_config(port: u16) -> ClientConfig {
    ClientConfig {
        relay_url: format!("ws://127.0.0.1:{port}/ws"),
        ..ClientConfig::default()
    }
}

/// Next event matching `pred`, skipping the rest.
async fn wait_for<F>(events: &mut mpsc::UnboundedReceiver<SessionEvent>, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("session stopped");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event did not arrive in time")
}

async fn connected_session(
    port: u16,
    doc: &str,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
    let (handle, mut events, _task) = SessionRunner::spawn(doc, &client_config(port)).unwrap();
    handle.connect().await.unwrap();
    wait_for(&mut events, |e| {
        *e == SessionEvent::Status(ConnectionState::Connected)
    })
    .await;
    (handle, events)
}

fn render_of(event: SessionEvent) -> (TextTarget, String, u64) {
    match event {
        SessionEvent::Render {
            target,
            text,
            revision,
            ..
        } => (target, text, revision),
        other => panic!("expected a render, got {other:?}"),
    }
}

#[tokio::test]
async fn test_sessions_converge_through_relay() {
    let (port, relay) = start_test_relay().await;
    let (alice, mut alice_events) = connected_session(port, "shared-doc").await;
    let (bob, mut bob_events) = connected_session(port, "shared-doc").await;
    wait_for_connections(&relay, 2).await;

    alice.input(TextTarget::Main, "Hello", 5, 0).await.unwrap();
    let (target, text, revision) = render_of(
        wait_for(&mut bob_events, |e| matches!(e, SessionEvent::Render { .. })).await,
    );
    assert_eq!(target, TextTarget::Main);
    assert_eq!(text, "Hello");

    bob.input(TextTarget::Main, "Hello world", 11, revision)
        .await
        .unwrap();
    let (_, text, _) = render_of(
        wait_for(&mut alice_events, |e| matches!(e, SessionEvent::Render { .. })).await,
    );
    assert_eq!(text, "Hello world");

    // Forking a zone reaches the peer as one operation
    let zone = alice.create_zone(5..11).await.unwrap();
    let changed = wait_for(&mut bob_events, |e| matches!(e, SessionEvent::ZonesChanged(_))).await;
    assert_eq!(changed, SessionEvent::ZonesChanged(vec![zone.clone()]));
    let (_, text, _) = render_of(
        wait_for(&mut bob_events, |e| {
            matches!(e, SessionEvent::Render { target: TextTarget::Main, .. })
        })
        .await,
    );
    assert_eq!(text, "Hello");

    bob.open_zone(zone.clone()).await.unwrap();
    let (target, text, _) = render_of(
        wait_for(&mut bob_events, |e| matches!(e, SessionEvent::Render { .. })).await,
    );
    assert_eq!(target, TextTarget::Zone(zone));
    assert_eq!(text, " world");

    alice.shutdown().await.unwrap();
    bob.shutdown().await.unwrap();
    wait_for_rooms(&relay, 0).await;
}

#[tokio::test]
async fn test_offline_edits_reach_peers_on_connect() {
    let (port, relay) = start_test_relay().await;
    let (_bob, mut bob_events) = connected_session(port, "late").await;
    wait_for_connections(&relay, 1).await;

    let (alice, _alice_events, _task) =
        SessionRunner::spawn("late", &client_config(port)).unwrap();
    alice
        .input(TextTarget::Main, "typed offline", 13, 0)
        .await
        .unwrap();
    alice.connect().await.unwrap();

    let (_, text, _) = render_of(
        wait_for(&mut bob_events, |e| matches!(e, SessionEvent::Render { .. })).await,
    );
    assert_eq!(text, "typed offline");
}

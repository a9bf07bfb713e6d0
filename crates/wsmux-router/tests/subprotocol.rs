//! Integration tests for routing, fanout, and rooms over the in-memory
//! transport.

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, time::timeout};
use wsmux_protocol::{Direction, MessageKey, ProtocolError, json};
use wsmux_router::{
    ClientId, DispatchOutcome, FromQuery, HandlerError, RouterError, Socket, SocketConfig,
    Subprotocol,
};
use wsmux_transport::{
    RequestContext,
    memory::{self, MemoryPeer, Outgoing},
};

// =========================================================================
// A tiny game protocol
// =========================================================================

const GAME: &str = "com.example.game.v1";

#[derive(Debug, Serialize, Deserialize)]
struct Explore {
    cell: u32,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct State {
    cell: u32,
    revealed: bool,
}

/// Outbound: `state` (0), `said` (1). Inbound: `explore` (0), `join` (1).
fn game() -> Subprotocol {
    let mut builder = Subprotocol::builder(GAME);
    builder.outbound("state").unwrap();
    builder.outbound("said").unwrap();
    builder
        .inbound("explore", |socket: Socket, payload: Vec<u8>| async move {
            let cmd: Explore = json::from_payload(&payload)?;
            let state = State { cell: cmd.cell, revealed: true };
            socket.send_json("state", &state).await?;
            Ok::<_, HandlerError>(())
        })
        .unwrap();
    builder
        .inbound("join", |socket: Socket, payload: Vec<u8>| async move {
            let room = String::from_utf8(payload)?;
            socket.join(&room)?;
            Ok::<_, HandlerError>(())
        })
        .unwrap();
    builder.client_id(FromQuery("client".into()));
    builder.build()
}

fn open(sp: &Subprotocol, client: Option<&str>) -> (Socket, MemoryPeer) {
    open_with(sp, client, &SocketConfig::default())
}

fn open_with(sp: &Subprotocol, client: Option<&str>, config: &SocketConfig) -> (Socket, MemoryPeer) {
    let mut request = RequestContext::new("/ws").with_subprotocol(sp.name());
    if let Some(client) = client {
        request = request.with_query(format!("client={client}"));
    }
    let (conn, peer) = memory::pair(request, 512);
    (sp.connect(conn, config), peer)
}

fn frame(code: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![code];
    frame.extend_from_slice(payload);
    frame
}

async fn next_frame(peer: &mut MemoryPeer) -> Vec<u8> {
    timeout(Duration::from_secs(1), peer.recv_frame())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed")
}

async fn closed(socket: &Socket) {
    timeout(Duration::from_secs(1), socket.closed())
        .await
        .expect("socket was not torn down");
}

/// Lets spawned pumps run until they are idle.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// =========================================================================
// Dispatch
// =========================================================================

#[tokio::test]
async fn test_explore_replies_with_state() {
    let sp = game();
    let (_socket, mut peer) = open(&sp, Some("c1"));

    peer.send(frame(0, br#"{"cell":5}"#)).unwrap();

    let expected = json::to_payload(&State { cell: 5, revealed: true }).unwrap();
    assert_eq!(next_frame(&mut peer).await, frame(0, &expected));
}

#[tokio::test]
async fn test_handler_error_keeps_socket_open() {
    let sp = game();
    let (socket, mut peer) = open(&sp, Some("c1"));

    peer.send(frame(0, b"not json")).unwrap();
    peer.send(frame(0, br#"{"cell":1}"#)).unwrap();

    let reply = next_frame(&mut peer).await;
    let state: State = json::from_payload(&reply[1..]).unwrap();
    assert_eq!(state, State { cell: 1, revealed: true });
    assert!(!socket.is_closed());
}

#[tokio::test]
async fn test_unknown_code_without_fallback_is_dropped() {
    let sp = game();
    let (socket, mut peer) = open(&sp, Some("c1"));

    let outcome = sp.dispatch(&socket, &[9, 1, 2]).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Dropped);

    // Same thing through the read pump: the socket survives.
    peer.send(frame(9, b"?")).unwrap();
    peer.send(frame(0, br#"{"cell":2}"#)).unwrap();
    assert_eq!(next_frame(&mut peer).await[0], 0);
    assert!(!socket.is_closed());
}

#[tokio::test]
async fn test_fallback_receives_unmatched_messages() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut builder = Subprotocol::builder("fallback.v1");
    builder.inbound("known", |_: Socket, _: Vec<u8>| async { Ok::<_, HandlerError>(()) }).unwrap();
    builder.fallback(move |socket: Socket, key: MessageKey, payload: Vec<u8>| {
        let tx = tx.clone();
        async move {
            tx.send((socket.id(), key, payload))?;
            Ok::<_, HandlerError>(())
        }
    });
    let sp = builder.build();
    let (socket, peer) = open(&sp, None);

    assert_eq!(
        sp.dispatch(&socket, &[0]).await.unwrap(),
        DispatchOutcome::Handled
    );

    peer.send(frame(7, b"payload")).unwrap();
    let (id, key, payload) = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(id, socket.id());
    assert_eq!(key, MessageKey::Code(7));
    assert_eq!(payload, b"payload");
}

#[tokio::test]
async fn test_handlers_run_in_arrival_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut builder = Subprotocol::builder("order.v1");
    builder.outbound("done").unwrap();
    let log = Arc::clone(&events);
    builder
        .inbound("work", move |socket: Socket, payload: Vec<u8>| {
            let log = Arc::clone(&log);
            async move {
                let label = String::from_utf8(payload.clone())?;
                log.lock().push(format!("start {label}"));
                if label == "slow" {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                log.lock().push(format!("end {label}"));
                socket.send("done", &payload).await?;
                Ok::<_, HandlerError>(())
            }
        })
        .unwrap();
    let sp = builder.build();
    let (_socket, mut peer) = open(&sp, None);

    peer.send(frame(0, b"slow")).unwrap();
    peer.send(frame(0, b"fast")).unwrap();

    assert_eq!(next_frame(&mut peer).await, frame(0, b"slow"));
    assert_eq!(next_frame(&mut peer).await, frame(0, b"fast"));
    assert_eq!(
        *events.lock(),
        ["start slow", "end slow", "start fast", "end fast"]
    );
}

#[tokio::test]
async fn test_malformed_frame_closes_socket() {
    let sp = game();
    let (socket, mut peer) = open(&sp, Some("c1"));

    peer.send(Vec::new()).unwrap();

    closed(&socket).await;
    assert_eq!(peer.recv().await, Some(Outgoing::Close));
    assert_eq!(sp.socket_count(), 0);
}

#[tokio::test]
async fn test_oversized_frame_closes_socket() {
    let sp = game();
    let (socket, peer) = open(&sp, Some("c1"));

    peer.send(vec![0u8; 513]).unwrap();

    closed(&socket).await;
    assert_eq!(sp.socket_count(), 0);
}

// =========================================================================
// Fanout
// =========================================================================

#[tokio::test]
async fn test_send_to_client_reaches_every_socket_of_client() {
    let sp = game();
    let (_a1, mut peer_a1) = open(&sp, Some("c1"));
    let (_a2, mut peer_a2) = open(&sp, Some("c1"));
    let (_b, mut peer_b) = open(&sp, Some("c2"));
    let (_anon, mut peer_anon) = open(&sp, None);

    let reached = sp.send_to_client("c1", "said", b"hi").await.unwrap();
    assert_eq!(reached, 2);

    assert_eq!(next_frame(&mut peer_a1).await, frame(1, b"hi"));
    assert_eq!(next_frame(&mut peer_a2).await, frame(1, b"hi"));
    settle().await;
    assert_eq!(peer_b.try_recv(), None);
    assert_eq!(peer_anon.try_recv(), None);
}

#[tokio::test]
async fn test_fanout_to_absent_targets_reaches_nobody() {
    let sp = game();
    let (_socket, _peer) = open(&sp, Some("c1"));

    assert_eq!(sp.send_to_client("nobody", "said", b"").await.unwrap(), 0);
    assert_eq!(sp.send_to_client("", "said", b"").await.unwrap(), 0);
    assert_eq!(sp.send_to_room("no-such-room", "said", b"").await.unwrap(), 0);
}

#[tokio::test]
async fn test_broadcast_includes_anonymous_sockets() {
    let sp = game();
    let (_a, mut peer_a) = open(&sp, Some("c1"));
    let (_anon, mut peer_anon) = open(&sp, None);

    assert_eq!(sp.broadcast("said", b"all").await.unwrap(), 2);
    assert_eq!(next_frame(&mut peer_a).await, frame(1, b"all"));
    assert_eq!(next_frame(&mut peer_anon).await, frame(1, b"all"));
}

#[tokio::test]
async fn test_unregistered_outbound_name_is_an_error() {
    let sp = game();
    let (socket, _peer) = open(&sp, Some("c1"));

    let err = sp.broadcast("explore", b"").await.unwrap_err();
    assert!(matches!(
        err,
        RouterError::Protocol(ProtocolError::UnknownMessage {
            direction: Direction::Outbound,
            ..
        })
    ));
    assert!(socket.send("nope", b"").await.is_err());
}

#[tokio::test]
async fn test_socket_send_to_client_includes_itself() {
    let sp = game();
    let (a1, mut peer_a1) = open(&sp, Some("c1"));
    let (_a2, mut peer_a2) = open(&sp, Some("c1"));
    let (anon, _peer_anon) = open(&sp, None);

    assert_eq!(a1.send_to_client("said", b"sync").await.unwrap(), 2);
    assert_eq!(next_frame(&mut peer_a1).await, frame(1, b"sync"));
    assert_eq!(next_frame(&mut peer_a2).await, frame(1, b"sync"));

    let err = anon.send_to_client("said", b"").await.unwrap_err();
    assert!(matches!(err, RouterError::Anonymous(id) if id == anon.id()));
}

#[tokio::test]
async fn test_send_to_id() {
    let sp = game();
    let (socket, mut peer) = open(&sp, None);

    assert!(sp.send_to_id(socket.id(), "said", b"x").await.unwrap());
    assert_eq!(next_frame(&mut peer).await, frame(1, b"x"));

    socket.close();
    assert!(!sp.send_to_id(socket.id(), "said", b"x").await.unwrap());
}

// =========================================================================
// Rooms
// =========================================================================

#[tokio::test]
async fn test_room_join_is_idempotent_and_reaches_all_client_sockets() {
    let sp = game();
    let (a1, mut peer_a1) = open(&sp, Some("c1"));
    let (a2, mut peer_a2) = open(&sp, Some("c1"));
    let (_b, mut peer_b) = open(&sp, Some("c2"));

    a1.join("lobby").unwrap();
    a2.join("lobby").unwrap();
    assert_eq!(sp.room_members("lobby"), Some(vec![ClientId::new("c1").unwrap()]));

    assert_eq!(sp.send_to_room("lobby", "said", b"r").await.unwrap(), 2);
    assert_eq!(next_frame(&mut peer_a1).await, frame(1, b"r"));
    assert_eq!(next_frame(&mut peer_a2).await, frame(1, b"r"));
    settle().await;
    assert_eq!(peer_b.try_recv(), None);
}

#[tokio::test]
async fn test_leaving_last_member_deletes_room() {
    let sp = game();
    let (a, _peer_a) = open(&sp, Some("c1"));
    let (b, _peer_b) = open(&sp, Some("c2"));

    a.join("r").unwrap();
    a.leave("r");
    assert_eq!(sp.room_members("r"), None);
    assert_eq!(sp.room_count(), 0);

    // Leaving again, or leaving someone else's room, changes nothing.
    a.leave("r");
    b.join("other").unwrap();
    a.leave("other");
    assert_eq!(sp.room_members("other"), Some(vec![ClientId::new("c2").unwrap()]));
}

#[tokio::test]
async fn test_join_through_handler() {
    let sp = game();
    let (_socket, peer) = open(&sp, Some("c1"));

    peer.send(frame(1, b"table-3")).unwrap();
    settle().await;

    assert_eq!(sp.rooms_of("c1"), ["table-3"]);
}

#[tokio::test]
async fn test_anonymous_socket_cannot_join() {
    let sp = game();
    let (anon, _peer) = open(&sp, None);

    let err = anon.join("lobby").unwrap_err();
    assert!(matches!(err, RouterError::Anonymous(id) if id == anon.id()));
    assert_eq!(sp.room_count(), 0);

    // Leaving is always a no-op for anonymous sockets.
    anon.leave("lobby");
}

#[tokio::test]
async fn test_closed_socket_cannot_join() {
    let sp = game();
    let (socket, _peer) = open(&sp, Some("c1"));
    socket.close();

    let err = sp.join_room("lobby", &socket).unwrap_err();
    assert!(matches!(err, RouterError::SocketClosed(_)));
    assert_eq!(sp.room_count(), 0);
}

// =========================================================================
// Teardown
// =========================================================================

#[tokio::test]
async fn test_teardown_removes_socket_from_every_registry() {
    let sp = game();
    let (a, peer_a) = open(&sp, Some("c1"));
    let (b, _peer_b) = open(&sp, Some("c2"));
    a.join("solo").unwrap();
    a.join("shared").unwrap();
    b.join("shared").unwrap();

    peer_a.close().unwrap();
    closed(&a).await;

    assert_eq!(sp.socket_count(), 1);
    assert_eq!(sp.client_socket_count("c1"), 0);
    assert_eq!(sp.room_members("solo"), None);
    assert_eq!(sp.room_members("shared"), Some(vec![ClientId::new("c2").unwrap()]));
    assert_eq!(sp.send_to_client("c1", "said", b"").await.unwrap(), 0);

    let err = a.send("said", b"").await.unwrap_err();
    assert!(matches!(err, RouterError::SocketClosed(id) if id == a.id()));
}

#[tokio::test]
async fn test_client_keeps_rooms_while_one_socket_remains() {
    let sp = game();
    let (a1, _peer_a1) = open(&sp, Some("c1"));
    let (_a2, _peer_a2) = open(&sp, Some("c1"));
    a1.join("r").unwrap();

    a1.close();

    assert_eq!(sp.client_socket_count("c1"), 1);
    assert_eq!(sp.room_members("r"), Some(vec![ClientId::new("c1").unwrap()]));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let sp = game();
    let (socket, mut peer) = open(&sp, Some("c1"));
    let (_other, _peer_other) = open(&sp, Some("c1"));

    socket.close();
    socket.close();
    socket.clone().close();

    assert!(socket.is_closed());
    assert_eq!(sp.socket_count(), 1);
    assert_eq!(sp.client_socket_count("c1"), 1);
    assert_eq!(
        timeout(Duration::from_secs(1), peer.recv()).await.unwrap(),
        Some(Outgoing::Close)
    );
}

#[tokio::test]
async fn test_peer_disappearing_tears_socket_down() {
    let sp = game();
    let (socket, peer) = open(&sp, Some("c1"));

    drop(peer);

    closed(&socket).await;
    assert_eq!(sp.socket_count(), 0);
}

#[tokio::test]
async fn test_close_all() {
    let sp = game();
    let (a, _peer_a) = open(&sp, Some("c1"));
    let (b, _peer_b) = open(&sp, None);

    sp.close_all();

    assert!(a.is_closed() && b.is_closed());
    assert_eq!(sp.socket_count(), 0);
    assert_eq!(sp.client_count(), 0);
}

// =========================================================================
// Configuration
// =========================================================================

#[tokio::test]
async fn test_duplicate_registration_keeps_first() {
    let mut builder = Subprotocol::builder("dup.v1");
    builder.outbound("state").unwrap();
    let err = builder.outbound("state").unwrap_err();
    assert!(matches!(err, ProtocolError::DuplicateName { .. }));

    builder.outbound("same-name-other-direction").unwrap();
    builder
        .inbound("state", |_: Socket, _: Vec<u8>| async { Ok::<_, HandlerError>(()) })
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    builder
        .inbound("ping", move |_: Socket, _: Vec<u8>| {
            let tx = tx.clone();
            async move {
                tx.send("first")?;
                Ok::<_, HandlerError>(())
            }
        })
        .unwrap();
    let err = builder
        .inbound("ping", |_: Socket, _: Vec<u8>| async { Ok::<_, HandlerError>(()) })
        .unwrap_err();
    assert!(matches!(err, ProtocolError::DuplicateName { direction: Direction::Inbound, .. }));

    let sp = builder.build();
    assert_eq!(sp.vocabulary().len(Direction::Outbound), 2);
    assert_eq!(sp.vocabulary().len(Direction::Inbound), 2);

    let (socket, _peer) = open(&sp, None);
    sp.dispatch(&socket, &[1]).await.unwrap();
    assert_eq!(rx.recv().await, Some("first"));
}

/// Echo protocol framed with message names instead of codes.
fn named() -> Subprotocol {
    let mut builder = Subprotocol::builder("named.v1");
    builder.outbound("echoed").unwrap();
    builder
        .inbound("echo", |socket: Socket, payload: Vec<u8>| async move {
            socket.send("echoed", &payload).await?;
            Ok::<_, HandlerError>(())
        })
        .unwrap();
    builder.codec(wsmux_protocol::NameCodec);
    builder.build()
}

#[tokio::test]
async fn test_name_codec_end_to_end() {
    let sp = named();
    let (_socket, mut peer) = open(&sp, None);

    peer.send(b"\x04echohey".to_vec()).unwrap();
    assert_eq!(next_frame(&mut peer).await, b"\x06echoedhey");
}

#[tokio::test]
async fn test_name_codec_invalid_utf8_name_closes_socket() {
    let sp = named();
    let (socket, mut peer) = open(&sp, None);

    peer.send(b"\x04ech\xffhey".to_vec()).unwrap();

    closed(&socket).await;
    assert_eq!(peer.recv().await, Some(Outgoing::Close));
    assert_eq!(sp.socket_count(), 0);
}

// =========================================================================
// Keepalive and backpressure (virtual time)
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_silent_peer_is_pinged_then_dropped() {
    let sp = game();
    let start = tokio::time::Instant::now();
    let (socket, mut peer) = open(&sp, Some("c1"));

    assert_eq!(peer.recv().await, Some(Outgoing::Ping));
    assert!(start.elapsed() >= Duration::from_secs(54));

    assert_eq!(peer.recv().await, Some(Outgoing::Close));
    assert!(start.elapsed() >= Duration::from_secs(60));

    socket.closed().await;
    assert_eq!(sp.socket_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pongs_keep_socket_alive() {
    let sp = game();
    let (socket, mut peer) = open(&sp, Some("c1"));

    for _ in 0..5 {
        assert_eq!(peer.recv().await, Some(Outgoing::Ping));
        peer.pong().unwrap();
    }

    assert!(!socket.is_closed());
    assert_eq!(sp.socket_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_peer_is_closed_after_send_timeout() {
    let sp = game();
    let config = SocketConfig {
        send_timeout: Some(Duration::from_secs(1)),
        ..SocketConfig::default()
    };
    let request = RequestContext::new("/ws").with_query("client=slow");
    let (conn, _peer) = memory::pair_with_buffer(request, 512, 1);
    let socket = sp.connect(conn, &config);

    let mut result = Ok(());
    for _ in 0..10 {
        result = socket.send("said", b"x").await;
        if result.is_err() {
            break;
        }
    }

    assert!(matches!(result, Err(RouterError::SendTimeout(id)) if id == socket.id()));
    assert!(socket.is_closed());
    assert_eq!(sp.socket_count(), 0);
    assert_eq!(sp.client_socket_count("slow"), 0);
}

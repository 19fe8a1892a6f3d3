//! End-to-end tests against a real listening server.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use glam::Vec2;
use protocol::packets::{ClientPacket, DisconnectReason, InputCommand, RejectReason, ServerPacket, StateSnapshot};
use protocol::view::ClientWorld;
use protocol::{Color, PROTOCOL_VERSION};
use server::Config;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    url: String,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.tick_rate = 20;
    config.server.outbound_queue = 256;
    config.server.seed = Some(7);
    config.ai.count = 0;
    config
}

async fn start(config: Config) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server::serve(listener, Arc::new(config), async move {
        let _ = stop_rx.await;
    }));
    TestServer {
        url: format!("ws://{}", addr),
        stop,
        handle,
    }
}

async fn send(ws: &mut Socket, packet: ClientPacket) {
    ws.send(Message::Binary(packet.encode().to_vec().into())).await.unwrap();
}

async fn recv(ws: &mut Socket) -> ServerPacket {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("websocket error");
        if let Message::Binary(data) = msg {
            return ServerPacket::parse(&data).expect("undecodable server frame");
        }
    }
}

async fn next_snapshot(ws: &mut Socket) -> StateSnapshot {
    loop {
        if let ServerPacket::Snapshot(snapshot) = recv(ws).await {
            return snapshot;
        }
    }
}

fn hello(name: &str) -> ClientPacket {
    ClientPacket::Hello {
        name: name.into(),
        color: Color::new(200, 40, 40),
        resume_token: None,
    }
}

/// Connect and complete the handshake; returns the socket and client id.
async fn join(url: &str, name: &str) -> (Socket, u32) {
    let (mut ws, _) = connect_async(url).await.unwrap();
    send(&mut ws, hello(name)).await;
    match recv(&mut ws).await {
        ServerPacket::Accept { client_id, .. } => (ws, client_id),
        other => panic!("expected accept, got {:?}", other),
    }
}

#[tokio::test]
async fn test_join_gets_accept_then_full_snapshot() {
    let server = start(test_config()).await;
    let (mut ws, _) = connect_async(&server.url).await.unwrap();
    send(&mut ws, hello("  ace  ")).await;

    let client_id = match recv(&mut ws).await {
        ServerPacket::Accept {
            client_id,
            tick_rate,
            arena,
            ..
        } => {
            assert_eq!(tick_rate, 20);
            assert_eq!(arena, Vec2::new(1280.0, 720.0));
            client_id
        }
        other => panic!("expected accept, got {:?}", other),
    };

    let snapshot = next_snapshot(&mut ws).await;
    assert!(snapshot.full);
    let entry = snapshot
        .roster
        .iter()
        .find(|e| e.client_id == client_id)
        .expect("joined client missing from roster");
    assert_eq!(entry.name, "ace");
    assert!(snapshot.entities.iter().any(|e| e.id == entry.tank_id));

    let _ = server.stop.send(());
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_input_moves_tank() {
    let server = start(test_config()).await;
    let (mut ws, client_id) = join(&server.url, "mover").await;

    let mut world = ClientWorld::new();
    let first = next_snapshot(&mut ws).await;
    assert!(world.apply(&first));
    let tank_id = world
        .roster()
        .find(|e| e.client_id == client_id)
        .map(|e| e.tank_id)
        .expect("no tank");
    let start = world.entity(tank_id).unwrap().position;

    // Head toward the middle so the arena edge never blocks us.
    let dir = if start.x < 640.0 { 1.0 } else { -1.0 };
    send(
        &mut ws,
        ClientPacket::Input(InputCommand {
            client_id,
            tick: first.tick,
            move_vector: Vec2::new(dir, 0.0),
            aim_angle: 0.0,
            fire: false,
        }),
    )
    .await;

    for _ in 0..10 {
        let snapshot = next_snapshot(&mut ws).await;
        world.apply(&snapshot);
    }
    let now = world.entity(tank_id).unwrap().position;
    assert!((now.x - start.x) * dir > 10.0, "tank did not move: {:?} -> {:?}", start, now);
    assert_eq!(now.y, start.y);

    let _ = server.stop.send(());
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_ping_pong() {
    let server = start(test_config()).await;
    let (mut ws, _) = join(&server.url, "pinger").await;

    send(&mut ws, ClientPacket::Ping { nonce: 99 }).await;
    loop {
        if let ServerPacket::Pong { nonce } = recv(&mut ws).await {
            assert_eq!(nonce, 99);
            break;
        }
    }

    let _ = server.stop.send(());
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_version_mismatch_rejected() {
    let server = start(test_config()).await;
    let (mut ws, _) = connect_async(&server.url).await.unwrap();

    let mut frame = hello("old").encode().to_vec();
    frame[0] = PROTOCOL_VERSION.wrapping_add(1);
    ws.send(Message::Binary(frame.into())).await.unwrap();

    assert_eq!(
        recv(&mut ws).await,
        ServerPacket::Reject {
            reason: RejectReason::VersionMismatch
        }
    );

    let _ = server.stop.send(());
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_bad_frame_only_drops_sender() {
    let server = start(test_config()).await;
    let (mut bad, _) = join(&server.url, "bad").await;
    let (mut good, _) = join(&server.url, "good").await;
    let before = next_snapshot(&mut good).await.tick;

    bad.send(Message::Binary(vec![PROTOCOL_VERSION, 0x55].into())).await.unwrap();
    loop {
        if let ServerPacket::Disconnect { reason } = recv(&mut bad).await {
            assert_eq!(reason, DisconnectReason::ProtocolViolation);
            break;
        }
    }

    for _ in 0..5 {
        next_snapshot(&mut good).await;
    }
    assert!(next_snapshot(&mut good).await.tick > before);

    let _ = server.stop.send(());
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_full_rejected() {
    let mut config = test_config();
    config.server.max_connections = 1;
    let server = start(config).await;
    let (_first, _) = join(&server.url, "first").await;

    let (mut ws, _) = connect_async(&server.url).await.unwrap();
    send(&mut ws, hello("second")).await;
    assert_eq!(
        recv(&mut ws).await,
        ServerPacket::Reject {
            reason: RejectReason::ServerFull
        }
    );

    let _ = server.stop.send(());
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_notifies_clients() {
    let server = start(test_config()).await;
    let (mut ws, _) = join(&server.url, "stayer").await;
    next_snapshot(&mut ws).await;

    let _ = server.stop.send(());
    loop {
        if let ServerPacket::Disconnect { reason } = recv(&mut ws).await {
            assert_eq!(reason, DisconnectReason::ServerShutdown);
            break;
        }
    }
    server.handle.await.unwrap().unwrap();
}

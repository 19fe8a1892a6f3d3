//! Networking: listener, join handshake and per-connection tasks.
//!
//! Every client is one WebSocket carrying binary frames. Its task parses
//! inbound frames, drops the newest input into the client's input slot,
//! forwards control messages to the game loop and writes whatever the loop
//! queues for it.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use protocol::packets::{ClientPacket, DisconnectReason, RejectReason, ServerPacket};
use protocol::{PROTOCOL_VERSION, ProtocolError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

use crate::config::Config;

pub mod client;
pub mod game;
pub mod session;
pub mod snapshot;

pub use client::{Connection, Session};
pub use game::{ControlEvent, GameServer, ServerState, TickPacer, run_game_loop};
pub use session::SessionManager;
pub use snapshot::SnapshotBuilder;

/// Capacity of the shared control queue into the game loop.
const CONTROL_QUEUE: usize = 1024;
/// Minimum spacing of liveness notes sent for ordinary traffic.
const SEEN_INTERVAL: Duration = Duration::from_secs(1);
/// How long connection tasks get to flush their goodbyes on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection tracking state (shared across connection handlers).
struct ConnectionState {
    /// Number of connections per IP address.
    ip_connections: HashMap<IpAddr, usize>,
    /// Total number of connections.
    total_connections: usize,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            ip_connections: HashMap::new(),
            total_connections: 0,
        }
    }

    /// Try to add a connection, returns true if allowed.
    fn try_add_connection(&mut self, ip: IpAddr, max_total: usize, max_per_ip: usize) -> bool {
        if self.total_connections >= max_total {
            return false;
        }
        let count = self.ip_connections.entry(ip).or_insert(0);
        if *count >= max_per_ip {
            return false;
        }
        *count += 1;
        self.total_connections += 1;
        true
    }

    fn remove_connection(&mut self, ip: IpAddr) {
        if let Some(count) = self.ip_connections.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.ip_connections.remove(&ip);
            }
        }
        self.total_connections = self.total_connections.saturating_sub(1);
    }
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn run<F>(config: Config, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on {}", listener.local_addr()?);
    serve(listener, Arc::new(config), shutdown).await
}

/// Accept connections on `listener` until `shutdown` resolves, then drain the
/// match and wait for connection tasks to close.
pub async fn serve<F>(listener: TcpListener, config: Arc<Config>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let conn_state = Arc::new(RwLock::new(ConnectionState::new()));
    let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
    let (stop_tx, stop_rx) = watch::channel(false);

    let game = GameServer::new(Arc::clone(&config));
    let game_task = tokio::spawn(run_game_loop(game, control_rx, stop_rx));

    // Sockets still in the handshake count too, so allow some headroom over
    // the session limit; the game loop enforces the real one.
    let max_sockets = config.server.max_connections.saturating_mul(2).max(1);
    let mut connections = JoinSet::new();
    let mut next_connection_id = 0u64;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, draining");
                break;
            }
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        continue;
                    }
                };
                {
                    let mut state = conn_state.write().await;
                    if !state.try_add_connection(addr.ip(), max_sockets, config.server.ip_limit) {
                        warn!("Connection rejected (limit reached): {}", addr);
                        continue;
                    }
                }

                next_connection_id += 1;
                let connection_id = next_connection_id;
                let control_tx = control_tx.clone();
                let config = Arc::clone(&config);
                let conn_state = Arc::clone(&conn_state);
                connections.spawn(async move {
                    let result = handle_connection(stream, addr, connection_id, control_tx, config).await;

                    // Always remove from connection tracking when done
                    conn_state.write().await.remove_connection(addr.ip());

                    if let Err(e) = result {
                        error!("Connection error from {}: {}", addr, e);
                    }
                });
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    error!("Connection task failed: {}", e);
                }
            }
        }
    }

    drop(listener);
    let _ = stop_tx.send(true);
    let game = game_task.await?;
    info!(
        "Match ended after {} ticks, {} snapshots dropped",
        game.simulation().current_tick(),
        game.dropped_frames
    );
    drop(control_tx);

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Aborting {} connections that did not close", connections.len());
        connections.abort_all();
    }
    info!("Server stopped");
    Ok(())
}

/// Next binary frame, skipping control and text frames. `None` once the
/// socket is closed or broken.
async fn next_binary<S>(read: &mut S) -> Option<Bytes>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Binary(data)) => return Some(data),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

async fn send_packet<S>(write: &mut S, packet: &ServerPacket) -> Result<(), tungstenite::Error>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    write.send(Message::Binary(packet.encode().into())).await
}

/// Refuse the handshake and close.
async fn reject<S>(write: &mut S, addr: SocketAddr, reason: RejectReason)
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    info!("Rejected {}: {:?}", addr, reason);
    let _ = send_packet(write, &ServerPacket::Reject { reason }).await;
    let _ = write.close().await;
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection_id: u64,
    control_tx: mpsc::Sender<ControlEvent>,
    config: Arc<Config>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    debug!("New connection from {}", addr);
    let (mut write, mut read) = ws_stream.split();

    let handshake_timeout = Duration::from_secs_f32(config.server.client_timeout_secs.max(1.0));
    let hello = match tokio::time::timeout(handshake_timeout, next_binary(&mut read)).await {
        Ok(Some(data)) => ClientPacket::parse(&data),
        Ok(None) => return Ok(()),
        Err(_) => {
            info!("Handshake timed out for {}", addr);
            return Ok(());
        }
    };
    let (name, color, resume_token) = match hello {
        Ok(ClientPacket::Hello {
            name,
            color,
            resume_token,
        }) => (name, color, resume_token),
        Ok(other) => {
            warn!("Expected hello from {}, got {:?}", addr, other);
            reject(&mut write, addr, RejectReason::Malformed).await;
            return Ok(());
        }
        Err(ProtocolError::UnsupportedProtocol(version)) => {
            warn!(
                "Protocol mismatch from {}: client {}, server {}",
                addr, version, PROTOCOL_VERSION
            );
            reject(&mut write, addr, RejectReason::VersionMismatch).await;
            return Ok(());
        }
        Err(e) => {
            warn!("Malformed hello from {}: {}", addr, e);
            reject(&mut write, addr, RejectReason::Malformed).await;
            return Ok(());
        }
    };

    let (out_tx, mut out_rx) = mpsc::channel::<Bytes>(config.server.outbound_queue.max(1));
    let (input_tx, input_rx) = watch::channel(None);
    let (reply_tx, reply_rx) = oneshot::channel();
    let join = ControlEvent::Join {
        name,
        color,
        resume_token,
        connection: Connection {
            id: connection_id,
            addr,
            outbound: out_tx,
            input: input_rx,
        },
        reply: reply_tx,
    };
    if control_tx.send(join).await.is_err() {
        reject(&mut write, addr, RejectReason::ShuttingDown).await;
        return Ok(());
    }
    let client_id = match reply_rx.await {
        Ok(Ok(client_id)) => client_id,
        Ok(Err(reason)) => {
            reject(&mut write, addr, reason).await;
            return Ok(());
        }
        Err(_) => {
            reject(&mut write, addr, RejectReason::ShuttingDown).await;
            return Ok(());
        }
    };

    let mut graceful = false;
    let mut violation = false;
    let mut last_seen_note = Instant::now();

    // Message loop - inbound frames and the outbound queue
    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if last_seen_note.elapsed() >= SEEN_INTERVAL {
                            let _ = control_tx.try_send(ControlEvent::Seen { client_id, connection_id });
                            last_seen_note = Instant::now();
                        }
                        match ClientPacket::parse(&data) {
                            Ok(ClientPacket::Input(cmd)) => {
                                input_tx.send_replace(Some(cmd));
                            }
                            Ok(ClientPacket::Upgrade { kind }) => {
                                let event = ControlEvent::Upgrade { client_id, connection_id, kind };
                                if control_tx.try_send(event).is_err() {
                                    warn!("Control queue full, dropped upgrade from client {}", client_id);
                                }
                            }
                            Ok(ClientPacket::Ping { nonce }) => {
                                let _ = control_tx.try_send(ControlEvent::Seen { client_id, connection_id });
                                if let Err(e) = send_packet(&mut write, &ServerPacket::Pong { nonce }).await {
                                    warn!("Failed to send pong to client {}: {}", client_id, e);
                                    break;
                                }
                            }
                            Ok(ClientPacket::Goodbye) => {
                                graceful = true;
                                break;
                            }
                            Ok(ClientPacket::Hello { .. }) => {
                                warn!("Duplicate hello from client {}", client_id);
                                violation = true;
                                break;
                            }
                            Err(e) => {
                                warn!("Packet error from client {}: {}", client_id, e);
                                violation = true;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client {} disconnected", client_id);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }
            frame = out_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = write.send(Message::Binary(frame.into())).await {
                            warn!("Failed to send to client {}: {}", client_id, e);
                            break;
                        }
                    }
                    None => {
                        debug!("Session closed by server for client {}", client_id);
                        break;
                    }
                }
            }
        }
    }

    if violation {
        let bye = ServerPacket::Disconnect {
            reason: DisconnectReason::ProtocolViolation,
        };
        let _ = send_packet(&mut write, &bye).await;
    }
    let _ = control_tx
        .send(ControlEvent::Leave {
            client_id,
            connection_id,
            graceful,
        })
        .await;
    let _ = write.close().await;
    Ok(())
}

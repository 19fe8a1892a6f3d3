//! Game server loop.
//!
//! One task owns the [`GameServer`]: the simulation, the sessions and the
//! snapshot cache. Connection tasks talk to it only through [`ControlEvent`]s
//! and per-client channels, so no lock is ever held across a tick.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use protocol::Color;
use protocol::packets::{DisconnectReason, GameEvent, RejectReason, ServerPacket, UpgradeKind};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior, sleep_until};
use tracing::{debug, info, warn};

use super::client::Connection;
use super::session::{Departed, SessionManager};
use super::snapshot::SnapshotBuilder;
use crate::config::Config;
use crate::simulation::{Simulation, TickReport};

/// Lifecycle of the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Lobby: sessions are accepted, no ticks run.
    Idle,
    Running,
    /// Shutting down: no new sessions, clients are being told to leave.
    Draining,
    Stopped,
}

/// Messages from connection tasks to the game loop.
#[derive(Debug)]
pub enum ControlEvent {
    Join {
        name: String,
        color: Color,
        resume_token: Option<u64>,
        connection: Connection,
        reply: oneshot::Sender<Result<u32, RejectReason>>,
    },
    Upgrade {
        client_id: u32,
        connection_id: u64,
        kind: UpgradeKind,
    },
    /// Something arrived from the client.
    Seen { client_id: u32, connection_id: u64 },
    Leave {
        client_id: u32,
        connection_id: u64,
        /// The client said goodbye instead of dropping.
        graceful: bool,
    },
}

pub struct GameServer {
    config: Arc<Config>,
    state: ServerState,
    sim: Simulation,
    sessions: SessionManager,
    snapshots: SnapshotBuilder,
    /// Join/leave events waiting for the next broadcast.
    pending_events: Vec<GameEvent>,
    /// Snapshots dropped because a client's queue was full.
    pub dropped_frames: u64,
}

impl GameServer {
    pub fn new(config: Arc<Config>) -> Self {
        let seed = config.server.seed.unwrap_or_else(rand::random);
        let state = if config.server.lobby_min_players == 0 {
            ServerState::Running
        } else {
            ServerState::Idle
        };
        info!("Game server created in {:?} state (seed {})", state, seed);
        Self {
            sim: Simulation::new(Arc::clone(&config), seed),
            sessions: SessionManager::new(Arc::clone(&config)),
            snapshots: SnapshotBuilder::new(),
            pending_events: Vec::new(),
            dropped_frames: 0,
            state,
            config,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    fn set_state(&mut self, next: ServerState) {
        if self.state != next {
            info!("Server state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    pub fn handle_control(&mut self, event: ControlEvent, now: Instant) {
        match event {
            ControlEvent::Join {
                name,
                color,
                resume_token,
                connection,
                reply,
            } => self.on_join(&name, color, resume_token, connection, reply, now),
            ControlEvent::Upgrade {
                client_id,
                connection_id,
                kind,
            } => {
                self.sessions.touch(client_id, connection_id, now);
                if let Err(e) = self.sessions.on_upgrade(client_id, kind, self.sim.world()) {
                    debug!("Upgrade from client {} refused: {}", client_id, e);
                }
            }
            ControlEvent::Seen {
                client_id,
                connection_id,
            } => self.sessions.touch(client_id, connection_id, now),
            ControlEvent::Leave {
                client_id,
                connection_id,
                graceful,
            } => {
                if let Some(departed) = self.sessions.on_disconnect(client_id, connection_id, graceful, now) {
                    self.announce_departure(departed);
                }
            }
        }
    }

    fn on_join(
        &mut self,
        name: &str,
        color: Color,
        resume_token: Option<u64>,
        connection: Connection,
        reply: oneshot::Sender<Result<u32, RejectReason>>,
        now: Instant,
    ) {
        if matches!(self.state, ServerState::Draining | ServerState::Stopped) {
            let _ = reply.send(Err(RejectReason::ShuttingDown));
            return;
        }

        let connection_id = connection.id;
        let joined = match self.sessions.on_connect(name, color, resume_token, connection, now) {
            Ok(joined) => joined,
            Err(e) => {
                warn!("Join refused: {}", e);
                let _ = reply.send(Err(RejectReason::ServerFull));
                return;
            }
        };

        let accept = ServerPacket::Accept {
            client_id: joined.client_id,
            resume_token: joined.resume_token,
            tick_rate: self.config.server.tick_rate,
            arena: self.sim.arena().size(),
            server_name: self.config.server.name.clone(),
        }
        .encode();
        if let Some(session) = self.sessions.get(joined.client_id) {
            session.try_send(accept);
        }
        if reply.send(Ok(joined.client_id)).is_err() {
            // The connection task is already gone.
            self.sessions.on_disconnect(joined.client_id, connection_id, false, now);
            return;
        }

        if self.state == ServerState::Idle {
            if self.sessions.len() >= self.config.server.lobby_min_players {
                self.set_state(ServerState::Running);
            } else {
                self.send_full(joined.client_id);
            }
        }
    }

    /// Send a full snapshot of the current state to one client right away.
    fn send_full(&mut self, client_id: u32) {
        let tick = self.sim.current_tick() as u32;
        let states = self.sim.entity_states();
        let snapshot = SnapshotBuilder::full(tick, &states, &[], self.sessions.roster());
        let frame = ServerPacket::Snapshot(snapshot).encode();
        if let Some(session) = self.sessions.get_mut(client_id) {
            session.needs_full = !session.try_send(frame);
        }
    }

    fn announce_departure(&mut self, departed: Departed) {
        if let Some(tank_id) = departed.tank_id {
            self.pending_events.push(GameEvent::PlayerLeft {
                client_id: departed.client_id,
                tank_id,
            });
        }
    }

    /// Run one simulation tick and broadcast the result. Does nothing unless
    /// the server is running.
    pub fn tick(&mut self) -> Option<TickReport> {
        if self.state != ServerState::Running {
            return None;
        }
        let current = self.sim.current_tick() as u32;
        self.sessions.collect_inputs(current);
        let input = self.sessions.take_tick_input();
        let report = self.sim.tick(input);

        for &(client_id, tank_id) in &report.spawned {
            if !self.sessions.bind_tank(client_id, tank_id) {
                continue;
            }
            if let Some(session) = self.sessions.get(client_id) {
                self.pending_events.push(GameEvent::PlayerJoined {
                    client_id,
                    tank_id,
                    name: session.name.clone(),
                    color: session.color,
                });
            }
        }

        self.broadcast(&report);
        Some(report)
    }

    fn broadcast(&mut self, report: &TickReport) {
        let tick = report.tick as u32;
        let mut events = std::mem::take(&mut self.pending_events);
        events.extend(report.events.iter().cloned());
        let states = self.sim.entity_states();

        let delta = ServerPacket::Snapshot(self.snapshots.delta(tick, &states, &report.removed, &events)).encode();
        let full: Option<Bytes> = self
            .sessions
            .sessions()
            .any(|s| s.is_connected() && s.needs_full)
            .then(|| {
                ServerPacket::Snapshot(SnapshotBuilder::full(tick, &states, &events, self.sessions.roster())).encode()
            });

        for session in self.sessions.sessions_mut() {
            if !session.is_connected() {
                continue;
            }
            let (frame, is_full) = match (&full, session.needs_full) {
                (Some(full), true) => (full.clone(), true),
                _ => (delta.clone(), false),
            };
            if session.try_send(frame) {
                if is_full {
                    session.needs_full = false;
                }
            } else {
                // The client missed a delta; catch it up with a full one.
                session.needs_full = true;
                self.dropped_frames += 1;
                debug!("Dropped snapshot {} for client {}", tick, session.id);
            }
        }
    }

    /// Liveness sweep: time out silent clients, retire expired sessions.
    pub fn sweep(&mut self, now: Instant) {
        let sweep = self.sessions.sweep(now);
        for departed in sweep.departed {
            self.announce_departure(departed);
        }
    }

    /// Tell every client the server is going away and close their queues.
    pub fn drain(&mut self) {
        self.set_state(ServerState::Draining);
        let bye = ServerPacket::Disconnect {
            reason: DisconnectReason::ServerShutdown,
        }
        .encode();
        let connections = self.sessions.close_all();
        info!("Disconnecting {} clients", connections.len());
        for connection in connections {
            let _ = connection.outbound.try_send(bye.clone());
        }
        self.set_state(ServerState::Stopped);
    }
}

/// Ticks owed at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Due {
    pub run: u32,
    pub dropped: u32,
}

/// Fixed-step scheduler. Falling behind runs at most `max_catchup` ticks in
/// a row; older ticks are dropped rather than accumulated.
#[derive(Debug, Clone)]
pub struct TickPacer {
    interval: Duration,
    next: Instant,
    max_catchup: u32,
}

impl TickPacer {
    pub fn new(interval: Duration, start: Instant, max_catchup: u32) -> Self {
        Self {
            interval,
            next: start + interval,
            max_catchup: max_catchup.max(1),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.next
    }

    pub fn reset(&mut self, now: Instant) {
        self.next = now + self.interval;
    }

    pub fn due(&mut self, now: Instant) -> Due {
        if now < self.next {
            return Due { run: 0, dropped: 0 };
        }
        let behind = now.duration_since(self.next).as_nanos();
        let owed = (behind / self.interval.as_nanos().max(1)).min(u32::MAX as u128 - 1) as u32 + 1;
        let run = owed.min(self.max_catchup);
        self.next += self.interval * owed;
        Due {
            run,
            dropped: owed - run,
        }
    }
}

/// Drive the server until `stop` flips or every sender goes away, then drain.
pub async fn run_game_loop(
    mut server: GameServer,
    mut control_rx: mpsc::Receiver<ControlEvent>,
    mut stop: watch::Receiver<bool>,
) -> GameServer {
    let tick_rate = server.config.server.tick_rate.max(1);
    let interval = Duration::from_secs_f64(1.0 / tick_rate as f64);
    let mut pacer = TickPacer::new(interval, Instant::now(), server.config.server.max_catchup_ticks);
    let mut liveness = tokio::time::interval(Duration::from_millis(250));
    liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let budget_ms = interval.as_secs_f64() * 1000.0 * 0.9;

    info!("Game loop started at {} ticks/s", tick_rate);

    loop {
        tokio::select! {
            _ = sleep_until(pacer.deadline()) => {
                let now = Instant::now();
                if server.state() != ServerState::Running {
                    pacer.reset(now);
                    continue;
                }
                let due = pacer.due(now);
                if due.dropped > 0 {
                    warn!("Game loop fell behind, dropped {} ticks", due.dropped);
                }
                for _ in 0..due.run {
                    let tick_start = std::time::Instant::now();
                    server.tick();
                    let tick_ms = tick_start.elapsed().as_secs_f64() * 1000.0;
                    if tick_ms > budget_ms {
                        warn!(
                            "Slow tick #{}: {:.3}ms (budget: {:.1}ms) - {} sessions, {} entities",
                            server.sim.current_tick(),
                            tick_ms,
                            budget_ms,
                            server.sessions.len(),
                            server.sim.world().len()
                        );
                    }
                }
            }
            _ = liveness.tick() => server.sweep(Instant::now()),
            event = control_rx.recv() => match event {
                Some(event) => server.handle_control(event, Instant::now()),
                None => break,
            },
            _ = stop.changed() => break,
        }
    }

    info!("Game loop stopping after {} ticks", server.sim.current_tick());
    server.drain();
    server
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::session::tests::connection;
    use protocol::packets::{EntityBody, InputCommand, StateSnapshot};

    fn quiet(mut config: Config) -> Arc<Config> {
        config.ai.count = 0;
        config.powerup.spawn_interval_secs = 1.0e6;
        Arc::new(config)
    }

    struct TestClient {
        id: u32,
        frames: mpsc::Receiver<Bytes>,
        _input: watch::Sender<Option<InputCommand>>,
    }

    impl TestClient {
        fn packets(&mut self) -> Vec<ServerPacket> {
            let mut out = Vec::new();
            while let Ok(frame) = self.frames.try_recv() {
                out.push(ServerPacket::parse(&frame).unwrap());
            }
            out
        }

        fn snapshots(&mut self) -> Vec<StateSnapshot> {
            self.packets()
                .into_iter()
                .filter_map(|p| match p {
                    ServerPacket::Snapshot(s) => Some(s),
                    _ => None,
                })
                .collect()
        }
    }

    fn join(server: &mut GameServer, connection_id: u64, now: Instant) -> Result<TestClient, RejectReason> {
        let (conn, frames, input) = connection(connection_id);
        let (reply, mut reply_rx) = oneshot::channel();
        server.handle_control(
            ControlEvent::Join {
                name: "tester".into(),
                color: Color::new(1, 2, 3),
                resume_token: None,
                connection: conn,
                reply,
            },
            now,
        );
        let id = reply_rx.try_recv().unwrap()?;
        Ok(TestClient {
            id,
            frames,
            _input: input,
        })
    }

    #[test]
    fn test_pacer_on_time() {
        let start = Instant::now();
        let mut pacer = TickPacer::new(Duration::from_millis(10), start, 3);
        assert_eq!(pacer.due(start + Duration::from_millis(5)), Due { run: 0, dropped: 0 });
        assert_eq!(pacer.due(start + Duration::from_millis(10)), Due { run: 1, dropped: 0 });
        assert_eq!(pacer.deadline(), start + Duration::from_millis(20));
    }

    #[test]
    fn test_pacer_caps_catch_up() {
        let start = Instant::now();
        let mut pacer = TickPacer::new(Duration::from_millis(10), start, 3);
        // Ten intervals late.
        let due = pacer.due(start + Duration::from_millis(105));
        assert_eq!(due, Due { run: 3, dropped: 7 });
        assert_eq!(pacer.deadline(), start + Duration::from_millis(110));
    }

    #[test]
    fn test_join_gets_accept_then_full_snapshot() {
        let mut server = GameServer::new(quiet(Config::default()));
        let now = Instant::now();
        let mut client = join(&mut server, 1, now).unwrap();
        server.tick();

        let packets = client.packets();
        assert!(matches!(packets[0], ServerPacket::Accept { client_id, .. } if client_id == client.id));
        let ServerPacket::Snapshot(snapshot) = &packets[1] else {
            panic!("expected snapshot");
        };
        assert!(snapshot.full);
        assert_eq!(snapshot.roster.len(), 1);
        assert!(snapshot.entities.iter().any(|e| matches!(
            e.body,
            EntityBody::Tank(t) if t.owner_client == Some(client.id)
        )));

        server.tick();
        let next = client.snapshots();
        assert_eq!(next.len(), 1);
        assert!(!next[0].full);
    }

    #[test]
    fn test_lobby_waits_for_players() {
        let mut config = Config::default();
        config.server.lobby_min_players = 2;
        let mut server = GameServer::new(quiet(config));
        let now = Instant::now();
        assert_eq!(server.state(), ServerState::Idle);

        let mut first = join(&mut server, 1, now).unwrap();
        assert!(server.tick().is_none());
        let snapshots = first.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].full);

        join(&mut server, 2, now).unwrap();
        assert_eq!(server.state(), ServerState::Running);
        assert!(server.tick().is_some());
    }

    #[test]
    fn test_server_full_rejected() {
        let mut config = Config::default();
        config.server.max_connections = 1;
        let mut server = GameServer::new(quiet(config));
        let now = Instant::now();
        join(&mut server, 1, now).unwrap();
        assert_eq!(join(&mut server, 2, now).err(), Some(RejectReason::ServerFull));
    }

    #[test]
    fn test_tank_survives_grace_then_disappears() {
        let mut config = Config::default();
        config.server.disconnect_grace_secs = 5.0;
        let mut server = GameServer::new(quiet(config));
        let start = Instant::now();
        let client = join(&mut server, 1, start).unwrap();
        let mut observer = join(&mut server, 2, start).unwrap();
        server.tick();
        let tank = server.sessions().get(client.id).and_then(|s| s.tank_id).unwrap();
        observer.packets();

        server.handle_control(
            ControlEvent::Leave {
                client_id: client.id,
                connection_id: 1,
                graceful: false,
            },
            start,
        );
        for _ in 0..10 {
            server.sweep(start + Duration::from_secs(1));
            server.tick();
            observer.packets();
        }
        assert!(server.simulation().world().tank(tank).is_ok());

        server.sweep(start + Duration::from_secs(6));
        server.tick();
        assert!(server.simulation().world().tank(tank).is_err());

        let snapshots = observer.snapshots();
        let last = snapshots.last().unwrap();
        assert!(last.removed.contains(&tank));
        assert!(last.events.contains(&GameEvent::PlayerLeft {
            client_id: client.id,
            tank_id: tank
        }));

        server.tick();
        let later = observer.snapshots();
        assert!(later.iter().all(|s| s.entities.iter().all(|e| e.id != tank)));
    }

    #[test]
    fn test_full_queue_forces_full_snapshot() {
        let mut server = GameServer::new(quiet(Config::default()));
        let now = Instant::now();
        let mut client = join(&mut server, 1, now).unwrap();
        // Queue holds four frames; overflow it.
        for _ in 0..8 {
            server.tick();
        }
        assert!(server.dropped_frames > 0);
        client.packets();

        server.tick();
        let snapshots = client.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].full);
    }

    #[test]
    fn test_drain_notifies_and_refuses_joins() {
        let mut server = GameServer::new(quiet(Config::default()));
        let now = Instant::now();
        let mut client = join(&mut server, 1, now).unwrap();
        client.packets();

        server.drain();
        assert_eq!(server.state(), ServerState::Stopped);
        let packets = client.packets();
        assert_eq!(
            packets.last(),
            Some(&ServerPacket::Disconnect {
                reason: DisconnectReason::ServerShutdown
            })
        );
        assert_eq!(join(&mut server, 2, now).err(), Some(RejectReason::ShuttingDown));
    }

    #[tokio::test]
    async fn test_loop_stops_on_signal() {
        let mut config = Config::default();
        config.server.tick_rate = 100;
        let server = GameServer::new(quiet(config));
        let (_control_tx, control_rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_game_loop(server, control_rx, stop_rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
        let server = handle.await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(server.simulation().current_tick() > 0);
    }
}

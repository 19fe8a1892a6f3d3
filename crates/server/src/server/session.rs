//! Session manager.
//!
//! Maps client ids to sessions, buffers validated input, and decides when a
//! dropped client's tank leaves the match. Only the game loop touches it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use protocol::Color;
use protocol::packets::{DisconnectReason, InputCommand, RosterEntry, ServerPacket, UpgradeKind};
use tokio::time::Instant;
use tracing::{debug, info};

use super::client::{Connection, Session, sanitize_name};
use crate::config::Config;
use crate::entity::TankInput;
use crate::error::{CapacityError, ValidationError};
use crate::geometry::wrap_angle;
use crate::simulation::TickInput;
use crate::world::World;

/// Result of a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Joined {
    pub client_id: u32,
    pub resume_token: u64,
    /// Reattached to a session inside its grace window.
    pub resumed: bool,
}

/// A session that left the match for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departed {
    pub client_id: u32,
    pub tank_id: Option<u32>,
}

/// Outcome of a liveness sweep.
#[derive(Debug, Default)]
pub struct Sweep {
    /// Connections closed for silence, with the reason sent.
    pub timed_out: Vec<(u32, DisconnectReason)>,
    /// Sessions whose grace window ran out.
    pub departed: Vec<Departed>,
}

pub struct SessionManager {
    config: Arc<Config>,
    sessions: BTreeMap<u32, Session>,
    next_client_id: u32,
    /// Validated input waiting for the next tick, by client.
    pending_inputs: BTreeMap<u32, TankInput>,
    pending_spawns: Vec<u32>,
    pending_despawns: Vec<u32>,
    pending_upgrades: Vec<(u32, UpgradeKind)>,
    client_timeout: Duration,
    grace: Duration,
}

impl SessionManager {
    pub fn new(config: Arc<Config>) -> Self {
        let client_timeout = Duration::from_secs_f32(config.server.client_timeout_secs.max(0.0));
        let grace = Duration::from_secs_f32(config.server.disconnect_grace_secs.max(0.0));
        Self {
            config,
            sessions: BTreeMap::new(),
            next_client_id: 1,
            pending_inputs: BTreeMap::new(),
            pending_spawns: Vec::new(),
            pending_despawns: Vec::new(),
            pending_upgrades: Vec::new(),
            client_timeout,
            grace,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, client_id: u32) -> Option<&Session> {
        self.sessions.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: u32) -> Option<&mut Session> {
        self.sessions.get_mut(&client_id)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn sessions_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.sessions.values_mut()
    }

    /// Register a new connection, or reattach it to a session in its grace
    /// window when the resume token matches.
    pub fn on_connect(
        &mut self,
        name: &str,
        color: Color,
        resume_token: Option<u64>,
        connection: Connection,
        now: Instant,
    ) -> Result<Joined, CapacityError> {
        if let Some(token) = resume_token {
            let resumable = self
                .sessions
                .values_mut()
                .find(|s| s.resume_token == token && !s.is_connected());
            if let Some(session) = resumable {
                info!("Client {} resumed from {}", session.id, connection.addr);
                session.connection = Some(connection);
                session.disconnected_at = None;
                session.last_seen = now;
                session.last_input_tick = None;
                session.needs_full = true;
                return Ok(Joined {
                    client_id: session.id,
                    resume_token: token,
                    resumed: true,
                });
            }
            debug!("Unknown or live resume token, starting a new session");
        }

        let max = self.config.server.max_connections;
        if self.sessions.len() >= max {
            return Err(CapacityError { max });
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;
        let resume_token = loop {
            let token: u64 = rand::random();
            if token != 0 && self.sessions.values().all(|s| s.resume_token != token) {
                break token;
            }
        };
        let name = sanitize_name(name, self.config.server.max_name_length);
        info!("Client {} ({}) joined from {}", client_id, name, connection.addr);

        self.sessions.insert(
            client_id,
            Session::new(client_id, name, color, resume_token, connection, now),
        );
        self.pending_spawns.push(client_id);
        Ok(Joined {
            client_id,
            resume_token,
            resumed: false,
        })
    }

    /// Validate an input command and buffer it for the next tick. A later
    /// input for the same client replaces an earlier one.
    pub fn on_input(&mut self, client_id: u32, cmd: InputCommand, current_tick: u32) -> Result<(), ValidationError> {
        let session = self
            .sessions
            .get_mut(&client_id)
            .ok_or(ValidationError::UnknownClient(client_id))?;
        let input = validate_input(client_id, &cmd, current_tick, self.config.server.input_window_ticks)?;
        if session.last_input_tick.is_some_and(|last| cmd.tick < last) {
            return Err(ValidationError::StaleTick {
                tick: cmd.tick,
                current: current_tick,
            });
        }
        session.last_input_tick = Some(cmd.tick);
        self.pending_inputs.insert(client_id, input);
        Ok(())
    }

    /// Pull the newest input out of every live connection's input slot.
    pub fn collect_inputs(&mut self, current_tick: u32) {
        let mut fresh = Vec::new();
        for session in self.sessions.values_mut() {
            let Some(conn) = session.connection.as_mut() else {
                continue;
            };
            if !matches!(conn.input.has_changed(), Ok(true)) {
                continue;
            }
            if let Some(cmd) = *conn.input.borrow_and_update() {
                fresh.push((session.id, cmd));
            }
        }
        for (client_id, cmd) in fresh {
            if let Err(e) = self.on_input(client_id, cmd, current_tick) {
                debug!("Dropped input from client {}: {}", client_id, e);
            }
        }
    }

    /// Queue an upgrade purchase. Applied inside the next tick.
    pub fn on_upgrade(&mut self, client_id: u32, kind: UpgradeKind, world: &World) -> Result<(), ValidationError> {
        let tank_id = self
            .sessions
            .get(&client_id)
            .and_then(|s| s.tank_id)
            .ok_or(ValidationError::UnknownClient(client_id))?;
        let tank = world
            .tank(tank_id)
            .map_err(|_| ValidationError::UnknownClient(client_id))?;
        tank.check_upgrade(kind, self.config.tank.max_tier)?;
        self.pending_upgrades.push((tank_id, kind));
        Ok(())
    }

    /// Refresh liveness.
    pub fn touch(&mut self, client_id: u32, connection_id: u64, now: Instant) {
        if let Some(session) = self.sessions.get_mut(&client_id) {
            if session.connection.as_ref().is_some_and(|c| c.id == connection_id) {
                session.last_seen = now;
            }
        }
    }

    /// A connection went away. A goodbye removes the session at once;
    /// anything else starts the grace window. Events from a connection the
    /// session no longer uses are ignored.
    pub fn on_disconnect(&mut self, client_id: u32, connection_id: u64, graceful: bool, now: Instant) -> Option<Departed> {
        let session = self.sessions.get_mut(&client_id)?;
        if session.connection.as_ref().is_none_or(|c| c.id != connection_id) {
            return None;
        }
        if graceful {
            info!("Client {} left", client_id);
            return Some(self.remove(client_id));
        }
        info!("Client {} dropped, holding tank for {:?}", client_id, self.grace);
        self.detach(client_id, now);
        None
    }

    fn detach(&mut self, client_id: u32, now: Instant) {
        if let Some(session) = self.sessions.get_mut(&client_id) {
            session.connection = None;
            session.disconnected_at = Some(now);
            if session.tank_id.is_some() {
                // The tank idles until the client returns.
                self.pending_inputs.insert(client_id, TankInput::default());
            }
        }
    }

    fn remove(&mut self, client_id: u32) -> Departed {
        let tank_id = self.sessions.remove(&client_id).and_then(|s| s.tank_id);
        self.pending_inputs.remove(&client_id);
        self.pending_spawns.retain(|id| *id != client_id);
        if let Some(tank) = tank_id {
            self.pending_despawns.push(tank);
            self.pending_upgrades.retain(|(t, _)| *t != tank);
        }
        Departed { client_id, tank_id }
    }

    /// Force-disconnect silent clients and retire sessions whose grace window
    /// has run out.
    pub fn sweep(&mut self, now: Instant) -> Sweep {
        let mut sweep = Sweep::default();

        let silent: Vec<u32> = self
            .sessions
            .values()
            .filter(|s| s.is_connected() && now.saturating_duration_since(s.last_seen) > self.client_timeout)
            .map(|s| s.id)
            .collect();
        for client_id in silent {
            info!("Client {} timed out", client_id);
            if let Some(session) = self.sessions.get(&client_id) {
                session.try_send(
                    ServerPacket::Disconnect {
                        reason: DisconnectReason::Timeout,
                    }
                    .encode(),
                );
            }
            self.detach(client_id, now);
            sweep.timed_out.push((client_id, DisconnectReason::Timeout));
        }

        let expired: Vec<u32> = self
            .sessions
            .values()
            .filter(|s| s.disconnected_at.is_some_and(|at| now.saturating_duration_since(at) >= self.grace))
            .map(|s| s.id)
            .collect();
        for client_id in expired {
            info!("Client {} did not return, removing tank", client_id);
            sweep.departed.push(self.remove(client_id));
        }
        sweep
    }

    /// Record the tank spawned for a client. Returns false if the client left
    /// before the spawn landed, in which case the tank is queued for removal.
    pub fn bind_tank(&mut self, client_id: u32, tank_id: u32) -> bool {
        match self.sessions.get_mut(&client_id) {
            Some(session) => {
                session.tank_id = Some(tank_id);
                true
            }
            None => {
                self.pending_despawns.push(tank_id);
                false
            }
        }
    }

    /// Everything the next tick needs from the sessions.
    pub fn take_tick_input(&mut self) -> TickInput {
        let inputs = std::mem::take(&mut self.pending_inputs)
            .into_iter()
            .filter_map(|(client_id, input)| {
                let tank = self.sessions.get(&client_id)?.tank_id?;
                Some((tank, input))
            })
            .collect();
        TickInput {
            inputs,
            spawns: std::mem::take(&mut self.pending_spawns),
            despawns: std::mem::take(&mut self.pending_despawns),
            upgrades: std::mem::take(&mut self.pending_upgrades),
        }
    }

    /// Players with a tank in the match.
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.sessions
            .values()
            .filter_map(|s| {
                Some(RosterEntry {
                    client_id: s.id,
                    tank_id: s.tank_id?,
                    name: s.name.clone(),
                    color: s.color,
                })
            })
            .collect()
    }

    /// Drop every connection. Used on shutdown.
    pub fn close_all(&mut self) -> Vec<Connection> {
        self.sessions
            .values_mut()
            .filter_map(|s| s.connection.take())
            .collect()
    }
}

/// Reject non-finite values and inputs stamped outside the replay window;
/// clamp the rest into range.
pub fn validate_input(
    client_id: u32,
    cmd: &InputCommand,
    current_tick: u32,
    window: u32,
) -> Result<TankInput, ValidationError> {
    if cmd.client_id != client_id {
        return Err(ValidationError::ClientMismatch {
            claimed: cmd.client_id,
            actual: client_id,
        });
    }
    if !cmd.move_vector.is_finite() {
        return Err(ValidationError::NonFinite("move vector"));
    }
    if !cmd.aim_angle.is_finite() {
        return Err(ValidationError::NonFinite("aim angle"));
    }
    if cmd.tick.abs_diff(current_tick) > window {
        return Err(ValidationError::StaleTick {
            tick: cmd.tick,
            current: current_tick,
        });
    }
    Ok(TankInput {
        move_vector: cmd.move_vector.clamp_length_max(1.0),
        aim_angle: wrap_angle(cmd.aim_angle),
        fire: cmd.fire,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bytes::Bytes;
    use glam::Vec2;
    use tokio::sync::{mpsc, watch};

    pub(crate) fn connection(id: u64) -> (Connection, mpsc::Receiver<Bytes>, watch::Sender<Option<InputCommand>>) {
        let (out_tx, out_rx) = mpsc::channel(4);
        let (in_tx, in_rx) = watch::channel(None);
        let conn = Connection {
            id,
            addr: "127.0.0.1:9".parse().unwrap(),
            outbound: out_tx,
            input: in_rx,
        };
        (conn, out_rx, in_tx)
    }

    fn manager(config: Config) -> SessionManager {
        SessionManager::new(Arc::new(config))
    }

    fn cmd(client_id: u32, tick: u32, x: f32) -> InputCommand {
        InputCommand {
            client_id,
            tick,
            move_vector: Vec2::new(x, 0.0),
            aim_angle: 0.0,
            fire: false,
        }
    }

    #[test]
    fn test_capacity() {
        let mut config = Config::default();
        config.server.max_connections = 1;
        let mut sessions = manager(config);
        let now = Instant::now();
        let (a, _ra, _ia) = connection(1);
        let (b, _rb, _ib) = connection(2);
        assert!(sessions.on_connect("a", Color::default(), None, a, now).is_ok());
        assert_eq!(
            sessions.on_connect("b", Color::default(), None, b, now),
            Err(CapacityError { max: 1 })
        );
    }

    #[test]
    fn test_validation() {
        let mut sessions = manager(Config::default());
        let (conn, _rx, _in) = connection(1);
        let id = sessions
            .on_connect("a", Color::default(), None, conn, Instant::now())
            .unwrap()
            .client_id;

        assert_eq!(
            sessions.on_input(99, cmd(99, 0, 0.0), 0),
            Err(ValidationError::UnknownClient(99))
        );
        assert!(matches!(
            sessions.on_input(id, cmd(id + 1, 0, 0.0), 0),
            Err(ValidationError::ClientMismatch { .. })
        ));
        let mut bad = cmd(id, 0, 0.0);
        bad.aim_angle = f32::NAN;
        assert_eq!(
            sessions.on_input(id, bad, 0),
            Err(ValidationError::NonFinite("aim angle"))
        );
        assert!(matches!(
            sessions.on_input(id, cmd(id, 10, 0.0), 500),
            Err(ValidationError::StaleTick { .. })
        ));
        assert!(sessions.on_input(id, cmd(id, 500, 3.0), 500).is_ok());
        assert!(matches!(
            sessions.on_input(id, cmd(id, 499, 0.0), 500),
            Err(ValidationError::StaleTick { .. })
        ));
    }

    #[test]
    fn test_latest_input_in_slot_wins() {
        let mut sessions = manager(Config::default());
        let (conn, _rx, input_tx) = connection(1);
        let id = sessions
            .on_connect("a", Color::default(), None, conn, Instant::now())
            .unwrap()
            .client_id;
        sessions.bind_tank(id, 40);
        sessions.take_tick_input();

        input_tx.send_replace(Some(cmd(id, 1, 0.25)));
        input_tx.send_replace(Some(cmd(id, 1, -0.5)));
        sessions.collect_inputs(1);
        let input = sessions.take_tick_input();
        assert_eq!(input.inputs.len(), 1);
        assert_eq!(input.inputs[&40].move_vector, Vec2::new(-0.5, 0.0));

        // Nothing new arrived.
        sessions.collect_inputs(2);
        assert!(sessions.take_tick_input().inputs.is_empty());
    }

    #[test]
    fn test_move_vector_clamped() {
        let input = validate_input(1, &cmd(1, 0, 5.0), 0, 60).unwrap();
        assert_eq!(input.move_vector, Vec2::new(1.0, 0.0));
    }

    #[test]
    fn test_grace_then_removal() {
        let mut config = Config::default();
        config.server.disconnect_grace_secs = 5.0;
        let mut sessions = manager(config);
        let start = Instant::now();
        let (conn, _rx, _in) = connection(1);
        let id = sessions
            .on_connect("a", Color::default(), None, conn, start)
            .unwrap()
            .client_id;
        sessions.bind_tank(id, 12);
        sessions.take_tick_input();

        assert_eq!(sessions.on_disconnect(id, 1, false, start), None);
        let idle = sessions.take_tick_input();
        assert_eq!(idle.inputs[&12], TankInput::default());
        assert!(idle.despawns.is_empty());

        let sweep = sessions.sweep(start + Duration::from_secs(4));
        assert!(sweep.departed.is_empty());
        assert!(sessions.get(id).is_some());

        let sweep = sessions.sweep(start + Duration::from_secs(6));
        assert_eq!(
            sweep.departed,
            vec![Departed {
                client_id: id,
                tank_id: Some(12)
            }]
        );
        assert_eq!(sessions.take_tick_input().despawns, vec![12]);
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_resume_within_grace() {
        let mut sessions = manager(Config::default());
        let now = Instant::now();
        let (conn, _rx, _in) = connection(1);
        let joined = sessions.on_connect("a", Color::default(), None, conn, now).unwrap();
        sessions.bind_tank(joined.client_id, 3);
        sessions.on_disconnect(joined.client_id, 1, false, now);

        let (conn, _rx2, _in2) = connection(2);
        let again = sessions
            .on_connect("a", Color::default(), Some(joined.resume_token), conn, now)
            .unwrap();
        assert!(again.resumed);
        assert_eq!(again.client_id, joined.client_id);
        assert_eq!(sessions.get(again.client_id).and_then(|s| s.tank_id), Some(3));

        // A late close from the old socket must not detach the new one.
        assert_eq!(sessions.on_disconnect(joined.client_id, 1, false, now), None);
        assert!(sessions.get(joined.client_id).unwrap().is_connected());
    }

    #[test]
    fn test_silent_client_times_out() {
        let mut config = Config::default();
        config.server.client_timeout_secs = 1.0;
        let mut sessions = manager(config);
        let start = Instant::now();
        let (conn, _rx, _in) = connection(7);
        let id = sessions
            .on_connect("a", Color::default(), None, conn, start)
            .unwrap()
            .client_id;

        sessions.touch(id, 7, start + Duration::from_millis(900));
        assert!(sessions.sweep(start + Duration::from_millis(1500)).timed_out.is_empty());
        let sweep = sessions.sweep(start + Duration::from_millis(2000));
        assert_eq!(sweep.timed_out, vec![(id, DisconnectReason::Timeout)]);
        assert!(!sessions.get(id).unwrap().is_connected());
    }
}

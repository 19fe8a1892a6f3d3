//! Client session state.

use bytes::Bytes;
use protocol::Color;
use protocol::packets::InputCommand;
use std::net::SocketAddr;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Channels between the game loop and one live network connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique per accepted socket; a resumed session gets a new one.
    pub id: u64,
    pub addr: SocketAddr,
    /// Encoded frames to the client. Written with `try_send` only.
    pub outbound: mpsc::Sender<Bytes>,
    /// Latest input from the client. Newer values overwrite older ones.
    pub input: watch::Receiver<Option<InputCommand>>,
}

/// A player session. Outlives its connection during the disconnect grace
/// window.
#[derive(Debug)]
pub struct Session {
    /// Unique client ID.
    pub id: u32,
    pub name: String,
    pub color: Color,
    /// Secret presented to reattach after a drop.
    pub resume_token: u64,
    /// Tank in the world, once the simulation has spawned it.
    pub tank_id: Option<u32>,
    /// `None` while disconnected.
    pub connection: Option<Connection>,
    /// Last time anything arrived from the client.
    pub last_seen: Instant,
    /// When the connection dropped, if it did.
    pub disconnected_at: Option<Instant>,
    /// Tick stamp of the last accepted input.
    pub last_input_tick: Option<u32>,
    /// The next snapshot for this client must be a full one.
    pub needs_full: bool,
}

impl Session {
    pub fn new(id: u32, name: String, color: Color, resume_token: u64, connection: Connection, now: Instant) -> Self {
        Self {
            id,
            name,
            color,
            resume_token,
            tank_id: None,
            connection: Some(connection),
            last_seen: now,
            disconnected_at: None,
            last_input_tick: None,
            needs_full: true,
        }
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Queue a frame without waiting. Returns false if it was dropped.
    pub fn try_send(&self, frame: Bytes) -> bool {
        match &self.connection {
            Some(conn) => conn.outbound.try_send(frame).is_ok(),
            None => false,
        }
    }
}

/// Trim a requested display name, strip control characters and cap its
/// length in characters.
pub fn sanitize_name(raw: &str, max_chars: usize) -> String {
    let name: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(max_chars)
        .collect();
    let name = name.trim_end().to_string();
    if name.is_empty() { "Tank".to_string() } else { name }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  ace  ", 16), "ace");
        assert_eq!(sanitize_name("a\u{7}b", 16), "ab");
        assert_eq!(sanitize_name("abcdefghijklmnopqrstuvwxyz", 16), "abcdefghijklmnop");
        assert_eq!(sanitize_name("   ", 16), "Tank");
        assert_eq!(sanitize_name("ééééé", 3), "ééé");
    }
}

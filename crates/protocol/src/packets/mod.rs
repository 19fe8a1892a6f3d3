//! Packet definitions for the Bulletverse protocol.
//!
//! This module contains both client->server and server->client packet types,
//! plus the small tagged enums they share.

mod client;
mod server;
mod snapshot;

pub use client::*;
pub use server::*;
pub use snapshot::*;

use crate::{BinaryReader, BinaryWriter, PROTOCOL_VERSION, ProtocolError};

/// Opcodes for client -> server packets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOpcode {
    /// Join handshake with display name and colour.
    Hello = 0x01,
    /// Movement/aim/fire input for a tick.
    Input = 0x10,
    /// Spend one upgrade point.
    Upgrade = 0x11,
    /// Liveness probe.
    Ping = 0x20,
    /// Orderly leave.
    Goodbye = 0x7F,
}

/// Opcodes for server -> client packets.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOpcode {
    /// Handshake accepted.
    Accept = 0x01,
    /// Handshake rejected.
    Reject = 0x02,
    /// World state at a tick.
    Snapshot = 0x10,
    /// Reply to a ping.
    Pong = 0x20,
    /// Server is closing the connection.
    Disconnect = 0x7F,
}

/// Write the version byte and opcode that start every frame.
pub(crate) fn write_header(w: &mut BinaryWriter, opcode: u8) {
    w.put_u8(PROTOCOL_VERSION);
    w.put_u8(opcode);
}

/// Read and check the frame header, returning the opcode.
pub(crate) fn read_header(r: &mut BinaryReader) -> Result<u8, ProtocolError> {
    let version = r.get_u8().map_err(|_| ProtocolError::Empty)?;
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedProtocol(version));
    }
    r.get_u8()
}

/// Entity variant.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Tank = 0,
    Bullet = 1,
    Powerup = 2,
}

impl EntityKind {
    pub fn from_u8(tag: u8) -> Result<Self, ProtocolError> {
        match tag {
            0 => Ok(Self::Tank),
            1 => Ok(Self::Bullet),
            2 => Ok(Self::Powerup),
            _ => Err(ProtocolError::InvalidTag { what: "entity kind", tag }),
        }
    }
}

/// Powerup kind.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerupKind {
    Health = 0,
    Shield = 1,
    Speed = 2,
    Damage = 3,
    Xp = 4,
}

impl PowerupKind {
    pub const ALL: [PowerupKind; 5] = [
        PowerupKind::Health,
        PowerupKind::Shield,
        PowerupKind::Speed,
        PowerupKind::Damage,
        PowerupKind::Xp,
    ];

    pub fn from_u8(tag: u8) -> Result<Self, ProtocolError> {
        Self::ALL
            .get(tag as usize)
            .copied()
            .ok_or(ProtocolError::InvalidTag { what: "powerup kind", tag })
    }
}

/// Upgradeable tank attribute.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpgradeKind {
    HealthMax = 0,
    HealthRegen = 1,
    BulletDamage = 2,
    BulletSpeed = 3,
    BulletPenetration = 4,
    ReloadSpeed = 5,
    MoveSpeed = 6,
}

impl UpgradeKind {
    pub const COUNT: usize = 7;

    pub const ALL: [UpgradeKind; Self::COUNT] = [
        UpgradeKind::HealthMax,
        UpgradeKind::HealthRegen,
        UpgradeKind::BulletDamage,
        UpgradeKind::BulletSpeed,
        UpgradeKind::BulletPenetration,
        UpgradeKind::ReloadSpeed,
        UpgradeKind::MoveSpeed,
    ];

    pub fn from_u8(tag: u8) -> Result<Self, ProtocolError> {
        Self::ALL
            .get(tag as usize)
            .copied()
            .ok_or(ProtocolError::InvalidTag { what: "upgrade kind", tag })
    }
}

/// Why a join handshake was refused.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    VersionMismatch = 0,
    ServerFull = 1,
    ShuttingDown = 2,
    Malformed = 3,
}

impl RejectReason {
    pub fn from_u8(tag: u8) -> Result<Self, ProtocolError> {
        match tag {
            0 => Ok(Self::VersionMismatch),
            1 => Ok(Self::ServerFull),
            2 => Ok(Self::ShuttingDown),
            3 => Ok(Self::Malformed),
            _ => Err(ProtocolError::InvalidTag { what: "reject reason", tag }),
        }
    }
}

/// Why the server closed a session.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ServerShutdown = 0,
    Timeout = 1,
    ProtocolViolation = 2,
    Kicked = 3,
}

impl DisconnectReason {
    pub fn from_u8(tag: u8) -> Result<Self, ProtocolError> {
        match tag {
            0 => Ok(Self::ServerShutdown),
            1 => Ok(Self::Timeout),
            2 => Ok(Self::ProtocolViolation),
            3 => Ok(Self::Kicked),
            _ => Err(ProtocolError::InvalidTag { what: "disconnect reason", tag }),
        }
    }
}

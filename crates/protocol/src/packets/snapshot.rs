//! World-state snapshot encoding.
//!
//! A snapshot is either full (every live entity plus the player roster) or a
//! delta (entities whose state changed, ids removed since the previous tick).
//! Both carry the discrete events of the tick.

use glam::Vec2;

use super::{EntityKind, PowerupKind};
use crate::{BinaryReader, BinaryWriter, Color, ProtocolError};

/// Tank status bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TankFlags {
    pub respawning: bool,
    pub shielded: bool,
    pub speed_boost: bool,
    pub damage_boost: bool,
}

impl TankFlags {
    pub fn encode(&self) -> u8 {
        let mut flags = 0u8;
        if self.respawning {
            flags |= 0x01;
        }
        if self.shielded {
            flags |= 0x02;
        }
        if self.speed_boost {
            flags |= 0x04;
        }
        if self.damage_boost {
            flags |= 0x08;
        }
        flags
    }

    pub fn decode(flags: u8) -> Self {
        Self {
            respawning: flags & 0x01 != 0,
            shielded: flags & 0x02 != 0,
            speed_boost: flags & 0x04 != 0,
            damage_boost: flags & 0x08 != 0,
        }
    }
}

/// Visible tank state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TankVisual {
    pub angle: f32,
    pub health: f32,
    pub max_health: f32,
    pub shield: f32,
    pub level: u16,
    /// Controlling client, `None` for AI drones.
    pub owner_client: Option<u32>,
    pub flags: TankFlags,
}

/// Variant-specific part of an entity record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EntityBody {
    Tank(TankVisual),
    Bullet { owner_tank: u32 },
    Powerup { kind: PowerupKind },
}

/// One entity as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityState {
    pub id: u32,
    pub position: Vec2,
    pub velocity: Vec2,
    pub body: EntityBody,
}

impl EntityState {
    pub fn kind(&self) -> EntityKind {
        match self.body {
            EntityBody::Tank(_) => EntityKind::Tank,
            EntityBody::Bullet { .. } => EntityKind::Bullet,
            EntityBody::Powerup { .. } => EntityKind::Powerup,
        }
    }

    pub fn health(&self) -> Option<f32> {
        match self.body {
            EntityBody::Tank(t) => Some(t.health),
            _ => None,
        }
    }

    fn write(&self, w: &mut BinaryWriter) {
        w.put_u32(self.id);
        w.put_u8(self.kind() as u8);
        w.put_vec2(self.position);
        w.put_vec2(self.velocity);
        match self.body {
            EntityBody::Tank(t) => {
                w.put_f32(t.angle);
                w.put_f32(t.health);
                w.put_f32(t.max_health);
                w.put_f32(t.shield);
                w.put_u16(t.level);
                w.put_u32(t.owner_client.unwrap_or(0));
                w.put_u8(t.flags.encode());
            }
            EntityBody::Bullet { owner_tank } => w.put_u32(owner_tank),
            EntityBody::Powerup { kind } => w.put_u8(kind as u8),
        }
    }

    fn read(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let id = r.get_u32()?;
        let kind = EntityKind::from_u8(r.get_u8()?)?;
        let position = r.get_vec2()?;
        let velocity = r.get_vec2()?;
        let body = match kind {
            EntityKind::Tank => EntityBody::Tank(TankVisual {
                angle: r.get_f32()?,
                health: r.get_f32()?,
                max_health: r.get_f32()?,
                shield: r.get_f32()?,
                level: r.get_u16()?,
                owner_client: non_zero(r.get_u32()?),
                flags: TankFlags::decode(r.get_u8()?),
            }),
            EntityKind::Bullet => EntityBody::Bullet {
                owner_tank: r.get_u32()?,
            },
            EntityKind::Powerup => EntityBody::Powerup {
                kind: PowerupKind::from_u8(r.get_u8()?)?,
            },
        };
        Ok(Self {
            id,
            position,
            velocity,
            body,
        })
    }
}

/// A discrete thing that happened during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Spawn { id: u32, kind: EntityKind },
    Destroy { id: u32, kind: EntityKind },
    /// A tank reached zero health. `killer` is the tank that fired the shot.
    Killed { victim: u32, killer: Option<u32> },
    Respawn { tank: u32 },
    LevelUp { tank: u32, level: u16 },
    Pickup { tank: u32, kind: PowerupKind },
    PlayerJoined { client_id: u32, tank_id: u32, name: String, color: Color },
    PlayerLeft { client_id: u32, tank_id: u32 },
}

impl GameEvent {
    fn write(&self, w: &mut BinaryWriter) {
        match self {
            GameEvent::Spawn { id, kind } => {
                w.put_u8(0);
                w.put_u32(*id);
                w.put_u8(*kind as u8);
            }
            GameEvent::Destroy { id, kind } => {
                w.put_u8(1);
                w.put_u32(*id);
                w.put_u8(*kind as u8);
            }
            GameEvent::Killed { victim, killer } => {
                w.put_u8(2);
                w.put_u32(*victim);
                w.put_u32(killer.unwrap_or(0));
            }
            GameEvent::Respawn { tank } => {
                w.put_u8(3);
                w.put_u32(*tank);
            }
            GameEvent::LevelUp { tank, level } => {
                w.put_u8(4);
                w.put_u32(*tank);
                w.put_u16(*level);
            }
            GameEvent::Pickup { tank, kind } => {
                w.put_u8(5);
                w.put_u32(*tank);
                w.put_u8(*kind as u8);
            }
            GameEvent::PlayerJoined {
                client_id,
                tank_id,
                name,
                color,
            } => {
                w.put_u8(6);
                w.put_u32(*client_id);
                w.put_u32(*tank_id);
                w.put_string(name);
                w.put_u8(color.r);
                w.put_u8(color.g);
                w.put_u8(color.b);
            }
            GameEvent::PlayerLeft { client_id, tank_id } => {
                w.put_u8(7);
                w.put_u32(*client_id);
                w.put_u32(*tank_id);
            }
        }
    }

    fn read(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let tag = r.get_u8()?;
        Ok(match tag {
            0 => GameEvent::Spawn {
                id: r.get_u32()?,
                kind: EntityKind::from_u8(r.get_u8()?)?,
            },
            1 => GameEvent::Destroy {
                id: r.get_u32()?,
                kind: EntityKind::from_u8(r.get_u8()?)?,
            },
            2 => GameEvent::Killed {
                victim: r.get_u32()?,
                killer: non_zero(r.get_u32()?),
            },
            3 => GameEvent::Respawn { tank: r.get_u32()? },
            4 => GameEvent::LevelUp {
                tank: r.get_u32()?,
                level: r.get_u16()?,
            },
            5 => GameEvent::Pickup {
                tank: r.get_u32()?,
                kind: PowerupKind::from_u8(r.get_u8()?)?,
            },
            6 => GameEvent::PlayerJoined {
                client_id: r.get_u32()?,
                tank_id: r.get_u32()?,
                name: r.get_string()?,
                color: Color::new(r.get_u8()?, r.get_u8()?, r.get_u8()?),
            },
            7 => GameEvent::PlayerLeft {
                client_id: r.get_u32()?,
                tank_id: r.get_u32()?,
            },
            _ => return Err(ProtocolError::InvalidTag { what: "event", tag }),
        })
    }
}

/// A connected player, listed in full snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub client_id: u32,
    pub tank_id: u32,
    pub name: String,
    pub color: Color,
}

/// Server-authoritative world state at a tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateSnapshot {
    pub tick: u32,
    pub full: bool,
    pub entities: Vec<EntityState>,
    /// Entity ids removed since the previous snapshot (deltas only).
    pub removed: Vec<u32>,
    pub events: Vec<GameEvent>,
    /// Connected players (full snapshots only).
    pub roster: Vec<RosterEntry>,
}

impl StateSnapshot {
    pub(crate) fn write(&self, w: &mut BinaryWriter) {
        w.put_u32(self.tick);
        w.put_bool(self.full);

        put_len(w, self.entities.len());
        for entity in &self.entities {
            entity.write(w);
        }

        put_len(w, self.removed.len());
        for id in &self.removed {
            w.put_u32(*id);
        }

        put_len(w, self.events.len());
        for event in &self.events {
            event.write(w);
        }

        put_len(w, self.roster.len());
        for entry in &self.roster {
            w.put_u32(entry.client_id);
            w.put_u32(entry.tank_id);
            w.put_string(&entry.name);
            w.put_u8(entry.color.r);
            w.put_u8(entry.color.g);
            w.put_u8(entry.color.b);
        }
    }

    pub(crate) fn read(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let tick = r.get_u32()?;
        let full = r.get_bool()?;

        let count = r.get_u32()? as usize;
        let mut entities = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            entities.push(EntityState::read(r)?);
        }

        let count = r.get_u32()? as usize;
        let mut removed = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            removed.push(r.get_u32()?);
        }

        let count = r.get_u32()? as usize;
        let mut events = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            events.push(GameEvent::read(r)?);
        }

        let count = r.get_u32()? as usize;
        let mut roster = Vec::with_capacity(count.min(r.remaining()));
        for _ in 0..count {
            roster.push(RosterEntry {
                client_id: r.get_u32()?,
                tank_id: r.get_u32()?,
                name: r.get_string()?,
                color: Color::new(r.get_u8()?, r.get_u8()?, r.get_u8()?),
            });
        }

        Ok(Self {
            tick,
            full,
            entities,
            removed,
            events,
            roster,
        })
    }
}

/// Sequence lengths go out as u32 so no realistic snapshot can overflow them.
#[inline]
fn put_len(w: &mut BinaryWriter, len: usize) {
    w.put_u32(u32::try_from(len).unwrap_or(u32::MAX));
}

#[inline]
fn non_zero(v: u32) -> Option<u32> {
    if v == 0 { None } else { Some(v) }
}

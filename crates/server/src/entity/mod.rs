//! Game entities.
//!
//! The set of entity kinds is closed: tanks, bullets and powerups. Shared
//! state lives in [`EntityData`]; kind-specific state and behaviour live in
//! the variant, dispatched through the [`Entity`] enum.

mod bullet;
mod powerup;
mod tank;

pub use bullet::Bullet;
pub use powerup::Powerup;
pub use tank::{ActiveEffect, EffectKind, Tank, TankInput, TankState, TankStats};

use glam::Vec2;
use protocol::packets::{EntityBody, EntityKind, EntityState};

use crate::geometry::Arena;

/// Data common to every entity.
#[derive(Debug, Clone)]
pub struct EntityData {
    pub id: u32,
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f32,
    /// False once destroyed; the entity is removed at the end of the tick.
    pub alive: bool,
    pub spawn_tick: u64,
}

impl EntityData {
    pub fn new(position: Vec2, radius: f32, spawn_tick: u64) -> Self {
        Self {
            id: 0,
            position,
            velocity: Vec2::ZERO,
            radius,
            alive: true,
            spawn_tick,
        }
    }

    #[inline]
    pub fn age(&self, tick: u64) -> u64 {
        tick.saturating_sub(self.spawn_tick)
    }
}

/// What happened to an entity while it was stepped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Keep,
    /// The entity left the arena or ran out of lifetime.
    Expired,
}

/// An entry in the entity store.
#[derive(Debug, Clone)]
pub enum Entity {
    Tank(Tank),
    Bullet(Bullet),
    Powerup(Powerup),
}

impl Entity {
    /// Get the common entity data.
    pub fn data(&self) -> &EntityData {
        match self {
            Entity::Tank(e) => &e.data,
            Entity::Bullet(e) => &e.data,
            Entity::Powerup(e) => &e.data,
        }
    }

    /// Get mutable entity data.
    pub fn data_mut(&mut self) -> &mut EntityData {
        match self {
            Entity::Tank(e) => &mut e.data,
            Entity::Bullet(e) => &mut e.data,
            Entity::Powerup(e) => &mut e.data,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Tank(_) => EntityKind::Tank,
            Entity::Bullet(_) => EntityKind::Bullet,
            Entity::Powerup(_) => EntityKind::Powerup,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.data().id
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.data().alive
    }

    pub fn as_tank(&self) -> Option<&Tank> {
        match self {
            Entity::Tank(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_tank_mut(&mut self) -> Option<&mut Tank> {
        match self {
            Entity::Tank(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_bullet_mut(&mut self) -> Option<&mut Bullet> {
        match self {
            Entity::Bullet(b) => Some(b),
            _ => None,
        }
    }

    /// Advance the entity by one fixed step.
    pub fn step(&mut self, dt: f32, arena: &Arena, tick: u64) -> StepOutcome {
        match self {
            Entity::Tank(t) => t.step(dt, arena),
            Entity::Bullet(b) => b.step(dt, arena, tick),
            Entity::Powerup(p) => p.step(tick),
        }
    }

    /// Wire representation for snapshots.
    pub fn to_state(&self, tick: u64) -> EntityState {
        let data = self.data();
        let body = match self {
            Entity::Tank(t) => EntityBody::Tank(t.visual(tick)),
            Entity::Bullet(b) => EntityBody::Bullet {
                owner_tank: b.owner_tank,
            },
            Entity::Powerup(p) => EntityBody::Powerup { kind: p.kind },
        };
        EntityState {
            id: data.id,
            position: data.position,
            velocity: data.velocity,
            body,
        }
    }
}

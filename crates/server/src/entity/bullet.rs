//! Bullets.

use glam::Vec2;

use super::{EntityData, StepOutcome};
use crate::geometry::Arena;

#[derive(Debug, Clone)]
pub struct Bullet {
    pub data: EntityData,
    pub owner_tank: u32,
    /// Fired by an AI drone. Drone bullets pass through other drones.
    pub from_drone: bool,
    pub damage: f32,
    /// Tanks this bullet can still pass through. Never increases.
    pub penetration_remaining: u32,
    pub ttl_ticks: u64,
    /// Position before the last step, for swept hit tests.
    pub previous_position: Vec2,
    /// Tanks already hit, so a penetrating bullet never hits one twice.
    pub hits: Vec<u32>,
}

impl Bullet {
    pub fn new(data: EntityData, owner_tank: u32, damage: f32, penetration: u32, ttl_ticks: u64) -> Self {
        let previous_position = data.position;
        Self {
            data,
            owner_tank,
            from_drone: false,
            damage,
            penetration_remaining: penetration.max(1),
            ttl_ticks,
            previous_position,
            hits: Vec::new(),
        }
    }

    #[inline]
    pub fn has_hit(&self, tank: u32) -> bool {
        self.hits.contains(&tank)
    }

    /// Record a hit on `tank`. Returns true when penetration is exhausted.
    pub fn register_hit(&mut self, tank: u32) -> bool {
        self.hits.push(tank);
        self.penetration_remaining = self.penetration_remaining.saturating_sub(1);
        self.penetration_remaining == 0
    }

    pub(super) fn step(&mut self, dt: f32, arena: &Arena, tick: u64) -> StepOutcome {
        self.previous_position = self.data.position;
        self.data.position += self.data.velocity * dt;
        if !arena.contains(self.data.position) || self.data.age(tick) >= self.ttl_ticks {
            StepOutcome::Expired
        } else {
            StepOutcome::Keep
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bullet(penetration: u32) -> Bullet {
        let mut data = EntityData::new(Vec2::new(50.0, 50.0), 3.0, 0);
        data.velocity = Vec2::new(300.0, 0.0);
        Bullet::new(data, 1, 10.0, penetration, 90)
    }

    #[test]
    fn test_penetration_counts_down() {
        let mut b = bullet(2);
        assert!(!b.register_hit(5));
        assert!(b.has_hit(5));
        assert!(b.register_hit(6));
        assert_eq!(b.penetration_remaining, 0);
        assert!(b.register_hit(7));
        assert_eq!(b.penetration_remaining, 0);
    }

    #[test]
    fn test_leaves_arena() {
        let arena = Arena::new(100.0, 100.0);
        let mut b = bullet(1);
        assert_eq!(b.step(0.1, &arena, 1), StepOutcome::Keep);
        assert_eq!(b.previous_position, Vec2::new(50.0, 50.0));
        assert_eq!(b.step(0.1, &arena, 2), StepOutcome::Expired);
    }

    #[test]
    fn test_ttl_expiry() {
        let arena = Arena::new(10_000.0, 100.0);
        let mut b = bullet(1);
        b.ttl_ticks = 2;
        assert_eq!(b.step(0.01, &arena, 1), StepOutcome::Keep);
        assert_eq!(b.step(0.01, &arena, 2), StepOutcome::Expired);
    }
}

use std::f32::consts::PI;

use glam::Vec2;
use rand::Rng;

use crate::config::AiConfig;
use crate::entity::{Tank, TankInput};
use crate::geometry::{Arena, angle_of, direction};

/// How far a seeking drone turns toward its target per decision.
const SEEK_TURN: f32 = 0.1;

/// Steering state of one drone.
#[derive(Debug, Clone)]
pub struct Drone {
    /// Travel direction in radians.
    pub heading: f32,
}

impl Drone {
    pub fn new<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            heading: rng.random_range(-PI..PI),
        }
    }

    /// Pick this tick's input: wander, now and then turn toward the nearest
    /// player, bounce off the arena edges, and shoot at anything in sight.
    pub fn steer<R: Rng + ?Sized>(
        &mut self,
        tank: &Tank,
        targets: &[Vec2],
        arena: &Arena,
        config: &AiConfig,
        rng: &mut R,
        dt: f32,
    ) -> TankInput {
        let position = tank.data.position;

        if rng.random_bool(chance(config.wander_rate, dt)) {
            self.heading = rng.random_range(-PI..PI);
        }

        let nearest = targets
            .iter()
            .copied()
            .min_by(|a, b| a.distance_squared(position).total_cmp(&b.distance_squared(position)));

        if let Some(target) = nearest {
            if rng.random_bool(chance(config.seek_rate, dt)) {
                let current = direction(self.heading);
                let wanted = (target - position).normalize_or(current);
                let blended = (current + (wanted - current) * SEEK_TURN).normalize_or(current);
                self.heading = angle_of(blended);
            }
        }

        let step = direction(self.heading) * tank.base.move_speed * dt;
        let next = position + step;
        let r = tank.data.radius;
        if next.x < r || next.x > arena.width - r {
            self.heading = PI - self.heading;
        }
        if next.y < r || next.y > arena.height - r {
            self.heading = -self.heading;
        }

        let in_sight = nearest.filter(|t| t.distance(position) <= config.sight_range);
        let aim_angle = match in_sight {
            Some(target) => {
                let spread = (target.distance(position) * config.aim_spread_per_unit).min(config.max_aim_spread);
                let error = if spread > 0.0 {
                    rng.random_range(-spread..=spread)
                } else {
                    0.0
                };
                angle_of(target - position) + error
            }
            None => self.heading,
        };
        TankInput {
            move_vector: direction(self.heading),
            aim_angle,
            fire: in_sight.is_some(),
        }
    }
}

/// Per-tick probability from a per-second rate.
#[inline]
fn chance(rate_per_sec: f32, dt: f32) -> f64 {
    (rate_per_sec * dt).clamp(0.0, 1.0) as f64
}

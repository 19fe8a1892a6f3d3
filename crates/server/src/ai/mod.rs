//! Server-controlled drone tanks.

mod drone;

pub use drone::Drone;

use std::collections::BTreeMap;

use glam::Vec2;
use rand::Rng;

use crate::config::{AiConfig, Config};
use crate::entity::{EntityData, Tank, TankStats};
use crate::world::World;

/// Keeps the configured number of drones in the match and drives them.
#[derive(Debug)]
pub struct DroneManager {
    config: AiConfig,
    /// Drones by tank id.
    drones: BTreeMap<u32, Drone>,
}

impl DroneManager {
    pub fn new(config: AiConfig) -> Self {
        Self {
            config,
            drones: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.drones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drones.is_empty()
    }

    /// Drones needed to get back to the configured count.
    pub fn missing(&self) -> usize {
        self.config.count.saturating_sub(self.drones.len())
    }

    /// A fresh drone tank. Fire rate varies a little per drone.
    pub fn build<R: Rng + ?Sized>(&self, config: &Config, position: Vec2, tick: u64, rng: &mut R) -> Tank {
        let mut stats = TankStats::drone(&self.config);
        stats.reload_secs *= rng.random_range(0.8..1.2);
        let mut tank = Tank::new(
            EntityData::new(position, config.tank.radius, tick),
            None,
            stats,
            0,
            config.leveling.first_threshold,
        );
        tank.bounty_multiplier = self.config.difficulty.stats().xp_multiplier;
        tank
    }

    /// Start driving the tank `id`.
    pub fn adopt<R: Rng + ?Sized>(&mut self, id: u32, rng: &mut R) {
        self.drones.insert(id, Drone::new(rng));
    }

    /// Stop tracking a removed tank.
    pub fn forget(&mut self, id: u32) {
        self.drones.remove(&id);
    }

    /// Set every drone's input for this tick.
    pub fn think<R: Rng + ?Sized>(&mut self, world: &mut World, rng: &mut R, dt: f32) {
        if self.drones.is_empty() {
            return;
        }
        let targets: Vec<Vec2> = world
            .tanks()
            .filter(|t| !t.is_drone() && t.is_active() && t.data.alive)
            .map(|t| t.data.position)
            .collect();
        let arena = world.arena;

        for (&id, drone) in self.drones.iter_mut() {
            let Ok(tank) = world.tank_mut(id) else {
                continue;
            };
            if !tank.is_active() || !tank.data.alive {
                continue;
            }
            tank.input = drone.steer(tank, &targets, &arena, &self.config, rng, dt);
        }
    }
}

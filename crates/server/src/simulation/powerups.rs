//! Powerup spawning, pickup and effects.

use glam::Vec2;
use protocol::packets::{EntityKind, GameEvent, PowerupKind};
use rand::Rng;

use super::Simulation;
use crate::collision::check_circle_collision;
use crate::entity::{EffectKind, Entity, EntityData, Powerup};

impl Simulation {
    /// Timed spawning: one powerup per interval while under the cap.
    pub(super) fn spawn_powerups(&mut self) {
        if self.tick < self.next_powerup_tick {
            return;
        }
        self.next_powerup_tick = self.tick + self.config.server.ticks(self.config.powerup.spawn_interval_secs);
        if self.world.count_alive(EntityKind::Powerup) >= self.config.powerup.max_active {
            return;
        }
        let arena = self.world.arena;
        let position = arena.random_position(&mut self.rng, self.config.powerup.radius);
        self.spawn_powerup(position);
    }

    /// Drop a random powerup at `position`.
    pub(super) fn spawn_powerup(&mut self, position: Vec2) -> u32 {
        let kind = self.roll_powerup_kind();
        let despawn_at = (self.config.powerup.despawn_secs > 0.0)
            .then(|| self.tick + self.config.server.ticks(self.config.powerup.despawn_secs));
        let data = EntityData::new(position, self.config.powerup.radius, self.tick);
        self.create_entity(Entity::Powerup(Powerup::new(data, kind, despawn_at)))
    }

    fn roll_powerup_kind(&mut self) -> PowerupKind {
        let weights = &self.config.powerup.weights;
        let total: f32 = PowerupKind::ALL.iter().map(|k| weights.weight(*k).max(0.0)).sum();
        if total <= 0.0 {
            return PowerupKind::Health;
        }
        let mut roll = self.rng.random_range(0.0..total);
        for kind in PowerupKind::ALL {
            let weight = weights.weight(kind).max(0.0);
            if roll < weight {
                return kind;
            }
            roll -= weight;
        }
        PowerupKind::Xp
    }

    /// Tanks pick up powerups within reach, in store order. The first tank to
    /// reach a powerup takes it.
    pub(super) fn collect_powerups(&mut self) {
        let reach = self.config.powerup.radius;
        let powerup_ids = self.world.ids(EntityKind::Powerup);
        if powerup_ids.is_empty() {
            return;
        }

        for tank_id in self.world.ids(EntityKind::Tank) {
            let position = match self.world.tank(tank_id) {
                Ok(t) if t.data.alive && t.is_active() => t.data.position,
                _ => continue,
            };
            for &powerup_id in &powerup_ids {
                let kind = match self.world.get(powerup_id) {
                    Ok(Entity::Powerup(p))
                        if p.data.alive && check_circle_collision(p.data.position, reach, position, 0.0).is_colliding() =>
                    {
                        p.kind
                    }
                    _ => continue,
                };
                self.apply_powerup(tank_id, kind);
                self.events.push(GameEvent::Pickup { tank: tank_id, kind });
                self.destroy_entity(powerup_id);
            }
        }
    }

    fn apply_powerup(&mut self, tank_id: u32, kind: PowerupKind) {
        let config = &self.config.powerup;
        let tick = self.tick;
        let until = |secs: f32| tick + self.config.server.ticks(secs);
        let Ok(tank) = self.world.tank_mut(tank_id) else {
            return;
        };
        match kind {
            PowerupKind::Health => tank.heal(config.health_amount),
            PowerupKind::Shield => {
                tank.shield = config.shield_points;
                tank.add_effect(EffectKind::Shield, 0.0, until(config.shield_secs));
            }
            PowerupKind::Speed => {
                tank.add_effect(EffectKind::Speed, config.speed_multiplier, until(config.speed_secs))
            }
            PowerupKind::Damage => {
                tank.add_effect(EffectKind::Damage, config.damage_multiplier, until(config.damage_secs))
            }
            PowerupKind::Xp => tank.gain_xp(config.xp_amount),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::TickInput;
    use super::super::tests::{place_tank, quiet_config, sim};
    use crate::entity::{EffectKind, Entity, EntityData, Powerup};
    use glam::Vec2;
    use protocol::packets::{GameEvent, PowerupKind};

    fn drop_powerup(sim: &mut super::Simulation, kind: PowerupKind, at: Vec2) -> u32 {
        let data = EntityData::new(at, 25.0, sim.current_tick());
        sim.world.create(Entity::Powerup(Powerup::new(data, kind, None)))
    }

    #[test]
    fn test_health_is_capped() {
        let mut sim = sim(quiet_config());
        let tank = place_tank(&mut sim, 1, Vec2::new(300.0, 300.0));
        sim.world.tank_mut(tank).unwrap().health = 80.0;
        let powerup = drop_powerup(&mut sim, PowerupKind::Health, Vec2::new(300.0, 300.0));

        let report = sim.tick(TickInput::default());
        assert_eq!(sim.world.tank(tank).unwrap().health, 100.0);
        assert!(report.removed.contains(&powerup));
    }

    #[test]
    fn test_collected_once_by_first_tank() {
        let mut sim = sim(quiet_config());
        let first = place_tank(&mut sim, 1, Vec2::new(300.0, 300.0));
        let second = place_tank(&mut sim, 2, Vec2::new(305.0, 300.0));
        drop_powerup(&mut sim, PowerupKind::Xp, Vec2::new(302.0, 300.0));

        let report = sim.tick(TickInput::default());
        let pickups: Vec<_> = report
            .events
            .iter()
            .filter(|e| matches!(e, GameEvent::Pickup { .. }))
            .collect();
        assert_eq!(pickups.len(), 1);
        assert_eq!(sim.world.tank(first).unwrap().xp, 30);
        assert_eq!(sim.world.tank(second).unwrap().xp, 0);
    }

    #[test]
    fn test_pickup_reach() {
        let mut sim = sim(quiet_config());
        let tank = place_tank(&mut sim, 1, Vec2::new(300.0, 300.0));
        let far = drop_powerup(&mut sim, PowerupKind::Xp, Vec2::new(326.0, 300.0));
        let near = drop_powerup(&mut sim, PowerupKind::Xp, Vec2::new(300.0, 276.0));

        let report = sim.tick(TickInput::default());
        assert!(report.removed.contains(&near));
        assert!(!report.removed.contains(&far));
        assert_eq!(sim.world.tank(tank).unwrap().xp, 30);
    }

    #[test]
    fn test_shield_effect_expires() {
        let mut config = quiet_config();
        config.powerup.shield_secs = 0.1;
        let mut sim = sim(config);
        let tank = place_tank(&mut sim, 1, Vec2::new(300.0, 300.0));
        drop_powerup(&mut sim, PowerupKind::Shield, Vec2::new(300.0, 300.0));

        sim.tick(TickInput::default());
        {
            let t = sim.world.tank(tank).unwrap();
            assert_eq!(t.shield, 30.0);
            assert!(t.effect(EffectKind::Shield).is_some());
        }
        for _ in 0..3 {
            sim.tick(TickInput::default());
        }
        let t = sim.world.tank(tank).unwrap();
        assert_eq!(t.shield, 0.0);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn test_uncollected_powerup_despawns() {
        let mut config = quiet_config();
        config.powerup.despawn_secs = 0.1;
        let mut sim = sim(config);
        let id = sim.spawn_powerup(Vec2::new(600.0, 300.0));
        for _ in 0..4 {
            sim.tick(TickInput::default());
        }
        assert!(sim.world.get(id).is_err());
    }
}

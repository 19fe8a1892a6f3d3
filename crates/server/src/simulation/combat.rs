//! Firing, bullet hits and kills.

use fixedbitset::FixedBitSet;
use protocol::packets::{EntityKind, GameEvent};
use rand::Rng;

use super::Simulation;
use crate::collision::swept_hit;
use crate::entity::{Bullet, Entity, EntityData};
use crate::geometry::direction;

impl Simulation {
    pub(super) fn fire_weapons(&mut self) {
        let dt = self.dt;
        let tick = self.tick;
        let ttl = self.config.server.ticks(self.config.bullet.ttl_secs);
        let bullet_radius = self.config.bullet.radius;

        for id in self.world.ids(EntityKind::Tank) {
            let Ok(tank) = self.world.tank_mut(id) else {
                continue;
            };
            tank.reload_timer = (tank.reload_timer - dt).max(0.0);
            if !tank.is_active() || !tank.data.alive || !tank.input.fire || tank.reload_timer > 0.0 {
                continue;
            }

            let stats = tank.stats(&self.config.tank);
            tank.reload_timer = stats.reload_secs;
            let aim = direction(tank.angle);
            let mut data = EntityData::new(tank.data.position + aim * tank.data.radius, bullet_radius, tick);
            data.velocity = aim * stats.bullet_speed;
            let mut bullet = Bullet::new(
                data,
                id,
                stats.bullet_damage * tank.damage_multiplier(),
                stats.bullet_penetration,
                ttl,
            );
            bullet.from_drone = tank.is_drone();
            self.create_entity(Entity::Bullet(bullet));
        }
    }

    /// Test every live bullet against every tank, in store order.
    ///
    /// A tank killed earlier in the tick still absorbs penetration from later
    /// bullets but takes no further damage and credits no further kills.
    pub(super) fn resolve_bullet_hits(&mut self) {
        let tank_ids = self.world.ids(EntityKind::Tank);
        let mut killed = FixedBitSet::with_capacity(tank_ids.len());

        for bullet_id in self.world.ids(EntityKind::Bullet) {
            let (start, end, radius, owner, from_drone, damage) = match self.world.get(bullet_id) {
                Ok(Entity::Bullet(b)) if b.data.alive => (
                    b.previous_position,
                    b.data.position,
                    b.data.radius,
                    b.owner_tank,
                    b.from_drone,
                    b.damage,
                ),
                _ => continue,
            };

            for (index, &tank_id) in tank_ids.iter().enumerate() {
                if tank_id == owner {
                    continue;
                }
                let dead_this_tick = killed.contains(index);
                let touched = match self.world.tank(tank_id) {
                    Ok(t) => {
                        ((t.data.alive && t.is_active()) || dead_this_tick)
                            && !(from_drone && t.is_drone())
                            && swept_hit(start, end, radius, t.data.position, t.data.radius)
                    }
                    Err(_) => false,
                };
                if !touched {
                    continue;
                }

                let Ok(bullet) = self.world.bullet_mut(bullet_id) else {
                    break;
                };
                if bullet.has_hit(tank_id) {
                    continue;
                }
                let exhausted = bullet.register_hit(tank_id);

                if !dead_this_tick {
                    let died = match self.world.tank_mut(tank_id) {
                        Ok(tank) => {
                            tank.take_damage(damage);
                            tank.health <= 0.0
                        }
                        Err(_) => false,
                    };
                    if died {
                        killed.insert(index);
                        self.on_tank_killed(tank_id, owner);
                    }
                }

                if exhausted {
                    self.destroy_entity(bullet_id);
                    break;
                }
            }
        }
    }

    fn on_tank_killed(&mut self, victim: u32, killer: u32) {
        let respawn_at = self.tick + self.config.server.ticks(self.config.tank.respawn_secs);
        let Ok(tank) = self.world.tank_mut(victim) else {
            return;
        };
        tank.destroy(respawn_at);
        let position = tank.data.position;
        let bounty = tank.bounty_multiplier;
        let is_drone = tank.is_drone();

        let killer = match self.world.tank_mut(killer) {
            Ok(tank) => {
                let xp = (self.config.leveling.kill_xp as f32 * bounty).round().max(0.0) as u32;
                tank.gain_xp(xp);
                Some(killer)
            }
            Err(_) => None,
        };
        self.events.push(GameEvent::Killed { victim, killer });

        if is_drone {
            self.destroy_entity(victim);
        }
        if self.rng.random_bool(self.config.powerup.drop_chance.clamp(0.0, 1.0)) {
            self.spawn_powerup(position);
        }
    }
}

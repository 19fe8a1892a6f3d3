//! Simulation engine.
//!
//! [`Simulation::tick`] advances the world by exactly one fixed step. All
//! entity creation, mutation and removal happens inside it; callers hand over
//! everything that should affect the world through a [`TickInput`].

mod combat;
mod powerups;
mod progression;

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Vec2;
use protocol::packets::{EntityKind, EntityState, GameEvent, UpgradeKind};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, warn};

use crate::ai::DroneManager;
use crate::config::Config;
use crate::entity::{Entity, EntityData, StepOutcome, Tank, TankInput, TankState, TankStats};
use crate::error::InvariantViolation;
use crate::geometry::Arena;
use crate::world::World;

/// Attempts at finding a spawn point clear of drones before settling.
const SPAWN_ATTEMPTS: usize = 10;

/// Everything from outside the simulation that applies to the next tick.
#[derive(Debug, Clone, Default)]
pub struct TickInput {
    /// Latest sanitized input per tank id.
    pub inputs: BTreeMap<u32, TankInput>,
    /// Clients that need a tank.
    pub spawns: Vec<u32>,
    /// Tanks to remove from the match.
    pub despawns: Vec<u32>,
    /// Upgrade purchases per tank, in arrival order.
    pub upgrades: Vec<(u32, UpgradeKind)>,
}

/// What a tick produced.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: u64,
    pub events: Vec<GameEvent>,
    /// `(client_id, tank_id)` for every spawn request served.
    pub spawned: Vec<(u32, u32)>,
    /// Entity ids removed by this tick's compaction.
    pub removed: Vec<u32>,
    pub repaired: Vec<InvariantViolation>,
}

/// The authoritative game simulation.
pub struct Simulation {
    pub(crate) config: Arc<Config>,
    pub(crate) world: World,
    tick: u64,
    dt: f32,
    pub(crate) rng: StdRng,
    drones: DroneManager,
    next_powerup_tick: u64,
    /// Events of the tick in progress.
    events: Vec<GameEvent>,
}

impl Simulation {
    pub fn new(config: Arc<Config>, seed: u64) -> Self {
        let arena = Arena::from_config(&config.arena);
        let dt = config.server.tick_dt();
        let first_powerup = config.server.ticks(config.powerup.spawn_interval_secs);
        let drones = DroneManager::new(config.ai.clone());
        Self {
            world: World::new(arena),
            tick: 0,
            dt,
            rng: StdRng::seed_from_u64(seed),
            drones,
            next_powerup_tick: first_powerup,
            events: Vec::new(),
            config,
        }
    }

    /// Number of completed ticks.
    #[inline]
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    #[inline]
    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn arena(&self) -> Arena {
        self.world.arena
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Wire state of every entity, in store order.
    pub fn entity_states(&self) -> Vec<EntityState> {
        self.world.iter().map(|e| e.to_state(self.tick)).collect()
    }

    /// Advance the world by one fixed step.
    pub fn tick(&mut self, input: TickInput) -> TickReport {
        self.tick += 1;
        let tick = self.tick;
        let mut report = TickReport {
            tick,
            ..Default::default()
        };

        self.apply_membership(&input, &mut report);
        self.apply_upgrades(&input.upgrades);
        self.respawn_due();

        // 1. Input application
        self.drones.think(&mut self.world, &mut self.rng, self.dt);
        self.apply_inputs(&input.inputs);

        // 2. Movement integration
        self.step_kind(EntityKind::Tank);

        // 3. Weapon firing
        self.fire_weapons();

        // 4. Bullet travel, powerup despawn
        self.step_kind(EntityKind::Bullet);
        self.step_kind(EntityKind::Powerup);

        // 5. Collision resolution
        self.resolve_bullet_hits();

        // 6. Powerup pickup
        self.collect_powerups();

        // 7. Effect expiry
        for id in self.world.ids(EntityKind::Tank) {
            if let Ok(tank) = self.world.tank_mut(id) {
                tank.expire_effects(tick);
            }
        }

        // 8. Leveling
        self.apply_leveling();

        // 9. Regeneration
        self.regenerate();

        self.spawn_powerups();
        self.replace_drones();

        // 10. Compaction
        for (id, _) in self.world.compact() {
            self.drones.forget(id);
            report.removed.push(id);
        }

        report.repaired = self.audit();
        report.events = std::mem::take(&mut self.events);

        if tick % 400 == 0 {
            debug!(
                "Tick {}: {} entities, {} tanks",
                tick,
                self.world.len(),
                self.world.count_alive(EntityKind::Tank)
            );
        }
        report
    }

    fn apply_membership(&mut self, input: &TickInput, report: &mut TickReport) {
        for &tank_id in &input.despawns {
            self.destroy_entity(tank_id);
        }
        for &client_id in &input.spawns {
            let tank_id = self.spawn_player_tank(client_id);
            report.spawned.push((client_id, tank_id));
        }
    }

    fn apply_inputs(&mut self, inputs: &BTreeMap<u32, TankInput>) {
        for (&tank_id, input) in inputs {
            match self.world.tank_mut(tank_id) {
                Ok(tank) if tank.owner_client.is_some() => tank.input = *input,
                Ok(_) => {}
                Err(e) => debug!("Input for missing tank: {}", e),
            }
        }

        let tank_config = &self.config.tank;
        for id in self.world.ids(EntityKind::Tank) {
            let Ok(tank) = self.world.tank_mut(id) else {
                continue;
            };
            if !tank.is_active() || !tank.data.alive {
                tank.data.velocity = Vec2::ZERO;
                continue;
            }
            let speed = tank.stats(tank_config).move_speed * tank.speed_multiplier();
            tank.data.velocity = tank.input.move_vector.clamp_length_max(1.0) * speed;
            tank.angle = tank.input.aim_angle;
        }
    }

    fn step_kind(&mut self, kind: EntityKind) {
        let dt = self.dt;
        let tick = self.tick;
        let arena = self.world.arena;
        for id in self.world.ids(kind) {
            let outcome = match self.world.get_mut(id) {
                Ok(entity) if entity.is_alive() => entity.step(dt, &arena, tick),
                _ => continue,
            };
            if outcome == StepOutcome::Expired {
                self.destroy_entity(id);
            }
        }
    }

    /// Mark an entity destroyed and record the event once.
    pub(crate) fn destroy_entity(&mut self, id: u32) {
        let kind = match self.world.get(id) {
            Ok(entity) => entity.kind(),
            Err(e) => {
                debug!("Cannot destroy: {}", e);
                return;
            }
        };
        if let Ok(true) = self.world.mark_destroyed(id) {
            self.events.push(GameEvent::Destroy { id, kind });
        }
    }

    pub(crate) fn create_entity(&mut self, entity: Entity) -> u32 {
        let kind = entity.kind();
        let id = self.world.create(entity);
        self.events.push(GameEvent::Spawn { id, kind });
        id
    }

    /// Random point at least `respawn_clearance` away from every drone, if
    /// one turns up within a few attempts.
    fn spawn_position(&mut self) -> Vec2 {
        let arena = self.world.arena;
        let margin = self.config.tank.radius;
        let clearance = self.config.tank.respawn_clearance;
        let mut candidate = arena.random_position(&mut self.rng, margin);
        for _ in 0..SPAWN_ATTEMPTS {
            let clear = self
                .world
                .tanks()
                .filter(|t| t.is_drone() && t.data.alive)
                .all(|t| t.data.position.distance(candidate) >= clearance);
            if clear {
                break;
            }
            candidate = arena.random_position(&mut self.rng, margin);
        }
        candidate
    }

    pub fn spawn_player_tank(&mut self, client_id: u32) -> u32 {
        let position = self.spawn_position();
        let config = &self.config.tank;
        let tank = Tank::new(
            EntityData::new(position, config.radius, self.tick),
            Some(client_id),
            TankStats::base(config),
            config.starting_upgrade_points,
            self.config.leveling.first_threshold,
        );
        self.create_entity(Entity::Tank(tank))
    }

    fn respawn_due(&mut self) {
        let tick = self.tick;
        for id in self.world.ids(EntityKind::Tank) {
            let due = matches!(
                self.world.tank(id),
                Ok(t) if t.data.alive && matches!(t.state, TankState::Respawning { at_tick } if at_tick <= tick)
            );
            if !due {
                continue;
            }
            let position = self.spawn_position();
            if let Ok(tank) = self.world.tank_mut(id) {
                tank.respawn(position);
                self.events.push(GameEvent::Respawn { tank: id });
            }
        }
    }

    fn replace_drones(&mut self) {
        let missing = self.drones.missing();
        for _ in 0..missing {
            let position = {
                let arena = self.world.arena;
                arena.random_position(&mut self.rng, self.config.tank.radius)
            };
            let tank = self.drones.build(&self.config, position, self.tick, &mut self.rng);
            let id = self.create_entity(Entity::Tank(tank));
            self.drones.adopt(id, &mut self.rng);
        }
    }

    /// Check world invariants and repair anything out of contract.
    fn audit(&mut self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        let center = self.world.arena.center();
        let mut broken_projectiles = Vec::new();

        for id in self.world.ids(EntityKind::Tank) {
            let Ok(tank) = self.world.tank_mut(id) else {
                continue;
            };
            if !tank.data.position.is_finite() {
                violations.push(InvariantViolation::NonFinitePosition { id });
                tank.data.position = center;
            }
            if !tank.data.velocity.is_finite() {
                tank.data.velocity = Vec2::ZERO;
            }
            if !tank.max_health.is_finite() || tank.max_health <= 0.0 {
                tank.max_health = tank.base.max_health;
            }
            if !(0.0..=tank.max_health).contains(&tank.health) {
                violations.push(InvariantViolation::HealthOutOfRange {
                    id,
                    health: tank.health,
                    max: tank.max_health,
                });
                tank.health = if tank.is_active() { tank.max_health } else { 0.0 };
            }
            if !tank.shield.is_finite() || tank.shield < 0.0 {
                violations.push(InvariantViolation::BadShield { id, shield: tank.shield });
                tank.shield = 0.0;
            }
        }

        for entity in self.world.iter() {
            if !matches!(entity, Entity::Tank(_)) && !entity.data().position.is_finite() {
                violations.push(InvariantViolation::NonFinitePosition { id: entity.id() });
                broken_projectiles.push(entity.id());
            }
        }
        for id in broken_projectiles {
            self.destroy_entity(id);
        }

        for violation in &violations {
            warn!("Repaired world state: {}", violation);
        }
        violations
    }
}

//! Tanks: player-owned or AI drones.

use glam::Vec2;
use protocol::packets::{TankFlags, TankVisual, UpgradeKind};

use super::{EntityData, StepOutcome};
use crate::config::{AiConfig, LevelingConfig, TankConfig};
use crate::error::ValidationError;
use crate::geometry::Arena;

/// Control state applied to a tank, already sanitized.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TankInput {
    /// Length at most 1.
    pub move_vector: Vec2,
    pub aim_angle: f32,
    pub fire: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TankState {
    Active,
    /// Destroyed, out of combat until `at_tick`. Drones are never respawned.
    Respawning { at_tick: u64 },
}

/// Timed powerup effect kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Shield,
    Speed,
    Damage,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveEffect {
    pub kind: EffectKind,
    /// Multiplier for speed/damage, unused for shield.
    pub magnitude: f32,
    pub expires_at: u64,
}

/// Tank attributes after upgrades, before timed effects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TankStats {
    pub max_health: f32,
    /// Health per second.
    pub regen: f32,
    pub bullet_damage: f32,
    pub bullet_speed: f32,
    pub bullet_penetration: u32,
    pub reload_secs: f32,
    pub move_speed: f32,
}

impl TankStats {
    /// Tier 0 player stats.
    pub fn base(config: &TankConfig) -> Self {
        Self {
            max_health: config.max_health,
            regen: config.regen,
            bullet_damage: config.bullet_damage,
            bullet_speed: config.bullet_speed,
            bullet_penetration: config.bullet_penetration,
            reload_secs: config.reload_secs,
            move_speed: config.move_speed,
        }
    }

    /// Drone stats for the configured difficulty.
    pub fn drone(config: &AiConfig) -> Self {
        let d = config.difficulty.stats();
        Self {
            max_health: d.health,
            regen: 0.0,
            bullet_damage: d.damage,
            bullet_speed: config.bullet_speed,
            bullet_penetration: 1,
            reload_secs: config.fire_interval_secs,
            move_speed: d.speed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tank {
    pub data: EntityData,
    /// Owning client, `None` for AI drones.
    pub owner_client: Option<u32>,
    pub base: TankStats,
    pub health: f32,
    pub max_health: f32,
    /// Absorbs damage before health while a shield effect is active.
    pub shield: f32,
    pub xp: u32,
    pub level: u16,
    /// XP needed for the next level.
    pub next_level_xp: u32,
    pub upgrade_points: u32,
    /// Every point ever granted, starting points included.
    pub points_earned: u32,
    pub upgrades: [u8; UpgradeKind::COUNT],
    pub effects: Vec<ActiveEffect>,
    pub angle: f32,
    /// Seconds until the tank may fire again.
    pub reload_timer: f32,
    pub input: TankInput,
    pub state: TankState,
    /// Scales the XP awarded to whoever destroys this tank.
    pub bounty_multiplier: f32,
}

impl Tank {
    pub fn new(data: EntityData, owner_client: Option<u32>, base: TankStats, points: u32, first_threshold: u32) -> Self {
        Self {
            data,
            owner_client,
            base,
            health: base.max_health,
            max_health: base.max_health,
            shield: 0.0,
            xp: 0,
            level: 1,
            next_level_xp: first_threshold.max(1),
            upgrade_points: points,
            points_earned: points,
            upgrades: [0; UpgradeKind::COUNT],
            effects: Vec::new(),
            angle: 0.0,
            reload_timer: 0.0,
            input: TankInput::default(),
            state: TankState::Active,
            bounty_multiplier: 1.0,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == TankState::Active
    }

    #[inline]
    pub fn is_drone(&self) -> bool {
        self.owner_client.is_none()
    }

    #[inline]
    pub fn tier(&self, kind: UpgradeKind) -> u8 {
        self.upgrades[kind as usize]
    }

    pub fn points_spent(&self) -> u32 {
        self.upgrades.iter().map(|t| *t as u32).sum()
    }

    /// Current stats with upgrade tiers applied.
    pub fn stats(&self, config: &TankConfig) -> TankStats {
        let t = |kind| self.tier(kind) as f32;
        let mut stats = self.base;
        stats.max_health += t(UpgradeKind::HealthMax) * config.max_health_step;
        stats.regen += t(UpgradeKind::HealthRegen) * config.regen_step;
        stats.bullet_damage += t(UpgradeKind::BulletDamage) * config.bullet_damage_step;
        stats.bullet_speed += t(UpgradeKind::BulletSpeed) * config.bullet_speed_step;
        stats.bullet_penetration +=
            self.tier(UpgradeKind::BulletPenetration) as u32 * config.bullet_penetration_step;
        stats.reload_secs = (stats.reload_secs - t(UpgradeKind::ReloadSpeed) * config.reload_step_secs)
            .max(config.min_reload_secs);
        stats.move_speed += t(UpgradeKind::MoveSpeed) * config.move_speed_step;
        stats
    }

    pub fn check_upgrade(&self, kind: UpgradeKind, max_tier: u8) -> Result<(), ValidationError> {
        if self.upgrade_points == 0 {
            return Err(ValidationError::NoUpgradePoints);
        }
        if self.tier(kind) >= max_tier {
            return Err(ValidationError::MaxTier(max_tier));
        }
        Ok(())
    }

    /// Spend one point on `kind`. Raising max health does not heal.
    pub fn apply_upgrade(&mut self, kind: UpgradeKind, config: &TankConfig) -> Result<(), ValidationError> {
        self.check_upgrade(kind, config.max_tier)?;
        self.upgrades[kind as usize] += 1;
        self.upgrade_points -= 1;
        if kind == UpgradeKind::HealthMax {
            self.max_health = self.stats(config).max_health;
        }
        Ok(())
    }

    pub fn effect(&self, kind: EffectKind) -> Option<&ActiveEffect> {
        self.effects.iter().find(|e| e.kind == kind)
    }

    /// Insert an effect, refreshing an existing one of the same kind.
    pub fn add_effect(&mut self, kind: EffectKind, magnitude: f32, expires_at: u64) {
        match self.effects.iter_mut().find(|e| e.kind == kind) {
            Some(effect) => {
                effect.magnitude = magnitude;
                effect.expires_at = effect.expires_at.max(expires_at);
            }
            None => self.effects.push(ActiveEffect {
                kind,
                magnitude,
                expires_at,
            }),
        }
    }

    /// Drop effects whose expiry tick has passed. Returns how many expired.
    pub fn expire_effects(&mut self, tick: u64) -> usize {
        let before = self.effects.len();
        self.effects.retain(|e| e.expires_at > tick);
        if self.effect(EffectKind::Shield).is_none() {
            self.shield = 0.0;
        }
        before - self.effects.len()
    }

    #[inline]
    pub fn speed_multiplier(&self) -> f32 {
        self.effect(EffectKind::Speed).map_or(1.0, |e| e.magnitude)
    }

    #[inline]
    pub fn damage_multiplier(&self) -> f32 {
        self.effect(EffectKind::Damage).map_or(1.0, |e| e.magnitude)
    }

    /// Apply incoming damage, shield first. Returns the health lost.
    pub fn take_damage(&mut self, amount: f32) -> f32 {
        let amount = amount.max(0.0);
        let absorbed = amount.min(self.shield);
        self.shield -= absorbed;
        let before = self.health;
        self.health = (self.health - (amount - absorbed)).max(0.0);
        before - self.health
    }

    pub fn heal(&mut self, amount: f32) {
        self.health = (self.health + amount.max(0.0)).min(self.max_health);
    }

    #[inline]
    pub fn gain_xp(&mut self, amount: u32) {
        self.xp = self.xp.saturating_add(amount);
    }

    /// Convert banked experience into levels, carrying the remainder over.
    /// Returns the number of levels gained.
    pub fn apply_levels(&mut self, leveling: &LevelingConfig) -> u16 {
        let mut gained = 0;
        while self.xp >= self.next_level_xp {
            self.xp -= self.next_level_xp;
            self.level = self.level.saturating_add(1);
            self.upgrade_points += leveling.points_per_level;
            self.points_earned += leveling.points_per_level;
            self.next_level_xp = ((self.next_level_xp as f32 * leveling.threshold_growth) as u32)
                .max(self.next_level_xp);
            gained += 1;
        }
        gained
    }

    /// Take the tank out of combat.
    pub fn destroy(&mut self, respawn_at: u64) {
        self.health = 0.0;
        self.shield = 0.0;
        self.effects.clear();
        self.data.velocity = Vec2::ZERO;
        self.input.fire = false;
        self.state = TankState::Respawning { at_tick: respawn_at };
    }

    /// Bring a destroyed tank back at `position` with full health.
    pub fn respawn(&mut self, position: Vec2) {
        self.data.position = position;
        self.data.velocity = Vec2::ZERO;
        self.health = self.max_health;
        self.shield = 0.0;
        self.effects.clear();
        self.reload_timer = 0.0;
        self.state = TankState::Active;
    }

    pub(super) fn step(&mut self, dt: f32, arena: &Arena) -> StepOutcome {
        if self.is_active() {
            self.data.position = arena.clamp(self.data.position + self.data.velocity * dt, self.data.radius);
        }
        StepOutcome::Keep
    }

    pub fn visual(&self, tick: u64) -> TankVisual {
        let live = |kind| self.effect(kind).is_some_and(|e: &ActiveEffect| e.expires_at > tick);
        TankVisual {
            angle: self.angle,
            health: self.health,
            max_health: self.max_health,
            shield: self.shield,
            level: self.level,
            owner_client: self.owner_client,
            flags: TankFlags {
                respawning: !self.is_active(),
                shielded: self.shield > 0.0 && live(EffectKind::Shield),
                speed_boost: live(EffectKind::Speed),
                damage_boost: live(EffectKind::Damage),
            },
        }
    }
}

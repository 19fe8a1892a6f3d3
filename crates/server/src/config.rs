//! Server configuration.
//!
//! All balance numbers live here. Speeds are in arena units per second and
//! durations in seconds; the simulation converts them to ticks with
//! [`ServerConfig::ticks`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use protocol::packets::PowerupKind;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub arena: ArenaConfig,
    #[serde(default)]
    pub tank: TankConfig,
    #[serde(default)]
    pub bullet: BulletConfig,
    #[serde(default)]
    pub powerup: PowerupConfig,
    #[serde(default)]
    pub leveling: LevelingConfig,
    #[serde(default)]
    pub ai: AiConfig,
}

impl Config {
    /// Load configuration from `path`, writing the defaults there if the file
    /// does not exist yet.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            info!("No {} found, creating default config", path.display());
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            Ok(default_config)
        }
    }
}

/// Server networking and general settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum concurrent sessions (connected or inside their grace window).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Open sockets allowed per remote IP.
    #[serde(default = "default_ip_limit")]
    pub ip_limit: usize,
    /// Simulation ticks per second.
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u16,
    /// Ticks run back to back when the loop falls behind; the rest are dropped.
    #[serde(default = "default_max_catchup_ticks")]
    pub max_catchup_ticks: u32,
    /// A client silent for this long is force-disconnected.
    #[serde(default = "default_client_timeout")]
    pub client_timeout_secs: f32,
    /// How long a dropped client's tank stays in the match.
    #[serde(default = "default_disconnect_grace")]
    pub disconnect_grace_secs: f32,
    /// Inputs stamped more than this many ticks away from the server tick are
    /// rejected.
    #[serde(default = "default_input_window")]
    pub input_window_ticks: u32,
    /// Players needed before the match starts; 0 starts immediately.
    #[serde(default)]
    pub lobby_min_players: usize,
    /// Outbound frames buffered per client before snapshots get dropped.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
    /// Maximum display name length in characters.
    #[serde(default = "default_max_name_length")]
    pub max_name_length: usize,
    /// Server name shown to clients.
    #[serde(default = "default_name")]
    pub name: String,
    /// Seed for powerup and AI randomness. Random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ServerConfig {
    /// Fixed simulation step in seconds.
    #[inline]
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    /// Convert a duration in seconds to a whole number of ticks (at least 1).
    #[inline]
    pub fn ticks(&self, secs: f32) -> u64 {
        ((secs * self.tick_rate.max(1) as f32).round() as u64).max(1)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_connections: default_max_connections(),
            ip_limit: default_ip_limit(),
            tick_rate: default_tick_rate(),
            max_catchup_ticks: default_max_catchup_ticks(),
            client_timeout_secs: default_client_timeout(),
            disconnect_grace_secs: default_disconnect_grace(),
            input_window_ticks: default_input_window(),
            lobby_min_players: 0,
            outbound_queue: default_outbound_queue(),
            max_name_length: default_max_name_length(),
            name: default_name(),
            seed: None,
        }
    }
}

fn default_port() -> u16 {
    5555
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    16
}
fn default_ip_limit() -> usize {
    4
}
fn default_tick_rate() -> u16 {
    30
}
fn default_max_catchup_ticks() -> u32 {
    3
}
fn default_client_timeout() -> f32 {
    10.0
}
fn default_disconnect_grace() -> f32 {
    5.0
}
fn default_input_window() -> u32 {
    60
}
fn default_outbound_queue() -> usize {
    8
}
fn default_max_name_length() -> usize {
    16
}
fn default_name() -> String {
    "Bulletverse".to_string()
}

/// Arena size. The playable area spans `[0, width] x [0, height]`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArenaConfig {
    #[serde(default = "default_arena_width")]
    pub width: f32,
    #[serde(default = "default_arena_height")]
    pub height: f32,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            width: default_arena_width(),
            height: default_arena_height(),
        }
    }
}

fn default_arena_width() -> f32 {
    1280.0
}
fn default_arena_height() -> f32 {
    720.0
}

/// Tank stats. Each upgrade tier adds the matching `*_step` to the base value.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TankConfig {
    #[serde(default = "default_tank_radius")]
    pub radius: f32,
    #[serde(default = "default_max_health")]
    pub max_health: f32,
    #[serde(default = "default_max_health_step")]
    pub max_health_step: f32,
    /// Health per second at tier 0.
    #[serde(default)]
    pub regen: f32,
    #[serde(default = "default_regen_step")]
    pub regen_step: f32,
    #[serde(default = "default_bullet_damage")]
    pub bullet_damage: f32,
    #[serde(default = "default_bullet_damage_step")]
    pub bullet_damage_step: f32,
    #[serde(default = "default_bullet_speed")]
    pub bullet_speed: f32,
    #[serde(default = "default_bullet_speed_step")]
    pub bullet_speed_step: f32,
    #[serde(default = "default_bullet_penetration")]
    pub bullet_penetration: u32,
    #[serde(default = "default_bullet_penetration_step")]
    pub bullet_penetration_step: u32,
    #[serde(default = "default_reload_secs")]
    pub reload_secs: f32,
    /// Seconds removed from the reload per tier.
    #[serde(default = "default_reload_step")]
    pub reload_step_secs: f32,
    #[serde(default = "default_min_reload")]
    pub min_reload_secs: f32,
    #[serde(default = "default_move_speed")]
    pub move_speed: f32,
    #[serde(default = "default_move_speed_step")]
    pub move_speed_step: f32,
    /// Highest purchasable tier per upgrade.
    #[serde(default = "default_max_tier")]
    pub max_tier: u8,
    #[serde(default = "default_starting_points")]
    pub starting_upgrade_points: u32,
    #[serde(default = "default_respawn_secs")]
    pub respawn_secs: f32,
    /// Minimum distance from AI drones when picking a respawn point.
    #[serde(default = "default_respawn_clearance")]
    pub respawn_clearance: f32,
}

impl Default for TankConfig {
    fn default() -> Self {
        Self {
            radius: default_tank_radius(),
            max_health: default_max_health(),
            max_health_step: default_max_health_step(),
            regen: 0.0,
            regen_step: default_regen_step(),
            bullet_damage: default_bullet_damage(),
            bullet_damage_step: default_bullet_damage_step(),
            bullet_speed: default_bullet_speed(),
            bullet_speed_step: default_bullet_speed_step(),
            bullet_penetration: default_bullet_penetration(),
            bullet_penetration_step: default_bullet_penetration_step(),
            reload_secs: default_reload_secs(),
            reload_step_secs: default_reload_step(),
            min_reload_secs: default_min_reload(),
            move_speed: default_move_speed(),
            move_speed_step: default_move_speed_step(),
            max_tier: default_max_tier(),
            starting_upgrade_points: default_starting_points(),
            respawn_secs: default_respawn_secs(),
            respawn_clearance: default_respawn_clearance(),
        }
    }
}

fn default_tank_radius() -> f32 {
    20.0
}
fn default_max_health() -> f32 {
    100.0
}
fn default_max_health_step() -> f32 {
    10.0
}
fn default_regen_step() -> f32 {
    0.5
}
fn default_bullet_damage() -> f32 {
    10.0
}
fn default_bullet_damage_step() -> f32 {
    2.0
}
fn default_bullet_speed() -> f32 {
    420.0
}
fn default_bullet_speed_step() -> f32 {
    30.0
}
fn default_bullet_penetration() -> u32 {
    1
}
fn default_bullet_penetration_step() -> u32 {
    1
}
fn default_reload_secs() -> f32 {
    10.0 / 60.0
}
fn default_reload_step() -> f32 {
    1.0 / 60.0
}
fn default_min_reload() -> f32 {
    1.0 / 30.0
}
fn default_move_speed() -> f32 {
    240.0
}
fn default_move_speed_step() -> f32 {
    12.0
}
fn default_max_tier() -> u8 {
    8
}
fn default_starting_points() -> u32 {
    3
}
fn default_respawn_secs() -> f32 {
    5.0
}
fn default_respawn_clearance() -> f32 {
    200.0
}

/// Bullet settings shared by every shooter.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BulletConfig {
    #[serde(default = "default_bullet_radius")]
    pub radius: f32,
    #[serde(default = "default_bullet_ttl")]
    pub ttl_secs: f32,
}

impl Default for BulletConfig {
    fn default() -> Self {
        Self {
            radius: default_bullet_radius(),
            ttl_secs: default_bullet_ttl(),
        }
    }
}

fn default_bullet_radius() -> f32 {
    3.0
}
fn default_bullet_ttl() -> f32 {
    3.0
}

/// Powerup spawning and effect settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PowerupConfig {
    /// Pickup distance between a tank centre and a powerup.
    #[serde(default = "default_pickup_radius")]
    pub radius: f32,
    #[serde(default = "default_spawn_interval")]
    pub spawn_interval_secs: f32,
    #[serde(default = "default_max_active")]
    pub max_active: usize,
    /// Uncollected powerups vanish after this long. 0 disables despawning.
    #[serde(default = "default_despawn_secs")]
    pub despawn_secs: f32,
    #[serde(default)]
    pub weights: PowerupWeights,
    #[serde(default = "default_health_amount")]
    pub health_amount: f32,
    #[serde(default = "default_shield_points")]
    pub shield_points: f32,
    #[serde(default = "default_shield_secs")]
    pub shield_secs: f32,
    #[serde(default = "default_speed_multiplier")]
    pub speed_multiplier: f32,
    #[serde(default = "default_speed_secs")]
    pub speed_secs: f32,
    #[serde(default = "default_damage_multiplier")]
    pub damage_multiplier: f32,
    #[serde(default = "default_damage_secs")]
    pub damage_secs: f32,
    #[serde(default = "default_xp_amount")]
    pub xp_amount: u32,
    /// Chance that a destroyed tank drops a powerup.
    #[serde(default = "default_drop_chance")]
    pub drop_chance: f64,
}

impl Default for PowerupConfig {
    fn default() -> Self {
        Self {
            radius: default_pickup_radius(),
            spawn_interval_secs: default_spawn_interval(),
            max_active: default_max_active(),
            despawn_secs: default_despawn_secs(),
            weights: PowerupWeights::default(),
            health_amount: default_health_amount(),
            shield_points: default_shield_points(),
            shield_secs: default_shield_secs(),
            speed_multiplier: default_speed_multiplier(),
            speed_secs: default_speed_secs(),
            damage_multiplier: default_damage_multiplier(),
            damage_secs: default_damage_secs(),
            xp_amount: default_xp_amount(),
            drop_chance: default_drop_chance(),
        }
    }
}

fn default_pickup_radius() -> f32 {
    25.0
}
fn default_spawn_interval() -> f32 {
    10.0
}
fn default_max_active() -> usize {
    5
}
fn default_despawn_secs() -> f32 {
    30.0
}
fn default_health_amount() -> f32 {
    25.0
}
fn default_shield_points() -> f32 {
    30.0
}
fn default_shield_secs() -> f32 {
    10.0
}
fn default_speed_multiplier() -> f32 {
    1.5
}
fn default_speed_secs() -> f32 {
    5.0
}
fn default_damage_multiplier() -> f32 {
    1.5
}
fn default_damage_secs() -> f32 {
    8.0
}
fn default_xp_amount() -> u32 {
    30
}
fn default_drop_chance() -> f64 {
    0.1
}

/// Relative spawn weights per powerup kind. Kinds left out of a config table
/// keep their default weight.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PowerupWeights {
    pub health: f32,
    pub shield: f32,
    pub speed: f32,
    pub damage: f32,
    pub xp: f32,
}

impl PowerupWeights {
    pub fn weight(&self, kind: PowerupKind) -> f32 {
        match kind {
            PowerupKind::Health => self.health,
            PowerupKind::Shield => self.shield,
            PowerupKind::Speed => self.speed,
            PowerupKind::Damage => self.damage,
            PowerupKind::Xp => self.xp,
        }
    }
}

impl Default for PowerupWeights {
    fn default() -> Self {
        Self {
            health: 0.25,
            shield: 0.2,
            speed: 0.2,
            damage: 0.2,
            xp: 0.15,
        }
    }
}

/// Experience curve.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LevelingConfig {
    /// XP needed to go from level 1 to level 2.
    #[serde(default = "default_first_threshold")]
    pub first_threshold: u32,
    /// Each threshold is the previous one times this factor (floored).
    #[serde(default = "default_threshold_growth")]
    pub threshold_growth: f32,
    #[serde(default = "default_points_per_level")]
    pub points_per_level: u32,
    /// XP for destroying a tank, before the difficulty multiplier.
    #[serde(default = "default_kill_xp")]
    pub kill_xp: u32,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            first_threshold: default_first_threshold(),
            threshold_growth: default_threshold_growth(),
            points_per_level: default_points_per_level(),
            kill_xp: default_kill_xp(),
        }
    }
}

fn default_first_threshold() -> u32 {
    100
}
fn default_threshold_growth() -> f32 {
    1.5
}
fn default_points_per_level() -> u32 {
    1
}
fn default_kill_xp() -> u32 {
    10
}

/// AI difficulty preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Normal,
    Hard,
}

/// Numbers behind a difficulty preset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultyStats {
    pub speed: f32,
    pub health: f32,
    pub damage: f32,
    pub xp_multiplier: f32,
}

impl Difficulty {
    pub fn stats(self) -> DifficultyStats {
        match self {
            Difficulty::Easy => DifficultyStats {
                speed: 90.0,
                health: 25.0,
                damage: 8.0,
                xp_multiplier: 1.2,
            },
            Difficulty::Normal => DifficultyStats {
                speed: 120.0,
                health: 30.0,
                damage: 10.0,
                xp_multiplier: 1.0,
            },
            Difficulty::Hard => DifficultyStats {
                speed: 150.0,
                health: 40.0,
                damage: 15.0,
                xp_multiplier: 0.8,
            },
        }
    }
}

/// Server-controlled drone tanks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AiConfig {
    #[serde(default = "default_ai_count")]
    pub count: usize,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default = "default_ai_fire_interval")]
    pub fire_interval_secs: f32,
    #[serde(default = "default_ai_bullet_speed")]
    pub bullet_speed: f32,
    /// Drones only shoot at tanks closer than this.
    #[serde(default = "default_ai_sight_range")]
    pub sight_range: f32,
    /// Per-second chance of a random heading change.
    #[serde(default = "default_ai_wander_rate")]
    pub wander_rate: f32,
    /// Per-second chance of steering toward the nearest player.
    #[serde(default = "default_ai_seek_rate")]
    pub seek_rate: f32,
    /// Aim spread in radians per unit of distance to the target.
    #[serde(default = "default_ai_aim_spread")]
    pub aim_spread_per_unit: f32,
    /// Upper bound on the aim spread, in radians.
    #[serde(default = "default_ai_max_aim_spread")]
    pub max_aim_spread: f32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            count: default_ai_count(),
            difficulty: Difficulty::default(),
            fire_interval_secs: default_ai_fire_interval(),
            bullet_speed: default_ai_bullet_speed(),
            sight_range: default_ai_sight_range(),
            wander_rate: default_ai_wander_rate(),
            seek_rate: default_ai_seek_rate(),
            aim_spread_per_unit: default_ai_aim_spread(),
            max_aim_spread: default_ai_max_aim_spread(),
        }
    }
}

fn default_ai_count() -> usize {
    6
}
fn default_ai_fire_interval() -> f32 {
    80.0 / 60.0
}
fn default_ai_bullet_speed() -> f32 {
    300.0
}
fn default_ai_sight_range() -> f32 {
    400.0
}
fn default_ai_wander_rate() -> f32 {
    0.6
}
fn default_ai_seek_rate() -> f32 {
    3.0
}
fn default_ai_aim_spread() -> f32 {
    1.0 / 2000.0
}
fn default_ai_max_aim_spread() -> f32 {
    0.2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 9000

            [ai]
            difficulty = "hard"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.tick_rate, 30);
        assert_eq!(config.ai.difficulty, Difficulty::Hard);
        assert_eq!(config.tank.max_tier, 8);
    }

    #[test]
    fn test_partial_weights_table_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [powerup.weights]
            health = 1.0
            "#,
        )
        .unwrap();
        let weights = &config.powerup.weights;
        assert_eq!(weights.health, 1.0);
        assert_eq!(weights.shield, PowerupWeights::default().shield);
        assert_eq!(weights.xp, PowerupWeights::default().xp);
        assert_eq!(config.powerup.max_active, 5);
    }

    #[test]
    fn test_default_config_serializes() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.powerup.max_active, 5);
    }

    #[test]
    fn test_ticks_conversion() {
        let server = ServerConfig::default();
        assert_eq!(server.ticks(5.0), 150);
        assert_eq!(server.ticks(0.0), 1);
    }
}

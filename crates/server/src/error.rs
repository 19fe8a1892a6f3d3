//! Server error types.

use thiserror::Error;

/// A single client message carried values the engine must not see.
///
/// The offending input is dropped; the session continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Unknown client {0}")]
    UnknownClient(u32),

    #[error("Input claims client {claimed} on session {actual}")]
    ClientMismatch { claimed: u32, actual: u32 },

    #[error("Non-finite {0} in input")]
    NonFinite(&'static str),

    #[error("Input tick {tick} outside window around {current}")]
    StaleTick { tick: u32, current: u32 },

    #[error("No upgrade points left")]
    NoUpgradePoints,

    #[error("Upgrade already at max tier {0}")]
    MaxTier(u8),
}

/// The server cannot take another session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Server full ({max} sessions)")]
pub struct CapacityError {
    pub max: usize,
}

/// Entity store lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Entity {0} not found")]
    NotFound(u32),

    #[error("Entity {id} is not a {expected}")]
    WrongKind { id: u32, expected: &'static str },
}

/// World state the engine should never produce. Detected after a tick,
/// logged, and repaired in place.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvariantViolation {
    #[error("Entity {id} has non-finite position")]
    NonFinitePosition { id: u32 },

    #[error("Tank {id} health {health} outside [0, {max}]")]
    HealthOutOfRange { id: u32, health: f32, max: f32 },

    #[error("Tank {id} shield is {shield}")]
    BadShield { id: u32, shield: f32 },
}

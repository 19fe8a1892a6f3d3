//! Collectible powerups.

use protocol::packets::PowerupKind;

use super::{EntityData, StepOutcome};

#[derive(Debug, Clone)]
pub struct Powerup {
    pub data: EntityData,
    pub kind: PowerupKind,
    /// Tick at which an uncollected powerup vanishes.
    pub despawn_at: Option<u64>,
}

impl Powerup {
    pub fn new(data: EntityData, kind: PowerupKind, despawn_at: Option<u64>) -> Self {
        Self {
            data,
            kind,
            despawn_at,
        }
    }

    pub(super) fn step(&mut self, tick: u64) -> StepOutcome {
        match self.despawn_at {
            Some(at) if tick >= at => StepOutcome::Expired,
            _ => StepOutcome::Keep,
        }
    }
}

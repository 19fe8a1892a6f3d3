//! Upgrades, leveling and regeneration.

use protocol::packets::{EntityKind, GameEvent, UpgradeKind};
use tracing::debug;

use super::Simulation;

impl Simulation {
    pub(super) fn apply_upgrades(&mut self, upgrades: &[(u32, UpgradeKind)]) {
        for &(tank_id, kind) in upgrades {
            let result = self
                .world
                .tank_mut(tank_id)
                .map_err(|e| e.to_string())
                .and_then(|tank| tank.apply_upgrade(kind, &self.config.tank).map_err(|e| e.to_string()));
            if let Err(reason) = result {
                debug!("Upgrade {:?} for tank {} refused: {}", kind, tank_id, reason);
            }
        }
    }

    pub(super) fn apply_leveling(&mut self) {
        for id in self.world.ids(EntityKind::Tank) {
            let Ok(tank) = self.world.tank_mut(id) else {
                continue;
            };
            if tank.apply_levels(&self.config.leveling) > 0 {
                let level = tank.level;
                self.events.push(GameEvent::LevelUp { tank: id, level });
            }
        }
    }

    pub(super) fn regenerate(&mut self) {
        let dt = self.dt;
        for id in self.world.ids(EntityKind::Tank) {
            let Ok(tank) = self.world.tank_mut(id) else {
                continue;
            };
            if tank.is_active() && tank.data.alive {
                let regen = tank.stats(&self.config.tank).regen;
                tank.heal(regen * dt);
            }
        }
    }
}

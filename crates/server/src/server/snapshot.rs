//! Full and delta snapshot construction.

use std::collections::HashMap;

use protocol::packets::{EntityState, GameEvent, RosterEntry, StateSnapshot};

/// Remembers what was last broadcast so deltas only carry changes.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    last_sent: HashMap<u32, EntityState>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entity, for clients that just joined or lost frames.
    pub fn full(tick: u32, states: &[EntityState], events: &[GameEvent], roster: Vec<RosterEntry>) -> StateSnapshot {
        StateSnapshot {
            tick,
            full: true,
            entities: states.to_vec(),
            removed: Vec::new(),
            events: events.to_vec(),
            roster,
        }
    }

    /// Entities whose state changed since the previous call, plus removals.
    /// Updates the cache, so call it exactly once per broadcast tick.
    pub fn delta(&mut self, tick: u32, states: &[EntityState], removed: &[u32], events: &[GameEvent]) -> StateSnapshot {
        let mut changed = Vec::new();
        for state in states {
            match self.last_sent.get(&state.id) {
                Some(previous) if previous == state => {}
                _ => {
                    changed.push(*state);
                    self.last_sent.insert(state.id, *state);
                }
            }
        }
        for id in removed {
            self.last_sent.remove(id);
        }
        StateSnapshot {
            tick,
            full: false,
            entities: changed,
            removed: removed.to_vec(),
            events: events.to_vec(),
            roster: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;
    use protocol::packets::{EntityBody, PowerupKind};
    use protocol::view::ClientWorld;

    fn powerup(id: u32, x: f32) -> EntityState {
        EntityState {
            id,
            position: Vec2::new(x, 0.0),
            velocity: Vec2::ZERO,
            body: EntityBody::Powerup { kind: PowerupKind::Speed },
        }
    }

    #[test]
    fn test_delta_only_carries_changes() {
        let mut builder = SnapshotBuilder::new();
        let first = builder.delta(1, &[powerup(1, 0.0), powerup(2, 0.0)], &[], &[]);
        assert_eq!(first.entities.len(), 2);

        let second = builder.delta(2, &[powerup(1, 0.0), powerup(2, 4.0)], &[], &[]);
        assert_eq!(second.entities, vec![powerup(2, 4.0)]);

        let third = builder.delta(3, &[powerup(2, 4.0)], &[1], &[]);
        assert!(third.entities.is_empty());
        assert_eq!(third.removed, vec![1]);
    }

    #[test]
    fn test_full_then_deltas_rebuild_world() {
        let mut builder = SnapshotBuilder::new();
        let mut view = ClientWorld::new();

        let states = vec![powerup(1, 0.0), powerup(2, 1.0)];
        builder.delta(1, &states, &[], &[]);
        view.apply(&SnapshotBuilder::full(1, &states, &[], Vec::new()));

        let states = vec![powerup(2, 9.0), powerup(3, 3.0)];
        view.apply(&builder.delta(2, &states, &[1], &[]));

        let mut seen: Vec<EntityState> = view.entities().copied().collect();
        seen.sort_by_key(|e| e.id);
        assert_eq!(seen, states);
    }
}

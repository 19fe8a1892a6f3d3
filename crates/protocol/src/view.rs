//! Client-side reconstruction of the server world.
//!
//! Rendering front-ends feed every received [`StateSnapshot`] into a
//! [`ClientWorld`] and sample positions between ticks with
//! [`ClientWorld::interpolated_position`]. Nothing here depends on the client
//! frame rate.

use std::collections::BTreeMap;

use glam::Vec2;

use crate::packets::{EntityState, GameEvent, RosterEntry, StateSnapshot};

#[derive(Debug, Clone)]
struct Tracked {
    previous: Vec2,
    current: EntityState,
}

/// World view rebuilt from full and delta snapshots.
#[derive(Debug, Default)]
pub struct ClientWorld {
    tick: Option<u32>,
    entities: BTreeMap<u32, Tracked>,
    roster: BTreeMap<u32, RosterEntry>,
    last_events: Vec<GameEvent>,
}

impl ClientWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tick of the newest applied snapshot.
    pub fn tick(&self) -> Option<u32> {
        self.tick
    }

    /// Apply a snapshot. Returns false if it was older than what we already
    /// have, or a delta arrived before any full snapshot.
    pub fn apply(&mut self, snapshot: &StateSnapshot) -> bool {
        match self.tick {
            Some(tick) if snapshot.tick <= tick => return false,
            None if !snapshot.full => return false,
            _ => {}
        }

        if snapshot.full {
            let previous: BTreeMap<u32, Vec2> = self
                .entities
                .iter()
                .map(|(id, t)| (*id, t.current.position))
                .collect();
            self.entities.clear();
            for entity in &snapshot.entities {
                let prev = previous.get(&entity.id).copied().unwrap_or(entity.position);
                self.entities.insert(
                    entity.id,
                    Tracked {
                        previous: prev,
                        current: *entity,
                    },
                );
            }
            self.roster = snapshot
                .roster
                .iter()
                .map(|entry| (entry.client_id, entry.clone()))
                .collect();
        } else {
            // Entities not mentioned in a delta did not move.
            for tracked in self.entities.values_mut() {
                tracked.previous = tracked.current.position;
            }
            for entity in &snapshot.entities {
                let previous = self
                    .entities
                    .get(&entity.id)
                    .map(|t| t.current.position)
                    .unwrap_or(entity.position);
                self.entities.insert(
                    entity.id,
                    Tracked {
                        previous,
                        current: *entity,
                    },
                );
            }
            for id in &snapshot.removed {
                self.entities.remove(id);
            }
            for event in &snapshot.events {
                match event {
                    GameEvent::PlayerJoined {
                        client_id,
                        tank_id,
                        name,
                        color,
                    } => {
                        self.roster.insert(
                            *client_id,
                            RosterEntry {
                                client_id: *client_id,
                                tank_id: *tank_id,
                                name: name.clone(),
                                color: *color,
                            },
                        );
                    }
                    GameEvent::PlayerLeft { client_id, .. } => {
                        self.roster.remove(client_id);
                    }
                    _ => {}
                }
            }
        }

        self.tick = Some(snapshot.tick);
        self.last_events = snapshot.events.clone();
        true
    }

    pub fn entity(&self, id: u32) -> Option<&EntityState> {
        self.entities.get(&id).map(|t| &t.current)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntityState> {
        self.entities.values().map(|t| &t.current)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn roster(&self) -> impl Iterator<Item = &RosterEntry> {
        self.roster.values()
    }

    /// Events of the most recently applied snapshot, for local effects.
    pub fn last_events(&self) -> &[GameEvent] {
        &self.last_events
    }

    /// Position blended between the previous and current snapshot.
    /// `alpha` is clamped to `[0, 1]`.
    pub fn interpolated_position(&self, id: u32, alpha: f32) -> Option<Vec2> {
        let tracked = self.entities.get(&id)?;
        let alpha = alpha.clamp(0.0, 1.0);
        Some(tracked.previous.lerp(tracked.current.position, alpha))
    }
}

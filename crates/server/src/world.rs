//! Entity store.
//!
//! Owns every live entity keyed by id. Ids start at 1 and are never reused.
//! Iteration follows insertion order so that tie-breaks inside a tick are
//! deterministic. Destroyed entities stay visible until [`World::compact`].

use std::collections::HashMap;

use protocol::packets::EntityKind;

use crate::entity::{Bullet, Entity, Tank};
use crate::error::StoreError;
use crate::geometry::Arena;

/// The game world containing all entities.
#[derive(Debug, Clone)]
pub struct World {
    /// Next entity ID to assign.
    next_id: u32,
    entities: HashMap<u32, Entity>,
    /// Ids in creation order.
    order: Vec<u32>,
    /// Marked destroyed since the last compaction.
    pending_removal: Vec<u32>,
    pub arena: Arena,
}

impl World {
    pub fn new(arena: Arena) -> Self {
        Self {
            next_id: 1,
            entities: HashMap::with_capacity(256),
            order: Vec::with_capacity(256),
            pending_removal: Vec::new(),
            arena,
        }
    }

    /// Insert an entity and return its freshly assigned id.
    pub fn create(&mut self, mut entity: Entity) -> u32 {
        let id = self.next_id;
        // u32 ids will not wrap within a match; skip 0 which means "none" on the wire.
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let data = entity.data_mut();
        data.id = id;
        data.alive = true;
        self.entities.insert(id, entity);
        self.order.push(id);
        id
    }

    pub fn get(&self, id: u32) -> Result<&Entity, StoreError> {
        self.entities.get(&id).ok_or(StoreError::NotFound(id))
    }

    pub fn get_mut(&mut self, id: u32) -> Result<&mut Entity, StoreError> {
        self.entities.get_mut(&id).ok_or(StoreError::NotFound(id))
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn tank(&self, id: u32) -> Result<&Tank, StoreError> {
        self.get(id)?
            .as_tank()
            .ok_or(StoreError::WrongKind { id, expected: "tank" })
    }

    pub fn tank_mut(&mut self, id: u32) -> Result<&mut Tank, StoreError> {
        self.get_mut(id)?
            .as_tank_mut()
            .ok_or(StoreError::WrongKind { id, expected: "tank" })
    }

    pub fn bullet_mut(&mut self, id: u32) -> Result<&mut Bullet, StoreError> {
        self.get_mut(id)?
            .as_bullet_mut()
            .ok_or(StoreError::WrongKind { id, expected: "bullet" })
    }

    /// All entities in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.order.iter().filter_map(|id| self.entities.get(id))
    }

    /// Entities of one kind in insertion order.
    pub fn for_each(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.iter().filter(move |e| e.kind() == kind)
    }

    /// Ids of one kind in insertion order. Collected so callers may mutate
    /// the store while walking them.
    pub fn ids(&self, kind: EntityKind) -> Vec<u32> {
        self.for_each(kind).map(Entity::id).collect()
    }

    pub fn tanks(&self) -> impl Iterator<Item = &Tank> {
        self.iter().filter_map(Entity::as_tank)
    }

    /// Live (not yet destroyed) entities of a kind.
    pub fn count_alive(&self, kind: EntityKind) -> usize {
        self.for_each(kind).filter(|e| e.is_alive()).count()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Flag an entity for removal at the next compaction. Returns false if it
    /// was already flagged.
    pub fn mark_destroyed(&mut self, id: u32) -> Result<bool, StoreError> {
        let entity = self.get_mut(id)?;
        let data = entity.data_mut();
        if !data.alive {
            return Ok(false);
        }
        data.alive = false;
        self.pending_removal.push(id);
        Ok(true)
    }

    /// Remove every entity marked destroyed. Returns the removed ids in the
    /// order they were marked. A second call with nothing new marked removes
    /// nothing.
    pub fn compact(&mut self) -> Vec<(u32, EntityKind)> {
        if self.pending_removal.is_empty() {
            return Vec::new();
        }
        let mut removed = Vec::with_capacity(self.pending_removal.len());
        for id in self.pending_removal.drain(..) {
            if let Some(entity) = self.entities.remove(&id) {
                removed.push((id, entity.kind()));
            }
        }
        let entities = &self.entities;
        self.order.retain(|id| entities.contains_key(id));
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityData, Powerup};
    use glam::Vec2;
    use protocol::packets::PowerupKind;

    fn powerup() -> Entity {
        Entity::Powerup(Powerup::new(
            EntityData::new(Vec2::ZERO, 25.0, 0),
            PowerupKind::Health,
            None,
        ))
    }

    #[test]
    fn test_ids_start_at_one_and_never_repeat() {
        let mut world = World::new(Arena::new(100.0, 100.0));
        let a = world.create(powerup());
        let b = world.create(powerup());
        assert_eq!((a, b), (1, 2));
        world.mark_destroyed(a).unwrap();
        world.compact();
        assert_eq!(world.create(powerup()), 3);
    }

    #[test]
    fn test_get_missing() {
        let world = World::new(Arena::new(100.0, 100.0));
        assert_eq!(world.get(9).map(|_| ()), Err(StoreError::NotFound(9)));
        assert!(matches!(world.tank(9), Err(StoreError::NotFound(9))));
    }

    #[test]
    fn test_destroyed_visible_until_compaction() {
        let mut world = World::new(Arena::new(100.0, 100.0));
        let a = world.create(powerup());
        let b = world.create(powerup());
        assert!(world.mark_destroyed(a).unwrap());
        assert!(!world.mark_destroyed(a).unwrap());
        assert!(world.contains(a));
        assert_eq!(world.count_alive(EntityKind::Powerup), 1);

        assert_eq!(world.compact(), vec![(a, EntityKind::Powerup)]);
        assert!(world.compact().is_empty());
        assert_eq!(world.ids(EntityKind::Powerup), vec![b]);
    }

    #[test]
    fn test_insertion_order() {
        let mut world = World::new(Arena::new(100.0, 100.0));
        let ids: Vec<u32> = (0..5).map(|_| world.create(powerup())).collect();
        world.mark_destroyed(ids[2]).unwrap();
        world.compact();
        let seen: Vec<u32> = world.iter().map(Entity::id).collect();
        assert_eq!(seen, vec![ids[0], ids[1], ids[3], ids[4]]);
    }
}

//! Bidirectional map between stable external keys and entity handles.
//!
//! ## Invariants
//! - Injective both ways: a key maps to at most one entity and an entity to at
//!   most one key. Re-registering a key (or an entity) repoints it and drops
//!   the old pairing from both maps.
//! - Stale entries (entity no longer alive) are evicted only by an explicit,
//!   observable operation: [`EntityIndex::resolve`] evicts the entry it looks
//!   up, [`EntityIndex::sweep`] evicts all of them. Plain lookups never mutate.
//! - Entries must be removed before the underlying handle can be recycled.
//!   Callers that read a mapping in one tick and mutate it in a later one use
//!   the `*_if_matches` variants: an [`Entity`] carries its generation, so a
//!   recycled handle never compares equal to the one that was read.

use bevy_ecs::entity::Entities;
use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// Key types usable in an [`EntityIndex`].
pub trait IndexKey: Copy + Eq + Hash + std::fmt::Debug + Send + Sync + 'static {
    /// Reserved sentinel values return false; registering one is a wiring bug.
    fn is_valid(&self) -> bool {
        true
    }
}

/// Stable network identifier of a simulated entity. Zero is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkId(pub u64);

impl IndexKey for NetworkId {
    fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Bidirectional `Key <-> Entity` map.
#[derive(Resource, Debug)]
pub struct EntityIndex<K: IndexKey> {
    by_key: HashMap<K, Entity>,
    by_entity: HashMap<Entity, K>,
}

impl<K: IndexKey> Default for EntityIndex<K> {
    fn default() -> Self {
        Self {
            by_key: HashMap::new(),
            by_entity: HashMap::new(),
        }
    }
}

impl<K: IndexKey> EntityIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `key` to `entity`, dropping any previous pairing of either side.
    ///
    /// # Panics
    /// If `key` is a reserved sentinel.
    #[track_caller]
    pub fn register(&mut self, key: K, entity: Entity) {
        assert!(key.is_valid(), "invalid index key {:?}", key);
        if let Some(old_entity) = self.by_key.insert(key, entity) {
            if old_entity != entity {
                self.by_entity.remove(&old_entity);
            }
        }
        if let Some(old_key) = self.by_entity.insert(entity, key) {
            if old_key != key {
                self.by_key.remove(&old_key);
            }
        }
    }

    /// Remove a key. Returns the entity it pointed to.
    pub fn unregister(&mut self, key: K) -> Option<Entity> {
        let entity = self.by_key.remove(&key)?;
        self.by_entity.remove(&entity);
        Some(entity)
    }

    /// Remove `key` only if it still points at exactly `expected` (same
    /// index and generation).
    pub fn try_remove_if_matches(&mut self, key: K, expected: Entity) -> bool {
        if self.by_key.get(&key) != Some(&expected) {
            return false;
        }
        self.by_key.remove(&key);
        self.by_entity.remove(&expected);
        true
    }

    /// Repoint `key` to `replacement` only if it still points at `expected`.
    pub fn try_update_if_matches(&mut self, key: K, expected: Entity, replacement: Entity) -> bool {
        if self.by_key.get(&key) != Some(&expected) {
            return false;
        }
        self.register(key, replacement);
        true
    }

    /// Non-evicting lookup.
    pub fn try_get_entity(&self, key: K) -> Option<Entity> {
        self.by_key.get(&key).copied()
    }

    /// Non-evicting reverse lookup.
    pub fn try_get_key(&self, entity: Entity) -> Option<K> {
        self.by_entity.get(&entity).copied()
    }

    /// Lookup that evicts the entry if its entity is no longer alive.
    pub fn resolve(&mut self, key: K, entities: &Entities) -> Option<Entity> {
        let entity = *self.by_key.get(&key)?;
        if entities.contains(entity) {
            return Some(entity);
        }
        tracing::debug!("Evicting stale index entry {:?} -> {:?}", key, entity);
        self.by_key.remove(&key);
        self.by_entity.remove(&entity);
        None
    }

    /// Evict every entry whose entity is no longer alive. Returns the count.
    pub fn sweep(&mut self, entities: &Entities) -> usize {
        let stale: Vec<K> = self
            .by_key
            .iter()
            .filter(|(_, e)| !entities.contains(**e))
            .map(|(k, _)| *k)
            .collect();
        for key in &stale {
            if let Some(entity) = self.by_key.remove(key) {
                self.by_entity.remove(&entity);
            }
        }
        if !stale.is_empty() {
            tracing::debug!("Swept {} stale index entries", stale.len());
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &Entity)> {
        self.by_key.iter()
    }
}

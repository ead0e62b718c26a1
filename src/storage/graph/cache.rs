//! Bounded read cache for entities.
//!
//! Entries are keyed by id and carry the instant they were cached. Capacity
//! is enforced with least-recently-used eviction.

use crate::models::{Entity, EntityId};
use crate::storage::sqlite::acquire_lock;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Instant;

/// A cached entity and the instant it was stored.
#[derive(Debug, Clone)]
pub struct CachedEntity {
    /// The cached record.
    pub entity: Entity,
    /// When the record entered the cache.
    pub cached_at: Instant,
}

/// LRU cache of recently touched entities.
pub struct EntityCache {
    inner: Mutex<LruCache<EntityId, CachedEntity>>,
}

impl EntityCache {
    /// Creates a cache holding at most `capacity` entities.
    ///
    /// Returns `None` for a zero capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Option<Self> {
        NonZeroUsize::new(capacity).map(|cap| Self {
            inner: Mutex::new(LruCache::new(cap)),
        })
    }

    /// Returns a clone of the cached entity.
    pub fn get(&self, id: &EntityId) -> Option<Entity> {
        let hit = acquire_lock(&self.inner).get(id).map(|c| c.entity.clone());
        if hit.is_some() {
            metrics::counter!("graph_cache_hits_total").increment(1);
        } else {
            metrics::counter!("graph_cache_misses_total").increment(1);
        }
        hit
    }

    /// Inserts or refreshes an entity.
    pub fn put(&self, entity: &Entity) {
        acquire_lock(&self.inner).put(
            entity.id.clone(),
            CachedEntity {
                entity: entity.clone(),
                cached_at: Instant::now(),
            },
        );
    }

    /// Removes an entity.
    pub fn evict(&self, id: &EntityId) {
        acquire_lock(&self.inner).pop(id);
    }

    /// Removes several entities.
    pub fn evict_all<'a>(&self, ids: impl IntoIterator<Item = &'a EntityId>) {
        let mut cache = acquire_lock(&self.inner);
        for id in ids {
            cache.pop(id);
        }
    }

    /// Returns when an entity was cached, without touching its recency.
    pub fn cached_at(&self, id: &EntityId) -> Option<Instant> {
        acquire_lock(&self.inner).peek(id).map(|c| c.cached_at)
    }

    /// Empties the cache.
    pub fn clear(&self) {
        acquire_lock(&self.inner).clear();
    }

    /// Number of cached entities.
    pub fn len(&self) -> usize {
        acquire_lock(&self.inner).len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, NewEntity, temporal};

    fn entity(name: &str) -> Entity {
        NewEntity::new(EntityType::Concept, name, name).into_entity(temporal::now())
    }

    #[test]
    fn test_zero_capacity_disables() {
        assert!(EntityCache::new(0).is_none());
    }

    #[test]
    fn test_put_get_evict() {
        let cache = EntityCache::new(4).unwrap();
        let e = entity("a");
        cache.put(&e);
        assert_eq!(cache.get(&e.id), Some(e.clone()));
        assert!(cache.cached_at(&e.id).is_some());
        cache.evict(&e.id);
        assert!(cache.get(&e.id).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = EntityCache::new(2).unwrap();
        let (a, b, c) = (entity("a"), entity("b"), entity("c"));
        cache.put(&a);
        cache.put(&b);
        // Touch `a` so `b` becomes least recently used.
        assert!(cache.get(&a.id).is_some());
        cache.put(&c);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&b.id).is_none());
        assert!(cache.get(&a.id).is_some());
        assert!(cache.get(&c.id).is_some());
    }
}

//! Bounded value cache keyed by block id
//!
//! Holds the last decoded value of a record head. The cache never evicts on
//! its own: once it is full, new keys are simply not cached until a slot is
//! freed by [`BlockCache::evict`] or [`BlockCache::clear`].

use crate::core::directory::BlockId;
use ahash::AHashMap;

pub const DEFAULT_CACHE_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct BlockCache<T> {
    values: AHashMap<BlockId, T>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

impl<T: Clone> BlockCache<T> {
    pub fn new(capacity: usize) -> Self {
        BlockCache {
            values: AHashMap::with_capacity(capacity.min(DEFAULT_CACHE_CAPACITY)),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    /// Cached value for `id`, cloned out of the cache
    pub fn get(&mut self, id: BlockId) -> Option<T> {
        match self.values.get(&id) {
            Some(value) => {
                self.hits += 1;
                Some(value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store `value` for `id`
    ///
    /// Existing keys are always refreshed. New keys are admitted only while
    /// there is room; returns whether the value was stored.
    pub fn insert(&mut self, id: BlockId, value: T) -> bool {
        if let Some(slot) = self.values.get_mut(&id) {
            *slot = value;
            return true;
        }
        if self.values.len() >= self.capacity {
            return false;
        }
        self.values.insert(id, value);
        true
    }

    pub fn evict(&mut self, id: BlockId) -> Option<T> {
        self.values.remove(&id)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.values.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            len: self.values.len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut cache = BlockCache::new(4);
        assert!(cache.insert(1, "a".to_string()));
        assert_eq!(cache.get(1), Some("a".to_string()));
        assert_eq!(cache.get(2), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_full_cache_rejects_new_keys() {
        let mut cache = BlockCache::new(2);
        assert!(cache.insert(1, 10));
        assert!(cache.insert(2, 20));
        assert!(!cache.insert(3, 30));
        assert!(!cache.contains(3));

        // existing keys still refresh when full
        assert!(cache.insert(1, 11));
        assert_eq!(cache.get(1), Some(11));
    }

    #[test]
    fn test_evict_frees_a_slot() {
        let mut cache = BlockCache::new(1);
        cache.insert(1, 10);
        assert!(!cache.insert(2, 20));
        assert_eq!(cache.evict(1), Some(10));
        assert!(cache.insert(2, 20));
    }

    #[test]
    fn test_clear() {
        let mut cache = BlockCache::new(8);
        for id in 0..8 {
            cache.insert(id, id);
        }
        assert_eq!(cache.len(), 8);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.insert(100, 100));
    }

    #[test]
    fn test_zero_capacity_caches_nothing() {
        let mut cache = BlockCache::new(0);
        assert!(!cache.insert(1, 1));
        assert_eq!(cache.get(1), None);
    }
}

//! LRU tile cache bounded by payload bytes

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;

use super::tile::TileKey;
use crate::error::{MapError, Result};

/// Cached tile payload
#[derive(Clone, Debug)]
pub struct TileRecord {
    pub key: TileKey,
    pub payload: Arc<[u8]>,
    pub size_bytes: usize,
}

impl TileRecord {
    pub fn new(key: TileKey, payload: Arc<[u8]>) -> Self {
        let size_bytes = payload.len();
        Self {
            key,
            payload,
            size_bytes,
        }
    }
}

struct CacheInner {
    tiles: LruCache<TileKey, TileRecord>,
    current_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    rejected: u64,
}

impl CacheInner {
    /// Evict the least recently used tile
    fn evict_oldest(&mut self) -> bool {
        match self.tiles.pop_lru() {
            Some((key, record)) => {
                self.current_size -= record.size_bytes;
                self.evictions += 1;
                log::debug!("Evicted tile {} ({} bytes)", key, record.size_bytes);
                true
            }
            None => false,
        }
    }
}

/// LRU cache for raw map tile payloads, shared between threads
///
/// Every operation holds the lock only for index bookkeeping; loading from
/// storage happens outside, and the caller decides whether to `put` the result.
pub struct TileCache {
    inner: Mutex<CacheInner>,
    max_size: usize,
}

impl TileCache {
    /// Create a new tile cache holding at most `max_size` payload bytes
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                tiles: LruCache::unbounded(),
                current_size: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                rejected: 0,
            }),
            max_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // Every mutation completes before the guard drops, so a poisoned lock is still consistent
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check if tile exists in cache without touching its recency
    pub fn contains(&self, key: &TileKey) -> bool {
        self.lock().tiles.contains(key)
    }

    /// Get a tile from cache, promoting it to most recently used
    pub fn get(&self, key: &TileKey) -> Option<TileRecord> {
        let mut inner = self.lock();
        match inner.tiles.get(key).cloned() {
            Some(record) => {
                inner.hits += 1;
                Some(record)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Get a tile without updating access order
    pub fn peek(&self, key: &TileKey) -> Option<TileRecord> {
        self.lock().tiles.peek(key).cloned()
    }

    /// Insert or replace a tile, evicting least recently used tiles until it fits
    ///
    /// A payload bigger than the whole budget is rejected and nothing is evicted.
    pub fn put(&self, key: TileKey, payload: Arc<[u8]>) -> Result<()> {
        let record = TileRecord::new(key, payload);
        let size = record.size_bytes;

        let mut inner = self.lock();
        if size > self.max_size {
            inner.rejected += 1;
            log::warn!(
                "Tile {} ({} bytes) exceeds cache capacity of {} bytes, not cached",
                key,
                size,
                self.max_size
            );
            return Err(MapError::CacheCapacityExceeded {
                size,
                capacity: self.max_size,
            });
        }

        // Replacing an entry releases its old size first
        if let Some(old) = inner.tiles.pop(&key) {
            inner.current_size -= old.size_bytes;
        }

        while inner.current_size + size > self.max_size {
            if !inner.evict_oldest() {
                break;
            }
        }

        inner.current_size += size;
        inner.tiles.push(key, record);
        Ok(())
    }

    /// Remove a specific tile from cache
    pub fn remove(&self, key: &TileKey) -> Option<TileRecord> {
        let mut inner = self.lock();
        let record = inner.tiles.pop(key)?;
        inner.current_size -= record.size_bytes;
        Some(record)
    }

    /// Clear all tiles from cache
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.tiles.clear();
        inner.current_size = 0;
    }

    /// Keys ordered from most to least recently used
    pub fn keys_by_recency(&self) -> Vec<TileKey> {
        self.lock().tiles.iter().map(|(key, _)| *key).collect()
    }

    pub fn current_size(&self) -> usize {
        self.lock().current_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.lock().tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tiles.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            tile_count: inner.tiles.len(),
            memory_used: inner.current_size,
            max_memory: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            rejected: inner.rejected,
        }
    }
}

/// Cache statistics for logging/status display
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub tile_count: usize,
    pub memory_used: usize,
    pub max_memory: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub rejected: u64,
}

impl CacheStats {
    pub fn memory_usage_percent(&self) -> f32 {
        if self.max_memory == 0 {
            0.0
        } else {
            (self.memory_used as f32 / self.max_memory as f32) * 100.0
        }
    }

    pub fn hit_rate(&self) -> f32 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f32 / lookups as f32
        }
    }
}

impl Default for TileCache {
    fn default() -> Self {
        // Default: 1MB, sized for the device's internal RAM
        Self::new(1024 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(n: u32) -> TileKey {
        TileKey::new(15, n, n)
    }

    fn payload(size: usize, fill: u8) -> Arc<[u8]> {
        vec![fill; size].into()
    }

    #[test]
    fn test_put_then_get_returns_payload() {
        let cache = TileCache::new(1000);
        cache.put(key(1), payload(10, 7)).unwrap();

        let record = cache.get(&key(1)).unwrap();
        assert_eq!(&*record.payload, &[7u8; 10][..]);
        assert_eq!(record.size_bytes, 10);
        assert_eq!(record.key, key(1));
    }

    #[test]
    fn test_repeated_put_does_not_double_count() {
        let cache = TileCache::new(1000);
        cache.put(key(1), payload(100, 1)).unwrap();
        cache.put(key(1), payload(100, 1)).unwrap();
        assert_eq!(cache.current_size(), 100);
        assert_eq!(cache.len(), 1);

        cache.put(key(1), payload(40, 2)).unwrap();
        assert_eq!(cache.current_size(), 40);
        assert_eq!(cache.get(&key(1)).unwrap().payload[0], 2);
    }

    #[test]
    fn test_evicts_oldest_when_full() {
        let cache = TileCache::new(1_000_000);
        for n in 0..4 {
            cache.put(key(n), payload(300_000, n as u8)).unwrap();
        }

        assert!(!cache.contains(&key(0)));
        assert!(cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
        assert_eq!(cache.current_size(), 900_000);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_get_promotes_entry() {
        let cache = TileCache::new(1_000_000);
        for n in 0..3 {
            cache.put(key(n), payload(300_000, 0)).unwrap();
        }
        assert!(cache.get(&key(0)).is_some());
        cache.put(key(3), payload(300_000, 0)).unwrap();

        assert!(cache.contains(&key(0)));
        assert!(!cache.contains(&key(1)));
        assert_eq!(cache.keys_by_recency(), vec![key(3), key(0), key(2)]);
    }

    #[test]
    fn test_contains_and_peek_keep_order() {
        let cache = TileCache::new(300);
        for n in 0..3 {
            cache.put(key(n), payload(100, 0)).unwrap();
        }
        assert!(cache.contains(&key(0)));
        assert!(cache.peek(&key(0)).is_some());
        cache.put(key(3), payload(100, 0)).unwrap();

        assert!(!cache.contains(&key(0)));
    }

    #[test]
    fn test_oversized_payload_is_rejected_without_eviction() {
        let cache = TileCache::new(500);
        cache.put(key(1), payload(200, 0)).unwrap();
        cache.put(key(2), payload(200, 0)).unwrap();

        let err = cache.put(key(3), payload(501, 0)).unwrap_err();
        assert!(matches!(
            err,
            MapError::CacheCapacityExceeded {
                size: 501,
                capacity: 500
            }
        ));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.current_size(), 400);
        assert!(!cache.contains(&key(3)));
        assert_eq!(cache.stats().rejected, 1);
    }

    #[test]
    fn test_lru_survivors_are_most_recent_that_fit() {
        let cache = TileCache::new(1000);
        let sizes = [300, 200, 450, 100, 250, 300, 50];
        for (n, size) in sizes.iter().enumerate() {
            cache.put(key(n as u32), payload(*size, 0)).unwrap();
            assert!(cache.current_size() <= 1000);
        }

        // Newest first: 50 + 300 + 250 + 100 = 700, adding 450 would exceed 1000
        assert_eq!(cache.keys_by_recency(), vec![key(6), key(5), key(4), key(3)]);
        assert_eq!(cache.current_size(), 700);
    }

    #[test]
    fn test_capacity_invariant_under_concurrency() {
        let cache = Arc::new(TileCache::new(10_000));
        let workers: Vec<_> = (0..4)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..500u32 {
                        let k = key((i * 7 + t) % 64);
                        if i % 3 == 0 {
                            let _ = cache.get(&k);
                        } else {
                            cache.put(k, payload(100 + (i as usize % 900), 0)).unwrap();
                        }
                        assert!(cache.current_size() <= 10_000);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let stats = cache.stats();
        assert!(stats.memory_used <= stats.max_memory);
        let total: usize = cache
            .keys_by_recency()
            .iter()
            .map(|k| cache.peek(k).unwrap().size_bytes)
            .sum();
        assert_eq!(total, stats.memory_used);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = TileCache::new(1000);
        cache.put(key(1), payload(100, 0)).unwrap();
        cache.put(key(2), payload(100, 0)).unwrap();

        assert!(cache.remove(&key(1)).is_some());
        assert_eq!(cache.current_size(), 100);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.current_size(), 0);
    }

    #[test]
    fn test_stats_hit_rate() {
        let cache = TileCache::default();
        cache.put(key(1), payload(10, 0)).unwrap();
        assert!(cache.get(&key(1)).is_some());
        assert!(cache.get(&key(2)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f32::EPSILON);
    }
}

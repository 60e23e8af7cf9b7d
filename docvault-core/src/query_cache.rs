// src/query_cache.rs
// Compiled filter caching with LRU eviction policy

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::error::Result;
use crate::metrics::Metrics;
use crate::query::Filter;

/// Parsed filters keyed by their source text
///
/// Filters are immutable once parsed, so cached entries never need
/// invalidation; the cache is shared by every collection of a database.
pub struct FilterCache {
    cache: Mutex<LruCache<String, Arc<Filter>>>,
    capacity: usize,
    metrics: Arc<Metrics>,
}

impl FilterCache {
    /// Create a cache holding at most `capacity` filters (minimum 1)
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        let capacity = capacity.max(1);
        let size = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        FilterCache {
            cache: Mutex::new(LruCache::new(size)),
            capacity,
            metrics,
        }
    }

    /// Return the parsed filter for `src`, parsing on a miss
    pub fn get_or_parse(&self, src: &str) -> Result<Arc<Filter>> {
        if let Some(filter) = self.cache.lock().get(src) {
            self.metrics.record_cache_hit();
            return Ok(Arc::clone(filter));
        }

        self.metrics.record_cache_miss();
        // parse outside the lock; two racing misses produce equal filters
        let filter = Arc::new(Filter::parse(src)?);
        self.cache
            .lock()
            .put(src.to_string(), Arc::clone(&filter));
        Ok(filter)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

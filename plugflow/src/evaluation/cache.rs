use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};
use lru::LruCache;
use once_cell::sync::{Lazy, OnceCell};

use super::hash::ContentHash;
use super::value::Value;
use crate::error::EngineError;
use crate::graph::PlugId;

pub const DEFAULT_VALUE_CACHE_MEMORY_LIMIT: usize = 1024 * 1024 * 1024;
pub const DEFAULT_HASH_CACHE_SIZE_LIMIT: usize = 128_000;

pub type SharedValueCache = Arc<ValueCache>;

static SHARED_VALUE_CACHE: Lazy<SharedValueCache> =
    Lazy::new(|| Arc::new(ValueCache::new(DEFAULT_VALUE_CACHE_MEMORY_LIMIT)));

struct CacheEntry {
    value: Arc<Value>,
    cost: usize,
}

struct ValueCacheState {
    entries: LruCache<ContentHash, CacheEntry>,
    current_cost: usize,
    max_cost: usize,
}

impl ValueCacheState {
    fn evict_to(&mut self, limit: usize) {
        while self.current_cost > limit {
            match self.entries.pop_lru() {
                Some((hash, entry)) => {
                    trace!("Evicting {} ({} bytes)", hash, entry.cost);
                    self.current_cost -= entry.cost;
                }
                None => break,
            }
        }
    }
}

/// Content addressed store of computed values, bounded by total memory cost
/// and evicting least recently used entries first.
///
/// Entries are never invalidated by graph edits; a value is found again only
/// if the same hash is produced.
pub struct ValueCache {
    state: Mutex<ValueCacheState>,
    /// Values currently being computed by `get_or_compute()`.
    in_flight: Mutex<HashMap<ContentHash, Arc<OnceCell<Arc<Value>>>>>,
}

impl ValueCache {
    pub fn new(max_cost: usize) -> Self {
        Self {
            state: Mutex::new(ValueCacheState {
                entries: LruCache::unbounded(),
                current_cost: 0,
                max_cost,
            }),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide instance used by graphs that aren't given their own.
    pub fn shared() -> SharedValueCache {
        SHARED_VALUE_CACHE.clone()
    }

    fn state(&self) -> MutexGuard<'_, ValueCacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, hash: &ContentHash) -> Option<Arc<Value>> {
        self.state().entries.get(hash).map(|entry| entry.value.clone())
    }

    /// Stores `value` under `hash`. Values costing more than the whole budget
    /// are not stored.
    pub fn put(&self, hash: ContentHash, value: Arc<Value>, cost: usize) {
        let mut state = self.state();
        if cost > state.max_cost {
            debug!("Not caching {}: cost {} exceeds limit {}", hash, cost, state.max_cost);
            return;
        }
        if let Some(previous) = state.entries.put(hash, CacheEntry { value, cost }) {
            state.current_cost -= previous.cost;
        }
        state.current_cost += cost;
        let limit = state.max_cost;
        state.evict_to(limit);
    }

    /// Returns the value cached under `hash`, running `compute` to produce
    /// it if necessary. Concurrent callers for the same hash wait for the
    /// first caller's compute and share its result. A failed compute is not
    /// shared; each waiter then tries for itself.
    pub fn get_or_compute<F>(&self, hash: ContentHash, compute: F) -> Result<Arc<Value>, EngineError>
    where
        F: FnOnce() -> Result<Arc<Value>, EngineError>,
    {
        let cell = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(hash)
            .or_default()
            .clone();

        let result = cell
            .get_or_try_init(|| {
                if let Some(value) = self.get(&hash) {
                    return Ok(value);
                }
                let value = compute()?;
                self.put(hash, value.clone(), value.memory_usage());
                Ok(value)
            })
            .cloned();

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight.get(&hash).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
            in_flight.remove(&hash);
        }
        result
    }

    pub fn max_cost(&self) -> usize {
        self.state().max_cost
    }

    pub fn set_max_cost(&self, max_cost: usize) {
        let mut state = self.state();
        state.max_cost = max_cost;
        state.evict_to(max_cost);
    }

    /// Memory currently held by cached values, in bytes.
    pub fn current_cost(&self) -> usize {
        self.state().current_cost
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.current_cost = 0;
    }
}

impl Default for ValueCache {
    fn default() -> Self {
        Self::new(DEFAULT_VALUE_CACHE_MEMORY_LIMIT)
    }
}

/// Key for a memoised hash: the plug, its dirty generation when the hash was
/// produced, and the context hash.
pub(crate) type HashCacheKey = (PlugId, u64, ContentHash);

/// Per graph memo of plug hashes. A bumped dirty generation makes the old
/// entries unreachable, and they age out through the LRU.
pub(crate) struct HashCache {
    entries: Mutex<LruCache<HashCacheKey, ContentHash>>,
}

impl HashCache {
    pub(crate) fn new(size_limit: usize) -> Self {
        let capacity = NonZeroUsize::new(size_limit.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<HashCacheKey, ContentHash>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self, key: &HashCacheKey) -> Option<ContentHash> {
        self.entries().get(key).copied()
    }

    pub(crate) fn put(&self, key: HashCacheKey, hash: ContentHash) {
        self.entries().put(key, hash);
    }

    pub(crate) fn set_size_limit(&self, size_limit: usize) {
        let capacity = NonZeroUsize::new(size_limit.max(1)).unwrap_or(NonZeroUsize::MIN);
        self.entries().resize(capacity);
    }

    pub(crate) fn clear(&self) {
        self.entries().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: i64) -> (ContentHash, Arc<Value>) {
        (ContentHash::of(&n), Arc::new(Value::Int(n)))
    }

    #[test]
    fn evicts_least_recently_used_when_over_budget() {
        let cache = ValueCache::new(30);
        let (h1, v1) = entry(1);
        let (h2, v2) = entry(2);
        let (h3, v3) = entry(3);
        cache.put(h1, v1, 10);
        cache.put(h2, v2, 10);
        assert!(cache.get(&h1).is_some());
        cache.put(h3, v3, 15);

        assert!(cache.get(&h1).is_some());
        assert!(cache.get(&h2).is_none());
        assert!(cache.get(&h3).is_some());
        assert_eq!(cache.current_cost(), 25);
    }

    #[test]
    fn get_or_compute_caches_successes_only() {
        let cache = ValueCache::new(1 << 20);
        let (h, v) = entry(4);
        assert!(cache.get_or_compute(h, || Err(EngineError::compute("failed"))).is_err());
        assert!(cache.is_empty());

        assert_eq!(cache.get_or_compute(h, || Ok(v.clone())).unwrap(), v);
        assert_eq!(cache.get_or_compute(h, || panic!("computed twice")).unwrap(), v);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn oversized_values_are_not_cached() {
        let cache = ValueCache::new(8);
        let (h, v) = entry(7);
        cache.put(h, v, 9);
        assert!(cache.is_empty());
        assert_eq!(cache.current_cost(), 0);
    }

    #[test]
    fn lowering_max_cost_evicts() {
        let cache = ValueCache::new(100);
        for n in 0..10 {
            let (h, v) = entry(n);
            cache.put(h, v, 10);
        }
        assert_eq!(cache.current_cost(), 100);
        cache.set_max_cost(35);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.current_cost(), 30);
        cache.clear();
        assert_eq!(cache.current_cost(), 0);
    }

    #[test]
    fn replacing_an_entry_keeps_cost_consistent() {
        let cache = ValueCache::new(100);
        let (h, v) = entry(1);
        cache.put(h, v.clone(), 10);
        cache.put(h, v, 20);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.current_cost(), 20);
    }

    #[test]
    fn hash_cache_is_bounded() {
        let cache = HashCache::new(2);
        for n in 0..3u32 {
            cache.put((PlugId(n), 0, ContentHash::new()), ContentHash::of(&n));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&(PlugId(0), 0, ContentHash::new())).is_none());
        assert!(cache.get(&(PlugId(0), 1, ContentHash::new())).is_none());
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}

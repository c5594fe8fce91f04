//! Bounded LRU cache of compiled evaluators, keyed by path.
//!
//! # Staleness
//!
//! A hit returns the cached evaluator unchanged. Policy text re-saved in the
//! store after the path was loaded is not seen until the entry is evicted,
//! invalidated, or the cache is dropped.
//!
//! # Concurrency
//!
//! The map and recency index sit behind one mutex that is never held while
//! an evaluator is built, queried, or released. Two concurrent misses on the
//! same path may both build an evaluator; the later insert wins.
//!
//! # Release
//!
//! Handles are reference counted. An evaluator that leaves the cache
//! (eviction, replacement, invalidation, clear) is released as soon as the
//! last caller still holding its handle lets go, so an in-flight query always
//! finishes on a live evaluator.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use papl_core::{PaplResult, PolicyCacheConfig};
use papl_storage::VersionedStore;

use crate::evaluator::{EvaluatorFactory, PolicyEvaluator};
use crate::handle::EvaluatorHandle;

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of lookups that went to the store.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry<E: PolicyEvaluator> {
    handle: Arc<EvaluatorHandle<E>>,
    tick: u64,
}

/// Map plus recency index. `recency` maps last-use tick to path; the first
/// key is the least recently used entry.
struct LruState<E: PolicyEvaluator> {
    entries: HashMap<String, Entry<E>>,
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    stats: CacheStats,
}

impl<E: PolicyEvaluator> LruState<E> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            stats: CacheStats::default(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    /// Look up `path` and mark it most recently used.
    fn touch(&mut self, path: &str) -> Option<Arc<EvaluatorHandle<E>>> {
        let tick = self.tick();
        let entry = self.entries.get_mut(path)?;
        self.recency.remove(&entry.tick);
        entry.tick = tick;
        self.recency.insert(tick, path.to_string());
        Some(Arc::clone(&entry.handle))
    }

    /// Insert and trim to `capacity`. Returns every handle that left the map.
    fn insert(
        &mut self,
        path: &str,
        handle: Arc<EvaluatorHandle<E>>,
        capacity: usize,
    ) -> Vec<Arc<EvaluatorHandle<E>>> {
        let mut displaced = Vec::new();
        let tick = self.tick();
        if let Some(old) = self.entries.insert(path.to_string(), Entry { handle, tick }) {
            self.recency.remove(&old.tick);
            displaced.push(old.handle);
        }
        self.recency.insert(tick, path.to_string());

        while self.entries.len() > capacity {
            let Some((_, lru_path)) = self.recency.pop_first() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&lru_path) {
                tracing::debug!(path = %lru_path, "evicting least recently used evaluator");
                self.stats.evictions += 1;
                displaced.push(evicted.handle);
            }
        }
        displaced
    }

    fn remove(&mut self, path: &str) -> Option<Arc<EvaluatorHandle<E>>> {
        let entry = self.entries.remove(path)?;
        self.recency.remove(&entry.tick);
        Some(entry.handle)
    }

    fn drain(&mut self) -> Vec<Arc<EvaluatorHandle<E>>> {
        self.recency.clear();
        self.entries.drain().map(|(_, entry)| entry.handle).collect()
    }
}

/// Capacity-bounded map from path to a live evaluator.
///
/// Evaluators are built from the policy text stored at their path by the
/// configured [`EvaluatorFactory`].
pub struct PolicyEngineCache<F: EvaluatorFactory> {
    store: Arc<dyn VersionedStore>,
    factory: F,
    capacity: usize,
    state: Mutex<LruState<F::Evaluator>>,
}

impl<F: EvaluatorFactory> PolicyEngineCache<F> {
    /// Create a cache holding at most `capacity` evaluators (minimum 1).
    pub fn new(store: Arc<dyn VersionedStore>, factory: F, capacity: usize) -> Self {
        Self {
            store,
            factory,
            capacity: capacity.max(1),
            state: Mutex::new(LruState::new()),
        }
    }

    pub fn from_config(
        store: Arc<dyn VersionedStore>,
        factory: F,
        config: &PolicyCacheConfig,
    ) -> Self {
        Self::new(store, factory, config.capacity)
    }

    fn lock(&self) -> MutexGuard<'_, LruState<F::Evaluator>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the evaluator for `path`, building it on a miss.
    ///
    /// On a miss the policy text is read from the store. Absent or empty text
    /// yields `Ok(None)` and nothing is cached. Otherwise a fresh evaluator is
    /// created and `bind` loads the policy text into it before insertion.
    ///
    /// # Errors
    ///
    /// Returns the factory's or `bind`'s error. A partially bound evaluator
    /// is released and not cached.
    pub fn get_or_load<B>(
        &self,
        path: &str,
        bind: B,
    ) -> PaplResult<Option<Arc<EvaluatorHandle<F::Evaluator>>>>
    where
        B: FnOnce(&mut F::Evaluator, &str) -> PaplResult<()>,
    {
        {
            let mut state = self.lock();
            if let Some(handle) = state.touch(path) {
                state.stats.hits += 1;
                tracing::trace!(path, "evaluator cache hit");
                return Ok(Some(handle));
            }
            state.stats.misses += 1;
        }

        let policy = match self.store.get(path) {
            Some(text) if !text.is_empty() => text,
            _ => {
                tracing::debug!(path, "no policy stored at path");
                return Ok(None);
            }
        };

        let mut evaluator = self.factory.create()?;
        if let Err(e) = bind(&mut evaluator, &policy) {
            evaluator.release();
            return Err(e);
        }

        let handle = Arc::new(EvaluatorHandle::new(path, evaluator));
        let displaced = self.lock().insert(path, Arc::clone(&handle), self.capacity);
        tracing::debug!(path, displaced = displaced.len(), "evaluator cached");
        drop(displaced);
        Ok(Some(handle))
    }

    /// Whether `path` is cached. Does not affect recency.
    pub fn contains(&self, path: &str) -> bool {
        self.lock().entries.contains_key(path)
    }

    /// Remove the evaluator cached for `path`.
    pub fn invalidate(&self, path: &str) -> bool {
        let removed = self.lock().remove(path);
        removed.is_some()
    }

    /// Remove every cached evaluator. Returns how many were cached.
    pub fn clear(&self) -> usize {
        let drained = self.lock().drain();
        drained.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn store(&self) -> &Arc<dyn VersionedStore> {
        &self.store
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entry_count: state.entries.len() as u64,
            ..state.stats
        }
    }
}

//! In-memory versioned store.
//!
//! Histories live in a `BTreeMap`, which gives key-ordered range listings for
//! free. The whole map sits behind one mutex; closing the store drops the map
//! and leaves `None` behind.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use papl_core::{SaveStatus, Stamp, StampBound, VersionedRecord, VersionedValue};

use crate::history::KeyHistory;
use crate::VersionedStore;

type Histories = BTreeMap<String, KeyHistory>;

/// Process-lifetime store.
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<Option<Histories>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty, open store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Some(Histories::new())),
        }
    }

    /// Create a store that behaves as already closed.
    pub fn uninitialized() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Histories>> {
        // A panic while holding the lock cannot leave a history half-written:
        // every mutation is a single push/flag flip or map removal.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the open state, or return `closed` if the store is closed.
    fn with_state<R>(&self, closed: R, f: impl FnOnce(&mut Histories) -> R) -> R {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(histories) => f(histories),
            None => closed,
        }
    }
}

impl VersionedStore for MemoryStore {
    fn save(&self, key: &str, value: &str, version: &str, stamp: Stamp) -> SaveStatus {
        self.with_state(SaveStatus::UNINITIALIZED, |histories| {
            histories
                .entry(key.to_string())
                .or_default()
                .push(value, version, stamp);
            SaveStatus::WRITTEN
        })
    }

    fn delete(&self, key: &str) -> bool {
        self.with_state(false, |histories| {
            histories.get_mut(key).is_some_and(KeyHistory::tombstone)
        })
    }

    fn version_value(&self, key: &str) -> Option<VersionedValue> {
        self.with_state(None, |histories| {
            histories.get(key).and_then(KeyHistory::latest_value)
        })
    }

    fn value_at(&self, key: &str, at: Stamp) -> Option<VersionedRecord> {
        self.with_state(None, |histories| {
            histories.get(key).and_then(|h| h.value_at(key, at))
        })
    }

    fn history(&self, key: &str) -> Vec<VersionedRecord> {
        self.with_state(Vec::new(), |histories| {
            histories
                .get(key)
                .map(|h| h.records(key))
                .unwrap_or_default()
        })
    }

    fn keys_matching(&self, bound: StampBound) -> Vec<String> {
        self.with_state(Vec::new(), |histories| {
            histories
                .iter()
                .filter(|(_, h)| h.listed_by(bound))
                .map(|(k, _)| k.clone())
                .collect()
        })
    }

    fn evict_matching(&self, bound: StampBound) -> usize {
        self.with_state(0, |histories| {
            let mut evicted = 0;
            histories.retain(|_, h| {
                if !h.evictable_by(bound) {
                    return true;
                }
                if h.is_live() {
                    evicted += 1;
                }
                false
            });
            tracing::debug!(?bound, evicted, "evicted keys from memory store");
            evicted
        })
    }

    fn len(&self) -> usize {
        self.with_state(0, |histories| {
            histories.values().filter(|h| h.is_live()).count()
        })
    }

    fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    fn close(&self) {
        if self.lock().take().is_some() {
            tracing::info!("memory store closed");
        }
    }
}

//! LMDB-backed versioned store.
//!
//! Uses the heed crate (Rust bindings for LMDB). Each key maps to one
//! JSON-encoded [`KeyHistory`] in a single named database, so a save is one
//! read-modify-write inside a write transaction.
//!
//! LMDB keys are derived from logical keys so that empty
//! and arbitrarily long keys store the same as in memory. Listings decode
//! the logical key from each value and sort by it.
//!
//! # Thread Safety
//!
//! LMDB already serializes writers, but the store also keeps its environment
//! behind a per-instance mutex so that `close` cannot race an in-flight
//! operation. A closed store holds `None` and every operation degrades to
//! its empty result.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use papl_core::{
    PaplError, SaveStatus, Stamp, StampBound, StoreError, VersionedRecord, VersionedValue,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::history::KeyHistory;
use crate::VersionedStore;

const HISTORIES_DB: &str = "histories";

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// A stored history could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for PaplError {
    fn from(e: LmdbStoreError) -> Self {
        let store_error = match e {
            LmdbStoreError::Io(io) => StoreError::Io {
                reason: io.to_string(),
            },
            LmdbStoreError::Serialization(reason) => StoreError::Serialization { reason },
            other => StoreError::Backend {
                reason: other.to_string(),
            },
        };
        PaplError::Store(store_error)
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// Longest logical key stored under its own bytes. Longer keys are stored
/// under their SHA-256 digest, which keeps every LMDB key non-empty and well
/// below the 511-byte limit.
const INLINE_KEY_MAX: usize = 256;

const INLINE_TAG: u8 = b'k';
const DIGEST_TAG: u8 = b'h';

/// LMDB key for a logical key.
fn slot_key(key: &str) -> Vec<u8> {
    let mut slot = Vec::with_capacity(1 + key.len().min(INLINE_KEY_MAX));
    if key.len() <= INLINE_KEY_MAX {
        slot.push(INLINE_TAG);
        slot.extend_from_slice(key.as_bytes());
    } else {
        slot.push(DIGEST_TAG);
        slot.extend_from_slice(&Sha256::digest(key.as_bytes()));
    }
    slot
}

/// Value stored per slot. The logical key travels with its history because
/// digest slots cannot be turned back into keys.
#[derive(Serialize, Deserialize)]
struct StoredHistory {
    key: String,
    history: KeyHistory,
}

struct LmdbHandle {
    env: Env,
    histories: Database<Bytes, Bytes>,
}

impl LmdbHandle {
    fn read(&self, txn: &RoTxn, key: &str) -> Result<Option<KeyHistory>, LmdbStoreError> {
        match self.histories.get(txn, &slot_key(key)).map_err(txn_err)? {
            Some(bytes) => {
                let stored = decode(bytes)?;
                Ok((stored.key == key).then_some(stored.history))
            }
            None => Ok(None),
        }
    }

    fn write(&self, txn: &mut RwTxn, key: &str, history: KeyHistory) -> Result<(), LmdbStoreError> {
        let stored = StoredHistory {
            key: key.to_string(),
            history,
        };
        let encoded = encode(&stored)?;
        self.histories
            .put(txn, &slot_key(key), &encoded)
            .map_err(txn_err)
    }

    fn load(&self, key: &str) -> Result<Option<KeyHistory>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.read(&rtxn, key)
    }

    fn save(&self, key: &str, value: &str, version: &str, stamp: Stamp) -> Result<(), LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut history = self.read(&wtxn, key)?.unwrap_or_default();
        history.push(value, version, stamp);
        self.write(&mut wtxn, key, history)?;
        wtxn.commit().map_err(txn_err)
    }

    fn delete(&self, key: &str) -> Result<bool, LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let Some(mut history) = self.read(&wtxn, key)? else {
            return Ok(false);
        };
        if !history.tombstone() {
            return Ok(false);
        }
        self.write(&mut wtxn, key, history)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(true)
    }

    /// Every stored history, sorted by logical key.
    fn scan(&self) -> Result<Vec<(String, KeyHistory)>, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut all = Vec::new();
        for entry in self.histories.iter(&rtxn).map_err(txn_err)? {
            let (_, bytes) = entry.map_err(txn_err)?;
            let stored = decode(bytes)?;
            all.push((stored.key, stored.history));
        }
        all.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(all)
    }

    fn evict(&self, bound: StampBound) -> Result<usize, LmdbStoreError> {
        let mut doomed = Vec::new();
        let mut live = 0;
        for (key, history) in self.scan()? {
            if history.evictable_by(bound) {
                if history.is_live() {
                    live += 1;
                }
                doomed.push(slot_key(&key));
            }
        }

        if doomed.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        for slot in &doomed {
            self.histories.delete(&mut wtxn, slot).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        Ok(live)
    }
}

fn decode(bytes: &[u8]) -> Result<StoredHistory, LmdbStoreError> {
    serde_json::from_slice(bytes).map_err(|e| LmdbStoreError::Serialization(e.to_string()))
}

fn encode(stored: &StoredHistory) -> Result<Vec<u8>, LmdbStoreError> {
    serde_json::to_vec(stored).map_err(|e| LmdbStoreError::Serialization(e.to_string()))
}

/// Durable store on an LMDB environment directory.
///
/// # Example
///
/// ```ignore
/// use papl_storage::{LmdbStore, VersionedStore};
///
/// let store = LmdbStore::open("/var/lib/papl/store", 64)?;
/// store.save("app/config.json", "{}", "v1", 1);
/// store.close();
/// ```
pub struct LmdbStore {
    path: PathBuf,
    handle: Mutex<Option<LmdbHandle>>,
}

impl std::fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbStore")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

impl LmdbStore {
    /// Open (or create) the environment at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - The histories database cannot be created
    pub fn open<P: AsRef<Path>>(path: P, map_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;
        let map_size = map_size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            LmdbStoreError::EnvOpen(format!("map size of {} MiB overflows", map_size_mb))
        })?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let histories: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(HISTORIES_DB))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        tracing::info!(path = %path.as_ref().display(), map_size_mb, "lmdb store opened");

        Ok(Self {
            path: path.as_ref().to_path_buf(),
            handle: Mutex::new(Some(LmdbHandle { env, histories })),
        })
    }

    /// Directory holding the environment.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<LmdbHandle>> {
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `op` against the open handle. Closed stores and backend failures
    /// both yield `fallback`; failures are logged.
    fn with_handle<R>(
        &self,
        what: &'static str,
        fallback: R,
        op: impl FnOnce(&LmdbHandle) -> Result<R, LmdbStoreError>,
    ) -> R {
        let guard = self.lock();
        let Some(handle) = guard.as_ref() else {
            return fallback;
        };
        match op(handle) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(operation = what, error = %e, "lmdb store operation failed");
                fallback
            }
        }
    }
}

impl VersionedStore for LmdbStore {
    fn save(&self, key: &str, value: &str, version: &str, stamp: Stamp) -> SaveStatus {
        let guard = self.lock();
        let Some(handle) = guard.as_ref() else {
            return SaveStatus::UNINITIALIZED;
        };
        match handle.save(key, value, version, stamp) {
            Ok(()) => SaveStatus::WRITTEN,
            Err(e) => {
                tracing::warn!(key, error = %e, "lmdb save failed");
                SaveStatus::BACKEND_FAILURE
            }
        }
    }

    fn delete(&self, key: &str) -> bool {
        self.with_handle("delete", false, |h| h.delete(key))
    }

    fn version_value(&self, key: &str) -> Option<VersionedValue> {
        self.with_handle("version_value", None, |h| {
            Ok(h.load(key)?.and_then(|history| history.latest_value()))
        })
    }

    fn value_at(&self, key: &str, at: Stamp) -> Option<VersionedRecord> {
        self.with_handle("value_at", None, |h| {
            Ok(h.load(key)?.and_then(|history| history.value_at(key, at)))
        })
    }

    fn history(&self, key: &str) -> Vec<VersionedRecord> {
        self.with_handle("history", Vec::new(), |h| {
            Ok(h.load(key)?
                .map(|history| history.records(key))
                .unwrap_or_default())
        })
    }

    fn keys_matching(&self, bound: StampBound) -> Vec<String> {
        self.with_handle("keys_matching", Vec::new(), |h| {
            Ok(h
                .scan()?
                .into_iter()
                .filter(|(_, history)| history.listed_by(bound))
                .map(|(key, _)| key)
                .collect())
        })
    }

    fn evict_matching(&self, bound: StampBound) -> usize {
        let evicted = self.with_handle("evict_matching", 0, |h| h.evict(bound));
        tracing::debug!(?bound, evicted, "evicted keys from lmdb store");
        evicted
    }

    fn len(&self) -> usize {
        self.with_handle("len", 0, |h| {
            Ok(h.scan()?.iter().filter(|(_, history)| history.is_live()).count())
        })
    }

    fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    fn close(&self) {
        let Some(handle) = self.lock().take() else {
            return;
        };
        // Blocks until every clone of the environment is gone, after which
        // the same directory may be opened again.
        handle.env.prepare_for_closing().wait();
        tracing::info!(path = %self.path.display(), "lmdb store closed");
    }
}

impl Drop for LmdbStore {
    fn drop(&mut self) {
        self.close();
    }
}

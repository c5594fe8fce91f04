//! PAPL Storage - Versioned Store Contract and Backends
//!
//! Defines the [`VersionedStore`] contract and two interchangeable backends:
//! - [`MemoryStore`]: lives for the lifetime of the process
//! - [`LmdbStore`]: LMDB environment on disk, survives restart
//!
//! # Failure Semantics
//!
//! No store operation returns an error. Operations on a closed store, and
//! backend failures, degrade to absent / zero / empty results (and a failing
//! [`SaveStatus`]), so resolution logic treats "no store" exactly like
//! "empty store". Backend failures are logged through `tracing`.
//!
//! # Locking
//!
//! Every store instance serializes all of its operations behind one
//! per-instance mutex. Nothing is process-global.

pub mod history;
pub mod lmdb;
pub mod memory;

pub use history::{KeyHistory, StoredVersion};
pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::MemoryStore;

use papl_core::{
    ConfigError, Page, PaplResult, SaveStatus, Stamp, StampBound, StoreBackend, StoreConfig,
    VersionedRecord, VersionedValue,
};
use std::sync::Arc;

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// Keyed storage with per-key version history and stamp-range operations.
///
/// Implementations must behave identically; swapping one backend for another
/// must not change any observable result.
pub trait VersionedStore: Send + Sync {
    // === Writes ===

    /// Append a new version of `key`.
    ///
    /// Fails only when the store is closed or the backend refuses the write.
    /// There is no conflict detection: every version is retained until
    /// evicted, and reads see the one with the greatest stamp.
    fn save(&self, key: &str, value: &str, version: &str, stamp: Stamp) -> SaveStatus;

    /// Tombstone `key`. History is kept until evicted.
    ///
    /// Returns true if a live key was hidden.
    fn delete(&self, key: &str) -> bool;

    // === Latest-version reads ===

    /// Value of the latest live version.
    fn get(&self, key: &str) -> Option<String> {
        self.version_value(key).map(|vv| vv.value)
    }

    /// Version label of the latest live version.
    fn version(&self, key: &str) -> Option<String> {
        self.version_value(key).map(|vv| vv.version)
    }

    /// Latest live `(version, value)` pair.
    fn version_value(&self, key: &str) -> Option<VersionedValue>;

    // === History reads ===

    /// Latest version with `stamp <= at`, if the key is live.
    fn value_at(&self, key: &str, at: Stamp) -> Option<VersionedRecord>;

    /// Every retained version of `key` in stamp order, including versions
    /// of a tombstoned key that has not been evicted yet.
    fn history(&self, key: &str) -> Vec<VersionedRecord>;

    // === Range operations ===

    /// Live keys whose latest stamp satisfies `bound`, in key order.
    fn keys_matching(&self, bound: StampBound) -> Vec<String>;

    /// Permanently remove every key whose latest stamp satisfies `bound`.
    ///
    /// Tombstoned histories matching `bound` are purged as well, but only
    /// live keys are counted, so the count equals the number of keys
    /// [`keys_matching`](Self::keys_matching) reported beforehand.
    fn evict_matching(&self, bound: StampBound) -> usize;

    /// Live keys whose latest stamp is `<= stamp`.
    fn all_keys_le(&self, stamp: Stamp) -> Vec<String> {
        self.keys_matching(StampBound::AtMost(stamp))
    }

    /// Live keys whose latest stamp is `>= stamp`.
    fn all_keys_be(&self, stamp: Stamp) -> Vec<String> {
        self.keys_matching(StampBound::AtLeast(stamp))
    }

    /// 0-based page of [`all_keys_le`](Self::all_keys_le).
    fn all_keys_le_paged(&self, stamp: Stamp, page: usize, size: usize) -> Vec<String> {
        Page::new(page, size).apply(self.all_keys_le(stamp))
    }

    /// 0-based page of [`all_keys_be`](Self::all_keys_be).
    fn all_keys_be_paged(&self, stamp: Stamp, page: usize, size: usize) -> Vec<String> {
        Page::new(page, size).apply(self.all_keys_be(stamp))
    }

    fn evict_le(&self, stamp: Stamp) -> usize {
        self.evict_matching(StampBound::AtMost(stamp))
    }

    fn evict_be(&self, stamp: Stamp) -> usize {
        self.evict_matching(StampBound::AtLeast(stamp))
    }

    // === Lifecycle ===

    /// Number of live keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_open(&self) -> bool;

    /// Release the underlying handle. Closing twice is a no-op.
    fn close(&self);
}

// ============================================================================
// FACTORY
// ============================================================================

/// Open the backend selected by `config`.
pub fn open_store(config: &StoreConfig) -> PaplResult<Arc<dyn VersionedStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Lmdb => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| ConfigError::MissingRequired {
                    field: "store.path".to_string(),
                })?;
            let store = LmdbStore::open(path, config.map_size_mb)?;
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    /// Run `check` against a fresh store of every backend.
    fn for_each_backend(check: impl Fn(&dyn VersionedStore)) {
        let memory = MemoryStore::new();
        check(&memory);

        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let lmdb = LmdbStore::open(temp_dir.path(), 10).expect("lmdb should open");
        check(&lmdb);
        lmdb.close();
    }

    #[test]
    fn test_save_get_roundtrip() {
        for_each_backend(|store| {
            assert!(store.save("hello", "world", "1", 1).is_success());
            assert_eq!(store.get("hello").as_deref(), Some("world"));
            assert_eq!(store.version("hello").as_deref(), Some("1"));
            assert_eq!(
                store.version_value("hello"),
                Some(VersionedValue {
                    version: "1".to_string(),
                    value: "world".to_string(),
                })
            );
        });
    }

    #[test]
    fn test_get_absent_key() {
        for_each_backend(|store| {
            assert!(store.get("missing").is_none());
            assert!(store.version("missing").is_none());
            assert!(store.version_value("missing").is_none());
            assert!(!store.delete("missing"));
        });
    }

    #[test]
    fn test_later_stamp_wins() {
        for_each_backend(|store| {
            for i in 0..20 {
                store.save("hello", &format!("world{}", i), &i.to_string(), i);
            }
            assert_eq!(store.get("hello").as_deref(), Some("world19"));
            assert_eq!(store.version("hello").as_deref(), Some("19"));
            assert_eq!(store.history("hello").len(), 20);
        });
    }

    #[test]
    fn test_out_of_order_stamp_does_not_win() {
        for_each_backend(|store| {
            store.save("k", "new", "2", 20);
            store.save("k", "old", "1", 10);
            assert_eq!(store.get("k").as_deref(), Some("new"));
        });
    }

    #[test]
    fn test_delete_tombstones() {
        for_each_backend(|store| {
            store.save("hello", "world", "1", 1);
            assert!(store.delete("hello"));
            assert!(store.get("hello").is_none());
            assert!(store.version("hello").is_none());
            assert!(store.all_keys_be(0).is_empty());
            assert_eq!(store.history("hello").len(), 1, "history retained");
            assert_eq!(store.len(), 0);

            store.save("hello", "again", "2", 2);
            assert_eq!(store.get("hello").as_deref(), Some("again"));
        });
    }

    #[test]
    fn test_older_save_after_delete_stays_deleted() {
        for_each_backend(|store| {
            store.save("k", "v1", "1", 10);
            assert!(store.delete("k"));
            store.save("k", "v0", "0", 5);

            assert_eq!(store.get("k").as_deref(), Some("v0"));
            assert_eq!(store.value_at("k", 10).map(|r| r.value), Some("v0".to_string()));
            assert_eq!(store.all_keys_le(5), vec!["k"]);
            assert!(store.all_keys_be(6).is_empty());
            assert_eq!(store.history("k").len(), 2);

            assert_eq!(store.evict_be(6), 0);
            assert_eq!(store.evict_le(5), 1);
            assert!(store.history("k").is_empty());
        });
    }

    #[test]
    fn test_long_and_empty_keys() {
        for_each_backend(|store| {
            let deep = format!("{}c.txt", "seg/".repeat(150));
            let deeper = format!("{}d.txt", "seg/".repeat(150));
            assert!(store.save(&deep, "deep", "1", 1).is_success());
            assert!(store.save(&deeper, "deeper", "1", 2).is_success());
            assert!(store.save("", "root", "1", 3).is_success());

            assert_eq!(store.get(&deep).as_deref(), Some("deep"));
            assert_eq!(store.get("").as_deref(), Some("root"));
            assert_eq!(store.all_keys_le(3), vec![String::new(), deep.clone(), deeper.clone()]);
            assert!(store.delete(&deeper));
            assert_eq!(store.len(), 2);
            assert_eq!(store.evict_le(1), 1);
            assert!(store.history(&deep).is_empty());
        });
    }

    #[test]
    fn test_all_keys_le_be() {
        for_each_backend(|store| {
            store.save("hello", "world", "1", 1);
            store.save("hello1", "world", "1", 2);
            store.save("hello2", "world", "1", 3);

            assert_eq!(store.all_keys_le(2), vec!["hello", "hello1"]);
            assert_eq!(store.all_keys_be(2), vec!["hello1", "hello2"]);
        });
    }

    #[test]
    fn test_range_uses_latest_stamp_only() {
        for_each_backend(|store| {
            store.save("k", "v1", "1", 1);
            store.save("k", "v2", "2", 10);
            assert!(store.all_keys_le(5).is_empty());
            assert_eq!(store.all_keys_be(5), vec!["k"]);
        });
    }

    #[test]
    fn test_paged_listing() {
        for_each_backend(|store| {
            for (i, key) in ["e", "a", "d", "b", "c"].iter().enumerate() {
                store.save(key, "v", "1", i as Stamp);
            }
            assert_eq!(store.all_keys_be_paged(0, 0, 2), vec!["a", "b"]);
            assert_eq!(store.all_keys_be_paged(0, 1, 2), vec!["c", "d"]);
            assert_eq!(store.all_keys_be_paged(0, 2, 2), vec!["e"]);
            assert!(store.all_keys_be_paged(0, 3, 2).is_empty());
            assert!(store.all_keys_be_paged(0, 0, 0).is_empty());
            assert_eq!(store.all_keys_le_paged(2, 0, 10), vec!["a", "d", "e"]);
        });
    }

    #[test]
    fn test_evict_le() {
        for_each_backend(|store| {
            store.save("a", "v", "1", 1);
            store.save("b", "v", "1", 2);
            store.save("c", "v", "1", 3);

            let before = store.all_keys_le(2);
            assert_eq!(store.evict_le(2), before.len());
            assert!(store.all_keys_le(2).is_empty());
            assert!(store.get("a").is_none());
            assert!(store.history("a").is_empty(), "evicted keys behave as never saved");
            assert_eq!(store.get("c").as_deref(), Some("v"));
        });
    }

    #[test]
    fn test_evict_be_purges_tombstoned_history() {
        for_each_backend(|store| {
            store.save("live", "v", "1", 5);
            store.save("gone", "v", "1", 6);
            store.delete("gone");

            assert_eq!(store.evict_be(5), 1, "only live keys are counted");
            assert!(store.history("gone").is_empty());
            assert!(store.history("live").is_empty());
        });
    }

    #[test]
    fn test_value_at() {
        for_each_backend(|store| {
            store.save("k", "v1", "1", 10);
            store.save("k", "v2", "2", 20);
            assert!(store.value_at("k", 9).is_none());
            assert_eq!(store.value_at("k", 15).map(|r| r.value), Some("v1".to_string()));
            assert_eq!(store.value_at("k", 20).map(|r| r.value), Some("v2".to_string()));
        });
    }

    #[test]
    fn test_closed_store_is_safe_noop() {
        for_each_backend(|store| {
            store.save("k", "v", "1", 1);
            store.close();
            store.close();

            assert!(!store.is_open());
            assert!(!store.save("k", "v", "1", 2).is_success());
            assert!(store.get("k").is_none());
            assert!(store.version_value("k").is_none());
            assert!(!store.delete("k"));
            assert!(store.all_keys_le(10).is_empty());
            assert!(store.all_keys_be_paged(0, 0, 10).is_empty());
            assert_eq!(store.evict_le(10), 0);
            assert!(store.history("k").is_empty());
            assert_eq!(store.len(), 0);
        });
    }

    #[test]
    fn test_open_store_from_config() {
        let store = open_store(&StoreConfig::memory()).expect("memory store opens");
        assert!(store.is_open());

        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = open_store(&StoreConfig::lmdb(temp_dir.path()).with_map_size_mb(8))
            .expect("lmdb store opens");
        assert!(store.save("k", "v", "1", 1).is_success());
        store.close();

        let bad = StoreConfig {
            backend: StoreBackend::Lmdb,
            path: None,
            map_size_mb: 8,
        };
        assert!(open_store(&bad).is_err());
    }

    // ========================================================================
    // PROPERTY TESTS
    // ========================================================================

    fn ops_strategy() -> impl Strategy<Value = Vec<(String, Stamp)>> {
        prop::collection::vec(("[a-e]{1,2}", 0i64..20), 1..30)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// LE and BE listings intersect exactly on keys whose latest stamp
        /// equals the threshold and together cover every live key.
        #[test]
        fn prop_le_be_partition(ops in ops_strategy(), threshold in 0i64..20) {
            let store = MemoryStore::new();
            for (key, stamp) in &ops {
                store.save(key, "v", "1", *stamp);
            }

            let le: BTreeSet<String> = store.all_keys_le(threshold).into_iter().collect();
            let be: BTreeSet<String> = store.all_keys_be(threshold).into_iter().collect();
            let all: BTreeSet<String> = ops.iter().map(|(k, _)| k.clone()).collect();

            let expected_both: BTreeSet<String> = all
                .iter()
                .filter(|k| store.history(k).last().map(|r| r.stamp) == Some(threshold))
                .cloned()
                .collect();

            prop_assert_eq!(le.intersection(&be).cloned().collect::<BTreeSet<_>>(), expected_both);
            prop_assert_eq!(le.union(&be).cloned().collect::<BTreeSet<_>>(), all);
        }

        /// evict_le removes exactly the keys all_keys_le reported.
        #[test]
        fn prop_evict_le_matches_listing(ops in ops_strategy(), threshold in 0i64..20) {
            let store = MemoryStore::new();
            for (key, stamp) in &ops {
                store.save(key, "v", "1", *stamp);
            }

            let listed = store.all_keys_le(threshold);
            let survivors = store.all_keys_be(threshold + 1);
            prop_assert_eq!(store.evict_le(threshold), listed.len());
            prop_assert!(store.all_keys_le(threshold).is_empty());
            for key in &listed {
                prop_assert!(store.get(key).is_none());
            }
            prop_assert_eq!(store.all_keys_be(i64::MIN), survivors);
        }

        /// save then get returns the value with the greatest stamp.
        #[test]
        fn prop_get_returns_latest(stamps in prop::collection::vec(0i64..100, 1..20)) {
            let store = MemoryStore::new();
            for (i, stamp) in stamps.iter().enumerate() {
                store.save("k", &i.to_string(), "v", *stamp);
            }
            let max = stamps.iter().max().copied();
            let winner = stamps.iter().rposition(|s| Some(*s) == max).map(|i| i.to_string());
            prop_assert_eq!(store.get("k"), winner);
        }
    }
}

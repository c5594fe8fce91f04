//! Per-key version history.
//!
//! Both backends persist one [`KeyHistory`] per key, so tombstone, "latest",
//! and point-in-time rules are defined once here and cannot drift between
//! the in-memory and LMDB stores.

use papl_core::{Stamp, StampBound, VersionedRecord, VersionedValue};
use serde::{Deserialize, Serialize};

/// One retained version, without its key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredVersion {
    pub value: String,
    pub version: String,
    pub stamp: Stamp,
    /// Set on every version present when the key was deleted. Hidden
    /// versions stay in the history but are never read again.
    #[serde(default)]
    pub hidden: bool,
}

/// All retained versions of a key.
///
/// `versions` is kept sorted by stamp. Equal stamps keep insertion order, so
/// among visible versions the last one is always the latest write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyHistory {
    versions: Vec<StoredVersion>,
}

impl KeyHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a version. A save after a delete revives the key, but only
    /// with versions saved after the delete.
    pub fn push(&mut self, value: &str, version: &str, stamp: Stamp) {
        let idx = self.versions.partition_point(|v| v.stamp <= stamp);
        self.versions.insert(
            idx,
            StoredVersion {
                value: value.to_string(),
                version: version.to_string(),
                stamp,
                hidden: false,
            },
        );
    }

    /// Hide every version saved so far. Returns false if the key was
    /// already absent.
    pub fn tombstone(&mut self) -> bool {
        if !self.is_live() {
            return false;
        }
        for v in &mut self.versions {
            v.hidden = true;
        }
        true
    }

    pub fn is_live(&self) -> bool {
        self.visible().next().is_some()
    }

    /// True when versions are retained but all of them are hidden.
    pub fn is_tombstoned(&self) -> bool {
        !self.versions.is_empty() && !self.is_live()
    }

    fn visible(&self) -> impl DoubleEndedIterator<Item = &StoredVersion> {
        self.versions.iter().filter(|v| !v.hidden)
    }

    /// Latest version visible to readers.
    pub fn latest(&self) -> Option<&StoredVersion> {
        self.visible().next_back()
    }

    /// Stamp of the latest retained version, hidden or not.
    pub fn latest_stamp(&self) -> Option<Stamp> {
        self.versions.last().map(|v| v.stamp)
    }

    /// True when the key is live and its latest visible stamp satisfies `bound`.
    pub fn listed_by(&self, bound: StampBound) -> bool {
        self.latest().is_some_and(|v| bound.matches(v.stamp))
    }

    /// True when eviction by `bound` removes this history.
    ///
    /// A live key is evicted exactly when it is listed by `bound`. A
    /// tombstoned key is purged when its latest retained stamp matches.
    pub fn evictable_by(&self, bound: StampBound) -> bool {
        if self.is_live() {
            return self.listed_by(bound);
        }
        self.latest_stamp().is_some_and(|s| bound.matches(s))
    }

    pub fn latest_value(&self) -> Option<VersionedValue> {
        self.latest().map(|v| VersionedValue {
            version: v.version.clone(),
            value: v.value.clone(),
        })
    }

    /// Latest visible version with `stamp <= at`.
    pub fn value_at(&self, key: &str, at: Stamp) -> Option<VersionedRecord> {
        self.visible()
            .rev()
            .find(|v| v.stamp <= at)
            .map(|v| to_record(key, v))
    }

    /// Every retained version in stamp order, hidden ones included.
    pub fn records(&self, key: &str) -> Vec<VersionedRecord> {
        self.versions.iter().map(|v| to_record(key, v)).collect()
    }

    pub fn version_count(&self) -> usize {
        self.versions.len()
    }
}

fn to_record(key: &str, v: &StoredVersion) -> VersionedRecord {
    VersionedRecord {
        key: key.to_string(),
        value: v.value.clone(),
        version: v.version.clone(),
        stamp: v.stamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_is_greatest_stamp() {
        let mut h = KeyHistory::new();
        h.push("v5", "5", 5);
        h.push("v2", "2", 2);
        h.push("v9", "9", 9);
        assert_eq!(h.latest().map(|v| v.value.as_str()), Some("v9"));
        assert_eq!(h.latest_stamp(), Some(9));
        let stamps: Vec<Stamp> = h.records("k").iter().map(|r| r.stamp).collect();
        assert_eq!(stamps, vec![2, 5, 9]);
    }

    #[test]
    fn test_equal_stamps_last_write_wins() {
        let mut h = KeyHistory::new();
        h.push("first", "a", 3);
        h.push("second", "b", 3);
        assert_eq!(h.latest().map(|v| v.value.as_str()), Some("second"));
    }

    #[test]
    fn test_tombstone_hides_but_retains() {
        let mut h = KeyHistory::new();
        h.push("v1", "1", 1);
        assert!(h.tombstone());
        assert!(!h.tombstone(), "second delete is a no-op");
        assert!(h.latest().is_none());
        assert!(!h.is_live());
        assert_eq!(h.version_count(), 1);
        assert_eq!(h.latest_stamp(), Some(1));
        assert!(h.value_at("k", 10).is_none());
    }

    #[test]
    fn test_save_after_delete_revives() {
        let mut h = KeyHistory::new();
        h.push("v1", "1", 1);
        h.tombstone();
        h.push("v2", "2", 2);
        assert!(h.is_live());
        assert_eq!(h.latest().map(|v| v.value.as_str()), Some("v2"));
        assert_eq!(h.version_count(), 2);
    }

    #[test]
    fn test_value_at_point_in_time() {
        let mut h = KeyHistory::new();
        h.push("v1", "1", 10);
        h.push("v2", "2", 20);
        assert!(h.value_at("k", 5).is_none());
        assert_eq!(h.value_at("k", 10).map(|r| r.value), Some("v1".to_string()));
        assert_eq!(h.value_at("k", 19).map(|r| r.value), Some("v1".to_string()));
        assert_eq!(h.value_at("k", 25).map(|r| r.version), Some("2".to_string()));
    }

    #[test]
    fn test_empty_history_cannot_be_tombstoned() {
        let mut h = KeyHistory::new();
        assert!(!h.tombstone());
        assert!(!h.is_live());
        assert!(!h.evictable_by(StampBound::AtLeast(0)));
    }

    #[test]
    fn test_listing_and_eviction_predicates() {
        let mut h = KeyHistory::new();
        h.push("v", "1", 4);
        assert!(h.listed_by(StampBound::AtMost(4)));
        assert!(h.listed_by(StampBound::AtLeast(4)));
        h.tombstone();
        assert!(!h.listed_by(StampBound::AtMost(4)));
        assert!(h.evictable_by(StampBound::AtMost(4)));
    }

    #[test]
    fn test_older_save_after_delete_does_not_resurrect() {
        let mut h = KeyHistory::new();
        h.push("v1", "1", 10);
        assert!(h.tombstone());
        h.push("v0", "0", 5);

        assert!(h.is_live());
        assert_eq!(h.latest().map(|v| v.value.as_str()), Some("v0"));
        assert_eq!(h.value_at("k", 20).map(|r| r.value), Some("v0".to_string()));
        assert!(h.listed_by(StampBound::AtMost(5)));
        assert!(!h.listed_by(StampBound::AtLeast(10)));
        assert!(h.evictable_by(StampBound::AtMost(5)));
        assert!(!h.evictable_by(StampBound::AtLeast(10)));
        assert_eq!(h.version_count(), 2);
    }

    #[test]
    fn test_second_delete_hides_revived_versions() {
        let mut h = KeyHistory::new();
        h.push("v1", "1", 10);
        h.tombstone();
        h.push("v2", "2", 20);
        assert!(h.tombstone());
        assert!(h.is_tombstoned());
        assert!(h.latest().is_none());
        assert!(h.evictable_by(StampBound::AtLeast(20)));
    }
}

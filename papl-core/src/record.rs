//! Versioned record types shared by every store backend.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-assigned monotonic integer ordering the versions of a key.
pub type Stamp = i64;

/// One retained version of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedRecord {
    pub key: String,
    pub value: String,
    /// Free-form version label, e.g. a revision id.
    pub version: String,
    pub stamp: Stamp,
}

/// Latest `(version, value)` pair of a live key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionedValue {
    pub version: String,
    pub value: String,
}

impl VersionedValue {
    pub fn into_pair(self) -> (String, String) {
        (self.version, self.value)
    }
}

/// Status code returned by `save`.
///
/// Codes `<= 0` are failures, codes `> 0` are successes. A successful save
/// reports the number of records written, which is always 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SaveStatus(i64);

impl SaveStatus {
    /// One record written.
    pub const WRITTEN: SaveStatus = SaveStatus(1);
    /// Store handle uninitialized or closed.
    pub const UNINITIALIZED: SaveStatus = SaveStatus(-1);
    /// Backend refused the write.
    pub const BACKEND_FAILURE: SaveStatus = SaveStatus(0);

    pub fn code(&self) -> i64 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stamp predicate used by range queries and eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StampBound {
    /// Latest stamp `<=` threshold.
    AtMost(Stamp),
    /// Latest stamp `>=` threshold.
    AtLeast(Stamp),
}

impl StampBound {
    pub fn matches(&self, stamp: Stamp) -> bool {
        match *self {
            StampBound::AtMost(threshold) => stamp <= threshold,
            StampBound::AtLeast(threshold) => stamp >= threshold,
        }
    }
}

/// A 0-based page of a key listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Page {
    pub index: usize,
    pub size: usize,
}

impl Page {
    pub fn new(index: usize, size: usize) -> Self {
        Self { index, size }
    }

    /// Slice `items` to this page. Out-of-range pages and `size == 0` are empty.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        if self.size == 0 {
            return Vec::new();
        }
        let start = match self.index.checked_mul(self.size) {
            Some(start) if start < items.len() => start,
            _ => return Vec::new(),
        };
        items.into_iter().skip(start).take(self.size).collect()
    }
}

//! PAPL Core - Data Types
//!
//! Pure data structures shared by the store, cache, and resolver crates:
//! versioned records, the decision result envelope, path-parent computation,
//! the error hierarchy, and configuration. No I/O beyond reading a config file.

pub mod config;
pub mod error;
pub mod path;
pub mod record;
pub mod result;

pub use config::{
    PaplConfig, PolicyCacheConfig, StoreBackend, StoreConfig, DEFAULT_CACHE_CAPACITY,
    DEFAULT_MAP_SIZE_MB,
};
pub use error::{ConfigError, EvalError, PaplError, PaplResult, StoreError};
pub use path::{ancestors, parent_of, Ancestors, PATH_SEPARATOR};
pub use record::{Page, SaveStatus, Stamp, StampBound, VersionedRecord, VersionedValue};
pub use result::{
    Decision, Expression, Location, QueryResult, QueryResults, ResultSet, ResultStatus,
};

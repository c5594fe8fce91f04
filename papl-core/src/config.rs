//! Configuration types
//!
//! Loaded from TOML and optionally overridden from the environment:
//!
//! ```toml
//! [store]
//! backend = "lmdb"
//! path = "/var/lib/papl/policies"
//! map_size_mb = 64
//!
//! [cache]
//! capacity = 1000
//! ```

use crate::{ConfigError, PaplResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default number of compiled evaluators kept per cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Default LMDB map size in megabytes.
pub const DEFAULT_MAP_SIZE_MB: usize = 64;

/// Which store backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Lives for the lifetime of the process.
    #[default]
    Memory,
    /// LMDB environment at `StoreConfig::path`; survives restart.
    Lmdb,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Lmdb => "lmdb",
        }
    }
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "lmdb" | "file" => Ok(StoreBackend::Lmdb),
            other => Err(ConfigError::InvalidValue {
                field: "store.backend".to_string(),
                value: other.to_string(),
                reason: "expected \"memory\" or \"lmdb\"".to_string(),
            }),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Directory of the LMDB environment. Required for [`StoreBackend::Lmdb`].
    pub path: Option<PathBuf>,
    pub map_size_mb: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: None,
            map_size_mb: DEFAULT_MAP_SIZE_MB,
        }
    }
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn lmdb(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: StoreBackend::Lmdb,
            path: Some(path.into()),
            map_size_mb: DEFAULT_MAP_SIZE_MB,
        }
    }

    pub fn with_map_size_mb(mut self, map_size_mb: usize) -> Self {
        self.map_size_mb = map_size_mb;
        self
    }
}

/// Compiled-evaluator cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyCacheConfig {
    pub capacity: usize,
}

impl Default for PolicyCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaplConfig {
    pub store: StoreConfig,
    pub cache: PolicyCacheConfig,
}

impl PaplConfig {
    /// Parse configuration from a TOML document. Missing sections take defaults.
    pub fn from_toml_str(source: &str) -> PaplResult<Self> {
        let config: PaplConfig = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> PaplResult<Self> {
        let source = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Parse {
            reason: format!("{}: {}", path.as_ref().display(), e),
        })?;
        Self::from_toml_str(&source)
    }

    /// Apply environment overrides on top of this configuration.
    ///
    /// Environment variables:
    /// - `PAPL_STORE_BACKEND`: "memory" or "lmdb"
    /// - `PAPL_STORE_PATH`: LMDB directory
    /// - `PAPL_LMDB_MAP_SIZE_MB`: LMDB map size (default: 64)
    /// - `PAPL_POLICY_CACHE_CAPACITY`: evaluators per cache (default: 1000)
    pub fn with_env_overrides(self) -> PaplResult<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> PaplResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("PAPL_STORE_BACKEND") {
            self.store.backend = backend.parse()?;
        }
        if let Some(path) = lookup("PAPL_STORE_PATH") {
            self.store.path = Some(PathBuf::from(path));
        }
        if let Some(size) = lookup("PAPL_LMDB_MAP_SIZE_MB") {
            self.store.map_size_mb = parse_usize("store.map_size_mb", &size)?;
        }
        if let Some(capacity) = lookup("PAPL_POLICY_CACHE_CAPACITY") {
            self.cache.capacity = parse_usize("cache.capacity", &capacity)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.cache.capacity = capacity;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.capacity".to_string(),
                value: "0".to_string(),
                reason: "capacity must be positive".to_string(),
            });
        }

        if self.store.backend == StoreBackend::Lmdb {
            match &self.store.path {
                None => {
                    return Err(ConfigError::MissingRequired {
                        field: "store.path".to_string(),
                    })
                }
                Some(path) if path.as_os_str().is_empty() => {
                    return Err(ConfigError::MissingRequired {
                        field: "store.path".to_string(),
                    })
                }
                Some(_) => {}
            }
            if self.store.map_size_mb == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "store.map_size_mb".to_string(),
                    value: "0".to_string(),
                    reason: "map size must be positive".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn parse_usize(field: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PaplError;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = PaplConfig::default();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.cache.capacity, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = PaplConfig::from_toml_str(
            r#"
[store]
backend = "lmdb"
path = "/tmp/papl"
map_size_mb = 16

[cache]
capacity = 10
"#,
        )
        .expect("config should parse");
        assert_eq!(config.store.backend, StoreBackend::Lmdb);
        assert_eq!(config.store.path, Some(PathBuf::from("/tmp/papl")));
        assert_eq!(config.store.map_size_mb, 16);
        assert_eq!(config.cache.capacity, 10);
    }

    #[test]
    fn test_from_toml_partial_uses_defaults() {
        let config = PaplConfig::from_toml_str("[cache]\ncapacity = 5\n").expect("parse");
        assert_eq!(config.store, StoreConfig::default());
        assert_eq!(config.cache.capacity, 5);
    }

    #[test]
    fn test_lmdb_requires_path() {
        let err = PaplConfig::from_toml_str("[store]\nbackend = \"lmdb\"\n")
            .expect_err("missing path should fail");
        assert!(matches!(
            err,
            PaplError::Config(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = PaplConfig::default().with_capacity(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_malformed_toml() {
        let err = PaplConfig::from_toml_str("[store\n").expect_err("should fail");
        assert!(matches!(err, PaplError::Config(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PAPL_STORE_BACKEND", "lmdb"),
            ("PAPL_STORE_PATH", "/data/papl"),
            ("PAPL_POLICY_CACHE_CAPACITY", "42"),
        ]
        .into_iter()
        .collect();

        let config = PaplConfig::default()
            .with_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .expect("overrides should apply");
        assert_eq!(config.store.backend, StoreBackend::Lmdb);
        assert_eq!(config.store.path, Some(PathBuf::from("/data/papl")));
        assert_eq!(config.cache.capacity, 42);
    }

    #[test]
    fn test_override_bad_number() {
        let err = PaplConfig::default()
            .with_overrides(|name| {
                (name == "PAPL_POLICY_CACHE_CAPACITY").then(|| "many".to_string())
            })
            .expect_err("should fail");
        assert!(matches!(
            err,
            PaplError::Config(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("Memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!("file".parse::<StoreBackend>(), Ok(StoreBackend::Lmdb));
        assert!("redis".parse::<StoreBackend>().is_err());
    }
}

//! Error types for PAPL operations

use thiserror::Error;

/// Storage layer errors.
///
/// The public `VersionedStore` surface in `papl-storage` never returns these;
/// backends log them and degrade to absent/zero results. They surface from
/// constructors and from backend-internal helpers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store handle is not initialized or already closed")]
    NotInitialized,

    #[error("Backend failure: {reason}")]
    Backend { reason: String },

    #[error("I/O failure: {reason}")]
    Io { reason: String },

    #[error("Serialization failure: {reason}")]
    Serialization { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Errors raised at the evaluator boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvalError {
    #[error("Invalid policy at {path}: {reason}")]
    InvalidPolicy { path: String, reason: String },

    #[error("Invalid query {query}: {reason}")]
    InvalidQuery { query: String, reason: String },

    #[error("Invalid {what} JSON: {reason}")]
    InvalidJson { what: String, reason: String },

    #[error("Invalid authorization request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Evaluator has been released")]
    Released,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all PAPL errors.
#[derive(Debug, Clone, Error)]
pub enum PaplError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for PAPL operations.
pub type PaplResult<T> = Result<T, PaplError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Backend {
            reason: "map full".to_string(),
        };
        assert_eq!(format!("{}", err), "Backend failure: map full");
        assert!(format!("{}", StoreError::NotInitialized).contains("not initialized"));
    }

    #[test]
    fn test_eval_error_display_includes_path() {
        let err = EvalError::InvalidPolicy {
            path: "a/b/".to_string(),
            reason: "unexpected token".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("a/b/"));
        assert!(msg.contains("unexpected token"));
    }

    #[test]
    fn test_papl_error_from_conversions() {
        let err: PaplError = StoreError::LockPoisoned.into();
        assert!(matches!(err, PaplError::Store(StoreError::LockPoisoned)));

        let err: PaplError = EvalError::Released.into();
        assert!(matches!(err, PaplError::Eval(EvalError::Released)));

        let err: PaplError = ConfigError::MissingRequired {
            field: "store.path".to_string(),
        }
        .into();
        assert!(format!("{}", err).contains("store.path"));
    }
}

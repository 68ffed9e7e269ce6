//! Error types for sieve operations

use std::sync::Arc;
use thiserror::Error;

use crate::consistency::ConsistencyViolation;

/// Key-value store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store backend failed: {reason}")]
    Backend { reason: String },

    #[error("Corrupt member {member:?} in set {key}")]
    CorruptMember { key: String, member: String },

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },
}

impl StoreError {
    /// Wrap any backend error as a `StoreError::Backend`.
    pub fn backend(e: impl std::fmt::Display) -> Self {
        Self::Backend {
            reason: e.to_string(),
        }
    }
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
}

/// Master error type for all sieve errors.
#[derive(Debug, Clone, Error)]
pub enum SieveError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Id source for filter {filter} failed: {cause}")]
    Source {
        filter: String,
        #[source]
        cause: Arc<dyn std::error::Error + Send + Sync>,
    },

    #[error("Consistency violation: {0}")]
    Consistency(#[from] ConsistencyViolation),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl SieveError {
    /// Attach an id-source failure to the filter that raised it.
    pub fn source_failure(
        filter: impl Into<String>,
        cause: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Source {
            filter: filter.into(),
            cause: Arc::from(cause),
        }
    }

    /// True when this error came from a filter's id source.
    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source { .. })
    }
}

/// Result type alias for sieve operations.
pub type SieveResult<T> = Result<T, SieveError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_store_error_display_corrupt_member() {
        let err = StoreError::CorruptMember {
            key: "idx_region_us".to_string(),
            member: "abc".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Corrupt member"));
        assert!(msg.contains("idx_region_us"));
        assert!(msg.contains("abc"));
    }

    #[test]
    fn test_store_error_backend_helper() {
        let err = StoreError::backend("connection reset");
        assert_eq!(
            err,
            StoreError::Backend {
                reason: "connection reset".to_string()
            }
        );
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "ephemeral_prefix".to_string(),
            value: "idx_".to_string(),
            reason: "collides with index keys".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("ephemeral_prefix"));
        assert!(msg.contains("idx_"));
        assert!(msg.contains("collides"));
    }

    #[test]
    fn test_source_failure_keeps_original_error() {
        let original = std::io::Error::new(std::io::ErrorKind::TimedOut, "db timed out");
        let err = SieveError::source_failure("region_filter_US", Box::new(original));

        assert!(err.is_source());
        assert!(format!("{}", err).contains("region_filter_US"));
        let cause = err.source().expect("source should be chained");
        assert_eq!(cause.to_string(), "db timed out");
    }

    #[test]
    fn test_sieve_error_from_variants() {
        let store = SieveError::from(StoreError::LockPoisoned);
        assert!(matches!(store, SieveError::Store(_)));

        let config = SieveError::from(ConfigError::MissingRequired {
            field: "lmdb_path".to_string(),
        });
        assert!(matches!(config, SieveError::Config(_)));

        let consistency = SieveError::from(ConsistencyViolation {
            filter: "region_filter_US".to_string(),
            missing: vec!["9".to_string()],
            unexpected: vec![],
        });
        assert!(matches!(consistency, SieveError::Consistency(_)));
    }
}

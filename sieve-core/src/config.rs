//! Sieve Configuration
//!
//! Settings for the filter engine, the LMDB store and telemetry. Values are
//! loaded from environment variables with defaults suitable for development.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::key::INDEX_KEY_PREFIX;

/// Prefix of candidate-set keys when none is configured.
pub const DEFAULT_EPHEMERAL_PREFIX: &str = "sieve_tmp_";

/// Configuration shared by the sieve crates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SieveConfig {
    /// Prefix of transient candidate-set keys. Must not overlap `idx_`.
    pub ephemeral_prefix: String,

    /// Directory of the LMDB environment. `None` means in-memory only.
    pub lmdb_path: Option<PathBuf>,

    /// Maximum size of the LMDB map in megabytes.
    pub lmdb_map_size_mb: usize,

    /// Namespace prepended to every Prometheus metric name. Empty for none.
    pub metrics_namespace: String,

    /// `tracing-subscriber` env-filter directive.
    pub log_filter: String,

    /// Emit logs as JSON lines.
    pub log_json: bool,
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            ephemeral_prefix: DEFAULT_EPHEMERAL_PREFIX.to_string(),
            lmdb_path: None,
            lmdb_map_size_mb: 256,
            metrics_namespace: String::new(),
            log_filter: "info".to_string(),
            log_json: false,
        }
    }
}

impl SieveConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create SieveConfig from environment variables.
    ///
    /// Environment variables:
    /// - `SIEVE_EPHEMERAL_PREFIX`: Candidate-set key prefix (default: "sieve_tmp_")
    /// - `SIEVE_LMDB_PATH`: LMDB directory (default: unset, in-memory)
    /// - `SIEVE_LMDB_MAP_SIZE_MB`: LMDB map size (default: 256)
    /// - `SIEVE_METRICS_NAMESPACE`: Prometheus namespace (default: empty)
    /// - `SIEVE_LOG`: Log filter directive (default: "info")
    /// - `SIEVE_LOG_JSON`: "true" or "false" (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let ephemeral_prefix = std::env::var("SIEVE_EPHEMERAL_PREFIX")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.ephemeral_prefix);

        let lmdb_path = std::env::var("SIEVE_LMDB_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let lmdb_map_size_mb = std::env::var("SIEVE_LMDB_MAP_SIZE_MB")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.lmdb_map_size_mb);

        let metrics_namespace = std::env::var("SIEVE_METRICS_NAMESPACE")
            .unwrap_or(defaults.metrics_namespace);

        let log_filter = std::env::var("SIEVE_LOG").unwrap_or(defaults.log_filter);

        let log_json = std::env::var("SIEVE_LOG_JSON")
            .map(|s| s == "true" || s == "1")
            .unwrap_or(false);

        Self {
            ephemeral_prefix,
            lmdb_path,
            lmdb_map_size_mb,
            metrics_namespace,
            log_filter,
            log_json,
        }
    }

    /// Set the ephemeral key prefix.
    pub fn with_ephemeral_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.ephemeral_prefix = prefix.into();
        self
    }

    /// Set the LMDB directory.
    pub fn with_lmdb_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lmdb_path = Some(path.into());
        self
    }

    /// Set the LMDB map size.
    pub fn with_map_size_mb(mut self, size: usize) -> Self {
        self.lmdb_map_size_mb = size;
        self
    }

    /// Set the metrics namespace.
    pub fn with_metrics_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.metrics_namespace = namespace.into();
        self
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - ephemeral_prefix is non-empty and cannot collide with filter keys
    /// - lmdb_map_size_mb > 0
    /// - metrics_namespace is a valid Prometheus identifier (or empty)
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ephemeral_prefix.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "ephemeral_prefix".to_string(),
            });
        }

        if self.ephemeral_prefix.starts_with(INDEX_KEY_PREFIX)
            || INDEX_KEY_PREFIX.starts_with(&self.ephemeral_prefix)
        {
            return Err(ConfigError::InvalidValue {
                field: "ephemeral_prefix".to_string(),
                value: self.ephemeral_prefix.clone(),
                reason: format!("must not overlap the {} filter prefix", INDEX_KEY_PREFIX),
            });
        }

        if self.ephemeral_prefix.chars().any(|c| c.is_control()) {
            return Err(ConfigError::InvalidValue {
                field: "ephemeral_prefix".to_string(),
                value: self.ephemeral_prefix.clone(),
                reason: "must not contain control characters".to_string(),
            });
        }

        if self.lmdb_map_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lmdb_map_size_mb".to_string(),
                value: "0".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }

        if !is_metric_identifier(&self.metrics_namespace) {
            return Err(ConfigError::InvalidValue {
                field: "metrics_namespace".to_string(),
                value: self.metrics_namespace.clone(),
                reason: "must match [a-zA-Z_][a-zA-Z0-9_]*".to_string(),
            });
        }

        Ok(())
    }
}

fn is_metric_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        None => true,
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SieveConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let config = SieveConfig::new().with_ephemeral_prefix("");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_prefix_colliding_with_index_rejected() {
        for prefix in ["idx_", "idx_tmp_", "id"] {
            let config = SieveConfig::new().with_ephemeral_prefix(prefix);
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidValue { .. })),
                "prefix {prefix:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_zero_map_size_rejected() {
        let config = SieveConfig::new().with_map_size_mb(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_metrics_namespace_validation() {
        assert!(SieveConfig::new()
            .with_metrics_namespace("search_api")
            .validate()
            .is_ok());
        assert!(SieveConfig::new()
            .with_metrics_namespace("")
            .validate()
            .is_ok());
        assert!(SieveConfig::new()
            .with_metrics_namespace("9lives")
            .validate()
            .is_err());
        assert!(SieveConfig::new()
            .with_metrics_namespace("search-api")
            .validate()
            .is_err());
    }

    #[test]
    fn test_builders() {
        let config = SieveConfig::new()
            .with_ephemeral_prefix("q_")
            .with_lmdb_path("/var/lib/sieve")
            .with_map_size_mb(64);
        assert_eq!(config.ephemeral_prefix, "q_");
        assert_eq!(config.lmdb_path, Some(PathBuf::from("/var/lib/sieve")));
        assert_eq!(config.lmdb_map_size_mb, 64);
    }
}

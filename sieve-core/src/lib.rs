//! Sieve Core - keys, filters and shared contracts
//!
//! Defines the pieces every other sieve crate speaks in terms of: the
//! validated store key, the filter descriptor and its id-source contract,
//! the consistency check, the metrics-sink contract, configuration and the
//! error taxonomy.

pub mod config;
pub mod consistency;
pub mod error;
pub mod filter;
pub mod key;
pub mod metrics;

pub use config::{SieveConfig, DEFAULT_EPHEMERAL_PREFIX};
pub use consistency::{check_consistency, ConsistencyReport, ConsistencyViolation};
pub use error::{ConfigError, SieveError, SieveResult, StoreError};
pub use filter::{
    filter_name, joined_names, snake_case, AuxParams, Filter, FilterArg, IdSource, IdSourceError,
};
pub use key::{SetKey, INDEX_KEY_PREFIX};
pub use metrics::{MetricsSink, NoopMetrics, FILTER_IO_METRIC, WARM_IDS_METRIC};

/// Identifier of an entity held in a filter set.
pub type EntityId = i64;

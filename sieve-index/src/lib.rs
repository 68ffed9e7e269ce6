//! Sieve Index - filter caches and the intersection engine
//!
//! Keeps one persisted set of entity ids per filter inside a shared
//! [`SetStore`](sieve_storage::SetStore) and answers "which of these
//! candidates match every one of these filters" by intersecting a transient
//! candidate set with the stored filter sets.
//!
//! # Components
//!
//! - [`IndexCache`]: binds one [`Filter`](sieve_core::Filter) to its stored
//!   set and warms it from the filter's authoritative id source.
//! - [`FilterEngine`]: runs intersection queries, warming cold caches on the
//!   way, and batch-warms filters with consistency checking.
//! - [`EphemeralSet`]: the scoped candidate set of one query; deleted on
//!   every exit path, including cancellation.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(MemorySetStore::new());
//! let engine = FilterEngine::new(store).with_metrics(Arc::new(PrometheusMetrics::new("search")));
//!
//! let usd = Filter::new(Arc::new(CurrencyIds::new(db.clone()))).with_arg("USD");
//! let matches = engine.filter(&[1, 2, 3, 4, 5], &[usd]).await?;
//! ```
//!
//! # Consistency
//!
//! Warms compute a diff against the stored set and apply removals then
//! additions as two separate store writes. Concurrent warms of the same
//! filter may interleave; the stored set then converges on the next warm.

pub mod codec;
pub mod engine;
pub mod ephemeral;
pub mod index_cache;
pub mod telemetry;

pub use engine::FilterEngine;
pub use ephemeral::EphemeralSet;
pub use index_cache::{BackingSet, IndexCache, WarmOutcome};
pub use telemetry::{init_tracing, PrometheusMetrics};

pub use sieve_core::{
    ConsistencyReport, ConsistencyViolation, EntityId, Filter, FilterArg, IdSource, MetricsSink,
    SieveConfig, SieveError, SieveResult,
};

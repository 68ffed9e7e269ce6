//! Intersection engine over stored filter sets.
//!
//! [`FilterEngine::filter`] answers "which of these candidates satisfy every
//! filter": the candidates go into an [`EphemeralSet`], each filter's cache
//! is warmed if cold, and the store intersects all of them in one call.
//! [`FilterEngine::warm_filters`] is the batch path that keeps caches fresh
//! outside the query path, with consistency checking turned on.

use std::sync::Arc;

use sieve_core::{
    joined_names, EntityId, Filter, MetricsSink, SetKey, SieveConfig, SieveResult,
    DEFAULT_EPHEMERAL_PREFIX, FILTER_IO_METRIC, INDEX_KEY_PREFIX,
};
use sieve_storage::SetStore;
use tracing::{debug, warn};

use crate::codec::decode_ids;
use crate::ephemeral::EphemeralSet;
use crate::index_cache::{IndexCache, WarmOutcome};

/// Runs filter queries and batch warms against a shared set store.
pub struct FilterEngine<S: SetStore + ?Sized> {
    store: Arc<S>,
    metrics: Option<Arc<dyn MetricsSink>>,
    ephemeral_prefix: String,
}

impl<S: SetStore + ?Sized> Clone for FilterEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            metrics: self.metrics.clone(),
            ephemeral_prefix: self.ephemeral_prefix.clone(),
        }
    }
}

impl<S: SetStore + ?Sized> FilterEngine<S> {
    /// Create an engine without metrics.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            metrics: None,
            ephemeral_prefix: DEFAULT_EPHEMERAL_PREFIX.to_string(),
        }
    }

    /// Create an engine from a validated configuration.
    pub fn from_config(store: Arc<S>, config: &SieveConfig) -> SieveResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            metrics: None,
            ephemeral_prefix: config.ephemeral_prefix.clone(),
        })
    }

    /// Send metrics to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ephemeral_prefix(&self) -> &str {
        &self.ephemeral_prefix
    }

    /// Cache for `filter` bound to this engine's store and metrics.
    pub fn index<'a>(&'a self, filter: &'a Filter) -> IndexCache<'a, S> {
        IndexCache::new(filter, &*self.store, self.metrics.as_deref())
    }

    /// The subset of `candidate_ids` present in every filter's id set,
    /// sorted ascending.
    ///
    /// Cold caches are warmed without a consistency check. With no filters
    /// the candidates come back unfiltered (deduplicated). The candidate set
    /// is deleted on every exit path.
    pub async fn filter(
        &self,
        candidate_ids: &[EntityId],
        filters: &[Filter],
    ) -> SieveResult<Vec<EntityId>> {
        let tag = joined_names(filters);
        self.send_io_metric("in", &tag, candidate_ids.len());

        let candidates =
            EphemeralSet::create(Arc::clone(&self.store), &self.ephemeral_prefix, candidate_ids)
                .await?;
        let outcome = self.intersect(&candidates, filters).await;
        let released = candidates.release().await;

        let ids = match (outcome, released) {
            (Ok(ids), Ok(())) => ids,
            (Err(e), Ok(())) | (Ok(_), Err(e)) => return Err(e),
            (Err(e), Err(cleanup)) => {
                warn!(error = %cleanup, "failed to delete candidate set after query error");
                return Err(e);
            }
        };

        debug!(
            filters = %tag,
            candidates = candidate_ids.len(),
            matched = ids.len(),
            "filter query finished"
        );
        self.send_io_metric("out", &tag, ids.len());
        Ok(ids)
    }

    async fn intersect(
        &self,
        candidates: &EphemeralSet<S>,
        filters: &[Filter],
    ) -> SieveResult<Vec<EntityId>> {
        let mut keys = Vec::with_capacity(filters.len() + 1);
        keys.push(candidates.key().clone());

        for filter in filters {
            let index = self.index(filter);
            if !index.is_warmed().await? {
                index.warm(false).await?;
            }
            keys.push(index.key().clone());
        }

        let members = self.store.intersect(&keys).await?;
        Ok(decode_ids(candidates.key(), members)?)
    }

    /// Warm every filter with consistency checking.
    ///
    /// Filters are warmed in order; the first failure (source error, store
    /// error or consistency violation) stops the batch and is returned.
    pub async fn warm_filters(&self, filters: &[Filter]) -> SieveResult<Vec<WarmOutcome>> {
        let mut outcomes = Vec::with_capacity(filters.len());
        for filter in filters {
            outcomes.push(self.index(filter).warm(true).await?);
        }
        Ok(outcomes)
    }

    /// Keys of all filter sets currently in the store.
    pub async fn indexed_filters(&self) -> SieveResult<Vec<SetKey>> {
        Ok(self.store.scan_prefix(INDEX_KEY_PREFIX).await?)
    }

    /// Delete candidate sets left behind by crashed processes.
    ///
    /// Only safe while no queries are running against the store, e.g. at
    /// startup; live queries would lose their candidate sets.
    pub async fn sweep_ephemeral(&self) -> SieveResult<usize> {
        let keys = self.store.scan_prefix(&self.ephemeral_prefix).await?;
        let mut deleted = 0;
        for key in &keys {
            if self.store.delete(key).await? {
                deleted += 1;
            }
        }
        if deleted > 0 {
            warn!(deleted, "removed abandoned candidate sets");
        }
        Ok(deleted)
    }

    fn send_io_metric(&self, state: &str, filters: &str, count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.gauge(
                FILTER_IO_METRIC,
                &[("state", state), ("filters", filters)],
                count as f64,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_core::SieveError;
    use sieve_storage::MemorySetStore;
    use sieve_test_utils::{
        currency_usd, empty_filter, region_us, FailingIds, FaultyStore, RecordingMetrics,
        StoreOp,
    };

    fn engine() -> (FilterEngine<MemorySetStore>, Arc<MemorySetStore>) {
        let store = Arc::new(MemorySetStore::new());
        (FilterEngine::new(Arc::clone(&store)), store)
    }

    #[tokio::test]
    async fn test_one_filter() {
        let (engine, _) = engine();
        let cases: [(&[EntityId], &[EntityId]); 3] = [
            (&[1, 2, 3, 4, 5, 6, 7, 8, 9], &[4, 5, 6]),
            (&[5, 6, 7], &[5, 6]),
            (&[1, 2, 3], &[]),
        ];
        for (candidates, expected) in cases {
            let result = engine.filter(candidates, &[currency_usd()]).await.unwrap();
            assert_eq!(result, expected);
        }
    }

    #[tokio::test]
    async fn test_multiple_filters_emit_six_metrics() {
        let store = Arc::new(MemorySetStore::new());
        let metrics = Arc::new(RecordingMetrics::new());
        let engine = FilterEngine::new(store).with_metrics(metrics.clone());

        let result = engine
            .filter(&[5, 6, 7], &[region_us(), currency_usd()])
            .await
            .unwrap();

        assert_eq!(result, vec![5, 6]);
        assert_eq!(metrics.calls().len(), 6);
        assert_eq!(
            metrics.last_gauge(
                FILTER_IO_METRIC,
                &[
                    ("state", "out"),
                    ("filters", "region_filter_US/currency_filter_USD")
                ]
            ),
            Some(2.0)
        );
    }

    #[tokio::test]
    async fn test_no_filters_returns_candidates() {
        let (engine, store) = engine();
        let result = engine.filter(&[3, 1, 2, 3], &[]).await.unwrap();
        assert_eq!(result, vec![1, 2, 3]);
        assert_eq!(store.key_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_filter_matches_nothing() {
        let (engine, store) = engine();
        let result = engine.filter(&[1, 2, 3], &[empty_filter()]).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(store.key_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_does_not_rewarm_warm_cache() {
        let (engine, store) = engine();
        let filter = currency_usd();
        engine.warm_filters(std::slice::from_ref(&filter)).await.unwrap();

        // Shrink the stored set behind the engine's back; a warm cache is trusted.
        store
            .remove(&filter.key(), &["4".to_string()])
            .await
            .unwrap();
        let result = engine.filter(&[4, 5, 6], &[filter]).await.unwrap();
        assert_eq!(result, vec![5, 6]);
    }

    #[tokio::test]
    async fn test_source_failure_cleans_up() {
        let (engine, store) = engine();
        let failing = Filter::new(Arc::new(FailingIds::new("RegionFilter", "timeout")));

        let err = engine.filter(&[1, 2], &[failing]).await.unwrap_err();
        assert!(matches!(err, SieveError::Source { .. }));
        assert!(store
            .scan_prefix(engine.ephemeral_prefix())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_during_intersect_cleans_up() {
        let inner = MemorySetStore::new();
        let store = Arc::new(FaultyStore::new(inner.clone()).fail_on(StoreOp::Intersect));
        let engine = FilterEngine::new(store);

        let err = engine.filter(&[4, 5], &[currency_usd()]).await.unwrap_err();
        assert!(matches!(err, SieveError::Store(_)));
        assert!(inner
            .scan_prefix(engine.ephemeral_prefix())
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_new_uses_configured_default_prefix() {
        let store = Arc::new(MemorySetStore::new());
        let configured = FilterEngine::from_config(Arc::clone(&store), &SieveConfig::default())
            .unwrap();
        assert_eq!(
            FilterEngine::new(store).ephemeral_prefix(),
            configured.ephemeral_prefix()
        );
    }

    #[tokio::test]
    async fn test_from_config_rejects_invalid_prefix() {
        let store = Arc::new(MemorySetStore::new());
        let config = SieveConfig::new().with_ephemeral_prefix("idx_tmp_");
        assert!(matches!(
            FilterEngine::from_config(store, &config),
            Err(SieveError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_indexed_filters_and_sweep() {
        let (engine, store) = engine();
        engine
            .warm_filters(&[region_us(), currency_usd()])
            .await
            .unwrap();
        store
            .add(
                &SetKey::ephemeral(engine.ephemeral_prefix()),
                &["1".to_string()],
            )
            .await
            .unwrap();

        let indexed = engine.indexed_filters().await.unwrap();
        assert_eq!(
            indexed,
            vec![
                SetKey::index("currency_filter_USD"),
                SetKey::index("region_filter_US")
            ]
        );

        assert_eq!(engine.sweep_ephemeral().await.unwrap(), 1);
        assert_eq!(store.key_count().unwrap(), 2);
    }
}

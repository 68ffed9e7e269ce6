//! Per-filter cache of matching ids.
//!
//! An [`IndexCache`] binds one filter to the set stored at `idx_<name>` and
//! synchronizes ("warms") that set with the filter's authoritative ids.
//! It holds no state of its own: any caller can build one at any time and
//! it sees whatever the store currently has under the key.

use std::collections::HashSet;

use sieve_core::{
    consistency, ConsistencyReport, EntityId, Filter, MetricsSink, SetKey, SieveResult,
    WARM_IDS_METRIC,
};
use sieve_storage::SetStore;
use tracing::{debug, warn};

use crate::codec::{decode_ids, encode_ids};

/// What a warm changed in the stored set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarmOutcome {
    /// Derived name of the warmed filter.
    pub filter: String,
    /// Ids written to the stored set.
    pub additions: usize,
    /// Ids removed from the stored set.
    pub removals: usize,
    /// True when the source returned no ids and the store was left untouched.
    pub skipped: bool,
}

impl WarmOutcome {
    fn skipped(filter: String) -> Self {
        Self {
            filter,
            additions: 0,
            removals: 0,
            skipped: true,
        }
    }

    /// True when the warm neither added nor removed anything.
    pub fn is_noop(&self) -> bool {
        self.additions == 0 && self.removals == 0
    }
}

/// Handle to a filter's stored set.
pub struct BackingSet<'a, S: SetStore + ?Sized> {
    store: &'a S,
    key: SetKey,
}

impl<'a, S: SetStore + ?Sized> BackingSet<'a, S> {
    pub fn key(&self) -> &SetKey {
        &self.key
    }

    /// Number of stored ids.
    pub async fn len(&self) -> SieveResult<u64> {
        Ok(self.store.cardinality(&self.key).await?)
    }

    pub async fn is_empty(&self) -> SieveResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Raw stored members.
    pub async fn members(&self) -> SieveResult<HashSet<String>> {
        Ok(self.store.members(&self.key).await?)
    }

    /// Stored ids, sorted ascending.
    pub async fn ids(&self) -> SieveResult<Vec<EntityId>> {
        let members = self.store.members(&self.key).await?;
        Ok(decode_ids(&self.key, members)?)
    }
}

/// Cache binding one filter to its stored id set.
pub struct IndexCache<'a, S: SetStore + ?Sized> {
    filter: &'a Filter,
    store: &'a S,
    metrics: Option<&'a dyn MetricsSink>,
    key: SetKey,
}

impl<'a, S: SetStore + ?Sized> IndexCache<'a, S> {
    /// Bind `filter` to its key in `store`. Does not touch the store.
    pub fn new(filter: &'a Filter, store: &'a S, metrics: Option<&'a dyn MetricsSink>) -> Self {
        Self {
            filter,
            store,
            metrics,
            key: filter.key(),
        }
    }

    pub fn filter(&self) -> &Filter {
        self.filter
    }

    /// Store key of the backing set (`idx_<filter name>`).
    pub fn key(&self) -> &SetKey {
        &self.key
    }

    /// Handle to the stored set, for intersection and inspection.
    pub fn backing_set(&self) -> BackingSet<'a, S> {
        BackingSet {
            store: self.store,
            key: self.key.clone(),
        }
    }

    /// Whether the stored set currently has any members. Always asks the store.
    pub async fn is_warmed(&self) -> SieveResult<bool> {
        Ok(self.store.exists(&self.key).await?)
    }

    /// Synchronize the stored set with the filter's authoritative ids.
    ///
    /// - An empty authoritative set is a no-op: nothing is written and no
    ///   metrics are sent, so stale ids stay in place.
    /// - A warmed set receives only the difference, removals first.
    /// - A cold set is replaced wholesale.
    ///
    /// With `check_consistency`, the stored set is re-read afterwards and any
    /// difference from the authoritative set fails the warm with
    /// [`SieveError::Consistency`](sieve_core::SieveError::Consistency).
    pub async fn warm(&self, check_consistency: bool) -> SieveResult<WarmOutcome> {
        let name = self.filter.name();
        let authoritative = encode_ids(&self.filter.ids().await?);
        if authoritative.is_empty() {
            debug!(key = %self.key, "source returned no ids, stored set left untouched");
            return Ok(WarmOutcome::skipped(name));
        }

        let (additions, removals) = if self.is_warmed().await? {
            let stored = self.store.members(&self.key).await?;
            let additions: Vec<String> = authoritative.difference(&stored).cloned().collect();
            let removals: Vec<String> = stored.difference(&authoritative).cloned().collect();

            if !removals.is_empty() {
                self.store.remove(&self.key, &removals).await?;
            }
            if !additions.is_empty() {
                self.store.add(&self.key, &additions).await?;
            }
            (additions.len(), removals.len())
        } else {
            self.store.replace(&self.key, &authoritative).await?;
            (authoritative.len(), 0)
        };

        if check_consistency {
            let stored = self.store.members(&self.key).await?;
            if let ConsistencyReport::Violation(violation) =
                consistency::check_consistency(&name, &stored, &authoritative)
            {
                warn!(
                    key = %self.key,
                    missing = violation.missing.len(),
                    unexpected = violation.unexpected.len(),
                    "stored set diverged from source during warm"
                );
                return Err(violation.into());
            }
        }

        debug!(key = %self.key, additions, removals, "warmed filter");
        self.send_metrics(&name, additions, removals);

        Ok(WarmOutcome {
            filter: name,
            additions,
            removals,
            skipped: false,
        })
    }

    /// Compare the stored set with the source without writing anything.
    pub async fn verify(&self) -> SieveResult<ConsistencyReport> {
        let authoritative = encode_ids(&self.filter.ids().await?);
        let stored = self.store.members(&self.key).await?;
        Ok(consistency::check_consistency(
            &self.filter.name(),
            &stored,
            &authoritative,
        ))
    }

    fn send_metrics(&self, name: &str, additions: usize, removals: usize) {
        let Some(metrics) = self.metrics else {
            return;
        };
        metrics.incr(
            WARM_IDS_METRIC,
            &[("action", "add"), ("filter", name)],
            additions as u64,
        );
        metrics.incr(
            WARM_IDS_METRIC,
            &[("action", "remove"), ("filter", name)],
            removals as u64,
        );
    }
}

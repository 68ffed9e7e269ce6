//! Sieve Test Utilities
//!
//! Shared test infrastructure for the sieve workspace:
//! - Scriptable id sources (fixed, switchable, failing, never-resolving)
//! - A metrics sink that records every call
//! - A store wrapper that injects failures
//! - Fixtures for the filters used across the test suites
//! - Proptest generators for id lists

pub use sieve_storage::MemorySetStore;

pub use sieve_core::{
    AuxParams, EntityId, Filter, FilterArg, IdSource, IdSourceError, MetricsSink, SetKey,
    SieveError, StoreError,
};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sieve_storage::{SetStore, StoreResult};

// ============================================================================
// ID SOURCES
// ============================================================================

/// Source that always returns the same ids, whatever the argument.
#[derive(Debug, Clone)]
pub struct FixedIds {
    kind: String,
    ids: Vec<EntityId>,
}

impl FixedIds {
    pub fn new(kind: impl Into<String>, ids: Vec<EntityId>) -> Self {
        Self {
            kind: kind.into(),
            ids,
        }
    }
}

#[async_trait]
impl IdSource for FixedIds {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn ids(
        &self,
        _arg: Option<&FilterArg>,
        _aux: &AuxParams,
    ) -> Result<Vec<EntityId>, IdSourceError> {
        Ok(self.ids.clone())
    }
}

/// Source whose ids can be changed between warms. Clones share state.
#[derive(Debug, Clone)]
pub struct SwitchableIds {
    kind: String,
    ids: Arc<Mutex<Vec<EntityId>>>,
    calls: Arc<Mutex<usize>>,
}

impl SwitchableIds {
    pub fn new(kind: impl Into<String>, ids: Vec<EntityId>) -> Self {
        Self {
            kind: kind.into(),
            ids: Arc::new(Mutex::new(ids)),
            calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Replace the ids returned from now on.
    pub fn set(&self, ids: Vec<EntityId>) {
        *self.ids.lock().expect("switchable ids lock") = ids;
    }

    /// How many times the source has been asked for ids.
    pub fn calls(&self) -> usize {
        *self.calls.lock().expect("switchable calls lock")
    }
}

#[async_trait]
impl IdSource for SwitchableIds {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn ids(
        &self,
        _arg: Option<&FilterArg>,
        _aux: &AuxParams,
    ) -> Result<Vec<EntityId>, IdSourceError> {
        *self.calls.lock().expect("switchable calls lock") += 1;
        Ok(self.ids.lock().expect("switchable ids lock").clone())
    }
}

/// Source that always fails with `message`.
#[derive(Debug, Clone)]
pub struct FailingIds {
    kind: String,
    message: String,
}

impl FailingIds {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl IdSource for FailingIds {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn ids(
        &self,
        _arg: Option<&FilterArg>,
        _aux: &AuxParams,
    ) -> Result<Vec<EntityId>, IdSourceError> {
        Err(self.message.clone().into())
    }
}

/// Source that never resolves; used to cancel queries mid-flight.
#[derive(Debug, Clone)]
pub struct PendingIds {
    kind: String,
}

impl PendingIds {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

#[async_trait]
impl IdSource for PendingIds {
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn ids(
        &self,
        _arg: Option<&FilterArg>,
        _aux: &AuxParams,
    ) -> Result<Vec<EntityId>, IdSourceError> {
        std::future::pending().await
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// One call received by [`RecordingMetrics`].
#[derive(Debug, Clone, PartialEq)]
pub enum MetricCall {
    Incr {
        metric: String,
        labels: Vec<(String, String)>,
        count: u64,
    },
    Gauge {
        metric: String,
        labels: Vec<(String, String)>,
        value: f64,
    },
}

impl MetricCall {
    pub fn metric(&self) -> &str {
        match self {
            Self::Incr { metric, .. } | Self::Gauge { metric, .. } => metric,
        }
    }

    fn labels(&self) -> &[(String, String)] {
        match self {
            Self::Incr { labels, .. } | Self::Gauge { labels, .. } => labels,
        }
    }

    /// Whether this call is for `metric` and carries every label in `subset`.
    pub fn matches(&self, metric: &str, subset: &[(&str, &str)]) -> bool {
        self.metric() == metric
            && subset.iter().all(|(name, value)| {
                self.labels()
                    .iter()
                    .any(|(n, v)| n.as_str() == *name && v.as_str() == *value)
            })
    }
}

/// Metrics sink that records every call in order.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    calls: Mutex<Vec<MetricCall>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MetricCall> {
        self.calls.lock().expect("metrics lock").clone()
    }

    pub fn clear(&self) {
        self.calls.lock().expect("metrics lock").clear();
    }

    /// Sum of all counter increments for `metric` whose labels include `subset`.
    pub fn counter_total(&self, metric: &str, subset: &[(&str, &str)]) -> u64 {
        self.calls()
            .iter()
            .filter(|call| call.matches(metric, subset))
            .map(|call| match call {
                MetricCall::Incr { count, .. } => *count,
                MetricCall::Gauge { .. } => 0,
            })
            .sum()
    }

    /// Last value set on gauge `metric` with labels including `subset`.
    pub fn last_gauge(&self, metric: &str, subset: &[(&str, &str)]) -> Option<f64> {
        self.calls()
            .iter()
            .rev()
            .filter(|call| call.matches(metric, subset))
            .find_map(|call| match call {
                MetricCall::Gauge { value, .. } => Some(*value),
                MetricCall::Incr { .. } => None,
            })
    }

    fn record(&self, call: MetricCall) {
        self.calls.lock().expect("metrics lock").push(call);
    }
}

fn owned_labels(labels: &[(&str, &str)]) -> Vec<(String, String)> {
    labels
        .iter()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect()
}

impl MetricsSink for RecordingMetrics {
    fn incr(&self, metric: &str, labels: &[(&str, &str)], count: u64) {
        self.record(MetricCall::Incr {
            metric: metric.to_string(),
            labels: owned_labels(labels),
            count,
        });
    }

    fn gauge(&self, metric: &str, labels: &[(&str, &str)], value: f64) {
        self.record(MetricCall::Gauge {
            metric: metric.to_string(),
            labels: owned_labels(labels),
            value,
        });
    }
}

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Store operations that [`FaultyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Replace,
    Add,
    Remove,
    Cardinality,
    Members,
    Intersect,
    Delete,
    ScanPrefix,
}

/// Store wrapper that fails selected operations with a backend error, or
/// acknowledges selected writes without applying them.
pub struct FaultyStore<S> {
    inner: S,
    failing: Mutex<HashSet<StoreOp>>,
    ignored: Mutex<HashSet<StoreOp>>,
}

impl<S: SetStore> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            ignored: Mutex::new(HashSet::new()),
        }
    }

    /// Report success for `op` without touching the inner store.
    /// Only meaningful for `Replace`, `Add` and `Remove`.
    pub fn ignore_writes(self, op: StoreOp) -> Self {
        self.ignored.lock().expect("faulty store lock").insert(op);
        self
    }

    /// Fail `op` from the start.
    pub fn fail_on(self, op: StoreOp) -> Self {
        self.set_failing(op, true);
        self
    }

    /// Start or stop failing `op`.
    pub fn set_failing(&self, op: StoreOp, failing: bool) {
        let mut set = self.failing.lock().expect("faulty store lock");
        if failing {
            set.insert(op);
        } else {
            set.remove(&op);
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn check(&self, op: StoreOp) -> StoreResult<()> {
        if self.failing.lock().expect("faulty store lock").contains(&op) {
            return Err(StoreError::backend(format!("injected {:?} failure", op)));
        }
        Ok(())
    }

    fn ignores(&self, op: StoreOp) -> bool {
        self.ignored.lock().expect("faulty store lock").contains(&op)
    }
}

#[async_trait]
impl<S: SetStore> SetStore for FaultyStore<S> {
    async fn replace(&self, key: &SetKey, members: &HashSet<String>) -> StoreResult<()> {
        self.check(StoreOp::Replace)?;
        if self.ignores(StoreOp::Replace) {
            return Ok(());
        }
        self.inner.replace(key, members).await
    }

    async fn add(&self, key: &SetKey, members: &[String]) -> StoreResult<u64> {
        self.check(StoreOp::Add)?;
        if self.ignores(StoreOp::Add) {
            return Ok(members.len() as u64);
        }
        self.inner.add(key, members).await
    }

    async fn remove(&self, key: &SetKey, members: &[String]) -> StoreResult<u64> {
        self.check(StoreOp::Remove)?;
        if self.ignores(StoreOp::Remove) {
            return Ok(members.len() as u64);
        }
        self.inner.remove(key, members).await
    }

    async fn cardinality(&self, key: &SetKey) -> StoreResult<u64> {
        self.check(StoreOp::Cardinality)?;
        self.inner.cardinality(key).await
    }

    async fn members(&self, key: &SetKey) -> StoreResult<HashSet<String>> {
        self.check(StoreOp::Members)?;
        self.inner.members(key).await
    }

    async fn intersect(&self, keys: &[SetKey]) -> StoreResult<HashSet<String>> {
        self.check(StoreOp::Intersect)?;
        self.inner.intersect(keys).await
    }

    async fn delete(&self, key: &SetKey) -> StoreResult<bool> {
        self.check(StoreOp::Delete)?;
        self.inner.delete(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<SetKey>> {
        self.check(StoreOp::ScanPrefix)?;
        self.inner.scan_prefix(prefix).await
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Filters shared by the unit and integration suites.

    use super::*;

    /// `RegionFilter("US")` matching ids 1 through 9.
    pub fn region_us() -> Filter {
        Filter::new(Arc::new(FixedIds::new("RegionFilter", (1..=9).collect()))).with_arg("US")
    }

    /// `CurrencyFilter("USD")` matching ids 4, 5 and 6.
    pub fn currency_usd() -> Filter {
        Filter::new(Arc::new(FixedIds::new("CurrencyFilter", vec![4, 5, 6]))).with_arg("USD")
    }

    /// `CurrencyFilter("USD")` scoped to `tenant` through an aux parameter.
    /// Shares its key with [`currency_usd`].
    pub fn currency_usd_for_tenant(tenant: &str) -> Filter {
        currency_usd().with_aux("tenant", serde_json::json!(tenant))
    }

    /// Argument-less `EmptyFilter` that matches nothing.
    pub fn empty_filter() -> Filter {
        Filter::new(Arc::new(FixedIds::new("EmptyFilter", Vec::new())))
    }

    /// Filter backed by a [`SwitchableIds`] the test keeps a handle to.
    pub fn switchable_filter(
        kind: &str,
        arg: impl Into<FilterArg>,
        ids: Vec<EntityId>,
    ) -> (Filter, SwitchableIds) {
        let source = SwitchableIds::new(kind, ids);
        let filter = Filter::new(Arc::new(source.clone())).with_arg(arg);
        (filter, source)
    }

    /// Filter whose source never answers.
    pub fn pending_filter(kind: &str) -> Filter {
        Filter::new(Arc::new(PendingIds::new(kind)))
    }
}

pub use fixtures::*;

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for id lists.

    use super::*;
    use proptest::prelude::*;

    /// Ids from a small domain so that generated lists overlap often.
    pub fn arb_id() -> impl Strategy<Value = EntityId> {
        0i64..64
    }

    /// List of ids, possibly with duplicates, possibly empty.
    pub fn arb_id_list() -> impl Strategy<Value = Vec<EntityId>> {
        prop::collection::vec(arb_id(), 0..32)
    }

    /// Non-empty list of ids.
    pub fn arb_nonempty_id_list() -> impl Strategy<Value = Vec<EntityId>> {
        prop::collection::vec(arb_id(), 1..32)
    }

    /// Between one and four filters with arbitrary non-empty id sets and
    /// distinct kinds.
    pub fn arb_filters() -> impl Strategy<Value = Vec<(Filter, Vec<EntityId>)>> {
        prop::collection::vec(arb_nonempty_id_list(), 1..4).prop_map(|lists| {
            lists
                .into_iter()
                .enumerate()
                .map(|(i, ids)| {
                    let source = FixedIds::new(format!("GeneratedFilter{}", i), ids.clone());
                    (Filter::new(Arc::new(source)), ids)
                })
                .collect()
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

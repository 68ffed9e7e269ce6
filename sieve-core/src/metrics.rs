//! Metrics-sink contract.
//!
//! Metrics are best-effort: sinks never return errors and must not block the
//! caller. Passing no sink is the same as passing [`NoopMetrics`].

/// Counter of ids added to or removed from a filter set by a warm.
///
/// Labels: `action` (`add` | `remove`), `filter` (derived filter name).
pub const WARM_IDS_METRIC: &str = "sieve_warm_ids_total";

/// Gauge of candidate ids entering and leaving a filter query.
///
/// Labels: `state` (`in` | `out`), `filters` (names joined with `/`).
pub const FILTER_IO_METRIC: &str = "sieve_filter_io";

/// Destination for sieve metrics.
pub trait MetricsSink: Send + Sync {
    /// Increment a counter by `count`.
    fn incr(&self, metric: &str, labels: &[(&str, &str)], count: u64);

    /// Set a gauge to `value`.
    fn gauge(&self, metric: &str, labels: &[(&str, &str)], value: f64);
}

/// A sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr(&self, _metric: &str, _labels: &[(&str, &str)], _count: u64) {}

    fn gauge(&self, _metric: &str, _labels: &[(&str, &str)], _value: f64) {}
}

//! Prometheus Metrics Sink
//!
//! Counters and gauges are registered on first use, one vector per metric
//! name, in a registry owned by the sink. Label names are fixed by the first
//! call for a metric; later calls with different label names are dropped.

use std::collections::HashMap;
use std::sync::Mutex;

use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use sieve_core::{MetricsSink, FILTER_IO_METRIC, WARM_IDS_METRIC};
use tracing::warn;

/// [`MetricsSink`] that records into a private Prometheus registry.
pub struct PrometheusMetrics {
    registry: Registry,
    counters: Mutex<HashMap<String, IntCounterVec>>,
    gauges: Mutex<HashMap<String, GaugeVec>>,
}

impl PrometheusMetrics {
    /// Create a sink whose metric names are prefixed with `namespace_`.
    /// An empty namespace adds no prefix.
    pub fn new(namespace: &str) -> Self {
        let prefix = (!namespace.is_empty()).then(|| namespace.to_string());
        let registry = match Registry::new_custom(prefix, None) {
            Ok(registry) => registry,
            Err(e) => {
                warn!(namespace, error = %e, "invalid metrics namespace, using none");
                Registry::new()
            }
        };
        Self {
            registry,
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all recorded metrics in the Prometheus text format.
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn counter(&self, metric: &str, label_names: &[&str]) -> Option<IntCounterVec> {
        let mut counters = self.counters.lock().ok()?;
        if let Some(counter) = counters.get(metric) {
            return Some(counter.clone());
        }

        let counter = IntCounterVec::new(Opts::new(metric, help_for(metric)), label_names)
            .and_then(|c| self.registry.register(Box::new(c.clone())).map(|()| c));
        match counter {
            Ok(counter) => {
                counters.insert(metric.to_string(), counter.clone());
                Some(counter)
            }
            Err(e) => {
                warn!(metric, error = %e, "failed to register counter");
                None
            }
        }
    }

    fn gauge_vec(&self, metric: &str, label_names: &[&str]) -> Option<GaugeVec> {
        let mut gauges = self.gauges.lock().ok()?;
        if let Some(gauge) = gauges.get(metric) {
            return Some(gauge.clone());
        }

        let gauge = GaugeVec::new(Opts::new(metric, help_for(metric)), label_names)
            .and_then(|g| self.registry.register(Box::new(g.clone())).map(|()| g));
        match gauge {
            Ok(gauge) => {
                gauges.insert(metric.to_string(), gauge.clone());
                Some(gauge)
            }
            Err(e) => {
                warn!(metric, error = %e, "failed to register gauge");
                None
            }
        }
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn incr(&self, metric: &str, labels: &[(&str, &str)], count: u64) {
        let names: Vec<&str> = labels.iter().map(|(name, _)| *name).collect();
        let Some(counter) = self.counter(metric, &names) else {
            return;
        };
        let values: HashMap<&str, &str> = labels.iter().copied().collect();
        match counter.get_metric_with(&values) {
            Ok(c) => c.inc_by(count),
            Err(e) => warn!(metric, error = %e, "dropped counter increment"),
        }
    }

    fn gauge(&self, metric: &str, labels: &[(&str, &str)], value: f64) {
        let names: Vec<&str> = labels.iter().map(|(name, _)| *name).collect();
        let Some(gauge) = self.gauge_vec(metric, &names) else {
            return;
        };
        let values: HashMap<&str, &str> = labels.iter().copied().collect();
        match gauge.get_metric_with(&values) {
            Ok(g) => g.set(value),
            Err(e) => warn!(metric, error = %e, "dropped gauge update"),
        }
    }
}

fn help_for(metric: &str) -> &'static str {
    match metric {
        WARM_IDS_METRIC => "Ids added to or removed from filter sets by warms",
        FILTER_IO_METRIC => "Candidate ids entering and leaving filter queries",
        _ => "Sieve metric",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_accumulates() {
        let metrics = PrometheusMetrics::new("");
        let labels = [("action", "add"), ("filter", "currency_filter_USD")];
        metrics.incr(WARM_IDS_METRIC, &labels, 3);
        metrics.incr(WARM_IDS_METRIC, &labels, 0);
        metrics.incr(WARM_IDS_METRIC, &labels, 2);

        let text = metrics.gather_text().unwrap();
        assert!(text.contains(
            "sieve_warm_ids_total{action=\"add\",filter=\"currency_filter_USD\"} 5"
        ));
    }

    #[test]
    fn test_gauge_keeps_last_value() {
        let metrics = PrometheusMetrics::new("");
        let labels = [("state", "in"), ("filters", "region_filter_US")];
        metrics.gauge(FILTER_IO_METRIC, &labels, 9.0);
        metrics.gauge(FILTER_IO_METRIC, &labels, 3.0);

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("sieve_filter_io{filters=\"region_filter_US\",state=\"in\"} 3"));
    }

    #[test]
    fn test_namespace_prefixes_names() {
        let metrics = PrometheusMetrics::new("search");
        metrics.incr(WARM_IDS_METRIC, &[("action", "remove"), ("filter", "f")], 1);

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("search_sieve_warm_ids_total"));
    }

    #[test]
    fn test_mismatched_labels_are_dropped() {
        let metrics = PrometheusMetrics::new("");
        metrics.incr(WARM_IDS_METRIC, &[("action", "add"), ("filter", "f")], 1);
        metrics.incr(WARM_IDS_METRIC, &[("kind", "add")], 1);

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("sieve_warm_ids_total{action=\"add\",filter=\"f\"} 1"));
        assert!(!text.contains("kind="));
    }

    #[test]
    fn test_sinks_do_not_share_state() {
        let a = PrometheusMetrics::new("");
        let b = PrometheusMetrics::new("");
        a.incr(WARM_IDS_METRIC, &[("action", "add"), ("filter", "f")], 1);
        assert!(b.registry().gather().is_empty());
    }
}

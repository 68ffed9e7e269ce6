//! Sieve Telemetry - Logging and Metrics
//!
//! Tracing subscriber setup and a Prometheus-backed [`MetricsSink`].
//!
//! [`MetricsSink`]: sieve_core::MetricsSink

pub mod metrics;
pub mod tracer;

pub use metrics::PrometheusMetrics;
pub use tracer::init_tracing;

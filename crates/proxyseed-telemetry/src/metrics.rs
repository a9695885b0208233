//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Collector registration is private; callers only see typed recorders.
//! - Covers the HTTP surface, pipeline outcomes, queue pressure, and dedup writes.

use anyhow::{Context, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    requests_submitted_total: IntCounter,
    pipeline_outcomes_total: IntCounterVec,
    queue_depth: IntGauge,
    active_workers: IntGauge,
    rate_limit_throttled_total: IntCounter,
    content_store_writes_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Current number of ids waiting in the task queue.
    pub queue_depth: i64,
    /// Workers currently executing a pipeline run.
    pub active_workers: i64,
    /// Total admitted submissions.
    pub requests_submitted_total: u64,
    /// Total submissions rejected by rate limiting.
    pub rate_limit_throttled_total: u64,
    /// Total objects physically written to the content store.
    pub content_store_writes_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests received"),
            &["route", "code"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency by matched route",
            )
            .buckets(vec![0.005, 0.025, 0.1, 0.25, 1.0, 2.5, 10.0]),
            &["route"],
        )?;
        let requests_submitted_total = IntCounter::with_opts(Opts::new(
            "requests_submitted_total",
            "Fetch requests admitted into the pipeline",
        ))?;
        let pipeline_outcomes_total = IntCounterVec::new(
            Opts::new(
                "pipeline_outcomes_total",
                "Pipeline runs finished by terminal status",
            ),
            &["status"],
        )?;
        let queue_depth =
            IntGauge::with_opts(Opts::new("queue_depth", "Request ids waiting for a worker"))?;
        let active_workers = IntGauge::with_opts(Opts::new(
            "active_workers",
            "Workers currently processing a request",
        ))?;
        let rate_limit_throttled_total = IntCounter::with_opts(Opts::new(
            "api_rate_limit_throttled_total",
            "Submissions rejected due to rate limiting",
        ))?;
        let content_store_writes_total = IntCounter::with_opts(Opts::new(
            "content_store_writes_total",
            "Objects physically written to the content store",
        ))?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(requests_submitted_total.clone()))?;
        registry.register(Box::new(pipeline_outcomes_total.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(active_workers.clone()))?;
        registry.register(Box::new(rate_limit_throttled_total.clone()))?;
        registry.register(Box::new(content_store_writes_total.clone()))?;

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                http_requests_total,
                http_request_duration_seconds,
                requests_submitted_total,
                pipeline_outcomes_total,
                queue_depth,
                active_workers,
                rate_limit_throttled_total,
                content_store_writes_total,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Record how long a request on `route` took to produce a response.
    pub fn observe_http_latency(&self, route: &str, seconds: f64) {
        self.inner
            .http_request_duration_seconds
            .with_label_values(&[route])
            .observe(seconds);
    }

    /// Increment the admitted submission counter.
    pub fn inc_submitted(&self) {
        self.inner.requests_submitted_total.inc();
    }

    /// Record a finished pipeline run by terminal status label.
    pub fn inc_pipeline_outcome(&self, status: &str) {
        self.inner
            .pipeline_outcomes_total
            .with_label_values(&[status])
            .inc();
    }

    /// Set the queue depth gauge.
    pub fn set_queue_depth(&self, depth: i64) {
        self.inner.queue_depth.set(depth);
    }

    /// Mark a worker as busy.
    pub fn inc_active_workers(&self) {
        self.inner.active_workers.inc();
    }

    /// Mark a worker as idle again.
    pub fn dec_active_workers(&self) {
        self.inner.active_workers.dec();
    }

    /// Increment the rate limiter throttle counter.
    pub fn inc_rate_limit_throttled(&self) {
        self.inner.rate_limit_throttled_total.inc();
    }

    /// Increment the content store write counter.
    pub fn inc_content_store_write(&self) {
        self.inner.content_store_writes_total.inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_depth: self.inner.queue_depth.get(),
            active_workers: self.inner.active_workers.get(),
            requests_submitted_total: self.inner.requests_submitted_total.get(),
            rate_limit_throttled_total: self.inner.rate_limit_throttled_total.get(),
            content_store_writes_total: self.inner.content_store_writes_total.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_http_request("/v1/requests", 201);
        metrics.inc_submitted();
        metrics.inc_pipeline_outcome("ready");
        metrics.set_queue_depth(3);
        metrics.inc_active_workers();
        metrics.inc_active_workers();
        metrics.dec_active_workers();
        metrics.inc_rate_limit_throttled();
        metrics.inc_content_store_write();
        metrics.observe_http_latency("/v1/requests", 0.012);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queue_depth, 3);
        assert_eq!(snapshot.active_workers, 1);
        assert_eq!(snapshot.requests_submitted_total, 1);
        assert_eq!(snapshot.rate_limit_throttled_total, 1);
        assert_eq!(snapshot.content_store_writes_total, 1);

        let rendered = metrics.render()?;
        assert!(rendered.contains("http_requests_total"));
        assert!(rendered.contains("http_request_duration_seconds_bucket"));
        assert!(rendered.contains("pipeline_outcomes_total"));
        assert!(rendered.contains("api_rate_limit_throttled_total"));
        Ok(())
    }

    #[test]
    fn clones_share_the_registry() -> Result<()> {
        let metrics = Metrics::new()?;
        let clone = metrics.clone();
        clone.inc_submitted();
        assert_eq!(metrics.snapshot().requests_submitted_total, 1);
        Ok(())
    }
}

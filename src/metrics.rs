// src/metrics.rs
//! Prometheus wiring: recorder install, the ingest/cache metric
//! descriptions, and the `/metrics` exposition route.

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Bucket edges in milliseconds. Grounded generateContent calls
/// routinely take tens of seconds, so the default sub-second buckets
/// would put every sample in +Inf.
const PROVIDER_MS_BUCKETS: &[f64] = &[
    500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 20_000.0, 40_000.0, 80_000.0,
];

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the recorder and register every metric the pipeline,
    /// scheduler, and cache emit.
    pub fn init(symbol_ttl_minutes: i64) -> Self {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full("ingest_provider_ms".to_string()),
                PROVIDER_MS_BUCKETS,
            )
            .expect("prometheus: provider latency buckets")
            .install_recorder()
            .expect("prometheus: install recorder");

        describe_counter!("ingest_runs_total", "Job executions started.");
        describe_counter!("ingest_records_total", "Records persisted by the pipeline.");
        describe_counter!("ingest_failures_total", "Job executions that ended failed.");
        describe_counter!(
            "ingest_skipped_total",
            "Articles skipped by title length or duplicate title."
        );
        describe_histogram!("ingest_provider_ms", "Provider call latency in milliseconds.");
        describe_counter!("schedule_fires_total", "Jobs fired onto the worker pool.");
        describe_gauge!("schedule_enabled_jobs", "Enabled jobs seen on the last tick.");
        describe_gauge!("cache_news_total", "Published records currently cached.");
        describe_gauge!(
            "cache_symbol_ttl_minutes",
            "TTL of the per-symbol news slots."
        );
        gauge!("cache_symbol_ttl_minutes").set(symbol_ttl_minutes as f64);

        Self { handle }
    }

    /// Router exposing `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

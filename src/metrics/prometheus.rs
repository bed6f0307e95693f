//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by dropq-fanout and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all dropq-fanout metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Submission attempts, labeled by outcome (accepted, rejected, timeout, error).
pub static SUBMISSION_ATTEMPTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Units accepted by a worker.
pub static UNITS_ACCEPTED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Dispatches aborted because a unit ran out of attempts.
pub static DISPATCH_EXHAUSTED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Poll passes, labeled by outcome (complete, pending).
pub static POLL_PASSES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Jobs still pending after the latest poll pass.
pub static JOBS_PENDING: OnceLock<Gauge> = OnceLock::new();

/// Result fetches that failed and aborted a collection.
pub static FETCH_FAILURES_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Wall time of a full dispatch in seconds.
pub static DISPATCH_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Wall time of a full collection in seconds.
pub static COLLECT_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Later calls are harmless: the statics keep the
/// first registration.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric creation or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let submission_attempts_total = CounterVec::new(
        Opts::new(
            "dropq_fanout_submission_attempts_total",
            "Submission attempts against workers",
        ),
        &["outcome"],
    )?;

    let units_accepted_total = Counter::new(
        "dropq_fanout_units_accepted_total",
        "Work units accepted by a worker",
    )?;

    let dispatch_exhausted_total = Counter::new(
        "dropq_fanout_dispatch_exhausted_total",
        "Dispatches aborted after a unit exhausted its attempts",
    )?;

    let poll_passes_total = CounterVec::new(
        Opts::new("dropq_fanout_poll_passes_total", "Completed poll passes"),
        &["outcome"],
    )?;

    let jobs_pending = Gauge::new(
        "dropq_fanout_jobs_pending",
        "Jobs not yet complete after the latest poll pass",
    )?;

    let fetch_failures_total = Counter::new(
        "dropq_fanout_fetch_failures_total",
        "Result fetches that failed",
    )?;

    let dispatch_duration = Histogram::with_opts(
        HistogramOpts::new(
            "dropq_fanout_dispatch_duration_seconds",
            "Time to submit every unit of a request",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
    )?;

    let collect_duration = Histogram::with_opts(
        HistogramOpts::new(
            "dropq_fanout_collect_duration_seconds",
            "Time to fetch and merge every result of a request",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
    )?;

    registry.register(Box::new(submission_attempts_total.clone()))?;
    registry.register(Box::new(units_accepted_total.clone()))?;
    registry.register(Box::new(dispatch_exhausted_total.clone()))?;
    registry.register(Box::new(poll_passes_total.clone()))?;
    registry.register(Box::new(jobs_pending.clone()))?;
    registry.register(Box::new(fetch_failures_total.clone()))?;
    registry.register(Box::new(dispatch_duration.clone()))?;
    registry.register(Box::new(collect_duration.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = SUBMISSION_ATTEMPTS_TOTAL.set(submission_attempts_total);
    let _ = UNITS_ACCEPTED_TOTAL.set(units_accepted_total);
    let _ = DISPATCH_EXHAUSTED_TOTAL.set(dispatch_exhausted_total);
    let _ = POLL_PASSES_TOTAL.set(poll_passes_total);
    let _ = JOBS_PENDING.set(jobs_pending);
    let _ = FETCH_FAILURES_TOTAL.set(fetch_failures_total);
    let _ = DISPATCH_DURATION.set(dispatch_duration);
    let _ = COLLECT_DURATION.set(collect_duration);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}

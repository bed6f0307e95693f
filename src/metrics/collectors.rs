//! Recording facade over the raw Prometheus metrics.
//!
//! `MetricsCollector` methods are no-ops until `init_metrics()` has run, so
//! library users that never initialise metrics pay nothing.

use std::time::Duration;

use super::prometheus::{
    COLLECT_DURATION, DISPATCH_DURATION, DISPATCH_EXHAUSTED_TOTAL, FETCH_FAILURES_TOTAL,
    JOBS_PENDING, POLL_PASSES_TOTAL, SUBMISSION_ATTEMPTS_TOTAL, UNITS_ACCEPTED_TOTAL,
};
use crate::error::WorkerError;

/// Outcome label for a submission attempt.
pub fn submission_outcome(result: &Result<String, WorkerError>) -> &'static str {
    match result {
        Ok(_) => "accepted",
        Err(WorkerError::Timeout { .. }) => "timeout",
        Err(WorkerError::Status { .. }) | Err(WorkerError::EmptyJobId(_)) => "rejected",
        Err(_) => "error",
    }
}

/// Metrics collector for recording fan-out metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record one submission attempt with its outcome label.
    pub fn record_submission(&self, outcome: &str) {
        if let Some(attempts) = SUBMISSION_ATTEMPTS_TOTAL.get() {
            attempts.with_label_values(&[outcome]).inc();
        }
        if outcome == "accepted" {
            if let Some(accepted) = UNITS_ACCEPTED_TOTAL.get() {
                accepted.inc();
            }
        }

        tracing::trace!(outcome = outcome, "Recorded submission metric");
    }

    pub fn record_dispatch_exhausted(&self) {
        if let Some(exhausted) = DISPATCH_EXHAUSTED_TOTAL.get() {
            exhausted.inc();
        }
    }

    pub fn record_dispatch_duration(&self, duration: Duration) {
        if let Some(histogram) = DISPATCH_DURATION.get() {
            histogram.observe(duration.as_secs_f64());
        }
    }

    /// Record a finished poll pass and the number of jobs still pending.
    pub fn record_poll_pass(&self, pending: usize) {
        let outcome = if pending == 0 { "complete" } else { "pending" };
        if let Some(passes) = POLL_PASSES_TOTAL.get() {
            passes.with_label_values(&[outcome]).inc();
        }
        if let Some(gauge) = JOBS_PENDING.get() {
            gauge.set(pending as f64);
        }
    }

    pub fn record_fetch_failure(&self) {
        if let Some(failures) = FETCH_FAILURES_TOTAL.get() {
            failures.inc();
        }
    }

    pub fn record_collect_duration(&self, duration: Duration) {
        if let Some(histogram) = COLLECT_DURATION.get() {
            histogram.observe(duration.as_secs_f64());
        }
    }
}

//! One non-blocking completion check over a request's accepted jobs.
//!
//! A pass queries every job's owning worker once. Unreachable workers and
//! negative or non-200 answers all read as "not complete yet"; a pass never
//! fails and never mutates the jobs, so callers may repeat it at any cadence.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::debug;

use super::job::AcceptedJob;
use crate::client::WorkerTransport;
use crate::config::FanoutConfig;
use crate::metrics::MetricsCollector;

/// Per-job completion flags from one poll pass, in job order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PollReport {
    pub completed: Vec<bool>,
}

impl PollReport {
    /// True iff every job reported complete (vacuously true for no jobs).
    pub fn all_complete(&self) -> bool {
        self.completed.iter().all(|done| *done)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.iter().filter(|done| **done).count()
    }

    pub fn pending_count(&self) -> usize {
        self.completed.len() - self.completed_count()
    }
}

/// Checks whether all jobs of a request have finished.
pub struct CompletionPoller {
    transport: Arc<dyn WorkerTransport>,
    request_timeout: Duration,
    concurrency: usize,
    metrics: MetricsCollector,
}

impl CompletionPoller {
    pub fn new(transport: Arc<dyn WorkerTransport>, config: &FanoutConfig) -> Self {
        Self {
            transport,
            request_timeout: config.request_timeout,
            concurrency: config.concurrency.max(1),
            metrics: MetricsCollector::new(),
        }
    }

    /// True iff every job reports complete on this pass.
    pub async fn poll(&self, jobs: &[AcceptedJob]) -> bool {
        self.poll_report(jobs).await.all_complete()
    }

    /// Runs one pass and returns the per-job flags.
    pub async fn poll_report(&self, jobs: &[AcceptedJob]) -> PollReport {
        let completed: Vec<bool> = stream::iter(jobs)
            .map(|job| self.is_complete(job))
            .buffered(self.concurrency)
            .collect()
            .await;

        let report = PollReport { completed };
        self.metrics.record_poll_pass(report.pending_count());
        debug!(
            completed = report.completed_count(),
            pending = report.pending_count(),
            "Poll pass finished"
        );
        report
    }

    async fn is_complete(&self, job: &AcceptedJob) -> bool {
        match tokio::time::timeout(self.request_timeout, self.transport.query_status(job)).await {
            Ok(Ok(done)) => {
                if done {
                    debug!(job_id = %job.job_id, worker = %job.worker, "Job complete");
                }
                done
            }
            Ok(Err(e)) => {
                debug!(
                    job_id = %job.job_id,
                    worker = %job.worker,
                    error = %e,
                    "Status query failed, treating job as pending"
                );
                false
            }
            Err(_) => {
                debug!(
                    job_id = %job.job_id,
                    worker = %job.worker,
                    "Status query timed out, treating job as pending"
                );
                false
            }
        }
    }
}

//! Fetches every job's result and merges them into one `MergedResult`.
//!
//! Any failed fetch aborts the collection; a partial merge is never returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{error, info};

use super::job::AcceptedJob;
use super::merge::{MergedResult, RawResult};
use crate::client::WorkerTransport;
use crate::config::FanoutConfig;
use crate::error::{FanoutError, WorkerError};
use crate::metrics::MetricsCollector;

/// Downloads and merges results of completed jobs.
pub struct ResultCollector {
    transport: Arc<dyn WorkerTransport>,
    request_timeout: Duration,
    concurrency: usize,
    metrics: MetricsCollector,
}

impl ResultCollector {
    pub fn new(transport: Arc<dyn WorkerTransport>, config: &FanoutConfig) -> Self {
        Self {
            transport,
            request_timeout: config.request_timeout,
            concurrency: config.concurrency.max(1),
            metrics: MetricsCollector::new(),
        }
    }

    /// Fetches all results and merges them in job order.
    ///
    /// # Errors
    ///
    /// - `FanoutError::Collection` if any fetch fails or a payload is malformed
    /// - `FanoutError::MergeConflict` if two jobs report the same row differently
    pub async fn collect(&self, jobs: &[AcceptedJob]) -> Result<MergedResult, FanoutError> {
        let start_time = Instant::now();

        let results = self.fetch_all(jobs).await?;
        let merged = MergedResult::from_results(results)?;

        let duration = start_time.elapsed();
        self.metrics.record_collect_duration(duration);
        info!(
            jobs = jobs.len(),
            duration_ms = duration.as_millis() as u64,
            "Collected and merged results"
        );

        Ok(merged)
    }

    /// Fetches all raw results, preserving job order.
    pub async fn fetch_all(&self, jobs: &[AcceptedJob]) -> Result<Vec<RawResult>, FanoutError> {
        stream::iter(jobs)
            .map(|job| self.fetch_one(job))
            .buffered(self.concurrency)
            .try_collect()
            .await
    }

    async fn fetch_one(&self, job: &AcceptedJob) -> Result<RawResult, FanoutError> {
        let result =
            match tokio::time::timeout(self.request_timeout, self.transport.fetch_result(job))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(WorkerError::Timeout {
                    worker: job.worker.to_string(),
                    timeout: self.request_timeout,
                }),
            };

        result.map_err(|source| {
            self.metrics.record_fetch_failure();
            error!(
                job_id = %job.job_id,
                worker = %job.worker,
                error = %source,
                "Failed to fetch job result"
            );
            FanoutError::Collection {
                job_id: job.job_id.clone(),
                worker: job.worker.to_string(),
                source,
            }
        })
    }
}

//! Submits every unit of a request to the worker pool.
//!
//! Units are submitted one after another in partition order. Each attempt
//! takes the worker under the pool's shared cursor and advances it, whether
//! the attempt succeeds or fails, so a failed attempt fails over to the next
//! worker. A unit that fails more than `max_attempts` times aborts the whole
//! dispatch and no job list is returned.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::job::{AcceptedJob, PayloadTemplate, SubmissionAttempt, SubmissionPayload, WorkUnit};
use super::worker_pool::WorkerPool;
use crate::client::WorkerTransport;
use crate::config::FanoutConfig;
use crate::error::{FanoutError, WorkerError};
use crate::metrics::{submission_outcome, MetricsCollector};

/// Partitions a request and assigns each unit to a worker.
pub struct JobDispatcher {
    pool: Arc<WorkerPool>,
    transport: Arc<dyn WorkerTransport>,
    max_attempts: u32,
    request_timeout: Duration,
    retry_backoff: Duration,
    metrics: MetricsCollector,
}

impl JobDispatcher {
    pub fn new(
        pool: Arc<WorkerPool>,
        transport: Arc<dyn WorkerTransport>,
        config: &FanoutConfig,
    ) -> Self {
        Self {
            pool,
            transport,
            max_attempts: config.max_attempts,
            request_timeout: config.request_timeout,
            retry_backoff: config.retry_backoff,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Submits units `0..horizon` and returns their accepted jobs in partition order.
    ///
    /// # Errors
    ///
    /// - `FanoutError::Configuration` if `horizon` is zero or the template sets `year`
    /// - `FanoutError::SubmissionExhausted` if any unit runs out of attempts
    pub async fn dispatch(
        &self,
        horizon: u32,
        template: &PayloadTemplate,
    ) -> Result<Vec<AcceptedJob>, FanoutError> {
        if horizon == 0 {
            return Err(FanoutError::Configuration(
                "horizon must cover at least one unit".to_string(),
            ));
        }
        template.validate()?;

        let start_time = Instant::now();
        let mut accepted = Vec::new();

        for unit in WorkUnit::partition(horizon) {
            let payload = template.for_unit(unit);
            match self.submit_unit(&payload).await {
                Ok(job) => accepted.push(job),
                Err(e) => {
                    self.metrics.record_dispatch_exhausted();
                    error!(
                        offset = unit.offset,
                        submitted = accepted.len(),
                        error = %e,
                        "Exceeded max attempts, abandoning dispatch"
                    );
                    return Err(e);
                }
            }
        }

        let duration = start_time.elapsed();
        self.metrics.record_dispatch_duration(duration);
        info!(
            units = accepted.len(),
            duration_ms = duration.as_millis() as u64,
            "All units submitted"
        );

        Ok(accepted)
    }

    /// Retry loop for one unit: fail over until accepted or out of attempts.
    async fn submit_unit(&self, payload: &SubmissionPayload) -> Result<AcceptedJob, FanoutError> {
        let mut failures: u32 = 0;

        loop {
            let attempt = SubmissionAttempt {
                unit: payload.unit,
                worker: self.pool.select().clone(),
                attempt: failures + 1,
            };

            let result = self.attempt(&attempt, payload).await;
            self.metrics.record_submission(submission_outcome(&result));

            match result {
                Ok(job_id) => {
                    info!(
                        offset = attempt.unit.offset,
                        worker = %attempt.worker,
                        attempt = attempt.attempt,
                        job_id = %job_id,
                        "Submitted unit"
                    );
                    return Ok(AcceptedJob::new(job_id, attempt.worker));
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        offset = attempt.unit.offset,
                        worker = %attempt.worker,
                        attempt = attempt.attempt,
                        error = %e,
                        "Submission failed, failing over to next worker"
                    );

                    if failures > self.max_attempts {
                        return Err(FanoutError::SubmissionExhausted {
                            offset: attempt.unit.offset,
                            attempts: failures,
                            last_error: e,
                        });
                    }

                    if !self.retry_backoff.is_zero() {
                        debug!(backoff_ms = self.retry_backoff.as_millis() as u64, "Backing off");
                        tokio::time::sleep(self.retry_backoff).await;
                    }
                }
            }
        }
    }

    /// One bounded submission call; a timeout counts as any other failure.
    async fn attempt(
        &self,
        attempt: &SubmissionAttempt,
        payload: &SubmissionPayload,
    ) -> Result<String, WorkerError> {
        match tokio::time::timeout(
            self.request_timeout,
            self.transport.start_job(&attempt.worker, payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Timeout {
                worker: attempt.worker.to_string(),
                timeout: self.request_timeout,
            }),
        }
    }
}

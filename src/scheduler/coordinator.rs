//! End-to-end fan-out of one request.
//!
//! `FanoutCoordinator::run` dispatches every unit, repeats poll passes until
//! all jobs are done, then collects and merges. The wait is bounded by the
//! configured deadline and can be cancelled through a broadcast channel.
//! Both are observed in every phase; the abandoned phase's outstanding calls
//! are dropped and no further calls are issued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use super::collector::ResultCollector;
use super::dispatcher::JobDispatcher;
use super::job::{AcceptedJob, JobSet, PayloadTemplate};
use super::merge::MergedResult;
use super::poller::{CompletionPoller, PollReport};
use super::worker_pool::{WorkerAddress, WorkerPool};
use crate::client::{HttpWorkerClient, WorkerTransport};
use crate::config::FanoutConfig;
use crate::error::FanoutError;

/// Runs dispatch, completion polling and collection for whole requests.
pub struct FanoutCoordinator {
    config: FanoutConfig,
    dispatcher: JobDispatcher,
    poller: CompletionPoller,
    collector: ResultCollector,
}

impl FanoutCoordinator {
    /// Creates a coordinator over a shared pool and transport.
    ///
    /// # Errors
    ///
    /// Returns `FanoutError::Configuration` if `config` is invalid.
    pub fn new(
        pool: Arc<WorkerPool>,
        transport: Arc<dyn WorkerTransport>,
        config: FanoutConfig,
    ) -> Result<Self, FanoutError> {
        config.validate()?;

        Ok(Self {
            dispatcher: JobDispatcher::new(pool, Arc::clone(&transport), &config),
            poller: CompletionPoller::new(Arc::clone(&transport), &config),
            collector: ResultCollector::new(transport, &config),
            config,
        })
    }

    /// Creates a coordinator talking HTTP to `workers`.
    pub fn with_http(workers: Vec<WorkerAddress>, config: FanoutConfig) -> Result<Self, FanoutError> {
        let pool = WorkerPool::new(workers)?;
        let client = HttpWorkerClient::new(config.request_timeout)
            .map_err(|e| FanoutError::Configuration(e.to_string()))?;
        Self::new(Arc::new(pool), Arc::new(client), config)
    }

    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    /// Submits a request and returns its job set without waiting for completion.
    pub async fn dispatch(
        &self,
        horizon: u32,
        template: &PayloadTemplate,
    ) -> Result<JobSet, FanoutError> {
        let request_id = Uuid::new_v4();
        let jobs = self
            .dispatcher
            .dispatch(horizon, template)
            .instrument(info_span!("dispatch", request_id = %request_id, horizon))
            .await?;
        Ok(JobSet::new(request_id, jobs))
    }

    /// One poll pass over previously dispatched jobs.
    pub async fn poll(&self, jobs: &[AcceptedJob]) -> PollReport {
        self.poller.poll_report(jobs).await
    }

    /// Collects previously dispatched, completed jobs.
    pub async fn collect(&self, jobs: &[AcceptedJob]) -> Result<MergedResult, FanoutError> {
        self.collector.collect(jobs).await
    }

    /// Dispatches, waits and collects one request.
    pub async fn run(
        &self,
        horizon: u32,
        template: &PayloadTemplate,
    ) -> Result<MergedResult, FanoutError> {
        // Held for the whole run so the receiver never sees a closed channel.
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        self.run_until(horizon, template, shutdown_rx).await
    }

    /// Like `run`, stopping with `FanoutError::Cancelled` once `shutdown_rx` fires.
    pub async fn run_until(
        &self,
        horizon: u32,
        template: &PayloadTemplate,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<MergedResult, FanoutError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("fanout", request_id = %request_id, horizon);

        async move {
            let started = Instant::now();
            let deadline = self.config.deadline.map(|limit| started + limit);

            let jobs = tokio::select! {
                result = self.dispatcher.dispatch(horizon, template) => result?,
                _ = wait_until(deadline) => {
                    return Err(FanoutError::DeadlineExceeded {
                        elapsed: started.elapsed(),
                        pending: horizon as usize,
                    });
                }
                _ = shutdown_rx.recv() => {
                    warn!("Cancelled during dispatch");
                    return Err(FanoutError::Cancelled);
                }
            };

            self.wait_for_completion(&jobs, started, deadline, &mut shutdown_rx)
                .await?;

            let merged = tokio::select! {
                result = self.collector.collect(&jobs) => result?,
                _ = wait_until(deadline) => {
                    return Err(FanoutError::DeadlineExceeded {
                        elapsed: started.elapsed(),
                        pending: jobs.len(),
                    });
                }
                _ = shutdown_rx.recv() => {
                    warn!("Cancelled during collection");
                    return Err(FanoutError::Cancelled);
                }
            };

            info!(
                years = merged.num_years(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Request complete"
            );
            Ok(merged)
        }
        .instrument(span)
        .await
    }

    async fn wait_for_completion(
        &self,
        jobs: &[AcceptedJob],
        started: Instant,
        deadline: Option<Instant>,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> Result<(), FanoutError> {
        let mut passes: u64 = 0;

        loop {
            let report = self.poller.poll_report(jobs).await;
            passes += 1;
            if report.all_complete() {
                info!(passes = passes, "All jobs complete");
                return Ok(());
            }

            let now = Instant::now();
            if let Some(deadline) = deadline {
                if now >= deadline {
                    warn!(
                        pending = report.pending_count(),
                        passes = passes,
                        "Deadline reached while jobs still pending"
                    );
                    return Err(FanoutError::DeadlineExceeded {
                        elapsed: started.elapsed(),
                        pending: report.pending_count(),
                    });
                }
            }

            let wake = next_wake(now, self.config.poll_interval, deadline);
            tokio::select! {
                _ = tokio::time::sleep_until(wake) => {}
                _ = shutdown_rx.recv() => {
                    warn!(pending = report.pending_count(), "Cancelled while waiting for jobs");
                    return Err(FanoutError::Cancelled);
                }
            }
        }
    }
}

fn next_wake(now: Instant, poll_interval: Duration, deadline: Option<Instant>) -> Instant {
    let wake = now + poll_interval;
    match deadline {
        Some(deadline) if deadline < wake => deadline,
        _ => wake,
    }
}

/// Resolves at `deadline`, or never when there is none.
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Runs one request over HTTP: the single-call upstream interface.
pub async fn run_request(
    horizon: u32,
    template: &PayloadTemplate,
    workers: Vec<WorkerAddress>,
    config: FanoutConfig,
) -> Result<MergedResult, FanoutError> {
    FanoutCoordinator::with_http(workers, config)?
        .run(horizon, template)
        .await
}

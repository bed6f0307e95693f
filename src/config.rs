//! Configuration for fan-out requests.
//!
//! `FanoutConfig` holds the scheduling knobs (attempt cap, timeouts, poll
//! cadence). `RequestConfig` holds what a deployment supplies through the
//! environment: the worker list, the horizon and the first budget year.
//! Scheduler components never read the environment themselves.

use std::time::Duration;

use crate::error::FanoutError;
use crate::scheduler::worker_pool::{WorkerAddress, WorkerPool};

/// Failed submission attempts tolerated per unit before the dispatch aborts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Per-call timeout against a worker.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// In-flight status/result calls during a poll pass or collection.
pub const DEFAULT_CONCURRENCY: usize = 8;

pub const DEFAULT_NUM_BUDGET_YEARS: u32 = 10;

pub const DEFAULT_START_YEAR: i32 = 2015;

pub const WORKERS_ENV: &str = "DROPQ_WORKERS";
pub const NUM_BUDGET_YEARS_ENV: &str = "NUM_BUDGET_YEARS";
pub const START_YEAR_ENV: &str = "START_YEAR";

/// Scheduling configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutConfig {
    /// Failed attempts tolerated per unit; one more failure aborts the dispatch.
    pub max_attempts: u32,
    /// Upper bound on every single worker call.
    pub request_timeout: Duration,
    /// Pause between poll passes.
    pub poll_interval: Duration,
    /// Overall limit on dispatching, waiting for completion and collecting. `None` waits forever.
    pub deadline: Option<Duration>,
    /// Maximum concurrent status/result calls.
    pub concurrency: usize,
    /// Pause after a failed submission attempt before failing over.
    pub retry_backoff: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: None,
            concurrency: DEFAULT_CONCURRENCY,
            retry_backoff: Duration::ZERO,
        }
    }
}

impl FanoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Checks that every call stays bounded and at least one call can be in flight.
    pub fn validate(&self) -> Result<(), FanoutError> {
        if self.request_timeout.is_zero() {
            return Err(FanoutError::Configuration(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(FanoutError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Deployment-supplied request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub workers: Vec<WorkerAddress>,
    pub horizon: u32,
    pub start_year: i32,
}

impl RequestConfig {
    /// Reads `DROPQ_WORKERS`, `NUM_BUDGET_YEARS` and `START_YEAR`.
    ///
    /// # Errors
    ///
    /// Returns `FanoutError::Configuration` if the worker list is empty or a
    /// number cannot be parsed.
    pub fn from_env() -> Result<Self, FanoutError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, FanoutError> {
        let workers = lookup(WORKERS_ENV).unwrap_or_default();
        let pool = WorkerPool::from_list(&workers)?;

        let horizon = parse_or(&lookup, NUM_BUDGET_YEARS_ENV, DEFAULT_NUM_BUDGET_YEARS)?;
        let start_year = parse_or(&lookup, START_YEAR_ENV, DEFAULT_START_YEAR)?;

        Ok(Self {
            workers: pool.addresses().to_vec(),
            horizon,
            start_year,
        })
    }

    /// Builds the worker pool for this request.
    pub fn pool(&self) -> Result<WorkerPool, FanoutError> {
        WorkerPool::new(self.workers.clone())
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, FanoutError> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            FanoutError::Configuration(format!("{} must be a number, got '{}'", key, raw))
        }),
        _ => Ok(default),
    }
}

//! Error types for dropq-fanout operations.
//!
//! Two layers of errors exist:
//! - `WorkerError`: a single call against one worker failed (transport level)
//! - `FanoutError`: a whole dispatch, poll loop or collection failed

use std::time::Duration;

use thiserror::Error;

/// Errors from a single call against one worker endpoint.
///
/// During dispatch these are transient: the dispatcher fails over to the next
/// worker and only surfaces them inside `FanoutError::SubmissionExhausted`.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Request to {worker} timed out after {timeout:?}")]
    Timeout { worker: String, timeout: Duration },

    #[error("HTTP request failed: {0}")]
    Request(String),

    #[error("Worker {worker} answered with status {code}")]
    Status { worker: String, code: u16 },

    #[error("Worker {0} accepted the job but returned an empty job id")]
    EmptyJobId(String),

    #[error("Failed to parse worker response: {0}")]
    Parse(String),
}

impl WorkerError {
    /// Classifies a reqwest error, keeping timeouts distinct.
    pub(crate) fn from_reqwest(worker: &str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WorkerError::Timeout {
                worker: worker.to_string(),
                timeout,
            }
        } else {
            WorkerError::Request(err.to_string())
        }
    }
}

/// Errors that abort a fan-out request.
#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Work unit {offset} could not be submitted after {attempts} attempts: {last_error}")]
    SubmissionExhausted {
        offset: u32,
        attempts: u32,
        last_error: WorkerError,
    },

    #[error("Failed to collect result of job '{job_id}' from {worker}: {source}")]
    Collection {
        job_id: String,
        worker: String,
        #[source]
        source: WorkerError,
    },

    #[error("Merge conflict in table '{table}': key '{key}' reported twice with different values")]
    MergeConflict { table: String, key: String },

    #[error("Deadline exceeded after {elapsed:?} with {pending} job(s) still pending")]
    DeadlineExceeded { elapsed: Duration, pending: usize },

    #[error("Request cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

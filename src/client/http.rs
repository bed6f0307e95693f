//! HTTP client for dropq worker endpoints.
//!
//! Workers expose three endpoints:
//!
//! - `POST /dropq_start_job` (form body) returns the job id as plain text
//! - `GET /dropq_query_result?job_id=..` returns `YES` once the job is done
//! - `GET /dropq_get_result?job_id=..` returns the JSON result payload

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode, Url};

use crate::error::WorkerError;
use crate::scheduler::job::{AcceptedJob, SubmissionPayload};
use crate::scheduler::merge::RawResult;
use crate::scheduler::worker_pool::WorkerAddress;

const START_JOB_PATH: &str = "dropq_start_job";
const QUERY_RESULT_PATH: &str = "dropq_query_result";
const GET_RESULT_PATH: &str = "dropq_get_result";

/// Body a worker returns from the status endpoint once a job is finished.
pub const COMPLETE_MARKER: &str = "YES";

/// The three worker operations the scheduler relies on.
///
/// Implementations report transport problems as `WorkerError`; what those
/// errors mean (failover, "not yet", fatal) is decided by the caller.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Submits one unit; returns the worker-assigned job id.
    async fn start_job(
        &self,
        worker: &WorkerAddress,
        payload: &SubmissionPayload,
    ) -> Result<String, WorkerError>;

    /// Asks the owning worker whether the job has finished.
    async fn query_status(&self, job: &AcceptedJob) -> Result<bool, WorkerError>;

    /// Downloads and parses the job's result payload.
    async fn fetch_result(&self, job: &AcceptedJob) -> Result<RawResult, WorkerError>;
}

/// `WorkerTransport` over HTTP using reqwest.
#[derive(Debug, Clone)]
pub struct HttpWorkerClient {
    http_client: Client,
    timeout: Duration,
}

impl HttpWorkerClient {
    /// Creates a client whose every request is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError::Request` if the underlying HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, WorkerError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| WorkerError::Request(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn endpoint(worker: &WorkerAddress, path: &str) -> String {
        format!("{}/{}", worker.base_url(), path)
    }

    fn job_url(job: &AcceptedJob, path: &str) -> Result<Url, WorkerError> {
        Url::parse_with_params(
            &Self::endpoint(&job.worker, path),
            &[("job_id", job.job_id.as_str())],
        )
        .map_err(|e| WorkerError::Request(format!("invalid worker URL for {}: {}", job.worker, e)))
    }
}

#[async_trait]
impl WorkerTransport for HttpWorkerClient {
    async fn start_job(
        &self,
        worker: &WorkerAddress,
        payload: &SubmissionPayload,
    ) -> Result<String, WorkerError> {
        let url = Self::endpoint(worker, START_JOB_PATH);

        let response = self
            .http_client
            .post(&url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(payload.to_form_body())
            .send()
            .await
            .map_err(|e| WorkerError::from_reqwest(worker.as_str(), self.timeout, e))?;

        if response.status() != StatusCode::OK {
            return Err(WorkerError::Status {
                worker: worker.to_string(),
                code: response.status().as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| WorkerError::from_reqwest(worker.as_str(), self.timeout, e))?;

        let job_id = body.trim();
        if job_id.is_empty() {
            return Err(WorkerError::EmptyJobId(worker.to_string()));
        }
        Ok(job_id.to_string())
    }

    async fn query_status(&self, job: &AcceptedJob) -> Result<bool, WorkerError> {
        let url = Self::job_url(job, QUERY_RESULT_PATH)?;
        let worker = job.worker.as_str();

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| WorkerError::from_reqwest(worker, self.timeout, e))?;

        if response.status() != StatusCode::OK {
            return Err(WorkerError::Status {
                worker: worker.to_string(),
                code: response.status().as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| WorkerError::from_reqwest(worker, self.timeout, e))?;
        Ok(body.trim() == COMPLETE_MARKER)
    }

    async fn fetch_result(&self, job: &AcceptedJob) -> Result<RawResult, WorkerError> {
        let url = Self::job_url(job, GET_RESULT_PATH)?;
        let worker = job.worker.as_str();

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| WorkerError::from_reqwest(worker, self.timeout, e))?;

        if response.status() != StatusCode::OK {
            return Err(WorkerError::Status {
                worker: worker.to_string(),
                code: response.status().as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| WorkerError::from_reqwest(worker, self.timeout, e))?;
        RawResult::from_slice(&body)
    }
}

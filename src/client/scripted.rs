//! In-memory `WorkerTransport` driven by per-worker scripts.
//!
//! Drives the dispatch/poll/collect flow in unit tests without real workers.
//! Every call is recorded so tests can assert on the exact submission order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::http::WorkerTransport;
use crate::error::WorkerError;
use crate::scheduler::job::{AcceptedJob, SubmissionPayload};
use crate::scheduler::merge::RawResult;
use crate::scheduler::worker_pool::WorkerAddress;

/// Outcome the fake worker gives to one `start_job` call.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    Accept,
    Reject(u16),
    Unreachable,
    /// Sleeps before accepting; lets callers exercise their timeouts.
    Hang(Duration),
}

/// One recorded `start_job` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCall {
    pub worker: WorkerAddress,
    pub offset: u32,
}

#[derive(Debug, Default)]
struct ScriptState {
    start_scripts: HashMap<WorkerAddress, VecDeque<StartOutcome>>,
    starts: Vec<StartCall>,
    status_queries: usize,
    /// job id -> year offset it was submitted with
    jobs: HashMap<String, u32>,
    pending: HashSet<String>,
    unreachable: HashSet<WorkerAddress>,
    results: HashMap<String, Value>,
    next_id: usize,
}

/// Scripted fake worker fleet.
///
/// By default every worker accepts every job, reports it complete, and
/// returns whatever result was registered for the job's year offset.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    state: Mutex<ScriptState>,
    results_by_year: Mutex<HashMap<u32, Value>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues outcomes for the next `start_job` calls against `worker`.
    pub fn script_starts(&self, worker: &WorkerAddress, outcomes: Vec<StartOutcome>) {
        let mut state = self.lock();
        state
            .start_scripts
            .entry(worker.clone())
            .or_default()
            .extend(outcomes);
    }

    /// Registers the payload returned for jobs submitted with `year`.
    pub fn set_result_for_year(&self, year: u32, payload: Value) {
        self.results_by_year
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(year, payload);
    }

    /// Overrides the payload for one job id.
    pub fn set_result_for_job(&self, job_id: &str, payload: Value) {
        self.lock().results.insert(job_id.to_string(), payload);
    }

    /// Marks a job as still running (or finished again when `pending` is false).
    pub fn set_pending(&self, job_id: &str, pending: bool) {
        let mut state = self.lock();
        if pending {
            state.pending.insert(job_id.to_string());
        } else {
            state.pending.remove(job_id);
        }
    }

    /// Makes status and result calls against `worker` fail as unreachable.
    pub fn set_unreachable(&self, worker: &WorkerAddress, unreachable: bool) {
        let mut state = self.lock();
        if unreachable {
            state.unreachable.insert(worker.clone());
        } else {
            state.unreachable.remove(worker);
        }
    }

    /// All `start_job` calls in the order they were made.
    pub fn start_calls(&self) -> Vec<StartCall> {
        self.lock().starts.clone()
    }

    pub fn status_queries(&self) -> usize {
        self.lock().status_queries
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WorkerTransport for ScriptedTransport {
    async fn start_job(
        &self,
        worker: &WorkerAddress,
        payload: &SubmissionPayload,
    ) -> Result<String, WorkerError> {
        let outcome = {
            let mut state = self.lock();
            state.starts.push(StartCall {
                worker: worker.clone(),
                offset: payload.unit.offset,
            });
            state
                .start_scripts
                .get_mut(worker)
                .and_then(VecDeque::pop_front)
                .unwrap_or(StartOutcome::Accept)
        };

        match outcome {
            StartOutcome::Accept => {}
            StartOutcome::Reject(code) => {
                return Err(WorkerError::Status {
                    worker: worker.to_string(),
                    code,
                })
            }
            StartOutcome::Unreachable => {
                return Err(WorkerError::Request(format!("connection refused: {}", worker)))
            }
            StartOutcome::Hang(delay) => tokio::time::sleep(delay).await,
        }

        let mut state = self.lock();
        let job_id = format!("job-{}-{}", state.next_id, worker);
        state.next_id += 1;
        state.jobs.insert(job_id.clone(), payload.unit.offset);
        Ok(job_id)
    }

    async fn query_status(&self, job: &AcceptedJob) -> Result<bool, WorkerError> {
        let mut state = self.lock();
        state.status_queries += 1;
        if state.unreachable.contains(&job.worker) {
            return Err(WorkerError::Request(format!("connection refused: {}", job.worker)));
        }
        Ok(!state.pending.contains(&job.job_id))
    }

    async fn fetch_result(&self, job: &AcceptedJob) -> Result<RawResult, WorkerError> {
        let payload = {
            let state = self.lock();
            if state.unreachable.contains(&job.worker) {
                return Err(WorkerError::Request(format!(
                    "connection refused: {}",
                    job.worker
                )));
            }
            match state.results.get(&job.job_id) {
                Some(payload) => Some(payload.clone()),
                None => state.jobs.get(&job.job_id).and_then(|year| {
                    self.results_by_year
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .get(year)
                        .cloned()
                }),
            }
        };

        let payload = payload.ok_or_else(|| WorkerError::Status {
            worker: job.worker.to_string(),
            code: 404,
        })?;
        RawResult::from_json(payload)
    }
}

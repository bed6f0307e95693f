//! Job definitions for the scheduler.
//!
//! This module defines the core job types used while fanning a request out:
//!
//! - `WorkUnit`: one partition of the horizon, identified by its offset
//! - `PayloadTemplate` / `SubmissionPayload`: form fields sent to a worker
//! - `SubmissionAttempt`: one try of one unit against one worker
//! - `AcceptedJob`: the handle returned once a worker accepts a unit
//! - `JobSet`: the ordered accepted jobs of a whole request

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::worker_pool::WorkerAddress;
use crate::error::FanoutError;

/// Form field carrying the unit offset.
pub const YEAR_FIELD: &str = "year";

/// Form field carrying the serialized reform parameters.
pub const USER_MODS_FIELD: &str = "user_mods";

/// One partition of the overall computation, `0..horizon`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
    pub offset: u32,
}

impl WorkUnit {
    pub fn new(offset: u32) -> Self {
        Self { offset }
    }

    /// All units of a horizon in partition order.
    pub fn partition(horizon: u32) -> impl Iterator<Item = WorkUnit> {
        (0..horizon).map(WorkUnit::new)
    }
}

/// Form fields shared by every unit of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayloadTemplate {
    fields: BTreeMap<String, String>,
}

impl PayloadTemplate {
    /// Creates an empty template.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the standard template: reform parameters keyed by the first budget year.
    ///
    /// Produces a single `user_mods` field holding `{"<start_year>": mods}` as JSON text.
    pub fn from_user_mods(start_year: i32, mods: serde_json::Value) -> Result<Self, FanoutError> {
        let mut keyed = serde_json::Map::new();
        keyed.insert(start_year.to_string(), mods);
        let encoded = serde_json::to_string(&serde_json::Value::Object(keyed))?;
        Ok(Self::new().with_field(USER_MODS_FIELD, encoded))
    }

    /// Builds a template from a JSON object; non-string values are JSON-encoded.
    pub fn from_json(value: serde_json::Value) -> Result<Self, FanoutError> {
        let serde_json::Value::Object(map) = value else {
            return Err(FanoutError::Configuration(
                "payload template must be a JSON object".to_string(),
            ));
        };

        let mut template = Self::new();
        for (key, value) in map {
            let text = match value {
                serde_json::Value::String(s) => s,
                other => serde_json::to_string(&other)?,
            };
            template = template.with_field(key, text);
        }
        Ok(template)
    }

    /// Adds or replaces a field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Rejects templates that would clash with the dispatcher-owned `year` field.
    pub fn validate(&self) -> Result<(), FanoutError> {
        if self.fields.contains_key(YEAR_FIELD) {
            return Err(FanoutError::Configuration(format!(
                "payload template must not set the '{}' field",
                YEAR_FIELD
            )));
        }
        Ok(())
    }

    /// The payload for one unit: template fields plus `year=<offset>`.
    pub fn for_unit(&self, unit: WorkUnit) -> SubmissionPayload {
        let mut fields = self.fields.clone();
        fields.insert(YEAR_FIELD.to_string(), unit.offset.to_string());
        SubmissionPayload { unit, fields }
    }
}

/// Fully built form body for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPayload {
    pub unit: WorkUnit,
    fields: BTreeMap<String, String>,
}

impl SubmissionPayload {
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// `application/x-www-form-urlencoded` body.
    pub fn to_form_body(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// One try of one unit against one worker. Only lives inside the retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionAttempt {
    pub unit: WorkUnit,
    pub worker: WorkerAddress,
    /// 1-based attempt number for this unit.
    pub attempt: u32,
}

/// A unit accepted by a worker: the job id the worker returned plus its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedJob {
    pub job_id: String,
    pub worker: WorkerAddress,
}

impl AcceptedJob {
    pub fn new(job_id: impl Into<String>, worker: WorkerAddress) -> Self {
        Self {
            job_id: job_id.into(),
            worker,
        }
    }
}

/// Ordered accepted jobs of one request, one per unit in partition order.
///
/// Serializable so a caller can dispatch in one process turn and
/// poll or collect in another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSet {
    pub request_id: Uuid,
    pub dispatched_at: DateTime<Utc>,
    pub jobs: Vec<AcceptedJob>,
}

impl JobSet {
    pub fn new(request_id: Uuid, jobs: Vec<AcceptedJob>) -> Self {
        Self {
            request_id,
            dispatched_at: Utc::now(),
            jobs,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

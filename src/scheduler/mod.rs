//! Fan-out of one tax-calculation request across a pool of dropq workers.
//!
//! A request covering `horizon` budget years is split into one unit per year
//! offset. Each unit is submitted to a worker picked round-robin, with
//! failover to the next worker when a submission fails. Completion is then
//! polled, and once every job is done the per-year results are fetched and
//! merged into one result.
//!
//! - **WorkerPool**: ordered worker addresses with a shared round-robin cursor
//! - **JobDispatcher**: submits every unit, failing over up to `max_attempts` times
//! - **CompletionPoller**: one non-blocking completion pass over a job list
//! - **ResultCollector**: fetches every result and merges the category tables
//! - **FanoutCoordinator**: runs the three phases with a deadline and cancellation
//!
//! # Architecture
//!
//! ```text
//!              ┌──────────────────┐
//!              │ FanoutCoordinator│
//!              └────────┬─────────┘
//!        dispatch       │ poll            collect
//!     ┌─────────────────┼─────────────────────┐
//!     ▼                 ▼                     ▼
//! ┌─────────┐     ┌─────────┐           ┌─────────┐
//! │ Worker 1│     │ Worker 2│    ...    │ Worker N│
//! └─────────┘     └─────────┘           └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use dropq_fanout::config::FanoutConfig;
//! use dropq_fanout::scheduler::{run_request, PayloadTemplate, WorkerAddress};
//!
//! let template = PayloadTemplate::new().with_field("first_year", "2015");
//! let workers = vec![WorkerAddress::new("10.0.0.1:5050"), WorkerAddress::new("10.0.0.2:5050")];
//!
//! let merged = run_request(10, &template, workers, FanoutConfig::default()).await?;
//! println!("{}", merged.to_wire());
//! ```

pub mod collector;
pub mod coordinator;
pub mod dispatcher;
pub mod job;
pub mod merge;
pub mod poller;
pub mod worker_pool;

// Re-export main types for convenience
pub use collector::ResultCollector;
pub use coordinator::{run_request, FanoutCoordinator};
pub use dispatcher::JobDispatcher;
pub use job::{AcceptedJob, JobSet, PayloadTemplate, SubmissionAttempt, SubmissionPayload, WorkUnit};
pub use merge::{CategoryKey, CategoryTable, MergedResult, RawResult, TableName};
pub use poller::{CompletionPoller, PollReport};
pub use worker_pool::{WorkerAddress, WorkerPool};

//! dropq-fanout: fan-out of tax-calculation requests across dropq workers.
//!
//! This library splits a request into one job per budget year, submits the
//! jobs round-robin with failover, polls for completion and merges the
//! per-year result tables.

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod scheduler;

// Re-export commonly used types
pub use config::{FanoutConfig, RequestConfig};
pub use error::{FanoutError, WorkerError};
pub use scheduler::{run_request, FanoutCoordinator, MergedResult, PayloadTemplate, WorkerAddress};

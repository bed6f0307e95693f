//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks submission attempts, poll passes and collection timings.
//!
//! ```ignore
//! use dropq_fanout::metrics::{init_metrics, export_metrics};
//!
//! init_metrics()?;
//! // ... run requests ...
//! println!("{}", export_metrics());
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{submission_outcome, MetricsCollector};
pub use prometheus::{export_metrics, init_metrics, REGISTRY};

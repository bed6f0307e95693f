//! Worker transports.
//!
//! The scheduler talks to workers only through the `WorkerTransport` trait.
//! `HttpWorkerClient` is the production implementation; unit tests use the
//! in-memory `ScriptedTransport`.
//!
//! ```ignore
//! use dropq_fanout::client::{HttpWorkerClient, WorkerTransport};
//! use std::time::Duration;
//!
//! let client = HttpWorkerClient::new(Duration::from_secs(1))?;
//! let done = client.query_status(&job).await?;
//! ```

pub mod http;
#[cfg(test)]
pub mod scripted;

pub use http::{HttpWorkerClient, WorkerTransport, COMPLETE_MARKER};
#[cfg(test)]
pub use scripted::{ScriptedTransport, StartCall, StartOutcome};

//! Fixed pool of dropq worker endpoints with round-robin selection.
//!
//! The pool is configured once at process start. Its only mutable state is the
//! shared round-robin cursor, which is advanced atomically so that concurrent
//! submitters never observe and advance the same slot.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::FanoutError;

/// Address of a worker endpoint, e.g. `10.0.0.4:5050`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerAddress(String);

impl WorkerAddress {
    /// Creates an address from a `host:port` string (a scheme prefix is allowed).
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Returns the address as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the base URL used to reach the worker, defaulting to `http://`.
    pub fn base_url(&self) -> String {
        let trimmed = self.0.trim_end_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        }
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Ordered, non-empty set of worker addresses.
#[derive(Debug)]
pub struct WorkerPool {
    addresses: Vec<WorkerAddress>,
    cursor: AtomicUsize,
}

impl WorkerPool {
    /// Creates a pool over the given addresses.
    ///
    /// # Errors
    ///
    /// Returns `FanoutError::Configuration` if `addresses` is empty.
    pub fn new(addresses: Vec<WorkerAddress>) -> Result<Self, FanoutError> {
        if addresses.is_empty() {
            return Err(FanoutError::Configuration(
                "worker pool must contain at least one address".to_string(),
            ));
        }

        Ok(Self {
            addresses,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Parses a comma-separated address list such as `DROPQ_WORKERS`.
    ///
    /// Blank entries are dropped, so `"a:1,,b:2,"` yields two workers.
    pub fn from_list(list: &str) -> Result<Self, FanoutError> {
        let addresses = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(WorkerAddress::new)
            .collect();
        Self::new(addresses)
    }

    /// Returns the worker at `from_index` and the index to use on the next call.
    ///
    /// Pure function of its argument; wraps modulo the pool size.
    pub fn next(&self, from_index: usize) -> (&WorkerAddress, usize) {
        let len = self.addresses.len();
        let idx = from_index % len;
        (&self.addresses[idx], (idx + 1) % len)
    }

    /// Selects the worker under the shared cursor and advances the cursor by one.
    ///
    /// Select-and-advance is a single atomic step.
    pub fn select(&self) -> &WorkerAddress {
        let len = self.addresses.len();
        let previous = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % len))
            .unwrap_or_else(|current| current);
        self.next(previous).0
    }

    /// Current value of the shared cursor.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Number of workers in the pool.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Always false; construction rejects empty pools.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// The configured addresses in round-robin order.
    pub fn addresses(&self) -> &[WorkerAddress] {
        &self.addresses
    }
}

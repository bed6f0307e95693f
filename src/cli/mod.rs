//! Command-line interface for dropq-fanout.
//!
//! Provides commands to run a whole request or to dispatch, poll and
//! collect it in separate steps.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands, EXIT_PENDING};

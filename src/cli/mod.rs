//! Command-line interface for inferq.
//!
//! Provides commands for running a worker pool against the configured
//! broker and for submitting single jobs.

mod commands;

pub use commands::{parse_cli, run, run_with_cli};

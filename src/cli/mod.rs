//! Command-line interface for depfix.
//!
//! Provides commands for running the fix batch and inspecting its results.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};

//! Tooling Layer
//!
//! The `driftsync` command line and its text output.

pub mod cli;
pub mod format;

pub use cli::{Cli, CliContext, Commands};

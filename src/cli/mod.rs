//! CLI module for the Stratus reconciler.
//!
//! This module provides the command-line interface for planning and
//! applying declarative resource configurations.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;

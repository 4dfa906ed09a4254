//! CLI module for the apicache deployment tool.
//!
//! This module provides the command-line interface for managing
//! API cache deployments.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands};
pub use output::OutputFormatter;

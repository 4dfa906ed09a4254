//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::resource::ResourceAddr;

/// apicache - Declarative API cache reconciler.
#[derive(Parser, Debug)]
#[command(name = "apicache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "APICACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text", env = "APICACHE_LOG_FORMAT")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new project.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the deployment configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Generate and display the deployment plan.
    Plan {
        /// Show per-attribute changes.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Converge remote resources to the configuration.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Stop starting new actions after the first failure.
        #[arg(long)]
        fail_fast: bool,

        /// Maximum instances processed at once.
        #[arg(long)]
        parallelism: Option<usize>,
    },

    /// Re-read tracked resources and save what was observed.
    Refresh,

    /// Show tracked resources and how they relate to the configuration.
    Status,

    /// Check for drift between state, remote resources and configuration.
    Drift,

    /// Track an existing remote resource.
    Import {
        /// Address to track it under, e.g. `api_cache.primary`.
        addr: ResourceAddr,

        /// Remote identifier.
        id: String,
    },

    /// Delete every tracked resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Describe resource kinds and their attributes.
    Schema {
        /// Kind to describe; lists all kinds when omitted.
        kind: Option<String>,
    },

    /// Manage state backend.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Force unlock (dangerous).
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_import() {
        let cli = Cli::try_parse_from(["apicache", "import", "api_cache.primary", "api-1"])
            .expect("parses");
        let Commands::Import { addr, id } = cli.command else {
            panic!("expected import");
        };
        assert_eq!(addr, ResourceAddr::new("api_cache", "primary"));
        assert_eq!(id, "api-1");
    }

    #[test]
    fn test_parse_import_rejects_bad_addr() {
        assert!(Cli::try_parse_from(["apicache", "import", "primary", "api-1"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "apicache",
            "apply",
            "--yes",
            "--parallelism",
            "8",
            "--output",
            "json",
            "--log-format",
            "json",
        ])
        .expect("parses");

        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::Apply {
                yes: true,
                fail_fast: false,
                parallelism: Some(8)
            }
        ));
    }
}

// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `jobdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobdag",
    version,
    about = "Run parameterised shell jobs and their dependency chains.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the job file (TOML).
    ///
    /// Default: `$JOBDAG_CONFIG`, or `Jobdag.toml` in the current directory.
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Print every job event as one JSON line on stdout.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List jobs with their status and return code.
    List,

    /// Show the command line a job would run now.
    Show {
        /// Job id.
        job: String,
    },

    /// Run one job and stream its output.
    Run {
        job: String,
    },

    /// Run a job after its transitive dependencies.
    Chain {
        job: String,

        /// Re-run dependencies that already succeeded.
        #[arg(long)]
        force: bool,
    },

    /// Reset a job to idle and drop its output.
    Clear {
        job: String,
    },

    /// Recent values used for one argument of a job.
    History {
        job: String,
        argument: String,
    },

    /// Recently used working directories.
    Dirs,

    /// Try a regex against text (stdin when `--text` is omitted).
    TestRegex {
        regex: String,

        #[arg(long)]
        text: Option<String>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

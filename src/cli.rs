// src/cli.rs

//! CLI argument parsing using `clap` (derive).

use clap::{Parser, ValueEnum};

/// Command-line arguments for `runwatch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runwatch",
    version,
    about = "Run a sequence of external commands under timeout supervision.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the job file (TOML).
    ///
    /// Default: `Runwatch.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Runwatch.toml")]
    pub job: String,

    /// Parse + validate, print the steps, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNWATCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Timeout in seconds for steps that don't set their own.
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
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

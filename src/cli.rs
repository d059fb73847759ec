// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `dirwatch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dirwatch",
    version,
    about = "Watch directory trees and run an action for every qualifying change.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Dirwatch.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Dirwatch.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DIRWATCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the configured daemons, but don't watch.
    #[arg(long)]
    pub dry_run: bool,

    /// On shutdown, drop queued work instead of running it first.
    ///
    /// Overrides `[controller].run_queued_on_stop`.
    #[arg(long)]
    pub discard_queue_on_exit: bool,
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

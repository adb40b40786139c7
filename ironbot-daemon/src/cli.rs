//! CLI argument definitions for ironbot-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Ironbot management daemon.
///
/// Resolves the pipeline, supervises unit workers and serves the HTTP
/// management API.
#[derive(Parser, Debug)]
#[command(name = "ironbot-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to ironbot.toml configuration file.
    #[arg(short, long, default_value = "/etc/ironbot/ironbot.toml")]
    pub config: PathBuf,

    /// Override the pipeline document path from `[general] pipeline_path`.
    #[arg(short, long)]
    pub pipeline: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty, compact).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration and pipeline, then exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,

    /// Stop every running unit when the daemon shuts down.
    ///
    /// By default workers keep running and are adopted on the next start.
    #[arg(long)]
    pub stop_on_exit: bool,
}

//! CLI argument parsing using clap derive API
//!
//! This module defines the command-line interface structure using clap's derive macros.
//! It is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ironbot_control::{Operation, QueueKind};

/// Ironbot -- pipeline resolver and unit supervisor.
///
/// Targets are `all`, a group name or alias (`collectors`, `parsers`,
/// `experts`, `outputs`), or a unit id.
#[derive(Parser, Debug)]
#[command(name = "ironbot", version, about, long_about = None)]
pub struct Cli {
    /// Path to the ironbot.toml configuration file.
    ///
    /// When omitted, /etc/ironbot/ironbot.toml is used if present, otherwise built-in defaults.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the pipeline document path from `[general] pipeline_path`.
    #[arg(short, long, global = true)]
    pub pipeline: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start units.
    Start(TargetArgs),

    /// Stop units (SIGTERM, then SIGKILL after the grace period).
    Stop(TargetArgs),

    /// Stop then start units.
    Restart(TargetArgs),

    /// Ask running units to reload (SIGHUP).
    Reload(TargetArgs),

    /// Reset the rate limit and run units now.
    ForceRun(TargetArgs),

    /// Show unit state.
    Status(TargetArgs),

    /// Allow disabled units to be started again.
    Enable(TargetArgs),

    /// Stop units and prevent them from being started.
    Disable(TargetArgs),

    /// Show the resolved pipeline plan.
    Plan,

    /// Resolve a pipeline document without applying it.
    Check(CheckArgs),

    /// List resolved units.
    Units(TargetArgs),

    /// List derived queue names.
    Queues(QueuesArgs),

    /// Stop a unit, delete its record and remove it from the pipeline document.
    Remove(UnitArgs),

    /// Ask whether a unit may run now (used by worker loops).
    AcquireRun(UnitArgs),

    /// Manage configuration.
    Config(ConfigArgs),
}

impl Commands {
    /// The facade operation for target-scoped commands.
    pub fn operation(&self) -> Option<(Operation, &TargetArgs)> {
        let op = match self {
            Self::Start(args) => (Operation::Start, args),
            Self::Stop(args) => (Operation::Stop, args),
            Self::Restart(args) => (Operation::Restart, args),
            Self::Reload(args) => (Operation::Reload, args),
            Self::ForceRun(args) => (Operation::ForceRun, args),
            Self::Status(args) => (Operation::Status, args),
            Self::Enable(args) => (Operation::Enable, args),
            Self::Disable(args) => (Operation::Disable, args),
            _ => return None,
        };
        Some(op)
    }
}

// ---- targets ----

/// Unit selection.
#[derive(Args, Debug)]
pub struct TargetArgs {
    /// `all`, a group name or alias, or a unit id.
    #[arg(default_value = "all")]
    pub target: String,
}

/// A single unit.
#[derive(Args, Debug)]
pub struct UnitArgs {
    /// Unit id.
    pub id: String,
}

// ---- check ----

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Pipeline document to check (default: the configured pipeline).
    pub file: Option<PathBuf>,
}

// ---- queues ----

#[derive(Args, Debug)]
pub struct QueuesArgs {
    /// Queue kind (source, destination, internal, all).
    #[arg(default_value = "all")]
    pub kind: QueueKind,
}

// ---- config ----

/// Manage ironbot configuration.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate ironbot.toml and the pipeline document.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only a specific section (general, supervisor, api, metrics).
        #[arg(long)]
        section: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_start_defaults_to_all() {
        let cli = Cli::try_parse_from(["ironbot", "start"]).expect("parse succeeded");
        let (op, args) = cli.command.operation().expect("target command");
        assert_eq!(op, Operation::Start);
        assert_eq!(args.target, "all");
    }

    #[test]
    fn test_cli_parse_force_run_with_unit() {
        let cli =
            Cli::try_parse_from(["ironbot", "force-run", "feodo-collector"]).expect("parse succeeded");
        let (op, args) = cli.command.operation().expect("target command");
        assert_eq!(op, Operation::ForceRun);
        assert_eq!(args.target, "feodo-collector");
    }

    #[test]
    fn test_cli_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ironbot",
            "status",
            "parsers",
            "--output",
            "json",
            "--pipeline",
            "/tmp/pipeline.toml",
        ])
        .expect("parse succeeded");
        assert!(matches!(cli.output, OutputFormat::Json));
        assert_eq!(cli.pipeline, Some(PathBuf::from("/tmp/pipeline.toml")));
    }

    #[test]
    fn test_cli_parse_queues_kind() {
        let cli = Cli::try_parse_from(["ironbot", "queues", "internal"]).expect("parse succeeded");
        match cli.command {
            Commands::Queues(args) => assert_eq!(args.kind, QueueKind::Internal),
            _ => panic!("expected Queues command"),
        }
    }

    #[test]
    fn test_cli_parse_queues_rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["ironbot", "queues", "bogus"]).is_err());
    }

    #[test]
    fn test_cli_parse_remove_requires_id() {
        assert!(Cli::try_parse_from(["ironbot", "remove"]).is_err());
        let cli = Cli::try_parse_from(["ironbot", "remove", "old-parser"]).expect("parse succeeded");
        assert!(cli.command.operation().is_none());
    }

    #[test]
    fn test_cli_parse_config_show_section() {
        let cli = Cli::try_parse_from(["ironbot", "config", "show", "--section", "supervisor"])
            .expect("parse succeeded");
        match cli.command {
            Commands::Config(ConfigArgs {
                action: ConfigAction::Show { section },
            }) => assert_eq!(section.as_deref(), Some("supervisor")),
            _ => panic!("expected config show"),
        }
    }

    #[test]
    fn test_cli_parse_check_optional_file() {
        let cli = Cli::try_parse_from(["ironbot", "check"]).expect("parse succeeded");
        match cli.command {
            Commands::Check(args) => assert!(args.file.is_none()),
            _ => panic!("expected Check command"),
        }
    }
}

//! `ironbot` binary entry point

use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use ironbot_cli::cli::{Cli, Commands};
use ironbot_cli::commands::{Context, config, ops, plan};
use ironbot_cli::error::CliError;
use ironbot_cli::output::OutputWriter;
use ironbot_core::IronbotError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let writer = OutputWriter::new(cli.output);
    if let Err(e) = run(cli, &writer).await {
        report_error(&e);
        std::process::exit(e.exit_code());
    }
}

/// Log to stderr so stdout stays reserved for command output.
fn init_tracing(log_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.unwrap_or("warn")))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, writer: &OutputWriter) -> Result<(), CliError> {
    let config_path = cli.config.as_deref();
    let pipeline_path = cli.pipeline.as_deref();

    if let Commands::Config(args) = cli.command {
        return config::execute(args, config_path, pipeline_path, writer).await;
    }

    let ctx = Context::load(config_path, pipeline_path).await?;
    if let Some((operation, args)) = cli.command.operation() {
        return ops::execute(operation, args, &ctx, writer).await;
    }

    match &cli.command {
        Commands::Plan => plan::execute_plan(&ctx, writer).await,
        Commands::Check(args) => plan::execute_check(args, &ctx, writer).await,
        Commands::Units(args) => plan::execute_units(args, &ctx, writer).await,
        Commands::Queues(args) => plan::execute_queues(args, &ctx, writer).await,
        Commands::Remove(args) => ops::remove(args, &ctx, writer).await,
        Commands::AcquireRun(args) => ops::acquire_run(args, &ctx, writer).await,
        Commands::Config(_) => unreachable!("config runs without a context"),
        _ => unreachable!("target commands are dispatched through operation()"),
    }
}

fn report_error(error: &CliError) {
    eprintln!("{} {}", "error:".red().bold(), error);
    if let CliError::Core(IronbotError::Resolution(errors)) = error {
        for e in errors {
            eprintln!("  {} {}", "-".red(), e);
        }
    }
}

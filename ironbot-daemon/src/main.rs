//! `ironbot-daemon` entry point

use anyhow::Result;
use clap::Parser;

use ironbot_core::config::IronbotConfig;
use ironbot_daemon::cli::DaemonCli;
use ironbot_daemon::daemon::Daemon;
use ironbot_daemon::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = IronbotConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e))?;
    apply_cli_overrides(&mut config, &cli);

    if cli.validate {
        let pipeline = cli
            .pipeline
            .clone()
            .unwrap_or_else(|| config.general.pipeline_path.clone().into());
        let document = ironbot_core::unit::PipelineConfig::load(&pipeline).await?;
        match ironbot_topology::resolve(&document) {
            Ok(plan) => {
                println!(
                    "configuration is valid: {} unit(s), fingerprint {}",
                    plan.len(),
                    plan.fingerprint()
                );
                return Ok(());
            }
            Err(errors) => {
                for e in &errors {
                    eprintln!("  - {e}");
                }
                return Err(anyhow::anyhow!(
                    "pipeline {} is invalid: {} error(s)",
                    pipeline.display(),
                    errors.len()
                ));
            }
        }
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        config = %cli.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        "ironbot-daemon starting"
    );

    let daemon = Daemon::build(config, cli.pipeline.clone())
        .await?
        .stop_on_exit(cli.stop_on_exit);
    daemon.run().await?;

    tracing::info!("ironbot-daemon shut down");
    Ok(())
}

/// Command-line flags win over file and environment.
fn apply_cli_overrides(config: &mut IronbotConfig, cli: &DaemonCli) {
    if let Some(level) = &cli.log_level {
        config.general.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.general.log_format = format.clone();
    }
    if let Some(pid_file) = &cli.pid_file {
        config.general.pid_file = pid_file.clone();
    }
}

//! Command handlers -- one module per command family

pub mod config;
pub mod ops;
pub mod plan;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ironbot_control::Controller;
use ironbot_core::config::IronbotConfig;
use ironbot_core::unit::PipelineConfig;
use ironbot_supervisor::{FileStatusStore, ProcessLauncher, Supervisor, SupervisorOptions};
use tracing::debug;

use crate::error::CliError;

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/ironbot/ironbot.toml";

/// Load `ironbot.toml`.
///
/// An explicit path must exist. Without one, the default path is used when
/// present and built-in defaults (plus env overrides) otherwise.
/// Returns the config and a description of where it came from.
pub async fn load_config(explicit: Option<&Path>) -> Result<(IronbotConfig, String), CliError> {
    let path = match explicit {
        Some(path) => path,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Path::new(DEFAULT_CONFIG_PATH),
        None => {
            debug!("no config file, using built-in defaults");
            let mut config = IronbotConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            return Ok((config, "built-in defaults".to_owned()));
        }
    };
    let config = IronbotConfig::load(path).await?;
    Ok((config, path.display().to_string()))
}

/// Everything a command needs: effective config and the pipeline location.
pub struct Context {
    pub config: IronbotConfig,
    pub config_source: String,
    pub pipeline_path: PathBuf,
}

impl Context {
    pub async fn load(config: Option<&Path>, pipeline: Option<&Path>) -> Result<Self, CliError> {
        let (config, config_source) = load_config(config).await?;
        let pipeline_path = pipeline
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(&config.general.pipeline_path));
        Ok(Self {
            config,
            config_source,
            pipeline_path,
        })
    }

    /// Read the pipeline document without resolving it.
    pub async fn pipeline(&self) -> Result<PipelineConfig, CliError> {
        Ok(PipelineConfig::load(&self.pipeline_path).await?)
    }

    /// Open the management facade over the on-disk state directory.
    ///
    /// Workers started here outlive the CLI process; later invocations find them
    /// again through their persisted pid.
    pub async fn controller(&self) -> Result<Controller, CliError> {
        let general = &self.config.general;
        let supervisor = Supervisor::new(
            Arc::new(FileStatusStore::new(&general.state_dir)),
            Arc::new(ProcessLauncher::new(Some(PathBuf::from(&general.log_dir)))),
            SupervisorOptions::from(&self.config.supervisor),
        );
        let (controller, report) = Controller::open(
            &self.pipeline_path,
            supervisor,
            self.config.supervisor.max_concurrent_ops,
        )
        .await?;
        debug!(fingerprint = %report.fingerprint, units = report.units, "controller ready");
        Ok(controller)
    }
}

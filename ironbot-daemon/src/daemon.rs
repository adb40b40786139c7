//! Daemon assembly and lifecycle.
//!
//! The [`Daemon`] loads the pipeline through the management facade, writes
//! the PID file, serves the HTTP API, sweeps unit liveness and waits for a
//! shutdown signal.
//!
//! # Shutdown
//!
//! 1. Stop accepting HTTP requests and drain in-flight ones
//! 2. Stop background tasks (liveness sweep, uptime updater)
//! 3. Stop every unit when `--stop-on-exit` was given; otherwise workers keep
//!    running and are adopted by the next daemon through their records
//! 4. Remove the PID file

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::broadcast;

use ironbot_control::{Controller, Target};
use ironbot_core::config::IronbotConfig;
use ironbot_supervisor::{FileStatusStore, ProcessLauncher, Supervisor, SupervisorOptions};

use crate::api::{self, AppState};
use crate::metrics_server;

/// The daemon.
pub struct Daemon {
    config: IronbotConfig,
    controller: Arc<Controller>,
    shutdown_tx: broadcast::Sender<()>,
    start_time: Instant,
    stop_on_exit: bool,
}

impl Daemon {
    /// Build with the on-disk status store and the process launcher from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the metrics recorder
    /// cannot be installed or the pipeline document does not resolve.
    pub async fn build(config: IronbotConfig, pipeline: Option<PathBuf>) -> Result<Self> {
        let supervisor = Supervisor::new(
            Arc::new(FileStatusStore::new(&config.general.state_dir)),
            Arc::new(ProcessLauncher::new(non_empty(&config.general.log_dir))),
            SupervisorOptions::from(&config.supervisor),
        );
        Self::build_with_supervisor(config, pipeline, supervisor).await
    }

    /// Build around an existing supervisor.
    pub async fn build_with_supervisor(
        config: IronbotConfig,
        pipeline: Option<PathBuf>,
        supervisor: Supervisor,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            record_build_info();
        }

        let pipeline_path =
            pipeline.unwrap_or_else(|| PathBuf::from(&config.general.pipeline_path));
        let (controller, report) = Controller::open(
            &pipeline_path,
            supervisor,
            config.supervisor.max_concurrent_ops,
        )
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "failed to load pipeline {}: {}",
                pipeline_path.display(),
                e
            )
        })?;

        tracing::info!(
            pipeline = %pipeline_path.display(),
            units = report.units,
            queues = report.queues,
            fingerprint = %report.fingerprint,
            "pipeline loaded"
        );

        let (shutdown_tx, _) = broadcast::channel(4);
        Ok(Self {
            config,
            controller: Arc::new(controller),
            shutdown_tx,
            start_time: Instant::now(),
            stop_on_exit: false,
        })
    }

    /// Stop all units when the daemon exits.
    pub fn stop_on_exit(mut self, enabled: bool) -> Self {
        self.stop_on_exit = enabled;
        self
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn config(&self) -> &IronbotConfig {
        &self.config
    }

    /// The router served by [`run`](Self::run).
    pub fn router(&self) -> axum::Router {
        let state = AppState {
            controller: Arc::clone(&self.controller),
            start_time: self.start_time,
        };
        api::build_router(state)
    }

    /// Serve until SIGTERM or SIGINT.
    pub async fn run(self) -> Result<()> {
        let pid_path = non_empty(&self.config.general.pid_file);
        if let Some(path) = &pid_path {
            write_pid_file(path)?;
        }

        let result = self.serve().await;

        if let Some(path) = &pid_path {
            remove_pid_file(path);
        }
        result
    }

    async fn serve(&self) -> Result<()> {
        let liveness = spawn_liveness_sweep(
            Arc::clone(&self.controller),
            self.config.supervisor.liveness_interval(),
            self.shutdown_tx.subscribe(),
        );
        let uptime = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, self.shutdown_tx.subscribe()));

        let served = if self.config.api.enabled {
            let addr: SocketAddr = format!("{}:{}", self.config.api.listen_addr, self.config.api.port)
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid api listen address: {}", e))?;
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .map_err(|e| anyhow::anyhow!("failed to bind {}: {}", addr, e))?;
            tracing::info!(listen_addr = %addr, "management API listening");

            axum::serve(listener, self.router())
                .with_graceful_shutdown(async {
                    match wait_for_shutdown_signal().await {
                        Ok(signal) => tracing::info!(signal = signal, "shutdown signal received"),
                        Err(e) => tracing::error!(error = %e, "signal handling failed"),
                    }
                })
                .await
                .map_err(|e| anyhow::anyhow!("api server failed: {}", e))
        } else {
            tracing::info!("management API disabled");
            wait_for_shutdown_signal()
                .await
                .map(|signal| tracing::info!(signal = signal, "shutdown signal received"))
        };

        tracing::info!("broadcasting shutdown signal to all tasks");
        let _ = self.shutdown_tx.send(());
        let _ = liveness.await;
        if let Some(task) = uptime {
            let _ = task.await;
        }

        if self.stop_on_exit {
            self.stop_all_units().await;
        }
        served
    }

    async fn stop_all_units(&self) {
        match self.controller.stop(&Target::All).await {
            Ok(report) if report.has_errors() => {
                tracing::warn!(failed = report.failed(), "some units did not stop cleanly");
            }
            Ok(report) => tracing::info!(units = report.outcomes.len(), "all units stopped"),
            Err(e) => tracing::error!(error = %e, "failed to stop units"),
        }
    }
}

fn non_empty(value: &str) -> Option<PathBuf> {
    (!value.is_empty()).then(|| PathBuf::from(value))
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - `create_new(true)` makes creation atomic, so a second daemon fails instead of overwriting
/// - The created file must be a regular file (no symlinks)
/// - Parent directory is created 0o700, the file 0o600
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .mode(0o700)
            .recursive(true)
            .create(parent)?;
    }

    let pid = std::process::id();
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on shutdown. Failure is logged, not returned.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Periodically refresh liveness of every unit so crashes are recorded even
/// when nobody asks for status.
pub fn spawn_liveness_sweep(
    controller: Arc<Controller>,
    every: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let crashed = controller.poll_liveness().await;
                    for unit_id in crashed {
                        tracing::warn!(unit_id = %unit_id, "worker found dead during liveness sweep");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("liveness sweep shutting down");
                    break;
                }
            }
        }
    })
}

/// Record build info (always 1, with version label).
fn record_build_info() {
    use ironbot_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "daemon metrics recorded");
}

/// Spawn a background task that updates the uptime gauge every 10 seconds.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    use ironbot_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

//! Log subscriber setup for ironbot-daemon.
//!
//! The `[general]` section picks the level and format. `RUST_LOG`, when
//! set, replaces `log_level` entirely.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use ironbot_core::config::GeneralConfig;

/// Daemon log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per event, span fields flattened in.
    Json,
    /// Multi-line colored output for a terminal.
    Pretty,
    /// Single-line text, for journald and similar collectors.
    Compact,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => anyhow::bail!(
                "unknown log format '{other}', expected 'json', 'pretty' or 'compact'"
            ),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        })
    }
}

fn level_filter(log_level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(log_level).with_context(|| format!("invalid log level '{log_level}'"))
}

/// Install the global tracing subscriber.
///
/// Call once, before the first event is emitted. Unit operations log with a
/// `unit_id` field, so JSON output can be filtered per unit downstream.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let format: LogFormat = config.log_format.parse()?;
    let filter = level_filter(&config.log_level)?;
    let layer = tracing_subscriber::fmt::layer().with_target(true);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(layer.json().flatten_event(true).with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
    };
    installed.with_context(|| format!("failed to initialize {format} log subscriber"))
}

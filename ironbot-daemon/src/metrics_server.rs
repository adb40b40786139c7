//! Prometheus scrape endpoint.
//!
//! The exporter's own HTTP listener serves unit lifecycle counters on a
//! dedicated port. There is no other HTTP surface in the daemon.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use ironbot_core::config::MetricsConfig;
use ironbot_core::metrics as m;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

/// The only path the exporter listener answers on.
const SCRAPE_PATH: &str = "/metrics";

/// Resolve the listen address from `[metrics]`. IPv6 literals are accepted
/// without brackets.
pub fn scrape_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    if config.endpoint != SCRAPE_PATH {
        anyhow::bail!(
            "unsupported metrics endpoint '{}': only '{SCRAPE_PATH}' is served",
            config.endpoint
        );
    }
    let ip: IpAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("invalid metrics listen address '{}'", config.listen_addr))?;
    Ok(SocketAddr::new(ip, config.port))
}

/// Install the global recorder and start the scrape listener.
///
/// Once per process: a second call fails because the recorder is global.
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = scrape_addr(config)?;
    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint listens on all interfaces"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", "ironbot")
        .set_buckets_for_metric(
            Matcher::Full(m::UNIT_STOP_DURATION_SECONDS.to_owned()),
            &m::STOP_DURATION_BUCKETS,
        )
        .context("invalid stop duration buckets")?
        .install()
        .context("failed to install metrics recorder")?;

    m::describe_all();
    tracing::info!(listen_addr = %addr, path = SCRAPE_PATH, "metrics endpoint active");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(listen_addr: &str) -> MetricsConfig {
        MetricsConfig {
            enabled: true,
            listen_addr: listen_addr.to_owned(),
            ..MetricsConfig::default()
        }
    }

    #[test]
    fn test_scrape_addr_accepts_ipv6_literal() {
        let addr = scrape_addr(&config("::1")).unwrap();
        assert_eq!(addr, "[::1]:9470".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_scrape_addr_rejects_hostname() {
        let err = scrape_addr(&config("localhost")).unwrap_err();
        assert!(err.to_string().contains("invalid metrics listen address"));
    }
}

//! Prometheus scrape endpoint for the daemon.
//!
//! The exporter's built-in HTTP listener serves `/metrics`. Scan duration
//! histograms use the buckets from `modscan_core::metrics`, which cover
//! module download and build time.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use modscan_core::config::MetricsConfig;
use modscan_core::metrics as m;

/// Only path the exporter listener serves.
const SCRAPE_PATH: &str = "/metrics";

/// Resolve the listener address from `[metrics]`.
pub fn scrape_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    if config.endpoint != SCRAPE_PATH {
        anyhow::bail!(
            "unsupported metrics endpoint '{}': the exporter only serves '{}'",
            config.endpoint,
            SCRAPE_PATH
        );
    }
    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .with_context(|| format!("invalid metrics listen address '{}'", config.listen_addr))
}

/// Install the global recorder and start serving scrapes.
///
/// Call once per process; a second recorder cannot be installed.
pub fn install_metrics_recorder(config: &MetricsConfig, workers: usize) -> Result<()> {
    let addr = scrape_addr(config)?;
    if addr.ip().is_unspecified() {
        tracing::warn!(listen_addr = %addr, "metrics endpoint listens on all interfaces");
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(m::SCANNER_SCAN_DURATION_SECONDS.to_owned()),
            &m::SCAN_DURATION_BUCKETS,
        )
        .context("invalid scan duration buckets")?
        .install()
        .context("failed to install metrics recorder")?;

    m::describe_all();
    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    metrics::gauge!(m::DAEMON_WORKERS).set(workers as f64);

    tracing::info!(listen_addr = %addr, workers, "metrics endpoint active");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(listen_addr: &str, endpoint: &str) -> MetricsConfig {
        MetricsConfig {
            enabled: true,
            listen_addr: listen_addr.to_owned(),
            port: 9464,
            endpoint: endpoint.to_owned(),
        }
    }

    #[test]
    fn scrape_addr_joins_host_and_port() {
        let addr = scrape_addr(&config("127.0.0.1", "/metrics")).unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:9464");
    }

    #[test]
    fn scrape_addr_rejects_other_paths() {
        let err = scrape_addr(&config("127.0.0.1", "/stats")).unwrap_err();
        assert!(err.to_string().contains("/stats"));
    }

    #[test]
    fn scrape_addr_rejects_hostnames() {
        assert!(scrape_addr(&config("metrics.internal", "/metrics")).is_err());
    }
}

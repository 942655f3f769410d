//! Prometheus endpoint for fleet runs.
//!
//! A fleet run takes tens of minutes, so the runner exposes the engine's
//! counters over the `metrics-exporter-prometheus` HTTP listener while devices
//! install. Duration histograms get buckets sized for reboots and switchovers
//! rather than the exporter's sub-second defaults.
//!
//! # Usage
//!
//! ```ignore
//! if let Some(addr) = install_metrics_recorder(&config.metrics)? {
//!     tracing::info!(%addr, "scrape /metrics during the run");
//! }
//! ```

use std::net::{IpAddr, SocketAddr};

use anyhow::Result;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use osinstall_core::config::MetricsConfig;
use osinstall_core::metrics as m;

/// Whole-device run buckets in seconds (1 minute to 2 hours).
const DEVICE_RUN_BUCKETS: &[f64] = &[60.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0, 7200.0];

/// Switchover buckets in seconds (10 seconds to 15 minutes).
const SWITCHOVER_BUCKETS: &[f64] = &[10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0];

/// Install the global recorder and start the HTTP listener.
///
/// Returns the bound address, or `None` when `[metrics] enabled = false`.
/// Call once per process, before the fleet starts.
///
/// # Errors
///
/// - `listen_addr` is not an IP address
/// - Socket binding fails or a global recorder is already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<Option<SocketAddr>> {
    if !config.enabled {
        tracing::debug!("metrics endpoint disabled");
        return Ok(None);
    }

    let addr = listen_addr(config)?;
    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces"
        );
    }

    builder()?
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    m::describe_all();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(Some(addr))
}

fn builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(m::DEVICE_RUN_DURATION_SECONDS.to_owned()),
            DEVICE_RUN_BUCKETS,
        )
        .and_then(|b| {
            b.set_buckets_for_metric(
                Matcher::Full(m::SWITCHOVER_DURATION_SECONDS.to_owned()),
                SWITCHOVER_BUCKETS,
            )
        })
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))
}

fn listen_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    let ip: IpAddr = config
        .listen_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address '{}': {}", config.listen_addr, e))?;
    Ok(SocketAddr::new(ip, config.port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(listen_addr: &str, port: u16) -> MetricsConfig {
        MetricsConfig {
            enabled: true,
            listen_addr: listen_addr.to_owned(),
            port,
        }
    }

    #[test]
    fn listen_addr_accepts_ipv4_and_ipv6() {
        assert_eq!(
            listen_addr(&config("127.0.0.1", 9200)).unwrap(),
            "127.0.0.1:9200".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            listen_addr(&config("::1", 9200)).unwrap(),
            "[::1]:9200".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn invalid_listen_addr_fails_before_install() {
        let err = install_metrics_recorder(&config("not-an-address", 9100)).unwrap_err();
        assert!(err.to_string().contains("invalid metrics listen address 'not-an-address'"));
    }

    #[test]
    fn disabled_endpoint_installs_nothing() {
        let mut disabled = config("127.0.0.1", 9100);
        disabled.enabled = false;
        assert_eq!(install_metrics_recorder(&disabled).unwrap(), None);
    }

    #[test]
    fn bucket_layout_is_accepted() {
        assert!(builder().is_ok());
        assert!(DEVICE_RUN_BUCKETS.windows(2).all(|w| w[0] < w[1]));
        assert!(SWITCHOVER_BUCKETS.windows(2).all(|w| w[0] < w[1]));
    }
}

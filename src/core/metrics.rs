use std::net::SocketAddr;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::core::config::Settings;

/// Installs the Prometheus recorder with its own scrape listener. Must run inside the
/// tokio runtime.
pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let addr: SocketAddr = settings
        .telemetry()
        .metrics_addr
        .parse()
        .with_context(|| format!("Invalid METRICS_ADDR {}", settings.telemetry().metrics_addr))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    tracing::info!(%addr, "Prometheus exporter listening");
    Ok(())
}

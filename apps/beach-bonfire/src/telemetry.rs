use std::net::SocketAddr;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global tracing subscriber and, when an address is given,
/// the Prometheus exporter. Must run inside the Tokio runtime.
///
/// `RUST_LOG` overrides `default_filter`. Logs go to stderr so the
/// `connect` client keeps stdout for chat.
pub fn init(default_filter: &str, metrics_addr: Option<SocketAddr>) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("failed to initialise tracing subscriber")?;

    if let Some(addr) = metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .with_context(|| format!("failed to install Prometheus exporter on {addr}"))?;
        info!(metrics_addr = %addr, "Prometheus exporter enabled");
    }

    Ok(())
}

//! Relay binary: default ports, env-driven log filter, signal-driven
//! shutdown. All other configuration belongs to the peers.

use anyhow::{Context, Result};
use signal_relay::{RelayConfig, RelayServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = RelayConfig::default();
    tracing::info!(
        detector = %config.detector_addr,
        display = %config.display_addr,
        control = %config.control_addr,
        discovery = %config.discovery_addr,
        "Signal relay starting"
    );

    let server = RelayServer::bind(config).await.context("bind relay ports")?;
    server
        .run_until(shutdown_signal())
        .await
        .context("relay runtime")?;

    tracing::info!("Signal relay stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::error!(error = %e, "Failed to install SIGTERM handler");
            return std::future::pending().await;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

//! notify-hub server entry point.
//!
//! Starts the Axum HTTP server with the WebSocket endpoint, the ingress
//! API and, when configured, the upstream event source and the
//! cross-instance relay.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use notify_hub::app_state::AppState;
use notify_hub::config::HubConfig;
use notify_hub::domain::{ConnectionRegistry, EventRouter};
use notify_hub::server;
use notify_hub::source;
use notify_hub::ws::ConnectionLimits;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = HubConfig::from_env().context("invalid configuration")?;

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(
        addr = %config.listen_addr,
        send_queue_size = config.send_queue_size,
        relay = config.relay_enabled(),
        "starting notify-hub"
    );

    // Build domain layer
    let registry = Arc::new(ConnectionRegistry::new(config.send_queue_size));
    let limits = Arc::new(ConnectionLimits::new(
        config.max_connections_per_ip,
        config.max_connections_total,
    ));

    // Start the relay, the event source and the signal watcher
    let cancel = CancellationToken::new();
    let router = EventRouter::new(Arc::clone(&registry));
    let started = source::start_configured(&config, router, cancel.clone())
        .await
        .context("failed to start event source")?;
    let app_state = AppState::new(Arc::clone(&registry), limits).with_ingress(started.ingress);
    tokio::spawn(server::shutdown_signal(cancel.clone()));

    // Serve until shutdown
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    let served = server::serve(listener, app_state, cancel.clone()).await;

    cancel.cancel();
    registry.close_all().await;
    for consumer in started.consumers {
        match consumer.await {
            Ok(stats) => tracing::info!(received = stats.received, "event source drained"),
            Err(err) => tracing::warn!(error = %err, "event source task failed"),
        }
    }

    served.context("server error")?;
    tracing::info!("shutdown complete");
    Ok(())
}

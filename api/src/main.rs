//! Switchboard API server binary.
//!
//! Entry point for the WebSocket, SSE and admin HTTP server.

use anyhow::Context;
use switchboard_api::{AppState, Server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,switchboard_api=debug,switchboard_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().context("invalid configuration")?;
    let state = AppState::from_config(&config).context("invalid relay configuration")?;

    tracing::info!(
        addr = %config.addr(),
        require_auth = config.relay.require_auth,
        heartbeat_secs = config.relay.heartbeat_interval_secs,
        "Starting Switchboard API server"
    );

    let server = Server::new(config, state);
    server.run().await.context("server error")?;

    Ok(())
}

//! HTTP server wiring.

use std::future::Future;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::admin;
use crate::config::ServerConfig;
use crate::sse::{command_handler, events_handler};
use crate::state::AppState;
use crate::ws::ws_handler;

/// Builds the router with every route.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/events", get(events_handler))
        .route("/events/{connection_id}/commands", post(command_handler))
        .route("/health", get(admin::health))
        .nest("/admin", admin::router())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// The Switchboard HTTP server.
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    state: AppState,
}

impl Server {
    /// Creates a server.
    #[must_use]
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Returns the shared state.
    #[must_use]
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Binds the configured address and serves until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or serving fails.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.addr()).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serves on an existing listener until `shutdown` resolves.
    ///
    /// On shutdown every connection is disconnected before the server waits
    /// for in-flight requests, so open event streams end promptly.
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "Switchboard server listening");

        let relay = self.state.relay().clone();
        let router = build_router(self.state);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let closed = relay.registry().shutdown().await;
                info!(closed, "Connections closed for shutdown");
            })
            .await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

//! Shared application state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use switchboard_core::{AllowAnonymous, AuthGate, ConfigError, Relay, RelayConfig};

use crate::config::ServerConfig;

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    relay: Relay,
    started_at: DateTime<Utc>,
}

impl AppState {
    /// Wraps an existing relay.
    #[must_use]
    pub fn new(relay: Relay) -> Self {
        Self {
            relay,
            started_at: Utc::now(),
        }
    }

    /// Builds the relay described by a server configuration.
    ///
    /// Uses a static token gate when credential tables are configured and
    /// anonymous access otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay configuration is invalid.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ConfigError> {
        let gate: Arc<dyn AuthGate> = if config.has_credentials() {
            Arc::new(config.token_gate())
        } else {
            Arc::new(AllowAnonymous)
        };
        Ok(Self::new(Relay::new(config.relay.clone(), gate)?))
    }

    /// Builds a state with anonymous access.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay configuration is invalid.
    pub fn with_relay_config(config: RelayConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(Relay::new(config, Arc::new(AllowAnonymous))?))
    }

    /// Returns the relay.
    #[must_use]
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Returns the server start time.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

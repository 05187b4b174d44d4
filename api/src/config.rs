//! Server configuration.
//!
//! Loaded from `SWITCHBOARD_*` environment variables; anything unset keeps
//! its default.

use std::collections::HashMap;
use std::str::FromStr;

use switchboard_core::{ConfigError, RelayConfig, StaticTokenGate};

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8080;

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Messaging core settings.
    pub relay: RelayConfig,
    /// Bearer token to identity table.
    pub auth_tokens: HashMap<String, String>,
    /// API key to identity table.
    pub api_keys: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl ServerConfig {
    /// Creates a configuration with default relay settings.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            relay: RelayConfig::default(),
            auth_tokens: HashMap::new(),
            api_keys: HashMap::new(),
        }
    }

    /// Sets the relay settings.
    #[must_use]
    pub fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    /// Returns the bind address.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns true if any credential table is configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.auth_tokens.is_empty() || !self.api_keys.is_empty()
    }

    /// Builds the token gate from the configured tables.
    #[must_use]
    pub fn token_gate(&self) -> StaticTokenGate {
        StaticTokenGate::new()
            .with_tokens(self.auth_tokens.clone())
            .with_api_keys(self.api_keys.clone())
    }

    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the resulting
    /// relay configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through a variable lookup function.
    ///
    /// # Errors
    ///
    /// Same as [`ServerConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let relay = &mut config.relay;

        if let Some(host) = lookup("SWITCHBOARD_HOST") {
            config.host = host;
        }
        parse_into(&lookup, "SWITCHBOARD_PORT", &mut config.port)?;
        parse_into(&lookup, "SWITCHBOARD_MAX_SOCKET_CONNECTIONS", &mut relay.max_socket_connections)?;
        parse_into(&lookup, "SWITCHBOARD_MAX_STREAM_CONNECTIONS", &mut relay.max_stream_connections)?;
        parse_into(&lookup, "SWITCHBOARD_HEARTBEAT_INTERVAL_SECS", &mut relay.heartbeat_interval_secs)?;
        parse_into(&lookup, "SWITCHBOARD_IDLE_TIMEOUT_SECS", &mut relay.idle_timeout_secs)?;
        parse_into(&lookup, "SWITCHBOARD_REPLAY_CAPACITY", &mut relay.replay_capacity)?;
        parse_into(&lookup, "SWITCHBOARD_OUTBOUND_BUFFER", &mut relay.outbound_buffer)?;
        parse_into(&lookup, "SWITCHBOARD_STREAM_RETRY_MS", &mut relay.stream_retry_ms)?;
        parse_into(&lookup, "SWITCHBOARD_REQUIRE_AUTH", &mut relay.require_auth)?;

        config.auth_tokens = parse_table(&lookup, "SWITCHBOARD_AUTH_TOKENS")?;
        config.api_keys = parse_table(&lookup, "SWITCHBOARD_API_KEYS")?;

        config.relay.validate()?;
        Ok(config)
    }
}

fn parse_into<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn parse_table<F>(lookup: &F, key: &str) -> Result<HashMap<String, String>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => StaticTokenGate::parse_pairs(&raw).map_err(|entry| ConfigError::InvalidValue {
            key: key.to_string(),
            value: entry,
        }),
        None => Ok(HashMap::new()),
    }
}

//! Client session configuration.

use std::time::Duration;

use reqwest::Url;
use switchboard_core::TransportKind;

use super::error::SessionError;

/// Default WebSocket endpoint.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:8080/ws";

/// Default ping interval in seconds.
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

/// Default reconnect delay in seconds.
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 1;

/// Maximum reconnect delay in seconds.
pub const MAX_RECONNECT_DELAY_SECS: u64 = 30;

/// Default number of reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default command timeout in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 10;

/// Client session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Handshake endpoint: `ws(s)://.../ws` or `http(s)://.../events`.
    pub url: String,

    /// Transport variant.
    pub transport: TransportKind,

    /// Ping interval on socket sessions. Zero disables pings.
    pub ping_interval: Duration,

    /// Reconnect delay, multiplied by the attempt number.
    pub reconnect_delay: Duration,

    /// Upper bound of the reconnect delay.
    pub max_reconnect_delay: Duration,

    /// Reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,

    /// Whether a dropped link is reopened.
    pub auto_reconnect: bool,

    /// Default deadline for commands.
    pub command_timeout: Duration,

    /// Bearer token.
    pub token: Option<String>,

    /// API key.
    pub api_key: Option<String>,

    /// Claimed user id.
    pub user_id: Option<String>,

    /// Channels joined at handshake.
    pub channels: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            transport: TransportKind::Socket,
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            max_reconnect_delay: Duration::from_secs(MAX_RECONNECT_DELAY_SECS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            auto_reconnect: true,
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            token: None,
            api_key: None,
            user_id: None,
            channels: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Creates a configuration, picking the transport from the URL scheme.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let transport = if url.starts_with("http://") || url.starts_with("https://") {
            TransportKind::Stream
        } else {
            TransportKind::Socket
        };
        Self {
            url,
            transport,
            ..Default::default()
        }
    }

    /// Sets the ping interval.
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the base reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the maximum reconnect delay.
    #[must_use]
    pub fn with_max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.max_reconnect_delay = delay;
        self
    }

    /// Sets the reconnect attempt budget.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Enables or disables reconnecting.
    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Sets the default command timeout.
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the claimed user id.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Adds a channel to join at handshake.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channels.push(channel.into());
        self
    }

    /// Returns the delay before reconnect attempt `attempt` (1-based).
    #[must_use]
    pub fn reconnect_delay_for(&self, attempt: u32) -> Duration {
        self.reconnect_delay
            .saturating_mul(attempt.max(1))
            .min(self.max_reconnect_delay)
    }

    /// Returns the handshake URL with credentials and configured channels.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn connection_url(&self) -> Result<String, SessionError> {
        self.handshake_url(&self.channels, None)
    }

    /// Returns the handshake URL for the given channels and resume point.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn handshake_url(
        &self,
        channels: &[String],
        last_event_id: Option<&str>,
    ) -> Result<String, SessionError> {
        let mut url = parse_url(&self.url)?;

        let mut pairs: Vec<(&str, &str)> = Vec::new();
        if let Some(token) = &self.token {
            pairs.push(("token", token));
        }
        if let Some(api_key) = &self.api_key {
            pairs.push(("api_key", api_key));
        }
        if let Some(user_id) = &self.user_id {
            pairs.push(("user_id", user_id));
        }
        let joined = channels.join(",");
        if !joined.is_empty() {
            pairs.push(("channels", &joined));
        }
        if let Some(id) = last_event_id {
            pairs.push(("last_event_id", id));
        }

        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url.into())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.url.is_empty() {
            return Err(SessionError::InvalidConfig(
                "url cannot be empty".to_string(),
            ));
        }

        let url = parse_url(&self.url)?;
        let schemes: &[&str] = match self.transport {
            TransportKind::Socket => &["ws", "wss"],
            TransportKind::Stream => &["http", "https"],
        };
        if !schemes.contains(&url.scheme()) {
            return Err(SessionError::InvalidConfig(format!(
                "{} transport needs a {} url",
                self.transport,
                schemes.join(" or ")
            )));
        }

        if self.max_reconnect_delay < self.reconnect_delay {
            return Err(SessionError::InvalidConfig(
                "max_reconnect_delay must not be below reconnect_delay".to_string(),
            ));
        }

        if self.command_timeout.is_zero() {
            return Err(SessionError::InvalidConfig(
                "command_timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_url(raw: &str) -> Result<Url, SessionError> {
    Url::parse(raw).map_err(|e| SessionError::InvalidConfig(format!("invalid url {}: {}", raw, e)))
}

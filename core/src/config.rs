//! Relay configuration.
//!
//! Provides capacity, heartbeat and replay settings for the messaging core.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::TransportKind;

/// Smallest outbound queue that holds a handshake: the welcome frame plus
/// one replay batch.
pub const MIN_OUTBOUND_BUFFER: usize = 2;

/// Configuration for the registry, broker and heartbeat scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Maximum concurrent socket connections.
    pub max_socket_connections: usize,

    /// Maximum concurrent stream connections.
    pub max_stream_connections: usize,

    /// Heartbeat interval in seconds (0 disables heartbeats).
    pub heartbeat_interval_secs: u64,

    /// Disconnect connections idle for this many seconds (0 disables).
    pub idle_timeout_secs: u64,

    /// Number of persisted messages kept per channel.
    pub replay_capacity: usize,

    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,

    /// Reconnect hint sent to stream clients, in milliseconds.
    pub stream_retry_ms: u64,

    /// Whether handshakes without valid credentials are rejected.
    pub require_auth: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_socket_connections: 1000,
            max_stream_connections: 1000,
            heartbeat_interval_secs: 30,
            idle_timeout_secs: 0,
            replay_capacity: 100,
            outbound_buffer: 256,
            stream_retry_ms: 3000,
            require_auth: false,
        }
    }
}

impl RelayConfig {
    /// Sets the per-transport connection limits.
    #[must_use]
    pub fn with_limits(mut self, socket: usize, stream: usize) -> Self {
        self.max_socket_connections = socket;
        self.max_stream_connections = stream;
        self
    }

    /// Sets the heartbeat interval in seconds.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, secs: u64) -> Self {
        self.heartbeat_interval_secs = secs;
        self
    }

    /// Sets the idle timeout in seconds.
    #[must_use]
    pub fn with_idle_timeout(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    /// Sets the replay buffer capacity.
    #[must_use]
    pub fn with_replay_capacity(mut self, capacity: usize) -> Self {
        self.replay_capacity = capacity;
        self
    }

    /// Sets the outbound queue capacity.
    #[must_use]
    pub fn with_outbound_buffer(mut self, capacity: usize) -> Self {
        self.outbound_buffer = capacity;
        self
    }

    /// Requires valid credentials on every handshake.
    #[must_use]
    pub fn with_require_auth(mut self, require: bool) -> Self {
        self.require_auth = require;
        self
    }

    /// Returns the connection limit for a transport kind.
    #[must_use]
    pub const fn limit_for(&self, kind: TransportKind) -> usize {
        match kind {
            TransportKind::Socket => self.max_socket_connections,
            TransportKind::Stream => self.max_stream_connections,
        }
    }

    /// Returns the heartbeat interval, or `None` when disabled.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }

    /// Returns the idle timeout, or `None` when disabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.replay_capacity == 0 {
            return Err(ConfigError::InvalidReplayCapacity);
        }

        // The welcome frame and one replay batch must fit before the writer starts.
        if self.outbound_buffer < MIN_OUTBOUND_BUFFER {
            return Err(ConfigError::OutboundBufferTooSmall {
                outbound: self.outbound_buffer,
            });
        }

        if self.idle_timeout_secs > 0
            && self.heartbeat_interval_secs > 0
            && self.idle_timeout_secs < self.heartbeat_interval_secs
        {
            return Err(ConfigError::IdleTimeoutBelowHeartbeat);
        }

        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Replay capacity must be positive.
    #[error("replay_capacity must be > 0")]
    InvalidReplayCapacity,

    /// Outbound queue cannot hold a handshake.
    #[error("outbound_buffer ({outbound}) must be at least {MIN_OUTBOUND_BUFFER}")]
    OutboundBufferTooSmall {
        /// Configured outbound queue capacity.
        outbound: usize,
    },

    /// Idle timeout would fire between heartbeats.
    #[error("idle_timeout_secs must be >= heartbeat_interval_secs")]
    IdleTimeoutBelowHeartbeat,

    /// A configuration value could not be parsed.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Setting name.
        key: String,
        /// Offending value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.max_socket_connections, 1000);
        assert_eq!(config.replay_capacity, 100);
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(30)));
        assert_eq!(config.idle_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = RelayConfig::default()
            .with_limits(5, 7)
            .with_heartbeat_interval(0)
            .with_replay_capacity(10)
            .with_outbound_buffer(20)
            .with_require_auth(true);

        assert_eq!(config.limit_for(TransportKind::Socket), 5);
        assert_eq!(config.limit_for(TransportKind::Stream), 7);
        assert_eq!(config.heartbeat_interval(), None);
        assert!(config.require_auth);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_zero_replay() {
        let config = RelayConfig {
            replay_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::InvalidReplayCapacity));
    }

    #[test]
    fn test_config_validate_small_outbound() {
        let config = RelayConfig::default().with_outbound_buffer(1);
        assert_eq!(
            config.validate(),
            Err(ConfigError::OutboundBufferTooSmall { outbound: 1 })
        );

        // Replays are batched, so the queue may be smaller than the history.
        let config = RelayConfig::default()
            .with_replay_capacity(500)
            .with_outbound_buffer(2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_idle_timeout() {
        let config = RelayConfig::default()
            .with_heartbeat_interval(30)
            .with_idle_timeout(10);
        assert_eq!(
            config.validate(),
            Err(ConfigError::IdleTimeoutBelowHeartbeat)
        );
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: RelayConfig =
            serde_json::from_str(r#"{"replay_capacity": 5}"#).expect("deserialize");
        assert_eq!(config.replay_capacity, 5);
        assert_eq!(config.outbound_buffer, 256);
    }
}

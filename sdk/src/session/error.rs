//! Client session error types.

use std::time::Duration;

use switchboard_core::RelayError;

/// Errors raised by a [`ClientSession`](super::ClientSession).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The transport could not be opened or the handshake was rejected.
    #[error("connection failed: {0}")]
    Connection(String),

    /// No response arrived before the deadline.
    #[error("command '{action}' timed out after {timeout:?}")]
    CommandTimeout {
        /// Action of the command.
        action: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The session is not connected, or the link dropped while waiting.
    #[error("connection closed")]
    ConnectionClosed,

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The server answered with `success: false`.
    #[error("command failed: {0}")]
    Command(String),

    /// The session configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Every reconnect attempt failed.
    #[error("reconnect failed after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made.
        attempts: u32,
    },
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<RelayError> for SessionError {
    fn from(err: RelayError) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

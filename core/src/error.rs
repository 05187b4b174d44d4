//! Core error types.
//!
//! Provides the error taxonomy shared by the registry, broker and dispatcher.

use crate::connection::{ConnectionId, TransportKind};

/// Errors raised by the messaging core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Handshake credentials were rejected.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The transport kind is at its configured connection limit.
    #[error("{transport} connection limit of {limit} reached")]
    CapacityExceeded {
        /// Transport kind that is full.
        transport: TransportKind,
        /// Configured limit.
        limit: usize,
    },

    /// The connection is not registered (closed or never opened).
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The connection may not subscribe to the channel.
    #[error("not authorized to subscribe to {0}")]
    Forbidden(String),

    /// The command was malformed or carried invalid data.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// A frame could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl RelayError {
    /// Returns a short machine-readable code for the error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AUTHENTICATION_FAILED",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::ConnectionClosed(_) => "CONNECTION_CLOSED",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::InvalidCommand(_) => "INVALID_COMMAND",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

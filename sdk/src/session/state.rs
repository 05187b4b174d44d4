//! Session lifecycle states.

use std::time::Duration;

use super::error::SessionError;

/// Lifecycle state of a [`ClientSession`](super::ClientSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected. Initial state, and terminal after `disconnect()`.
    Disconnected,
    /// Opening the transport.
    Connecting,
    /// Link established.
    Connected,
    /// Waiting before the next reconnect attempt.
    Reconnecting {
        /// Attempt about to be made, starting at 1.
        attempt: u32,
        /// Delay before it.
        delay: Duration,
    },
    /// Gave up reconnecting.
    Error(SessionError),
}

impl SessionState {
    /// Returns true when connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Returns true for states no reconnect will leave.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error(_))
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting { attempt, delay } => {
                write!(f, "reconnecting (attempt {} in {:?})", attempt, delay)
            }
            Self::Error(err) => write!(f, "error: {}", err),
        }
    }
}

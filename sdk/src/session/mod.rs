//! Reconnecting client session.
//!
//! A [`ClientSession`] keeps one link open to a Switchboard server over a
//! WebSocket or an event stream. It correlates commands with their
//! responses, dispatches every other frame to handlers keyed by
//! [`MessageKind`](switchboard_core::MessageKind), and reopens the link with
//! a linear, capped backoff when it drops.

mod client;
mod config;
mod error;
mod handlers;
mod pending;
mod state;

pub use client::ClientSession;
pub use config::{
    SessionConfig, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_PING_INTERVAL_SECS, DEFAULT_RECONNECT_DELAY_SECS, DEFAULT_URL,
    MAX_RECONNECT_DELAY_SECS,
};
pub use error::SessionError;
pub use handlers::{HandlerId, HandlerRegistry, HandlerResult};
pub use state::SessionState;

//! Switchboard SDK - Rust client for the Switchboard messaging server.
//!
//! A [`ClientSession`] connects over a WebSocket (`ws://host/ws`) or an
//! event stream (`http://host/events`), reconnects with a capped backoff,
//! and correlates commands with their responses on either transport.
//!
//! # Example
//!
//! ```rust,no_run
//! use switchboard_sdk::{ClientSession, MessageKind, SessionConfig};
//!
//! # async fn run() -> Result<(), switchboard_sdk::SessionError> {
//! let config = SessionConfig::new("ws://127.0.0.1:8080/ws")
//!     .with_user_id("alice")
//!     .with_channel("news");
//! let session = ClientSession::new(config)?;
//!
//! session.on(MessageKind::Text, |message| {
//!     println!("{:?}", message.as_text());
//!     Ok(())
//! });
//!
//! session.connect().await?;
//! session.ping().await?;
//! session.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod session;
pub mod transport;

pub use session::{
    ClientSession, HandlerId, HandlerRegistry, HandlerResult, SessionConfig, SessionError,
    SessionState,
};
pub use switchboard_core::{Message, MessageKind, Payload, Response};
pub use transport::{Connector, EventStreamConnector, FrameSink, TransportPair, WebSocketConnector};

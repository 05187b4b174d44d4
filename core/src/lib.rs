//! # Switchboard Core
//!
//! Transport-agnostic messaging core shared by socket (WebSocket) and stream
//! (Server-Sent Events) connections.
//!
//! ## Modules
//!
//! - [`registry`]: live connections, the per-user index and channel state
//! - [`channels`]: publish/subscribe with bounded replay
//! - [`heartbeat`]: per-connection liveness probes
//! - [`dispatcher`]: inbound command handling
//! - [`relay`]: the facade transport adapters talk to
//! - [`message`], [`command`]: wire model
//! - [`auth`], [`handshake`]: handshake credentials and policy
//! - [`config`], [`error`], [`metrics`]: ambient concerns
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchboard_core::{AllowAnonymous, HandshakeParams, Message, Relay, RelayConfig, TransportKind};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let relay = Relay::new(RelayConfig::default(), Arc::new(AllowAnonymous))?;
//! let (transport, _outbound) = relay.transport(TransportKind::Socket);
//! let info = relay.connect(&HandshakeParams::default(), Arc::new(transport)).await?;
//! relay.broker().subscribe(info.id, "news").await?;
//! relay.broker().publish("news", Message::text("hello"), true).await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod channels;
pub mod command;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod heartbeat;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod relay;

pub use auth::{admit, AllowAnonymous, AuthGate, AuthOutcome, Credentials, StaticTokenGate};
pub use channels::{ChannelBroker, ChannelInfo, JoinOutcome, ReplayBuffer};
pub use command::{Action, Command, Response};
pub use config::{ConfigError, RelayConfig, MIN_OUTBOUND_BUFFER};
pub use connection::{
    ConnectionId, ConnectionInfo, ConnectionStatus, Delivery, Outbound, QueueTransport,
    Transport, TransportKind, TransportReceiver, PRIVATE_CHANNEL_PREFIX,
};
pub use dispatcher::Dispatcher;
pub use error::RelayError;
pub use handshake::HandshakeParams;
pub use heartbeat::{HeartbeatHandle, HeartbeatScheduler};
pub use message::{Frame, Message, MessageKind, Payload};
pub use metrics::{RelayMetrics, RelayMetricsSnapshot};
pub use registry::{ConnectionRegistry, RegistryStats, TransportCounts};
pub use relay::Relay;

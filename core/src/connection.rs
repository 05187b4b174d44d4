//! Connection state management.
//!
//! Provides connection identifiers, the [`Transport`] seam the registry
//! delivers through, and the per-connection record owned by the registry.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::command::Response;
use crate::error::RelayError;
use crate::heartbeat::HeartbeatHandle;
use crate::message::Message;

/// Prefix of channels that only their owning user may subscribe to.
pub const PRIVATE_CHANNEL_PREFIX: &str = "user:";

/// Unique connection identifier, shared across both transport kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a new random connection id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Transport a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Bidirectional WebSocket.
    Socket,
    /// Server-push event stream.
    Stream,
}

impl TransportKind {
    /// Returns the transport name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Socket => "socket",
            Self::Stream => "stream",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Handshake in progress.
    Connecting,
    /// Registered and receiving.
    Connected,
    /// Closed normally.
    Disconnected,
    /// Closed after a failure.
    Error,
}

/// A frame queued for one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A message, shared between all recipients of a fan-out.
    Message(Arc<Message>),
    /// A response to a correlated command.
    Response(Response),
}

impl Delivery {
    /// Encodes the frame as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, RelayError> {
        match self {
            Self::Message(message) => message.to_json(),
            Self::Response(response) => Ok(serde_json::to_string(response)?),
        }
    }

    /// Returns the stream event name for the frame.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Message(message) => message.kind().as_str(),
            Self::Response(_) => "response",
        }
    }

    /// Returns the stream event id (message id) for the frame.
    #[must_use]
    pub fn event_id(&self) -> Option<&str> {
        match self {
            Self::Message(message) => Some(message.id()),
            Self::Response(_) => None,
        }
    }
}

impl From<Message> for Delivery {
    fn from(message: Message) -> Self {
        Self::Message(Arc::new(message))
    }
}

/// Outbound side of a connection.
///
/// `send` must not block: the registry calls it while holding its lock.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Returns the transport kind.
    fn kind(&self) -> TransportKind;

    /// Enqueues a frame for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is closed or cannot accept more.
    fn send(&self, delivery: Delivery) -> Result<(), RelayError>;

    /// Enqueues a run of messages that must reach the wire back to back.
    ///
    /// Replays go through here. The default sends each message in turn.
    ///
    /// # Errors
    ///
    /// Returns an error if any message could not be enqueued.
    fn send_batch(&self, messages: Vec<Arc<Message>>) -> Result<(), RelayError> {
        messages
            .into_iter()
            .try_for_each(|message| self.send(Delivery::Message(message)))
    }

    /// Closes the transport with a reason.
    fn close(&self, reason: &str);
}

/// Item yielded by a [`TransportReceiver`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A frame to write to the wire.
    Deliver(Delivery),
    /// The server closed the connection.
    Close(String),
}

#[derive(Debug)]
enum Queued {
    One(Delivery),
    Batch(Vec<Arc<Message>>),
}

/// [`Transport`] backed by a bounded queue drained by a writer task.
///
/// A batch occupies a single queue slot however many messages it carries.
#[derive(Debug)]
pub struct QueueTransport {
    kind: TransportKind,
    sender: mpsc::Sender<Queued>,
    closed: watch::Sender<Option<String>>,
}

impl QueueTransport {
    /// Creates a transport and the receiver its writer task drains.
    #[must_use]
    pub fn channel(kind: TransportKind, capacity: usize) -> (Self, TransportReceiver) {
        let (sender, messages) = mpsc::channel(capacity.max(1));
        let (closed, closed_rx) = watch::channel(None);
        (
            Self {
                kind,
                sender,
                closed,
            },
            TransportReceiver {
                messages,
                batch: VecDeque::new(),
                closed: closed_rx,
            },
        )
    }
}

impl Transport for QueueTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn send(&self, delivery: Delivery) -> Result<(), RelayError> {
        self.enqueue(Queued::One(delivery))
    }

    fn send_batch(&self, messages: Vec<Arc<Message>>) -> Result<(), RelayError> {
        if messages.is_empty() {
            return Ok(());
        }
        self.enqueue(Queued::Batch(messages))
    }

    fn close(&self, reason: &str) {
        self.closed.send_replace(Some(reason.to_string()));
    }
}

impl QueueTransport {
    fn enqueue(&self, item: Queued) -> Result<(), RelayError> {
        if self.closed.borrow().is_some() {
            return Err(RelayError::Transport("transport closed".to_string()));
        }
        self.sender.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                RelayError::Transport("outbound queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                RelayError::Transport("transport closed".to_string())
            }
        })
    }
}

/// Receiving half of a [`QueueTransport`].
#[derive(Debug)]
pub struct TransportReceiver {
    messages: mpsc::Receiver<Queued>,
    batch: VecDeque<Arc<Message>>,
    closed: watch::Receiver<Option<String>>,
}

impl TransportReceiver {
    /// Waits for the next outbound item.
    ///
    /// Returns `None` once the transport has been dropped and drained.
    pub async fn recv(&mut self) -> Option<Outbound> {
        if let Some(reason) = self.closed.borrow().clone() {
            return Some(Outbound::Close(reason));
        }
        if let Some(message) = self.batch.pop_front() {
            return Some(Outbound::Deliver(Delivery::Message(message)));
        }

        let queued = tokio::select! {
            changed = self.closed.changed() => match changed {
                Ok(()) => return self.closed.borrow().clone().map(Outbound::Close),
                Err(_) => self.messages.recv().await,
            },
            queued = self.messages.recv() => queued,
        };
        match queued? {
            Queued::One(delivery) => Some(Outbound::Deliver(delivery)),
            Queued::Batch(messages) => {
                self.batch.extend(messages);
                self.batch
                    .pop_front()
                    .map(|message| Outbound::Deliver(Delivery::Message(message)))
            }
        }
    }
}

/// Connection record owned by the registry.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) identity: Option<String>,
    pub(crate) status: ConnectionStatus,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_activity: DateTime<Utc>,
    pub(crate) last_seen: tokio::time::Instant,
    pub(crate) subscriptions: HashSet<String>,
    pub(crate) metadata: Map<String, Value>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) heartbeat: Option<HeartbeatHandle>,
}

impl Connection {
    /// Creates a connected record for a transport.
    pub(crate) fn new(transport: Arc<dyn Transport>, identity: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ConnectionId::new(),
            identity,
            status: ConnectionStatus::Connected,
            created_at: now,
            last_activity: now,
            last_seen: tokio::time::Instant::now(),
            subscriptions: HashSet::new(),
            metadata: Map::new(),
            transport,
            heartbeat: None,
        }
    }

    pub(crate) fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Utc::now();
        self.last_seen = tokio::time::Instant::now();
    }

    pub(crate) fn send(&self, delivery: Delivery) -> Result<(), RelayError> {
        self.transport.send(delivery)
    }

    pub(crate) fn send_batch(&self, messages: Vec<Arc<Message>>) -> Result<(), RelayError> {
        self.transport.send_batch(messages)
    }

    /// Checks if the connection can subscribe to a channel.
    ///
    /// `user:<id>` channels require the connection's identity to be `<id>`.
    pub(crate) fn can_subscribe(&self, channel: &str) -> bool {
        match channel.strip_prefix(PRIVATE_CHANNEL_PREFIX) {
            Some(owner) => self.identity.as_deref() == Some(owner),
            None => true,
        }
    }

    pub(crate) fn info(&self) -> ConnectionInfo {
        let mut subscriptions: Vec<String> = self.subscriptions.iter().cloned().collect();
        subscriptions.sort();
        ConnectionInfo {
            id: self.id,
            transport: self.kind(),
            identity: self.identity.clone(),
            status: self.status,
            created_at: self.created_at,
            last_activity: self.last_activity,
            subscriptions,
            metadata: self.metadata.clone(),
        }
    }
}

/// Read-only snapshot of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Connection id.
    pub id: ConnectionId,
    /// Transport kind.
    pub transport: TransportKind,
    /// Owning user, if authenticated or claimed.
    pub identity: Option<String>,
    /// Lifecycle status.
    pub status: ConnectionStatus,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Time of the last inbound activity.
    pub last_activity: DateTime<Utc>,
    /// Subscribed channels, sorted.
    pub subscriptions: Vec<String>,
    /// Free-form metadata.
    pub metadata: Map<String, Value>,
}

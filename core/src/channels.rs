//! Channel subscription management.
//!
//! The [`ChannelBroker`] routes messages to channel subscribers, individual
//! users and individual connections. Each channel keeps a bounded replay
//! buffer of persisted messages that new subscribers receive before any live
//! traffic.
//!
//! Persisted messages are stamped with a registry-wide sequence number, so a
//! resume point taken from one channel also bounds the replay of every other
//! channel joined in the same request.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::command::Response;
use crate::connection::{ConnectionId, Delivery};
use crate::error::RelayError;
use crate::message::Message;
use crate::registry::{ConnectionRegistry, RegistryState};

/// Fixed-capacity history of persisted messages, oldest first.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    entries: VecDeque<(u64, Arc<Message>)>,
    capacity: usize,
}

impl ReplayBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends a message under its publish sequence, evicting the oldest
    /// when full. Sequences must be pushed in increasing order.
    pub fn push(&mut self, sequence: u64, message: Arc<Message>) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((sequence, message));
    }

    /// Returns the sequence of a buffered message.
    #[must_use]
    pub fn sequence_of(&self, message_id: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, m)| m.id() == message_id)
            .map(|(sequence, _)| *sequence)
    }

    /// Returns the messages published after sequence `after`, or all of them.
    pub fn since(&self, after: Option<u64>) -> impl Iterator<Item = &Arc<Message>> {
        self.entries_after(after).map(|(_, m)| m)
    }

    fn entries_after(&self, after: Option<u64>) -> impl Iterator<Item = &(u64, Arc<Message>)> {
        self.entries
            .iter()
            .filter(move |(sequence, _)| after.map_or(true, |after| *sequence > after))
    }

    /// Returns the number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug)]
pub(crate) struct ChannelState {
    pub(crate) subscribers: HashSet<ConnectionId>,
    pub(crate) replay: ReplayBuffer,
}

impl ChannelState {
    fn new(capacity: usize) -> Self {
        Self {
            subscribers: HashSet::new(),
            replay: ReplayBuffer::new(capacity),
        }
    }

    /// A channel with no subscribers and no history can be dropped.
    pub(crate) fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && self.replay.is_empty()
    }
}

/// Resolves a last-seen message id to its publish sequence.
///
/// `None` when no id was given or it is no longer buffered anywhere, in
/// which case the whole history is replayed.
fn resume_point(state: &RegistryState, last_seen: Option<&str>) -> Option<u64> {
    let id = last_seen?;
    state
        .channels
        .values()
        .find_map(|channel| channel.replay.sequence_of(id))
}

/// What to do with channels a connection may not join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeniedChannels {
    /// Fail the whole request before joining anything.
    Reject,
    /// Join the rest and report them.
    Skip,
}

/// Result of joining several channels at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Channels newly joined, in request order.
    pub joined: Vec<String>,
    /// Private channels that were refused.
    pub denied: Vec<String>,
    /// Number of replayed messages.
    pub replayed: usize,
}

/// Channel summary for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    /// Channel name.
    pub name: String,
    /// Number of subscribed connections.
    pub subscribers: usize,
    /// Number of buffered messages.
    pub buffered: usize,
}

/// Routes messages to channels, users and connections.
#[derive(Debug, Clone)]
pub struct ChannelBroker {
    registry: ConnectionRegistry,
}

impl ChannelBroker {
    /// Creates a broker over a registry.
    #[must_use]
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Returns the underlying registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Subscribes a connection to a channel and replays its history.
    ///
    /// Returns the number of replayed messages. Subscribing twice is a no-op
    /// that replays nothing.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionClosed`] for an unknown connection,
    /// [`RelayError::Forbidden`] for another user's private channel, and
    /// [`RelayError::Transport`] if the replay could not be enqueued (the
    /// connection is disconnected in that case).
    pub async fn subscribe(&self, id: ConnectionId, channel: &str) -> Result<usize, RelayError> {
        self.subscribe_after(id, channel, None).await
    }

    /// Subscribes a connection, replaying only messages published after
    /// `last_seen`.
    ///
    /// # Errors
    ///
    /// Same as [`ChannelBroker::subscribe`].
    pub async fn subscribe_after(
        &self,
        id: ConnectionId,
        channel: &str,
        last_seen: Option<&str>,
    ) -> Result<usize, RelayError> {
        let outcome = self
            .join(id, &[channel.to_string()], last_seen, DeniedChannels::Reject)
            .await?;
        Ok(outcome.replayed)
    }

    /// Subscribes a connection to several channels, all or nothing.
    ///
    /// If any channel is private to another user nothing is joined. The
    /// combined replay is enqueued as one batch in publish order.
    ///
    /// # Errors
    ///
    /// Same as [`ChannelBroker::subscribe`].
    pub async fn subscribe_many(
        &self,
        id: ConnectionId,
        channels: &[String],
        last_seen: Option<&str>,
    ) -> Result<JoinOutcome, RelayError> {
        self.join(id, channels, last_seen, DeniedChannels::Reject)
            .await
    }

    /// Subscribes a connection to the channels it may join and reports the
    /// rest in [`JoinOutcome::denied`].
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionClosed`] for an unknown connection and
    /// [`RelayError::Transport`] if the replay could not be enqueued.
    pub async fn subscribe_permitted(
        &self,
        id: ConnectionId,
        channels: &[String],
        last_seen: Option<&str>,
    ) -> Result<JoinOutcome, RelayError> {
        self.join(id, channels, last_seen, DeniedChannels::Skip).await
    }

    async fn join(
        &self,
        id: ConnectionId,
        channels: &[String],
        last_seen: Option<&str>,
        on_denied: DeniedChannels,
    ) -> Result<JoinOutcome, RelayError> {
        let mut guard = self.registry.state().write().await;
        let state = &mut *guard;
        let after = resume_point(state, last_seen);

        let connection = state
            .connections
            .get_mut(&id)
            .ok_or(RelayError::ConnectionClosed(id))?;
        let (allowed, denied): (Vec<&String>, Vec<&String>) =
            channels.iter().partition(|c| connection.can_subscribe(c));
        for channel in &denied {
            warn!(connection_id = %id, channel = %channel, "Private channel subscription denied");
        }
        if let (DeniedChannels::Reject, Some(channel)) = (on_denied, denied.first()) {
            return Err(RelayError::Forbidden((*channel).clone()));
        }

        let capacity = self.registry.config().replay_capacity;
        let mut joined = Vec::new();
        let mut replay: Vec<(u64, Arc<Message>)> = Vec::new();
        for channel in allowed {
            if !connection.subscriptions.insert(channel.clone()) {
                continue;
            }
            let entry = state
                .channels
                .entry(channel.clone())
                .or_insert_with(|| ChannelState::new(capacity));
            entry.subscribers.insert(id);
            replay.extend(entry.replay.entries_after(after).cloned());
            joined.push(channel.clone());
        }

        replay.sort_by_key(|(sequence, _)| *sequence);
        let replayed = replay.len();
        let batch = replay.into_iter().map(|(_, message)| message).collect();
        if let Err(e) = connection.send_batch(batch) {
            warn!(connection_id = %id, error = %e, "Replay delivery failed");
            self.registry.evict_failed(state, vec![id]);
            return Err(RelayError::Transport("replay delivery failed".to_string()));
        }

        self.registry.record_deliveries(replayed);
        for channel in &joined {
            self.registry.metrics().record_channel_join();
            debug!(connection_id = %id, channel = %channel, "Subscribed");
        }
        Ok(JoinOutcome {
            joined,
            denied: denied.into_iter().cloned().collect(),
            replayed,
        })
    }

    /// Unsubscribes a connection from a channel.
    ///
    /// Returns false if the connection was not subscribed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionClosed`] for an unknown connection.
    pub async fn unsubscribe(&self, id: ConnectionId, channel: &str) -> Result<bool, RelayError> {
        let mut guard = self.registry.state().write().await;
        let state = &mut *guard;

        let connection = state
            .connections
            .get_mut(&id)
            .ok_or(RelayError::ConnectionClosed(id))?;
        if !connection.subscriptions.remove(channel) {
            return Ok(false);
        }

        if let Some(entry) = state.channels.get_mut(channel) {
            entry.subscribers.remove(&id);
            if entry.is_idle() {
                state.channels.remove(channel);
            }
        }

        self.registry.metrics().record_channel_leave();
        debug!(connection_id = %id, channel, "Unsubscribed");
        Ok(true)
    }

    /// Publishes a message to every subscriber of a channel.
    ///
    /// With `persist`, the message is also appended to the channel's replay
    /// buffer, creating the channel if needed. Subscribers whose delivery
    /// fails are disconnected. Returns the number of successful deliveries.
    pub async fn publish(&self, channel: &str, message: Message, persist: bool) -> usize {
        let message = if message.channel().is_none() {
            message.with_channel(channel)
        } else {
            message
        };
        let message = Arc::new(message);

        let mut guard = self.registry.state().write().await;
        let state = &mut *guard;

        let sequence = persist.then(|| state.next_sequence());
        let targets: Vec<ConnectionId> = match state.channels.get_mut(channel) {
            Some(entry) => {
                if let Some(sequence) = sequence {
                    entry.replay.push(sequence, Arc::clone(&message));
                }
                entry.subscribers.iter().copied().collect()
            }
            None => {
                if let Some(sequence) = sequence {
                    let mut entry = ChannelState::new(self.registry.config().replay_capacity);
                    entry.replay.push(sequence, Arc::clone(&message));
                    state.channels.insert(channel.to_string(), entry);
                }
                Vec::new()
            }
        };

        let delivered = self.deliver_locked(state, &targets, Delivery::Message(message));
        debug!(channel, delivered, persist, "Published");
        delivered
    }

    /// Sends a message to every connection except those in `exclude`.
    pub async fn broadcast_all(&self, message: Message, exclude: &HashSet<ConnectionId>) -> usize {
        let mut guard = self.registry.state().write().await;
        let state = &mut *guard;

        let targets: Vec<ConnectionId> = state
            .connections
            .keys()
            .filter(|id| !exclude.contains(id))
            .copied()
            .collect();

        let delivered = self.deliver_locked(state, &targets, message.into());
        debug!(delivered, excluded = exclude.len(), "Broadcast");
        delivered
    }

    /// Sends a message to every connection of a user, across transports.
    pub async fn send_to_user(&self, user_id: &str, message: Message) -> usize {
        let message = if message.recipient_id().is_none() {
            message.with_recipient(user_id)
        } else {
            message
        };

        let mut guard = self.registry.state().write().await;
        let state = &mut *guard;

        let targets: Vec<ConnectionId> = state
            .users
            .get(user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        let delivered = self.deliver_locked(state, &targets, message.into());
        debug!(user_id, delivered, "Sent to user");
        delivered
    }

    /// Sends a message to a single connection.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionClosed`] if the connection is gone or
    /// the delivery failed.
    pub async fn send_to_connection(
        &self,
        id: ConnectionId,
        message: Message,
    ) -> Result<(), RelayError> {
        self.deliver_one(id, message.into()).await
    }

    /// Sends a command response to a single connection.
    ///
    /// # Errors
    ///
    /// Same as [`ChannelBroker::send_to_connection`].
    pub async fn respond(&self, id: ConnectionId, response: Response) -> Result<(), RelayError> {
        self.deliver_one(id, Delivery::Response(response)).await
    }

    async fn deliver_one(&self, id: ConnectionId, delivery: Delivery) -> Result<(), RelayError> {
        let mut guard = self.registry.state().write().await;
        let state = &mut *guard;

        if !state.connections.contains_key(&id) {
            return Err(RelayError::ConnectionClosed(id));
        }
        match self.deliver_locked(state, &[id], delivery) {
            0 => Err(RelayError::ConnectionClosed(id)),
            _ => Ok(()),
        }
    }

    fn deliver_locked(
        &self,
        state: &mut RegistryState,
        targets: &[ConnectionId],
        delivery: Delivery,
    ) -> usize {
        let (delivered, failed) = state.deliver(targets, &delivery);
        self.registry.record_deliveries(delivered);
        self.registry.evict_failed(state, failed);
        delivered
    }

    /// Returns a channel's buffered history, oldest first.
    pub async fn history(&self, channel: &str) -> Vec<Arc<Message>> {
        let state = self.registry.state().read().await;
        state
            .channels
            .get(channel)
            .map(|entry| entry.replay.since(None).cloned().collect())
            .unwrap_or_default()
    }

    /// Returns a connection-id snapshot of a channel's subscribers.
    pub async fn subscribers(&self, channel: &str) -> Vec<ConnectionId> {
        let state = self.registry.state().read().await;
        state
            .channels
            .get(channel)
            .map(|entry| entry.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns a summary of every live channel, sorted by name.
    pub async fn channels(&self) -> Vec<ChannelInfo> {
        let state = self.registry.state().read().await;
        let mut channels: Vec<ChannelInfo> = state
            .channels
            .iter()
            .map(|(name, entry)| ChannelInfo {
                name: name.clone(),
                subscribers: entry.subscribers.len(),
                buffered: entry.replay.len(),
            })
            .collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));
        channels
    }
}

#[cfg(test)]
mod tests {
    use std::task::Poll;

    use super::*;
    use crate::config::RelayConfig;
    use crate::connection::{Outbound, QueueTransport, TransportKind, TransportReceiver};

    fn broker(replay: usize, outbound: usize) -> ChannelBroker {
        let config = RelayConfig::default()
            .with_heartbeat_interval(0)
            .with_replay_capacity(replay)
            .with_outbound_buffer(outbound);
        ChannelBroker::new(ConnectionRegistry::new(config).expect("registry"))
    }

    async fn connect(
        broker: &ChannelBroker,
        kind: TransportKind,
        capacity: usize,
        identity: Option<&str>,
    ) -> (ConnectionId, TransportReceiver) {
        let (transport, rx) = QueueTransport::channel(kind, capacity);
        let info = broker
            .registry()
            .register(Arc::new(transport), identity.map(str::to_string))
            .await
            .expect("register");
        (info.id, rx)
    }

    /// Drains every queued message without waiting.
    fn drain(rx: &mut TransportReceiver) -> Vec<Arc<Message>> {
        let mut out = Vec::new();
        loop {
            let mut next = tokio_test::task::spawn(rx.recv());
            match next.poll() {
                Poll::Ready(Some(Outbound::Deliver(Delivery::Message(m)))) => out.push(m),
                _ => break,
            }
        }
        out
    }

    fn texts(messages: &[Arc<Message>]) -> Vec<String> {
        messages
            .iter()
            .filter_map(|m| m.as_text().map(str::to_string))
            .collect()
    }

    #[test]
    fn test_replay_buffer_evicts_oldest() {
        let mut buffer = ReplayBuffer::new(2);
        let messages: Vec<Arc<Message>> =
            (0..3).map(|i| Arc::new(Message::text(format!("m{i}")))).collect();
        for (sequence, m) in (1..).zip(&messages) {
            buffer.push(sequence, Arc::clone(m));
        }

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.sequence_of(messages[0].id()), None);
        let texts: Vec<&str> = buffer.since(None).filter_map(|m| m.as_text()).collect();
        assert_eq!(texts, vec!["m1", "m2"]);
    }

    #[test]
    fn test_replay_buffer_since() {
        let mut buffer = ReplayBuffer::new(5);
        let messages: Vec<Arc<Message>> =
            (0..3).map(|i| Arc::new(Message::text(format!("m{i}")))).collect();
        for (sequence, m) in [2, 4, 6].into_iter().zip(&messages) {
            buffer.push(sequence, Arc::clone(m));
        }

        assert_eq!(buffer.sequence_of(messages[1].id()), Some(4));
        let after_first: Vec<&str> = buffer.since(Some(2)).filter_map(|m| m.as_text()).collect();
        assert_eq!(after_first, vec!["m1", "m2"]);
        // Gaps belong to other channels.
        assert_eq!(buffer.since(Some(5)).count(), 1);
        assert_eq!(buffer.since(Some(6)).count(), 0);
    }

    #[tokio::test]
    async fn test_replay_min_of_published_and_capacity() {
        let broker = broker(3, 8);
        for i in 0..5 {
            broker
                .publish("news", Message::text(format!("m{i}")), true)
                .await;
        }

        let (id, mut rx) = connect(&broker, TransportKind::Socket, 8, None).await;
        let replayed = broker.subscribe(id, "news").await.expect("subscribe");
        assert_eq!(replayed, 3);

        let texts: Vec<String> = drain(&mut rx)
            .iter()
            .filter_map(|m| m.as_text().map(str::to_string))
            .collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_replay_precedes_live() {
        let broker = broker(4, 8);
        broker.publish("news", Message::text("old"), true).await;

        let (id, mut rx) = connect(&broker, TransportKind::Stream, 8, None).await;
        broker.subscribe(id, "news").await.expect("subscribe");
        broker.publish("news", Message::text("new"), false).await;

        let texts: Vec<String> = drain(&mut rx)
            .iter()
            .filter_map(|m| m.as_text().map(str::to_string))
            .collect();
        assert_eq!(texts, vec!["old", "new"]);
    }

    #[tokio::test]
    async fn test_news_scenario() {
        let broker = broker(10, 16);
        let (a, mut rx_a) = connect(&broker, TransportKind::Socket, 16, None).await;
        let (b, mut rx_b) = connect(&broker, TransportKind::Stream, 16, None).await;

        broker.subscribe(a, "news").await.expect("a subscribe");
        assert_eq!(broker.publish("news", Message::text("m1"), true).await, 1);

        assert_eq!(broker.subscribe(b, "news").await.expect("b subscribe"), 1);
        assert_eq!(broker.publish("news", Message::text("m2"), false).await, 2);

        let a_texts: Vec<String> = drain(&mut rx_a)
            .iter()
            .filter_map(|m| m.as_text().map(str::to_string))
            .collect();
        let b_texts: Vec<String> = drain(&mut rx_b)
            .iter()
            .filter_map(|m| m.as_text().map(str::to_string))
            .collect();
        assert_eq!(a_texts, vec!["m1", "m2"]);
        assert_eq!(b_texts, vec!["m1", "m2"]);

        // Only persisted messages are buffered.
        assert_eq!(broker.history("news").await.len(), 1);
    }

    #[tokio::test]
    async fn test_publish_sets_channel() {
        let broker = broker(4, 8);
        let (id, mut rx) = connect(&broker, TransportKind::Socket, 8, None).await;
        broker.subscribe(id, "news").await.expect("subscribe");

        broker.publish("news", Message::text("hi"), false).await;
        let received = drain(&mut rx);
        assert_eq!(received[0].channel(), Some("news"));
    }

    #[tokio::test]
    async fn test_failing_subscriber_isolated() {
        let broker = broker(4, 8);
        let (slow, _rx_slow) = connect(&broker, TransportKind::Socket, 1, None).await;
        let (healthy, mut rx_healthy) = connect(&broker, TransportKind::Stream, 8, None).await;
        broker.subscribe(slow, "news").await.expect("slow");
        broker.subscribe(healthy, "news").await.expect("healthy");

        assert_eq!(broker.publish("news", Message::text("one"), false).await, 2);
        // The slow queue is now full; its next delivery fails.
        assert_eq!(broker.publish("news", Message::text("two"), false).await, 1);

        assert!(broker.registry().lookup(slow).await.is_none());
        assert_eq!(broker.subscribers("news").await, vec![healthy]);
        assert_eq!(drain(&mut rx_healthy).len(), 2);
        assert_eq!(broker.registry().metrics().delivery_failures(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_many_replays_full_history_in_one_slot() {
        let broker = broker(100, 8);
        for channel in ["a", "b", "c"] {
            for i in 0..100 {
                broker
                    .publish(channel, Message::text(format!("{channel}{i}")), true)
                    .await;
            }
        }

        let (id, mut rx) = connect(&broker, TransportKind::Socket, 8, None).await;
        let channels: Vec<String> = ["a", "b", "c"].map(String::from).to_vec();
        let outcome = broker
            .subscribe_many(id, &channels, None)
            .await
            .expect("subscribe");
        assert_eq!(outcome.replayed, 300);
        assert_eq!(outcome.joined, channels);

        let received = texts(&drain(&mut rx));
        assert_eq!(received.len(), 300);
        assert_eq!(received[0], "a0");
        assert_eq!(received[299], "c99");
        assert!(broker.registry().lookup(id).await.is_some());
    }

    #[tokio::test]
    async fn test_resume_point_spans_channels() {
        let broker = broker(10, 16);
        broker.publish("sports", Message::text("s1"), true).await;
        let seen = Message::text("n1");
        let seen_id = seen.id().to_string();
        broker.publish("news", seen, true).await;
        broker.publish("sports", Message::text("s2"), true).await;
        broker.publish("news", Message::text("n2"), true).await;

        let (id, mut rx) = connect(&broker, TransportKind::Stream, 16, None).await;
        let channels: Vec<String> = ["news", "sports"].map(String::from).to_vec();
        let outcome = broker
            .subscribe_many(id, &channels, Some(&seen_id))
            .await
            .expect("subscribe");

        assert_eq!(outcome.replayed, 2);
        assert_eq!(texts(&drain(&mut rx)), vec!["s2", "n2"]);
    }

    #[tokio::test]
    async fn test_unknown_resume_point_replays_everything() {
        let broker = broker(10, 16);
        broker.publish("news", Message::text("n1"), true).await;
        broker.publish("sports", Message::text("s1"), true).await;

        let (id, mut rx) = connect(&broker, TransportKind::Socket, 16, None).await;
        let channels: Vec<String> = ["news", "sports"].map(String::from).to_vec();
        broker
            .subscribe_many(id, &channels, Some("evicted"))
            .await
            .expect("subscribe");
        assert_eq!(texts(&drain(&mut rx)), vec!["n1", "s1"]);
    }

    #[tokio::test]
    async fn test_subscribe_many_is_all_or_nothing() {
        let broker = broker(4, 8);
        let (bob, _rx) = connect(&broker, TransportKind::Socket, 8, Some("bob")).await;
        let channels: Vec<String> = ["news", "user:alice", "sports"].map(String::from).to_vec();

        assert_eq!(
            broker.subscribe_many(bob, &channels, None).await,
            Err(RelayError::Forbidden("user:alice".to_string()))
        );
        let info = broker.registry().lookup(bob).await.expect("still registered");
        assert!(info.subscriptions.is_empty());
        assert!(broker.channels().await.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_permitted_skips_denied() {
        let broker = broker(4, 8);
        let (bob, _rx) = connect(&broker, TransportKind::Socket, 8, Some("bob")).await;
        let channels: Vec<String> = ["news", "user:alice", "user:bob"].map(String::from).to_vec();

        let outcome = broker
            .subscribe_permitted(bob, &channels, None)
            .await
            .expect("subscribe");
        assert_eq!(outcome.joined, vec!["news", "user:bob"]);
        assert_eq!(outcome.denied, vec!["user:alice"]);
    }

    #[tokio::test]
    async fn test_subscribe_twice_replays_once() {
        let broker = broker(4, 8);
        broker.publish("news", Message::text("old"), true).await;
        let (id, _rx) = connect(&broker, TransportKind::Socket, 8, None).await;

        assert_eq!(broker.subscribe(id, "news").await.expect("first"), 1);
        assert_eq!(broker.subscribe(id, "news").await.expect("second"), 0);
    }

    #[tokio::test]
    async fn test_subscribe_unknown_connection() {
        let broker = broker(4, 8);
        let id = ConnectionId::new();
        assert_eq!(
            broker.subscribe(id, "news").await,
            Err(RelayError::ConnectionClosed(id))
        );
    }

    #[tokio::test]
    async fn test_private_channel() {
        let broker = broker(4, 8);
        let (alice, _ra) = connect(&broker, TransportKind::Socket, 8, Some("alice")).await;
        let (bob, _rb) = connect(&broker, TransportKind::Socket, 8, Some("bob")).await;

        assert!(broker.subscribe(alice, "user:alice").await.is_ok());
        assert_eq!(
            broker.subscribe(bob, "user:alice").await,
            Err(RelayError::Forbidden("user:alice".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_drops_idle_channel() {
        let broker = broker(4, 8);
        let (id, _rx) = connect(&broker, TransportKind::Socket, 8, None).await;
        broker.subscribe(id, "chat").await.expect("subscribe");
        assert_eq!(broker.channels().await.len(), 1);

        assert!(broker.unsubscribe(id, "chat").await.expect("unsubscribe"));
        assert!(!broker.unsubscribe(id, "chat").await.expect("again"));
        assert!(broker.channels().await.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_cascades() {
        let broker = broker(4, 8);
        let (a, _ra) = connect(&broker, TransportKind::Socket, 8, Some("alice")).await;
        let (b, _rb) = connect(&broker, TransportKind::Stream, 8, None).await;
        for channel in ["news", "sports"] {
            broker.subscribe(a, channel).await.expect("a");
        }
        broker.subscribe(b, "news").await.expect("b");
        broker.publish("sports", Message::text("kept"), true).await;

        broker.registry().unregister(a).await;

        assert_eq!(broker.subscribers("news").await, vec![b]);
        assert!(broker.subscribers("sports").await.is_empty());
        assert!(broker.registry().lookup_by_user("alice").await.is_empty());

        // Sports has history, so it survives without subscribers.
        let channels = broker.channels().await;
        assert_eq!(
            channels,
            vec![
                ChannelInfo {
                    name: "news".into(),
                    subscribers: 1,
                    buffered: 0
                },
                ChannelInfo {
                    name: "sports".into(),
                    subscribers: 0,
                    buffered: 1
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_send_to_user_across_transports() {
        let broker = broker(4, 8);
        let (_a, mut ra) = connect(&broker, TransportKind::Socket, 8, Some("alice")).await;
        let (_b, mut rb) = connect(&broker, TransportKind::Stream, 8, Some("alice")).await;
        let (_c, mut rc) = connect(&broker, TransportKind::Socket, 8, Some("bob")).await;

        assert_eq!(broker.send_to_user("alice", Message::text("hi")).await, 2);
        assert_eq!(broker.send_to_user("nobody", Message::text("hi")).await, 0);

        let received = drain(&mut ra);
        assert_eq!(received[0].recipient_id(), Some("alice"));
        assert_eq!(drain(&mut rb).len(), 1);
        assert!(drain(&mut rc).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_all_excludes() {
        let broker = broker(4, 8);
        let (a, mut ra) = connect(&broker, TransportKind::Socket, 8, None).await;
        let (_b, mut rb) = connect(&broker, TransportKind::Stream, 8, None).await;

        let exclude: HashSet<ConnectionId> = [a].into_iter().collect();
        assert_eq!(broker.broadcast_all(Message::broadcast("all"), &exclude).await, 1);
        assert!(drain(&mut ra).is_empty());
        assert_eq!(drain(&mut rb).len(), 1);
    }

    #[tokio::test]
    async fn test_respond_and_send_to_connection() {
        let broker = broker(4, 8);
        let (id, mut rx) = connect(&broker, TransportKind::Socket, 8, None).await;

        broker
            .respond(id, Response::ok("r1", serde_json::json!({"pong": true})))
            .await
            .expect("respond");
        match rx.recv().await {
            Some(Outbound::Deliver(Delivery::Response(r))) => assert_eq!(r.request_id, "r1"),
            other => panic!("expected response, got {:?}", other),
        }

        broker.registry().unregister(id).await;
        assert_eq!(
            broker.send_to_connection(id, Message::text("late")).await,
            Err(RelayError::ConnectionClosed(id))
        );
    }
}

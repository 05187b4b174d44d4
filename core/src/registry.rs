//! Connection registry.
//!
//! Owns every live connection, the per-user index and the channel table.
//! All three sit behind one lock so that register, unregister, subscribe and
//! publish on overlapping keys are mutually exclusive: a disconnect racing a
//! publish can never leave a dangling subscriber.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::channels::ChannelState;
use crate::config::{ConfigError, RelayConfig};
use crate::connection::{Connection, ConnectionId, ConnectionInfo, Delivery, Transport, TransportKind};
use crate::error::RelayError;
use crate::heartbeat::{HeartbeatOutcome, HeartbeatScheduler};
use crate::message::Message;
use crate::metrics::{RelayMetrics, RelayMetricsSnapshot};

/// Lock-protected registry state.
#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    pub(crate) connections: HashMap<ConnectionId, Connection>,
    pub(crate) users: HashMap<String, HashSet<ConnectionId>>,
    pub(crate) channels: HashMap<String, ChannelState>,
    /// Last publish sequence handed to a persisted message.
    sequence: u64,
}

impl RegistryState {
    pub(crate) fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn count(&self, kind: TransportKind) -> usize {
        self.connections
            .values()
            .filter(|c| c.kind() == kind)
            .count()
    }

    /// Removes a connection and every index entry pointing at it.
    fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;

        for name in &connection.subscriptions {
            if let Some(channel) = self.channels.get_mut(name) {
                channel.subscribers.remove(&id);
                if channel.is_idle() {
                    self.channels.remove(name);
                }
            }
        }

        if let Some(identity) = &connection.identity {
            if let Some(ids) = self.users.get_mut(identity) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.users.remove(identity);
                }
            }
        }

        Some(connection)
    }

    /// Enqueues a frame to each target.
    ///
    /// Returns the number of successful deliveries and the ids that failed.
    pub(crate) fn deliver(
        &self,
        targets: &[ConnectionId],
        delivery: &Delivery,
    ) -> (usize, Vec<ConnectionId>) {
        let mut delivered = 0;
        let mut failed = Vec::new();

        for id in targets {
            let Some(connection) = self.connections.get(id) else {
                continue;
            };
            match connection.send(delivery.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection_id = %id, error = %e, "Delivery failed");
                    failed.push(*id);
                }
            }
        }

        (delivered, failed)
    }
}

#[derive(Debug)]
struct Shared {
    state: RwLock<RegistryState>,
    config: RelayConfig,
    heartbeat: HeartbeatScheduler,
    metrics: Arc<RelayMetrics>,
}

/// Registry of live connections across both transports.
///
/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    shared: Arc<Shared>,
}

/// Non-owning registry reference held by heartbeat tasks.
#[derive(Debug, Clone)]
pub(crate) struct WeakRegistry(Weak<Shared>);

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<ConnectionRegistry> {
        self.0.upgrade().map(|shared| ConnectionRegistry { shared })
    }
}

/// Connection counts per transport kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransportCounts {
    /// Socket connections.
    pub socket: usize,
    /// Stream connections.
    pub stream: usize,
}

/// Read-only registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Live connections per transport.
    pub connections_by_transport: TransportCounts,
    /// Live connections in total.
    pub total_connections: usize,
    /// Distinct users with at least one connection.
    pub user_count: usize,
    /// Channels with subscribers or buffered history.
    pub channel_count: usize,
    /// Cumulative counters.
    pub metrics: RelayMetricsSnapshot,
}

impl ConnectionRegistry {
    /// Creates a registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: RelayConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let heartbeat = HeartbeatScheduler::new(config.heartbeat_interval(), config.idle_timeout());

        Ok(Self {
            shared: Arc::new(Shared {
                state: RwLock::new(RegistryState::default()),
                config,
                heartbeat,
                metrics: Arc::new(RelayMetrics::new()),
            }),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.shared.config
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Arc::downgrade(&self.shared))
    }

    pub(crate) fn state(&self) -> &RwLock<RegistryState> {
        &self.shared.state
    }

    /// Registers a connection and starts its heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::CapacityExceeded`] if the transport kind is at
    /// its configured limit.
    pub async fn register(
        &self,
        transport: Arc<dyn Transport>,
        identity: Option<String>,
    ) -> Result<ConnectionInfo, RelayError> {
        let kind = transport.kind();
        let limit = self.shared.config.limit_for(kind);

        let mut state = self.shared.state.write().await;
        if state.count(kind) >= limit {
            self.shared.metrics.record_handshake_rejected();
            warn!(transport = %kind, limit, "Connection limit reached");
            return Err(RelayError::CapacityExceeded {
                transport: kind,
                limit,
            });
        }

        let mut connection = Connection::new(transport, identity);
        let id = connection.id;
        connection.heartbeat = self.shared.heartbeat.schedule(id, self.downgrade());

        if let Some(identity) = &connection.identity {
            state.users.entry(identity.clone()).or_default().insert(id);
        }
        let info = connection.info();
        state.connections.insert(id, connection);
        drop(state);

        self.shared.metrics.record_registered();
        info!(
            connection_id = %id,
            transport = %kind,
            identity = info.identity.as_deref().unwrap_or("-"),
            "Connection registered"
        );
        Ok(info)
    }

    /// Unregisters a connection.
    ///
    /// Idempotent. Removes the id from every channel and the user index and
    /// cancels its heartbeat. Returns true if the connection was registered.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut state = self.shared.state.write().await;
        self.remove_locked(&mut state, id, None)
    }

    /// Unregisters a connection and closes its transport with a reason.
    pub async fn disconnect(&self, id: ConnectionId, reason: &str) -> bool {
        let mut state = self.shared.state.write().await;
        self.remove_locked(&mut state, id, Some(reason))
    }

    pub(crate) fn remove_locked(
        &self,
        state: &mut RegistryState,
        id: ConnectionId,
        close_reason: Option<&str>,
    ) -> bool {
        let Some(mut connection) = state.remove(id) else {
            return false;
        };

        if let Some(heartbeat) = connection.heartbeat.take() {
            heartbeat.cancel();
        }
        if let Some(reason) = close_reason {
            connection.transport.close(reason);
        }

        self.shared.metrics.record_unregistered();
        info!(
            connection_id = %id,
            reason = close_reason.unwrap_or("closed by peer"),
            "Connection unregistered"
        );
        true
    }

    /// Disconnects connections whose delivery failed.
    pub(crate) fn evict_failed(&self, state: &mut RegistryState, failed: Vec<ConnectionId>) {
        for id in failed {
            self.shared.metrics.record_delivery_failure();
            self.remove_locked(state, id, Some("delivery failed"));
        }
    }

    pub(crate) fn record_deliveries(&self, count: usize) {
        self.shared.metrics.record_deliveries(count);
    }

    /// Returns a snapshot of a connection.
    pub async fn lookup(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        let state = self.shared.state.read().await;
        state.connections.get(&id).map(Connection::info)
    }

    /// Returns every connection owned by a user, across both transports.
    pub async fn lookup_by_user(&self, user_id: &str) -> Vec<ConnectionInfo> {
        let state = self.shared.state.read().await;
        state
            .users
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.connections.get(id))
                    .map(Connection::info)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns snapshots of all connections.
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        let state = self.shared.state.read().await;
        state.connections.values().map(Connection::info).collect()
    }

    /// Records inbound activity. Returns false if the connection is gone.
    pub async fn touch(&self, id: ConnectionId) -> bool {
        let mut state = self.shared.state.write().await;
        match state.connections.get_mut(&id) {
            Some(connection) => {
                connection.touch();
                true
            }
            None => false,
        }
    }

    /// Sets a metadata entry on a connection.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConnectionClosed`] if the connection is gone.
    pub async fn set_metadata(
        &self,
        id: ConnectionId,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), RelayError> {
        let mut state = self.shared.state.write().await;
        let connection = state
            .connections
            .get_mut(&id)
            .ok_or(RelayError::ConnectionClosed(id))?;
        connection.metadata.insert(key.into(), value);
        Ok(())
    }

    /// Returns true if the connection has a running heartbeat task.
    pub async fn heartbeat_active(&self, id: ConnectionId) -> bool {
        let state = self.shared.state.read().await;
        state
            .connections
            .get(&id)
            .and_then(|c| c.heartbeat.as_ref())
            .is_some_and(|h| !h.is_finished())
    }

    /// Sends one heartbeat probe.
    pub(crate) async fn heartbeat(
        &self,
        id: ConnectionId,
        idle_timeout: Option<Duration>,
    ) -> HeartbeatOutcome {
        let state = self.shared.state.read().await;
        let Some(connection) = state.connections.get(&id) else {
            return HeartbeatOutcome::Gone;
        };

        if idle_timeout.is_some_and(|timeout| connection.last_seen.elapsed() > timeout) {
            return HeartbeatOutcome::Idle;
        }

        match connection.send(Message::heartbeat().into()) {
            Ok(()) => {
                self.shared.metrics.record_heartbeat();
                HeartbeatOutcome::Sent
            }
            Err(_) => HeartbeatOutcome::Failed,
        }
    }

    /// Returns a read-only snapshot of registry statistics.
    pub async fn stats(&self) -> RegistryStats {
        let state = self.shared.state.read().await;
        let socket = state.count(TransportKind::Socket);
        let stream = state.count(TransportKind::Stream);

        RegistryStats {
            connections_by_transport: TransportCounts { socket, stream },
            total_connections: socket + stream,
            user_count: state.users.len(),
            channel_count: state.channels.len(),
            metrics: self.shared.metrics.snapshot(),
        }
    }

    /// Disconnects every connection. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let mut state = self.shared.state.write().await;
        let ids: Vec<ConnectionId> = state.connections.keys().copied().collect();
        ids.into_iter()
            .filter(|id| self.remove_locked(&mut state, *id, Some("server shutting down")))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Outbound, QueueTransport, TransportReceiver};

    fn registry(config: RelayConfig) -> ConnectionRegistry {
        ConnectionRegistry::new(config.with_heartbeat_interval(0)).expect("registry")
    }

    fn transport(kind: TransportKind) -> (Arc<dyn Transport>, TransportReceiver) {
        let (transport, rx) = QueueTransport::channel(kind, 16);
        (Arc::new(transport), rx)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = registry(RelayConfig::default());
        let (t, _rx) = transport(TransportKind::Socket);

        let info = registry
            .register(t, Some("alice".to_string()))
            .await
            .expect("register");

        let found = registry.lookup(info.id).await.expect("lookup");
        assert_eq!(found.transport, TransportKind::Socket);
        assert_eq!(found.identity.as_deref(), Some("alice"));
        assert!(found.subscriptions.is_empty());
    }

    #[tokio::test]
    async fn test_register_capacity_exceeded() {
        let registry = registry(RelayConfig::default().with_limits(2, 1));
        let mut receivers = Vec::new();

        for _ in 0..2 {
            let (t, rx) = transport(TransportKind::Socket);
            receivers.push(rx);
            registry.register(t, None).await.expect("register");
        }

        let (t, _rx) = transport(TransportKind::Socket);
        let err = registry.register(t, None).await.expect_err("limit");
        assert_eq!(
            err,
            RelayError::CapacityExceeded {
                transport: TransportKind::Socket,
                limit: 2
            }
        );

        let stats = registry.stats().await;
        assert_eq!(stats.connections_by_transport.socket, 2);
        assert_eq!(stats.metrics.handshakes_rejected, 1);

        // Stream limit is independent of the socket limit.
        let (t, _rx2) = transport(TransportKind::Stream);
        assert!(registry.register(t, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_lookup_by_user_across_transports() {
        let registry = registry(RelayConfig::default());
        let (a, _ra) = transport(TransportKind::Socket);
        let (b, _rb) = transport(TransportKind::Stream);
        let (c, _rc) = transport(TransportKind::Socket);

        registry.register(a, Some("alice".into())).await.expect("a");
        registry.register(b, Some("alice".into())).await.expect("b");
        registry.register(c, Some("bob".into())).await.expect("c");

        let alice = registry.lookup_by_user("alice").await;
        assert_eq!(alice.len(), 2);
        let kinds: HashSet<TransportKind> = alice.iter().map(|c| c.transport).collect();
        assert_eq!(kinds.len(), 2);

        assert_eq!(registry.stats().await.user_count, 2);
    }

    #[tokio::test]
    async fn test_unregister_idempotent() {
        let registry = registry(RelayConfig::default());
        let (t, _rx) = transport(TransportKind::Socket);
        let info = registry.register(t, Some("alice".into())).await.expect("register");

        assert!(registry.unregister(info.id).await);
        assert!(!registry.unregister(info.id).await);
        assert!(registry.lookup(info.id).await.is_none());
        assert!(registry.lookup_by_user("alice").await.is_empty());
        assert_eq!(registry.stats().await.metrics.unregistered, 1);
    }

    #[tokio::test]
    async fn test_disconnect_closes_transport() {
        let registry = registry(RelayConfig::default());
        let (t, mut rx) = transport(TransportKind::Stream);
        let info = registry.register(t, None).await.expect("register");

        assert!(registry.disconnect(info.id, "kicked").await);
        assert_eq!(rx.recv().await, Some(Outbound::Close("kicked".to_string())));
    }

    #[tokio::test]
    async fn test_touch_and_metadata() {
        let registry = registry(RelayConfig::default());
        let (t, _rx) = transport(TransportKind::Socket);
        let info = registry.register(t, None).await.expect("register");

        assert!(registry.touch(info.id).await);
        registry
            .set_metadata(info.id, "client", "cli".into())
            .await
            .expect("metadata");
        let found = registry.lookup(info.id).await.expect("lookup");
        assert_eq!(found.metadata["client"], "cli");
        assert!(found.last_activity >= info.last_activity);

        registry.unregister(info.id).await;
        assert!(!registry.touch(info.id).await);
        assert!(registry
            .set_metadata(info.id, "client", Value::Null)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_shutdown_closes_all() {
        let registry = registry(RelayConfig::default());
        let (a, mut ra) = transport(TransportKind::Socket);
        let (b, _rb) = transport(TransportKind::Stream);
        registry.register(a, None).await.expect("a");
        registry.register(b, None).await.expect("b");

        assert_eq!(registry.shutdown().await, 2);
        assert_eq!(registry.stats().await.total_connections, 0);
        assert_eq!(
            ra.recv().await,
            Some(Outbound::Close("server shutting down".to_string()))
        );
    }

    #[test]
    fn test_registry_rejects_invalid_config() {
        let config = RelayConfig::default().with_replay_capacity(0);
        assert!(ConnectionRegistry::new(config).is_err());
    }
}

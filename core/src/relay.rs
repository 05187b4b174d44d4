//! Relay facade.
//!
//! Bundles the registry, broker, dispatcher and auth gate so that transport
//! adapters only deal with one object: `connect` on handshake, `dispatch`
//! per inbound frame, `close` when the transport ends.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::auth::{admit, AuthGate};
use crate::channels::ChannelBroker;
use crate::config::{ConfigError, RelayConfig};
use crate::connection::{
    ConnectionId, ConnectionInfo, QueueTransport, Transport, TransportKind, TransportReceiver,
};
use crate::dispatcher::Dispatcher;
use crate::error::RelayError;
use crate::handshake::HandshakeParams;
use crate::message::Message;
use crate::registry::ConnectionRegistry;

/// Entry point for transport adapters.
#[derive(Debug, Clone)]
pub struct Relay {
    broker: ChannelBroker,
    dispatcher: Dispatcher,
    auth: Arc<dyn AuthGate>,
}

impl Relay {
    /// Creates a relay.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: RelayConfig, auth: Arc<dyn AuthGate>) -> Result<Self, ConfigError> {
        let broker = ChannelBroker::new(ConnectionRegistry::new(config)?);
        let dispatcher = Dispatcher::new(broker.clone());
        Ok(Self {
            broker,
            dispatcher,
            auth,
        })
    }

    /// Returns the connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        self.broker.registry()
    }

    /// Returns the channel broker.
    #[must_use]
    pub fn broker(&self) -> &ChannelBroker {
        &self.broker
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        self.registry().config()
    }

    /// Creates a queue-backed transport sized by `outbound_buffer`.
    #[must_use]
    pub fn transport(&self, kind: TransportKind) -> (QueueTransport, TransportReceiver) {
        QueueTransport::channel(kind, self.config().outbound_buffer)
    }

    /// Runs a handshake: authenticate, register, greet, subscribe.
    ///
    /// The first frame a new connection receives is a `system` message with
    /// event `connected` carrying its connection id. Requested channels are
    /// joined afterwards in one step, resuming after `last_event_id` when
    /// given; their combined history takes a single outbound slot. Private
    /// channels the connection may not join are reported with an `error`
    /// message and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Authentication`] or
    /// [`RelayError::CapacityExceeded`] if the handshake is rejected.
    pub async fn connect(
        &self,
        params: &HandshakeParams,
        transport: Arc<dyn Transport>,
    ) -> Result<ConnectionInfo, RelayError> {
        let kind = transport.kind();
        let claimed = params.user_id.clone().filter(|u| !u.is_empty());

        let identity = match admit(
            self.auth.as_ref(),
            &params.credentials(),
            claimed,
            self.config().require_auth,
        )
        .await
        {
            Ok(identity) => identity,
            Err(e) => {
                self.registry().metrics().record_handshake_rejected();
                warn!(transport = %kind, error = %e, "Handshake rejected");
                return Err(e);
            }
        };

        let info = self.registry().register(transport, identity).await?;
        let welcome = Message::system(
            "connected",
            Some(json!({
                "connection_id": info.id,
                "transport": kind,
                "identity": info.identity,
            })),
        );
        self.broker.send_to_connection(info.id, welcome).await?;

        let outcome = self
            .broker
            .subscribe_permitted(
                info.id,
                &params.channel_list(),
                params.last_event_id.as_deref(),
            )
            .await?;
        for channel in outcome.denied {
            let error = RelayError::Forbidden(channel);
            self.broker
                .send_to_connection(info.id, Message::error(error.code(), error.to_string()))
                .await?;
        }

        info!(
            connection_id = %info.id,
            transport = %kind,
            replayed = outcome.replayed,
            "Handshake complete"
        );
        Ok(self.registry().lookup(info.id).await.unwrap_or(info))
    }

    /// Handles an inbound text frame.
    pub async fn dispatch(&self, id: ConnectionId, frame: &str) {
        self.dispatcher.dispatch(id, frame).await;
    }

    /// Unregisters a connection whose transport ended.
    pub async fn close(&self, id: ConnectionId) -> bool {
        self.registry().unregister(id).await
    }

    /// Server-initiated disconnect.
    pub async fn disconnect(&self, id: ConnectionId, reason: &str) -> bool {
        self.registry().disconnect(id, reason).await
    }
}

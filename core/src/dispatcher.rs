//! Inbound command dispatch.
//!
//! Every text frame a connection sends is parsed as a [`Command`] and routed
//! to a built-in action. A [`Response`] goes back only when the command
//! carried a `request_id`.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::channels::ChannelBroker;
use crate::command::{Action, Command, Response};
use crate::connection::ConnectionId;
use crate::error::RelayError;
use crate::message::Message;

const UNKNOWN_COMMAND: &str = "unknown command";

#[derive(Debug, Deserialize)]
struct ChannelSelection {
    channel: Option<String>,
    #[serde(default)]
    channels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelSend {
    channel: String,
    content: Value,
    #[serde(default)]
    persist: bool,
}

#[derive(Debug, Deserialize)]
struct UserSend {
    user_id: String,
    content: Value,
}

fn parse_data<T: DeserializeOwned>(action: Action, data: &Value) -> Result<T, RelayError> {
    serde_json::from_value(data.clone())
        .map_err(|e| RelayError::InvalidCommand(format!("{}: {}", action.as_str(), e)))
}

fn channel_names(data: &Value) -> Result<Vec<String>, RelayError> {
    let selection: ChannelSelection = parse_data(Action::Subscribe, data)?;
    let mut names: Vec<String> = selection.channel.into_iter().collect();
    names.extend(selection.channels);
    names.retain(|n| !n.trim().is_empty());

    if names.is_empty() {
        return Err(RelayError::InvalidCommand("no channel given".to_string()));
    }
    Ok(names)
}

fn failure_text(err: &RelayError) -> String {
    match err {
        RelayError::InvalidCommand(reason) => reason.clone(),
        other => other.to_string(),
    }
}

/// Routes inbound frames to built-in actions.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    broker: ChannelBroker,
}

impl Dispatcher {
    /// Creates a dispatcher over a broker.
    #[must_use]
    pub fn new(broker: ChannelBroker) -> Self {
        Self { broker }
    }

    /// Handles one inbound text frame from a connection.
    pub async fn dispatch(&self, id: ConnectionId, frame: &str) {
        let registry = self.broker.registry();
        registry.metrics().record_frame_received();

        if !registry.touch(id).await {
            debug!(connection_id = %id, "Frame from unregistered connection dropped");
            return;
        }

        let command: Command = match serde_json::from_str(frame) {
            Ok(command) => command,
            Err(e) => {
                warn!(connection_id = %id, error = %e, "Invalid frame");
                let error = Message::error("INVALID_FRAME", format!("invalid frame: {}", e));
                let _ = self.broker.send_to_connection(id, error).await;
                return;
            }
        };

        let result = self.execute(id, &command).await;
        if let Err(e) = &result {
            debug!(connection_id = %id, action = %command.action, error = %e, "Command failed");
        }

        let outcome = match (command.request_id, result) {
            (Some(request_id), Ok(data)) => {
                self.broker.respond(id, Response::ok(request_id, data)).await
            }
            (Some(request_id), Err(e)) => {
                self.broker
                    .respond(id, Response::failure(request_id, failure_text(&e)))
                    .await
            }
            (None, Err(e)) => {
                self.broker
                    .send_to_connection(id, Message::error(e.code(), failure_text(&e)))
                    .await
            }
            (None, Ok(_)) => Ok(()),
        };

        if let Err(e) = outcome {
            debug!(connection_id = %id, error = %e, "Reply not delivered");
        }
    }

    /// Executes a command and returns its result data.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidCommand`] for unknown actions or bad data,
    /// and any broker error raised while executing the action.
    pub async fn execute(&self, id: ConnectionId, command: &Command) -> Result<Value, RelayError> {
        let Some(action) = command.builtin() else {
            return Err(RelayError::InvalidCommand(UNKNOWN_COMMAND.to_string()));
        };

        match action {
            Action::Ping => Ok(json!({ "pong": true })),
            Action::Subscribe => {
                let channels = channel_names(&command.data)?;
                let outcome = self.broker.subscribe_many(id, &channels, None).await?;
                Ok(json!({ "subscribed": channels, "replayed": outcome.replayed }))
            }
            Action::Unsubscribe => {
                let channels = channel_names(&command.data)?;
                for channel in &channels {
                    self.broker.unsubscribe(id, channel).await?;
                }
                Ok(json!({ "unsubscribed": channels }))
            }
            Action::SendToChannel => {
                let request: ChannelSend = parse_data(action, &command.data)?;
                let message = Message::from_content(request.content)
                    .with_sender(self.sender_of(id).await?);
                let message_id = message.id().to_string();
                let delivered = self
                    .broker
                    .publish(&request.channel, message, request.persist)
                    .await;
                Ok(json!({
                    "channel": request.channel,
                    "message_id": message_id,
                    "delivered": delivered,
                }))
            }
            Action::SendToUser => {
                let request: UserSend = parse_data(action, &command.data)?;
                let message = Message::from_content(request.content)
                    .with_sender(self.sender_of(id).await?);
                let message_id = message.id().to_string();
                let delivered = self.broker.send_to_user(&request.user_id, message).await;
                Ok(json!({
                    "user_id": request.user_id,
                    "message_id": message_id,
                    "delivered": delivered,
                }))
            }
            Action::Message => {
                let content = command
                    .data
                    .get("content")
                    .cloned()
                    .unwrap_or_else(|| command.data.clone());
                let message = Message::from_content(content).with_sender(self.sender_of(id).await?);
                let message_id = message.id().to_string();
                self.broker.send_to_connection(id, message).await?;
                Ok(json!({ "message_id": message_id }))
            }
        }
    }

    async fn sender_of(&self, id: ConnectionId) -> Result<String, RelayError> {
        let info = self
            .broker
            .registry()
            .lookup(id)
            .await
            .ok_or(RelayError::ConnectionClosed(id))?;
        Ok(info.identity.unwrap_or_else(|| id.to_string()))
    }
}

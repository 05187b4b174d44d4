//! Command protocol types.
//!
//! A client sends `{action, data, request_id?}`; the server answers with
//! `{request_id, success, data?, error?}` when a `request_id` was given.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Built-in command actions understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Liveness check, answered with `{"pong": true}`.
    Ping,
    /// Subscribe to one or more channels.
    Subscribe,
    /// Unsubscribe from one or more channels.
    Unsubscribe,
    /// Publish to a channel.
    SendToChannel,
    /// Deliver to every connection of a user.
    SendToUser,
    /// Echo back to the sender.
    Message,
}

impl Action {
    /// Parses an action name.
    #[must_use]
    pub fn parse(action: &str) -> Option<Self> {
        match action {
            "ping" => Some(Self::Ping),
            "subscribe" => Some(Self::Subscribe),
            "unsubscribe" => Some(Self::Unsubscribe),
            "send_to_channel" => Some(Self::SendToChannel),
            "send_to_user" => Some(Self::SendToUser),
            "message" => Some(Self::Message),
            _ => None,
        }
    }

    /// Returns the wire name of the action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::SendToChannel => "send_to_channel",
            Self::SendToUser => "send_to_user",
            Self::Message => "message",
        }
    }
}

/// A command sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Action name.
    pub action: String,

    /// Action-specific payload.
    #[serde(default)]
    pub data: Value,

    /// Correlation id; a response is sent only when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Command {
    /// Creates a fire-and-forget command.
    #[must_use]
    pub fn new(action: impl Into<String>, data: Value) -> Self {
        Self {
            action: action.into(),
            data,
            request_id: None,
        }
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Returns the parsed built-in action, if any.
    #[must_use]
    pub fn builtin(&self) -> Option<Action> {
        Action::parse(&self.action)
    }
}

/// A response correlated to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Correlation id of the originating command.
    pub request_id: String,

    /// Whether the command succeeded.
    pub success: bool,

    /// Result data on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Error description on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Creates a successful response.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, data: Value) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Creates a failed response.
    #[must_use]
    pub fn failure(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    /// Returns true if the JSON object has the shape of a response frame.
    #[must_use]
    pub fn is_response_frame(value: &Value) -> bool {
        value.get("request_id").is_some_and(Value::is_string)
            && value.get("success").is_some_and(Value::is_boolean)
    }
}

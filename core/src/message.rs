//! Message model.
//!
//! Defines the immutable message value delivered to connections and its JSON
//! frame representation:
//!
//! ```json
//! {"id": "...", "type": "text", "content": "hi", "timestamp": "...",
//!  "sender_id": "...", "recipient_id": "...", "channel": "news", "metadata": {}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::RelayError;

/// Kind of a message, carried as the frame's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Opaque structured JSON.
    Structured,
    /// User-facing notification.
    Notification,
    /// Error report.
    Error,
    /// Liveness probe.
    Heartbeat,
    /// Lifecycle event from the server.
    System,
    /// Text sent to every connection.
    Broadcast,
}

impl MessageKind {
    /// Returns the wire name of the kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Structured => "structured",
            Self::Notification => "notification",
            Self::Error => "error",
            Self::Heartbeat => "heartbeat",
            Self::System => "system",
            Self::Broadcast => "broadcast",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message payload, one variant per kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Plain text.
    Text {
        /// Message text.
        text: String,
    },
    /// Arbitrary JSON.
    Structured(Value),
    /// Notification with a title.
    Notification {
        /// Short title.
        title: String,
        /// Notification body.
        body: String,
        /// Optional severity level.
        level: Option<String>,
    },
    /// Error report.
    Error {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
    },
    /// Liveness probe.
    Heartbeat,
    /// Lifecycle event.
    System {
        /// Event name (e.g. `connected`, `subscribed`).
        event: String,
        /// Event details.
        detail: Option<Value>,
    },
    /// Broadcast text.
    Broadcast {
        /// Message text.
        text: String,
    },
}

#[derive(Serialize, Deserialize)]
struct NotificationContent {
    title: String,
    body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    level: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ErrorContent {
    code: String,
    message: String,
}

#[derive(Serialize, Deserialize)]
struct SystemContent {
    event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detail: Option<Value>,
}

impl Payload {
    /// Returns the kind of this payload.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Text { .. } => MessageKind::Text,
            Self::Structured(_) => MessageKind::Structured,
            Self::Notification { .. } => MessageKind::Notification,
            Self::Error { .. } => MessageKind::Error,
            Self::Heartbeat => MessageKind::Heartbeat,
            Self::System { .. } => MessageKind::System,
            Self::Broadcast { .. } => MessageKind::Broadcast,
        }
    }

    /// Encodes the payload as the frame's `content` value.
    #[must_use]
    pub fn to_content(&self) -> Value {
        match self {
            Self::Text { text } | Self::Broadcast { text } => Value::String(text.clone()),
            Self::Structured(value) => value.clone(),
            Self::Notification { title, body, level } => serde_json::to_value(NotificationContent {
                title: title.clone(),
                body: body.clone(),
                level: level.clone(),
            })
            .unwrap_or_default(),
            Self::Error { code, message } => serde_json::to_value(ErrorContent {
                code: code.clone(),
                message: message.clone(),
            })
            .unwrap_or_default(),
            Self::Heartbeat => Value::Null,
            Self::System { event, detail } => serde_json::to_value(SystemContent {
                event: event.clone(),
                detail: detail.clone(),
            })
            .unwrap_or_default(),
        }
    }

    /// Decodes a frame's `content` value for the given kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the content does not match the kind's shape.
    pub fn from_content(kind: MessageKind, content: Value) -> Result<Self, RelayError> {
        let payload = match kind {
            MessageKind::Text => Self::Text {
                text: expect_string(kind, content)?,
            },
            MessageKind::Broadcast => Self::Broadcast {
                text: expect_string(kind, content)?,
            },
            MessageKind::Structured => Self::Structured(content),
            MessageKind::Notification => {
                let c: NotificationContent = serde_json::from_value(content)?;
                Self::Notification {
                    title: c.title,
                    body: c.body,
                    level: c.level,
                }
            }
            MessageKind::Error => {
                let c: ErrorContent = serde_json::from_value(content)?;
                Self::Error {
                    code: c.code,
                    message: c.message,
                }
            }
            MessageKind::Heartbeat => Self::Heartbeat,
            MessageKind::System => {
                let c: SystemContent = serde_json::from_value(content)?;
                Self::System {
                    event: c.event,
                    detail: c.detail,
                }
            }
        };
        Ok(payload)
    }
}

fn expect_string(kind: MessageKind, content: Value) -> Result<String, RelayError> {
    match content {
        Value::String(s) => Ok(s),
        other => Err(RelayError::Serialization(format!(
            "{} content must be a string, got {}",
            kind, other
        ))),
    }
}

/// An immutable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "Frame", try_from = "Frame")]
pub struct Message {
    id: String,
    payload: Payload,
    sender_id: Option<String>,
    recipient_id: Option<String>,
    channel: Option<String>,
    metadata: Option<Map<String, Value>>,
    timestamp: DateTime<Utc>,
}

impl Message {
    /// Creates a message with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            payload,
            sender_id: None,
            recipient_id: None,
            channel: None,
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    /// Creates a text message.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Payload::Text { text: text.into() })
    }

    /// Creates a structured message.
    #[must_use]
    pub fn structured(value: Value) -> Self {
        Self::new(Payload::Structured(value))
    }

    /// Creates a notification message.
    #[must_use]
    pub fn notification(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self::new(Payload::Notification {
            title: title.into(),
            body: body.into(),
            level: None,
        })
    }

    /// Creates an error message.
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Payload::Error {
            code: code.into(),
            message: message.into(),
        })
    }

    /// Creates a heartbeat probe.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(Payload::Heartbeat)
    }

    /// Creates a system event message.
    #[must_use]
    pub fn system(event: impl Into<String>, detail: Option<Value>) -> Self {
        Self::new(Payload::System {
            event: event.into(),
            detail,
        })
    }

    /// Creates a broadcast message.
    #[must_use]
    pub fn broadcast(text: impl Into<String>) -> Self {
        Self::new(Payload::Broadcast { text: text.into() })
    }

    /// Creates a text or structured message from arbitrary JSON content.
    #[must_use]
    pub fn from_content(content: Value) -> Self {
        match content {
            Value::String(text) => Self::text(text),
            other => Self::structured(other),
        }
    }

    /// Sets the sender id.
    #[must_use]
    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    /// Sets the recipient id.
    #[must_use]
    pub fn with_recipient(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }

    /// Sets the channel.
    #[must_use]
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Returns the message id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the message kind.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Returns the payload.
    #[must_use]
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns the sender id.
    #[must_use]
    pub fn sender_id(&self) -> Option<&str> {
        self.sender_id.as_deref()
    }

    /// Returns the recipient id.
    #[must_use]
    pub fn recipient_id(&self) -> Option<&str> {
        self.recipient_id.as_deref()
    }

    /// Returns the channel.
    #[must_use]
    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }

    /// Returns the metadata map.
    #[must_use]
    pub const fn metadata(&self) -> Option<&Map<String, Value>> {
        self.metadata.as_ref()
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the text of text and broadcast messages.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text { text } | Payload::Broadcast { text } => Some(text),
            _ => None,
        }
    }

    /// Encodes the message as a JSON frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes a message from a JSON frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is malformed.
    pub fn from_json(json: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Wire representation of a [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Message id.
    pub id: String,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Kind-specific content.
    #[serde(default)]
    pub content: Value,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Sender id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// Recipient id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    /// Channel name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            kind: message.payload.kind(),
            content: message.payload.to_content(),
            timestamp: message.timestamp,
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            channel: message.channel,
            metadata: message.metadata,
        }
    }
}

impl TryFrom<Frame> for Message {
    type Error = RelayError;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        Ok(Self {
            id: frame.id,
            payload: Payload::from_content(frame.kind, frame.content)?,
            sender_id: frame.sender_id,
            recipient_id: frame.recipient_id,
            channel: frame.channel,
            metadata: frame.metadata,
            timestamp: frame.timestamp,
        })
    }
}

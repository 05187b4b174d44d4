//! Client transports.
//!
//! A [`Connector`] opens one link to the server and hands back a
//! [`TransportPair`]: a [`FrameSink`] for outgoing command frames and a
//! stream of incoming JSON frames. Both connectors wait for the server's
//! `connected` system message before returning, so a rejected handshake
//! surfaces as a connection error.

pub mod event_stream;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde_json::Value;
use switchboard_core::{Message, Payload, TransportKind};

use crate::session::SessionError;

pub use event_stream::{EventStreamConnector, SseDecoder, SseEvent};
pub use websocket::WebSocketConnector;

/// Incoming JSON frames.
pub type Inbound = BoxStream<'static, Result<String, SessionError>>;

/// Outgoing half of a link.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Sends one command frame.
    async fn send(&self, frame: String) -> Result<(), SessionError>;

    /// Closes the link.
    async fn close(&self);
}

/// An open link.
pub struct TransportPair {
    /// Server-assigned connection id.
    pub connection_id: String,
    /// Outgoing half.
    pub sink: Arc<dyn FrameSink>,
    /// Incoming frames, starting with the `connected` system message.
    pub inbound: Inbound,
}

impl std::fmt::Debug for TransportPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportPair")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

/// Opens links of one transport kind.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Transport kind produced.
    fn kind(&self) -> TransportKind;

    /// Opens a link to the handshake URL.
    async fn connect(&self, url: &str) -> Result<TransportPair, SessionError>;
}

/// Reads the first frame and extracts the connection id from it.
///
/// The frame is put back in front of the returned stream so handlers
/// still observe it.
pub async fn await_welcome(mut inbound: Inbound) -> Result<(String, Inbound), SessionError> {
    let first = match inbound.next().await {
        Some(Ok(frame)) => frame,
        Some(Err(e)) => return Err(SessionError::Connection(e.to_string())),
        None => {
            return Err(SessionError::Connection(
                "link closed during handshake".to_string(),
            ))
        }
    };

    let message = Message::from_json(&first)?;
    let connection_id = match message.payload() {
        Payload::System { event, detail } if event == "connected" => detail
            .as_ref()
            .and_then(|d| d.get("connection_id"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
    .ok_or_else(|| {
        SessionError::Connection(format!("expected connected event, got {}", message.kind()))
    })?;

    let inbound = stream::once(async move { Ok(first) }).chain(inbound).boxed();
    Ok((connection_id, inbound))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn frames(items: Vec<Result<String, SessionError>>) -> Inbound {
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_await_welcome_keeps_first_frame() {
        let welcome = Message::system("connected", Some(json!({"connection_id": "c-1"})))
            .to_json()
            .expect("encode");
        let text = Message::text("hi").to_json().expect("encode");

        let (id, inbound) = await_welcome(frames(vec![Ok(welcome.clone()), Ok(text.clone())]))
            .await
            .expect("welcome");
        assert_eq!(id, "c-1");

        let rest: Vec<String> = inbound.filter_map(|f| async move { f.ok() }).collect().await;
        assert_eq!(rest, vec![welcome, text]);
    }

    #[tokio::test]
    async fn test_await_welcome_rejects_other_frames() {
        let text = Message::text("hi").to_json().expect("encode");
        let result = await_welcome(frames(vec![Ok(text)])).await;
        assert!(matches!(result, Err(SessionError::Connection(_))));

        let result = await_welcome(frames(vec![Err(SessionError::Transport(
            "closed by server (1008): invalid credentials".into(),
        ))]))
        .await
        .map(|(id, _)| id);
        match result {
            Err(SessionError::Connection(reason)) => assert!(reason.contains("invalid credentials")),
            other => panic!("expected connection error, got {:?}", other),
        }

        let result = await_welcome(frames(vec![])).await;
        assert!(matches!(result, Err(SessionError::Connection(_))));
    }
}

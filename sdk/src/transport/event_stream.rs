//! Server-Sent Events connector.
//!
//! The event stream is push-only, so commands travel over
//! `POST /events/{connection_id}/commands` and their responses come back
//! on the stream like any other frame.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use switchboard_core::TransportKind;
use tracing::debug;

use super::{await_welcome, Connector, FrameSink, Inbound, TransportPair};
use crate::session::SessionError;

/// One decoded event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `id:` field.
    pub id: Option<String>,
    /// `event:` field.
    pub event: Option<String>,
    /// Joined `data:` lines.
    pub data: String,
    /// `retry:` field in milliseconds.
    pub retry: Option<u64>,
}

/// Incremental `text/event-stream` decoder.
///
/// Accepts arbitrary byte chunks. Comment lines are skipped, and events
/// without data are dropped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    id: Option<String>,
    event: Option<String>,
    data: Vec<String>,
    retry: Option<u64>,
}

impl SseDecoder {
    /// Creates a decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the events it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let line = text.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.feed_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => self.retry = value.parse().ok(),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let data = std::mem::take(&mut self.data);
        let id = self.id.take();
        let event = self.event.take();
        let retry = self.retry.take();
        if data.is_empty() {
            return None;
        }
        Some(SseEvent {
            id,
            event,
            data: data.join("\n"),
            retry,
        })
    }
}

/// Turns a byte stream into a stream of event payloads.
pub fn event_frames<S, B, E>(bytes: S) -> Inbound
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = (bytes.boxed(), SseDecoder::new(), VecDeque::<SseEvent>::new());
    stream::unfold(state, |(mut bytes, mut decoder, mut ready)| async move {
        loop {
            if let Some(event) = ready.pop_front() {
                return Some((Ok(event.data), (bytes, decoder, ready)));
            }
            match bytes.next().await {
                Some(Ok(chunk)) => ready.extend(decoder.push(chunk.as_ref())),
                Some(Err(e)) => {
                    let err = SessionError::Transport(e.to_string());
                    return Some((Err(err), (bytes, decoder, ready)));
                }
                None => return None,
            }
        }
    })
    .boxed()
}

/// Opens event-stream links with `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct EventStreamConnector {
    client: Client,
}

impl EventStreamConnector {
    /// Creates a connector with its own HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector sharing an HTTP client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

/// Derives `/events/{connection_id}/commands` from the handshake URL.
pub fn commands_url(handshake_url: &str, connection_id: &str) -> Result<Url, SessionError> {
    let mut url = Url::parse(handshake_url)
        .map_err(|e| SessionError::InvalidConfig(format!("invalid url: {}", e)))?;
    url.set_query(None);
    url.path_segments_mut()
        .map_err(|()| SessionError::InvalidConfig("url cannot carry a path".to_string()))?
        .pop_if_empty()
        .push(connection_id)
        .push("commands");
    Ok(url)
}

#[derive(Debug)]
struct CommandSink {
    client: Client,
    url: Url,
}

#[async_trait]
impl FrameSink for CommandSink {
    async fn send(&self, frame: String) -> Result<(), SessionError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(frame)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == reqwest::StatusCode::NOT_FOUND {
            Err(SessionError::ConnectionClosed)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SessionError::Transport(format!(
                "command rejected with {}: {}",
                status, body
            )))
        }
    }

    // The stream closes when the session drops its inbound half.
    async fn close(&self) {}
}

#[async_trait]
impl Connector for EventStreamConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    async fn connect(&self, url: &str) -> Result<TransportPair, SessionError> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Connection(format!(
                "handshake rejected with {}: {}",
                status, body
            )));
        }

        let inbound = event_frames(response.bytes_stream());
        let (connection_id, inbound) = await_welcome(inbound).await?;
        let url = commands_url(url, &connection_id)?;
        debug!(%connection_id, commands = %url, "Event stream open");

        Ok(TransportPair {
            connection_id,
            sink: Arc::new(CommandSink {
                client: self.client.clone(),
                url,
            }),
            inbound,
        })
    }
}

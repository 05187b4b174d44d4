//! WebSocket connector.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use switchboard_core::TransportKind;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{await_welcome, Connector, FrameSink, TransportPair};
use crate::session::SessionError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;

/// Opens WebSocket links with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

struct SocketSink {
    sink: Mutex<WsSink>,
}

#[async_trait]
impl FrameSink for SocketSink {
    async fn send(&self, frame: String) -> Result<(), SessionError> {
        self.sink
            .lock()
            .await
            .send(WsMessage::Text(frame.into()))
            .await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}

fn closed_by_server(frame: Option<CloseFrame>) -> SessionError {
    match frame {
        Some(frame) => SessionError::Transport(format!(
            "closed by server ({}): {}",
            u16::from(frame.code),
            frame.reason.as_str()
        )),
        None => SessionError::ConnectionClosed,
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn connect(&self, url: &str) -> Result<TransportPair, SessionError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SessionError::Connection(e.to_string()))?;

        let (sink, source) = ws_stream.split();

        let inbound = source
            .filter_map(|result| {
                future::ready(match result {
                    Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(WsMessage::Close(frame)) => Some(Err(closed_by_server(frame))),
                    Ok(_) => None,
                    Err(e) => Some(Err(SessionError::from(e))),
                })
            })
            .boxed();

        let (connection_id, inbound) = await_welcome(inbound).await?;
        debug!(%connection_id, "WebSocket link open");

        Ok(TransportPair {
            connection_id,
            sink: Arc::new(SocketSink {
                sink: Mutex::new(sink),
            }),
            inbound,
        })
    }
}

//! WebSocket connection handler.
//!
//! Upgrades `GET /ws`, runs the handshake through the relay and then pumps
//! frames: a writer task drains the connection's outbound queue onto the
//! socket while the reader loop feeds text frames to the dispatcher.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use switchboard_core::{
    ConnectionId, HandshakeParams, Outbound, RelayError, TransportKind, TransportReceiver,
};
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HandshakeParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, params, state))
}

/// Close code for a rejected handshake.
#[must_use]
pub fn rejection_code(err: &RelayError) -> u16 {
    match err {
        RelayError::CapacityExceeded { .. } => close_code::AGAIN,
        _ => close_code::POLICY,
    }
}

/// Handles an upgraded WebSocket.
async fn handle_connection(socket: WebSocket, params: HandshakeParams, state: AppState) {
    let relay = state.relay().clone();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (transport, outbound) = relay.transport(TransportKind::Socket);
    let info = match relay.connect(&params, Arc::new(transport)).await {
        Ok(info) => info,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake rejected");
            let frame = CloseFrame {
                code: rejection_code(&e),
                reason: e.to_string().into(),
            };
            let _ = ws_sender.send(Message::Close(Some(frame))).await;
            return;
        }
    };
    let connection_id = info.id;
    info!(connection_id = %connection_id, "WebSocket connection opened");

    let mut sender_task = tokio::spawn(write_loop(ws_sender, outbound, connection_id));

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => relay.dispatch(connection_id, text.as_str()).await,
                    Message::Ping(_) | Message::Pong(_) => {
                        relay.registry().touch(connection_id).await;
                    }
                    Message::Close(_) => {
                        debug!(connection_id = %connection_id, "WebSocket close requested");
                        break;
                    }
                    Message::Binary(_) => {
                        debug!(connection_id = %connection_id, "Binary frame ignored");
                    }
                }
            }
            _ = &mut sender_task => break,
        }
    }

    relay.close(connection_id).await;
    sender_task.abort();

    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Drains the outbound queue onto the socket until the queue closes.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: TransportReceiver,
    connection_id: ConnectionId,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Deliver(delivery) => {
                let json = match delivery.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        error!(connection_id = %connection_id, error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Outbound::Close(reason) => {
                debug!(connection_id = %connection_id, reason = %reason, "Closing WebSocket");
                let frame = CloseFrame {
                    code: close_code::NORMAL,
                    reason: reason.into(),
                };
                let _ = sink.send(Message::Close(Some(frame))).await;
                break;
            }
        }
    }
}

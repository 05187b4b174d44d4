//! Server-Sent Events handlers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use switchboard_core::{
    ConnectionId, Delivery, HandshakeParams, Outbound, Relay, RelayError, TransportKind,
    TransportReceiver,
};
use tracing::{debug, error, info};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the id of the last event a reconnecting client saw.
pub const LAST_EVENT_ID: &str = "last-event-id";

/// Unregisters the stream connection when the response body is dropped.
struct StreamGuard {
    relay: Relay,
    connection_id: ConnectionId,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let relay = self.relay.clone();
        let connection_id = self.connection_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                relay.close(connection_id).await;
                info!(connection_id = %connection_id, "Event stream closed");
            });
        }
    }
}

struct EventStreamState {
    outbound: TransportReceiver,
    retry: Option<Duration>,
    _guard: StreamGuard,
}

/// Encodes a delivery as an SSE event.
///
/// `retry` is attached to the first event only.
#[must_use]
pub fn to_event(delivery: &Delivery, retry: Option<Duration>) -> Event {
    let mut event = Event::default().event(delivery.event_name());
    if let Some(id) = delivery.event_id() {
        event = event.id(id);
    }
    if let Some(retry) = retry {
        event = event.retry(retry);
    }
    match delivery.to_json() {
        Ok(json) => event.data(json),
        Err(e) => {
            error!(error = %e, "Failed to encode event");
            event.data("{}")
        }
    }
}

fn event_stream(
    outbound: TransportReceiver,
    retry: Duration,
    guard: StreamGuard,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let state = EventStreamState {
        outbound,
        retry: Some(retry),
        _guard: guard,
    };

    stream::unfold(state, |mut state| async move {
        match state.outbound.recv().await? {
            Outbound::Deliver(delivery) => {
                let event = to_event(&delivery, state.retry.take());
                Some((Ok(event), state))
            }
            Outbound::Close(reason) => {
                debug!(reason = %reason, "Event stream closed by server");
                None
            }
        }
    })
}

/// `GET /events`: opens a stream connection.
///
/// # Errors
///
/// Returns 401 when authentication fails and 503 when the stream limit is
/// reached.
pub async fn events_handler(
    State(state): State<AppState>,
    Query(params): Query<HandshakeParams>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let last_event_id = headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let params = params.with_last_event_id(last_event_id);

    let relay = state.relay().clone();
    let (transport, outbound) = relay.transport(TransportKind::Stream);
    let info = relay.connect(&params, Arc::new(transport)).await?;
    info!(connection_id = %info.id, "Event stream opened");

    let retry = Duration::from_millis(relay.config().stream_retry_ms);
    let guard = StreamGuard {
        relay,
        connection_id: info.id,
    };

    Ok(Sse::new(event_stream(outbound, retry, guard)).keep_alive(KeepAlive::default()))
}

/// `POST /events/{connection_id}/commands`: the stream request channel.
///
/// The command is dispatched as if it arrived on the connection; its
/// response, if any, is pushed on the event stream.
///
/// # Errors
///
/// Returns 400 for a malformed id or a socket connection and 404 for an
/// unknown connection.
pub async fn command_handler(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let id: ConnectionId = connection_id
        .parse()
        .map_err(|_| ApiError::InvalidConnectionId(connection_id.clone()))?;

    let relay = state.relay();
    let info = relay
        .registry()
        .lookup(id)
        .await
        .ok_or(RelayError::ConnectionClosed(id))?;
    if info.transport != TransportKind::Stream {
        return Err(ApiError::NotStream(connection_id));
    }

    relay.dispatch(id, &body).await;
    Ok(StatusCode::ACCEPTED)
}

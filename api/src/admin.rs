//! Administrative HTTP surface.
//!
//! Server-side publishing and inspection. These routes carry no
//! authentication of their own; deploy them behind a trusted network edge.

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use switchboard_core::{ChannelInfo, ConnectionId, Message, Payload, RegistryStats, RelayError};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

/// Body of `POST /admin/broadcast`.
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    /// Text or structured content.
    pub content: Value,
    /// Connections to skip.
    #[serde(default)]
    pub exclude: Vec<ConnectionId>,
}

/// Body of `POST /admin/channels/{channel}`.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    /// Text or structured content.
    pub content: Value,
    /// Whether to append to the replay buffer.
    #[serde(default)]
    pub persist: bool,
}

/// Body of `POST /admin/users/{user_id}`.
#[derive(Debug, Deserialize)]
pub struct UserMessageRequest {
    /// Text or structured content.
    pub content: Value,
}

/// Body of `POST /admin/notifications`.
///
/// Sent to `user_id` if given, else to `channel`, else to everyone.
#[derive(Debug, Deserialize)]
pub struct NotificationRequest {
    /// Short title.
    pub title: String,
    /// Notification body.
    pub body: String,
    /// Optional severity level.
    #[serde(default)]
    pub level: Option<String>,
    /// Target user.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Target channel.
    #[serde(default)]
    pub channel: Option<String>,
    /// Persist when sent to a channel.
    #[serde(default)]
    pub persist: bool,
}

/// Result of a send operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    /// Id of the message sent.
    pub message_id: String,
    /// Number of connections it was enqueued to.
    pub delivered: usize,
}

/// Body of `GET /admin/stats`.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Registry snapshot.
    #[serde(flatten)]
    pub registry: RegistryStats,
    /// Live channels.
    pub channels: Vec<ChannelInfo>,
}

/// Builds the admin router, mounted under `/admin`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/broadcast", post(broadcast))
        .route("/channels/{channel}", post(publish))
        .route("/users/{user_id}", post(send_to_user))
        .route("/notifications", post(notify))
        .route("/stats", get(stats))
        .route("/connections/{connection_id}", delete(close_connection))
}

fn broadcast_message(content: Value) -> Message {
    match content {
        Value::String(text) => Message::broadcast(text),
        other => Message::structured(other),
    }
}

async fn broadcast(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Json<SendResult> {
    let message = broadcast_message(request.content).with_sender("server");
    let message_id = message.id().to_string();
    let exclude: HashSet<ConnectionId> = request.exclude.into_iter().collect();

    let delivered = state.relay().broker().broadcast_all(message, &exclude).await;
    info!(delivered, "Admin broadcast");
    Json(SendResult {
        message_id,
        delivered,
    })
}

async fn publish(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    Json(request): Json<PublishRequest>,
) -> Json<SendResult> {
    let message = Message::from_content(request.content).with_sender("server");
    let message_id = message.id().to_string();

    let delivered = state
        .relay()
        .broker()
        .publish(&channel, message, request.persist)
        .await;
    Json(SendResult {
        message_id,
        delivered,
    })
}

async fn send_to_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(request): Json<UserMessageRequest>,
) -> Json<SendResult> {
    let message = Message::from_content(request.content).with_sender("server");
    let message_id = message.id().to_string();

    let delivered = state.relay().broker().send_to_user(&user_id, message).await;
    Json(SendResult {
        message_id,
        delivered,
    })
}

async fn notify(
    State(state): State<AppState>,
    Json(request): Json<NotificationRequest>,
) -> Result<Json<SendResult>, ApiError> {
    if request.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title must not be empty".to_string()));
    }

    let message = Message::new(Payload::Notification {
        title: request.title,
        body: request.body,
        level: request.level,
    })
    .with_sender("server");
    let message_id = message.id().to_string();
    let broker = state.relay().broker();

    let delivered = match (request.user_id, request.channel) {
        (Some(user_id), _) => broker.send_to_user(&user_id, message).await,
        (None, Some(channel)) => broker.publish(&channel, message, request.persist).await,
        (None, None) => broker.broadcast_all(message, &HashSet::new()).await,
    };

    Ok(Json(SendResult {
        message_id,
        delivered,
    }))
}

async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let relay = state.relay();
    Json(StatsResponse {
        registry: relay.registry().stats().await,
        channels: relay.broker().channels().await,
    })
}

async fn close_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: ConnectionId = connection_id
        .parse()
        .map_err(|_| ApiError::InvalidConnectionId(connection_id))?;

    if state.relay().disconnect(id, "closed by administrator").await {
        info!(connection_id = %id, "Connection closed by administrator");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(RelayError::ConnectionClosed(id).into())
    }
}

/// `GET /health`.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let stats = state.relay().registry().stats().await;
    let uptime = chrono::Utc::now() - state.started_at();
    Json(json!({
        "status": "healthy",
        "connections": stats.total_connections,
        "uptime_secs": uptime.num_seconds(),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum_test::TestServer;
    use switchboard_core::{
        Delivery, HandshakeParams, Outbound, RelayConfig, TransportKind, TransportReceiver,
    };

    use super::*;
    use crate::server::build_router;

    fn setup() -> (TestServer, AppState) {
        let config = RelayConfig::default().with_heartbeat_interval(0);
        let state = AppState::with_relay_config(config).expect("state");
        let server = TestServer::new(build_router(state.clone())).expect("test server");
        (server, state)
    }

    async fn connect(state: &AppState, params: HandshakeParams) -> (ConnectionId, TransportReceiver) {
        let relay = state.relay();
        let (transport, mut rx) = relay.transport(TransportKind::Socket);
        let info = relay
            .connect(&params, Arc::new(transport))
            .await
            .expect("connect");
        // Skip the welcome message.
        let _ = rx.recv().await;
        (info.id, rx)
    }

    async fn next_message(rx: &mut TransportReceiver) -> Arc<Message> {
        match rx.recv().await {
            Some(Outbound::Deliver(Delivery::Message(m))) => m,
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_health() {
        let (server, _state) = setup();
        let response = server.get("/health").await;
        response.assert_status_ok();
        let body: Value = response.json();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn test_publish_to_channel() {
        let (server, state) = setup();
        let params = HandshakeParams {
            channels: Some("news".into()),
            ..Default::default()
        };
        let (_id, mut rx) = connect(&state, params).await;

        let response = server
            .post("/admin/channels/news")
            .json(&json!({"content": "breaking", "persist": true}))
            .await;
        response.assert_status_ok();
        let result: SendResult = response.json();
        assert_eq!(result.delivered, 1);

        let message = next_message(&mut rx).await;
        assert_eq!(message.as_text(), Some("breaking"));
        assert_eq!(message.id(), result.message_id);
        assert_eq!(state.relay().broker().history("news").await.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_excludes() {
        let (server, state) = setup();
        let (a, _ra) = connect(&state, HandshakeParams::default()).await;
        let (_b, mut rb) = connect(&state, HandshakeParams::default()).await;

        let response = server
            .post("/admin/broadcast")
            .json(&json!({"content": "all hands", "exclude": [a]}))
            .await;
        let result: SendResult = response.json();
        assert_eq!(result.delivered, 1);

        let message = next_message(&mut rb).await;
        assert_eq!(message.as_text(), Some("all hands"));
        assert!(state.relay().registry().lookup(a).await.is_some());
    }

    #[tokio::test]
    async fn test_send_to_user_and_notification() {
        let (server, state) = setup();
        let params = HandshakeParams {
            user_id: Some("alice".into()),
            ..Default::default()
        };
        let (_id, mut rx) = connect(&state, params).await;

        let result: SendResult = server
            .post("/admin/users/alice")
            .json(&json!({"content": {"kind": "ping"}}))
            .await
            .json();
        assert_eq!(result.delivered, 1);
        assert_eq!(next_message(&mut rx).await.recipient_id(), Some("alice"));

        let result: SendResult = server
            .post("/admin/notifications")
            .json(&json!({"title": "Heads up", "body": "Deploy at 5", "user_id": "alice"}))
            .await
            .json();
        assert_eq!(result.delivered, 1);
        match next_message(&mut rx).await.payload() {
            Payload::Notification { title, .. } => assert_eq!(title, "Heads up"),
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_notification_requires_title() {
        let (server, _state) = setup();
        let response = server
            .post("/admin/notifications")
            .json(&json!({"title": " ", "body": "x"}))
            .expect_failure()
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_and_close_connection() {
        let (server, state) = setup();
        let params = HandshakeParams {
            user_id: Some("alice".into()),
            channels: Some("news".into()),
            ..Default::default()
        };
        let (id, _rx) = connect(&state, params).await;

        let stats: Value = server.get("/admin/stats").await.json();
        assert_eq!(stats["total_connections"], 1);
        assert_eq!(stats["connections_by_transport"]["socket"], 1);
        assert_eq!(stats["user_count"], 1);
        assert_eq!(stats["channels"][0]["name"], "news");

        server
            .delete(&format!("/admin/connections/{}", id))
            .await
            .assert_status(StatusCode::NO_CONTENT);
        server
            .delete(&format!("/admin/connections/{}", id))
            .expect_failure()
            .await
            .assert_status(StatusCode::NOT_FOUND);
        server
            .delete("/admin/connections/not-an-id")
            .expect_failure()
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}

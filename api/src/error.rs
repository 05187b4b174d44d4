//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use switchboard_core::RelayError;

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Messaging core error.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Path parameter is not a valid connection id.
    #[error("invalid connection id: {0}")]
    InvalidConnectionId(String),

    /// Connection exists but is not a stream connection.
    #[error("connection {0} is not a stream connection")]
    NotStream(String),

    /// Request body rejected.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// Returns the HTTP status for the error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Relay(err) => match err {
                RelayError::Authentication(_) => StatusCode::UNAUTHORIZED,
                RelayError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
                RelayError::ConnectionClosed(_) => StatusCode::NOT_FOUND,
                RelayError::Forbidden(_) => StatusCode::FORBIDDEN,
                RelayError::InvalidCommand(_) | RelayError::Serialization(_) => {
                    StatusCode::BAD_REQUEST
                }
                RelayError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::InvalidConnectionId(_) | Self::NotStream(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Relay(err) => err.code(),
            Self::InvalidConnectionId(_) => "INVALID_CONNECTION_ID",
            Self::NotStream(_) => "NOT_STREAM_CONNECTION",
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::{ConnectionId, TransportKind};

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(RelayError::Authentication("bad".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::from(RelayError::CapacityExceeded {
                transport: TransportKind::Stream,
                limit: 1
            })
            .status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(RelayError::ConnectionClosed(ConnectionId::new())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::InvalidConnectionId("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_error_code() {
        assert_eq!(
            ApiError::from(RelayError::Forbidden("user:a".into())).code(),
            "FORBIDDEN"
        );
        assert_eq!(ApiError::BadRequest("x".into()).code(), "BAD_REQUEST");
    }
}

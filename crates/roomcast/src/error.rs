//! Unified error type for the server crate, plus the HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use roomcast_protocol::ProtocolError;
use roomcast_room::RoomError;
use roomcast_session::TokenError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attributes let `?` convert sub-crate errors
/// automatically, so server code deals with one type.
#[derive(Debug, thiserror::Error)]
pub enum RoomcastError {
    /// A token-authority error (not issued, collision).
    #[error(transparent)]
    Token(#[from] TokenError),

    /// A room or directory error.
    #[error(transparent)]
    Room(#[from] RoomError),

    /// A protocol-level error (encode, decode, patch).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Binding or serving the listener failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An HTTP-facing rejection: status code plus the human-readable message
/// rendered as `{"error": "..."}`.
///
/// Transport and room-internal failures never surface here — this covers
/// exactly the caller-visible taxonomy: validation problems, unknown
/// sessions/tokens, and duplicate joins.
#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) message: String,
}

impl ApiError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<RoomError> for ApiError {
    fn from(error: RoomError) -> Self {
        let status = match &error {
            RoomError::InvalidDisplayName(_) => StatusCode::BAD_REQUEST,
            RoomError::SessionNotFound(_) | RoomError::Unavailable(_) => {
                StatusCode::NOT_FOUND
            }
            RoomError::AlreadyJoined(_) => StatusCode::CONFLICT,
            RoomError::CreateFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(error: TokenError) -> Self {
        let status = match &error {
            TokenError::NotIssued => StatusCode::BAD_REQUEST,
            TokenError::Collision => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use roomcast_protocol::SessionId;

    use super::*;

    #[test]
    fn test_from_token_error() {
        let err: RoomcastError = TokenError::NotIssued.into();
        assert!(matches!(err, RoomcastError::Token(_)));
        assert!(err.to_string().contains("not issued"));
    }

    #[test]
    fn test_from_room_error() {
        let err: RoomcastError =
            RoomError::SessionNotFound(SessionId::new("x")).into();
        assert!(matches!(err, RoomcastError::Room(_)));
    }

    #[test]
    fn test_api_error_statuses() {
        let api: ApiError =
            RoomError::InvalidDisplayName("too short".into()).into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);

        let api: ApiError =
            RoomError::SessionNotFound(SessionId::new("x")).into();
        assert_eq!(api.status, StatusCode::NOT_FOUND);

        let api: ApiError = RoomError::AlreadyJoined(
            roomcast_protocol::ConnectionToken::new("t"),
        )
        .into();
        assert_eq!(api.status, StatusCode::CONFLICT);

        let api: ApiError = TokenError::NotIssued.into();
        assert_eq!(api.status, StatusCode::BAD_REQUEST);
    }
}

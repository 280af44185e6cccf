//! The REST surface: session creation and joining.
//!
//! Two POST routes, both answering the same response shape. Creating a
//! session issues a fresh token and a fresh room; joining resolves the
//! room by id or access code, issues (or reuses) a token, and stashes the
//! request body on it as the join payload. The actual roster insertion
//! happens later, when the WebSocket connects and redeems the token.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use roomcast_protocol::{
    validate_display_name, AccessCode, ConnectionToken, SessionId,
};
use roomcast_session::TokenPayload;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;
use crate::ws;

/// Builds the complete router: REST plus the WebSocket upgrade.
pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/session", post(create_session))
        .route("/session/{id_or_access_code}", post(join_session))
        .route("/ws/session/{session_id}", get(ws::upgrade))
        .with_state(state)
}

/// Response body for both session routes.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub connection_token: ConnectionToken,
    pub session_id: SessionId,
    pub session_access_code: AccessCode,
}

/// `POST /session` — create a room and issue a join token for its
/// creator (the future host).
async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionResponse>, ApiError> {
    let connection_token = state.tokens.issue(None)?;
    let room = state.directory.create_session()?;

    Ok(Json(SessionResponse {
        connection_token,
        session_id: room.session_id().clone(),
        session_access_code: room.access_code().clone(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinQuery {
    #[serde(default)]
    by_access_code: bool,
    connection_token: Option<String>,
}

/// `POST /session/{idOrAccessCode}?byAccessCode=bool[&connectionToken=..]`
/// — resolve a room and prepare a token for joining it.
///
/// The optional JSON body (`{"displayName": ..., ...}`) is validated and
/// attached to the token; the room consumes it when the socket connects.
async fn join_session(
    State(state): State<Arc<AppState>>,
    Path(id_or_access_code): Path<String>,
    Query(query): Query<JoinQuery>,
    body: Option<Json<TokenPayload>>,
) -> Result<Json<SessionResponse>, ApiError> {
    let room = if query.by_access_code {
        state
            .directory
            .get_session_by_access_code(&AccessCode::new(
                id_or_access_code,
            ))
    } else {
        state
            .directory
            .get_session(&SessionId::new(id_or_access_code))
    }
    .ok_or_else(|| ApiError::not_found("Session not found"))?;

    let connection_token = match query.connection_token {
        Some(token) => ConnectionToken::new(token),
        None => state.tokens.issue(None)?,
    };

    if let Some(Json(payload)) = body {
        if !payload.is_empty() {
            if let Some(name) = payload.get("displayName") {
                let name = name.as_str().ok_or_else(|| {
                    ApiError::bad_request(
                        "Display name must be a string",
                    )
                })?;
                validate_display_name(name)
                    .map_err(ApiError::bad_request)?;
            }

            state
                .tokens
                .update(&connection_token, Some(payload))?;
        }
    }

    Ok(Json(SessionResponse {
        connection_token,
        session_id: room.session_id().clone(),
        session_access_code: room.access_code().clone(),
    }))
}

//! WebSocket accept glue: upgrade, token redemption, and the frame pump.
//!
//! The socket is split in two:
//!
//! - a **writer task** drains the connection's outbound frame queue into
//!   the socket and closes it when a close frame comes through — this is
//!   the far end of every fire-and-forget send in the core;
//! - the **read loop** (this task) touches the registry on every inbound
//!   frame, decodes envelopes, and relays them to the owning room via the
//!   directory.
//!
//! Transport errors and closes are not reported upward; both funnel into
//! `handle_close`, the same path an explicit leave takes, so roster and
//! role cleanup is identical no matter how a connection dies.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use roomcast_protocol::{
    CloseCode, Codec, ConnectionToken, JsonCodec, SessionId,
};
use roomcast_room::JoinOptions;
use roomcast_transport::{ConnectionHandle, Frame, FrameReceiver};
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WsQuery {
    connection_token: Option<String>,
}

/// `GET /ws/session/{sessionId}?connectionToken=...` — upgrade to the
/// persistent connection. A missing token is rejected before the upgrade
/// (a missing session id never reaches here — the route doesn't match).
pub(crate) async fn upgrade(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = query.connection_token else {
        tracing::debug!("websocket upgrade without connection token");
        return (StatusCode::BAD_REQUEST, "missing connection token")
            .into_response();
    };

    let session_id = SessionId::new(session_id);
    let token = ConnectionToken::new(token);

    ws.on_upgrade(move |socket| {
        handle_socket(state, session_id, token, socket)
    })
}

/// Runs one connection from accept to close.
async fn handle_socket(
    state: Arc<AppState>,
    session_id: SessionId,
    token: ConnectionToken,
    socket: WebSocket,
) {
    // The token must be outstanding and the room resolvable before
    // anything is redeemed or registered.
    if !state.tokens.is_outstanding(&token) {
        tracing::debug!(%token, "connection with unknown token, closing");
        close_immediately(socket).await;
        return;
    }
    if state.directory.get_session(&session_id).is_none() {
        tracing::debug!(
            %session_id,
            "connection for unknown session, closing"
        );
        close_immediately(socket).await;
        return;
    }

    // Redeem exactly once; losing the race against the expiry sweep is a
    // normal rejection, not a fault.
    let payload = match state.tokens.redeem(&token) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::debug!(%token, %error, "token redeem failed, closing");
            close_immediately(socket).await;
            return;
        }
    };
    let options = JoinOptions::from_payload(payload.as_ref());

    let (mut sink, mut stream) = socket.split();
    let (handle, frames) = ConnectionHandle::channel();
    let connection_id = handle.id();
    state.registry.register(token.clone(), handle);

    // Writer: outbound queue → socket.
    let writer = tokio::spawn(async move {
        drain_frames(frames, &mut sink).await;
    });

    tracing::info!(
        %connection_id,
        %session_id,
        %token,
        "connection established"
    );

    if let Err(error) = state
        .directory
        .join_session(&session_id, token.clone(), options)
        .await
    {
        tracing::info!(%token, %error, "join rejected, closing connection");
        state.registry.close(
            &token,
            CloseCode::Terminated,
            &error.to_string(),
        );
        let _ = writer.await;
        return;
    }

    // Read loop: inbound frames → the owning room.
    let codec = JsonCodec;
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                state.registry.touch(&token);
                relay(&state, &token, &codec, text.as_bytes()).await;
            }
            Ok(Message::Binary(bytes)) => {
                state.registry.touch(&token);
                relay(&state, &token, &codec, &bytes).await;
            }
            Ok(Message::Close(_)) => {
                tracing::debug!(%token, "client closed connection");
                break;
            }
            // Protocol-level ping/pong still proves the peer is alive.
            Ok(_) => state.registry.touch(&token),
            Err(error) => {
                tracing::debug!(%token, %error, "connection errored");
                state
                    .directory
                    .handle_error(&token, error.to_string())
                    .await;
                break;
            }
        }
    }

    // Same cleanup for error, client close, and server-initiated close:
    // drop the registry entry and run the room's close path.
    state.registry.close(
        &token,
        CloseCode::Terminated,
        CloseCode::Terminated.default_reason(),
    );
    state.directory.handle_close(&token).await;
    let _ = writer.await;

    tracing::info!(%connection_id, %token, "connection finished");
}

/// Decodes one inbound frame and relays it; malformed input is logged
/// and dropped.
async fn relay(
    state: &AppState,
    token: &ConnectionToken,
    codec: &JsonCodec,
    bytes: &[u8],
) {
    match codec.decode_envelope(bytes) {
        Ok(envelope) => {
            state.directory.handle_message(token, envelope).await;
        }
        Err(error) => {
            tracing::debug!(
                %token,
                %error,
                "malformed inbound message, ignoring"
            );
        }
    }
}

/// Forwards queued frames into the socket until a close frame or the
/// queue's end.
async fn drain_frames(
    mut frames: FrameReceiver,
    sink: &mut futures_util::stream::SplitSink<WebSocket, Message>,
) {
    while let Some(frame) = frames.recv().await {
        match frame {
            Frame::Data(bytes) => {
                if sink.send(Message::Binary(bytes.into())).await.is_err()
                {
                    break;
                }
            }
            Frame::Close { code, reason } => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: code.as_u16(),
                        reason: reason.into(),
                    })))
                    .await;
                break;
            }
        }
    }
    let _ = sink.close().await;
}

/// Rejects a socket that never got past validation.
async fn close_immediately(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Terminated.as_u16(),
            reason: CloseCode::Terminated.default_reason().into(),
        })))
        .await;
    let _ = socket.close().await;
}

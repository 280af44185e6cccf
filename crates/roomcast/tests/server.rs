//! End-to-end tests: real server, real HTTP calls, real WebSockets.
//!
//! Each test starts a server on a random port, drives it with `reqwest`
//! and a `tokio-tungstenite` client, and asserts on actual wire traffic.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use roomcast::{RoomcastServer, SessionResponse};
use roomcast_protocol::{apply, Envelope, MessageKind, PatchOp};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Starts a server on a random port and returns its address.
async fn start_server() -> String {
    let server = RoomcastServer::builder()
        .bind("127.0.0.1:0")
        .build()
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("server should be bound");
    tokio::spawn(server.run());
    addr.to_string()
}

async fn create_session(
    client: &reqwest::Client,
    addr: &str,
) -> SessionResponse {
    client
        .post(format!("http://{addr}/session"))
        .send()
        .await
        .expect("create request should succeed")
        .json()
        .await
        .expect("create response should parse")
}

async fn connect_ws(addr: &str, session_id: &str, token: &str) -> ClientWs {
    let url = format!(
        "ws://{addr}/ws/session/{session_id}?connectionToken={token}"
    );
    let (ws, _response) = tokio_tungstenite::connect_async(url)
        .await
        .expect("websocket should connect");
    ws
}

/// Reads the next wire envelope, skipping protocol-level ping/pong.
async fn next_envelope(ws: &mut ClientWs) -> Envelope {
    loop {
        let message = tokio::time::timeout(
            Duration::from_secs(5),
            ws.next(),
        )
        .await
        .expect("timed out waiting for message")
        .expect("stream should not end")
        .expect("stream should not error");

        match message {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).unwrap()
            }
            Message::Binary(bytes) => {
                return serde_json::from_slice(&bytes).unwrap()
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

/// Reads envelopes until one of the given kind shows up.
async fn next_envelope_of(
    ws: &mut ClientWs,
    kind: MessageKind,
) -> Envelope {
    loop {
        let envelope = next_envelope(ws).await;
        if envelope.kind == kind {
            return envelope;
        }
    }
}

/// Reads until the server closes the socket; returns the close code.
async fn wait_for_close(ws: &mut ClientWs) -> Option<u16> {
    loop {
        let message = tokio::time::timeout(
            Duration::from_secs(5),
            ws.next(),
        )
        .await
        .expect("timed out waiting for close");

        match message {
            Some(Ok(Message::Close(frame))) => {
                return frame.map(|f| u16::from(f.code));
            }
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

// =========================================================================
// REST surface
// =========================================================================

#[tokio::test]
async fn test_create_session_issues_token_id_and_code() {
    let addr = start_server().await;
    let client = reqwest::Client::new();

    let created = create_session(&client, &addr).await;

    assert_eq!(created.connection_token.as_str().len(), 32);
    assert_eq!(created.session_id.as_str().len(), 6);
    let code = created.session_access_code.as_str();
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test]
async fn test_join_unknown_access_code_is_404() {
    let addr = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{addr}/session/000000?byAccessCode=true"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Session not found");
}

#[tokio::test]
async fn test_join_rejects_bad_display_names() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let created = create_session(&client, &addr).await;
    let code = created.session_access_code.as_str();

    // Two characters.
    let response = client
        .post(format!("http://{addr}/session/{code}?byAccessCode=true"))
        .json(&serde_json::json!({"displayName": "Al"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("at least 3 characters"),
        "got: {body}"
    );

    // More than sixteen characters.
    let response = client
        .post(format!("http://{addr}/session/{code}?byAccessCode=true"))
        .json(&serde_json::json!({"displayName": "AlexandrissimusTheGreat"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("at most 16 characters"),
        "got: {body}"
    );
}

#[tokio::test]
async fn test_join_by_access_code_issues_fresh_token() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let created = create_session(&client, &addr).await;
    let code = created.session_access_code.as_str();

    let joined: SessionResponse = client
        .post(format!("http://{addr}/session/{code}?byAccessCode=true"))
        .json(&serde_json::json!({"displayName": "Ann"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(joined.session_id, created.session_id);
    assert_eq!(
        joined.session_access_code,
        created.session_access_code
    );
    assert_ne!(joined.connection_token, created.connection_token);
}

#[tokio::test]
async fn test_join_by_session_id_works_too() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let created = create_session(&client, &addr).await;
    let id = created.session_id.as_str();

    let response = client
        .post(format!("http://{addr}/session/{id}"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}

// =========================================================================
// The persistent connection
// =========================================================================

#[tokio::test]
async fn test_ws_without_token_is_rejected() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let created = create_session(&client, &addr).await;

    let url = format!(
        "ws://{addr}/ws/session/{}",
        created.session_id.as_str()
    );
    let result = tokio_tungstenite::connect_async(url).await;

    assert!(result.is_err(), "upgrade must be rejected");
}

#[tokio::test]
async fn test_ws_with_unknown_token_is_closed() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let created = create_session(&client, &addr).await;

    let mut ws = connect_ws(
        &addr,
        created.session_id.as_str(),
        "deadbeefdeadbeefdeadbeefdeadbeef",
    )
    .await;

    assert!(wait_for_close(&mut ws).await.is_some());
}

#[tokio::test]
async fn test_token_cannot_be_redeemed_twice() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let created = create_session(&client, &addr).await;
    let sid = created.session_id.as_str();
    let token = created.connection_token.as_str();

    let mut first = connect_ws(&addr, sid, token).await;
    let envelope = next_envelope(&mut first).await;
    assert_eq!(envelope.kind, MessageKind::Ping);

    // Same token again: redeemed already, so the second socket is
    // closed without ever joining.
    let mut second = connect_ws(&addr, sid, token).await;
    assert!(wait_for_close(&mut second).await.is_some());
}

#[tokio::test]
async fn test_host_connection_gets_ping_clock_request_then_full_state() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let created = create_session(&client, &addr).await;

    let mut ws = connect_ws(
        &addr,
        created.session_id.as_str(),
        created.connection_token.as_str(),
    )
    .await;

    assert_eq!(next_envelope(&mut ws).await.kind, MessageKind::Ping);
    assert_eq!(
        next_envelope(&mut ws).await.kind,
        MessageKind::RequestCurrentTime
    );

    let full = next_envelope(&mut ws).await;
    assert_eq!(full.kind, MessageKind::FullStateUpdate);

    let doc = full.payload.unwrap();
    assert_eq!(doc["id"], created.session_id.as_str());
    assert_eq!(
        doc["accessCode"],
        created.session_access_code.as_str()
    );
    let clients = doc["clients"].as_object().unwrap();
    assert_eq!(clients.len(), 1);
    let host = clients.values().next().unwrap();
    assert_eq!(host["displayName"], "Host");
    assert_eq!(doc["hostClientId"], host["id"]);
}

#[tokio::test]
async fn test_second_joiner_syncs_and_host_delta_converges() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let created = create_session(&client, &addr).await;
    let sid = created.session_id.as_str();
    let code = created.session_access_code.as_str();

    // Host connects and syncs.
    let mut host_ws = connect_ws(
        &addr,
        sid,
        created.connection_token.as_str(),
    )
    .await;
    let host_full =
        next_envelope_of(&mut host_ws, MessageKind::FullStateUpdate)
            .await;
    let mut host_doc = host_full.payload.unwrap();

    // Ann joins over HTTP, then connects.
    let joined: SessionResponse = client
        .post(format!("http://{addr}/session/{code}?byAccessCode=true"))
        .json(&serde_json::json!({"displayName": "Ann"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let mut ann_ws =
        connect_ws(&addr, sid, joined.connection_token.as_str()).await;

    // Ann's first state message is a full snapshot, never a delta.
    let ann_first = loop {
        let envelope = next_envelope(&mut ann_ws).await;
        match envelope.kind {
            MessageKind::FullStateUpdate => break envelope,
            MessageKind::DeltaStateUpdate => {
                panic!("joiner must not receive a delta first")
            }
            _ => continue,
        }
    };
    let ann_doc = ann_first.payload.unwrap();
    let clients = ann_doc["clients"].as_object().unwrap();
    assert_eq!(clients.len(), 2);
    assert!(ann_doc["controllerClientId"].is_string());

    // The host catches up by delta, and applying it to the held
    // snapshot reproduces exactly what Ann was sent in full.
    let delta =
        next_envelope_of(&mut host_ws, MessageKind::DeltaStateUpdate)
            .await;
    let ops: Vec<PatchOp> = delta.payload_as().unwrap();
    assert!(ops
        .iter()
        .any(|op| op.path().starts_with("/clients/")));
    apply(&mut host_doc, &ops).unwrap();
    assert_eq!(host_doc, ann_doc);
}

#[tokio::test]
async fn test_host_disconnect_closes_other_clients_with_4001() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let created = create_session(&client, &addr).await;
    let sid = created.session_id.as_str();
    let code = created.session_access_code.as_str();

    let mut host_ws = connect_ws(
        &addr,
        sid,
        created.connection_token.as_str(),
    )
    .await;
    next_envelope_of(&mut host_ws, MessageKind::FullStateUpdate).await;

    let joined: SessionResponse = client
        .post(format!("http://{addr}/session/{code}?byAccessCode=true"))
        .json(&serde_json::json!({"displayName": "Ann"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let mut ann_ws =
        connect_ws(&addr, sid, joined.connection_token.as_str()).await;
    next_envelope_of(&mut ann_ws, MessageKind::FullStateUpdate).await;

    // The host vanishes without a leave message.
    host_ws.close(None).await.unwrap();

    // The whole session tears down: Ann is closed with the
    // host-disconnected code.
    assert_eq!(wait_for_close(&mut ann_ws).await, Some(4001));

    // And the session is gone — the access code no longer resolves.
    let response = client
        .post(format!("http://{addr}/session/{code}?byAccessCode=true"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_leave_message_removes_client_and_host_sees_delta() {
    let addr = start_server().await;
    let client = reqwest::Client::new();
    let created = create_session(&client, &addr).await;
    let sid = created.session_id.as_str();
    let code = created.session_access_code.as_str();

    let mut host_ws = connect_ws(
        &addr,
        sid,
        created.connection_token.as_str(),
    )
    .await;
    next_envelope_of(&mut host_ws, MessageKind::FullStateUpdate).await;

    let joined: SessionResponse = client
        .post(format!("http://{addr}/session/{code}?byAccessCode=true"))
        .json(&serde_json::json!({"displayName": "Ann"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let mut ann_ws =
        connect_ws(&addr, sid, joined.connection_token.as_str()).await;
    next_envelope_of(&mut ann_ws, MessageKind::FullStateUpdate).await;
    next_envelope_of(&mut host_ws, MessageKind::DeltaStateUpdate).await;

    // Ann leaves explicitly.
    ann_ws
        .send(Message::text("[\"leave\"]"))
        .await
        .unwrap();

    // The host sees the roster shrink back to itself.
    let delta =
        next_envelope_of(&mut host_ws, MessageKind::DeltaStateUpdate)
            .await;
    let ops: Vec<PatchOp> = delta.payload_as().unwrap();
    assert!(ops.iter().any(|op| matches!(
        op,
        PatchOp::Remove { path } if path.starts_with("/clients/")
    )));
}

//! The canonical session document — the one typed schema that both the
//! full-state and delta-state updates operate over.
//!
//! The server mutates a [`SessionState`] in place; the sync loop serializes
//! it and diffs the JSON form against the last broadcast snapshot. Clients
//! hold the same document and apply patches to it. There is deliberately no
//! second, looser representation anywhere: if it isn't in this schema, it
//! isn't on the wire.

use std::time::{SystemTime, UNIX_EPOCH};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AccessCode, ClientId, ConnectionToken, SessionId};

/// Reserved display name for the host client. Forced regardless of any
/// requested name.
pub const HOST_DISPLAY_NAME: &str = "Host";

/// Minimum display-name length for non-host clients.
pub const DISPLAY_NAME_MIN_CHARS: usize = 3;

/// Maximum display-name length for non-host clients.
pub const DISPLAY_NAME_MAX_CHARS: usize = 16;

/// Current wall-clock time in unix milliseconds.
///
/// Document timestamps use wall-clock time (not a monotonic clock) because
/// they are shipped to clients for presentation.
pub fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Validates a requested (non-host) display name.
///
/// Returns the human-readable rejection message on failure; the same
/// message is surfaced by both the HTTP join route and `add_client`.
pub fn validate_display_name(name: &str) -> Result<(), String> {
    let chars = name.chars().count();
    if chars < DISPLAY_NAME_MIN_CHARS {
        return Err(format!(
            "Display name must be at least {DISPLAY_NAME_MIN_CHARS} characters"
        ));
    }
    if chars > DISPLAY_NAME_MAX_CHARS {
        return Err(format!(
            "Display name must be at most {DISPLAY_NAME_MAX_CHARS} characters"
        ));
    }
    Ok(())
}

/// The default display name for the N-th joiner (1-based join order).
pub fn default_display_name(join_order: usize) -> String {
    format!("Player {join_order}")
}

// ---------------------------------------------------------------------------
// Device metadata
// ---------------------------------------------------------------------------

/// What kind of device a client joined from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceType {
    #[default]
    Unknown,
    Desktop,
    Mobile,
    Tablet,
}

/// What platform a client joined from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum DevicePlatform {
    #[default]
    Unknown,
    Web,
    Ios,
    Android,
}

// ---------------------------------------------------------------------------
// SessionClient
// ---------------------------------------------------------------------------

/// One joined participant, as it appears in the synced roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClient {
    /// Unique within the session.
    pub id: ClientId,

    /// Back-reference to the token that authenticated the connection.
    /// A lookup key into the connection registry, nothing more.
    pub connection_token: ConnectionToken,

    /// 3–16 characters, except the host whose name is always
    /// [`HOST_DISPLAY_NAME`].
    pub display_name: String,

    pub device_type: DeviceType,
    pub device_platform: DevicePlatform,

    /// Unix ms at join time.
    pub connected_at: u64,

    /// 0 while the client is responsive. Set to the current unix ms by the
    /// disconnect-detection loop when heartbeats go missing; the client is
    /// then soft-disconnected but still in the roster.
    pub disconnected_at: u64,

    /// Last measured round trip, clamped to the heartbeat interval.
    pub ping_millis: u64,
}

impl SessionClient {
    /// A freshly joined, responsive client with unknown device metadata.
    pub fn new(
        id: ClientId,
        connection_token: ConnectionToken,
        display_name: impl Into<String>,
        connected_at: u64,
    ) -> Self {
        Self {
            id,
            connection_token,
            display_name: display_name.into(),
            device_type: DeviceType::Unknown,
            device_platform: DevicePlatform::Unknown,
            connected_at,
            disconnected_at: 0,
            ping_millis: 0,
        }
    }

    /// Whether the disconnect-detection loop has flagged this client.
    pub fn is_soft_disconnected(&self) -> bool {
        self.disconnected_at != 0
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The full document for one session: identity, roster, roles, and the
/// opaque game state.
///
/// `clients` is an [`IndexMap`] so that iteration order is join order —
/// controller promotion walks the roster in that order, and clients render
/// the lobby list in that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub id: SessionId,
    pub access_code: AccessCode,

    /// Unix ms at creation time.
    pub created_at: u64,

    /// Roster keyed by client id, insertion order = join order.
    pub clients: IndexMap<ClientId, SessionClient>,

    /// Opaque game document, owned by game logic outside the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_state: Option<Value>,

    /// The first joiner. Never reassigned while the session lives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_client_id: Option<ClientId>,

    /// The designated input device. Re-elected on disconnect; always a
    /// non-host roster member when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_client_id: Option<ClientId>,
}

impl SessionState {
    /// An empty session document.
    pub fn new(
        id: SessionId,
        access_code: AccessCode,
        created_at: u64,
    ) -> Self {
        Self {
            id,
            access_code,
            created_at,
            clients: IndexMap::new(),
            game_state: None,
            host_client_id: None,
            controller_client_id: None,
        }
    }

    /// Number of clients currently in the roster.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Whether the given client is the host.
    pub fn is_host(&self, id: &ClientId) -> bool {
        self.host_client_id.as_ref() == Some(id)
    }

    /// Whether the given client is the controller.
    pub fn is_controller(&self, id: &ClientId) -> bool {
        self.controller_client_id.as_ref() == Some(id)
    }

    /// The first non-host client in roster (join) order, if any.
    ///
    /// This is the promotion rule for the controller slot.
    pub fn next_non_host_client(&self) -> Option<&SessionClient> {
        self.clients
            .values()
            .find(|client| !self.is_host(&client.id))
    }

    /// Removes a client while preserving the join order of the rest.
    ///
    /// `shift_remove`, not `swap_remove` — roster order is meaningful.
    pub fn remove_client(&mut self, id: &ClientId) -> Option<SessionClient> {
        self.clients.shift_remove(id)
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> SessionState {
        SessionState::new(
            SessionId::new("a1b2c3"),
            AccessCode::new("123456"),
            1_700_000_000_000,
        )
    }

    fn sample_client(id: &str, name: &str) -> SessionClient {
        SessionClient::new(
            ClientId::new(id),
            ConnectionToken::new(format!("token-{id}")),
            name,
            1_700_000_000_001,
        )
    }

    // =====================================================================
    // Display-name validation
    // =====================================================================

    #[test]
    fn test_validate_display_name_too_short() {
        let err = validate_display_name("Al").unwrap_err();
        assert!(err.contains("at least 3 characters"), "got: {err}");
    }

    #[test]
    fn test_validate_display_name_too_long() {
        let err = validate_display_name("Alexandrissimus!!").unwrap_err();
        assert!(err.contains("at most 16 characters"), "got: {err}");
    }

    #[test]
    fn test_validate_display_name_bounds_inclusive() {
        assert!(validate_display_name("Ann").is_ok());
        assert!(validate_display_name("ExactlySixteen!!").is_ok());
    }

    #[test]
    fn test_validate_display_name_counts_chars_not_bytes() {
        // Three characters, nine bytes.
        assert!(validate_display_name("日本語").is_ok());
    }

    #[test]
    fn test_default_display_name_is_one_based() {
        assert_eq!(default_display_name(2), "Player 2");
    }

    // =====================================================================
    // Document shape on the wire
    // =====================================================================

    #[test]
    fn test_session_state_serializes_camel_case() {
        let mut state = sample_state();
        state.host_client_id = Some(ClientId::new("h1"));

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["accessCode"], "123456");
        assert_eq!(json["createdAt"], 1_700_000_000_000u64);
        assert_eq!(json["hostClientId"], "h1");
        assert!(json["clients"].is_object());
    }

    #[test]
    fn test_session_state_omits_absent_optionals() {
        let json = serde_json::to_value(&sample_state()).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("gameState"));
        assert!(!obj.contains_key("hostClientId"));
        assert!(!obj.contains_key("controllerClientId"));
    }

    #[test]
    fn test_session_client_serializes_camel_case() {
        let client = sample_client("c1", "Ann");
        let json = serde_json::to_value(&client).unwrap();
        assert_eq!(json["displayName"], "Ann");
        assert_eq!(json["connectionToken"], "token-c1");
        assert_eq!(json["deviceType"], "unknown");
        assert_eq!(json["devicePlatform"], "unknown");
        assert_eq!(json["disconnectedAt"], 0);
        assert_eq!(json["pingMillis"], 0);
    }

    #[test]
    fn test_session_state_round_trip_preserves_roster_order() {
        let mut state = sample_state();
        for id in ["c3", "c1", "c2"] {
            let client = sample_client(id, "Ann");
            state.clients.insert(client.id.clone(), client);
        }

        let bytes = serde_json::to_vec(&state).unwrap();
        let decoded: SessionState = serde_json::from_slice(&bytes).unwrap();

        let order: Vec<&str> =
            decoded.clients.keys().map(ClientId::as_str).collect();
        assert_eq!(order, vec!["c3", "c1", "c2"]);
    }

    // =====================================================================
    // Roster helpers
    // =====================================================================

    #[test]
    fn test_next_non_host_client_skips_host() {
        let mut state = sample_state();
        for id in ["h1", "c1", "c2"] {
            let client = sample_client(id, "Ann");
            state.clients.insert(client.id.clone(), client);
        }
        state.host_client_id = Some(ClientId::new("h1"));

        let next = state.next_non_host_client().unwrap();
        assert_eq!(next.id.as_str(), "c1");
    }

    #[test]
    fn test_next_non_host_client_none_when_only_host_remains() {
        let mut state = sample_state();
        let host = sample_client("h1", "Ann");
        state.clients.insert(host.id.clone(), host);
        state.host_client_id = Some(ClientId::new("h1"));

        assert!(state.next_non_host_client().is_none());
    }

    #[test]
    fn test_remove_client_preserves_order_of_rest() {
        let mut state = sample_state();
        for id in ["c1", "c2", "c3", "c4"] {
            let client = sample_client(id, "Ann");
            state.clients.insert(client.id.clone(), client);
        }

        state.remove_client(&ClientId::new("c2"));

        let order: Vec<&str> =
            state.clients.keys().map(ClientId::as_str).collect();
        assert_eq!(order, vec!["c1", "c3", "c4"]);
    }

    #[test]
    fn test_is_soft_disconnected() {
        let mut client = sample_client("c1", "Ann");
        assert!(!client.is_soft_disconnected());
        client.disconnected_at = 1_700_000_005_000;
        assert!(client.is_soft_disconnected());
    }
}

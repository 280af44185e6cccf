//! Core protocol types for Roomcast's wire format.
//!
//! Everything here either travels on the wire or names something that does:
//! identifier newtypes, the message-kind tags, the close codes, and the
//! `[messageType, payload?]` envelope that wraps every frame in both
//! directions.

use std::fmt;

use serde::de::{self, IgnoredAny, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Generates a random lowercase-hex string of the given character length.
fn random_hex(chars: usize) -> String {
    use rand::RngCore;

    let mut bytes = vec![0u8; chars.div_ceil(2)];
    rand::rng().fill_bytes(&mut bytes);

    let mut out: String =
        bytes.iter().map(|b| format!("{b:02x}")).collect();
    out.truncate(chars);
    out
}

/// A unique identifier for a session (one room).
///
/// This is a "newtype wrapper" around the string that appears on the wire.
/// `#[serde(transparent)]` makes a `SessionId("a1b2c3")` serialize as just
/// `"a1b2c3"`, which is what clients expect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wraps an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random id (6 hex chars).
    ///
    /// Uniqueness is NOT guaranteed here — the directory collision-checks
    /// against its live sessions and retries.
    pub fn random() -> Self {
        Self(random_hex(6))
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unique identifier for a client within one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wraps an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random id (6 hex chars). Collision-checked by the
    /// room against its current roster.
    pub fn random() -> Self {
        Self(random_hex(6))
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A short-lived credential that authenticates one persistent connection.
///
/// Issued over HTTP before the socket is opened, redeemed exactly once when
/// the socket connects, and afterwards used purely as a lookup key — the
/// roster entry keeps it as a back-reference, never as an ownership
/// relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionToken(String);

impl ConnectionToken {
    /// Wraps an existing token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Generates a fresh random token (32 hex chars, 128 bits).
    pub fn random() -> Self {
        Self(random_hex(32))
    }

    /// The raw token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The short human-typeable code used to join a session without knowing
/// its internal id. Always a 6-digit numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessCode(String);

impl AccessCode {
    /// Wraps an existing code string.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Generates a random code in `100000..=999999`.
    ///
    /// Uniqueness against live sessions is the directory's job.
    pub fn random() -> Self {
        use rand::Rng;

        let n: u32 = rand::rng().random_range(100_000..=999_999);
        Self(n.to_string())
    }

    /// The raw code string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccessCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Message kinds
// ---------------------------------------------------------------------------

/// The tag that opens every wire envelope.
///
/// Tags are kebab-case strings on the wire (`"full-state-update"`). An
/// unrecognized tag decodes to [`MessageKind::Unknown`] instead of failing,
/// so a newer client talking to an older server degrades to ignored
/// messages rather than dropped connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Server → client liveness probe, carries a correlation id.
    Ping,
    /// Client → server reply to a ping.
    Pong,
    /// Client → server: leave the session (same path as a disconnect).
    Leave,
    /// Client → server: the client's current clock reading.
    CurrentTime,
    /// Server → client: please report your current clock reading.
    RequestCurrentTime,
    /// Server → client: the entire session document.
    FullStateUpdate,
    /// Server → client: patch ops against the last-sent document.
    DeltaStateUpdate,
    /// Client → server: an input command, forwarded opaquely to game logic.
    ControllerCommand,
    /// Any tag this build does not recognize. Never sent.
    Unknown,
}

impl MessageKind {
    /// The wire tag for this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Leave => "leave",
            Self::CurrentTime => "current-time",
            Self::RequestCurrentTime => "request-current-time",
            Self::FullStateUpdate => "full-state-update",
            Self::DeltaStateUpdate => "delta-state-update",
            Self::ControllerCommand => "controller-command",
            Self::Unknown => "unknown",
        }
    }

    /// Parses a wire tag. Unrecognized tags map to [`Self::Unknown`].
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "leave" => Self::Leave,
            "current-time" => Self::CurrentTime,
            "request-current-time" => Self::RequestCurrentTime,
            "full-state-update" => Self::FullStateUpdate,
            "delta-state-update" => Self::DeltaStateUpdate,
            "controller-command" => Self::ControllerCommand,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageKind {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from_tag(&tag))
    }
}

// ---------------------------------------------------------------------------
// Close codes
// ---------------------------------------------------------------------------

/// Application close codes sent when the server shuts a connection.
///
/// Values sit in the 4000+ range reserved for application use by the
/// WebSocket protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Generic termination (explicit dispose, server shutdown).
    Terminated,
    /// The host left, so the whole session was torn down.
    HostDisconnected,
}

impl CloseCode {
    /// The numeric close code on the wire.
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Terminated => 4000,
            Self::HostDisconnected => 4001,
        }
    }

    /// The default human-readable close reason.
    pub const fn default_reason(self) -> &'static str {
        match self {
            Self::Terminated => "Session terminated",
            Self::HostDisconnected => "Session host client disconnected",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

/// Payload of a [`MessageKind::Ping`]: a correlation id for the ping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPayload {
    /// Random id echoed back by well-behaved clients.
    pub id: String,
}

impl PingPayload {
    /// A payload with a fresh random correlation id (4 hex chars).
    pub fn random() -> Self {
        Self {
            id: random_hex(4),
        }
    }
}

/// Payload of a [`MessageKind::CurrentTime`]: the client's clock reading
/// in unix milliseconds, used to derive a server/client time offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTimePayload {
    pub current_time: u64,
}

// ---------------------------------------------------------------------------
// Envelope — the top-level wire format
// ---------------------------------------------------------------------------

/// The top-level message wrapper: a tagged pair.
///
/// On the wire this is a JSON array of one or two elements:
///
/// ```text
/// ["ping", {"id": "3f9a"}]
/// ["leave"]
/// ```
///
/// The payload slot is an untyped [`Value`] at this level; the typed shapes
/// ([`PingPayload`], patch-op lists, the session document) are decoded from
/// it per-kind via [`Envelope::payload_as`].
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Which message this is.
    pub kind: MessageKind,
    /// The message content, absent for payload-less kinds like `leave`.
    pub payload: Option<Value>,
}

impl Envelope {
    /// An envelope with no payload.
    pub fn bare(kind: MessageKind) -> Self {
        Self {
            kind,
            payload: None,
        }
    }

    /// An envelope with a serialized payload.
    pub fn new<T: Serialize>(
        kind: MessageKind,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        let payload =
            serde_json::to_value(payload).map_err(ProtocolError::Encode)?;
        Ok(Self {
            kind,
            payload: Some(payload),
        })
    }

    /// Decodes the payload as a specific type.
    ///
    /// # Errors
    /// [`ProtocolError::InvalidMessage`] if the payload is absent,
    /// [`ProtocolError::Decode`] if it has the wrong shape.
    pub fn payload_as<T: serde::de::DeserializeOwned>(
        &self,
    ) -> Result<T, ProtocolError> {
        let payload = self.payload.clone().ok_or_else(|| {
            ProtocolError::InvalidMessage(format!(
                "{} message is missing its payload",
                self.kind
            ))
        })?;
        serde_json::from_value(payload).map_err(ProtocolError::Decode)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let len = if self.payload.is_some() { 2 } else { 1 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.kind)?;
        if let Some(payload) = &self.payload {
            seq.serialize_element(payload)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        struct EnvelopeVisitor;

        impl<'de> Visitor<'de> for EnvelopeVisitor {
            type Value = Envelope;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a [messageType, payload?] array")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Envelope, A::Error> {
                let kind: MessageKind = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let payload: Option<Value> = seq.next_element()?;

                // Tolerate (and drop) trailing elements from future
                // protocol revisions.
                while seq.next_element::<IgnoredAny>()?.is_some() {}

                Ok(Envelope { kind, payload })
            }
        }

        deserializer.deserialize_seq(EnvelopeVisitor)
    }
}

// =========================================================================
// Tests
// =========================================================================

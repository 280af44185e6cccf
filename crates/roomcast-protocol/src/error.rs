//! Error types for the protocol layer.
//!
//! Each crate in Roomcast defines its own error enum, so a `ProtocolError`
//! always means the problem is in serialization, deserialization, or
//! patching — not in networking or room management.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, missing required fields, wrong data
    /// types, or truncated messages.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message is structurally valid but violates a protocol rule —
    /// e.g., an envelope whose payload is missing for a kind that
    /// requires one.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A delta update could not be applied to the held document.
    ///
    /// A client that hits this has lost sync with the server and must
    /// wait for the next full snapshot.
    #[error("patch failed: {0}")]
    Patch(String),
}

//! Codec trait and the JSON implementation.
//!
//! A codec converts between Rust types and the raw bytes that go into a
//! socket frame. The rest of the stack only talks to the [`Codec`] trait,
//! so a binary codec can be swapped in later without touching the session
//! or room layers.

use serde::{de::DeserializeOwned, Serialize};

use crate::{Envelope, ProtocolError};

/// Encodes Rust types to frame bytes and decodes them back.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into frame bytes.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Encode`] if serialization fails.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes frame bytes back into a value.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Decode`] if the bytes are malformed or
    /// don't match the expected shape.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;

    /// Convenience: decodes an [`Envelope`] from frame bytes.
    fn decode_envelope(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        self.decode(data)
    }
}

/// A [`Codec`] that speaks JSON via `serde_json`.
///
/// Human-readable frames: inspectable in browser DevTools and in logs,
/// and directly consumable by JavaScript clients.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use crate::{MessageKind, PingPayload};

    use super::*;

    #[test]
    fn test_json_codec_envelope_round_trip() {
        let codec = JsonCodec;
        let env = Envelope::new(
            MessageKind::Ping,
            &PingPayload { id: "ab12".into() },
        )
        .unwrap();

        let bytes = codec.encode(&env).unwrap();
        let decoded = codec.decode_envelope(&bytes).unwrap();
        assert_eq!(env, decoded);
    }

    #[test]
    fn test_json_codec_decode_garbage_is_error() {
        let codec = JsonCodec;
        let result = codec.decode_envelope(b"not json at all");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}

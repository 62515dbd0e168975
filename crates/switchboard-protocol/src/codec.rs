//! Codec for encoding and decoding delivery envelopes.
//!
//! Two wire formats are supported: JSON (sent as text frames) and
//! MessagePack (sent as binary frames). Both carry the same
//! `{"data": envelope}` structure.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::envelope::{Envelope, WireOwned, WireRef};

/// Maximum encoded envelope size (16 MiB).
pub const MAX_ENVELOPE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Encoded envelope exceeds maximum size.
    #[error("Envelope size {0} exceeds maximum {MAX_ENVELOPE_SIZE}")]
    EnvelopeTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Wire format used for envelopes pushed to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WireFormat {
    /// UTF-8 JSON, delivered in text frames.
    #[default]
    #[serde(rename = "json")]
    Json,
    /// MessagePack with named fields, delivered in binary frames.
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl WireFormat {
    /// Whether payloads in this format are valid UTF-8 text.
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, WireFormat::Json)
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Json => f.write_str("json"),
            WireFormat::MessagePack => f.write_str("msgpack"),
        }
    }
}

/// Encode an envelope to bytes.
///
/// # Errors
///
/// Returns an error if serialization fails or the result is too large.
pub fn encode(envelope: &Envelope, format: WireFormat) -> Result<Bytes, ProtocolError> {
    let wire = WireRef { data: envelope };
    let payload = match format {
        WireFormat::Json => serde_json::to_vec(&wire)?,
        WireFormat::MessagePack => rmp_serde::to_vec_named(&wire)?,
    };

    if payload.len() > MAX_ENVELOPE_SIZE {
        return Err(ProtocolError::EnvelopeTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode an envelope from bytes.
///
/// # Errors
///
/// Returns an error if the data is too large or not a valid envelope.
pub fn decode(data: &[u8], format: WireFormat) -> Result<Envelope, ProtocolError> {
    if data.len() > MAX_ENVELOPE_SIZE {
        return Err(ProtocolError::EnvelopeTooLarge(data.len()));
    }

    let wire: WireOwned = match format {
        WireFormat::Json => serde_json::from_slice(data)?,
        WireFormat::MessagePack => rmp_serde::from_slice(data)?,
    };

    Ok(wire.data)
}

/// Codec bound to a single wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeCodec {
    format: WireFormat,
}

impl EnvelopeCodec {
    /// Create a codec for the given format.
    #[must_use]
    pub fn new(format: WireFormat) -> Self {
        Self { format }
    }

    /// The wire format this codec produces.
    #[must_use]
    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Encode an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, envelope: &Envelope) -> Result<Bytes, ProtocolError> {
        encode(envelope, self.format)
    }

    /// Decode an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode(&self, data: &[u8]) -> Result<Envelope, ProtocolError> {
        decode(data, self.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Envelope {
        Envelope::private(json!({
            "id": 11,
            "from": 3,
            "to": 7,
            "content": "hello",
            "sender": {"id": 3, "username": "ada", "avatar": ""}
        }))
    }

    #[test]
    fn test_json_is_wrapped_in_data() {
        let encoded = encode(&sample(), WireFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(value["data"]["type"], "private");
        assert_eq!(value["data"]["message"]["content"], "hello");
    }

    #[test]
    fn test_msgpack_decodes_back() {
        let codec = EnvelopeCodec::new(WireFormat::MessagePack);
        let encoded = codec.encode(&sample()).unwrap();

        // fixmap with the single `data` key
        assert_eq!(encoded[0], 0x81);
        assert_eq!(codec.decode(&encoded).unwrap(), sample());
    }

    #[test]
    fn test_decode_without_wrapper_fails() {
        let bare = serde_json::to_vec(&sample()).unwrap();
        assert!(matches!(
            decode(&bare, WireFormat::Json),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_envelope_too_large() {
        let huge = Envelope::private(json!({ "content": "x".repeat(MAX_ENVELOPE_SIZE) }));

        match encode(&huge, WireFormat::Json) {
            Err(ProtocolError::EnvelopeTooLarge(_)) => {}
            other => panic!("Expected EnvelopeTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_wire_format_names() {
        assert_eq!(WireFormat::default(), WireFormat::Json);
        assert!(WireFormat::Json.is_text());
        assert!(!WireFormat::MessagePack.is_text());
        assert_eq!(WireFormat::MessagePack.to_string(), "msgpack");
    }
}

//! Serialization boundary for the engine's wire records.
//!
//! The identity of the encoding is irrelevant to the discovery protocol;
//! the engine is generic over a [`Codec`] capability and only requires
//! that decoding inverts encoding. [`JsonCodec`] is the shipped default.
//!
//! User payloads (joining data, common data, custom messages) never pass
//! through the codec; they are opaque bytes end-to-end. The codec covers
//! only records this engine writes and reads itself: the event log, the
//! per-node acknowledgement record, and the joined-data snapshot.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Serialization failure on an internal record.
///
/// Internal records are only ever written by this engine, so a decode
/// failure indicates corruption or a version mismatch and is treated as
/// fatal by the engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Failed to decode a buffer.
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Byte encoder/decoder for the engine's own records.
pub trait Codec: Send + Sync + 'static {
    /// Encode a value to bytes.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError>;

    /// Decode a value from bytes.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

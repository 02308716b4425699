//! Raw codec - pass-through for binary data.
//!
//! Used when the payload is already serialized, e.g. image tiles or buffers
//! produced by an external serializer. Zero-copy where possible.

use bytes::Bytes;

/// Codec that passes bytes through without transformation.
pub struct RawCodec;

impl RawCodec {
    /// Serialize raw bytes (copies data into `Bytes`).
    ///
    /// For zero-copy, use `serialize_bytes` with an existing `Bytes` value.
    #[inline]
    pub fn serialize(data: &[u8]) -> Bytes {
        Bytes::copy_from_slice(data)
    }

    /// Serialize `Bytes` (zero-copy, just returns the input).
    #[inline]
    pub fn serialize_bytes(data: Bytes) -> Bytes {
        data
    }

    /// Deserialize - returns a reference to the input (zero-copy).
    #[inline]
    pub fn deserialize(data: &[u8]) -> &[u8] {
        data
    }
}

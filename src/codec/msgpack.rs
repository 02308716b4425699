//! MessagePack codec using `rmp-serde`.
//!
//! Uses `to_vec_named` so structs serialize as maps with field names rather
//! than positional arrays: the render server decodes payloads without this
//! crate's struct layouts, so the field names must travel with the data.

use crate::error::Result;

/// MessagePack codec for structured domain values.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MessagePack bytes (struct-as-map format).
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MessagePack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be deserialized to type `T`.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

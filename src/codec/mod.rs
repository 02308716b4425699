//! Codec module - the serializer boundary for payload bytes.
//!
//! Envelopes carry opaque bytes; these codecs convert domain values to and
//! from them at the facade edge:
//!
//! - [`RawCodec`] - pass-through for already-serialized buffers (zero-copy)
//! - [`MsgPackCodec`] - MessagePack via `rmp-serde` for structured values
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the choice is made at compile time and the raw path stays zero-copy.
//!
//! # Example
//!
//! ```
//! use renderlink::codec::{MsgPackCodec, RawCodec};
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let raw = RawCodec::serialize(b"opaque buffer");
//! assert_eq!(RawCodec::deserialize(&raw), b"opaque buffer");
//! ```

mod msgpack;
mod raw;

pub use msgpack::MsgPackCodec;
pub use raw::RawCodec;

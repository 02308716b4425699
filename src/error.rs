//! Error types for renderlink.

use thiserror::Error;

/// Main error type for all renderlink operations.
#[derive(Debug, Error)]
pub enum RenderlinkError {
    /// I/O error during transport operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MessagePack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (invalid control frame, bad part framing, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server did not complete the handshake acceptably.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Connection closed by the peer.
    #[error("Connection closed")]
    ConnectionClosed,

    /// An I/O deadline elapsed.
    #[error("I/O deadline elapsed")]
    Timeout,

    /// The operation was interrupted by a client stop order.
    #[error("Client is stopping")]
    Stopped,

    /// The transport is not connected.
    #[error("Transport not connected")]
    NotConnected,
}

/// Result type alias using RenderlinkError.
pub type Result<T> = std::result::Result<T, RenderlinkError>;

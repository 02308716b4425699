//! Transport module - the dealer-style duplex transport seam.
//!
//! The worker talks to the render server through the [`Transport`] trait: a
//! duplex, message-oriented socket that
//! - carries multi-part logical messages (a "more follows" flag on send, a
//!   "more pending" inspection on receive),
//! - routes by an 8-byte identity supplied at connect time,
//! - reports read/write readiness through a bounded, non-blocking poll,
//! - closes without waiting for undelivered data.
//!
//! I/O deadlines are applied by the caller; implementations only promise
//! that `poll` returns within its budget. [`TcpTransport`] is the provided
//! implementation; tests use a scripted mock.

mod tcp;

#[cfg(test)]
pub(crate) mod mock;

pub use tcp::{TcpTransport, MAX_PART_SIZE, PART_HEADER_SIZE};

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// One part of a multi-part logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePart {
    /// The part's bytes (may be empty).
    pub bytes: Bytes,
    /// Whether another part of the same logical message follows.
    pub more: bool,
}

impl FramePart {
    /// Create a part.
    pub fn new(bytes: Bytes, more: bool) -> Self {
        Self { bytes, more }
    }
}

/// Result of a transport poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    /// A part can be received without blocking indefinitely.
    pub readable: bool,
    /// A part can likely be sent without blocking indefinitely.
    pub writable: bool,
}

/// Duplex dealer-style transport contract.
#[async_trait]
pub trait Transport: Send {
    /// Allocate socket resources. Called once by the worker before the
    /// client constructor returns; failure is an init failure.
    async fn open(&mut self) -> Result<()>;

    /// Connect to `addr` with the given routing identity.
    async fn connect(&mut self, addr: &str, identity: u64) -> Result<()>;

    /// Report read/write readiness, waiting at most `budget`.
    ///
    /// Elapsing the budget with nothing ready is not an error; it yields a
    /// default (all-false) readiness.
    async fn poll(&mut self, budget: Duration) -> Result<Readiness>;

    /// Send one part; `more` marks that another part of the same logical
    /// message follows.
    async fn send_part(&mut self, bytes: Bytes, more: bool) -> Result<()>;

    /// Receive the next part.
    async fn recv_part(&mut self) -> Result<FramePart>;

    /// Whether a further complete part is already available without
    /// touching the wire.
    fn more_pending(&self) -> bool;

    /// Close the connection without waiting for undelivered data.
    /// Errors are ignorable.
    async fn close(&mut self) -> Result<()>;
}

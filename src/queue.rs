//! Outbound message queue.
//!
//! Producers enqueue [`Envelope`]s from arbitrary threads; the worker drains
//! them onto the wire during serve iterations and, optionally, during the
//! exit flush. The queue is an unbounded FIFO behind a single mutex: pushes
//! never block on I/O and insertion order is delivery order per producer.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;

/// An owned payload buffer waiting to be sent.
///
/// Envelopes carry application data only; control frames are synthesized by
/// the worker at send time. Ownership moves from the producer into the queue
/// and from the queue onto the wire.
#[derive(Debug, Clone)]
pub struct Envelope {
    payload: Bytes,
}

impl Envelope {
    /// Wrap an owned payload.
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Copy a byte slice into a new envelope.
    pub fn copy_from(data: &[u8]) -> Self {
        Self {
            payload: Bytes::copy_from_slice(data),
        }
    }

    /// Borrow the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Take the payload out of the envelope (cheap, zero-copy).
    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl From<Bytes> for Envelope {
    fn from(payload: Bytes) -> Self {
        Self::new(payload)
    }
}

impl From<Vec<u8>> for Envelope {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(Bytes::from(payload))
    }
}

impl From<&[u8]> for Envelope {
    fn from(data: &[u8]) -> Self {
        Self::copy_from(data)
    }
}

/// Thread-safe FIFO of ready-to-send envelopes.
///
/// Unbounded: producers are never blocked and nothing is dropped. `len` and
/// `is_empty` are advisory; the answer may be stale by the time the caller
/// acts on it.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    inner: Mutex<VecDeque<Envelope>>,
}

impl OutboundQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an envelope.
    pub fn push(&self, envelope: Envelope) {
        self.lock().push_back(envelope);
    }

    /// Remove and return the oldest envelope.
    pub fn pop_front(&self) -> Option<Envelope> {
        self.lock().pop_front()
    }

    /// Peek at the oldest envelope without removing it.
    pub fn front(&self) -> Option<Envelope> {
        self.lock().front().cloned()
    }

    /// Current queue length (advisory).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty (advisory).
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Take every pending envelope in one step, leaving the queue empty.
    ///
    /// Used by the exit flush so the whole backlog is captured under one
    /// lock acquisition and later pushes cannot interleave with it.
    pub fn take_all(&self) -> VecDeque<Envelope> {
        std::mem::take(&mut *self.lock())
    }

    /// Discard every pending envelope.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Envelope>> {
        // No code path panics while holding the lock, so poisoning cannot
        // occur in practice; recover with the inner value if it ever does.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

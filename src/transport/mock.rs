//! Scripted transport double for state-machine tests.
//!
//! The mock feeds the worker from a scripted inbound queue and records every
//! part the worker sends. Readiness, send failures, and connect/open
//! failures are all controllable from the test through a [`MockHandle`]
//! that shares state with the transport half.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{RenderlinkError, Result};
use crate::protocol::{ClientRole, ControlCode, ControlFrame};

use super::{FramePart, Readiness, Transport};

#[derive(Default)]
struct MockState {
    inbound: Mutex<VecDeque<FramePart>>,
    outbound: Mutex<Vec<FramePart>>,
    connected: Mutex<Option<(String, u64)>>,
    writable: AtomicBool,
    fail_sends: AtomicBool,
    block_sends: AtomicBool,
    fail_open: AtomicBool,
    fail_connect: AtomicBool,
    closed: AtomicBool,
}

/// The transport half handed to the worker.
pub(crate) struct MockTransport {
    state: Arc<MockState>,
}

/// The controller half kept by the test.
#[derive(Clone)]
pub(crate) struct MockHandle {
    state: Arc<MockState>,
}

/// Create a connected mock transport / handle pair.
///
/// Starts writable with sends succeeding.
pub(crate) fn mock_pair() -> (MockTransport, MockHandle) {
    let state = Arc::new(MockState {
        writable: AtomicBool::new(true),
        ..MockState::default()
    });
    (
        MockTransport {
            state: state.clone(),
        },
        MockHandle { state },
    )
}

impl MockHandle {
    /// Script one raw inbound part.
    pub fn push_part(&self, bytes: Bytes, more: bool) {
        self.state
            .inbound
            .lock()
            .unwrap()
            .push_back(FramePart::new(bytes, more));
    }

    /// Script one inbound wire record (control part + payload part).
    pub fn push_record(&self, frame: ControlFrame, payload: &[u8]) {
        self.push_part(Bytes::copy_from_slice(&frame.encode()), true);
        self.push_part(Bytes::copy_from_slice(payload), false);
    }

    /// Script the server's handshake acknowledgement for `role`.
    pub fn push_handshake_ack(&self, role: ClientRole) {
        self.push_record(ControlFrame::new(role, role.create_code()), b"");
    }

    /// Everything the worker has sent so far, as raw parts.
    pub fn sent_parts(&self) -> Vec<FramePart> {
        self.state.outbound.lock().unwrap().clone()
    }

    /// Everything the worker has sent so far, paired into wire records.
    ///
    /// A trailing half-sent record is ignored so the test can poll while
    /// the worker is mid-send. Panics if a complete pair is malformed.
    pub fn sent_records(&self) -> Vec<(ControlFrame, Bytes)> {
        let parts = self.sent_parts();
        parts
            .chunks_exact(2)
            .map(|pair| {
                assert!(pair[0].more, "control part must flag more-follows");
                assert!(!pair[1].more, "payload part must be terminal");
                let frame = ControlFrame::decode(&pair[0].bytes).expect("invalid control part");
                (frame, pair[1].bytes.clone())
            })
            .collect()
    }

    /// Control codes of all sent records, in order.
    pub fn sent_codes(&self) -> Vec<ControlCode> {
        self.sent_records()
            .into_iter()
            .map(|(frame, _)| frame.code)
            .collect()
    }

    /// Make the transport report (or stop reporting) write readiness.
    pub fn set_writable(&self, writable: bool) {
        self.state.writable.store(writable, Ordering::SeqCst);
    }

    /// Make every subsequent send fail.
    pub fn fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent send stall until unblocked (the caller's
    /// deadline decides the outcome).
    pub fn block_sends(&self, block: bool) {
        self.state.block_sends.store(block, Ordering::SeqCst);
    }

    /// Make `open` fail.
    pub fn fail_open(&self) {
        self.state.fail_open.store(true, Ordering::SeqCst);
    }

    /// Make `connect` fail.
    pub fn fail_connect(&self) {
        self.state.fail_connect.store(true, Ordering::SeqCst);
    }

    /// The address and identity the worker connected with, if any.
    pub fn connected_to(&self) -> Option<(String, u64)> {
        self.state.connected.lock().unwrap().clone()
    }

    /// Whether the worker has consumed every scripted inbound part.
    ///
    /// After scripting only the handshake acknowledgement, this is the
    /// test's signal that the worker has passed the handshake.
    pub fn inbound_consumed(&self) -> bool {
        self.state.inbound.lock().unwrap().is_empty()
    }

    /// Whether the worker has closed the transport.
    pub fn closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&mut self) -> Result<()> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(RenderlinkError::Io(std::io::Error::other(
                "scripted open failure",
            )));
        }
        Ok(())
    }

    async fn connect(&mut self, addr: &str, identity: u64) -> Result<()> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(RenderlinkError::Io(std::io::Error::other(
                "scripted connect failure",
            )));
        }
        *self.state.connected.lock().unwrap() = Some((addr.to_string(), identity));
        Ok(())
    }

    async fn poll(&mut self, budget: Duration) -> Result<Readiness> {
        let readiness = Readiness {
            readable: !self.state.inbound.lock().unwrap().is_empty(),
            writable: self.state.writable.load(Ordering::SeqCst),
        };
        if !readiness.readable && !readiness.writable {
            tokio::time::sleep(budget).await;
            return Ok(Readiness {
                readable: !self.state.inbound.lock().unwrap().is_empty(),
                writable: self.state.writable.load(Ordering::SeqCst),
            });
        }
        Ok(readiness)
    }

    async fn send_part(&mut self, bytes: Bytes, more: bool) -> Result<()> {
        while self.state.block_sends.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        if self.state.fail_sends.load(Ordering::SeqCst) {
            return Err(RenderlinkError::Io(std::io::Error::other(
                "scripted send failure",
            )));
        }
        self.state
            .outbound
            .lock()
            .unwrap()
            .push(FramePart::new(bytes, more));
        Ok(())
    }

    async fn recv_part(&mut self) -> Result<FramePart> {
        loop {
            if let Some(part) = self.state.inbound.lock().unwrap().pop_front() {
                return Ok(part);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn more_pending(&self) -> bool {
        !self.state.inbound.lock().unwrap().is_empty()
    }

    async fn close(&mut self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

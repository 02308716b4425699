//! TCP implementation of the dealer-style transport.
//!
//! Each part is framed on the stream as:
//!
//! ```text
//! ┌─────────┬───────────┬──────────┐
//! │ Flags   │ Length    │ Body     │
//! │ 1 byte  │ 4 bytes   │ N bytes  │
//! │         │ uint32 BE │          │
//! └─────────┴───────────┴──────────┘
//! ```
//!
//! Flag bit 0 marks "more parts follow" within the same logical message.
//! Immediately after the TCP connect the client writes its 8-byte
//! little-endian routing identity; the server reads it before any framed
//! traffic. The socket runs with `TCP_NODELAY`; close never waits for
//! undelivered data (plain TCP close, no lingering).
//!
//! A part send abandoned mid-write leaves the stream torn; the transport
//! remembers that and fails every later send instead of interleaving
//! half-written parts.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest};
use tokio::net::TcpStream;

use crate::error::{RenderlinkError, Result};

use super::{FramePart, Readiness, Transport};

/// Part header size in bytes: 1 flag byte + 4 length bytes.
pub const PART_HEADER_SIZE: usize = 5;

/// Maximum accepted part body (1 GB); larger lengths are protocol errors.
pub const MAX_PART_SIZE: usize = 1_073_741_824;

/// Flag bit: another part of the same logical message follows.
const FLAG_MORE: u8 = 0b0000_0001;

fn encode_part_header(len: usize, more: bool) -> [u8; PART_HEADER_SIZE] {
    let mut header = [0u8; PART_HEADER_SIZE];
    header[0] = if more { FLAG_MORE } else { 0 };
    header[1..5].copy_from_slice(&(len as u32).to_be_bytes());
    header
}

/// TCP dealer-style transport.
pub struct TcpTransport {
    stream: Option<TcpStream>,
    rx: BytesMut,
    /// A send was abandoned between its first and last byte; the stream
    /// framing can no longer be trusted.
    send_torn: bool,
}

impl TcpTransport {
    /// Create an unconnected transport.
    pub fn new() -> Self {
        Self {
            stream: None,
            rx: BytesMut::with_capacity(64 * 1024),
            send_torn: false,
        }
    }

    /// Wrap an already-established stream.
    ///
    /// Used on the accepting side (test servers, tooling); no identity
    /// preamble is written.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream: Some(stream),
            rx: BytesMut::with_capacity(64 * 1024),
            send_torn: false,
        }
    }

    /// Inspect the read buffer for a complete part.
    ///
    /// Returns `(body_len, more)` when one is fully buffered, `None` when
    /// more bytes are needed.
    fn buffered_part(&self) -> Result<Option<(usize, bool)>> {
        if self.rx.len() < PART_HEADER_SIZE {
            return Ok(None);
        }
        let more = self.rx[0] & FLAG_MORE != 0;
        let len =
            u32::from_be_bytes([self.rx[1], self.rx[2], self.rx[3], self.rx[4]]) as usize;
        if len > MAX_PART_SIZE {
            return Err(RenderlinkError::Protocol(format!(
                "part length {} exceeds maximum {}",
                len, MAX_PART_SIZE
            )));
        }
        if self.rx.len() < PART_HEADER_SIZE + len {
            return Ok(None);
        }
        Ok(Some((len, more)))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&mut self) -> Result<()> {
        // TCP allocates its socket at connect time; nothing to stage here.
        Ok(())
    }

    async fn connect(&mut self, addr: &str, identity: u64) -> Result<()> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        stream.write_all(&identity.to_le_bytes()).await?;
        stream.flush().await?;
        self.rx.clear();
        self.send_torn = false;
        self.stream = Some(stream);
        Ok(())
    }

    async fn poll(&mut self, budget: Duration) -> Result<Readiness> {
        let has_buffered = self.buffered_part()?.is_some();
        let stream = self.stream.as_ref().ok_or(RenderlinkError::NotConnected)?;

        let interest = Interest::READABLE | Interest::WRITABLE;
        match tokio::time::timeout(budget, stream.ready(interest)).await {
            Ok(ready) => {
                let ready = ready?;
                Ok(Readiness {
                    readable: ready.is_readable() || has_buffered,
                    writable: ready.is_writable(),
                })
            }
            Err(_) => Ok(Readiness {
                readable: has_buffered,
                writable: false,
            }),
        }
    }

    async fn send_part(&mut self, bytes: Bytes, more: bool) -> Result<()> {
        if self.send_torn {
            return Err(RenderlinkError::Protocol(
                "a previous send was abandoned mid-part; stream is torn".into(),
            ));
        }
        if bytes.len() > MAX_PART_SIZE {
            return Err(RenderlinkError::Protocol(format!(
                "part length {} exceeds maximum {}",
                bytes.len(),
                MAX_PART_SIZE
            )));
        }
        let stream = self.stream.as_mut().ok_or(RenderlinkError::NotConnected)?;

        // Torn until every byte of the part is on its way; an abandoned
        // await below leaves the flag set.
        self.send_torn = true;
        let header = encode_part_header(bytes.len(), more);
        stream.write_all(&header).await?;
        if !bytes.is_empty() {
            stream.write_all(&bytes).await?;
        }
        if !more {
            stream.flush().await?;
        }
        self.send_torn = false;
        Ok(())
    }

    async fn recv_part(&mut self) -> Result<FramePart> {
        loop {
            if let Some((len, more)) = self.buffered_part()? {
                let mut part = self.rx.split_to(PART_HEADER_SIZE + len);
                part.advance(PART_HEADER_SIZE);
                return Ok(FramePart::new(part.freeze(), more));
            }

            let stream = self.stream.as_mut().ok_or(RenderlinkError::NotConnected)?;
            let n = stream.read_buf(&mut self.rx).await?;
            if n == 0 {
                return Err(RenderlinkError::ConnectionClosed);
            }
        }
    }

    fn more_pending(&self) -> bool {
        matches!(self.buffered_part(), Ok(Some(_)))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.rx.clear();
        Ok(())
    }
}

//! Control-frame encoding and decoding.
//!
//! Every logical message on the channel is a pair of transport parts: a
//! fixed-size control frame followed by an opaque payload part (which may be
//! empty). The control frame is a 12-byte record:
//!
//! ```text
//! ┌───────────┬───────────┬───────────┐
//! │ Version   │ Role      │ Code      │
//! │ 4 bytes   │ 4 bytes   │ 4 bytes   │
//! │ int32 LE  │ int32 LE  │ int32 LE  │
//! └───────────┴───────────┴───────────┘
//! ```
//!
//! All fields are little-endian. A received control frame is valid only if
//! its length is exactly 12 bytes, its version equals [`PROTOCOL_VERSION`],
//! and both the role and the code are known values.

use crate::error::{RenderlinkError, Result};

/// Protocol version both peers must speak exactly.
pub const PROTOCOL_VERSION: i32 = 1013;

/// Control frame size in bytes (fixed, exactly 12).
pub const CONTROL_FRAME_SIZE: usize = 12;

/// The role a client plays on the channel.
///
/// The role is carried in every control frame and is immutable for the
/// lifetime of a client. Servers reply with the same role they were
/// addressed with; a mismatch is a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ClientRole {
    /// Carries application payloads to the render server.
    Exporter = 1,
    /// Liveness probe only; keeps the server alive, never carries data.
    Heartbeat = 2,
}

impl ClientRole {
    /// Decode a wire value. `0` was a reserved "none" value in the
    /// historical protocol and is rejected like any unknown value.
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            1 => Some(ClientRole::Exporter),
            2 => Some(ClientRole::Heartbeat),
            _ => None,
        }
    }

    /// The handshake request opcode for this role.
    #[inline]
    pub fn connect_code(self) -> ControlCode {
        match self {
            ClientRole::Exporter => ControlCode::ExporterConnect,
            ClientRole::Heartbeat => ControlCode::HeartbeatConnect,
        }
    }

    /// The handshake acknowledgement opcode the server must answer with.
    #[inline]
    pub fn create_code(self) -> ControlCode {
        match self {
            ClientRole::Exporter => ControlCode::RendererCreate,
            ClientRole::Heartbeat => ControlCode::HeartbeatCreate,
        }
    }
}

/// Control opcode classifying a wire record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ControlCode {
    /// The payload part carries application data (exporter role only).
    Data = 0,

    /// Client → server handshake request, exporter role.
    ExporterConnect = 1000,
    /// Client → server handshake request, heartbeat role.
    HeartbeatConnect = 1001,

    /// Server → client handshake acknowledgement, exporter role.
    RendererCreate = 2000,
    /// Server → client handshake acknowledgement, heartbeat role.
    HeartbeatCreate = 2001,

    /// Liveness probe; payload part is empty.
    Ping = 3000,
    /// Liveness reply; payload part is empty.
    Pong = 3001,

    /// Client asks the server to terminate its side.
    Stop = 4000,
}

impl ControlCode {
    /// Decode a wire value.
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(ControlCode::Data),
            1000 => Some(ControlCode::ExporterConnect),
            1001 => Some(ControlCode::HeartbeatConnect),
            2000 => Some(ControlCode::RendererCreate),
            2001 => Some(ControlCode::HeartbeatCreate),
            3000 => Some(ControlCode::Ping),
            3001 => Some(ControlCode::Pong),
            4000 => Some(ControlCode::Stop),
            _ => None,
        }
    }

    /// All opcodes, for exhaustive tests.
    pub const ALL: [ControlCode; 8] = [
        ControlCode::Data,
        ControlCode::ExporterConnect,
        ControlCode::HeartbeatConnect,
        ControlCode::RendererCreate,
        ControlCode::HeartbeatCreate,
        ControlCode::Ping,
        ControlCode::Pong,
        ControlCode::Stop,
    ];
}

/// Decoded control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFrame {
    /// Protocol version; always [`PROTOCOL_VERSION`] on frames we build.
    pub version: i32,
    /// Role of the sending client (echoed back by the server).
    pub role: ClientRole,
    /// Opcode classifying the record.
    pub code: ControlCode,
}

impl ControlFrame {
    /// Create a new control frame at the current protocol version.
    pub fn new(role: ClientRole, code: ControlCode) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            role,
            code,
        }
    }

    /// Encode the frame to its 12-byte wire image (little-endian).
    ///
    /// # Example
    ///
    /// ```
    /// use renderlink::protocol::{ClientRole, ControlCode, ControlFrame};
    ///
    /// let frame = ControlFrame::new(ClientRole::Exporter, ControlCode::Data);
    /// assert_eq!(frame.encode().len(), 12);
    /// ```
    pub fn encode(&self) -> [u8; CONTROL_FRAME_SIZE] {
        let mut buf = [0u8; CONTROL_FRAME_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode the frame into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is smaller than [`CONTROL_FRAME_SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= CONTROL_FRAME_SIZE);
        buf[0..4].copy_from_slice(&self.version.to_le_bytes());
        buf[4..8].copy_from_slice(&(self.role as i32).to_le_bytes());
        buf[8..12].copy_from_slice(&(self.code as i32).to_le_bytes());
    }

    /// Decode a received control frame.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the length is not exactly 12 bytes, the
    /// version does not match [`PROTOCOL_VERSION`], or the role or opcode is
    /// unknown. Callers on the steady-state read path log and drop the
    /// record; the handshake treats the same condition as fatal.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != CONTROL_FRAME_SIZE {
            return Err(RenderlinkError::Protocol(format!(
                "control frame is {} bytes, expected {}",
                buf.len(),
                CONTROL_FRAME_SIZE
            )));
        }

        let version = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if version != PROTOCOL_VERSION {
            return Err(RenderlinkError::Protocol(format!(
                "expected protocol version [{}], peer speaks [{}]",
                PROTOCOL_VERSION, version
            )));
        }

        let role_raw = i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let role = ClientRole::from_wire(role_raw).ok_or_else(|| {
            RenderlinkError::Protocol(format!("unknown client role [{}]", role_raw))
        })?;

        let code_raw = i32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let code = ControlCode::from_wire(code_raw).ok_or_else(|| {
            RenderlinkError::Protocol(format!("unknown control code [{}]", code_raw))
        })?;

        Ok(Self {
            version,
            role,
            code,
        })
    }

    /// Check that the frame was addressed to a client of the given role.
    #[inline]
    pub fn matches_role(&self, role: ClientRole) -> bool {
        self.role == role
    }
}

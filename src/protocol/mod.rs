//! Protocol module - control frames and timing.
//!
//! This module defines the channel's wire vocabulary:
//! - the 12-byte little-endian control frame and its role/opcode enums
//! - the timing constants governing pings, liveness, and shutdown

mod timing;
mod wire_format;

pub use timing::{
    Timing, CLIENT_PING_INTERVAL, HANDSHAKE_TIMEOUT, HEARTBEAT_TIMEOUT, IDLE_SLEEP, MAX_BURST,
    POLL_BUDGET, SHUTDOWN_SEND_TIMEOUT, SOCKET_IO_TIMEOUT, WAIT_FOR_MESSAGES_CAP,
};
pub use wire_format::{ClientRole, ControlCode, ControlFrame, CONTROL_FRAME_SIZE, PROTOCOL_VERSION};

//! Protocol timing constants.
//!
//! The channel's liveness behavior is driven by a handful of intervals:
//! ping cadence, the inbound-quiet deadline the heartbeat role enforces, the
//! handshake receive deadline, and the shutdown grace window. The defaults
//! below are the release values; everything is bundled in [`Timing`] so the
//! builder (and the test suite) can compress the schedule without touching
//! the worker.

use std::time::Duration;

/// Outbound ping cadence: at least one ping per this much outbound quiet.
pub const CLIENT_PING_INTERVAL: Duration = Duration::from_millis(1000);

/// Inbound-quiet deadline; only the heartbeat role terminates on it.
/// Also the send deadline for handshake and steady-state records.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(2000);

/// How long to wait for the server's handshake acknowledgement.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Upper bound on a single transport poll; also caps shutdown latency.
pub const POLL_BUDGET: Duration = Duration::from_millis(10);

/// Advisory deadline for a single steady-state receive.
pub const SOCKET_IO_TIMEOUT: Duration = Duration::from_millis(100);

/// Send deadline for the stop record and the exit flush.
pub const SHUTDOWN_SEND_TIMEOUT: Duration = Duration::from_millis(200);

/// Sleep when a serve iteration made no progress.
pub const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Fairness bound on each inbound/outbound burst.
pub const MAX_BURST: usize = 10;

/// Upper clamp on `wait_for_messages` timeouts.
pub const WAIT_FOR_MESSAGES_CAP: Duration = Duration::from_millis(10_000);

/// Timing profile for a client.
///
/// `Default` is the release schedule. Override through
/// [`ClientBuilder::timing`](crate::ClientBuilder::timing) to slow the
/// schedule down for debugging or compress it for tests.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Outbound ping cadence.
    pub ping_interval: Duration,
    /// Inbound-quiet deadline (heartbeat role) and steady-state send deadline.
    pub heartbeat_timeout: Duration,
    /// Handshake receive deadline.
    pub handshake_timeout: Duration,
    /// Single poll budget.
    pub poll_budget: Duration,
    /// Steady-state receive deadline.
    pub io_timeout: Duration,
    /// Shutdown-path send deadline.
    pub shutdown_send_timeout: Duration,
    /// Idle sleep between unproductive serve iterations.
    pub idle_sleep: Duration,
    /// Fairness bound on each read/write burst.
    pub max_burst: usize,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            ping_interval: CLIENT_PING_INTERVAL,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            poll_budget: POLL_BUDGET,
            io_timeout: SOCKET_IO_TIMEOUT,
            shutdown_send_timeout: SHUTDOWN_SEND_TIMEOUT,
            idle_sleep: IDLE_SLEEP,
            max_burst: MAX_BURST,
        }
    }
}

impl Timing {
    /// A uniformly scaled-down schedule, handy in tests.
    pub fn scaled_down(factor: u32) -> Self {
        let base = Self::default();
        Self {
            ping_interval: base.ping_interval / factor,
            heartbeat_timeout: base.heartbeat_timeout / factor,
            handshake_timeout: base.handshake_timeout / factor,
            poll_budget: base.poll_budget,
            io_timeout: base.io_timeout,
            shutdown_send_timeout: base.shutdown_send_timeout,
            idle_sleep: base.idle_sleep,
            max_burst: base.max_burst,
        }
    }
}

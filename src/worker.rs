//! Client worker - the per-client connection state machine.
//!
//! Each client spawns exactly one worker task that owns the transport and
//! runs a cooperative loop:
//!
//! ```text
//! Open ──► WaitForServe ──► Connect ──► Handshake ──► Serve ──► Shutdown
//!   │            │             │            │           │          │
//!   └────────────┴─────────────┴────────────┴───────────┴──► Teardown
//! ```
//!
//! - **Open** stages the transport and signals the constructor.
//! - **WaitForServe** parks on the start-serving latch until `connect` (or a
//!   stop order) releases it, so the routing identity is fixed before any
//!   traffic.
//! - **Serve** muxes, per iteration: a bounded transport poll, an inbound
//!   burst dispatched to the callback, a ping when outbound traffic has been
//!   quiet for a full cadence interval, an outbound burst drained from the
//!   queue, and the heartbeat-role liveness deadline.
//! - **Shutdown** runs only when the loop was ordered out (not on transport
//!   failure) and picks exactly one discipline: stop record, exit flush, or
//!   discard.
//!
//! A stop order flips `is_working` and pings the shared wake notifier, and
//! the loops observe it at their next iteration boundary. Only `sync_stop`
//! (and drop) additionally arm the hard interrupt that breaks in-flight
//! receive waits; `stop_server` never does, so a fire-and-forget stop
//! cannot abandon a handshake midway. Sends only run to their deadline,
//! never cancelled mid-record, so a stop cannot tear a half-written record
//! into the stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{oneshot, Notify};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{RenderlinkError, Result};
use crate::protocol::{ClientRole, ControlCode, ControlFrame, Timing};
use crate::queue::OutboundQueue;
use crate::transport::Transport;

/// Sink for incoming application payloads.
///
/// The slice is valid only for the duration of the call.
pub type MessageCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Pending connect order recorded by the facade for the worker.
pub(crate) struct ConnectRequest {
    pub addr: String,
    pub identity: u64,
}

/// State shared between the facade and the worker task.
pub(crate) struct Shared {
    pub role: ClientRole,
    pub timing: Timing,
    pub queue: OutboundQueue,
    callback: Mutex<Option<MessageCallback>>,
    connect_request: Mutex<Option<ConnectRequest>>,
    is_working: AtomicBool,
    start_serving: AtomicBool,
    error_connect: AtomicBool,
    flush_on_exit: AtomicBool,
    server_stop: AtomicBool,
    /// Armed by `sync_stop` (and drop) only: breaks in-flight receive and
    /// connect waits. `stop_server` leaves it alone so the worker finishes
    /// the wait it is in before noticing the stop.
    interrupt: AtomicBool,
    /// Pinged whenever a flag the worker may be parked on changes.
    pub wake: Notify,
}

impl Shared {
    pub fn new(role: ClientRole, timing: Timing) -> Self {
        Self {
            role,
            timing,
            queue: OutboundQueue::new(),
            callback: Mutex::new(None),
            connect_request: Mutex::new(None),
            is_working: AtomicBool::new(true),
            start_serving: AtomicBool::new(false),
            error_connect: AtomicBool::new(false),
            flush_on_exit: AtomicBool::new(false),
            server_stop: AtomicBool::new(false),
            interrupt: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn is_working(&self) -> bool {
        self.is_working.load(Ordering::SeqCst)
    }

    pub fn set_working(&self, value: bool) {
        self.is_working.store(value, Ordering::SeqCst);
    }

    pub fn start_serving(&self) -> bool {
        self.start_serving.load(Ordering::SeqCst)
    }

    pub fn set_start_serving(&self, value: bool) {
        self.start_serving.store(value, Ordering::SeqCst);
    }

    pub fn error_connect(&self) -> bool {
        self.error_connect.load(Ordering::SeqCst)
    }

    pub fn set_error_connect(&self, value: bool) {
        self.error_connect.store(value, Ordering::SeqCst);
    }

    pub fn flush_on_exit(&self) -> bool {
        self.flush_on_exit.load(Ordering::SeqCst)
    }

    pub fn set_flush_on_exit(&self, value: bool) {
        self.flush_on_exit.store(value, Ordering::SeqCst);
    }

    pub fn server_stop(&self) -> bool {
        self.server_stop.load(Ordering::SeqCst)
    }

    pub fn set_server_stop(&self, value: bool) {
        self.server_stop.store(value, Ordering::SeqCst);
    }

    pub fn interrupt_ordered(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn set_interrupt(&self) {
        self.interrupt.store(true, Ordering::SeqCst);
    }

    pub fn set_callback(&self, callback: Option<MessageCallback>) {
        *self.lock_callback() = callback;
    }

    pub fn set_connect_request(&self, request: ConnectRequest) {
        *self.lock_connect_request() = Some(request);
    }

    fn take_connect_request(&self) -> Option<ConnectRequest> {
        self.lock_connect_request().take()
    }

    /// Deliver an incoming payload to the callback, if one is installed.
    ///
    /// Holds the callback mutex for the duration of the call, so delivery
    /// never races a concurrent `set_callback`.
    fn dispatch(&self, payload: &[u8]) {
        let mut slot = self.lock_callback();
        if let Some(callback) = slot.as_mut() {
            callback(payload);
        }
    }

    /// Resolves once the hard interrupt has been armed.
    async fn interrupted(&self) {
        loop {
            let notified = self.wake.notified();
            if self.interrupt_ordered() {
                return;
            }
            notified.await;
        }
    }

    fn lock_callback(&self) -> std::sync::MutexGuard<'_, Option<MessageCallback>> {
        self.callback.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_connect_request(&self) -> std::sync::MutexGuard<'_, Option<ConnectRequest>> {
        self.connect_request
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// How a session ended.
enum SessionEnd {
    /// Ordered out; the shutdown disciplines still apply.
    Stopped,
    /// Connect, handshake, or transport failure; straight to teardown.
    Aborted,
}

/// How the serve loop ended.
enum ServeEnd {
    Stopped,
    Failed,
}

/// Run `fut` bounded by `deadline`, racing the hard interrupt that
/// `sync_stop` arms (`stop_server` never arms it, so a fire-and-forget
/// stop is only observed at the next loop boundary).
///
/// Only safe for operations that may be abandoned mid-flight: receives
/// (the read buffer stays consistent) and connects. Sends must use
/// [`io_deadline`] instead so a record is never torn between its parts.
async fn bounded<T>(
    shared: &Shared,
    deadline: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = shared.interrupted() => Err(RenderlinkError::Stopped),
        res = timeout(deadline, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(RenderlinkError::Timeout),
        },
    }
}

/// Run `fut` bounded by `deadline`.
async fn io_deadline<T>(
    deadline: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match timeout(deadline, fut).await {
        Ok(inner) => inner,
        Err(_) => Err(RenderlinkError::Timeout),
    }
}

/// Emit one wire record: control part flagged more-follows, then payload.
async fn send_record<T: Transport>(
    transport: &mut T,
    role: ClientRole,
    code: ControlCode,
    payload: Bytes,
) -> Result<()> {
    let control = ControlFrame::new(role, code);
    transport
        .send_part(Bytes::copy_from_slice(&control.encode()), true)
        .await?;
    transport.send_part(payload, false).await?;
    Ok(())
}

/// Receive one wire record as raw (control, payload) bytes.
///
/// Extra parts beyond the payload are drained and dropped so a malformed
/// message cannot desynchronize the stream.
async fn recv_record<T: Transport>(transport: &mut T) -> Result<(Bytes, Bytes)> {
    let control = transport.recv_part().await?;
    if !control.more {
        warn!("wire record missing its payload part");
        return Ok((control.bytes, Bytes::new()));
    }
    let mut payload = transport.recv_part().await?;
    while payload.more {
        warn!("dropping unexpected extra part in wire record");
        payload = transport.recv_part().await?;
    }
    Ok((control.bytes, payload.bytes))
}

/// The worker task: owns the transport, drives the state machine.
pub(crate) struct Worker<T: Transport> {
    transport: T,
    shared: Arc<Shared>,
}

impl<T: Transport> Worker<T> {
    pub fn new(transport: T, shared: Arc<Shared>) -> Self {
        Self { transport, shared }
    }

    /// Entry point for the spawned task.
    ///
    /// `init_tx` reports whether the transport staged successfully; the
    /// constructor blocks on it so `connect` can never observe a client
    /// whose socket does not exist yet.
    pub async fn run(mut self, init_tx: oneshot::Sender<bool>) {
        if let Err(e) = self.transport.open().await {
            error!("transport init failed: {e}");
            self.shared.set_working(false);
            let _ = init_tx.send(false);
            return;
        }
        let _ = init_tx.send(true);

        self.wait_for_serve().await;

        if matches!(self.session().await, SessionEnd::Stopped) {
            self.shutdown().await;
        }
        self.teardown().await;
    }

    /// Park until `connect` or a stop order releases the latch.
    async fn wait_for_serve(&self) {
        loop {
            let notified = self.shared.wake.notified();
            if self.shared.start_serving() {
                return;
            }
            notified.await;
        }
    }

    /// Connect, handshake, serve.
    async fn session(&mut self) -> SessionEnd {
        let shared = Arc::clone(&self.shared);

        if !shared.is_working() || shared.error_connect() {
            return SessionEnd::Aborted;
        }
        let Some(request) = shared.take_connect_request() else {
            // Released without a connect order; nothing to serve.
            return SessionEnd::Aborted;
        };

        debug!(addr = %request.addr, "connecting transport");
        let connect = self
            .transport
            .connect(&request.addr, request.identity);
        match bounded(&shared, shared.timing.heartbeat_timeout, connect).await {
            Ok(()) => {}
            Err(RenderlinkError::Stopped) => return SessionEnd::Aborted,
            Err(e) => {
                error!("transport connect to [{}] failed: {e}", request.addr);
                shared.set_error_connect(true);
                return SessionEnd::Aborted;
            }
        }

        match self.handshake().await {
            Ok(()) => {}
            // Only sync_stop can interrupt the handshake wait; an
            // unfinished handshake is never followed by shutdown records.
            Err(RenderlinkError::Stopped) => return SessionEnd::Aborted,
            Err(e) => {
                error!("handshake failed: {e}");
                return SessionEnd::Aborted;
            }
        }

        info!(role = ?shared.role, "connected to server");

        match self.serve().await {
            ServeEnd::Stopped => SessionEnd::Stopped,
            ServeEnd::Failed => SessionEnd::Aborted,
        }
    }

    /// Exchange the CONNECT/CREATE records and validate the reply.
    async fn handshake(&mut self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        let timing = &shared.timing;

        let request = send_record(
            &mut self.transport,
            shared.role,
            shared.role.connect_code(),
            Bytes::new(),
        );
        io_deadline(timing.heartbeat_timeout, request).await?;

        let reply = recv_record(&mut self.transport);
        let (control, _payload) = bounded(&shared, timing.handshake_timeout, reply)
            .await
            .map_err(|e| match e {
                RenderlinkError::Timeout => RenderlinkError::Handshake(
                    "server did not respond within the handshake deadline".into(),
                ),
                other => other,
            })?;

        let frame = ControlFrame::decode(&control)
            .map_err(|e| RenderlinkError::Handshake(e.to_string()))?;
        if !frame.matches_role(shared.role) {
            return Err(RenderlinkError::Handshake(format!(
                "server created a mismatching worker role [{:?}]",
                frame.role
            )));
        }
        if frame.code != shared.role.create_code() {
            return Err(RenderlinkError::Handshake(format!(
                "server acknowledged with [{:?}] instead of [{:?}]",
                frame.code,
                shared.role.create_code()
            )));
        }
        Ok(())
    }

    /// The main loop: poll, read burst, ping, write burst, liveness, idle.
    async fn serve(&mut self) -> ServeEnd {
        let shared = Arc::clone(&self.shared);
        let timing = shared.timing.clone();

        let mut last_recv = Instant::now();
        // None forces a ping on the first writable iteration.
        let mut last_send: Option<Instant> = None;

        while shared.is_working() {
            let mut did_work = false;

            let readiness = match self.transport.poll(timing.poll_budget).await {
                Ok(readiness) => readiness,
                Err(e) => {
                    error!("transport poll failed: {e}; stopping client");
                    return ServeEnd::Failed;
                }
            };

            if readiness.readable {
                match self.read_burst(&mut last_recv).await {
                    Ok(worked) => did_work |= worked,
                    Err(RenderlinkError::Stopped) => return ServeEnd::Stopped,
                    Err(e) => {
                        error!("transport receive failed: {e}; stopping client");
                        return ServeEnd::Failed;
                    }
                }
            }

            if readiness.writable {
                let ping_due = last_send
                    .map_or(true, |at| at.elapsed() > timing.ping_interval);
                if ping_due {
                    let ping = send_record(
                        &mut self.transport,
                        shared.role,
                        ControlCode::Ping,
                        Bytes::new(),
                    );
                    match io_deadline(timing.heartbeat_timeout, ping).await {
                        Ok(()) => {
                            last_send = Some(Instant::now());
                            did_work = true;
                        }
                        Err(RenderlinkError::Timeout) => {
                            debug!("ping send timed out; will retry");
                        }
                        Err(e) => {
                            error!("transport send failed: {e}; stopping client");
                            return ServeEnd::Failed;
                        }
                    }
                }

                match self.drain_outbound(&mut last_send).await {
                    Ok(worked) => did_work |= worked,
                    Err(e) => {
                        error!("transport send failed: {e}; stopping client");
                        return ServeEnd::Failed;
                    }
                }
            }

            if shared.role == ClientRole::Heartbeat
                && last_recv.elapsed() > timing.heartbeat_timeout
            {
                error!("server unresponsive, stopping client");
                return ServeEnd::Failed;
            }

            if !did_work && shared.is_working() {
                sleep(timing.idle_sleep).await;
            }
        }

        ServeEnd::Stopped
    }

    /// Drain up to a burst of inbound records.
    ///
    /// Invalid records (bad length, bad version, mismatched role) are logged
    /// and dropped without terminating the loop; any validated record
    /// refreshes the liveness timestamp.
    async fn read_burst(&mut self, last_recv: &mut Instant) -> Result<bool> {
        let shared = Arc::clone(&self.shared);
        let timing = &shared.timing;
        let mut did_work = false;

        for _ in 0..timing.max_burst {
            if !shared.is_working() {
                break;
            }

            let record = recv_record(&mut self.transport);
            let (control, payload) = match bounded(&shared, timing.io_timeout, record).await {
                Ok(record) => record,
                Err(RenderlinkError::Timeout) => {
                    debug!("inbound record stalled; yielding");
                    break;
                }
                Err(e) => return Err(e),
            };
            did_work = true;

            match ControlFrame::decode(&control) {
                Err(e) => {
                    warn!("dropping message: {e}");
                }
                Ok(frame) if !frame.matches_role(shared.role) => {
                    warn!(
                        "dropping message addressed to role [{:?}]",
                        frame.role
                    );
                }
                Ok(frame) => {
                    *last_recv = Instant::now();
                    match frame.code {
                        ControlCode::Data => shared.dispatch(&payload),
                        ControlCode::Ping | ControlCode::Pong => {
                            if !payload.is_empty() {
                                warn!("expected empty payload after ping/pong");
                            }
                        }
                        other => {
                            debug!(code = ?other, "ignoring unexpected control code");
                        }
                    }
                }
            }

            if !self.transport.more_pending() {
                break;
            }
        }

        Ok(did_work)
    }

    /// Drain up to a burst of queued envelopes onto the wire.
    ///
    /// An envelope is popped only after its record went out; a stalled send
    /// leaves it at the head for the next iteration.
    async fn drain_outbound(&mut self, last_send: &mut Option<Instant>) -> Result<bool> {
        let shared = Arc::clone(&self.shared);
        let timing = &shared.timing;
        let mut did_work = false;

        for _ in 0..timing.max_burst {
            if !shared.is_working() {
                break;
            }
            let Some(envelope) = shared.queue.front() else {
                break;
            };

            let record = send_record(
                &mut self.transport,
                ClientRole::Exporter,
                ControlCode::Data,
                envelope.into_payload(),
            );
            match io_deadline(timing.heartbeat_timeout, record).await {
                Ok(()) => {
                    shared.queue.pop_front();
                    *last_send = Some(Instant::now());
                    did_work = true;
                }
                Err(RenderlinkError::Timeout) => {
                    debug!("outbound record stalled; yielding");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(did_work)
    }

    /// Apply exactly one shutdown discipline, in priority order.
    async fn shutdown(&mut self) {
        let shared = Arc::clone(&self.shared);
        let deadline = shared.timing.shutdown_send_timeout;

        if shared.server_stop() {
            debug!("emitting stop record");
            let stop = send_record(
                &mut self.transport,
                shared.role,
                ControlCode::Stop,
                Bytes::new(),
            );
            match timeout(deadline, stop).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("failed to send stop record: {e}"),
                Err(_) => warn!("stop record send timed out"),
            }
            shared.set_server_stop(false);
        } else if shared.flush_on_exit() {
            let pending = shared.queue.take_all();
            debug!(count = pending.len(), "flushing outstanding messages");
            for envelope in pending {
                let record = send_record(
                    &mut self.transport,
                    ClientRole::Exporter,
                    ControlCode::Data,
                    envelope.into_payload(),
                );
                match timeout(deadline, record).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!("exit flush aborted: {e}");
                        break;
                    }
                    Err(_) => {
                        warn!("exit flush timed out");
                        break;
                    }
                }
            }
        } else {
            shared.queue.clear();
        }
    }

    /// Close the transport and mark the worker dead.
    async fn teardown(&mut self) {
        if let Err(e) = self.transport.close().await {
            debug!("transport close reported: {e}");
        }
        self.shared.set_working(false);
        debug!("worker stopped");
    }
}

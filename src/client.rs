//! Client facade and builder.
//!
//! [`ClientBuilder`] configures the role, shutdown discipline, callback, and
//! timing, then `build()` spawns the worker task and waits for the transport
//! to stage. The resulting [`Client`] is the thread-safe handle producers
//! use: `send` enqueues without ever touching I/O, `connect` releases the
//! worker, and the stop family controls shutdown.
//!
//! # Example
//!
//! ```ignore
//! use renderlink::{Client, ClientRole};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::builder()
//!         .role(ClientRole::Exporter)
//!         .on_message(|payload| println!("got {} bytes", payload.len()))
//!         .build()
//!         .await;
//!
//!     client.connect("127.0.0.1:5555");
//!     client.send(b"scene update");
//!     client.wait_for_messages(std::time::Duration::from_millis(500)).await;
//!     client.sync_stop().await;
//! }
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::codec::MsgPackCodec;
use crate::error::Result;
use crate::protocol::{ClientRole, Timing, WAIT_FOR_MESSAGES_CAP};
use crate::queue::Envelope;
use crate::transport::{TcpTransport, Transport};
use crate::worker::{ConnectRequest, MessageCallback, Shared, Worker};

/// Builder for configuring and creating a client.
pub struct ClientBuilder {
    role: ClientRole,
    flush_on_exit: bool,
    timing: Timing,
    callback: Option<MessageCallback>,
}

impl ClientBuilder {
    /// Create a builder for an exporter client.
    pub fn new() -> Self {
        Self {
            role: ClientRole::Exporter,
            flush_on_exit: false,
            timing: Timing::default(),
            callback: None,
        }
    }

    /// Set the client role.
    pub fn role(mut self, role: ClientRole) -> Self {
        self.role = role;
        self
    }

    /// Shorthand for a heartbeat-role client.
    pub fn heartbeat(self) -> Self {
        self.role(ClientRole::Heartbeat)
    }

    /// Flush outstanding messages when the worker exits.
    pub fn flush_on_exit(mut self, flag: bool) -> Self {
        self.flush_on_exit = flag;
        self
    }

    /// Override the timing profile (ping cadence, liveness deadlines).
    pub fn timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Install the incoming-payload callback up front.
    pub fn on_message<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Build the client over the default TCP transport.
    pub async fn build(self) -> Client {
        self.build_with_transport(TcpTransport::new()).await
    }

    /// Build the client over a caller-supplied transport.
    ///
    /// Spawns the worker task and waits for it to stage the transport, so
    /// `connect` can be called as soon as this returns. The client is
    /// returned even when staging fails; that state is observable as
    /// `good() == false`.
    pub async fn build_with_transport<T>(self, transport: T) -> Client
    where
        T: Transport + 'static + Sync,
    {
        let shared = Arc::new(Shared::new(self.role, self.timing));
        shared.set_flush_on_exit(self.flush_on_exit);
        if self.callback.is_some() {
            shared.set_callback(self.callback);
        }

        let (init_tx, init_rx) = oneshot::channel();
        let worker = Worker::new(transport, Arc::clone(&shared));
        let handle = tokio::spawn(worker.run(init_tx));

        // Wait for the worker to stage the socket; a failure here leaves
        // the worker already finished and good() false.
        let _ = init_rx.await;

        Client {
            shared,
            worker: Mutex::new(Some(handle)),
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Async client for the exporter ↔ render-server channel.
///
/// One worker task serves the connection; any number of threads may share
/// the client through a reference. Dropping the client orders the worker
/// out; for a deterministic join use [`Client::sync_stop`].
pub struct Client {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Start connecting to `addr`.
    ///
    /// Non-blocking: records the address with a freshly drawn 64-bit random
    /// routing identity and releases the worker from its start-serving
    /// latch. Connect and handshake failures surface later through
    /// [`Client::good`] and [`Client::connected`].
    pub fn connect(&self, addr: impl Into<String>) {
        let request = ConnectRequest {
            addr: addr.into(),
            identity: rand::random::<u64>(),
        };
        debug!(addr = %request.addr, "connect requested");
        self.shared.set_connect_request(request);
        self.shared.set_start_serving(true);
        self.shared.wake.notify_waiters();
    }

    /// Copy `data` into the outbound queue.
    ///
    /// Thread-safe and never blocks on I/O. Data records carry the exporter
    /// role; a heartbeat client has no use for this. If the worker has died
    /// the data is silently queued and discarded at teardown.
    pub fn send(&self, data: &[u8]) {
        self.shared.queue.push(Envelope::copy_from(data));
    }

    /// Move an owned payload into the outbound queue without copying.
    pub fn send_bytes(&self, payload: Bytes) {
        self.shared.queue.push(Envelope::new(payload));
    }

    /// Serialize a domain value and enqueue it.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized; enqueueing
    /// itself cannot fail.
    pub fn send_encoded<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        let payload = MsgPackCodec::encode(value)?;
        self.shared.queue.push(Envelope::from(payload));
        Ok(())
    }

    /// Install (or replace) the incoming-payload callback.
    ///
    /// The callback runs on the worker task, serialized against itself.
    /// It must not await `sync_stop` on its own client: that would block
    /// the task that has to exit. Calling `send` from inside it is fine.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.shared.set_callback(Some(Box::new(callback)));
    }

    /// Remove the incoming-payload callback; further payloads are dropped.
    pub fn clear_callback(&self) {
        self.shared.set_callback(None);
    }

    /// Set whether outstanding messages are flushed when the worker exits.
    pub fn set_flush_on_exit(&self, flag: bool) {
        self.shared.set_flush_on_exit(flag);
    }

    /// Check the flush-on-exit flag.
    pub fn flush_on_exit(&self) -> bool {
        self.shared.flush_on_exit()
    }

    /// Number of messages not yet handed to the transport (advisory).
    pub fn outstanding_messages(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether the worker is still serving.
    pub fn good(&self) -> bool {
        self.shared.is_working()
    }

    /// Whether a connection has been initiated and has not failed.
    pub fn connected(&self) -> bool {
        self.shared.start_serving() && !self.shared.error_connect()
    }

    /// Block until the outbound queue is empty or `timeout` passes.
    ///
    /// `timeout` is clamped to 10 s. Returns `true` iff the queue drained;
    /// `false` on timeout or if the worker died with messages pending.
    pub async fn wait_for_messages(&self, timeout: Duration) -> bool {
        let timeout = timeout.min(WAIT_FOR_MESSAGES_CAP);
        if self.shared.queue.is_empty() {
            return true;
        }

        let begin = Instant::now();
        while self.shared.is_working() {
            if self.shared.queue.is_empty() {
                return true;
            }
            if begin.elapsed() >= timeout {
                return false;
            }
            sleep(Duration::from_millis(1)).await;
        }

        false
    }

    /// Ask the server to terminate, then stop serving.
    ///
    /// Fire-and-forget: the worker exits its loop at the next boundary and
    /// emits a stop record on the way out. In-flight waits are not
    /// interrupted (a handshake in progress runs to its own verdict, and an
    /// unfinished handshake tears down without any stop record). Queued
    /// data that has not been sent yet is not flushed by this path.
    pub fn stop_server(&self) {
        self.shared.set_server_stop(true);
        self.shared.set_working(false);
        self.shared.wake.notify_waiters();
    }

    /// Stop the worker and wait for it to finish.
    ///
    /// Gives a pending stop record up to 200 ms to go out, orders the
    /// worker to exit (releasing it from the start-serving latch and
    /// interrupting in-flight transport waits), then joins the task.
    /// Idempotent: repeated calls return immediately.
    pub async fn sync_stop(&self) {
        if self.shared.server_stop() {
            let grace = self.shared.timing.shutdown_send_timeout;
            let begin = Instant::now();
            while self.shared.server_stop() && begin.elapsed() <= grace {
                sleep(Duration::from_millis(1)).await;
            }
        }

        self.shared.set_working(false);
        self.shared.set_start_serving(true);
        self.shared.set_interrupt();
        self.shared.wake.notify_waiters();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        // Best effort: order the worker out and let the task finish
        // detached. sync_stop() is the deterministic path.
        self.shared.set_working(false);
        self.shared.set_start_serving(true);
        self.shared.set_interrupt();
        self.shared.wake.notify_waiters();
    }
}

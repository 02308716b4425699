//! # renderlink
//!
//! Async client for the messaging channel between a rendering exporter and
//! a remote render server.
//!
//! The channel is a single duplex, dealer-style transport carrying discrete
//! two-part messages: a fixed 12-byte control frame followed by an opaque
//! payload. One worker task per client owns the transport and muxes
//!
//! - a thread-safe outbound FIFO fed by producer threads,
//! - an inbound path delivering payloads to a user callback,
//! - a ping cadence timer and (for the heartbeat role) an inbound liveness
//!   deadline,
//! - three shutdown disciplines: immediate, graceful-with-flush, and
//!   stop-server.
//!
//! ## Roles
//!
//! An `Exporter` client carries application payloads; a `Heartbeat` client
//! exists only to keep the server alive and terminates itself when the
//! server goes quiet.
//!
//! ## Example
//!
//! ```ignore
//! use renderlink::Client;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Client::builder()
//!         .flush_on_exit(true)
//!         .on_message(|payload| println!("server sent {} bytes", payload.len()))
//!         .build()
//!         .await;
//!
//!     client.connect("127.0.0.1:5555");
//!     client.send(b"scene update");
//!     client.sync_stop().await;
//! }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod transport;

mod client;
mod worker;

pub use client::{Client, ClientBuilder};
pub use error::{RenderlinkError, Result};
pub use protocol::{ClientRole, Timing};
pub use queue::Envelope;
pub use worker::MessageCallback;

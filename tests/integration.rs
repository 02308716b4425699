//! End-to-end tests against a loopback server speaking the channel
//! protocol over TCP.
//!
//! The server side is implemented directly on [`TcpTransport`]: accept,
//! consume the 8-byte identity preamble, then exchange (control, payload)
//! record pairs. Timing is compressed so liveness scenarios run in
//! milliseconds.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout, Instant};

use renderlink::protocol::{
    ClientRole, ControlCode, ControlFrame, Timing, PROTOCOL_VERSION,
};
use renderlink::transport::{TcpTransport, Transport};
use renderlink::{Client, ClientBuilder};

const PING_INTERVAL: Duration = Duration::from_millis(100);

fn fast_timing() -> Timing {
    Timing {
        ping_interval: PING_INTERVAL,
        heartbeat_timeout: Duration::from_millis(200),
        handshake_timeout: Duration::from_millis(500),
        ..Timing::default()
    }
}

/// Server side of one accepted client connection.
struct ServerPeer {
    transport: TcpTransport,
    identity: u64,
}

impl ServerPeer {
    async fn accept(listener: &TcpListener) -> Self {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut identity = [0u8; 8];
        stream.read_exact(&mut identity).await.unwrap();
        Self {
            transport: TcpTransport::from_stream(stream),
            identity: u64::from_le_bytes(identity),
        }
    }

    /// Read one (control, payload) record pair, panicking on any fault.
    async fn recv_record(&mut self) -> (ControlFrame, Bytes) {
        self.try_recv_record()
            .await
            .expect("peer closed the connection")
    }

    /// Read one record pair; `None` once the peer has closed.
    async fn try_recv_record(&mut self) -> Option<(ControlFrame, Bytes)> {
        let control = self.transport.recv_part().await.ok()?;
        assert!(control.more, "control part must flag more-follows");
        let payload = self.transport.recv_part().await.ok()?;
        assert!(!payload.more, "payload part must be terminal");
        Some((
            ControlFrame::decode(&control.bytes).expect("invalid control frame"),
            payload.bytes,
        ))
    }

    async fn send_raw_record(&mut self, control: &[u8], payload: &[u8]) {
        self.transport
            .send_part(Bytes::copy_from_slice(control), true)
            .await
            .unwrap();
        self.transport
            .send_part(Bytes::copy_from_slice(payload), false)
            .await
            .unwrap();
    }

    async fn send_record(&mut self, frame: ControlFrame, payload: &[u8]) {
        self.send_raw_record(&frame.encode(), payload).await;
    }

    /// Answer the client's handshake request for `role`.
    async fn complete_handshake(&mut self, role: ClientRole) {
        let (frame, payload) = self.recv_record().await;
        assert_eq!(frame.version, PROTOCOL_VERSION);
        assert_eq!(frame.role, role);
        assert_eq!(frame.code, role.connect_code());
        assert!(payload.is_empty());

        self.send_record(ControlFrame::new(role, role.create_code()), b"")
            .await;
    }

    /// Collect records until `deadline`, or until `stop_at` matches.
    async fn collect_records(
        &mut self,
        deadline: Duration,
        stop_at: Option<ControlCode>,
    ) -> Vec<(ControlFrame, Bytes)> {
        let mut records = Vec::new();
        let begin = Instant::now();
        while begin.elapsed() < deadline {
            let remaining = deadline.saturating_sub(begin.elapsed());
            match timeout(remaining, self.try_recv_record()).await {
                Ok(Some(record)) => {
                    let code = record.0.code;
                    records.push(record);
                    if stop_at == Some(code) {
                        break;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }
        records
    }
}

fn data_payloads(records: &[(ControlFrame, Bytes)]) -> Vec<Bytes> {
    records
        .iter()
        .filter(|(frame, _)| frame.code == ControlCode::Data)
        .map(|(_, payload)| payload.clone())
        .collect()
}

async fn exporter_client(addr: &str) -> Client {
    let client = ClientBuilder::new().timing(fast_timing()).build().await;
    client.connect(addr);
    client
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..5000 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn exporter_happy_path() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let client = exporter_client(&addr).await;
    let mut peer = ServerPeer::accept(&listener).await;
    assert_ne!(peer.identity, 0);
    peer.complete_handshake(ClientRole::Exporter).await;

    client.send(b"a");
    client.send(b"bc");
    client.send(b"");

    assert!(client.wait_for_messages(Duration::from_secs(5)).await);
    assert!(client.good());
    assert!(client.connected());

    let records = peer.collect_records(Duration::from_millis(300), None).await;
    let data = data_payloads(&records);
    assert_eq!(data, vec![&b"a"[..], &b"bc"[..], &b""[..]]);
    for (frame, _) in &records {
        assert_eq!(frame.version, PROTOCOL_VERSION);
        assert_eq!(frame.role, ClientRole::Exporter);
    }

    client.sync_stop().await;
    assert!(!client.good());
}

#[tokio::test]
async fn version_mismatch_tears_client_down() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let client = exporter_client(&addr).await;
    let mut peer = ServerPeer::accept(&listener).await;

    // Consume the connect request, then acknowledge with a foreign version.
    let (frame, _) = peer.recv_record().await;
    assert_eq!(frame.code, ControlCode::ExporterConnect);

    let mut bad =
        ControlFrame::new(ClientRole::Exporter, ControlCode::RendererCreate).encode();
    bad[0..4].copy_from_slice(&999i32.to_le_bytes());
    peer.send_raw_record(&bad, b"").await;

    // The client must give up without ever sending data.
    client.send(b"never delivered");
    wait_until(|| !client.good()).await;

    let records = peer.collect_records(Duration::from_millis(200), None).await;
    assert!(data_payloads(&records).is_empty());

    client.sync_stop().await;
}

#[tokio::test]
async fn heartbeat_dies_when_server_goes_silent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let client = ClientBuilder::new()
        .heartbeat()
        .timing(fast_timing())
        .build()
        .await;
    client.connect(&addr);

    let mut peer = ServerPeer::accept(&listener).await;
    peer.complete_handshake(ClientRole::Heartbeat).await;
    assert!(client.good());

    // Silence: the heartbeat deadline (200 ms) must kill the client soon.
    let begin = Instant::now();
    wait_until(|| !client.good()).await;
    assert!(
        begin.elapsed() < Duration::from_millis(600),
        "liveness deadline took {:?}",
        begin.elapsed()
    );

    client.sync_stop().await;
}

#[tokio::test]
async fn heartbeat_survives_while_server_pings() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let client = ClientBuilder::new()
        .heartbeat()
        .timing(fast_timing())
        .build()
        .await;
    client.connect(&addr);

    let mut peer = ServerPeer::accept(&listener).await;
    peer.complete_handshake(ClientRole::Heartbeat).await;

    for _ in 0..6 {
        sleep(Duration::from_millis(80)).await;
        peer.send_record(
            ControlFrame::new(ClientRole::Heartbeat, ControlCode::Ping),
            b"",
        )
        .await;
    }
    assert!(client.good());

    client.sync_stop().await;
}

#[tokio::test]
async fn graceful_flush_delivers_backlog_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let client = ClientBuilder::new()
        .flush_on_exit(true)
        .timing(fast_timing())
        .build()
        .await;
    client.connect(&addr);

    let mut peer = ServerPeer::accept(&listener).await;
    peer.complete_handshake(ClientRole::Exporter).await;

    // The first ping proves the client reached steady state; a stop
    // ordered mid-handshake would tear down without flushing.
    let warmup = peer
        .collect_records(Duration::from_secs(2), Some(ControlCode::Ping))
        .await;
    assert!(warmup
        .iter()
        .any(|(frame, _)| frame.code == ControlCode::Ping));

    for payload in [&b"m1"[..], &b"m2"[..], &b"m3"[..], &b"m4"[..], &b"m5"[..]] {
        client.send(payload);
    }
    // Stop immediately; whatever the serve loop did not drain, the exit
    // flush must.
    client.sync_stop().await;
    assert!(!client.good());

    let records = peer.collect_records(Duration::from_millis(300), None).await;
    let data = data_payloads(&records);
    assert_eq!(
        data,
        vec![&b"m1"[..], &b"m2"[..], &b"m3"[..], &b"m4"[..], &b"m5"[..]]
    );
    for (frame, _) in records
        .iter()
        .filter(|(frame, _)| frame.code == ControlCode::Data)
    {
        assert_eq!(frame.role, ClientRole::Exporter);
    }
}

#[tokio::test]
async fn stop_server_emits_stop_after_data() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let client = exporter_client(&addr).await;
    let mut peer = ServerPeer::accept(&listener).await;
    peer.complete_handshake(ClientRole::Exporter).await;

    client.send(b"x");
    assert!(client.wait_for_messages(Duration::from_secs(5)).await);

    client.stop_server();
    client.sync_stop().await;
    assert!(!client.good());

    let records = peer
        .collect_records(Duration::from_millis(500), Some(ControlCode::Stop))
        .await;

    let data = data_payloads(&records);
    assert_eq!(data, vec![&b"x"[..]]);

    let stops: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, (frame, _))| frame.code == ControlCode::Stop)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(stops.len(), 1, "exactly one stop record");

    // No data after the stop record.
    let data_positions: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, (frame, _))| frame.code == ControlCode::Data)
        .map(|(i, _)| i)
        .collect();
    assert!(data_positions.iter().all(|pos| *pos < stops[0]));
}

#[tokio::test]
async fn ping_cadence_under_silence() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let client = exporter_client(&addr).await;
    let mut peer = ServerPeer::accept(&listener).await;
    peer.complete_handshake(ClientRole::Exporter).await;

    // No sends, no server traffic: watch four cadence intervals.
    let records = peer.collect_records(PING_INTERVAL * 4, None).await;
    let pings = records
        .iter()
        .filter(|(frame, _)| frame.code == ControlCode::Ping)
        .count();
    assert!(
        pings >= 3,
        "expected at least one ping per interval, saw {pings}"
    );

    client.sync_stop().await;
}

#[tokio::test]
async fn server_data_reaches_callback_in_wire_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let received = std::sync::Arc::new(std::sync::Mutex::new(Vec::<Vec<u8>>::new()));
    let sink = std::sync::Arc::clone(&received);

    let client = ClientBuilder::new()
        .timing(fast_timing())
        .on_message(move |payload| sink.lock().unwrap().push(payload.to_vec()))
        .build()
        .await;
    client.connect(&addr);

    let mut peer = ServerPeer::accept(&listener).await;
    peer.complete_handshake(ClientRole::Exporter).await;

    for i in 0..5u8 {
        peer.send_record(
            ControlFrame::new(ClientRole::Exporter, ControlCode::Data),
            &[i, i, i],
        )
        .await;
    }

    wait_until(|| received.lock().unwrap().len() == 5).await;
    let received = received.lock().unwrap();
    for (i, payload) in received.iter().enumerate() {
        assert_eq!(payload, &vec![i as u8; 3]);
    }

    client.sync_stop().await;
}

#[tokio::test]
async fn connect_to_unreachable_address_fails_cleanly() {
    // A port nothing listens on: connect errors, the worker exits cleanly.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = ClientBuilder::new().timing(fast_timing()).build().await;
    client.connect(&addr);

    wait_until(|| !client.good()).await;
    assert!(!client.connected());

    // Idempotent double stop on a dead client.
    client.sync_stop().await;
    client.sync_stop().await;
}

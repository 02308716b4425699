//! Minimal exporter session against a running render server.
//!
//! ```sh
//! cargo run --example exporter -- 127.0.0.1:5555
//! ```

use std::time::Duration;

use renderlink::Client;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "renderlink=debug".into()),
        )
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5555".to_string());

    let client = Client::builder()
        .flush_on_exit(true)
        .on_message(|payload| println!("server sent {} bytes", payload.len()))
        .build()
        .await;

    client.connect(&addr);
    client.send(b"scene: begin");
    client.send(b"scene: object mesh01");
    client.send(b"scene: commit");

    if !client.wait_for_messages(Duration::from_secs(5)).await {
        eprintln!(
            "{} messages still queued; is the server up?",
            client.outstanding_messages()
        );
    }

    client.sync_stop().await;
    println!("stopped (good = {})", client.good());
}

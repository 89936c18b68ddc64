//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;

use javelin::{Engine, Shutdown};
use tokio::net::TcpListener;

/// Serve an engine on an ephemeral port and return its address.
pub async fn spawn_engine(engine: Engine) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let shutdown = Shutdown::new();
        let _ = engine.serve(listener, &shutdown).await;
    });

    // Wait for the accept loop to come up.
    tokio::time::sleep(Duration::from_millis(50)).await;
    addr
}

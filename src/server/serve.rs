//! TCP accept loop and connection serving.
//!
//! # Responsibilities
//! - Accept connections and serve each on its own tokio task
//! - Drain in-flight connections on the shutdown signal
//!
//! # Design Decisions
//! - HTTP/1.1 via hyper's low-level connection API; the engine owns
//!   everything above the parsed request
//! - Accept errors are logged and skipped, never fatal

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::lifecycle::shutdown::Shutdown;
use crate::server::app::Engine;

impl Engine {
    /// Serve on an already-bound listener until `shutdown` triggers.
    pub async fn serve(self, listener: TcpListener, shutdown: &Shutdown) -> std::io::Result<()> {
        let engine = Arc::new(self);
        let mut signal = shutdown.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to accept connection");
                            continue;
                        }
                    };
                    tracing::debug!(remote = %remote, "connection accepted");

                    let engine = Arc::clone(&engine);
                    let mut drain = shutdown.subscribe();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req| {
                            let engine = Arc::clone(&engine);
                            async move { Ok::<_, Infallible>(engine.handle(req).await) }
                        });

                        let conn = http1::Builder::new().serve_connection(io, service);
                        tokio::pin!(conn);

                        tokio::select! {
                            result = conn.as_mut() => {
                                if let Err(err) = result {
                                    tracing::error!(error = %err, "error serving connection");
                                }
                            }
                            _ = drain.recv() => {
                                conn.as_mut().graceful_shutdown();
                                if let Err(err) = conn.as_mut().await {
                                    tracing::debug!(error = %err, "connection closed during drain");
                                }
                            }
                        }
                    });
                }
                _ = signal.recv() => {
                    tracing::info!("shutdown signal received, draining");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Bind and serve until the process is stopped.
    pub async fn listen(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(address = %listener.local_addr()?, "listening for connections");

        let shutdown = Shutdown::new();
        self.serve(listener, &shutdown).await
    }

    /// Bind and serve, shutting down gracefully on ctrl-c.
    pub async fn run(self, addr: SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(address = %listener.local_addr()?, "listening for connections");

        let shutdown = Arc::new(Shutdown::new());
        shutdown.trigger_on_ctrl_c();

        self.serve(listener, &shutdown).await
    }
}

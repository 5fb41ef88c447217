//! Chorus replica server.
//!
//! This crate provides the replica runtime using:
//! - Quinn for QUIC transport
//! - Tokio for async runtime
//! - System time for the auction timer
//!
//! ## Architecture
//!
//! ```text
//! chorus-server
//!   ├─ SystemEnv          (production Environment impl)
//!   ├─ QuinnTransport     (QUIC via Quinn)
//!   └─ BroadcastEngine    (chorus-core: registry, clock, auction)
//! ```
//!
//! Replicas never talk to each other. Each one is authoritative only for its
//! own sessions, clock and auction.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod system_env;
mod transport;

use std::{future::Future, net::SocketAddr, sync::Arc};

use chorus_core::{BroadcastEngine, EngineConfig};
pub use chorus_core::EngineMode;
pub use error::ServerError;
pub use system_env::SystemEnv;
pub use transport::{QuinnTransport, TlsMaterial, load_tls_material};
use tracing::Instrument;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "127.0.0.1:5000")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Engine configuration (mode, auction duration, queue bound)
    pub engine: EngineConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: chorus_proto::replica_address(0),
            cert_path: None,
            key_path: None,
            engine: EngineConfig::default(),
        }
    }
}

/// Production Chorus replica.
///
/// Wraps a `BroadcastEngine` with Quinn QUIC transport and system environment.
pub struct Server {
    /// Replica decision logic, shared by every connection task
    engine: Arc<BroadcastEngine>,
    /// QUIC endpoint
    transport: QuinnTransport,
    /// Environment
    env: SystemEnv,
}

impl Server {
    /// Create and bind a new replica.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Binding to the address fails
    /// - TLS configuration is invalid
    pub fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;
        let engine = Arc::new(BroadcastEngine::new(config.engine));

        Ok(Self { engine, transport, env: SystemEnv::new() })
    }

    /// Run until the process is killed.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Run, accepting connections, until `shutdown` resolves.
    ///
    /// On shutdown the endpoint stops accepting, open connections are closed
    /// and the call waits for them to drain.
    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            mode = %self.engine.mode(),
            "Replica serving on {}",
            self.transport.local_addr()?
        );

        let timer_engine = Arc::clone(&self.engine);
        let env = self.env;
        let timer = tokio::spawn(async move {
            timer_engine.run_auction_timer(&env).await;
            if timer_engine.auction().is_closed() {
                tracing::info!(uptime = ?env.uptime(), "auction timer done");
            }
        });

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Replica shutting down");
                    break;
                },
                incoming = self.transport.accept() => match incoming {
                    Some(incoming) => {
                        let engine = Arc::clone(&self.engine);
                        let conn_id = match new_conn_id() {
                            Ok(id) => id,
                            Err(e) => {
                                tracing::error!("Dropping connection: {}", e);
                                incoming.refuse();
                                continue;
                            },
                        };
                        let span = tracing::info_span!("connection", conn_id);

                        tokio::spawn(
                            async move {
                                if let Err(e) = handle_connection(incoming, engine).await {
                                    tracing::warn!("Connection error: {}", e);
                                }
                            }
                            .instrument(span),
                        );
                    },
                    None => {
                        tracing::info!("Endpoint closed");
                        break;
                    },
                },
            }
        }

        timer.abort();
        self.transport.close();
        self.transport.wait_idle().await;
        Ok(())
    }

    /// Get the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Shared handle to the replica's engine.
    pub fn engine(&self) -> Arc<BroadcastEngine> {
        Arc::clone(&self.engine)
    }
}

fn new_conn_id() -> Result<u64, ServerError> {
    let mut buf = [0u8; 8];
    getrandom::fill(&mut buf).map_err(|e| ServerError::Internal(e.to_string()))?;
    Ok(u64::from_le_bytes(buf))
}

/// Serve one Join or Publish on an accepted stream.
async fn handle_stream<R, W>(engine: &BroadcastEngine, recv: R, send: W) -> Result<(), ServerError>
where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    chorus_core::serve_stream(engine, recv, send).await?;
    Ok(())
}

/// Handle a single QUIC connection: one RPC per bidirectional stream.
async fn handle_connection(
    incoming: quinn::Incoming,
    engine: Arc<BroadcastEngine>,
) -> Result<(), ServerError> {
    let conn = incoming.await?;
    tracing::debug!(remote = %conn.remote_address(), "New connection");

    loop {
        match conn.accept_bi().await {
            Ok((send, recv)) => {
                let engine = Arc::clone(&engine);

                tokio::spawn(
                    async move {
                        if let Err(e) = handle_stream(&engine, recv, send).await {
                            tracing::debug!("Stream error: {}", e);
                        }
                    }
                    .in_current_span(),
                );
            },
            Err(e) => {
                tracing::debug!("Connection closed: {}", e);
                break;
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use chorus_core::RpcError;
    use chorus_proto::{Event, Request};

    use super::*;

    #[tokio::test]
    async fn stream_closed_before_request_is_rpc_error() {
        let engine = BroadcastEngine::new(EngineConfig::default());

        let result = handle_stream(&engine, tokio::io::empty(), tokio::io::sink()).await;

        assert!(matches!(result, Err(ServerError::Rpc(RpcError::StreamTerminated))));
    }

    #[tokio::test]
    async fn publish_stream_is_served() {
        let engine = BroadcastEngine::new(EngineConfig::default());
        let mut request = Vec::new();
        Request::Publish(Event::chat("alice", "hi", 1)).to_frame().unwrap().encode(&mut request).unwrap();

        let mut response = Vec::new();
        handle_stream(&engine, request.as_slice(), &mut response).await.unwrap();

        assert!(!response.is_empty());
        assert!(engine.clock_time() >= 2);
    }
}

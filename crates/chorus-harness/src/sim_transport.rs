//! Simulated TCP transport.
//!
//! Replicas and clients run the same stream RPC as production, over turmoil
//! TCP instead of QUIC. One TCP connection per RPC.

use std::{error::Error, sync::Arc};

use async_trait::async_trait;
use chorus_client::{ClientError, EventStream, ReplicaLink, join_over, publish_over};
use chorus_core::{BroadcastEngine, EngineConfig, serve_stream};
use chorus_proto::{Ack, Event};
use tokio::sync::Notify;
use turmoil::net::{TcpListener, TcpStream};

use crate::sim_env::SimEnv;

/// Port every simulated replica listens on.
pub const REPLICA_PORT: u16 = 5000;

/// A replica running inside the simulation.
///
/// The engine is shared with the test so oracles can inspect replica state
/// after (or during) the run.
pub struct SimReplica {
    engine: Arc<BroadcastEngine>,
    stop: Notify,
}

impl SimReplica {
    /// Create a replica with its own engine.
    pub fn new(config: EngineConfig) -> Self {
        Self { engine: Arc::new(BroadcastEngine::new(config)), stop: Notify::new() }
    }

    /// The replica's engine.
    pub fn engine(&self) -> &Arc<BroadcastEngine> {
        &self.engine
    }

    /// Take the replica down: stop listening and end every subscription.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Serve until [`stop`](Self::stop), then stay up with nothing listening
    /// so later connection attempts are refused.
    pub async fn serve(&self, port: u16) -> Result<(), Box<dyn Error>> {
        let listener = TcpListener::bind(format!("0.0.0.0:{port}").as_str()).await?;

        let timer_engine = Arc::clone(&self.engine);
        let timer = tokio::spawn(async move { timer_engine.run_auction_timer(&SimEnv::new()).await });

        loop {
            tokio::select! {
                () = self.stop.notified() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    tracing::debug!(%peer, "accepted");
                    let engine = Arc::clone(&self.engine);
                    tokio::spawn(async move {
                        let (recv, send) = stream.into_split();
                        if let Err(e) = serve_stream(&engine, recv, send).await {
                            tracing::debug!(%peer, "stream error: {}", e);
                        }
                    });
                },
            }
        }

        drop(listener);
        timer.abort();
        for participant in self.engine.registry().participants() {
            self.engine.registry().remove(&participant);
        }
        tracing::info!("replica stopped");

        std::future::pending::<()>().await;
        Ok(())
    }
}

/// [`ReplicaLink`] to a simulated replica host.
#[derive(Debug, Clone)]
pub struct SimLink {
    address: String,
}

impl SimLink {
    /// Link to `host` on [`REPLICA_PORT`].
    pub fn new(host: &str) -> Self {
        Self::with_port(host, REPLICA_PORT)
    }

    /// Link to `host:port`.
    pub fn with_port(host: &str, port: u16) -> Self {
        Self { address: format!("{host}:{port}") }
    }

    async fn connect(&self) -> Result<TcpStream, ClientError> {
        TcpStream::connect(self.address.as_str()).await.map_err(|e| {
            ClientError::ConnectionUnavailable { replica: self.address.clone(), reason: e.to_string() }
        })
    }
}

#[async_trait]
impl ReplicaLink for SimLink {
    fn label(&self) -> &str {
        &self.address
    }

    async fn join(&self, participant_id: &str) -> Result<Box<dyn EventStream>, ClientError> {
        let (recv, send) = self.connect().await?.into_split();
        join_over(&self.address, recv, send, participant_id).await
    }

    async fn publish(&self, event: &Event) -> Result<Ack, ClientError> {
        let (recv, send) = self.connect().await?.into_split();
        publish_over(&self.address, recv, send, event).await
    }
}

//! Replica links.
//!
//! A [`ReplicaLink`] is the client's handle on one replica: it can open a
//! Join subscription and submit Publish calls. The fan-out only sees this
//! trait, so QUIC, simulated TCP and in-process engines are interchangeable.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chorus_core::{BroadcastEngine, RemoteSubscription, call_join, call_publish, serve_stream};
use chorus_proto::{Ack, Event};
use tokio::io::{AsyncRead, AsyncWrite, duplex, split};

use crate::error::ClientError;

/// Client end of one replica.
#[async_trait]
pub trait ReplicaLink: Send + Sync {
    /// Name used in logs and rendered notices.
    fn label(&self) -> &str;

    /// Open a subscription. Resolves once the replica has admitted us.
    async fn join(&self, participant_id: &str) -> Result<Box<dyn EventStream>, ClientError>;

    /// Submit one event and wait for the replica's acknowledgement.
    async fn publish(&self, event: &Event) -> Result<Ack, ClientError>;
}

/// Inbound half of a Join.
#[async_trait]
pub trait EventStream: Send {
    /// Next event. `Ok(None)` when the replica ended the subscription.
    async fn next_event(&mut self) -> Result<Option<Event>, ClientError>;

    /// Leave the replica.
    async fn close(self: Box<Self>) -> Result<(), ClientError>;
}

/// [`EventStream`] over any byte-stream pair.
pub struct StreamSubscription<R, W> {
    replica: String,
    inner: RemoteSubscription<R, W>,
}

impl<R, W> StreamSubscription<R, W> {
    /// Wrap an admitted subscription.
    pub fn new(replica: impl Into<String>, inner: RemoteSubscription<R, W>) -> Self {
        Self { replica: replica.into(), inner }
    }
}

#[async_trait]
impl<R, W> EventStream for StreamSubscription<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn next_event(&mut self) -> Result<Option<Event>, ClientError> {
        self.inner.next_event().await.map_err(|e| ClientError::from_rpc(&self.replica, e))
    }

    async fn close(self: Box<Self>) -> Result<(), ClientError> {
        let replica = self.replica;
        self.inner.close().await.map_err(|e| ClientError::from_rpc(&replica, e))
    }
}

/// Run a Join over a freshly opened stream.
pub async fn join_over<R, W>(
    replica: &str,
    recv: R,
    send: W,
    participant_id: &str,
) -> Result<Box<dyn EventStream>, ClientError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let subscription = call_join(recv, send, participant_id)
        .await
        .map_err(|e| ClientError::from_rpc(replica, e))?;
    Ok(Box::new(StreamSubscription::new(replica, subscription)))
}

/// Run a Publish over a freshly opened stream.
pub async fn publish_over<R, W>(
    replica: &str,
    recv: R,
    send: W,
    event: &Event,
) -> Result<Ack, ClientError>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    call_publish(recv, send, event).await.map_err(|e| ClientError::from_rpc(replica, e))
}

const LOCAL_PIPE_CAPACITY: usize = 64 * 1024;

/// Link to an engine in the same process.
///
/// Every call runs the real stream RPC over an in-memory pipe. The link can be
/// taken offline to model an unreachable replica.
pub struct LocalLink {
    label: String,
    engine: Arc<BroadcastEngine>,
    online: AtomicBool,
}

impl LocalLink {
    /// Link to `engine`, reported as `label`.
    pub fn new(label: impl Into<String>, engine: Arc<BroadcastEngine>) -> Self {
        Self { label: label.into(), engine, online: AtomicBool::new(true) }
    }

    /// Make later calls succeed or fail with `ConnectionUnavailable`.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn connect(
        &self,
    ) -> Result<
        (tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>),
        ClientError,
    > {
        if !self.online.load(Ordering::SeqCst) {
            return Err(ClientError::ConnectionUnavailable {
                replica: self.label.clone(),
                reason: "replica offline".to_string(),
            });
        }

        let (client, server) = duplex(LOCAL_PIPE_CAPACITY);
        let (server_recv, server_send) = split(server);
        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            if let Err(e) = serve_stream(&engine, server_recv, server_send).await {
                tracing::debug!("local stream ended: {}", e);
            }
        });

        Ok(split(client))
    }
}

#[async_trait]
impl ReplicaLink for LocalLink {
    fn label(&self) -> &str {
        &self.label
    }

    async fn join(&self, participant_id: &str) -> Result<Box<dyn EventStream>, ClientError> {
        let (recv, send) = self.connect()?;
        join_over(&self.label, recv, send, participant_id).await
    }

    async fn publish(&self, event: &Event) -> Result<Ack, ClientError> {
        let (recv, send) = self.connect()?;
        publish_over(&self.label, recv, send, event).await
    }
}

//! Join/Publish over any bidirectional byte stream.
//!
//! One RPC per stream. The transport (QUIC in production, simulated TCP in
//! the harness) only has to hand over a read half and a write half.
//!
//! ```text
//! caller                                   replica
//!   │ Join{participant}  ─────────────────►  on_join
//!   │ ◄─────────────────────────  Event(welcome)
//!   │ ◄─────────────────────────  Event ...
//!   │ (close write half) ─────────────────►  on_leave
//!
//!   │ Publish(event)     ─────────────────►  on_publish
//!   │ ◄─────────────────────────  Ack | Error
//! ```

use std::io;

use chorus_proto::{Ack, Event, Frame, FrameHeader, Request, Response};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{engine::BroadcastEngine, error::RpcError, registry::Subscription};

/// Read one frame. `Ok(None)` means the peer closed the stream cleanly.
pub async fn read_frame<R>(recv: &mut R) -> Result<Option<Frame>, RpcError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; FrameHeader::SIZE];
    match recv.read_exact(&mut header_buf).await {
        Ok(_) => {},
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let header = FrameHeader::from_bytes(&header_buf)?;
    let mut buf = vec![0u8; FrameHeader::SIZE + header.payload_size() as usize];
    buf[..FrameHeader::SIZE].copy_from_slice(&header_buf);
    recv.read_exact(&mut buf[FrameHeader::SIZE..]).await?;

    Ok(Some(Frame::decode(&buf)?))
}

/// Encode and write one frame, then flush.
pub async fn write_frame<W>(send: &mut W, frame: &Frame) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    frame.encode(&mut buf)?;
    send.write_all(&buf).await?;
    send.flush().await?;
    Ok(())
}

async fn write_response<W>(send: &mut W, response: &Response) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(send, &response.to_frame()?).await
}

/// Serve one RPC arriving on a stream.
///
/// For a Join this runs for the whole subscription and returns once either
/// side ends it; the session is always released before returning.
pub async fn serve_stream<R, W>(
    engine: &BroadcastEngine,
    mut recv: R,
    mut send: W,
) -> Result<(), RpcError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let frame = read_frame(&mut recv).await?.ok_or(RpcError::StreamTerminated)?;

    match Request::from_frame(&frame)? {
        Request::Publish(event) => {
            let response = match engine.on_publish(event) {
                Ok(ack) => Response::Ack(ack),
                Err(e) => {
                    tracing::warn!("publish refused: {}", e);
                    Response::Error { message: e.to_string() }
                },
            };
            write_response(&mut send, &response).await?;
            send.shutdown().await?;
            Ok(())
        },
        Request::Join { participant_id } => {
            let mut subscription = match engine.on_join(&participant_id) {
                Ok(subscription) => subscription,
                Err(e) => {
                    tracing::warn!(participant = %participant_id, "join refused: {}", e);
                    write_response(&mut send, &Response::Error { message: e.to_string() }).await?;
                    send.shutdown().await?;
                    return Ok(());
                },
            };

            let result = stream_subscription(&mut subscription, &mut recv, &mut send).await;
            engine.on_leave(subscription.info());
            result
        },
    }
}

/// Push session events until the registry drops the session or the caller
/// goes away.
async fn stream_subscription<R, W>(
    subscription: &mut Subscription,
    recv: &mut R,
    send: &mut W,
) -> Result<(), RpcError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut probe = [0u8; 1];

    loop {
        tokio::select! {
            event = subscription.recv() => match event {
                Some(event) => {
                    if let Err(e) = write_response(send, &Response::Event(event)).await {
                        tracing::debug!(participant = %subscription.info().participant_id, "subscriber write failed: {}", e);
                        return Ok(());
                    }
                },
                None => {
                    tracing::debug!(participant = %subscription.info().participant_id, "session removed, closing subscription");
                    let _ = send.shutdown().await;
                    return Ok(());
                },
            },
            read = recv.read(&mut probe) => match read {
                Ok(0) | Err(_) => {
                    tracing::debug!(participant = %subscription.info().participant_id, "subscriber closed stream");
                    return Ok(());
                },
                Ok(_) => {
                    tracing::warn!(participant = %subscription.info().participant_id, "unexpected bytes on subscription stream");
                    return Ok(());
                },
            },
        }
    }
}

/// Caller side of Publish.
pub async fn call_publish<R, W>(mut recv: R, mut send: W, event: &Event) -> Result<Ack, RpcError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_frame(&mut send, &Request::Publish(event.clone()).to_frame()?).await?;
    send.shutdown().await?;

    let frame = read_frame(&mut recv).await?.ok_or(RpcError::StreamTerminated)?;
    match Response::from_frame(&frame)? {
        Response::Ack(ack) => Ok(ack),
        Response::Error { message } => Err(RpcError::Remote(message)),
        Response::Event(_) => Err(RpcError::UnexpectedResponse("ack")),
    }
}

/// Caller side of Join.
///
/// Waits for the replica's first event (the welcome) so a returned
/// subscription is known to be admitted.
pub async fn call_join<R, W>(
    mut recv: R,
    mut send: W,
    participant_id: &str,
) -> Result<RemoteSubscription<R, W>, RpcError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let request = Request::Join { participant_id: participant_id.to_string() };
    write_frame(&mut send, &request.to_frame()?).await?;

    let frame = read_frame(&mut recv).await?.ok_or(RpcError::StreamTerminated)?;
    let welcome = match Response::from_frame(&frame)? {
        Response::Event(event) => event,
        Response::Error { message } => return Err(RpcError::Remote(message)),
        Response::Ack(_) => return Err(RpcError::UnexpectedResponse("event")),
    };

    Ok(RemoteSubscription { recv, send, pending: Some(welcome) })
}

/// Caller end of a Join.
///
/// Holds the write half open; closing it tells the replica we left.
#[derive(Debug)]
pub struct RemoteSubscription<R, W> {
    recv: R,
    send: W,
    pending: Option<Event>,
}

impl<R, W> RemoteSubscription<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Next event. `Ok(None)` when the replica ended the stream.
    pub async fn next_event(&mut self) -> Result<Option<Event>, RpcError> {
        if let Some(event) = self.pending.take() {
            return Ok(Some(event));
        }

        let Some(frame) = read_frame(&mut self.recv).await? else {
            return Ok(None);
        };
        match Response::from_frame(&frame)? {
            Response::Event(event) => Ok(Some(event)),
            Response::Error { message } => Err(RpcError::Remote(message)),
            Response::Ack(_) => Err(RpcError::UnexpectedResponse("event")),
        }
    }

    /// Tell the replica we are leaving.
    pub async fn close(mut self) -> Result<(), RpcError> {
        self.send.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chorus_proto::{Notice, Opcode};
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex, split};

    use super::*;
    use crate::engine::{EngineConfig, EngineMode};

    type Half = (ReadHalf<DuplexStream>, WriteHalf<DuplexStream>);

    /// Spawn `serve_stream` on one end of an in-memory pipe, return the other.
    fn connect(engine: &Arc<BroadcastEngine>) -> Half {
        let (client, server) = duplex(64 * 1024);
        let (server_recv, server_send) = split(server);
        let engine = Arc::clone(engine);
        tokio::spawn(async move {
            let _ = serve_stream(&engine, server_recv, server_send).await;
        });
        split(client)
    }

    async fn join(engine: &Arc<BroadcastEngine>, name: &str) -> RemoteSubscription<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>> {
        let (recv, send) = connect(engine);
        call_join(recv, send, name).await.unwrap()
    }

    async fn publish(engine: &Arc<BroadcastEngine>, event: &Event) -> Result<Ack, RpcError> {
        let (recv, send) = connect(engine);
        call_publish(recv, send, event).await
    }

    #[tokio::test]
    async fn join_then_publish_delivers_stamped_event() {
        let engine = Arc::new(BroadcastEngine::new(EngineConfig::default()));
        let mut alice = join(&engine, "alice").await;

        let welcome = alice.next_event().await.unwrap().unwrap();
        assert_eq!(welcome.notice(), Some(&Notice::Welcome { participant: "alice".into() }));

        let ack = publish(&engine, &Event::chat("alice", "hello", 1)).await.unwrap();
        assert!(ack.accepted);

        let echoed = alice.next_event().await.unwrap().unwrap();
        assert_eq!(echoed.sender_id, "alice");
        assert!(echoed.logical_time.unwrap() >= 2);
    }

    #[tokio::test]
    async fn refused_publish_surfaces_remote_error() {
        let engine = Arc::new(BroadcastEngine::new(EngineConfig::default()));
        let result = publish(&engine, &Event::bid("alice", 10)).await;
        assert!(matches!(result, Err(RpcError::Remote(_))));
    }

    #[tokio::test]
    async fn closing_subscription_releases_session() {
        let engine = Arc::new(BroadcastEngine::new(EngineConfig::default()));
        let alice = join(&engine, "alice").await;
        let mut bob = join(&engine, "bob").await;
        bob.next_event().await.unwrap();
        assert_eq!(engine.registry().len(), 2);

        alice.close().await.unwrap();

        let departed = bob.next_event().await.unwrap().unwrap();
        assert_eq!(departed.notice(), Some(&Notice::Departed { participant: "alice".into() }));
        assert_eq!(engine.registry().participants(), vec!["bob".to_string()]);
    }

    #[tokio::test]
    async fn removed_session_ends_remote_stream() {
        let engine = Arc::new(BroadcastEngine::new(EngineConfig {
            mode: EngineMode::Auction,
            ..Default::default()
        }));
        let mut alice = join(&engine, "alice").await;
        alice.next_event().await.unwrap();

        assert!(engine.registry().remove("alice"));
        assert!(alice.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn join_refused_for_blank_identity() {
        let engine = Arc::new(BroadcastEngine::new(EngineConfig::default()));
        let (recv, send) = connect(&engine);
        let result = call_join(recv, send, "").await;
        assert!(matches!(result, Err(RpcError::Remote(_))));
    }

    #[tokio::test]
    async fn garbage_request_is_a_protocol_error() {
        let engine = BroadcastEngine::new(EngineConfig::default());
        let bytes = Frame::new(Opcode::Ack, vec![0xA0]);
        let mut buf = Vec::new();
        bytes.encode(&mut buf).unwrap();

        let result = serve_stream(&engine, buf.as_slice(), tokio::io::sink()).await;
        assert!(matches!(result, Err(RpcError::Protocol(_))));
    }

    #[tokio::test]
    async fn empty_stream_is_terminated() {
        let engine = BroadcastEngine::new(EngineConfig::default());
        let result = serve_stream(&engine, tokio::io::empty(), tokio::io::sink()).await;
        assert!(matches!(result, Err(RpcError::StreamTerminated)));
    }
}

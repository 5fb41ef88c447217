//! QUIC link to a replica.
//!
//! One QUIC connection per replica, opened on first use and reopened after it
//! drops. Each Join or Publish gets its own bidirectional stream.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use async_trait::async_trait;
use chorus_proto::{Ack, Event};
use quinn::crypto::rustls::QuicClientConfig;
use rustls::{
    DigitallySignedStruct, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::CryptoProvider,
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use tokio::{sync::Mutex, time::Instant};

use crate::{
    error::ClientError,
    link::{EventStream, ReplicaLink, join_over, publish_over},
};

/// Label used for failures that happen before any replica is involved.
const LOCAL_ENDPOINT: &str = "local endpoint";

/// Subscriptions can sit idle for a long time; keep the connection warm.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(3);

/// A replica silent for this long (including during the handshake) is gone.
const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a client endpoint that accepts any replica certificate.
///
/// Replicas run with self-signed certificates, so there is no chain to check.
/// Handshake signatures are still verified.
///
/// Must be called from within a Tokio runtime.
pub fn client_endpoint() -> Result<quinn::Endpoint, ClientError> {
    let setup = |reason: String| ClientError::Transport { replica: LOCAL_ENDPOINT.to_string(), reason };

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let crypto = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| setup(format!("TLS configuration rejected: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
        .with_no_client_auth();

    let quic_crypto =
        QuicClientConfig::try_from(crypto).map_err(|e| setup(format!("QUIC crypto config: {e}")))?;

    let bind: SocketAddr = SocketAddr::from(([0, 0, 0, 0], 0));
    let mut endpoint =
        quinn::Endpoint::client(bind).map_err(|e| setup(format!("cannot bind client socket: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL));
    transport.max_idle_timeout(Some(
        quinn::IdleTimeout::try_from(MAX_IDLE_TIMEOUT)
            .map_err(|e| setup(format!("idle timeout out of range: {e}")))?,
    ));

    let mut client_config = quinn::ClientConfig::new(Arc::new(quic_crypto));
    client_config.transport_config(Arc::new(transport));
    endpoint.set_default_client_config(client_config);

    Ok(endpoint)
}

#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Connection attempts (resolve plus handshake) give up after this long.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// After a failed attempt, calls fail fast for this long before redialing.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Default)]
struct LinkState {
    connection: Option<quinn::Connection>,
    down_until: Option<Instant>,
}

impl LinkState {
    fn mark_down(&mut self) {
        self.connection = None;
        self.down_until = Some(Instant::now() + RETRY_BACKOFF);
    }
}

/// [`ReplicaLink`] over QUIC.
///
/// The address is resolved on every dial, so host names work and a bad entry
/// only affects its own replica.
pub struct QuicLink {
    label: String,
    server_name: String,
    endpoint: quinn::Endpoint,
    state: Mutex<LinkState>,
}

impl QuicLink {
    /// Link to the replica at `address` (`host:port`). Nothing is dialed
    /// until first use.
    pub fn new(endpoint: quinn::Endpoint, address: &str, server_name: impl Into<String>) -> Self {
        Self {
            label: address.to_string(),
            server_name: server_name.into(),
            endpoint,
            state: Mutex::new(LinkState::default()),
        }
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> ClientError {
        ClientError::ConnectionUnavailable { replica: self.label.clone(), reason: reason.to_string() }
    }

    /// Current connection, dialing a fresh one if there is none or it closed.
    ///
    /// A failed dial marks the replica down for [`RETRY_BACKOFF`]; calls in
    /// that window fail without touching the network.
    async fn connection(&self) -> Result<quinn::Connection, ClientError> {
        let mut state = self.state.lock().await;
        if let Some(conn) = state.connection.as_ref() {
            if conn.close_reason().is_none() {
                return Ok(conn.clone());
            }
            tracing::debug!(replica = %self.label, "connection closed, redialing");
        }

        if let Some(until) = state.down_until {
            let now = Instant::now();
            if now < until {
                return Err(self.unavailable(format!(
                    "marked down, next attempt in {:.1}s",
                    (until - now).as_secs_f64()
                )));
            }
        }

        match tokio::time::timeout(CONNECT_TIMEOUT, self.dial()).await {
            Ok(Ok(conn)) => {
                tracing::info!(replica = %self.label, "Connected");
                state.connection = Some(conn.clone());
                state.down_until = None;
                Ok(conn)
            },
            Ok(Err(e)) => {
                state.mark_down();
                Err(e)
            },
            Err(_) => {
                state.mark_down();
                Err(self.unavailable(format!("no answer within {CONNECT_TIMEOUT:?}")))
            },
        }
    }

    async fn dial(&self) -> Result<quinn::Connection, ClientError> {
        let addr = self.resolve().await?;
        let connecting =
            self.endpoint.connect(addr, &self.server_name).map_err(|e| self.unavailable(e))?;
        connecting.await.map_err(|e| self.unavailable(e))
    }

    /// First IPv4 address for the label (the endpoint is bound to IPv4),
    /// falling back to whatever resolves first.
    async fn resolve(&self) -> Result<SocketAddr, ClientError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(self.label.as_str())
            .await
            .map_err(|e| self.unavailable(format!("cannot resolve address: {e}")))?
            .collect();
        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| self.unavailable("address resolved to nothing"))
    }

    async fn open_stream(&self) -> Result<(quinn::RecvStream, quinn::SendStream), ClientError> {
        let conn = self.connection().await?;
        let (send, recv) = conn.open_bi().await.map_err(|e| self.unavailable(e))?;
        Ok((recv, send))
    }

    /// Back off from a replica whose failure means it is gone.
    async fn note_failure<T>(&self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if let Err(e) = &result {
            if e.is_replica_down() {
                tracing::debug!(replica = %self.label, "marking replica down: {}", e);
                self.state.lock().await.mark_down();
            }
        }
        result
    }
}

#[async_trait]
impl ReplicaLink for QuicLink {
    fn label(&self) -> &str {
        &self.label
    }

    async fn join(&self, participant_id: &str) -> Result<Box<dyn EventStream>, ClientError> {
        let result = match self.open_stream().await {
            Ok((recv, send)) => join_over(&self.label, recv, send, participant_id).await,
            Err(e) => Err(e),
        };
        self.note_failure(result).await
    }

    async fn publish(&self, event: &Event) -> Result<Ack, ClientError> {
        let result = match self.open_stream().await {
            Ok((recv, send)) => publish_over(&self.label, recv, send, event).await,
            Err(e) => Err(e),
        };
        self.note_failure(result).await
    }
}

impl std::fmt::Debug for QuicLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuicLink").field("replica", &self.label).finish_non_exhaustive()
    }
}

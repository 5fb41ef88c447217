//! QUIC transport for a replica.
//!
//! One QUIC connection per client; every Join or Publish runs on its own
//! bidirectional stream, so a client's long-lived subscription and its
//! publishes never block each other.

use std::{fs::File, io::BufReader, net::SocketAddr, path::Path};

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::error::ServerError;

/// Certificate chain and private key for the replica endpoint.
pub type TlsMaterial = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

/// Load PEM material when both paths are given, otherwise generate a
/// self-signed certificate for `localhost`.
pub fn load_tls_material(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<TlsMaterial, ServerError> {
    match (cert_path, key_path) {
        (Some(cert), Some(key)) => load_pem(Path::new(cert), Path::new(key)),
        (None, None) => self_signed(),
        _ => Err(ServerError::Config(
            "certificate and key must be provided together".to_string(),
        )),
    }
}

fn load_pem(cert_path: &Path, key_path: &Path) -> Result<TlsMaterial, ServerError> {
    let open = |path: &Path| {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| ServerError::Config(format!("cannot open {}: {}", path.display(), e)))
    };

    let certs = rustls_pemfile::certs(&mut open(cert_path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("invalid certificate PEM: {}", e)))?;
    if certs.is_empty() {
        return Err(ServerError::Config(format!(
            "no certificate found in {}",
            cert_path.display()
        )));
    }

    let key = rustls_pemfile::private_key(&mut open(key_path)?)
        .map_err(|e| ServerError::Config(format!("invalid key PEM: {}", e)))?
        .ok_or_else(|| {
            ServerError::Config(format!("no private key found in {}", key_path.display()))
        })?;

    Ok((certs, key))
}

fn self_signed() -> Result<TlsMaterial, ServerError> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .map_err(|e| ServerError::Internal(format!("certificate generation failed: {}", e)))?;

    let key = PrivatePkcs8KeyDer::from(key_pair.serialize_der());
    Ok((vec![cert.der().clone()], key.into()))
}

/// QUIC endpoint accepting client connections.
pub struct QuinnTransport {
    endpoint: quinn::Endpoint,
}

impl QuinnTransport {
    /// Bind a server endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The address does not parse
    /// - TLS material is missing or invalid
    /// - Binding the UDP socket fails
    pub fn bind(
        bind_address: &str,
        cert_path: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = bind_address.parse().map_err(|e| {
            ServerError::Config(format!("invalid bind address {}: {}", bind_address, e))
        })?;

        let (certs, key) = load_tls_material(cert_path, key_path)?;
        let server_config = quinn::ServerConfig::with_single_cert(certs, key)
            .map_err(|e| ServerError::Config(format!("TLS configuration rejected: {}", e)))?;

        let endpoint = quinn::Endpoint::server(server_config, addr)?;
        Ok(Self { endpoint })
    }

    /// Wait for the next incoming connection. `None` once the endpoint is
    /// closed.
    pub async fn accept(&self) -> Option<quinn::Incoming> {
        self.endpoint.accept().await
    }

    /// Local address the endpoint is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Stop accepting and close every connection.
    pub fn close(&self) {
        self.endpoint.close(0u32.into(), b"replica shutting down");
    }

    /// Wait until every connection has been cleanly shut down.
    pub async fn wait_idle(&self) {
        self.endpoint.wait_idle().await;
    }
}

impl std::fmt::Debug for QuinnTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuinnTransport").field("local_addr", &self.endpoint.local_addr().ok()).finish()
    }
}

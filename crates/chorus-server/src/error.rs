//! Replica runtime errors.

use chorus_core::RpcError;
use thiserror::Error;

/// Errors that can occur in the replica runtime.
///
/// Only [`ServerError::Config`] (bad bind address or TLS material) stops the
/// binary. Per-connection errors are logged by the accept loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bad address, unreadable or invalid TLS material.
    #[error("configuration error: {0}")]
    Config(String),

    /// QUIC or socket failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Failure with no outside cause, such as the OS refusing randomness.
    #[error("internal error: {0}")]
    Internal(String),

    /// A Join or Publish stream failed.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<quinn::ConnectionError> for ServerError {
    fn from(err: quinn::ConnectionError) -> Self {
        Self::Transport(err.to_string())
    }
}

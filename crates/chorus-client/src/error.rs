//! Client error types.

use chorus_core::RpcError;
use chorus_proto::ProtocolError;
use thiserror::Error;

/// Errors from talking to one replica.
///
/// None of these stop the client; the fan-out logs them per replica and keeps
/// going with the rest.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Replica could not be reached.
    #[error("replica {replica} unavailable: {reason}")]
    ConnectionUnavailable {
        /// Replica label (usually its address).
        replica: String,
        /// Why the connection failed.
        reason: String,
    },

    /// Stream ended where a response was expected.
    #[error("replica {replica} ended the stream")]
    StreamTerminated {
        /// Replica label.
        replica: String,
    },

    /// Replica answered with an error.
    #[error("replica {replica} refused: {message}")]
    Rejected {
        /// Replica label.
        replica: String,
        /// Error text sent by the replica.
        message: String,
    },

    /// Replica sent something we could not decode.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Stream I/O failed after the connection was up.
    #[error("transport error on {replica}: {reason}")]
    Transport {
        /// Replica label.
        replica: String,
        /// Description of the failure.
        reason: String,
    },
}

impl ClientError {
    /// Attach a replica label to a stream RPC failure.
    pub fn from_rpc(replica: &str, err: RpcError) -> Self {
        let replica = replica.to_string();
        match err {
            RpcError::Protocol(e) => Self::Protocol(e),
            RpcError::StreamTerminated => Self::StreamTerminated { replica },
            RpcError::Remote(message) => Self::Rejected { replica, message },
            RpcError::UnexpectedResponse(expected) => {
                Self::Transport { replica, reason: format!("unexpected response, expected {expected}") }
            },
            RpcError::Io(e) => Self::Transport { replica, reason: e.to_string() },
        }
    }

    /// Returns true if the replica itself looks gone rather than unhappy
    /// with one request.
    pub fn is_replica_down(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnavailable { .. } | Self::StreamTerminated { .. } | Self::Transport { .. }
        )
    }
}

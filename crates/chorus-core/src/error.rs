//! Core error types.

use chorus_proto::{EventKind, ProtocolError};
use thiserror::Error;

use crate::{engine::EngineMode, registry::DeliveryFailure};

/// Session registry failures. Both are contained by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Unicast target is not currently admitted.
    #[error("no such session: {participant_id}")]
    NoSuchSession {
        /// Target participant.
        participant_id: String,
    },

    /// Sending to the session's queue failed; the session has been removed.
    #[error("delivery to {participant_id} failed: {reason}")]
    DeliveryFailed {
        /// Participant whose session failed.
        participant_id: String,
        /// What went wrong.
        reason: DeliveryFailure,
    },
}

/// Errors from [`BroadcastEngine`](crate::BroadcastEngine) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Event kind is not served by this replica's mode.
    #[error("{kind:?} events are not accepted by a {mode} replica")]
    UnsupportedKind {
        /// Kind received.
        kind: EventKind,
        /// Replica mode.
        mode: EngineMode,
    },

    /// Event is malformed for its kind.
    #[error("invalid event: {0}")]
    InvalidEvent(&'static str),

    /// Participant identity is unusable.
    #[error("invalid participant id: {0:?}")]
    InvalidParticipant(String),

    /// Welcome could not be delivered on the new session.
    #[error("session admission failed: {0}")]
    Admission(#[from] RegistryError),
}

/// Errors from running an RPC over a byte stream.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Frame or message could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream ended where a frame was expected.
    #[error("stream terminated")]
    StreamTerminated,

    /// Replica answered with an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// Replica answered with the wrong kind of response.
    #[error("unexpected response: expected {0}")]
    UnexpectedResponse(&'static str),
}

//! Request and response messages.
//!
//! Each message maps to one opcode and a CBOR body. One RPC runs per
//! bidirectional stream: the caller writes a single [`Request`], the replica
//! answers with one or more [`Response`] frames.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    error::ProtocolError,
    event::Event,
    frame::{Frame, Opcode},
};

/// Publish acknowledgment.
///
/// Carries only whether the event went through, never derived data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// `false` when a bid was rejected or arrived after the auction closed.
    pub accepted: bool,
}

impl Ack {
    /// Accepted acknowledgment.
    pub const ACCEPTED: Self = Self { accepted: true };

    /// Rejected acknowledgment.
    pub const REJECTED: Self = Self { accepted: false };
}

#[derive(Serialize, Deserialize)]
struct JoinBody {
    participant_id: String,
}

#[derive(Serialize, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Caller to replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Open a long-lived subscription.
    Join {
        /// Participant identity, unique per replica.
        participant_id: String,
    },
    /// Submit one event.
    Publish(Event),
}

/// Replica to caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Event pushed on a subscription.
    Event(Event),
    /// Publish acknowledgment.
    Ack(Ack),
    /// Request could not be served.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| ProtocolError::Cbor(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Cbor(e.to_string()))
}

impl Request {
    /// Serialize into a frame.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        match self {
            Self::Join { participant_id } => Ok(Frame::new(
                Opcode::Join,
                to_cbor(&JoinBody { participant_id: participant_id.clone() })?,
            )),
            Self::Publish(event) => Ok(Frame::new(Opcode::Publish, to_cbor(event)?)),
        }
    }

    /// Parse from a frame.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        match frame.opcode() {
            Some(Opcode::Join) => {
                let body: JoinBody = from_cbor(&frame.payload)?;
                Ok(Self::Join { participant_id: body.participant_id })
            },
            Some(Opcode::Publish) => Ok(Self::Publish(from_cbor(&frame.payload)?)),
            _ => Err(ProtocolError::UnexpectedOpcode {
                opcode: frame.header.opcode(),
                expected: "request",
            }),
        }
    }
}

impl Response {
    /// Serialize into a frame.
    pub fn to_frame(&self) -> Result<Frame, ProtocolError> {
        match self {
            Self::Event(event) => Ok(Frame::new(Opcode::Event, to_cbor(event)?)),
            Self::Ack(ack) => Ok(Frame::new(Opcode::Ack, to_cbor(ack)?)),
            Self::Error { message } => {
                Ok(Frame::new(Opcode::Error, to_cbor(&ErrorBody { message: message.clone() })?))
            },
        }
    }

    /// Parse from a frame.
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        match frame.opcode() {
            Some(Opcode::Event) => Ok(Self::Event(from_cbor(&frame.payload)?)),
            Some(Opcode::Ack) => Ok(Self::Ack(from_cbor(&frame.payload)?)),
            Some(Opcode::Error) => {
                let body: ErrorBody = from_cbor(&frame.payload)?;
                Ok(Self::Error { message: body.message })
            },
            _ => Err(ProtocolError::UnexpectedOpcode {
                opcode: frame.header.opcode(),
                expected: "response",
            }),
        }
    }
}

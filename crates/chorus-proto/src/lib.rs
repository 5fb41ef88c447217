//! Chorus wire protocol.
//!
//! Value types shared by replicas and clients, plus the frame codec used on
//! every transport.
//!
//! # Components
//!
//! - [`Event`]: the unit fanned out to sessions
//! - [`Notice`]: replica-originated announcements
//! - [`Request`] / [`Response`]: the two RPCs (`Join`, `Publish`) and their
//!   replies
//! - [`Frame`] / [`FrameHeader`]: 8-byte header + CBOR payload

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod frame;
mod message;

pub use error::ProtocolError;
pub use event::{Event, EventKind, Notice, Payload, SERVER_SENDER};
pub use frame::{Frame, FrameHeader, Opcode};
pub use message::{Ack, Request, Response};

/// First port of the conventional local replica layout.
pub const BASE_PORT: u16 = 5000;

/// Loopback address of replica `index` (`127.0.0.1:5000 + index`).
pub fn replica_address(index: u16) -> String {
    format!("127.0.0.1:{}", BASE_PORT.saturating_add(index))
}

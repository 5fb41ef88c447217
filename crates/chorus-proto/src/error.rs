//! Protocol error types.

use thiserror::Error;

/// Errors produced while encoding or decoding frames and messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Frame does not start with the Chorus magic number.
    #[error("bad magic: {0:#06x}")]
    BadMagic(u16),

    /// Peer speaks a protocol version we do not.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Opcode byte is not assigned.
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),

    /// Payload exceeds the frame limit.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Announced or actual size.
        size: u32,
        /// Configured limit.
        max: u32,
    },

    /// Not enough bytes for the header or the announced payload.
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// CBOR body could not be (de)serialized.
    #[error("CBOR error: {0}")]
    Cbor(String),

    /// Valid frame, wrong direction or position in the exchange.
    #[error("unexpected opcode {opcode} (expected {expected})")]
    UnexpectedOpcode {
        /// Raw opcode received.
        opcode: u8,
        /// What the reader was waiting for.
        expected: &'static str,
    },
}

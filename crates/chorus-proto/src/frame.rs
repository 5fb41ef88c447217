//! Frame layout.
//!
//! ```text
//! 0       2         3        4                8
//! +-------+---------+--------+----------------+----------------+
//! | magic | version | opcode | payload_size   | CBOR payload   |
//! | u16be | u8      | u8     | u32be          | payload_size B |
//! +-------+---------+--------+----------------+----------------+
//! ```
//!
//! The header is parsed zero-copy; the payload is opaque to this module.

use bytes::Bytes;
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::{BigEndian, U16, U32},
};

use crate::error::ProtocolError;

/// Operation carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Subscribe to a replica's events.
    Join = 1,
    /// Submit one event.
    Publish = 2,
    /// One event pushed on a subscription.
    Event = 3,
    /// Publish acknowledgment.
    Ack = 4,
    /// Request failed.
    Error = 5,
}

impl Opcode {
    /// Parse a raw opcode byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Join),
            2 => Some(Self::Publish),
            3 => Some(Self::Event),
            4 => Some(Self::Ack),
            5 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Fixed 8-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    magic: U16<BigEndian>,
    version: u8,
    opcode: u8,
    payload_size: U32<BigEndian>,
}

impl FrameHeader {
    /// Header size in bytes.
    pub const SIZE: usize = 8;

    /// Magic number at the start of every frame.
    pub const MAGIC: u16 = 0xC0A5;

    /// Current protocol version.
    pub const VERSION: u8 = 1;

    /// Largest payload a peer may announce.
    pub const MAX_PAYLOAD_SIZE: u32 = 64 * 1024;

    /// Create a header for `opcode` with an empty payload.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: U16::new(Self::MAGIC),
            version: Self::VERSION,
            opcode: opcode as u8,
            payload_size: U32::new(0),
        }
    }

    /// Parse and validate a header from the first [`Self::SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let prefix = bytes.get(..Self::SIZE).ok_or(ProtocolError::Truncated {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        let header = Self::read_from_bytes(prefix)
            .map_err(|_| ProtocolError::Truncated { expected: Self::SIZE, actual: bytes.len() })?;
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.magic.get() != Self::MAGIC {
            return Err(ProtocolError::BadMagic(self.magic.get()));
        }
        if self.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        if self.opcode_enum().is_none() {
            return Err(ProtocolError::UnknownOpcode(self.opcode));
        }
        let size = self.payload_size.get();
        if size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size, max: Self::MAX_PAYLOAD_SIZE });
        }
        Ok(())
    }

    /// Raw opcode byte.
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Parsed opcode.
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    /// Announced payload size in bytes.
    pub fn payload_size(&self) -> u32 {
        self.payload_size.get()
    }

    fn set_payload_size(&mut self, size: u32) {
        self.payload_size = U32::new(size);
    }
}

/// A header plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame header.
    pub header: FrameHeader,
    /// CBOR payload.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame; the header's payload size is taken from `payload`.
    ///
    /// Oversized payloads are caught by [`Frame::encode`].
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let mut header = FrameHeader::new(opcode);
        header.set_payload_size(u32::try_from(payload.len()).unwrap_or(u32::MAX));
        Self { header, payload }
    }

    /// Opcode of this frame. Always valid for frames built or decoded here.
    pub fn opcode(&self) -> Option<Opcode> {
        self.header.opcode_enum()
    }

    /// Append the encoded frame to `dst`.
    pub fn encode(&self, dst: &mut Vec<u8>) -> Result<(), ProtocolError> {
        let size = self.header.payload_size();
        if size > FrameHeader::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge { size, max: FrameHeader::MAX_PAYLOAD_SIZE });
        }
        dst.reserve(FrameHeader::SIZE + self.payload.len());
        dst.extend_from_slice(self.header.as_bytes());
        dst.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Decode exactly one frame from `bytes`.
    ///
    /// Trailing bytes beyond the announced payload are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let header = FrameHeader::from_bytes(bytes)?;
        let end = FrameHeader::SIZE + header.payload_size() as usize;
        let payload = bytes
            .get(FrameHeader::SIZE..end)
            .ok_or(ProtocolError::Truncated { expected: end, actual: bytes.len() })?;
        Ok(Self { header, payload: Bytes::copy_from_slice(payload) })
    }
}

//! Direct TCP framing
//!
//! Every SMB2 message on port 445 is preceded by a 4-byte header: a zero
//! type byte and a 24-bit big-endian length. Type 0x85 (session keepalive,
//! inherited from NetBIOS) carries no payload and is skipped by readers.

use crate::error::{Error, Result};
use crate::protocol::buffer::{Buffer, Endian};
use crate::protocol::smb2_constants::MAX_DIRECT_TCP_FRAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Message,
    Keepalive,
}

/// Direct TCP frame header (4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    /// Length of the payload that follows
    pub length: u32,
}

impl FrameHeader {
    /// Header size in bytes
    pub const SIZE: usize = 4;

    const MESSAGE_TYPE: u8 = 0x00;
    const KEEPALIVE_TYPE: u8 = 0x85;

    /// Create a message header
    pub fn message(length: usize) -> Result<Self> {
        if length > MAX_DIRECT_TCP_FRAME {
            return Err(Error::InvalidParameter(format!(
                "frame length {} exceeds maximum {}",
                length, MAX_DIRECT_TCP_FRAME
            )));
        }
        Ok(Self {
            kind: FrameKind::Message,
            length: length as u32,
        })
    }

    /// Parse a header from its 4 bytes
    pub fn parse(bytes: [u8; 4]) -> Result<Self> {
        let mut buf = Buffer::from_slice(&bytes);
        let word = buf.read_u32(Endian::Big)?;
        let kind = match (word >> 24) as u8 {
            Self::MESSAGE_TYPE => FrameKind::Message,
            Self::KEEPALIVE_TYPE => FrameKind::Keepalive,
            other => {
                return Err(Error::DecodeFailure(format!(
                    "unexpected direct TCP frame type 0x{:02x}",
                    other
                )))
            }
        };
        Ok(Self {
            kind,
            length: word & 0x00FF_FFFF,
        })
    }

    /// Serialize the header to bytes
    pub fn to_bytes(&self) -> [u8; 4] {
        let kind = match self.kind {
            FrameKind::Message => Self::MESSAGE_TYPE,
            FrameKind::Keepalive => Self::KEEPALIVE_TYPE,
        };
        (((kind as u32) << 24) | (self.length & 0x00FF_FFFF)).to_be_bytes()
    }
}

/// Prefix a packet with its frame header
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let header = FrameHeader::message(payload.len())?;
    let mut out = Vec::with_capacity(FrameHeader::SIZE + payload.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

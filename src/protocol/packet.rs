//! Parsed packets and compound framing
//!
//! A transport frame carries one SMB2 packet or a compound chain of them.
//! Each chained packet starts on an 8-byte boundary and its header's
//! `next_command` gives the distance to the following one. [`Packet`] keeps
//! the exact received bytes so signatures can be verified after decoding.

use super::buffer::Buffer;
use super::header::Smb2Header;
use super::messages::common::{ErrorResponse, SmbMessage};
use super::smb2_constants::{header_offsets, Smb2Command, Smb2HeaderFlags, SMB2_HEADER_SIZE};
use crate::error::{Error, NtStatus, Result};
use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Packet {
    header: Smb2Header,
    payload: Bytes,
    raw: Bytes,
}

impl Packet {
    /// Decode a single packet. `raw` must cover exactly this packet (for a
    /// compound member, including its alignment padding).
    pub fn decode(raw: Bytes) -> Result<Self> {
        if raw.len() < SMB2_HEADER_SIZE {
            return Err(Error::DecodeFailure(format!(
                "packet of {} bytes is shorter than the SMB2 header",
                raw.len()
            )));
        }
        let header = Smb2Header::parse(&raw[..SMB2_HEADER_SIZE])?;
        if header.next_command != 0 && header.next_command as usize > raw.len() {
            return Err(Error::DecodeFailure(format!(
                "next command offset {} exceeds packet length {}",
                header.next_command,
                raw.len()
            )));
        }
        let payload = raw.slice(SMB2_HEADER_SIZE..);
        Ok(Self {
            header,
            payload,
            raw,
        })
    }

    /// Decode every packet in a transport frame
    pub fn decode_frame(frame: Bytes) -> Result<Vec<Self>> {
        split_compound(frame)?
            .into_iter()
            .map(Packet::decode)
            .collect()
    }

    pub fn header(&self) -> &Smb2Header {
        &self.header
    }

    pub fn command(&self) -> Smb2Command {
        self.header.command
    }

    pub fn status(&self) -> NtStatus {
        self.header.status
    }

    pub fn message_id(&self) -> u64 {
        self.header.message_id
    }

    /// Command body following the header
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Bytes exactly as received, the input to signature verification
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Turn an error status into [`Error::ProtocolStatus`]. Success and
    /// warning statuses pass through.
    pub fn into_result(self) -> Result<Self> {
        if self.header.status.is_error() {
            return Err(Error::ProtocolStatus {
                status: self.header.status,
                command: self.header.command,
            });
        }
        Ok(self)
    }

    /// Decode the SMB2 ERROR body carried by a failed response
    pub fn error_response(&self) -> Option<ErrorResponse> {
        if !self.header.status.is_error() {
            return None;
        }
        ErrorResponse::parse(&self.payload).ok()
    }
}

/// Serialize a header and body into one packet
pub fn frame(header: &Smb2Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Buffer::with_capacity(SMB2_HEADER_SIZE + payload.len());
    header.encode(&mut buf);
    buf.put_raw(payload);
    buf.into_vec()
}

/// Split a transport frame into its compound members
pub fn split_compound(frame: Bytes) -> Result<Vec<Bytes>> {
    let mut members = Vec::new();
    let mut offset = 0usize;

    loop {
        let rest = frame.len() - offset;
        if rest < SMB2_HEADER_SIZE {
            return Err(Error::DecodeFailure(format!(
                "compound member at offset {} has only {} bytes",
                offset, rest
            )));
        }
        let at = offset + header_offsets::NEXT_COMMAND;
        let next = u32::from_le_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]])
            as usize;

        if next == 0 {
            members.push(frame.slice(offset..));
            return Ok(members);
        }
        if next < SMB2_HEADER_SIZE || next % 8 != 0 || next > rest {
            return Err(Error::DecodeFailure(format!(
                "invalid next command offset {} at frame offset {}",
                next, offset
            )));
        }
        members.push(frame.slice(offset..offset + next));
        offset += next;
    }
}

/// Chain serialized packets into one compound frame.
///
/// Every member but the last is padded to 8 bytes and gets its
/// `next_command` patched; members after the first are marked related when
/// `related` is set. Signatures must be applied after chaining.
pub fn chain_compound(packets: &[Vec<u8>], related: bool) -> Result<Vec<u8>> {
    if packets.is_empty() {
        return Err(Error::InvalidParameter("empty compound".to_string()));
    }
    let mut out = Buffer::new();
    let last = packets.len() - 1;

    for (index, packet) in packets.iter().enumerate() {
        if packet.len() < SMB2_HEADER_SIZE {
            return Err(Error::InvalidParameter(format!(
                "compound member {} is shorter than a header",
                index
            )));
        }
        let start = out.len();
        out.put_raw(packet);
        if index != last {
            out.align_to(8);
            let next = (out.len() - start) as u32;
            out.patch_u32_le(start + header_offsets::NEXT_COMMAND, next)?;
        }
        if related && index > 0 {
            let flags_at = start + header_offsets::FLAGS;
            let raw = &out.as_slice()[flags_at..flags_at + 4];
            let flags = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
                | Smb2HeaderFlags::RELATED_OPERATIONS.bits();
            out.patch_u32_le(flags_at, flags)?;
        }
    }
    Ok(out.into_vec())
}

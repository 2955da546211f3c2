//! SMB2 packet header
//!
//! The header is always 64 bytes. Bytes 32..40 hold either the process and
//! tree identifiers (sync form) or a single async identifier when the
//! `ASYNC_COMMAND` flag is set.

use super::buffer::Buffer;
use super::smb2_constants::*;
use crate::error::{Error, NtStatus, Result};

/// SMB2 Header structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2Header {
    pub credit_charge: u16,
    pub status: NtStatus,
    pub command: Smb2Command,
    /// Credits requested (client) or granted (server)
    pub credits: u16,
    pub flags: Smb2HeaderFlags,
    pub next_command: u32,
    pub message_id: u64,
    /// Present exactly when the header is in async form
    pub async_id: Option<u64>,
    pub process_id: u32,
    pub tree_id: u32,
    pub session_id: u64,
    pub signature: [u8; 16],
}

impl Smb2Header {
    pub const SIZE: usize = SMB2_HEADER_SIZE;

    pub fn new(command: Smb2Command) -> Self {
        Self {
            credit_charge: 0,
            status: NtStatus::Success,
            command,
            credits: 1,
            flags: Smb2HeaderFlags::empty(),
            next_command: 0,
            message_id: 0,
            async_id: None,
            process_id: 0,
            tree_id: 0,
            session_id: 0,
            signature: [0; 16],
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags.contains(Smb2HeaderFlags::SERVER_TO_REDIR)
    }

    pub fn is_async(&self) -> bool {
        self.async_id.is_some()
    }

    pub fn is_signed(&self) -> bool {
        self.flags.contains(Smb2HeaderFlags::SIGNED)
    }

    /// Interim response: STATUS_PENDING in async form
    pub fn is_interim(&self) -> bool {
        self.status == NtStatus::Pending && self.is_async()
    }

    pub fn encode(&self, buf: &mut Buffer) {
        let mut flags = self.flags;
        flags.set(Smb2HeaderFlags::ASYNC_COMMAND, self.async_id.is_some());

        buf.put_raw(&SMB2_MAGIC)
            .put_u16_le(structure_size::HEADER)
            .put_u16_le(self.credit_charge)
            .put_u32_le(self.status.to_u32())
            .put_u16_le(self.command.to_u16())
            .put_u16_le(self.credits)
            .put_u32_le(flags.bits())
            .put_u32_le(self.next_command)
            .put_u64_le(self.message_id);
        match self.async_id {
            Some(async_id) => {
                buf.put_u64_le(async_id);
            }
            None => {
                buf.put_u32_le(self.process_id).put_u32_le(self.tree_id);
            }
        }
        buf.put_u64_le(self.session_id).put_raw(&self.signature);
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Buffer::with_capacity(Self::SIZE);
        self.encode(&mut buf);
        buf.into_vec()
    }

    pub fn decode(buf: &mut Buffer) -> Result<Self> {
        let magic: [u8; 4] = buf.read_array()?;
        if magic != SMB2_MAGIC {
            return Err(Error::DecodeFailure(format!(
                "invalid SMB2 protocol id {:02x?}",
                magic
            )));
        }
        let structure_size = buf.read_u16_le()?;
        if structure_size != structure_size::HEADER {
            return Err(Error::DecodeFailure(format!(
                "invalid header structure size {}",
                structure_size
            )));
        }

        let credit_charge = buf.read_u16_le()?;
        let status = NtStatus::from_u32(buf.read_u32_le()?);
        let command = Smb2Command::try_from(buf.read_u16_le()?)?;
        let credits = buf.read_u16_le()?;
        let flags = Smb2HeaderFlags::from_bits_retain(buf.read_u32_le()?);
        let next_command = buf.read_u32_le()?;
        let message_id = buf.read_u64_le()?;

        let (async_id, process_id, tree_id) = if flags.contains(Smb2HeaderFlags::ASYNC_COMMAND) {
            (Some(buf.read_u64_le()?), 0, 0)
        } else {
            let process_id = buf.read_u32_le()?;
            let tree_id = buf.read_u32_le()?;
            (None, process_id, tree_id)
        };

        let session_id = buf.read_u64_le()?;
        let signature = buf.read_array()?;

        Ok(Self {
            credit_charge,
            status,
            command,
            credits,
            flags,
            next_command,
            message_id,
            async_id,
            process_id,
            tree_id,
            session_id,
            signature,
        })
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Self::decode(&mut Buffer::from_slice(bytes))
    }
}

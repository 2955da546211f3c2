//! Oplock and lease break notifications
//!
//! Both arrive as command `OplockBreak` with message id `u64::MAX`; the body
//! structure size tells them apart.

use super::common::{expect_structure_size, FileId, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::buffer::Buffer;
use crate::protocol::smb2_constants::structure_size;

/// Oplock break notification, also the layout of the acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smb2OplockBreak {
    pub oplock_level: u8,
    pub file_id: FileId,
}

impl SmbMessage for Smb2OplockBreak {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut buf = Buffer::from_slice(body);
        expect_structure_size(
            &mut buf,
            structure_size::OPLOCK_BREAK_NOTIFICATION,
            "oplock break",
        )?;
        let oplock_level = buf.read_u8()?;
        buf.skip(5)?;
        let file_id = FileId::decode(&mut buf)?;
        Ok(Self {
            oplock_level,
            file_id,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Buffer::with_capacity(24);
        buf.put_u16_le(structure_size::OPLOCK_BREAK_ACK)
            .put_u8(self.oplock_level)
            .put_reserved(5);
        self.file_id.encode(&mut buf);
        buf.into_vec()
    }
}

/// Lease break notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smb2LeaseBreak {
    pub new_epoch: u16,
    pub flags: u32,
    pub lease_key: [u8; 16],
    pub current_lease_state: u32,
    pub new_lease_state: u32,
}

impl SmbMessage for Smb2LeaseBreak {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut buf = Buffer::from_slice(body);
        expect_structure_size(
            &mut buf,
            structure_size::LEASE_BREAK_NOTIFICATION,
            "lease break",
        )?;
        let new_epoch = buf.read_u16_le()?;
        let flags = buf.read_u32_le()?;
        let lease_key = buf.read_array()?;
        let current_lease_state = buf.read_u32_le()?;
        let new_lease_state = buf.read_u32_le()?;
        // BreakReason, AccessMaskHint, ShareMaskHint are reserved
        buf.skip(12)?;
        Ok(Self {
            new_epoch,
            flags,
            lease_key,
            current_lease_state,
            new_lease_state,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Buffer::with_capacity(44);
        buf.put_u16_le(structure_size::LEASE_BREAK_NOTIFICATION)
            .put_u16_le(self.new_epoch)
            .put_u32_le(self.flags)
            .put_raw(&self.lease_key)
            .put_u32_le(self.current_lease_state)
            .put_u32_le(self.new_lease_state)
            .put_reserved(12);
        buf.into_vec()
    }
}

/// A decoded server-initiated break
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakNotification {
    Oplock(Smb2OplockBreak),
    Lease(Smb2LeaseBreak),
}

impl BreakNotification {
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < 2 {
            return Err(Error::BufferUnderrun {
                need: 2,
                have: body.len(),
            });
        }
        match u16::from_le_bytes([body[0], body[1]]) {
            structure_size::OPLOCK_BREAK_NOTIFICATION => {
                Smb2OplockBreak::parse(body).map(BreakNotification::Oplock)
            }
            structure_size::LEASE_BREAK_NOTIFICATION => {
                Smb2LeaseBreak::parse(body).map(BreakNotification::Lease)
            }
            other => Err(Error::DecodeFailure(format!(
                "unknown break structure size {}",
                other
            ))),
        }
    }
}

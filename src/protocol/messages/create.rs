//! SMB2 Create envelope
//!
//! Only the fields needed to open a handle and observe oplock grants.
//! Create contexts are carried as opaque bytes.

use super::common::{body_field, expect_structure_size, FileId, SmbMessage};
use crate::error::Result;
use crate::protocol::buffer::{Buffer, Charset};
use crate::protocol::smb2_constants::{
    create_disposition, impersonation_level, oplock_level, structure_size, DesiredAccess,
    ShareAccess, SMB2_HEADER_SIZE,
};

const REQUEST_FIXED_SIZE: usize = 56;

/// SMB2 Create Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2CreateRequest {
    pub requested_oplock_level: u8,
    pub impersonation_level: u32,
    pub desired_access: DesiredAccess,
    pub file_attributes: u32,
    pub share_access: ShareAccess,
    pub create_disposition: u32,
    pub create_options: u32,
    /// Share-relative path without a leading separator
    pub name: String,
}

impl Smb2CreateRequest {
    pub fn open(name: impl Into<String>) -> Self {
        Self {
            requested_oplock_level: oplock_level::NONE,
            impersonation_level: impersonation_level::IMPERSONATION,
            desired_access: DesiredAccess::GENERIC_READ,
            file_attributes: 0,
            share_access: ShareAccess::FILE_SHARE_READ | ShareAccess::FILE_SHARE_WRITE,
            create_disposition: create_disposition::OPEN,
            create_options: 0,
            name: name.into(),
        }
    }

    pub fn with_oplock(mut self, level: u8) -> Self {
        self.requested_oplock_level = level;
        self
    }
}

impl SmbMessage for Smb2CreateRequest {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut buf = Buffer::from_slice(body);
        expect_structure_size(&mut buf, structure_size::CREATE_REQUEST, "create request")?;
        buf.skip(1)?; // SecurityFlags
        let requested_oplock_level = buf.read_u8()?;
        let impersonation_level = buf.read_u32_le()?;
        buf.skip(16)?; // SmbCreateFlags, Reserved
        let desired_access = DesiredAccess::from_bits_retain(buf.read_u32_le()?);
        let file_attributes = buf.read_u32_le()?;
        let share_access = ShareAccess::from_bits_retain(buf.read_u32_le()?);
        let create_disposition = buf.read_u32_le()?;
        let create_options = buf.read_u32_le()?;
        let name_offset = buf.read_u16_le()? as usize;
        let name_length = buf.read_u16_le()? as usize;

        let raw = body_field(body, name_offset, name_length, "create name")?;
        let name = Buffer::from(raw).read_string(name_length, Charset::Utf16Le)?;

        Ok(Self {
            requested_oplock_level,
            impersonation_level,
            desired_access,
            file_attributes,
            share_access,
            create_disposition,
            create_options,
            name,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut name = Buffer::new();
        let name_length = name.put_string(&self.name, Charset::Utf16Le);

        let mut buf = Buffer::with_capacity(REQUEST_FIXED_SIZE + name_length.max(1));
        buf.put_u16_le(structure_size::CREATE_REQUEST)
            .put_u8(0)
            .put_u8(self.requested_oplock_level)
            .put_u32_le(self.impersonation_level)
            .put_reserved(16)
            .put_u32_le(self.desired_access.bits())
            .put_u32_le(self.file_attributes)
            .put_u32_le(self.share_access.bits())
            .put_u32_le(self.create_disposition)
            .put_u32_le(self.create_options)
            .put_u16_le((SMB2_HEADER_SIZE + REQUEST_FIXED_SIZE) as u16)
            .put_u16_le(name_length as u16)
            .put_u32_le(0)
            .put_u32_le(0);
        if name_length == 0 {
            buf.put_reserved(1);
        } else {
            buf.put_raw(name.as_slice());
        }
        buf.into_vec()
    }
}

/// SMB2 Create Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2CreateResponse {
    pub oplock_level: u8,
    pub create_action: u32,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub allocation_size: u64,
    pub end_of_file: u64,
    pub file_attributes: u32,
    pub file_id: FileId,
}

impl Smb2CreateResponse {
    pub fn new(file_id: FileId, oplock_level: u8) -> Self {
        Self {
            oplock_level,
            create_action: 1,
            creation_time: 0,
            last_access_time: 0,
            last_write_time: 0,
            change_time: 0,
            allocation_size: 0,
            end_of_file: 0,
            file_attributes: 0x80,
            file_id,
        }
    }
}

impl SmbMessage for Smb2CreateResponse {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut buf = Buffer::from_slice(body);
        expect_structure_size(&mut buf, structure_size::CREATE_RESPONSE, "create response")?;
        let oplock_level = buf.read_u8()?;
        buf.skip(1)?;
        let create_action = buf.read_u32_le()?;
        let creation_time = buf.read_u64_le()?;
        let last_access_time = buf.read_u64_le()?;
        let last_write_time = buf.read_u64_le()?;
        let change_time = buf.read_u64_le()?;
        let allocation_size = buf.read_u64_le()?;
        let end_of_file = buf.read_u64_le()?;
        let file_attributes = buf.read_u32_le()?;
        buf.skip(4)?;
        let file_id = FileId::decode(&mut buf)?;

        Ok(Self {
            oplock_level,
            create_action,
            creation_time,
            last_access_time,
            last_write_time,
            change_time,
            allocation_size,
            end_of_file,
            file_attributes,
            file_id,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Buffer::with_capacity(89);
        buf.put_u16_le(structure_size::CREATE_RESPONSE)
            .put_u8(self.oplock_level)
            .put_u8(0)
            .put_u32_le(self.create_action)
            .put_u64_le(self.creation_time)
            .put_u64_le(self.last_access_time)
            .put_u64_le(self.last_write_time)
            .put_u64_le(self.change_time)
            .put_u64_le(self.allocation_size)
            .put_u64_le(self.end_of_file)
            .put_u32_le(self.file_attributes)
            .put_reserved(4);
        self.file_id.encode(&mut buf);
        buf.put_u32_le(0).put_u32_le(0).put_reserved(1);
        buf.into_vec()
    }
}

//! SMB2 Tree Connect and Tree Disconnect messages

use super::common::{body_field, expect_structure_size, Smb2EmptyBody, SmbMessage};
use crate::error::Result;
use crate::protocol::buffer::{Buffer, Charset};
use crate::protocol::smb2_constants::{
    structure_size, DesiredAccess, ShareCapabilities, ShareFlags, ShareType, SMB2_HEADER_SIZE,
};

pub type Smb2TreeDisconnectRequest = Smb2EmptyBody;
pub type Smb2TreeDisconnectResponse = Smb2EmptyBody;

const REQUEST_FIXED_SIZE: usize = 8;

/// SMB2 TreeConnect Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2TreeConnectRequest {
    pub flags: u16,
    /// UNC path, e.g. `\\server\share`
    pub path: String,
}

impl Smb2TreeConnectRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            flags: 0,
            path: path.into(),
        }
    }
}

impl SmbMessage for Smb2TreeConnectRequest {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut buf = Buffer::from_slice(body);
        expect_structure_size(
            &mut buf,
            structure_size::TREE_CONNECT_REQUEST,
            "tree connect request",
        )?;
        let flags = buf.read_u16_le()?;
        let path_offset = buf.read_u16_le()? as usize;
        let path_length = buf.read_u16_le()? as usize;

        let raw = body_field(body, path_offset, path_length, "tree connect path")?;
        let path = Buffer::from(raw).read_string(path_length, Charset::Utf16Le)?;

        Ok(Self { flags, path })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut path = Buffer::new();
        let path_length = path.put_string(&self.path, Charset::Utf16Le);

        let mut buf = Buffer::with_capacity(REQUEST_FIXED_SIZE + path_length);
        buf.put_u16_le(structure_size::TREE_CONNECT_REQUEST)
            .put_u16_le(self.flags)
            .put_u16_le((SMB2_HEADER_SIZE + REQUEST_FIXED_SIZE) as u16)
            .put_u16_le(path_length as u16)
            .put_raw(path.as_slice());
        buf.into_vec()
    }
}

/// SMB2 TreeConnect Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2TreeConnectResponse {
    pub share_type: ShareType,
    pub share_flags: ShareFlags,
    pub capabilities: ShareCapabilities,
    pub maximal_access: DesiredAccess,
}

impl Smb2TreeConnectResponse {
    pub fn disk() -> Self {
        Self {
            share_type: ShareType::Disk,
            share_flags: ShareFlags::empty(),
            capabilities: ShareCapabilities::empty(),
            maximal_access: DesiredAccess::GENERIC_ALL,
        }
    }
}

impl SmbMessage for Smb2TreeConnectResponse {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut buf = Buffer::from_slice(body);
        expect_structure_size(
            &mut buf,
            structure_size::TREE_CONNECT_RESPONSE,
            "tree connect response",
        )?;
        let share_type = ShareType::from(buf.read_u8()?);
        buf.skip(1)?;
        let share_flags = ShareFlags::from_bits_retain(buf.read_u32_le()?);
        let capabilities = ShareCapabilities::from_bits_retain(buf.read_u32_le()?);
        let maximal_access = DesiredAccess::from_bits_retain(buf.read_u32_le()?);

        Ok(Self {
            share_type,
            share_flags,
            capabilities,
            maximal_access,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let share_type = match self.share_type {
            ShareType::Disk => 0x01,
            ShareType::Pipe => 0x02,
            ShareType::Print => 0x03,
            ShareType::Unknown(raw) => raw,
        };
        let mut buf = Buffer::with_capacity(16);
        buf.put_u16_le(structure_size::TREE_CONNECT_RESPONSE)
            .put_u8(share_type)
            .put_reserved(1)
            .put_u32_le(self.share_flags.bits())
            .put_u32_le(self.capabilities.bits())
            .put_u32_le(self.maximal_access.bits());
        buf.into_vec()
    }
}

//! SMB2 Session Setup and Logoff messages

use super::common::{body_field, expect_structure_size, Smb2EmptyBody, SmbMessage};
use crate::error::Result;
use crate::protocol::buffer::Buffer;
use crate::protocol::smb2_constants::{
    structure_size, SecurityMode, SessionFlags, Smb2Capabilities, SMB2_HEADER_SIZE,
};

/// LOGOFF carries the four-byte reserved body in both directions
pub type Smb2LogoffRequest = Smb2EmptyBody;
pub type Smb2LogoffResponse = Smb2EmptyBody;

/// Fixed part of the request body, after which the security buffer starts
const REQUEST_FIXED_SIZE: usize = 24;
/// Fixed part of the response body
const RESPONSE_FIXED_SIZE: usize = 8;

/// SMB2 SessionSetup Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2SessionSetupRequest {
    /// SMB2_SESSION_FLAG_BINDING for multichannel binds
    pub flags: u8,
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    pub channel: u32,
    /// Session being re-established after a connection was lost
    pub previous_session_id: u64,
    pub security_blob: Vec<u8>,
}

impl Smb2SessionSetupRequest {
    pub fn new(security_blob: Vec<u8>) -> Self {
        Self {
            flags: 0,
            security_mode: SecurityMode::SIGNING_ENABLED,
            capabilities: Smb2Capabilities::DFS,
            channel: 0,
            previous_session_id: 0,
            security_blob,
        }
    }
}

impl SmbMessage for Smb2SessionSetupRequest {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut buf = Buffer::from_slice(body);
        expect_structure_size(
            &mut buf,
            structure_size::SESSION_SETUP_REQUEST,
            "session setup request",
        )?;

        let flags = buf.read_u8()?;
        let security_mode = SecurityMode::from_bits_truncate(buf.read_u8()? as u16);
        let capabilities = Smb2Capabilities::from_bits_truncate(buf.read_u32_le()?);
        let channel = buf.read_u32_le()?;
        let security_buffer_offset = buf.read_u16_le()? as usize;
        let security_buffer_length = buf.read_u16_le()? as usize;
        let previous_session_id = buf.read_u64_le()?;

        let security_blob = body_field(
            body,
            security_buffer_offset,
            security_buffer_length,
            "session setup security buffer",
        )?;

        Ok(Self {
            flags,
            security_mode,
            capabilities,
            channel,
            previous_session_id,
            security_blob,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Buffer::with_capacity(REQUEST_FIXED_SIZE + self.security_blob.len());
        buf.put_u16_le(structure_size::SESSION_SETUP_REQUEST)
            .put_u8(self.flags)
            .put_u8(self.security_mode.bits() as u8)
            .put_u32_le(self.capabilities.bits())
            .put_u32_le(self.channel)
            .put_u16_le((SMB2_HEADER_SIZE + REQUEST_FIXED_SIZE) as u16)
            .put_u16_le(self.security_blob.len() as u16)
            .put_u64_le(self.previous_session_id);
        if self.security_blob.is_empty() {
            buf.put_reserved(1);
        } else {
            buf.put_raw(&self.security_blob);
        }
        buf.into_vec()
    }
}

/// SMB2 SessionSetup Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2SessionSetupResponse {
    pub session_flags: SessionFlags,
    pub security_blob: Vec<u8>,
}

impl Smb2SessionSetupResponse {
    pub fn new(session_flags: SessionFlags, security_blob: Vec<u8>) -> Self {
        Self {
            session_flags,
            security_blob,
        }
    }

    /// Guest and anonymous sessions are never signed
    pub fn is_guest_or_null(&self) -> bool {
        self.session_flags
            .intersects(SessionFlags::IS_GUEST | SessionFlags::IS_NULL)
    }
}

impl SmbMessage for Smb2SessionSetupResponse {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut buf = Buffer::from_slice(body);
        expect_structure_size(
            &mut buf,
            structure_size::SESSION_SETUP_RESPONSE,
            "session setup response",
        )?;
        let session_flags = SessionFlags::from_bits_truncate(buf.read_u16_le()?);
        let security_buffer_offset = buf.read_u16_le()? as usize;
        let security_buffer_length = buf.read_u16_le()? as usize;

        let security_blob = body_field(
            body,
            security_buffer_offset,
            security_buffer_length,
            "session setup security buffer",
        )?;

        Ok(Self {
            session_flags,
            security_blob,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Buffer::with_capacity(RESPONSE_FIXED_SIZE + self.security_blob.len());
        let offset = if self.security_blob.is_empty() {
            0
        } else {
            (SMB2_HEADER_SIZE + RESPONSE_FIXED_SIZE) as u16
        };
        buf.put_u16_le(structure_size::SESSION_SETUP_RESPONSE)
            .put_u16_le(self.session_flags.bits())
            .put_u16_le(offset)
            .put_u16_le(self.security_blob.len() as u16);
        if self.security_blob.is_empty() {
            buf.put_reserved(1);
        } else {
            buf.put_raw(&self.security_blob);
        }
        buf.into_vec()
    }
}

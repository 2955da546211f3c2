//! Common types and traits for SMB2 messages

use crate::error::{Error, Result};
use crate::protocol::buffer::Buffer;
use crate::protocol::smb2_constants::{structure_size, SMB2_HEADER_SIZE};

/// Trait for SMB2 command bodies that can be parsed from and serialized to
/// bytes. Bodies always follow a 64-byte header, so offsets inside them are
/// measured from the start of the header.
pub trait SmbMessage: Sized {
    /// Parse the body that follows the header
    fn parse(body: &[u8]) -> Result<Self>;

    /// Serialize the body
    fn serialize(&self) -> Vec<u8>;
}

/// Read and check the leading StructureSize field
pub(crate) fn expect_structure_size(buf: &mut Buffer, expected: u16, what: &str) -> Result<()> {
    let size = buf.read_u16_le()?;
    if size != expected {
        return Err(Error::DecodeFailure(format!(
            "invalid {} structure size {} (expected {})",
            what, size, expected
        )));
    }
    Ok(())
}

/// Slice a variable-length field addressed by a header-relative offset
pub(crate) fn body_field(body: &[u8], offset: usize, length: usize, what: &str) -> Result<Vec<u8>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    let start = offset.checked_sub(SMB2_HEADER_SIZE).ok_or_else(|| {
        Error::DecodeFailure(format!("{} offset {} points into the header", what, offset))
    })?;
    body.get(start..start + length)
        .map(|field| field.to_vec())
        .ok_or_else(|| {
            Error::DecodeFailure(format!(
                "{} ({} bytes at {}) extends beyond the message",
                what, length, offset
            ))
        })
}

/// File ID for SMB2 operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileId {
    pub persistent: u64,
    pub volatile: u64,
}

impl FileId {
    pub fn with_values(persistent: u64, volatile: u64) -> Self {
        Self {
            persistent,
            volatile,
        }
    }

    pub fn encode(&self, buf: &mut Buffer) {
        buf.put_u64_le(self.persistent).put_u64_le(self.volatile);
    }

    pub fn decode(buf: &mut Buffer) -> Result<Self> {
        Ok(Self {
            persistent: buf.read_u64_le()?,
            volatile: buf.read_u64_le()?,
        })
    }
}

/// Four-byte body shared by LOGOFF, TREE_DISCONNECT, ECHO and CANCEL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Smb2EmptyBody;

impl SmbMessage for Smb2EmptyBody {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut buf = Buffer::from_slice(body);
        expect_structure_size(&mut buf, structure_size::ECHO, "empty body")?;
        buf.skip(2)?;
        Ok(Self)
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Buffer::with_capacity(4);
        buf.put_u16_le(structure_size::ECHO).put_reserved(2);
        buf.into_vec()
    }
}

/// SMB2 ERROR response body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorResponse {
    pub error_context_count: u8,
    pub error_data: Vec<u8>,
}

impl SmbMessage for ErrorResponse {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut buf = Buffer::from_slice(body);
        expect_structure_size(&mut buf, structure_size::ERROR_RESPONSE, "error response")?;
        let error_context_count = buf.read_u8()?;
        buf.skip(1)?;
        let byte_count = buf.read_u32_le()? as usize;
        let error_data = buf.read_raw(byte_count)?;
        Ok(Self {
            error_context_count,
            error_data,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Buffer::with_capacity(8 + self.error_data.len().max(1));
        buf.put_u16_le(structure_size::ERROR_RESPONSE)
            .put_u8(self.error_context_count)
            .put_reserved(1)
            .put_u32_le(self.error_data.len() as u32);
        if self.error_data.is_empty() {
            // StructureSize 9 counts one byte of ErrorData even when empty
            buf.put_reserved(1);
        } else {
            buf.put_raw(&self.error_data);
        }
        buf.into_vec()
    }
}

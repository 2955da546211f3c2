//! SMB2 Negotiate messages

use super::common::{body_field, expect_structure_size, SmbMessage};
use crate::error::{Error, Result};
use crate::protocol::buffer::Buffer;
use crate::protocol::smb2_constants::{
    hash_algorithm, negotiate_context_type, structure_size, SecurityMode, SigningAlgorithmId,
    Smb2Capabilities, Smb2Dialect, SMB2_HEADER_SIZE,
};
use uuid::Uuid;

/// SMB 3.1.1 Negotiate Context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiateContext {
    PreauthIntegrityCapabilities {
        hash_algorithms: Vec<u16>,
        salt: Vec<u8>,
    },
    SigningCapabilities {
        algorithms: Vec<SigningAlgorithmId>,
    },
    /// Any context type the engine does not interpret
    Other { context_type: u16, data: Vec<u8> },
}

impl NegotiateContext {
    pub fn preauth_sha512(salt: Vec<u8>) -> Self {
        Self::PreauthIntegrityCapabilities {
            hash_algorithms: vec![hash_algorithm::SHA512],
            salt,
        }
    }

    pub fn context_type(&self) -> u16 {
        match self {
            Self::PreauthIntegrityCapabilities { .. } => {
                negotiate_context_type::PREAUTH_INTEGRITY_CAPABILITIES
            }
            Self::SigningCapabilities { .. } => negotiate_context_type::SIGNING_CAPABILITIES,
            Self::Other { context_type, .. } => *context_type,
        }
    }

    fn data(&self) -> Vec<u8> {
        let mut buf = Buffer::new();
        match self {
            Self::PreauthIntegrityCapabilities {
                hash_algorithms,
                salt,
            } => {
                buf.put_u16_le(hash_algorithms.len() as u16)
                    .put_u16_le(salt.len() as u16);
                for algorithm in hash_algorithms {
                    buf.put_u16_le(*algorithm);
                }
                buf.put_raw(salt);
            }
            Self::SigningCapabilities { algorithms } => {
                buf.put_u16_le(algorithms.len() as u16);
                for algorithm in algorithms {
                    buf.put_u16_le(*algorithm as u16);
                }
            }
            Self::Other { data, .. } => {
                buf.put_raw(data);
            }
        }
        buf.into_vec()
    }

    fn encode(&self, buf: &mut Buffer) {
        let data = self.data();
        buf.put_u16_le(self.context_type())
            .put_u16_le(data.len() as u16)
            .put_reserved(4)
            .put_raw(&data);
    }

    fn decode(buf: &mut Buffer) -> Result<Self> {
        let context_type = buf.read_u16_le()?;
        let data_length = buf.read_u16_le()? as usize;
        buf.skip(4)?;
        let mut data = Buffer::from(buf.read_raw(data_length)?);

        match context_type {
            negotiate_context_type::PREAUTH_INTEGRITY_CAPABILITIES => {
                let count = data.read_u16_le()?;
                let salt_length = data.read_u16_le()? as usize;
                let hash_algorithms = (0..count)
                    .map(|_| data.read_u16_le())
                    .collect::<Result<Vec<_>>>()?;
                let salt = data.read_raw(salt_length)?;
                Ok(Self::PreauthIntegrityCapabilities {
                    hash_algorithms,
                    salt,
                })
            }
            negotiate_context_type::SIGNING_CAPABILITIES => {
                let count = data.read_u16_le()?;
                let algorithms = (0..count)
                    .map(|_| data.read_u16_le().and_then(SigningAlgorithmId::try_from))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::SigningCapabilities { algorithms })
            }
            _ => Ok(Self::Other {
                context_type,
                data: data.into_vec(),
            }),
        }
    }
}

/// Write a context list. The first context starts 8-aligned relative to the
/// header; returns the header-relative offset of that first context.
fn encode_contexts(buf: &mut Buffer, contexts: &[NegotiateContext]) -> u32 {
    // Alignment is relative to the header, which is itself 8 bytes long
    buf.align_to(8);
    let offset = (SMB2_HEADER_SIZE + buf.len()) as u32;
    for (index, context) in contexts.iter().enumerate() {
        if index > 0 {
            buf.align_to(8);
        }
        context.encode(buf);
    }
    offset
}

fn decode_contexts(body: &[u8], offset: usize, count: usize) -> Result<Vec<NegotiateContext>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let start = offset.checked_sub(SMB2_HEADER_SIZE).ok_or_else(|| {
        Error::DecodeFailure(format!("negotiate context offset {} is invalid", offset))
    })?;
    let mut buf = Buffer::from_slice(body);
    buf.set_rpos(start)?;

    let mut contexts = Vec::with_capacity(count);
    for index in 0..count {
        if index > 0 {
            let misalignment = buf.rpos() % 8;
            if misalignment != 0 {
                buf.skip(8 - misalignment)?;
            }
        }
        contexts.push(NegotiateContext::decode(&mut buf)?);
    }
    Ok(contexts)
}

/// SMB2 Negotiate Request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2NegotiateRequest {
    pub security_mode: SecurityMode,
    pub capabilities: Smb2Capabilities,
    pub client_guid: Uuid,
    pub dialects: Vec<Smb2Dialect>,
    /// Sent only when 3.1.1 is offered
    pub negotiate_contexts: Vec<NegotiateContext>,
}

impl Smb2NegotiateRequest {
    pub fn new(dialects: Vec<Smb2Dialect>) -> Self {
        Self {
            security_mode: SecurityMode::SIGNING_ENABLED,
            capabilities: Smb2Capabilities::empty(),
            client_guid: Uuid::new_v4(),
            dialects,
            negotiate_contexts: Vec::new(),
        }
    }

    pub fn with_contexts(mut self, contexts: Vec<NegotiateContext>) -> Self {
        self.negotiate_contexts = contexts;
        self
    }

    pub fn offers_smb311(&self) -> bool {
        self.dialects.contains(&Smb2Dialect::Smb311)
    }
}

impl SmbMessage for Smb2NegotiateRequest {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut buf = Buffer::from_slice(body);
        expect_structure_size(&mut buf, structure_size::NEGOTIATE_REQUEST, "negotiate request")?;

        let dialect_count = buf.read_u16_le()?;
        let security_mode = SecurityMode::from_bits_truncate(buf.read_u16_le()?);
        buf.skip(2)?;
        let capabilities = Smb2Capabilities::from_bits_truncate(buf.read_u32_le()?);
        let client_guid = Uuid::from_bytes_le(buf.read_array()?);
        let context_offset = buf.read_u32_le()? as usize;
        let context_count = buf.read_u16_le()? as usize;
        buf.skip(2)?;

        let dialects = (0..dialect_count)
            .map(|_| buf.read_u16_le().and_then(Smb2Dialect::try_from))
            .collect::<Result<Vec<_>>>()?;

        let negotiate_contexts = if dialects.contains(&Smb2Dialect::Smb311) {
            decode_contexts(body, context_offset, context_count)?
        } else {
            Vec::new()
        };

        Ok(Self {
            security_mode,
            capabilities,
            client_guid,
            dialects,
            negotiate_contexts,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Buffer::new();
        buf.put_u16_le(structure_size::NEGOTIATE_REQUEST)
            .put_u16_le(self.dialects.len() as u16)
            .put_u16_le(self.security_mode.bits())
            .put_reserved(2)
            .put_u32_le(self.capabilities.bits())
            .put_raw(&self.client_guid.to_bytes_le());

        // ClientStartTime, or context offset/count when 3.1.1 is offered
        let context_offset_at = buf.len();
        buf.put_u32_le(0)
            .put_u16_le(0)
            .put_reserved(2);

        for dialect in &self.dialects {
            buf.put_u16_le(dialect.to_u16());
        }

        if self.offers_smb311() && !self.negotiate_contexts.is_empty() {
            let offset = encode_contexts(&mut buf, &self.negotiate_contexts);
            // Positions were written above, so patching cannot fail
            let _ = buf.patch_u32_le(context_offset_at, offset);
            let _ = buf.patch_u16_le(context_offset_at + 4, self.negotiate_contexts.len() as u16);
        }

        buf.into_vec()
    }
}

/// SMB2 Negotiate Response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smb2NegotiateResponse {
    pub security_mode: SecurityMode,
    pub dialect_revision: Smb2Dialect,
    pub server_guid: Uuid,
    pub capabilities: Smb2Capabilities,
    pub max_transact_size: u32,
    pub max_read_size: u32,
    pub max_write_size: u32,
    pub system_time: u64,
    pub server_start_time: u64,
    pub security_blob: Vec<u8>,
    pub negotiate_contexts: Vec<NegotiateContext>,
}

impl Smb2NegotiateResponse {
    pub fn new(dialect: Smb2Dialect) -> Self {
        Self {
            security_mode: SecurityMode::SIGNING_ENABLED,
            dialect_revision: dialect,
            server_guid: Uuid::new_v4(),
            capabilities: Smb2Capabilities::empty(),
            max_transact_size: 1048576,
            max_read_size: 1048576,
            max_write_size: 1048576,
            system_time: 0,
            server_start_time: 0,
            security_blob: Vec::new(),
            negotiate_contexts: Vec::new(),
        }
    }

    /// Signing algorithm selected by the server, if it sent the context
    pub fn signing_algorithm(&self) -> Option<SigningAlgorithmId> {
        self.negotiate_contexts.iter().find_map(|context| match context {
            NegotiateContext::SigningCapabilities { algorithms } => algorithms.first().copied(),
            _ => None,
        })
    }

    /// Preauth hash algorithm selected by the server
    pub fn preauth_hash_algorithm(&self) -> Option<u16> {
        self.negotiate_contexts.iter().find_map(|context| match context {
            NegotiateContext::PreauthIntegrityCapabilities {
                hash_algorithms, ..
            } => hash_algorithms.first().copied(),
            _ => None,
        })
    }
}

impl SmbMessage for Smb2NegotiateResponse {
    fn parse(body: &[u8]) -> Result<Self> {
        let mut buf = Buffer::from_slice(body);
        expect_structure_size(
            &mut buf,
            structure_size::NEGOTIATE_RESPONSE,
            "negotiate response",
        )?;

        let security_mode = SecurityMode::from_bits_truncate(buf.read_u16_le()?);
        let dialect_revision = Smb2Dialect::try_from(buf.read_u16_le()?)?;
        let context_count = buf.read_u16_le()? as usize;
        let server_guid = Uuid::from_bytes_le(buf.read_array()?);
        let capabilities = Smb2Capabilities::from_bits_truncate(buf.read_u32_le()?);
        let max_transact_size = buf.read_u32_le()?;
        let max_read_size = buf.read_u32_le()?;
        let max_write_size = buf.read_u32_le()?;
        let system_time = buf.read_u64_le()?;
        let server_start_time = buf.read_u64_le()?;
        let security_buffer_offset = buf.read_u16_le()? as usize;
        let security_buffer_length = buf.read_u16_le()? as usize;
        let context_offset = buf.read_u32_le()? as usize;

        let security_blob = body_field(
            body,
            security_buffer_offset,
            security_buffer_length,
            "negotiate security buffer",
        )?;

        let negotiate_contexts = if dialect_revision == Smb2Dialect::Smb311 {
            decode_contexts(body, context_offset, context_count)?
        } else {
            Vec::new()
        };

        Ok(Self {
            security_mode,
            dialect_revision,
            server_guid,
            capabilities,
            max_transact_size,
            max_read_size,
            max_write_size,
            system_time,
            server_start_time,
            security_blob,
            negotiate_contexts,
        })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut buf = Buffer::new();
        let with_contexts =
            self.dialect_revision == Smb2Dialect::Smb311 && !self.negotiate_contexts.is_empty();

        buf.put_u16_le(structure_size::NEGOTIATE_RESPONSE)
            .put_u16_le(self.security_mode.bits())
            .put_u16_le(self.dialect_revision.to_u16())
            .put_u16_le(if with_contexts {
                self.negotiate_contexts.len() as u16
            } else {
                0
            })
            .put_raw(&self.server_guid.to_bytes_le())
            .put_u32_le(self.capabilities.bits())
            .put_u32_le(self.max_transact_size)
            .put_u32_le(self.max_read_size)
            .put_u32_le(self.max_write_size)
            .put_u64_le(self.system_time)
            .put_u64_le(self.server_start_time);

        let blob_offset = if self.security_blob.is_empty() {
            0
        } else {
            (SMB2_HEADER_SIZE + 64) as u16
        };
        buf.put_u16_le(blob_offset)
            .put_u16_le(self.security_blob.len() as u16);
        let context_offset_at = buf.len();
        buf.put_u32_le(0).put_raw(&self.security_blob);

        if with_contexts {
            let offset = encode_contexts(&mut buf, &self.negotiate_contexts);
            let _ = buf.patch_u32_le(context_offset_at, offset);
        } else if self.security_blob.is_empty() {
            // StructureSize 65 counts one byte of the variable buffer
            buf.put_reserved(1);
        }

        buf.into_vec()
    }
}

//! Growable byte buffer with an explicit read cursor
//!
//! Every SMB2 structure is encoded and decoded through [`Buffer`]. Writes
//! append at the end; reads advance a cursor that belongs to the buffer, so
//! unrelated buffers never share position state. Reads that need more bytes
//! than remain fail with [`Error::BufferUnderrun`] instead of panicking.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Byte order for multi-byte integers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// Character encoding of a string field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// UTF-16LE, two bytes per code unit
    Utf16Le,
    /// UTF-8 (ASCII-compatible), one byte per unit
    Utf8,
}

impl Charset {
    fn unit_size(self) -> usize {
        match self {
            Charset::Utf16Le => 2,
            Charset::Utf8 => 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    data: Vec<u8>,
    rpos: usize,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            rpos: 0,
        }
    }

    /// Wrap existing bytes for reading. The bytes are copied.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            rpos: 0,
        }
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current read position
    pub fn rpos(&self) -> usize {
        self.rpos
    }

    /// Move the read cursor to an absolute position
    pub fn set_rpos(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::BufferUnderrun {
                need: pos,
                have: self.data.len(),
            });
        }
        self.rpos = pos;
        Ok(())
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.rpos
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    // ---- encoding ----

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.data.push(value);
        self
    }

    pub fn put_u16(&mut self, value: u16, order: Endian) -> &mut Self {
        let mut raw = [0u8; 2];
        match order {
            Endian::Little => LittleEndian::write_u16(&mut raw, value),
            Endian::Big => BigEndian::write_u16(&mut raw, value),
        }
        self.data.extend_from_slice(&raw);
        self
    }

    pub fn put_u32(&mut self, value: u32, order: Endian) -> &mut Self {
        let mut raw = [0u8; 4];
        match order {
            Endian::Little => LittleEndian::write_u32(&mut raw, value),
            Endian::Big => BigEndian::write_u32(&mut raw, value),
        }
        self.data.extend_from_slice(&raw);
        self
    }

    pub fn put_u64(&mut self, value: u64, order: Endian) -> &mut Self {
        let mut raw = [0u8; 8];
        match order {
            Endian::Little => LittleEndian::write_u64(&mut raw, value),
            Endian::Big => BigEndian::write_u64(&mut raw, value),
        }
        self.data.extend_from_slice(&raw);
        self
    }

    /// Little-endian shorthands, the SMB2 wire default
    pub fn put_u16_le(&mut self, value: u16) -> &mut Self {
        self.put_u16(value, Endian::Little)
    }

    pub fn put_u32_le(&mut self, value: u32) -> &mut Self {
        self.put_u32(value, Endian::Little)
    }

    pub fn put_u64_le(&mut self, value: u64) -> &mut Self {
        self.put_u64(value, Endian::Little)
    }

    pub fn put_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    /// Append `count` zero bytes
    pub fn put_reserved(&mut self, count: usize) -> &mut Self {
        self.data.resize(self.data.len() + count, 0);
        self
    }

    /// Zero-pad until the length is a multiple of `alignment`
    pub fn align_to(&mut self, alignment: usize) -> &mut Self {
        let rem = self.data.len() % alignment;
        if rem != 0 {
            self.put_reserved(alignment - rem);
        }
        self
    }

    /// Append a string without any length or terminator. Returns the byte
    /// length written; the caller records it wherever the structure wants it.
    pub fn put_string(&mut self, value: &str, charset: Charset) -> usize {
        let start = self.data.len();
        match charset {
            Charset::Utf16Le => {
                for unit in value.encode_utf16() {
                    self.put_u16_le(unit);
                }
            }
            Charset::Utf8 => {
                self.data.extend_from_slice(value.as_bytes());
            }
        }
        self.data.len() - start
    }

    /// Append a string followed by a terminator of one code unit
    pub fn put_null_terminated_string(&mut self, value: &str, charset: Charset) -> usize {
        let written = self.put_string(value, charset);
        self.put_reserved(charset.unit_size());
        written + charset.unit_size()
    }

    /// Overwrite a previously written little-endian u16 at `offset`
    pub fn patch_u16_le(&mut self, offset: usize, value: u16) -> Result<()> {
        let have = self.data.len();
        let slot = self
            .data
            .get_mut(offset..offset + 2)
            .ok_or(Error::BufferUnderrun {
                need: offset + 2,
                have,
            })?;
        LittleEndian::write_u16(slot, value);
        Ok(())
    }

    /// Overwrite a previously written little-endian u32 at `offset`
    pub fn patch_u32_le(&mut self, offset: usize, value: u32) -> Result<()> {
        let have = self.data.len();
        let slot = self
            .data
            .get_mut(offset..offset + 4)
            .ok_or(Error::BufferUnderrun {
                need: offset + 4,
                have,
            })?;
        LittleEndian::write_u32(slot, value);
        Ok(())
    }

    // ---- decoding ----

    fn take(&mut self, count: usize) -> Result<&[u8]> {
        if self.remaining() < count {
            return Err(Error::BufferUnderrun {
                need: count,
                have: self.remaining(),
            });
        }
        let start = self.rpos;
        self.rpos += count;
        Ok(&self.data[start..start + count])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self, order: Endian) -> Result<u16> {
        let raw = self.take(2)?;
        Ok(match order {
            Endian::Little => LittleEndian::read_u16(raw),
            Endian::Big => BigEndian::read_u16(raw),
        })
    }

    pub fn read_u32(&mut self, order: Endian) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(match order {
            Endian::Little => LittleEndian::read_u32(raw),
            Endian::Big => BigEndian::read_u32(raw),
        })
    }

    pub fn read_u64(&mut self, order: Endian) -> Result<u64> {
        let raw = self.take(8)?;
        Ok(match order {
            Endian::Little => LittleEndian::read_u64(raw),
            Endian::Big => BigEndian::read_u64(raw),
        })
    }

    pub fn read_u16_le(&mut self) -> Result<u16> {
        self.read_u16(Endian::Little)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        self.read_u32(Endian::Little)
    }

    pub fn read_u64_le(&mut self) -> Result<u64> {
        self.read_u64(Endian::Little)
    }

    /// Copy `count` bytes out of the buffer
    pub fn read_raw(&mut self, count: usize) -> Result<Vec<u8>> {
        Ok(self.take(count)?.to_vec())
    }

    /// Read exactly N bytes into an array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    /// Read a string occupying exactly `byte_len` bytes
    pub fn read_string(&mut self, byte_len: usize, charset: Charset) -> Result<String> {
        if byte_len % charset.unit_size() != 0 {
            return Err(Error::DecodeFailure(format!(
                "string length {} is not a multiple of {}",
                byte_len,
                charset.unit_size()
            )));
        }
        let raw = self.take(byte_len)?;
        decode_string(raw, charset)
    }

    /// Read code units up to and including a null terminator
    pub fn read_null_terminated_string(&mut self, charset: Charset) -> Result<String> {
        let unit = charset.unit_size();
        let rest = &self.data[self.rpos..];
        let end = rest
            .chunks_exact(unit)
            .position(|chunk| chunk.iter().all(|b| *b == 0))
            .ok_or_else(|| Error::DecodeFailure("unterminated string".to_string()))?;
        let value = self.read_string(end * unit, charset)?;
        self.skip(unit)?;
        Ok(value)
    }
}

fn decode_string(raw: &[u8], charset: Charset) -> Result<String> {
    match charset {
        Charset::Utf16Le => {
            let units: Vec<u16> = raw.chunks_exact(2).map(LittleEndian::read_u16).collect();
            String::from_utf16(&units)
                .map_err(|e| Error::DecodeFailure(format!("invalid UTF-16 string: {}", e)))
        }
        Charset::Utf8 => String::from_utf8(raw.to_vec())
            .map_err(|e| Error::DecodeFailure(format!("invalid UTF-8 string: {}", e))),
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data, rpos: 0 }
    }
}

//! Message signing
//!
//! The signature covers the whole packet with the signature field zeroed and
//! the `SIGNED` flag set. The MAC primitive is selected per dialect behind
//! [`SigningAlgorithm`]; framing code only sees [`SigningContext`].

use super::smb2_constants::{header_offsets, SigningAlgorithmId, Smb2Dialect, Smb2HeaderFlags};
use crate::error::{Error, Result};
use aes::Aes128;
use cmac::Cmac;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Length of the signature field and of derived signing keys
pub const SIGNATURE_SIZE: usize = 16;

const SIG_START: usize = header_offsets::SIGNATURE;
const SIG_END: usize = header_offsets::SIGNATURE + header_offsets::SIGNATURE_LEN;

/// A keyed MAC over a whole packet
pub trait SigningAlgorithm: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// MAC over `data`, truncated to the 16-byte signature
    fn compute(&self, data: &[u8]) -> Result<[u8; SIGNATURE_SIZE]>;
}

/// HMAC-SHA256 keyed with the session key (SMB 2.0.2 and 2.1)
pub struct HmacSha256Signer {
    key: Vec<u8>,
}

impl HmacSha256Signer {
    pub fn new(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }
}

impl fmt::Debug for HmacSha256Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacSha256Signer").finish_non_exhaustive()
    }
}

impl SigningAlgorithm for HmacSha256Signer {
    fn name(&self) -> &'static str {
        "HMAC-SHA256"
    }

    fn compute(&self, data: &[u8]) -> Result<[u8; SIGNATURE_SIZE]> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::SigningError(format!("HMAC key: {}", e)))?;
        mac.update(data);
        let digest = mac.finalize().into_bytes();
        let mut out = [0u8; SIGNATURE_SIZE];
        out.copy_from_slice(&digest[..SIGNATURE_SIZE]);
        Ok(out)
    }
}

/// AES-128-CMAC keyed with a derived signing key (SMB 3.x)
pub struct AesCmacSigner {
    key: [u8; SIGNATURE_SIZE],
}

impl AesCmacSigner {
    pub fn new(key: [u8; SIGNATURE_SIZE]) -> Self {
        Self { key }
    }
}

impl fmt::Debug for AesCmacSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesCmacSigner").finish_non_exhaustive()
    }
}

impl SigningAlgorithm for AesCmacSigner {
    fn name(&self) -> &'static str {
        "AES-128-CMAC"
    }

    fn compute(&self, data: &[u8]) -> Result<[u8; SIGNATURE_SIZE]> {
        let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(&self.key)
            .map_err(|e| Error::SigningError(format!("CMAC key: {}", e)))?;
        mac.update(data);
        let tag = mac.finalize().into_bytes();
        let mut out = [0u8; SIGNATURE_SIZE];
        out.copy_from_slice(&tag[..SIGNATURE_SIZE]);
        Ok(out)
    }
}

/// Active signing state for one session
#[derive(Debug)]
pub struct SigningContext {
    algorithm: Box<dyn SigningAlgorithm>,
}

impl SigningContext {
    pub fn new(algorithm: Box<dyn SigningAlgorithm>) -> Self {
        Self { algorithm }
    }

    /// Build the context a dialect prescribes from an authenticated session key.
    ///
    /// `preauth_hash` is required for 3.1.1 and ignored otherwise.
    pub fn for_dialect(
        dialect: Smb2Dialect,
        signing_algorithm: SigningAlgorithmId,
        session_key: &[u8],
        preauth_hash: Option<&[u8]>,
    ) -> Result<Self> {
        if session_key.is_empty() {
            return Err(Error::SigningError("empty session key".to_string()));
        }
        if !dialect.is_smb3() {
            return Ok(Self::new(Box::new(HmacSha256Signer::new(session_key))));
        }

        let key = if dialect.uses_preauth_integrity() {
            let context = preauth_hash.ok_or_else(|| {
                Error::SigningError("3.1.1 signing requires a preauth hash".to_string())
            })?;
            derive_key(session_key, b"SMBSigningKey\0", context)?
        } else {
            derive_key(session_key, b"SMB2AESCMAC\0", b"SmbSign\0")?
        };

        match signing_algorithm {
            SigningAlgorithmId::AesCmac => Ok(Self::new(Box::new(AesCmacSigner::new(key)))),
            other => Err(Error::SigningError(format!(
                "signing algorithm {:?} is not supported",
                other
            ))),
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.algorithm.name()
    }

    /// Sign a serialized packet in place
    pub fn sign(&self, packet: &mut [u8]) -> Result<()> {
        if packet.len() < SIG_END {
            return Err(Error::SigningError(format!(
                "packet of {} bytes is too short to sign",
                packet.len()
            )));
        }
        let flags_at = header_offsets::FLAGS;
        let flags = u32::from_le_bytes([
            packet[flags_at],
            packet[flags_at + 1],
            packet[flags_at + 2],
            packet[flags_at + 3],
        ]) | Smb2HeaderFlags::SIGNED.bits();
        packet[flags_at..flags_at + 4].copy_from_slice(&flags.to_le_bytes());
        packet[SIG_START..SIG_END].fill(0);

        let signature = self.algorithm.compute(packet)?;
        packet[SIG_START..SIG_END].copy_from_slice(&signature);
        Ok(())
    }

    /// Check the signature embedded in a received packet
    pub fn verify(&self, packet: &[u8]) -> Result<bool> {
        if packet.len() < SIG_END {
            return Ok(false);
        }
        let mut scratch = packet.to_vec();
        scratch[SIG_START..SIG_END].fill(0);
        let expected = self.algorithm.compute(&scratch)?;
        Ok(constant_time_eq(&expected, &packet[SIG_START..SIG_END]))
    }
}

/// SP800-108 counter-mode KDF with HMAC-SHA256, one 128-bit output block
pub fn derive_key(key: &[u8], label: &[u8], context: &[u8]) -> Result<[u8; SIGNATURE_SIZE]> {
    // Key derivation uses only the first 16 bytes of the session key
    let mut ki = [0u8; SIGNATURE_SIZE];
    let take = key.len().min(SIGNATURE_SIZE);
    ki[..take].copy_from_slice(&key[..take]);

    let mut mac = HmacSha256::new_from_slice(&ki)
        .map_err(|e| Error::SigningError(format!("KDF key: {}", e)))?;
    mac.update(&1u32.to_be_bytes());
    mac.update(label);
    mac.update(&[0u8]);
    mac.update(context);
    mac.update(&128u32.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let mut out = [0u8; SIGNATURE_SIZE];
    out.copy_from_slice(&digest[..SIGNATURE_SIZE]);
    Ok(out)
}

/// Compare without an early exit on the first differing byte
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

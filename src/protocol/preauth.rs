//! SMB 3.1.1 preauthentication integrity hash
//!
//! Chained SHA-512 over every NEGOTIATE and SESSION_SETUP message exactly as
//! sent or received: `H = SHA512(H || message)`, starting from 64 zero bytes.

use sha2::{Digest, Sha512};

pub const PREAUTH_HASH_SIZE: usize = 64;

#[derive(Clone, PartialEq, Eq)]
pub struct PreauthHash {
    value: [u8; PREAUTH_HASH_SIZE],
}

impl PreauthHash {
    pub fn new() -> Self {
        Self {
            value: [0; PREAUTH_HASH_SIZE],
        }
    }

    pub fn update(&mut self, message: &[u8]) {
        let mut hasher = Sha512::new();
        hasher.update(self.value);
        hasher.update(message);
        self.value.copy_from_slice(&hasher.finalize());
    }

    pub fn value(&self) -> &[u8; PREAUTH_HASH_SIZE] {
        &self.value
    }
}

impl Default for PreauthHash {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PreauthHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PreauthHash({:02x?}..)", &self.value[..4])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_is_order_sensitive() {
        let mut a = PreauthHash::new();
        a.update(b"negotiate request");
        a.update(b"negotiate response");

        let mut b = PreauthHash::new();
        b.update(b"negotiate response");
        b.update(b"negotiate request");

        assert_ne!(a, b);
        assert_ne!(a.value(), &[0u8; 64]);
    }

    #[test]
    fn test_chain_matches_manual_computation() {
        let mut chained = PreauthHash::new();
        chained.update(b"abc");

        let mut hasher = Sha512::new();
        hasher.update([0u8; 64]);
        hasher.update(b"abc");
        let expected = hasher.finalize();
        assert_eq!(&chained.value()[..], &expected[..]);
    }
}

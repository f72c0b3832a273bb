//! XTEA block cipher.
//!
//! 64-bit blocks, 128-bit key, 32 cycles. Block halves and key words are
//! little-endian.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// XTEA block size in bytes.
pub const XTEA_BLOCK_SIZE: usize = 8;

const DELTA: u32 = 0x9E37_79B9;
const CYCLES: u32 = 32;

/// Session key negotiated during the login handshake.
///
/// Key material is wiped when the key is dropped.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct XteaKey([u32; 4]);

impl XteaKey {
    pub fn new(words: [u32; 4]) -> Self {
        Self(words)
    }

    /// Builds a key from 16 little-endian bytes.
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        let mut words = [0u32; 4];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Self(words)
    }

    /// Encrypts `data` in place. Only whole blocks are processed; a trailing
    /// partial block is left untouched.
    pub fn encrypt(&self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(XTEA_BLOCK_SIZE) {
            let (v0, v1) = load(block);
            let (v0, v1) = self.encrypt_block(v0, v1);
            store(block, v0, v1);
        }
    }

    /// Decrypts `data` in place. Only whole blocks are processed.
    pub fn decrypt(&self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(XTEA_BLOCK_SIZE) {
            let (v0, v1) = load(block);
            let (v0, v1) = self.decrypt_block(v0, v1);
            store(block, v0, v1);
        }
    }

    fn encrypt_block(&self, mut v0: u32, mut v1: u32) -> (u32, u32) {
        let key = &self.0;
        let mut sum = 0u32;
        for _ in 0..CYCLES {
            v0 = v0.wrapping_add(
                (((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1))
                    ^ sum.wrapping_add(key[(sum & 3) as usize]),
            );
            sum = sum.wrapping_add(DELTA);
            v1 = v1.wrapping_add(
                (((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0))
                    ^ sum.wrapping_add(key[((sum >> 11) & 3) as usize]),
            );
        }
        (v0, v1)
    }

    fn decrypt_block(&self, mut v0: u32, mut v1: u32) -> (u32, u32) {
        let key = &self.0;
        let mut sum = DELTA.wrapping_mul(CYCLES);
        for _ in 0..CYCLES {
            v1 = v1.wrapping_sub(
                (((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0))
                    ^ sum.wrapping_add(key[((sum >> 11) & 3) as usize]),
            );
            sum = sum.wrapping_sub(DELTA);
            v0 = v0.wrapping_sub(
                (((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1))
                    ^ sum.wrapping_add(key[(sum & 3) as usize]),
            );
        }
        (v0, v1)
    }
}

impl fmt::Debug for XteaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("XteaKey(..)")
    }
}

fn load(block: &[u8]) -> (u32, u32) {
    (
        u32::from_le_bytes([block[0], block[1], block[2], block[3]]),
        u32::from_le_bytes([block[4], block[5], block[6], block[7]]),
    )
}

fn store(block: &mut [u8], v0: u32, v1: u32) {
    block[..4].copy_from_slice(&v0.to_le_bytes());
    block[4..].copy_from_slice(&v1.to_le_bytes());
}

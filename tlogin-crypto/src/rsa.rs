//! Raw RSA decryption of the login handshake block.
//!
//! Clients encrypt a fixed-size block with the service public key and no
//! padding scheme. The block is valid only when it is exactly one modulus
//! wide and its plaintext starts with a zero byte.

use std::fmt;
use std::path::Path;

use ::rsa::pkcs1::DecodeRsaPrivateKey;
use ::rsa::pkcs8::DecodePrivateKey;
use ::rsa::hazmat::rsa_decrypt_and_check;
use ::rsa::traits::PublicKeyParts;
use ::rsa::{BigUint, RsaPrivateKey};
use tracing::debug;

use crate::error::CryptoError;

/// Service private key used to open login handshake blocks.
pub struct RsaDecryptor {
    key: RsaPrivateKey,
}

impl RsaDecryptor {
    /// Wraps an already parsed private key.
    pub fn new(key: RsaPrivateKey) -> Self {
        Self { key }
    }

    /// Parses a PEM encoded private key, PKCS#1 or PKCS#8.
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let key = match RsaPrivateKey::from_pkcs1_pem(pem) {
            Ok(key) => key,
            Err(pkcs1_err) => RsaPrivateKey::from_pkcs8_pem(pem).map_err(|pkcs8_err| {
                CryptoError::InvalidKey(format!("pkcs1: {pkcs1_err}; pkcs8: {pkcs8_err}"))
            })?,
        };
        key.validate()
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self::new(key))
    }

    /// Loads a PEM encoded private key from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path)?;
        let decryptor = Self::from_pem(&pem)?;
        debug!(
            path = %path.display(),
            bits = decryptor.block_size() * 8,
            "Loaded RSA private key"
        );
        Ok(decryptor)
    }

    /// Size of an encrypted block, which is the modulus size in bytes.
    pub fn block_size(&self) -> usize {
        self.key.size()
    }

    /// Decrypts `block` in place. The private key operation is blinded and
    /// the result is checked against the public exponent.
    ///
    /// On error the block contents are unspecified and must be discarded.
    pub fn decrypt_in_place(&self, block: &mut [u8]) -> Result<(), CryptoError> {
        let size = self.block_size();
        if block.len() != size {
            return Err(CryptoError::BlockSize {
                expected: size,
                actual: block.len(),
            });
        }

        let ciphertext = BigUint::from_bytes_be(block);
        if &ciphertext >= self.key.n() {
            return Err(CryptoError::CiphertextOutOfRange);
        }

        let mut rng = rand::thread_rng();
        let plaintext = rsa_decrypt_and_check(&self.key, Some(&mut rng), &ciphertext)
            .map_err(|e| CryptoError::Decryption(e.to_string()))?;
        let bytes = plaintext.to_bytes_be();
        if bytes.len() > size {
            return Err(CryptoError::CiphertextOutOfRange);
        }

        // Left-pad back to the modulus width.
        let padding = size - bytes.len();
        block[..padding].fill(0);
        block[padding..].copy_from_slice(&bytes);

        if block[0] != 0 {
            return Err(CryptoError::MalformedPlaintext);
        }
        Ok(())
    }
}

impl fmt::Debug for RsaDecryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaDecryptor")
            .field("bits", &(self.block_size() * 8))
            .finish_non_exhaustive()
    }
}

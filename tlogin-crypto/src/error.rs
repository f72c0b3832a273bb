//! Crypto error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to read key file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid RSA private key: {0}")]
    InvalidKey(String),

    #[error("RSA block must be {expected} bytes, got {actual}")]
    BlockSize { expected: usize, actual: usize },

    #[error("RSA ciphertext is not smaller than the modulus")]
    CiphertextOutOfRange,

    #[error("RSA decryption failed: {0}")]
    Decryption(String),

    #[error("RSA plaintext does not start with a zero byte")]
    MalformedPlaintext,
}

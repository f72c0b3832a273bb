//! # tlogin-crypto
//!
//! Cryptography used by the login handshake.
//!
//! - [`RsaDecryptor`] recovers the client's session key from the raw RSA
//!   block of a login request.
//! - [`XteaKey`] encrypts login responses with that session key.

pub mod error;
pub mod rsa;
pub mod xtea;

pub use crate::error::CryptoError;
pub use crate::rsa::RsaDecryptor;
pub use crate::xtea::{XteaKey, XTEA_BLOCK_SIZE};

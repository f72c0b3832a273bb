//! Server error types.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] tlogin_protocol::ProtocolError),

    #[error("crypto error: {0}")]
    Crypto(#[from] tlogin_crypto::CryptoError),

    #[error("query error: {0}")]
    Query(#[from] tlogin_query::QueryError),

    #[error("connection is {0:?}, expected Processing")]
    NotProcessing(ConnectionState),

    #[error("too many status requests")]
    RateLimited,
}

//! Query client error types.

use thiserror::Error;

/// Query manager link errors.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] tlogin_protocol::ProtocolError),

    #[error("not connected")]
    NotConnected,

    #[error("failed to resolve query manager host {0:?}")]
    Resolve(String),

    #[error("query timeout")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("query manager refused login (status {0})")]
    LoginRefused(u8),

    #[error("invalid request size {size} (buffer {max})")]
    RequestSize { size: usize, max: usize },

    #[error("invalid response size {size} (buffer {max})")]
    ResponseSize { size: usize, max: usize },

    #[error("response overflowed while reading {0}")]
    Overflowed(&'static str),

    #[error("unexpected query status {0}")]
    UnexpectedStatus(u8),

    #[error("unexpected login error code {0}")]
    UnexpectedErrorCode(u8),

    #[error("too many characters ({0})")]
    TooManyCharacters(usize),
}

impl QueryError {
    /// Returns whether a fresh attempt on a new link may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QueryError::Io(_)
                | QueryError::Timeout
                | QueryError::ConnectionClosed
                | QueryError::ResponseSize { .. }
        )
    }
}

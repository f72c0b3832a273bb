//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors raised while parsing or building messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("buffer overflowed while {0}")]
    Overflow(&'static str),

    #[error("invalid frame length: {size} bytes (max {max})")]
    InvalidFrameLength { size: usize, max: usize },

    #[error("invalid payload size: expected {expected} bytes, got {actual}")]
    InvalidPayloadSize { expected: usize, actual: usize },

    #[error("unknown command {0}")]
    UnknownCommand(u8),

    #[error("unsupported status format {0}")]
    UnsupportedStatusFormat(u8),

    #[error("unsupported status request {0:?}")]
    UnsupportedStatusRequest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::Overflow("reading login request");
        assert_eq!(
            err.to_string(),
            "buffer overflowed while reading login request"
        );

        let err = ProtocolError::InvalidFrameLength {
            size: 4000,
            max: 2048,
        };
        assert!(err.to_string().contains("4000"));
        assert!(err.to_string().contains("2048"));

        let err = ProtocolError::InvalidPayloadSize {
            expected: 145,
            actual: 12,
        };
        assert!(err.to_string().contains("145"));

        let err = ProtocolError::UnknownCommand(7);
        assert!(err.to_string().contains('7'));

        let err = ProtocolError::UnsupportedStatusRequest("ping".to_string());
        assert!(err.to_string().contains("ping"));
    }
}

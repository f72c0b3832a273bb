//! # tlogin-protocol
//!
//! Wire format shared by the client-facing login protocol and the query
//! manager RPC link.
//!
//! This crate provides:
//! - Bounds-checked cursors over caller-supplied byte regions ([`WireReader`], [`WireWriter`])
//! - Length-prefixed framing with the `0xFFFF` extended-length escape
//! - Latin-1 <-> UTF-8 string transcoding
//! - Command and response tags of the login protocol

pub mod error;
pub mod frame;
pub mod latin1;
pub mod wire;

pub use error::ProtocolError;
pub use frame::{begin_frame, finish_frame, read_frame_length, FrameLength, EXTENDED_LENGTH};
pub use wire::{WireReader, WireWriter};

/// Default port for the login service.
pub const DEFAULT_LOGIN_PORT: u16 = 7171;

/// Size of the per-connection buffer used for both input and output.
pub const CONNECTION_BUFFER_SIZE: usize = 2 * 1024;

/// Command byte of a login request.
pub const COMMAND_LOGIN: u8 = 1;

/// Command byte of a status request.
pub const COMMAND_STATUS: u8 = 255;

/// Status format byte selecting the XML document.
pub const STATUS_FORMAT_XML: u8 = 255;

/// Payload size of a login request, command byte included.
pub const LOGIN_REQUEST_SIZE: usize = 145;

/// Size of the RSA block carried by a login request.
pub const LOGIN_RSA_BLOCK_SIZE: usize = 128;

/// Maximum password length accepted from a login request, excluding the
/// terminator slot.
pub const MAX_PASSWORD_LENGTH: usize = 29;

/// Response block tags written inside encrypted login responses.
pub mod tag {
    /// Login failure with a human readable message.
    pub const LOGIN_ERROR: u8 = 10;
    /// Message of the day.
    pub const MOTD: u8 = 20;
    /// Character list followed by premium days.
    pub const CHARACTER_LIST: u8 = 100;
}

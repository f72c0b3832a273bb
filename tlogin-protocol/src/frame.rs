//! Length-prefixed framing.
//!
//! Frame layout:
//!
//! ```text
//! +-------------+----------------------+---------------------+
//! | length (LE) | [extended length LE] | payload             |
//! |   2 bytes   | 4 bytes if 0xFFFF    | length bytes        |
//! +-------------+----------------------+---------------------+
//! ```
//!
//! Client connections only ever use the short form. The query manager link
//! accepts both.

use crate::error::ProtocolError;
use crate::wire::WireWriter;

/// Short length value announcing a trailing `u32` length.
pub const EXTENDED_LENGTH: u16 = 0xFFFF;

/// Size of the short length prefix.
pub const SHORT_HEADER_SIZE: usize = 2;

/// Size of the escaped length prefix.
pub const EXTENDED_HEADER_SIZE: usize = 6;

/// Outcome of decoding a frame length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLength {
    /// The prefix is complete.
    Complete { header: usize, payload: usize },
    /// At least this many header bytes are required.
    NeedMore(usize),
}

/// Decodes the length prefix at the start of `buf`.
pub fn read_frame_length(buf: &[u8]) -> FrameLength {
    if buf.len() < SHORT_HEADER_SIZE {
        return FrameLength::NeedMore(SHORT_HEADER_SIZE);
    }

    let short = u16::from_le_bytes([buf[0], buf[1]]);
    if short != EXTENDED_LENGTH {
        return FrameLength::Complete {
            header: SHORT_HEADER_SIZE,
            payload: short as usize,
        };
    }

    if buf.len() < EXTENDED_HEADER_SIZE {
        return FrameLength::NeedMore(EXTENDED_HEADER_SIZE);
    }

    let extended = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]);
    FrameLength::Complete {
        header: EXTENDED_HEADER_SIZE,
        payload: extended as usize,
    }
}

/// Reserves the short length prefix. The writer must be at position 0.
pub fn begin_frame(writer: &mut WireWriter<'_>) {
    writer.write_u16(0);
}

/// Back-patches the length prefix reserved by [`begin_frame`] and returns
/// the total frame size.
///
/// Payloads of 65535 bytes or more switch to the extended form, which
/// splices four bytes in after the escape value.
pub fn finish_frame(writer: &mut WireWriter<'_>) -> Result<usize, ProtocolError> {
    let payload = writer.position().saturating_sub(SHORT_HEADER_SIZE);
    if payload < EXTENDED_LENGTH as usize {
        writer.rewrite_u16(0, payload as u16);
    } else {
        writer.rewrite_u16(0, EXTENDED_LENGTH);
        writer.insert_u32(SHORT_HEADER_SIZE, payload as u32);
    }

    if writer.overflowed() {
        return Err(ProtocolError::Overflow("finishing frame"));
    }
    Ok(writer.position())
}

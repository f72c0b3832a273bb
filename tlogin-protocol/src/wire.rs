//! Bounds-checked cursors over fixed byte regions.
//!
//! Neither cursor allocates or panics on overrun. Every access advances the
//! cursor by its full width whether or not it was in bounds, so a batch of
//! reads or writes over an exhausted buffer still ends at a deterministic
//! position. Callers check [`WireReader::overflowed`] /
//! [`WireWriter::overflowed`] once at the end of a sequence and reject the
//! whole message when it is set.
//!
//! Integers are little-endian unless the method name ends in `_be`.
//! Strings carry a length prefix: a `u16`, or `0xFFFF` followed by a `u32`
//! for lengths of 65535 bytes and above.

use crate::frame::EXTENDED_LENGTH;
use crate::latin1;

/// Read cursor over a borrowed byte slice.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    position: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, position: 0 }
    }

    /// Current cursor position. May exceed [`capacity`](Self::capacity).
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes left before the end of the region.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.position)
    }

    /// Returns whether `count` more bytes can be read in bounds.
    pub fn can_read(&self, count: usize) -> bool {
        self.position
            .checked_add(count)
            .is_some_and(|end| end <= self.buf.len())
    }

    /// Returns whether any read so far went past the end of the region.
    pub fn overflowed(&self) -> bool {
        self.position > self.buf.len()
    }

    /// Advances the cursor without reading.
    pub fn skip(&mut self, count: usize) {
        self.position = self.position.saturating_add(count);
    }

    pub fn read_u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    pub fn read_flag(&mut self) -> bool {
        self.read_u8() != 0
    }

    pub fn read_u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    pub fn read_u16_be(&mut self) -> u16 {
        u16::from_be_bytes(self.take())
    }

    pub fn read_u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    pub fn read_u32_be(&mut self) -> u32 {
        u32::from_be_bytes(self.take())
    }

    pub fn read_u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    pub fn read_u64_be(&mut self) -> u64 {
        u64::from_be_bytes(self.take())
    }

    /// Reads a fixed-size byte array. Out-of-bounds reads yield zeroes.
    pub fn read_array<const N: usize>(&mut self) -> [u8; N] {
        self.take()
    }

    /// Fills `out` from the buffer. `out` is left untouched when the bytes
    /// are not available.
    pub fn read_bytes(&mut self, out: &mut [u8]) {
        if self.can_read(out.len()) {
            out.copy_from_slice(&self.buf[self.position..self.position + out.len()]);
        }
        self.skip(out.len());
    }

    /// Reads a string length prefix, following the extended-length escape.
    pub fn read_length(&mut self) -> usize {
        match self.read_u16() {
            EXTENDED_LENGTH => self.read_u32() as usize,
            length => length as usize,
        }
    }

    /// Reads a length-prefixed Latin-1 string. Yields an empty string when
    /// the declared bytes are not available.
    pub fn read_string(&mut self) -> String {
        let length = self.read_length();
        let text = match self.slice(length) {
            Some(bytes) => latin1::decode(bytes),
            None => String::new(),
        };
        self.skip(length);
        text
    }

    /// Reads a length-prefixed string destined for a `capacity`-sized slot
    /// that keeps room for a terminator. Yields an empty string when the
    /// string would not fit, and still consumes the declared length.
    pub fn read_string_bounded(&mut self, capacity: usize) -> String {
        let length = self.read_length();
        let text = match self.slice(length) {
            Some(bytes) if length < capacity => latin1::decode(bytes),
            _ => String::new(),
        };
        self.skip(length);
        text
    }

    fn slice(&self, count: usize) -> Option<&'a [u8]> {
        if self.can_read(count) {
            Some(&self.buf[self.position..self.position + count])
        } else {
            None
        }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(bytes) = self.slice(N) {
            out.copy_from_slice(bytes);
        }
        self.skip(N);
        out
    }
}

/// Write cursor over a borrowed mutable byte slice.
#[derive(Debug)]
pub struct WireWriter<'a> {
    buf: &'a mut [u8],
    position: usize,
}

impl<'a> WireWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, position: 0 }
    }

    /// Current cursor position. May exceed [`capacity`](Self::capacity).
    pub fn position(&self) -> usize {
        self.position
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Returns whether `count` more bytes fit in the region.
    pub fn can_write(&self, count: usize) -> bool {
        self.position
            .checked_add(count)
            .is_some_and(|end| end <= self.buf.len())
    }

    /// Returns whether any write so far went past the end of the region.
    pub fn overflowed(&self) -> bool {
        self.position > self.buf.len()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.put([value]);
    }

    pub fn write_flag(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.put(value.to_le_bytes());
    }

    pub fn write_u16_be(&mut self, value: u16) {
        self.put(value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.put(value.to_le_bytes());
    }

    pub fn write_u32_be(&mut self, value: u32) {
        self.put(value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.put(value.to_le_bytes());
    }

    pub fn write_u64_be(&mut self, value: u64) {
        self.put(value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.can_write(bytes.len()) {
            self.buf[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        }
        self.advance(bytes.len());
    }

    /// Writes a length prefix, using the extended-length escape when needed.
    pub fn write_length(&mut self, length: usize) {
        if length < EXTENDED_LENGTH as usize {
            self.write_u16(length as u16);
        } else {
            self.write_u16(EXTENDED_LENGTH);
            self.write_u32(length as u32);
        }
    }

    /// Writes a length-prefixed string, transcoded to Latin-1.
    pub fn write_string(&mut self, text: &str) {
        let length = latin1::encoded_len(text);
        self.write_length(length);
        if length > 0 && self.can_write(length) {
            latin1::encode_into(text, &mut self.buf[self.position..self.position + length]);
        }
        self.advance(length);
    }

    /// Overwrites two bytes at `position` with `value`. Ignored unless that
    /// range was already written and the writer has not overflowed.
    pub fn rewrite_u16(&mut self, position: usize, value: u16) {
        if position.saturating_add(2) <= self.position && !self.overflowed() {
            self.buf[position..position + 2].copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Splices four bytes holding `value` in at `position`, shifting what
    /// was written after it. The cursor advances by four whenever
    /// `position` lies within the written range, even if the bytes do not
    /// fit.
    pub fn insert_u32(&mut self, position: usize, value: u32) {
        if position > self.position {
            return;
        }
        if self.can_write(4) {
            self.buf.copy_within(position..self.position, position + 4);
            self.buf[position..position + 4].copy_from_slice(&value.to_le_bytes());
        }
        self.advance(4);
    }

    /// Releases the underlying region together with the final position.
    pub fn into_inner(self) -> (&'a mut [u8], usize) {
        (self.buf, self.position)
    }

    fn advance(&mut self, count: usize) {
        self.position = self.position.saturating_add(count);
    }

    fn put<const N: usize>(&mut self, bytes: [u8; N]) {
        if self.can_write(N) {
            self.buf[self.position..self.position + N].copy_from_slice(&bytes);
        }
        self.advance(N);
    }
}

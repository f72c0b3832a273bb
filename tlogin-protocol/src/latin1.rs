//! Latin-1 transcoding for wire strings.
//!
//! Strings travel as Latin-1 on both protocols while the rest of the service
//! works with UTF-8. Code points above U+00FF have no Latin-1 form and are
//! replaced with `?`.

/// Replacement byte for code points outside Latin-1.
pub const REPLACEMENT: u8 = b'?';

/// Returns the number of bytes `text` occupies once encoded as Latin-1.
pub fn encoded_len(text: &str) -> usize {
    text.chars().count()
}

/// Encodes `text` as Latin-1 into `out`, returning the number of bytes
/// written. Output is cut short if `out` is too small.
pub fn encode_into(text: &str, out: &mut [u8]) -> usize {
    let mut written = 0;
    for (slot, ch) in out.iter_mut().zip(text.chars()) {
        *slot = latin1_byte(ch);
        written += 1;
    }
    written
}

/// Decodes Latin-1 bytes into a UTF-8 string.
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

fn latin1_byte(ch: char) -> u8 {
    u8::try_from(u32::from(ch)).unwrap_or(REPLACEMENT)
}

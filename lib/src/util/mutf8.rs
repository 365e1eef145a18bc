//! Modified UTF-8, the string encoding used inside the container
//!
//! The differences from standard UTF-8:
//!
//!   - the null character `\u{0000}` is encoded in the 2-byte form, so encoded
//!     strings never contain an embedded null byte
//!   - only the 1, 2, and 3 byte forms are used; supplementary characters are
//!     encoded as a surrogate pair, each half in the 3-byte form

use std::io;

/// Number of UTF-16 code units a string occupies (surrogate pairs count as 2)
pub fn utf16_length(string: &str) -> u32 {
    string.chars().map(|c| c.len_utf16() as u32).sum()
}

/// Compare two strings by their UTF-16 code unit values
///
/// This is the canonical ordering of the string section. It differs from
/// `str`'s code-point ordering only for supplementary characters, which sort
/// before `\u{e000}..=\u{ffff}` here because they are compared as surrogates.
pub fn utf16_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

/// Encode a string to modified UTF-8
pub fn encode(string: &str) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(string.len());
    for unit in string.encode_utf16() {
        match unit {
            0x0001..=0x007f => buffer.push(unit as u8),
            // The 2-byte form also covers U+0000, so encoded strings never
            // contain a raw null byte
            0 | 0x0080..=0x07ff => {
                buffer.push(0b1100_0000 | (unit >> 6) as u8);
                buffer.push(0b1000_0000 | (unit & 0x3f) as u8);
            }
            // Everything else, surrogate halves included, takes 3 bytes
            _ => {
                buffer.push(0b1110_0000 | (unit >> 12) as u8);
                buffer.push(0b1000_0000 | (unit >> 6 & 0x3f) as u8);
                buffer.push(0b1000_0000 | (unit & 0x3f) as u8);
            }
        }
    }
    buffer
}

/// Decode modified UTF-8 back into a string
///
/// Surrogate halves are re-paired; an unpaired half is invalid data.
pub fn decode(bytes: &[u8]) -> io::Result<String> {
    let invalid = || io::Error::new(io::ErrorKind::InvalidData, "invalid modified utf-8");

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut position = 0;
    while position < bytes.len() {
        let first = bytes[position];
        let (unit, consumed) = match first {
            0x01..=0x7f => (first as u16, 1),
            0xc0..=0xdf => {
                let second = *bytes.get(position + 1).ok_or_else(invalid)?;
                if second & 0b1100_0000 != 0b1000_0000 {
                    return Err(invalid());
                }
                ((first as u16 & 0x1f) << 6 | (second as u16 & 0x3f), 2)
            }
            0xe0..=0xef => {
                let second = *bytes.get(position + 1).ok_or_else(invalid)?;
                let third = *bytes.get(position + 2).ok_or_else(invalid)?;
                if second & 0b1100_0000 != 0b1000_0000 || third & 0b1100_0000 != 0b1000_0000 {
                    return Err(invalid());
                }
                (
                    (first as u16 & 0x0f) << 12
                        | (second as u16 & 0x3f) << 6
                        | (third as u16 & 0x3f),
                    3,
                )
            }
            _ => return Err(invalid()),
        };
        units.push(unit);
        position += consumed;
    }

    String::from_utf16(&units).map_err(|_| invalid())
}

//! LEB128 variable-length integer encodings
//!
//! The container format uses three flavours: unsigned (`uleb128`), signed
//! (`sleb128`), and `uleb128p1` (the value plus one, so that `-1` encodes as
//! a single zero byte - used for optional indices).

use std::io;
use std::io::Write;

/// Write an unsigned LEB128 value
pub fn write_uleb128<W: Write>(writer: &mut W, mut value: u32) -> io::Result<()> {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            return writer.write_all(&[byte]);
        }
        writer.write_all(&[byte | 0x80])?;
    }
}

/// Write a signed LEB128 value
pub fn write_sleb128<W: Write>(writer: &mut W, mut value: i32) -> io::Result<()> {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let sign_clear = byte & 0x40 == 0;
        if (value == 0 && sign_clear) || (value == -1 && !sign_clear) {
            return writer.write_all(&[byte]);
        }
        writer.write_all(&[byte | 0x80])?;
    }
}

/// Write an optional index as `uleb128p1` (`None` encodes as zero)
pub fn write_uleb128p1<W: Write>(writer: &mut W, value: Option<u32>) -> io::Result<()> {
    match value {
        Some(v) => write_uleb128(writer, v + 1),
        None => write_uleb128(writer, 0),
    }
}

/// Number of bytes `write_uleb128` will produce
pub fn uleb128_width(value: u32) -> u32 {
    let mut width = 1;
    let mut value = value >> 7;
    while value != 0 {
        width += 1;
        value >>= 7;
    }
    width
}

/// Number of bytes `write_sleb128` will produce
pub fn sleb128_width(value: i32) -> u32 {
    let mut width = 1;
    let mut value = value;
    loop {
        let sign_clear = value & 0x40 == 0;
        value >>= 7;
        if (value == 0 && sign_clear) || (value == -1 && !sign_clear) {
            return width;
        }
        width += 1;
    }
}

/// Number of bytes `write_uleb128p1` will produce
pub fn uleb128p1_width(value: Option<u32>) -> u32 {
    match value {
        Some(v) => uleb128_width(v + 1),
        None => 1,
    }
}

fn next_byte(input: &[u8], position: &mut usize) -> io::Result<u8> {
    let byte = *input
        .get(*position)
        .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "input ended mid-leb128"))?;
    *position += 1;
    Ok(byte)
}

/// Read an unsigned LEB128 value, advancing `position`
pub fn read_uleb128(input: &[u8], position: &mut usize) -> io::Result<u32> {
    let mut result: u32 = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = next_byte(input, position)?;
        result |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift == 35 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "uleb128 longer than five bytes",
            ));
        }
    }
}

/// Read a signed LEB128 value, advancing `position`
pub fn read_sleb128(input: &[u8], position: &mut usize) -> io::Result<i32> {
    let mut result: i32 = 0;
    let mut shift = 0;
    loop {
        let byte = next_byte(input, position)?;
        result |= ((byte & 0x7f) as i32) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 32 && byte & 0x40 != 0 {
                result |= -1i32 << shift;
            }
            return Ok(result);
        }
        if shift == 35 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "sleb128 longer than five bytes",
            ));
        }
    }
}

/// Read a `uleb128p1` optional index, advancing `position`
pub fn read_uleb128p1(input: &[u8], position: &mut usize) -> io::Result<Option<u32>> {
    let raw = read_uleb128(input, position)?;
    if raw == 0 {
        Ok(None)
    } else {
        Ok(Some(raw - 1))
    }
}

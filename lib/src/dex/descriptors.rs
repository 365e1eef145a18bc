//! Type descriptor strings
//!
//! Types are referenced everywhere as descriptor strings (`I`, `J`,
//! `Ljava/lang/String;`, `[[I`, ...). This module validates them and answers
//! the small set of questions the rest of the crate needs: how many register
//! words a value of the type occupies, which shorty character represents it,
//! and whether it is a reference / wide / narrow value.

use crate::dex::Error;

/// Broad categories a field or register value can fall into
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TypeCategory {
    Reference,
    Wide,
    Narrow,
}

/// Check that `descriptor` is a well-formed non-void field type descriptor
pub fn check_descriptor(descriptor: &str) -> Result<(), Error> {
    let bad = || Error::BadDescriptor(descriptor.to_string());

    let mut rest = descriptor;
    let mut dimensions = 0;
    while let Some(stripped) = rest.strip_prefix('[') {
        rest = stripped;
        dimensions += 1;
        if dimensions > 255 {
            return Err(bad());
        }
    }

    match rest.as_bytes().first() {
        Some(b'Z' | b'B' | b'S' | b'C' | b'I' | b'J' | b'F' | b'D') if rest.len() == 1 => Ok(()),
        Some(b'L') => {
            let body = &rest[1..];
            if body.ends_with(';') && body.len() > 1 && !body.contains(|c: char| c.is_whitespace())
            {
                Ok(())
            } else {
                Err(bad())
            }
        }
        _ => Err(bad()),
    }
}

/// Check a return type descriptor (also allows `V`)
pub fn check_return_descriptor(descriptor: &str) -> Result<(), Error> {
    if descriptor == "V" {
        Ok(())
    } else {
        check_descriptor(descriptor)
    }
}

/// The single character this type contributes to a prototype's shorty
pub fn shorty_char(descriptor: &str) -> char {
    match descriptor.as_bytes()[0] {
        b'[' | b'L' => 'L',
        other => other as char,
    }
}

/// Number of register words a value of this type occupies (`V` is zero)
pub fn word_count(descriptor: &str) -> u16 {
    match descriptor {
        "J" | "D" => 2,
        "V" => 0,
        _ => 1,
    }
}

/// Category of the type, as used by field layout and operand checks
pub fn category(descriptor: &str) -> TypeCategory {
    match descriptor.as_bytes()[0] {
        b'[' | b'L' => TypeCategory::Reference,
        b'J' | b'D' => TypeCategory::Wide,
        _ => TypeCategory::Narrow,
    }
}

/// Byte size of an instance field of this type in an object layout
pub fn field_size(descriptor: &str) -> u32 {
    match descriptor.as_bytes()[0] {
        b'J' | b'D' => 8,
        b'[' | b'L' | b'I' | b'F' => 4,
        b'C' | b'S' => 2,
        _ => 1,
    }
}

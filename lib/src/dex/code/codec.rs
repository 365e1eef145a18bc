//! Bit-exact binary codec for instructions
//!
//! `encode` and `decode` are exhaustive matches over [`Format`]: one arm per
//! fixed layout plus the three pseudo-instruction payloads. For any record a
//! conformant encoder can produce, `decode(encode(i)) == i`.
//!
//! The codec operates on fully resolved instructions: branch targets are
//! relative offsets in code units, references are raw section indices. The
//! offset and index *values* come from the label / pooled item the operand
//! referenced - the codec only performs the final byte packing.

use crate::dex::code::{Format, Instruction, Opcode};
use crate::dex::errors::FormatViolation;
use crate::dex::Error;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// An instruction in its on-the-wire shape: offsets resolved, references as
/// raw section indices
pub type RawInstruction = Instruction<i32, u32>;

/// Payload identifier bytes (the byte following the `0x00` opcode byte)
pub const PACKED_SWITCH_IDENT: u8 = 0x01;
pub const SPARSE_SWITCH_IDENT: u8 = 0x02;
pub const ARRAY_DATA_IDENT: u8 = 0x03;

const MAX_SWITCH_ELEMENTS: usize = 0xffff;

fn reg4(register: u8) -> Result<u8, FormatViolation> {
    if register > 0x0f {
        Err(FormatViolation::RegisterOutOfRange {
            register: register as u16,
            max: 0x0f,
        })
    } else {
        Ok(register)
    }
}

/// Construction-time validation shared by the assembler and the encoder
///
/// Checks everything knowable without address or index resolution: register
/// field widths, literal ranges, payload well-formedness, and that the
/// opcode actually uses the format of the variant it was wrapped in.
pub fn check<T, R>(instruction: &Instruction<T, R>) -> Result<(), FormatViolation> {
    if let (Some(opcode), Some(format)) = (instruction.opcode(), instruction.variant_format()) {
        if opcode.format() != format {
            return Err(FormatViolation::WrongFormat { opcode, format });
        }
    }

    match instruction {
        Instruction::F11n { a, literal, .. } => {
            reg4(*a)?;
            if *literal < -8 || *literal > 7 {
                return Err(FormatViolation::LiteralOutOfRange {
                    literal: *literal as i64,
                    bits: 4,
                });
            }
        }
        Instruction::F12x { a, b, .. } => {
            reg4(*a)?;
            reg4(*b)?;
        }
        Instruction::F22c { a, b, .. } | Instruction::F22s { a, b, .. } => {
            reg4(*a)?;
            reg4(*b)?;
        }
        Instruction::F22t { a, b, .. } => {
            reg4(*a)?;
            reg4(*b)?;
        }
        Instruction::F35c { registers, .. } => {
            if registers.len() > 5 {
                return Err(FormatViolation::TooManyRegisters {
                    count: registers.len(),
                });
            }
            for register in registers {
                reg4(*register)?;
            }
        }
        Instruction::PackedSwitchPayload { targets, .. } => {
            if targets.len() > MAX_SWITCH_ELEMENTS {
                return Err(FormatViolation::TooManySwitchElements {
                    count: targets.len(),
                });
            }
        }
        Instruction::SparseSwitchPayload { elements } => {
            if elements.len() > MAX_SWITCH_ELEMENTS {
                return Err(FormatViolation::TooManySwitchElements {
                    count: elements.len(),
                });
            }
            for (index, window) in elements.windows(2).enumerate() {
                if window[1].0 <= window[0].0 {
                    return Err(FormatViolation::UnsortedSparseSwitch { index: index + 1 });
                }
            }
        }
        Instruction::ArrayDataPayload {
            element_width,
            data,
        } => {
            let width = *element_width as usize;
            if !matches!(width, 1 | 2 | 4 | 8) || data.len() % width != 0 {
                return Err(FormatViolation::BadArrayPayload {
                    element_width: *element_width,
                    byte_length: data.len(),
                });
            }
            if data.len() / width > MAX_SWITCH_ELEMENTS {
                return Err(FormatViolation::TooManySwitchElements {
                    count: data.len() / width,
                });
            }
        }
        _ => {}
    }

    Ok(())
}

fn branch16(offset: i32) -> Result<i16, FormatViolation> {
    i16::try_from(offset).map_err(|_| FormatViolation::LiteralOutOfRange {
        literal: offset as i64,
        bits: 16,
    })
}

fn branch8(offset: i32) -> Result<i8, FormatViolation> {
    i8::try_from(offset).map_err(|_| FormatViolation::LiteralOutOfRange {
        literal: offset as i64,
        bits: 8,
    })
}

fn index16(index: u32) -> Result<u16, FormatViolation> {
    u16::try_from(index).map_err(|_| FormatViolation::ReferenceOutOfRange { index, bits: 16 })
}

fn nonzero(offset: i32, opcode: Opcode) -> Result<i32, FormatViolation> {
    if offset == 0 && opcode.forbids_zero_offset() {
        Err(FormatViolation::ZeroBranchOffset)
    } else {
        Ok(offset)
    }
}

/// Encode one instruction into `out`
///
/// The produced record is `instruction.code_units() * 2` bytes long. Payload
/// records are padded to an even byte count where the format requires it
/// (array data with an odd byte length).
pub fn encode(instruction: &RawInstruction, out: &mut Vec<u8>) -> Result<(), Error> {
    check(instruction)?;

    let op = |opcode: Opcode| opcode.value();
    match instruction {
        Instruction::F10x { opcode } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(0)?;
        }
        Instruction::F10t { opcode, target } => {
            let offset = branch8(nonzero(*target, *opcode)?)?;
            out.write_u8(op(*opcode))?;
            out.write_i8(offset)?;
        }
        Instruction::F11n { opcode, a, literal } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(((*literal as u8) << 4) | (a & 0x0f))?;
        }
        Instruction::F11x { opcode, a } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(*a)?;
        }
        Instruction::F12x { opcode, a, b } => {
            out.write_u8(op(*opcode))?;
            out.write_u8((b << 4) | (a & 0x0f))?;
        }
        Instruction::F20t { opcode, target } => {
            let offset = branch16(nonzero(*target, *opcode)?)?;
            out.write_u8(op(*opcode))?;
            out.write_u8(0)?;
            out.write_i16::<LittleEndian>(offset)?;
        }
        Instruction::F21c {
            opcode,
            a,
            reference,
        } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(*a)?;
            out.write_u16::<LittleEndian>(index16(*reference)?)?;
        }
        Instruction::F21h { opcode, a, literal }
        | Instruction::F21s { opcode, a, literal } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(*a)?;
            out.write_i16::<LittleEndian>(*literal)?;
        }
        Instruction::F21t { opcode, a, target } => {
            let offset = branch16(nonzero(*target, *opcode)?)?;
            out.write_u8(op(*opcode))?;
            out.write_u8(*a)?;
            out.write_i16::<LittleEndian>(offset)?;
        }
        Instruction::F22b {
            opcode,
            a,
            b,
            literal,
        } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(*a)?;
            out.write_u8(*b)?;
            out.write_i8(*literal)?;
        }
        Instruction::F22c {
            opcode,
            a,
            b,
            reference,
        } => {
            out.write_u8(op(*opcode))?;
            out.write_u8((b << 4) | (a & 0x0f))?;
            out.write_u16::<LittleEndian>(index16(*reference)?)?;
        }
        Instruction::F22s {
            opcode,
            a,
            b,
            literal,
        } => {
            out.write_u8(op(*opcode))?;
            out.write_u8((b << 4) | (a & 0x0f))?;
            out.write_i16::<LittleEndian>(*literal)?;
        }
        Instruction::F22t {
            opcode,
            a,
            b,
            target,
        } => {
            let offset = branch16(nonzero(*target, *opcode)?)?;
            out.write_u8(op(*opcode))?;
            out.write_u8((b << 4) | (a & 0x0f))?;
            out.write_i16::<LittleEndian>(offset)?;
        }
        Instruction::F22x { opcode, a, b } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(*a)?;
            out.write_u16::<LittleEndian>(*b)?;
        }
        Instruction::F23x { opcode, a, b, c } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(*a)?;
            out.write_u8(*b)?;
            out.write_u8(*c)?;
        }
        Instruction::F30t { opcode, target } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(0)?;
            out.write_i32::<LittleEndian>(*target)?;
        }
        Instruction::F31c {
            opcode,
            a,
            reference,
        } => {
            // The jumbo form: a full 4-byte pool index
            out.write_u8(op(*opcode))?;
            out.write_u8(*a)?;
            out.write_u32::<LittleEndian>(*reference)?;
        }
        Instruction::F31i { opcode, a, literal } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(*a)?;
            out.write_i32::<LittleEndian>(*literal)?;
        }
        Instruction::F31t { opcode, a, target } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(*a)?;
            out.write_i32::<LittleEndian>(*target)?;
        }
        Instruction::F32x { opcode, a, b } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(0)?;
            out.write_u16::<LittleEndian>(*a)?;
            out.write_u16::<LittleEndian>(*b)?;
        }
        Instruction::F35c {
            opcode,
            registers,
            reference,
        } => {
            let reg = |index: usize| registers.get(index).copied().unwrap_or(0);
            out.write_u8(op(*opcode))?;
            out.write_u8(((registers.len() as u8) << 4) | (reg(4) & 0x0f))?;
            out.write_u16::<LittleEndian>(index16(*reference)?)?;
            out.write_u8((reg(1) << 4) | (reg(0) & 0x0f))?;
            out.write_u8((reg(3) << 4) | (reg(2) & 0x0f))?;
        }
        Instruction::F3rc {
            opcode,
            start,
            count,
            reference,
        } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(*count)?;
            out.write_u16::<LittleEndian>(index16(*reference)?)?;
            out.write_u16::<LittleEndian>(*start)?;
        }
        Instruction::F51l { opcode, a, literal } => {
            out.write_u8(op(*opcode))?;
            out.write_u8(*a)?;
            out.write_i64::<LittleEndian>(*literal)?;
        }
        Instruction::PackedSwitchPayload { first_key, targets } => {
            out.write_u8(0x00)?;
            out.write_u8(PACKED_SWITCH_IDENT)?;
            out.write_u16::<LittleEndian>(targets.len() as u16)?;
            out.write_i32::<LittleEndian>(*first_key)?;
            for target in targets {
                out.write_i32::<LittleEndian>(*target)?;
            }
        }
        Instruction::SparseSwitchPayload { elements } => {
            out.write_u8(0x00)?;
            out.write_u8(SPARSE_SWITCH_IDENT)?;
            out.write_u16::<LittleEndian>(elements.len() as u16)?;
            for (key, _) in elements {
                out.write_i32::<LittleEndian>(*key)?;
            }
            for (_, target) in elements {
                out.write_i32::<LittleEndian>(*target)?;
            }
        }
        Instruction::ArrayDataPayload {
            element_width,
            data,
        } => {
            out.write_u8(0x00)?;
            out.write_u8(ARRAY_DATA_IDENT)?;
            out.write_u16::<LittleEndian>(*element_width)?;
            out.write_u32::<LittleEndian>((data.len() / *element_width as usize) as u32)?;
            out.extend_from_slice(data);
            if data.len() % 2 != 0 {
                out.write_u8(0)?;
            }
        }
    }

    Ok(())
}

/// Decode one instruction starting at byte `position`
///
/// Exact inverse of [`encode`]; advances `position` past the record.
pub fn decode(code: &[u8], position: &mut usize) -> Result<RawInstruction, Error> {
    let start = *position;
    let truncated = || Error::Truncated { offset: start };
    let mut bytes = code.get(start..).ok_or_else(truncated)?;

    let first = bytes.read_u8().map_err(|_| truncated())?;
    let second = bytes.read_u8().map_err(|_| truncated())?;

    // Opcode 0x00 with a non-zero high byte introduces a payload
    if first == 0x00 && second != 0x00 {
        let instruction = match second {
            PACKED_SWITCH_IDENT => {
                let size = bytes.read_u16::<LittleEndian>().map_err(|_| truncated())?;
                let first_key = bytes.read_i32::<LittleEndian>().map_err(|_| truncated())?;
                let mut targets = Vec::with_capacity(size as usize);
                for _ in 0..size {
                    targets.push(bytes.read_i32::<LittleEndian>().map_err(|_| truncated())?);
                }
                Instruction::PackedSwitchPayload { first_key, targets }
            }
            SPARSE_SWITCH_IDENT => {
                let size = bytes.read_u16::<LittleEndian>().map_err(|_| truncated())?;
                let mut keys = Vec::with_capacity(size as usize);
                for _ in 0..size {
                    keys.push(bytes.read_i32::<LittleEndian>().map_err(|_| truncated())?);
                }
                let mut elements = Vec::with_capacity(size as usize);
                for key in keys {
                    let target = bytes.read_i32::<LittleEndian>().map_err(|_| truncated())?;
                    elements.push((key, target));
                }
                Instruction::SparseSwitchPayload { elements }
            }
            ARRAY_DATA_IDENT => {
                let element_width = bytes.read_u16::<LittleEndian>().map_err(|_| truncated())?;
                let count = bytes.read_u32::<LittleEndian>().map_err(|_| truncated())?;
                let byte_length = count as usize * element_width as usize;
                if bytes.len() < byte_length {
                    return Err(truncated());
                }
                let data = bytes[..byte_length].to_vec();
                Instruction::ArrayDataPayload {
                    element_width,
                    data,
                }
            }
            other => return Err(Error::UnknownOpcode(other)),
        };
        *position = start + instruction.code_units() as usize * 2;
        return Ok(instruction);
    }

    let opcode = Opcode::from_value(first).ok_or(Error::UnknownOpcode(first))?;
    let instruction = match opcode.format() {
        Format::F10x => Instruction::F10x { opcode },
        Format::F10t => Instruction::F10t {
            opcode,
            target: second as i8 as i32,
        },
        Format::F11n => Instruction::F11n {
            opcode,
            a: second & 0x0f,
            // Arithmetic shift to sign-extend the high nibble
            literal: (second as i8) >> 4,
        },
        Format::F11x => Instruction::F11x { opcode, a: second },
        Format::F12x => Instruction::F12x {
            opcode,
            a: second & 0x0f,
            b: second >> 4,
        },
        Format::F20t => Instruction::F20t {
            opcode,
            target: bytes.read_i16::<LittleEndian>().map_err(|_| truncated())? as i32,
        },
        Format::F21c => Instruction::F21c {
            opcode,
            a: second,
            reference: bytes.read_u16::<LittleEndian>().map_err(|_| truncated())? as u32,
        },
        Format::F21h => Instruction::F21h {
            opcode,
            a: second,
            literal: bytes.read_i16::<LittleEndian>().map_err(|_| truncated())?,
        },
        Format::F21s => Instruction::F21s {
            opcode,
            a: second,
            literal: bytes.read_i16::<LittleEndian>().map_err(|_| truncated())?,
        },
        Format::F21t => Instruction::F21t {
            opcode,
            a: second,
            target: bytes.read_i16::<LittleEndian>().map_err(|_| truncated())? as i32,
        },
        Format::F22b => Instruction::F22b {
            opcode,
            a: second,
            b: bytes.read_u8().map_err(|_| truncated())?,
            literal: bytes.read_i8().map_err(|_| truncated())?,
        },
        Format::F22c => Instruction::F22c {
            opcode,
            a: second & 0x0f,
            b: second >> 4,
            reference: bytes.read_u16::<LittleEndian>().map_err(|_| truncated())? as u32,
        },
        Format::F22s => Instruction::F22s {
            opcode,
            a: second & 0x0f,
            b: second >> 4,
            literal: bytes.read_i16::<LittleEndian>().map_err(|_| truncated())?,
        },
        Format::F22t => Instruction::F22t {
            opcode,
            a: second & 0x0f,
            b: second >> 4,
            target: bytes.read_i16::<LittleEndian>().map_err(|_| truncated())? as i32,
        },
        Format::F22x => Instruction::F22x {
            opcode,
            a: second,
            b: bytes.read_u16::<LittleEndian>().map_err(|_| truncated())?,
        },
        Format::F23x => Instruction::F23x {
            opcode,
            a: second,
            b: bytes.read_u8().map_err(|_| truncated())?,
            c: bytes.read_u8().map_err(|_| truncated())?,
        },
        Format::F30t => Instruction::F30t {
            opcode,
            target: bytes.read_i32::<LittleEndian>().map_err(|_| truncated())?,
        },
        Format::F31c => Instruction::F31c {
            opcode,
            a: second,
            reference: bytes.read_u32::<LittleEndian>().map_err(|_| truncated())?,
        },
        Format::F31i => Instruction::F31i {
            opcode,
            a: second,
            literal: bytes.read_i32::<LittleEndian>().map_err(|_| truncated())?,
        },
        Format::F31t => Instruction::F31t {
            opcode,
            a: second,
            target: bytes.read_i32::<LittleEndian>().map_err(|_| truncated())?,
        },
        Format::F32x => Instruction::F32x {
            opcode,
            a: bytes.read_u16::<LittleEndian>().map_err(|_| truncated())?,
            b: bytes.read_u16::<LittleEndian>().map_err(|_| truncated())?,
        },
        Format::F35c => {
            let count = (second >> 4) as usize;
            if count > 5 {
                return Err(FormatViolation::TooManyRegisters { count }.into());
            }
            let reference = bytes.read_u16::<LittleEndian>().map_err(|_| truncated())? as u32;
            let low = bytes.read_u8().map_err(|_| truncated())?;
            let high = bytes.read_u8().map_err(|_| truncated())?;
            let all = [low & 0x0f, low >> 4, high & 0x0f, high >> 4, second & 0x0f];
            Instruction::F35c {
                opcode,
                registers: all[..count].to_vec(),
                reference,
            }
        }
        Format::F3rc => Instruction::F3rc {
            opcode,
            count: second,
            reference: bytes.read_u16::<LittleEndian>().map_err(|_| truncated())? as u32,
            start: bytes.read_u16::<LittleEndian>().map_err(|_| truncated())?,
        },
        Format::F51l => Instruction::F51l {
            opcode,
            a: second,
            literal: bytes.read_i64::<LittleEndian>().map_err(|_| truncated())?,
        },
    };

    *position = start + instruction.code_units() as usize * 2;
    Ok(instruction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(instruction: &RawInstruction) -> Vec<u8> {
        let mut out = vec![];
        encode(instruction, &mut out).unwrap();
        out
    }

    fn round_trip(instruction: RawInstruction) {
        let bytes = encoded(&instruction);
        assert_eq!(bytes.len(), instruction.code_units() as usize * 2);
        let mut position = 0;
        let decoded = decode(&bytes, &mut position).unwrap();
        assert_eq!(decoded, instruction);
        assert_eq!(position, bytes.len());
    }

    #[test]
    fn invoke_virtual_packing() {
        // invoke-virtual {v0, v1, v2, v3, v4}, method@0
        let instruction = Instruction::F35c {
            opcode: Opcode::InvokeVirtual,
            registers: vec![0, 1, 2, 3, 4],
            reference: 0,
        };
        assert_eq!(
            encoded(&instruction),
            vec![0x6e, 0x54, 0x00, 0x00, 0x10, 0x32]
        );
        round_trip(instruction);
    }

    #[test]
    fn const4_packs_nibbles() {
        // const/4 v1, -1
        let instruction = Instruction::F11n {
            opcode: Opcode::Const4,
            a: 1,
            literal: -1,
        };
        assert_eq!(encoded(&instruction), vec![0x12, 0xf1]);
        round_trip(instruction);
    }

    #[test]
    fn goto_forms() {
        round_trip(Instruction::F10t {
            opcode: Opcode::Goto,
            target: -1,
        });
        round_trip(Instruction::F20t {
            opcode: Opcode::Goto16,
            target: i16::MIN as i32,
        });
        round_trip(Instruction::F30t {
            opcode: Opcode::Goto32,
            target: i32::MIN,
        });
        // goto/32 may branch to itself
        round_trip(Instruction::F30t {
            opcode: Opcode::Goto32,
            target: 0,
        });
    }

    #[test]
    fn boundary_operands_round_trip() {
        round_trip(Instruction::F10x {
            opcode: Opcode::ReturnVoid,
        });
        for literal in [-8i8, 7] {
            round_trip(Instruction::F11n {
                opcode: Opcode::Const4,
                a: 15,
                literal,
            });
        }
        round_trip(Instruction::F11x {
            opcode: Opcode::MoveResult,
            a: 255,
        });
        round_trip(Instruction::F12x {
            opcode: Opcode::Move,
            a: 15,
            b: 15,
        });
        round_trip(Instruction::F21c {
            opcode: Opcode::ConstString,
            a: 255,
            reference: 0xffff,
        });
        round_trip(Instruction::F21h {
            opcode: Opcode::ConstHigh16,
            a: 255,
            literal: i16::MIN,
        });
        round_trip(Instruction::F21s {
            opcode: Opcode::Const16,
            a: 0,
            literal: i16::MAX,
        });
        round_trip(Instruction::F21t {
            opcode: Opcode::IfEqz,
            a: 7,
            target: -2,
        });
        round_trip(Instruction::F22b {
            opcode: Opcode::AddIntLit8,
            a: 255,
            b: 255,
            literal: i8::MIN,
        });
        round_trip(Instruction::F22c {
            opcode: Opcode::Iget,
            a: 3,
            b: 4,
            reference: 0xffff,
        });
        round_trip(Instruction::F22s {
            opcode: Opcode::AddIntLit16,
            a: 1,
            b: 2,
            literal: -1,
        });
        round_trip(Instruction::F22t {
            opcode: Opcode::IfLt,
            a: 0,
            b: 15,
            target: i16::MAX as i32,
        });
        round_trip(Instruction::F22x {
            opcode: Opcode::MoveFrom16,
            a: 255,
            b: u16::MAX,
        });
        round_trip(Instruction::F23x {
            opcode: Opcode::AddInt,
            a: 1,
            b: 2,
            c: 3,
        });
        round_trip(Instruction::F31c {
            opcode: Opcode::ConstStringJumbo,
            a: 0,
            reference: u32::MAX,
        });
        round_trip(Instruction::F31i {
            opcode: Opcode::Const,
            a: 9,
            literal: i32::MIN,
        });
        round_trip(Instruction::F31t {
            opcode: Opcode::PackedSwitch,
            a: 255,
            target: i32::MAX,
        });
        round_trip(Instruction::F32x {
            opcode: Opcode::Move16,
            a: u16::MAX,
            b: 0,
        });
        round_trip(Instruction::F35c {
            opcode: Opcode::FilledNewArray,
            registers: vec![],
            reference: 1,
        });
        round_trip(Instruction::F35c {
            opcode: Opcode::InvokeStatic,
            registers: vec![5],
            reference: 2,
        });
        round_trip(Instruction::F3rc {
            opcode: Opcode::InvokeVirtualRange,
            start: 16,
            count: 255,
            reference: 3,
        });
        round_trip(Instruction::F51l {
            opcode: Opcode::ConstWide,
            a: 0,
            literal: i64::MIN,
        });
        round_trip(Instruction::F51l {
            opcode: Opcode::ConstWide,
            a: 255,
            literal: i64::MAX,
        });
    }

    #[test]
    fn payload_round_trips() {
        round_trip(Instruction::PackedSwitchPayload {
            first_key: i32::MIN,
            targets: vec![6, -2, 100],
        });
        round_trip(Instruction::SparseSwitchPayload {
            elements: vec![(-10, 4), (0, 8), (1000, 12)],
        });
        round_trip(Instruction::SparseSwitchPayload { elements: vec![] });
        // Odd byte count gets a pad byte, which decode strips again
        round_trip(Instruction::ArrayDataPayload {
            element_width: 1,
            data: vec![1, 2, 3],
        });
        round_trip(Instruction::ArrayDataPayload {
            element_width: 8,
            data: vec![0xff; 16],
        });
    }

    #[test]
    fn jumbo_string_uses_four_byte_index() {
        let jumbo = Instruction::F31c {
            opcode: Opcode::ConstStringJumbo,
            a: 1,
            reference: 0x0001_0000,
        };
        let bytes = encoded(&jumbo);
        assert_eq!(bytes, vec![0x1b, 0x01, 0x00, 0x00, 0x01, 0x00]);

        // The non-jumbo form refuses an index that needs more than 16 bits
        let narrow = Instruction::F21c {
            opcode: Opcode::ConstString,
            a: 1,
            reference: 0x0001_0000,
        };
        let mut out = vec![];
        assert!(matches!(
            encode(&narrow, &mut out),
            Err(Error::Format(FormatViolation::ReferenceOutOfRange { .. }))
        ));
    }

    #[test]
    fn zero_offset_short_branches_are_rejected() {
        for instruction in [
            Instruction::F10t {
                opcode: Opcode::Goto,
                target: 0,
            },
            Instruction::F20t {
                opcode: Opcode::Goto16,
                target: 0,
            },
            Instruction::F21t {
                opcode: Opcode::IfEqz,
                a: 0,
                target: 0,
            },
            Instruction::F22t {
                opcode: Opcode::IfEq,
                a: 0,
                b: 1,
                target: 0,
            },
        ] {
            let mut out = vec![];
            assert!(matches!(
                encode(&instruction, &mut out),
                Err(Error::Format(FormatViolation::ZeroBranchOffset))
            ));
        }
    }

    #[test]
    fn construction_violations() {
        assert!(matches!(
            check(&Instruction::<i32, u32>::F11n {
                opcode: Opcode::Const4,
                a: 0,
                literal: 8,
            }),
            Err(FormatViolation::LiteralOutOfRange { .. })
        ));
        assert!(matches!(
            check(&Instruction::<i32, u32>::F12x {
                opcode: Opcode::Move,
                a: 16,
                b: 0,
            }),
            Err(FormatViolation::RegisterOutOfRange { .. })
        ));
        assert!(matches!(
            check(&Instruction::<i32, u32>::F10x {
                opcode: Opcode::Move,
            }),
            Err(FormatViolation::WrongFormat { .. })
        ));
        assert!(matches!(
            check(&Instruction::<i32, u32>::SparseSwitchPayload {
                elements: vec![(4, 0), (4, 4)],
            }),
            Err(FormatViolation::UnsortedSparseSwitch { index: 1 })
        ));
        assert!(matches!(
            check(&Instruction::<i32, u32>::ArrayDataPayload {
                element_width: 4,
                data: vec![0; 6],
            }),
            Err(FormatViolation::BadArrayPayload { .. })
        ));
        assert!(matches!(
            check(&Instruction::<i32, u32>::F35c {
                opcode: Opcode::InvokeStatic,
                registers: vec![0, 1, 2, 3, 4, 5],
                reference: 0,
            }),
            Err(FormatViolation::TooManyRegisters { count: 6 })
        ));
    }
}

//! The instruction model
//!
//! Every opcode belongs to exactly one binary format, and the format fully
//! determines the byte layout and operand field widths. Rather than one
//! struct per format behind dynamic dispatch, [`Instruction`] is a single
//! tagged union keyed by format, so encoding and decoding are exhaustive
//! matches (see [`super::codec`]).
//!
//! `Instruction` is generic over its branch-target type `T` and its
//! reference-operand type `R`:
//!
//!   - while a method body is being assembled, targets are labels and
//!     references are pool handles
//!   - after the final address-resolution pass, targets are relative offsets
//!     in code units
//!   - on the wire, references are raw section indices
//!
//! Offset-carrying operands therefore hold the label itself, never a cached
//! address: rebinding a label before the final pass is automatically picked
//! up when the operand is mapped to its resolved form.

use crate::dex::pools::ReferenceKind;

/// Binary formats of the fixed-length instructions
///
/// The names follow the container format's convention: total code units,
/// register count, then a letter for the extra operand kind.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Format {
    F10x,
    F10t,
    F11n,
    F11x,
    F12x,
    F20t,
    F21c,
    F21h,
    F21s,
    F21t,
    F22b,
    F22c,
    F22s,
    F22t,
    F22x,
    F23x,
    F30t,
    F31c,
    F31i,
    F31t,
    F32x,
    F35c,
    F3rc,
    F51l,
}

impl Format {
    /// Size of an instruction of this format, in 16-bit code units
    pub fn code_units(self) -> u32 {
        match self {
            Format::F10x | Format::F10t | Format::F11n | Format::F11x | Format::F12x => 1,
            Format::F20t
            | Format::F21c
            | Format::F21h
            | Format::F21s
            | Format::F21t
            | Format::F22b
            | Format::F22c
            | Format::F22s
            | Format::F22t
            | Format::F22x
            | Format::F23x => 2,
            Format::F30t
            | Format::F31c
            | Format::F31i
            | Format::F31t
            | Format::F32x
            | Format::F35c
            | Format::F3rc => 3,
            Format::F51l => 5,
        }
    }
}

macro_rules! opcodes {
    ($($name:ident = $value:literal, $mnemonic:literal, $format:ident, $reference:expr;)*) => {
        /// Every opcode of the instruction set
        #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
        pub enum Opcode {
            $($name,)*
        }

        impl Opcode {
            /// The opcode byte
            pub fn value(self) -> u8 {
                match self {
                    $(Opcode::$name => $value,)*
                }
            }

            /// Look an opcode up by its byte value
            pub fn from_value(value: u8) -> Option<Opcode> {
                match value {
                    $($value => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            /// Assembler mnemonic
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }

            /// The binary format this opcode uses
            pub fn format(self) -> Format {
                match self {
                    $(Opcode::$name => Format::$format,)*
                }
            }

            /// Kind of pooled item the reference operand must name, if the
            /// format carries one
            pub fn reference_kind(self) -> Option<ReferenceKind> {
                match self {
                    $(Opcode::$name => $reference,)*
                }
            }
        }
    };
}

use ReferenceKind::*;

opcodes! {
    Nop = 0x00, "nop", F10x, None;
    Move = 0x01, "move", F12x, None;
    MoveFrom16 = 0x02, "move/from16", F22x, None;
    Move16 = 0x03, "move/16", F32x, None;
    MoveWide = 0x04, "move-wide", F12x, None;
    MoveWideFrom16 = 0x05, "move-wide/from16", F22x, None;
    MoveWide16 = 0x06, "move-wide/16", F32x, None;
    MoveObject = 0x07, "move-object", F12x, None;
    MoveObjectFrom16 = 0x08, "move-object/from16", F22x, None;
    MoveObject16 = 0x09, "move-object/16", F32x, None;
    MoveResult = 0x0a, "move-result", F11x, None;
    MoveResultWide = 0x0b, "move-result-wide", F11x, None;
    MoveResultObject = 0x0c, "move-result-object", F11x, None;
    MoveException = 0x0d, "move-exception", F11x, None;
    ReturnVoid = 0x0e, "return-void", F10x, None;
    Return = 0x0f, "return", F11x, None;
    ReturnWide = 0x10, "return-wide", F11x, None;
    ReturnObject = 0x11, "return-object", F11x, None;
    Const4 = 0x12, "const/4", F11n, None;
    Const16 = 0x13, "const/16", F21s, None;
    Const = 0x14, "const", F31i, None;
    ConstHigh16 = 0x15, "const/high16", F21h, None;
    ConstWide16 = 0x16, "const-wide/16", F21s, None;
    ConstWide32 = 0x17, "const-wide/32", F31i, None;
    ConstWide = 0x18, "const-wide", F51l, None;
    ConstWideHigh16 = 0x19, "const-wide/high16", F21h, None;
    ConstString = 0x1a, "const-string", F21c, Some(String);
    ConstStringJumbo = 0x1b, "const-string/jumbo", F31c, Some(String);
    ConstClass = 0x1c, "const-class", F21c, Some(Type);
    MonitorEnter = 0x1d, "monitor-enter", F11x, None;
    MonitorExit = 0x1e, "monitor-exit", F11x, None;
    CheckCast = 0x1f, "check-cast", F21c, Some(Type);
    InstanceOf = 0x20, "instance-of", F22c, Some(Type);
    ArrayLength = 0x21, "array-length", F12x, None;
    NewInstance = 0x22, "new-instance", F21c, Some(Type);
    NewArray = 0x23, "new-array", F22c, Some(Type);
    FilledNewArray = 0x24, "filled-new-array", F35c, Some(Type);
    FilledNewArrayRange = 0x25, "filled-new-array/range", F3rc, Some(Type);
    FillArrayData = 0x26, "fill-array-data", F31t, None;
    Throw = 0x27, "throw", F11x, None;
    Goto = 0x28, "goto", F10t, None;
    Goto16 = 0x29, "goto/16", F20t, None;
    Goto32 = 0x2a, "goto/32", F30t, None;
    PackedSwitch = 0x2b, "packed-switch", F31t, None;
    SparseSwitch = 0x2c, "sparse-switch", F31t, None;
    CmplFloat = 0x2d, "cmpl-float", F23x, None;
    CmpgFloat = 0x2e, "cmpg-float", F23x, None;
    CmplDouble = 0x2f, "cmpl-double", F23x, None;
    CmpgDouble = 0x30, "cmpg-double", F23x, None;
    CmpLong = 0x31, "cmp-long", F23x, None;
    IfEq = 0x32, "if-eq", F22t, None;
    IfNe = 0x33, "if-ne", F22t, None;
    IfLt = 0x34, "if-lt", F22t, None;
    IfGe = 0x35, "if-ge", F22t, None;
    IfGt = 0x36, "if-gt", F22t, None;
    IfLe = 0x37, "if-le", F22t, None;
    IfEqz = 0x38, "if-eqz", F21t, None;
    IfNez = 0x39, "if-nez", F21t, None;
    IfLtz = 0x3a, "if-ltz", F21t, None;
    IfGez = 0x3b, "if-gez", F21t, None;
    IfGtz = 0x3c, "if-gtz", F21t, None;
    IfLez = 0x3d, "if-lez", F21t, None;
    Aget = 0x44, "aget", F23x, None;
    AgetWide = 0x45, "aget-wide", F23x, None;
    AgetObject = 0x46, "aget-object", F23x, None;
    AgetBoolean = 0x47, "aget-boolean", F23x, None;
    AgetByte = 0x48, "aget-byte", F23x, None;
    AgetChar = 0x49, "aget-char", F23x, None;
    AgetShort = 0x4a, "aget-short", F23x, None;
    Aput = 0x4b, "aput", F23x, None;
    AputWide = 0x4c, "aput-wide", F23x, None;
    AputObject = 0x4d, "aput-object", F23x, None;
    AputBoolean = 0x4e, "aput-boolean", F23x, None;
    AputByte = 0x4f, "aput-byte", F23x, None;
    AputChar = 0x50, "aput-char", F23x, None;
    AputShort = 0x51, "aput-short", F23x, None;
    Iget = 0x52, "iget", F22c, Some(Field);
    IgetWide = 0x53, "iget-wide", F22c, Some(Field);
    IgetObject = 0x54, "iget-object", F22c, Some(Field);
    IgetBoolean = 0x55, "iget-boolean", F22c, Some(Field);
    IgetByte = 0x56, "iget-byte", F22c, Some(Field);
    IgetChar = 0x57, "iget-char", F22c, Some(Field);
    IgetShort = 0x58, "iget-short", F22c, Some(Field);
    Iput = 0x59, "iput", F22c, Some(Field);
    IputWide = 0x5a, "iput-wide", F22c, Some(Field);
    IputObject = 0x5b, "iput-object", F22c, Some(Field);
    IputBoolean = 0x5c, "iput-boolean", F22c, Some(Field);
    IputByte = 0x5d, "iput-byte", F22c, Some(Field);
    IputChar = 0x5e, "iput-char", F22c, Some(Field);
    IputShort = 0x5f, "iput-short", F22c, Some(Field);
    Sget = 0x60, "sget", F21c, Some(Field);
    SgetWide = 0x61, "sget-wide", F21c, Some(Field);
    SgetObject = 0x62, "sget-object", F21c, Some(Field);
    SgetBoolean = 0x63, "sget-boolean", F21c, Some(Field);
    SgetByte = 0x64, "sget-byte", F21c, Some(Field);
    SgetChar = 0x65, "sget-char", F21c, Some(Field);
    SgetShort = 0x66, "sget-short", F21c, Some(Field);
    Sput = 0x67, "sput", F21c, Some(Field);
    SputWide = 0x68, "sput-wide", F21c, Some(Field);
    SputObject = 0x69, "sput-object", F21c, Some(Field);
    SputBoolean = 0x6a, "sput-boolean", F21c, Some(Field);
    SputByte = 0x6b, "sput-byte", F21c, Some(Field);
    SputChar = 0x6c, "sput-char", F21c, Some(Field);
    SputShort = 0x6d, "sput-short", F21c, Some(Field);
    InvokeVirtual = 0x6e, "invoke-virtual", F35c, Some(Method);
    InvokeSuper = 0x6f, "invoke-super", F35c, Some(Method);
    InvokeDirect = 0x70, "invoke-direct", F35c, Some(Method);
    InvokeStatic = 0x71, "invoke-static", F35c, Some(Method);
    InvokeInterface = 0x72, "invoke-interface", F35c, Some(Method);
    InvokeVirtualRange = 0x74, "invoke-virtual/range", F3rc, Some(Method);
    InvokeSuperRange = 0x75, "invoke-super/range", F3rc, Some(Method);
    InvokeDirectRange = 0x76, "invoke-direct/range", F3rc, Some(Method);
    InvokeStaticRange = 0x77, "invoke-static/range", F3rc, Some(Method);
    InvokeInterfaceRange = 0x78, "invoke-interface/range", F3rc, Some(Method);
    NegInt = 0x7b, "neg-int", F12x, None;
    NotInt = 0x7c, "not-int", F12x, None;
    NegLong = 0x7d, "neg-long", F12x, None;
    NotLong = 0x7e, "not-long", F12x, None;
    NegFloat = 0x7f, "neg-float", F12x, None;
    NegDouble = 0x80, "neg-double", F12x, None;
    IntToLong = 0x81, "int-to-long", F12x, None;
    IntToFloat = 0x82, "int-to-float", F12x, None;
    IntToDouble = 0x83, "int-to-double", F12x, None;
    LongToInt = 0x84, "long-to-int", F12x, None;
    LongToFloat = 0x85, "long-to-float", F12x, None;
    LongToDouble = 0x86, "long-to-double", F12x, None;
    FloatToInt = 0x87, "float-to-int", F12x, None;
    FloatToLong = 0x88, "float-to-long", F12x, None;
    FloatToDouble = 0x89, "float-to-double", F12x, None;
    DoubleToInt = 0x8a, "double-to-int", F12x, None;
    DoubleToLong = 0x8b, "double-to-long", F12x, None;
    DoubleToFloat = 0x8c, "double-to-float", F12x, None;
    IntToByte = 0x8d, "int-to-byte", F12x, None;
    IntToChar = 0x8e, "int-to-char", F12x, None;
    IntToShort = 0x8f, "int-to-short", F12x, None;
    AddInt = 0x90, "add-int", F23x, None;
    SubInt = 0x91, "sub-int", F23x, None;
    MulInt = 0x92, "mul-int", F23x, None;
    DivInt = 0x93, "div-int", F23x, None;
    RemInt = 0x94, "rem-int", F23x, None;
    AndInt = 0x95, "and-int", F23x, None;
    OrInt = 0x96, "or-int", F23x, None;
    XorInt = 0x97, "xor-int", F23x, None;
    ShlInt = 0x98, "shl-int", F23x, None;
    ShrInt = 0x99, "shr-int", F23x, None;
    UshrInt = 0x9a, "ushr-int", F23x, None;
    AddLong = 0x9b, "add-long", F23x, None;
    SubLong = 0x9c, "sub-long", F23x, None;
    MulLong = 0x9d, "mul-long", F23x, None;
    DivLong = 0x9e, "div-long", F23x, None;
    RemLong = 0x9f, "rem-long", F23x, None;
    AndLong = 0xa0, "and-long", F23x, None;
    OrLong = 0xa1, "or-long", F23x, None;
    XorLong = 0xa2, "xor-long", F23x, None;
    ShlLong = 0xa3, "shl-long", F23x, None;
    ShrLong = 0xa4, "shr-long", F23x, None;
    UshrLong = 0xa5, "ushr-long", F23x, None;
    AddFloat = 0xa6, "add-float", F23x, None;
    SubFloat = 0xa7, "sub-float", F23x, None;
    MulFloat = 0xa8, "mul-float", F23x, None;
    DivFloat = 0xa9, "div-float", F23x, None;
    RemFloat = 0xaa, "rem-float", F23x, None;
    AddDouble = 0xab, "add-double", F23x, None;
    SubDouble = 0xac, "sub-double", F23x, None;
    MulDouble = 0xad, "mul-double", F23x, None;
    DivDouble = 0xae, "div-double", F23x, None;
    RemDouble = 0xaf, "rem-double", F23x, None;
    AddInt2addr = 0xb0, "add-int/2addr", F12x, None;
    SubInt2addr = 0xb1, "sub-int/2addr", F12x, None;
    MulInt2addr = 0xb2, "mul-int/2addr", F12x, None;
    DivInt2addr = 0xb3, "div-int/2addr", F12x, None;
    RemInt2addr = 0xb4, "rem-int/2addr", F12x, None;
    AndInt2addr = 0xb5, "and-int/2addr", F12x, None;
    OrInt2addr = 0xb6, "or-int/2addr", F12x, None;
    XorInt2addr = 0xb7, "xor-int/2addr", F12x, None;
    ShlInt2addr = 0xb8, "shl-int/2addr", F12x, None;
    ShrInt2addr = 0xb9, "shr-int/2addr", F12x, None;
    UshrInt2addr = 0xba, "ushr-int/2addr", F12x, None;
    AddLong2addr = 0xbb, "add-long/2addr", F12x, None;
    SubLong2addr = 0xbc, "sub-long/2addr", F12x, None;
    MulLong2addr = 0xbd, "mul-long/2addr", F12x, None;
    DivLong2addr = 0xbe, "div-long/2addr", F12x, None;
    RemLong2addr = 0xbf, "rem-long/2addr", F12x, None;
    AndLong2addr = 0xc0, "and-long/2addr", F12x, None;
    OrLong2addr = 0xc1, "or-long/2addr", F12x, None;
    XorLong2addr = 0xc2, "xor-long/2addr", F12x, None;
    ShlLong2addr = 0xc3, "shl-long/2addr", F12x, None;
    ShrLong2addr = 0xc4, "shr-long/2addr", F12x, None;
    UshrLong2addr = 0xc5, "ushr-long/2addr", F12x, None;
    AddFloat2addr = 0xc6, "add-float/2addr", F12x, None;
    SubFloat2addr = 0xc7, "sub-float/2addr", F12x, None;
    MulFloat2addr = 0xc8, "mul-float/2addr", F12x, None;
    DivFloat2addr = 0xc9, "div-float/2addr", F12x, None;
    RemFloat2addr = 0xca, "rem-float/2addr", F12x, None;
    AddDouble2addr = 0xcb, "add-double/2addr", F12x, None;
    SubDouble2addr = 0xcc, "sub-double/2addr", F12x, None;
    MulDouble2addr = 0xcd, "mul-double/2addr", F12x, None;
    DivDouble2addr = 0xce, "div-double/2addr", F12x, None;
    RemDouble2addr = 0xcf, "rem-double/2addr", F12x, None;
    AddIntLit16 = 0xd0, "add-int/lit16", F22s, None;
    RsubInt = 0xd1, "rsub-int", F22s, None;
    MulIntLit16 = 0xd2, "mul-int/lit16", F22s, None;
    DivIntLit16 = 0xd3, "div-int/lit16", F22s, None;
    RemIntLit16 = 0xd4, "rem-int/lit16", F22s, None;
    AndIntLit16 = 0xd5, "and-int/lit16", F22s, None;
    OrIntLit16 = 0xd6, "or-int/lit16", F22s, None;
    XorIntLit16 = 0xd7, "xor-int/lit16", F22s, None;
    AddIntLit8 = 0xd8, "add-int/lit8", F22b, None;
    RsubIntLit8 = 0xd9, "rsub-int/lit8", F22b, None;
    MulIntLit8 = 0xda, "mul-int/lit8", F22b, None;
    DivIntLit8 = 0xdb, "div-int/lit8", F22b, None;
    RemIntLit8 = 0xdc, "rem-int/lit8", F22b, None;
    AndIntLit8 = 0xdd, "and-int/lit8", F22b, None;
    OrIntLit8 = 0xde, "or-int/lit8", F22b, None;
    XorIntLit8 = 0xdf, "xor-int/lit8", F22b, None;
    ShlIntLit8 = 0xe0, "shl-int/lit8", F22b, None;
    ShrIntLit8 = 0xe1, "shr-int/lit8", F22b, None;
    UshrIntLit8 = 0xe2, "ushr-int/lit8", F22b, None;
}

impl Opcode {
    /// Is this one of the register-list or register-range invocations?
    pub fn is_invoke(self) -> bool {
        matches!(
            self,
            Opcode::InvokeVirtual
                | Opcode::InvokeSuper
                | Opcode::InvokeDirect
                | Opcode::InvokeStatic
                | Opcode::InvokeInterface
                | Opcode::InvokeVirtualRange
                | Opcode::InvokeSuperRange
                | Opcode::InvokeDirectRange
                | Opcode::InvokeStaticRange
                | Opcode::InvokeInterfaceRange
        )
    }

    /// Invocations that do not take a receiver word
    pub fn is_static_invoke(self) -> bool {
        matches!(self, Opcode::InvokeStatic | Opcode::InvokeStaticRange)
    }

    /// Opcodes that construct an array from explicit registers
    pub fn is_array_creation(self) -> bool {
        matches!(self, Opcode::FilledNewArray | Opcode::FilledNewArrayRange)
    }

    /// Short branches, for which a zero offset (a self-branch) is illegal
    pub fn forbids_zero_offset(self) -> bool {
        matches!(
            self.format(),
            Format::F10t | Format::F20t | Format::F21t | Format::F22t
        )
    }
}

/// One instruction, generic over the branch-target type `T` and the
/// reference-operand type `R`
///
/// The last three variants are the pseudo-instructions: payload blocks
/// introduced by an opcode byte of `0x00` plus a sub-opcode, interleaved in
/// the instruction stream but never executed. They must sit at a 4-byte
/// aligned code address; the assembler inserts a spacer `nop` when needed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction<T, R> {
    F10x { opcode: Opcode },
    F10t { opcode: Opcode, target: T },
    F11n { opcode: Opcode, a: u8, literal: i8 },
    F11x { opcode: Opcode, a: u8 },
    F12x { opcode: Opcode, a: u8, b: u8 },
    F20t { opcode: Opcode, target: T },
    F21c { opcode: Opcode, a: u8, reference: R },
    F21h { opcode: Opcode, a: u8, literal: i16 },
    F21s { opcode: Opcode, a: u8, literal: i16 },
    F21t { opcode: Opcode, a: u8, target: T },
    F22b { opcode: Opcode, a: u8, b: u8, literal: i8 },
    F22c { opcode: Opcode, a: u8, b: u8, reference: R },
    F22s { opcode: Opcode, a: u8, b: u8, literal: i16 },
    F22t { opcode: Opcode, a: u8, b: u8, target: T },
    F22x { opcode: Opcode, a: u8, b: u16 },
    F23x { opcode: Opcode, a: u8, b: u8, c: u8 },
    F30t { opcode: Opcode, target: T },
    F31c { opcode: Opcode, a: u8, reference: R },
    F31i { opcode: Opcode, a: u8, literal: i32 },
    F31t { opcode: Opcode, a: u8, target: T },
    F32x { opcode: Opcode, a: u16, b: u16 },
    F35c { opcode: Opcode, registers: Vec<u8>, reference: R },
    F3rc { opcode: Opcode, start: u16, count: u8, reference: R },
    F51l { opcode: Opcode, a: u8, literal: i64 },
    PackedSwitchPayload { first_key: i32, targets: Vec<T> },
    SparseSwitchPayload { elements: Vec<(i32, T)> },
    ArrayDataPayload { element_width: u16, data: Vec<u8> },
}

impl<T, R> Instruction<T, R> {
    /// The opcode, for everything except payloads
    pub fn opcode(&self) -> Option<Opcode> {
        match self {
            Instruction::F10x { opcode }
            | Instruction::F10t { opcode, .. }
            | Instruction::F11n { opcode, .. }
            | Instruction::F11x { opcode, .. }
            | Instruction::F12x { opcode, .. }
            | Instruction::F20t { opcode, .. }
            | Instruction::F21c { opcode, .. }
            | Instruction::F21h { opcode, .. }
            | Instruction::F21s { opcode, .. }
            | Instruction::F21t { opcode, .. }
            | Instruction::F22b { opcode, .. }
            | Instruction::F22c { opcode, .. }
            | Instruction::F22s { opcode, .. }
            | Instruction::F22t { opcode, .. }
            | Instruction::F22x { opcode, .. }
            | Instruction::F23x { opcode, .. }
            | Instruction::F30t { opcode, .. }
            | Instruction::F31c { opcode, .. }
            | Instruction::F31i { opcode, .. }
            | Instruction::F31t { opcode, .. }
            | Instruction::F32x { opcode, .. }
            | Instruction::F35c { opcode, .. }
            | Instruction::F3rc { opcode, .. }
            | Instruction::F51l { opcode, .. } => Some(*opcode),
            Instruction::PackedSwitchPayload { .. }
            | Instruction::SparseSwitchPayload { .. }
            | Instruction::ArrayDataPayload { .. } => None,
        }
    }

    /// The format this variant models (payloads have none)
    pub fn variant_format(&self) -> Option<Format> {
        Some(match self {
            Instruction::F10x { .. } => Format::F10x,
            Instruction::F10t { .. } => Format::F10t,
            Instruction::F11n { .. } => Format::F11n,
            Instruction::F11x { .. } => Format::F11x,
            Instruction::F12x { .. } => Format::F12x,
            Instruction::F20t { .. } => Format::F20t,
            Instruction::F21c { .. } => Format::F21c,
            Instruction::F21h { .. } => Format::F21h,
            Instruction::F21s { .. } => Format::F21s,
            Instruction::F21t { .. } => Format::F21t,
            Instruction::F22b { .. } => Format::F22b,
            Instruction::F22c { .. } => Format::F22c,
            Instruction::F22s { .. } => Format::F22s,
            Instruction::F22t { .. } => Format::F22t,
            Instruction::F22x { .. } => Format::F22x,
            Instruction::F23x { .. } => Format::F23x,
            Instruction::F30t { .. } => Format::F30t,
            Instruction::F31c { .. } => Format::F31c,
            Instruction::F31i { .. } => Format::F31i,
            Instruction::F31t { .. } => Format::F31t,
            Instruction::F32x { .. } => Format::F32x,
            Instruction::F35c { .. } => Format::F35c,
            Instruction::F3rc { .. } => Format::F3rc,
            Instruction::F51l { .. } => Format::F51l,
            Instruction::PackedSwitchPayload { .. }
            | Instruction::SparseSwitchPayload { .. }
            | Instruction::ArrayDataPayload { .. } => return None,
        })
    }

    /// Is this a 4-byte-aligned pseudo-instruction?
    pub fn is_payload(&self) -> bool {
        matches!(
            self,
            Instruction::PackedSwitchPayload { .. }
                | Instruction::SparseSwitchPayload { .. }
                | Instruction::ArrayDataPayload { .. }
        )
    }

    /// Size in 16-bit code units
    pub fn code_units(&self) -> u32 {
        match self {
            Instruction::PackedSwitchPayload { targets, .. } => targets.len() as u32 * 2 + 4,
            Instruction::SparseSwitchPayload { elements } => elements.len() as u32 * 4 + 2,
            Instruction::ArrayDataPayload { data, .. } => (data.len() as u32 + 1) / 2 + 4,
            other => other.variant_format().unwrap().code_units(),
        }
    }

    /// Rebuild the instruction with different target and reference types
    pub fn map<T2, R2, E>(
        &self,
        mut map_target: impl FnMut(&T) -> Result<T2, E>,
        mut map_reference: impl FnMut(&R) -> Result<R2, E>,
    ) -> Result<Instruction<T2, R2>, E> {
        use Instruction::*;
        Ok(match self {
            F10x { opcode } => F10x { opcode: *opcode },
            F10t { opcode, target } => F10t {
                opcode: *opcode,
                target: map_target(target)?,
            },
            F11n { opcode, a, literal } => F11n {
                opcode: *opcode,
                a: *a,
                literal: *literal,
            },
            F11x { opcode, a } => F11x {
                opcode: *opcode,
                a: *a,
            },
            F12x { opcode, a, b } => F12x {
                opcode: *opcode,
                a: *a,
                b: *b,
            },
            F20t { opcode, target } => F20t {
                opcode: *opcode,
                target: map_target(target)?,
            },
            F21c {
                opcode,
                a,
                reference,
            } => F21c {
                opcode: *opcode,
                a: *a,
                reference: map_reference(reference)?,
            },
            F21h { opcode, a, literal } => F21h {
                opcode: *opcode,
                a: *a,
                literal: *literal,
            },
            F21s { opcode, a, literal } => F21s {
                opcode: *opcode,
                a: *a,
                literal: *literal,
            },
            F21t { opcode, a, target } => F21t {
                opcode: *opcode,
                a: *a,
                target: map_target(target)?,
            },
            F22b {
                opcode,
                a,
                b,
                literal,
            } => F22b {
                opcode: *opcode,
                a: *a,
                b: *b,
                literal: *literal,
            },
            F22c {
                opcode,
                a,
                b,
                reference,
            } => F22c {
                opcode: *opcode,
                a: *a,
                b: *b,
                reference: map_reference(reference)?,
            },
            F22s {
                opcode,
                a,
                b,
                literal,
            } => F22s {
                opcode: *opcode,
                a: *a,
                b: *b,
                literal: *literal,
            },
            F22t {
                opcode,
                a,
                b,
                target,
            } => F22t {
                opcode: *opcode,
                a: *a,
                b: *b,
                target: map_target(target)?,
            },
            F22x { opcode, a, b } => F22x {
                opcode: *opcode,
                a: *a,
                b: *b,
            },
            F23x { opcode, a, b, c } => F23x {
                opcode: *opcode,
                a: *a,
                b: *b,
                c: *c,
            },
            F30t { opcode, target } => F30t {
                opcode: *opcode,
                target: map_target(target)?,
            },
            F31c {
                opcode,
                a,
                reference,
            } => F31c {
                opcode: *opcode,
                a: *a,
                reference: map_reference(reference)?,
            },
            F31i { opcode, a, literal } => F31i {
                opcode: *opcode,
                a: *a,
                literal: *literal,
            },
            F31t { opcode, a, target } => F31t {
                opcode: *opcode,
                a: *a,
                target: map_target(target)?,
            },
            F32x { opcode, a, b } => F32x {
                opcode: *opcode,
                a: *a,
                b: *b,
            },
            F35c {
                opcode,
                registers,
                reference,
            } => F35c {
                opcode: *opcode,
                registers: registers.clone(),
                reference: map_reference(reference)?,
            },
            F3rc {
                opcode,
                start,
                count,
                reference,
            } => F3rc {
                opcode: *opcode,
                start: *start,
                count: *count,
                reference: map_reference(reference)?,
            },
            F51l { opcode, a, literal } => F51l {
                opcode: *opcode,
                a: *a,
                literal: *literal,
            },
            PackedSwitchPayload { first_key, targets } => PackedSwitchPayload {
                first_key: *first_key,
                targets: targets
                    .iter()
                    .map(&mut map_target)
                    .collect::<Result<Vec<_>, E>>()?,
            },
            SparseSwitchPayload { elements } => SparseSwitchPayload {
                elements: elements
                    .iter()
                    .map(|(key, target)| Ok((*key, map_target(target)?)))
                    .collect::<Result<Vec<_>, E>>()?,
            },
            ArrayDataPayload {
                element_width,
                data,
            } => ArrayDataPayload {
                element_width: *element_width,
                data: data.clone(),
            },
        })
    }

    /// The branch or payload target, if this instruction carries one
    pub fn target(&self) -> Option<&T> {
        match self {
            Instruction::F10t { target, .. }
            | Instruction::F20t { target, .. }
            | Instruction::F21t { target, .. }
            | Instruction::F22t { target, .. }
            | Instruction::F30t { target, .. }
            | Instruction::F31t { target, .. } => Some(target),
            _ => None,
        }
    }

    /// The reference operand, if this instruction carries one
    pub fn reference(&self) -> Option<&R> {
        match self {
            Instruction::F21c { reference, .. }
            | Instruction::F22c { reference, .. }
            | Instruction::F31c { reference, .. }
            | Instruction::F35c { reference, .. }
            | Instruction::F3rc { reference, .. } => Some(reference),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_table_is_consistent() {
        for value in 0..=0xff_u16 {
            if let Some(opcode) = Opcode::from_value(value as u8) {
                assert_eq!(opcode.value(), value as u8);
            }
        }
        assert_eq!(Opcode::from_value(0x3e), None);
        assert_eq!(Opcode::from_value(0x73), None);
        assert_eq!(Opcode::from_value(0xe3), None);
        assert_eq!(Opcode::Goto.format(), Format::F10t);
        assert_eq!(Opcode::ConstStringJumbo.format(), Format::F31c);
    }

    #[test]
    fn code_unit_sizes() {
        let nop: Instruction<i32, u32> = Instruction::F10x {
            opcode: Opcode::Nop,
        };
        assert_eq!(nop.code_units(), 1);

        let wide: Instruction<i32, u32> = Instruction::F51l {
            opcode: Opcode::ConstWide,
            a: 0,
            literal: -1,
        };
        assert_eq!(wide.code_units(), 5);

        let packed: Instruction<i32, u32> = Instruction::PackedSwitchPayload {
            first_key: 0,
            targets: vec![4, 6, 8],
        };
        assert_eq!(packed.code_units(), 3 * 2 + 4);

        let sparse: Instruction<i32, u32> = Instruction::SparseSwitchPayload {
            elements: vec![(0, 4), (10, 6)],
        };
        assert_eq!(sparse.code_units(), 2 * 4 + 2);

        let array: Instruction<i32, u32> = Instruction::ArrayDataPayload {
            element_width: 2,
            data: vec![0; 6],
        };
        assert_eq!(array.code_units(), (6 + 1) / 2 + 4);
    }
}

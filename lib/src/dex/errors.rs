use crate::dex::code::{Format, Opcode};
use crate::dex::pools::ReferenceKind;

#[derive(Debug)]
pub enum Error {
    /// An operand handed to an instruction constructor does not fit its format
    Format(FormatViolation),

    /// `build` was invoked while a referenced label was still unbound
    UnresolvedLabel { label: String },

    /// A label name was bound to two different locations
    DuplicateLabel { label: String },

    /// A resolved branch offset does not fit the instruction format's range,
    /// reported with the address of the offending instruction
    BranchRange {
        address: u32,
        target: u32,
        format: Format,
    },

    /// A debug or try event was added at an address before its predecessor
    NonMonotonicAddress { previous: u32, address: u32 },

    /// A pooled item of the wrong kind was supplied for an opcode's reference
    InvalidReference {
        opcode: Opcode,
        expected: ReferenceKind,
        found: ReferenceKind,
    },

    /// A switch payload is referenced by more than one switch instruction, or
    /// carries targets but is never referenced at all
    PayloadReferences { payload_address: u32 },

    /// Serialization was attempted against a container that has not been
    /// placed since its pools last changed
    UnplacedContainer,

    /// Two placed items overlap, or an item was written somewhere other than
    /// where it was placed (internal invariant, should be unreachable)
    OverlappingAllocation {
        offset: u32,
        previous_end: u32,
    },

    /// A descriptor string is not a valid type descriptor
    BadDescriptor(String),

    /// A class names itself as a (transitive) superclass
    CircularSuperclasses { descriptor: String },

    /// Container-reading errors
    BadMagic([u8; 8]),
    Truncated { offset: usize },
    BadIndex { section: &'static str, index: u32 },
    UnknownOpcode(u8),

    IoError(std::io::Error),
}

/// Construction-time operand violations; detected fail-fast, before any
/// address or index resolution happens
#[derive(Debug)]
pub enum FormatViolation {
    /// Register number exceeds the field width (4, 8, or 16 bits)
    RegisterOutOfRange { register: u16, max: u16 },

    /// Literal value outside the field's signed or unsigned range
    LiteralOutOfRange { literal: i64, bits: u32 },

    /// A short branch with offset zero (a self-branch) is illegal
    ZeroBranchOffset,

    /// The declared register count of an invocation does not match the
    /// callee signature's parameter word count
    RegisterCountMismatch { declared: u16, expected: u16 },

    /// Array-creating opcodes in the 35c/3rc forms cannot build arrays of
    /// `long` or `double`
    WideArrayElement { descriptor: String },

    /// The opcode does not use the format of the instruction it was given
    WrongFormat { opcode: Opcode, format: Format },

    /// `fill-array-data` whose byte length is not a multiple of its element
    /// width, or whose element width is not 1, 2, 4 or 8
    BadArrayPayload { element_width: u16, byte_length: usize },

    /// Sparse switch keys must be strictly ascending
    UnsortedSparseSwitch { index: usize },

    /// A switch payload holds more than 65535 elements
    TooManySwitchElements { count: usize },

    /// More than five registers in a 35c instruction
    TooManyRegisters { count: usize },

    /// A reference index too large for the field that encodes it
    ReferenceOutOfRange { index: u32, bits: u32 },
}

impl From<FormatViolation> for Error {
    fn from(violation: FormatViolation) -> Error {
        Error::Format(violation)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::IoError(error)
    }
}

//! Bytecode representation, assembly, and per-method encoders
//!
//! ### Structure
//!
//! Instructions live in a flat stream addressed in 16-bit code units, with
//! branch targets as relative offsets and switch tables / array data pushed
//! out into 4-byte aligned payload blocks. [`Instruction`] models the stream
//! symbolically, [`codec`] performs the bit-exact packing, and
//! [`CodeBuilder`] is the append-only assembler that turns labels, raw try
//! declarations and debug events into a finished [`MethodImplementation`].

pub mod codec;
mod code_builder;
mod debug_info;
mod instruction;
mod try_merger;

pub use code_builder::*;
pub use debug_info::*;
pub use instruction::*;
pub use try_merger::*;

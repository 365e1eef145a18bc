//! Read, build and write bytecode containers
//!
//! A container holds classes, their fields and methods, and the method
//! bodies as bytecode, all referencing each other through deduplicated
//! index sections. [`DexContainer`] owns the interning pools and the class
//! definitions; [`code::CodeBuilder`] assembles method bodies; placement
//! and serialization turn the whole thing into the binary file format.
//!
//! ### Simple example
//!
//! ```
//! use dexforge::dex::code::{CodeBuilder, Instruction, Opcode};
//! use dexforge::dex::{ClassAccessFlags, ClassDef, DexContainer, EncodedMethod, MethodAccessFlags};
//!
//! # fn build() -> Result<(), dexforge::dex::Error> {
//! let mut container = DexContainer::new();
//! let class = container.pools_mut().intern_type("LHello;")?;
//! let object = container.pools_mut().intern_type("Ljava/lang/Object;")?;
//! let run = container.pools_mut().intern_method("LHello;", "run", "V", &[])?;
//!
//! let mut code = CodeBuilder::new(container.pools_mut(), 1, 1);
//! code.add_instruction(Instruction::F10x { opcode: Opcode::ReturnVoid })?;
//! let body = code.build()?;
//!
//! let mut class_def = ClassDef::new(class, ClassAccessFlags::PUBLIC);
//! class_def.superclass = Some(object);
//! class_def.virtual_methods.push(EncodedMethod {
//!     method: run,
//!     access_flags: MethodAccessFlags::PUBLIC,
//!     code: Some(body),
//! });
//! container.add_class(class_def);
//!
//! let bytes = container.serialize()?;
//! assert_eq!(&bytes[0..8], b"dex\n035\0");
//! # Ok(()) }
//! # build().unwrap();
//! ```

pub mod access_flags;
pub mod class_path;
pub mod code;
pub mod descriptors;
pub mod errors;
pub mod pools;

mod class;
mod container;
mod layout;
mod reader;
mod writer;

pub use access_flags::*;
pub use class::*;
pub use container::*;
pub use errors::*;
pub use layout::*;

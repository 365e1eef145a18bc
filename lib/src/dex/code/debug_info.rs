//! Debug information: the positions/locals delta stream
//!
//! A method's debug info is a state-machine byte stream. The two registers
//! of the machine are the current code address and the current source line;
//! most events advance both at once through one "special" opcode byte that
//! packs a bounded address delta and line delta together. Deltas that do not
//! fit are flushed through standalone advance instructions first.
//!
//! The packing thresholds below are load-bearing: downstream tooling
//! compares produced byte streams, so they are reproduced exactly rather
//! than repacked some other way.

use crate::dex::pools::{StringRef, TypeRef};
use crate::dex::Error;

pub const LINE_BASE: i32 = -4;
pub const LINE_RANGE: i32 = 15;
pub const FIRST_SPECIAL: u8 = 0x0a;

/// Stream opcodes below `FIRST_SPECIAL`
pub const DBG_END_SEQUENCE: u8 = 0x00;
pub const DBG_ADVANCE_PC: u8 = 0x01;
pub const DBG_ADVANCE_LINE: u8 = 0x02;
pub const DBG_START_LOCAL: u8 = 0x03;
pub const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
pub const DBG_END_LOCAL: u8 = 0x05;
pub const DBG_RESTART_LOCAL: u8 = 0x06;
pub const DBG_SET_PROLOGUE_END: u8 = 0x07;
pub const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
pub const DBG_SET_FILE: u8 = 0x09;

/// A source-level event at a code address, in the order it was declared
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebugEvent {
    Line {
        address: u32,
        line: u32,
    },
    StartLocal {
        address: u32,
        register: u16,
        name: Option<StringRef>,
        ty: Option<TypeRef>,
        signature: Option<StringRef>,
    },
    EndLocal {
        address: u32,
        register: u16,
    },
    RestartLocal {
        address: u32,
        register: u16,
    },
    Prologue {
        address: u32,
    },
    Epilogue {
        address: u32,
    },
    SetSourceFile {
        address: u32,
        file: Option<StringRef>,
    },
}

impl DebugEvent {
    pub fn address(&self) -> u32 {
        match self {
            DebugEvent::Line { address, .. }
            | DebugEvent::StartLocal { address, .. }
            | DebugEvent::EndLocal { address, .. }
            | DebugEvent::RestartLocal { address, .. }
            | DebugEvent::Prologue { address }
            | DebugEvent::Epilogue { address }
            | DebugEvent::SetSourceFile { address, .. } => *address,
        }
    }
}

/// One instruction of the encoded stream
///
/// References are still pool handles here; they become section indices when
/// the container is serialized, after index assignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebugItem {
    EndSequence,
    AdvancePc(u32),
    AdvanceLine(i32),
    StartLocal {
        register: u16,
        name: Option<StringRef>,
        ty: Option<TypeRef>,
    },
    StartLocalExtended {
        register: u16,
        name: Option<StringRef>,
        ty: Option<TypeRef>,
        signature: Option<StringRef>,
    },
    EndLocal(u16),
    RestartLocal(u16),
    SetPrologueEnd,
    SetEpilogueBegin,
    SetFile(Option<StringRef>),
    Special(u8),
}

/// The encoded debug info of one method
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugInfo {
    pub line_start: u32,
    pub parameter_names: Vec<Option<StringRef>>,
    pub items: Vec<DebugItem>,
}

/// Collects events in address order and delta-encodes them
///
/// Events must be added at non-decreasing addresses; adding an event behind
/// the previous one fails fast.
pub struct DebugInfoBuilder {
    line_start: u32,
    parameter_names: Vec<Option<StringRef>>,
    events: Vec<DebugEvent>,
    last_address: u32,
}

impl DebugInfoBuilder {
    pub fn new() -> DebugInfoBuilder {
        DebugInfoBuilder {
            line_start: 0,
            parameter_names: vec![],
            events: vec![],
            last_address: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.parameter_names.is_empty()
    }

    fn check_address(&mut self, address: u32) -> Result<(), Error> {
        if address < self.last_address {
            return Err(Error::NonMonotonicAddress {
                previous: self.last_address,
                address,
            });
        }
        self.last_address = address;
        Ok(())
    }

    pub fn add_parameter_name(&mut self, name: Option<StringRef>) {
        self.parameter_names.push(name);
    }

    pub fn add_line(&mut self, address: u32, line: u32) -> Result<(), Error> {
        self.check_address(address)?;
        if self.line_start == 0 {
            self.line_start = line;
        }
        self.events.push(DebugEvent::Line { address, line });
        Ok(())
    }

    pub fn add_start_local(
        &mut self,
        address: u32,
        register: u16,
        name: Option<StringRef>,
        ty: Option<TypeRef>,
        signature: Option<StringRef>,
    ) -> Result<(), Error> {
        self.check_address(address)?;
        self.events.push(DebugEvent::StartLocal {
            address,
            register,
            name,
            ty,
            signature,
        });
        Ok(())
    }

    pub fn add_end_local(&mut self, address: u32, register: u16) -> Result<(), Error> {
        self.check_address(address)?;
        self.events.push(DebugEvent::EndLocal { address, register });
        Ok(())
    }

    pub fn add_restart_local(&mut self, address: u32, register: u16) -> Result<(), Error> {
        self.check_address(address)?;
        self.events
            .push(DebugEvent::RestartLocal { address, register });
        Ok(())
    }

    pub fn add_prologue_end(&mut self, address: u32) -> Result<(), Error> {
        self.check_address(address)?;
        self.events.push(DebugEvent::Prologue { address });
        Ok(())
    }

    pub fn add_epilogue_begin(&mut self, address: u32) -> Result<(), Error> {
        self.check_address(address)?;
        self.events.push(DebugEvent::Epilogue { address });
        Ok(())
    }

    pub fn add_set_source_file(
        &mut self,
        address: u32,
        file: Option<StringRef>,
    ) -> Result<(), Error> {
        self.check_address(address)?;
        self.events.push(DebugEvent::SetSourceFile { address, file });
        Ok(())
    }

    /// Run the delta encoder over the accumulated events
    pub fn finish(mut self) -> DebugInfo {
        if self.line_start == 0 {
            self.line_start = 1;
        }

        let mut items = vec![];
        let mut current_address: u32 = 0;
        let mut current_line: i64 = self.line_start as i64;

        for event in &self.events {
            match event {
                DebugEvent::Line { address, line } => {
                    let mut line_delta = *line as i64 - current_line;
                    let mut address_delta = (*address - current_address) as i64;

                    // A line delta outside what a special opcode can absorb
                    // is flushed through a standalone advance
                    if line_delta < LINE_BASE as i64 || line_delta > (LINE_BASE + LINE_RANGE - 1) as i64
                    {
                        items.push(DebugItem::AdvanceLine(line_delta as i32));
                        line_delta = 0;
                    }
                    // Same for the address delta; the threshold depends on
                    // the remaining line delta because the two share one
                    // opcode byte
                    if (line_delta < 2 && address_delta > 16)
                        || (line_delta > 1 && address_delta > 15)
                    {
                        items.push(DebugItem::AdvancePc(address_delta as u32));
                        address_delta = 0;
                    }

                    items.push(DebugItem::Special(
                        (FIRST_SPECIAL as i64
                            + address_delta * LINE_RANGE as i64
                            + (line_delta - LINE_BASE as i64)) as u8,
                    ));

                    current_address = *address;
                    current_line = *line as i64;
                }
                other => {
                    let address = other.address();
                    if address != current_address {
                        items.push(DebugItem::AdvancePc(address - current_address));
                        current_address = address;
                    }
                    items.push(match other {
                        DebugEvent::StartLocal {
                            register,
                            name,
                            ty,
                            signature,
                            ..
                        } => {
                            if signature.is_some() {
                                DebugItem::StartLocalExtended {
                                    register: *register,
                                    name: *name,
                                    ty: *ty,
                                    signature: *signature,
                                }
                            } else {
                                DebugItem::StartLocal {
                                    register: *register,
                                    name: *name,
                                    ty: *ty,
                                }
                            }
                        }
                        DebugEvent::EndLocal { register, .. } => DebugItem::EndLocal(*register),
                        DebugEvent::RestartLocal { register, .. } => {
                            DebugItem::RestartLocal(*register)
                        }
                        DebugEvent::Prologue { .. } => DebugItem::SetPrologueEnd,
                        DebugEvent::Epilogue { .. } => DebugItem::SetEpilogueBegin,
                        DebugEvent::SetSourceFile { file, .. } => DebugItem::SetFile(*file),
                        DebugEvent::Line { .. } => unreachable!(),
                    });
                }
            }
        }

        items.push(DebugItem::EndSequence);

        DebugInfo {
            line_start: self.line_start,
            parameter_names: self.parameter_names,
            items,
        }
    }
}

impl Default for DebugInfoBuilder {
    fn default() -> DebugInfoBuilder {
        DebugInfoBuilder::new()
    }
}

/// Decode an item stream back into events: the exact inverse state machine
pub fn decode_events(info: &DebugInfo) -> Vec<DebugEvent> {
    let mut events = vec![];
    let mut address: u32 = 0;
    let mut line: i64 = info.line_start as i64;

    for item in &info.items {
        match item {
            DebugItem::EndSequence => break,
            DebugItem::AdvancePc(delta) => address += delta,
            DebugItem::AdvanceLine(delta) => line += *delta as i64,
            DebugItem::Special(opcode) => {
                let adjusted = (opcode - FIRST_SPECIAL) as i64;
                address += (adjusted / LINE_RANGE as i64) as u32;
                line += LINE_BASE as i64 + adjusted % LINE_RANGE as i64;
                events.push(DebugEvent::Line {
                    address,
                    line: line as u32,
                });
            }
            DebugItem::StartLocal { register, name, ty } => events.push(DebugEvent::StartLocal {
                address,
                register: *register,
                name: *name,
                ty: *ty,
                signature: None,
            }),
            DebugItem::StartLocalExtended {
                register,
                name,
                ty,
                signature,
            } => events.push(DebugEvent::StartLocal {
                address,
                register: *register,
                name: *name,
                ty: *ty,
                signature: *signature,
            }),
            DebugItem::EndLocal(register) => events.push(DebugEvent::EndLocal {
                address,
                register: *register,
            }),
            DebugItem::RestartLocal(register) => events.push(DebugEvent::RestartLocal {
                address,
                register: *register,
            }),
            DebugItem::SetPrologueEnd => events.push(DebugEvent::Prologue { address }),
            DebugItem::SetEpilogueBegin => events.push(DebugEvent::Epilogue { address }),
            DebugItem::SetFile(file) => events.push(DebugEvent::SetSourceFile {
                address,
                file: *file,
            }),
        }
    }

    events
}

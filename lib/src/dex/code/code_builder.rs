//! The method-body assembler
//!
//! A method body is an append-only sequence of [`MethodLocation`]s. Each
//! location optionally holds one instruction plus any labels and debug/try
//! markers attached while it was the current location. Offset-carrying
//! instructions reference labels, never addresses, so nothing needs
//! re-linking when labels are bound late or rebound: all addresses are
//! computed in one pass inside [`CodeBuilder::build`], and only then are
//! branch operands resolved.
//!
//! A builder is single-writer and not thread-safe; separate method bodies
//! can be assembled concurrently in separate builders.

use crate::dex::code::debug_info::{DebugInfo, DebugInfoBuilder};
use crate::dex::code::try_merger::{TryBlock, TryRangeMerger};
use crate::dex::code::{codec, Format, Instruction, Opcode};
use crate::dex::errors::FormatViolation;
use crate::dex::pools::{DexPools, ItemRef, StringRef, TypeRef};
use crate::dex::Error;
use std::collections::HashMap;
use std::fmt;

/// Reference to a (possibly not yet bound) location in one method body
///
/// Plain data: the label is an index into the builder's label table, and the
/// table maps it to a location index once bound. Labels are never copied
/// into instructions by address.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Label(usize);

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}

/// An instruction while the body is still being assembled
pub type BuilderInstruction = Instruction<Label, ItemRef>;

/// An instruction after address resolution: branch targets are relative
/// offsets in code units, references are still pool handles
pub type FinalInstruction = Instruction<i32, ItemRef>;

/// Debug markers attached to a location
#[derive(Clone, Debug)]
enum Marker {
    Line(u32),
    StartLocal {
        register: u16,
        name: Option<StringRef>,
        ty: Option<TypeRef>,
        signature: Option<StringRef>,
    },
    EndLocal(u16),
    RestartLocal(u16),
    Prologue,
    Epilogue,
    SetSourceFile(Option<StringRef>),
}

/// One slot of the body: an optional instruction plus attached labels and
/// markers. Owned exclusively by its builder.
#[derive(Clone, Debug, Default)]
pub struct MethodLocation {
    instruction: Option<BuilderInstruction>,
    labels: Vec<Label>,
    markers: Vec<Marker>,
}

/// A raw try declaration; consumed by the merger during `build`
#[derive(Clone, Debug)]
struct TryDeclaration {
    start: Label,
    end: Label,
    catch_type: Option<TypeRef>,
    handler: Label,
}

/// The finished, immutable method body
#[derive(Clone, Debug)]
pub struct MethodImplementation {
    pub registers_size: u16,
    pub ins_size: u16,
    pub outs_size: u16,
    /// Total size in 16-bit code units, alignment spacers included
    pub code_units: u32,
    pub instructions: Vec<FinalInstruction>,
    pub tries: Vec<TryBlock>,
    pub debug_info: Option<DebugInfo>,
}

pub struct CodeBuilder<'a> {
    pools: &'a mut DexPools,
    registers_size: u16,
    ins_size: u16,

    /// The location arena; the last entry is always the open tail that the
    /// next instruction, label or marker attaches to
    locations: Vec<MethodLocation>,

    /// Label table: `Some(index)` once bound to a location
    label_targets: Vec<Option<usize>>,
    label_names: Vec<Option<String>>,
    names: HashMap<String, Label>,

    tries: Vec<TryDeclaration>,
    parameter_names: Vec<Option<StringRef>>,
}

impl<'a> CodeBuilder<'a> {
    pub fn new(pools: &'a mut DexPools, registers_size: u16, ins_size: u16) -> CodeBuilder<'a> {
        CodeBuilder {
            pools,
            registers_size,
            ins_size,
            locations: vec![MethodLocation::default()],
            label_targets: vec![],
            label_names: vec![],
            names: HashMap::new(),
            tries: vec![],
            parameter_names: vec![],
        }
    }

    pub fn pools(&mut self) -> &mut DexPools {
        self.pools
    }

    /// A fresh anonymous unbound label
    pub fn fresh_label(&mut self) -> Label {
        let label = Label(self.label_targets.len());
        self.label_targets.push(None);
        self.label_names.push(None);
        label
    }

    /// Look up a named label, creating it unbound if it does not exist yet.
    /// Callers may reference a label before its target location is appended.
    pub fn get_label(&mut self, name: &str) -> Label {
        if let Some(label) = self.names.get(name) {
            return *label;
        }
        let label = Label(self.label_targets.len());
        self.label_targets.push(None);
        self.label_names.push(Some(name.to_string()));
        self.names.insert(name.to_string(), label);
        label
    }

    /// Bind the named label to the current location
    pub fn add_label(&mut self, name: &str) -> Label {
        let label = self.get_label(name);
        self.place_label(label);
        label
    }

    /// Bind `label` to the current location. Binding again retargets the
    /// label; every instruction referencing it observes the new target,
    /// since operands are resolved only at `build` time.
    pub fn place_label(&mut self, label: Label) {
        let current = self.locations.len() - 1;
        if let Some(previous) = self.label_targets[label.0].replace(current) {
            if previous != current {
                self.locations[previous].labels.retain(|l| *l != label);
            }
        }
        self.locations[current].labels.push(label);
    }

    fn label_name(&self, label: Label) -> String {
        match &self.label_names[label.0] {
            Some(name) => name.clone(),
            None => format!("{:?}", label),
        }
    }

    /// Append an instruction, advancing the current location
    ///
    /// Operand violations (register widths, literal ranges, payload shape,
    /// reference kinds, invocation arity) fail here, synchronously.
    pub fn add_instruction(&mut self, instruction: BuilderInstruction) -> Result<(), Error> {
        codec::check(&instruction)?;
        self.check_reference(&instruction)?;

        let current = self.locations.last_mut().unwrap();
        current.instruction = Some(instruction);
        self.locations.push(MethodLocation::default());
        Ok(())
    }

    fn check_reference(&self, instruction: &BuilderInstruction) -> Result<(), Error> {
        let opcode = match instruction.opcode() {
            Some(opcode) => opcode,
            None => return Ok(()),
        };
        let reference = match instruction.reference() {
            Some(reference) => *reference,
            None => return Ok(()),
        };

        let expected = opcode.reference_kind().expect("format carries a reference");
        if reference.kind() != expected {
            return Err(Error::InvalidReference {
                opcode,
                expected,
                found: reference.kind(),
            });
        }

        // Invocation arity must match the callee signature's word count
        if opcode.is_invoke() {
            let method = match reference {
                ItemRef::Method(method) => method,
                _ => unreachable!(),
            };
            let mut expected_words = self.pools.parameter_words(self.pools.method(method).proto);
            if !opcode.is_static_invoke() {
                expected_words += 1;
            }
            let declared = match instruction {
                Instruction::F35c { registers, .. } => registers.len() as u16,
                Instruction::F3rc { count, .. } => *count as u16,
                _ => unreachable!(),
            };
            if declared != expected_words {
                return Err(FormatViolation::RegisterCountMismatch {
                    declared,
                    expected: expected_words,
                }
                .into());
            }
        }

        // Register-list array creation cannot build arrays of wide values
        if opcode.is_array_creation() {
            let ty = match reference {
                ItemRef::Type(ty) => ty,
                _ => unreachable!(),
            };
            let descriptor = self.pools.type_descriptor(ty);
            match descriptor.as_bytes() {
                [b'[', element, ..] => {
                    if matches!(element, b'J' | b'D') {
                        return Err(FormatViolation::WideArrayElement {
                            descriptor: descriptor.to_string(),
                        }
                        .into());
                    }
                }
                _ => return Err(Error::BadDescriptor(descriptor.to_string())),
            }
        }

        Ok(())
    }

    /// Declare a typed catch handler for the code between `start` and `end`
    /// (exclusive)
    pub fn add_catch(&mut self, catch_type: TypeRef, start: Label, end: Label, handler: Label) {
        self.tries.push(TryDeclaration {
            start,
            end,
            catch_type: Some(catch_type),
            handler,
        });
    }

    /// Declare a catch-all handler for the code between `start` and `end`
    pub fn add_catch_all(&mut self, start: Label, end: Label, handler: Label) {
        self.tries.push(TryDeclaration {
            start,
            end,
            catch_type: None,
            handler,
        });
    }

    fn current_markers(&mut self) -> &mut Vec<Marker> {
        &mut self.locations.last_mut().unwrap().markers
    }

    /// Record a source line number at the current location
    pub fn add_line_number(&mut self, line: u32) {
        self.current_markers().push(Marker::Line(line));
    }

    pub fn add_start_local(
        &mut self,
        register: u16,
        name: Option<StringRef>,
        ty: Option<TypeRef>,
        signature: Option<StringRef>,
    ) {
        self.current_markers().push(Marker::StartLocal {
            register,
            name,
            ty,
            signature,
        });
    }

    pub fn add_end_local(&mut self, register: u16) {
        self.current_markers().push(Marker::EndLocal(register));
    }

    pub fn add_restart_local(&mut self, register: u16) {
        self.current_markers().push(Marker::RestartLocal(register));
    }

    pub fn add_prologue_end(&mut self) {
        self.current_markers().push(Marker::Prologue);
    }

    pub fn add_epilogue_begin(&mut self) {
        self.current_markers().push(Marker::Epilogue);
    }

    pub fn add_set_source_file(&mut self, file: Option<StringRef>) {
        self.current_markers().push(Marker::SetSourceFile(file));
    }

    pub fn add_parameter_name(&mut self, name: Option<StringRef>) {
        self.parameter_names.push(name);
    }

    /// Finalize the body: recompute every location's address, resolve every
    /// label-carrying operand, merge the try declarations and delta-encode
    /// the debug events
    pub fn build(self) -> Result<MethodImplementation, Error> {
        // Address pass. Payloads must sit at a 4-byte (even code unit)
        // boundary; an odd-addressed payload gets a nop spacer in front.
        let mut addresses = vec![0u32; self.locations.len()];
        let mut spacer_before = vec![false; self.locations.len()];
        let mut address: u32 = 0;
        for (index, location) in self.locations.iter().enumerate() {
            if let Some(instruction) = &location.instruction {
                if instruction.is_payload() && address % 2 != 0 {
                    spacer_before[index] = true;
                    address += 1;
                }
            }
            addresses[index] = address;
            if let Some(instruction) = &location.instruction {
                address += instruction.code_units();
            }
        }
        let code_units = address;

        let resolve_location = |label: Label| -> Result<usize, Error> {
            self.label_targets[label.0].ok_or_else(|| Error::UnresolvedLabel {
                label: self.label_name(label),
            })
        };
        let resolve_address =
            |label: Label| -> Result<u32, Error> { Ok(addresses[resolve_location(label)?]) };

        // Each switch payload's targets are encoded relative to the switch
        // instruction that references it, so find that referrer first
        let mut payload_base: HashMap<usize, u32> = HashMap::new();
        for (index, location) in self.locations.iter().enumerate() {
            if let Some(Instruction::F31t { opcode, target, .. }) = &location.instruction {
                if matches!(opcode, Opcode::PackedSwitch | Opcode::SparseSwitch) {
                    let payload_index = resolve_location(*target)?;
                    if payload_base
                        .insert(payload_index, addresses[index])
                        .is_some()
                    {
                        return Err(Error::PayloadReferences {
                            payload_address: addresses[payload_index],
                        });
                    }
                }
            }
        }

        let mut instructions: Vec<FinalInstruction> = vec![];
        let mut outs_size: u16 = 0;

        for (index, location) in self.locations.iter().enumerate() {
            let instruction = match &location.instruction {
                Some(instruction) => instruction,
                None => continue,
            };
            if spacer_before[index] {
                instructions.push(Instruction::F10x {
                    opcode: Opcode::Nop,
                });
            }

            let insn_address = addresses[index];
            let resolved = match instruction {
                Instruction::PackedSwitchPayload { .. } | Instruction::SparseSwitchPayload { .. } => {
                    let base = match payload_base.get(&index) {
                        Some(base) => *base,
                        None => {
                            return Err(Error::PayloadReferences {
                                payload_address: insn_address,
                            })
                        }
                    };
                    instruction.map(
                        |label| {
                            let target = resolve_address(*label)?;
                            Ok::<i32, Error>((target as i64 - base as i64) as i32)
                        },
                        |reference| Ok(*reference),
                    )?
                }
                other => other.map(
                    |label| {
                        let target = resolve_address(*label)?;
                        let offset = target as i64 - insn_address as i64;
                        Self::check_branch_range(other, insn_address, target, offset)?;
                        Ok::<i32, Error>(offset as i32)
                    },
                    |reference| Ok(*reference),
                )?,
            };

            if let Some(opcode) = resolved.opcode() {
                if opcode.is_invoke() {
                    let method = match resolved.reference() {
                        Some(ItemRef::Method(method)) => *method,
                        _ => unreachable!(),
                    };
                    let mut words = self.pools.parameter_words(self.pools.method(method).proto);
                    if !opcode.is_static_invoke() {
                        words += 1;
                    }
                    outs_size = outs_size.max(words);
                }
            }

            instructions.push(resolved);
        }

        // Exception handler ranges, now as resolved addresses
        let mut merger = TryRangeMerger::new();
        for declaration in &self.tries {
            let start = resolve_address(declaration.start)?;
            let end = resolve_address(declaration.end)?;
            match declaration.catch_type {
                Some(ty) => merger.add_handler(ty, start, end, resolve_address(declaration.handler)?)?,
                None => merger.add_catch_all(start, end, resolve_address(declaration.handler)?)?,
            }
        }
        let tries = merger.merge();

        // Debug events, in location order (addresses are non-decreasing by
        // construction)
        let mut debug = DebugInfoBuilder::new();
        for name in &self.parameter_names {
            debug.add_parameter_name(*name);
        }
        for (index, location) in self.locations.iter().enumerate() {
            let event_address = addresses[index];
            for marker in &location.markers {
                match marker {
                    Marker::Line(line) => debug.add_line(event_address, *line)?,
                    Marker::StartLocal {
                        register,
                        name,
                        ty,
                        signature,
                    } => debug.add_start_local(event_address, *register, *name, *ty, *signature)?,
                    Marker::EndLocal(register) => debug.add_end_local(event_address, *register)?,
                    Marker::RestartLocal(register) => {
                        debug.add_restart_local(event_address, *register)?
                    }
                    Marker::Prologue => debug.add_prologue_end(event_address)?,
                    Marker::Epilogue => debug.add_epilogue_begin(event_address)?,
                    Marker::SetSourceFile(file) => {
                        debug.add_set_source_file(event_address, *file)?
                    }
                }
            }
        }
        let debug_info = if debug.is_empty() {
            None
        } else {
            Some(debug.finish())
        };

        log::debug!(
            "built method body: {} code units, {} try blocks",
            code_units,
            tries.len()
        );

        Ok(MethodImplementation {
            registers_size: self.registers_size,
            ins_size: self.ins_size,
            outs_size,
            code_units,
            instructions,
            tries,
            debug_info,
        })
    }

    fn check_branch_range(
        instruction: &BuilderInstruction,
        address: u32,
        target: u32,
        offset: i64,
    ) -> Result<(), Error> {
        let format = instruction.variant_format().unwrap();
        if offset == 0 {
            if let Some(opcode) = instruction.opcode() {
                if opcode.forbids_zero_offset() {
                    return Err(FormatViolation::ZeroBranchOffset.into());
                }
            }
        }
        let fits = match format {
            Format::F10t => i8::try_from(offset).is_ok(),
            Format::F20t | Format::F21t | Format::F22t => i16::try_from(offset).is_ok(),
            _ => i32::try_from(offset).is_ok(),
        };
        if !fits {
            return Err(Error::BranchRange {
                address,
                target,
                format,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::code::debug_info::{decode_events, DebugEvent};

    fn pools() -> DexPools {
        DexPools::new()
    }

    #[test]
    fn addresses_accumulate_code_units() {
        let mut pools = pools();
        let mut builder = CodeBuilder::new(&mut pools, 3, 0);
        builder
            .add_instruction(Instruction::F11n {
                opcode: Opcode::Const4,
                a: 0,
                literal: 1,
            })
            .unwrap();
        builder
            .add_instruction(Instruction::F21s {
                opcode: Opcode::Const16,
                a: 1,
                literal: 1000,
            })
            .unwrap();
        builder
            .add_instruction(Instruction::F10x {
                opcode: Opcode::ReturnVoid,
            })
            .unwrap();
        let body = builder.build().unwrap();
        assert_eq!(body.code_units, 1 + 2 + 1);
        assert_eq!(body.instructions.len(), 3);
        assert_eq!(body.registers_size, 3);
    }

    #[test]
    fn forward_references_resolve_at_build() {
        let mut pools = pools();
        let mut builder = CodeBuilder::new(&mut pools, 2, 0);
        // Reference the label before its target exists
        let done = builder.get_label("done");
        builder
            .add_instruction(Instruction::F21t {
                opcode: Opcode::IfEqz,
                a: 0,
                target: done,
            })
            .unwrap();
        builder
            .add_instruction(Instruction::F11n {
                opcode: Opcode::Const4,
                a: 0,
                literal: 0,
            })
            .unwrap();
        builder.add_label("done");
        builder
            .add_instruction(Instruction::F10x {
                opcode: Opcode::ReturnVoid,
            })
            .unwrap();

        let body = builder.build().unwrap();
        match &body.instructions[0] {
            Instruction::F21t { target, .. } => assert_eq!(*target, 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn backward_branch_is_negative() {
        let mut pools = pools();
        let mut builder = CodeBuilder::new(&mut pools, 1, 0);
        let top = builder.add_label("top");
        builder
            .add_instruction(Instruction::F11n {
                opcode: Opcode::Const4,
                a: 0,
                literal: 0,
            })
            .unwrap();
        builder
            .add_instruction(Instruction::F10t {
                opcode: Opcode::Goto,
                target: top,
            })
            .unwrap();
        let body = builder.build().unwrap();
        match &body.instructions[1] {
            Instruction::F10t { target, .. } => assert_eq!(*target, -1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unresolved_label_fails_build() {
        let mut pools = pools();
        let mut builder = CodeBuilder::new(&mut pools, 1, 0);
        let nowhere = builder.get_label("nowhere");
        builder
            .add_instruction(Instruction::F10t {
                opcode: Opcode::Goto,
                target: nowhere,
            })
            .unwrap();
        match builder.build() {
            Err(Error::UnresolvedLabel { label }) => assert_eq!(label, "nowhere"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rebinding_retargets_existing_operands() {
        let mut pools = pools();
        let mut builder = CodeBuilder::new(&mut pools, 1, 0);
        let target = builder.add_label("target");
        builder
            .add_instruction(Instruction::F10t {
                opcode: Opcode::Goto,
                target,
            })
            .unwrap();
        builder
            .add_instruction(Instruction::F10x {
                opcode: Opcode::ReturnVoid,
            })
            .unwrap();
        // Rebind past the return: the goto observes the new target with no
        // explicit re-linking step
        builder.place_label(target);
        builder
            .add_instruction(Instruction::F10x {
                opcode: Opcode::ReturnVoid,
            })
            .unwrap();
        let body = builder.build().unwrap();
        match &body.instructions[0] {
            Instruction::F10t { target, .. } => assert_eq!(*target, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn oversized_short_branch_reports_address() {
        let mut pools = pools();
        let mut builder = CodeBuilder::new(&mut pools, 1, 0);
        let far = builder.get_label("far");
        builder
            .add_instruction(Instruction::F10t {
                opcode: Opcode::Goto,
                target: far,
            })
            .unwrap();
        // 200 code units of padding puts the target out of i8 range
        for _ in 0..200 {
            builder
                .add_instruction(Instruction::F10x {
                    opcode: Opcode::Nop,
                })
                .unwrap();
        }
        builder.add_label("far");
        builder
            .add_instruction(Instruction::F10x {
                opcode: Opcode::ReturnVoid,
            })
            .unwrap();
        match builder.build() {
            Err(Error::BranchRange {
                address,
                target,
                format,
            }) => {
                assert_eq!(address, 0);
                assert_eq!(target, 201);
                assert_eq!(format, Format::F10t);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn payloads_get_aligned_with_a_spacer() {
        let mut pools = pools();
        let mut builder = CodeBuilder::new(&mut pools, 1, 0);
        let table = builder.get_label("table");
        let case0 = builder.get_label("case0");
        builder
            .add_instruction(Instruction::F31t {
                opcode: Opcode::PackedSwitch,
                a: 0,
                target: table,
            })
            .unwrap();
        builder.place_label(case0);
        builder
            .add_instruction(Instruction::F10x {
                opcode: Opcode::ReturnVoid,
            })
            .unwrap();
        // Address is now 4 (odd would need a spacer; make it odd)
        builder
            .add_instruction(Instruction::F11x {
                opcode: Opcode::Return,
                a: 0,
            })
            .unwrap();
        builder.place_label(table);
        builder
            .add_instruction(Instruction::PackedSwitchPayload {
                first_key: 0,
                targets: vec![case0],
            })
            .unwrap();
        let body = builder.build().unwrap();

        // switch(3) + return-void(1) + return(1) = 5, odd: spacer inserted
        assert_eq!(body.instructions.len(), 5);
        assert!(matches!(
            body.instructions[3],
            Instruction::F10x {
                opcode: Opcode::Nop
            }
        ));
        match &body.instructions[0] {
            Instruction::F31t { target, .. } => assert_eq!(*target, 6),
            other => panic!("unexpected {:?}", other),
        }
        // Payload target is relative to the switch instruction at 0
        match &body.instructions[4] {
            Instruction::PackedSwitchPayload { targets, .. } => assert_eq!(targets, &vec![3]),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(body.code_units, 6 + 6);
    }

    #[test]
    fn invoke_arity_is_checked_against_signature() {
        let mut pools = pools();
        let method = pools
            .intern_method("Lfoo/Bar;", "frob", "V", &["I", "J"])
            .unwrap();
        let mut builder = CodeBuilder::new(&mut pools, 5, 0);
        // Non-static invoke: 3 words for (I, J) plus 1 for the receiver
        assert!(builder
            .add_instruction(Instruction::F35c {
                opcode: Opcode::InvokeVirtual,
                registers: vec![0, 1, 2, 3],
                reference: ItemRef::Method(method),
            })
            .is_ok());
        assert!(matches!(
            builder.add_instruction(Instruction::F35c {
                opcode: Opcode::InvokeVirtual,
                registers: vec![0, 1, 2],
                reference: ItemRef::Method(method),
            }),
            Err(Error::Format(FormatViolation::RegisterCountMismatch {
                declared: 3,
                expected: 4,
            }))
        ));

        builder
            .add_instruction(Instruction::F10x {
                opcode: Opcode::ReturnVoid,
            })
            .unwrap();
        let body = builder.build().unwrap();
        assert_eq!(body.outs_size, 4);
    }

    #[test]
    fn wide_element_array_creation_is_rejected() {
        let mut pools = pools();
        let wide = pools.intern_type("[J").unwrap();
        let narrow = pools.intern_type("[I").unwrap();
        let mut builder = CodeBuilder::new(&mut pools, 2, 0);
        assert!(matches!(
            builder.add_instruction(Instruction::F35c {
                opcode: Opcode::FilledNewArray,
                registers: vec![0],
                reference: ItemRef::Type(wide),
            }),
            Err(Error::Format(FormatViolation::WideArrayElement { .. }))
        ));
        assert!(builder
            .add_instruction(Instruction::F35c {
                opcode: Opcode::FilledNewArray,
                registers: vec![0],
                reference: ItemRef::Type(narrow),
            })
            .is_ok());
    }

    #[test]
    fn wrong_reference_kind_is_rejected() {
        let mut pools = pools();
        let string = pools.intern_string("hello");
        let mut builder = CodeBuilder::new(&mut pools, 1, 0);
        assert!(matches!(
            builder.add_instruction(Instruction::F21c {
                opcode: Opcode::ConstClass,
                a: 0,
                reference: ItemRef::String(string),
            }),
            Err(Error::InvalidReference { .. })
        ));
    }

    #[test]
    fn try_markers_and_debug_flow_through_build() {
        let mut pools = pools();
        let throwable = pools.intern_type("Ljava/lang/Throwable;").unwrap();
        let local_name = pools.intern_string("x");
        let local_type = pools.intern_type("I").unwrap();

        let mut builder = CodeBuilder::new(&mut pools, 2, 1);
        let (start, end, handler) = (
            builder.get_label("start"),
            builder.get_label("end"),
            builder.get_label("handler"),
        );
        builder.add_catch(throwable, start, end, handler);

        builder.place_label(start);
        builder.add_line_number(10);
        builder.add_start_local(0, Some(local_name), Some(local_type), None);
        builder
            .add_instruction(Instruction::F11n {
                opcode: Opcode::Const4,
                a: 0,
                literal: 1,
            })
            .unwrap();
        builder.place_label(end);
        builder.add_line_number(11);
        builder
            .add_instruction(Instruction::F10x {
                opcode: Opcode::ReturnVoid,
            })
            .unwrap();
        builder.place_label(handler);
        builder
            .add_instruction(Instruction::F11x {
                opcode: Opcode::MoveException,
                a: 1,
            })
            .unwrap();
        builder
            .add_instruction(Instruction::F10x {
                opcode: Opcode::ReturnVoid,
            })
            .unwrap();

        let body = builder.build().unwrap();
        assert_eq!(body.tries.len(), 1);
        assert_eq!(body.tries[0].start_address, 0);
        assert_eq!(body.tries[0].code_unit_count, 1);
        assert_eq!(body.tries[0].handlers, vec![(throwable, 2)]);
        assert_eq!(body.tries[0].catch_all, None);

        let info = body.debug_info.expect("debug info present");
        assert_eq!(info.line_start, 10);
        let events = decode_events(&info);
        assert!(matches!(
            events[0],
            DebugEvent::Line {
                address: 0,
                line: 10
            }
        ));
        assert!(matches!(events[1], DebugEvent::StartLocal { address: 0, .. }));
        assert!(matches!(
            events[2],
            DebugEvent::Line {
                address: 1,
                line: 11
            }
        ));
    }
}

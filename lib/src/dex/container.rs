//! The container: pools plus class definitions
//!
//! A [`DexContainer`] owns everything reachable from one file: the interning
//! pools and the list of class definitions whose members point into them.
//! Building is in-memory only; serialization goes through [`DexLayout`]
//! first, and a failed build never leaves a partially written file behind
//! (bytes are accumulated in a buffer and written out in one step).

use crate::dex::class::{ClassDef, EncodedField, EncodedMethod};
use crate::dex::code::{DebugInfo, DebugItem, MethodImplementation, TryBlock};
use crate::dex::layout::DexLayout;
use crate::dex::pools::{DexPools, StringRef, TypeRef};
use crate::dex::{reader, writer};
use crate::dex::Error;
use std::fs;
use std::path::Path;

pub struct DexContainer {
    pools: DexPools,
    classes: Vec<ClassDef>,
}

impl DexContainer {
    pub fn new() -> DexContainer {
        DexContainer {
            pools: DexPools::new(),
            classes: vec![],
        }
    }

    pub fn pools(&self) -> &DexPools {
        &self.pools
    }

    pub fn pools_mut(&mut self) -> &mut DexPools {
        &mut self.pools
    }

    pub fn classes(&self) -> &[ClassDef] {
        &self.classes
    }

    pub fn add_class(&mut self, class: ClassDef) {
        self.classes.push(class);
    }

    /// Assign final section indices and byte offsets
    ///
    /// The layout is a snapshot: interning anything afterwards invalidates
    /// it, and serialization will refuse to use it.
    pub fn place(&self) -> Result<DexLayout, Error> {
        DexLayout::place(self)
    }

    /// Serialize against a previously computed layout
    pub fn to_bytes(&self, layout: &DexLayout) -> Result<Vec<u8>, Error> {
        writer::write_container(self, layout)
    }

    /// Place and serialize in one step
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let layout = self.place()?;
        self.to_bytes(&layout)
    }

    /// Serialize to a file; the file is only written once the whole
    /// container has been encoded successfully
    pub fn save_to_path<P: AsRef<Path>>(
        &self,
        path: P,
        create_missing_directories: bool,
    ) -> Result<(), Error> {
        let bytes = self.serialize()?;
        let path = path.as_ref();
        if create_missing_directories {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    /// Parse a serialized container, re-interning everything it holds
    pub fn read(bytes: &[u8]) -> Result<DexContainer, Error> {
        reader::read_container(bytes)
    }

    /// Copy a class from another container, re-interning every transitively
    /// referenced item into this container's own pools
    ///
    /// Nothing is ever aliased across containers: handles from `source` are
    /// mapped to (possibly pre-existing) canonical handles here.
    pub fn import_class(&mut self, source: &DexContainer, class: &ClassDef) -> Result<(), Error> {
        let static_fields = class
            .static_fields
            .iter()
            .map(|field| EncodedField {
                field: self.pools.import_field(&source.pools, field.field),
                access_flags: field.access_flags,
            })
            .collect();
        let instance_fields = class
            .instance_fields
            .iter()
            .map(|field| EncodedField {
                field: self.pools.import_field(&source.pools, field.field),
                access_flags: field.access_flags,
            })
            .collect();

        let mut direct_methods = Vec::with_capacity(class.direct_methods.len());
        for method in &class.direct_methods {
            direct_methods.push(self.import_method(source, method)?);
        }
        let mut virtual_methods = Vec::with_capacity(class.virtual_methods.len());
        for method in &class.virtual_methods {
            virtual_methods.push(self.import_method(source, method)?);
        }

        let imported = ClassDef {
            class: self.pools.import_type(&source.pools, class.class),
            access_flags: class.access_flags,
            superclass: class
                .superclass
                .map(|superclass| self.pools.import_type(&source.pools, superclass)),
            interfaces: class
                .interfaces
                .map(|interfaces| self.pools.import_type_list(&source.pools, interfaces)),
            source_file: class
                .source_file
                .map(|file| self.pools.import_string(&source.pools, file)),
            annotations: class
                .annotations
                .map(|set| self.pools.import_annotation_set(&source.pools, set)),
            static_fields,
            instance_fields,
            direct_methods,
            virtual_methods,
        };
        self.classes.push(imported);
        Ok(())
    }

    fn import_method(
        &mut self,
        source: &DexContainer,
        method: &EncodedMethod,
    ) -> Result<EncodedMethod, Error> {
        let code = match &method.code {
            None => None,
            Some(body) => Some(self.import_method_implementation(source, body)?),
        };
        Ok(EncodedMethod {
            method: self.pools.import_method(&source.pools, method.method),
            access_flags: method.access_flags,
            code,
        })
    }

    fn import_method_implementation(
        &mut self,
        source: &DexContainer,
        body: &MethodImplementation,
    ) -> Result<MethodImplementation, Error> {
        let mut instructions = Vec::with_capacity(body.instructions.len());
        for instruction in &body.instructions {
            instructions.push(instruction.map(
                |target| Ok::<i32, Error>(*target),
                |reference| Ok(self.pools.import_item(&source.pools, *reference)),
            )?);
        }

        let tries = body
            .tries
            .iter()
            .map(|block| TryBlock {
                start_address: block.start_address,
                code_unit_count: block.code_unit_count,
                handlers: block
                    .handlers
                    .iter()
                    .map(|(ty, address)| (self.pools.import_type(&source.pools, *ty), *address))
                    .collect(),
                catch_all: block.catch_all,
            })
            .collect();

        let debug_info = body
            .debug_info
            .as_ref()
            .map(|info| self.import_debug_info(source, info));

        Ok(MethodImplementation {
            registers_size: body.registers_size,
            ins_size: body.ins_size,
            outs_size: body.outs_size,
            code_units: body.code_units,
            instructions,
            tries,
            debug_info,
        })
    }

    fn import_debug_info(&mut self, source: &DexContainer, info: &DebugInfo) -> DebugInfo {
        fn string(
            pools: &mut DexPools,
            source: &DexPools,
            handle: Option<StringRef>,
        ) -> Option<StringRef> {
            handle.map(|handle| pools.import_string(source, handle))
        }
        fn ty(
            pools: &mut DexPools,
            source: &DexPools,
            handle: Option<TypeRef>,
        ) -> Option<TypeRef> {
            handle.map(|handle| pools.import_type(source, handle))
        }

        let mut parameter_names = Vec::with_capacity(info.parameter_names.len());
        for name in &info.parameter_names {
            parameter_names.push(string(&mut self.pools, &source.pools, *name));
        }

        let mut items = Vec::with_capacity(info.items.len());
        for item in &info.items {
            items.push(match item {
                DebugItem::StartLocal { register, name, ty: local } => DebugItem::StartLocal {
                    register: *register,
                    name: string(&mut self.pools, &source.pools, *name),
                    ty: ty(&mut self.pools, &source.pools, *local),
                },
                DebugItem::StartLocalExtended {
                    register,
                    name,
                    ty: local,
                    signature,
                } => DebugItem::StartLocalExtended {
                    register: *register,
                    name: string(&mut self.pools, &source.pools, *name),
                    ty: ty(&mut self.pools, &source.pools, *local),
                    signature: string(&mut self.pools, &source.pools, *signature),
                },
                DebugItem::SetFile(file) => {
                    DebugItem::SetFile(string(&mut self.pools, &source.pools, *file))
                }
                other => other.clone(),
            });
        }

        DebugInfo {
            line_start: info.line_start,
            parameter_names,
            items,
        }
    }
}

impl Default for DexContainer {
    fn default() -> DexContainer {
        DexContainer::new()
    }
}

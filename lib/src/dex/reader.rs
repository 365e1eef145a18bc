//! Parsing a serialized container
//!
//! Reading is the inverse of placement plus serialization: walk the header
//! and the id sections, then follow offsets into the data section. Every
//! item read is re-interned through the destination container's own pools,
//! so a read container can immediately be re-placed and re-serialized, and
//! never aliases the input bytes. Sections are reached through header and
//! item offsets rather than the map, so map entries of unknown kinds are
//! skipped naturally.

use crate::dex::access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use crate::dex::class::{ClassDef, EncodedField, EncodedMethod};
use crate::dex::code::{
    codec, DebugInfo, DebugItem, Instruction, MethodImplementation, TryBlock, DBG_ADVANCE_LINE,
    DBG_ADVANCE_PC, DBG_END_LOCAL, DBG_END_SEQUENCE, DBG_RESTART_LOCAL, DBG_SET_EPILOGUE_BEGIN,
    DBG_SET_FILE, DBG_SET_PROLOGUE_END, DBG_START_LOCAL, DBG_START_LOCAL_EXTENDED,
};
use crate::dex::container::DexContainer;
use crate::dex::layout::{values, ENDIAN_TAG, HEADER_SIZE, MAGIC, NO_INDEX};
use crate::dex::pools::{
    AnnotationData, AnnotationVisibility, FieldData, ItemRef, MethodData, ProtoData,
    ReferenceKind, StringRef, TypeRef,
};
use crate::dex::pools::{AnnotationSetRef, FieldRef, MethodRef, TypeListRef};
use crate::dex::Error;
use crate::util;
use byteorder::{ByteOrder, LittleEndian};

/// Handles for the id sections, in file index order
struct Sections {
    strings: Vec<StringRef>,
    types: Vec<TypeRef>,
    fields: Vec<FieldRef>,
    methods: Vec<MethodRef>,
}

impl Sections {
    fn string(&self, index: u32) -> Result<StringRef, Error> {
        self.strings.get(index as usize).copied().ok_or(Error::BadIndex {
            section: "string",
            index,
        })
    }

    fn optional_string(&self, index: Option<u32>) -> Result<Option<StringRef>, Error> {
        index.map(|index| self.string(index)).transpose()
    }

    fn ty(&self, index: u32) -> Result<TypeRef, Error> {
        self.types.get(index as usize).copied().ok_or(Error::BadIndex {
            section: "type",
            index,
        })
    }

    fn optional_type(&self, index: Option<u32>) -> Result<Option<TypeRef>, Error> {
        index.map(|index| self.ty(index)).transpose()
    }

    fn field(&self, index: u32) -> Result<FieldRef, Error> {
        self.fields.get(index as usize).copied().ok_or(Error::BadIndex {
            section: "field",
            index,
        })
    }

    fn method(&self, index: u32) -> Result<MethodRef, Error> {
        self.methods.get(index as usize).copied().ok_or(Error::BadIndex {
            section: "method",
            index,
        })
    }

    fn item(&self, kind: ReferenceKind, index: u32) -> Result<ItemRef, Error> {
        Ok(match kind {
            ReferenceKind::String => ItemRef::String(self.string(index)?),
            ReferenceKind::Type => ItemRef::Type(self.ty(index)?),
            ReferenceKind::Field => ItemRef::Field(self.field(index)?),
            ReferenceKind::Method => ItemRef::Method(self.method(index)?),
        })
    }
}

fn read_u16_at(bytes: &[u8], offset: usize) -> Result<u16, Error> {
    bytes
        .get(offset..offset + 2)
        .map(LittleEndian::read_u16)
        .ok_or(Error::Truncated { offset })
}

fn read_u32_at(bytes: &[u8], offset: usize) -> Result<u32, Error> {
    bytes
        .get(offset..offset + 4)
        .map(LittleEndian::read_u32)
        .ok_or(Error::Truncated { offset })
}

fn optional_index(index: u32) -> Option<u32> {
    if index == NO_INDEX {
        None
    } else {
        Some(index)
    }
}

pub(crate) fn read_container(bytes: &[u8]) -> Result<DexContainer, Error> {
    if bytes.len() < HEADER_SIZE as usize {
        return Err(Error::Truncated { offset: bytes.len() });
    }
    let mut magic = [0u8; 8];
    magic.copy_from_slice(&bytes[0..8]);
    if magic != MAGIC || read_u32_at(bytes, 40)? != ENDIAN_TAG {
        return Err(Error::BadMagic(magic));
    }

    let checksum = read_u32_at(bytes, 8)?;
    let computed = util::adler32(&bytes[12..]);
    if checksum != computed {
        log::warn!(
            "container checksum mismatch: header says {:#010x}, content hashes to {:#010x}",
            checksum,
            computed
        );
    }

    let string_ids_size = read_u32_at(bytes, 56)?;
    let string_ids_off = read_u32_at(bytes, 60)?;
    let type_ids_size = read_u32_at(bytes, 64)?;
    let type_ids_off = read_u32_at(bytes, 68)?;
    let proto_ids_size = read_u32_at(bytes, 72)?;
    let proto_ids_off = read_u32_at(bytes, 76)?;
    let field_ids_size = read_u32_at(bytes, 80)?;
    let field_ids_off = read_u32_at(bytes, 84)?;
    let method_ids_size = read_u32_at(bytes, 88)?;
    let method_ids_off = read_u32_at(bytes, 92)?;
    let class_defs_size = read_u32_at(bytes, 96)?;
    let class_defs_off = read_u32_at(bytes, 100)?;

    let mut container = DexContainer::new();

    let mut strings = Vec::with_capacity(string_ids_size as usize);
    let mut raw_strings = Vec::with_capacity(string_ids_size as usize);
    for index in 0..string_ids_size {
        let data_off = read_u32_at(bytes, (string_ids_off + index * 4) as usize)? as usize;
        let mut position = data_off;
        util::read_uleb128(bytes, &mut position)?; // utf16 length, implied by the data
        let tail = bytes.get(position..).ok_or(Error::Truncated { offset: position })?;
        let end = tail
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(Error::Truncated { offset: bytes.len() })?;
        let value = util::mutf8::decode(&tail[..end])?;
        strings.push(container.pools_mut().intern_string(&value));
        raw_strings.push(value);
    }

    let mut types = Vec::with_capacity(type_ids_size as usize);
    for index in 0..type_ids_size {
        let string_index = read_u32_at(bytes, (type_ids_off + index * 4) as usize)?;
        let descriptor = raw_strings
            .get(string_index as usize)
            .ok_or(Error::BadIndex {
                section: "string",
                index: string_index,
            })?;
        types.push(container.pools_mut().intern_type_unchecked(descriptor));
    }

    let mut protos = Vec::with_capacity(proto_ids_size as usize);
    for index in 0..proto_ids_size {
        let base = (proto_ids_off + index * 12) as usize;
        let shorty_index = read_u32_at(bytes, base)?;
        let return_index = read_u32_at(bytes, base + 4)?;
        let parameters_off = read_u32_at(bytes, base + 8)?;
        let parameters = if parameters_off == 0 {
            None
        } else {
            let count = read_u32_at(bytes, parameters_off as usize)?;
            let mut list = Vec::with_capacity(count as usize);
            for entry in 0..count {
                let type_index =
                    read_u16_at(bytes, parameters_off as usize + 4 + entry as usize * 2)? as u32;
                list.push(*types.get(type_index as usize).ok_or(Error::BadIndex {
                    section: "type",
                    index: type_index,
                })?);
            }
            Some(container.pools_mut().intern_type_list(&list))
        };
        let data = ProtoData {
            shorty: *strings.get(shorty_index as usize).ok_or(Error::BadIndex {
                section: "string",
                index: shorty_index,
            })?,
            return_type: *types.get(return_index as usize).ok_or(Error::BadIndex {
                section: "type",
                index: return_index,
            })?,
            parameters,
        };
        protos.push(container.pools_mut().intern_proto_data(data));
    }

    let mut fields = Vec::with_capacity(field_ids_size as usize);
    for index in 0..field_ids_size {
        let base = (field_ids_off + index * 8) as usize;
        let class_index = read_u16_at(bytes, base)? as u32;
        let type_index = read_u16_at(bytes, base + 2)? as u32;
        let name_index = read_u32_at(bytes, base + 4)?;
        let data = FieldData {
            class: *types.get(class_index as usize).ok_or(Error::BadIndex {
                section: "type",
                index: class_index,
            })?,
            ty: *types.get(type_index as usize).ok_or(Error::BadIndex {
                section: "type",
                index: type_index,
            })?,
            name: *strings.get(name_index as usize).ok_or(Error::BadIndex {
                section: "string",
                index: name_index,
            })?,
        };
        fields.push(container.pools_mut().intern_field_data(data));
    }

    let mut methods = Vec::with_capacity(method_ids_size as usize);
    for index in 0..method_ids_size {
        let base = (method_ids_off + index * 8) as usize;
        let class_index = read_u16_at(bytes, base)? as u32;
        let proto_index = read_u16_at(bytes, base + 2)? as u32;
        let name_index = read_u32_at(bytes, base + 4)?;
        let data = MethodData {
            class: *types.get(class_index as usize).ok_or(Error::BadIndex {
                section: "type",
                index: class_index,
            })?,
            proto: *protos.get(proto_index as usize).ok_or(Error::BadIndex {
                section: "proto",
                index: proto_index,
            })?,
            name: *strings.get(name_index as usize).ok_or(Error::BadIndex {
                section: "string",
                index: name_index,
            })?,
        };
        methods.push(container.pools_mut().intern_method_data(data));
    }

    let sections = Sections {
        strings,
        types,
        fields,
        methods,
    };

    for index in 0..class_defs_size {
        let base = (class_defs_off + index * 32) as usize;
        let class_index = read_u32_at(bytes, base)?;
        let access_flags = read_u32_at(bytes, base + 4)?;
        let superclass_index = read_u32_at(bytes, base + 8)?;
        let interfaces_off = read_u32_at(bytes, base + 12)?;
        let source_file_index = read_u32_at(bytes, base + 16)?;
        let annotations_off = read_u32_at(bytes, base + 20)?;
        let class_data_off = read_u32_at(bytes, base + 24)?;
        // static_values_off at base + 28 is not modelled

        let mut class = ClassDef::new(
            sections.ty(class_index)?,
            ClassAccessFlags::from_bits_truncate(access_flags),
        );
        class.superclass = sections.optional_type(optional_index(superclass_index))?;
        class.source_file = sections.optional_string(optional_index(source_file_index))?;
        if interfaces_off != 0 {
            class.interfaces = Some(read_type_list(
                bytes,
                interfaces_off as usize,
                &sections,
                &mut container,
            )?);
        }
        if annotations_off != 0 {
            class.annotations =
                read_annotations_directory(bytes, annotations_off as usize, &sections, &mut container)?;
        }
        if class_data_off != 0 {
            read_class_data(bytes, class_data_off as usize, &sections, &mut class)?;
        }
        container.add_class(class);
    }

    log::debug!(
        "read container: {} strings, {} types, {} classes",
        string_ids_size,
        type_ids_size,
        class_defs_size
    );

    Ok(container)
}

fn read_type_list(
    bytes: &[u8],
    offset: usize,
    sections: &Sections,
    container: &mut DexContainer,
) -> Result<TypeListRef, Error> {
    let count = read_u32_at(bytes, offset)?;
    let mut list = Vec::with_capacity(count as usize);
    for index in 0..count {
        let type_index = read_u16_at(bytes, offset + 4 + index as usize * 2)? as u32;
        list.push(sections.ty(type_index)?);
    }
    Ok(container.pools_mut().intern_type_list(&list))
}

fn read_annotations_directory(
    bytes: &[u8],
    offset: usize,
    sections: &Sections,
    container: &mut DexContainer,
) -> Result<Option<AnnotationSetRef>, Error> {
    let class_annotations_off = read_u32_at(bytes, offset)? as usize;
    // Field, method and parameter annotation lists follow; nothing in this
    // crate produces them
    if class_annotations_off == 0 {
        return Ok(None);
    }

    let count = read_u32_at(bytes, class_annotations_off)?;
    let mut set = Vec::with_capacity(count as usize);
    for index in 0..count {
        let annotation_off =
            read_u32_at(bytes, class_annotations_off + 4 + index as usize * 4)? as usize;
        set.push(read_annotation(bytes, annotation_off, sections, container)?);
    }
    Ok(Some(container.pools_mut().intern_annotation_set(&set)))
}

fn read_annotation(
    bytes: &[u8],
    offset: usize,
    sections: &Sections,
    container: &mut DexContainer,
) -> Result<crate::dex::pools::AnnotationRef, Error> {
    let visibility_byte = *bytes.get(offset).ok_or(Error::Truncated { offset })?;
    let visibility =
        AnnotationVisibility::from_value(visibility_byte).ok_or(Error::UnknownOpcode(visibility_byte))?;
    let mut position = offset + 1;
    let type_index = util::read_uleb128(bytes, &mut position)?;
    let element_count = util::read_uleb128(bytes, &mut position)?;
    let mut elements = Vec::with_capacity(element_count as usize);
    for _ in 0..element_count {
        let name_index = util::read_uleb128(bytes, &mut position)?;
        let value = values::read_encoded_value(bytes, &mut position, &sections.strings, &sections.types)?;
        elements.push((sections.string(name_index)?, value));
    }
    let data = AnnotationData {
        visibility,
        ty: sections.ty(type_index)?,
        elements,
    };
    Ok(container.pools_mut().intern_annotation(data))
}

fn read_class_data(
    bytes: &[u8],
    offset: usize,
    sections: &Sections,
    class: &mut ClassDef,
) -> Result<(), Error> {
    let mut position = offset;
    let static_fields = util::read_uleb128(bytes, &mut position)?;
    let instance_fields = util::read_uleb128(bytes, &mut position)?;
    let direct_methods = util::read_uleb128(bytes, &mut position)?;
    let virtual_methods = util::read_uleb128(bytes, &mut position)?;

    let mut field_index = 0;
    for _ in 0..static_fields {
        field_index += util::read_uleb128(bytes, &mut position)?;
        let access_flags = util::read_uleb128(bytes, &mut position)?;
        class.static_fields.push(EncodedField {
            field: sections.field(field_index)?,
            access_flags: FieldAccessFlags::from_bits_truncate(access_flags),
        });
    }
    let mut field_index = 0;
    for _ in 0..instance_fields {
        field_index += util::read_uleb128(bytes, &mut position)?;
        let access_flags = util::read_uleb128(bytes, &mut position)?;
        class.instance_fields.push(EncodedField {
            field: sections.field(field_index)?,
            access_flags: FieldAccessFlags::from_bits_truncate(access_flags),
        });
    }

    let mut method_index = 0;
    for _ in 0..direct_methods {
        let (method, access_flags, code) =
            read_encoded_method(bytes, &mut position, &mut method_index, sections)?;
        class.direct_methods.push(EncodedMethod {
            method,
            access_flags,
            code,
        });
    }
    let mut method_index = 0;
    for _ in 0..virtual_methods {
        let (method, access_flags, code) =
            read_encoded_method(bytes, &mut position, &mut method_index, sections)?;
        class.virtual_methods.push(EncodedMethod {
            method,
            access_flags,
            code,
        });
    }

    Ok(())
}

fn read_encoded_method(
    bytes: &[u8],
    position: &mut usize,
    method_index: &mut u32,
    sections: &Sections,
) -> Result<(MethodRef, MethodAccessFlags, Option<MethodImplementation>), Error> {
    *method_index += util::read_uleb128(bytes, position)?;
    let access_flags = util::read_uleb128(bytes, position)?;
    let code_off = util::read_uleb128(bytes, position)?;
    let code = if code_off == 0 {
        None
    } else {
        Some(read_code_item(bytes, code_off as usize, sections)?)
    };
    Ok((
        sections.method(*method_index)?,
        MethodAccessFlags::from_bits_truncate(access_flags),
        code,
    ))
}

fn read_code_item(
    bytes: &[u8],
    offset: usize,
    sections: &Sections,
) -> Result<MethodImplementation, Error> {
    let registers_size = read_u16_at(bytes, offset)?;
    let ins_size = read_u16_at(bytes, offset + 2)?;
    let outs_size = read_u16_at(bytes, offset + 4)?;
    let tries_size = read_u16_at(bytes, offset + 6)?;
    let debug_off = read_u32_at(bytes, offset + 8)?;
    let code_units = read_u32_at(bytes, offset + 12)?;

    let insns_start = offset + 16;
    let insns_end = insns_start + code_units as usize * 2;
    let insns = bytes
        .get(insns_start..insns_end)
        .ok_or(Error::Truncated { offset: insns_start })?;

    let mut instructions = vec![];
    let mut position = 0;
    while position < insns.len() {
        let raw = codec::decode(insns, &mut position)?;
        let kind = raw.opcode().and_then(|opcode| opcode.reference_kind());
        let resolved: Instruction<i32, ItemRef> = raw.map(
            |target| Ok::<i32, Error>(*target),
            |index| match kind {
                Some(kind) => sections.item(kind, *index),
                // Unreachable for anything `decode` produces: only reference
                // formats carry an operand here, and their opcodes all
                // declare a kind
                None => Err(Error::BadIndex {
                    section: "reference",
                    index: *index,
                }),
            },
        )?;
        instructions.push(resolved);
    }

    let mut tries = vec![];
    if tries_size > 0 {
        let mut tries_base = insns_end;
        if code_units % 2 != 0 {
            tries_base += 2;
        }
        let handlers_base = tries_base + tries_size as usize * 8;
        for index in 0..tries_size as usize {
            let entry = tries_base + index * 8;
            let start_address = read_u32_at(bytes, entry)?;
            let code_unit_count = read_u16_at(bytes, entry + 4)? as u32;
            let handler_off = read_u16_at(bytes, entry + 6)? as usize;

            let mut position = handlers_base + handler_off;
            let count = util::read_sleb128(bytes, &mut position)?;
            let typed = count.unsigned_abs() as usize;
            let mut handlers = Vec::with_capacity(typed);
            for _ in 0..typed {
                let type_index = util::read_uleb128(bytes, &mut position)?;
                let address = util::read_uleb128(bytes, &mut position)?;
                handlers.push((sections.ty(type_index)?, address));
            }
            let catch_all = if count <= 0 {
                Some(util::read_uleb128(bytes, &mut position)?)
            } else {
                None
            };
            tries.push(TryBlock {
                start_address,
                code_unit_count,
                handlers,
                catch_all,
            });
        }
    }

    let debug_info = if debug_off == 0 {
        None
    } else {
        Some(read_debug_info(bytes, debug_off as usize, sections)?)
    };

    Ok(MethodImplementation {
        registers_size,
        ins_size,
        outs_size,
        code_units,
        instructions,
        tries,
        debug_info,
    })
}

fn read_debug_info(
    bytes: &[u8],
    offset: usize,
    sections: &Sections,
) -> Result<DebugInfo, Error> {
    let mut position = offset;
    let line_start = util::read_uleb128(bytes, &mut position)?;
    let parameter_count = util::read_uleb128(bytes, &mut position)?;
    let mut parameter_names = Vec::with_capacity(parameter_count as usize);
    for _ in 0..parameter_count {
        let index = util::read_uleb128p1(bytes, &mut position)?;
        parameter_names.push(sections.optional_string(index)?);
    }

    let mut items = vec![];
    loop {
        let opcode = *bytes.get(position).ok_or(Error::Truncated { offset: position })?;
        position += 1;
        let item = match opcode {
            DBG_END_SEQUENCE => {
                items.push(DebugItem::EndSequence);
                break;
            }
            DBG_ADVANCE_PC => DebugItem::AdvancePc(util::read_uleb128(bytes, &mut position)?),
            DBG_ADVANCE_LINE => DebugItem::AdvanceLine(util::read_sleb128(bytes, &mut position)?),
            DBG_START_LOCAL => DebugItem::StartLocal {
                register: util::read_uleb128(bytes, &mut position)? as u16,
                name: sections.optional_string(util::read_uleb128p1(bytes, &mut position)?)?,
                ty: sections.optional_type(util::read_uleb128p1(bytes, &mut position)?)?,
            },
            DBG_START_LOCAL_EXTENDED => DebugItem::StartLocalExtended {
                register: util::read_uleb128(bytes, &mut position)? as u16,
                name: sections.optional_string(util::read_uleb128p1(bytes, &mut position)?)?,
                ty: sections.optional_type(util::read_uleb128p1(bytes, &mut position)?)?,
                signature: sections.optional_string(util::read_uleb128p1(bytes, &mut position)?)?,
            },
            DBG_END_LOCAL => {
                DebugItem::EndLocal(util::read_uleb128(bytes, &mut position)? as u16)
            }
            DBG_RESTART_LOCAL => {
                DebugItem::RestartLocal(util::read_uleb128(bytes, &mut position)? as u16)
            }
            DBG_SET_PROLOGUE_END => DebugItem::SetPrologueEnd,
            DBG_SET_EPILOGUE_BEGIN => DebugItem::SetEpilogueBegin,
            DBG_SET_FILE => {
                DebugItem::SetFile(sections.optional_string(util::read_uleb128p1(bytes, &mut position)?)?)
            }
            special => DebugItem::Special(special),
        };
        items.push(item);
    }

    Ok(DebugInfo {
        line_start,
        parameter_names,
        items,
    })
}

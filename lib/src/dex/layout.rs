//! Index assignment and placement
//!
//! Turning interned pools into a binary container happens in two strictly
//! ordered phases. First every pool is sorted into its canonical order and
//! each item receives its final section index. Only then can placement run:
//! a single forward pass that assigns every item a byte offset, aligning as
//! it goes. The phases cannot be fused or swapped because the encoded size
//! of several items (class data, catch handlers, debug streams, annotation
//! values) depends on the magnitude of the indices of items they reference.
//!
//! A [`DexLayout`] is a snapshot: it records the pool version it was
//! computed against, and serialization refuses to run against a container
//! whose pools have changed since.

use crate::dex::class::ClassDef;
use crate::dex::code::{
    DebugInfo, DebugItem, MethodImplementation, DBG_ADVANCE_LINE, DBG_ADVANCE_PC, DBG_END_LOCAL,
    DBG_END_SEQUENCE, DBG_RESTART_LOCAL, DBG_SET_EPILOGUE_BEGIN, DBG_SET_FILE,
    DBG_SET_PROLOGUE_END, DBG_START_LOCAL, DBG_START_LOCAL_EXTENDED,
};
use crate::dex::code::codec;
use crate::dex::container::DexContainer;
use crate::dex::errors::FormatViolation;
use crate::dex::pools::{
    AnnotationSetRef, DexPools, EncodedValue, FieldRef, ItemRef, MethodRef, ProtoRef, StringRef,
    TypeListRef, TypeRef,
};
use crate::dex::Error;
use crate::util;
use byteorder::{LittleEndian, WriteBytesExt};
use std::collections::HashMap;

pub const MAGIC: [u8; 8] = *b"dex\n035\0";
pub const HEADER_SIZE: u32 = 0x70;
pub const ENDIAN_TAG: u32 = 0x1234_5678;
pub const NO_INDEX: u32 = 0xffff_ffff;

/// Every kind of item that occupies space in the container
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ItemKind {
    Header,
    StringId,
    TypeId,
    ProtoId,
    FieldId,
    MethodId,
    ClassDef,
    MapList,
    TypeList,
    AnnotationSet,
    ClassData,
    Code,
    StringData,
    DebugInfo,
    Annotation,
    AnnotationsDirectory,
}

impl ItemKind {
    /// Type code used in the map list
    pub fn map_code(self) -> u16 {
        match self {
            ItemKind::Header => 0x0000,
            ItemKind::StringId => 0x0001,
            ItemKind::TypeId => 0x0002,
            ItemKind::ProtoId => 0x0003,
            ItemKind::FieldId => 0x0004,
            ItemKind::MethodId => 0x0005,
            ItemKind::ClassDef => 0x0006,
            ItemKind::MapList => 0x1000,
            ItemKind::TypeList => 0x1001,
            ItemKind::AnnotationSet => 0x1003,
            ItemKind::ClassData => 0x2000,
            ItemKind::Code => 0x2001,
            ItemKind::StringData => 0x2002,
            ItemKind::DebugInfo => 0x2003,
            ItemKind::Annotation => 0x2004,
            ItemKind::AnnotationsDirectory => 0x2006,
        }
    }

    /// Byte alignment items of this kind must start at
    pub fn alignment(self) -> u32 {
        match self {
            ItemKind::StringData
            | ItemKind::DebugInfo
            | ItemKind::Annotation
            | ItemKind::ClassData => 1,
            _ => 4,
        }
    }
}

/// One placed item: where it sits and how big it is
#[derive(Copy, Clone, Debug)]
pub struct Allocation {
    pub kind: ItemKind,
    pub offset: u32,
    pub size: u32,
    pub alignment: u32,
}

/// Per-class placement results, indexed like the container's class list
#[derive(Clone, Debug, Default)]
pub(crate) struct ClassLayout {
    pub class_data_off: u32,
    pub annotations_off: u32,
    pub direct_code: Vec<u32>,
    pub virtual_code: Vec<u32>,
    pub direct_debug: Vec<u32>,
    pub virtual_debug: Vec<u32>,
}

/// Final section indices of every pool, plus the byte offset of everything
/// placed in the data section
pub struct DexLayout {
    pub(crate) pools_version: u64,

    // Canonical section orders (final index -> handle) and their inverses
    // (handle -> final index)
    pub(crate) string_order: Vec<StringRef>,
    pub(crate) type_order: Vec<TypeRef>,
    pub(crate) proto_order: Vec<ProtoRef>,
    pub(crate) field_order: Vec<FieldRef>,
    pub(crate) method_order: Vec<MethodRef>,
    pub(crate) class_order: Vec<usize>,
    string_indices: Vec<u32>,
    type_indices: Vec<u32>,
    proto_indices: Vec<u32>,
    field_indices: Vec<u32>,
    method_indices: Vec<u32>,

    // Id section offsets
    pub(crate) string_ids_off: u32,
    pub(crate) type_ids_off: u32,
    pub(crate) proto_ids_off: u32,
    pub(crate) field_ids_off: u32,
    pub(crate) method_ids_off: u32,
    pub(crate) class_defs_off: u32,

    // Data item offsets, by handle
    pub(crate) string_data_offsets: Vec<u32>,
    pub(crate) type_list_offsets: Vec<u32>,
    pub(crate) annotation_offsets: Vec<u32>,
    pub(crate) annotation_set_offsets: Vec<u32>,
    pub(crate) classes: Vec<ClassLayout>,

    pub(crate) data_off: u32,
    pub(crate) map_off: u32,
    pub(crate) file_size: u32,

    allocations: Vec<Allocation>,
    pub(crate) data_bytes: Vec<Vec<u8>>,
}

/// The data section under construction: a cursor plus the record of every
/// placed item and its encoded bytes
struct DataSection {
    cursor: u32,
    allocations: Vec<Allocation>,
    bytes: Vec<Vec<u8>>,
}

impl DataSection {
    fn place(&mut self, kind: ItemKind, bytes: Vec<u8>) -> u32 {
        let offset = util::align_offset(self.cursor, kind.alignment());
        self.allocations.push(Allocation {
            kind,
            offset,
            size: bytes.len() as u32,
            alignment: kind.alignment(),
        });
        self.cursor = offset + bytes.len() as u32;
        self.bytes.push(bytes);
        offset
    }
}

/// Index lookup handed to the item encoders
struct SectionIndices<'a> {
    strings: &'a [u32],
    types: &'a [u32],
    protos: &'a [u32],
    fields: &'a [u32],
    methods: &'a [u32],
}

impl<'a> SectionIndices<'a> {
    fn item(&self, item: ItemRef) -> u32 {
        match item {
            ItemRef::String(handle) => self.strings[handle.0 as usize],
            ItemRef::Type(handle) => self.types[handle.0 as usize],
            ItemRef::Field(handle) => self.fields[handle.0 as usize],
            ItemRef::Method(handle) => self.methods[handle.0 as usize],
        }
    }
}

fn index16(index: u32) -> Result<u16, Error> {
    u16::try_from(index)
        .map_err(|_| FormatViolation::ReferenceOutOfRange { index, bits: 16 }.into())
}

fn count16(count: u32) -> Result<u16, Error> {
    u16::try_from(count).map_err(|_| {
        Error::Format(FormatViolation::LiteralOutOfRange {
            literal: count as i64,
            bits: 16,
        })
    })
}

impl DexLayout {
    /// Assign final indices to every pooled item and an offset to everything
    /// that occupies data-section space
    pub fn place(container: &DexContainer) -> Result<DexLayout, Error> {
        let pools = container.pools();
        let classes = container.classes();

        // Phase one: canonical sort of each id section. Later sections sort
        // by the indices of the sections before them, so the order of these
        // five sorts is fixed.
        let mut string_order: Vec<StringRef> =
            (0..pools.string_count()).map(StringRef).collect();
        string_order.sort_by(|a, b| util::mutf8::utf16_cmp(pools.string(*a), pools.string(*b)));
        let mut string_indices = vec![0u32; string_order.len()];
        for (index, handle) in string_order.iter().enumerate() {
            string_indices[handle.0 as usize] = index as u32;
        }

        let mut type_order: Vec<TypeRef> = (0..pools.type_count()).map(TypeRef).collect();
        type_order.sort_by_key(|ty| string_indices[pools.type_string(*ty).0 as usize]);
        let mut type_indices = vec![0u32; type_order.len()];
        for (index, handle) in type_order.iter().enumerate() {
            type_indices[handle.0 as usize] = index as u32;
        }

        let mut proto_order: Vec<ProtoRef> = (0..pools.proto_count()).map(ProtoRef).collect();
        proto_order.sort_by_key(|proto| {
            let data = pools.proto(*proto);
            let parameters: Vec<u32> = match data.parameters {
                None => vec![],
                Some(list) => pools
                    .type_list(list)
                    .iter()
                    .map(|ty| type_indices[ty.0 as usize])
                    .collect(),
            };
            (type_indices[data.return_type.0 as usize], parameters)
        });
        let mut proto_indices = vec![0u32; proto_order.len()];
        for (index, handle) in proto_order.iter().enumerate() {
            proto_indices[handle.0 as usize] = index as u32;
        }

        let mut field_order: Vec<FieldRef> = (0..pools.field_count()).map(FieldRef).collect();
        field_order.sort_by_key(|field| {
            let data = pools.field(*field);
            (
                type_indices[data.class.0 as usize],
                string_indices[data.name.0 as usize],
                type_indices[data.ty.0 as usize],
            )
        });
        let mut field_indices = vec![0u32; field_order.len()];
        for (index, handle) in field_order.iter().enumerate() {
            field_indices[handle.0 as usize] = index as u32;
        }

        let mut method_order: Vec<MethodRef> = (0..pools.method_count()).map(MethodRef).collect();
        method_order.sort_by_key(|method| {
            let data = pools.method(*method);
            (
                type_indices[data.class.0 as usize],
                string_indices[data.name.0 as usize],
                proto_indices[data.proto.0 as usize],
            )
        });
        let mut method_indices = vec![0u32; method_order.len()];
        for (index, handle) in method_order.iter().enumerate() {
            method_indices[handle.0 as usize] = index as u32;
        }

        let class_order = class_definition_order(pools, classes);

        let indices = SectionIndices {
            strings: &string_indices,
            types: &type_indices,
            protos: &proto_indices,
            fields: &field_indices,
            methods: &method_indices,
        };

        // Id sections are fixed-width, so their offsets come straight off a
        // running cursor
        let mut cursor = HEADER_SIZE;
        let mut id_section = |count: u32, entry_size: u32| -> u32 {
            if count == 0 {
                return 0;
            }
            let offset = cursor;
            cursor += count * entry_size;
            offset
        };
        let string_ids_off = id_section(pools.string_count(), 4);
        let type_ids_off = id_section(pools.type_count(), 4);
        let proto_ids_off = id_section(pools.proto_count(), 12);
        let field_ids_off = id_section(pools.field_count(), 8);
        let method_ids_off = id_section(pools.method_count(), 8);
        let class_defs_off = id_section(classes.len() as u32, 32);
        let data_off = cursor;

        // Phase two: forward placement of the data section. The order below
        // is load-bearing in one way: items whose *encoding* mentions the
        // offset of another data item in a variable-width field must come
        // after it (class data holds code offsets as ULEB128). Fixed-width
        // offset fields (code items naming their debug stream) do not
        // constrain the order, but debug streams are placed first anyway so
        // every item can be encoded the moment it is placed.
        let mut section = DataSection {
            cursor: data_off,
            allocations: vec![],
            bytes: vec![],
        };

        let mut string_data_offsets = vec![0u32; pools.string_count() as usize];
        for handle in &string_order {
            let value = pools.string(*handle);
            let mut bytes = vec![];
            util::write_uleb128(&mut bytes, util::mutf8::utf16_length(value))?;
            bytes.extend_from_slice(&util::mutf8::encode(value));
            bytes.push(0);
            string_data_offsets[handle.0 as usize] = section.place(ItemKind::StringData, bytes);
        }

        // Data items that are only reachable through pool handles are placed
        // in content order, so the file layout does not depend on the order
        // interning happened to run in
        let mut type_list_order: Vec<TypeListRef> =
            (0..pools.type_list_count()).map(TypeListRef).collect();
        type_list_order.sort_by_key(|handle| {
            pools
                .type_list(*handle)
                .iter()
                .map(|ty| type_indices[ty.0 as usize])
                .collect::<Vec<u32>>()
        });
        let mut type_list_offsets = vec![0u32; pools.type_list_count() as usize];
        for handle in &type_list_order {
            let types = pools.type_list(*handle);
            let mut bytes = vec![];
            bytes.write_u32::<LittleEndian>(types.len() as u32)?;
            for ty in types {
                bytes.write_u16::<LittleEndian>(index16(type_indices[ty.0 as usize])?)?;
            }
            type_list_offsets[handle.0 as usize] = section.place(ItemKind::TypeList, bytes);
        }

        let mut class_layouts: Vec<ClassLayout> = classes
            .iter()
            .map(|class| ClassLayout {
                direct_code: vec![0; class.direct_methods.len()],
                virtual_code: vec![0; class.virtual_methods.len()],
                direct_debug: vec![0; class.direct_methods.len()],
                virtual_debug: vec![0; class.virtual_methods.len()],
                ..ClassLayout::default()
            })
            .collect();

        // Per-method items are placed in method-index order, which is also
        // the order class data lists them in
        let member_order = |methods: &[crate::dex::class::EncodedMethod]| -> Vec<usize> {
            let mut order: Vec<usize> = (0..methods.len()).collect();
            order.sort_by_key(|index| method_indices[methods[*index].method.0 as usize]);
            order
        };

        for &position in &class_order {
            let class = &classes[position];
            for &index in &member_order(&class.direct_methods) {
                let method = &class.direct_methods[index];
                if let Some(info) = method.code.as_ref().and_then(|code| code.debug_info.as_ref())
                {
                    let bytes = encode_debug_info(info, &indices)?;
                    class_layouts[position].direct_debug[index] =
                        section.place(ItemKind::DebugInfo, bytes);
                }
            }
            for &index in &member_order(&class.virtual_methods) {
                let method = &class.virtual_methods[index];
                if let Some(info) = method.code.as_ref().and_then(|code| code.debug_info.as_ref())
                {
                    let bytes = encode_debug_info(info, &indices)?;
                    class_layouts[position].virtual_debug[index] =
                        section.place(ItemKind::DebugInfo, bytes);
                }
            }
        }

        for &position in &class_order {
            let class = &classes[position];
            for &index in &member_order(&class.direct_methods) {
                let method = &class.direct_methods[index];
                if let Some(code) = &method.code {
                    let debug_off = class_layouts[position].direct_debug[index];
                    let bytes = encode_code_item(code, debug_off, &indices)?;
                    class_layouts[position].direct_code[index] =
                        section.place(ItemKind::Code, bytes);
                }
            }
            for &index in &member_order(&class.virtual_methods) {
                let method = &class.virtual_methods[index];
                if let Some(code) = &method.code {
                    let debug_off = class_layouts[position].virtual_debug[index];
                    let bytes = encode_code_item(code, debug_off, &indices)?;
                    class_layouts[position].virtual_code[index] =
                        section.place(ItemKind::Code, bytes);
                }
            }
        }

        let mut encoded_annotations: Vec<(Vec<u8>, u32)> = vec![];
        for raw in 0..pools.annotation_count() {
            let annotation = pools.annotation(crate::dex::pools::AnnotationRef(raw));
            let mut bytes = vec![];
            bytes.push(annotation.visibility.value());
            util::write_uleb128(&mut bytes, type_indices[annotation.ty.0 as usize])?;
            util::write_uleb128(&mut bytes, annotation.elements.len() as u32)?;
            let mut elements = annotation.elements.clone();
            elements.sort_by_key(|(name, _)| string_indices[name.0 as usize]);
            for (name, value) in &elements {
                util::write_uleb128(&mut bytes, string_indices[name.0 as usize])?;
                write_encoded_value(&mut bytes, value, &indices);
            }
            encoded_annotations.push((bytes, raw));
        }
        encoded_annotations.sort();
        let mut annotation_offsets = vec![0u32; pools.annotation_count() as usize];
        for (bytes, raw) in encoded_annotations {
            annotation_offsets[raw as usize] = section.place(ItemKind::Annotation, bytes);
        }

        let mut set_order: Vec<AnnotationSetRef> = (0..pools.annotation_set_count())
            .map(AnnotationSetRef)
            .collect();
        let set_member_offsets = |handle: &AnnotationSetRef| -> Vec<u32> {
            let mut offsets: Vec<u32> = pools
                .annotation_set(*handle)
                .iter()
                .map(|annotation| annotation_offsets[annotation.0 as usize])
                .collect();
            offsets.sort_unstable();
            offsets
        };
        set_order.sort_by_key(&set_member_offsets);
        let mut annotation_set_offsets = vec![0u32; pools.annotation_set_count() as usize];
        for handle in &set_order {
            let offsets = set_member_offsets(handle);
            let mut bytes = vec![];
            bytes.write_u32::<LittleEndian>(offsets.len() as u32)?;
            for offset in offsets {
                bytes.write_u32::<LittleEndian>(offset)?;
            }
            annotation_set_offsets[handle.0 as usize] =
                section.place(ItemKind::AnnotationSet, bytes);
        }

        // Classes sharing an annotation set share one directory
        let mut directories: HashMap<AnnotationSetRef, u32> = HashMap::new();
        for &position in &class_order {
            let set = match classes[position].annotations {
                Some(set) => set,
                None => continue,
            };
            let offset = match directories.get(&set) {
                Some(offset) => *offset,
                None => {
                    let mut bytes = vec![];
                    bytes.write_u32::<LittleEndian>(annotation_set_offsets[set.0 as usize])?;
                    bytes.write_u32::<LittleEndian>(0)?;
                    bytes.write_u32::<LittleEndian>(0)?;
                    bytes.write_u32::<LittleEndian>(0)?;
                    let offset = section.place(ItemKind::AnnotationsDirectory, bytes);
                    directories.insert(set, offset);
                    offset
                }
            };
            class_layouts[position].annotations_off = offset;
        }

        for &position in &class_order {
            let class = &classes[position];
            if !class.has_class_data() {
                continue;
            }
            let bytes = encode_class_data(class, &class_layouts[position], &indices)?;
            class_layouts[position].class_data_off = section.place(ItemKind::ClassData, bytes);
        }

        // The map lists every non-empty section in file order, itself
        // included
        let map_off = util::align_offset(section.cursor, 4);
        let mut entries: Vec<(u16, u32, u32)> = vec![(ItemKind::Header.map_code(), 1, 0)];
        let id_sections = [
            (ItemKind::StringId, pools.string_count(), string_ids_off),
            (ItemKind::TypeId, pools.type_count(), type_ids_off),
            (ItemKind::ProtoId, pools.proto_count(), proto_ids_off),
            (ItemKind::FieldId, pools.field_count(), field_ids_off),
            (ItemKind::MethodId, pools.method_count(), method_ids_off),
            (ItemKind::ClassDef, classes.len() as u32, class_defs_off),
        ];
        for (kind, count, offset) in id_sections {
            if count > 0 {
                entries.push((kind.map_code(), count, offset));
            }
        }
        for allocation in &section.allocations {
            match entries.last_mut() {
                Some(last) if last.0 == allocation.kind.map_code() => last.1 += 1,
                _ => entries.push((allocation.kind.map_code(), 1, allocation.offset)),
            }
        }
        entries.push((ItemKind::MapList.map_code(), 1, map_off));
        let mut bytes = vec![];
        bytes.write_u32::<LittleEndian>(entries.len() as u32)?;
        for (code, count, offset) in entries {
            bytes.write_u16::<LittleEndian>(code)?;
            bytes.write_u16::<LittleEndian>(0)?;
            bytes.write_u32::<LittleEndian>(count)?;
            bytes.write_u32::<LittleEndian>(offset)?;
        }
        section.place(ItemKind::MapList, bytes);

        let file_size = section.cursor;
        log::debug!(
            "placed container: {} strings, {} types, {} classes, data at {:#x}, map at {:#x}, {} bytes",
            pools.string_count(),
            pools.type_count(),
            classes.len(),
            data_off,
            map_off,
            file_size
        );

        Ok(DexLayout {
            pools_version: pools.version(),
            string_order,
            type_order,
            proto_order,
            field_order,
            method_order,
            class_order,
            string_indices,
            type_indices,
            proto_indices,
            field_indices,
            method_indices,
            string_ids_off,
            type_ids_off,
            proto_ids_off,
            field_ids_off,
            method_ids_off,
            class_defs_off,
            string_data_offsets,
            type_list_offsets,
            annotation_offsets,
            annotation_set_offsets,
            classes: class_layouts,
            data_off,
            map_off,
            file_size,
            allocations: section.allocations,
            data_bytes: section.bytes,
        })
    }

    pub fn string_index(&self, handle: StringRef) -> u32 {
        self.string_indices[handle.0 as usize]
    }

    pub fn type_index(&self, handle: TypeRef) -> u32 {
        self.type_indices[handle.0 as usize]
    }

    pub fn proto_index(&self, handle: ProtoRef) -> u32 {
        self.proto_indices[handle.0 as usize]
    }

    pub fn field_index(&self, handle: FieldRef) -> u32 {
        self.field_indices[handle.0 as usize]
    }

    pub fn method_index(&self, handle: MethodRef) -> u32 {
        self.method_indices[handle.0 as usize]
    }

    pub fn item_index(&self, item: ItemRef) -> u32 {
        match item {
            ItemRef::String(handle) => self.string_index(handle),
            ItemRef::Type(handle) => self.type_index(handle),
            ItemRef::Field(handle) => self.field_index(handle),
            ItemRef::Method(handle) => self.method_index(handle),
        }
    }

    /// Every data-section item placed, in file order
    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn data_off(&self) -> u32 {
        self.data_off
    }

    pub fn map_off(&self) -> u32 {
        self.map_off
    }
}

/// Order class definitions so that a superclass or implemented interface
/// defined in the same container always precedes its subclass
fn class_definition_order(pools: &DexPools, classes: &[ClassDef]) -> Vec<usize> {
    let by_type: HashMap<TypeRef, usize> = classes
        .iter()
        .enumerate()
        .map(|(position, class)| (class.class, position))
        .collect();

    fn visit(
        position: usize,
        pools: &DexPools,
        classes: &[ClassDef],
        by_type: &HashMap<TypeRef, usize>,
        visited: &mut [bool],
        order: &mut Vec<usize>,
    ) {
        if visited[position] {
            return;
        }
        visited[position] = true;
        if let Some(superclass) = classes[position].superclass {
            if let Some(parent) = by_type.get(&superclass) {
                visit(*parent, pools, classes, by_type, visited, order);
            }
        }
        if let Some(interfaces) = classes[position].interfaces {
            for interface in pools.type_list(interfaces) {
                if let Some(parent) = by_type.get(interface) {
                    visit(*parent, pools, classes, by_type, visited, order);
                }
            }
        }
        order.push(position);
    }

    let mut visited = vec![false; classes.len()];
    let mut order = Vec::with_capacity(classes.len());
    for position in 0..classes.len() {
        visit(position, pools, classes, &by_type, &mut visited, &mut order);
    }
    order
}

fn encode_debug_info(info: &DebugInfo, indices: &SectionIndices<'_>) -> Result<Vec<u8>, Error> {
    let string_index =
        |handle: Option<StringRef>| handle.map(|handle| indices.strings[handle.0 as usize]);
    let type_index =
        |handle: Option<TypeRef>| handle.map(|handle| indices.types[handle.0 as usize]);

    let mut bytes = vec![];
    util::write_uleb128(&mut bytes, info.line_start)?;
    util::write_uleb128(&mut bytes, info.parameter_names.len() as u32)?;
    for name in &info.parameter_names {
        util::write_uleb128p1(&mut bytes, string_index(*name))?;
    }

    for item in &info.items {
        match item {
            DebugItem::EndSequence => bytes.push(DBG_END_SEQUENCE),
            DebugItem::AdvancePc(delta) => {
                bytes.push(DBG_ADVANCE_PC);
                util::write_uleb128(&mut bytes, *delta)?;
            }
            DebugItem::AdvanceLine(delta) => {
                bytes.push(DBG_ADVANCE_LINE);
                util::write_sleb128(&mut bytes, *delta)?;
            }
            DebugItem::StartLocal { register, name, ty } => {
                bytes.push(DBG_START_LOCAL);
                util::write_uleb128(&mut bytes, *register as u32)?;
                util::write_uleb128p1(&mut bytes, string_index(*name))?;
                util::write_uleb128p1(&mut bytes, type_index(*ty))?;
            }
            DebugItem::StartLocalExtended {
                register,
                name,
                ty,
                signature,
            } => {
                bytes.push(DBG_START_LOCAL_EXTENDED);
                util::write_uleb128(&mut bytes, *register as u32)?;
                util::write_uleb128p1(&mut bytes, string_index(*name))?;
                util::write_uleb128p1(&mut bytes, type_index(*ty))?;
                util::write_uleb128p1(&mut bytes, string_index(*signature))?;
            }
            DebugItem::EndLocal(register) => {
                bytes.push(DBG_END_LOCAL);
                util::write_uleb128(&mut bytes, *register as u32)?;
            }
            DebugItem::RestartLocal(register) => {
                bytes.push(DBG_RESTART_LOCAL);
                util::write_uleb128(&mut bytes, *register as u32)?;
            }
            DebugItem::SetPrologueEnd => bytes.push(DBG_SET_PROLOGUE_END),
            DebugItem::SetEpilogueBegin => bytes.push(DBG_SET_EPILOGUE_BEGIN),
            DebugItem::SetFile(file) => {
                bytes.push(DBG_SET_FILE);
                util::write_uleb128p1(&mut bytes, string_index(*file))?;
            }
            DebugItem::Special(opcode) => bytes.push(*opcode),
        }
    }

    Ok(bytes)
}

fn encode_code_item(
    body: &MethodImplementation,
    debug_off: u32,
    indices: &SectionIndices<'_>,
) -> Result<Vec<u8>, Error> {
    let mut insns = vec![];
    for instruction in &body.instructions {
        let raw = instruction.map(
            |target| Ok::<i32, Error>(*target),
            |reference| Ok(indices.item(*reference)),
        )?;
        codec::encode(&raw, &mut insns)?;
    }
    debug_assert_eq!(insns.len(), body.code_units as usize * 2);

    // Handler lists are shared between try entries of one method: identical
    // entries are written once and referenced by relative offset
    let mut handler_bytes: Vec<Vec<u8>> = vec![];
    let mut handler_positions: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut block_handlers: Vec<usize> = Vec::with_capacity(body.tries.len());
    for block in &body.tries {
        let mut entry = vec![];
        let typed = block.handlers.len() as i32;
        let count = if block.catch_all.is_some() { -typed } else { typed };
        util::write_sleb128(&mut entry, count)?;
        for (ty, address) in &block.handlers {
            util::write_uleb128(&mut entry, indices.types[ty.0 as usize])?;
            util::write_uleb128(&mut entry, *address)?;
        }
        if let Some(address) = block.catch_all {
            util::write_uleb128(&mut entry, address)?;
        }
        let position = match handler_positions.get(&entry) {
            Some(position) => *position,
            None => {
                handler_bytes.push(entry.clone());
                handler_positions.insert(entry, handler_bytes.len() - 1);
                handler_bytes.len() - 1
            }
        };
        block_handlers.push(position);
    }
    let mut handler_offsets: Vec<u32> = Vec::with_capacity(handler_bytes.len());
    let mut relative = util::uleb128_width(handler_bytes.len() as u32);
    for entry in &handler_bytes {
        handler_offsets.push(relative);
        relative += entry.len() as u32;
    }

    let mut bytes = vec![];
    bytes.write_u16::<LittleEndian>(body.registers_size)?;
    bytes.write_u16::<LittleEndian>(body.ins_size)?;
    bytes.write_u16::<LittleEndian>(body.outs_size)?;
    bytes.write_u16::<LittleEndian>(body.tries.len() as u16)?;
    bytes.write_u32::<LittleEndian>(debug_off)?;
    bytes.write_u32::<LittleEndian>(body.code_units)?;
    bytes.extend_from_slice(&insns);

    if !body.tries.is_empty() {
        if body.code_units % 2 != 0 {
            bytes.write_u16::<LittleEndian>(0)?;
        }
        for (block, handler) in body.tries.iter().zip(&block_handlers) {
            bytes.write_u32::<LittleEndian>(block.start_address)?;
            bytes.write_u16::<LittleEndian>(count16(block.code_unit_count)?)?;
            bytes.write_u16::<LittleEndian>(count16(handler_offsets[*handler])?)?;
        }
        util::write_uleb128(&mut bytes, handler_bytes.len() as u32)?;
        for entry in &handler_bytes {
            bytes.extend_from_slice(entry);
        }
    }

    Ok(bytes)
}

fn encode_class_data(
    class: &ClassDef,
    layout: &ClassLayout,
    indices: &SectionIndices<'_>,
) -> Result<Vec<u8>, Error> {
    let mut bytes = vec![];
    util::write_uleb128(&mut bytes, class.static_fields.len() as u32)?;
    util::write_uleb128(&mut bytes, class.instance_fields.len() as u32)?;
    util::write_uleb128(&mut bytes, class.direct_methods.len() as u32)?;
    util::write_uleb128(&mut bytes, class.virtual_methods.len() as u32)?;

    // Member lists are sorted by section index and delta-encoded
    for fields in [&class.static_fields, &class.instance_fields] {
        let mut sorted: Vec<(u32, u32)> = fields
            .iter()
            .map(|field| {
                (
                    indices.fields[field.field.0 as usize],
                    field.access_flags.bits(),
                )
            })
            .collect();
        sorted.sort_unstable();
        let mut previous = 0;
        for (index, access_flags) in sorted {
            util::write_uleb128(&mut bytes, index - previous)?;
            util::write_uleb128(&mut bytes, access_flags)?;
            previous = index;
        }
    }

    for (methods, code_offsets) in [
        (&class.direct_methods, &layout.direct_code),
        (&class.virtual_methods, &layout.virtual_code),
    ] {
        let mut sorted: Vec<(u32, u32, u32)> = methods
            .iter()
            .zip(code_offsets)
            .map(|(method, code_off)| {
                (
                    indices.methods[method.method.0 as usize],
                    method.access_flags.bits(),
                    *code_off,
                )
            })
            .collect();
        sorted.sort_unstable();
        let mut previous = 0;
        for (index, access_flags, code_off) in sorted {
            util::write_uleb128(&mut bytes, index - previous)?;
            util::write_uleb128(&mut bytes, access_flags)?;
            util::write_uleb128(&mut bytes, code_off)?;
            previous = index;
        }
    }

    Ok(bytes)
}

const VALUE_BYTE: u8 = 0x00;
const VALUE_SHORT: u8 = 0x02;
const VALUE_CHAR: u8 = 0x03;
const VALUE_INT: u8 = 0x04;
const VALUE_LONG: u8 = 0x06;
const VALUE_STRING: u8 = 0x17;
const VALUE_TYPE: u8 = 0x18;
const VALUE_NULL: u8 = 0x1e;
const VALUE_BOOLEAN: u8 = 0x1f;

/// Little-endian bytes of `value`, trimmed to the shortest form that still
/// sign-extends back to the same value
fn sign_trimmed(value: i64) -> Vec<u8> {
    let mut bytes = value.to_le_bytes().to_vec();
    while bytes.len() > 1 {
        let last = bytes[bytes.len() - 1];
        let next_negative = bytes[bytes.len() - 2] & 0x80 != 0;
        if (last == 0x00 && !next_negative) || (last == 0xff && next_negative) {
            bytes.pop();
        } else {
            break;
        }
    }
    bytes
}

/// Little-endian bytes of `value`, trimmed to the shortest zero-extending
/// form
fn zero_trimmed(value: u64) -> Vec<u8> {
    let mut bytes = value.to_le_bytes().to_vec();
    while bytes.len() > 1 && bytes[bytes.len() - 1] == 0 {
        bytes.pop();
    }
    bytes
}

fn write_value_bytes(out: &mut Vec<u8>, value_type: u8, bytes: &[u8]) {
    out.push(((bytes.len() as u8 - 1) << 5) | value_type);
    out.extend_from_slice(bytes);
}

fn write_encoded_value(out: &mut Vec<u8>, value: &EncodedValue, indices: &SectionIndices<'_>) {
    match value {
        EncodedValue::Byte(v) => write_value_bytes(out, VALUE_BYTE, &[*v as u8]),
        EncodedValue::Short(v) => write_value_bytes(out, VALUE_SHORT, &sign_trimmed(*v as i64)),
        EncodedValue::Char(v) => write_value_bytes(out, VALUE_CHAR, &zero_trimmed(*v as u64)),
        EncodedValue::Int(v) => write_value_bytes(out, VALUE_INT, &sign_trimmed(*v as i64)),
        EncodedValue::Long(v) => write_value_bytes(out, VALUE_LONG, &sign_trimmed(*v)),
        EncodedValue::String(handle) => write_value_bytes(
            out,
            VALUE_STRING,
            &zero_trimmed(indices.strings[handle.0 as usize] as u64),
        ),
        EncodedValue::Type(handle) => write_value_bytes(
            out,
            VALUE_TYPE,
            &zero_trimmed(indices.types[handle.0 as usize] as u64),
        ),
        EncodedValue::Null => out.push(VALUE_NULL),
        EncodedValue::Boolean(v) => out.push(((*v as u8) << 5) | VALUE_BOOLEAN),
    }
}

/// Decoding counterparts used by the container reader
pub(crate) mod values {
    use super::*;

    pub(crate) fn read_encoded_value(
        input: &[u8],
        position: &mut usize,
        strings: &[StringRef],
        types: &[TypeRef],
    ) -> Result<EncodedValue, Error> {
        let truncated = |offset: usize| Error::Truncated { offset };
        let header = *input.get(*position).ok_or_else(|| truncated(*position))?;
        *position += 1;
        let value_type = header & 0x1f;
        let arg = header >> 5;
        let size = arg as usize + 1;

        let mut read_bytes = |size: usize| -> Result<Vec<u8>, Error> {
            let bytes = input
                .get(*position..*position + size)
                .ok_or_else(|| truncated(*position))?
                .to_vec();
            *position += size;
            Ok(bytes)
        };

        let sign_extend = |bytes: &[u8]| -> i64 {
            let mut value: i64 = 0;
            for (index, byte) in bytes.iter().enumerate() {
                value |= (*byte as i64) << (8 * index);
            }
            let shift = 64 - 8 * bytes.len();
            (value << shift) >> shift
        };
        let zero_extend = |bytes: &[u8]| -> u64 {
            let mut value: u64 = 0;
            for (index, byte) in bytes.iter().enumerate() {
                value |= (*byte as u64) << (8 * index);
            }
            value
        };

        Ok(match value_type {
            VALUE_BYTE => EncodedValue::Byte(read_bytes(1)?[0] as i8),
            VALUE_SHORT => EncodedValue::Short(sign_extend(&read_bytes(size)?) as i16),
            VALUE_CHAR => EncodedValue::Char(zero_extend(&read_bytes(size)?) as u16),
            VALUE_INT => EncodedValue::Int(sign_extend(&read_bytes(size)?) as i32),
            VALUE_LONG => EncodedValue::Long(sign_extend(&read_bytes(size)?)),
            VALUE_STRING => {
                let index = zero_extend(&read_bytes(size)?) as u32;
                let handle = strings.get(index as usize).ok_or(Error::BadIndex {
                    section: "string",
                    index,
                })?;
                EncodedValue::String(*handle)
            }
            VALUE_TYPE => {
                let index = zero_extend(&read_bytes(size)?) as u32;
                let handle = types.get(index as usize).ok_or(Error::BadIndex {
                    section: "type",
                    index,
                })?;
                EncodedValue::Type(*handle)
            }
            VALUE_NULL => EncodedValue::Null,
            VALUE_BOOLEAN => EncodedValue::Boolean(arg != 0),
            other => return Err(Error::UnknownOpcode(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::access_flags::ClassAccessFlags;
    use crate::dex::class::ClassDef;
    use crate::dex::container::DexContainer;

    #[test]
    fn string_indices_follow_utf16_order() {
        let mut container = DexContainer::new();
        let pools = container.pools_mut();
        let zebra = pools.intern_string("zebra");
        let apple = pools.intern_string("apple");
        let mango = pools.intern_string("mango");

        let layout = DexLayout::place(&container).unwrap();
        assert_eq!(layout.string_index(apple), 0);
        assert_eq!(layout.string_index(mango), 1);
        assert_eq!(layout.string_index(zebra), 2);
        assert_eq!(layout.string_order, vec![apple, mango, zebra]);
    }

    #[test]
    fn type_indices_follow_string_indices() {
        let mut container = DexContainer::new();
        let pools = container.pools_mut();
        let string = pools.intern_type("Ljava/lang/String;").unwrap();
        let int = pools.intern_type("I").unwrap();

        let layout = DexLayout::place(&container).unwrap();
        // "I" sorts before "Ljava/lang/String;"
        assert_eq!(layout.type_index(int), 0);
        assert_eq!(layout.type_index(string), 1);
    }

    #[test]
    fn field_indices_group_by_class_then_name() {
        let mut container = DexContainer::new();
        let pools = container.pools_mut();
        let b_y = pools.intern_field("LB;", "y", "I").unwrap();
        let a_z = pools.intern_field("LA;", "z", "I").unwrap();
        let a_x = pools.intern_field("LA;", "x", "I").unwrap();

        let layout = DexLayout::place(&container).unwrap();
        assert_eq!(layout.field_index(a_x), 0);
        assert_eq!(layout.field_index(a_z), 1);
        assert_eq!(layout.field_index(b_y), 2);
    }

    #[test]
    fn protos_sort_by_return_then_parameters() {
        let mut container = DexContainer::new();
        let pools = container.pools_mut();
        let v_ij = pools.intern_proto("V", &["I", "J"]).unwrap();
        let v_i = pools.intern_proto("V", &["I"]).unwrap();
        let i_none = pools.intern_proto("I", &[]).unwrap();

        let layout = DexLayout::place(&container).unwrap();
        // "I" return sorts before "V"; shorter parameter list first
        assert_eq!(layout.proto_index(i_none), 0);
        assert_eq!(layout.proto_index(v_i), 1);
        assert_eq!(layout.proto_index(v_ij), 2);
    }

    #[test]
    fn superclasses_precede_subclasses() {
        let mut container = DexContainer::new();
        let child = container.pools_mut().intern_type("LChild;").unwrap();
        let parent = container.pools_mut().intern_type("LParent;").unwrap();

        let mut child_def = ClassDef::new(child, ClassAccessFlags::PUBLIC);
        child_def.superclass = Some(parent);
        container.add_class(child_def);
        container.add_class(ClassDef::new(parent, ClassAccessFlags::PUBLIC));

        let layout = DexLayout::place(&container).unwrap();
        // The parent was added second but must be defined first
        assert_eq!(layout.class_order, vec![1, 0]);
    }

    #[test]
    fn placement_respects_alignment_and_disjointness() {
        let mut container = DexContainer::new();
        let pools = container.pools_mut();
        for value in ["a", "bb", "ccc", "dddd", "odd"] {
            pools.intern_string(value);
        }
        pools.intern_proto("V", &["I", "J"]).unwrap();

        let layout = DexLayout::place(&container).unwrap();
        let allocations = layout.allocations();
        assert!(!allocations.is_empty());
        for window in allocations.windows(2) {
            assert!(window[0].offset + window[0].size <= window[1].offset);
        }
        for allocation in allocations {
            assert_eq!(allocation.offset % allocation.alignment, 0);
        }
        assert_eq!(layout.file_size() % 4, 0);
    }

    #[test]
    fn encoded_values_trim_to_minimal_width() {
        let mut out = vec![];
        write_value_bytes(&mut out, VALUE_INT, &sign_trimmed(-1));
        assert_eq!(out, vec![VALUE_INT, 0xff]);

        let mut out = vec![];
        write_value_bytes(&mut out, VALUE_INT, &sign_trimmed(0x1234));
        assert_eq!(out, vec![(1 << 5) | VALUE_INT, 0x34, 0x12]);

        // 0x80 needs a second byte so it does not sign-extend negative
        let mut out = vec![];
        write_value_bytes(&mut out, VALUE_INT, &sign_trimmed(0x80));
        assert_eq!(out, vec![(1 << 5) | VALUE_INT, 0x80, 0x00]);

        assert_eq!(zero_trimmed(0), vec![0x00]);
        assert_eq!(zero_trimmed(0x100), vec![0x00, 0x01]);
    }
}

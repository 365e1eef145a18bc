//! Interning pools for every referenceable item in a container
//!
//! Each pool stores one canonical copy of every distinct value and hands out
//! a small copyable handle. Handles are identity: two structurally equal
//! items interned into the same pool always come back as the same handle,
//! and a handle stays valid for the life of the pool (interning is
//! append-only). Final section indices are not decided here - they are
//! assigned by the container's placement pass once interning is complete,
//! since every pool has a canonical sort order.

use crate::dex::descriptors;
use crate::dex::Error;
use std::collections::HashMap;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct StringRef(pub(crate) u32);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct TypeRef(pub(crate) u32);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct TypeListRef(pub(crate) u32);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct ProtoRef(pub(crate) u32);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct FieldRef(pub(crate) u32);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct MethodRef(pub(crate) u32);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct AnnotationRef(pub(crate) u32);

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct AnnotationSetRef(pub(crate) u32);

/// Reference operand of an instruction
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ItemRef {
    String(StringRef),
    Type(TypeRef),
    Field(FieldRef),
    Method(MethodRef),
}

impl ItemRef {
    pub fn kind(self) -> ReferenceKind {
        match self {
            ItemRef::String(_) => ReferenceKind::String,
            ItemRef::Type(_) => ReferenceKind::Type,
            ItemRef::Field(_) => ReferenceKind::Field,
            ItemRef::Method(_) => ReferenceKind::Method,
        }
    }
}

/// The kind of pooled item an opcode's reference operand must name
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ReferenceKind {
    String,
    Type,
    Field,
    Method,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct ProtoData {
    pub shorty: StringRef,
    pub return_type: TypeRef,
    pub parameters: Option<TypeListRef>,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct FieldData {
    pub class: TypeRef,
    pub ty: TypeRef,
    pub name: StringRef,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct MethodData {
    pub class: TypeRef,
    pub proto: ProtoRef,
    pub name: StringRef,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum AnnotationVisibility {
    Build,
    Runtime,
    System,
}

impl AnnotationVisibility {
    pub fn value(self) -> u8 {
        match self {
            AnnotationVisibility::Build => 0x00,
            AnnotationVisibility::Runtime => 0x01,
            AnnotationVisibility::System => 0x02,
        }
    }

    pub fn from_value(value: u8) -> Option<AnnotationVisibility> {
        match value {
            0x00 => Some(AnnotationVisibility::Build),
            0x01 => Some(AnnotationVisibility::Runtime),
            0x02 => Some(AnnotationVisibility::System),
            _ => None,
        }
    }
}

/// The subset of encoded values annotations in this crate can carry
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    String(StringRef),
    Type(TypeRef),
    Boolean(bool),
    Null,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct AnnotationData {
    pub visibility: AnnotationVisibility,
    pub ty: TypeRef,
    /// Element names paired with values, in canonical (name index) order
    pub elements: Vec<(StringRef, EncodedValue)>,
}

/// All interning pools of one container
///
/// `version` counts mutations; the placement pass records the version it ran
/// against so that serialization can detect a stale layout.
pub struct DexPools {
    strings: Vec<String>,
    string_map: HashMap<String, StringRef>,

    types: Vec<StringRef>,
    type_map: HashMap<StringRef, TypeRef>,

    type_lists: Vec<Vec<TypeRef>>,
    type_list_map: HashMap<Vec<TypeRef>, TypeListRef>,

    protos: Vec<ProtoData>,
    proto_map: HashMap<ProtoData, ProtoRef>,

    fields: Vec<FieldData>,
    field_map: HashMap<FieldData, FieldRef>,

    methods: Vec<MethodData>,
    method_map: HashMap<MethodData, MethodRef>,

    annotations: Vec<AnnotationData>,
    annotation_map: HashMap<AnnotationData, AnnotationRef>,

    annotation_sets: Vec<Vec<AnnotationRef>>,
    annotation_set_map: HashMap<Vec<AnnotationRef>, AnnotationSetRef>,

    version: u64,
}

impl DexPools {
    pub fn new() -> DexPools {
        DexPools {
            strings: vec![],
            string_map: HashMap::new(),
            types: vec![],
            type_map: HashMap::new(),
            type_lists: vec![],
            type_list_map: HashMap::new(),
            protos: vec![],
            proto_map: HashMap::new(),
            fields: vec![],
            field_map: HashMap::new(),
            methods: vec![],
            method_map: HashMap::new(),
            annotations: vec![],
            annotation_map: HashMap::new(),
            annotation_sets: vec![],
            annotation_set_map: HashMap::new(),
            version: 0,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Get or insert the canonical handle for a string
    pub fn intern_string(&mut self, value: &str) -> StringRef {
        if let Some(handle) = self.string_map.get(value) {
            return *handle;
        }
        let handle = StringRef(self.strings.len() as u32);
        self.strings.push(value.to_string());
        self.string_map.insert(value.to_string(), handle);
        self.version += 1;
        handle
    }

    /// Get or insert the canonical handle for a type descriptor
    pub fn intern_type(&mut self, descriptor: &str) -> Result<TypeRef, Error> {
        descriptors::check_descriptor(descriptor)?;
        Ok(self.intern_type_unchecked(descriptor))
    }

    /// Like `intern_type` but also accepts `V` (used for return types)
    fn intern_return_type(&mut self, descriptor: &str) -> Result<TypeRef, Error> {
        descriptors::check_return_descriptor(descriptor)?;
        Ok(self.intern_type_unchecked(descriptor))
    }

    pub(crate) fn intern_type_unchecked(&mut self, descriptor: &str) -> TypeRef {
        let string = self.intern_string(descriptor);
        if let Some(handle) = self.type_map.get(&string) {
            return *handle;
        }
        let handle = TypeRef(self.types.len() as u32);
        self.types.push(string);
        self.type_map.insert(string, handle);
        self.version += 1;
        handle
    }

    pub fn intern_type_list(&mut self, types: &[TypeRef]) -> TypeListRef {
        if let Some(handle) = self.type_list_map.get(types) {
            return *handle;
        }
        let handle = TypeListRef(self.type_lists.len() as u32);
        self.type_lists.push(types.to_vec());
        self.type_list_map.insert(types.to_vec(), handle);
        self.version += 1;
        handle
    }

    pub fn intern_proto(
        &mut self,
        return_type: &str,
        parameters: &[&str],
    ) -> Result<ProtoRef, Error> {
        // Validate everything before interning anything, so a bad descriptor
        // leaves the pools untouched
        descriptors::check_return_descriptor(return_type)?;
        for parameter in parameters {
            descriptors::check_descriptor(parameter)?;
        }

        let mut shorty = String::with_capacity(parameters.len() + 1);
        shorty.push(descriptors::shorty_char(return_type));
        for parameter in parameters {
            shorty.push(descriptors::shorty_char(parameter));
        }

        let shorty = self.intern_string(&shorty);
        let return_type = self.intern_return_type(return_type)?;
        let parameters = if parameters.is_empty() {
            None
        } else {
            let types = parameters
                .iter()
                .map(|parameter| self.intern_type(parameter))
                .collect::<Result<Vec<_>, _>>()?;
            Some(self.intern_type_list(&types))
        };

        Ok(self.intern_proto_data(ProtoData {
            shorty,
            return_type,
            parameters,
        }))
    }

    pub(crate) fn intern_proto_data(&mut self, data: ProtoData) -> ProtoRef {
        if let Some(handle) = self.proto_map.get(&data) {
            return *handle;
        }
        let handle = ProtoRef(self.protos.len() as u32);
        self.protos.push(data.clone());
        self.proto_map.insert(data, handle);
        self.version += 1;
        handle
    }

    pub fn intern_field(&mut self, class: &str, name: &str, ty: &str) -> Result<FieldRef, Error> {
        let data = FieldData {
            class: self.intern_type(class)?,
            ty: self.intern_type(ty)?,
            name: self.intern_string(name),
        };
        Ok(self.intern_field_data(data))
    }

    pub(crate) fn intern_field_data(&mut self, data: FieldData) -> FieldRef {
        if let Some(handle) = self.field_map.get(&data) {
            return *handle;
        }
        let handle = FieldRef(self.fields.len() as u32);
        self.fields.push(data.clone());
        self.field_map.insert(data, handle);
        self.version += 1;
        handle
    }

    pub fn intern_method(
        &mut self,
        class: &str,
        name: &str,
        return_type: &str,
        parameters: &[&str],
    ) -> Result<MethodRef, Error> {
        let data = MethodData {
            class: self.intern_type(class)?,
            proto: self.intern_proto(return_type, parameters)?,
            name: self.intern_string(name),
        };
        Ok(self.intern_method_data(data))
    }

    pub(crate) fn intern_method_data(&mut self, data: MethodData) -> MethodRef {
        if let Some(handle) = self.method_map.get(&data) {
            return *handle;
        }
        let handle = MethodRef(self.methods.len() as u32);
        self.methods.push(data.clone());
        self.method_map.insert(data, handle);
        self.version += 1;
        handle
    }

    pub fn intern_annotation(&mut self, data: AnnotationData) -> AnnotationRef {
        if let Some(handle) = self.annotation_map.get(&data) {
            return *handle;
        }
        let handle = AnnotationRef(self.annotations.len() as u32);
        self.annotations.push(data.clone());
        self.annotation_map.insert(data, handle);
        self.version += 1;
        handle
    }

    pub fn intern_annotation_set(&mut self, annotations: &[AnnotationRef]) -> AnnotationSetRef {
        if let Some(handle) = self.annotation_set_map.get(annotations) {
            return *handle;
        }
        let handle = AnnotationSetRef(self.annotation_sets.len() as u32);
        self.annotation_sets.push(annotations.to_vec());
        self.annotation_set_map.insert(annotations.to_vec(), handle);
        self.version += 1;
        handle
    }

    pub fn string(&self, handle: StringRef) -> &str {
        &self.strings[handle.0 as usize]
    }

    pub fn type_descriptor(&self, handle: TypeRef) -> &str {
        self.string(self.types[handle.0 as usize])
    }

    pub fn type_string(&self, handle: TypeRef) -> StringRef {
        self.types[handle.0 as usize]
    }

    pub fn type_list(&self, handle: TypeListRef) -> &[TypeRef] {
        &self.type_lists[handle.0 as usize]
    }

    pub fn proto(&self, handle: ProtoRef) -> &ProtoData {
        &self.protos[handle.0 as usize]
    }

    pub fn field(&self, handle: FieldRef) -> &FieldData {
        &self.fields[handle.0 as usize]
    }

    pub fn method(&self, handle: MethodRef) -> &MethodData {
        &self.methods[handle.0 as usize]
    }

    pub fn annotation(&self, handle: AnnotationRef) -> &AnnotationData {
        &self.annotations[handle.0 as usize]
    }

    pub fn annotation_set(&self, handle: AnnotationSetRef) -> &[AnnotationRef] {
        &self.annotation_sets[handle.0 as usize]
    }

    pub fn string_count(&self) -> u32 {
        self.strings.len() as u32
    }

    pub fn type_count(&self) -> u32 {
        self.types.len() as u32
    }

    pub fn type_list_count(&self) -> u32 {
        self.type_lists.len() as u32
    }

    pub fn proto_count(&self) -> u32 {
        self.protos.len() as u32
    }

    pub fn field_count(&self) -> u32 {
        self.fields.len() as u32
    }

    pub fn method_count(&self) -> u32 {
        self.methods.len() as u32
    }

    pub fn annotation_count(&self) -> u32 {
        self.annotations.len() as u32
    }

    pub fn annotation_set_count(&self) -> u32 {
        self.annotation_sets.len() as u32
    }

    /// Number of register words the arguments of `proto` occupy, not counting
    /// a receiver
    pub fn parameter_words(&self, proto: ProtoRef) -> u16 {
        let data = &self.protos[proto.0 as usize];
        match data.parameters {
            None => 0,
            Some(list) => self
                .type_list(list)
                .iter()
                .map(|ty| descriptors::word_count(self.type_descriptor(*ty)))
                .sum(),
        }
    }

    /// Re-intern a string from another container's pools
    pub fn import_string(&mut self, source: &DexPools, handle: StringRef) -> StringRef {
        // Cannot reuse the handle: indices are per-container
        let value = source.string(handle).to_string();
        self.intern_string(&value)
    }

    pub fn import_type(&mut self, source: &DexPools, handle: TypeRef) -> TypeRef {
        let descriptor = source.type_descriptor(handle).to_string();
        self.intern_type_unchecked(&descriptor)
    }

    pub fn import_type_list(&mut self, source: &DexPools, handle: TypeListRef) -> TypeListRef {
        let types: Vec<TypeRef> = source
            .type_list(handle)
            .to_vec()
            .into_iter()
            .map(|ty| self.import_type(source, ty))
            .collect();
        self.intern_type_list(&types)
    }

    pub fn import_proto(&mut self, source: &DexPools, handle: ProtoRef) -> ProtoRef {
        let data = source.proto(handle).clone();
        let data = ProtoData {
            shorty: self.import_string(source, data.shorty),
            return_type: self.import_type(source, data.return_type),
            parameters: data.parameters.map(|list| self.import_type_list(source, list)),
        };
        self.intern_proto_data(data)
    }

    pub fn import_field(&mut self, source: &DexPools, handle: FieldRef) -> FieldRef {
        let data = source.field(handle).clone();
        let data = FieldData {
            class: self.import_type(source, data.class),
            ty: self.import_type(source, data.ty),
            name: self.import_string(source, data.name),
        };
        self.intern_field_data(data)
    }

    pub fn import_method(&mut self, source: &DexPools, handle: MethodRef) -> MethodRef {
        let data = source.method(handle).clone();
        let data = MethodData {
            class: self.import_type(source, data.class),
            proto: self.import_proto(source, data.proto),
            name: self.import_string(source, data.name),
        };
        self.intern_method_data(data)
    }

    pub fn import_annotation(&mut self, source: &DexPools, handle: AnnotationRef) -> AnnotationRef {
        let data = source.annotation(handle).clone();
        let elements = data
            .elements
            .into_iter()
            .map(|(name, value)| {
                let value = match value {
                    EncodedValue::String(s) => EncodedValue::String(self.import_string(source, s)),
                    EncodedValue::Type(t) => EncodedValue::Type(self.import_type(source, t)),
                    other => other,
                };
                (self.import_string(source, name), value)
            })
            .collect();
        let ty = self.import_type(source, data.ty);
        self.intern_annotation(AnnotationData {
            visibility: data.visibility,
            ty,
            elements,
        })
    }

    pub fn import_annotation_set(
        &mut self,
        source: &DexPools,
        handle: AnnotationSetRef,
    ) -> AnnotationSetRef {
        let annotations: Vec<AnnotationRef> = source
            .annotation_set(handle)
            .to_vec()
            .into_iter()
            .map(|annotation| self.import_annotation(source, annotation))
            .collect();
        self.intern_annotation_set(&annotations)
    }

    pub fn import_item(&mut self, source: &DexPools, item: ItemRef) -> ItemRef {
        match item {
            ItemRef::String(handle) => ItemRef::String(self.import_string(source, handle)),
            ItemRef::Type(handle) => ItemRef::Type(self.import_type(source, handle)),
            ItemRef::Field(handle) => ItemRef::Field(self.import_field(source, handle)),
            ItemRef::Method(handle) => ItemRef::Method(self.import_method(source, handle)),
        }
    }
}

impl Default for DexPools {
    fn default() -> DexPools {
        DexPools::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut pools = DexPools::new();
        let first = pools.intern_string("hello");
        let count = pools.string_count();
        // A structurally equal but separately allocated value
        let second = pools.intern_string(&String::from("hello"));
        assert_eq!(first, second);
        assert_eq!(pools.string_count(), count);
    }

    #[test]
    fn interned_types_share_strings() {
        let mut pools = DexPools::new();
        let string = pools.intern_string("Ljava/lang/Object;");
        let ty = pools.intern_type("Ljava/lang/Object;").unwrap();
        assert_eq!(pools.type_string(ty), string);
        assert_eq!(pools.type_descriptor(ty), "Ljava/lang/Object;");
    }

    #[test]
    fn proto_shorty_is_derived() {
        let mut pools = DexPools::new();
        let proto = pools
            .intern_proto("V", &["I", "J", "Ljava/lang/String;"])
            .unwrap();
        let data = pools.proto(proto).clone();
        assert_eq!(pools.string(data.shorty), "VIJL");
        assert_eq!(pools.parameter_words(proto), 4);

        let same = pools
            .intern_proto("V", &["I", "J", "Ljava/lang/String;"])
            .unwrap();
        assert_eq!(proto, same);
    }

    #[test]
    fn bad_proto_descriptors_leave_pools_untouched() {
        let mut pools = DexPools::new();
        let strings = pools.string_count();
        assert!(pools.intern_proto("", &["I"]).is_err());
        assert!(pools.intern_proto("V", &["Lbroken"]).is_err());
        assert_eq!(pools.string_count(), strings);
    }

    #[test]
    fn methods_dedup_through_protos() {
        let mut pools = DexPools::new();
        let first = pools
            .intern_method("Lfoo/Bar;", "frob", "V", &["I"])
            .unwrap();
        let second = pools
            .intern_method("Lfoo/Bar;", "frob", "V", &["I"])
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(pools.method_count(), 1);
    }

    #[test]
    fn import_reinterns_transitively() {
        let mut source = DexPools::new();
        let method = source
            .intern_method("Lfoo/Bar;", "frob", "Ljava/lang/String;", &["I", "J"])
            .unwrap();

        let mut destination = DexPools::new();
        // Pre-intern something so handles cannot just coincide
        destination.intern_string("occupied");
        let imported = destination.import_method(&source, method);

        let data = destination.method(imported).clone();
        assert_eq!(destination.type_descriptor(data.class), "Lfoo/Bar;");
        assert_eq!(destination.string(data.name), "frob");
        let proto = destination.proto(data.proto).clone();
        assert_eq!(destination.string(proto.shorty), "LIJ");
        assert_eq!(
            destination.type_descriptor(proto.return_type),
            "Ljava/lang/String;"
        );

        // Importing twice lands on the same canonical handle
        assert_eq!(destination.import_method(&source, method), imported);
    }
}

//! Class definitions as stored in a container

use crate::dex::access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use crate::dex::code::MethodImplementation;
use crate::dex::pools::{AnnotationSetRef, FieldRef, MethodRef, StringRef, TypeListRef, TypeRef};

/// A field as declared by its class, in either the static or instance list
#[derive(Clone, Debug)]
pub struct EncodedField {
    pub field: FieldRef,
    pub access_flags: FieldAccessFlags,
}

/// A method as declared by its class
///
/// `code` is `None` for abstract and native methods.
#[derive(Clone, Debug)]
pub struct EncodedMethod {
    pub method: MethodRef,
    pub access_flags: MethodAccessFlags,
    pub code: Option<MethodImplementation>,
}

/// One class definition
///
/// Everything the class refers to (its own type, superclass, interfaces,
/// source file, members) is a handle into the owning container's pools.
/// Direct methods are the static, private and constructor methods; all
/// others are virtual.
#[derive(Clone, Debug)]
pub struct ClassDef {
    pub class: TypeRef,
    pub access_flags: ClassAccessFlags,
    pub superclass: Option<TypeRef>,
    pub interfaces: Option<TypeListRef>,
    pub source_file: Option<StringRef>,
    pub annotations: Option<AnnotationSetRef>,
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
}

impl ClassDef {
    pub fn new(class: TypeRef, access_flags: ClassAccessFlags) -> ClassDef {
        ClassDef {
            class,
            access_flags,
            superclass: None,
            interfaces: None,
            source_file: None,
            annotations: None,
            static_fields: vec![],
            instance_fields: vec![],
            direct_methods: vec![],
            virtual_methods: vec![],
        }
    }

    /// Does this class need a `class_data` item in the container?
    pub fn has_class_data(&self) -> bool {
        !self.static_fields.is_empty()
            || !self.instance_fields.is_empty()
            || !self.direct_methods.is_empty()
            || !self.virtual_methods.is_empty()
    }
}

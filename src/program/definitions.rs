//! Class, method and field definitions.
//!
//! Definitions are plain data owned by the [`ProgramGraph`](super::ProgramGraph). They are
//! freely cloned while the pipeline rewrites them (class merging moves methods, the writer
//! replaces code bodies) and become frozen once the final program is produced.

use std::sync::Arc;

use crate::{
    code::CfCode,
    config::ClassFileVersion,
    program::{
        flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags},
        optinfo::FieldOptimizationInfo,
        references::{FieldRef, MethodRef, MethodSignature, Name, ProtoRef, TypeRef},
    },
};

/// Where a class comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum ClassKind {
    /// Input being shrunk and optimized
    Program,
    /// Compile-time dependency that is not part of the output
    Classpath,
    /// Platform library
    Library,
}

/// A runtime annotation attached to a definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Annotation {
    /// Annotation interface
    pub ty: TypeRef,
    /// Types named by class-valued elements
    pub referenced_types: Vec<TypeRef>,
}

impl Annotation {
    /// Creates an annotation without class-valued elements.
    #[must_use]
    pub fn new(ty: TypeRef) -> Self {
        Self {
            ty,
            referenced_types: Vec::new(),
        }
    }
}

/// Constant initial value of a static field.
#[derive(Debug, Clone, PartialEq)]
pub enum StaticValue {
    /// `int`, `short`, `char`, `byte`, `boolean` constant
    Int(i32),
    /// `long` constant
    Long(i64),
    /// `float` constant
    Float(f32),
    /// `double` constant
    Double(f64),
    /// `String` constant
    String(Name),
}

/// A field definition.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Reference naming this field (holder is the declaring class)
    pub reference: FieldRef,
    /// Access flags
    pub access: FieldAccessFlags,
    /// `ConstantValue` attribute
    pub static_value: Option<StaticValue>,
    /// Generic signature
    pub signature: Option<String>,
    /// Annotations
    pub annotations: Vec<Annotation>,
    /// Shared, concurrently updated optimization facts
    pub optimization_info: Arc<FieldOptimizationInfo>,
}

impl FieldDef {
    /// Creates a field definition.
    #[must_use]
    pub fn new(reference: FieldRef, access: FieldAccessFlags) -> Self {
        Self {
            reference,
            access,
            static_value: None,
            signature: None,
            annotations: Vec::new(),
            optimization_info: Arc::new(FieldOptimizationInfo::new()),
        }
    }

    /// Returns `true` for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.is_static()
    }
}

/// Receiver and argument layout of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInfo {
    /// The method has an implicit `this`
    pub has_receiver: bool,
    /// Argument types including the receiver, in order
    pub argument_types: Vec<TypeRef>,
    /// First local slot of each argument
    pub slots: Vec<u16>,
}

impl ParameterInfo {
    /// Number of arguments including the receiver.
    #[must_use]
    pub fn argument_count(&self) -> usize {
        self.argument_types.len()
    }

    /// Number of local slots occupied by the arguments.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        match (self.slots.last(), self.argument_types.last()) {
            (Some(slot), Some(ty)) => usize::from(*slot) + ty.kind().slots(),
            _ => 0,
        }
    }

    /// The argument occupying `slot` as its first slot.
    #[must_use]
    pub fn argument_at_slot(&self, slot: u16) -> Option<usize> {
        self.slots.iter().position(|s| *s == slot)
    }
}

/// A method definition.
#[derive(Debug, Clone)]
pub struct MethodDef {
    /// Reference naming this method (holder is the declaring class)
    pub reference: MethodRef,
    /// Access flags
    pub access: MethodAccessFlags,
    /// Bytecode body; `None` for abstract and native methods
    pub code: Option<Arc<CfCode>>,
    /// Declared thrown exceptions
    pub exceptions: Vec<TypeRef>,
    /// Generic signature
    pub signature: Option<String>,
    /// Annotations
    pub annotations: Vec<Annotation>,
}

impl MethodDef {
    /// Creates a method definition without code.
    #[must_use]
    pub fn new(reference: MethodRef, access: MethodAccessFlags) -> Self {
        Self {
            reference,
            access,
            code: None,
            exceptions: Vec::new(),
            signature: None,
            annotations: Vec::new(),
        }
    }

    /// Attaches a code body.
    #[must_use]
    pub fn with_code(mut self, code: CfCode) -> Self {
        self.code = Some(Arc::new(code));
        self
    }

    /// The declaring class.
    #[must_use]
    pub fn holder(&self) -> &TypeRef {
        &self.reference.holder
    }

    /// Name and prototype.
    #[must_use]
    pub fn signature(&self) -> MethodSignature {
        self.reference.signature()
    }

    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access.is_static()
    }

    /// Returns `true` for abstract methods.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access.is_abstract()
    }

    /// Returns `true` for `<init>`.
    #[must_use]
    pub fn is_instance_initializer(&self) -> bool {
        self.reference.is_instance_initializer()
    }

    /// Returns `true` for `<clinit>`.
    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        self.reference.is_class_initializer()
    }

    /// Returns `true` for methods dispatched virtually: not static, not private and not an
    /// initializer.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        !self.access.is_static()
            && !self.access.is_private()
            && !self.is_instance_initializer()
            && !self.is_class_initializer()
    }

    /// Returns `true` for methods invoked without dispatch (private, static, initializers).
    #[must_use]
    pub fn is_direct(&self) -> bool {
        !self.is_virtual()
    }

    /// Receiver and argument layout.
    #[must_use]
    pub fn parameter_info(&self) -> ParameterInfo {
        let has_receiver = !self.is_static();
        let mut argument_types = Vec::with_capacity(self.reference.arity() + 1);
        if has_receiver {
            argument_types.push(self.reference.holder.clone());
        }
        argument_types.extend(self.reference.proto.parameters().iter().cloned());

        let mut slots = Vec::with_capacity(argument_types.len());
        let mut next = 0u16;
        for ty in &argument_types {
            slots.push(next);
            next = next.saturating_add(ty.kind().slots() as u16);
        }
        ParameterInfo {
            has_receiver,
            argument_types,
            slots,
        }
    }

    /// Returns `true` if the body is a lone `return` of a void method.
    #[must_use]
    pub fn is_empty_void_method(&self) -> bool {
        self.reference.proto.return_type().is_void()
            && self.code.as_ref().is_some_and(|code| code.is_empty_void_method())
    }
}

/// A class definition.
#[derive(Debug, Clone)]
pub struct ClassDef {
    /// The class type
    pub ty: TypeRef,
    /// Origin
    pub kind: ClassKind,
    /// Access flags
    pub access: ClassAccessFlags,
    /// Superclass, `None` only for `java/lang/Object`
    pub super_type: Option<TypeRef>,
    /// Direct superinterfaces in declaration order
    pub interfaces: Vec<TypeRef>,
    /// Declared fields
    pub fields: Vec<FieldDef>,
    /// Declared methods
    pub methods: Vec<MethodDef>,
    /// Generic signature
    pub signature: Option<String>,
    /// Annotations
    pub annotations: Vec<Annotation>,
    /// Class-file version
    pub version: ClassFileVersion,
    /// `SourceFile` attribute
    pub source_file: Option<Name>,
}

impl ClassDef {
    /// Creates an empty class extending `java/lang/Object`.
    #[must_use]
    pub fn new(ty: TypeRef, kind: ClassKind) -> Self {
        let super_type = if ty == TypeRef::object() {
            None
        } else {
            Some(TypeRef::object())
        };
        Self {
            ty,
            kind,
            access: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            super_type,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            signature: None,
            annotations: Vec::new(),
            version: ClassFileVersion::default(),
            source_file: None,
        }
    }

    /// Returns `true` for program classes.
    #[must_use]
    pub fn is_program(&self) -> bool {
        self.kind == ClassKind::Program
    }

    /// Returns `true` for interfaces.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access.is_interface()
    }

    /// Returns `true` for abstract classes and interfaces.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access.is_abstract() || self.access.is_interface()
    }

    /// Superclass followed by the direct interfaces.
    pub fn supertypes(&self) -> impl Iterator<Item = &TypeRef> + '_ {
        self.super_type.iter().chain(self.interfaces.iter())
    }

    /// Finds a declared method by name and prototype.
    #[must_use]
    pub fn lookup_method(&self, name: &Name, proto: &ProtoRef) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.reference.name == *name && m.reference.proto == *proto)
    }

    /// Finds a declared method matching `method` (holder ignored).
    #[must_use]
    pub fn lookup_matching_method(&self, method: &MethodRef) -> Option<&MethodDef> {
        self.lookup_method(&method.name, &method.proto)
    }

    /// Finds a declared field matching `field` (holder ignored).
    #[must_use]
    pub fn lookup_field(&self, field: &FieldRef) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.reference.matches(field))
    }

    /// The static initializer.
    #[must_use]
    pub fn class_initializer(&self) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.is_class_initializer())
    }

    /// Virtually dispatched methods in declaration order.
    pub fn virtual_methods(&self) -> impl Iterator<Item = &MethodDef> + '_ {
        self.methods.iter().filter(|m| m.is_virtual())
    }

    /// Directly invoked methods in declaration order.
    pub fn direct_methods(&self) -> impl Iterator<Item = &MethodDef> + '_ {
        self.methods.iter().filter(|m| m.is_direct())
    }

    /// Instance initializers in declaration order.
    pub fn instance_initializers(&self) -> impl Iterator<Item = &MethodDef> + '_ {
        self.methods.iter().filter(|m| m.is_instance_initializer())
    }

    /// Instance fields in declaration order.
    pub fn instance_fields(&self) -> impl Iterator<Item = &FieldDef> + '_ {
        self.fields.iter().filter(|f| !f.is_static())
    }

    /// The field an `InitClass` instruction reads to trigger initialization: the first
    /// static field, if any.
    #[must_use]
    pub fn class_init_field(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.is_static())
    }

    /// Adds a method. The method's holder is reset to this class.
    #[must_use]
    pub fn with_method(mut self, mut method: MethodDef) -> Self {
        method.reference = method.reference.with_holder(self.ty.clone());
        self.methods.push(method);
        self
    }

    /// Adds a field. The field's holder is reset to this class.
    #[must_use]
    pub fn with_field(mut self, mut field: FieldDef) -> Self {
        field.reference = field.reference.with_holder(self.ty.clone());
        self.fields.push(field);
        self
    }

    /// Replaces the superclass.
    #[must_use]
    pub fn with_super(mut self, super_type: TypeRef) -> Self {
        self.super_type = Some(super_type);
        self
    }

    /// Adds a direct superinterface.
    #[must_use]
    pub fn with_interface(mut self, interface: TypeRef) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Replaces the access flags.
    #[must_use]
    pub fn with_access(mut self, access: ClassAccessFlags) -> Self {
        self.access = access;
        self
    }

    /// Replaces the class-file version.
    #[must_use]
    pub fn with_version(mut self, version: ClassFileVersion) -> Self {
        self.version = version;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_info_slots() {
        let method = MethodDef::new(
            MethodRef::parse("a/A", "m", "(JILjava/lang/String;D)V").unwrap(),
            MethodAccessFlags::PUBLIC,
        );
        let info = method.parameter_info();
        assert!(info.has_receiver);
        assert_eq!(info.argument_count(), 5);
        assert_eq!(info.slots, vec![0, 1, 3, 4, 5]);
        assert_eq!(info.slot_count(), 7);
        assert_eq!(info.argument_at_slot(3), Some(2));
        assert_eq!(info.argument_at_slot(2), None);
    }

    #[test]
    fn test_static_parameter_info() {
        let method = MethodDef::new(
            MethodRef::parse("a/A", "s", "(I)I").unwrap(),
            MethodAccessFlags::STATIC,
        );
        let info = method.parameter_info();
        assert!(!info.has_receiver);
        assert_eq!(info.argument_types, vec![TypeRef::int()]);
    }

    #[test]
    fn test_method_kinds() {
        let init = MethodDef::new(
            MethodRef::parse("a/A", "<init>", "()V").unwrap(),
            MethodAccessFlags::PUBLIC,
        );
        let private = MethodDef::new(
            MethodRef::parse("a/A", "p", "()V").unwrap(),
            MethodAccessFlags::PRIVATE,
        );
        let public = MethodDef::new(
            MethodRef::parse("a/A", "v", "()V").unwrap(),
            MethodAccessFlags::PUBLIC,
        );
        assert!(init.is_direct());
        assert!(private.is_direct());
        assert!(public.is_virtual());
    }

    #[test]
    fn test_with_method_resets_holder() {
        let class = ClassDef::new(TypeRef::class("a/A"), ClassKind::Program).with_method(
            MethodDef::new(
                MethodRef::parse("b/B", "m", "()V").unwrap(),
                MethodAccessFlags::PUBLIC,
            ),
        );
        assert_eq!(class.methods[0].reference.holder, TypeRef::class("a/A"));
        assert_eq!(class.super_type, Some(TypeRef::object()));
        assert!(ClassDef::new(TypeRef::object(), ClassKind::Library).super_type.is_none());
    }
}

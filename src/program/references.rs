//! Interned symbolic references.
//!
//! References name things; they never point at definitions. A [`TypeRef`] is a validated
//! descriptor, a [`MethodRef`] is holder + name + [`ProtoRef`], a [`FieldRef`] is holder +
//! name + type. All of them are immutable, cheap to clone and compare structurally, which makes
//! them the keys of every map in the crate. Rewriting a reference always produces a new one;
//! the [`GraphLens`](crate::lens::GraphLens) records how old references map to new ones.
//!
//! String storage is interned through the process-wide [`ReferenceFactory`], so the thousands
//! of references to `Ljava/lang/Object;` share one allocation and usually compare by pointer.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    sync::{Arc, OnceLock},
};

use dashmap::DashSet;

use crate::{
    program::descriptor::{
        descriptor_to_java_name, split_method_descriptor, validate_field_descriptor,
        validate_return_descriptor, ValueKind,
    },
    Result,
};

/// Interner for descriptor and name strings.
#[derive(Debug, Default)]
pub struct ReferenceFactory {
    strings: DashSet<Arc<str>>,
}

impl ReferenceFactory {
    /// The process-wide factory.
    pub fn global() -> &'static ReferenceFactory {
        static FACTORY: OnceLock<ReferenceFactory> = OnceLock::new();
        FACTORY.get_or_init(ReferenceFactory::default)
    }

    /// Returns the shared allocation for `value`.
    pub fn intern(&self, value: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(value) {
            return Arc::clone(existing.key());
        }
        let interned: Arc<str> = Arc::from(value);
        self.strings.insert(interned.clone());
        interned
    }

    /// Number of distinct interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Returns `true` if nothing has been interned yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

fn intern(value: &str) -> Arc<str> {
    ReferenceFactory::global().intern(value)
}

/// Interned string with pointer-equality fast path.
#[derive(Clone)]
pub struct Name(Arc<str>);

impl Name {
    /// Interns `value`.
    #[must_use]
    pub fn new(value: &str) -> Self {
        Name(intern(value))
    }

    /// The string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::new(value)
    }
}

/// A type reference, stored as its descriptor (`I`, `Lpkg/Cls;`, `[J`, `V`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(Name);

impl TypeRef {
    /// Parses and interns a field or return descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for an invalid descriptor.
    pub fn parse(descriptor: &str) -> Result<Self> {
        validate_return_descriptor(descriptor)?;
        Ok(TypeRef(Name::new(descriptor)))
    }

    /// Creates a class type from an internal name (`java/lang/Object`).
    ///
    /// The name is not validated beyond what the descriptor grammar needs; callers building
    /// references from parsed class files already hold valid names.
    #[must_use]
    pub fn class(internal_name: &str) -> Self {
        TypeRef(Name::new(&format!("L{internal_name};")))
    }

    /// Creates a class type from a Java source name (`java.lang.Object`).
    #[must_use]
    pub fn from_java_name(name: &str) -> Self {
        Self::class(&name.replace('.', "/"))
    }

    /// `java/lang/Object`
    #[must_use]
    pub fn object() -> Self {
        Self::class("java/lang/Object")
    }

    /// `java/lang/Throwable`
    #[must_use]
    pub fn throwable() -> Self {
        Self::class("java/lang/Throwable")
    }

    /// `java/lang/String`
    #[must_use]
    pub fn string() -> Self {
        Self::class("java/lang/String")
    }

    /// `int`
    #[must_use]
    pub fn int() -> Self {
        TypeRef(Name::new("I"))
    }

    /// `long`
    #[must_use]
    pub fn long() -> Self {
        TypeRef(Name::new("J"))
    }

    /// `float`
    #[must_use]
    pub fn float() -> Self {
        TypeRef(Name::new("F"))
    }

    /// `double`
    #[must_use]
    pub fn double() -> Self {
        TypeRef(Name::new("D"))
    }

    /// `boolean`
    #[must_use]
    pub fn boolean() -> Self {
        TypeRef(Name::new("Z"))
    }

    /// `byte`
    #[must_use]
    pub fn byte() -> Self {
        TypeRef(Name::new("B"))
    }

    /// `char`
    #[must_use]
    pub fn char() -> Self {
        TypeRef(Name::new("C"))
    }

    /// `short`
    #[must_use]
    pub fn short() -> Self {
        TypeRef(Name::new("S"))
    }

    /// `void`
    #[must_use]
    pub fn void() -> Self {
        TypeRef(Name::new("V"))
    }

    /// The descriptor text.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        self.0.as_str()
    }

    /// Stack kind of values of this type.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        ValueKind::of_descriptor(self.descriptor())
    }

    /// Returns `true` for the eight primitive types.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        self.descriptor().len() == 1 && !self.is_void()
    }

    /// Returns `true` for `V`.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.descriptor() == "V"
    }

    /// Returns `true` for array types.
    #[must_use]
    pub fn is_array(&self) -> bool {
        self.descriptor().starts_with('[')
    }

    /// Returns `true` for class (non-array reference) types.
    #[must_use]
    pub fn is_class(&self) -> bool {
        self.descriptor().starts_with('L')
    }

    /// Returns `true` for reference (class or array) types.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.is_class() || self.is_array()
    }

    /// Number of array dimensions.
    #[must_use]
    pub fn array_dimensions(&self) -> usize {
        self.descriptor().bytes().take_while(|b| *b == b'[').count()
    }

    /// The element type of an array type.
    #[must_use]
    pub fn element_type(&self) -> Option<TypeRef> {
        self.descriptor()
            .strip_prefix('[')
            .map(|rest| TypeRef(Name::new(rest)))
    }

    /// The innermost element type of an array type, or `self` for non-arrays.
    #[must_use]
    pub fn base_type(&self) -> TypeRef {
        let dims = self.array_dimensions();
        if dims == 0 {
            return self.clone();
        }
        TypeRef(Name::new(&self.descriptor()[dims..]))
    }

    /// An array type with `self` as element type.
    #[must_use]
    pub fn array_of(&self) -> TypeRef {
        TypeRef(Name::new(&format!("[{}", self.descriptor())))
    }

    /// The internal name of a class type (`java/lang/Object`), or the descriptor otherwise.
    #[must_use]
    pub fn internal_name(&self) -> &str {
        self.descriptor()
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .unwrap_or(self.descriptor())
    }

    /// The Java source name (`java.lang.Object`, `int[]`).
    #[must_use]
    pub fn java_name(&self) -> String {
        descriptor_to_java_name(self.descriptor())
    }

    /// The package in internal form (`java/lang`), empty for the default package and for
    /// non-class types.
    #[must_use]
    pub fn package_name(&self) -> &str {
        if !self.is_class() {
            return "";
        }
        let name = self.internal_name();
        name.rfind('/').map_or("", |idx| &name[..idx])
    }

    /// The simple name (`Object` for `java/lang/Object`, `Outer$Inner` stays as is).
    #[must_use]
    pub fn simple_name(&self) -> &str {
        let name = self.internal_name();
        name.rfind('/').map_or(name, |idx| &name[idx + 1..])
    }

    /// Returns `true` if both class types live in the same package.
    #[must_use]
    pub fn is_same_package(&self, other: &TypeRef) -> bool {
        self.package_name() == other.package_name()
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor())
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.java_name())
    }
}

/// A method prototype: parameter types and return type.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProtoRef {
    descriptor: Name,
    parameters: Arc<[TypeRef]>,
    return_type: TypeRef,
}

impl ProtoRef {
    /// Parses a method descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the descriptor is not well formed.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let (params, ret) = split_method_descriptor(descriptor)?;
        Ok(Self {
            descriptor: Name::new(descriptor),
            parameters: params.iter().map(|p| TypeRef(Name::new(p))).collect(),
            return_type: TypeRef(Name::new(ret)),
        })
    }

    /// Builds a prototype from its parts.
    #[must_use]
    pub fn new(return_type: TypeRef, parameters: Vec<TypeRef>) -> Self {
        let mut descriptor = String::from("(");
        for param in &parameters {
            descriptor.push_str(param.descriptor());
        }
        descriptor.push(')');
        descriptor.push_str(return_type.descriptor());
        Self {
            descriptor: Name::new(&descriptor),
            parameters: parameters.into(),
            return_type,
        }
    }

    /// The method descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &str {
        self.descriptor.as_str()
    }

    /// Declared parameter types (without receiver).
    #[must_use]
    pub fn parameters(&self) -> &[TypeRef] {
        &self.parameters
    }

    /// The return type.
    #[must_use]
    pub fn return_type(&self) -> &TypeRef {
        &self.return_type
    }

    /// Number of declared parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    /// Number of local slots the declared parameters occupy.
    #[must_use]
    pub fn parameter_slots(&self) -> usize {
        self.parameters.iter().map(|p| p.kind().slots()).sum()
    }

    /// A copy of this prototype with `extra` parameters appended.
    #[must_use]
    pub fn append_parameters(&self, extra: &[TypeRef]) -> Self {
        let mut params = self.parameters.to_vec();
        params.extend_from_slice(extra);
        Self::new(self.return_type.clone(), params)
    }
}

impl fmt::Debug for ProtoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor())
    }
}

/// Name and prototype of a method, without holder.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct MethodSignature {
    /// Method name
    pub name: Name,
    /// Method prototype
    pub proto: ProtoRef,
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.proto.descriptor())
    }
}

/// A symbolic method reference.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    /// The class named in the reference (not necessarily the declaring class)
    pub holder: TypeRef,
    /// Method name
    pub name: Name,
    /// Method prototype
    pub proto: ProtoRef,
}

impl MethodRef {
    /// Creates a reference from parsed parts.
    #[must_use]
    pub fn new(holder: TypeRef, name: &str, proto: ProtoRef) -> Self {
        Self {
            holder,
            name: Name::new(name),
            proto,
        }
    }

    /// Creates a reference from an internal holder name, a method name and a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `descriptor` is invalid.
    pub fn parse(holder: &str, name: &str, descriptor: &str) -> Result<Self> {
        Ok(Self::new(
            TypeRef::class(holder),
            name,
            ProtoRef::parse(descriptor)?,
        ))
    }

    /// Name and prototype.
    #[must_use]
    pub fn signature(&self) -> MethodSignature {
        MethodSignature {
            name: self.name.clone(),
            proto: self.proto.clone(),
        }
    }

    /// Returns `true` if name and prototype match `other` (holders may differ).
    #[must_use]
    pub fn matches(&self, other: &MethodRef) -> bool {
        self.name == other.name && self.proto == other.proto
    }

    /// Same name and prototype on a different holder.
    #[must_use]
    pub fn with_holder(&self, holder: TypeRef) -> Self {
        Self {
            holder,
            name: self.name.clone(),
            proto: self.proto.clone(),
        }
    }

    /// Same holder and prototype with a different name.
    #[must_use]
    pub fn with_name(&self, name: &str) -> Self {
        Self {
            holder: self.holder.clone(),
            name: Name::new(name),
            proto: self.proto.clone(),
        }
    }

    /// Returns `true` for `<init>`.
    #[must_use]
    pub fn is_instance_initializer(&self) -> bool {
        self.name.as_str() == "<init>"
    }

    /// Returns `true` for `<clinit>`.
    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        self.name.as_str() == "<clinit>"
    }

    /// Declared parameter count.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.proto.arity()
    }
}

impl fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}{}",
            self.holder.descriptor(),
            self.name,
            self.proto.descriptor()
        )
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.holder, self.name, self.proto.descriptor())
    }
}

/// A symbolic field reference.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    /// The class named in the reference
    pub holder: TypeRef,
    /// Field name
    pub name: Name,
    /// Field type
    pub ty: TypeRef,
}

impl FieldRef {
    /// Creates a reference from parsed parts.
    #[must_use]
    pub fn new(holder: TypeRef, name: &str, ty: TypeRef) -> Self {
        Self {
            holder,
            name: Name::new(name),
            ty,
        }
    }

    /// Creates a reference from an internal holder name, a field name and a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if `descriptor` is not a field descriptor.
    pub fn parse(holder: &str, name: &str, descriptor: &str) -> Result<Self> {
        validate_field_descriptor(descriptor)?;
        Ok(Self::new(
            TypeRef::class(holder),
            name,
            TypeRef::parse(descriptor)?,
        ))
    }

    /// Returns `true` if name and type match `other`.
    #[must_use]
    pub fn matches(&self, other: &FieldRef) -> bool {
        self.name == other.name && self.ty == other.ty
    }

    /// Same name and type on a different holder.
    #[must_use]
    pub fn with_holder(&self, holder: TypeRef) -> Self {
        Self {
            holder,
            name: self.name.clone(),
            ty: self.ty.clone(),
        }
    }
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}->{}:{}",
            self.holder.descriptor(),
            self.name,
            self.ty.descriptor()
        )
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.holder, self.name, self.ty)
    }
}

/// A reference to any definition kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    /// A class
    Type(TypeRef),
    /// A field
    Field(FieldRef),
    /// A method
    Method(MethodRef),
}

impl Reference {
    /// The class the reference belongs to.
    #[must_use]
    pub fn context_type(&self) -> &TypeRef {
        match self {
            Reference::Type(ty) => ty,
            Reference::Field(field) => &field.holder,
            Reference::Method(method) => &method.holder,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Type(ty) => write!(f, "{ty}"),
            Reference::Field(field) => write!(f, "{field}"),
            Reference::Method(method) => write!(f, "{method}"),
        }
    }
}

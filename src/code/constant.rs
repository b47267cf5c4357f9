//! Loadable constants, method handles and call sites.

use std::fmt;

use crate::program::references::{FieldRef, MethodRef, Name, ProtoRef, TypeRef};

/// Kind of a `CONSTANT_MethodHandle` (JVMS §4.4.8 reference kinds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum MethodHandleKind {
    /// `REF_getField`
    GetField = 1,
    /// `REF_getStatic`
    GetStatic = 2,
    /// `REF_putField`
    PutField = 3,
    /// `REF_putStatic`
    PutStatic = 4,
    /// `REF_invokeVirtual`
    InvokeVirtual = 5,
    /// `REF_invokeStatic`
    InvokeStatic = 6,
    /// `REF_invokeSpecial`
    InvokeSpecial = 7,
    /// `REF_newInvokeSpecial`
    NewInvokeSpecial = 8,
    /// `REF_invokeInterface`
    InvokeInterface = 9,
}

/// Member referenced by a method handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandleMember {
    /// Field accessor handles
    Field(FieldRef),
    /// Method invoking handles
    Method(MethodRef),
}

/// A `CONSTANT_MethodHandle`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodHandleRef {
    /// Reference kind
    pub kind: MethodHandleKind,
    /// Referenced member
    pub member: HandleMember,
    /// The member is declared on an interface
    pub interface: bool,
}

impl fmt::Display for MethodHandleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member {
            HandleMember::Field(field) => write!(f, "{}:{:?}", self.kind, field),
            HandleMember::Method(method) => write!(f, "{}:{:?}", self.kind, method),
        }
    }
}

/// A loadable constant.
///
/// Floating point values are stored as raw bits so constants compare and hash exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstValue {
    /// `aconst_null`
    Null,
    /// `int` (and narrower integral types)
    Int(i32),
    /// `long`
    Long(i64),
    /// `float` bits
    Float(u32),
    /// `double` bits
    Double(u64),
    /// `String`
    String(Name),
    /// `Class` literal
    Class(TypeRef),
    /// `MethodType`
    MethodType(ProtoRef),
    /// `MethodHandle`
    MethodHandle(MethodHandleRef),
}

impl ConstValue {
    /// A `float` constant.
    #[must_use]
    pub fn float(value: f32) -> Self {
        ConstValue::Float(value.to_bits())
    }

    /// A `double` constant.
    #[must_use]
    pub fn double(value: f64) -> Self {
        ConstValue::Double(value.to_bits())
    }

    /// A `String` constant.
    #[must_use]
    pub fn string(value: &str) -> Self {
        ConstValue::String(Name::new(value))
    }

    /// Static type of the constant.
    #[must_use]
    pub fn ty(&self) -> TypeRef {
        match self {
            ConstValue::Null => TypeRef::object(),
            ConstValue::Int(_) => TypeRef::int(),
            ConstValue::Long(_) => TypeRef::long(),
            ConstValue::Float(_) => TypeRef::float(),
            ConstValue::Double(_) => TypeRef::double(),
            ConstValue::String(_) => TypeRef::string(),
            ConstValue::Class(_) => TypeRef::class("java/lang/Class"),
            ConstValue::MethodType(_) => TypeRef::class("java/lang/invoke/MethodType"),
            ConstValue::MethodHandle(_) => TypeRef::class("java/lang/invoke/MethodHandle"),
        }
    }

    /// Returns `true` for `long` and `double` constants.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, ConstValue::Long(_) | ConstValue::Double(_))
    }

    /// The integral value of `int` and `long` constants.
    #[must_use]
    pub fn as_integral(&self) -> Option<i64> {
        match self {
            ConstValue::Int(v) => Some(i64::from(*v)),
            ConstValue::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Null => f.write_str("null"),
            ConstValue::Int(v) => write!(f, "{v}"),
            ConstValue::Long(v) => write!(f, "{v}L"),
            ConstValue::Float(bits) => write!(f, "{}F", f32::from_bits(*bits)),
            ConstValue::Double(bits) => write!(f, "{}D", f64::from_bits(*bits)),
            ConstValue::String(s) => write!(f, "{:?}", s.as_str()),
            ConstValue::Class(ty) => write!(f, "{ty}.class"),
            ConstValue::MethodType(proto) => write!(f, "{proto:?}"),
            ConstValue::MethodHandle(handle) => write!(f, "{handle}"),
        }
    }
}

/// A dynamically-computed call site (`invokedynamic`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    /// Method name
    pub name: Name,
    /// Call site type
    pub proto: ProtoRef,
    /// Bootstrap method
    pub bootstrap: MethodHandleRef,
    /// Static bootstrap arguments
    pub arguments: Vec<ConstValue>,
}

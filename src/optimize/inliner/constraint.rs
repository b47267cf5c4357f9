//! Inlining legality.
//!
//! Moving code from its declaring class into a caller changes the class that performs every
//! access in it. [`InliningConstraint`] records where the inlined code may still execute:
//! anywhere, in one package, in subclasses of a type, in one class, or nowhere. The
//! constraint of a body is the meet of the constraints of its instructions, see
//! [`crate::code::CfCode::compute_inlining_constraint`].

use std::fmt;

use crate::{
    code::instruction::InvokeKind,
    lens::GraphLens,
    program::{
        flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags},
        references::{FieldRef, MethodRef, TypeRef},
        FieldResolution, MethodResolution, ProgramGraph,
    },
};

/// Where inlined code may execute.
///
/// Ordered from most to least restrictive: `Never < SameClass < Package < Subclass < Always`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InliningConstraint {
    /// Must not be inlined
    Never,
    /// Only into methods of this class
    SameClass(TypeRef),
    /// Only into classes of this package (internal form, `a/b`)
    Package(String),
    /// Only into subclasses of this type or classes of its package
    Subclass(TypeRef),
    /// Anywhere
    Always,
}

impl InliningConstraint {
    /// Returns `true` for [`InliningConstraint::Never`].
    #[must_use]
    pub fn is_never(&self) -> bool {
        matches!(self, InliningConstraint::Never)
    }

    /// Returns `true` for [`InliningConstraint::Always`].
    #[must_use]
    pub fn is_always(&self) -> bool {
        matches!(self, InliningConstraint::Always)
    }

    fn rank(&self) -> u8 {
        match self {
            InliningConstraint::Never => 0,
            InliningConstraint::SameClass(_) => 1,
            InliningConstraint::Package(_) => 2,
            InliningConstraint::Subclass(_) => 3,
            InliningConstraint::Always => 4,
        }
    }
}

impl fmt::Display for InliningConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InliningConstraint::Never => f.write_str("never"),
            InliningConstraint::SameClass(ty) => write!(f, "same class {ty}"),
            InliningConstraint::Package(package) => write!(f, "package {package}"),
            InliningConstraint::Subclass(ty) => write!(f, "subclass of {ty}"),
            InliningConstraint::Always => f.write_str("always"),
        }
    }
}

/// Per-instruction constraints and their hierarchy-aware meet.
///
/// References are mapped through the lens (when one is given) before they are resolved, so
/// the constraints describe the program as it looks after earlier passes.
pub struct InliningConstraints<'a> {
    program: &'a ProgramGraph,
    lens: Option<&'a GraphLens>,
}

impl<'a> InliningConstraints<'a> {
    /// Constraints over `program` without renaming.
    #[must_use]
    pub fn new(program: &'a ProgramGraph) -> Self {
        InliningConstraints {
            program,
            lens: None,
        }
    }

    /// Constraints that look references up in `lens` first.
    #[must_use]
    pub fn with_lens(mut self, lens: &'a GraphLens) -> Self {
        self.lens = Some(lens);
        self
    }

    fn map_type(&self, ty: &TypeRef) -> TypeRef {
        match self.lens {
            Some(lens) => lens.lookup_type(ty),
            None => ty.clone(),
        }
    }

    /// Greatest lower bound of two constraints.
    ///
    /// Two targeted constraints that cannot both hold for any class meet to `Never`.
    #[must_use]
    pub fn meet(&self, a: &InliningConstraint, b: &InliningConstraint) -> InliningConstraint {
        use InliningConstraint::{Always, Never, Package, SameClass, Subclass};

        let (low, high) = if a.rank() <= b.rank() { (a, b) } else { (b, a) };
        match (low, high) {
            (Never, _) => Never,
            (other, Always) => other.clone(),
            (SameClass(x), SameClass(y)) => {
                if x == y {
                    SameClass(x.clone())
                } else {
                    Never
                }
            }
            (SameClass(x), Package(p)) => {
                if x.package_name() == p {
                    SameClass(x.clone())
                } else {
                    Never
                }
            }
            (SameClass(x), Subclass(s)) => {
                if self.program.is_subtype(x, s) || x.is_same_package(s) {
                    SameClass(x.clone())
                } else {
                    Never
                }
            }
            (Package(p), Package(q)) => {
                if p == q {
                    Package(p.clone())
                } else {
                    Never
                }
            }
            (Package(p), Subclass(s)) => {
                if s.package_name() == p {
                    Package(p.clone())
                } else {
                    Never
                }
            }
            (Subclass(x), Subclass(y)) => {
                if self.program.is_subtype(x, y) {
                    Subclass(x.clone())
                } else if self.program.is_subtype(y, x) {
                    Subclass(y.clone())
                } else {
                    Never
                }
            }
            _ => Never,
        }
    }

    /// Returns `true` if code with `constraint` may be inlined into a method of `caller`.
    #[must_use]
    pub fn allows_inlining_into(&self, constraint: &InliningConstraint, caller: &TypeRef) -> bool {
        match constraint {
            InliningConstraint::Never => false,
            InliningConstraint::SameClass(ty) => ty == caller,
            InliningConstraint::Package(package) => caller.package_name() == package,
            InliningConstraint::Subclass(ty) => {
                self.program.is_subtype(caller, ty) || caller.is_same_package(ty)
            }
            InliningConstraint::Always => true,
        }
    }

    /// Constraint of naming `ty`: non-public program classes pin code to their package.
    #[must_use]
    pub fn for_type(&self, ty: &TypeRef) -> InliningConstraint {
        let base = self.map_type(ty).base_type();
        if !base.is_class() {
            return InliningConstraint::Always;
        }
        match self.program.definition_for(&base) {
            None => InliningConstraint::Never,
            Some(class) if !class.is_program() => InliningConstraint::Always,
            Some(class) => {
                if class.access.contains(ClassAccessFlags::PUBLIC) {
                    InliningConstraint::Always
                } else {
                    InliningConstraint::Package(base.package_name().to_string())
                }
            }
        }
    }

    fn for_member(
        &self,
        holder: &TypeRef,
        is_public: bool,
        is_private: bool,
        is_protected: bool,
    ) -> InliningConstraint {
        let member = if is_public {
            InliningConstraint::Always
        } else if is_private {
            InliningConstraint::SameClass(holder.clone())
        } else if is_protected {
            InliningConstraint::Subclass(holder.clone())
        } else {
            InliningConstraint::Package(holder.package_name().to_string())
        };
        self.meet(&member, &self.for_type(holder))
    }

    /// Constraint of accessing `field`.
    #[must_use]
    pub fn for_field(&self, field: &FieldRef) -> InliningConstraint {
        let field = match self.lens {
            Some(lens) => lens.lookup_field(field),
            None => field.clone(),
        };
        match self.program.resolve_field(&field) {
            FieldResolution::Single(resolved) => {
                if !resolved.class.is_program() {
                    return InliningConstraint::Always;
                }
                let access = resolved.field.access;
                self.for_member(
                    &resolved.field.reference.holder,
                    access.contains(FieldAccessFlags::PUBLIC),
                    access.contains(FieldAccessFlags::PRIVATE),
                    access.contains(FieldAccessFlags::PROTECTED),
                )
            }
            FieldResolution::ClassNotFound(_) | FieldResolution::NoSuchField => {
                InliningConstraint::Never
            }
        }
    }

    /// Constraint of a non-super invoke of `method`.
    #[must_use]
    pub fn for_invoke(&self, method: &MethodRef) -> InliningConstraint {
        let method = match self.lens {
            Some(lens) => lens.lookup_method(method, None, InvokeKind::Virtual).reference,
            None => method.clone(),
        };
        match self.program.resolve_method(&method) {
            MethodResolution::Single(resolved) => {
                if !resolved.class.is_program() {
                    return InliningConstraint::Always;
                }
                let access = resolved.method.access;
                self.for_member(
                    &resolved.method.reference.holder,
                    access.contains(MethodAccessFlags::PUBLIC),
                    access.contains(MethodAccessFlags::PRIVATE),
                    access.contains(MethodAccessFlags::PROTECTED),
                )
            }
            _ => InliningConstraint::Never,
        }
    }

    /// `invokespecial` of a super method only works from a direct subclass.
    #[must_use]
    pub fn for_invoke_super(&self) -> InliningConstraint {
        InliningConstraint::Never
    }

    /// `invokedynamic` call sites are bound to their declaring class.
    #[must_use]
    pub fn for_invoke_custom(&self) -> InliningConstraint {
        InliningConstraint::Never
    }

    /// Method handle and method type constants are resolved against the declaring class.
    #[must_use]
    pub fn for_method_handle(&self) -> InliningConstraint {
        InliningConstraint::Never
    }

    /// Monitor instructions and synchronized bodies.
    #[must_use]
    pub fn for_monitor(&self) -> InliningConstraint {
        InliningConstraint::Never
    }

    /// The exception value at a handler entry.
    #[must_use]
    pub fn for_move_exception(&self) -> InliningConstraint {
        InliningConstraint::Always
    }
}

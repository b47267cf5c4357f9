//! Type lattice of IR values.
//!
//! Every IR value carries a [`TypeElement`]. Primitive elements only distinguish the stack
//! kinds (`boolean`, `byte`, `char` and `short` are all [`TypeElement::Int`]); reference
//! elements carry an upper bound and a nullability bit that analyses may narrow.
//!
//! ```text
//!                 Top
//!    /     |      |      \        \
//!  Int   Long   Float   Double   Reference(Object, nullable)
//!                                    |
//!                        Reference(T, nullable) ...
//!                                    |
//!                                  Null
//! ```

use std::fmt;

use crate::program::{descriptor::ValueKind, references::TypeRef, ProgramGraph};

/// A lattice element describing the values an IR value may hold.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeElement {
    /// `int` and narrower
    Int,
    /// `long`
    Long,
    /// `float`
    Float,
    /// `double`
    Double,
    /// Only the `null` reference
    Null,
    /// References whose runtime class is a subtype of `upper`
    Reference {
        /// Upper bound
        upper: TypeRef,
        /// `null` is possible
        nullable: bool,
    },
    /// Conflicting kinds; no instruction may consume such a value
    Top,
}

impl TypeElement {
    /// The element of values of static type `ty`.
    #[must_use]
    pub fn of_type(ty: &TypeRef) -> Self {
        match ty.kind() {
            ValueKind::Int => TypeElement::Int,
            ValueKind::Long => TypeElement::Long,
            ValueKind::Float => TypeElement::Float,
            ValueKind::Double => TypeElement::Double,
            ValueKind::Reference => TypeElement::Reference {
                upper: ty.clone(),
                nullable: true,
            },
            ValueKind::Void => TypeElement::Top,
        }
    }

    /// A non-null reference of type `ty`.
    #[must_use]
    pub fn non_null(ty: &TypeRef) -> Self {
        TypeElement::Reference {
            upper: ty.clone(),
            nullable: false,
        }
    }

    /// The element of the primitive stack kind, `None` for references and `void`.
    #[must_use]
    pub fn of_kind(kind: ValueKind) -> Option<Self> {
        match kind {
            ValueKind::Int => Some(TypeElement::Int),
            ValueKind::Long => Some(TypeElement::Long),
            ValueKind::Float => Some(TypeElement::Float),
            ValueKind::Double => Some(TypeElement::Double),
            ValueKind::Reference | ValueKind::Void => None,
        }
    }

    /// Stack kind of values of this element.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            TypeElement::Int => ValueKind::Int,
            TypeElement::Long => ValueKind::Long,
            TypeElement::Float => ValueKind::Float,
            TypeElement::Double => ValueKind::Double,
            TypeElement::Null | TypeElement::Reference { .. } => ValueKind::Reference,
            TypeElement::Top => ValueKind::Void,
        }
    }

    /// Returns `true` for `long` and `double`.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        self.kind().is_wide()
    }

    /// Returns `true` for `null` and reference elements.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, TypeElement::Null | TypeElement::Reference { .. })
    }

    /// Returns `true` if the value may be `null`.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        match self {
            TypeElement::Null => true,
            TypeElement::Reference { nullable, .. } => *nullable,
            _ => false,
        }
    }

    /// The upper bound of a reference element.
    #[must_use]
    pub fn upper_bound(&self) -> Option<&TypeRef> {
        match self {
            TypeElement::Reference { upper, .. } => Some(upper),
            _ => None,
        }
    }

    /// Least upper bound.
    ///
    /// Two reference bounds join to the nearer of the two if one is a subtype of the other
    /// in `program`, and to `java/lang/Object` otherwise. Without a program only equal bounds
    /// are recognised.
    #[must_use]
    pub fn join(&self, other: &TypeElement, program: Option<&ProgramGraph>) -> TypeElement {
        match (self, other) {
            (a, b) if a == b => a.clone(),
            (TypeElement::Null, TypeElement::Reference { upper, .. })
            | (TypeElement::Reference { upper, .. }, TypeElement::Null) => TypeElement::Reference {
                upper: upper.clone(),
                nullable: true,
            },
            (
                TypeElement::Reference {
                    upper: a,
                    nullable: na,
                },
                TypeElement::Reference {
                    upper: b,
                    nullable: nb,
                },
            ) => {
                let upper = if a == b {
                    a.clone()
                } else {
                    match program {
                        Some(program) if program.is_subtype(a, b) => b.clone(),
                        Some(program) if program.is_subtype(b, a) => a.clone(),
                        _ => TypeRef::object(),
                    }
                };
                TypeElement::Reference {
                    upper,
                    nullable: *na || *nb,
                }
            }
            _ => TypeElement::Top,
        }
    }

    /// Returns `true` if `self` describes no more values than `other`.
    #[must_use]
    pub fn is_narrower_or_equal(&self, other: &TypeElement, program: &ProgramGraph) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (_, TypeElement::Top) => true,
            (TypeElement::Null, b) => b.is_nullable(),
            (
                TypeElement::Reference {
                    upper: a,
                    nullable: na,
                },
                TypeElement::Reference {
                    upper: b,
                    nullable: nb,
                },
            ) => (!na || *nb) && (a == b || program.is_subtype(a, b)),
            _ => false,
        }
    }

    /// Applies `map` to the bound of a reference element.
    #[must_use]
    pub fn map_reference(&self, map: impl FnOnce(&TypeRef) -> TypeRef) -> TypeElement {
        match self {
            TypeElement::Reference { upper, nullable } => TypeElement::Reference {
                upper: map(upper),
                nullable: *nullable,
            },
            other => other.clone(),
        }
    }
}

impl fmt::Display for TypeElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeElement::Int => f.write_str("int"),
            TypeElement::Long => f.write_str("long"),
            TypeElement::Float => f.write_str("float"),
            TypeElement::Double => f.write_str("double"),
            TypeElement::Null => f.write_str("null"),
            TypeElement::Reference { upper, nullable } => {
                write!(f, "{upper}{}", if *nullable { "?" } else { "" })
            }
            TypeElement::Top => f.write_str("top"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::fixtures::{class, program_of};

    #[test]
    fn test_join_primitives() {
        assert_eq!(TypeElement::Int.join(&TypeElement::Int, None), TypeElement::Int);
        assert_eq!(TypeElement::Int.join(&TypeElement::Long, None), TypeElement::Top);
    }

    #[test]
    fn test_join_references_with_hierarchy() {
        let program = program_of(vec![
            class("a/A"),
            class("a/B").with_super(TypeRef::class("a/A")),
            class("a/C"),
        ]);
        let a = TypeElement::non_null(&TypeRef::class("a/A"));
        let b = TypeElement::non_null(&TypeRef::class("a/B"));
        let c = TypeElement::non_null(&TypeRef::class("a/C"));
        assert_eq!(a.join(&b, Some(&program)), a);
        assert_eq!(
            b.join(&c, Some(&program)),
            TypeElement::non_null(&TypeRef::object())
        );
        let joined = TypeElement::Null.join(&b, Some(&program));
        assert!(joined.is_nullable());
        assert!(b.is_narrower_or_equal(&joined, &program));
        assert!(!joined.is_narrower_or_equal(&b, &program));
    }

    #[test]
    fn test_of_type_kinds() {
        assert_eq!(TypeElement::of_type(&TypeRef::boolean()), TypeElement::Int);
        assert!(TypeElement::of_type(&TypeRef::long()).is_wide());
        assert!(TypeElement::of_type(&TypeRef::string()).is_nullable());
    }
}

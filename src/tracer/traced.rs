//! Traced references.

use std::{
    fmt,
    hash::{Hash, Hasher},
};

use crate::program::{
    flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags},
    references::{FieldRef, MethodRef, TypeRef},
};

/// A reference seen while tracing, with the access flags of its definition.
///
/// Equality and hashing only look at the reference: the same reference traced once as found
/// and once as missing is one entry in a set.
#[derive(Debug, Clone)]
pub struct TracedReference<R, F> {
    reference: R,
    access: Option<F>,
}

impl<R, F: Copy> TracedReference<R, F> {
    /// A reference that resolved to a definition with `access`.
    pub fn found(reference: R, access: F) -> Self {
        TracedReference {
            reference,
            access: Some(access),
        }
    }

    /// A reference without a definition.
    pub fn missing(reference: R) -> Self {
        TracedReference {
            reference,
            access: None,
        }
    }

    /// The traced reference.
    pub fn reference(&self) -> &R {
        &self.reference
    }

    /// Access flags of the definition, `None` if it is missing.
    pub fn access_flags(&self) -> Option<F> {
        self.access
    }

    /// Returns `true` if no definition was found.
    pub fn is_missing_definition(&self) -> bool {
        self.access.is_none()
    }
}

impl<R: PartialEq, F> PartialEq for TracedReference<R, F> {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl<R: Eq, F> Eq for TracedReference<R, F> {}

impl<R: Hash, F> Hash for TracedReference<R, F> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.reference.hash(state);
    }
}

impl<R: fmt::Display, F> fmt::Display for TracedReference<R, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.reference.fmt(f)
    }
}

/// A traced class.
pub type TracedClass = TracedReference<TypeRef, ClassAccessFlags>;

/// A traced field.
pub type TracedField = TracedReference<FieldRef, FieldAccessFlags>;

/// A traced method.
pub type TracedMethod = TracedReference<MethodRef, MethodAccessFlags>;

impl TracedClass {
    /// `"type"`, for reports.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        "type"
    }
}

impl TracedField {
    /// `"field"`, for reports.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        "field"
    }
}

impl TracedMethod {
    /// `"method"`, for reports.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        "method"
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_identity_is_the_reference() {
        let ty = TypeRef::class("lib/Api");
        let found = TracedClass::found(ty.clone(), ClassAccessFlags::PUBLIC);
        let missing = TracedClass::missing(ty);
        assert_eq!(found, missing);
        assert!(missing.is_missing_definition());
        assert!(!found.is_missing_definition());

        let set: HashSet<TracedClass> = [found, missing].into_iter().collect();
        assert_eq!(set.len(), 1);
    }
}

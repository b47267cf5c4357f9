//! Memoized lookups against a fixed lens snapshot.
//!
//! Walking every layer is cheap for a single reference but adds up when a pass rewrites every
//! instruction of every method. A [`FlattenedLens`] caches each answer the first time it is
//! asked. The caches are concurrent maps, so one instance can be shared by all threads of a
//! pass.

use dashmap::DashMap;

use crate::{
    code::instruction::InvokeKind,
    lens::{GraphLens, LensLayer, MethodLookupResult},
    program::{
        references::{FieldRef, MethodRef, TypeRef},
        ProgramGraph,
    },
    Result,
};

/// A caching view of one [`GraphLens`] snapshot.
#[derive(Debug, Default)]
pub struct FlattenedLens {
    lens: GraphLens,
    types: DashMap<TypeRef, TypeRef>,
    fields: DashMap<FieldRef, FieldRef>,
    methods: DashMap<(MethodRef, InvokeKind, Option<TypeRef>), MethodLookupResult>,
}

impl FlattenedLens {
    /// Wraps `lens`; nothing is computed until asked.
    #[must_use]
    pub fn new(lens: GraphLens) -> Self {
        FlattenedLens {
            lens,
            ..FlattenedLens::default()
        }
    }

    /// The snapshot this view caches.
    #[must_use]
    pub fn lens(&self) -> &GraphLens {
        &self.lens
    }

    /// Returns `true` if the underlying lens is the identity.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.lens.is_identity()
    }

    /// Cached [`GraphLens::lookup_type`].
    #[must_use]
    pub fn lookup_type(&self, ty: &TypeRef) -> TypeRef {
        if self.lens.is_identity() {
            return ty.clone();
        }
        if let Some(hit) = self.types.get(ty) {
            return hit.clone();
        }
        let mapped = self.lens.lookup_type(ty);
        self.types.insert(ty.clone(), mapped.clone());
        mapped
    }

    /// Cached [`GraphLens::lookup_field`].
    #[must_use]
    pub fn lookup_field(&self, field: &FieldRef) -> FieldRef {
        if self.lens.is_identity() {
            return field.clone();
        }
        if let Some(hit) = self.fields.get(field) {
            return hit.clone();
        }
        let mapped = self.lens.lookup_field(field);
        self.fields.insert(field.clone(), mapped.clone());
        mapped
    }

    /// Cached [`GraphLens::lookup_method`].
    #[must_use]
    pub fn lookup_method(
        &self,
        method: &MethodRef,
        context: Option<&MethodRef>,
        kind: InvokeKind,
    ) -> MethodLookupResult {
        if self.lens.is_identity() {
            return MethodLookupResult::identity(method, kind);
        }
        // Only the context's class influences a lookup.
        let key = (method.clone(), kind, context.map(|c| c.holder.clone()));
        if let Some(hit) = self.methods.get(&key) {
            return hit.clone();
        }
        let result = self.lens.lookup_method(method, context, kind);
        self.methods.insert(key, result.clone());
        result
    }

    /// Number of cached answers.
    #[must_use]
    pub fn cached(&self) -> usize {
        self.types.len() + self.fields.len() + self.methods.len()
    }

    /// A single layer equivalent to the whole lens on every definition of `program`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LensError`] if two definitions of `program` collapse onto
    /// conflicting targets, which indicates an inconsistent lens.
    pub fn to_layer(&self, program: &ProgramGraph, name: &str) -> Result<LensLayer> {
        let mut builder = LensLayer::builder(name);
        for class in program.program_classes() {
            let ty = self.lookup_type(&class.ty);
            if ty != class.ty {
                builder.map_type(class.ty.clone(), ty);
            }
            for method in &class.methods {
                let mapped = self.lens.lookup_method_reference(&method.reference);
                if mapped != method.reference {
                    builder.map_method(method.reference.clone(), mapped);
                }
            }
            for field in &class.fields {
                let mapped = self.lookup_field(&field.reference);
                if mapped != field.reference {
                    builder.map_field(field.reference.clone(), mapped);
                }
            }
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        program::flags::MethodAccessFlags,
        test::fixtures::{class, empty_virtual, program_of},
    };

    #[test]
    fn test_memoized_lookups_match_lens() {
        let mut builder = LensLayer::builder("rename");
        builder.map_type(TypeRef::class("a/Old"), TypeRef::class("a/New"));
        let lens = GraphLens::identity().extend(builder.build().unwrap());
        let flattened = FlattenedLens::new(lens.clone());

        let method = MethodRef::parse("a/Old", "m", "(La/Old;)V").unwrap();
        let first = flattened.lookup_method(&method, None, InvokeKind::Virtual);
        let second = flattened.lookup_method(&method, None, InvokeKind::Virtual);
        assert_eq!(first, second);
        assert_eq!(first, lens.lookup_method(&method, None, InvokeKind::Virtual));
        assert_eq!(flattened.cached(), 1);
    }

    #[test]
    fn test_identity_caches_nothing() {
        let flattened = FlattenedLens::new(GraphLens::identity());
        let ty = TypeRef::class("a/A");
        assert_eq!(flattened.lookup_type(&ty), ty);
        assert_eq!(flattened.cached(), 0);
    }

    #[test]
    fn test_to_layer_agrees_on_program_definitions() {
        let program = program_of(vec![class("a/Old")
            .with_method(empty_virtual("a/Old", "m"))
            .with_method(crate::program::MethodDef::new(
                MethodRef::parse("a/Old", "make", "()La/Old;").unwrap(),
                MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            ))]);
        let mut builder = LensLayer::builder("rename");
        builder.map_type(TypeRef::class("a/Old"), TypeRef::class("a/New"));
        let lens = GraphLens::identity().extend(builder.build().unwrap());
        let flattened = FlattenedLens::new(lens.clone());
        let layer = flattened.to_layer(&program, "flat").unwrap();

        for method in program.program_methods() {
            assert_eq!(
                layer.lookup_method_reference(&method.reference),
                lens.lookup_method_reference(&method.reference)
            );
        }
    }
}

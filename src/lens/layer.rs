//! One lens mapping layer.
//!
//! A [`LensLayer`] holds the renames and retargets of a single pipeline stage. Explicit
//! entries win; every other reference is rewritten structurally by mapping the types it
//! mentions (holder, field type, parameter and return types). Layers are immutable once
//! built and are shared between lens snapshots through `Arc`.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    code::{instruction::InvokeKind, ConstValue},
    program::references::{FieldRef, MethodRef, ProtoRef, TypeRef},
    Error, Result,
};

/// Result of looking up a method reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodLookupResult {
    /// The rewritten reference
    pub reference: MethodRef,
    /// The invoke kind to use at the call site
    pub kind: InvokeKind,
    /// Constant arguments appended after the original arguments
    pub extra_arguments: Vec<ConstValue>,
}

impl MethodLookupResult {
    /// An unchanged lookup.
    #[must_use]
    pub fn identity(reference: &MethodRef, kind: InvokeKind) -> Self {
        MethodLookupResult {
            reference: reference.clone(),
            kind,
            extra_arguments: Vec::new(),
        }
    }

    /// Returns `true` if the call site must be rewritten.
    #[must_use]
    pub fn is_rewritten(&self, original: &MethodRef, kind: InvokeKind) -> bool {
        self.reference != *original || self.kind != kind || !self.extra_arguments.is_empty()
    }
}

/// Renames and retargets of one stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LensLayer {
    name: String,
    types: BTreeMap<TypeRef, TypeRef>,
    methods: BTreeMap<MethodRef, MethodRef>,
    fields: BTreeMap<FieldRef, FieldRef>,
    invoke_kinds: BTreeMap<MethodRef, InvokeKind>,
    extra_arguments: BTreeMap<MethodRef, Vec<ConstValue>>,
    original_types: BTreeMap<TypeRef, BTreeSet<TypeRef>>,
    original_methods: BTreeMap<MethodRef, BTreeSet<MethodRef>>,
    original_fields: BTreeMap<FieldRef, BTreeSet<FieldRef>>,
}

impl LensLayer {
    /// Starts a layer named after the stage that builds it.
    #[must_use]
    pub fn builder(name: &str) -> LensLayerBuilder {
        LensLayerBuilder {
            layer: LensLayer {
                name: name.to_string(),
                ..LensLayer::default()
            },
            conflicts: Vec::new(),
        }
    }

    /// The stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the layer maps nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
            && self.methods.is_empty()
            && self.fields.is_empty()
            && self.invoke_kinds.is_empty()
            && self.extra_arguments.is_empty()
    }

    /// Explicit type mappings.
    pub fn type_mappings(&self) -> impl Iterator<Item = (&TypeRef, &TypeRef)> + '_ {
        self.types.iter()
    }

    /// Explicit method mappings.
    pub fn method_mappings(&self) -> impl Iterator<Item = (&MethodRef, &MethodRef)> + '_ {
        self.methods.iter()
    }

    /// Explicit field mappings.
    pub fn field_mappings(&self) -> impl Iterator<Item = (&FieldRef, &FieldRef)> + '_ {
        self.fields.iter()
    }

    /// Maps a type; arrays map their base type.
    #[must_use]
    pub fn lookup_type(&self, ty: &TypeRef) -> TypeRef {
        map_type_with(ty, |base| self.types.get(base).cloned())
    }

    /// Maps the types of a prototype.
    #[must_use]
    pub fn lookup_proto(&self, proto: &ProtoRef) -> ProtoRef {
        if self.types.is_empty() {
            return proto.clone();
        }
        ProtoRef::new(
            self.lookup_type(proto.return_type()),
            proto
                .parameters()
                .iter()
                .map(|p| self.lookup_type(p))
                .collect(),
        )
    }

    /// Maps a field reference.
    #[must_use]
    pub fn lookup_field(&self, field: &FieldRef) -> FieldRef {
        if let Some(mapped) = self.fields.get(field) {
            return mapped.clone();
        }
        FieldRef::new(
            self.lookup_type(&field.holder),
            field.name.as_str(),
            self.lookup_type(&field.ty),
        )
    }

    /// Maps a method reference without invoke information.
    #[must_use]
    pub fn lookup_method_reference(&self, method: &MethodRef) -> MethodRef {
        if let Some(mapped) = self.methods.get(method) {
            return mapped.clone();
        }
        MethodRef::new(
            self.lookup_type(&method.holder),
            method.name.as_str(),
            self.lookup_proto(&method.proto),
        )
    }

    /// Maps a method reference used by an invoke of `kind` in `context` (both already
    /// mapped by earlier layers).
    ///
    /// A call that targets a method of the context's own class through `invokespecial`
    /// stays `invokespecial` regardless of the layer's invoke rewrites.
    #[must_use]
    pub fn lookup_method(
        &self,
        previous: &MethodLookupResult,
        context: Option<&MethodRef>,
    ) -> MethodLookupResult {
        let reference = self.lookup_method_reference(&previous.reference);
        let mut kind = self
            .invoke_kinds
            .get(&reference)
            .copied()
            .unwrap_or(previous.kind);
        if previous.kind == InvokeKind::Special {
            if let Some(context) = context {
                if self.lookup_type(&context.holder) == reference.holder {
                    kind = InvokeKind::Special;
                }
            }
        }
        let mut extra_arguments = previous.extra_arguments.clone();
        if let Some(extra) = self
            .extra_arguments
            .get(&previous.reference)
            .or_else(|| self.extra_arguments.get(&reference))
        {
            extra_arguments.extend(extra.iter().cloned());
        }
        MethodLookupResult {
            reference,
            kind,
            extra_arguments,
        }
    }

    /// Every type this layer maps to `ty`. `ty` itself is included when the layer does not
    /// map it away.
    #[must_use]
    pub fn original_types(&self, ty: &TypeRef) -> Vec<TypeRef> {
        let base = ty.base_type();
        let dims = ty.array_dimensions();
        let mut originals: BTreeSet<TypeRef> = self
            .original_types
            .get(&base)
            .into_iter()
            .flatten()
            .map(|original| with_dimensions(original, dims))
            .collect();
        if !self.types.contains_key(&base) {
            originals.insert(ty.clone());
        }
        originals.into_iter().collect()
    }

    /// The representative original of `ty`: the smallest explicit preimage, or `ty` itself
    /// when it maps to itself or nothing maps to it.
    #[must_use]
    pub fn original_type(&self, ty: &TypeRef) -> TypeRef {
        let base = ty.base_type();
        match self.original_types.get(&base) {
            Some(originals) if !originals.contains(&base) => originals
                .iter()
                .next()
                .map_or_else(|| ty.clone(), |o| with_dimensions(o, ty.array_dimensions())),
            _ => ty.clone(),
        }
    }

    /// Every method reference this layer maps to `method`.
    ///
    /// Without an explicit entry every combination of original holder, parameter and return
    /// types is a candidate.
    #[must_use]
    pub fn original_methods(&self, method: &MethodRef) -> Vec<MethodRef> {
        if let Some(originals) = self.original_methods.get(method) {
            return originals.iter().cloned().collect();
        }
        let mut candidates: Vec<(TypeRef, Vec<TypeRef>)> = self
            .original_types(&method.holder)
            .into_iter()
            .map(|holder| (holder, Vec::new()))
            .collect();
        for parameter in method.proto.parameters() {
            let options = self.original_types(parameter);
            candidates = candidates
                .into_iter()
                .flat_map(|(holder, params)| {
                    options.iter().map(move |option| {
                        let mut params = params.clone();
                        params.push(option.clone());
                        (holder.clone(), params)
                    })
                })
                .collect();
        }
        let returns = self.original_types(method.proto.return_type());
        let mut result: Vec<MethodRef> = candidates
            .into_iter()
            .flat_map(|(holder, params)| {
                returns.iter().map(move |ret| {
                    MethodRef::new(
                        holder.clone(),
                        method.name.as_str(),
                        ProtoRef::new(ret.clone(), params.clone()),
                    )
                })
            })
            .collect();
        result.sort();
        result.dedup();
        result
    }

    /// The representative original of `method`.
    #[must_use]
    pub fn original_method(&self, method: &MethodRef) -> MethodRef {
        match self.original_methods.get(method).and_then(|o| o.iter().next()) {
            Some(original) => original.clone(),
            None => self.structural_original_method(method),
        }
    }

    fn structural_original_method(&self, method: &MethodRef) -> MethodRef {
        MethodRef::new(
            self.original_type(&method.holder),
            method.name.as_str(),
            ProtoRef::new(
                self.original_type(method.proto.return_type()),
                method
                    .proto
                    .parameters()
                    .iter()
                    .map(|p| self.original_type(p))
                    .collect(),
            ),
        )
    }

    /// The representative original of `field`.
    #[must_use]
    pub fn original_field(&self, field: &FieldRef) -> FieldRef {
        match self.original_fields.get(field).and_then(|o| o.iter().next()) {
            Some(original) => original.clone(),
            None => FieldRef::new(
                self.original_type(&field.holder),
                field.name.as_str(),
                self.original_type(&field.ty),
            ),
        }
    }
}

fn with_dimensions(base: &TypeRef, dims: usize) -> TypeRef {
    (0..dims).fold(base.clone(), |ty, _| ty.array_of())
}

/// Maps the base type of `ty` with `map`, keeping array dimensions.
pub(crate) fn map_type_with(ty: &TypeRef, map: impl Fn(&TypeRef) -> Option<TypeRef>) -> TypeRef {
    let dims = ty.array_dimensions();
    if dims == 0 {
        return map(ty).unwrap_or_else(|| ty.clone());
    }
    match map(&ty.base_type()) {
        Some(mapped) => with_dimensions(&mapped, dims),
        None => ty.clone(),
    }
}

/// Collects the mappings of one layer.
///
/// Conflicting entries (one source mapped to two targets) are collected and reported by
/// [`LensLayerBuilder::build`].
#[derive(Debug)]
pub struct LensLayerBuilder {
    layer: LensLayer,
    conflicts: Vec<String>,
}

impl LensLayerBuilder {
    /// Maps the class `from` to `to`.
    pub fn map_type(&mut self, from: TypeRef, to: TypeRef) -> &mut Self {
        if let Some(existing) = self.layer.types.get(&from) {
            if *existing != to {
                self.conflicts
                    .push(format!("{from} mapped to {existing} and {to}"));
            }
            return self;
        }
        self.layer
            .original_types
            .entry(to.clone())
            .or_default()
            .insert(from.clone());
        self.layer.types.insert(from, to);
        self
    }

    /// Maps the method `from` to `to`.
    pub fn map_method(&mut self, from: MethodRef, to: MethodRef) -> &mut Self {
        if let Some(existing) = self.layer.methods.get(&from) {
            if *existing != to {
                self.conflicts
                    .push(format!("{from} mapped to {existing} and {to}"));
            }
            return self;
        }
        self.layer
            .original_methods
            .entry(to.clone())
            .or_default()
            .insert(from.clone());
        self.layer.methods.insert(from, to);
        self
    }

    /// Maps the field `from` to `to`.
    pub fn map_field(&mut self, from: FieldRef, to: FieldRef) -> &mut Self {
        if let Some(existing) = self.layer.fields.get(&from) {
            if *existing != to {
                self.conflicts
                    .push(format!("{from} mapped to {existing} and {to}"));
            }
            return self;
        }
        self.layer
            .original_fields
            .entry(to.clone())
            .or_default()
            .insert(from.clone());
        self.layer.fields.insert(from, to);
        self
    }

    /// Calls to the (mapped) `method` use `kind` from now on.
    pub fn set_invoke_kind(&mut self, method: MethodRef, kind: InvokeKind) -> &mut Self {
        if let Some(existing) = self.layer.invoke_kinds.insert(method.clone(), kind) {
            if existing != kind {
                self.conflicts
                    .push(format!("{method} invoked as {existing:?} and {kind:?}"));
            }
        }
        self
    }

    /// Calls to `method` pass `arguments` after the original arguments. `method` is looked up
    /// as named before this layer first, then as mapped by it, so sources mapped to the same
    /// target can pass different arguments.
    pub fn add_extra_arguments(
        &mut self,
        method: MethodRef,
        arguments: Vec<ConstValue>,
    ) -> &mut Self {
        self.layer
            .extra_arguments
            .entry(method)
            .or_default()
            .extend(arguments);
        self
    }

    /// Finishes the layer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LensError`] if a source was mapped to two different targets.
    pub fn build(self) -> Result<LensLayer> {
        if !self.conflicts.is_empty() {
            return Err(Error::LensError(format!(
                "layer '{}': {}",
                self.layer.name,
                self.conflicts.join("; ")
            )));
        }
        Ok(self.layer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_mapping() {
        let mut builder = LensLayer::builder("merge");
        builder.map_type(TypeRef::class("a/B"), TypeRef::class("a/A"));
        let layer = builder.build().unwrap();

        let array = TypeRef::parse("[[La/B;").unwrap();
        assert_eq!(layer.lookup_type(&array), TypeRef::parse("[[La/A;").unwrap());

        let method = MethodRef::parse("a/B", "m", "(La/B;I)[La/B;").unwrap();
        assert_eq!(
            layer.lookup_method_reference(&method),
            MethodRef::parse("a/A", "m", "(La/A;I)[La/A;").unwrap()
        );
        let field = FieldRef::parse("a/C", "f", "La/B;").unwrap();
        assert_eq!(
            layer.lookup_field(&field),
            FieldRef::parse("a/C", "f", "La/A;").unwrap()
        );
    }

    #[test]
    fn test_inverse() {
        let mut builder = LensLayer::builder("merge");
        builder
            .map_type(TypeRef::class("a/B"), TypeRef::class("a/A"))
            .map_type(TypeRef::class("a/C"), TypeRef::class("a/A"));
        let layer = builder.build().unwrap();
        assert_eq!(
            layer.original_types(&TypeRef::class("a/A")),
            vec![
                TypeRef::class("a/A"),
                TypeRef::class("a/B"),
                TypeRef::class("a/C")
            ]
        );
        assert!(layer.original_types(&TypeRef::class("a/B")).is_empty());
        assert_eq!(
            layer.original_type(&TypeRef::class("a/A").array_of()),
            TypeRef::class("a/B").array_of()
        );
        let method = MethodRef::parse("a/A", "m", "(La/A;)V").unwrap();
        assert_eq!(layer.original_methods(&method).len(), 9);
        assert_eq!(
            layer.original_method(&method),
            MethodRef::parse("a/B", "m", "(La/B;)V").unwrap()
        );
        assert_eq!(
            layer.original_types(&TypeRef::class("x/Y")),
            vec![TypeRef::class("x/Y")]
        );
    }

    #[test]
    fn test_conflicts_are_errors() {
        let mut builder = LensLayer::builder("bad");
        builder
            .map_type(TypeRef::class("a/B"), TypeRef::class("a/A"))
            .map_type(TypeRef::class("a/B"), TypeRef::class("a/C"));
        assert!(matches!(builder.build(), Err(Error::LensError(_))));
    }

    #[test]
    fn test_invoke_rewrite() {
        let target = MethodRef::parse("a/A", "m", "()V").unwrap();
        let mut builder = LensLayer::builder("devirtualize");
        builder
            .set_invoke_kind(target.clone(), InvokeKind::Static)
            .add_extra_arguments(target.clone(), vec![ConstValue::Int(3)]);
        let layer = builder.build().unwrap();
        let result = layer.lookup_method(
            &MethodLookupResult::identity(&target, InvokeKind::Virtual),
            None,
        );
        assert_eq!(result.kind, InvokeKind::Static);
        assert_eq!(result.extra_arguments, vec![ConstValue::Int(3)]);
        assert!(result.is_rewritten(&target, InvokeKind::Virtual));
    }

    #[test]
    fn test_extra_arguments_per_source() {
        let entry = MethodRef::parse("a/A", "<init>", "(I)V").unwrap();
        let a = MethodRef::parse("a/A", "<init>", "()V").unwrap();
        let b = MethodRef::parse("a/B", "<init>", "()V").unwrap();
        let mut builder = LensLayer::builder("merge");
        builder
            .map_method(a.clone(), entry.clone())
            .map_method(b.clone(), entry.clone())
            .add_extra_arguments(a.clone(), vec![ConstValue::Int(0)])
            .add_extra_arguments(b.clone(), vec![ConstValue::Int(1)]);
        let layer = builder.build().unwrap();

        for (source, id) in [(a, 0), (b, 1)] {
            let result = layer.lookup_method(
                &MethodLookupResult::identity(&source, InvokeKind::Special),
                None,
            );
            assert_eq!(result.reference, entry);
            assert_eq!(result.extra_arguments, vec![ConstValue::Int(id)]);
        }
    }
}

//! The graph lens: composable reference rewriting.
//!
//! Passes that rename, merge or retarget definitions do not rewrite every stored reference.
//! They push a [`LensLayer`] onto the current [`GraphLens`], and readers map the references
//! they hold through the lens when they need the current shape.
//!
//! A `GraphLens` is a persistent list of layers. [`GraphLens::extend`] returns a new lens and
//! leaves the receiver untouched, so a pass can keep a snapshot of the lens as of its start
//! while other work extends it. The identity lens has no layers and every lookup on it
//! returns its input.
//!
//! # Key Components
//!
//! - [`GraphLens`] - Persistent layer list with forward and inverse lookups
//! - [`LensLayer`] / [`LensLayerBuilder`] - One stage's mappings
//! - [`FlattenedLens`] - Memoized lookups against a fixed snapshot
//! - [`LensCodeRewriter`] - Rewrites IR bodies through a lens
//!
//! # Examples
//!
//! ```rust
//! use cfshrink::lens::{GraphLens, LensLayer};
//! use cfshrink::program::references::TypeRef;
//!
//! let mut builder = LensLayer::builder("merge");
//! builder.map_type(TypeRef::class("a/B"), TypeRef::class("a/A"));
//! let lens = GraphLens::identity().extend(builder.build()?);
//! assert_eq!(lens.lookup_type(&TypeRef::class("a/B")), TypeRef::class("a/A"));
//! assert_eq!(lens.original_type(&TypeRef::class("a/A")), TypeRef::class("a/B"));
//! # Ok::<(), cfshrink::Error>(())
//! ```

mod flattened;
mod layer;
mod rewriter;

pub use flattened::FlattenedLens;
pub use layer::{LensLayer, LensLayerBuilder, MethodLookupResult};
pub use rewriter::LensCodeRewriter;

use std::{collections::BTreeSet, fmt, sync::Arc};

use crate::{
    code::instruction::InvokeKind,
    program::references::{FieldRef, MethodRef, TypeRef},
};

struct LensNode {
    layer: Arc<LensLayer>,
    previous: GraphLens,
    depth: usize,
}

/// A persistent stack of lens layers.
#[derive(Clone, Default)]
pub struct GraphLens {
    head: Option<Arc<LensNode>>,
}

impl GraphLens {
    /// The lens without layers.
    #[must_use]
    pub fn identity() -> Self {
        GraphLens::default()
    }

    /// Returns `true` if no layer was pushed.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.head.is_none()
    }

    /// Number of layers.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.head.as_ref().map_or(0, |node| node.depth)
    }

    /// Returns `true` if both lenses are the same snapshot.
    #[must_use]
    pub fn ptr_eq(&self, other: &GraphLens) -> bool {
        match (&self.head, &other.head) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// A new lens with `layer` on top. Empty layers are dropped.
    #[must_use]
    pub fn extend(&self, layer: LensLayer) -> GraphLens {
        if layer.is_empty() {
            return self.clone();
        }
        self.push(Arc::new(layer))
    }

    fn push(&self, layer: Arc<LensLayer>) -> GraphLens {
        log::debug!("Extending lens with layer '{}'", layer.name());
        GraphLens {
            head: Some(Arc::new(LensNode {
                layer,
                previous: self.clone(),
                depth: self.depth() + 1,
            })),
        }
    }

    /// `self` followed by the layers of `other`. Layers are shared, not copied.
    #[must_use]
    pub fn compose(&self, other: &GraphLens) -> GraphLens {
        other
            .layers()
            .into_iter()
            .fold(self.clone(), |lens, layer| lens.push(layer))
    }

    /// The layers pushed after the first `depth` ones, as a lens of their own.
    #[must_use]
    pub fn since(&self, depth: usize) -> GraphLens {
        self.layers()
            .into_iter()
            .skip(depth)
            .fold(GraphLens::identity(), |lens, layer| lens.push(layer))
    }

    /// Layers from oldest to newest.
    #[must_use]
    pub fn layers(&self) -> Vec<Arc<LensLayer>> {
        let mut layers = Vec::with_capacity(self.depth());
        let mut current = self.head.as_ref();
        while let Some(node) = current {
            layers.push(node.layer.clone());
            current = node.previous.head.as_ref();
        }
        layers.reverse();
        layers
    }

    /// Layers from newest to oldest, without allocating.
    fn layers_newest_first(&self) -> impl Iterator<Item = &LensLayer> + '_ {
        std::iter::successors(self.head.as_deref(), |node| node.previous.head.as_deref())
            .map(|node| node.layer.as_ref())
    }

    /// The current form of `ty`.
    #[must_use]
    pub fn lookup_type(&self, ty: &TypeRef) -> TypeRef {
        match &self.head {
            None => ty.clone(),
            Some(node) => node.layer.lookup_type(&node.previous.lookup_type(ty)),
        }
    }

    /// The current form of `field`.
    #[must_use]
    pub fn lookup_field(&self, field: &FieldRef) -> FieldRef {
        match &self.head {
            None => field.clone(),
            Some(node) => node.layer.lookup_field(&node.previous.lookup_field(field)),
        }
    }

    /// The current form of a method reference, ignoring invoke rewrites.
    #[must_use]
    pub fn lookup_method_reference(&self, method: &MethodRef) -> MethodRef {
        match &self.head {
            None => method.clone(),
            Some(node) => node
                .layer
                .lookup_method_reference(&node.previous.lookup_method_reference(method)),
        }
    }

    /// The current target, invoke kind and extra arguments of a call to `method` with
    /// `kind`, made from the method `context` (given in its original form).
    #[must_use]
    pub fn lookup_method(
        &self,
        method: &MethodRef,
        context: Option<&MethodRef>,
        kind: InvokeKind,
    ) -> MethodLookupResult {
        let mut result = MethodLookupResult::identity(method, kind);
        if self.is_identity() {
            return result;
        }
        let mut context = context.cloned();
        for layer in self.layers() {
            result = layer.lookup_method(&result, context.as_ref());
            context = context.map(|c| layer.lookup_method_reference(&c));
        }
        result
    }

    /// The original form of `ty`. When several types were merged into `ty`, the smallest
    /// original is returned unless `ty` itself is one of them.
    #[must_use]
    pub fn original_type(&self, ty: &TypeRef) -> TypeRef {
        self.layers_newest_first()
            .fold(ty.clone(), |current, layer| layer.original_type(&current))
    }

    /// Every original type that maps to `ty`, sorted.
    #[must_use]
    pub fn original_types(&self, ty: &TypeRef) -> Vec<TypeRef> {
        let mut current = BTreeSet::from([ty.clone()]);
        for layer in self.layers_newest_first() {
            current = current
                .iter()
                .flat_map(|t| layer.original_types(t))
                .collect();
        }
        current.into_iter().collect()
    }

    /// The original signature of `method`.
    #[must_use]
    pub fn original_method_signature(&self, method: &MethodRef) -> MethodRef {
        self.layers_newest_first()
            .fold(method.clone(), |current, layer| layer.original_method(&current))
    }

    /// Every original method that maps to `method`, sorted.
    #[must_use]
    pub fn original_methods(&self, method: &MethodRef) -> Vec<MethodRef> {
        let mut current = BTreeSet::from([method.clone()]);
        for layer in self.layers_newest_first() {
            current = current
                .iter()
                .flat_map(|m| layer.original_methods(m))
                .collect();
        }
        current.into_iter().collect()
    }

    /// The original form of `field`.
    #[must_use]
    pub fn original_field(&self, field: &FieldRef) -> FieldRef {
        self.layers_newest_first()
            .fold(field.clone(), |current, layer| layer.original_field(&current))
    }
}

impl fmt::Debug for GraphLens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .layers()
            .iter()
            .map(|layer| layer.name().to_string())
            .collect();
        f.debug_struct("GraphLens").field("layers", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::ConstValue;

    fn rename(name: &str, from: &str, to: &str) -> LensLayer {
        let mut builder = LensLayer::builder(name);
        builder.map_type(TypeRef::class(from), TypeRef::class(to));
        builder.build().unwrap()
    }

    #[test]
    fn test_identity_fast_path() {
        let lens = GraphLens::identity();
        let method = MethodRef::parse("a/A", "m", "()V").unwrap();
        assert!(lens.is_identity());
        assert_eq!(lens.depth(), 0);
        assert_eq!(
            lens.lookup_method(&method, None, InvokeKind::Virtual),
            MethodLookupResult::identity(&method, InvokeKind::Virtual)
        );
        assert!(lens.extend(LensLayer::builder("empty").build().unwrap()).is_identity());
    }

    #[test]
    fn test_since_keeps_newer_layers() {
        let lens = GraphLens::identity()
            .extend(rename("first", "a/B", "a/C"))
            .extend(rename("second", "a/C", "a/D"));
        let top = lens.since(1);
        assert_eq!(top.depth(), 1);
        assert_eq!(top.lookup_type(&TypeRef::class("a/B")), TypeRef::class("a/B"));
        assert_eq!(top.lookup_type(&TypeRef::class("a/C")), TypeRef::class("a/D"));
        assert!(lens.since(2).is_identity());
    }

    #[test]
    fn test_copy_on_extend() {
        let base = GraphLens::identity().extend(rename("first", "a/B", "a/C"));
        let snapshot = base.clone();
        let extended = base.extend(rename("second", "a/C", "a/D"));

        assert!(snapshot.ptr_eq(&base));
        assert_eq!(snapshot.depth(), 1);
        assert_eq!(extended.depth(), 2);
        assert_eq!(snapshot.lookup_type(&TypeRef::class("a/B")), TypeRef::class("a/C"));
        assert_eq!(extended.lookup_type(&TypeRef::class("a/B")), TypeRef::class("a/D"));
        assert_eq!(
            extended.original_type(&TypeRef::class("a/D")),
            TypeRef::class("a/B")
        );
    }

    #[test]
    fn test_compose_matches_sequential_application() {
        let first = GraphLens::identity().extend(rename("first", "a/B", "a/C"));
        let mut builder = LensLayer::builder("second");
        let m = MethodRef::parse("a/C", "m", "(La/B;)V").unwrap();
        builder
            .map_method(
                MethodRef::parse("a/C", "m", "(La/C;)V").unwrap(),
                MethodRef::parse("a/E", "n", "(La/C;)V").unwrap(),
            )
            .set_invoke_kind(
                MethodRef::parse("a/E", "n", "(La/C;)V").unwrap(),
                InvokeKind::Static,
            )
            .add_extra_arguments(
                MethodRef::parse("a/E", "n", "(La/C;)V").unwrap(),
                vec![ConstValue::Int(1)],
            );
        let second = GraphLens::identity().extend(builder.build().unwrap());
        let composed = first.compose(&second);

        let step = first.lookup_method(&m, None, InvokeKind::Virtual);
        let sequential = second.lookup_method(&step.reference, None, step.kind);
        let direct = composed.lookup_method(&m, None, InvokeKind::Virtual);
        assert_eq!(direct.reference, sequential.reference);
        assert_eq!(direct.kind, InvokeKind::Static);
        assert_eq!(direct.extra_arguments, vec![ConstValue::Int(1)]);
        assert!(composed.original_methods(&direct.reference).contains(&m));
    }

    #[test]
    fn test_invoke_special_in_own_class() {
        let target = MethodRef::parse("a/B", "helper", "()V").unwrap();
        let context = MethodRef::parse("a/C", "caller", "()V").unwrap();
        let mut builder = LensLayer::builder("merge");
        builder
            .map_type(TypeRef::class("a/B"), TypeRef::class("a/C"))
            .set_invoke_kind(
                MethodRef::parse("a/C", "helper", "()V").unwrap(),
                InvokeKind::Virtual,
            );
        let lens = GraphLens::identity().extend(builder.build().unwrap());
        let result = lens.lookup_method(&target, Some(&context), InvokeKind::Special);
        assert_eq!(result.kind, InvokeKind::Special);
        let result = lens.lookup_method(&target, None, InvokeKind::Special);
        assert_eq!(result.kind, InvokeKind::Virtual);
    }
}

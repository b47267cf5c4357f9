//! The program graph.
//!
//! A [`ProgramGraph`] is the immutable, whole-program view every other component reads: all
//! program, classpath and library classes keyed by type, plus a precomputed direct-subtype
//! index. It is built once through [`ProgramGraphBuilder`]; stages that add or remove
//! definitions (class merging, final pruning) produce a new graph from
//! [`ProgramGraph::to_builder`] instead of mutating a shared one.
//!
//! # Key Components
//!
//! - [`references`] - Interned symbolic references used as keys everywhere
//! - [`descriptor`] - Descriptor grammar
//! - [`flags`] - Access flags
//! - [`optinfo`] - Method and field optimization info
//! - Definitions ([`ClassDef`], [`MethodDef`], [`FieldDef`]) and hierarchy resolution
//!
//! # Examples
//!
//! ```rust
//! use cfshrink::program::{ClassDef, ClassKind, ProgramGraph};
//! use cfshrink::program::references::TypeRef;
//!
//! let mut builder = ProgramGraph::builder();
//! builder.add_class(ClassDef::new(TypeRef::class("com/example/Main"), ClassKind::Program))?;
//! let program = builder.build();
//! assert_eq!(program.program_classes().count(), 1);
//! # Ok::<(), cfshrink::Error>(())
//! ```

pub mod descriptor;
pub mod flags;
pub mod optinfo;
pub mod references;

mod definitions;
mod hierarchy;

pub use definitions::{
    Annotation, ClassDef, ClassKind, FieldDef, MethodDef, ParameterInfo, StaticValue,
};
pub use hierarchy::{FieldResolution, MethodResolution, ResolvedField, ResolvedMethod};

use std::{collections::BTreeMap, sync::Arc};

use crate::{
    program::references::{FieldRef, MethodRef, TypeRef},
    Result,
};

/// Immutable whole-program class graph.
#[derive(Debug, Clone, Default)]
pub struct ProgramGraph {
    classes: BTreeMap<TypeRef, Arc<ClassDef>>,
    subtypes: BTreeMap<TypeRef, Vec<TypeRef>>,
}

impl ProgramGraph {
    /// Starts an empty builder.
    #[must_use]
    pub fn builder() -> ProgramGraphBuilder {
        ProgramGraphBuilder::default()
    }

    /// A builder seeded with every class of this graph.
    #[must_use]
    pub fn to_builder(&self) -> ProgramGraphBuilder {
        ProgramGraphBuilder {
            classes: self.classes.clone(),
        }
    }

    /// The definition of `ty`.
    #[must_use]
    pub fn definition_for(&self, ty: &TypeRef) -> Option<&Arc<ClassDef>> {
        self.classes.get(ty)
    }

    pub(crate) fn class_entry(&self, ty: &TypeRef) -> Option<&ClassDef> {
        self.classes.get(ty).map(AsRef::as_ref)
    }

    /// The program class defining `ty`, `None` for library, classpath and undefined types.
    #[must_use]
    pub fn program_definition_for(&self, ty: &TypeRef) -> Option<&Arc<ClassDef>> {
        self.classes.get(ty).filter(|class| class.is_program())
    }

    /// The method declared with exactly this reference (holder included).
    #[must_use]
    pub fn method_definition(&self, method: &MethodRef) -> Option<&MethodDef> {
        self.class_entry(&method.holder)?
            .lookup_matching_method(method)
    }

    /// The field declared with exactly this reference (holder included).
    #[must_use]
    pub fn field_definition(&self, field: &FieldRef) -> Option<&FieldDef> {
        self.class_entry(&field.holder)?.lookup_field(field)
    }

    /// All classes in type order.
    pub fn classes(&self) -> impl Iterator<Item = &Arc<ClassDef>> + '_ {
        self.classes.values()
    }

    /// Program classes in type order.
    pub fn program_classes(&self) -> impl Iterator<Item = &Arc<ClassDef>> + '_ {
        self.classes.values().filter(|class| class.is_program())
    }

    /// Every method declared by a program class, in type then declaration order.
    pub fn program_methods(&self) -> impl Iterator<Item = &MethodDef> + '_ {
        self.program_classes().flat_map(|class| class.methods.iter())
    }

    /// Direct subtypes (subclasses and subinterfaces) of `ty`, sorted.
    #[must_use]
    pub fn direct_subtypes(&self, ty: &TypeRef) -> &[TypeRef] {
        self.subtypes.get(ty).map_or(&[], Vec::as_slice)
    }

    /// Number of defined classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns `true` if no class is defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// Collects class definitions into a [`ProgramGraph`].
///
/// When the same type is defined more than once the program definition wins over classpath
/// and library definitions, and classpath wins over library. Two program definitions of one
/// type are a malformed input.
#[derive(Debug, Default)]
pub struct ProgramGraphBuilder {
    classes: BTreeMap<TypeRef, Arc<ClassDef>>,
}

impl ProgramGraphBuilder {
    /// Adds a class definition.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a duplicate program class or a class whose
    /// type is not a class type.
    pub fn add_class(&mut self, class: ClassDef) -> Result<&mut Self> {
        if !class.ty.is_class() {
            return Err(malformed_error!("'{:?}' is not a class type", class.ty));
        }
        match self.classes.get(&class.ty) {
            Some(existing) if existing.kind == class.kind && class.is_program() => {
                return Err(malformed_error!("Duplicate program class '{}'", class.ty));
            }
            Some(existing) if existing.kind <= class.kind => {
                log::debug!(
                    "Ignoring {} definition of {}, already defined as {}",
                    class.kind,
                    class.ty,
                    existing.kind
                );
            }
            _ => {
                self.classes.insert(class.ty.clone(), Arc::new(class));
            }
        }
        Ok(self)
    }

    /// Replaces (or inserts) a class definition unconditionally.
    pub fn replace_class(&mut self, class: ClassDef) -> &mut Self {
        self.classes.insert(class.ty.clone(), Arc::new(class));
        self
    }

    /// Removes the definition of `ty`.
    pub fn remove_class(&mut self, ty: &TypeRef) -> Option<Arc<ClassDef>> {
        self.classes.remove(ty)
    }

    /// The current definition of `ty`.
    #[must_use]
    pub fn get(&self, ty: &TypeRef) -> Option<&Arc<ClassDef>> {
        self.classes.get(ty)
    }

    /// Freezes the builder and computes the subtype index.
    #[must_use]
    pub fn build(self) -> ProgramGraph {
        let mut subtypes: BTreeMap<TypeRef, Vec<TypeRef>> = BTreeMap::new();
        for class in self.classes.values() {
            for sup in class.supertypes() {
                subtypes.entry(sup.clone()).or_default().push(class.ty.clone());
            }
        }
        for subs in subtypes.values_mut() {
            subs.sort();
            subs.dedup();
        }
        ProgramGraph {
            classes: self.classes,
            subtypes,
        }
    }
}

//! Keep policy.
//!
//! The enqueuer does not parse keep rules. It asks a [`KeepPolicy`] oracle which classes and
//! members are roots, which names must survive, which methods take identifier name strings,
//! and which definitions must be gone after shrinking. [`RootSet`] is the programmatic
//! implementation used by drivers and tests.

use std::collections::{BTreeMap, BTreeSet};

use crate::program::references::{FieldRef, MethodRef, Reference, TypeRef};

/// Keep requirements of one class or member.
///
/// Bottom allows everything; top pins the item and forbids renaming and optimization.
/// [`KeepInfo::join`] moves towards top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeepInfo {
    /// Must not be removed
    pub pinned: bool,
    /// May be renamed
    pub allow_renaming: bool,
    /// May be optimized (inlined, merged, have arguments removed)
    pub allow_optimization: bool,
}

impl KeepInfo {
    /// No requirement.
    #[must_use]
    pub const fn bottom() -> Self {
        KeepInfo {
            pinned: false,
            allow_renaming: true,
            allow_optimization: true,
        }
    }

    /// Every requirement.
    #[must_use]
    pub const fn top() -> Self {
        KeepInfo {
            pinned: true,
            allow_renaming: false,
            allow_optimization: false,
        }
    }

    /// Returns `true` if nothing is required.
    #[must_use]
    pub fn is_bottom(&self) -> bool {
        *self == Self::bottom()
    }

    /// Returns `true` if everything is required.
    #[must_use]
    pub fn is_top(&self) -> bool {
        *self == Self::top()
    }

    /// Least upper bound.
    #[must_use]
    pub fn join(&self, other: &KeepInfo) -> KeepInfo {
        KeepInfo {
            pinned: self.pinned || other.pinned,
            allow_renaming: self.allow_renaming && other.allow_renaming,
            allow_optimization: self.allow_optimization && other.allow_optimization,
        }
    }
}

impl Default for KeepInfo {
    fn default() -> Self {
        Self::bottom()
    }
}

/// The keep-rule oracle consulted by the enqueuer.
///
/// Answers must be deterministic; the enqueuer asks in sorted order and caches the joined
/// [`KeepInfo`] of every root.
pub trait KeepPolicy: Send + Sync {
    /// Returns `true` if `item` is an entry point.
    fn is_kept_by_root(&self, item: &Reference) -> bool;

    /// Returns `true` if the member root `item` only applies once its holder is live.
    fn is_conditional_on_holder(&self, item: &Reference) -> bool {
        let _ = item;
        false
    }

    /// Returns `true` if the name of `item` must survive.
    fn requires_naming(&self, item: &Reference) -> bool {
        let _ = item;
        false
    }

    /// Returns `true` if `item` must not be optimized even though it is not a root.
    fn disallows_optimization(&self, item: &Reference) -> bool {
        let _ = item;
        false
    }

    /// Methods whose constant string arguments name classes.
    fn identifier_name_string_targets(&self) -> BTreeSet<MethodRef> {
        BTreeSet::new()
    }

    /// Definitions that must not be live after shrinking.
    fn check_discard(&self) -> BTreeSet<Reference> {
        BTreeSet::new()
    }

    /// The joined keep info of `item`.
    fn keep_info(&self, item: &Reference) -> KeepInfo {
        let mut info = KeepInfo::bottom();
        if self.is_kept_by_root(item) {
            info = info.join(&KeepInfo::top());
        }
        if self.requires_naming(item) {
            info.allow_renaming = false;
        }
        if self.disallows_optimization(item) {
            info.allow_optimization = false;
        }
        info
    }
}

/// What a class keep rule covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum ClassKeep {
    /// Only the class
    ClassOnly,
    /// The class and every member
    ClassAndMembers,
    /// The members, the class only if something else keeps it live
    Members,
}

/// A keep policy built from explicit rules.
#[derive(Debug, Clone, Default)]
pub struct RootSet {
    classes: BTreeMap<TypeRef, ClassKeep>,
    members: BTreeSet<Reference>,
    names: BTreeSet<Reference>,
    no_optimization: BTreeSet<Reference>,
    identifier_name_strings: BTreeSet<MethodRef>,
    check_discard: BTreeSet<Reference>,
}

impl RootSet {
    /// An empty root set; nothing is kept.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps a class.
    #[must_use]
    pub fn keep_class(mut self, ty: TypeRef) -> Self {
        self.classes.insert(ty, ClassKeep::ClassOnly);
        self
    }

    /// Keeps a class and all of its members.
    #[must_use]
    pub fn keep_class_and_members(mut self, ty: TypeRef) -> Self {
        self.classes.insert(ty, ClassKeep::ClassAndMembers);
        self
    }

    /// Keeps every member of a class, and the class only when something else uses it.
    #[must_use]
    pub fn keep_members(mut self, ty: TypeRef) -> Self {
        self.classes.insert(ty, ClassKeep::Members);
        self
    }

    /// Keeps a single method.
    #[must_use]
    pub fn keep_method(mut self, method: MethodRef) -> Self {
        self.members.insert(Reference::Method(method));
        self
    }

    /// Keeps a single field.
    #[must_use]
    pub fn keep_field(mut self, field: FieldRef) -> Self {
        self.members.insert(Reference::Field(field));
        self
    }

    /// Keeps the name of `item` without making it a root.
    #[must_use]
    pub fn keep_name(mut self, item: Reference) -> Self {
        self.names.insert(item);
        self
    }

    /// Forbids optimizing `item`.
    #[must_use]
    pub fn no_optimization(mut self, item: Reference) -> Self {
        self.no_optimization.insert(item);
        self
    }

    /// Treats constant strings passed to `method` as class names.
    #[must_use]
    pub fn identifier_name_string(mut self, method: MethodRef) -> Self {
        self.identifier_name_strings.insert(method);
        self
    }

    /// Requires `item` to be removed by shrinking.
    #[must_use]
    pub fn require_discard(mut self, item: Reference) -> Self {
        self.check_discard.insert(item);
        self
    }

    /// Number of explicit rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len() + self.members.len()
    }

    /// Returns `true` if nothing is kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeepPolicy for RootSet {
    fn is_kept_by_root(&self, item: &Reference) -> bool {
        match item {
            Reference::Type(ty) => matches!(
                self.classes.get(ty),
                Some(ClassKeep::ClassOnly | ClassKeep::ClassAndMembers)
            ),
            member => {
                self.members.contains(member)
                    || matches!(
                        self.classes.get(member.context_type()),
                        Some(ClassKeep::ClassAndMembers | ClassKeep::Members)
                    )
            }
        }
    }

    fn is_conditional_on_holder(&self, item: &Reference) -> bool {
        !matches!(item, Reference::Type(_))
            && !self.members.contains(item)
            && self.classes.get(item.context_type()) == Some(&ClassKeep::Members)
    }

    fn requires_naming(&self, item: &Reference) -> bool {
        self.names.contains(item)
    }

    fn disallows_optimization(&self, item: &Reference) -> bool {
        self.no_optimization.contains(item)
    }

    fn identifier_name_string_targets(&self) -> BTreeSet<MethodRef> {
        self.identifier_name_strings.clone()
    }

    fn check_discard(&self) -> BTreeSet<Reference> {
        self.check_discard.clone()
    }
}

//! Hierarchy queries and member resolution.
//!
//! Resolution follows JVMS §5.4.3: method references on classes search the class and its
//! superclasses, then the maximally-specific superinterface methods; interface method
//! references search the interface, then the public instance methods of `java/lang/Object`,
//! then superinterfaces. Field resolution searches own fields, superinterfaces, then the
//! superclass.
//!
//! Every walk iterates supertypes in declaration order and uses visited sets, so results are
//! deterministic and cyclic (malformed) hierarchies terminate.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::program::{
    definitions::{ClassDef, FieldDef, MethodDef},
    flags::MethodAccessFlags,
    references::{FieldRef, MethodRef, TypeRef},
    ProgramGraph,
};

/// A method resolved to its definition.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedMethod<'a> {
    /// The declaring class
    pub class: &'a ClassDef,
    /// The definition
    pub method: &'a MethodDef,
}

impl ResolvedMethod<'_> {
    /// The definition's own reference.
    #[must_use]
    pub fn reference(&self) -> &MethodRef {
        &self.method.reference
    }
}

/// Outcome of resolving a method reference.
#[derive(Debug, Clone)]
pub enum MethodResolution<'a> {
    /// Exactly one definition
    Single(ResolvedMethod<'a>),
    /// A class required for resolution is not defined
    ClassNotFound(TypeRef),
    /// The hierarchy is complete but declares no matching method
    NoSuchMethod,
    /// Several maximally-specific default methods match
    IncompatibleClassChange,
}

impl<'a> MethodResolution<'a> {
    /// The resolved method, if resolution succeeded.
    #[must_use]
    pub fn single(&self) -> Option<ResolvedMethod<'a>> {
        match self {
            MethodResolution::Single(resolved) => Some(*resolved),
            _ => None,
        }
    }

    /// Returns `true` if resolution failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !matches!(self, MethodResolution::Single(_))
    }
}

/// A field resolved to its definition.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedField<'a> {
    /// The declaring class
    pub class: &'a ClassDef,
    /// The definition
    pub field: &'a FieldDef,
}

/// Outcome of resolving a field reference.
#[derive(Debug, Clone)]
pub enum FieldResolution<'a> {
    /// Found
    Single(ResolvedField<'a>),
    /// A class required for resolution is not defined
    ClassNotFound(TypeRef),
    /// No matching field
    NoSuchField,
}

impl<'a> FieldResolution<'a> {
    /// The resolved field, if resolution succeeded.
    #[must_use]
    pub fn single(&self) -> Option<ResolvedField<'a>> {
        match self {
            FieldResolution::Single(resolved) => Some(*resolved),
            _ => None,
        }
    }
}

impl ProgramGraph {
    /// Returns `true` if `ty` is defined as an interface.
    #[must_use]
    pub fn is_interface(&self, ty: &TypeRef) -> bool {
        self.definition_for(ty).is_some_and(|c| c.is_interface())
    }

    /// Reflexive subtype test, including array covariance.
    ///
    /// Undefined classes are only known to be subtypes of themselves and `java/lang/Object`.
    #[must_use]
    pub fn is_subtype(&self, sub: &TypeRef, sup: &TypeRef) -> bool {
        if sub == sup {
            return true;
        }
        if sub.is_primitive() || sup.is_primitive() || sub.is_void() || sup.is_void() {
            return false;
        }
        if *sup == TypeRef::object() {
            return true;
        }
        if sub.is_array() {
            if sup.is_array() {
                return match (sub.element_type(), sup.element_type()) {
                    (Some(a), Some(b)) if a.is_reference() && b.is_reference() => {
                        self.is_subtype(&a, &b)
                    }
                    _ => false,
                };
            }
            return matches!(
                sup.internal_name(),
                "java/lang/Cloneable" | "java/io/Serializable"
            );
        }
        if sup.is_array() {
            return false;
        }
        self.all_supertypes(sub).contains(sup)
    }

    /// Irreflexive subtype test.
    #[must_use]
    pub fn is_strict_subtype(&self, sub: &TypeRef, sup: &TypeRef) -> bool {
        sub != sup && self.is_subtype(sub, sup)
    }

    /// All defined and undefined supertypes of `ty` in breadth-first declaration order,
    /// excluding `ty` itself.
    #[must_use]
    pub fn all_supertypes(&self, ty: &TypeRef) -> Vec<TypeRef> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        seen.insert(ty.clone());
        queue.push_back(ty.clone());
        while let Some(current) = queue.pop_front() {
            let Some(class) = self.definition_for(&current) else {
                continue;
            };
            for sup in class.supertypes() {
                if seen.insert(sup.clone()) {
                    result.push(sup.clone());
                    queue.push_back(sup.clone());
                }
            }
        }
        result
    }

    /// All transitive subtypes of `ty`, sorted.
    #[must_use]
    pub fn all_subtypes(&self, ty: &TypeRef) -> Vec<TypeRef> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![ty.clone()];
        while let Some(current) = stack.pop() {
            for sub in self.direct_subtypes(&current) {
                if seen.insert(sub.clone()) {
                    stack.push(sub.clone());
                }
            }
        }
        seen.into_iter().collect()
    }

    /// Resolves a method reference against its symbolic holder.
    ///
    /// # Arguments
    ///
    /// * `method` - The symbolic reference
    ///
    /// # Returns
    ///
    /// The resolution outcome. [`MethodResolution::ClassNotFound`] names the holder or the
    /// first undefined superclass on the search path.
    #[must_use]
    pub fn resolve_method(&self, method: &MethodRef) -> MethodResolution<'_> {
        let Some(holder) = self.class_entry(&method.holder) else {
            return MethodResolution::ClassNotFound(method.holder.clone());
        };
        if holder.is_interface() {
            self.resolve_method_on_interface(holder, method)
        } else {
            self.resolve_method_on_class(holder, method)
        }
    }

    fn resolve_method_on_class<'a>(
        &'a self,
        holder: &'a ClassDef,
        method: &MethodRef,
    ) -> MethodResolution<'a> {
        let mut current = Some(holder);
        let mut seen = HashSet::new();
        let mut missing: Option<TypeRef> = None;
        while let Some(class) = current {
            if !seen.insert(&class.ty) {
                break;
            }
            if let Some(found) = class.lookup_matching_method(method) {
                return MethodResolution::Single(ResolvedMethod {
                    class,
                    method: found,
                });
            }
            current = match &class.super_type {
                Some(sup) => {
                    let next = self.class_entry(sup);
                    if next.is_none() {
                        missing = Some(sup.clone());
                    }
                    next
                }
                None => None,
            };
        }
        match self.maximally_specific_method(holder, method) {
            MethodResolution::NoSuchMethod => {
                missing.map_or(MethodResolution::NoSuchMethod, MethodResolution::ClassNotFound)
            }
            other => other,
        }
    }

    fn resolve_method_on_interface<'a>(
        &'a self,
        holder: &'a ClassDef,
        method: &MethodRef,
    ) -> MethodResolution<'a> {
        if let Some(found) = holder.lookup_matching_method(method) {
            return MethodResolution::Single(ResolvedMethod {
                class: holder,
                method: found,
            });
        }
        if let Some(object) = self.class_entry(&TypeRef::object()) {
            if let Some(found) = object.lookup_matching_method(method) {
                if found.access.contains(MethodAccessFlags::PUBLIC) && !found.is_static()
                {
                    return MethodResolution::Single(ResolvedMethod {
                        class: object,
                        method: found,
                    });
                }
            }
        }
        self.maximally_specific_method(holder, method)
    }

    /// Collects the maximally-specific superinterface methods of `class` and picks one.
    fn maximally_specific_method<'a>(
        &'a self,
        class: &'a ClassDef,
        method: &MethodRef,
    ) -> MethodResolution<'a> {
        let mut candidates: Vec<ResolvedMethod<'a>> = Vec::new();
        let mut missing: Option<TypeRef> = None;
        let mut seen = HashSet::new();
        let mut queue: VecDeque<&'a TypeRef> = VecDeque::new();

        let mut chain = Some(class);
        let mut chain_seen = HashSet::new();
        while let Some(c) = chain {
            if !chain_seen.insert(&c.ty) {
                break;
            }
            queue.extend(c.interfaces.iter());
            chain = c.super_type.as_ref().and_then(|s| self.class_entry(s));
        }

        while let Some(iface_ty) = queue.pop_front() {
            if !seen.insert(iface_ty) {
                continue;
            }
            let Some(iface) = self.class_entry(iface_ty) else {
                missing.get_or_insert_with(|| iface_ty.clone());
                continue;
            };
            match iface.lookup_matching_method(method) {
                Some(found) if !found.is_static() && !found.access.is_private() => {
                    candidates.push(ResolvedMethod {
                        class: iface,
                        method: found,
                    });
                }
                _ => queue.extend(iface.interfaces.iter()),
            }
        }

        let maximal: Vec<ResolvedMethod<'a>> = candidates
            .iter()
            .filter(|candidate| {
                !candidates.iter().any(|other| {
                    other.class.ty != candidate.class.ty
                        && self.is_strict_subtype(&other.class.ty, &candidate.class.ty)
                })
            })
            .copied()
            .collect();

        let mut non_abstract = maximal.iter().filter(|m| !m.method.is_abstract());
        match (non_abstract.next(), non_abstract.next()) {
            (Some(only), None) => MethodResolution::Single(*only),
            (Some(_), Some(_)) => MethodResolution::IncompatibleClassChange,
            (None, _) => match maximal.first() {
                Some(first) => MethodResolution::Single(*first),
                None => missing.map_or(MethodResolution::NoSuchMethod, MethodResolution::ClassNotFound),
            },
        }
    }

    /// Resolves a field reference (JVMS §5.4.3.2).
    #[must_use]
    pub fn resolve_field(&self, field: &FieldRef) -> FieldResolution<'_> {
        let Some(holder) = self.class_entry(&field.holder) else {
            return FieldResolution::ClassNotFound(field.holder.clone());
        };
        let mut seen = HashSet::new();
        let mut missing = None;
        match self.resolve_field_in(holder, field, &mut seen, &mut missing) {
            Some(found) => FieldResolution::Single(found),
            None => missing.map_or(FieldResolution::NoSuchField, FieldResolution::ClassNotFound),
        }
    }

    fn resolve_field_in<'a>(
        &'a self,
        class: &'a ClassDef,
        field: &FieldRef,
        seen: &mut HashSet<&'a TypeRef>,
        missing: &mut Option<TypeRef>,
    ) -> Option<ResolvedField<'a>> {
        if !seen.insert(&class.ty) {
            return None;
        }
        if let Some(found) = class.lookup_field(field) {
            return Some(ResolvedField {
                class,
                field: found,
            });
        }
        for sup in class.supertypes() {
            match self.class_entry(sup) {
                Some(sup_class) => {
                    if let Some(found) = self.resolve_field_in(sup_class, field, seen, missing) {
                        return Some(found);
                    }
                }
                None => {
                    missing.get_or_insert_with(|| sup.clone());
                }
            }
        }
        None
    }

    /// Target of an `invokespecial` that is not an initializer or private call, executed in
    /// `context`.
    ///
    /// Interface holders resolve to their default method; class holders dispatch on the
    /// superclass of `context`.
    #[must_use]
    pub fn lookup_super_target(
        &self,
        method: &MethodRef,
        context: &TypeRef,
    ) -> Option<ResolvedMethod<'_>> {
        let resolved = self.resolve_method(method).single()?;
        if self.is_interface(&method.holder) {
            return (!resolved.method.is_abstract()).then_some(resolved);
        }
        let context_class = self.class_entry(context)?;
        let super_type = context_class.super_type.as_ref()?;
        self.lookup_virtual_dispatch_target(resolved.method, super_type)
    }

    /// The method a virtual call to `resolved` executes on a receiver of exact class
    /// `receiver`.
    ///
    /// Package-private methods are only overridden by methods of the same package. Returns
    /// `None` when dispatch would raise `AbstractMethodError` or the receiver is undefined.
    #[must_use]
    pub fn lookup_virtual_dispatch_target(
        &self,
        resolved: &MethodDef,
        receiver: &TypeRef,
    ) -> Option<ResolvedMethod<'_>> {
        let receiver_class = self.class_entry(receiver)?;
        let mut current = Some(receiver_class);
        let mut seen = HashSet::new();
        while let Some(class) = current {
            if !seen.insert(&class.ty) {
                break;
            }
            if let Some(candidate) = class.lookup_matching_method(&resolved.reference) {
                if !candidate.is_static() && self.overrides(candidate, resolved) {
                    if candidate.is_abstract() {
                        return None;
                    }
                    return Some(ResolvedMethod {
                        class,
                        method: candidate,
                    });
                }
            }
            current = class.super_type.as_ref().and_then(|s| self.class_entry(s));
        }
        match self.maximally_specific_method(receiver_class, &resolved.reference) {
            MethodResolution::Single(found) if !found.method.is_abstract() => Some(found),
            _ => None,
        }
    }

    /// Returns `true` if `candidate` overrides (or is) `resolved`.
    fn overrides(&self, candidate: &MethodDef, resolved: &MethodDef) -> bool {
        if candidate.reference == resolved.reference {
            return true;
        }
        if candidate.access.is_private() {
            return false;
        }
        if resolved.access.is_package_private() {
            return candidate.holder().is_same_package(resolved.holder());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        program::{
            flags::{ClassAccessFlags, MethodAccessFlags},
            ClassDef, ClassKind, FieldDef, MethodDef, ProgramGraph,
        },
        program::{
            flags::FieldAccessFlags,
            references::{FieldRef, MethodRef, TypeRef},
        },
    };

    use super::MethodResolution;

    fn method(holder: &str, name: &str, access: MethodAccessFlags) -> MethodDef {
        MethodDef::new(MethodRef::parse(holder, name, "()V").unwrap(), access)
    }

    fn program() -> ProgramGraph {
        let iface = ClassDef::new(TypeRef::class("p/I"), ClassKind::Program)
            .with_access(ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT)
            .with_method(method("p/I", "m", MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT))
            .with_method(method("p/I", "d", MethodAccessFlags::PUBLIC));
        let a = ClassDef::new(TypeRef::class("p/A"), ClassKind::Program)
            .with_interface(TypeRef::class("p/I"))
            .with_method(method("p/A", "m", MethodAccessFlags::PUBLIC))
            .with_method(method("p/A", "pp", MethodAccessFlags::empty()))
            .with_field(FieldDef::new(
                FieldRef::parse("p/A", "f", "I").unwrap(),
                FieldAccessFlags::PUBLIC,
            ));
        let b = ClassDef::new(TypeRef::class("p/B"), ClassKind::Program)
            .with_super(TypeRef::class("p/A"))
            .with_method(method("p/B", "m", MethodAccessFlags::PUBLIC));
        let c = ClassDef::new(TypeRef::class("q/C"), ClassKind::Program)
            .with_super(TypeRef::class("p/B"))
            .with_method(method("q/C", "pp", MethodAccessFlags::PUBLIC));
        let mut builder = ProgramGraph::builder();
        for class in [iface, a, b, c] {
            builder.add_class(class).unwrap();
        }
        builder.build()
    }

    #[test]
    fn test_subtyping() {
        let program = program();
        let b = TypeRef::class("p/B");
        assert!(program.is_subtype(&b, &TypeRef::class("p/I")));
        assert!(program.is_subtype(&b, &TypeRef::object()));
        assert!(!program.is_subtype(&TypeRef::class("p/A"), &b));
        assert!(program.is_subtype(&b.array_of(), &TypeRef::class("p/A").array_of()));
        assert!(program.is_subtype(&TypeRef::int().array_of(), &TypeRef::object()));
        assert!(!program.is_strict_subtype(&b, &b));
        assert_eq!(
            program.all_subtypes(&TypeRef::class("p/A")),
            vec![TypeRef::class("p/B"), TypeRef::class("q/C")]
        );
    }

    #[test]
    fn test_resolution_walks_superclasses_and_defaults() {
        let program = program();
        let resolved = program
            .resolve_method(&MethodRef::parse("q/C", "m", "()V").unwrap())
            .single()
            .unwrap();
        assert_eq!(resolved.class.ty, TypeRef::class("p/B"));

        let default = program
            .resolve_method(&MethodRef::parse("p/B", "d", "()V").unwrap())
            .single()
            .unwrap();
        assert_eq!(default.class.ty, TypeRef::class("p/I"));

        assert!(matches!(
            program.resolve_method(&MethodRef::parse("p/B", "x", "()V").unwrap()),
            MethodResolution::NoSuchMethod
        ));
        assert!(matches!(
            program.resolve_method(&MethodRef::parse("z/Z", "x", "()V").unwrap()),
            MethodResolution::ClassNotFound(_)
        ));
    }

    #[test]
    fn test_field_resolution() {
        let program = program();
        let field = program
            .resolve_field(&FieldRef::parse("q/C", "f", "I").unwrap())
            .single()
            .unwrap();
        assert_eq!(field.class.ty, TypeRef::class("p/A"));
        assert!(program
            .resolve_field(&FieldRef::parse("q/C", "g", "I").unwrap())
            .single()
            .is_none());
    }

    #[test]
    fn test_package_private_is_not_overridden_across_packages() {
        let program = program();
        let resolved = program
            .resolve_method(&MethodRef::parse("p/A", "pp", "()V").unwrap())
            .single()
            .unwrap();
        let target = program
            .lookup_virtual_dispatch_target(resolved.method, &TypeRef::class("q/C"))
            .unwrap();
        assert_eq!(target.class.ty, TypeRef::class("p/A"));

        let m = program
            .resolve_method(&MethodRef::parse("p/A", "m", "()V").unwrap())
            .single()
            .unwrap();
        let target = program
            .lookup_virtual_dispatch_target(m.method, &TypeRef::class("q/C"))
            .unwrap();
        assert_eq!(target.class.ty, TypeRef::class("p/B"));
    }

    #[test]
    fn test_super_target() {
        let program = program();
        let target = program
            .lookup_super_target(
                &MethodRef::parse("p/B", "m", "()V").unwrap(),
                &TypeRef::class("p/B"),
            )
            .unwrap();
        assert_eq!(target.class.ty, TypeRef::class("p/A"));
    }
}

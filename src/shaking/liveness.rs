//! The result of the enqueuer.
//!
//! [`AppInfoWithLiveness`] is an immutable snapshot of what the enqueuer proved reachable.
//! Every collection is sorted, so two runs over the same input compare equal. Later stages
//! read it to decide what may be optimized, and [`AppInfoWithLiveness::prune`] turns it into
//! a smaller [`ProgramGraph`].

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    code::{CfCode, CfInstruction, ConstValue},
    program::{
        references::{FieldRef, MethodRef, Reference, TypeRef},
        ClassDef, ProgramGraph,
    },
    shaking::{
        missing::MissingReferences,
        policy::KeepInfo,
        worklist::Reason,
    },
};

/// Counters of one enqueuer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueuerStats {
    /// Tracing rounds
    pub rounds: usize,
    /// Method bodies traced
    pub traced_methods: usize,
    /// Worklist items processed
    pub processed_items: usize,
}

/// Liveness facts of a whole program.
#[derive(Debug, Clone, PartialEq)]
pub struct AppInfoWithLiveness {
    pub(crate) live_types: BTreeMap<TypeRef, Reason>,
    pub(crate) instantiated_types: BTreeSet<TypeRef>,
    pub(crate) referenced_types: BTreeSet<TypeRef>,
    pub(crate) live_methods: BTreeMap<MethodRef, Reason>,
    pub(crate) targeted_methods: BTreeSet<MethodRef>,
    pub(crate) virtual_targets: BTreeSet<MethodRef>,
    pub(crate) fields_read: BTreeSet<FieldRef>,
    pub(crate) fields_written: BTreeSet<FieldRef>,
    pub(crate) keep_info: BTreeMap<Reference, KeepInfo>,
    pub(crate) missing: MissingReferences,
    pub(crate) redispatches: Vec<(MethodRef, Reason)>,
    pub(crate) stats: EnqueuerStats,
}

/// A pruned program and what was removed from it.
#[derive(Debug, Clone)]
pub struct PruneResult {
    /// The program without dead definitions
    pub program: ProgramGraph,
    /// Removed program classes
    pub removed_classes: Vec<TypeRef>,
    /// Removed methods of surviving classes
    pub removed_methods: Vec<MethodRef>,
    /// Removed fields of surviving classes
    pub removed_fields: Vec<FieldRef>,
    /// Methods that are only call-site targets; their bodies became `throw null`
    pub stubbed_methods: Vec<MethodRef>,
}

impl AppInfoWithLiveness {
    /// Returns `true` if the program class `ty` is live.
    #[must_use]
    pub fn is_live_type(&self, ty: &TypeRef) -> bool {
        self.live_types.contains_key(ty)
    }

    /// Why `ty` is live.
    #[must_use]
    pub fn live_type_reason(&self, ty: &TypeRef) -> Option<&Reason> {
        self.live_types.get(ty)
    }

    /// Returns `true` if instances of `ty` may exist.
    #[must_use]
    pub fn is_instantiated(&self, ty: &TypeRef) -> bool {
        self.instantiated_types.contains(ty)
    }

    /// Returns `true` if `ty` is used anywhere in live code or signatures.
    #[must_use]
    pub fn is_referenced_type(&self, ty: &TypeRef) -> bool {
        self.referenced_types.contains(ty)
    }

    /// Returns `true` if the body of `method` may execute.
    #[must_use]
    pub fn is_live_method(&self, method: &MethodRef) -> bool {
        self.live_methods.contains_key(method)
    }

    /// Why `method` is live.
    #[must_use]
    pub fn live_method_reason(&self, method: &MethodRef) -> Option<&Reason> {
        self.live_methods.get(method)
    }

    /// Returns `true` if `method` is the resolution target of a live call site. Targeted
    /// methods keep their definition even when no receiver can reach their body.
    #[must_use]
    pub fn is_targeted_method(&self, method: &MethodRef) -> bool {
        self.targeted_methods.contains(method)
    }

    /// Returns `true` if `method` is the resolved target of a live virtual or interface call.
    #[must_use]
    pub fn is_virtual_target(&self, method: &MethodRef) -> bool {
        self.virtual_targets.contains(method)
    }

    /// Returns `true` if a live instruction reads `field`.
    #[must_use]
    pub fn is_field_read(&self, field: &FieldRef) -> bool {
        self.fields_read.contains(field)
    }

    /// Returns `true` if a live instruction writes `field`.
    #[must_use]
    pub fn is_field_written(&self, field: &FieldRef) -> bool {
        self.fields_written.contains(field)
    }

    /// Returns `true` if `item` is live.
    #[must_use]
    pub fn is_live(&self, item: &Reference) -> bool {
        match item {
            Reference::Type(ty) => self.is_live_type(ty),
            Reference::Method(method) => {
                self.is_live_method(method) || self.is_targeted_method(method)
            }
            Reference::Field(field) => self.is_field_read(field) || self.is_field_written(field),
        }
    }

    /// The keep info of `item`; bottom when no rule names it.
    #[must_use]
    pub fn keep_info(&self, item: &Reference) -> KeepInfo {
        self.keep_info.get(item).copied().unwrap_or_default()
    }

    /// Returns `true` if `item` must not be removed.
    #[must_use]
    pub fn is_pinned(&self, item: &Reference) -> bool {
        self.keep_info(item).pinned
    }

    /// Returns `true` if `item` may be optimized.
    #[must_use]
    pub fn allows_optimization(&self, item: &Reference) -> bool {
        self.keep_info(item).allow_optimization
    }

    /// Returns `true` if `item` may be renamed.
    #[must_use]
    pub fn allows_renaming(&self, item: &Reference) -> bool {
        self.keep_info(item).allow_renaming
    }

    /// Live program classes in type order.
    pub fn live_types(&self) -> impl Iterator<Item = &TypeRef> + '_ {
        self.live_types.keys()
    }

    /// Instantiated classes in type order.
    pub fn instantiated_types(&self) -> impl Iterator<Item = &TypeRef> + '_ {
        self.instantiated_types.iter()
    }

    /// Live methods in reference order.
    pub fn live_methods(&self) -> impl Iterator<Item = &MethodRef> + '_ {
        self.live_methods.keys()
    }

    /// Missing definitions found while tracing.
    #[must_use]
    pub fn missing(&self) -> &MissingReferences {
        &self.missing
    }

    /// Methods made live by a class instantiated after its call sites were traced.
    #[must_use]
    pub fn redispatches(&self) -> &[(MethodRef, Reason)] {
        &self.redispatches
    }

    /// Counters of the run.
    #[must_use]
    pub fn stats(&self) -> EnqueuerStats {
        self.stats
    }

    /// Returns `true` if `self` proves at least everything `other` proves live. Used to check
    /// that adding roots never shrinks the live set.
    #[must_use]
    pub fn contains(&self, other: &AppInfoWithLiveness) -> bool {
        other.live_types.keys().all(|ty| self.live_types.contains_key(ty))
            && other
                .live_methods
                .keys()
                .all(|method| self.live_methods.contains_key(method))
            && other.fields_read.is_subset(&self.fields_read)
            && other.fields_written.is_subset(&self.fields_written)
            && other.instantiated_types.is_subset(&self.instantiated_types)
    }

    /// Removes every program definition that is neither live nor pinned.
    ///
    /// Methods that are only resolution targets (their holder is never instantiated with
    /// them as dispatch result) keep their signature; a concrete body is replaced with
    /// `throw null`. Library and classpath classes are kept unchanged. Program fields nobody
    /// reads are marked dead on their shared optimization info, kept or not.
    #[must_use]
    pub fn prune(&self, program: &ProgramGraph) -> PruneResult {
        let mut builder = ProgramGraph::builder();
        let mut result = PruneResult {
            program: ProgramGraph::default(),
            removed_classes: Vec::new(),
            removed_methods: Vec::new(),
            removed_fields: Vec::new(),
            stubbed_methods: Vec::new(),
        };
        for class in program.classes() {
            if !class.is_program() {
                builder.replace_class(ClassDef::clone(class));
                continue;
            }
            let class_ref = Reference::Type(class.ty.clone());
            if !self.is_live_type(&class.ty) && !self.is_pinned(&class_ref) {
                result.removed_classes.push(class.ty.clone());
                continue;
            }
            builder.replace_class(self.prune_class(class, &mut result));
        }
        log::debug!(
            "Pruned {} classes, {} methods, {} fields; stubbed {} methods",
            result.removed_classes.len(),
            result.removed_methods.len(),
            result.removed_fields.len(),
            result.stubbed_methods.len()
        );
        result.program = builder.build();
        result
    }

    fn prune_class(&self, class: &ClassDef, result: &mut PruneResult) -> ClassDef {
        let mut pruned = ClassDef::clone(class);
        pruned.methods.clear();
        pruned.fields.clear();
        for method in &class.methods {
            let reference = &method.reference;
            let pinned = self.is_pinned(&Reference::Method(reference.clone()));
            if self.is_live_method(reference) || pinned {
                pruned.methods.push(method.clone());
            } else if self.is_targeted_method(reference) {
                let mut stub = method.clone();
                if stub.code.is_some() {
                    stub.code = Some(throw_null_body(stub.parameter_info().slot_count()).into());
                    result.stubbed_methods.push(reference.clone());
                }
                pruned.methods.push(stub);
            } else {
                result.removed_methods.push(reference.clone());
            }
        }
        for field in &class.fields {
            let reference = &field.reference;
            let item = Reference::Field(reference.clone());
            let read = self.is_field_read(reference);
            let pinned = self.is_pinned(&item);
            if !read && !pinned && self.allows_optimization(&item) {
                field.optimization_info.mark_dead();
            }
            if read || pinned || self.is_field_written(reference) {
                pruned.fields.push(field.clone());
            } else {
                result.removed_fields.push(reference.clone());
            }
        }
        pruned
    }
}

fn throw_null_body(argument_slots: usize) -> CfCode {
    CfCode::new(
        1,
        u16::try_from(argument_slots).unwrap_or(u16::MAX),
        vec![
            CfInstruction::Const(ConstValue::Null),
            CfInstruction::Throw,
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::ShrinkerOptions,
        shaking::{Enqueuer, RootSet},
        test::fixtures::dispatch_program,
    };

    fn dispatch_liveness() -> (ProgramGraph, AppInfoWithLiveness) {
        let program = dispatch_program();
        let policy = RootSet::new().keep_class_and_members(TypeRef::class("app/Main"));
        let liveness = Enqueuer::new(&program, &policy, &ShrinkerOptions::shrink_only())
            .run()
            .unwrap();
        (program, liveness)
    }

    #[test]
    fn test_dispatch_program_liveness() {
        let (_, liveness) = dispatch_liveness();
        let m = |holder: &str| MethodRef::parse(holder, "m", "()V").unwrap();
        assert!(liveness.is_live_method(&m("app/B")));
        assert!(liveness.is_live_method(&m("app/C")));
        // A.m is overridden in B and A itself is never instantiated.
        assert!(!liveness.is_live_method(&m("app/A")));
        assert!(liveness.is_targeted_method(&m("app/I")));
        assert!(liveness.is_live_type(&TypeRef::class("app/A")));
        assert!(!liveness.is_instantiated(&TypeRef::class("app/A")));
    }

    #[test]
    fn test_prune_removes_dead_members() {
        let (program, liveness) = dispatch_liveness();
        let pruned = liveness.prune(&program);
        let a_m = MethodRef::parse("app/A", "m", "()V").unwrap();
        assert!(pruned.removed_classes.is_empty());
        assert!(pruned.removed_methods.contains(&a_m));
        assert!(pruned.program.method_definition(&a_m).is_none());
        assert!(pruned
            .program
            .definition_for(&TypeRef::object())
            .is_some_and(|class| !class.is_program()));
    }

    #[test]
    fn test_root_monotonicity() {
        let program = dispatch_program();
        let options = ShrinkerOptions::shrink_only();
        let small = RootSet::new().keep_class_and_members(TypeRef::class("app/Main"));
        let large = small.clone().keep_class_and_members(TypeRef::class("app/A"));
        let small_live = Enqueuer::new(&program, &small, &options).compute();
        let large_live = Enqueuer::new(&program, &large, &options).compute();
        assert!(large_live.contains(&small_live));
        assert!(large_live.is_live_method(&MethodRef::parse("app/A", "m", "()V").unwrap()));
    }

    #[test]
    fn test_throw_null_body() {
        let body = throw_null_body(3);
        assert_eq!(body.max_locals, 3);
        assert!(matches!(body.instructions.last(), Some(CfInstruction::Throw)));
    }
}

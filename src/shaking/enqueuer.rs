//! The enqueuer: whole-program liveness as a worklist fixpoint.
//!
//! Starting from the roots named by the [`KeepPolicy`], the enqueuer marks classes, methods
//! and fields live until nothing changes. Each round has three steps:
//!
//! 1. Drain the worklist. Items only touch enqueuer state; no code is read.
//! 2. Trace every method that became live with a body, in parallel. Tracing only records the
//!    uses of a body ([`UseCollector`]) and never touches enqueuer state.
//! 3. Replay the recorded uses sequentially, in sorted method order, through a
//!    [`DefaultEnqueuerUseRegistry`]. This is the only place where traced code mutates the
//!    enqueuer, which keeps the result independent of thread scheduling.
//!
//! Virtual calls are handled by dispatching each resolved target on every instantiated
//! subtype. A class that becomes instantiated later dispatches all targets seen so far
//! ([`Reason::ClassInstantiated`]); no method is ever traced twice.
//!
//! # Examples
//!
//! ```rust,ignore
//! let policy = RootSet::new().keep_class_and_members(TypeRef::class("app/Main"));
//! let liveness = Enqueuer::new(&program, &policy, &options).run()?;
//! assert!(liveness.is_live_type(&TypeRef::class("app/Main")));
//! ```

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;

use crate::{
    code::MethodHandleRef,
    config::ShrinkerOptions,
    program::{
        references::{FieldRef, MethodRef, Name, Reference, TypeRef},
        ClassDef, FieldResolution, MethodResolution, ProgramGraph,
    },
    shaking::{
        liveness::{AppInfoWithLiveness, EnqueuerStats},
        missing::{DontWarn, MissingReferences},
        policy::{KeepInfo, KeepPolicy},
        registry::{
            register_method_handle_member, DefaultEnqueuerUseRegistry, TracedUse, UseCollector,
        },
        worklist::{Reason, WorkItem, Worklist},
    },
    Error, Result,
};

/// How an invoke instruction selects its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InvokeMode {
    Virtual,
    Interface,
    Direct,
    Static,
}

/// Whole-program liveness computation.
pub struct Enqueuer<'p> {
    program: &'p ProgramGraph,
    policy: &'p dyn KeepPolicy,
    parallel: bool,
    dont_warn: DontWarn,
    ignore_warnings: bool,

    worklist: Worklist,
    pending_trace: BTreeSet<MethodRef>,

    live_types: BTreeMap<TypeRef, Reason>,
    instantiated_types: BTreeSet<TypeRef>,
    referenced_types: BTreeSet<TypeRef>,
    live_methods: BTreeMap<MethodRef, Reason>,
    targeted_methods: BTreeSet<MethodRef>,
    virtual_targets: BTreeSet<MethodRef>,
    fields_read: BTreeSet<FieldRef>,
    fields_written: BTreeSet<FieldRef>,
    keep_info: BTreeMap<Reference, KeepInfo>,
    missing: MissingReferences,
    identifier_name_strings: BTreeSet<MethodRef>,

    rounds: usize,
    traced_methods: usize,
}

impl<'p> Enqueuer<'p> {
    /// Creates an enqueuer over `program` with the roots of `policy`.
    #[must_use]
    pub fn new(
        program: &'p ProgramGraph,
        policy: &'p dyn KeepPolicy,
        options: &ShrinkerOptions,
    ) -> Self {
        Enqueuer {
            program,
            policy,
            parallel: options.parallel,
            dont_warn: DontWarn::new(&options.dont_warn),
            ignore_warnings: options.ignore_warnings,
            worklist: Worklist::new(),
            pending_trace: BTreeSet::new(),
            live_types: BTreeMap::new(),
            instantiated_types: BTreeSet::new(),
            referenced_types: BTreeSet::new(),
            live_methods: BTreeMap::new(),
            targeted_methods: BTreeSet::new(),
            virtual_targets: BTreeSet::new(),
            fields_read: BTreeSet::new(),
            fields_written: BTreeSet::new(),
            keep_info: BTreeMap::new(),
            missing: MissingReferences::new(),
            identifier_name_strings: policy.identifier_name_string_targets(),
            rounds: 0,
            traced_methods: 0,
        }
    }

    /// Computes liveness and validates the result.
    ///
    /// # Errors
    ///
    /// - [`Error::CheckDiscardFailed`] if a definition the policy requires to be discarded
    ///   is live
    /// - [`Error::MissingDefinitions`] if references resolve to nothing and are not
    ///   suppressed by `dont_warn`, unless `ignore_warnings` is set
    pub fn run(self) -> Result<AppInfoWithLiveness> {
        let policy = self.policy;
        let dont_warn = self.dont_warn.clone();
        let ignore_warnings = self.ignore_warnings;
        let liveness = self.compute();

        let failed: Vec<String> = policy
            .check_discard()
            .iter()
            .filter(|item| liveness.is_live(item))
            .map(ToString::to_string)
            .collect();
        if !failed.is_empty() {
            return Err(Error::CheckDiscardFailed(failed.join(", ")));
        }

        let report = liveness.missing().report(&dont_warn);
        if let Some(error) = report.to_error() {
            if !ignore_warnings {
                return Err(error);
            }
            log::warn!(
                "Ignoring {} missing definitions ({} suppressed by dont_warn)",
                report.reported.len(),
                report.suppressed
            );
        }
        Ok(liveness)
    }

    /// Runs the fixpoint without validating the result.
    #[must_use]
    pub fn compute(mut self) -> AppInfoWithLiveness {
        self.seed_roots();
        loop {
            while let Some(item) = self.worklist.pop() {
                self.process(item);
            }
            if self.pending_trace.is_empty() {
                break;
            }
            self.rounds += 1;
            let batch: Vec<MethodRef> = std::mem::take(&mut self.pending_trace)
                .into_iter()
                .collect();
            let traced = self.collect_uses(&batch);
            self.traced_methods += batch.len();
            for (method, uses) in batch.into_iter().zip(traced) {
                let mut registry = DefaultEnqueuerUseRegistry::new(&mut self, method);
                for traced_use in &uses {
                    traced_use.replay(&mut registry);
                }
            }
        }
        log::debug!(
            "Enqueuer finished after {} rounds: {} live types, {} live methods, {} traced, {} missing",
            self.rounds,
            self.live_types.len(),
            self.live_methods.len(),
            self.traced_methods,
            self.missing.len()
        );
        self.into_liveness()
    }

    fn collect_uses(&self, batch: &[MethodRef]) -> Vec<Vec<TracedUse>> {
        let program = self.program;
        let trace = |method: &MethodRef| -> Vec<TracedUse> {
            let mut collector = UseCollector::default();
            if let Some(code) = program
                .method_definition(method)
                .and_then(|definition| definition.code.as_ref())
            {
                code.register_references(&mut collector, &method.holder);
            }
            collector.uses
        };
        if self.parallel {
            batch.par_iter().map(trace).collect()
        } else {
            batch.iter().map(trace).collect()
        }
    }

    fn into_liveness(self) -> AppInfoWithLiveness {
        let stats = EnqueuerStats {
            rounds: self.rounds,
            traced_methods: self.traced_methods,
            processed_items: self.worklist.processed(),
        };
        AppInfoWithLiveness {
            live_types: self.live_types,
            instantiated_types: self.instantiated_types,
            referenced_types: self.referenced_types,
            live_methods: self.live_methods,
            targeted_methods: self.targeted_methods,
            virtual_targets: self.virtual_targets,
            fields_read: self.fields_read,
            fields_written: self.fields_written,
            keep_info: self.keep_info,
            missing: self.missing,
            redispatches: self.worklist.redispatches().to_vec(),
            stats,
        }
    }

    // ==== Roots ====

    fn seed_roots(&mut self) {
        let program = self.program;
        let policy = self.policy;
        for class in program.program_classes() {
            let class_ref = Reference::Type(class.ty.clone());
            self.record_keep_info(&class_ref);
            if policy.is_kept_by_root(&class_ref) {
                self.worklist.push(WorkItem::ClassLive {
                    ty: class.ty.clone(),
                    reason: Reason::KeepRule,
                });
            }
            for method in &class.methods {
                let item = Reference::Method(method.reference.clone());
                self.record_keep_info(&item);
                if policy.is_kept_by_root(&item) && !policy.is_conditional_on_holder(&item) {
                    self.keep_method(class, &method.reference);
                }
            }
            for field in &class.fields {
                let item = Reference::Field(field.reference.clone());
                self.record_keep_info(&item);
                if policy.is_kept_by_root(&item) && !policy.is_conditional_on_holder(&item) {
                    self.keep_field(&field.reference);
                }
            }
        }
    }

    fn record_keep_info(&mut self, item: &Reference) {
        let info = self.policy.keep_info(item);
        if !info.is_bottom() {
            self.keep_info.insert(item.clone(), info);
        }
    }

    /// A kept method is live, reachable through virtual dispatch, and instantiates its holder
    /// when it is a constructor.
    fn keep_method(&mut self, class: &ClassDef, method: &MethodRef) {
        self.worklist.push(WorkItem::MethodLive {
            method: method.clone(),
            reason: Reason::KeepRule,
        });
        if method.is_instance_initializer() {
            self.worklist.push(WorkItem::Instantiated {
                ty: class.ty.clone(),
                reason: Reason::KeepRule,
            });
        } else if class
            .lookup_matching_method(method)
            .is_some_and(|definition| definition.is_virtual())
        {
            self.worklist.push(WorkItem::VirtualTarget {
                method: method.clone(),
                reason: Reason::KeepRule,
            });
        }
    }

    fn keep_field(&mut self, field: &FieldRef) {
        for read in [true, false] {
            self.worklist.push(WorkItem::FieldLive {
                field: field.clone(),
                read,
                reason: Reason::KeepRule,
            });
        }
    }

    // ==== Work items ====

    fn process(&mut self, item: WorkItem) {
        match item {
            WorkItem::ClassLive { ty, reason } => self.mark_class_live(&ty, reason),
            WorkItem::Instantiated { ty, reason } => self.mark_instantiated(&ty, reason),
            WorkItem::MethodLive { method, reason } => self.mark_method_live(&method, reason),
            WorkItem::VirtualTarget { method, reason } => {
                self.mark_virtual_target(&method, &reason);
            }
            WorkItem::FieldLive {
                field,
                read,
                reason,
            } => self.mark_field_live(&field, read, reason),
        }
    }

    fn mark_class_live(&mut self, ty: &TypeRef, reason: Reason) {
        if self.live_types.contains_key(ty) {
            return;
        }
        let program = self.program;
        let Some(class) = program.program_definition_for(ty) else {
            return;
        };
        self.live_types.insert(ty.clone(), reason);
        self.referenced_types.insert(ty.clone());

        let context = Reference::Type(ty.clone());
        for super_type in class.supertypes() {
            self.mark_type_referenced(super_type, &context, Reason::SupertypeOf(ty.clone()));
        }
        for annotation in &class.annotations {
            self.mark_type_referenced(&annotation.ty, &context, Reason::HolderLive(ty.clone()));
            for referenced in &annotation.referenced_types {
                self.mark_type_referenced(referenced, &context, Reason::HolderLive(ty.clone()));
            }
        }
        if let Some(initializer) = class.class_initializer() {
            self.worklist.push(WorkItem::MethodLive {
                method: initializer.reference.clone(),
                reason: Reason::HolderLive(ty.clone()),
            });
        }

        let policy = self.policy;
        for method in &class.methods {
            let item = Reference::Method(method.reference.clone());
            if policy.is_conditional_on_holder(&item) && policy.is_kept_by_root(&item) {
                self.keep_method(class, &method.reference);
            }
        }
        for field in &class.fields {
            let item = Reference::Field(field.reference.clone());
            if policy.is_conditional_on_holder(&item) && policy.is_kept_by_root(&item) {
                self.keep_field(&field.reference);
            }
        }
    }

    fn mark_instantiated(&mut self, ty: &TypeRef, reason: Reason) {
        let program = self.program;
        let Some(class) = program.program_definition_for(ty) else {
            return;
        };
        if class.is_interface() || !self.instantiated_types.insert(ty.clone()) {
            return;
        }
        self.mark_class_live(ty, reason);

        // Targets seen before this class became instantiated.
        let targets: Vec<MethodRef> = self
            .virtual_targets
            .iter()
            .filter(|target| program.is_subtype(ty, &target.holder))
            .cloned()
            .collect();
        for target in targets {
            if let Some(dispatched) = self.dispatch(&target, ty) {
                self.worklist.push(WorkItem::MethodLive {
                    method: dispatched,
                    reason: Reason::ClassInstantiated(ty.clone()),
                });
            }
        }

        // Overrides of library methods may be called by the library at any time.
        for super_type in program.all_supertypes(ty) {
            let Some(library) = program
                .definition_for(&super_type)
                .filter(|class| !class.is_program())
            else {
                continue;
            };
            for library_method in library.virtual_methods() {
                let Some(target) = program.lookup_virtual_dispatch_target(library_method, ty)
                else {
                    continue;
                };
                if target.class.is_program() {
                    self.worklist.push(WorkItem::MethodLive {
                        method: target.method.reference.clone(),
                        reason: Reason::LibraryOverride(library_method.reference.clone()),
                    });
                }
            }
        }
    }

    fn mark_method_live(&mut self, method: &MethodRef, reason: Reason) {
        if self.live_methods.contains_key(method) {
            return;
        }
        let program = self.program;
        let Some(class) = program.program_definition_for(&method.holder) else {
            return;
        };
        let Some(definition) = class.lookup_matching_method(method) else {
            return;
        };
        log::trace!("Live method {} ({})", method, reason);
        self.live_methods.insert(method.clone(), reason.clone());
        self.targeted_methods.insert(method.clone());
        self.worklist.push(WorkItem::ClassLive {
            ty: method.holder.clone(),
            reason,
        });

        let context = Reference::Method(method.clone());
        let signature_reason = Reason::HolderLive(method.holder.clone());
        self.mark_type_referenced(
            method.proto.return_type(),
            &context,
            signature_reason.clone(),
        );
        for parameter in method.proto.parameters() {
            self.mark_type_referenced(parameter, &context, signature_reason.clone());
        }
        for exception in &definition.exceptions {
            self.mark_type_referenced(exception, &context, signature_reason.clone());
        }
        for annotation in &definition.annotations {
            self.mark_type_referenced(&annotation.ty, &context, signature_reason.clone());
        }
        if definition.code.is_some() {
            self.pending_trace.insert(method.clone());
        }
    }

    fn mark_virtual_target(&mut self, method: &MethodRef, reason: &Reason) {
        if !self.virtual_targets.insert(method.clone()) {
            return;
        }
        let program = self.program;
        if program.program_definition_for(&method.holder).is_some() {
            self.targeted_methods.insert(method.clone());
        }
        let receivers: Vec<TypeRef> = self
            .instantiated_types
            .iter()
            .filter(|ty| program.is_subtype(ty, &method.holder))
            .cloned()
            .collect();
        for receiver in receivers {
            if let Some(dispatched) = self.dispatch(method, &receiver) {
                self.worklist.push(WorkItem::MethodLive {
                    method: dispatched,
                    reason: reason.clone(),
                });
            }
        }
    }

    /// The program method executed for a virtual call to `target` on an exact `receiver`.
    fn dispatch(&self, target: &MethodRef, receiver: &TypeRef) -> Option<MethodRef> {
        let program = self.program;
        let resolved = program.method_definition(target)?;
        let dispatched = program.lookup_virtual_dispatch_target(resolved, receiver)?;
        dispatched
            .class
            .is_program()
            .then(|| dispatched.method.reference.clone())
    }

    fn mark_field_live(&mut self, field: &FieldRef, read: bool, reason: Reason) {
        let newly_live = !self.fields_read.contains(field) && !self.fields_written.contains(field);
        let inserted = if read {
            self.fields_read.insert(field.clone())
        } else {
            self.fields_written.insert(field.clone())
        };
        if !inserted || !newly_live {
            return;
        }
        self.worklist.push(WorkItem::ClassLive {
            ty: field.holder.clone(),
            reason: reason.clone(),
        });
        let context = Reference::Field(field.clone());
        self.mark_type_referenced(&field.ty, &context, reason);
    }

    /// Marks the base type of `ty` referenced; program classes become live, undefined classes
    /// are recorded as missing.
    fn mark_type_referenced(&mut self, ty: &TypeRef, context: &Reference, reason: Reason) {
        let base = ty.base_type();
        if !base.is_class() {
            return;
        }
        match self.program.definition_for(&base) {
            None => {
                self.missing.record(Reference::Type(base), context);
            }
            Some(class) => {
                let is_program = class.is_program();
                self.referenced_types.insert(base.clone());
                if is_program && !self.live_types.contains_key(&base) {
                    self.worklist.push(WorkItem::ClassLive { ty: base, reason });
                }
            }
        }
    }

    // ==== Traced uses ====

    fn trace_invoke(&mut self, method: &MethodRef, context: &MethodRef, mode: InvokeMode) {
        let context_ref = Reference::Method(context.clone());
        let reason = Reason::ReferencedFrom(context.clone());
        self.mark_type_referenced(&method.holder, &context_ref, reason.clone());
        let program = self.program;
        let resolved = match program.resolve_method(method) {
            MethodResolution::Single(resolved) => resolved,
            MethodResolution::ClassNotFound(ty) => {
                self.missing.record(Reference::Type(ty), &context_ref);
                return;
            }
            MethodResolution::NoSuchMethod | MethodResolution::IncompatibleClassChange => {
                self.missing
                    .record(Reference::Method(method.clone()), &context_ref);
                return;
            }
        };
        let definition = resolved.method;
        if !resolved.class.is_program() {
            if matches!(mode, InvokeMode::Virtual | InvokeMode::Interface) {
                // Program overrides of library methods are handled on instantiation, but a
                // call through a library type still needs dispatch on program subtypes.
                self.worklist.push(WorkItem::VirtualTarget {
                    method: definition.reference.clone(),
                    reason: Reason::DispatchFrom(context.clone()),
                });
            }
            return;
        }
        let is_dispatch = matches!(mode, InvokeMode::Virtual | InvokeMode::Interface)
            && definition.is_virtual();
        if is_dispatch {
            self.worklist.push(WorkItem::VirtualTarget {
                method: definition.reference.clone(),
                reason: Reason::DispatchFrom(context.clone()),
            });
        } else {
            self.worklist.push(WorkItem::MethodLive {
                method: definition.reference.clone(),
                reason,
            });
        }
    }

    /// Traces an `invokevirtual` in `context`.
    pub fn trace_invoke_virtual(&mut self, method: &MethodRef, context: &MethodRef) {
        self.trace_invoke(method, context, InvokeMode::Virtual);
    }

    /// Traces an `invokeinterface` in `context`.
    pub fn trace_invoke_interface(&mut self, method: &MethodRef, context: &MethodRef) {
        self.trace_invoke(method, context, InvokeMode::Interface);
    }

    /// Traces a private or initializer `invokespecial` in `context`.
    pub fn trace_invoke_direct(&mut self, method: &MethodRef, context: &MethodRef) {
        self.trace_invoke(method, context, InvokeMode::Direct);
    }

    /// Traces an `invokestatic` in `context`.
    pub fn trace_invoke_static(&mut self, method: &MethodRef, context: &MethodRef) {
        self.trace_invoke(method, context, InvokeMode::Static);
    }

    /// Traces a super `invokespecial` in `context`.
    pub fn trace_invoke_super(&mut self, method: &MethodRef, context: &MethodRef) {
        let context_ref = Reference::Method(context.clone());
        self.mark_type_referenced(
            &method.holder,
            &context_ref,
            Reason::ReferencedFrom(context.clone()),
        );
        let program = self.program;
        match program.lookup_super_target(method, &context.holder) {
            Some(target) if target.class.is_program() => {
                self.worklist.push(WorkItem::MethodLive {
                    method: target.method.reference.clone(),
                    reason: Reason::DispatchFrom(context.clone()),
                });
            }
            Some(_) => {}
            None => match program.resolve_method(method) {
                MethodResolution::ClassNotFound(ty) => {
                    self.missing.record(Reference::Type(ty), &context_ref);
                }
                _ => {
                    self.missing
                        .record(Reference::Method(method.clone()), &context_ref);
                }
            },
        }
    }

    fn trace_field(&mut self, field: &FieldRef, context: &MethodRef, read: bool) {
        let context_ref = Reference::Method(context.clone());
        let reason = Reason::ReferencedFrom(context.clone());
        self.mark_type_referenced(&field.holder, &context_ref, reason.clone());
        let program = self.program;
        match program.resolve_field(field) {
            FieldResolution::Single(resolved) => {
                if resolved.class.is_program() {
                    self.worklist.push(WorkItem::FieldLive {
                        field: resolved.field.reference.clone(),
                        read,
                        reason,
                    });
                }
            }
            FieldResolution::ClassNotFound(ty) => {
                self.missing.record(Reference::Type(ty), &context_ref);
            }
            FieldResolution::NoSuchField => {
                self.missing
                    .record(Reference::Field(field.clone()), &context_ref);
            }
        }
    }

    /// Traces a `getfield` in `context`.
    pub fn trace_instance_field_read(&mut self, field: &FieldRef, context: &MethodRef) {
        self.trace_field(field, context, true);
    }

    /// Traces a `putfield` in `context`.
    pub fn trace_instance_field_write(&mut self, field: &FieldRef, context: &MethodRef) {
        self.trace_field(field, context, false);
    }

    /// Traces a `getstatic` in `context`.
    pub fn trace_static_field_read(&mut self, field: &FieldRef, context: &MethodRef) {
        self.trace_field(field, context, true);
    }

    /// Traces a `putstatic` in `context`.
    pub fn trace_static_field_write(&mut self, field: &FieldRef, context: &MethodRef) {
        self.trace_field(field, context, false);
    }

    /// Traces a `new` in `context`; the class becomes instantiated.
    pub fn trace_new_instance(&mut self, ty: &TypeRef, context: &MethodRef) {
        self.trace_type_reference(ty, context);
        if self.program.program_definition_for(ty).is_some() {
            self.worklist.push(WorkItem::Instantiated {
                ty: ty.clone(),
                reason: Reason::ReferencedFrom(context.clone()),
            });
        }
    }

    /// Traces a class literal in `context`.
    pub fn trace_const_class(&mut self, ty: &TypeRef, context: &MethodRef) {
        self.trace_type_reference(ty, context);
    }

    /// Traces a `checkcast` in `context`.
    pub fn trace_check_cast(&mut self, ty: &TypeRef, context: &MethodRef) {
        self.trace_type_reference(ty, context);
    }

    /// Traces an `instanceof` in `context`.
    pub fn trace_instance_of(&mut self, ty: &TypeRef, context: &MethodRef) {
        self.trace_type_reference(ty, context);
    }

    /// Traces a catch type in `context`.
    pub fn trace_exception_guard(&mut self, ty: &TypeRef, context: &MethodRef) {
        self.trace_type_reference(ty, context);
    }

    /// Traces a forced class initialization in `context`.
    pub fn trace_init_class(&mut self, ty: &TypeRef, context: &MethodRef) {
        self.trace_type_reference(ty, context);
    }

    /// Traces any other use of `ty` in `context`.
    pub fn trace_type_reference(&mut self, ty: &TypeRef, context: &MethodRef) {
        self.mark_type_referenced(
            ty,
            &Reference::Method(context.clone()),
            Reason::ReferencedFrom(context.clone()),
        );
    }

    /// Traces a method handle constant in `context`.
    pub fn trace_method_handle(&mut self, handle: &MethodHandleRef, context: &MethodRef) {
        let mut registry = DefaultEnqueuerUseRegistry::new(self, context.clone());
        register_method_handle_member(handle, &mut registry);
    }

    /// Traces a call to `method` with the constant string `value` in `context`. If `method`
    /// takes identifier name strings and `value` names a program class, the class is live.
    pub fn trace_invoke_with_constant_string(
        &mut self,
        method: &MethodRef,
        value: &Name,
        context: &MethodRef,
    ) {
        if !self.identifier_name_strings.contains(method) {
            return;
        }
        let name = value.as_str();
        if name.is_empty() || name.starts_with('[') || name.contains(';') {
            return;
        }
        let ty = if name.contains('/') {
            TypeRef::class(name)
        } else {
            TypeRef::from_java_name(name)
        };
        if self.program.program_definition_for(&ty).is_some() {
            log::debug!("{} names class {} in {}", method, ty, context);
            self.referenced_types.insert(ty.clone());
            self.worklist.push(WorkItem::ClassLive {
                ty,
                reason: Reason::ReflectiveName(value.clone()),
            });
        }
    }
}

//! Horizontal class merging.
//!
//! Sibling classes that nobody can tell apart at runtime are merged into one. A class is a
//! candidate when it is a live, concrete program class that
//!
//! - the keep rules allow to optimize, including every member;
//! - has no subclasses, no static initializer and no static fields;
//! - is never the subject of a type test, cast, class literal, array creation, catch clause,
//!   method handle or reflective name lookup;
//! - has exactly one constructor, which calls the no-argument constructor of its superclass.
//!
//! Candidates with the same superclass, interfaces, package and class-file version form a
//! group, provided their methods do not collide once merged, fields of the same name have
//! the same type, and the constructor parameter lists are prefixes of one another. The
//! first class of a group (in type order) becomes the *target*:
//!
//! ```text
//! class A { A(int x) {..} void a() }        class A {
//! class B { B() {..} void b() }        =>     A(int x, int id) { super(); switch (id) {
//!                                                 case 0: constructor$A(x); case 1: constructor$B(); } }
//!                                             private void constructor$A(int x) {..}
//!                                             private void constructor$B() {..}
//!                                             void a()  void b() }
//! ```
//!
//! The published lens layer maps every merged type to the target and every constructor to
//! the entry point, appending the class id (and zero values for parameters the constructor
//! did not have) to each call.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::{
    code::{
        constant::{HandleMember, MethodHandleRef},
        ConstValue,
    },
    compiler::{CompilerContext, EventKind, IrPass, MethodBody},
    config::ClassFileVersion,
    ir::{entry_point_proto, moved_constructor_name, ConstructorEntryPoint, IrCode, IrEmitter, IrOp},
    lens::LensLayer,
    program::{
        descriptor::ValueKind,
        flags::MethodAccessFlags,
        references::{MethodRef, MethodSignature, Name, Reference, TypeRef},
        ClassDef, MethodDef, ProgramGraph,
    },
    shaking::UseRegistry,
    Error, Result,
};

// ============================================================================
// Observed types
// ============================================================================

/// Types whose identity is observable: merging them would change the program's behavior.
#[derive(Debug, Default)]
struct ObservedTypes {
    types: BTreeSet<TypeRef>,
}

impl ObservedTypes {
    fn observe(&mut self, ty: &TypeRef) {
        let base = ty.base_type();
        if base.is_class() {
            self.types.insert(base);
        }
    }

    fn contains(&self, ty: &TypeRef) -> bool {
        self.types.contains(ty)
    }
}

impl UseRegistry for ObservedTypes {
    fn register_const_class(&mut self, ty: &TypeRef) {
        self.observe(ty);
    }

    fn register_check_cast(&mut self, ty: &TypeRef) {
        self.observe(ty);
    }

    fn register_instance_of(&mut self, ty: &TypeRef) {
        self.observe(ty);
    }

    fn register_type_reference(&mut self, ty: &TypeRef) {
        self.observe(ty);
    }

    fn register_method_handle(&mut self, handle: &MethodHandleRef) {
        match &handle.member {
            HandleMember::Method(method) => self.observe(&method.holder),
            HandleMember::Field(field) => self.observe(&field.holder),
        }
    }

    fn register_invoke_with_constant_string(&mut self, _method: &MethodRef, value: &Name) {
        let name = value.as_str();
        if !name.is_empty() && !name.contains(['(', ';', '[']) {
            self.observe(&TypeRef::class(&name.replace('.', "/")));
        }
    }
}

// ============================================================================
// Candidates and groups
// ============================================================================

/// A class that may be merged, with its constructor prepared for moving.
#[derive(Debug, Clone)]
struct Candidate {
    class: ClassDef,
    constructor: MethodRef,
    /// The constructor body without its superclass constructor call
    body: IrCode,
    super_constructor: MethodRef,
}

/// Classes merged into their first member.
#[derive(Debug, Clone)]
struct MergeGroup {
    members: Vec<Candidate>,
}

impl MergeGroup {
    fn target(&self) -> &TypeRef {
        &self.members[0].class.ty
    }

    fn types(&self) -> Vec<TypeRef> {
        self.members.iter().map(|m| m.class.ty.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    super_type: TypeRef,
    interfaces: Vec<TypeRef>,
    package: String,
    version: ClassFileVersion,
}

/// A lens layer mapping `types` onto `target`, used to compare members as if merged.
fn trial_layer(types: &[TypeRef], target: &TypeRef) -> Result<LensLayer> {
    let mut builder = LensLayer::builder("merge-trial");
    for ty in types {
        if ty != target {
            builder.map_type(ty.clone(), target.clone());
        }
    }
    builder.build()
}

fn is_prefix(shorter: &[TypeRef], longer: &[TypeRef]) -> bool {
    longer.starts_with(shorter)
}

/// The zero value passed for a parameter a constructor did not have.
fn zero_value(ty: &TypeRef) -> ConstValue {
    match ty.kind() {
        ValueKind::Long => ConstValue::Long(0),
        ValueKind::Float => ConstValue::float(0.0),
        ValueKind::Double => ConstValue::double(0.0),
        ValueKind::Reference | ValueKind::Void => ConstValue::Null,
        ValueKind::Int => ConstValue::Int(0),
    }
}

/// A class definition with every reference mapped through `layer`.
fn map_class(class: &ClassDef, layer: &LensLayer) -> ClassDef {
    let mut mapped = class.clone();
    mapped.ty = layer.lookup_type(&class.ty);
    mapped.super_type = class.super_type.as_ref().map(|t| layer.lookup_type(t));
    mapped.interfaces = class
        .interfaces
        .iter()
        .map(|t| layer.lookup_type(t))
        .collect();
    for field in &mut mapped.fields {
        field.reference = layer.lookup_field(&field.reference);
    }
    for method in &mut mapped.methods {
        method.reference = layer.lookup_method_reference(&method.reference);
    }
    mapped
}

// ============================================================================
// The pass
// ============================================================================

/// Horizontal class merging, a global pass.
#[derive(Debug, Default)]
pub struct ClassMergingPass;

impl ClassMergingPass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        ClassMergingPass
    }

    fn observed_types(ctx: &CompilerContext) -> Result<ObservedTypes> {
        let mut observed = ObservedTypes::default();
        for method in ctx.methods() {
            let Some(body) = ctx.bodies.get(&method).map(|e| e.value().clone()) else {
                continue;
            };
            match body {
                MethodBody::Cf(code) => code.register_references(&mut observed, &method.holder),
                MethodBody::Ir(ir) => IrEmitter::new(&ir)
                    .emit()?
                    .register_references(&mut observed, &method.holder),
            }
        }
        Ok(observed)
    }

    /// Checks `class` and prepares its constructor. `Ok(None)` if it cannot be merged.
    fn candidate(
        ctx: &CompilerContext,
        program: &ProgramGraph,
        class: &ClassDef,
        observed: &ObservedTypes,
    ) -> Result<Option<Candidate>> {
        let liveness = ctx.liveness();
        let type_ref = Reference::Type(class.ty.clone());
        let Some(super_type) = class.super_type.clone() else {
            return Ok(None);
        };
        let members_optimizable = class
            .methods
            .iter()
            .map(|m| Reference::Method(m.reference.clone()))
            .chain(class.fields.iter().map(|f| Reference::Field(f.reference.clone())))
            .all(|r| liveness.allows_optimization(&r) && !liveness.is_pinned(&r));
        if !class.is_program()
            || class.is_abstract()
            || !liveness.is_live_type(&class.ty)
            || !liveness.allows_optimization(&type_ref)
            || liveness.is_pinned(&type_ref)
            || !members_optimizable
            || !program.direct_subtypes(&class.ty).is_empty()
            || class.class_initializer().is_some()
            || class.fields.iter().any(|f| f.is_static())
            || observed.contains(&class.ty)
        {
            return Ok(None);
        }

        let mut constructors = class.instance_initializers();
        let (Some(constructor), None) = (constructors.next(), constructors.next()) else {
            return Ok(None);
        };
        let constructor = constructor.reference.clone();
        let Some(mut body) = ctx.ir_snapshot(&constructor)? else {
            return Ok(None);
        };
        let Some(receiver) = body.arguments().first().copied() else {
            return Ok(None);
        };

        // Exactly one constructor call on the receiver: the superclass' no-argument one.
        let mut receiver_inits = Vec::new();
        for (b, block) in body.blocks().iter().enumerate() {
            for (index, instruction) in block.instructions.iter().enumerate() {
                if let IrOp::Invoke {
                    method, arguments, ..
                } = &instruction.op
                {
                    if method.is_instance_initializer() && arguments.first() == Some(&receiver) {
                        receiver_inits.push((b, index, method.clone(), arguments.len()));
                    }
                }
            }
        }
        let [(block, index, super_constructor, 1)] = receiver_inits.as_slice() else {
            return Ok(None);
        };
        if super_constructor.holder != super_type
            || program.resolve_method(super_constructor).single().is_none()
        {
            return Ok(None);
        }
        let super_constructor = super_constructor.clone();
        let (block, index) = (*block, *index);
        body.blocks_mut()[block].instructions.remove(index);

        Ok(Some(Candidate {
            class: class.clone(),
            constructor,
            body,
            super_constructor,
        }))
    }

    /// Returns `true` if `candidate` can join `group`.
    fn compatible(group: &MergeGroup, candidate: &Candidate) -> Result<bool> {
        let mut types = group.types();
        types.push(candidate.class.ty.clone());
        let trial = trial_layer(&types, group.target())?;

        let signatures = |class: &ClassDef| -> BTreeSet<MethodSignature> {
            class
                .methods
                .iter()
                .filter(|m| !m.is_instance_initializer())
                .map(|m| trial.lookup_method_reference(&m.reference).signature())
                .collect()
        };
        let mut taken: BTreeSet<MethodSignature> = BTreeSet::new();
        let mut fields: BTreeMap<Name, TypeRef> = BTreeMap::new();
        for member in &group.members {
            taken.extend(signatures(&member.class));
            for field in &member.class.fields {
                let mapped = trial.lookup_field(&field.reference);
                fields.insert(mapped.name.clone(), mapped.ty.clone());
            }
        }
        if !signatures(&candidate.class).is_disjoint(&taken) {
            return Ok(false);
        }
        for field in &candidate.class.fields {
            let mapped = trial.lookup_field(&field.reference);
            if fields.get(&mapped.name).is_some_and(|ty| *ty != mapped.ty) {
                return Ok(false);
            }
        }

        let parameters = |m: &MethodRef| trial.lookup_method_reference(m).proto.parameters().to_vec();
        let new = parameters(&candidate.constructor);
        let same_super = group
            .members
            .iter()
            .all(|m| m.super_constructor == candidate.super_constructor);
        let chained = group.members.iter().all(|m| {
            let existing = parameters(&m.constructor);
            is_prefix(&existing, &new) || is_prefix(&new, &existing)
        });
        Ok(same_super && chained)
    }

    fn find_groups(ctx: &CompilerContext, program: &ProgramGraph) -> Result<Vec<MergeGroup>> {
        let observed = Self::observed_types(ctx)?;
        let mut buckets: BTreeMap<GroupKey, Vec<Candidate>> = BTreeMap::new();
        for class in program.program_classes() {
            let Some(candidate) = Self::candidate(ctx, program, class, &observed)? else {
                continue;
            };
            let mut interfaces = class.interfaces.clone();
            interfaces.sort();
            let key = GroupKey {
                super_type: candidate.super_constructor.holder.clone(),
                interfaces,
                package: class.ty.package_name().to_string(),
                version: class.version,
            };
            buckets.entry(key).or_default().push(candidate);
        }

        let mut groups = Vec::new();
        for candidates in buckets.into_values() {
            let mut bucket_groups: Vec<MergeGroup> = Vec::new();
            'candidates: for candidate in candidates {
                for group in &mut bucket_groups {
                    if Self::compatible(group, &candidate)? {
                        group.members.push(candidate);
                        continue 'candidates;
                    }
                }
                bucket_groups.push(MergeGroup {
                    members: vec![candidate],
                });
            }
            groups.extend(bucket_groups.into_iter().filter(|g| g.members.len() > 1));
        }
        Ok(groups)
    }

    /// Merges `groups`. Returns the number of classes merged away.
    fn merge(ctx: &CompilerContext, program: &ProgramGraph, groups: Vec<MergeGroup>) -> Result<usize> {
        let all_types: Vec<(TypeRef, TypeRef)> = groups
            .iter()
            .flat_map(|g| g.types().into_iter().map(|t| (t, g.target().clone())))
            .collect();
        let mut builder = LensLayer::builder("horizontal-class-merging");
        for (ty, target) in &all_types {
            if ty != target {
                builder.map_type(ty.clone(), target.clone());
            }
        }
        let types_only = {
            let mut trial = LensLayer::builder("merge-types");
            for (ty, target) in &all_types {
                if ty != target {
                    trial.map_type(ty.clone(), target.clone());
                }
            }
            trial.build()?
        };

        let mut merged_classes: Vec<ClassDef> = Vec::new();
        let mut removed: BTreeSet<TypeRef> = BTreeSet::new();
        let mut entry_points = Vec::new();
        let mut moved_bodies = Vec::new();
        let mut merged = 0;

        for group in groups {
            let target = group.target().clone();
            let longest: Vec<TypeRef> = group
                .members
                .iter()
                .map(|m| {
                    types_only
                        .lookup_method_reference(&m.constructor)
                        .proto
                        .parameters()
                        .to_vec()
                })
                .max_by_key(Vec::len)
                .unwrap_or_default();
            let entry = MethodRef::new(target.clone(), "<init>", entry_point_proto(&longest));

            let mut class = group.members[0].class.clone();
            class.methods.retain(|m| !m.is_instance_initializer());
            let mut field_names: BTreeSet<Name> =
                class.fields.iter().map(|f| f.reference.name.clone()).collect();
            let mut targets = Vec::with_capacity(group.members.len());

            for (id, member) in group.members.iter().enumerate() {
                let moved = MethodRef::new(
                    target.clone(),
                    &moved_constructor_name(&member.class.ty),
                    member.constructor.proto.clone(),
                );
                targets.push(types_only.lookup_method_reference(&moved));

                let arity = member.constructor.arity();
                let mut extra: Vec<ConstValue> = longest.iter().skip(arity).map(zero_value).collect();
                extra.push(ConstValue::Int(id as i32));
                builder
                    .map_method(member.constructor.clone(), entry.clone())
                    .add_extra_arguments(member.constructor.clone(), extra);

                let mut body = member.body.clone();
                body.set_method(moved.clone());
                moved_bodies.push((member.constructor.clone(), body));
                class.methods.push(MethodDef::new(
                    moved,
                    MethodAccessFlags::PRIVATE | MethodAccessFlags::SYNTHETIC,
                ));

                if id > 0 {
                    for method in &member.class.methods {
                        if !method.is_instance_initializer() {
                            let mut method = method.clone();
                            method.reference = method.reference.with_holder(target.clone());
                            class.methods.push(method);
                        }
                    }
                    for field in &member.class.fields {
                        if field_names.insert(field.reference.name.clone()) {
                            let mut field = field.clone();
                            field.reference = field.reference.with_holder(target.clone());
                            class.fields.push(field);
                        }
                    }
                    removed.insert(member.class.ty.clone());
                    merged += 1;
                    ctx.events
                        .record(EventKind::ClassMerged)
                        .pass("class-merging")
                        .message(format!("{} merged into {target}", member.class.ty));
                }
            }

            let super_constructor = types_only
                .lookup_method_reference(&group.members[0].super_constructor);
            let synthetic = ConstructorEntryPoint::new(entry.clone(), targets)?
                .with_super_constructor(super_constructor)
                .synthesize(class.version, ctx.options().keep_stack_map_for_v50)?;
            let ir = synthetic
                .ir
                .ok_or_else(|| Error::IrError(format!("{entry}: entry point without IR")))?;
            class.methods.push(synthetic.definition);
            entry_points.push(ir);
            ctx.events
                .record(EventKind::EntryPointSynthesized)
                .method(&entry)
                .pass("class-merging");
            merged_classes.push(class);
        }
        let layer = builder.build()?;

        // The program after merging, every definition seen through the new layer.
        let mut replacements: BTreeMap<TypeRef, ClassDef> = merged_classes
            .into_iter()
            .map(|c| (c.ty.clone(), c))
            .collect();
        let mut next = program.to_builder();
        for ty in &removed {
            next.remove_class(ty);
        }
        for class in program.program_classes() {
            if removed.contains(&class.ty) {
                continue;
            }
            let source = replacements.remove(&class.ty);
            let mapped = map_class(source.as_ref().unwrap_or(class.as_ref()), &layer);
            if source.is_some() || !same_shape(class, &mapped) {
                next.replace_class(mapped);
            }
        }

        // Bodies are rewritten against the old program, then the new one is installed.
        for (constructor, body) in moved_bodies {
            ctx.bodies.remove(&constructor);
            ctx.processed_methods.remove(&constructor);
            ctx.method_info.remove(&constructor);
            ctx.put_ir(body);
        }
        let depth = ctx.lens()?.depth();
        let lens = ctx.extend_lens(layer)?;
        let rewritten = ctx.rewrite_bodies(&lens.since(depth))?;
        ctx.set_program(Arc::new(next.build()))?;
        for ir in entry_points {
            ctx.processed_methods.insert(ir.method().clone());
            ctx.put_ir(ir);
        }
        log::debug!("Class merging: {merged} classes merged, {rewritten} bodies rewritten");
        Ok(merged)
    }
}

/// Returns `true` if mapping changed no reference of `class`.
fn same_shape(class: &ClassDef, mapped: &ClassDef) -> bool {
    class.ty == mapped.ty
        && class.super_type == mapped.super_type
        && class.interfaces == mapped.interfaces
        && class
            .fields
            .iter()
            .zip(&mapped.fields)
            .all(|(a, b)| a.reference == b.reference)
        && class
            .methods
            .iter()
            .zip(&mapped.methods)
            .all(|(a, b)| a.reference == b.reference)
}

impl IrPass for ClassMergingPass {
    fn name(&self) -> &'static str {
        "class-merging"
    }

    fn description(&self) -> &'static str {
        "Merges sibling classes that cannot be told apart at runtime"
    }

    fn is_global(&self) -> bool {
        true
    }

    fn run_global(&self, ctx: &CompilerContext) -> Result<bool> {
        if !ctx.options().enable_class_merging {
            return Ok(false);
        }
        let program = ctx.program()?;
        let groups = Self::find_groups(ctx, &program)?;
        if groups.is_empty() {
            return Ok(false);
        }
        log::debug!(
            "Class merging: {} groups, largest has {} classes",
            groups.len(),
            groups.iter().map(|g| g.members.len()).max().unwrap_or(0)
        );
        Ok(Self::merge(ctx, &program, groups)? > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        code::{instruction::InvokeKind, CfInstruction},
        config::ShrinkerOptions,
        program::flags::FieldAccessFlags,
        program::FieldDef,
        test::fixtures::{
            class, constructor, context_for, empty_virtual, instantiate, invoke, main_method,
            program_of,
        },
    };

    fn siblings(extra_main: Vec<CfInstruction>) -> ProgramGraph {
        let mut body = instantiate("app/A");
        body.push(invoke(InvokeKind::Virtual, "app/A", "a", "()V"));
        body.extend(instantiate("app/B"));
        body.push(invoke(InvokeKind::Virtual, "app/B", "b", "()V"));
        body.extend(extra_main);
        body.push(CfInstruction::Return(None));
        program_of(vec![
            class("app/Main").with_method(main_method(body)),
            class("app/A")
                .with_field(FieldDef::new(
                    crate::program::references::FieldRef::parse("app/A", "x", "I").unwrap(),
                    FieldAccessFlags::PRIVATE,
                ))
                .with_method(constructor("app/A", "java/lang/Object"))
                .with_method(empty_virtual("app/A", "a")),
            class("app/B")
                .with_method(constructor("app/B", "java/lang/Object"))
                .with_method(empty_virtual("app/B", "b")),
        ])
    }

    #[test]
    fn test_siblings_are_merged() {
        let ctx = context_for(siblings(Vec::new()), ShrinkerOptions::default());
        assert!(ClassMergingPass::new().run_global(&ctx).unwrap());
        assert_eq!(ctx.events.count_kind(EventKind::ClassMerged), 1);
        assert_eq!(ctx.events.count_kind(EventKind::EntryPointSynthesized), 1);

        let program = ctx.program().unwrap();
        assert!(program.definition_for(&TypeRef::class("app/B")).is_none());
        let a = program.definition_for(&TypeRef::class("app/A")).unwrap();
        let names: BTreeSet<&str> = a.methods.iter().map(|m| m.reference.name.as_str()).collect();
        assert_eq!(
            names,
            BTreeSet::from(["<init>", "a", "b", "constructor$A", "constructor$B"])
        );
        assert!(a.lookup_field(&crate::program::references::FieldRef::parse("app/A", "x", "I").unwrap()).is_some());

        let lens = ctx.lens().unwrap();
        assert_eq!(lens.lookup_type(&TypeRef::class("app/B")), TypeRef::class("app/A"));

        let main = MethodRef::parse("app/Main", "main", "([Ljava/lang/String;)V").unwrap();
        let code = ctx.ir_snapshot(&main).unwrap().unwrap();
        let entry = MethodRef::parse("app/A", "<init>", "(I)V").unwrap();
        let calls: Vec<&IrOp> = code
            .instructions()
            .map(|(_, i)| &i.op)
            .filter(|op| matches!(op, IrOp::Invoke { method, .. } if *method == entry))
            .collect();
        assert_eq!(calls.len(), 2);
        assert!(!code.instructions().any(|(_, i)| matches!(&i.op, IrOp::NewInstance(t) if *t == TypeRef::class("app/B"))));

        let moved = MethodRef::parse("app/A", "constructor$B", "()V").unwrap();
        let body = ctx.ir_snapshot(&moved).unwrap().unwrap();
        assert!(!body.instructions().any(|(_, i)| matches!(i.op, IrOp::Invoke { .. })));
        assert!(ctx.ir_snapshot(&entry).unwrap().is_some());
    }

    #[test]
    fn test_type_test_prevents_merging() {
        let extra = vec![
            CfInstruction::InstanceOf(TypeRef::class("app/B")),
            CfInstruction::Stack(crate::code::instruction::StackOp::Pop),
        ];
        let ctx = context_for(siblings(extra), ShrinkerOptions::default());
        assert!(!ClassMergingPass::new().run_global(&ctx).unwrap());
        assert!(ctx.lens().unwrap().is_identity());
    }

    #[test]
    fn test_disabled() {
        let options = ShrinkerOptions::default().with_class_merging(false);
        let ctx = context_for(siblings(Vec::new()), options);
        assert!(!ClassMergingPass::new().run_global(&ctx).unwrap());
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(zero_value(&TypeRef::int()), ConstValue::Int(0));
        assert_eq!(zero_value(&TypeRef::long()), ConstValue::Long(0));
        assert_eq!(zero_value(&TypeRef::string()), ConstValue::Null);
    }
}

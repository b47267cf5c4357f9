//! Field access facts and dead field stores.
//!
//! [`IrPass::initialize`] scans every body and publishes on the shared
//! [`FieldOptimizationInfo`] of each program field:
//!
//! - the read bits, the bits of the value some reader observes (a plain read observes every
//!   bit of the field's width);
//! - the abstract value, the join of every stored value, once some body stores to the field;
//! - `IS_DEAD` for fields nobody reads and no keep rule pins.
//!
//! [`IrPass::run_on_method`] then drops the stores to dead fields. A store to a static field
//! of a class the method may not have initialized becomes an `InitClass` of that class, and
//! a store through a receiver that may be `null` leaves a `getClass()` call behind. With its
//! stores gone the next tree-shaking round removes the field.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::{
    code::{
        constant::{HandleMember, MethodHandleRef},
        instruction::InvokeKind,
        ConstValue,
    },
    compiler::{CompilerContext, EventKind, IrPass},
    ir::{IrCode, IrInstruction, IrOp, ValueId},
    program::{
        optinfo::AbstractValue,
        references::{FieldRef, MethodRef, ProtoRef, Reference, TypeRef},
        ProgramGraph,
    },
    Error, Result,
};

/// Reads and stores of a set of bodies, keyed by the resolved field.
#[derive(Debug, Default)]
struct FieldAccesses {
    reads: HashMap<FieldRef, u64>,
    writes: HashMap<FieldRef, AbstractValue>,
}

impl FieldAccesses {
    fn read(&mut self, field: FieldRef, bits: u64) {
        *self.reads.entry(field).or_default() |= bits;
    }

    fn write(&mut self, field: FieldRef, value: &AbstractValue) {
        let joined = self.writes.entry(field).or_default();
        *joined = joined.join(value);
    }

    fn merge(mut self, other: FieldAccesses) -> FieldAccesses {
        for (field, bits) in other.reads {
            self.read(field, bits);
        }
        for (field, value) in other.writes {
            self.write(field, &value);
        }
        self
    }
}

/// The bits a plain read of a field of type `ty` observes.
fn read_mask(ty: &TypeRef) -> u64 {
    match ty.descriptor() {
        "Z" => 0x1,
        "B" => 0xFF,
        "C" | "S" => 0xFFFF,
        "I" | "F" => 0xFFFF_FFFF,
        _ => u64::MAX,
    }
}

fn abstract_value_of(constant: Option<&ConstValue>) -> AbstractValue {
    match constant {
        Some(ConstValue::Int(n)) => AbstractValue::SingleNumber(i64::from(*n)),
        Some(ConstValue::Long(n)) => AbstractValue::SingleNumber(*n),
        Some(ConstValue::Null) => AbstractValue::Null,
        Some(ConstValue::String(s)) => AbstractValue::SingleString(s.clone()),
        _ => AbstractValue::Unknown,
    }
}

/// Field access analysis and dead store removal.
#[derive(Debug, Default)]
pub struct FieldAccessPass;

impl FieldAccessPass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        FieldAccessPass
    }

    fn object_get_class() -> Result<MethodRef> {
        Ok(MethodRef::new(
            TypeRef::object(),
            "getClass",
            ProtoRef::parse("()Ljava/lang/Class;")?,
        ))
    }

    fn resolve(program: &ProgramGraph, field: &FieldRef) -> Option<FieldRef> {
        program
            .resolve_field(field)
            .single()
            .map(|resolved| resolved.field.reference.clone())
    }

    fn scan(code: &IrCode, program: &ProgramGraph) -> FieldAccesses {
        let constants: HashMap<ValueId, &ConstValue> = code
            .blocks()
            .iter()
            .flat_map(|block| block.instructions.iter())
            .filter_map(|instruction| match (&instruction.op, instruction.out) {
                (IrOp::Const(constant), Some(out)) => Some((out, constant)),
                _ => None,
            })
            .collect();

        let mut accesses = FieldAccesses::default();
        for instruction in code.blocks().iter().flat_map(|b| b.instructions.iter()) {
            match &instruction.op {
                IrOp::StaticGet(field) | IrOp::InstanceGet { field, .. } => {
                    if let Some(resolved) = Self::resolve(program, field) {
                        accesses.read(resolved, read_mask(&field.ty));
                    }
                }
                IrOp::StaticPut { field, value } | IrOp::InstancePut { field, value, .. } => {
                    if let Some(resolved) = Self::resolve(program, field) {
                        let stored = abstract_value_of(constants.get(value).copied());
                        accesses.write(resolved, &stored);
                    }
                }
                // A field handle can read the field.
                IrOp::Const(ConstValue::MethodHandle(MethodHandleRef {
                    member: HandleMember::Field(field),
                    ..
                })) => {
                    if let Some(resolved) = Self::resolve(program, field) {
                        accesses.read(resolved, u64::MAX);
                    }
                }
                _ => {}
            }
        }
        accesses
    }

    /// Publishes `accesses` on the fields of `program`. Returns the number of fields newly
    /// marked dead.
    fn publish(
        ctx: &CompilerContext,
        program: &ProgramGraph,
        accesses: &FieldAccesses,
    ) -> Result<usize> {
        let lens = ctx.lens()?;
        let liveness = ctx.liveness();
        let mut dead = 0;
        for class in program.program_classes() {
            for field in &class.fields {
                let info = &field.optimization_info;
                let bits = accesses.reads.get(&field.reference).copied().unwrap_or(0);
                info.join_read_bits(bits);
                if let Some(value) = accesses.writes.get(&field.reference) {
                    info.set_abstract_value(value.clone());
                }

                let original = Reference::Field(lens.original_field(&field.reference));
                if info.read_bits() == 0
                    && liveness.allows_optimization(&original)
                    && !liveness.is_pinned(&original)
                    && info.mark_dead()
                {
                    log::trace!("{}: never read", field.reference);
                    dead += 1;
                }
            }
        }
        Ok(dead)
    }

    /// The instructions replacing a store of `method` to the dead static field `field`, or
    /// `None` if the store has to stay.
    fn static_store_replacement(
        program: &ProgramGraph,
        method: &MethodRef,
        field: &FieldRef,
    ) -> Option<Vec<IrInstruction>> {
        let holder = program.resolve_field(field).single()?.class;
        if holder.class_initializer().is_none()
            || (!holder.is_interface() && program.is_subtype(&method.holder, &holder.ty))
        {
            return Some(Vec::new());
        }
        holder
            .class_init_field()
            .map(|init| vec![IrInstruction::new(IrOp::InitClass(init.reference.clone()))])
    }
}

impl IrPass for FieldAccessPass {
    fn name(&self) -> &'static str {
        "field-access"
    }

    fn description(&self) -> &'static str {
        "Publishes field read and write facts and removes stores to fields nobody reads"
    }

    fn should_run(&self, _method: &MethodRef, ctx: &CompilerContext) -> bool {
        ctx.options().enable_field_optimization
    }

    fn initialize(&mut self, ctx: &CompilerContext) -> Result<()> {
        if !ctx.options().enable_field_optimization {
            return Ok(());
        }
        let program = ctx.program()?;
        let methods = ctx.methods();
        let scan_one = |method: &MethodRef| -> Result<FieldAccesses> {
            Ok(ctx
                .ir_snapshot(method)?
                .map(|code| Self::scan(&code, &program))
                .unwrap_or_default())
        };
        let accesses = if ctx.options().parallel {
            methods
                .par_iter()
                .map(scan_one)
                .try_reduce(FieldAccesses::default, |a, b| Ok(a.merge(b)))?
        } else {
            methods
                .iter()
                .try_fold(FieldAccesses::default(), |a, method| {
                    scan_one(method).map(|b| a.merge(b))
                })?
        };
        let dead = Self::publish(ctx, &program, &accesses)?;
        log::debug!(
            "Field access: {} fields read, {} written, {dead} newly dead",
            accesses.reads.len(),
            accesses.writes.len()
        );
        Ok(())
    }

    fn run_on_method(&self, code: &mut IrCode, ctx: &CompilerContext) -> Result<bool> {
        let program = ctx.program()?;
        let method = code.method().clone();
        let is_dead = |field: &FieldRef| {
            program
                .resolve_field(field)
                .single()
                .is_some_and(|resolved| resolved.field.optimization_info.is_dead())
        };

        let mut edits = Vec::new();
        for (b, block) in code.blocks().iter().enumerate() {
            for (index, instruction) in block.instructions.iter().enumerate() {
                let replacement = match &instruction.op {
                    IrOp::StaticPut { field, .. } if is_dead(field) => {
                        Self::static_store_replacement(&program, &method, field)
                    }
                    IrOp::InstancePut { field, object, .. } if is_dead(field) => {
                        if code.value_type(*object).is_nullable() {
                            Some(vec![IrInstruction::new(IrOp::Invoke {
                                kind: InvokeKind::Virtual,
                                method: Self::object_get_class()?,
                                interface: false,
                                arguments: vec![*object],
                            })])
                        } else {
                            Some(Vec::new())
                        }
                    }
                    _ => None,
                };
                if let Some(replacement) = replacement {
                    edits.push((b, index, replacement));
                }
            }
        }
        if edits.is_empty() {
            return Ok(false);
        }

        for (b, index, replacement) in edits.into_iter().rev() {
            let block = code
                .blocks_mut()
                .get_mut(b)
                .ok_or_else(|| Error::IrError(format!("{method}: no block {b}")))?;
            let removed = block.instructions.splice(index..=index, replacement).next();
            if let Some(IrOp::StaticPut { field, .. } | IrOp::InstancePut { field, .. }) =
                removed.map(|instruction| instruction.op)
            {
                ctx.events
                    .record(EventKind::FieldStoreRemoved)
                    .method(&method)
                    .pass(self.name())
                    .message(format!("store to {field}"));
            }
        }
        Ok(true)
    }
}

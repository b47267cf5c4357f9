//! Inlining pass.
//!
//! Replaces calls to small methods by their bodies. A call site is inlined when
//!
//! - its target is known without dispatch: a static or special invoke resolving to one
//!   method, or a virtual or interface invoke with a single target according to the
//!   [`VirtualRootMethods`](crate::optimize::argprop::VirtualRootMethods) analysis;
//! - the target's body is a single block without handlers that ends in a return;
//! - the body is within the size threshold (or inlining is forced by a directive or a
//!   heuristic) and no directive or heuristic vetoes it;
//! - every instruction of the body may execute in the caller's class
//!   ([`InliningConstraint`]);
//! - the target was processed in an earlier wave than the caller.
//!
//! # Example
//!
//! ```text
//! caller:                           after inlining twice(I)I:
//!   v0 = arg 0                        v0 = arg 0
//!   v1 = invoke-static twice(v0)      v3 = const 2
//!   return v1                         v4 = mul-Int v0, v3
//!                                     return v4
//! ```
//!
//! Inlining an instance method whose receiver may be `null` keeps the null check the call
//! would have made by calling `getClass()` on the receiver first. Inlining a static method
//! of another class into a class that does not already trigger its initialization reads
//! the holder's class-init field first.

use std::collections::HashMap;

use crate::{
    code::{instruction::InvokeKind, CfCode},
    compiler::{CompilerContext, EventKind, IrPass},
    ir::{BlockId, IrCode, IrEmitter, IrInstruction, IrOp, ValueId},
    lens::GraphLens,
    optimize::{
        argprop::VirtualRootMethods,
        callgraph::CallGraph,
        inliner::{
            heuristics::{self, InliningHeuristics},
            InliningConstraints,
        },
    },
    program::{
        references::{FieldRef, MethodRef, ProtoRef, Reference, TypeRef},
        ProgramGraph,
    },
    Error, Result,
};

/// A call site chosen for inlining.
struct Inlinee {
    target: MethodRef,
    body: IrCode,
    /// Instructions to run before the inlined body
    prelude: Vec<IrInstruction>,
    devirtualized: bool,
}

/// Inlining pass.
///
/// Runs per method, callees first. [`IrPass::initialize`] recomputes the call graph and
/// installs its waves on the context, so each run sees the bodies as earlier runs left
/// them.
pub struct InliningPass {
    heuristics: Vec<Box<dyn InliningHeuristics>>,
    waves: HashMap<MethodRef, usize>,
}

impl Default for InliningPass {
    fn default() -> Self {
        Self::new()
    }
}

impl InliningPass {
    /// Creates a new inlining pass without heuristics.
    #[must_use]
    pub fn new() -> Self {
        Self {
            heuristics: Vec::new(),
            waves: HashMap::new(),
        }
    }

    /// Adds a heuristic consulted for every candidate.
    #[must_use]
    pub fn with_heuristics(mut self, heuristics: Box<dyn InliningHeuristics>) -> Self {
        self.heuristics.push(heuristics);
        self
    }

    fn object_get_class() -> Result<MethodRef> {
        Ok(MethodRef::new(
            TypeRef::object(),
            "getClass",
            ProtoRef::parse("()Ljava/lang/Class;")?,
        ))
    }

    /// Decides whether the invoke `instruction` of `caller` is inlined.
    fn plan(
        &self,
        ctx: &CompilerContext,
        program: &ProgramGraph,
        roots: &VirtualRootMethods,
        lens: &GraphLens,
        caller: &IrCode,
        instruction: &IrInstruction,
    ) -> Result<Option<Inlinee>> {
        let IrOp::Invoke {
            kind,
            method,
            arguments,
            ..
        } = &instruction.op
        else {
            return Ok(None);
        };
        let caller_method = caller.method();
        let Some(target) = CallGraph::static_target(program, roots, *kind, method) else {
            return Ok(None);
        };
        if target == *caller_method
            || target.is_instance_initializer()
            || ctx.directives.is_never(&target)
        {
            return Ok(None);
        }
        let (Some(caller_wave), Some(callee_wave)) =
            (self.waves.get(caller_method), self.waves.get(&target))
        else {
            return Ok(None);
        };
        if callee_wave >= caller_wave {
            return Ok(None);
        }
        let Some(definition) = program.method_definition(&target) else {
            return Ok(None);
        };
        if definition.is_static() != (*kind == InvokeKind::Static)
            || !ctx
                .liveness()
                .allows_optimization(&Reference::Method(target.clone()))
        {
            return Ok(None);
        }

        let forced = match heuristics::decide(&self.heuristics, caller_method, definition, program)
        {
            Some(false) => return Ok(None),
            Some(true) => true,
            None => ctx.directives.is_always(&target),
        };

        let Some(body) = ctx.ir_snapshot(&target)? else {
            return Ok(None);
        };
        if !Self::is_straight_line(&body) {
            return Ok(None);
        }

        let code: CfCode = IrEmitter::new(&body).with_debug_info(false).emit()?;
        if !forced && code.estimated_size_for_inlining() > ctx.options().inline_threshold {
            return Ok(None);
        }
        let constraints = InliningConstraints::new(program).with_lens(lens);
        let constraint = code.compute_inlining_constraint(definition, &constraints);
        if !constraints.allows_inlining_into(&constraint, &caller_method.holder) {
            log::trace!("{caller_method}: {target} is restricted to {constraint}");
            return Ok(None);
        }

        let mut prelude = Vec::new();
        if definition.is_static() {
            match self.class_initialization(ctx, program, caller_method, &target) {
                Some(Some(field)) => prelude.push(IrInstruction::new(IrOp::InitClass(field))),
                Some(None) => {}
                None => return Ok(None),
            }
        } else {
            let receiver = *arguments
                .first()
                .ok_or_else(|| Error::IrError(format!("{caller_method}: call without receiver")))?;
            if caller.value_type(receiver).is_nullable() {
                prelude.push(IrInstruction::new(IrOp::Invoke {
                    kind: InvokeKind::Virtual,
                    method: Self::object_get_class()?,
                    interface: false,
                    arguments: vec![receiver],
                }));
            }
        }

        Ok(Some(Inlinee {
            devirtualized: matches!(kind, InvokeKind::Virtual | InvokeKind::Interface),
            target,
            body,
            prelude,
        }))
    }

    /// How inlining the static `target` into `caller` keeps the class initialization
    /// semantics: `Some(None)` if nothing is needed, `Some(Some(field))` if the holder's
    /// class-init field must be read first, `None` if it cannot be preserved.
    fn class_initialization(
        &self,
        ctx: &CompilerContext,
        program: &ProgramGraph,
        caller: &MethodRef,
        target: &MethodRef,
    ) -> Option<Option<FieldRef>> {
        let holder = program.definition_for(&target.holder)?;
        if holder.class_initializer().is_none()
            || ctx.directives.bypasses_class_init(target)
            || (!holder.is_interface() && program.is_subtype(&caller.holder, &target.holder))
        {
            return Some(None);
        }
        holder
            .class_init_field()
            .map(|field| Some(field.reference.clone()))
    }

    /// A single block, no phis or handlers, ending in a return.
    fn is_straight_line(body: &IrCode) -> bool {
        let [block] = body.blocks() else {
            return false;
        };
        block.phis.is_empty()
            && block.handlers.is_empty()
            && matches!(
                block.terminator().map(|t| &t.op),
                Some(IrOp::Return(_))
            )
    }

    /// Replaces the invoke at `position` of `block` by the inlinee. Returns the number of
    /// instructions inserted.
    fn inline_at(
        code: &mut IrCode,
        block: BlockId,
        position: usize,
        inlinee: Inlinee,
    ) -> Result<usize> {
        let invoke = code
            .block(block)
            .and_then(|b| b.instructions.get(position))
            .cloned()
            .ok_or_else(|| Error::IrError(format!("no instruction at {block}:{position}")))?;
        let IrOp::Invoke { arguments, .. } = &invoke.op else {
            return Err(Error::IrError(format!("{block}:{position} is not an invoke")));
        };

        let callee = &inlinee.body;
        let body = callee
            .block(callee.entry())
            .ok_or_else(|| Error::IrError(format!("{} has no entry block", inlinee.target)))?;

        let mut values: HashMap<ValueId, ValueId> = HashMap::new();
        let mut inlined = inlinee.prelude.clone();
        let mut result = None;
        for instruction in &body.instructions {
            match &instruction.op {
                IrOp::Argument(index) => {
                    if let Some(out) = instruction.out {
                        let argument = arguments.get(usize::from(*index)).copied().ok_or_else(
                            || Error::IrError(format!("{}: missing argument {index}", inlinee.target)),
                        )?;
                        values.insert(out, argument);
                    }
                }
                IrOp::Return(value) => {
                    result = value.map(|v| values.get(&v).copied().unwrap_or(v));
                }
                _ => {
                    let mut copy = instruction.clone();
                    copy.map_operands(|v| values.get(&v).copied().unwrap_or(v));
                    if let Some(out) = instruction.out {
                        let fresh = code.new_value(callee.value_type(out));
                        values.insert(out, fresh);
                        copy.out = Some(fresh);
                    }
                    inlined.push(copy);
                }
            }
        }

        let inserted = inlined.len();
        let target_block = code
            .block_mut(block)
            .ok_or_else(|| Error::IrError(format!("no block {block}")))?;
        target_block
            .instructions
            .splice(position..=position, inlined);

        match (invoke.out, result) {
            (Some(out), Some(result)) => {
                code.replace_uses(&HashMap::from([(out, result)]));
            }
            (Some(_), None) => {
                return Err(Error::IrError(format!(
                    "{} returns no value to its caller",
                    inlinee.target
                )));
            }
            _ => {}
        }
        Ok(inserted)
    }
}

impl IrPass for InliningPass {
    fn name(&self) -> &'static str {
        "inlining"
    }

    fn description(&self) -> &'static str {
        "Inlines small callees whose target is known statically"
    }

    fn should_run(&self, _method: &MethodRef, ctx: &CompilerContext) -> bool {
        ctx.options().enable_inlining
    }

    fn initialize(&mut self, ctx: &CompilerContext) -> Result<()> {
        let waves = CallGraph::from_context(ctx)?.waves();
        self.waves = waves
            .iter()
            .enumerate()
            .flat_map(|(index, wave)| wave.iter().map(move |m| (m.clone(), index)))
            .collect();
        ctx.set_waves(waves)
    }

    fn run_on_method(&self, code: &mut IrCode, ctx: &CompilerContext) -> Result<bool> {
        let program = ctx.program()?;
        let roots = ctx.virtual_roots()?;
        let lens = ctx.lens()?;
        let caller = code.method().clone();
        let mut changed = false;

        for b in 0..code.block_count() {
            let block = BlockId::new(b as u32);
            let invokes: Vec<usize> = code
                .block(block)
                .map(|blk| {
                    blk.instructions
                        .iter()
                        .enumerate()
                        .filter(|(_, i)| matches!(i.op, IrOp::Invoke { .. }))
                        .map(|(index, _)| index)
                        .collect()
                })
                .unwrap_or_default();

            // Back to front, so earlier positions stay valid.
            for position in invokes.into_iter().rev() {
                let Some(instruction) = code
                    .block(block)
                    .and_then(|blk| blk.instructions.get(position))
                    .cloned()
                else {
                    continue;
                };
                let Some(inlinee) = self.plan(ctx, &program, &roots, &lens, code, &instruction)?
                else {
                    continue;
                };
                let target = inlinee.target.clone();
                let devirtualized = inlinee.devirtualized;
                Self::inline_at(code, block, position, inlinee)?;
                changed = true;

                if devirtualized {
                    ctx.events
                        .record(EventKind::CallDevirtualized)
                        .at(&caller, position)
                        .message(format!("{target}"));
                }
                ctx.events
                    .record(EventKind::MethodInlined)
                    .at(&caller, position)
                    .pass(self.name())
                    .message(format!("inlined {target}"));
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        code::{instruction::ArithOp, instruction::NumericType, CfInstruction, ConstValue},
        compiler::PassScheduler,
        config::ShrinkerOptions,
        program::{
            descriptor::ValueKind,
            flags::{FieldAccessFlags, MethodAccessFlags},
            FieldDef,
        },
        test::{
            fixtures::{class, context_for, invoke, main_method, method_with_code, program_of},
            interpreter::{Interpreter, Outcome, RuntimeValue},
        },
    };

    fn twice() -> crate::program::MethodDef {
        method_with_code(
            MethodRef::parse("app/Util", "twice", "(I)I").unwrap(),
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            vec![
                CfInstruction::Load {
                    kind: ValueKind::Int,
                    local: 0,
                },
                CfInstruction::Const(ConstValue::Int(2)),
                CfInstruction::Arith {
                    op: ArithOp::Mul,
                    ty: NumericType::Int,
                },
                CfInstruction::Return(Some(ValueKind::Int)),
            ],
        )
    }

    fn main_calling(holder: &str) -> crate::program::MethodDef {
        main_method(vec![
            CfInstruction::Const(ConstValue::Int(21)),
            invoke(InvokeKind::Static, holder, "twice", "(I)I"),
            CfInstruction::Stack(crate::code::instruction::StackOp::Pop),
            CfInstruction::Return(None),
        ])
    }

    fn run_inliner(ctx: &CompilerContext) -> usize {
        let mut pass = InliningPass::new();
        pass.initialize(ctx).unwrap();
        PassScheduler::run_on_methods(ctx, &pass, true).unwrap()
    }

    fn main_ref() -> MethodRef {
        MethodRef::parse("app/Main", "main", "([Ljava/lang/String;)V").unwrap()
    }

    #[test]
    fn test_inlines_small_static_callee() {
        let program = program_of(vec![
            class("app/Main").with_method(main_calling("app/Util")),
            class("app/Util").with_method(twice()),
        ]);
        let ctx = context_for(program, ShrinkerOptions::default());
        assert_eq!(run_inliner(&ctx), 1);
        assert_eq!(ctx.events.count_kind(EventKind::MethodInlined), 1);

        let main = ctx.ir_snapshot(&main_ref()).unwrap().unwrap();
        assert!(!main
            .instructions()
            .any(|(_, i)| matches!(i.op, IrOp::Invoke { .. })));
        main.validate().unwrap();
    }

    #[test]
    fn test_inlined_body_computes_the_same_value() {
        let wrapper = method_with_code(
            MethodRef::parse("app/Main", "compute", "()I").unwrap(),
            MethodAccessFlags::STATIC,
            vec![
                CfInstruction::Const(ConstValue::Int(21)),
                invoke(InvokeKind::Static, "app/Util", "twice", "(I)I"),
                CfInstruction::Return(Some(ValueKind::Int)),
            ],
        );
        let program = program_of(vec![
            class("app/Main")
                .with_method(main_method(vec![
                    invoke(InvokeKind::Static, "app/Main", "compute", "()I"),
                    CfInstruction::Stack(crate::code::instruction::StackOp::Pop),
                    CfInstruction::Return(None),
                ]))
                .with_method(wrapper),
            class("app/Util").with_method(twice()),
        ]);
        let ctx = context_for(program, ShrinkerOptions::default());
        run_inliner(&ctx);

        let compute = MethodRef::parse("app/Main", "compute", "()I").unwrap();
        let ir = ctx.ir_snapshot(&compute).unwrap().unwrap();
        assert!(!ir.instructions().any(|(_, i)| matches!(i.op, IrOp::Invoke { .. })));
        let outcome = Interpreter::new(&ir).run(Vec::new());
        assert_eq!(outcome, Outcome::Returned(Some(RuntimeValue::Int(42))));
    }

    #[test]
    fn test_never_directive_and_threshold() {
        let program = program_of(vec![
            class("app/Main").with_method(main_calling("app/Util")),
            class("app/Util").with_method(twice()),
        ]);
        let ctx = context_for(program.clone(), ShrinkerOptions::default());
        ctx.directives
            .forbid_inline(MethodRef::parse("app/Util", "twice", "(I)I").unwrap());
        assert_eq!(run_inliner(&ctx), 0);

        let ctx = context_for(program, ShrinkerOptions::default().with_inline_threshold(1));
        assert_eq!(run_inliner(&ctx), 0);
        ctx.directives
            .force_inline(MethodRef::parse("app/Util", "twice", "(I)I").unwrap());
        assert_eq!(run_inliner(&ctx), 1);
    }

    #[test]
    fn test_class_initialization_is_preserved() {
        let clinit = method_with_code(
            MethodRef::parse("app/Util", "<clinit>", "()V").unwrap(),
            MethodAccessFlags::STATIC,
            vec![CfInstruction::Return(None)],
        );
        let counter = FieldDef::new(
            FieldRef::parse("app/Util", "counter", "I").unwrap(),
            FieldAccessFlags::STATIC,
        );
        let program = program_of(vec![
            class("app/Main").with_method(main_calling("app/Util")),
            class("app/Util")
                .with_field(counter)
                .with_method(clinit)
                .with_method(twice()),
        ]);
        let ctx = context_for(program, ShrinkerOptions::default());
        assert_eq!(run_inliner(&ctx), 1);
        let main = ctx.ir_snapshot(&main_ref()).unwrap().unwrap();
        assert!(main
            .instructions()
            .any(|(_, i)| matches!(&i.op, IrOp::InitClass(f) if f.name.as_str() == "counter")));
    }

    #[test]
    fn test_initializer_without_field_blocks_inlining() {
        let clinit = method_with_code(
            MethodRef::parse("app/Util", "<clinit>", "()V").unwrap(),
            MethodAccessFlags::STATIC,
            vec![CfInstruction::Return(None)],
        );
        let program = program_of(vec![
            class("app/Main").with_method(main_calling("app/Util")),
            class("app/Util").with_method(clinit).with_method(twice()),
        ]);
        let ctx = context_for(program, ShrinkerOptions::default());
        assert_eq!(run_inliner(&ctx), 0);

        ctx.directives
            .bypass_class_initialization(MethodRef::parse("app/Util", "twice", "(I)I").unwrap());
        assert_eq!(run_inliner(&ctx), 1);
    }

    #[test]
    fn test_polymorphic_call_is_not_inlined() {
        let ctx = context_for(
            crate::test::fixtures::dispatch_program(),
            ShrinkerOptions::default(),
        );
        assert_eq!(run_inliner(&ctx), 0);
        assert_eq!(ctx.events.count_kind(EventKind::CallDevirtualized), 0);
    }
}

//! Materialization of constant arguments.

use std::collections::HashMap;

use crate::{
    code::ConstValue,
    compiler::{CompilerContext, EventKind, IrPass},
    ir::{IrCode, IrInstruction, IrOp, TypeElement},
    optimize::argprop::ArgumentPropagator,
    program::{descriptor::ValueKind, optinfo::AbstractValue, references::MethodRef},
    Error, Result,
};

/// Argument propagation pass.
///
/// [`IrPass::initialize`] scans every call site and publishes the joined argument facts;
/// [`IrPass::run_on_method`] then replaces each argument that is the same constant at every
/// call site by that constant. The argument itself stays in place and becomes unused.
#[derive(Debug, Default)]
pub struct ArgumentPropagationPass;

impl ArgumentPropagationPass {
    /// Creates the pass.
    #[must_use]
    pub fn new() -> Self {
        ArgumentPropagationPass
    }
}

/// The constant an argument of `kind` holds when its abstract value is `value`.
fn materialize(value: &AbstractValue, kind: ValueKind) -> Option<(ConstValue, TypeElement)> {
    match (value, kind) {
        (AbstractValue::SingleNumber(n), ValueKind::Int) => {
            i32::try_from(*n).ok().map(|n| (ConstValue::Int(n), TypeElement::Int))
        }
        (AbstractValue::SingleNumber(n), ValueKind::Long) => {
            Some((ConstValue::Long(*n), TypeElement::Long))
        }
        (AbstractValue::Null, ValueKind::Reference) => Some((ConstValue::Null, TypeElement::Null)),
        (AbstractValue::SingleString(s), ValueKind::Reference) => Some((
            ConstValue::String(s.clone()),
            TypeElement::non_null(&crate::program::references::TypeRef::string()),
        )),
        _ => None,
    }
}

impl IrPass for ArgumentPropagationPass {
    fn name(&self) -> &'static str {
        "argument-propagation"
    }

    fn description(&self) -> &'static str {
        "Replaces arguments that are the same constant at every call site"
    }

    fn should_run(&self, method: &MethodRef, ctx: &CompilerContext) -> bool {
        ctx.options().enable_argument_propagation
            && ctx
                .optimization_info(method)
                .is_some_and(|info| info.arguments.iter().any(AbstractValue::is_single_value))
    }

    fn initialize(&mut self, ctx: &CompilerContext) -> Result<()> {
        if !ctx.options().enable_argument_propagation {
            return Ok(());
        }
        let scanner = ArgumentPropagator::initialize_code_scanner(ctx)?;
        let call_sites = scanner.scan_all(ctx)?;
        let methods = scanner.populate(ctx);
        log::debug!("Scanned {call_sites} call sites, {methods} methods have constant arguments");
        Ok(())
    }

    fn run_on_method(&self, code: &mut IrCode, ctx: &CompilerContext) -> Result<bool> {
        let method = code.method().clone();
        let Some(info) = ctx.optimization_info(&method) else {
            return Ok(false);
        };
        let program = ctx.program()?;
        let definition = program
            .method_definition(&method)
            .ok_or_else(|| Error::IrError(format!("{method}: no definition")))?;
        let parameters = definition.parameter_info();

        let arguments = code.arguments();
        let uses = code.use_counts();
        let mut constants = Vec::new();
        let mut replacements = HashMap::new();
        for (index, argument) in arguments.iter().enumerate() {
            if uses.get(argument).copied().unwrap_or(0) == 0 {
                continue;
            }
            let (Some(value), Some(ty)) = (
                info.constant_argument(index),
                parameters.argument_types.get(index),
            ) else {
                continue;
            };
            let Some((constant, element)) = materialize(value, ty.kind()) else {
                continue;
            };
            let out = code.new_value(element);
            ctx.events
                .record(EventKind::ArgumentPropagated)
                .method(&method)
                .pass(self.name())
                .message(format!("argument {index} is {value}"));
            constants.push(IrInstruction::with_out(out, IrOp::Const(constant)));
            replacements.insert(*argument, out);
        }
        if constants.is_empty() {
            return Ok(false);
        }

        code.replace_uses(&replacements);
        let entry = code.entry();
        let block = code
            .block_mut(entry)
            .ok_or_else(|| Error::IrError(format!("{method}: no entry block")))?;
        let position = block
            .instructions
            .iter()
            .take_while(|i| matches!(i.op, IrOp::Argument(_)))
            .count();
        block.instructions.splice(position..position, constants);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        code::{instruction::InvokeKind, CfInstruction},
        compiler::PassScheduler,
        config::ShrinkerOptions,
        program::flags::MethodAccessFlags,
        test::{
            fixtures::{class, context_for, invoke, main_method, method_with_code, program_of},
            interpreter::{Interpreter, Outcome, RuntimeValue},
        },
    };

    fn identity() -> MethodRef {
        MethodRef::parse("app/Util", "identity", "(I)I").unwrap()
    }

    fn program(values: &[i32]) -> crate::program::ProgramGraph {
        let mut body = Vec::new();
        for value in values {
            body.push(CfInstruction::Const(ConstValue::Int(*value)));
            body.push(invoke(InvokeKind::Static, "app/Util", "identity", "(I)I"));
            body.push(CfInstruction::Stack(crate::code::instruction::StackOp::Pop));
        }
        body.push(CfInstruction::Return(None));
        program_of(vec![
            class("app/Main").with_method(main_method(body)),
            class("app/Util").with_method(method_with_code(
                identity(),
                MethodAccessFlags::STATIC,
                vec![
                    CfInstruction::Load {
                        kind: ValueKind::Int,
                        local: 0,
                    },
                    CfInstruction::Return(Some(ValueKind::Int)),
                ],
            )),
        ])
    }

    fn run(ctx: &CompilerContext) -> usize {
        let mut pass = ArgumentPropagationPass::new();
        pass.initialize(ctx).unwrap();
        PassScheduler::run_on_methods(ctx, &pass, ctx.options().parallel).unwrap()
    }

    #[test]
    fn test_constant_argument_is_materialized() {
        let ctx = context_for(program(&[5, 5]), ShrinkerOptions::default());
        assert_eq!(run(&ctx), 1);
        assert_eq!(ctx.events.count_kind(EventKind::ArgumentPropagated), 1);

        let code = ctx.ir_snapshot(&identity()).unwrap().unwrap();
        code.validate().unwrap();
        let outcome = Interpreter::new(&code).run(vec![RuntimeValue::Int(99)]);
        assert_eq!(outcome, Outcome::Returned(Some(RuntimeValue::Int(5))));

        // The argument is unused now; a second run changes nothing.
        assert_eq!(run(&ctx), 0);
    }

    #[test]
    fn test_differing_arguments_stay() {
        let ctx = context_for(program(&[5, 6]), ShrinkerOptions::default().sequential());
        assert_eq!(run(&ctx), 0);
        assert!(!ctx.events.has(EventKind::ArgumentPropagated));
    }

    #[test]
    fn test_disabled() {
        let options = ShrinkerOptions::default().with_argument_propagation(false);
        let ctx = context_for(program(&[5]), options);
        assert_eq!(run(&ctx), 0);
    }
}

//! Call-site scanning for argument propagation.
//!
//! The scanner keeps one vector of [`AbstractValue`]s per *key*: a virtual method's root
//! (all methods sharing a root are reached by the same call sites) or the method itself
//! for static and direct methods. Every call site joins the abstract values of its
//! arguments into the key of its resolved target. Keys that cannot see all their call
//! sites start at [`AbstractValue::Unknown`]:
//!
//! - methods the keep rules forbid optimizing, since reflection may call them;
//! - roots overriding a library method, since the library may call them;
//! - roots that were inherited from two unrelated supertypes;
//! - methods referenced by a method handle.

use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;

use crate::{
    code::{
        constant::{CallSite, HandleMember, MethodHandleRef},
        ConstValue,
    },
    compiler::CompilerContext,
    ir::{code::DefSite, IrCode, IrOp, ValueId},
    optimize::argprop::VirtualRootMethods,
    program::{
        optinfo::AbstractValue,
        references::{MethodRef, Reference},
        ProgramGraph,
    },
    Result,
};

/// Joined argument facts over all scanned call sites.
pub struct ArgumentPropagator {
    program: Arc<ProgramGraph>,
    roots: Arc<VirtualRootMethods>,
    state: DashMap<MethodRef, Vec<AbstractValue>>,
}

impl ArgumentPropagator {
    /// Prepares a scanner over the current program of `ctx`.
    ///
    /// Runs (or reuses) the virtual root analysis and seeds every key that has call sites
    /// outside the program with [`AbstractValue::Unknown`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LockError`] if the context's state is poisoned.
    pub fn initialize_code_scanner(ctx: &CompilerContext) -> Result<Self> {
        let program = ctx.program()?;
        let roots = ctx.virtual_roots()?;
        let scanner = ArgumentPropagator {
            program,
            roots,
            state: DashMap::new(),
        };

        for method in ctx.methods() {
            let key = scanner.key_of(&method);
            let unknown = !ctx
                .liveness()
                .allows_optimization(&Reference::Method(method.clone()))
                || scanner.roots.escapes(&key)
                || scanner.roots.is_ambiguous_root(&key);
            if unknown {
                scanner.mark_unknown(&method);
            }
        }
        log::debug!(
            "Argument propagation: {} keys start unknown",
            scanner.state.len()
        );
        Ok(scanner)
    }

    /// The state key of `method`.
    #[must_use]
    pub fn key_of(&self, method: &MethodRef) -> MethodRef {
        self.roots
            .root_of(method)
            .cloned()
            .unwrap_or_else(|| method.clone())
    }

    fn arity_of(&self, method: &MethodRef) -> usize {
        self.program
            .method_definition(method)
            .map_or_else(|| method.arity() + 1, |def| def.parameter_info().argument_count())
    }

    fn mark_unknown(&self, method: &MethodRef) {
        let key = self.key_of(method);
        let arity = self.arity_of(method);
        self.state.insert(key, vec![AbstractValue::Unknown; arity]);
    }

    fn join(&self, key: MethodRef, values: Vec<AbstractValue>) {
        self.state
            .entry(key)
            .and_modify(|current| {
                for (slot, value) in current.iter_mut().zip(&values) {
                    *slot = slot.join(value);
                }
            })
            .or_insert(values);
    }

    fn mark_handle(&self, handle: &MethodHandleRef) {
        if let HandleMember::Method(method) = &handle.member {
            if let Some(resolved) = self.program.resolve_method(method).single() {
                self.mark_unknown(&resolved.method.reference);
            }
        }
    }

    fn mark_call_site(&self, call_site: &CallSite) {
        self.mark_handle(&call_site.bootstrap);
        for argument in &call_site.arguments {
            if let ConstValue::MethodHandle(handle) = argument {
                self.mark_handle(handle);
            }
        }
    }

    /// Joins the arguments of every call site in `code`. Returns the number of call sites
    /// whose target is a program method.
    pub fn scan(&self, code: &IrCode) -> usize {
        let definitions = code.definitions();
        let value_of = |value: ValueId| -> AbstractValue {
            let Some(DefSite::Instruction { block, index }) = definitions.get(&value).copied()
            else {
                return AbstractValue::Unknown;
            };
            match code
                .block(block)
                .and_then(|b| b.instructions.get(index))
                .map(|i| &i.op)
            {
                Some(IrOp::Const(constant)) => abstract_constant(constant),
                _ => AbstractValue::Unknown,
            }
        };

        let mut call_sites = 0;
        for (_, instruction) in code.instructions() {
            match &instruction.op {
                IrOp::Invoke {
                    method, arguments, ..
                } => {
                    let Some(resolved) = self.program.resolve_method(method).single() else {
                        continue;
                    };
                    if !resolved.class.is_program() {
                        continue;
                    }
                    let target = &resolved.method;
                    let receiver = usize::from(!target.is_static());
                    let values: Vec<AbstractValue> = arguments
                        .iter()
                        .enumerate()
                        .map(|(index, value)| {
                            if index < receiver {
                                AbstractValue::Unknown
                            } else {
                                value_of(*value)
                            }
                        })
                        .collect();
                    self.join(self.key_of(&target.reference), values);
                    call_sites += 1;
                }
                IrOp::InvokeDynamic { call_site, .. } => self.mark_call_site(call_site),
                IrOp::Const(ConstValue::MethodHandle(handle)) => self.mark_handle(handle),
                _ => {}
            }
        }
        call_sites
    }

    /// Scans every body of `ctx`, in parallel if the options allow it.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while building a body's IR.
    pub fn scan_all(&self, ctx: &CompilerContext) -> Result<usize> {
        let methods = ctx.methods();
        let scan_one = |method: &MethodRef| -> Result<usize> {
            Ok(ctx
                .ir_snapshot(method)?
                .map_or(0, |code| self.scan(&code)))
        };
        if ctx.options().parallel {
            methods
                .par_iter()
                .map(scan_one)
                .try_reduce(|| 0, |a, b| Ok(a + b))
        } else {
            methods.iter().map(scan_one).sum()
        }
    }

    /// The joined facts for `method`, if any call site reached it.
    #[must_use]
    pub fn arguments_of(&self, method: &MethodRef) -> Option<Vec<AbstractValue>> {
        self.state
            .get(&self.key_of(method))
            .map(|values| values.clone())
    }

    /// Publishes the joined argument facts as each method's optimization info. Returns the
    /// number of methods with at least one constant argument.
    pub fn populate(&self, ctx: &CompilerContext) -> usize {
        let mut constant = 0;
        for method in ctx.methods() {
            let Some(mut arguments) = self.arguments_of(&method) else {
                continue;
            };
            arguments.resize(self.arity_of(&method), AbstractValue::Unknown);
            if arguments.iter().any(AbstractValue::is_single_value) {
                constant += 1;
            }
            let mut info = ctx.optimization_info(&method).unwrap_or_default();
            info.arguments = arguments;
            ctx.set_optimization_info(method, info);
        }
        log::debug!("Argument propagation: {constant} methods with constant arguments");
        constant
    }
}

fn abstract_constant(constant: &ConstValue) -> AbstractValue {
    match constant {
        ConstValue::Null => AbstractValue::Null,
        ConstValue::Int(value) => AbstractValue::SingleNumber(i64::from(*value)),
        ConstValue::Long(value) => AbstractValue::SingleNumber(*value),
        ConstValue::String(value) => AbstractValue::SingleString(value.clone()),
        _ => AbstractValue::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        code::{instruction::InvokeKind, CfInstruction},
        config::ShrinkerOptions,
        program::flags::MethodAccessFlags,
        test::fixtures::{class, context_for, invoke, main_method, method_with_code, program_of},
    };

    fn sink(name: &str) -> crate::program::MethodDef {
        method_with_code(
            MethodRef::parse("app/Util", name, "(ILjava/lang/String;)V").unwrap(),
            MethodAccessFlags::STATIC,
            vec![CfInstruction::Return(None)],
        )
    }

    fn call(name: &str, number: i32, text: &str) -> Vec<CfInstruction> {
        vec![
            CfInstruction::Const(ConstValue::Int(number)),
            CfInstruction::Const(ConstValue::String(crate::program::references::Name::new(
                text,
            ))),
            invoke(InvokeKind::Static, "app/Util", name, "(ILjava/lang/String;)V"),
        ]
    }

    #[test]
    fn test_constant_and_conflicting_arguments() {
        let mut body = call("same", 7, "x");
        body.extend(call("same", 7, "y"));
        body.extend(call("other", 1, "z"));
        body.push(CfInstruction::Return(None));
        let program = program_of(vec![
            class("app/Main").with_method(main_method(body)),
            class("app/Util")
                .with_method(sink("same"))
                .with_method(sink("other")),
        ]);
        let ctx = context_for(program, ShrinkerOptions::default());

        let scanner = ArgumentPropagator::initialize_code_scanner(&ctx).unwrap();
        assert_eq!(scanner.scan_all(&ctx).unwrap(), 3);
        assert_eq!(scanner.populate(&ctx), 2);

        let same = MethodRef::parse("app/Util", "same", "(ILjava/lang/String;)V").unwrap();
        let info = ctx.optimization_info(&same).unwrap();
        assert_eq!(
            info.arguments,
            vec![AbstractValue::SingleNumber(7), AbstractValue::Unknown]
        );

        let other = MethodRef::parse("app/Util", "other", "(ILjava/lang/String;)V").unwrap();
        let info = ctx.optimization_info(&other).unwrap();
        assert_eq!(
            info.constant_argument(1),
            Some(&AbstractValue::SingleString(
                crate::program::references::Name::new("z")
            ))
        );
    }

    #[test]
    fn test_kept_method_is_unknown() {
        let mut body = call("same", 7, "x");
        body.push(CfInstruction::Return(None));
        // main is a root; calling it from elsewhere must not make its argument known.
        let program = program_of(vec![
            class("app/Main").with_method(main_method(body)),
            class("app/Util").with_method(sink("same")),
        ]);
        let ctx = context_for(program, ShrinkerOptions::default().sequential());
        let scanner = ArgumentPropagator::initialize_code_scanner(&ctx).unwrap();
        scanner.scan_all(&ctx).unwrap();

        let main = MethodRef::parse("app/Main", "main", "([Ljava/lang/String;)V").unwrap();
        assert_eq!(
            scanner.arguments_of(&main),
            Some(vec![AbstractValue::Unknown])
        );
    }
}

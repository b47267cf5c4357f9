//! Constructor dispatch entry points.
//!
//! When several classes are merged into one, each of their constructors becomes a private
//! `constructor$<Name>` method of the merge target, and every former `new A(..)` call is
//! redirected to a single synthetic `<init>` that takes the original arguments plus an
//! `int` class id as its last parameter. That entry point dispatches on the id:
//!
//! ```text
//! B0:  this, a1, .., an, id = arguments
//!      [invokespecial Super.<init>(this)]
//!      switch id { 0 -> B1, 1 -> B2, .., n-1 -> Bn, default -> Bn+1 }
//! Bk:  invokespecial constructor$K(this, a1, .., a_arity(K))
//!      return
//! Bn+1: throw null
//! ```
//!
//! Targets receive the prefix of the arguments matching their own arity. An id outside
//! `0..N` is a caller bug; the default case throws `null`, which raises a
//! `NullPointerException` at a deterministic point instead of running any constructor.

use crate::{
    code::{instruction::InvokeKind, ConstValue},
    config::ClassFileVersion,
    ir::{
        block::{BasicBlock, BlockId},
        code::IrCode,
        instruction::{IrInstruction, IrOp},
        synthetic::{SyntheticCode, SyntheticMethod, SyntheticMethodBuilder},
        types::TypeElement,
        value::ValueId,
    },
    program::{
        flags::MethodAccessFlags,
        references::{MethodRef, ProtoRef, TypeRef},
    },
    Error, Result,
};

/// Name prefix of moved constructors.
pub const CONSTRUCTOR_PREFIX: &str = "constructor$";

/// Name under which the constructor of `merged` lives on the merge target.
#[must_use]
pub fn moved_constructor_name(merged: &TypeRef) -> String {
    format!("{CONSTRUCTOR_PREFIX}{}", merged.simple_name())
}

/// A synthetic `<init>` dispatching to one of several moved constructors.
#[derive(Debug, Clone)]
pub struct ConstructorEntryPoint {
    method: MethodRef,
    targets: Vec<MethodRef>,
    super_constructor: Option<MethodRef>,
}

impl ConstructorEntryPoint {
    /// Creates an entry point `method` dispatching to `targets`; target `i` is invoked for
    /// class id `i`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] if `method` is not an `<init>` whose last parameter is
    /// an `int`, if there are no targets, or if a target is not declared on the holder of
    /// `method` or takes parameters that are not a prefix of the entry point's.
    pub fn new(method: MethodRef, targets: Vec<MethodRef>) -> Result<Self> {
        if !method.is_instance_initializer() {
            return Err(malformed_error!("entry point {} is not a constructor", method));
        }
        let parameters = method.proto.parameters();
        let Some((discriminator, forwarded)) = parameters.split_last() else {
            return Err(malformed_error!("entry point {} has no class id parameter", method));
        };
        if *discriminator != TypeRef::int() {
            return Err(malformed_error!(
                "class id parameter of {} must be int, found {}",
                method,
                discriminator
            ));
        }
        if targets.is_empty() {
            return Err(malformed_error!("entry point {} has no targets", method));
        }
        for target in &targets {
            if target.holder != method.holder {
                return Err(malformed_error!(
                    "target {} is not declared on {}",
                    target,
                    method.holder
                ));
            }
            if !forwarded.starts_with(target.proto.parameters()) {
                return Err(malformed_error!(
                    "parameters of {} are not a prefix of those of {}",
                    target,
                    method
                ));
            }
        }
        Ok(ConstructorEntryPoint {
            method,
            targets,
            super_constructor: None,
        })
    }

    /// Calls `constructor` on the receiver before dispatching. Its parameters must be a
    /// prefix of the forwarded ones.
    #[must_use]
    pub fn with_super_constructor(mut self, constructor: MethodRef) -> Self {
        self.super_constructor = Some(constructor);
        self
    }

    /// The entry point's reference.
    #[must_use]
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// Dispatch targets indexed by class id.
    #[must_use]
    pub fn targets(&self) -> &[MethodRef] {
        &self.targets
    }

    /// Builds the dispatch IR.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IrError`] if the result fails the consistency check.
    pub fn build_ir(&self) -> Result<IrCode> {
        let mut ir = IrCode::new(self.method.clone(), false);
        let entry = ir.add_block();
        let cases: Vec<BlockId> = self.targets.iter().map(|_| ir.add_block()).collect();
        let default = ir.add_block();

        let mut arguments = Vec::with_capacity(self.method.arity() + 1);
        arguments.push(ir.new_value(TypeElement::non_null(&self.method.holder)));
        for parameter in self.method.proto.parameters() {
            arguments.push(ir.new_value(TypeElement::of_type(parameter)));
        }
        let discriminator = arguments[arguments.len() - 1];

        let mut entry_code: Vec<IrInstruction> = arguments
            .iter()
            .enumerate()
            .map(|(index, value)| IrInstruction::with_out(*value, IrOp::Argument(index as u16)))
            .collect();
        if let Some(constructor) = &self.super_constructor {
            entry_code.push(invoke_direct(constructor, &arguments));
        }
        entry_code.push(IrInstruction::new(IrOp::Switch {
            value: discriminator,
            keys: (0..self.targets.len() as i32).collect(),
            targets: cases.clone(),
            default,
        }));
        self.block(&mut ir, entry)?.instructions = entry_code;

        for (target, case) in self.targets.iter().zip(&cases) {
            let block = self.block(&mut ir, *case)?;
            block.instructions.push(invoke_direct(target, &arguments));
            block.instructions.push(IrInstruction::new(IrOp::Return(None)));
            ir.add_predecessor(entry, *case);
        }

        let null = ir.new_value(TypeElement::Null);
        let block = self.block(&mut ir, default)?;
        block
            .instructions
            .push(IrInstruction::with_out(null, IrOp::Const(ConstValue::Null)));
        block.instructions.push(IrInstruction::new(IrOp::Throw(null)));
        ir.add_predecessor(entry, default);

        ir.validate()?;
        Ok(ir)
    }

    /// Generates the entry point as a method of its holder.
    ///
    /// # Errors
    ///
    /// Propagates errors of [`ConstructorEntryPoint::build_ir`] and of the synthetic method
    /// builder.
    pub fn synthesize(
        &self,
        version: ClassFileVersion,
        keep_v50_frames: bool,
    ) -> Result<SyntheticMethod> {
        let ir = self.build_ir()?;
        SyntheticMethodBuilder::new(self.method.holder.clone())
            .name(self.method.name.as_str())
            .proto(self.method.proto.clone())
            .access(MethodAccessFlags::PUBLIC)
            .version(version, keep_v50_frames)
            .code(move |_, _| Ok(SyntheticCode::Ir(ir)))
            .build()
    }

    fn block<'c>(&self, ir: &'c mut IrCode, id: BlockId) -> Result<&'c mut BasicBlock> {
        ir.block_mut(id)
            .ok_or_else(|| Error::IrError(format!("{}: missing block {id}", self.method)))
    }
}

/// The prototype of an entry point forwarding `parameters` plus the class id.
#[must_use]
pub fn entry_point_proto(parameters: &[TypeRef]) -> ProtoRef {
    let mut all = parameters.to_vec();
    all.push(TypeRef::int());
    ProtoRef::new(TypeRef::void(), all)
}

/// `invokespecial target(receiver, a1, .., a_arity)`.
fn invoke_direct(target: &MethodRef, arguments: &[ValueId]) -> IrInstruction {
    let forwarded = arguments
        .iter()
        .take(target.arity() + 1)
        .copied()
        .collect();
    IrInstruction::new(IrOp::Invoke {
        kind: InvokeKind::Special,
        method: target.clone(),
        interface: false,
        arguments: forwarded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::IrBuilder,
        test::interpreter::{Interpreter, Outcome, RuntimeValue},
    };

    fn holder() -> TypeRef {
        TypeRef::class("app/Merged")
    }

    fn target(name: &str, descriptor: &str) -> MethodRef {
        MethodRef::parse("app/Merged", name, descriptor).unwrap()
    }

    fn three_way() -> ConstructorEntryPoint {
        let method = MethodRef::new(
            holder(),
            "<init>",
            entry_point_proto(&[TypeRef::int(), TypeRef::string()]),
        );
        ConstructorEntryPoint::new(
            method,
            vec![
                target("constructor$A", "()V"),
                target("constructor$B", "(I)V"),
                target("constructor$C", "(ILjava/lang/String;)V"),
            ],
        )
        .unwrap()
        .with_super_constructor(MethodRef::parse("java/lang/Object", "<init>", "()V").unwrap())
    }

    fn arguments(id: i32) -> Vec<RuntimeValue> {
        vec![
            RuntimeValue::Object(1, holder()),
            RuntimeValue::Int(7),
            RuntimeValue::Str("x".into()),
            RuntimeValue::Int(i64::from(id)),
        ]
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let not_init = MethodRef::parse("app/Merged", "create", "(I)V").unwrap();
        assert!(ConstructorEntryPoint::new(not_init, vec![target("constructor$A", "()V")]).is_err());

        let no_id = MethodRef::parse("app/Merged", "<init>", "(J)V").unwrap();
        assert!(ConstructorEntryPoint::new(no_id, vec![target("constructor$A", "()V")]).is_err());

        let method = MethodRef::parse("app/Merged", "<init>", "(JI)V").unwrap();
        assert!(ConstructorEntryPoint::new(method.clone(), vec![]).is_err());
        assert!(
            ConstructorEntryPoint::new(method.clone(), vec![target("constructor$A", "(I)V")])
                .is_err()
        );
        let elsewhere = MethodRef::parse("app/Other", "constructor$A", "()V").unwrap();
        assert!(ConstructorEntryPoint::new(method, vec![elsewhere]).is_err());
    }

    #[test]
    fn test_each_id_reaches_its_target_with_truncated_arguments() {
        let ir = three_way().build_ir().unwrap();
        for (id, expected) in ["constructor$A", "constructor$B", "constructor$C"]
            .iter()
            .enumerate()
        {
            let mut interpreter = Interpreter::new(&ir);
            let outcome = interpreter.run(arguments(id as i32));
            assert_eq!(outcome, Outcome::Returned(None));

            let calls = interpreter.invocations();
            assert_eq!(calls.len(), 2);
            assert!(calls[0].0.is_instance_initializer());
            assert_eq!(calls[1].0.name.as_str(), *expected);
            assert_eq!(calls[1].1.len(), id + 1);
            assert_eq!(calls[1].1[0], RuntimeValue::Object(1, holder()));
        }
    }

    #[test]
    fn test_out_of_range_id_throws_null_pointer() {
        let ir = three_way().build_ir().unwrap();
        for id in [5, -1, 3] {
            let mut interpreter = Interpreter::new(&ir);
            let outcome = interpreter.run(arguments(id));
            assert_eq!(
                outcome,
                Outcome::Threw(TypeRef::class("java/lang/NullPointerException"))
            );
            // Only the super constructor ran; no case fell through.
            assert_eq!(interpreter.invocations().len(), 1);
        }
    }

    #[test]
    fn test_synthesized_code_round_trips() {
        let entry = three_way();
        let method = entry.synthesize(ClassFileVersion::V1_8, false).unwrap();
        assert!(method
            .definition
            .access
            .contains(MethodAccessFlags::SYNTHETIC));

        let rebuilt = IrBuilder::new(&method.definition).unwrap().build().unwrap();
        assert!(rebuilt.is_equivalent(method.ir.as_ref().unwrap()));

        let mut interpreter = Interpreter::new(&rebuilt);
        assert_eq!(
            interpreter.run(arguments(5)),
            Outcome::Threw(TypeRef::class("java/lang/NullPointerException"))
        );
    }

    #[test]
    fn test_moved_constructor_name() {
        assert_eq!(
            moved_constructor_name(&TypeRef::class("app/model/Circle")),
            "constructor$Circle"
        );
    }
}

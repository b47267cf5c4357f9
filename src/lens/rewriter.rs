//! Rewriting IR bodies through a lens.
//!
//! [`LensCodeRewriter`] brings a method body up to date with a lens snapshot: the method's
//! own reference, value types, catch guards, debug locals and every symbolic operand of
//! every instruction. Invokes additionally take the invoke kind chosen by the lens and
//! receive the lens' extra constant arguments, materialized as constants right before the
//! call.
//!
//! When the lens gave the method itself additional parameters, the rewritten body defines
//! arguments for them too, so the body matches its new prototype.

use crate::{
    code::{
        constant::{CallSite, HandleMember, MethodHandleRef},
        instruction::InvokeKind,
        ConstValue,
    },
    ir::{
        block::BlockId,
        code::IrCode,
        instruction::{IrInstruction, IrOp},
        types::TypeElement,
        value::ValueId,
    },
    lens::FlattenedLens,
    program::{
        references::{MethodRef, ProtoRef, TypeRef},
        ProgramGraph,
    },
    Error, Result,
};

/// Rewrites IR through a [`FlattenedLens`].
pub struct LensCodeRewriter<'a> {
    lens: &'a FlattenedLens,
    program: Option<&'a ProgramGraph>,
}

impl<'a> LensCodeRewriter<'a> {
    /// A rewriter for `lens`.
    #[must_use]
    pub fn new(lens: &'a FlattenedLens) -> Self {
        LensCodeRewriter {
            lens,
            program: None,
        }
    }

    /// Uses `program` (in its rewritten form) to decide whether retargeted invokes name an
    /// interface.
    #[must_use]
    pub fn with_program(mut self, program: &'a ProgramGraph) -> Self {
        self.program = Some(program);
        self
    }

    /// Rewrites `code` in place. Returns `true` if anything changed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LensError`] if the lens shrinks the method's own prototype, and
    /// [`Error::IrError`] if the body is structurally broken.
    pub fn rewrite(&self, code: &mut IrCode) -> Result<bool> {
        if self.lens.is_identity() {
            return Ok(false);
        }
        let original = code.method().clone();
        let mut changed = self.rewrite_signature(code, &original)?;
        changed |= self.rewrite_values(code);

        for b in 0..code.block_count() {
            let block = BlockId::new(b as u32);
            changed |= self.rewrite_handlers(code, block)?;
            changed |= self.rewrite_block(code, block, &original)?;
        }
        if changed {
            log::trace!("rewrote {} as {}", original, code.method());
        }
        Ok(changed)
    }

    fn rewrite_signature(&self, code: &mut IrCode, original: &MethodRef) -> Result<bool> {
        let mapped = self
            .lens
            .lookup_method(original, Some(original), InvokeKind::Special)
            .reference;
        if mapped == *original {
            return Ok(false);
        }
        let before = original.arity();
        let after = mapped.arity();
        if after < before {
            return Err(Error::LensError(format!(
                "{original} cannot be mapped to {mapped}: parameters were removed"
            )));
        }
        if after > before {
            let receiver = usize::from(!code.is_static());
            let mut extra = Vec::with_capacity(after - before);
            for (index, ty) in mapped.proto.parameters().iter().enumerate().skip(before) {
                let value = code.new_value(TypeElement::of_type(ty));
                extra.push(IrInstruction::with_out(
                    value,
                    IrOp::Argument((index + receiver) as u16),
                ));
            }
            let entry = code.entry();
            let position = code.arguments().len();
            let block = code
                .block_mut(entry)
                .ok_or_else(|| Error::IrError(format!("{original}: no entry block")))?;
            block.instructions.splice(position..position, extra);
        }
        code.set_method(mapped);
        Ok(true)
    }

    fn rewrite_values(&self, code: &mut IrCode) -> bool {
        let mut changed = false;
        let ids: Vec<ValueId> = code.values().iter().map(|v| v.id).collect();
        for id in ids {
            let Some(value) = code.value_mut(id) else {
                continue;
            };
            let ty = value.ty.map_reference(|t| self.lens.lookup_type(t));
            if ty != value.ty {
                value.ty = ty;
                changed = true;
            }
            if let Some(local) = &mut value.local {
                let mapped = self.lens.lookup_type(&local.ty);
                if mapped != local.ty {
                    local.ty = mapped;
                    changed = true;
                }
            }
        }
        changed
    }

    fn rewrite_handlers(&self, code: &mut IrCode, block: BlockId) -> Result<bool> {
        let block = code
            .block_mut(block)
            .ok_or_else(|| Error::IrError(format!("missing block {block}")))?;
        let mut changed = false;
        for handler in &mut block.handlers {
            if let Some(guard) = &mut handler.guard {
                let mapped = self.lens.lookup_type(guard);
                if mapped != *guard {
                    *guard = mapped;
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    fn rewrite_block(&self, code: &mut IrCode, id: BlockId, context: &MethodRef) -> Result<bool> {
        let instructions = code
            .block(id)
            .map(|b| b.instructions.clone())
            .ok_or_else(|| Error::IrError(format!("missing block {id}")))?;

        let mut changed = false;
        let mut rewritten = Vec::with_capacity(instructions.len());
        for mut instruction in instructions {
            if let IrOp::Invoke {
                kind,
                method,
                interface,
                arguments,
            } = &mut instruction.op
            {
                let result = self.lens.lookup_method(method, Some(context), *kind);
                if result.is_rewritten(method, *kind) {
                    changed = true;
                    for constant in &result.extra_arguments {
                        let value = code.new_value(TypeElement::of_type(&constant.ty()));
                        rewritten.push(IrInstruction::with_out(
                            value,
                            IrOp::Const(self.map_constant(constant)),
                        ));
                        arguments.push(value);
                    }
                    if result.reference.holder != method.holder {
                        if let Some(program) = self.program {
                            *interface = program.is_interface(&result.reference.holder);
                        }
                    }
                    if result.kind == InvokeKind::Interface {
                        *interface = true;
                    }
                    *method = result.reference;
                    *kind = result.kind;
                }
            } else {
                changed |= self.rewrite_operands(&mut instruction.op);
            }
            rewritten.push(instruction);
        }
        if let Some(block) = code.block_mut(id) {
            block.instructions = rewritten;
        }
        Ok(changed)
    }

    /// Rewrites the symbolic operands of a non-invoke instruction.
    fn rewrite_operands(&self, op: &mut IrOp) -> bool {
        let lens = self.lens;
        let replace_type = |ty: &mut TypeRef| {
            let mapped = lens.lookup_type(ty);
            let changed = mapped != *ty;
            *ty = mapped;
            changed
        };
        match op {
            IrOp::MoveException(ty)
            | IrOp::NewInstance(ty)
            | IrOp::NewArray { ty, .. }
            | IrOp::MultiNewArray { ty, .. }
            | IrOp::CheckCast { ty, .. }
            | IrOp::SafeCheckCast { ty, .. }
            | IrOp::InstanceOf { ty, .. } => replace_type(ty),
            IrOp::StaticGet(field)
            | IrOp::InitClass(field)
            | IrOp::StaticPut { field, .. }
            | IrOp::InstanceGet { field, .. }
            | IrOp::InstancePut { field, .. } => {
                let mapped = lens.lookup_field(field);
                let changed = mapped != *field;
                *field = mapped;
                changed
            }
            IrOp::Const(constant) => {
                let mapped = self.map_constant(constant);
                let changed = mapped != *constant;
                *constant = mapped;
                changed
            }
            IrOp::InvokeDynamic { call_site, .. } => {
                let mapped = self.map_call_site(call_site);
                let changed = mapped != *call_site;
                *call_site = mapped;
                changed
            }
            _ => false,
        }
    }

    fn map_proto(&self, proto: &ProtoRef) -> ProtoRef {
        ProtoRef::new(
            self.lens.lookup_type(proto.return_type()),
            proto
                .parameters()
                .iter()
                .map(|p| self.lens.lookup_type(p))
                .collect(),
        )
    }

    fn map_handle(&self, handle: &MethodHandleRef) -> MethodHandleRef {
        let member = match &handle.member {
            HandleMember::Field(field) => HandleMember::Field(self.lens.lookup_field(field)),
            HandleMember::Method(method) => HandleMember::Method(
                self.lens
                    .lookup_method(method, None, InvokeKind::Static)
                    .reference,
            ),
        };
        MethodHandleRef {
            kind: handle.kind,
            member,
            interface: handle.interface,
        }
    }

    fn map_constant(&self, constant: &ConstValue) -> ConstValue {
        match constant {
            ConstValue::Class(ty) => ConstValue::Class(self.lens.lookup_type(ty)),
            ConstValue::MethodType(proto) => ConstValue::MethodType(self.map_proto(proto)),
            ConstValue::MethodHandle(handle) => ConstValue::MethodHandle(self.map_handle(handle)),
            other => other.clone(),
        }
    }

    fn map_call_site(&self, call_site: &CallSite) -> CallSite {
        CallSite {
            name: call_site.name.clone(),
            proto: self.map_proto(&call_site.proto),
            bootstrap: self.map_handle(&call_site.bootstrap),
            arguments: call_site
                .arguments
                .iter()
                .map(|a| self.map_constant(a))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        code::{instruction::InvokeKind, CfInstruction},
        ir::IrBuilder,
        lens::{GraphLens, LensLayer},
        program::{descriptor::ValueKind, flags::MethodAccessFlags},
        test::fixtures::{invoke, method_with_code},
    };

    fn merge_lens() -> GraphLens {
        let mut builder = LensLayer::builder("merge");
        builder
            .map_type(TypeRef::class("a/B"), TypeRef::class("a/A"))
            .map_method(
                MethodRef::parse("a/B", "<init>", "()V").unwrap(),
                MethodRef::parse("a/A", "<init>", "(I)V").unwrap(),
            )
            .add_extra_arguments(
                MethodRef::parse("a/A", "<init>", "(I)V").unwrap(),
                vec![ConstValue::Int(1)],
            );
        GraphLens::identity().extend(builder.build().unwrap())
    }

    #[test]
    fn test_rewrites_allocation_and_constructor_call() {
        let method = method_with_code(
            MethodRef::parse("a/Main", "make", "()Ljava/lang/Object;").unwrap(),
            MethodAccessFlags::STATIC,
            vec![
                CfInstruction::New(TypeRef::class("a/B")),
                CfInstruction::Stack(crate::code::instruction::StackOp::Dup),
                invoke(InvokeKind::Special, "a/B", "<init>", "()V"),
                CfInstruction::Return(Some(ValueKind::Reference)),
            ],
        );
        let mut ir = IrBuilder::new(&method).unwrap().build().unwrap();
        let lens = FlattenedLens::new(merge_lens());
        assert!(LensCodeRewriter::new(&lens).rewrite(&mut ir).unwrap());
        ir.validate().unwrap();

        let ops: Vec<&IrOp> = ir.instructions().map(|(_, i)| &i.op).collect();
        assert!(ops.contains(&&IrOp::NewInstance(TypeRef::class("a/A"))));
        assert!(ops.contains(&&IrOp::Const(ConstValue::Int(1))));
        let call = ops
            .iter()
            .find_map(|op| match op {
                IrOp::Invoke {
                    method, arguments, ..
                } => Some((method.clone(), arguments.len())),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.0, MethodRef::parse("a/A", "<init>", "(I)V").unwrap());
        assert_eq!(call.1, 2);
    }

    #[test]
    fn test_grown_signature_gets_new_arguments() {
        let method = method_with_code(
            MethodRef::parse("a/B", "<init>", "()V").unwrap(),
            MethodAccessFlags::PUBLIC,
            vec![
                CfInstruction::Load {
                    kind: ValueKind::Reference,
                    local: 0,
                },
                invoke(InvokeKind::Special, "java/lang/Object", "<init>", "()V"),
                CfInstruction::Return(None),
            ],
        );
        let mut ir = IrBuilder::new(&method).unwrap().build().unwrap();
        let lens = FlattenedLens::new(merge_lens());
        LensCodeRewriter::new(&lens).rewrite(&mut ir).unwrap();

        assert_eq!(
            ir.method(),
            &MethodRef::parse("a/A", "<init>", "(I)V").unwrap()
        );
        assert_eq!(ir.arguments().len(), 2);
        assert_eq!(ir.value_type(ir.arguments()[1]), TypeElement::Int);
        ir.validate().unwrap();
    }

    #[test]
    fn test_identity_lens_changes_nothing() {
        let method = method_with_code(
            MethodRef::parse("a/Main", "run", "()V").unwrap(),
            MethodAccessFlags::STATIC,
            vec![CfInstruction::Return(None)],
        );
        let mut ir = IrBuilder::new(&method).unwrap().build().unwrap();
        let before = ir.clone();
        let lens = FlattenedLens::new(GraphLens::identity());
        assert!(!LensCodeRewriter::new(&lens).rewrite(&mut ir).unwrap());
        assert_eq!(ir, before);
    }
}

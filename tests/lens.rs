//! Graph lens integration tests.
//!
//! Layers are built the way passes build them, then applied to references and to whole
//! method bodies (stack code -> IR -> rewrite -> stack code).

mod common;

use cfshrink::{
    code::{
        instruction::{InvokeKind, StackOp},
        CfInstruction, ConstValue,
    },
    ir::{IrBuilder, IrEmitter},
    lens::{FlattenedLens, GraphLens, LensCodeRewriter, LensLayer},
    program::{
        descriptor::ValueKind,
        flags::MethodAccessFlags,
        references::{MethodRef, TypeRef},
    },
    Result,
};

use common::{invoke, method, with_body};

/// Merges `app/B` into `app/A`; `new B()` becomes `new A(1)`.
fn merge_lens() -> Result<GraphLens> {
    let entry = MethodRef::parse("app/A", "<init>", "(I)V")?;
    let mut builder = LensLayer::builder("merge");
    builder
        .map_type(TypeRef::class("app/B"), TypeRef::class("app/A"))
        .map_method(MethodRef::parse("app/B", "<init>", "()V")?, entry.clone())
        .map_method(
            MethodRef::parse("app/B", "run", "()V")?,
            MethodRef::parse("app/A", "run$B", "()V")?,
        )
        .add_extra_arguments(entry, vec![ConstValue::Int(1)]);
    Ok(GraphLens::identity().extend(builder.build()?))
}

#[test]
fn test_reference_lookups_and_inverses() -> Result<()> {
    let lens = merge_lens()?;
    let b = TypeRef::class("app/B");
    let a = TypeRef::class("app/A");
    assert_eq!(lens.lookup_type(&b), a);
    assert_eq!(lens.lookup_type(&TypeRef::class("app/C")), TypeRef::class("app/C"));
    assert_eq!(lens.original_types(&a), vec![a.clone(), b.clone()]);

    let run = MethodRef::parse("app/B", "run", "()V")?;
    let moved = lens.lookup_method_reference(&run);
    assert_eq!(moved, MethodRef::parse("app/A", "run$B", "()V")?);
    assert_eq!(lens.original_method_signature(&moved), run);

    let result = lens.lookup_method(&MethodRef::parse("app/B", "<init>", "()V")?, None, InvokeKind::Special);
    assert_eq!(result.reference, MethodRef::parse("app/A", "<init>", "(I)V")?);
    assert_eq!(result.extra_arguments, vec![ConstValue::Int(1)]);
    Ok(())
}

#[test]
fn test_descriptors_follow_type_mappings() -> Result<()> {
    let lens = merge_lens()?;
    let user = MethodRef::parse("app/Main", "use", "(Lapp/B;)Lapp/B;")?;
    assert_eq!(
        lens.lookup_method_reference(&user),
        MethodRef::parse("app/Main", "use", "(Lapp/A;)Lapp/A;")?
    );
    Ok(())
}

#[test]
fn test_layers_compose_like_sequential_lookups() -> Result<()> {
    let first = merge_lens()?;
    let mut builder = LensLayer::builder("rename");
    builder.map_type(TypeRef::class("app/A"), TypeRef::class("a/a"));
    let second = GraphLens::identity().extend(builder.build()?);

    let composed = first.compose(&second);
    assert_eq!(composed.depth(), 2);
    for ty in ["app/A", "app/B", "app/C"] {
        let ty = TypeRef::class(ty);
        assert_eq!(composed.lookup_type(&ty), second.lookup_type(&first.lookup_type(&ty)));
    }
    assert_eq!(
        composed.original_method_signature(&MethodRef::parse("a/a", "run$B", "()V")?),
        MethodRef::parse("app/B", "run", "()V")?
    );
    Ok(())
}

#[test]
fn test_conflicting_mappings_are_rejected() -> Result<()> {
    let mut builder = LensLayer::builder("broken");
    builder
        .map_type(TypeRef::class("app/B"), TypeRef::class("app/A"))
        .map_type(TypeRef::class("app/B"), TypeRef::class("app/C"));
    assert!(matches!(builder.build(), Err(cfshrink::Error::LensError(_))));
    Ok(())
}

#[test]
fn test_body_rewrite_survives_emission() -> Result<()> {
    let make = with_body(
        method(
            "app/Main",
            "make",
            "()Ljava/lang/Object;",
            MethodAccessFlags::STATIC,
        ),
        vec![
            CfInstruction::New(TypeRef::class("app/B")),
            CfInstruction::Stack(StackOp::Dup),
            invoke(InvokeKind::Special, "app/B", "<init>", "()V"),
            CfInstruction::Return(Some(ValueKind::Reference)),
        ],
    );
    let mut ir = IrBuilder::new(&make)?.build()?;
    let lens = FlattenedLens::new(merge_lens()?);
    assert!(LensCodeRewriter::new(&lens).rewrite(&mut ir)?);
    ir.validate()?;

    let code = IrEmitter::new(&ir).emit()?;
    let entry = MethodRef::parse("app/A", "<init>", "(I)V")?;
    assert!(code.instructions.contains(&CfInstruction::New(TypeRef::class("app/A"))));
    assert!(code
        .instructions
        .contains(&CfInstruction::Const(ConstValue::Int(1))));
    assert!(code.instructions.iter().any(|instruction| matches!(
        instruction,
        CfInstruction::Invoke { kind: InvokeKind::Special, method, .. } if *method == entry
    )));
    assert!(!code
        .instructions
        .contains(&CfInstruction::New(TypeRef::class("app/B"))));
    Ok(())
}

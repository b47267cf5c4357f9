//! Tree-shaking integration tests.
//!
//! These tests drive the [`Enqueuer`] through the public API:
//! 1. Build a small program with [`ProgramGraph::builder`]
//! 2. Declare roots with a [`RootSet`]
//! 3. Run the fixpoint and check liveness, pruning and diagnostics

mod common;

use cfshrink::{
    code::{
        instruction::{InvokeKind, StackOp},
        CfInstruction,
    },
    prelude::*,
    program::flags::FieldAccessFlags,
};

use common::{class, constructor, empty_virtual, instantiate, invoke, main_method, main_ref, program_of};

fn field(holder: &str, name: &str) -> FieldRef {
    FieldRef::parse(holder, name, "I").unwrap()
}

/// `Main.main` reads `Config.level` and starts a `Service`; `Config.unused`, `Service.stop`
/// and the class `Unused` are dead.
fn service_program() -> Result<ProgramGraph> {
    let mut body = vec![
        CfInstruction::StaticGet(field("app/Config", "level")),
        CfInstruction::Stack(StackOp::Pop),
    ];
    body.extend(instantiate("app/Service"));
    body.push(invoke(InvokeKind::Virtual, "app/Service", "start", "()V"));
    body.push(CfInstruction::Return(None));

    program_of(vec![
        class("app/Main").with_method(main_method(body)),
        class("app/Config")
            .with_field(FieldDef::new(
                field("app/Config", "level"),
                FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC,
            ))
            .with_field(FieldDef::new(
                field("app/Config", "unused"),
                FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC,
            )),
        class("app/Service")
            .with_method(constructor("app/Service", "java/lang/Object"))
            .with_method(empty_virtual("app/Service", "start"))
            .with_method(empty_virtual("app/Service", "stop")),
        class("app/Unused").with_method(empty_virtual("app/Unused", "run")),
    ])
}

#[test]
fn test_liveness_from_main() -> Result<()> {
    let program = service_program()?;
    let policy = RootSet::new().keep_method(main_ref());
    let liveness = Enqueuer::new(&program, &policy, &ShrinkerOptions::default()).run()?;

    assert!(liveness.is_live_type(&TypeRef::class("app/Config")));
    assert!(liveness.is_live_type(&TypeRef::class("app/Service")));
    assert!(liveness.is_instantiated(&TypeRef::class("app/Service")));
    assert!(!liveness.is_instantiated(&TypeRef::class("app/Config")));
    assert!(!liveness.is_live_type(&TypeRef::class("app/Unused")));

    let start = MethodRef::parse("app/Service", "start", "()V")?;
    assert!(liveness.is_live_method(&start));
    assert!(!liveness.is_live_method(&start.with_name("stop")));
    assert!(liveness.is_field_read(&field("app/Config", "level")));
    assert!(!liveness.is_field_read(&field("app/Config", "unused")));
    Ok(())
}

#[test]
fn test_prune_removes_dead_definitions() -> Result<()> {
    let program = service_program()?;
    let policy = RootSet::new().keep_method(main_ref());
    let liveness = Enqueuer::new(&program, &policy, &ShrinkerOptions::default()).run()?;
    let pruned = liveness.prune(&program);

    assert_eq!(pruned.removed_classes, vec![TypeRef::class("app/Unused")]);
    assert!(pruned
        .removed_methods
        .contains(&MethodRef::parse("app/Service", "stop", "()V")?));
    assert_eq!(pruned.removed_fields, vec![field("app/Config", "unused")]);

    assert!(pruned.program.definition_for(&TypeRef::class("app/Unused")).is_none());
    assert!(pruned.program.definition_for(&TypeRef::object()).is_some());

    // Removed fields are marked dead on the info they share with the input program.
    let info = |name: &str| {
        program
            .field_definition(&field("app/Config", name))
            .map(|f| f.optimization_info.is_dead())
    };
    assert_eq!(info("unused"), Some(true));
    assert_eq!(info("level"), Some(false));
    Ok(())
}

#[test]
fn test_more_roots_never_shrink_the_live_set() -> Result<()> {
    let program = service_program()?;
    let options = ShrinkerOptions::default();
    let small = RootSet::new().keep_method(main_ref());
    let large = RootSet::new()
        .keep_method(main_ref())
        .keep_class_and_members(TypeRef::class("app/Unused"));

    let small = Enqueuer::new(&program, &small, &options).run()?;
    let large = Enqueuer::new(&program, &large, &options).run()?;
    assert!(large.contains(&small));
    assert!(!small.contains(&large));
    assert!(large.is_live_method(&MethodRef::parse("app/Unused", "run", "()V")?));
    Ok(())
}

#[test]
fn test_sequential_and_parallel_agree() -> Result<()> {
    let program = service_program()?;
    let policy = RootSet::new().keep_method(main_ref());
    let parallel = Enqueuer::new(&program, &policy, &ShrinkerOptions::default()).run()?;
    let sequential = Enqueuer::new(&program, &policy, &ShrinkerOptions::default().sequential()).run()?;

    let methods = |liveness: &AppInfoWithLiveness| liveness.live_methods().cloned().collect::<Vec<_>>();
    assert_eq!(methods(&parallel), methods(&sequential));
    assert!(parallel.contains(&sequential) && sequential.contains(&parallel));
    Ok(())
}

#[test]
fn test_missing_definitions() -> Result<()> {
    let program = program_of(vec![class("app/Main").with_method(main_method(vec![
        invoke(InvokeKind::Static, "vendor/Api", "call", "()V"),
        CfInstruction::Return(None),
    ]))])?;
    let policy = RootSet::new().keep_method(main_ref());

    let result = Enqueuer::new(&program, &policy, &ShrinkerOptions::default()).run();
    match result {
        Err(Error::MissingDefinitions { count, report }) => {
            assert_eq!(count, 1);
            assert!(report.contains("vendor/Api"));
        }
        other => panic!("expected missing definitions, got {other:?}"),
    }

    let suppressed = ShrinkerOptions::default().with_dont_warn("vendor.*");
    assert!(Enqueuer::new(&program, &policy, &suppressed).run().is_ok());
    Ok(())
}

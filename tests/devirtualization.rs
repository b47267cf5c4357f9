//! Virtual dispatch analysis integration tests.
//!
//! Covers the virtual root analysis, its use of liveness (also across class merging), and
//! the call graph built on top of it.

mod common;

use std::collections::BTreeMap;

use cfshrink::{
    code::{
        instruction::{InvokeKind, StackOp},
        CfInstruction,
    },
    optimize::{CallGraph, VirtualRootMethods},
    prelude::*,
};

use common::{
    class, constructor, empty_virtual, instantiate, invoke, main_method, main_ref, method,
    program_of, with_body,
};

fn m(holder: &str) -> MethodRef {
    MethodRef::parse(holder, "m", "()V").unwrap()
}

/// Abstract `Base.m()` with the concrete overrides `One.m()` and `Two.m()`. `main`
/// instantiates only `One` and calls `Base.m()` on it.
fn shapes() -> Result<ProgramGraph> {
    let mut body = instantiate("app/One");
    body.push(invoke(InvokeKind::Virtual, "app/Base", "m", "()V"));
    body.push(CfInstruction::Return(None));
    program_of(vec![
        class("app/Main").with_method(main_method(body)),
        class("app/Base")
            .with_access(ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT)
            .with_method(constructor("app/Base", "java/lang/Object"))
            .with_method(method(
                "app/Base",
                "m",
                "()V",
                MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            )),
        class("app/One")
            .with_super(TypeRef::class("app/Base"))
            .with_method(constructor("app/One", "app/Base"))
            .with_method(empty_virtual("app/One", "m")),
        class("app/Two")
            .with_super(TypeRef::class("app/Base"))
            .with_method(constructor("app/Two", "app/Base"))
            .with_method(empty_virtual("app/Two", "m")),
    ])
}

#[test]
fn test_roots_and_overrides() -> Result<()> {
    let program = shapes()?;
    let roots = VirtualRootMethods::compute(&program);
    assert_eq!(roots.root_of(&m("app/One")), Some(&m("app/Base")));
    assert_eq!(roots.root_of(&m("app/Two")), Some(&m("app/Base")));
    assert_eq!(roots.overrides_of(&m("app/Base")).len(), 2);
    assert!(!roots.is_monomorphic(&m("app/Base")));

    // Two concrete implementations: no single target without liveness.
    assert_eq!(roots.single_target(&m("app/Base")), None);
    Ok(())
}

#[test]
fn test_liveness_narrows_dispatch() -> Result<()> {
    let program = shapes()?;
    let policy = RootSet::new().keep_method(main_ref());
    let liveness = Enqueuer::new(&program, &policy, &ShrinkerOptions::default()).run()?;
    assert!(liveness.is_live_method(&m("app/One")));
    assert!(!liveness.is_live_method(&m("app/Two")));

    let roots = VirtualRootMethods::compute_with_liveness(&program, &liveness);
    assert_eq!(roots.single_target(&m("app/Base")), Some(&m("app/One")));
    assert_eq!(
        CallGraph::static_target(&program, &roots, InvokeKind::Virtual, &m("app/Base")),
        Some(m("app/One"))
    );
    Ok(())
}

#[test]
fn test_devirtualized_call_is_inlined() -> Result<()> {
    let program = shapes()?;
    let policy = RootSet::new().keep_method(main_ref());
    let options = ShrinkerOptions::default().with_class_merging(false);
    let result = Shrinker::new(program, policy, options).run()?;

    assert!(result.events.count_kind(EventKind::MethodInlined) >= 1);
    assert!(result.class(&TypeRef::class("app/Two")).is_none());
    let main = result
        .program
        .method_definition(&main_ref())
        .and_then(|main| main.code.clone())
        .ok_or_else(|| Error::Error("main lost its body".to_string()))?;
    assert!(!main.instructions.iter().any(|instruction| matches!(
        instruction,
        CfInstruction::Invoke { method, .. } if method.name.as_str() == "m"
    )));
    Ok(())
}

/// `Base.m()` overridden by `app/Second` (stores 7 to `Log.hits`) and by `other/Third`
/// (stores 9); `main` reads `Log.hits` at the end. `app/First` declares no `m` and is
/// merged with `app/Second`.
fn merged_override_program() -> Result<ProgramGraph> {
    let hits = FieldRef::parse("app/Log", "hits", "I")?;
    let store = |holder: &str, value: i32| {
        with_body(
            method(holder, "m", "()V", MethodAccessFlags::PUBLIC),
            vec![
                CfInstruction::Const(ConstValue::Int(value)),
                CfInstruction::StaticPut(hits.clone()),
                CfInstruction::Return(None),
            ],
        )
    };

    let mut body = instantiate("app/First");
    body.push(CfInstruction::Stack(StackOp::Pop));
    body.extend(instantiate("app/Second"));
    body.push(invoke(InvokeKind::Virtual, "app/Base", "m", "()V"));
    body.extend(instantiate("other/Third"));
    body.push(invoke(InvokeKind::Virtual, "app/Base", "m", "()V"));
    body.push(CfInstruction::StaticGet(hits.clone()));
    body.push(CfInstruction::Stack(StackOp::Pop));
    body.push(CfInstruction::Return(None));

    program_of(vec![
        class("app/Main").with_method(main_method(body)),
        class("app/Log").with_field(FieldDef::new(
            hits.clone(),
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC,
        )),
        class("app/Base")
            .with_access(ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT)
            .with_method(constructor("app/Base", "java/lang/Object"))
            .with_method(method(
                "app/Base",
                "m",
                "()V",
                MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            )),
        class("app/First")
            .with_super(TypeRef::class("app/Base"))
            .with_method(constructor("app/First", "app/Base")),
        class("app/Second")
            .with_super(TypeRef::class("app/Base"))
            .with_method(constructor("app/Second", "app/Base"))
            .with_method(store("app/Second", 7)),
        class("other/Third")
            .with_super(TypeRef::class("app/Base"))
            .with_method(constructor("other/Third", "app/Base"))
            .with_method(store("other/Third", 9)),
    ])
}

#[test]
fn test_moved_override_stays_a_dispatch_target() -> Result<()> {
    let policy = RootSet::new().keep_method(main_ref());
    let result = Shrinker::new(merged_override_program()?, policy, ShrinkerOptions::default())
        .run()?;

    assert!(result.events.count_kind(EventKind::ClassMerged) >= 1);
    assert!(result.class(&TypeRef::class("app/Second")).is_none());

    // Both stores survive: the call on the merged receiver was not redirected to `Third.m`.
    let stored: Vec<i32> = result
        .program
        .program_classes()
        .flat_map(|class| class.methods.iter())
        .filter_map(|method| method.code.as_deref())
        .flat_map(|code| code.instructions.windows(2))
        .filter_map(|pair| match pair {
            [CfInstruction::Const(ConstValue::Int(value)), CfInstruction::StaticPut(field)]
                if field.name.as_str() == "hits" =>
            {
                Some(*value)
            }
            _ => None,
        })
        .collect();
    assert!(stored.contains(&7), "stores: {stored:?}");
    assert!(stored.contains(&9), "stores: {stored:?}");
    Ok(())
}

#[test]
fn test_call_graph_breaks_cycles_deterministically() -> Result<()> {
    let static_method = |name: &str, calls: &[&str]| {
        let mut body: Vec<CfInstruction> = calls
            .iter()
            .map(|callee| invoke(InvokeKind::Static, "app/Util", callee, "()V"))
            .collect();
        body.push(CfInstruction::Return(None));
        with_body(
            method("app/Util", name, "()V", MethodAccessFlags::STATIC),
            body,
        )
    };
    let program = program_of(vec![class("app/Util")
        .with_method(static_method("a", &["b"]))
        .with_method(static_method("b", &["a", "c"]))
        .with_method(static_method("c", &[]))])?;
    let roots = VirtualRootMethods::compute(&program);

    let util = |name: &str| MethodRef::parse("app/Util", name, "()V").unwrap();
    let call_sites: BTreeMap<MethodRef, Vec<(InvokeKind, MethodRef)>> = [
        (util("a"), vec![(InvokeKind::Static, util("b"))]),
        (
            util("b"),
            vec![(InvokeKind::Static, util("a")), (InvokeKind::Static, util("c"))],
        ),
        (util("c"), Vec::new()),
    ]
    .into_iter()
    .collect();

    let graph = CallGraph::build(&program, &roots, call_sites.clone());
    assert_eq!(graph.len(), 3);
    assert_eq!(graph.removed_edges(), &[(util("b"), util("a"))]);
    assert_eq!(
        graph.waves(),
        vec![vec![util("c")], vec![util("b")], vec![util("a")]]
    );

    // Same input, same result.
    let again = CallGraph::build(&program, &roots, call_sites);
    assert_eq!(again.removed_edges(), graph.removed_edges());
    assert_eq!(again.waves(), graph.waves());
    Ok(())
}

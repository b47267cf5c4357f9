//! Benchmarks for the tree-shaking fixpoint.
//!
//! A synthetic program of `N` classes in a chain: each class instantiates the next one and
//! calls a virtual method on it, and every class also declares a dead method. The enqueuer
//! has to walk the whole chain to reach its fixpoint.

extern crate cfshrink;

use cfshrink::{
    code::{
        instruction::{InvokeKind, StackOp},
        CfCode, CfInstruction,
    },
    program::{
        descriptor::ValueKind,
        flags::MethodAccessFlags,
        references::{MethodRef, TypeRef},
        ClassDef, ClassKind, MethodDef, ProgramGraph,
    },
    shaking::{Enqueuer, RootSet},
    ShrinkerOptions,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn body(locals: u16, instructions: Vec<CfInstruction>) -> CfCode {
    let mut code = CfCode::new(0, locals, instructions);
    code.max_stack = code.compute_max_stack();
    code
}

fn invoke(kind: InvokeKind, holder: &str, name: &str, descriptor: &str) -> CfInstruction {
    CfInstruction::Invoke {
        kind,
        method: MethodRef::parse(holder, name, descriptor).unwrap(),
        interface: false,
    }
}

fn link(index: usize) -> String {
    format!("bench/Link{index}")
}

/// `bench/Link{index}` whose `step()` instantiates the next link and calls its `step()`.
fn chain_class(index: usize, length: usize) -> ClassDef {
    let name = link(index);
    let constructor = MethodDef::new(
        MethodRef::parse(&name, "<init>", "()V").unwrap(),
        MethodAccessFlags::PUBLIC,
    )
    .with_code(body(
        1,
        vec![
            CfInstruction::Load {
                kind: ValueKind::Reference,
                local: 0,
            },
            invoke(InvokeKind::Special, "java/lang/Object", "<init>", "()V"),
            CfInstruction::Return(None),
        ],
    ));

    let mut step = Vec::new();
    if index + 1 < length {
        let next = link(index + 1);
        step.extend([
            CfInstruction::New(TypeRef::class(&next)),
            CfInstruction::Stack(StackOp::Dup),
            invoke(InvokeKind::Special, &next, "<init>", "()V"),
            invoke(InvokeKind::Virtual, &next, "step", "()V"),
        ]);
    }
    step.push(CfInstruction::Return(None));

    let method = |method_name: &str, instructions: Vec<CfInstruction>| {
        MethodDef::new(
            MethodRef::parse(&name, method_name, "()V").unwrap(),
            MethodAccessFlags::PUBLIC,
        )
        .with_code(body(1, instructions))
    };
    ClassDef::new(TypeRef::class(&name), ClassKind::Program)
        .with_method(constructor)
        .with_method(method("step", step))
        .with_method(method("unused", vec![CfInstruction::Return(None)]))
}

fn chain_program(length: usize) -> ProgramGraph {
    let mut builder = ProgramGraph::builder();
    builder
        .add_class(
            ClassDef::new(TypeRef::object(), ClassKind::Library).with_method(MethodDef::new(
                MethodRef::parse("java/lang/Object", "<init>", "()V").unwrap(),
                MethodAccessFlags::PUBLIC,
            )),
        )
        .unwrap();
    for index in 0..length {
        builder.add_class(chain_class(index, length)).unwrap();
    }
    builder.build()
}

/// Benchmark the fixpoint over chains of increasing length.
fn bench_enqueuer_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueuer_chain");
    for length in [16, 128, 512] {
        let program = chain_program(length);
        let policy = RootSet::new().keep_method(MethodRef::parse(&link(0), "step", "()V").unwrap());

        group.bench_with_input(BenchmarkId::new("parallel", length), &program, |b, program| {
            let options = ShrinkerOptions::default();
            b.iter(|| {
                let liveness = Enqueuer::new(black_box(program), &policy, &options).compute();
                black_box(liveness.stats())
            });
        });
        group.bench_with_input(BenchmarkId::new("sequential", length), &program, |b, program| {
            let options = ShrinkerOptions::default().sequential();
            b.iter(|| {
                let liveness = Enqueuer::new(black_box(program), &policy, &options).compute();
                black_box(liveness.stats())
            });
        });
    }
    group.finish();
}

/// Benchmark pruning after the fixpoint.
fn bench_prune(c: &mut Criterion) {
    let program = chain_program(256);
    let policy = RootSet::new().keep_method(MethodRef::parse(&link(0), "step", "()V").unwrap());
    let liveness = Enqueuer::new(&program, &policy, &ShrinkerOptions::default()).compute();

    c.bench_function("enqueuer_prune_256", |b| {
        b.iter(|| {
            let pruned = liveness.prune(black_box(&program));
            black_box(pruned.removed_methods.len())
        });
    });
}

criterion_group!(benches, bench_enqueuer_chain, bench_prune);
criterion_main!(benches);

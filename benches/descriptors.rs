//! Benchmarks for descriptor parsing.
//!
//! Tests parsing performance for the descriptor shapes found in real class files:
//! - Primitive and class field descriptors
//! - Nested array descriptors
//! - Method descriptors with few and many parameters

extern crate cfshrink;

use cfshrink::program::references::{MethodRef, ProtoRef, TypeRef};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

/// Benchmark parsing field descriptors.
fn bench_field_descriptors(c: &mut Criterion) {
    let descriptors = ["I", "J", "Ljava/lang/String;", "[[Lcom/example/Node;", "[D"];

    c.bench_function("descriptor_field", |b| {
        b.iter(|| {
            for descriptor in descriptors {
                let ty = TypeRef::parse(black_box(descriptor)).unwrap();
                black_box(ty);
            }
        });
    });
}

/// Benchmark parsing a method descriptor without parameters.
/// Descriptor: ()V
fn bench_method_descriptor_void(c: &mut Criterion) {
    c.bench_function("descriptor_method_void", |b| {
        b.iter(|| {
            let proto = ProtoRef::parse(black_box("()V")).unwrap();
            black_box(proto)
        });
    });
}

/// Benchmark parsing a method descriptor with mixed wide, reference and array parameters.
fn bench_method_descriptor_mixed(c: &mut Criterion) {
    let descriptor = "(IJLjava/lang/String;[[BDLjava/util/Map;Z[Ljava/lang/Object;)Ljava/util/List;";

    c.bench_function("descriptor_method_mixed", |b| {
        b.iter(|| {
            let proto = ProtoRef::parse(black_box(descriptor)).unwrap();
            black_box(proto.parameter_slots())
        });
    });
}

/// Benchmark building method references, which interns holder, name and descriptor.
fn bench_method_reference(c: &mut Criterion) {
    c.bench_function("descriptor_method_reference", |b| {
        b.iter(|| {
            let method = MethodRef::parse(
                black_box("com/example/Service"),
                black_box("handle"),
                black_box("(Lcom/example/Request;I)Lcom/example/Response;"),
            )
            .unwrap();
            black_box(method)
        });
    });
}

/// Benchmark Java name conversion used by keep rules and retracing.
fn bench_java_names(c: &mut Criterion) {
    let ty = TypeRef::class("com/example/deeply/nested/Outer$Inner");

    c.bench_function("descriptor_java_name", |b| {
        b.iter(|| black_box(black_box(&ty).java_name()));
    });
}

criterion_group!(
    benches,
    bench_field_descriptors,
    bench_method_descriptor_void,
    bench_method_descriptor_mixed,
    bench_method_reference,
    bench_java_names,
);
criterion_main!(benches);

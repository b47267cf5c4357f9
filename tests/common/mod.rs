//! Program builders shared by the integration tests.

#![allow(dead_code)]

use cfshrink::{
    code::{
        instruction::{InvokeKind, StackOp},
        CfCode, CfInstruction,
    },
    program::{
        descriptor::ValueKind,
        flags::{ClassAccessFlags, MethodAccessFlags},
        references::{MethodRef, TypeRef},
        ClassDef, ClassKind, MethodDef, ProgramGraph,
    },
    Result,
};

pub const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

pub fn main_ref() -> MethodRef {
    MethodRef::parse("app/Main", "main", MAIN_DESCRIPTOR).unwrap()
}

pub fn class(name: &str) -> ClassDef {
    ClassDef::new(TypeRef::class(name), ClassKind::Program)
}

pub fn interface(name: &str) -> ClassDef {
    class(name).with_access(
        ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT,
    )
}

pub fn method(holder: &str, name: &str, descriptor: &str, access: MethodAccessFlags) -> MethodDef {
    MethodDef::new(MethodRef::parse(holder, name, descriptor).unwrap(), access)
}

/// A method whose body is `instructions`, with enough locals for its arguments and every
/// slot the body touches.
pub fn with_body(method: MethodDef, instructions: Vec<CfInstruction>) -> MethodDef {
    let mut locals =
        method.reference.proto.parameter_slots() as u16 + u16::from(!method.is_static());
    for instruction in &instructions {
        match instruction {
            CfInstruction::Load { kind, local } | CfInstruction::Store { kind, local } => {
                locals = locals.max(local + kind.slots() as u16);
            }
            CfInstruction::Iinc { local, .. } => locals = locals.max(local + 1),
            _ => {}
        }
    }
    let mut code = CfCode::new(0, locals, instructions);
    code.max_stack = code.compute_max_stack();
    method.with_code(code)
}

pub fn main_method(instructions: Vec<CfInstruction>) -> MethodDef {
    with_body(
        method(
            "app/Main",
            "main",
            MAIN_DESCRIPTOR,
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        ),
        instructions,
    )
}

pub fn invoke(kind: InvokeKind, holder: &str, name: &str, descriptor: &str) -> CfInstruction {
    CfInstruction::Invoke {
        kind,
        method: MethodRef::parse(holder, name, descriptor).unwrap(),
        interface: kind == InvokeKind::Interface,
    }
}

/// `aload_0; invokespecial super.<init>()V; return`
pub fn constructor(holder: &str, super_type: &str) -> MethodDef {
    with_body(
        method(holder, "<init>", "()V", MethodAccessFlags::PUBLIC),
        vec![
            CfInstruction::Load {
                kind: ValueKind::Reference,
                local: 0,
            },
            invoke(InvokeKind::Special, super_type, "<init>", "()V"),
            CfInstruction::Return(None),
        ],
    )
}

/// `new ty; dup; invokespecial ty.<init>()V`
pub fn instantiate(ty: &str) -> Vec<CfInstruction> {
    vec![
        CfInstruction::New(TypeRef::class(ty)),
        CfInstruction::Stack(StackOp::Dup),
        invoke(InvokeKind::Special, ty, "<init>", "()V"),
    ]
}

pub fn empty_virtual(holder: &str, name: &str) -> MethodDef {
    with_body(
        method(holder, name, "()V", MethodAccessFlags::PUBLIC),
        vec![CfInstruction::Return(None)],
    )
}

/// `java/lang/Object` and `java/lang/String` as library classes.
pub fn library() -> Vec<ClassDef> {
    vec![
        ClassDef::new(TypeRef::object(), ClassKind::Library).with_method(method(
            "java/lang/Object",
            "<init>",
            "()V",
            MethodAccessFlags::PUBLIC,
        )),
        ClassDef::new(TypeRef::string(), ClassKind::Library),
    ]
}

pub fn program_of(classes: Vec<ClassDef>) -> Result<ProgramGraph> {
    let mut builder = ProgramGraph::builder();
    for class in classes.into_iter().chain(library()) {
        builder.add_class(class)?;
    }
    Ok(builder.build())
}

//! Reference collection.
//!
//! A [`UseRegistry`] receives one callback per symbolic reference in a method body. The
//! enqueuer traces code in two steps: a [`UseCollector`] records the uses of a method into a
//! list of [`TracedUse`]s (this part runs in parallel), and the recorded uses are replayed
//! into a [`DefaultEnqueuerUseRegistry`] that forwards them to the single-writer
//! [`Enqueuer`].

use crate::{
    code::{CallSite, ConstValue, HandleMember, MethodHandleKind, MethodHandleRef},
    program::references::{FieldRef, MethodRef, Name, TypeRef},
    shaking::Enqueuer,
};

/// Visitor over the symbolic references of a method body.
///
/// Every callback defaults to doing nothing, so visitors only implement what they need.
#[allow(unused_variables)]
pub trait UseRegistry {
    /// `invokevirtual`
    fn register_invoke_virtual(&mut self, method: &MethodRef) {}

    /// `invokespecial` of a private method or an initializer
    fn register_invoke_direct(&mut self, method: &MethodRef) {}

    /// `invokestatic`
    fn register_invoke_static(&mut self, method: &MethodRef) {}

    /// `invokeinterface`
    fn register_invoke_interface(&mut self, method: &MethodRef) {}

    /// `invokespecial` of a superclass or default method
    fn register_invoke_super(&mut self, method: &MethodRef) {}

    /// `getfield`
    fn register_instance_field_read(&mut self, field: &FieldRef) {}

    /// `putfield`
    fn register_instance_field_write(&mut self, field: &FieldRef) {}

    /// `getstatic`
    fn register_static_field_read(&mut self, field: &FieldRef) {}

    /// `putstatic`
    fn register_static_field_write(&mut self, field: &FieldRef) {}

    /// `new`
    fn register_new_instance(&mut self, ty: &TypeRef) {}

    /// `ldc` of a class literal
    fn register_const_class(&mut self, ty: &TypeRef) {}

    /// `checkcast`
    fn register_check_cast(&mut self, ty: &TypeRef) {}

    /// A `checkcast` known to succeed.
    fn register_safe_check_cast(&mut self, ty: &TypeRef) {
        self.register_check_cast(ty);
    }

    /// `instanceof`
    fn register_instance_of(&mut self, ty: &TypeRef) {}

    /// Any other use of a type (array creation, method types, annotations).
    fn register_type_reference(&mut self, ty: &TypeRef) {}

    /// A caught exception type.
    fn register_exception_guard(&mut self, guard: &TypeRef) {
        self.register_type_reference(guard);
    }

    /// Forced static initialization of a class.
    fn register_init_class(&mut self, ty: &TypeRef) {}

    /// A method handle constant or bootstrap method.
    fn register_method_handle(&mut self, handle: &MethodHandleRef) {}

    /// An `invokedynamic` call site: its bootstrap method and static arguments.
    fn register_call_site(&mut self, call_site: &CallSite) {
        self.register_method_handle(&call_site.bootstrap);
        for argument in &call_site.arguments {
            match argument {
                ConstValue::MethodHandle(handle) => self.register_method_handle(handle),
                ConstValue::Class(ty) => self.register_const_class(ty),
                ConstValue::MethodType(proto) => {
                    self.register_type_reference(proto.return_type());
                    for param in proto.parameters() {
                        self.register_type_reference(param);
                    }
                }
                _ => {}
            }
        }
    }

    /// An invoke whose last pushed operand is the string constant `value`.
    fn register_invoke_with_constant_string(&mut self, method: &MethodRef, value: &Name) {}
}

/// One recorded registry callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracedUse {
    /// `invokevirtual`
    InvokeVirtual(MethodRef),
    /// direct `invokespecial`
    InvokeDirect(MethodRef),
    /// `invokestatic`
    InvokeStatic(MethodRef),
    /// `invokeinterface`
    InvokeInterface(MethodRef),
    /// super `invokespecial`
    InvokeSuper(MethodRef),
    /// `getfield`
    InstanceFieldRead(FieldRef),
    /// `putfield`
    InstanceFieldWrite(FieldRef),
    /// `getstatic`
    StaticFieldRead(FieldRef),
    /// `putstatic`
    StaticFieldWrite(FieldRef),
    /// `new`
    NewInstance(TypeRef),
    /// class literal
    ConstClass(TypeRef),
    /// `checkcast`
    CheckCast(TypeRef),
    /// `instanceof`
    InstanceOf(TypeRef),
    /// other type use
    TypeReference(TypeRef),
    /// catch type
    ExceptionGuard(TypeRef),
    /// forced initialization
    InitClass(TypeRef),
    /// method handle
    MethodHandle(MethodHandleRef),
    /// invoke with a constant string operand
    InvokeWithConstantString(MethodRef, Name),
}

impl TracedUse {
    /// Delivers this use to `registry`.
    pub fn replay(&self, registry: &mut dyn UseRegistry) {
        match self {
            TracedUse::InvokeVirtual(m) => registry.register_invoke_virtual(m),
            TracedUse::InvokeDirect(m) => registry.register_invoke_direct(m),
            TracedUse::InvokeStatic(m) => registry.register_invoke_static(m),
            TracedUse::InvokeInterface(m) => registry.register_invoke_interface(m),
            TracedUse::InvokeSuper(m) => registry.register_invoke_super(m),
            TracedUse::InstanceFieldRead(f) => registry.register_instance_field_read(f),
            TracedUse::InstanceFieldWrite(f) => registry.register_instance_field_write(f),
            TracedUse::StaticFieldRead(f) => registry.register_static_field_read(f),
            TracedUse::StaticFieldWrite(f) => registry.register_static_field_write(f),
            TracedUse::NewInstance(t) => registry.register_new_instance(t),
            TracedUse::ConstClass(t) => registry.register_const_class(t),
            TracedUse::CheckCast(t) => registry.register_check_cast(t),
            TracedUse::InstanceOf(t) => registry.register_instance_of(t),
            TracedUse::TypeReference(t) => registry.register_type_reference(t),
            TracedUse::ExceptionGuard(t) => registry.register_exception_guard(t),
            TracedUse::InitClass(t) => registry.register_init_class(t),
            TracedUse::MethodHandle(h) => registry.register_method_handle(h),
            TracedUse::InvokeWithConstantString(m, s) => {
                registry.register_invoke_with_constant_string(m, s);
            }
        }
    }
}

/// Records every callback in order.
#[derive(Debug, Default)]
pub struct UseCollector {
    /// Uses in the order they were reported
    pub uses: Vec<TracedUse>,
}

impl UseRegistry for UseCollector {
    fn register_invoke_virtual(&mut self, method: &MethodRef) {
        self.uses.push(TracedUse::InvokeVirtual(method.clone()));
    }

    fn register_invoke_direct(&mut self, method: &MethodRef) {
        self.uses.push(TracedUse::InvokeDirect(method.clone()));
    }

    fn register_invoke_static(&mut self, method: &MethodRef) {
        self.uses.push(TracedUse::InvokeStatic(method.clone()));
    }

    fn register_invoke_interface(&mut self, method: &MethodRef) {
        self.uses.push(TracedUse::InvokeInterface(method.clone()));
    }

    fn register_invoke_super(&mut self, method: &MethodRef) {
        self.uses.push(TracedUse::InvokeSuper(method.clone()));
    }

    fn register_instance_field_read(&mut self, field: &FieldRef) {
        self.uses.push(TracedUse::InstanceFieldRead(field.clone()));
    }

    fn register_instance_field_write(&mut self, field: &FieldRef) {
        self.uses.push(TracedUse::InstanceFieldWrite(field.clone()));
    }

    fn register_static_field_read(&mut self, field: &FieldRef) {
        self.uses.push(TracedUse::StaticFieldRead(field.clone()));
    }

    fn register_static_field_write(&mut self, field: &FieldRef) {
        self.uses.push(TracedUse::StaticFieldWrite(field.clone()));
    }

    fn register_new_instance(&mut self, ty: &TypeRef) {
        self.uses.push(TracedUse::NewInstance(ty.clone()));
    }

    fn register_const_class(&mut self, ty: &TypeRef) {
        self.uses.push(TracedUse::ConstClass(ty.clone()));
    }

    fn register_check_cast(&mut self, ty: &TypeRef) {
        self.uses.push(TracedUse::CheckCast(ty.clone()));
    }

    fn register_instance_of(&mut self, ty: &TypeRef) {
        self.uses.push(TracedUse::InstanceOf(ty.clone()));
    }

    fn register_type_reference(&mut self, ty: &TypeRef) {
        self.uses.push(TracedUse::TypeReference(ty.clone()));
    }

    fn register_exception_guard(&mut self, guard: &TypeRef) {
        self.uses.push(TracedUse::ExceptionGuard(guard.clone()));
    }

    fn register_init_class(&mut self, ty: &TypeRef) {
        self.uses.push(TracedUse::InitClass(ty.clone()));
    }

    fn register_method_handle(&mut self, handle: &MethodHandleRef) {
        self.uses.push(TracedUse::MethodHandle(handle.clone()));
    }

    fn register_invoke_with_constant_string(&mut self, method: &MethodRef, value: &Name) {
        self.uses
            .push(TracedUse::InvokeWithConstantString(method.clone(), value.clone()));
    }
}

/// Forwards registry callbacks to the [`Enqueuer`] with a fixed context method.
pub struct DefaultEnqueuerUseRegistry<'e, 'p> {
    enqueuer: &'e mut Enqueuer<'p>,
    context: MethodRef,
}

impl<'e, 'p> DefaultEnqueuerUseRegistry<'e, 'p> {
    /// Creates a registry tracing on behalf of `context`.
    pub fn new(enqueuer: &'e mut Enqueuer<'p>, context: MethodRef) -> Self {
        DefaultEnqueuerUseRegistry { enqueuer, context }
    }

    /// The method whose code is traced.
    #[must_use]
    pub fn context(&self) -> &MethodRef {
        &self.context
    }
}

impl UseRegistry for DefaultEnqueuerUseRegistry<'_, '_> {
    fn register_invoke_virtual(&mut self, method: &MethodRef) {
        self.enqueuer.trace_invoke_virtual(method, &self.context);
    }

    fn register_invoke_direct(&mut self, method: &MethodRef) {
        self.enqueuer.trace_invoke_direct(method, &self.context);
    }

    fn register_invoke_static(&mut self, method: &MethodRef) {
        self.enqueuer.trace_invoke_static(method, &self.context);
    }

    fn register_invoke_interface(&mut self, method: &MethodRef) {
        self.enqueuer.trace_invoke_interface(method, &self.context);
    }

    fn register_invoke_super(&mut self, method: &MethodRef) {
        self.enqueuer.trace_invoke_super(method, &self.context);
    }

    fn register_instance_field_read(&mut self, field: &FieldRef) {
        self.enqueuer.trace_instance_field_read(field, &self.context);
    }

    fn register_instance_field_write(&mut self, field: &FieldRef) {
        self.enqueuer.trace_instance_field_write(field, &self.context);
    }

    fn register_static_field_read(&mut self, field: &FieldRef) {
        self.enqueuer.trace_static_field_read(field, &self.context);
    }

    fn register_static_field_write(&mut self, field: &FieldRef) {
        self.enqueuer.trace_static_field_write(field, &self.context);
    }

    fn register_new_instance(&mut self, ty: &TypeRef) {
        self.enqueuer.trace_new_instance(ty, &self.context);
    }

    fn register_const_class(&mut self, ty: &TypeRef) {
        self.enqueuer.trace_const_class(ty, &self.context);
    }

    fn register_check_cast(&mut self, ty: &TypeRef) {
        self.enqueuer.trace_check_cast(ty, &self.context);
    }

    fn register_safe_check_cast(&mut self, ty: &TypeRef) {
        self.enqueuer.trace_type_reference(ty, &self.context);
    }

    fn register_instance_of(&mut self, ty: &TypeRef) {
        self.enqueuer.trace_instance_of(ty, &self.context);
    }

    fn register_type_reference(&mut self, ty: &TypeRef) {
        self.enqueuer.trace_type_reference(ty, &self.context);
    }

    fn register_exception_guard(&mut self, guard: &TypeRef) {
        self.enqueuer.trace_exception_guard(guard, &self.context);
    }

    fn register_init_class(&mut self, ty: &TypeRef) {
        self.enqueuer.trace_init_class(ty, &self.context);
    }

    fn register_method_handle(&mut self, handle: &MethodHandleRef) {
        self.enqueuer.trace_method_handle(handle, &self.context);
    }

    fn register_invoke_with_constant_string(&mut self, method: &MethodRef, value: &Name) {
        self.enqueuer
            .trace_invoke_with_constant_string(method, value, &self.context);
    }
}

/// Splits a method handle into the registry callbacks of the member access it performs.
pub fn register_method_handle_member(handle: &MethodHandleRef, registry: &mut dyn UseRegistry) {
    match (&handle.member, handle.kind) {
        (HandleMember::Field(field), MethodHandleKind::GetField) => {
            registry.register_instance_field_read(field);
        }
        (HandleMember::Field(field), MethodHandleKind::PutField) => {
            registry.register_instance_field_write(field);
        }
        (HandleMember::Field(field), MethodHandleKind::GetStatic) => {
            registry.register_static_field_read(field);
        }
        (HandleMember::Field(field), MethodHandleKind::PutStatic) => {
            registry.register_static_field_write(field);
        }
        (HandleMember::Method(method), MethodHandleKind::InvokeVirtual) => {
            registry.register_invoke_virtual(method);
        }
        (HandleMember::Method(method), MethodHandleKind::InvokeStatic) => {
            registry.register_invoke_static(method);
        }
        (HandleMember::Method(method), MethodHandleKind::InvokeInterface) => {
            registry.register_invoke_interface(method);
        }
        (HandleMember::Method(method), MethodHandleKind::InvokeSpecial) => {
            registry.register_invoke_direct(method);
        }
        (HandleMember::Method(method), MethodHandleKind::NewInvokeSpecial) => {
            registry.register_new_instance(&method.holder);
            registry.register_invoke_direct(method);
        }
        (HandleMember::Field(field), kind) => {
            log::debug!("Method handle kind {} on field {:?}", kind, field);
            registry.register_type_reference(&field.holder);
        }
        (HandleMember::Method(method), kind) => {
            log::debug!("Method handle kind {} on method {:?}", kind, method);
            registry.register_type_reference(&method.holder);
        }
    }
}

//! The reference tracer.

use std::collections::BTreeSet;

use crate::{
    code::{instruction::InvokeKind, HandleMember, MethodHandleRef},
    compiler::EventLog,
    lens::GraphLens,
    program::{
        references::{FieldRef, MethodRef, TypeRef},
        ClassDef, FieldDef, MethodDef, ProgramGraph, ResolvedMethod,
    },
    shaking::UseRegistry,
    tracer::{TraceReferencesConsumer, TracedClass, TracedField, TracedMethod},
};

/// References that resolved to nothing, collected over a whole trace.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MissingDefinitions {
    /// Missing classes
    pub classes: BTreeSet<TypeRef>,
    /// Missing fields
    pub fields: BTreeSet<FieldRef>,
    /// Missing methods
    pub methods: BTreeSet<MethodRef>,
}

impl MissingDefinitions {
    /// Returns `true` if every reference resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.fields.is_empty() && self.methods.is_empty()
    }

    /// Total number of missing references.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len() + self.fields.len() + self.methods.len()
    }

    /// One line per missing definition, classes first.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("Missing definitions ({}):", self.len());
        for class in &self.classes {
            out.push_str(&format!("\n  class {class}"));
        }
        for field in &self.fields {
            out.push_str(&format!("\n  field {field}"));
        }
        for method in &self.methods {
            out.push_str(&format!("\n  method {method}"));
        }
        out
    }
}

/// Traces every reference the program classes make into a set of target classes.
///
/// By default the targets are all classes that are not program classes, i.e. the library
/// the program is compiled against. Every body is read through the lens, so tracing an
/// optimized program reports the references it makes after all rewrites.
///
/// # Examples
///
/// ```rust,no_run
/// use cfshrink::compiler::EventLog;
/// use cfshrink::tracer::{CollectingConsumer, Tracer};
///
/// # fn example(program: &cfshrink::program::ProgramGraph) {
/// let diagnostics = EventLog::new();
/// let mut consumer = CollectingConsumer::new();
/// let missing = Tracer::new(program).run(&mut consumer, &diagnostics);
/// println!("{} library methods used, {} missing", consumer.methods.len(), missing.len());
/// # }
/// ```
pub struct Tracer<'p> {
    program: &'p ProgramGraph,
    lens: GraphLens,
    targets: Box<dyn Fn(&TypeRef) -> bool + 'p>,
}

impl<'p> Tracer<'p> {
    /// A tracer over `program` targeting all non-program classes.
    #[must_use]
    pub fn new(program: &'p ProgramGraph) -> Self {
        Tracer {
            program,
            lens: GraphLens::identity(),
            targets: Box::new(move |ty| {
                program
                    .definition_for(ty)
                    .is_some_and(|class| !class.is_program())
            }),
        }
    }

    /// Reads bodies through `lens`.
    #[must_use]
    pub fn with_lens(mut self, lens: GraphLens) -> Self {
        self.lens = lens;
        self
    }

    /// Restricts the targets to the given classes.
    #[must_use]
    pub fn with_targets(mut self, targets: BTreeSet<TypeRef>) -> Self {
        self.targets = Box::new(move |ty| targets.contains(ty));
        self
    }

    /// Uses an arbitrary target predicate.
    #[must_use]
    pub fn with_target_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TypeRef) -> bool + 'p,
    {
        self.targets = Box::new(predicate);
        self
    }

    /// Traces all program classes into `consumer`.
    ///
    /// Calls [`TraceReferencesConsumer::finished`] when done, then reports all missing
    /// definitions as a single error in `diagnostics`. The missing definitions are also
    /// returned.
    pub fn run(
        &self,
        consumer: &mut dyn TraceReferencesConsumer,
        diagnostics: &EventLog,
    ) -> MissingDefinitions {
        let mut collector = ReferenceCollector {
            program: self.program,
            lens: &self.lens,
            targets: self.targets.as_ref(),
            consumer,
            diagnostics,
            missing: MissingDefinitions::default(),
            context: None,
        };

        for class in self.program.program_classes() {
            if let Some(super_type) = &class.super_type {
                collector.register_super_type(class, super_type);
            }
            for interface in &class.interfaces {
                collector.register_super_type(class, interface);
            }
            for field in &class.fields {
                collector.register_field(field);
            }
            for method in &class.methods {
                collector.register_method(class, method);
                if let Some(code) = &method.code {
                    collector.context = Some(method.reference.clone());
                    code.register_references(&mut collector, &class.ty);
                    collector.context = None;
                }
            }
        }

        let missing = std::mem::take(&mut collector.missing);
        collector.consumer.finished(diagnostics);
        if !missing.is_empty() {
            log::warn!("Tracing found {} missing definitions", missing.len());
            diagnostics.error(missing.render());
        }
        missing
    }
}

struct ReferenceCollector<'a, 'p> {
    program: &'p ProgramGraph,
    lens: &'a GraphLens,
    targets: &'a (dyn Fn(&TypeRef) -> bool + 'p),
    consumer: &'a mut dyn TraceReferencesConsumer,
    diagnostics: &'a EventLog,
    missing: MissingDefinitions,
    context: Option<MethodRef>,
}

impl ReferenceCollector<'_, '_> {
    fn is_target(&self, ty: &TypeRef) -> bool {
        (self.targets)(ty)
    }

    fn add_type(&mut self, ty: &TypeRef) {
        let base = ty.base_type();
        if !base.is_class() {
            return;
        }
        match self.program.definition_for(&base) {
            Some(class) => {
                let class = class.clone();
                self.add_class(&class);
            }
            None => {
                self.missing.classes.insert(base.clone());
                self.consumer
                    .accept_type(&TracedClass::missing(base), self.diagnostics);
            }
        }
    }

    fn add_types<'t>(&mut self, types: impl IntoIterator<Item = &'t TypeRef>) {
        for ty in types {
            self.add_type(ty);
        }
    }

    fn add_class(&mut self, class: &ClassDef) {
        if !self.is_target(&class.ty) {
            return;
        }
        self.consumer.accept_type(
            &TracedClass::found(class.ty.clone(), class.access),
            self.diagnostics,
        );
        if class.access.is_visibility_depending_on_package() {
            self.consumer
                .accept_package(class.ty.package_name(), self.diagnostics);
        }
    }

    fn accept_method(&mut self, resolved: ResolvedMethod<'_>) {
        let method = resolved.method;
        self.consumer.accept_method(
            &TracedMethod::found(method.reference.clone(), method.access),
            self.diagnostics,
        );
        if method.access.is_visibility_depending_on_package() {
            self.consumer
                .accept_package(resolved.class.ty.package_name(), self.diagnostics);
        }
    }

    fn add_super_method_from_target(&mut self, resolved: ResolvedMethod<'_>) {
        if !resolved.class.is_program() && self.is_target(&resolved.class.ty) {
            self.accept_method(resolved);
        }
    }

    fn register_super_type(&mut self, class: &ClassDef, super_type: &TypeRef) {
        self.add_type(super_type);
        let program = self.program;
        for method in &class.methods {
            let inherited = method.reference.with_holder(super_type.clone());
            if let Some(resolved) = program.resolve_method(&inherited).single() {
                self.add_super_method_from_target(resolved);
            }
        }
    }

    fn register_field(&mut self, field: &FieldDef) {
        self.add_type(&field.reference.ty);
    }

    fn register_method(&mut self, class: &ClassDef, method: &MethodDef) {
        let proto = &method.reference.proto;
        self.add_types(proto.parameters());
        self.add_type(proto.return_type());
        self.add_types(&method.exceptions);

        if !method.is_virtual() {
            return;
        }
        let Some(super_type) = &class.super_type else {
            return;
        };
        let program = self.program;
        let overridden = method.reference.with_holder(super_type.clone());
        if let Some(target) = program.lookup_super_target(&overridden, &class.ty) {
            self.add_super_method_from_target(target);
        }
    }

    fn lookup(&self, method: &MethodRef, kind: InvokeKind) -> MethodRef {
        self.lens
            .lookup_method(method, self.context.as_ref(), kind)
            .reference
    }

    fn handle_rewritten_method(&mut self, method: &MethodRef, resolved: Option<ResolvedMethod<'_>>) {
        self.add_type(&method.holder);
        self.add_types(method.proto.parameters());
        self.add_type(method.proto.return_type());
        match resolved {
            Some(resolved) => {
                if self.is_target(&resolved.class.ty) {
                    if resolved.class.ty != method.holder {
                        let holder = resolved.class.ty.clone();
                        self.add_type(&holder);
                    }
                    self.accept_method(resolved);
                }
            }
            None => {
                self.missing.methods.insert(method.clone());
                self.consumer
                    .accept_method(&TracedMethod::missing(method.clone()), self.diagnostics);
            }
        }
    }

    fn handle_dynamic_dispatch(&mut self, method: &MethodRef) {
        if method.holder.is_array() {
            self.add_type(&method.holder);
            return;
        }
        let program = self.program;
        let resolved = program
            .resolve_method(method)
            .single()
            .filter(|r| !r.method.is_static());
        self.handle_rewritten_method(method, resolved);
    }

    fn handle_field(&mut self, field: &FieldRef) {
        self.add_type(&field.holder);
        self.add_type(&field.ty);
        let program = self.program;
        match program.resolve_field(field).single() {
            Some(resolved) => {
                if self.is_target(&resolved.class.ty) {
                    if resolved.class.ty != field.holder {
                        self.add_class(resolved.class);
                    }
                    self.consumer.accept_field(
                        &TracedField::found(resolved.field.reference.clone(), resolved.field.access),
                        self.diagnostics,
                    );
                    if resolved.field.access.is_visibility_depending_on_package() {
                        self.consumer
                            .accept_package(resolved.class.ty.package_name(), self.diagnostics);
                    }
                }
            }
            None => {
                self.missing.fields.insert(field.clone());
                self.consumer
                    .accept_field(&TracedField::missing(field.clone()), self.diagnostics);
            }
        }
    }

    fn handle_field_access(&mut self, field: &FieldRef) {
        let rewritten = self.lens.lookup_field(field);
        self.handle_field(&rewritten);
    }
}

impl UseRegistry for ReferenceCollector<'_, '_> {
    fn register_invoke_virtual(&mut self, method: &MethodRef) {
        let rewritten = self.lookup(method, InvokeKind::Virtual);
        self.handle_dynamic_dispatch(&rewritten);
    }

    fn register_invoke_interface(&mut self, method: &MethodRef) {
        let rewritten = self.lookup(method, InvokeKind::Interface);
        self.handle_dynamic_dispatch(&rewritten);
    }

    fn register_invoke_direct(&mut self, method: &MethodRef) {
        let rewritten = self.lookup(method, InvokeKind::Special);
        let program = self.program;
        let resolved = program.definition_for(&rewritten.holder).and_then(|class| {
            class
                .lookup_matching_method(&rewritten)
                .map(|method| ResolvedMethod {
                    class: class.as_ref(),
                    method,
                })
        });
        self.handle_rewritten_method(&rewritten, resolved);
    }

    fn register_invoke_static(&mut self, method: &MethodRef) {
        let rewritten = self.lookup(method, InvokeKind::Static);
        let program = self.program;
        let resolved = program.resolve_method(&rewritten).single();
        self.handle_rewritten_method(&rewritten, resolved);
    }

    fn register_invoke_super(&mut self, method: &MethodRef) {
        let rewritten = self.lookup(method, InvokeKind::Special);
        let program = self.program;
        let resolved = self
            .context
            .as_ref()
            .and_then(|context| program.lookup_super_target(&rewritten, &context.holder));
        self.handle_rewritten_method(&rewritten, resolved);
    }

    fn register_instance_field_read(&mut self, field: &FieldRef) {
        self.handle_field_access(field);
    }

    fn register_instance_field_write(&mut self, field: &FieldRef) {
        self.handle_field_access(field);
    }

    fn register_static_field_read(&mut self, field: &FieldRef) {
        self.handle_field_access(field);
    }

    fn register_static_field_write(&mut self, field: &FieldRef) {
        self.handle_field_access(field);
    }

    fn register_new_instance(&mut self, ty: &TypeRef) {
        self.register_type_reference(ty);
    }

    fn register_const_class(&mut self, ty: &TypeRef) {
        self.register_type_reference(ty);
    }

    fn register_check_cast(&mut self, ty: &TypeRef) {
        self.register_type_reference(ty);
    }

    fn register_instance_of(&mut self, ty: &TypeRef) {
        self.register_type_reference(ty);
    }

    fn register_type_reference(&mut self, ty: &TypeRef) {
        let rewritten = self.lens.lookup_type(ty);
        self.add_type(&rewritten);
    }

    fn register_init_class(&mut self, ty: &TypeRef) {
        let rewritten = self.lens.lookup_type(ty);
        let field = self
            .program
            .definition_for(&rewritten)
            .and_then(|class| class.class_init_field())
            .map(|field| field.reference.clone());
        match field {
            Some(field) => self.handle_field(&field),
            None => self.add_type(&rewritten),
        }
    }

    fn register_method_handle(&mut self, handle: &MethodHandleRef) {
        match &handle.member {
            HandleMember::Field(field) => self.handle_field_access(field),
            HandleMember::Method(method) => {
                let rewritten = self.lens.lookup_method_reference(method);
                let program = self.program;
                let resolved = program.resolve_method(&rewritten).single();
                self.handle_rewritten_method(&rewritten, resolved);
            }
        }
    }
}

//! Receivers of traced references.

use std::collections::BTreeSet;

use crate::{
    compiler::EventLog,
    program::references::{FieldRef, MethodRef, TypeRef},
    tracer::{TracedClass, TracedField, TracedMethod},
};

/// Receives every reference the [`Tracer`](super::Tracer) accepts.
///
/// The same reference may be delivered many times; deduplication is up to the consumer.
#[allow(unused_variables)]
pub trait TraceReferencesConsumer {
    /// A referenced class of the target set, or a missing class.
    fn accept_type(&mut self, traced: &TracedClass, diagnostics: &EventLog);

    /// A referenced field of the target set, or a missing field.
    fn accept_field(&mut self, traced: &TracedField, diagnostics: &EventLog);

    /// A referenced method of the target set, or a missing method.
    fn accept_method(&mut self, traced: &TracedMethod, diagnostics: &EventLog);

    /// A package whose package-private members are referenced.
    fn accept_package(&mut self, package: &str, diagnostics: &EventLog) {}

    /// Tracing is complete.
    fn finished(&mut self, diagnostics: &EventLog) {}
}

/// A consumer collecting everything into sorted sets.
#[derive(Debug, Default)]
pub struct CollectingConsumer {
    /// Accepted classes
    pub types: BTreeSet<TypeRef>,
    /// Accepted fields
    pub fields: BTreeSet<FieldRef>,
    /// Accepted methods
    pub methods: BTreeSet<MethodRef>,
    /// Accepted packages
    pub packages: BTreeSet<String>,
    /// Accepted references without a definition
    pub missing: BTreeSet<String>,
    /// Set once [`TraceReferencesConsumer::finished`] was called
    pub finished: bool,
}

impl CollectingConsumer {
    /// Creates an empty consumer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TraceReferencesConsumer for CollectingConsumer {
    fn accept_type(&mut self, traced: &TracedClass, _diagnostics: &EventLog) {
        if traced.is_missing_definition() {
            self.missing.insert(traced.to_string());
        }
        self.types.insert(traced.reference().clone());
    }

    fn accept_field(&mut self, traced: &TracedField, _diagnostics: &EventLog) {
        if traced.is_missing_definition() {
            self.missing.insert(traced.to_string());
        }
        self.fields.insert(traced.reference().clone());
    }

    fn accept_method(&mut self, traced: &TracedMethod, _diagnostics: &EventLog) {
        if traced.is_missing_definition() {
            self.missing.insert(traced.to_string());
        }
        self.methods.insert(traced.reference().clone());
    }

    fn accept_package(&mut self, package: &str, _diagnostics: &EventLog) {
        self.packages.insert(package.to_string());
    }

    fn finished(&mut self, _diagnostics: &EventLog) {
        self.finished = true;
    }
}

//! Event log of the optimization pipeline.
//!
//! Passes record what they changed (a call inlined, an argument propagated, two classes
//! merged) and what went wrong in an [`EventLog`]. The log is append-only and shared by
//! reference between the threads of a pass, so recording never blocks.
//!
//! # Example
//!
//! ```rust
//! use cfshrink::compiler::{EventKind, EventLog};
//! use cfshrink::program::references::MethodRef;
//!
//! let log = EventLog::new();
//! let caller = MethodRef::parse("app/Main", "main", "([Ljava/lang/String;)V")?;
//! log.record(EventKind::MethodInlined)
//!     .at(&caller, 3)
//!     .message("inlined app/Util.twice(I)I");
//! log.info("starting inlining");
//!
//! assert_eq!(log.count_kind(EventKind::MethodInlined), 1);
//! assert_eq!(log.summary(), "1 method inlined");
//! # Ok::<(), cfshrink::Error>(())
//! ```

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use crate::program::references::MethodRef;

/// Categories of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::IntoStaticStr)]
pub enum EventKind {
    /// A call was replaced by the callee's body.
    MethodInlined,
    /// A virtual or interface call was turned into a direct call.
    CallDevirtualized,
    /// A constant argument was materialized in a callee.
    ArgumentPropagated,
    /// A class was merged into another one.
    ClassMerged,
    /// A store to a field nobody reads was removed.
    FieldStoreRemoved,
    /// A constructor dispatch entry point was generated.
    EntryPointSynthesized,
    /// References in a body were rewritten through the graph lens.
    CodeRewritten,
    /// A definition was found unreachable and removed from the output.
    DefinitionPruned,
    /// The local variable table of a method was discarded.
    DebugInfoDropped,
    /// A body was converted back to stack code.
    CodeRegenerated,

    /// A pass started.
    PassStarted,
    /// A pass completed.
    PassCompleted,
    /// A pass failed on a method.
    PassFailed,

    /// Informational message.
    Info,
    /// Warning (something unexpected but recoverable).
    Warning,
    /// Error (something failed).
    Error,
}

impl EventKind {
    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::MethodInlined => "method inlined",
            Self::CallDevirtualized => "call devirtualized",
            Self::ArgumentPropagated => "argument propagated",
            Self::ClassMerged => "class merged",
            Self::FieldStoreRemoved => "field store removed",
            Self::EntryPointSynthesized => "entry point synthesized",
            Self::CodeRewritten => "code rewritten",
            Self::DefinitionPruned => "definition pruned",
            Self::DebugInfoDropped => "debug info dropped",
            Self::CodeRegenerated => "code regenerated",
            Self::PassStarted => "pass started",
            Self::PassCompleted => "pass completed",
            Self::PassFailed => "pass failed",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    /// Returns `true` if this event represents a code transformation.
    #[must_use]
    pub fn is_transformation(&self) -> bool {
        matches!(
            self,
            Self::MethodInlined
                | Self::CallDevirtualized
                | Self::ArgumentPropagated
                | Self::ClassMerged
                | Self::FieldStoreRemoved
                | Self::EntryPointSynthesized
                | Self::CodeRewritten
                | Self::DefinitionPruned
        )
    }

    /// Returns `true` for info, warning, error and pass failure events.
    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        matches!(
            self,
            Self::Info | Self::Warning | Self::Error | Self::PassFailed | Self::DebugInfoDropped
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The method where the event occurred, if any.
    pub method: Option<MethodRef>,
    /// Location within the method (block index or instruction index).
    pub location: Option<usize>,
    /// Human-readable description.
    pub message: String,
    /// Pass that recorded the event.
    pub pass: Option<String>,
}

impl Event {
    fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            method: None,
            location: None,
            message: message.into(),
            pass: None,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.kind)?;
        if let Some(method) = &self.method {
            write!(f, "{method}: ")?;
        }
        f.write_str(&self.message)
    }
}

/// Fluent builder returned by [`EventLog::record`]; the event is appended when the builder
/// is dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    method: Option<MethodRef>,
    location: Option<usize>,
    message: Option<String>,
    pass: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            method: None,
            location: None,
            message: None,
            pass: None,
        }
    }

    /// Sets the method and location.
    pub fn at(mut self, method: &MethodRef, location: usize) -> Self {
        self.method = Some(method.clone());
        self.location = Some(location);
        self
    }

    /// Sets only the method.
    pub fn method(mut self, method: &MethodRef) -> Self {
        self.method = Some(method.clone());
        self
    }

    /// Sets the location.
    pub fn location(mut self, location: usize) -> Self {
        self.location = Some(location);
        self
    }

    /// Sets the message; defaults to the kind's description.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates the event with a pass.
    pub fn pass(mut self, pass_name: impl Into<String>) -> Self {
        self.pass = Some(pass_name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.events.push(Event {
            kind: self.kind,
            method: self.method.take(),
            location: self.location.take(),
            message,
            pass: self.pass.take(),
        });
    }
}

/// Append-only, thread-safe collection of events.
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        let copy = Self::new();
        copy.merge(self);
        copy
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: boxcar::Vec::new(),
        }
    }

    /// Returns `true` if nothing was logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts an event of `kind`.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Records an informational message.
    pub fn info(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Info, message));
    }

    /// Records a warning.
    pub fn warn(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Warning, message));
    }

    /// Records an error.
    pub fn error(&self, message: impl Into<String>) {
        self.events.push(Event::new(EventKind::Error, message));
    }

    /// Appends copies of all events of `other`.
    pub fn merge(&self, other: &EventLog) {
        for (_, event) in &other.events {
            self.events.push(event.clone());
        }
    }

    /// Returns `true` if any event of `kind` exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.events.iter().any(|(_, e)| e.kind == kind)
    }

    /// Counts events of `kind`.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|(_, e)| e.kind == kind).count()
    }

    /// All events in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Events of `kind`.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Events recorded for `method`.
    pub fn filter_method<'a>(
        &'a self,
        method: &'a MethodRef,
    ) -> impl Iterator<Item = &'a Event> + 'a {
        self.iter().filter(move |e| e.method.as_ref() == Some(method))
    }

    /// Transformation events.
    pub fn transformations(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_transformation())
    }

    /// Diagnostic events.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(|e| e.kind.is_diagnostic())
    }

    /// Warning events.
    pub fn warnings(&self) -> impl Iterator<Item = &Event> + '_ {
        self.filter_kind(EventKind::Warning)
    }

    /// Event counts by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for (_, event) in &self.events {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Number of transformation events.
    #[must_use]
    pub fn transformation_count(&self) -> usize {
        self.transformations().count()
    }

    /// Number of distinct methods with events.
    #[must_use]
    pub fn methods_affected(&self) -> usize {
        self.iter()
            .filter_map(|e| e.method.as_ref())
            .collect::<HashSet<_>>()
            .len()
    }

    /// One-line summary of the transformations, e.g. `2 class merged, 5 method inlined`.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(k, _)| k.is_transformation())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rayon::prelude::*;

    use super::*;

    fn method(name: &str) -> MethodRef {
        MethodRef::parse("app/Main", name, "()V").unwrap()
    }

    #[test]
    fn test_builder_appends_on_drop() {
        let log = EventLog::new();
        log.record(EventKind::ClassMerged)
            .method(&method("a"))
            .pass("class-merging");
        let event = log.iter().next().unwrap();
        assert_eq!(event.kind, EventKind::ClassMerged);
        assert_eq!(event.message, "class merged");
        assert_eq!(event.pass.as_deref(), Some("class-merging"));
        assert_eq!(event.to_string(), "[class merged] app/Main.a()V: class merged");
    }

    #[test]
    fn test_queries() {
        let log = EventLog::new();
        log.record(EventKind::MethodInlined).at(&method("a"), 1);
        log.record(EventKind::MethodInlined).at(&method("a"), 2);
        log.record(EventKind::ArgumentPropagated).method(&method("b"));
        log.warn("careful");

        assert_eq!(log.len(), 4);
        assert_eq!(log.count_kind(EventKind::MethodInlined), 2);
        assert_eq!(log.methods_affected(), 2);
        assert_eq!(log.transformation_count(), 3);
        assert_eq!(log.warnings().count(), 1);
        assert_eq!(log.filter_method(&method("a")).count(), 2);
        assert_eq!(log.summary(), "1 argument propagated, 2 method inlined");
    }

    #[test]
    fn test_concurrent_recording() {
        let log = Arc::new(EventLog::new());
        (0..64).into_par_iter().for_each(|i| {
            log.record(EventKind::CodeRewritten).location(i);
        });
        assert_eq!(log.count_kind(EventKind::CodeRewritten), 64);
        let copy: EventLog = (*log).clone();
        assert_eq!(copy.len(), 64);
    }
}

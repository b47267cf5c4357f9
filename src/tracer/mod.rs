//! Reference tracing.
//!
//! The [`Tracer`] walks every program class and reports which definitions of a target set
//! (by default: the library) the program uses. It is a read-only consumer of a
//! [`ProgramGraph`](crate::program::ProgramGraph) and a [`GraphLens`](crate::lens::GraphLens):
//! types, fields and methods are reported through a [`TraceReferencesConsumer`], together
//! with the packages whose package-private members are used.
//!
//! References that do not resolve are delivered to the consumer as missing and, once
//! tracing is complete, reported together as one error.

mod collector;
mod consumer;
mod traced;

pub use collector::{MissingDefinitions, Tracer};
pub use consumer::{CollectingConsumer, TraceReferencesConsumer};
pub use traced::{TracedClass, TracedField, TracedMethod, TracedReference};

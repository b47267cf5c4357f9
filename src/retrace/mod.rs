//! Stack-trace retracing.
//!
//! A [`Retracer`] maps the names of an optimized program back to the original ones. Its
//! [`RetraceMapping`] is either the inverse of the pipeline's [`GraphLens`](crate::lens::GraphLens)
//! ([`Retracer::from_lens`]) or an explicit mapping, e.g. one parsed from a ProGuard-style
//! mapping file ([`RetraceMapping::parse`]).
//!
//! Merged classes and methods make retracing ambiguous: a frame then yields every candidate
//! as a [`RetracedSingleFrame`] with its index, and rendered traces mark the alternatives
//! with `<OR>`.

mod mapping;
mod retracer;

pub use mapping::RetraceMapping;
pub use retracer::{RetracedFrame, RetracedMethodReference, RetracedSingleFrame, Retracer};

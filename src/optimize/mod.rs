//! Whole-program optimizations over the live program.
//!
//! # Architecture
//!
//! Every optimization is an [`IrPass`](crate::compiler::IrPass) driven by the
//! [`PassScheduler`](crate::compiler::PassScheduler):
//!
//! - [`merging`] - Horizontal class merging (global, publishes a lens layer)
//! - [`argprop`] - Interprocedural argument propagation
//! - [`inliner`] - Inlining of small and single-target calls
//! - [`fields`] - Field read/write facts and removal of stores to unread fields (cleanup)
//! - [`callgraph`] - Static call graph and bottom-up processing waves
//!
//! Passes that change references (merging) push a layer onto the context's
//! [`GraphLens`](crate::lens::GraphLens) and rewrite the stored bodies through it; the
//! others only edit bodies in place.

pub mod argprop;
pub mod callgraph;
pub mod fields;
pub mod inliner;
pub mod merging;

pub use argprop::{ArgumentPropagationPass, ArgumentPropagator, VirtualRootMethods};
pub use callgraph::CallGraph;
pub use fields::FieldAccessPass;
pub use inliner::{InliningDirectives, InliningPass};
pub use merging::ClassMergingPass;

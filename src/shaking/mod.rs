//! Tree shaking: whole-program liveness.
//!
//! The [`Enqueuer`] computes which classes, methods and fields are reachable from the roots
//! of a [`KeepPolicy`]. Method bodies are read through the [`UseRegistry`] visitor; the
//! result is an [`AppInfoWithLiveness`] snapshot that can prune the program.
//!
//! # Key Components
//!
//! - [`Enqueuer`] - Worklist fixpoint with deterministic parallel tracing
//! - [`UseRegistry`] - Visitor over the symbolic references of a body
//! - [`KeepPolicy`] / [`RootSet`] - Keep-rule oracle and its programmatic implementation
//! - [`MissingReferences`] / [`DontWarn`] - Aggregated missing definitions
//! - [`AppInfoWithLiveness`] - Immutable liveness result
//!
//! # Examples
//!
//! ```rust,no_run
//! use cfshrink::prelude::*;
//!
//! # fn example(program: &ProgramGraph) -> cfshrink::Result<()> {
//! let policy = RootSet::new().keep_class_and_members(TypeRef::class("app/Main"));
//! let liveness = Enqueuer::new(program, &policy, &ShrinkerOptions::shrink_only()).run()?;
//! let pruned = liveness.prune(program);
//! println!("removed {} classes", pruned.removed_classes.len());
//! # Ok(())
//! # }
//! ```

mod enqueuer;
mod liveness;
mod missing;
mod policy;
mod registry;
mod worklist;

pub use enqueuer::Enqueuer;
pub use liveness::{AppInfoWithLiveness, EnqueuerStats, PruneResult};
pub use missing::{ClassNamePattern, DontWarn, MissingReferences, MissingReport};
pub use policy::{ClassKeep, KeepInfo, KeepPolicy, RootSet};
pub use registry::{
    register_method_handle_member, DefaultEnqueuerUseRegistry, TracedUse, UseCollector,
    UseRegistry,
};
pub use worklist::{Reason, WorkItem, Worklist};

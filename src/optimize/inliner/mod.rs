//! Method inlining.
//!
//! - [`constraint`] - Where a body may execute once moved out of its class
//! - [`directives`] - Explicit always/never/bypass requests
//! - [`heuristics`] - Pluggable policy hooks
//! - [`pass`] - The [`InliningPass`] itself

pub mod constraint;
pub mod directives;
pub mod heuristics;
pub mod pass;

pub use constraint::{InliningConstraint, InliningConstraints};
pub use directives::InliningDirectives;
pub use heuristics::InliningHeuristics;
pub use pass::InliningPass;

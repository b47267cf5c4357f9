//! Interprocedural argument propagation.
//!
//! Three steps, run by [`ArgumentPropagationPass`]:
//!
//! 1. [`ArgumentPropagator::initialize_code_scanner`] groups virtual methods by their root
//!    ([`VirtualRootMethods`]) and marks roots with unseen callers as unknown.
//! 2. [`ArgumentPropagator::scan`] joins, per root, the abstract value of every argument at
//!    every call site: a single int, long, string or `null` constant, or unknown.
//! 3. [`ArgumentPropagator::populate`] publishes the result as each method's
//!    [`MethodOptimizationInfo`](crate::program::optinfo::MethodOptimizationInfo); the pass
//!    then materializes constant arguments in the callee bodies.

mod pass;
mod scanner;
mod virtual_roots;

pub use pass::ArgumentPropagationPass;
pub use scanner::ArgumentPropagator;
pub use virtual_roots::{VirtualRootMethods, VirtualRootMethodsAnalysis};

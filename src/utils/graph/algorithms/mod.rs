//! Graph algorithms for program analysis.
//!
//! # Available Algorithms
//!
//! ## Traversal
//!
//! - [`postorder`] - Depth-first postorder from a start node
//! - [`reverse_postorder`] - The usual iteration order for forward data flow
//! - [`reachable`] - Set of nodes reachable from a start node
//!
//! ## Dominator Analysis
//!
//! - [`compute_dominators`] - Immediate dominators of a rooted graph
//! - [`compute_dominance_frontiers`] - Dominance frontiers for phi placement
//! - [`DominatorTree`] - Result of dominator computation
//!
//! ## Strongly Connected Components
//!
//! - [`strongly_connected_components`] - Tarjan's SCC algorithm
//!
//! | Algorithm | Time Complexity | Use Case |
//! |-----------|-----------------|----------|
//! | Traversals | O(V + E) | Block ordering, reachability |
//! | Dominators | O(V * E) worst case, near linear in practice | IR construction, verification |
//! | SCC | O(V + E) | Hierarchy partitioning, call graph cycles |
//!
//! Every algorithm visits successors in adjacency order and roots in ascending id order, so
//! results are identical from run to run.

mod dominators;
mod scc;
mod traversal;

pub use dominators::{compute_dominance_frontiers, compute_dominators, DominatorTree};
pub use scc::strongly_connected_components;
pub use traversal::{postorder, reachable, reverse_postorder};

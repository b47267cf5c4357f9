//! Shared utilities: bit sets, graph infrastructure and DOT rendering helpers.

mod bitset;
pub(crate) mod dot;
pub mod graph;

pub use bitset::BitSet;

//! Indexed graph wrapper for domain-typed nodes.
//!
//! [`IndexedGraph`] keeps the mapping between domain keys (type references, method
//! references) and the dense [`NodeId`]s the algorithms work on. Keys are assigned ids in
//! insertion order, so inserting keys in a sorted order yields reproducible algorithm output.

use std::{collections::HashMap, hash::Hash};

use crate::{
    utils::graph::{algorithms, DirectedGraph, NodeId, Predecessors, Successors},
    Result,
};

/// A directed graph addressed by domain keys.
#[derive(Debug, Clone)]
pub struct IndexedGraph<K, E>
where
    K: Hash + Eq + Clone,
{
    graph: DirectedGraph<K, E>,
    key_to_node: HashMap<K, NodeId>,
}

impl<K, E> Default for IndexedGraph<K, E>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, E> IndexedGraph<K, E>
where
    K: Hash + Eq + Clone,
{
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            graph: DirectedGraph::new(),
            key_to_node: HashMap::new(),
        }
    }

    /// Adds `key` if absent and returns its node.
    pub fn add_node(&mut self, key: K) -> NodeId {
        if let Some(node) = self.key_to_node.get(&key) {
            return *node;
        }
        let node = self.graph.add_node(key.clone());
        self.key_to_node.insert(key, node);
        node
    }

    /// Adds an edge between two keys, inserting missing keys.
    ///
    /// # Errors
    ///
    /// Propagates [`DirectedGraph::add_edge`] failures.
    pub fn add_edge(&mut self, from: K, to: K, data: E) -> Result<()> {
        let from = self.add_node(from);
        let to = self.add_node(to);
        self.graph.add_edge(from, to, data)
    }

    /// Removes the edges between two keys.
    pub fn remove_edge(&mut self, from: &K, to: &K) -> bool {
        match (self.key_to_node.get(from), self.key_to_node.get(to)) {
            (Some(&f), Some(&t)) => self.graph.remove_edge(f, t),
            _ => false,
        }
    }

    /// The node of `key`, if present.
    #[must_use]
    pub fn node_of(&self, key: &K) -> Option<NodeId> {
        self.key_to_node.get(key).copied()
    }

    /// The key of `node`.
    #[must_use]
    pub fn key_of(&self, node: NodeId) -> Option<&K> {
        self.graph.node(node)
    }

    /// Keys of the successors of `key`.
    pub fn successor_keys<'a>(&'a self, key: &K) -> impl Iterator<Item = &'a K> + 'a {
        let node = self.key_to_node.get(key).copied();
        node.into_iter()
            .flat_map(move |n| self.graph.successors(n))
            .filter_map(|n| self.graph.node(n))
    }

    /// Keys of the predecessors of `key`.
    pub fn predecessor_keys<'a>(&'a self, key: &K) -> impl Iterator<Item = &'a K> + 'a {
        let node = self.key_to_node.get(key).copied();
        node.into_iter()
            .flat_map(move |n| self.graph.predecessors(n))
            .filter_map(|n| self.graph.node(n))
    }

    /// Strongly connected components as key groups, in reverse topological order.
    #[must_use]
    pub fn strongly_connected_components(&self) -> Vec<Vec<K>> {
        algorithms::strongly_connected_components(&self.graph)
            .into_iter()
            .map(|scc| {
                scc.into_iter()
                    .filter_map(|n| self.graph.node(n).cloned())
                    .collect()
            })
            .collect()
    }

    /// The underlying graph.
    #[must_use]
    pub fn graph(&self) -> &DirectedGraph<K, E> {
        &self.graph
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns `true` if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_deduplicated() {
        let mut graph: IndexedGraph<&str, ()> = IndexedGraph::new();
        let a = graph.add_node("a");
        assert_eq!(graph.add_node("a"), a);
        graph.add_edge("a", "b", ()).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.successor_keys(&"a").collect::<Vec<_>>(), vec![&"b"]);
        assert_eq!(graph.predecessor_keys(&"b").collect::<Vec<_>>(), vec![&"a"]);
    }

    #[test]
    fn test_scc_keys() {
        let mut graph: IndexedGraph<&str, ()> = IndexedGraph::new();
        graph.add_edge("a", "b", ()).unwrap();
        graph.add_edge("b", "a", ()).unwrap();
        graph.add_edge("b", "c", ()).unwrap();
        let sccs = graph.strongly_connected_components();
        assert_eq!(sccs.len(), 2);
        assert_eq!(sccs[0], vec!["c"]);
        let mut cycle = sccs[1].clone();
        cycle.sort_unstable();
        assert_eq!(cycle, vec!["a", "b"]);
    }
}

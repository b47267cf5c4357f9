//! Generic directed graph infrastructure.
//!
//! This module provides the graph type shared by the class hierarchy, the call graph and the
//! IR control flow analyses, together with the traits the algorithms in [`algorithms`] are
//! generic over:
//!
//! - [`Successors`] - forward adjacency, enough for traversals and SCCs
//! - [`Predecessors`] - backward adjacency, used by dominators
//! - [`RootedGraph`] - a graph with a designated entry node
//!
//! Node ids are dense indices handed out in insertion order, so every algorithm that iterates
//! `0..node_count()` visits nodes in a deterministic order.

pub mod algorithms;
mod indexed;
mod node;

pub use indexed::IndexedGraph;
pub use node::NodeId;

use crate::{Error, Result};

/// Forward adjacency of a graph.
pub trait Successors {
    /// Number of nodes; valid ids are `0..node_count()`.
    fn node_count(&self) -> usize;

    /// Successors of `node`, in edge insertion order.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_;
}

/// Backward adjacency of a graph.
pub trait Predecessors: Successors {
    /// Predecessors of `node`, in edge insertion order.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_;
}

/// A graph with a designated entry node.
pub trait RootedGraph: Predecessors {
    /// The entry node.
    fn entry(&self) -> NodeId;
}

/// An adjacency-list directed graph with node and edge payloads.
#[derive(Debug, Clone)]
pub struct DirectedGraph<N, E> {
    nodes: Vec<N>,
    outgoing: Vec<Vec<(NodeId, E)>>,
    incoming: Vec<Vec<NodeId>>,
    edge_count: usize,
}

impl<N, E> Default for DirectedGraph<N, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N, E> DirectedGraph<N, E> {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
            edge_count: 0,
        }
    }

    /// Adds a node and returns its id.
    pub fn add_node(&mut self, data: N) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(data);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    /// Adds an edge `from -> to`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphError`] if either endpoint does not exist.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, data: E) -> Result<()> {
        if from.index() >= self.nodes.len() || to.index() >= self.nodes.len() {
            return Err(Error::GraphError(format!(
                "edge {from} -> {to} references a node outside 0..{}",
                self.nodes.len()
            )));
        }
        self.outgoing[from.index()].push((to, data));
        self.incoming[to.index()].push(from);
        self.edge_count += 1;
        Ok(())
    }

    /// Removes every edge `from -> to`. Returns `true` if one existed.
    pub fn remove_edge(&mut self, from: NodeId, to: NodeId) -> bool {
        let Some(out) = self.outgoing.get_mut(from.index()) else {
            return false;
        };
        let before = out.len();
        out.retain(|(target, _)| *target != to);
        let removed = before - out.len();
        if removed == 0 {
            return false;
        }
        self.incoming[to.index()].retain(|source| *source != from);
        self.edge_count -= removed;
        true
    }

    /// Returns `true` if an edge `from -> to` exists.
    #[must_use]
    pub fn has_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.outgoing
            .get(from.index())
            .is_some_and(|out| out.iter().any(|(target, _)| *target == to))
    }

    /// Payload of `node`.
    #[must_use]
    pub fn node(&self, node: NodeId) -> Option<&N> {
        self.nodes.get(node.index())
    }

    /// Mutable payload of `node`.
    pub fn node_mut(&mut self, node: NodeId) -> Option<&mut N> {
        self.nodes.get_mut(node.index())
    }

    /// Outgoing edges of `node` with their payloads.
    pub fn edges_from(&self, node: NodeId) -> impl Iterator<Item = (NodeId, &E)> + '_ {
        self.outgoing
            .get(node.index())
            .into_iter()
            .flatten()
            .map(|(target, data)| (*target, data))
    }

    /// Iterates all node ids in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId::new)
    }

    /// Number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Number of direct successors of `node`.
    #[must_use]
    pub fn out_degree(&self, node: NodeId) -> usize {
        self.outgoing.get(node.index()).map_or(0, Vec::len)
    }

    /// Number of direct predecessors of `node`.
    #[must_use]
    pub fn in_degree(&self, node: NodeId) -> usize {
        self.incoming.get(node.index()).map_or(0, Vec::len)
    }
}

impl<N, E> Successors for DirectedGraph<N, E> {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.outgoing
            .get(node.index())
            .into_iter()
            .flatten()
            .map(|(target, _)| *target)
    }
}

impl<N, E> Predecessors for DirectedGraph<N, E> {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.incoming.get(node.index()).into_iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_edges() {
        let mut graph: DirectedGraph<char, ()> = DirectedGraph::new();
        let a = graph.add_node('a');
        let b = graph.add_node('b');
        graph.add_edge(a, b, ()).unwrap();
        graph.add_edge(a, b, ()).unwrap();
        assert_eq!(graph.edge_count(), 2);
        assert!(graph.has_edge(a, b));
        assert!(graph.remove_edge(a, b));
        assert!(!graph.has_edge(a, b));
        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.in_degree(b), 0);
    }

    #[test]
    fn test_edge_to_unknown_node() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let a = graph.add_node(());
        assert!(graph.add_edge(a, NodeId::new(7), ()).is_err());
    }

    #[test]
    fn test_adjacency_order() {
        let mut graph: DirectedGraph<(), u8> = DirectedGraph::new();
        let a = graph.add_node(());
        let b = graph.add_node(());
        let c = graph.add_node(());
        graph.add_edge(a, c, 1).unwrap();
        graph.add_edge(a, b, 2).unwrap();
        assert_eq!(graph.successors(a).collect::<Vec<_>>(), vec![c, b]);
        assert_eq!(graph.predecessors(c).collect::<Vec<_>>(), vec![a]);
        assert_eq!(
            graph.edges_from(a).map(|(_, w)| *w).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }
}

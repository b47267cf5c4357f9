//! Depth-first traversals.
//!
//! Both orders are computed with an explicit stack of enter/exit markers rather than
//! recursion, so method bodies with thousands of blocks are handled without growing the
//! call stack.

use crate::utils::{
    graph::{NodeId, Successors},
    BitSet,
};

enum Visit {
    Enter(NodeId),
    Exit(NodeId),
}

/// Returns the nodes reachable from `start` in depth-first postorder.
///
/// Successors are explored in adjacency order, so the first successor's subtree finishes
/// first.
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut order = Vec::new();
    if start.index() >= graph.node_count() {
        return order;
    }

    let mut visited = BitSet::new(graph.node_count());
    let mut stack = vec![Visit::Enter(start)];

    while let Some(item) = stack.pop() {
        match item {
            Visit::Enter(node) => {
                if !visited.insert(node.index()) {
                    continue;
                }
                stack.push(Visit::Exit(node));
                let successors: Vec<NodeId> = graph.successors(node).collect();
                for &succ in successors.iter().rev() {
                    if !visited.contains(succ.index()) {
                        stack.push(Visit::Enter(succ));
                    }
                }
            }
            Visit::Exit(node) => order.push(node),
        }
    }

    order
}

/// Returns the nodes reachable from `start` in reverse postorder.
///
/// In reverse postorder every node precedes its successors except along back edges.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut order = postorder(graph, start);
    order.reverse();
    order
}

/// Returns the set of nodes reachable from `start`, including `start`.
pub fn reachable<G: Successors>(graph: &G, start: NodeId) -> BitSet {
    let mut seen = BitSet::new(graph.node_count());
    if start.index() >= graph.node_count() {
        return seen;
    }
    let mut worklist = vec![start];
    seen.insert(start.index());
    while let Some(node) = worklist.pop() {
        for succ in graph.successors(node) {
            if seen.insert(succ.index()) {
                worklist.push(succ);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::DirectedGraph;

    fn diamond() -> (DirectedGraph<&'static str, ()>, Vec<NodeId>) {
        // A -> B, A -> C, B -> D, C -> D
        let mut graph = DirectedGraph::new();
        let a = graph.add_node("A");
        let b = graph.add_node("B");
        let c = graph.add_node("C");
        let d = graph.add_node("D");
        graph.add_edge(a, b, ()).unwrap();
        graph.add_edge(a, c, ()).unwrap();
        graph.add_edge(b, d, ()).unwrap();
        graph.add_edge(c, d, ()).unwrap();
        (graph, vec![a, b, c, d])
    }

    #[test]
    fn test_postorder_diamond() {
        let (graph, n) = diamond();
        assert_eq!(postorder(&graph, n[0]), vec![n[3], n[1], n[2], n[0]]);
    }

    #[test]
    fn test_reverse_postorder_diamond() {
        let (graph, n) = diamond();
        let rpo = reverse_postorder(&graph, n[0]);
        assert_eq!(rpo[0], n[0]);
        assert_eq!(rpo[3], n[3]);
    }

    #[test]
    fn test_reverse_postorder_with_back_edge() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let a = graph.add_node(());
        let b = graph.add_node(());
        let c = graph.add_node(());
        graph.add_edge(a, b, ()).unwrap();
        graph.add_edge(b, a, ()).unwrap();
        graph.add_edge(b, c, ()).unwrap();
        assert_eq!(reverse_postorder(&graph, a), vec![a, b, c]);
    }

    #[test]
    fn test_reachable_skips_disconnected() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let a = graph.add_node(());
        let b = graph.add_node(());
        let island = graph.add_node(());
        graph.add_edge(a, b, ()).unwrap();
        let seen = reachable(&graph, a);
        assert!(seen.contains(b.index()));
        assert!(!seen.contains(island.index()));
    }
}

//! Strongly Connected Components (SCC) using Tarjan's algorithm.
//!
//! A strongly connected component is a maximal set of nodes such that each node can reach
//! every other node of the set.
//!
//! # Use Cases
//!
//! - **Hierarchy partitioning**: argument propagation analyses one connected part of the class
//!   hierarchy at a time
//! - **Call graph analysis**: mutually recursive method groups

use crate::utils::graph::{NodeId, Successors};

/// Computes the strongly connected components of `graph`.
///
/// Components are returned in reverse topological order: a component is emitted only after
/// every component reachable from it. The traversal is iterative, so deep hierarchies do not
/// overflow the call stack.
///
/// # Arguments
///
/// * `graph` - The graph to analyze
///
/// # Returns
///
/// One vector per component, members in the order they were popped.
pub fn strongly_connected_components<G>(graph: &G) -> Vec<Vec<NodeId>>
where
    G: Successors,
{
    let node_count = graph.node_count();
    let mut state = TarjanState::new(node_count);

    for root in 0..node_count {
        if state.index[root].is_none() {
            state.visit(graph, NodeId::new(root));
        }
    }

    state.sccs
}

struct TarjanState {
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<NodeId>,
    next_index: usize,
    sccs: Vec<Vec<NodeId>>,
}

impl TarjanState {
    fn new(n: usize) -> Self {
        Self {
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next_index: 0,
            sccs: Vec::new(),
        }
    }

    fn discover(&mut self, v: NodeId) {
        self.index[v.index()] = Some(self.next_index);
        self.lowlink[v.index()] = self.next_index;
        self.next_index += 1;
        self.stack.push(v);
        self.on_stack[v.index()] = true;
    }

    fn visit<G: Successors>(&mut self, graph: &G, root: NodeId) {
        // (node, successors snapshot, next successor position)
        let mut frames: Vec<(NodeId, Vec<NodeId>, usize)> = Vec::new();
        self.discover(root);
        frames.push((root, graph.successors(root).collect(), 0));

        while let Some((v, succs, pos)) = frames.last_mut() {
            let v = *v;
            if let Some(&w) = succs.get(*pos) {
                *pos += 1;
                match self.index[w.index()] {
                    None => {
                        self.discover(w);
                        frames.push((w, graph.successors(w).collect(), 0));
                    }
                    Some(w_index) if self.on_stack[w.index()] => {
                        self.lowlink[v.index()] = self.lowlink[v.index()].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            frames.pop();
            if let Some((parent, _, _)) = frames.last() {
                let parent = *parent;
                self.lowlink[parent.index()] =
                    self.lowlink[parent.index()].min(self.lowlink[v.index()]);
            }

            if Some(self.lowlink[v.index()]) == self.index[v.index()] {
                let mut scc = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w.index()] = false;
                    scc.push(w);
                    if w == v {
                        break;
                    }
                }
                self.sccs.push(scc);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::utils::graph::{algorithms::strongly_connected_components, DirectedGraph};

    #[test]
    fn test_scc_empty_graph() {
        let graph: DirectedGraph<(), ()> = DirectedGraph::new();
        assert!(strongly_connected_components(&graph).is_empty());
    }

    #[test]
    fn test_scc_linear_chain_is_reverse_topological() {
        let mut graph: DirectedGraph<char, ()> = DirectedGraph::new();
        let a = graph.add_node('A');
        let b = graph.add_node('B');
        let c = graph.add_node('C');
        graph.add_edge(a, b, ()).unwrap();
        graph.add_edge(b, c, ()).unwrap();

        let sccs = strongly_connected_components(&graph);
        let order: Vec<_> = sccs.iter().map(|scc| scc[0]).collect();
        assert_eq!(order, vec![c, b, a]);
    }

    #[test]
    fn test_scc_cycle_with_tail() {
        // A -> B -> C -> A, C -> D
        let mut graph: DirectedGraph<char, ()> = DirectedGraph::new();
        let a = graph.add_node('A');
        let b = graph.add_node('B');
        let c = graph.add_node('C');
        let d = graph.add_node('D');
        graph.add_edge(a, b, ()).unwrap();
        graph.add_edge(b, c, ()).unwrap();
        graph.add_edge(c, a, ()).unwrap();
        graph.add_edge(c, d, ()).unwrap();

        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 2);
        assert_eq!(sccs[0], vec![d]);
        let mut cycle = sccs[1].clone();
        cycle.sort();
        assert_eq!(cycle, vec![a, b, c]);
    }

    #[test]
    fn test_scc_deep_chain_does_not_overflow() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let nodes: Vec<_> = (0..100_000).map(|_| graph.add_node(())).collect();
        for pair in nodes.windows(2) {
            graph.add_edge(pair[0], pair[1], ()).unwrap();
        }
        assert_eq!(strongly_connected_components(&graph).len(), 100_000);
    }
}

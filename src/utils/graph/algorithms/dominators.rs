//! Dominator tree computation.
//!
//! A node `d` **dominates** a node `n` if every path from the entry node to `n` passes
//! through `d`. The **immediate dominator** of `n` is the unique strict dominator of `n` that
//! is dominated by every other strict dominator of `n`.
//!
//! # Algorithm
//!
//! The iterative scheme of Cooper, Harvey and Kennedy ("A Simple, Fast Dominance
//! Algorithm"): immediate dominators are refined in reverse postorder until stable, using the
//! postorder numbers to intersect dominator chains. For the reducible, mostly small control
//! flow graphs produced from bytecode it converges in two or three sweeps.

use std::collections::BTreeSet;

use crate::utils::graph::{algorithms::reverse_postorder, NodeId, Predecessors};

/// Result of a dominator computation.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: NodeId,
    idom: Vec<Option<NodeId>>,
    rpo_number: Vec<Option<usize>>,
}

impl DominatorTree {
    /// The entry node.
    #[inline]
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// The immediate dominator of `node`; `None` for the entry and unreachable nodes.
    #[must_use]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        if node == self.entry {
            return None;
        }
        self.idom.get(node.index()).copied().flatten()
    }

    /// Returns `true` if `node` is reachable from the entry.
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.rpo_number.get(node.index()).is_some_and(Option::is_some)
    }

    /// Returns `true` if `a` dominates `b`. Every reachable node dominates itself.
    #[must_use]
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.immediate_dominator(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Returns `true` if `a` dominates `b` and `a != b`.
    #[inline]
    #[must_use]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Children of `node` in the dominator tree, in ascending id order.
    #[must_use]
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        (0..self.idom.len())
            .map(NodeId::new)
            .filter(|n| *n != self.entry && self.idom[n.index()] == Some(node))
            .collect()
    }

    /// Number of nodes covered by the tree (reachable or not).
    #[inline]
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.idom.len()
    }
}

/// Computes the dominator tree of `graph` rooted at `entry`.
///
/// Nodes not reachable from `entry` have no immediate dominator and dominate nothing.
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Predecessors,
{
    let node_count = graph.node_count();
    let rpo = reverse_postorder(graph, entry);

    let mut rpo_number = vec![None; node_count];
    for (i, node) in rpo.iter().enumerate() {
        rpo_number[node.index()] = Some(i);
    }

    let mut idom: Vec<Option<NodeId>> = vec![None; node_count];
    if entry.index() < node_count {
        idom[entry.index()] = Some(entry);
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &node in rpo.iter().skip(1) {
            let mut new_idom: Option<NodeId> = None;
            for pred in graph.predecessors(node) {
                if idom[pred.index()].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, &rpo_number, pred, current),
                });
            }
            if new_idom.is_some() && idom[node.index()] != new_idom {
                idom[node.index()] = new_idom;
                changed = true;
            }
        }
    }

    DominatorTree {
        entry,
        idom,
        rpo_number,
    }
}

fn intersect(
    idom: &[Option<NodeId>],
    rpo_number: &[Option<usize>],
    mut a: NodeId,
    mut b: NodeId,
) -> NodeId {
    let number = |n: NodeId| rpo_number[n.index()].unwrap_or(usize::MAX);
    while a != b {
        while number(a) > number(b) {
            match idom[a.index()] {
                Some(parent) => a = parent,
                None => return b,
            }
        }
        while number(b) > number(a) {
            match idom[b.index()] {
                Some(parent) => b = parent,
                None => return a,
            }
        }
    }
    a
}

/// Computes the dominance frontier of every node.
///
/// The frontier of `n` is the set of nodes `m` such that `n` dominates a predecessor of `m`
/// but does not strictly dominate `m`: exactly the join points where a definition in `n`
/// needs a phi.
pub fn compute_dominance_frontiers<G>(graph: &G, dom_tree: &DominatorTree) -> Vec<BTreeSet<NodeId>>
where
    G: Predecessors,
{
    let node_count = graph.node_count();
    let mut frontiers = vec![BTreeSet::new(); node_count];

    for i in 0..node_count {
        let node = NodeId::new(i);
        if !dom_tree.is_reachable(node) {
            continue;
        }
        let preds: Vec<NodeId> = graph
            .predecessors(node)
            .filter(|p| dom_tree.is_reachable(*p))
            .collect();
        if preds.len() < 2 {
            continue;
        }
        let Some(idom) = dom_tree.immediate_dominator(node) else {
            // The entry has no dominator; a join at the entry is its own frontier.
            for pred in preds {
                let mut runner = pred;
                loop {
                    frontiers[runner.index()].insert(node);
                    match dom_tree.immediate_dominator(runner) {
                        Some(parent) => runner = parent,
                        None => break,
                    }
                }
            }
            continue;
        };
        for pred in preds {
            let mut runner = pred;
            while runner != idom {
                frontiers[runner.index()].insert(node);
                match dom_tree.immediate_dominator(runner) {
                    Some(parent) => runner = parent,
                    None => break,
                }
            }
        }
    }

    frontiers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::DirectedGraph;

    fn diamond() -> (DirectedGraph<(), ()>, [NodeId; 4]) {
        let mut graph = DirectedGraph::new();
        let a = graph.add_node(());
        let b = graph.add_node(());
        let c = graph.add_node(());
        let d = graph.add_node(());
        graph.add_edge(a, b, ()).unwrap();
        graph.add_edge(a, c, ()).unwrap();
        graph.add_edge(b, d, ()).unwrap();
        graph.add_edge(c, d, ()).unwrap();
        (graph, [a, b, c, d])
    }

    #[test]
    fn test_diamond_idoms() {
        let (graph, [a, b, c, d]) = diamond();
        let tree = compute_dominators(&graph, a);
        assert_eq!(tree.immediate_dominator(a), None);
        assert_eq!(tree.immediate_dominator(b), Some(a));
        assert_eq!(tree.immediate_dominator(c), Some(a));
        assert_eq!(tree.immediate_dominator(d), Some(a));
        assert!(tree.dominates(a, d));
        assert!(!tree.dominates(b, d));
        assert!(tree.strictly_dominates(a, b));
        assert_eq!(tree.children(a), vec![b, c, d]);
    }

    #[test]
    fn test_diamond_frontiers() {
        let (graph, [a, b, c, d]) = diamond();
        let tree = compute_dominators(&graph, a);
        let df = compute_dominance_frontiers(&graph, &tree);
        assert!(df[a.index()].is_empty());
        assert_eq!(df[b.index()].iter().copied().collect::<Vec<_>>(), vec![d]);
        assert_eq!(df[c.index()].iter().copied().collect::<Vec<_>>(), vec![d]);
        assert!(df[d.index()].is_empty());
    }

    #[test]
    fn test_loop_frontier_contains_header() {
        // entry -> header -> body -> header, header -> exit
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let entry = graph.add_node(());
        let header = graph.add_node(());
        let body = graph.add_node(());
        let exit = graph.add_node(());
        graph.add_edge(entry, header, ()).unwrap();
        graph.add_edge(header, body, ()).unwrap();
        graph.add_edge(body, header, ()).unwrap();
        graph.add_edge(header, exit, ()).unwrap();

        let tree = compute_dominators(&graph, entry);
        assert_eq!(tree.immediate_dominator(body), Some(header));
        let df = compute_dominance_frontiers(&graph, &tree);
        assert!(df[body.index()].contains(&header));
        assert!(df[header.index()].contains(&header));
    }

    #[test]
    fn test_unreachable_node() {
        let mut graph: DirectedGraph<(), ()> = DirectedGraph::new();
        let a = graph.add_node(());
        let dead = graph.add_node(());
        graph.add_edge(dead, a, ()).unwrap();
        let tree = compute_dominators(&graph, a);
        assert!(!tree.is_reachable(dead));
        assert!(!tree.dominates(a, dead));
        assert_eq!(tree.immediate_dominator(dead), None);
    }
}

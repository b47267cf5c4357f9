//! Call graph of the live methods.
//!
//! Nodes are the methods with a body; an edge `caller -> callee` exists for every call site
//! whose target is known statically: static and special invokes that resolve to one
//! definition, and virtual or interface invokes with a single dispatch target.
//!
//! The primary optimization pass processes callees before their callers, which requires an
//! acyclic graph. Cycles are broken by a depth-first search that starts from the methods in
//! sorted order and visits callees in sorted order; every back edge it meets is removed.
//! The order makes the removed edges, and so the processing waves, the same on every run.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::{
    code::{instruction::InvokeKind, CfInstruction},
    compiler::{CompilerContext, MethodBody},
    ir::IrOp,
    optimize::argprop::VirtualRootMethods,
    program::{references::MethodRef, ProgramGraph},
    utils::graph::IndexedGraph,
    Result,
};

/// Acyclic call graph over the methods with a body.
#[derive(Debug)]
pub struct CallGraph {
    graph: IndexedGraph<MethodRef, ()>,
    methods: Vec<MethodRef>,
    removed: Vec<(MethodRef, MethodRef)>,
}

impl CallGraph {
    /// Builds the graph from the invokes of each method.
    ///
    /// Targets without a body of their own (library methods, abstract methods, methods that
    /// are not in `call_sites`) are not nodes and contribute no edge.
    #[must_use]
    pub fn build(
        program: &ProgramGraph,
        roots: &VirtualRootMethods,
        call_sites: BTreeMap<MethodRef, Vec<(InvokeKind, MethodRef)>>,
    ) -> Self {
        let methods: Vec<MethodRef> = call_sites.keys().cloned().collect();
        let mut graph: IndexedGraph<MethodRef, ()> = IndexedGraph::new();
        for method in &methods {
            graph.add_node(method.clone());
        }

        for (caller, invokes) in &call_sites {
            let callees: BTreeSet<MethodRef> = invokes
                .iter()
                .filter_map(|(kind, method)| Self::static_target(program, roots, *kind, method))
                .filter(|callee| callee != caller && call_sites.contains_key(callee))
                .collect();
            for callee in callees {
                // Both keys are nodes already.
                let _ = graph.add_edge(caller.clone(), callee, ());
            }
        }

        let mut call_graph = CallGraph {
            graph,
            methods,
            removed: Vec::new(),
        };
        call_graph.break_cycles();
        log::debug!(
            "Call graph: {} methods, {} back edges removed",
            call_graph.methods.len(),
            call_graph.removed.len()
        );
        call_graph
    }

    /// Builds the graph from the current bodies of `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LockError`] if the context's program or roots are poisoned.
    pub fn from_context(ctx: &CompilerContext) -> Result<Self> {
        let program = ctx.program()?;
        let roots = ctx.virtual_roots()?;
        let mut call_sites = BTreeMap::new();
        for entry in ctx.bodies.iter() {
            let invokes: Vec<(InvokeKind, MethodRef)> = match entry.value() {
                MethodBody::Cf(code) => code
                    .instructions
                    .iter()
                    .filter_map(|instruction| match instruction {
                        CfInstruction::Invoke { kind, method, .. } => {
                            Some((*kind, method.clone()))
                        }
                        _ => None,
                    })
                    .collect(),
                MethodBody::Ir(code) => code
                    .instructions()
                    .filter_map(|(_, instruction)| match &instruction.op {
                        IrOp::Invoke { kind, method, .. } => Some((*kind, method.clone())),
                        _ => None,
                    })
                    .collect(),
            };
            call_sites.insert(entry.key().clone(), invokes);
        }
        Ok(Self::build(&program, &roots, call_sites))
    }

    /// The single method a call site can reach, if it is known without dispatch.
    #[must_use]
    pub fn static_target(
        program: &ProgramGraph,
        roots: &VirtualRootMethods,
        kind: InvokeKind,
        method: &MethodRef,
    ) -> Option<MethodRef> {
        match kind {
            InvokeKind::Static | InvokeKind::Special => program
                .resolve_method(method)
                .single()
                .map(|resolved| resolved.method.reference.clone()),
            InvokeKind::Virtual | InvokeKind::Interface => {
                roots.resolve_single_target(program, method)
            }
        }
    }

    fn break_cycles(&mut self) {
        #[derive(Clone, Copy, PartialEq)]
        enum State {
            OnStack,
            Done,
        }

        let mut state: HashMap<MethodRef, State> = HashMap::new();
        let mut removed = Vec::new();

        for start in &self.methods {
            if state.contains_key(start) {
                continue;
            }
            // Each frame: the method and its remaining callees.
            let mut stack: Vec<(MethodRef, std::vec::IntoIter<MethodRef>)> = Vec::new();
            state.insert(start.clone(), State::OnStack);
            stack.push((start.clone(), self.sorted_callees(start).into_iter()));

            while let Some((method, callees)) = stack.last_mut() {
                match callees.next() {
                    Some(callee) => match state.get(&callee).copied() {
                        Some(State::OnStack) => removed.push((method.clone(), callee)),
                        Some(State::Done) => {}
                        None => {
                            state.insert(callee.clone(), State::OnStack);
                            let next = self.sorted_callees(&callee).into_iter();
                            stack.push((callee, next));
                        }
                    },
                    None => {
                        state.insert(method.clone(), State::Done);
                        stack.pop();
                    }
                }
            }
        }

        for (caller, callee) in &removed {
            self.graph.remove_edge(caller, callee);
        }
        self.removed = removed;
    }

    fn sorted_callees(&self, method: &MethodRef) -> Vec<MethodRef> {
        let mut callees: Vec<MethodRef> = self.graph.successor_keys(method).cloned().collect();
        callees.sort();
        callees.dedup();
        callees
    }

    /// Callees of `method` that remain after cycle breaking, sorted.
    #[must_use]
    pub fn callees(&self, method: &MethodRef) -> Vec<MethodRef> {
        self.sorted_callees(method)
    }

    /// Edges removed to make the graph acyclic, in discovery order.
    #[must_use]
    pub fn removed_edges(&self) -> &[(MethodRef, MethodRef)] {
        &self.removed
    }

    /// Methods grouped leaf-first: a method's wave is one more than the highest wave of its
    /// callees. Each wave is sorted.
    #[must_use]
    pub fn waves(&self) -> Vec<Vec<MethodRef>> {
        let mut level: HashMap<&MethodRef, usize> = HashMap::new();

        // The graph is acyclic now, so a postorder DFS settles every callee first.
        for start in &self.methods {
            if level.contains_key(start) {
                continue;
            }
            let mut stack: Vec<(&MethodRef, bool)> = vec![(start, false)];
            while let Some((method, expanded)) = stack.pop() {
                if level.contains_key(method) {
                    continue;
                }
                let callees: Vec<&MethodRef> = self.graph.successor_keys(method).collect();
                if expanded {
                    let wave = callees
                        .iter()
                        .filter_map(|c| level.get(*c))
                        .map(|l| l + 1)
                        .max()
                        .unwrap_or(0);
                    level.insert(method, wave);
                } else {
                    stack.push((method, true));
                    stack.extend(
                        callees
                            .into_iter()
                            .filter(|c| !level.contains_key(*c))
                            .map(|c| (c, false)),
                    );
                }
            }
        }

        let depth = level.values().max().map_or(0, |max| max + 1);
        let mut waves: Vec<Vec<MethodRef>> = vec![Vec::new(); depth];
        for method in &self.methods {
            if let Some(wave) = level.get(method) {
                waves[*wave].push(method.clone());
            }
        }
        waves
    }

    /// Number of methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Returns `true` if no method has a body.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::fixtures::{class, dispatch_program, empty_virtual, program_of};

    fn m(holder: &str, name: &str) -> MethodRef {
        MethodRef::parse(holder, name, "()V").unwrap()
    }

    fn static_call(holder: &str, name: &str) -> (InvokeKind, MethodRef) {
        (InvokeKind::Static, m(holder, name))
    }

    fn cyclic_program() -> ProgramGraph {
        let mut a = class("app/A");
        for name in ["a", "b", "c", "leaf"] {
            a = a.with_method(
                crate::program::MethodDef::new(
                    m("app/A", name),
                    crate::program::flags::MethodAccessFlags::STATIC,
                )
                .with_code(crate::code::CfCode::new(
                    0,
                    0,
                    vec![CfInstruction::Return(None)],
                )),
            );
        }
        program_of(vec![a])
    }

    #[test]
    fn test_cycles_are_broken_deterministically() {
        let program = cyclic_program();
        let roots = VirtualRootMethods::compute(&program);
        let sites = BTreeMap::from([
            (m("app/A", "a"), vec![static_call("app/A", "b")]),
            (
                m("app/A", "b"),
                vec![static_call("app/A", "c"), static_call("app/A", "leaf")],
            ),
            (m("app/A", "c"), vec![static_call("app/A", "a")]),
            (m("app/A", "leaf"), vec![static_call("app/A", "leaf")]),
        ]);

        let graph = CallGraph::build(&program, &roots, sites.clone());
        assert_eq!(
            graph.removed_edges(),
            &[(m("app/A", "c"), m("app/A", "a"))]
        );
        assert_eq!(
            graph.waves(),
            vec![
                vec![m("app/A", "c"), m("app/A", "leaf")],
                vec![m("app/A", "b")],
                vec![m("app/A", "a")],
            ]
        );

        let again = CallGraph::build(&program, &roots, sites);
        assert_eq!(again.removed_edges(), graph.removed_edges());
        assert_eq!(again.waves(), graph.waves());
    }

    #[test]
    fn test_polymorphic_calls_have_no_edge() {
        let program = dispatch_program();
        let roots = VirtualRootMethods::compute(&program);
        let main = MethodRef::parse("app/Main", "main", "([Ljava/lang/String;)V").unwrap();
        let sites = BTreeMap::from([
            (main.clone(), vec![(InvokeKind::Interface, m("app/I", "m"))]),
            (m("app/B", "m"), Vec::new()),
            (m("app/C", "m"), Vec::new()),
        ]);
        let graph = CallGraph::build(&program, &roots, sites);
        assert!(graph.callees(&main).is_empty());
        assert_eq!(graph.waves().len(), 1);
    }

    #[test]
    fn test_devirtualized_call_is_an_edge() {
        let program = program_of(vec![
            class("app/Main"),
            class("app/Solo").with_method(empty_virtual("app/Solo", "m")),
        ]);
        let roots = VirtualRootMethods::compute(&program);
        let caller = m("app/Main", "run");
        let sites = BTreeMap::from([
            (caller.clone(), vec![(InvokeKind::Virtual, m("app/Solo", "m"))]),
            (m("app/Solo", "m"), Vec::new()),
        ]);
        let graph = CallGraph::build(&program, &roots, sites);
        assert_eq!(graph.callees(&caller), vec![m("app/Solo", "m")]);
        assert_eq!(graph.waves(), vec![vec![m("app/Solo", "m")], vec![caller]]);
    }
}

//! Virtual root methods.
//!
//! For every virtual method of the program, the analysis finds its *root*: the topmost
//! declaration of the same signature in the program hierarchy. All methods sharing a root
//! are the possible targets of a call site naming any of them. When only one of those
//! targets has a body, every call dispatches to it and can be devirtualized.
//!
//! The hierarchy is split into connected components (extends and implements edges taken in
//! both directions); components are independent and analyzed in parallel. Within a
//! component, classes are *visited* top-down: a class inherits the signature-to-root map of
//! its supertypes (the first supertype to provide a signature wins) and adds its own
//! methods, either as new roots or as overrides of an inherited root. Once every subclass
//! of a class has been visited the class is *pruned*: for each root it declares,
//!
//! - a root on a class that is never overridden is monomorphic;
//! - otherwise, if exactly one of the root and its overrides is concrete (and live, when a
//!   liveness result is given), all of them collapse to that implementation, which is
//!   monomorphic from then on;
//! - roots declared on interfaces never collapse, since other classes may inherit a
//!   sibling implementation of the same signature from a superclass.
//!
//! Liveness is recorded under the names methods had when it was computed. After classes
//! have been merged, a lens maps each method back to its originals before the query.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rayon::prelude::*;

use crate::{
    lens::GraphLens,
    program::{
        references::{MethodRef, MethodSignature, TypeRef},
        ClassDef, ProgramGraph,
    },
    shaking::AppInfoWithLiveness,
    utils::graph::IndexedGraph,
};

/// Result of the virtual root analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualRootMethods {
    roots: BTreeMap<MethodRef, MethodRef>,
    overrides: BTreeMap<MethodRef, Vec<MethodRef>>,
    single_targets: BTreeMap<MethodRef, MethodRef>,
    monomorphic: BTreeSet<MethodRef>,
    ambiguous_roots: BTreeSet<MethodRef>,
    escaping_roots: BTreeSet<MethodRef>,
}

impl VirtualRootMethods {
    /// Runs the analysis over every program class.
    #[must_use]
    pub fn compute(program: &ProgramGraph) -> Self {
        VirtualRootMethodsAnalysis::new(program).run()
    }

    /// Runs the analysis, counting only live implementations as dispatch targets.
    #[must_use]
    pub fn compute_with_liveness(program: &ProgramGraph, liveness: &AppInfoWithLiveness) -> Self {
        VirtualRootMethodsAnalysis::new(program)
            .with_liveness(liveness)
            .run()
    }

    /// Like [`VirtualRootMethods::compute_with_liveness`] for a `program` that `lens`
    /// rewrote since `liveness` was computed.
    #[must_use]
    pub fn compute_with_liveness_through(
        program: &ProgramGraph,
        liveness: &AppInfoWithLiveness,
        lens: &GraphLens,
    ) -> Self {
        VirtualRootMethodsAnalysis::new(program)
            .with_liveness(liveness)
            .with_lens(lens)
            .run()
    }

    /// The root of the declared virtual method `method`.
    #[must_use]
    pub fn root_of(&self, method: &MethodRef) -> Option<&MethodRef> {
        self.roots.get(method)
    }

    /// Overrides of `root`, sorted.
    #[must_use]
    pub fn overrides_of(&self, root: &MethodRef) -> &[MethodRef] {
        self.overrides.get(root).map_or(&[], Vec::as_slice)
    }

    /// The only implementation a call to the declared method `method` can reach.
    #[must_use]
    pub fn single_target(&self, method: &MethodRef) -> Option<&MethodRef> {
        self.single_targets.get(method)
    }

    /// Returns `true` if `method` is a root on a class that nothing overrides.
    #[must_use]
    pub fn is_monomorphic(&self, method: &MethodRef) -> bool {
        self.monomorphic.contains(method)
    }

    /// Returns `true` if another root of the same signature meets `root` in a common
    /// subclass, so dispatch through one may reach methods of the other.
    #[must_use]
    pub fn is_ambiguous_root(&self, root: &MethodRef) -> bool {
        self.ambiguous_roots.contains(root)
    }

    /// Returns `true` if `root` overrides a library method, so the library may call it.
    #[must_use]
    pub fn escapes(&self, root: &MethodRef) -> bool {
        self.escaping_roots.contains(root)
    }

    /// Resolves the invoked reference `method` and returns its single target, if any.
    #[must_use]
    pub fn resolve_single_target(
        &self,
        program: &ProgramGraph,
        method: &MethodRef,
    ) -> Option<MethodRef> {
        let resolved = program.resolve_method(method).single()?;
        self.single_target(&resolved.method.reference).cloned()
    }

    /// Number of methods with a root.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Returns `true` if the program has no virtual methods.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    fn merge(&mut self, other: VirtualRootMethods) {
        self.roots.extend(other.roots);
        self.overrides.extend(other.overrides);
        self.single_targets.extend(other.single_targets);
        self.monomorphic.extend(other.monomorphic);
        self.ambiguous_roots.extend(other.ambiguous_roots);
        self.escaping_roots.extend(other.escaping_roots);
    }
}

// ============================================================================
// Analysis
// ============================================================================

/// A declared virtual method in the arena of one component.
#[derive(Debug)]
struct RootNode {
    method: MethodRef,
    is_abstract: bool,
    /// Index of the root node; `None` for roots
    root: Option<usize>,
    /// Overrides, only filled for roots
    overrides: Vec<usize>,
}

fn root_index(nodes: &[RootNode], index: usize) -> usize {
    nodes[index].root.unwrap_or(index)
}

/// Top-down visit and bottom-up prune of the program hierarchy.
pub struct VirtualRootMethodsAnalysis<'a> {
    program: &'a ProgramGraph,
    liveness: Option<&'a AppInfoWithLiveness>,
    lens: Option<&'a GraphLens>,
}

impl<'a> VirtualRootMethodsAnalysis<'a> {
    /// An analysis of `program`.
    #[must_use]
    pub fn new(program: &'a ProgramGraph) -> Self {
        VirtualRootMethodsAnalysis {
            program,
            liveness: None,
            lens: None,
        }
    }

    /// Only live implementations count as dispatch targets.
    #[must_use]
    pub fn with_liveness(mut self, liveness: &'a AppInfoWithLiveness) -> Self {
        self.liveness = Some(liveness);
        self
    }

    /// Liveness queries go through the originals of each method under `lens`.
    #[must_use]
    pub fn with_lens(mut self, lens: &'a GraphLens) -> Self {
        self.lens = Some(lens);
        self
    }

    /// Connected components of the program hierarchy, each sorted, in order of their
    /// smallest class.
    #[must_use]
    pub fn components(&self) -> Vec<Vec<TypeRef>> {
        let mut classes: Vec<&ClassDef> = self.program.program_classes().map(|c| &**c).collect();
        classes.sort_by(|a, b| a.ty.cmp(&b.ty));

        let mut graph: IndexedGraph<TypeRef, ()> = IndexedGraph::new();
        for class in &classes {
            graph.add_node(class.ty.clone());
        }
        for class in &classes {
            for supertype in class.supertypes() {
                if self.program.program_definition_for(supertype).is_some() {
                    // add_edge only fails for unknown nodes, and both keys are inserted here.
                    let _ = graph.add_edge(class.ty.clone(), supertype.clone(), ());
                    let _ = graph.add_edge(supertype.clone(), class.ty.clone(), ());
                }
            }
        }
        let mut components: Vec<Vec<TypeRef>> = graph
            .strongly_connected_components()
            .into_iter()
            .map(|mut component| {
                component.sort();
                component
            })
            .collect();
        components.sort();
        components
    }

    /// Analyzes every component and merges the results.
    #[must_use]
    pub fn run(&self) -> VirtualRootMethods {
        let components = self.components();
        let partial: Vec<VirtualRootMethods> = components
            .par_iter()
            .map(|component| self.analyze_component(component))
            .collect();

        let mut result = VirtualRootMethods::default();
        for part in partial {
            result.merge(part);
        }
        log::debug!(
            "Virtual roots: {} methods in {} components, {} single targets ({} monomorphic)",
            result.roots.len(),
            components.len(),
            result.single_targets.len(),
            result.monomorphic.len()
        );
        result
    }

    fn analyze_component(&self, component: &[TypeRef]) -> VirtualRootMethods {
        let order = self.top_down_order(component);
        let mut nodes: Vec<RootNode> = Vec::new();
        let mut states: HashMap<&TypeRef, BTreeMap<MethodSignature, usize>> = HashMap::new();
        let mut result = VirtualRootMethods::default();

        for class in &order {
            let state = self.visit(class, &states, &mut nodes, &mut result);
            states.insert(&class.ty, state);
        }
        for class in order.iter().rev() {
            self.prune(class, &nodes, &mut result);
        }

        for node in &nodes {
            let root = node.root.map_or(&node.method, |r| &nodes[r].method);
            result.roots.insert(node.method.clone(), root.clone());
            if node.root.is_none() && !node.overrides.is_empty() {
                let mut overrides: Vec<MethodRef> = node
                    .overrides
                    .iter()
                    .map(|o| nodes[*o].method.clone())
                    .collect();
                overrides.sort();
                result.overrides.insert(node.method.clone(), overrides);
            }
        }
        result
    }

    /// Classes of the component with every program supertype before its subtypes.
    fn top_down_order(&self, component: &[TypeRef]) -> Vec<&'a ClassDef> {
        fn place<'a>(
            program: &'a ProgramGraph,
            ty: &TypeRef,
            placed: &mut BTreeSet<TypeRef>,
            order: &mut Vec<&'a ClassDef>,
        ) {
            let Some(class) = program.program_definition_for(ty) else {
                return;
            };
            if !placed.insert(ty.clone()) {
                return;
            }
            for supertype in class.supertypes() {
                place(program, supertype, placed, order);
            }
            order.push(class.as_ref());
        }

        let mut placed = BTreeSet::new();
        let mut order = Vec::with_capacity(component.len());
        for ty in component {
            place(self.program, ty, &mut placed, &mut order);
        }
        order
    }

    fn visit(
        &self,
        class: &ClassDef,
        states: &HashMap<&TypeRef, BTreeMap<MethodSignature, usize>>,
        nodes: &mut Vec<RootNode>,
        result: &mut VirtualRootMethods,
    ) -> BTreeMap<MethodSignature, usize> {
        let mut state: BTreeMap<MethodSignature, usize> = BTreeMap::new();
        for supertype in class.supertypes() {
            let Some(inherited) = states.get(supertype) else {
                continue;
            };
            for (signature, node) in inherited {
                match state.get(signature) {
                    None => {
                        state.insert(signature.clone(), *node);
                    }
                    Some(existing) => {
                        let (a, b) = (root_index(nodes, *existing), root_index(nodes, *node));
                        if a != b {
                            result.ambiguous_roots.insert(nodes[a].method.clone());
                            result.ambiguous_roots.insert(nodes[b].method.clone());
                        }
                    }
                }
            }
        }

        let mut own: Vec<_> = class.methods.iter().filter(|m| m.is_virtual()).collect();
        own.sort_by(|a, b| a.reference.cmp(&b.reference));
        for method in own {
            let signature = method.signature();
            let index = nodes.len();
            let root = state.get(&signature).map(|inherited| root_index(nodes, *inherited));
            nodes.push(RootNode {
                method: method.reference.clone(),
                is_abstract: method.is_abstract(),
                root,
                overrides: Vec::new(),
            });
            if let Some(root) = root {
                nodes[root].overrides.push(index);
            }
            if self.overrides_library_method(class, &method.reference) {
                let root = root.unwrap_or(index);
                result.escaping_roots.insert(nodes[root].method.clone());
            }
            state.insert(signature, index);
        }
        state
    }

    fn overrides_library_method(&self, class: &ClassDef, method: &MethodRef) -> bool {
        class
            .supertypes()
            .filter(|s| self.program.program_definition_for(s).is_none())
            .any(|library| {
                self.program
                    .resolve_method(&method.with_holder(library.clone()))
                    .single()
                    .is_some_and(|resolved| !resolved.class.is_program())
            })
    }

    fn is_dispatch_target(&self, node: &RootNode) -> bool {
        if node.is_abstract {
            return false;
        }
        let Some(liveness) = self.liveness else {
            return true;
        };
        match self.lens {
            Some(lens) if !lens.is_identity() => lens
                .original_methods(&node.method)
                .iter()
                .any(|original| liveness.is_live_method(original)),
            _ => liveness.is_live_method(&node.method),
        }
    }

    fn prune(&self, class: &ClassDef, nodes: &[RootNode], result: &mut VirtualRootMethods) {
        for node in nodes
            .iter()
            .filter(|n| n.root.is_none() && n.method.holder == class.ty)
        {
            if class.is_interface() {
                continue;
            }
            if node.overrides.is_empty() {
                if !node.is_abstract {
                    result.monomorphic.insert(node.method.clone());
                    result
                        .single_targets
                        .insert(node.method.clone(), node.method.clone());
                }
                continue;
            }
            let family = std::iter::once(node).chain(node.overrides.iter().map(|o| &nodes[*o]));
            let mut targets = family.clone().filter(|n| self.is_dispatch_target(n));
            let (Some(target), None) = (targets.next(), targets.next()) else {
                continue;
            };
            let target_on_interface = self
                .program
                .definition_for(&target.method.holder)
                .is_some_and(|holder| holder.is_interface());
            if !target_on_interface {
                result.monomorphic.insert(target.method.clone());
            }
            for member in family {
                result
                    .single_targets
                    .insert(member.method.clone(), target.method.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        program::{flags::MethodAccessFlags, MethodDef},
        test::fixtures::{
            class, dispatch_program, empty_virtual, interface, object_init_method, program_of,
        },
    };

    fn abstract_method(holder: &str, name: &str) -> MethodDef {
        MethodDef::new(
            MethodRef::parse(holder, name, "()V").unwrap(),
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
        )
    }

    fn m(holder: &str) -> MethodRef {
        MethodRef::parse(holder, "m", "()V").unwrap()
    }

    /// `I <- A <- B`, `I <- C` with `A.m` abstract.
    fn interface_scenario() -> ProgramGraph {
        program_of(vec![
            interface("app/I").with_method(abstract_method("app/I", "m")),
            class("app/A")
                .with_access(
                    crate::program::flags::ClassAccessFlags::PUBLIC
                        | crate::program::flags::ClassAccessFlags::ABSTRACT,
                )
                .with_interface(TypeRef::class("app/I"))
                .with_method(abstract_method("app/A", "m")),
            class("app/B")
                .with_super(TypeRef::class("app/A"))
                .with_method(empty_virtual("app/B", "m")),
            class("app/C")
                .with_interface(TypeRef::class("app/I"))
                .with_method(empty_virtual("app/C", "m")),
        ])
    }

    #[test]
    fn test_two_concrete_implementations_do_not_collapse() {
        let roots = VirtualRootMethods::compute(&interface_scenario());
        assert_eq!(roots.root_of(&m("app/B")), Some(&m("app/I")));
        assert_eq!(roots.root_of(&m("app/C")), Some(&m("app/I")));
        for holder in ["app/I", "app/A", "app/B", "app/C"] {
            assert_eq!(roots.single_target(&m(holder)), None, "{holder}");
        }
    }

    #[test]
    fn test_single_concrete_override_collapses() {
        let program = program_of(vec![
            class("app/Base")
                .with_access(
                    crate::program::flags::ClassAccessFlags::PUBLIC
                        | crate::program::flags::ClassAccessFlags::ABSTRACT,
                )
                .with_method(abstract_method("app/Base", "m")),
            class("app/Impl")
                .with_super(TypeRef::class("app/Base"))
                .with_method(object_init_method("app/Impl"))
                .with_method(empty_virtual("app/Impl", "m")),
            class("app/Sub").with_super(TypeRef::class("app/Impl")),
        ]);
        let roots = VirtualRootMethods::compute(&program);
        assert_eq!(roots.single_target(&m("app/Base")), Some(&m("app/Impl")));
        assert_eq!(roots.single_target(&m("app/Impl")), Some(&m("app/Impl")));
        assert_eq!(
            roots.resolve_single_target(&program, &m("app/Sub")),
            Some(m("app/Impl"))
        );
        assert!(!roots.is_monomorphic(&m("app/Base")));
        assert!(roots.is_monomorphic(&m("app/Impl")));

        // A second concrete override disables the collapse.
        let mut builder = program.to_builder();
        builder
            .add_class(
                class("app/Other")
                    .with_super(TypeRef::class("app/Base"))
                    .with_method(empty_virtual("app/Other", "m")),
            )
            .unwrap();
        let roots = VirtualRootMethods::compute(&builder.build());
        assert_eq!(roots.single_target(&m("app/Base")), None);
        assert!(!roots.is_monomorphic(&m("app/Impl")));
        assert_eq!(roots.overrides_of(&m("app/Base")).len(), 2);
    }

    #[test]
    fn test_monomorphic_root() {
        let roots = VirtualRootMethods::compute(&dispatch_program());
        let main = MethodRef::parse("app/Main", "main", "([Ljava/lang/String;)V").unwrap();
        assert_eq!(roots.root_of(&main), None);
        // A.m, B.m and C.m all share the interface root; none is monomorphic.
        assert!(!roots.is_monomorphic(&m("app/A")));
        assert_eq!(roots.overrides_of(&m("app/I")).len(), 3);

        let program = program_of(vec![class("app/Solo").with_method(empty_virtual("app/Solo", "m"))]);
        let roots = VirtualRootMethods::compute(&program);
        assert!(roots.is_monomorphic(&m("app/Solo")));
        assert_eq!(roots.single_target(&m("app/Solo")), Some(&m("app/Solo")));
    }

    #[test]
    fn test_library_overrides_escape() {
        let to_string = MethodRef::parse("app/Value", "toString", "()Ljava/lang/String;").unwrap();
        let program = program_of(vec![class("app/Value").with_method(
            crate::test::fixtures::method_with_code(
                to_string.clone(),
                MethodAccessFlags::PUBLIC,
                vec![
                    crate::code::CfInstruction::Const(crate::code::ConstValue::Null),
                    crate::code::CfInstruction::Return(Some(
                        crate::program::descriptor::ValueKind::Reference,
                    )),
                ],
            ),
        )]);
        let roots = VirtualRootMethods::compute(&program);
        assert!(roots.escapes(&to_string));
    }

    #[test]
    fn test_components_are_connected_hierarchies() {
        let program = interface_scenario();
        let analysis = VirtualRootMethodsAnalysis::new(&program);
        let components = analysis.components();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), 4);

        let program = program_of(vec![class("x/One"), class("x/Two")]);
        assert_eq!(VirtualRootMethodsAnalysis::new(&program).components().len(), 2);
    }

    #[test]
    fn test_deterministic() {
        let program = interface_scenario();
        assert_eq!(
            VirtualRootMethods::compute(&program),
            VirtualRootMethods::compute(&program)
        );
    }
}

//! Stack-machine code to SSA IR.
//!
//! [`IrBuilder`] turns the [`CfCode`] of a method into [`IrCode`], following the classic
//! algorithm of Cytron et al. (1991) with liveness pruning:
//!
//! 1. **Block splitting** - leaders are branch targets, handler entries, try-range
//!    boundaries and the instructions after block-ending ones. Inside a try range each
//!    instruction that can throw also ends its block, so a handler observes the locals at the
//!    end of the block that raised. Only blocks that contain such an instruction get
//!    exceptional edges.
//! 2. **Stack simulation** - the kinds on the operand stack are propagated to every block
//!    entry, and the local slots each block reads before writing (and writes) are recorded.
//! 3. **Phi placement** - phis for a local slot at the iterated dominance frontier of its
//!    writes, restricted to blocks where the slot is live. Every stack position gets a phi at
//!    normal merge points.
//! 4. **Renaming** - a preorder walk of the dominator tree translates each block, replacing
//!    loads and stores by the value currently held in the slot.
//!
//! The result is normalized so that building the emitted form of an IR again yields an
//! equivalent IR: trivial and dead phis are removed, straight-line chains of blocks are
//! merged, and critical edges into blocks with phis are split.
//!
//! # Debug info
//!
//! When the local variable table is used, values stored to a slot inside a table entry's
//! range are tagged with the entry's [`DebugLocal`]. A table that contradicts the code (a
//! dangling label, an inverted range, a slot beyond `max_locals`, or a stored kind that
//! differs from the declared type) fails with [`Error::InvalidDebugInfo`]; [`IrBuilder::build`]
//! then logs a warning and builds again without the table.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    ops::Range,
};

use crate::{
    code::{
        instruction::{ArithOp, InvokeKind, NumericType, StackOp},
        CfCode, CfInstruction, ConstValue, Label,
    },
    ir::{
        block::{BlockId, CatchHandler, Phi},
        code::IrCode,
        instruction::{IrInstruction, IrOp},
        types::TypeElement,
        value::{DebugLocal, ValueId},
    },
    program::{
        descriptor::ValueKind,
        references::TypeRef,
        MethodDef, ProgramGraph,
    },
    utils::{
        graph::{
            algorithms::{
                compute_dominance_frontiers, compute_dominators, reverse_postorder,
                DominatorTree,
            },
            NodeId, Predecessors, RootedGraph, Successors,
        },
        BitSet,
    },
    Error, Result,
};

/// Builds the IR of one method body.
///
/// # Example
///
/// ```rust,ignore
/// let ir = IrBuilder::new(&method)?.with_program(&program).build()?;
/// assert!(ir.validate().is_ok());
/// ```
pub struct IrBuilder<'a> {
    method: &'a MethodDef,
    code: &'a CfCode,
    program: Option<&'a ProgramGraph>,
}

impl<'a> IrBuilder<'a> {
    /// A builder for the body of `method`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IrError`] if the method has no code.
    pub fn new(method: &'a MethodDef) -> Result<Self> {
        let code = method
            .code
            .as_deref()
            .ok_or_else(|| Error::IrError(format!("{} has no code", method.reference)))?;
        Ok(Self::for_code(method, code))
    }

    /// A builder for `code` standing in as the body of `method`.
    #[must_use]
    pub fn for_code(method: &'a MethodDef, code: &'a CfCode) -> Self {
        IrBuilder {
            method,
            code,
            program: None,
        }
    }

    /// Uses the class hierarchy of `program` when joining reference types at phis.
    #[must_use]
    pub fn with_program(mut self, program: &'a ProgramGraph) -> Self {
        self.program = Some(program);
        self
    }

    /// Builds the IR.
    ///
    /// If the local variable table is inconsistent with the code, the build is retried once
    /// without it and the result reports [`IrCode::debug_info_dropped`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for code that cannot be translated (stack underflow,
    /// inconsistent stack heights, reads of undefined locals, dangling labels) and
    /// [`Error::IrError`] if the result fails validation.
    pub fn build(&self) -> Result<IrCode> {
        match self.build_with_locals(true) {
            Err(Error::InvalidDebugInfo(reason)) => {
                log::warn!(
                    "{}: ignoring local variable table: {reason}",
                    self.method.reference
                );
                let mut code = self.build_with_locals(false)?;
                code.set_debug_info_dropped(true);
                Ok(code)
            }
            result => result,
        }
    }

    /// Builds the IR, using the local variable table only if `use_locals` is set.
    ///
    /// # Errors
    ///
    /// As [`IrBuilder::build`], plus [`Error::InvalidDebugInfo`] when `use_locals` is set and
    /// the table is inconsistent.
    pub fn build_with_locals(&self, use_locals: bool) -> Result<IrCode> {
        let code = Construction::new(self, use_locals)?.run()?;
        log::trace!(
            "{}: {} blocks, {} values",
            self.method.reference,
            code.block_count(),
            code.value_count()
        );
        Ok(code)
    }
}

// ============================================================================
// Flow graph over the stack-machine code
// ============================================================================

/// A basic block of the stack-machine code.
struct FlowBlock {
    /// Instruction positions; empty for a synthetic entry
    range: Range<usize>,
    /// Distinct normal successors
    normal: Vec<usize>,
    /// Block entered when the last instruction does not transfer control
    fallthrough: Option<usize>,
    /// Control runs past the last instruction of the code
    open_end: bool,
    /// Exceptional edges in handler order
    handlers: Vec<(Option<TypeRef>, usize)>,
    /// Sorted distinct predecessors over all edges
    predecessors: Vec<usize>,
    /// Type bound of the exception entering a handler block
    catch_type: Option<TypeRef>,
}

struct FlowGraph {
    blocks: Vec<FlowBlock>,
    /// Position of each block leader to the block
    block_at: HashMap<usize, usize>,
}

struct TryRange {
    covered: Range<usize>,
    guards: Vec<Option<TypeRef>>,
    targets: Vec<usize>,
}

impl FlowGraph {
    fn build(code: &CfCode, labels: &HashMap<Label, usize>) -> Result<Self> {
        let instructions = &code.instructions;
        let len = instructions.len();
        if len == 0 {
            return Err(malformed_error!("empty code"));
        }
        let position = |label: Label| {
            labels
                .get(&label)
                .copied()
                .ok_or_else(|| malformed_error!("undefined label {}", label))
        };

        let mut ranges = Vec::with_capacity(code.try_catch_ranges.len());
        for range in &code.try_catch_ranges {
            let start = position(range.start)?;
            let end = position(range.end)?;
            if start > end {
                return Err(malformed_error!(
                    "try range {}..{} ends before it starts",
                    range.start,
                    range.end
                ));
            }
            if range.guards.len() != range.targets.len() {
                return Err(malformed_error!(
                    "try range {}..{} has {} guards for {} handlers",
                    range.start,
                    range.end,
                    range.guards.len(),
                    range.targets.len()
                ));
            }
            let targets = range
                .targets
                .iter()
                .map(|target| position(*target))
                .collect::<Result<Vec<_>>>()?;
            ranges.push(TryRange {
                covered: start..end,
                guards: range.guards.clone(),
                targets,
            });
        }

        let mut leaders = BTreeSet::from([0usize]);
        for (index, instruction) in instructions.iter().enumerate() {
            for target in instruction.branch_targets() {
                leaders.insert(position(target)?);
            }
            if instruction.ends_block() {
                leaders.insert(index + 1);
            }
        }
        for range in &ranges {
            leaders.insert(range.covered.start);
            leaders.insert(range.covered.end);
            leaders.extend(range.targets.iter().copied());
            for index in range.covered.clone() {
                if instructions[index].can_throw() {
                    leaders.insert(index + 1);
                }
            }
        }
        let starts: Vec<usize> = leaders.into_iter().filter(|p| *p < len).collect();
        let raw_at: HashMap<usize, usize> =
            starts.iter().enumerate().map(|(i, s)| (*s, i)).collect();
        let block_of = |position: usize| {
            raw_at
                .get(&position)
                .copied()
                .ok_or_else(|| malformed_error!("no block starts at {}", position))
        };

        let mut raw = Vec::with_capacity(starts.len());
        for (i, start) in starts.iter().enumerate() {
            let range = *start..starts.get(i + 1).copied().unwrap_or(len);
            let last = instructions[range.clone()]
                .iter()
                .rev()
                .find(|insn| !matches!(insn, CfInstruction::Label(_) | CfInstruction::Frame(_)));

            let mut normal = Vec::new();
            if let Some(last) = last.filter(|insn| insn.ends_block()) {
                for target in last.branch_targets() {
                    let block = block_of(position(target)?)?;
                    if !normal.contains(&block) {
                        normal.push(block);
                    }
                }
            }
            let terminated = last.is_some_and(CfInstruction::is_terminator);
            let fallthrough = if terminated {
                None
            } else {
                raw_at.get(&range.end).copied()
            };
            if let Some(next) = fallthrough {
                if !normal.contains(&next) {
                    normal.push(next);
                }
            }

            let mut handlers: Vec<(Option<TypeRef>, usize)> = Vec::new();
            if instructions[range.clone()].iter().any(CfInstruction::can_throw) {
                for covering in ranges.iter().filter(|r| r.covered.contains(&range.start)) {
                    for (guard, target) in covering.guards.iter().zip(&covering.targets) {
                        let handler = (guard.clone(), block_of(*target)?);
                        if !handlers.contains(&handler) {
                            handlers.push(handler);
                        }
                    }
                }
            }

            raw.push(FlowBlock {
                range,
                normal,
                fallthrough,
                open_end: !terminated && fallthrough.is_none(),
                handlers,
                predecessors: Vec::new(),
                catch_type: None,
            });
        }

        Self::finish(raw, &starts)
    }

    /// Drops unreachable blocks, computes predecessors and handler types, and prepends a
    /// synthetic entry if the first block is a branch target.
    fn finish(mut raw: Vec<FlowBlock>, starts: &[usize]) -> Result<Self> {
        let mut reachable = vec![false; raw.len()];
        reachable[0] = true;
        let mut work = vec![0usize];
        while let Some(b) = work.pop() {
            let block = &raw[b];
            for succ in block.normal.iter().chain(block.handlers.iter().map(|(_, t)| t)) {
                if !reachable[*succ] {
                    reachable[*succ] = true;
                    work.push(*succ);
                }
            }
        }

        let mut catch_types: HashMap<usize, TypeRef> = HashMap::new();
        for block in raw.iter().enumerate().filter(|(b, _)| reachable[*b]).map(|(_, block)| block) {
            for (guard, target) in &block.handlers {
                let caught = guard.clone().unwrap_or_else(TypeRef::throwable);
                catch_types
                    .entry(*target)
                    .and_modify(|existing| {
                        if *existing != caught {
                            *existing = TypeRef::throwable();
                        }
                    })
                    .or_insert(caught);
            }
        }
        for (b, block) in raw.iter().enumerate().filter(|(b, _)| reachable[*b]) {
            if block.open_end {
                return Err(malformed_error!("control falls off the end of the code"));
            }
            for succ in &block.normal {
                if catch_types.contains_key(succ) {
                    return Err(malformed_error!(
                        "handler at {} is also entered by a jump from {}",
                        starts[*succ],
                        starts[b]
                    ));
                }
            }
        }
        if catch_types.contains_key(&0) {
            return Err(malformed_error!("the first instruction is a handler entry"));
        }

        let mut raw_predecessors = vec![Vec::new(); raw.len()];
        for (b, block) in raw.iter().enumerate().filter(|(b, _)| reachable[*b]) {
            for succ in block.normal.iter().chain(block.handlers.iter().map(|(_, t)| t)) {
                raw_predecessors[*succ].push(b);
            }
        }

        let synthetic = !raw_predecessors[0].is_empty();
        let offset = usize::from(synthetic);
        let mut renumber = vec![None; raw.len()];
        let mut next = offset;
        for (b, slot) in renumber.iter_mut().enumerate() {
            if reachable[b] {
                *slot = Some(next);
                next += 1;
            }
        }
        let map = |b: usize| renumber[b].unwrap_or(usize::MAX);

        let mut blocks = Vec::with_capacity(next);
        if synthetic {
            blocks.push(FlowBlock {
                range: 0..0,
                normal: vec![1],
                fallthrough: Some(1),
                open_end: false,
                handlers: Vec::new(),
                predecessors: Vec::new(),
                catch_type: None,
            });
        }
        let mut block_at = HashMap::with_capacity(next);
        for (b, block) in raw.iter_mut().enumerate() {
            if !reachable[b] {
                continue;
            }
            let mut predecessors: Vec<usize> = raw_predecessors[b].iter().map(|p| map(*p)).collect();
            if b == 0 && synthetic {
                predecessors.push(0);
            }
            predecessors.sort_unstable();
            predecessors.dedup();
            block_at.insert(starts[b], map(b));
            blocks.push(FlowBlock {
                range: block.range.clone(),
                normal: block.normal.iter().map(|s| map(*s)).collect(),
                fallthrough: block.fallthrough.map(map),
                open_end: false,
                handlers: std::mem::take(&mut block.handlers)
                    .into_iter()
                    .map(|(guard, target)| (guard, map(target)))
                    .collect(),
                predecessors,
                catch_type: catch_types.get(&b).cloned(),
            });
        }

        Ok(FlowGraph { blocks, block_at })
    }
}

impl Successors for FlowGraph {
    fn node_count(&self) -> usize {
        self.blocks.len()
    }

    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let block = &self.blocks[node.index()];
        let mut targets: Vec<usize> = block.normal.clone();
        for (_, target) in &block.handlers {
            if !targets.contains(target) {
                targets.push(*target);
            }
        }
        targets.into_iter().map(NodeId::new)
    }
}

impl Predecessors for FlowGraph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.blocks[node.index()]
            .predecessors
            .iter()
            .map(|p| NodeId::new(*p))
    }
}

impl RootedGraph for FlowGraph {
    fn entry(&self) -> NodeId {
        NodeId::new(0)
    }
}

// ============================================================================
// Local variable table
// ============================================================================

/// A validated entry of the local variable table.
struct LocalScope {
    slot: u16,
    live: Range<usize>,
    kind: ValueKind,
    local: DebugLocal,
}

impl LocalScope {
    fn collect(code: &CfCode, labels: &HashMap<Label, usize>) -> Result<Vec<LocalScope>> {
        let mut scopes = Vec::with_capacity(code.local_variables.len());
        for entry in &code.local_variables {
            let position = |label: Label| {
                labels.get(&label).copied().ok_or_else(|| {
                    Error::InvalidDebugInfo(format!(
                        "local {} refers to undefined label {label}",
                        entry.name
                    ))
                })
            };
            let start = position(entry.start)?;
            let end = position(entry.end)?;
            if start > end {
                return Err(Error::InvalidDebugInfo(format!(
                    "local {} ends at {} before it starts at {}",
                    entry.name, entry.end, entry.start
                )));
            }
            let kind = entry.ty.kind();
            if kind == ValueKind::Void
                || usize::from(entry.index) + kind.slots() > usize::from(code.max_locals)
            {
                return Err(Error::InvalidDebugInfo(format!(
                    "local {} of type {} does not fit slot {} of {}",
                    entry.name, entry.ty, entry.index, code.max_locals
                )));
            }
            scopes.push(LocalScope {
                slot: entry.index,
                live: start..end,
                kind,
                local: DebugLocal {
                    name: entry.name.clone(),
                    ty: entry.ty.clone(),
                    signature: entry.signature.clone(),
                },
            });
        }
        Ok(scopes)
    }
}

// ============================================================================
// Construction
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhiVar {
    Local(u16),
    Stack(usize),
}

struct PendingPhi {
    block: usize,
    var: PhiVar,
    out: ValueId,
    operands: Vec<Option<ValueId>>,
}

/// Local slots a block reads before writing them, and slots it writes.
struct SlotSummary {
    reads: BitSet,
    writes: BitSet,
}

/// Abstract state while translating a block.
#[derive(Clone)]
struct Frame {
    locals: Vec<Option<ValueId>>,
    stack: Vec<(ValueId, ValueKind)>,
}

impl Frame {
    fn read(&self, slot: u16) -> Result<ValueId> {
        self.locals
            .get(usize::from(slot))
            .copied()
            .flatten()
            .ok_or_else(|| malformed_error!("local {} is read before it is written", slot))
    }

    fn write(&mut self, slot: u16, value: ValueId, wide: bool) -> Result<()> {
        let index = usize::from(slot);
        if index + usize::from(wide) >= self.locals.len() {
            return Err(malformed_error!("local {} exceeds max_locals", slot));
        }
        self.locals[index] = Some(value);
        if wide {
            self.locals[index + 1] = None;
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<ValueId> {
        self.stack
            .pop()
            .map(|(value, _)| value)
            .ok_or_else(|| malformed_error!("operand stack underflow"))
    }

    /// Pops `count` values, returned in push order.
    fn pop_n(&mut self, count: usize) -> Result<Vec<ValueId>> {
        if self.stack.len() < count {
            return Err(malformed_error!("operand stack underflow"));
        }
        Ok(self
            .stack
            .split_off(self.stack.len() - count)
            .into_iter()
            .map(|(value, _)| value)
            .collect())
    }
}

struct Construction<'a> {
    method: &'a MethodDef,
    code: &'a CfCode,
    program: Option<&'a ProgramGraph>,
    labels: HashMap<Label, usize>,
    scopes: Option<Vec<LocalScope>>,
    graph: FlowGraph,
    slot_count: usize,
    ir: IrCode,
}

impl<'a> Construction<'a> {
    fn new(builder: &IrBuilder<'a>, use_locals: bool) -> Result<Self> {
        let code = builder.code;
        let mut labels = HashMap::new();
        for (index, instruction) in code.instructions.iter().enumerate() {
            if let CfInstruction::Label(label) = instruction {
                if labels.insert(*label, index).is_some() {
                    return Err(malformed_error!("label {} is bound twice", label));
                }
            }
        }
        let graph = FlowGraph::build(code, &labels)?;
        let scopes = if use_locals {
            Some(LocalScope::collect(code, &labels)?)
        } else {
            None
        };
        let slot_count = usize::from(code.max_locals)
            .max(builder.method.parameter_info().slot_count());

        let mut ir = IrCode::new(builder.method.reference.clone(), builder.method.is_static());
        ir.set_debug_info_dropped(!use_locals && !code.local_variables.is_empty());

        Ok(Construction {
            method: builder.method,
            code,
            program: builder.program,
            labels,
            scopes,
            graph,
            slot_count,
            ir,
        })
    }

    fn run(mut self) -> Result<IrCode> {
        let block_count = self.graph.blocks.len();
        for _ in 0..block_count {
            self.ir.add_block();
        }

        let rpo: Vec<usize> = reverse_postorder(&self.graph, NodeId::new(0))
            .into_iter()
            .map(NodeId::index)
            .collect();
        let dominators = compute_dominators(&self.graph, NodeId::new(0));

        // Phase 1: stack kinds at block entries, slot reads and writes
        let (entry_kinds, summaries) = self.simulate_stack_kinds(&rpo)?;

        // Phase 2: pruned phi placement
        let live_in = self.live_in(&summaries, &rpo);
        let phi_vars = self.place_phis(&dominators, &entry_kinds, &summaries, &live_in);

        // Phase 3: renaming
        let phis = self.rename(&dominators, &phi_vars, &entry_kinds)?;

        self.install_phis(phis)?;
        self.install_edges();

        merge_straight_line_blocks(&mut self.ir);
        split_critical_edges(&mut self.ir);
        self.ir.validate()?;
        Ok(self.ir)
    }

    // ------------------------------------------------------------------------
    // Phase 1
    // ------------------------------------------------------------------------

    fn simulate_stack_kinds(
        &self,
        rpo: &[usize],
    ) -> Result<(Vec<Vec<ValueKind>>, Vec<SlotSummary>)> {
        let blocks = &self.graph.blocks;
        let mut entry: Vec<Option<Vec<ValueKind>>> = vec![None; blocks.len()];
        entry[0] = Some(Vec::new());
        for (b, block) in blocks.iter().enumerate() {
            if block.catch_type.is_some() {
                entry[b] = Some(vec![ValueKind::Reference]);
            }
        }
        let mut summaries: Vec<SlotSummary> = (0..blocks.len())
            .map(|_| SlotSummary {
                reads: BitSet::new(self.slot_count),
                writes: BitSet::new(self.slot_count),
            })
            .collect();

        for &b in rpo {
            let mut stack = entry[b]
                .clone()
                .ok_or_else(|| malformed_error!("block at {} has no entry state", blocks[b].range.start))?;
            let summary = &mut summaries[b];
            for instruction in &self.code.instructions[blocks[b].range.clone()] {
                self.simulate_kind(instruction, &mut stack, summary)?;
            }
            for succ in &blocks[b].normal {
                match &entry[*succ] {
                    Some(existing) if *existing != stack => {
                        return Err(malformed_error!(
                            "inconsistent operand stack at {}: {:?} and {:?}",
                            blocks[*succ].range.start,
                            existing,
                            stack
                        ));
                    }
                    Some(_) => {}
                    None => entry[*succ] = Some(stack.clone()),
                }
            }
        }

        Ok((
            entry.into_iter().map(Option::unwrap_or_default).collect(),
            summaries,
        ))
    }

    fn simulate_kind(
        &self,
        instruction: &CfInstruction,
        stack: &mut Vec<ValueKind>,
        summary: &mut SlotSummary,
    ) -> Result<()> {
        let check = |slot: usize| {
            if slot < self.slot_count {
                Ok(slot)
            } else {
                Err(malformed_error!("local {} exceeds max_locals", slot))
            }
        };
        match instruction {
            CfInstruction::Load { kind, local } => {
                let slot = check(usize::from(*local))?;
                if !summary.writes.contains(slot) {
                    summary.reads.insert(slot);
                }
                stack.push(*kind);
            }
            CfInstruction::Store { kind, local } => {
                stack
                    .pop()
                    .ok_or_else(|| malformed_error!("operand stack underflow"))?;
                let slot = check(usize::from(*local) + kind.slots().saturating_sub(1))?;
                summary.writes.insert(usize::from(*local));
                summary.writes.insert(slot);
            }
            CfInstruction::Iinc { local, .. } => {
                let slot = check(usize::from(*local))?;
                if !summary.writes.contains(slot) {
                    summary.reads.insert(slot);
                }
                summary.writes.insert(slot);
            }
            CfInstruction::Stack(op) => apply_stack_op(stack, *op, |kind| kind.slots())?,
            other => {
                let (popped, pushed) = stack_effect(other);
                if stack.len() < popped {
                    return Err(malformed_error!("operand stack underflow"));
                }
                stack.truncate(stack.len() - popped);
                stack.extend(pushed);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Phase 2
    // ------------------------------------------------------------------------

    fn live_in(&self, summaries: &[SlotSummary], rpo: &[usize]) -> Vec<BitSet> {
        let mut live_in: Vec<BitSet> = summaries.iter().map(|s| s.reads.clone()).collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().rev() {
                let mut out = BitSet::new(self.slot_count);
                for succ in self.graph.successors(NodeId::new(b)) {
                    out.union_with(&live_in[succ.index()]);
                }
                out.difference_with(&summaries[b].writes);
                changed |= live_in[b].union_with(&out);
            }
        }
        live_in
    }

    fn place_phis(
        &self,
        dominators: &DominatorTree,
        entry_kinds: &[Vec<ValueKind>],
        summaries: &[SlotSummary],
        live_in: &[BitSet],
    ) -> Vec<Vec<PhiVar>> {
        let block_count = self.graph.blocks.len();
        let frontiers = compute_dominance_frontiers(&self.graph, dominators);
        let mut vars: Vec<Vec<PhiVar>> = vec![Vec::new(); block_count];

        for slot in 0..self.slot_count {
            let mut work: Vec<usize> = (0..block_count)
                .filter(|b| *b == 0 || summaries[*b].writes.contains(slot))
                .collect();
            let mut queued = BitSet::new(block_count);
            for b in &work {
                queued.insert(*b);
            }
            let mut placed = BitSet::new(block_count);
            while let Some(b) = work.pop() {
                for frontier in &frontiers[b] {
                    let f = frontier.index();
                    if placed.contains(f) {
                        continue;
                    }
                    placed.insert(f);
                    if live_in[f].contains(slot) {
                        vars[f].push(PhiVar::Local(slot as u16));
                    }
                    if !queued.contains(f) {
                        queued.insert(f);
                        work.push(f);
                    }
                }
            }
        }

        for (b, block) in self.graph.blocks.iter().enumerate() {
            if block.predecessors.len() > 1 && block.catch_type.is_none() {
                vars[b].extend((0..entry_kinds[b].len()).map(PhiVar::Stack));
            }
        }
        vars
    }

    // ------------------------------------------------------------------------
    // Phase 3
    // ------------------------------------------------------------------------

    fn rename(
        &mut self,
        dominators: &DominatorTree,
        phi_vars: &[Vec<PhiVar>],
        entry_kinds: &[Vec<ValueKind>],
    ) -> Result<Vec<PendingPhi>> {
        let block_count = self.graph.blocks.len();
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); block_count];
        for b in 1..block_count {
            if let Some(idom) = dominators.immediate_dominator(NodeId::new(b)) {
                children[idom.index()].push(b);
            }
        }

        let mut exits: Vec<Option<Frame>> = vec![None; block_count];
        let mut phis = Vec::new();
        let mut order = vec![0usize];
        while let Some(b) = order.pop() {
            let block = BlockId::new(b as u32);
            let mut frame = if b == 0 {
                let locals = self.define_arguments(block);
                Frame {
                    locals,
                    stack: Vec::new(),
                }
            } else {
                let parent = dominators
                    .immediate_dominator(NodeId::new(b))
                    .and_then(|idom| exits[idom.index()].as_ref())
                    .ok_or_else(|| malformed_error!("block {} has no dominator state", b))?;
                let stack = if self.graph.blocks[b].predecessors.len() == 1 {
                    parent.stack.clone()
                } else {
                    Vec::new()
                };
                Frame {
                    locals: parent.locals.clone(),
                    stack,
                }
            };

            let block_start = self.first_real(self.graph.blocks[b].range.start);
            for var in &phi_vars[b] {
                let out = self.ir.new_value(TypeElement::Top);
                match *var {
                    PhiVar::Local(slot) => {
                        frame.locals[usize::from(slot)] = Some(out);
                        let local = self
                            .scope_at(slot, block_start)
                            .map(|scope| scope.local.clone());
                        if let (Some(local), Some(value)) = (local, self.ir.value_mut(out)) {
                            value.local = Some(local);
                        }
                    }
                    PhiVar::Stack(position) => frame.stack.push((out, entry_kinds[b][position])),
                }
                phis.push(PendingPhi {
                    block: b,
                    var: *var,
                    out,
                    operands: Vec::new(),
                });
            }

            if let Some(catch_type) = self.graph.blocks[b].catch_type.clone() {
                let exception = self.define(
                    block,
                    TypeElement::non_null(&catch_type),
                    IrOp::MoveException(catch_type),
                );
                frame.stack = vec![(exception, ValueKind::Reference)];
            }

            self.translate_block(b, &mut frame)?;
            exits[b] = Some(frame);
            order.extend(children[b].iter().rev());
        }

        for phi in &mut phis {
            phi.operands = self.graph.blocks[phi.block]
                .predecessors
                .iter()
                .map(|p| {
                    let exit = exits[*p].as_ref()?;
                    match phi.var {
                        PhiVar::Local(slot) => exit.locals.get(usize::from(slot)).copied().flatten(),
                        PhiVar::Stack(position) => exit.stack.get(position).map(|(v, _)| *v),
                    }
                })
                .collect();
        }
        Ok(phis)
    }

    fn define_arguments(&mut self, block: BlockId) -> Vec<Option<ValueId>> {
        let info = self.method.parameter_info();
        let mut locals = vec![None; self.slot_count];
        let first = self.first_real(0);
        for (index, (ty, slot)) in info.argument_types.iter().zip(&info.slots).enumerate() {
            let element = if info.has_receiver && index == 0 {
                TypeElement::non_null(ty)
            } else {
                TypeElement::of_type(ty)
            };
            let value = self.define(block, element, IrOp::Argument(index as u16));
            let local = self.scope_at(*slot, first).map(|scope| scope.local.clone());
            if let (Some(local), Some(entry)) = (local, self.ir.value_mut(value)) {
                entry.local = Some(local);
            }
            if let Some(entry) = locals.get_mut(usize::from(*slot)) {
                *entry = Some(value);
            }
        }
        locals
    }

    fn translate_block(&mut self, b: usize, frame: &mut Frame) -> Result<()> {
        let block = BlockId::new(b as u32);
        let range = self.graph.blocks[b].range.clone();
        for index in range {
            if self.translate(block, index, frame)? {
                return Ok(());
            }
        }
        let next = self.fallthrough(b)?;
        self.append(block, IrOp::Goto(next));
        Ok(())
    }

    /// Translates one instruction; returns `true` for terminators.
    #[allow(clippy::too_many_lines)]
    fn translate(&mut self, block: BlockId, index: usize, frame: &mut Frame) -> Result<bool> {
        let code = self.code;
        match &code.instructions[index] {
            CfInstruction::Label(_) | CfInstruction::Frame(_) | CfInstruction::Nop => {}
            CfInstruction::Const(value) => {
                let ty = match value {
                    ConstValue::Null => TypeElement::Null,
                    other => {
                        let ty = other.ty();
                        if ty.is_primitive() {
                            TypeElement::of_type(&ty)
                        } else {
                            TypeElement::non_null(&ty)
                        }
                    }
                };
                let kind = ty.kind();
                let out = self.define(block, ty, IrOp::Const(value.clone()));
                frame.stack.push((out, kind));
            }
            CfInstruction::Load { kind, local } => {
                let value = frame.read(*local)?;
                let actual = self.ir.value_type(value);
                if actual != TypeElement::Top && actual.kind() != *kind {
                    return Err(malformed_error!(
                        "local {} holds {} but is loaded as {}",
                        local,
                        actual,
                        kind
                    ));
                }
                frame.stack.push((value, *kind));
            }
            CfInstruction::Store { kind, local } => {
                let value = frame.pop()?;
                self.attach_local(value, *local, *kind, index)?;
                frame.write(*local, value, kind.is_wide())?;
            }
            CfInstruction::Iinc { local, increment } => {
                let value = frame.read(*local)?;
                let constant = self.define(
                    block,
                    TypeElement::Int,
                    IrOp::Const(ConstValue::Int(i32::from(*increment))),
                );
                let sum = self.define(
                    block,
                    TypeElement::Int,
                    IrOp::Arith {
                        op: ArithOp::Add,
                        ty: NumericType::Int,
                        left: value,
                        right: constant,
                    },
                );
                self.attach_local(sum, *local, ValueKind::Int, index)?;
                frame.write(*local, sum, false)?;
            }
            CfInstruction::Stack(op) => apply_stack_op(&mut frame.stack, *op, |(_, kind)| kind.slots())?,
            CfInstruction::Arith { op, ty } => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let op = IrOp::Arith {
                    op: *op,
                    ty: *ty,
                    left,
                    right,
                };
                self.push_result(block, frame, primitive(ty.kind()), op);
            }
            CfInstruction::Neg(ty) => {
                let value = frame.pop()?;
                self.push_result(block, frame, primitive(ty.kind()), IrOp::Neg { ty: *ty, value });
            }
            CfInstruction::Convert { from, to } => {
                let value = frame.pop()?;
                let op = IrOp::Convert {
                    from: *from,
                    to: *to,
                    value,
                };
                self.push_result(block, frame, primitive(to.kind()), op);
            }
            CfInstruction::Cmp(kind) => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let op = IrOp::Cmp {
                    kind: *kind,
                    left,
                    right,
                };
                self.push_result(block, frame, TypeElement::Int, op);
            }
            CfInstruction::If { cond, kind, target } => {
                let left = frame.pop()?;
                let op = IrOp::If {
                    cond: *cond,
                    kind: *kind,
                    left,
                    right: None,
                    target: self.block_of(*target)?,
                    fallthrough: self.fallthrough(block.index())?,
                };
                self.append(block, op);
                return Ok(true);
            }
            CfInstruction::IfCmp { cond, kind, target } => {
                let right = frame.pop()?;
                let left = frame.pop()?;
                let op = IrOp::If {
                    cond: *cond,
                    kind: *kind,
                    left,
                    right: Some(right),
                    target: self.block_of(*target)?,
                    fallthrough: self.fallthrough(block.index())?,
                };
                self.append(block, op);
                return Ok(true);
            }
            CfInstruction::Goto(target) => {
                let target = self.block_of(*target)?;
                self.append(block, IrOp::Goto(target));
                return Ok(true);
            }
            CfInstruction::Switch {
                default,
                keys,
                targets,
            } => {
                let value = frame.pop()?;
                let targets = targets
                    .iter()
                    .map(|target| self.block_of(*target))
                    .collect::<Result<Vec<_>>>()?;
                let op = IrOp::Switch {
                    value,
                    keys: keys.clone(),
                    targets,
                    default: self.block_of(*default)?,
                };
                self.append(block, op);
                return Ok(true);
            }
            CfInstruction::Return(kind) => {
                let value = kind.map(|_| frame.pop()).transpose()?;
                self.append(block, IrOp::Return(value));
                return Ok(true);
            }
            CfInstruction::Throw => {
                let exception = frame.pop()?;
                self.append(block, IrOp::Throw(exception));
                return Ok(true);
            }
            CfInstruction::Invoke {
                kind,
                method,
                interface,
            } => {
                let count = method.arity() + usize::from(*kind != InvokeKind::Static);
                let arguments = frame.pop_n(count)?;
                let op = IrOp::Invoke {
                    kind: *kind,
                    method: method.clone(),
                    interface: *interface,
                    arguments,
                };
                self.push_typed(block, frame, method.proto.return_type(), op);
            }
            CfInstruction::InvokeDynamic(call_site) => {
                let arguments = frame.pop_n(call_site.proto.arity())?;
                let op = IrOp::InvokeDynamic {
                    call_site: call_site.clone(),
                    arguments,
                };
                self.push_typed(block, frame, call_site.proto.return_type(), op);
            }
            CfInstruction::StaticGet(field) => {
                self.push_typed(block, frame, &field.ty, IrOp::StaticGet(field.clone()));
            }
            CfInstruction::StaticPut(field) => {
                let value = frame.pop()?;
                let op = IrOp::StaticPut {
                    field: field.clone(),
                    value,
                };
                self.append(block, op);
            }
            CfInstruction::InstanceGet(field) => {
                let object = frame.pop()?;
                let op = IrOp::InstanceGet {
                    field: field.clone(),
                    object,
                };
                self.push_typed(block, frame, &field.ty, op);
            }
            CfInstruction::InstancePut(field) => {
                let value = frame.pop()?;
                let object = frame.pop()?;
                let op = IrOp::InstancePut {
                    field: field.clone(),
                    object,
                    value,
                };
                self.append(block, op);
            }
            CfInstruction::New(ty) => {
                let op = IrOp::NewInstance(ty.clone());
                self.push_result(block, frame, TypeElement::non_null(ty), op);
            }
            CfInstruction::NewArray(ty) => {
                let size = frame.pop()?;
                let op = IrOp::NewArray {
                    ty: ty.clone(),
                    size,
                };
                self.push_result(block, frame, TypeElement::non_null(ty), op);
            }
            CfInstruction::MultiNewArray { ty, dimensions } => {
                let sizes = frame.pop_n(usize::from(*dimensions))?;
                let op = IrOp::MultiNewArray {
                    ty: ty.clone(),
                    sizes,
                };
                self.push_result(block, frame, TypeElement::non_null(ty), op);
            }
            CfInstruction::ArrayLoad(kind) => {
                let index = frame.pop()?;
                let array = frame.pop()?;
                let ty = match kind.value_kind() {
                    ValueKind::Reference => {
                        let element = self
                            .ir
                            .value_type(array)
                            .upper_bound()
                            .and_then(TypeRef::element_type)
                            .filter(|element| !element.is_primitive())
                            .unwrap_or_else(TypeRef::object);
                        TypeElement::of_type(&element)
                    }
                    other => primitive(other),
                };
                let op = IrOp::ArrayGet {
                    kind: *kind,
                    array,
                    index,
                };
                self.push_result(block, frame, ty, op);
            }
            CfInstruction::ArrayStore(kind) => {
                let value = frame.pop()?;
                let index = frame.pop()?;
                let array = frame.pop()?;
                let op = IrOp::ArrayPut {
                    kind: *kind,
                    array,
                    index,
                    value,
                };
                self.append(block, op);
            }
            CfInstruction::ArrayLength => {
                let array = frame.pop()?;
                self.push_result(block, frame, TypeElement::Int, IrOp::ArrayLength(array));
            }
            CfInstruction::CheckCast(ty) => {
                let value = frame.pop()?;
                let op = IrOp::CheckCast {
                    ty: ty.clone(),
                    value,
                };
                self.push_result(block, frame, TypeElement::of_type(ty), op);
            }
            CfInstruction::SafeCheckCast(ty) => {
                let value = frame.pop()?;
                let op = IrOp::SafeCheckCast {
                    ty: ty.clone(),
                    value,
                };
                self.push_result(block, frame, TypeElement::of_type(ty), op);
            }
            CfInstruction::InstanceOf(ty) => {
                let value = frame.pop()?;
                let op = IrOp::InstanceOf {
                    ty: ty.clone(),
                    value,
                };
                self.push_result(block, frame, TypeElement::Int, op);
            }
            CfInstruction::MonitorEnter => {
                let object = frame.pop()?;
                self.append(block, IrOp::MonitorEnter(object));
            }
            CfInstruction::MonitorExit => {
                let object = frame.pop()?;
                self.append(block, IrOp::MonitorExit(object));
            }
            CfInstruction::InitClass(field) => self.append(block, IrOp::InitClass(field.clone())),
        }
        Ok(false)
    }

    // ------------------------------------------------------------------------
    // Phi cleanup and edges
    // ------------------------------------------------------------------------

    /// Removes trivial and dead phis, types the rest and stores them in their blocks.
    fn install_phis(&mut self, mut phis: Vec<PendingPhi>) -> Result<()> {
        // Trivial phis: all operands other than the phi itself are one value.
        let mut replaced: HashMap<ValueId, ValueId> = HashMap::new();
        let mut alive = vec![true; phis.len()];
        loop {
            let mut changed = false;
            for (i, phi) in phis.iter_mut().enumerate() {
                if !alive[i] {
                    continue;
                }
                for operand in phi.operands.iter_mut().flatten() {
                    *operand = resolve(*operand, &replaced);
                }
                if let Some(value) = trivial_value(phi) {
                    replaced.insert(phi.out, value);
                    alive[i] = false;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        self.ir.replace_uses(&replaced);

        // Dead phis: not reachable from an instruction operand through phi operands.
        let index_of: HashMap<ValueId, usize> = phis
            .iter()
            .enumerate()
            .filter(|(i, _)| alive[*i])
            .map(|(i, phi)| (phi.out, i))
            .collect();
        let used: HashSet<ValueId> = self
            .ir
            .instructions()
            .flat_map(|(_, instruction)| instruction.operands())
            .collect();
        let mut live = vec![false; phis.len()];
        let mut work: Vec<usize> = Vec::new();
        for (value, i) in &index_of {
            if used.contains(value) {
                live[*i] = true;
                work.push(*i);
            }
        }
        while let Some(i) = work.pop() {
            for operand in phis[i].operands.iter().flatten() {
                if let Some(j) = index_of.get(operand) {
                    if !live[*j] {
                        live[*j] = true;
                        work.push(*j);
                    }
                }
            }
        }

        let kept: Vec<PendingPhi> = phis
            .into_iter()
            .zip(live)
            .filter_map(|(phi, live)| live.then_some(phi))
            .collect();
        for phi in &kept {
            if phi.operands.iter().any(Option::is_none) {
                let what = match phi.var {
                    PhiVar::Local(slot) => format!("local {slot}"),
                    PhiVar::Stack(position) => format!("stack slot {position}"),
                };
                return Err(malformed_error!(
                    "{} is undefined on some path into block {}",
                    what,
                    phi.block
                ));
            }
        }

        self.type_phis(&kept);
        for phi in kept {
            let operands = phi.operands.into_iter().flatten().collect();
            if let Some(block) = self.ir.block_mut(BlockId::new(phi.block as u32)) {
                block.phis.push(Phi {
                    out: phi.out,
                    operands,
                });
            }
        }
        Ok(())
    }

    /// Joins operand types until no phi type changes.
    fn type_phis(&mut self, phis: &[PendingPhi]) {
        let outs: HashSet<ValueId> = phis.iter().map(|phi| phi.out).collect();
        let mut types: HashMap<ValueId, TypeElement> = HashMap::new();
        loop {
            let mut changed = false;
            for phi in phis {
                let mut joined: Option<TypeElement> = None;
                for operand in phi.operands.iter().flatten() {
                    let ty = match types.get(operand) {
                        Some(ty) => ty.clone(),
                        None if outs.contains(operand) => continue,
                        None => self.ir.value_type(*operand),
                    };
                    joined = Some(match joined {
                        Some(current) => current.join(&ty, self.program),
                        None => ty,
                    });
                }
                if let Some(joined) = joined {
                    if types.get(&phi.out) != Some(&joined) {
                        types.insert(phi.out, joined);
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }
        for (value, ty) in types {
            if let Some(entry) = self.ir.value_mut(value) {
                entry.ty = ty;
            }
        }
    }

    fn install_edges(&mut self) {
        for (b, flow) in self.graph.blocks.iter().enumerate() {
            if let Some(block) = self.ir.block_mut(BlockId::new(b as u32)) {
                block.predecessors = flow
                    .predecessors
                    .iter()
                    .map(|p| BlockId::new(*p as u32))
                    .collect();
                block.handlers = flow
                    .handlers
                    .iter()
                    .map(|(guard, target)| CatchHandler {
                        guard: guard.clone(),
                        target: BlockId::new(*target as u32),
                    })
                    .collect();
            }
        }
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn define(&mut self, block: BlockId, ty: TypeElement, op: IrOp) -> ValueId {
        let out = self.ir.new_value(ty);
        if let Some(target) = self.ir.block_mut(block) {
            target.instructions.push(IrInstruction::with_out(out, op));
        }
        out
    }

    fn append(&mut self, block: BlockId, op: IrOp) {
        if let Some(target) = self.ir.block_mut(block) {
            target.instructions.push(IrInstruction::new(op));
        }
    }

    fn push_result(&mut self, block: BlockId, frame: &mut Frame, ty: TypeElement, op: IrOp) {
        let kind = ty.kind();
        let out = self.define(block, ty, op);
        frame.stack.push((out, kind));
    }

    /// Pushes the result of `op` unless `ty` is `void`.
    fn push_typed(&mut self, block: BlockId, frame: &mut Frame, ty: &TypeRef, op: IrOp) {
        if ty.is_void() {
            self.append(block, op);
        } else {
            self.push_result(block, frame, TypeElement::of_type(ty), op);
        }
    }

    fn block_of(&self, label: Label) -> Result<BlockId> {
        self.labels
            .get(&label)
            .and_then(|position| self.graph.block_at.get(position))
            .map(|b| BlockId::new(*b as u32))
            .ok_or_else(|| malformed_error!("no block at label {}", label))
    }

    fn fallthrough(&self, b: usize) -> Result<BlockId> {
        self.graph.blocks[b]
            .fallthrough
            .map(|next| BlockId::new(next as u32))
            .ok_or_else(|| malformed_error!("control falls off the end of the code"))
    }

    /// First position at or after `from` that is not a label or frame.
    fn first_real(&self, from: usize) -> usize {
        self.code.instructions[from.min(self.code.instructions.len())..]
            .iter()
            .position(|i| !matches!(i, CfInstruction::Label(_) | CfInstruction::Frame(_)))
            .map_or(self.code.instructions.len(), |offset| from + offset)
    }

    fn scope_at(&self, slot: u16, position: usize) -> Option<&LocalScope> {
        self.scopes
            .as_ref()?
            .iter()
            .find(|scope| scope.slot == slot && scope.live.contains(&position))
    }

    /// Tags `value` with the local a store at `index` writes, if the table covers it.
    fn attach_local(&mut self, value: ValueId, slot: u16, kind: ValueKind, index: usize) -> Result<()> {
        let position = self.first_real(index + 1);
        let Some(scope) = self.scope_at(slot, position) else {
            return Ok(());
        };
        if scope.kind != kind {
            return Err(Error::InvalidDebugInfo(format!(
                "local {} is declared {} but slot {slot} receives {kind}",
                scope.local.name, scope.local.ty
            )));
        }
        let local = scope.local.clone();
        if let Some(entry) = self.ir.value_mut(value) {
            if entry.local.is_none() {
                entry.local = Some(local);
            }
        }
        Ok(())
    }
}

fn primitive(kind: ValueKind) -> TypeElement {
    TypeElement::of_kind(kind).unwrap_or(TypeElement::Top)
}

fn resolve(mut value: ValueId, replaced: &HashMap<ValueId, ValueId>) -> ValueId {
    while let Some(next) = replaced.get(&value) {
        value = *next;
    }
    value
}

/// The single value other than itself flowing into `phi`, if there is one.
fn trivial_value(phi: &PendingPhi) -> Option<ValueId> {
    let mut unique: Option<Option<ValueId>> = None;
    for operand in &phi.operands {
        if *operand == Some(phi.out) {
            continue;
        }
        match unique {
            None => unique = Some(*operand),
            Some(seen) if seen == *operand => {}
            Some(_) => return None,
        }
    }
    unique.flatten()
}

/// Entries popped and the kind pushed by an instruction that is not a local access or a
/// stack shuffle.
fn stack_effect(instruction: &CfInstruction) -> (usize, Option<ValueKind>) {
    fn pushed(ty: &TypeRef) -> Option<ValueKind> {
        Some(ty.kind()).filter(|kind| *kind != ValueKind::Void)
    }
    match instruction {
        CfInstruction::Const(value) => (0, Some(value.ty().kind())),
        CfInstruction::Arith { ty, .. } => (2, Some(ty.kind())),
        CfInstruction::Neg(ty) => (1, Some(ty.kind())),
        CfInstruction::Convert { to, .. } => (1, Some(to.kind())),
        CfInstruction::Cmp(_) => (2, Some(ValueKind::Int)),
        CfInstruction::If { .. } | CfInstruction::Switch { .. } | CfInstruction::Throw => (1, None),
        CfInstruction::IfCmp { .. } => (2, None),
        CfInstruction::Return(kind) => (usize::from(kind.is_some()), None),
        CfInstruction::Invoke { kind, method, .. } => (
            method.arity() + usize::from(*kind != InvokeKind::Static),
            pushed(method.proto.return_type()),
        ),
        CfInstruction::InvokeDynamic(call_site) => {
            (call_site.proto.arity(), pushed(call_site.proto.return_type()))
        }
        CfInstruction::StaticGet(field) => (0, pushed(&field.ty)),
        CfInstruction::StaticPut(_) => (1, None),
        CfInstruction::InstanceGet(field) => (1, pushed(&field.ty)),
        CfInstruction::InstancePut(_) => (2, None),
        CfInstruction::New(_) => (0, Some(ValueKind::Reference)),
        CfInstruction::NewArray(_) => (1, Some(ValueKind::Reference)),
        CfInstruction::MultiNewArray { dimensions, .. } => {
            (usize::from(*dimensions), Some(ValueKind::Reference))
        }
        CfInstruction::ArrayLoad(kind) => (2, Some(kind.value_kind())),
        CfInstruction::ArrayStore(_) => (3, None),
        CfInstruction::ArrayLength | CfInstruction::InstanceOf(_) => (1, Some(ValueKind::Int)),
        CfInstruction::CheckCast(_) | CfInstruction::SafeCheckCast(_) => {
            (1, Some(ValueKind::Reference))
        }
        CfInstruction::MonitorEnter | CfInstruction::MonitorExit => (1, None),
        CfInstruction::Label(_)
        | CfInstruction::Frame(_)
        | CfInstruction::Nop
        | CfInstruction::Goto(_)
        | CfInstruction::InitClass(_)
        | CfInstruction::Load { .. }
        | CfInstruction::Store { .. }
        | CfInstruction::Iinc { .. }
        | CfInstruction::Stack(_) => (0, None),
    }
}

/// Applies a stack shuffle to a stack of entries `width` slots wide each.
///
/// # Errors
///
/// Returns [`Error::Malformed`] on underflow or if the operation would split a wide entry.
pub(crate) fn apply_stack_op<T: Clone>(
    stack: &mut Vec<T>,
    op: StackOp,
    width: impl Fn(&T) -> usize,
) -> Result<()> {
    let take = |stack: &mut Vec<T>, slots: usize| -> Result<Vec<T>> {
        let mut taken = Vec::new();
        let mut total = 0;
        while total < slots {
            let entry = stack
                .pop()
                .ok_or_else(|| malformed_error!("operand stack underflow"))?;
            total += width(&entry).max(1);
            taken.push(entry);
        }
        if total != slots {
            return Err(malformed_error!("{:?} splits a wide value", op));
        }
        taken.reverse();
        Ok(taken)
    };
    let (top, under) = match op {
        StackOp::Pop => {
            take(stack, 1)?;
            return Ok(());
        }
        StackOp::Pop2 => {
            take(stack, 2)?;
            return Ok(());
        }
        StackOp::Swap => {
            let x = take(stack, 1)?;
            let y = take(stack, 1)?;
            stack.extend(x);
            stack.extend(y);
            return Ok(());
        }
        StackOp::Dup => (1, 0),
        StackOp::DupX1 => (1, 1),
        StackOp::DupX2 => (1, 2),
        StackOp::Dup2 => (2, 0),
        StackOp::Dup2X1 => (2, 1),
        StackOp::Dup2X2 => (2, 2),
    };
    let x = take(stack, top)?;
    let y = take(stack, under)?;
    stack.extend(x.iter().cloned());
    stack.extend(y);
    stack.extend(x);
    Ok(())
}

// ============================================================================
// Normalization
// ============================================================================

/// Merges each block ending in `goto b` with `b` when it is `b`'s only predecessor.
///
/// Blocks with handlers only merge if the merged block still contains at most one
/// instruction that can throw, so exceptional edges keep leaving from a single point.
fn merge_straight_line_blocks(code: &mut IrCode) {
    let count = code.block_count();
    let mut removed = vec![false; count];
    for p in 0..count {
        if removed[p] {
            continue;
        }
        let pred = BlockId::new(p as u32);
        while let Some(succ) = mergeable_successor(code, pred) {
            absorb(code, pred, succ);
            removed[succ.index()] = true;
        }
    }
    if removed.iter().any(|r| *r) {
        let order: Vec<BlockId> = (0..count)
            .filter(|b| !removed[*b])
            .map(|b| BlockId::new(b as u32))
            .collect();
        code.retain_blocks(&order);
    }
}

fn mergeable_successor(code: &IrCode, pred: BlockId) -> Option<BlockId> {
    let first = code.block(pred)?;
    let IrOp::Goto(succ) = first.terminator()?.op else {
        return None;
    };
    if succ == pred || succ == code.entry() {
        return None;
    }
    let second = code.block(succ)?;
    if second.predecessors != [pred] || !second.phis.is_empty() || second.is_handler_entry() {
        return None;
    }
    if !first.handlers.is_empty() || !second.handlers.is_empty() {
        if !first.handlers.is_empty()
            && !second.handlers.is_empty()
            && first.handlers != second.handlers
        {
            return None;
        }
        let throwing = first
            .instructions
            .iter()
            .chain(&second.instructions)
            .filter(|i| i.can_throw())
            .count();
        if throwing > 1 {
            return None;
        }
    }
    Some(succ)
}

fn absorb(code: &mut IrCode, pred: BlockId, succ: BlockId) {
    let Some(second) = code.block_mut(succ).map(std::mem::take) else {
        return;
    };
    let successors = second.successors();
    if let Some(first) = code.block_mut(pred) {
        first.instructions.pop();
        first.instructions.extend(second.instructions);
        if first.handlers.is_empty() {
            first.handlers = second.handlers;
        }
    }
    for target in successors {
        if let Some(block) = code.block_mut(target) {
            block.replace_predecessor(succ, pred);
        }
    }
}

/// Splits normal edges from blocks with several successors into blocks with phis.
///
/// The new block for a fallthrough edge is placed right after its source so the emitted
/// code still falls through; other new blocks go at the end.
fn split_critical_edges(code: &mut IrCode) {
    let count = code.block_count();
    let mut after: HashMap<BlockId, BlockId> = HashMap::new();
    let mut appended = Vec::new();
    for b in 0..count {
        let target = BlockId::new(b as u32);
        let predecessors = match code.block(target) {
            Some(block)
                if !block.phis.is_empty()
                    && block.predecessors.len() > 1
                    && !block.is_handler_entry() =>
            {
                block.predecessors.clone()
            }
            _ => continue,
        };
        for pred in predecessors {
            let Some(source) = code.block(pred) else {
                continue;
            };
            let mut successors = source.normal_successors();
            successors.sort_unstable();
            successors.dedup();
            if successors.len() < 2 {
                continue;
            }

            let edge = code.add_block();
            if let Some(block) = code.block_mut(edge) {
                block.instructions.push(IrInstruction::new(IrOp::Goto(target)));
                block.predecessors.push(pred);
            }
            let mut falls_through = false;
            if let Some(terminator) = code
                .block_mut(pred)
                .and_then(|block| block.instructions.last_mut())
            {
                terminator
                    .op
                    .map_successors(|t| if t == target { edge } else { t });
                if let IrOp::If { fallthrough, .. } = terminator.op {
                    falls_through = fallthrough == edge;
                }
            }
            if let Some(block) = code.block_mut(target) {
                block.replace_predecessor(pred, edge);
            }
            if falls_through {
                after.insert(pred, edge);
            } else {
                appended.push(edge);
            }
        }
    }
    if after.is_empty() && appended.is_empty() {
        return;
    }
    let mut order = Vec::with_capacity(code.block_count());
    for b in 0..count {
        let block = BlockId::new(b as u32);
        order.push(block);
        if let Some(edge) = after.get(&block) {
            order.push(*edge);
        }
    }
    order.extend(appended);
    code.retain_blocks(&order);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        code::{instruction::IfCond, CfTryCatch, LocalVariableInfo},
        program::{flags::MethodAccessFlags, references::{MethodRef, Name}},
        test::fixtures::{invoke, method_with_code},
    };

    fn static_method(descriptor: &str, instructions: Vec<CfInstruction>) -> MethodDef {
        let reference = MethodRef::parse("a/A", "m", descriptor).unwrap();
        method_with_code(
            reference,
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
            instructions,
        )
    }

    fn with_code(method: MethodDef, edit: impl FnOnce(&mut CfCode)) -> MethodDef {
        let mut code = method.code.as_deref().cloned().unwrap();
        edit(&mut code);
        method.with_code(code)
    }

    fn build(method: &MethodDef) -> IrCode {
        IrBuilder::new(method).unwrap().build().unwrap()
    }

    fn iload(local: u16) -> CfInstruction {
        CfInstruction::Load {
            kind: ValueKind::Int,
            local,
        }
    }

    fn istore(local: u16) -> CfInstruction {
        CfInstruction::Store {
            kind: ValueKind::Int,
            local,
        }
    }

    fn iconst(value: i32) -> CfInstruction {
        CfInstruction::Const(ConstValue::Int(value))
    }

    fn label(id: u32) -> CfInstruction {
        CfInstruction::Label(Label(id))
    }

    fn ireturn() -> CfInstruction {
        CfInstruction::Return(Some(ValueKind::Int))
    }

    #[test]
    fn test_straight_line() {
        let method = static_method(
            "(II)I",
            vec![
                iload(0),
                iload(1),
                CfInstruction::Arith {
                    op: ArithOp::Add,
                    ty: NumericType::Int,
                },
                ireturn(),
            ],
        );
        let ir = build(&method);
        assert_eq!(ir.block_count(), 1);
        assert_eq!(ir.arguments().len(), 2);
        let ops: Vec<&IrOp> = ir.blocks()[0].instructions.iter().map(|i| &i.op).collect();
        assert!(matches!(ops[2], IrOp::Arith { op: ArithOp::Add, .. }));
        assert!(matches!(ops[3], IrOp::Return(Some(_))));
    }

    #[test]
    fn test_diamond_places_phi() {
        let method = static_method(
            "(I)I",
            vec![
                iload(0),
                CfInstruction::If {
                    cond: IfCond::Eq,
                    kind: ValueKind::Int,
                    target: Label(1),
                },
                iconst(1),
                istore(1),
                CfInstruction::Goto(Label(2)),
                label(1),
                iconst(2),
                istore(1),
                label(2),
                iload(1),
                ireturn(),
            ],
        );
        let ir = build(&method);
        assert_eq!(ir.block_count(), 4);
        let join = &ir.blocks()[3];
        assert_eq!(join.phis.len(), 1);
        assert_eq!(join.phis[0].operands.len(), 2);
        assert_eq!(ir.value_type(join.phis[0].out), TypeElement::Int);
        assert_eq!(
            join.instructions[0].op,
            IrOp::Return(Some(join.phis[0].out))
        );
    }

    #[test]
    fn test_loop_header_phi() {
        let method = static_method(
            "(I)I",
            vec![
                iconst(0),
                istore(1),
                label(0),
                iload(1),
                iload(0),
                CfInstruction::IfCmp {
                    cond: IfCond::Ge,
                    kind: ValueKind::Int,
                    target: Label(1),
                },
                CfInstruction::Iinc {
                    local: 1,
                    increment: 1,
                },
                CfInstruction::Goto(Label(0)),
                label(1),
                iload(1),
                ireturn(),
            ],
        );
        let ir = build(&method);
        assert_eq!(ir.block_count(), 4);
        let header = &ir.blocks()[1];
        assert_eq!(header.predecessors, vec![BlockId::new(0), BlockId::new(2)]);
        assert_eq!(header.phis.len(), 1);
        assert!(ir.validate().is_ok());
    }

    #[test]
    fn test_critical_edge_split() {
        let method = static_method(
            "(I)I",
            vec![
                iconst(0),
                istore(1),
                iload(0),
                CfInstruction::If {
                    cond: IfCond::Eq,
                    kind: ValueKind::Int,
                    target: Label(1),
                },
                iconst(1),
                istore(1),
                label(1),
                iload(1),
                ireturn(),
            ],
        );
        let ir = build(&method);
        assert_eq!(ir.block_count(), 4);
        let IrOp::If { target, .. } = ir.blocks()[0].instructions.last().unwrap().op else {
            panic!("expected if");
        };
        assert_eq!(target, BlockId::new(3));
        assert_eq!(
            ir.blocks()[3].instructions,
            vec![IrInstruction::new(IrOp::Goto(BlockId::new(2)))]
        );
        assert_eq!(ir.blocks()[2].phis.len(), 1);
    }

    #[test]
    fn test_stack_phi() {
        let method = static_method(
            "(I)I",
            vec![
                iload(0),
                CfInstruction::If {
                    cond: IfCond::Eq,
                    kind: ValueKind::Int,
                    target: Label(1),
                },
                iconst(1),
                CfInstruction::Goto(Label(2)),
                label(1),
                iconst(2),
                label(2),
                ireturn(),
            ],
        );
        let ir = build(&method);
        let join = ir.blocks().last().unwrap();
        assert_eq!(join.phis.len(), 1);
        assert_eq!(join.instructions[0].op, IrOp::Return(Some(join.phis[0].out)));
    }

    #[test]
    fn test_handler_sees_state_at_throw() {
        let f = || invoke(InvokeKind::Static, "a/A", "f", "()V");
        let method = with_code(
            static_method(
                "()I",
                vec![
                    label(0),
                    iconst(1),
                    istore(0),
                    f(),
                    iconst(2),
                    istore(0),
                    f(),
                    label(1),
                    iload(0),
                    ireturn(),
                    label(2),
                    CfInstruction::Stack(StackOp::Pop),
                    iload(0),
                    ireturn(),
                ],
            ),
            |code| {
                code.try_catch_ranges.push(CfTryCatch {
                    start: Label(0),
                    end: Label(1),
                    guards: vec![None],
                    targets: vec![Label(2)],
                });
            },
        );
        let ir = build(&method);
        assert_eq!(ir.block_count(), 3);
        let handler = &ir.blocks()[2];
        assert!(handler.is_handler_entry());
        assert_eq!(handler.predecessors, vec![BlockId::new(0), BlockId::new(1)]);
        assert_eq!(handler.phis.len(), 1);
        let operands: Vec<&IrOp> = handler.phis[0]
            .operands
            .iter()
            .filter_map(|v| {
                ir.instructions()
                    .find(|(_, i)| i.out == Some(*v))
                    .map(|(_, i)| &i.op)
            })
            .collect();
        assert_eq!(operands[0], &IrOp::Const(ConstValue::Int(1)));
        assert_eq!(operands[1], &IrOp::Const(ConstValue::Int(2)));
    }

    #[test]
    fn test_debug_locals_attached() {
        let method = with_code(
            static_method(
                "(I)I",
                vec![label(0), iconst(5), istore(1), label(1), iload(1), ireturn(), label(2)],
            ),
            |code| {
                code.local_variables = vec![
                    LocalVariableInfo {
                        index: 0,
                        name: Name::new("x"),
                        ty: TypeRef::int(),
                        signature: None,
                        start: Label(0),
                        end: Label(2),
                    },
                    LocalVariableInfo {
                        index: 1,
                        name: Name::new("five"),
                        ty: TypeRef::int(),
                        signature: None,
                        start: Label(1),
                        end: Label(2),
                    },
                ];
            },
        );
        let ir = build(&method);
        assert!(!ir.debug_info_dropped());
        let argument = ir.arguments()[0];
        assert_eq!(
            ir.value(argument).and_then(|v| v.local.as_ref()).map(|l| l.name.as_str()),
            Some("x")
        );
        let named: Vec<&str> = ir
            .values()
            .iter()
            .filter_map(|v| v.local.as_ref())
            .map(|l| l.name.as_str())
            .collect();
        assert_eq!(named, vec!["x", "five"]);
    }

    #[test]
    fn test_invalid_debug_info_is_dropped() {
        let method = with_code(
            static_method("(I)I", vec![label(0), iload(0), ireturn(), label(1)]),
            |code| {
                code.local_variables = vec![LocalVariableInfo {
                    index: 0,
                    name: Name::new("x"),
                    ty: TypeRef::int(),
                    signature: None,
                    start: Label(1),
                    end: Label(0),
                }];
            },
        );
        let builder = IrBuilder::new(&method).unwrap();
        assert!(matches!(
            builder.build_with_locals(true),
            Err(Error::InvalidDebugInfo(_))
        ));
        let ir = builder.build().unwrap();
        assert!(ir.debug_info_dropped());
        assert!(ir.values().iter().all(|v| v.local.is_none()));
    }

    #[test]
    fn test_mistyped_local_is_invalid_debug_info() {
        let method = with_code(
            static_method("()V", vec![label(0), iconst(1), istore(0), label(1), CfInstruction::Return(None)]),
            |code| {
                code.local_variables = vec![LocalVariableInfo {
                    index: 0,
                    name: Name::new("s"),
                    ty: TypeRef::string(),
                    signature: None,
                    start: Label(1),
                    end: Label(1),
                }];
            },
        );
        // an empty range covers nothing
        assert!(IrBuilder::new(&method).unwrap().build_with_locals(true).is_ok());

        let method = with_code(method, |code| code.local_variables[0].start = Label(0));
        let method = with_code(method, |code| {
            code.instructions.push(label(2));
            code.local_variables[0].end = Label(2);
        });
        assert!(matches!(
            IrBuilder::new(&method).unwrap().build_with_locals(true),
            Err(Error::InvalidDebugInfo(_))
        ));
    }

    #[test]
    fn test_wide_values_and_dup2() {
        let method = static_method(
            "(J)J",
            vec![
                CfInstruction::Load {
                    kind: ValueKind::Long,
                    local: 0,
                },
                CfInstruction::Stack(StackOp::Dup2),
                CfInstruction::Arith {
                    op: ArithOp::Add,
                    ty: NumericType::Long,
                },
                CfInstruction::Return(Some(ValueKind::Long)),
            ],
        );
        let ir = build(&method);
        let argument = ir.arguments()[0];
        let add = &ir.blocks()[0].instructions[1];
        assert_eq!(
            add.op,
            IrOp::Arith {
                op: ArithOp::Add,
                ty: NumericType::Long,
                left: argument,
                right: argument,
            }
        );
        assert_eq!(ir.value_type(add.out.unwrap()), TypeElement::Long);
    }

    #[test]
    fn test_unreachable_code_dropped() {
        let method = static_method(
            "()V",
            vec![
                CfInstruction::Goto(Label(1)),
                iconst(0),
                CfInstruction::Stack(StackOp::Pop),
                label(1),
                CfInstruction::Return(None),
            ],
        );
        let ir = build(&method);
        assert_eq!(ir.block_count(), 1);
        assert_eq!(
            ir.blocks()[0].instructions,
            vec![IrInstruction::new(IrOp::Return(None))]
        );
    }

    #[test]
    fn test_loop_at_entry_gets_separate_entry_block() {
        let method = static_method(
            "(I)V",
            vec![
                label(0),
                CfInstruction::Iinc {
                    local: 0,
                    increment: -1,
                },
                iload(0),
                CfInstruction::If {
                    cond: IfCond::Ne,
                    kind: ValueKind::Int,
                    target: Label(0),
                },
                CfInstruction::Return(None),
            ],
        );
        let ir = build(&method);
        assert_eq!(ir.block_count(), 4);
        let entry = &ir.blocks()[0];
        assert!(matches!(entry.instructions[0].op, IrOp::Argument(0)));
        assert_eq!(entry.instructions[1].op, IrOp::Goto(BlockId::new(1)));
        assert_eq!(ir.blocks()[1].phis.len(), 1);
        assert_eq!(
            ir.blocks()[3].instructions,
            vec![IrInstruction::new(IrOp::Goto(BlockId::new(1)))]
        );
    }

    #[test]
    fn test_stack_underflow_is_malformed() {
        let method = static_method(
            "()V",
            vec![CfInstruction::Stack(StackOp::Pop), CfInstruction::Return(None)],
        );
        assert!(matches!(
            IrBuilder::new(&method).unwrap().build(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_falling_off_the_end_is_malformed() {
        let method = static_method("()V", vec![iconst(0), CfInstruction::Stack(StackOp::Pop)]);
        assert!(matches!(
            IrBuilder::new(&method).unwrap().build(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn test_method_without_code() {
        let method = MethodDef::new(
            MethodRef::parse("a/A", "m", "()V").unwrap(),
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
        );
        assert!(matches!(IrBuilder::new(&method), Err(Error::IrError(_))));
    }
}

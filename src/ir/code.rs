//! The IR of one method body.
//!
//! [`IrCode`] owns the blocks and the value table of a method. Block ids are indices into
//! [`IrCode::blocks`], value ids indices into the value table; new values are allocated with
//! [`IrCode::new_value`], which hands out the next id of the generation counter.
//!
//! Besides storage, `IrCode` provides:
//!
//! - [`IrCode::validate`] - the consistency check run after construction and by tests
//! - [`IrCode::is_equivalent`] - structural comparison that ignores value numbering
//! - [`IrCode::to_dot`] - Graphviz rendering
//!
//! It also implements the [`crate::utils::graph`] traits, so the generic traversals and
//! dominator computation run directly on it.

use std::{collections::HashMap, fmt, fmt::Write as _};

use crate::{
    ir::{
        block::{BasicBlock, BlockId, CatchHandler},
        instruction::{IrInstruction, IrOp},
        types::TypeElement,
        value::{Value, ValueId},
    },
    program::references::MethodRef,
    utils::{
        dot::escape_dot,
        graph::{
            algorithms::{compute_dominators, reverse_postorder, DominatorTree},
            NodeId, Predecessors, RootedGraph, Successors,
        },
    },
    Error, Result,
};

/// Where a value is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefSite {
    /// By the phi at `index` of `block`
    Phi {
        /// Block
        block: BlockId,
        /// Phi index
        index: usize,
    },
    /// By the instruction at `index` of `block`
    Instruction {
        /// Block
        block: BlockId,
        /// Instruction index
        index: usize,
    },
}

impl DefSite {
    /// The defining block.
    #[must_use]
    pub fn block(self) -> BlockId {
        match self {
            DefSite::Phi { block, .. } | DefSite::Instruction { block, .. } => block,
        }
    }
}

/// A method body in IR form.
#[derive(Debug, Clone, PartialEq)]
pub struct IrCode {
    method: MethodRef,
    is_static: bool,
    blocks: Vec<BasicBlock>,
    values: Vec<Value>,
    debug_info_dropped: bool,
}

impl IrCode {
    /// An empty body for `method`.
    #[must_use]
    pub fn new(method: MethodRef, is_static: bool) -> Self {
        IrCode {
            method,
            is_static,
            blocks: Vec::new(),
            values: Vec::new(),
            debug_info_dropped: false,
        }
    }

    /// The method this body belongs to.
    #[must_use]
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// Renames the method, e.g. after a lens rewrite.
    pub fn set_method(&mut self, method: MethodRef) {
        self.method = method;
    }

    /// Returns `true` if the method has no receiver.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Returns `true` if the local variable table was discarded during construction.
    #[must_use]
    pub fn debug_info_dropped(&self) -> bool {
        self.debug_info_dropped
    }

    pub(crate) fn set_debug_info_dropped(&mut self, dropped: bool) {
        self.debug_info_dropped = dropped;
    }

    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    /// Blocks in layout order.
    #[must_use]
    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    /// Mutable access to the blocks.
    pub fn blocks_mut(&mut self) -> &mut [BasicBlock] {
        &mut self.blocks
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// The block `id`.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index())
    }

    /// Mutable access to block `id`.
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(id.index())
    }

    /// Appends an empty block.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::default());
        id
    }

    /// Allocates a fresh value.
    pub fn new_value(&mut self, ty: TypeElement) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value::new(id, ty));
        id
    }

    /// Metadata of `id`.
    #[must_use]
    pub fn value(&self, id: ValueId) -> Option<&Value> {
        self.values.get(id.index())
    }

    /// Mutable metadata of `id`.
    pub fn value_mut(&mut self, id: ValueId) -> Option<&mut Value> {
        self.values.get_mut(id.index())
    }

    /// Type of `id`, [`TypeElement::Top`] for unknown ids.
    #[must_use]
    pub fn value_type(&self, id: ValueId) -> TypeElement {
        self.value(id).map_or(TypeElement::Top, |v| v.ty.clone())
    }

    /// The value table.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Number of values ever allocated.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Argument values in argument order.
    #[must_use]
    pub fn arguments(&self) -> Vec<ValueId> {
        let Some(entry) = self.blocks.first() else {
            return Vec::new();
        };
        entry
            .instructions
            .iter()
            .take_while(|i| matches!(i.op, IrOp::Argument(_)))
            .filter_map(|i| i.out)
            .collect()
    }

    /// Every instruction with its block.
    pub fn instructions(&self) -> impl Iterator<Item = (BlockId, &IrInstruction)> + '_ {
        self.blocks.iter().enumerate().flat_map(|(index, block)| {
            block
                .instructions
                .iter()
                .map(move |instruction| (BlockId(index as u32), instruction))
        })
    }

    /// Number of instructions.
    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }

    /// Adds the edge `from -> to` to the predecessor list of `to`. Phis of `to` must be
    /// extended by the caller.
    pub fn add_predecessor(&mut self, from: BlockId, to: BlockId) {
        if let Some(block) = self.blocks.get_mut(to.index()) {
            if !block.predecessors.contains(&from) {
                block.predecessors.push(from);
            }
        }
    }

    /// Definition sites of every value.
    #[must_use]
    pub fn definitions(&self) -> HashMap<ValueId, DefSite> {
        let mut defs = HashMap::with_capacity(self.values.len());
        for (b, block) in self.blocks.iter().enumerate() {
            let block_id = BlockId(b as u32);
            for (index, phi) in block.phis.iter().enumerate() {
                defs.insert(
                    phi.out,
                    DefSite::Phi {
                        block: block_id,
                        index,
                    },
                );
            }
            for (index, instruction) in block.instructions.iter().enumerate() {
                if let Some(out) = instruction.out {
                    defs.insert(
                        out,
                        DefSite::Instruction {
                            block: block_id,
                            index,
                        },
                    );
                }
            }
        }
        defs
    }

    /// Number of uses of each value by instructions and phis.
    #[must_use]
    pub fn use_counts(&self) -> HashMap<ValueId, usize> {
        let mut counts = HashMap::new();
        for block in &self.blocks {
            for phi in &block.phis {
                for operand in &phi.operands {
                    *counts.entry(*operand).or_insert(0) += 1;
                }
            }
            for instruction in &block.instructions {
                for operand in instruction.operands() {
                    *counts.entry(operand).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    /// Replaces every use of a value by its image under `map`.
    pub fn replace_uses(&mut self, map: &HashMap<ValueId, ValueId>) {
        if map.is_empty() {
            return;
        }
        let resolve = |mut value: ValueId| {
            // Replacement chains are short; the bound guards against cycles.
            for _ in 0..map.len() {
                match map.get(&value) {
                    Some(next) if *next != value => value = *next,
                    _ => break,
                }
            }
            value
        };
        for block in &mut self.blocks {
            for phi in &mut block.phis {
                for operand in &mut phi.operands {
                    *operand = resolve(*operand);
                }
            }
            for instruction in &mut block.instructions {
                instruction.map_operands(resolve);
            }
        }
    }

    /// The dominator tree over normal and exceptional edges.
    #[must_use]
    pub fn dominator_tree(&self) -> DominatorTree {
        compute_dominators(self, NodeId::new(0))
    }

    /// Blocks reachable from the entry in reverse postorder.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        if self.blocks.is_empty() {
            return Vec::new();
        }
        reverse_postorder(self, NodeId::new(0))
            .into_iter()
            .map(|node| BlockId(node.index() as u32))
            .collect()
    }

    /// Keeps the blocks in `order` (which must start with the entry) and renumbers them in
    /// that order. Edges from dropped blocks disappear together with their phi operands.
    pub fn retain_blocks(&mut self, order: &[BlockId]) {
        let mut mapping: HashMap<BlockId, BlockId> = HashMap::with_capacity(order.len());
        for (new, old) in order.iter().enumerate() {
            mapping.insert(*old, BlockId(new as u32));
        }
        let mut old_blocks: Vec<Option<BasicBlock>> =
            std::mem::take(&mut self.blocks).into_iter().map(Some).collect();
        let mut blocks = Vec::with_capacity(order.len());
        for old in order {
            let Some(mut block) = old_blocks.get_mut(old.index()).and_then(Option::take) else {
                continue;
            };
            let keep: Vec<bool> = block
                .predecessors
                .iter()
                .map(|p| mapping.contains_key(p))
                .collect();
            for phi in &mut block.phis {
                let mut index = 0;
                phi.operands.retain(|_| {
                    let kept = keep.get(index).copied().unwrap_or(false);
                    index += 1;
                    kept
                });
            }
            block.predecessors = block
                .predecessors
                .iter()
                .filter_map(|p| mapping.get(p).copied())
                .collect();
            block.handlers = block
                .handlers
                .iter()
                .filter_map(|h| {
                    mapping.get(&h.target).map(|target| CatchHandler {
                        guard: h.guard.clone(),
                        target: *target,
                    })
                })
                .collect();
            if let Some(terminator) = block.instructions.last_mut() {
                terminator
                    .op
                    .map_successors(|target| mapping.get(&target).copied().unwrap_or(target));
            }
            block.sort_predecessors();
            blocks.push(block);
        }
        self.blocks = blocks;
    }

    /// Drops blocks unreachable from the entry, keeping layout order.
    pub fn remove_unreachable_blocks(&mut self) {
        let reachable: std::collections::HashSet<BlockId> =
            self.reverse_postorder().into_iter().collect();
        if reachable.len() == self.blocks.len() {
            return;
        }
        let order: Vec<BlockId> = (0..self.blocks.len() as u32)
            .map(BlockId)
            .filter(|b| reachable.contains(b))
            .collect();
        self.retain_blocks(&order);
    }

    // ========================================================================
    // Consistency
    // ========================================================================

    /// Checks the structural invariants of the IR.
    ///
    /// - every block ends in exactly one terminator
    /// - arguments only open the entry block, `move-exception` only opens a block
    /// - phis have one operand per predecessor
    /// - predecessor lists agree with successor edges
    /// - every value is defined once and every use is dominated by its definition
    ///
    /// # Errors
    ///
    /// Returns [`Error::IrError`] describing the first violation.
    pub fn validate(&self) -> Result<()> {
        let ir_error = |message: String| Error::IrError(format!("{}: {message}", self.method));
        if self.blocks.is_empty() {
            return Err(ir_error("no blocks".to_string()));
        }
        let block_count = self.blocks.len();

        let mut defined = vec![false; self.values.len()];
        let mut define = |value: ValueId| -> Result<()> {
            match defined.get_mut(value.index()) {
                Some(seen) if !*seen => {
                    *seen = true;
                    Ok(())
                }
                Some(_) => Err(ir_error(format!("{value} defined twice"))),
                None => Err(ir_error(format!("{value} outside the value table"))),
            }
        };

        for (b, block) in self.blocks.iter().enumerate() {
            let id = BlockId(b as u32);
            let Some(last) = block.instructions.last() else {
                return Err(ir_error(format!("{id} is empty")));
            };
            if !last.is_terminator() {
                return Err(ir_error(format!("{id} does not end in a terminator")));
            }
            for (index, instruction) in block.instructions.iter().enumerate() {
                if index + 1 < block.instructions.len() && instruction.is_terminator() {
                    return Err(ir_error(format!("{id} has a terminator at {index}")));
                }
                match instruction.op {
                    IrOp::Argument(_) => {
                        let leading = block.instructions[..index]
                            .iter()
                            .all(|i| matches!(i.op, IrOp::Argument(_)));
                        if b != 0 || !leading {
                            return Err(ir_error(format!("misplaced argument in {id}")));
                        }
                    }
                    IrOp::MoveException(_) if index != 0 => {
                        return Err(ir_error(format!("misplaced move-exception in {id}")));
                    }
                    _ => {}
                }
                if let Some(out) = instruction.out {
                    define(out)?;
                }
            }
            for phi in &block.phis {
                define(phi.out)?;
                if phi.operands.len() != block.predecessors.len() {
                    return Err(ir_error(format!(
                        "phi {} in {id} has {} operands for {} predecessors",
                        phi.out,
                        phi.operands.len(),
                        block.predecessors.len()
                    )));
                }
            }
            for succ in block.successors() {
                if succ.index() >= block_count {
                    return Err(ir_error(format!("{id} jumps to missing {succ}")));
                }
                if !self.blocks[succ.index()].predecessors.contains(&id) {
                    return Err(ir_error(format!("{succ} does not list {id} as predecessor")));
                }
            }
            for pred in &block.predecessors {
                let listed = self
                    .blocks
                    .get(pred.index())
                    .is_some_and(|p| p.successors().contains(&id));
                if !listed {
                    return Err(ir_error(format!("{pred} is not a predecessor of {id}")));
                }
            }
        }

        self.validate_dominance().map_err(ir_error)
    }

    fn validate_dominance(&self) -> std::result::Result<(), String> {
        let defs = self.definitions();
        let dominators = self.dominator_tree();
        let node = |b: BlockId| NodeId::new(b.index());
        for (b, block) in self.blocks.iter().enumerate() {
            let id = BlockId(b as u32);
            if !dominators.is_reachable(node(id)) {
                continue;
            }
            for (index, instruction) in block.instructions.iter().enumerate() {
                for operand in instruction.operands() {
                    let Some(def) = defs.get(&operand) else {
                        return Err(format!("{operand} used in {id} but never defined"));
                    };
                    let ok = match *def {
                        DefSite::Phi { block, .. } => {
                            block == id || dominators.strictly_dominates(node(block), node(id))
                        }
                        DefSite::Instruction { block, index: at } => {
                            (block == id && at < index)
                                || dominators.strictly_dominates(node(block), node(id))
                        }
                    };
                    if !ok {
                        return Err(format!("use of {operand} in {id} is not dominated"));
                    }
                }
            }
            for phi in &block.phis {
                for (operand, pred) in phi.operands.iter().zip(&block.predecessors) {
                    let Some(def) = defs.get(operand) else {
                        return Err(format!("{operand} used in phi of {id} but never defined"));
                    };
                    if !dominators.is_reachable(node(*pred)) {
                        continue;
                    }
                    if !dominators.dominates(node(def.block()), node(*pred)) {
                        return Err(format!(
                            "phi operand {operand} of {} is not available at the end of {pred}",
                            phi.out
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Equivalence
    // ========================================================================

    /// Returns `true` if both bodies have the same blocks, edges and operations, up to a
    /// renaming of values. Value types and debug info are ignored; phis compare as a set.
    #[must_use]
    pub fn is_equivalent(&self, other: &IrCode) -> bool {
        self.blocks.len() == other.blocks.len() && self.canonical() == other.canonical()
    }

    fn canonical(&self) -> Vec<CanonicalBlock> {
        fn number(value: ValueId, numbers: &mut HashMap<ValueId, usize>) -> usize {
            let next = numbers.len();
            *numbers.entry(value).or_insert(next)
        }

        let mut numbers: HashMap<ValueId, usize> = HashMap::with_capacity(self.values.len());

        let mut blocks: Vec<CanonicalBlock> = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let mut instructions = Vec::with_capacity(block.instructions.len());
            for instruction in &block.instructions {
                let operands: Vec<usize> = instruction
                    .operands()
                    .into_iter()
                    .map(|v| number(v, &mut numbers))
                    .collect();
                let out = instruction.out.map(|v| number(v, &mut numbers));
                instructions.push((
                    out,
                    instruction.op.shape(),
                    operands,
                    instruction.op.successors(),
                ));
            }
            blocks.push(CanonicalBlock {
                phis: Vec::new(),
                instructions,
                predecessors: sorted(&block.predecessors),
                handlers: block.handlers.clone(),
            });
        }

        for (b, block) in self.blocks.iter().enumerate() {
            let mut order: Vec<&crate::ir::block::Phi> = block.phis.iter().collect();
            order.sort_by_key(|phi| numbers.get(&phi.out).copied().unwrap_or(usize::MAX));
            let mut phis = Vec::with_capacity(order.len());
            for phi in order {
                let out = number(phi.out, &mut numbers);
                let mut operands: Vec<(BlockId, usize)> = phi
                    .operands
                    .iter()
                    .zip(&block.predecessors)
                    .map(|(v, p)| (*p, number(*v, &mut numbers)))
                    .collect();
                operands.sort_unstable();
                phis.push((out, operands));
            }
            phis.sort_unstable();
            blocks[b].phis = phis;
        }
        blocks
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Renders the body as a Graphviz digraph with one record per block.
    #[must_use]
    pub fn to_dot(&self, title: Option<&str>) -> String {
        let mut dot = String::new();
        dot.push_str("digraph IR {\n");
        let label = title.map_or_else(|| self.method.to_string(), str::to_string);
        let _ = writeln!(dot, "    label=\"{}\";", escape_dot(&label));
        dot.push_str("    labelloc=t;\n");
        dot.push_str("    node [shape=box, fontname=\"Courier\", fontsize=10];\n");
        dot.push_str("    edge [fontname=\"Courier\", fontsize=9];\n\n");

        for (b, block) in self.blocks.iter().enumerate() {
            let mut body = format!("B{b}\n");
            for phi in &block.phis {
                let _ = writeln!(body, "{phi}");
            }
            for instruction in &block.instructions {
                let _ = writeln!(body, "{instruction}");
            }
            let _ = writeln!(dot, "    B{b} [label=\"{}\"];", escape_dot(&body));
        }
        dot.push('\n');
        for (b, block) in self.blocks.iter().enumerate() {
            for succ in block.normal_successors() {
                let _ = writeln!(dot, "    B{b} -> {succ};");
            }
            for handler in &block.handlers {
                let guard = handler
                    .guard
                    .as_ref()
                    .map_or_else(|| "any".to_string(), ToString::to_string);
                let _ = writeln!(
                    dot,
                    "    B{b} -> {} [style=dashed, label=\"{}\"];",
                    handler.target,
                    escape_dot(&guard)
                );
            }
        }
        dot.push_str("}\n");
        dot
    }
}

#[derive(Debug, PartialEq)]
struct CanonicalBlock {
    phis: Vec<(usize, Vec<(BlockId, usize)>)>,
    instructions: Vec<(Option<usize>, IrOp, Vec<usize>, Vec<BlockId>)>,
    predecessors: Vec<BlockId>,
    handlers: Vec<CatchHandler>,
}

fn sorted(blocks: &[BlockId]) -> Vec<BlockId> {
    let mut blocks = blocks.to_vec();
    blocks.sort_unstable();
    blocks
}

impl Successors for IrCode {
    fn node_count(&self) -> usize {
        self.blocks.len()
    }

    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.blocks
            .get(node.index())
            .map(BasicBlock::successors)
            .unwrap_or_default()
            .into_iter()
            .map(|b| NodeId::new(b.index()))
    }
}

impl Predecessors for IrCode {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.blocks
            .get(node.index())
            .into_iter()
            .flat_map(|block| block.predecessors.iter())
            .map(|b| NodeId::new(b.index()))
    }
}

impl RootedGraph for IrCode {
    fn entry(&self) -> NodeId {
        NodeId::new(0)
    }
}

impl fmt::Display for IrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.method)?;
        for (b, block) in self.blocks.iter().enumerate() {
            write!(f, "B{b}:")?;
            if !block.predecessors.is_empty() {
                f.write_str("  (preds")?;
                for pred in &block.predecessors {
                    write!(f, " {pred}")?;
                }
                f.write_str(")")?;
            }
            writeln!(f)?;
            for phi in &block.phis {
                writeln!(f, "  {phi}")?;
            }
            for instruction in &block.instructions {
                writeln!(f, "  {instruction}")?;
            }
            for handler in &block.handlers {
                match &handler.guard {
                    Some(guard) => writeln!(f, "  catch {guard} -> {}", handler.target)?,
                    None => writeln!(f, "  catch-all -> {}", handler.target)?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        code::instruction::IfCond,
        ir::block::Phi,
        program::descriptor::ValueKind,
    };

    /// `int m(int x) { return x < 0 ? 0 : x; }` with a phi at the join.
    fn diamond() -> IrCode {
        let method = MethodRef::parse("a/A", "m", "(I)I").unwrap();
        let mut code = IrCode::new(method, true);
        let b0 = code.add_block();
        let b1 = code.add_block();
        let b2 = code.add_block();
        let x = code.new_value(TypeElement::Int);
        let zero = code.new_value(TypeElement::Int);
        let result = code.new_value(TypeElement::Int);
        code.blocks[0].instructions = vec![
            IrInstruction::with_out(x, IrOp::Argument(0)),
            IrInstruction::new(IrOp::If {
                cond: IfCond::Ge,
                kind: ValueKind::Int,
                left: x,
                right: None,
                target: b2,
                fallthrough: b1,
            }),
        ];
        code.blocks[1].instructions = vec![
            IrInstruction::with_out(zero, IrOp::Const(crate::code::ConstValue::Int(0))),
            IrInstruction::new(IrOp::Goto(b2)),
        ];
        code.blocks[2].instructions = vec![IrInstruction::new(IrOp::Return(Some(result)))];
        code.blocks[2].phis = vec![Phi {
            out: result,
            operands: vec![x, zero],
        }];
        code.add_predecessor(b0, b1);
        code.add_predecessor(b0, b2);
        code.add_predecessor(b1, b2);
        code
    }

    #[test]
    fn test_valid_diamond() {
        let code = diamond();
        code.validate().unwrap();
        assert_eq!(code.arguments().len(), 1);
        assert_eq!(code.instruction_count(), 5);
        assert!(code.dominator_tree().dominates(NodeId::new(0), NodeId::new(2)));
    }

    #[test]
    fn test_undominated_use_rejected() {
        let mut code = diamond();
        // Return the constant defined only on one path.
        let zero = ValueId(1);
        code.blocks[2].instructions = vec![IrInstruction::new(IrOp::Return(Some(zero)))];
        let err = code.validate().unwrap_err();
        assert!(err.to_string().contains("not dominated"));
    }

    #[test]
    fn test_phi_arity_checked() {
        let mut code = diamond();
        code.blocks[2].phis[0].operands.pop();
        assert!(code.validate().is_err());
    }

    #[test]
    fn test_equivalence_ignores_numbering() {
        let a = diamond();
        let mut b = diamond();
        // Swap the numbering of the constant and the phi.
        let swap: HashMap<ValueId, ValueId> =
            [(ValueId(1), ValueId(2)), (ValueId(2), ValueId(1))].into();
        for block in &mut b.blocks {
            for phi in &mut block.phis {
                phi.out = swap[&phi.out];
                for operand in &mut phi.operands {
                    *operand = *swap.get(operand).unwrap_or(operand);
                }
            }
            for instruction in &mut block.instructions {
                if let Some(out) = instruction.out.as_mut() {
                    *out = *swap.get(out).unwrap_or(out);
                }
                instruction.map_operands(|v| *swap.get(&v).unwrap_or(&v));
            }
        }
        assert!(a.is_equivalent(&b));

        let mut c = diamond();
        c.blocks[1].instructions[0].op = IrOp::Const(crate::code::ConstValue::Int(1));
        assert!(!a.is_equivalent(&c));
    }

    #[test]
    fn test_retain_blocks_drops_edges() {
        let mut code = diamond();
        if let IrOp::If { target, .. } = &mut code.blocks[0].instructions[1].op {
            *target = BlockId(1);
        }
        code.blocks[2].predecessors.retain(|p| *p != BlockId(0));
        code.blocks[2].phis.clear();
        code.blocks[2].instructions = vec![IrInstruction::new(IrOp::Return(Some(ValueId(1))))];
        code.retain_blocks(&[BlockId(0), BlockId(1), BlockId(2)]);
        code.validate().unwrap();
        code.remove_unreachable_blocks();
        assert_eq!(code.block_count(), 3);
    }

    #[test]
    fn test_dot_output() {
        let dot = diamond().to_dot(None);
        assert!(dot.starts_with("digraph IR {"));
        assert!(dot.contains("B0 -> B2;"));
        assert!(dot.contains("phi(v0, v1)"));
    }
}

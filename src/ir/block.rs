//! IR basic blocks.
//!
//! A [`BasicBlock`] holds phis, evaluated simultaneously at block entry, followed by
//! instructions ending in exactly one terminator. Exception handling is block metadata: the
//! [`CatchHandler`]s of a block apply to every instruction in it, and each handler block
//! lists the guarded blocks among its predecessors.
//!
//! ```text
//! B2:  (preds B0, B1)
//!   v5 = phi(v1, v4)
//!   v6 = add-Int v5, v3
//!   goto B3
//!   catch java/io/IOException -> B7
//! ```

use std::fmt;

use crate::{
    ir::{
        instruction::{IrInstruction, IrOp},
        value::ValueId,
    },
    program::references::TypeRef,
};

/// Identifier of a block, its index in [`IrCode::blocks`](super::IrCode::blocks).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

impl BlockId {
    /// Creates an id from a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        BlockId(index)
    }

    /// The raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// A phi: `out` receives `operands[i]` when control enters from `predecessors[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    /// Defined value
    pub out: ValueId,
    /// Incoming values, parallel to the block's predecessors
    pub operands: Vec<ValueId>,
}

impl fmt::Display for Phi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = phi(", self.out)?;
        for (i, operand) in self.operands.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{operand}")?;
        }
        f.write_str(")")
    }
}

/// An exceptional edge: exceptions of type `guard` (any, if `None`) go to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatchHandler {
    /// Caught type
    pub guard: Option<TypeRef>,
    /// Handler block
    pub target: BlockId,
}

/// A basic block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BasicBlock {
    /// Phis at block entry
    pub phis: Vec<Phi>,
    /// Instructions, the last one a terminator
    pub instructions: Vec<IrInstruction>,
    /// Predecessors over normal and exceptional edges
    pub predecessors: Vec<BlockId>,
    /// Handlers guarding this block, tried in order
    pub handlers: Vec<CatchHandler>,
}

impl BasicBlock {
    /// The terminator, if the block is complete.
    #[must_use]
    pub fn terminator(&self) -> Option<&IrInstruction> {
        self.instructions.last().filter(|i| i.is_terminator())
    }

    /// Normal successors.
    #[must_use]
    pub fn normal_successors(&self) -> Vec<BlockId> {
        self.terminator()
            .map(|t| t.op.successors())
            .unwrap_or_default()
    }

    /// Normal successors followed by handler blocks, without duplicates.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        let mut all: Vec<BlockId> = Vec::new();
        let targets = self
            .normal_successors()
            .into_iter()
            .chain(self.handlers.iter().map(|h| h.target));
        for target in targets {
            if !all.contains(&target) {
                all.push(target);
            }
        }
        all
    }

    /// Handler targets, without duplicates.
    #[must_use]
    pub fn exceptional_successors(&self) -> Vec<BlockId> {
        let mut targets: Vec<BlockId> = Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            if !targets.contains(&handler.target) {
                targets.push(handler.target);
            }
        }
        targets
    }

    /// Returns `true` if the block starts with a `move-exception`.
    #[must_use]
    pub fn is_handler_entry(&self) -> bool {
        self.instructions
            .first()
            .is_some_and(|i| matches!(i.op, IrOp::MoveException(_)))
    }

    /// Position of `pred` among the predecessors.
    #[must_use]
    pub fn predecessor_index(&self, pred: BlockId) -> Option<usize> {
        self.predecessors.iter().position(|p| *p == pred)
    }

    /// Replaces the predecessor `old` by `new`, dropping the edge (and its phi operands)
    /// instead if `new` already is a predecessor.
    pub fn replace_predecessor(&mut self, old: BlockId, new: BlockId) {
        let Some(index) = self.predecessor_index(old) else {
            return;
        };
        if self.predecessors.contains(&new) {
            self.predecessors.remove(index);
            for phi in &mut self.phis {
                if index < phi.operands.len() {
                    phi.operands.remove(index);
                }
            }
        } else {
            self.predecessors[index] = new;
        }
        self.sort_predecessors();
    }

    /// Sorts the predecessors ascending, permuting phi operands along.
    pub fn sort_predecessors(&mut self) {
        if self.predecessors.windows(2).all(|w| w[0] <= w[1]) {
            return;
        }
        let mut order: Vec<usize> = (0..self.predecessors.len()).collect();
        order.sort_by_key(|i| self.predecessors[*i]);
        self.predecessors = order.iter().map(|i| self.predecessors[*i]).collect();
        for phi in &mut self.phis {
            phi.operands = order
                .iter()
                .filter_map(|i| phi.operands.get(*i).copied())
                .collect();
        }
    }
}

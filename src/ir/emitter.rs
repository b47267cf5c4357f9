//! SSA IR back to stack-machine code.
//!
//! [`IrEmitter`] is the inverse of [`IrBuilder`](super::IrBuilder). Every value lives in its
//! own local slot: arguments keep their incoming slots, phis and then instruction results
//! get fresh slots in definition order. Each instruction loads its operands, executes, and
//! stores its result (or pops it when nothing reads it).
//!
//! Phis become parallel copies at the end of each predecessor, just before its terminator.
//! Copies into a handler's phis happen right before the one instruction of the guarded block
//! that can throw, so the handler observes them. Every guarded block gets its own try range,
//! which keeps block starts at instruction boundaries the builder splits on again; building
//! the emitted code therefore yields IR equivalent to the input.
//!
//! Stack map frames are written at every block start when the class file version asks for
//! them.

use std::collections::{BTreeMap, HashMap};

use crate::{
    code::{
        instruction::{InvokeKind, StackOp},
        CfCode, CfFrame, CfInstruction, CfTryCatch, FrameType, Label, LocalVariableInfo,
    },
    config::ClassFileVersion,
    ir::{
        block::{BasicBlock, BlockId},
        code::{DefSite, IrCode},
        instruction::{IrInstruction, IrOp},
        types::TypeElement,
        value::ValueId,
    },
    program::descriptor::ValueKind,
    utils::graph::{algorithms::DominatorTree, NodeId},
    Error, Result,
};

/// Converts [`IrCode`] to [`CfCode`].
pub struct IrEmitter<'a> {
    code: &'a IrCode,
    frames: bool,
    debug_info: bool,
}

impl<'a> IrEmitter<'a> {
    /// An emitter writing neither frames nor debug info.
    #[must_use]
    pub fn new(code: &'a IrCode) -> Self {
        IrEmitter {
            code,
            frames: false,
            debug_info: false,
        }
    }

    /// Writes stack map frames if `version` requires them.
    #[must_use]
    pub fn with_frames(mut self, version: ClassFileVersion, keep_v50_frames: bool) -> Self {
        self.frames = version.requires_stack_map_frames(keep_v50_frames);
        self
    }

    /// Writes a local variable table from the debug locals of the values.
    #[must_use]
    pub fn with_debug_info(mut self, keep: bool) -> Self {
        self.debug_info = keep;
        self
    }

    /// Emits the code.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IrError`] if a used value has no type or the IR is inconsistent.
    pub fn emit(&self) -> Result<CfCode> {
        let mut emission = Emission::new(self)?;
        for b in 0..self.code.block_count() {
            emission.emit_block(BlockId::new(b as u32))?;
        }
        Ok(emission.finish())
    }
}

struct Emission<'a> {
    code: &'a IrCode,
    frames: bool,
    debug_info: bool,
    slots: HashMap<ValueId, u16>,
    max_locals: u16,
    out: Vec<CfInstruction>,
    next_label: u32,
    end_label: Label,
    locals: Vec<LocalVariableInfo>,
    /// Frame facts, only computed when frames are written
    layout: Option<FrameLayout>,
}

impl<'a> Emission<'a> {
    fn new(emitter: &IrEmitter<'a>) -> Result<Self> {
        let code = emitter.code;
        let block_count = code.block_count() as u32;
        let mut emission = Emission {
            code,
            frames: emitter.frames,
            debug_info: emitter.debug_info,
            slots: HashMap::new(),
            max_locals: 0,
            out: Vec::new(),
            next_label: block_count + 1,
            end_label: Label(block_count),
            locals: Vec::new(),
            layout: None,
        };
        emission.allocate_slots()?;
        if emission.frames {
            let layout = FrameLayout::new(code);
            emission.next_label += layout.new_labels.len() as u32;
            emission.layout = Some(layout);
        }
        Ok(emission)
    }

    fn allocate_slots(&mut self) -> Result<()> {
        let code = self.code;
        let mut next: u16 = u16::from(!code.is_static());
        let mut argument_slots: Vec<u16> = if code.is_static() { Vec::new() } else { vec![0] };
        for parameter in code.method().proto.parameters() {
            argument_slots.push(next);
            next += parameter.kind().slots() as u16;
        }

        let uses = code.use_counts();
        let mut assign = |slots: &mut HashMap<ValueId, u16>, value: ValueId| -> Result<()> {
            let width = code.value_type(value).kind().slots().max(1) as u16;
            slots.insert(value, next);
            next = next.checked_add(width).ok_or_else(|| {
                Error::IrError(format!("{}: too many locals", code.method()))
            })?;
            Ok(())
        };

        for instruction in &code.blocks()[0].instructions {
            if let (Some(out), IrOp::Argument(index)) = (instruction.out, &instruction.op) {
                let slot = argument_slots.get(usize::from(*index)).copied().ok_or_else(|| {
                    Error::IrError(format!("{}: no argument {index}", code.method()))
                })?;
                self.slots.insert(out, slot);
            }
        }
        for block in code.blocks() {
            for phi in &block.phis {
                assign(&mut self.slots, phi.out)?;
            }
        }
        for (_, instruction) in code.instructions() {
            if let Some(out) = instruction.out {
                if !self.slots.contains_key(&out) && uses.contains_key(&out) {
                    assign(&mut self.slots, out)?;
                }
            }
        }
        self.max_locals = next;
        Ok(())
    }

    fn new_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }

    fn kind_of(&self, value: ValueId) -> Result<ValueKind> {
        match self.code.value_type(value).kind() {
            ValueKind::Void => Err(Error::IrError(format!(
                "{}: {value} has no type",
                self.code.method()
            ))),
            kind => Ok(kind),
        }
    }

    fn slot_of(&self, value: ValueId) -> Result<u16> {
        self.slots.get(&value).copied().ok_or_else(|| {
            Error::IrError(format!("{}: {value} has no slot", self.code.method()))
        })
    }

    fn load(&mut self, value: ValueId) -> Result<()> {
        let instruction = CfInstruction::Load {
            kind: self.kind_of(value)?,
            local: self.slot_of(value)?,
        };
        self.out.push(instruction);
        Ok(())
    }

    fn load_all(&mut self, values: &[ValueId]) -> Result<()> {
        values.iter().try_for_each(|value| self.load(*value))
    }

    /// Stores a freshly computed value, or drops it if it has no slot.
    fn store_result(&mut self, value: ValueId) -> Result<()> {
        let kind = self.kind_of(value)?;
        let Some(slot) = self.slots.get(&value).copied() else {
            self.out.push(CfInstruction::Stack(if kind.is_wide() {
                StackOp::Pop2
            } else {
                StackOp::Pop
            }));
            return Ok(());
        };
        self.out.push(CfInstruction::Store { kind, local: slot });
        if self.debug_info {
            if let Some(local) = self.code.value(value).and_then(|v| v.local.clone()) {
                if local.ty.kind() == kind {
                    let start = self.new_label();
                    self.out.push(CfInstruction::Label(start));
                    self.locals.push(LocalVariableInfo {
                        index: slot,
                        name: local.name,
                        ty: local.ty,
                        signature: local.signature,
                        start,
                        end: self.end_label,
                    });
                }
            }
        }
        Ok(())
    }

    fn emit_block(&mut self, id: BlockId) -> Result<()> {
        let code = self.code;
        let block = code
            .block(id)
            .ok_or_else(|| Error::IrError(format!("{}: missing block {id}", code.method())))?;
        self.out.push(CfInstruction::Label(block_label(id)));
        if id == code.entry() {
            self.describe_arguments();
        } else if let Some(layout) = &self.layout {
            let frame = layout.frame_at(code, id, &self.slots);
            self.out.push(CfInstruction::Frame(frame));
        }
        if self.debug_info {
            self.describe_phis(id, block);
        }

        let thrower = if block.handlers.is_empty() {
            None
        } else {
            block.instructions.iter().position(IrInstruction::can_throw)
        };
        let next = BlockId::new(id.0 + 1);
        for (index, instruction) in block.instructions.iter().enumerate() {
            if thrower == Some(index) {
                for target in block.exceptional_successors() {
                    self.emit_phi_moves(id, target)?;
                }
            }
            if instruction.is_terminator() {
                let mut targets = block.normal_successors();
                targets.sort_unstable();
                targets.dedup();
                for target in targets {
                    self.emit_phi_moves(id, target)?;
                }
                self.emit_terminator(&instruction.op, next)?;
            } else {
                self.emit_instruction(instruction)?;
            }
        }
        Ok(())
    }

    /// Parallel copy of the phi operands flowing from `pred` into `target`.
    fn emit_phi_moves(&mut self, pred: BlockId, target: BlockId) -> Result<()> {
        let Some(successor) = self.code.block(target) else {
            return Ok(());
        };
        let Some(index) = successor.predecessor_index(pred) else {
            return Ok(());
        };
        let moves: Vec<(ValueId, ValueId)> = successor
            .phis
            .iter()
            .filter_map(|phi| phi.operands.get(index).map(|operand| (*operand, phi.out)))
            .filter(|(operand, out)| operand != out)
            .collect();
        for (operand, _) in &moves {
            self.load(*operand)?;
        }
        for (_, out) in moves.iter().rev() {
            let instruction = CfInstruction::Store {
                kind: self.kind_of(*out)?,
                local: self.slot_of(*out)?,
            };
            self.out.push(instruction);
        }
        Ok(())
    }

    fn emit_terminator(&mut self, op: &IrOp, next: BlockId) -> Result<()> {
        match op {
            IrOp::Goto(target) => {
                if *target != next {
                    self.out.push(CfInstruction::Goto(block_label(*target)));
                }
            }
            IrOp::If {
                cond,
                kind,
                left,
                right,
                target,
                fallthrough,
            } => {
                self.load(*left)?;
                let target = block_label(*target);
                match right {
                    Some(right) => {
                        self.load(*right)?;
                        self.out.push(CfInstruction::IfCmp {
                            cond: *cond,
                            kind: *kind,
                            target,
                        });
                    }
                    None => self.out.push(CfInstruction::If {
                        cond: *cond,
                        kind: *kind,
                        target,
                    }),
                }
                if *fallthrough != next {
                    self.out.push(CfInstruction::Goto(block_label(*fallthrough)));
                }
            }
            IrOp::Switch {
                value,
                keys,
                targets,
                default,
            } => {
                self.load(*value)?;
                self.out.push(CfInstruction::Switch {
                    default: block_label(*default),
                    keys: keys.clone(),
                    targets: targets.iter().map(|t| block_label(*t)).collect(),
                });
            }
            IrOp::Return(value) => {
                let kind = match value {
                    Some(value) => {
                        self.load(*value)?;
                        Some(self.kind_of(*value)?)
                    }
                    None => None,
                };
                self.out.push(CfInstruction::Return(kind));
            }
            IrOp::Throw(exception) => {
                self.load(*exception)?;
                self.out.push(CfInstruction::Throw);
            }
            other => {
                return Err(Error::IrError(format!(
                    "{}: {other} is not a terminator",
                    self.code.method()
                )))
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn emit_instruction(&mut self, instruction: &IrInstruction) -> Result<()> {
        let emitted = match &instruction.op {
            IrOp::Argument(_) => return Ok(()),
            IrOp::MoveException(_) => None,
            IrOp::Const(value) => Some(CfInstruction::Const(value.clone())),
            IrOp::Arith {
                op,
                ty,
                left,
                right,
            } => {
                self.load_all(&[*left, *right])?;
                Some(CfInstruction::Arith { op: *op, ty: *ty })
            }
            IrOp::Neg { ty, value } => {
                self.load(*value)?;
                Some(CfInstruction::Neg(*ty))
            }
            IrOp::Convert { from, to, value } => {
                self.load(*value)?;
                Some(CfInstruction::Convert {
                    from: *from,
                    to: *to,
                })
            }
            IrOp::Cmp { kind, left, right } => {
                self.load_all(&[*left, *right])?;
                Some(CfInstruction::Cmp(*kind))
            }
            IrOp::Invoke {
                kind,
                method,
                interface,
                arguments,
            } => {
                self.load_all(arguments)?;
                Some(CfInstruction::Invoke {
                    kind: *kind,
                    method: method.clone(),
                    interface: *interface,
                })
            }
            IrOp::InvokeDynamic {
                call_site,
                arguments,
            } => {
                self.load_all(arguments)?;
                Some(CfInstruction::InvokeDynamic(call_site.clone()))
            }
            IrOp::StaticGet(field) => Some(CfInstruction::StaticGet(field.clone())),
            IrOp::StaticPut { field, value } => {
                self.load(*value)?;
                Some(CfInstruction::StaticPut(field.clone()))
            }
            IrOp::InstanceGet { field, object } => {
                self.load(*object)?;
                Some(CfInstruction::InstanceGet(field.clone()))
            }
            IrOp::InstancePut {
                field,
                object,
                value,
            } => {
                self.load_all(&[*object, *value])?;
                Some(CfInstruction::InstancePut(field.clone()))
            }
            IrOp::InitClass(field) => Some(CfInstruction::InitClass(field.clone())),
            IrOp::NewInstance(ty) => {
                if let (Some(layout), Some(out)) = (&self.layout, instruction.out) {
                    if let Some(label) = layout.new_labels.get(&out) {
                        self.out.push(CfInstruction::Label(*label));
                    }
                }
                Some(CfInstruction::New(ty.clone()))
            }
            IrOp::NewArray { ty, size } => {
                self.load(*size)?;
                Some(CfInstruction::NewArray(ty.clone()))
            }
            IrOp::MultiNewArray { ty, sizes } => {
                self.load_all(sizes)?;
                let dimensions = u8::try_from(sizes.len()).map_err(|_| {
                    Error::IrError(format!(
                        "{}: {} array dimensions",
                        self.code.method(),
                        sizes.len()
                    ))
                })?;
                Some(CfInstruction::MultiNewArray {
                    ty: ty.clone(),
                    dimensions,
                })
            }
            IrOp::ArrayGet { kind, array, index } => {
                self.load_all(&[*array, *index])?;
                Some(CfInstruction::ArrayLoad(*kind))
            }
            IrOp::ArrayPut {
                kind,
                array,
                index,
                value,
            } => {
                self.load_all(&[*array, *index, *value])?;
                Some(CfInstruction::ArrayStore(*kind))
            }
            IrOp::ArrayLength(array) => {
                self.load(*array)?;
                Some(CfInstruction::ArrayLength)
            }
            IrOp::CheckCast { ty, value } => {
                self.load(*value)?;
                Some(CfInstruction::CheckCast(ty.clone()))
            }
            IrOp::SafeCheckCast { ty, value } => {
                self.load(*value)?;
                Some(CfInstruction::SafeCheckCast(ty.clone()))
            }
            IrOp::InstanceOf { ty, value } => {
                self.load(*value)?;
                Some(CfInstruction::InstanceOf(ty.clone()))
            }
            IrOp::MonitorEnter(object) => {
                self.load(*object)?;
                Some(CfInstruction::MonitorEnter)
            }
            IrOp::MonitorExit(object) => {
                self.load(*object)?;
                Some(CfInstruction::MonitorExit)
            }
            terminator => {
                return Err(Error::IrError(format!(
                    "{}: {terminator} before the end of a block",
                    self.code.method()
                )))
            }
        };
        if let Some(emitted) = emitted {
            self.out.push(emitted);
        }
        match instruction.out {
            Some(out) => self.store_result(out),
            None => {
                if let Some(kind) = discarded_kind(&instruction.op) {
                    self.out.push(CfInstruction::Stack(if kind.is_wide() {
                        StackOp::Pop2
                    } else {
                        StackOp::Pop
                    }));
                }
                Ok(())
            }
        }
    }

    fn describe_arguments(&mut self) {
        if !self.debug_info {
            return;
        }
        for value in self.code.arguments() {
            let (Some(local), Some(slot)) = (
                self.code.value(value).and_then(|v| v.local.clone()),
                self.slots.get(&value).copied(),
            ) else {
                continue;
            };
            self.locals.push(LocalVariableInfo {
                index: slot,
                name: local.name,
                ty: local.ty,
                signature: local.signature,
                start: block_label(self.code.entry()),
                end: self.end_label,
            });
        }
    }

    fn describe_phis(&mut self, id: BlockId, block: &BasicBlock) {
        for phi in &block.phis {
            let Some(value) = self.code.value(phi.out) else {
                continue;
            };
            let (Some(local), Some(slot)) = (value.local.clone(), self.slots.get(&phi.out)) else {
                continue;
            };
            if local.ty.kind() != value.ty.kind() {
                continue;
            }
            self.locals.push(LocalVariableInfo {
                index: *slot,
                name: local.name,
                ty: local.ty,
                signature: local.signature,
                start: block_label(id),
                end: self.end_label,
            });
        }
    }

    fn finish(mut self) -> CfCode {
        let code = self.code;
        let block_count = code.block_count();
        let mut ranges = Vec::new();
        for (b, block) in code.blocks().iter().enumerate() {
            if block.handlers.is_empty() {
                continue;
            }
            let end = if b + 1 < block_count {
                block_label(BlockId::new(b as u32 + 1))
            } else {
                self.end_label
            };
            ranges.push(CfTryCatch {
                start: block_label(BlockId::new(b as u32)),
                end,
                guards: block.handlers.iter().map(|h| h.guard.clone()).collect(),
                targets: block.handlers.iter().map(|h| block_label(h.target)).collect(),
            });
        }
        self.out.push(CfInstruction::Label(self.end_label));

        let mut cf = CfCode::new(0, self.max_locals, self.out);
        cf.try_catch_ranges = ranges;
        cf.local_variables = self.locals;
        cf.max_stack = cf.compute_max_stack();
        cf
    }
}

fn block_label(block: BlockId) -> Label {
    Label(block.0)
}

/// Kind of the value left on the stack by an operation whose result is unused.
fn discarded_kind(op: &IrOp) -> Option<ValueKind> {
    let ty = match op {
        IrOp::Invoke { method, .. } => method.proto.return_type(),
        IrOp::InvokeDynamic { call_site, .. } => call_site.proto.return_type(),
        IrOp::StaticGet(field) | IrOp::InstanceGet { field, .. } => &field.ty,
        _ => return None,
    };
    Some(ty.kind()).filter(|kind| *kind != ValueKind::Void)
}

// ============================================================================
// Stack map frames
// ============================================================================

/// Where values are defined and initialized, for computing frames at block starts.
struct FrameLayout {
    dominators: DominatorTree,
    definitions: HashMap<ValueId, DefSite>,
    /// Label bound to the `new` of each allocation
    new_labels: HashMap<ValueId, Label>,
    /// Constructor call site of each allocation and of an uninitialized `this`
    initializers: HashMap<ValueId, (BlockId, usize)>,
    /// First throwing instruction of each guarded block
    throwers: HashMap<BlockId, usize>,
    uninitialized_this: Option<ValueId>,
}

impl FrameLayout {
    fn new(code: &IrCode) -> Self {
        let mut new_labels = HashMap::new();
        let mut initializers = HashMap::new();
        let mut throwers = HashMap::new();
        let mut next_label = code.block_count() as u32 + 1;

        for (b, block) in code.blocks().iter().enumerate() {
            let id = BlockId::new(b as u32);
            if !block.handlers.is_empty() {
                if let Some(index) = block.instructions.iter().position(IrInstruction::can_throw) {
                    throwers.insert(id, index);
                }
            }
            for (index, instruction) in block.instructions.iter().enumerate() {
                match &instruction.op {
                    IrOp::NewInstance(_) => {
                        if let Some(out) = instruction.out {
                            new_labels.insert(out, Label(next_label));
                            next_label += 1;
                        }
                    }
                    IrOp::Invoke {
                        kind: InvokeKind::Special,
                        method,
                        arguments,
                        ..
                    } if method.is_instance_initializer() => {
                        if let Some(receiver) = arguments.first() {
                            initializers.entry(*receiver).or_insert((id, index));
                        }
                    }
                    _ => {}
                }
            }
        }

        let uninitialized_this = if code.method().is_instance_initializer() && !code.is_static() {
            code.arguments().first().copied()
        } else {
            None
        };

        FrameLayout {
            dominators: code.dominator_tree(),
            definitions: code.definitions(),
            new_labels,
            initializers,
            throwers,
            uninitialized_this,
        }
    }

    /// Returns `true` if the instruction at `site` has completed on every path into `block`.
    fn completed_before(&self, code: &IrCode, site: (BlockId, usize), block: BlockId) -> bool {
        let (site_block, index) = site;
        if !self
            .dominators
            .strictly_dominates(NodeId::new(site_block.index()), NodeId::new(block.index()))
        {
            return false;
        }
        let is_handler = code.block(block).is_some_and(BasicBlock::is_handler_entry);
        if is_handler
            && code
                .block(block)
                .is_some_and(|b| b.predecessors.contains(&site_block))
        {
            return self
                .throwers
                .get(&site_block)
                .is_some_and(|thrower| index < *thrower);
        }
        true
    }

    fn frame_at(&self, code: &IrCode, block: BlockId, slots: &HashMap<ValueId, u16>) -> CfFrame {
        let mut locals = BTreeMap::new();
        let arguments = code.arguments();
        for (value, slot) in slots {
            let available = arguments.contains(value)
                || match self.definitions.get(value) {
                    Some(DefSite::Phi { block: def, .. }) => {
                        *def == block
                            || self
                                .dominators
                                .strictly_dominates(NodeId::new(def.index()), NodeId::new(block.index()))
                    }
                    Some(DefSite::Instruction { block: def, index }) => {
                        self.completed_before(code, (*def, *index), block)
                    }
                    None => false,
                };
            if !available {
                continue;
            }
            let initialized = self
                .initializers
                .get(value)
                .is_some_and(|site| self.completed_before(code, *site, block));
            let ty = if Some(*value) == self.uninitialized_this && !initialized {
                FrameType::UninitializedThis
            } else if let (Some(label), false) = (self.new_labels.get(value), initialized) {
                FrameType::Uninitialized(*label)
            } else {
                match frame_type(&code.value_type(*value)) {
                    Some(ty) => ty,
                    None => continue,
                }
            };
            locals.insert(*slot, ty);
        }

        let mut stack = Vec::new();
        if let Some(IrOp::MoveException(ty)) = code
            .block(block)
            .and_then(|b| b.instructions.first())
            .map(|i| &i.op)
        {
            stack.push(FrameType::Initialized(ty.clone()));
        }
        CfFrame { locals, stack }
    }
}

fn frame_type(ty: &TypeElement) -> Option<FrameType> {
    Some(match ty {
        TypeElement::Int => FrameType::Int,
        TypeElement::Long => FrameType::Long,
        TypeElement::Float => FrameType::Float,
        TypeElement::Double => FrameType::Double,
        TypeElement::Null => FrameType::Null,
        TypeElement::Reference { upper, .. } => FrameType::Initialized(upper.clone()),
        TypeElement::Top => return None,
    })
}

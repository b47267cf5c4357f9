//! IR instructions.
//!
//! Unlike [`CfInstruction`](crate::code::CfInstruction), which reads and writes an implicit
//! operand stack, an [`IrInstruction`] names its operands as [`ValueId`]s and defines at most
//! one result value. Local variable loads and stores, and stack shuffling, disappear during
//! construction; the remaining operations map one to one onto [`IrOp`] variants.
//!
//! Control flow is explicit: the last instruction of every block is a terminator
//! ([`IrOp::Goto`], [`IrOp::If`], [`IrOp::Switch`], [`IrOp::Return`] or [`IrOp::Throw`])
//! naming its successor blocks. Exceptional edges are block metadata, not instructions.

use std::fmt;

use crate::{
    code::{
        constant::CallSite,
        instruction::{ArithOp, ArrayKind, CmpKind, IfCond, InvokeKind, NumericType},
        ConstValue,
    },
    ir::{block::BlockId, value::ValueId},
    program::{
        descriptor::ValueKind,
        references::{FieldRef, MethodRef, TypeRef},
    },
};

/// Operation of an IR instruction with its operands.
#[derive(Debug, Clone, PartialEq)]
pub enum IrOp {
    // ========================================================================
    // Values
    // ========================================================================
    /// The argument at `index` (receiver first). Only in the entry block.
    Argument(u16),
    /// A constant.
    Const(ConstValue),
    /// The caught exception; first instruction of a handler block.
    MoveException(TypeRef),

    // ========================================================================
    // Arithmetic
    // ========================================================================
    /// Binary arithmetic.
    Arith {
        /// Operator
        op: ArithOp,
        /// Operand type
        ty: NumericType,
        /// Left operand
        left: ValueId,
        /// Right operand
        right: ValueId,
    },
    /// Negation.
    Neg {
        /// Operand type
        ty: NumericType,
        /// Operand
        value: ValueId,
    },
    /// Primitive conversion.
    Convert {
        /// Source type
        from: NumericType,
        /// Target type
        to: NumericType,
        /// Operand
        value: ValueId,
    },
    /// Three-way comparison.
    Cmp {
        /// Comparison flavour
        kind: CmpKind,
        /// Left operand
        left: ValueId,
        /// Right operand
        right: ValueId,
    },

    // ========================================================================
    // Control flow
    // ========================================================================
    /// Unconditional jump.
    Goto(BlockId),
    /// Conditional jump; `right` is `None` for comparisons against zero or `null`.
    If {
        /// Condition
        cond: IfCond,
        /// Operand kind, `Int` or `Reference`
        kind: ValueKind,
        /// Left operand
        left: ValueId,
        /// Right operand
        right: Option<ValueId>,
        /// Block entered when the condition holds
        target: BlockId,
        /// Block entered otherwise
        fallthrough: BlockId,
    },
    /// Multi-way jump; `keys` and `targets` are parallel.
    Switch {
        /// Switched value
        value: ValueId,
        /// Case keys
        keys: Vec<i32>,
        /// Case blocks
        targets: Vec<BlockId>,
        /// Block for every other key
        default: BlockId,
    },
    /// Method return.
    Return(Option<ValueId>),
    /// `athrow`
    Throw(ValueId),

    // ========================================================================
    // Members
    // ========================================================================
    /// Method invocation; the receiver, if any, is the first argument.
    Invoke {
        /// Invoke kind
        kind: InvokeKind,
        /// Target
        method: MethodRef,
        /// The target's holder is an interface
        interface: bool,
        /// Arguments
        arguments: Vec<ValueId>,
    },
    /// `invokedynamic`
    InvokeDynamic {
        /// Call site
        call_site: CallSite,
        /// Arguments
        arguments: Vec<ValueId>,
    },
    /// Static field read.
    StaticGet(FieldRef),
    /// Static field write.
    StaticPut {
        /// Field
        field: FieldRef,
        /// Stored value
        value: ValueId,
    },
    /// Instance field read.
    InstanceGet {
        /// Field
        field: FieldRef,
        /// Receiver
        object: ValueId,
    },
    /// Instance field write.
    InstancePut {
        /// Field
        field: FieldRef,
        /// Receiver
        object: ValueId,
        /// Stored value
        value: ValueId,
    },
    /// Forces static initialization of the field's holder.
    InitClass(FieldRef),

    // ========================================================================
    // Objects and arrays
    // ========================================================================
    /// Allocation of an uninitialized instance.
    NewInstance(TypeRef),
    /// One-dimensional array allocation.
    NewArray {
        /// Array type
        ty: TypeRef,
        /// Length
        size: ValueId,
    },
    /// Multi-dimensional array allocation.
    MultiNewArray {
        /// Array type
        ty: TypeRef,
        /// Lengths, outermost first
        sizes: Vec<ValueId>,
    },
    /// Array element read.
    ArrayGet {
        /// Element kind
        kind: ArrayKind,
        /// Array
        array: ValueId,
        /// Index
        index: ValueId,
    },
    /// Array element write.
    ArrayPut {
        /// Element kind
        kind: ArrayKind,
        /// Array
        array: ValueId,
        /// Index
        index: ValueId,
        /// Stored value
        value: ValueId,
    },
    /// Array length.
    ArrayLength(ValueId),
    /// Checked cast.
    CheckCast {
        /// Target type
        ty: TypeRef,
        /// Operand
        value: ValueId,
    },
    /// A cast proven to succeed.
    SafeCheckCast {
        /// Target type
        ty: TypeRef,
        /// Operand
        value: ValueId,
    },
    /// Type test.
    InstanceOf {
        /// Tested type
        ty: TypeRef,
        /// Operand
        value: ValueId,
    },
    /// `monitorenter`
    MonitorEnter(ValueId),
    /// `monitorexit`
    MonitorExit(ValueId),
}

/// An IR instruction: an operation and the value it defines.
#[derive(Debug, Clone, PartialEq)]
pub struct IrInstruction {
    /// Defined value, `None` for operations without a result
    pub out: Option<ValueId>,
    /// Operation
    pub op: IrOp,
}

impl IrInstruction {
    /// An instruction without a result.
    #[must_use]
    pub fn new(op: IrOp) -> Self {
        IrInstruction { out: None, op }
    }

    /// An instruction defining `out`.
    #[must_use]
    pub fn with_out(out: ValueId, op: IrOp) -> Self {
        IrInstruction { out: Some(out), op }
    }

    /// Operands in evaluation order.
    #[must_use]
    pub fn operands(&self) -> Vec<ValueId> {
        let mut operands = Vec::new();
        self.op.for_each_operand(|value| operands.push(value));
        operands
    }

    /// Applies `map` to every operand.
    pub fn map_operands(&mut self, mut map: impl FnMut(ValueId) -> ValueId) {
        self.op.for_each_operand_mut(|value| *value = map(*value));
    }

    /// Returns `true` for block terminators.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        self.op.is_terminator()
    }

    /// Returns `true` if executing the instruction may raise an exception.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        self.op.can_throw()
    }
}

impl IrOp {
    fn for_each_operand(&self, mut f: impl FnMut(ValueId)) {
        match self {
            IrOp::Argument(_)
            | IrOp::Const(_)
            | IrOp::MoveException(_)
            | IrOp::Goto(_)
            | IrOp::StaticGet(_)
            | IrOp::InitClass(_)
            | IrOp::NewInstance(_)
            | IrOp::Return(None) => {}
            IrOp::Arith { left, right, .. } | IrOp::Cmp { left, right, .. } => {
                f(*left);
                f(*right);
            }
            IrOp::If { left, right, .. } => {
                f(*left);
                if let Some(right) = right {
                    f(*right);
                }
            }
            IrOp::Neg { value, .. }
            | IrOp::Convert { value, .. }
            | IrOp::Switch { value, .. }
            | IrOp::Return(Some(value))
            | IrOp::Throw(value)
            | IrOp::StaticPut { value, .. }
            | IrOp::InstanceGet { object: value, .. }
            | IrOp::NewArray { size: value, .. }
            | IrOp::ArrayLength(value)
            | IrOp::CheckCast { value, .. }
            | IrOp::SafeCheckCast { value, .. }
            | IrOp::InstanceOf { value, .. }
            | IrOp::MonitorEnter(value)
            | IrOp::MonitorExit(value) => f(*value),
            IrOp::Invoke { arguments, .. } | IrOp::InvokeDynamic { arguments, .. } => {
                arguments.iter().copied().for_each(f);
            }
            IrOp::MultiNewArray { sizes, .. } => sizes.iter().copied().for_each(f),
            IrOp::InstancePut { object, value, .. } => {
                f(*object);
                f(*value);
            }
            IrOp::ArrayGet { array, index, .. } => {
                f(*array);
                f(*index);
            }
            IrOp::ArrayPut {
                array,
                index,
                value,
                ..
            } => {
                f(*array);
                f(*index);
                f(*value);
            }
        }
    }

    fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut ValueId)) {
        match self {
            IrOp::Argument(_)
            | IrOp::Const(_)
            | IrOp::MoveException(_)
            | IrOp::Goto(_)
            | IrOp::StaticGet(_)
            | IrOp::InitClass(_)
            | IrOp::NewInstance(_)
            | IrOp::Return(None) => {}
            IrOp::Arith { left, right, .. } | IrOp::Cmp { left, right, .. } => {
                f(left);
                f(right);
            }
            IrOp::If { left, right, .. } => {
                f(left);
                if let Some(right) = right {
                    f(right);
                }
            }
            IrOp::Neg { value, .. }
            | IrOp::Convert { value, .. }
            | IrOp::Switch { value, .. }
            | IrOp::Return(Some(value))
            | IrOp::Throw(value)
            | IrOp::StaticPut { value, .. }
            | IrOp::InstanceGet { object: value, .. }
            | IrOp::NewArray { size: value, .. }
            | IrOp::ArrayLength(value)
            | IrOp::CheckCast { value, .. }
            | IrOp::SafeCheckCast { value, .. }
            | IrOp::InstanceOf { value, .. }
            | IrOp::MonitorEnter(value)
            | IrOp::MonitorExit(value) => f(value),
            IrOp::Invoke { arguments, .. } | IrOp::InvokeDynamic { arguments, .. } => {
                arguments.iter_mut().for_each(f);
            }
            IrOp::MultiNewArray { sizes, .. } => sizes.iter_mut().for_each(f),
            IrOp::InstancePut { object, value, .. } => {
                f(object);
                f(value);
            }
            IrOp::ArrayGet { array, index, .. } => {
                f(array);
                f(index);
            }
            IrOp::ArrayPut {
                array,
                index,
                value,
                ..
            } => {
                f(array);
                f(index);
                f(value);
            }
        }
    }

    /// Returns `true` for block terminators.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            IrOp::Goto(_) | IrOp::If { .. } | IrOp::Switch { .. } | IrOp::Return(_) | IrOp::Throw(_)
        )
    }

    /// Returns `true` if the operation may raise an exception.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        match self {
            IrOp::Arith { op, ty, .. } => op.can_throw(*ty),
            IrOp::Const(value) => matches!(
                value,
                ConstValue::Class(_) | ConstValue::MethodType(_) | ConstValue::MethodHandle(_)
            ),
            IrOp::Invoke { .. }
            | IrOp::InvokeDynamic { .. }
            | IrOp::StaticGet(_)
            | IrOp::StaticPut { .. }
            | IrOp::InstanceGet { .. }
            | IrOp::InstancePut { .. }
            | IrOp::InitClass(_)
            | IrOp::NewInstance(_)
            | IrOp::NewArray { .. }
            | IrOp::MultiNewArray { .. }
            | IrOp::ArrayGet { .. }
            | IrOp::ArrayPut { .. }
            | IrOp::ArrayLength(_)
            | IrOp::CheckCast { .. }
            | IrOp::MonitorEnter(_)
            | IrOp::MonitorExit(_)
            | IrOp::Throw(_) => true,
            _ => false,
        }
    }

    /// Normal successor blocks of a terminator, in target order.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            IrOp::Goto(target) => vec![*target],
            IrOp::If {
                target,
                fallthrough,
                ..
            } => vec![*target, *fallthrough],
            IrOp::Switch {
                targets, default, ..
            } => {
                let mut all = targets.clone();
                all.push(*default);
                all
            }
            _ => Vec::new(),
        }
    }

    /// Applies `map` to every successor block.
    pub fn map_successors(&mut self, mut map: impl FnMut(BlockId) -> BlockId) {
        match self {
            IrOp::Goto(target) => *target = map(*target),
            IrOp::If {
                target,
                fallthrough,
                ..
            } => {
                *target = map(*target);
                *fallthrough = map(*fallthrough);
            }
            IrOp::Switch {
                targets, default, ..
            } => {
                for target in targets.iter_mut() {
                    *target = map(*target);
                }
                *default = map(*default);
            }
            _ => {}
        }
    }

    /// Shape of the operation with operands and block targets erased. Two instructions with
    /// equal shapes differ only in the values and blocks they name.
    #[must_use]
    pub fn shape(&self) -> IrOp {
        let mut shape = self.clone();
        shape.for_each_operand_mut(|value| *value = ValueId(0));
        shape.map_successors(|_| BlockId(0));
        shape
    }
}

impl fmt::Display for IrInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(out) = self.out {
            write!(f, "{out} = ")?;
        }
        write!(f, "{}", self.op)
    }
}

fn write_values(f: &mut fmt::Formatter<'_>, values: &[ValueId]) -> fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{value}")?;
    }
    Ok(())
}

impl fmt::Display for IrOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrOp::Argument(index) => write!(f, "argument {index}"),
            IrOp::Const(value) => write!(f, "const {value}"),
            IrOp::MoveException(ty) => write!(f, "move-exception {ty}"),
            IrOp::Arith {
                op,
                ty,
                left,
                right,
            } => write!(f, "{op}-{ty} {left}, {right}"),
            IrOp::Neg { ty, value } => write!(f, "neg-{ty} {value}"),
            IrOp::Convert { from, to, value } => write!(f, "{from}-to-{to} {value}"),
            IrOp::Cmp { kind, left, right } => write!(f, "cmp-{kind} {left}, {right}"),
            IrOp::Goto(target) => write!(f, "goto {target}"),
            IrOp::If {
                cond,
                left,
                right,
                target,
                fallthrough,
                ..
            } => match right {
                Some(right) => write!(f, "if {left} {cond} {right} then {target} else {fallthrough}"),
                None => write!(f, "if {left} {cond} 0 then {target} else {fallthrough}"),
            },
            IrOp::Switch {
                value,
                keys,
                targets,
                default,
            } => {
                write!(f, "switch {value} {{")?;
                for (key, target) in keys.iter().zip(targets) {
                    write!(f, " {key}: {target},")?;
                }
                write!(f, " default: {default} }}")
            }
            IrOp::Return(None) => f.write_str("return"),
            IrOp::Return(Some(value)) => write!(f, "return {value}"),
            IrOp::Throw(value) => write!(f, "throw {value}"),
            IrOp::Invoke {
                kind,
                method,
                arguments,
                ..
            } => {
                write!(f, "invoke-{kind} {method}(")?;
                write_values(f, arguments)?;
                f.write_str(")")
            }
            IrOp::InvokeDynamic {
                call_site,
                arguments,
            } => {
                write!(f, "invoke-dynamic {}(", call_site.name)?;
                write_values(f, arguments)?;
                f.write_str(")")
            }
            IrOp::StaticGet(field) => write!(f, "static-get {field}"),
            IrOp::StaticPut { field, value } => write!(f, "static-put {field}, {value}"),
            IrOp::InstanceGet { field, object } => write!(f, "instance-get {object}.{field}"),
            IrOp::InstancePut {
                field,
                object,
                value,
            } => write!(f, "instance-put {object}.{field}, {value}"),
            IrOp::InitClass(field) => write!(f, "init-class {}", field.holder),
            IrOp::NewInstance(ty) => write!(f, "new-instance {ty}"),
            IrOp::NewArray { ty, size } => write!(f, "new-array {ty}[{size}]"),
            IrOp::MultiNewArray { ty, sizes } => {
                write!(f, "multi-new-array {ty}[")?;
                write_values(f, sizes)?;
                f.write_str("]")
            }
            IrOp::ArrayGet { array, index, .. } => write!(f, "array-get {array}[{index}]"),
            IrOp::ArrayPut {
                array,
                index,
                value,
                ..
            } => write!(f, "array-put {array}[{index}], {value}"),
            IrOp::ArrayLength(array) => write!(f, "array-length {array}"),
            IrOp::CheckCast { ty, value } => write!(f, "check-cast {value}, {ty}"),
            IrOp::SafeCheckCast { ty, value } => write!(f, "safe-check-cast {value}, {ty}"),
            IrOp::InstanceOf { ty, value } => write!(f, "instance-of {value}, {ty}"),
            IrOp::MonitorEnter(value) => write!(f, "monitor-enter {value}"),
            IrOp::MonitorExit(value) => write!(f, "monitor-exit {value}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operands_in_order() {
        let instruction = IrInstruction::new(IrOp::ArrayPut {
            kind: ArrayKind::Int,
            array: ValueId(3),
            index: ValueId(1),
            value: ValueId(2),
        });
        assert_eq!(
            instruction.operands(),
            vec![ValueId(3), ValueId(1), ValueId(2)]
        );
        assert!(instruction.can_throw());
        assert!(!instruction.is_terminator());
    }

    #[test]
    fn test_shape_erases_values_and_blocks() {
        let a = IrOp::If {
            cond: IfCond::Lt,
            kind: ValueKind::Int,
            left: ValueId(1),
            right: Some(ValueId(2)),
            target: BlockId(3),
            fallthrough: BlockId(4),
        };
        let b = IrOp::If {
            cond: IfCond::Lt,
            kind: ValueKind::Int,
            left: ValueId(7),
            right: Some(ValueId(8)),
            target: BlockId(1),
            fallthrough: BlockId(2),
        };
        assert_eq!(a.shape(), b.shape());
        assert_eq!(a.successors(), vec![BlockId(3), BlockId(4)]);
    }

    #[test]
    fn test_safe_check_cast_cannot_throw() {
        let ty = TypeRef::string();
        assert!(IrOp::CheckCast {
            ty: ty.clone(),
            value: ValueId(0)
        }
        .can_throw());
        assert!(!IrOp::SafeCheckCast { ty, value: ValueId(0) }.can_throw());
    }
}

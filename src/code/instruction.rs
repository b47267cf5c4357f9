//! Stack-machine instructions.
//!
//! [`CfInstruction`] is a closed sum type over the class-file instruction set, normalised so
//! that each semantic operation has one variant (`iconst_0`, `bipush`, `ldc` all become
//! [`CfInstruction::Const`]; `tableswitch` and `lookupswitch` become
//! [`CfInstruction::Switch`]). Every variant supplies three operations by pattern match:
//!
//! - [`CfInstruction::encode`] - emit opcode bytes through a [`CodeWriter`]
//! - [`CfInstruction::register_references`] - report symbolic uses to a [`UseRegistry`]
//! - [`CfInstruction::inlining_constraint`] - the visibility constraint the instruction
//!   imposes on inlining its method elsewhere

use std::fmt;

use crate::{
    code::{constant::CallSite, writer::CodeWriter, CfFrame, ConstValue, Label},
    optimize::inliner::{InliningConstraint, InliningConstraints},
    program::{
        descriptor::ValueKind,
        references::{FieldRef, MethodRef, TypeRef},
    },
    shaking::UseRegistry,
    Result,
};

/// Numeric operand types of arithmetic and conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum NumericType {
    /// `byte` (conversion target only)
    Byte,
    /// `char` (conversion target only)
    Char,
    /// `short` (conversion target only)
    Short,
    /// `int`
    Int,
    /// `long`
    Long,
    /// `float`
    Float,
    /// `double`
    Double,
}

impl NumericType {
    /// Stack kind of values of this type.
    #[must_use]
    pub fn kind(self) -> ValueKind {
        match self {
            NumericType::Long => ValueKind::Long,
            NumericType::Float => ValueKind::Float,
            NumericType::Double => ValueKind::Double,
            _ => ValueKind::Int,
        }
    }

    /// The arithmetic type of a stack kind.
    #[must_use]
    pub fn of_kind(kind: ValueKind) -> Option<Self> {
        match kind {
            ValueKind::Int => Some(NumericType::Int),
            ValueKind::Long => Some(NumericType::Long),
            ValueKind::Float => Some(NumericType::Float),
            ValueKind::Double => Some(NumericType::Double),
            ValueKind::Reference | ValueKind::Void => None,
        }
    }

    /// The primitive type.
    #[must_use]
    pub fn type_ref(self) -> TypeRef {
        match self {
            NumericType::Byte => TypeRef::byte(),
            NumericType::Char => TypeRef::char(),
            NumericType::Short => TypeRef::short(),
            NumericType::Int => TypeRef::int(),
            NumericType::Long => TypeRef::long(),
            NumericType::Float => TypeRef::float(),
            NumericType::Double => TypeRef::double(),
        }
    }

    fn index(self) -> u8 {
        match self {
            NumericType::Long => 1,
            NumericType::Float => 2,
            NumericType::Double => 3,
            _ => 0,
        }
    }
}

/// Binary arithmetic and logic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    Ushr,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
}

impl ArithOp {
    /// Integral division and remainder throw on a zero divisor.
    #[must_use]
    pub fn can_throw(self, ty: NumericType) -> bool {
        matches!(self, ArithOp::Div | ArithOp::Rem)
            && matches!(ty, NumericType::Int | NumericType::Long)
    }

    /// Shifts take an `int` shift distance regardless of the value type.
    #[must_use]
    pub fn is_shift(self) -> bool {
        matches!(self, ArithOp::Shl | ArithOp::Shr | ArithOp::Ushr)
    }

    fn opcode(self, ty: NumericType) -> u8 {
        let base = match self {
            ArithOp::Add => 0x60,
            ArithOp::Sub => 0x64,
            ArithOp::Mul => 0x68,
            ArithOp::Div => 0x6c,
            ArithOp::Rem => 0x70,
            ArithOp::Shl => return 0x78 + u8::from(ty == NumericType::Long),
            ArithOp::Shr => return 0x7a + u8::from(ty == NumericType::Long),
            ArithOp::Ushr => return 0x7c + u8::from(ty == NumericType::Long),
            ArithOp::And => return 0x7e + u8::from(ty == NumericType::Long),
            ArithOp::Or => return 0x80 + u8::from(ty == NumericType::Long),
            ArithOp::Xor => return 0x82 + u8::from(ty == NumericType::Long),
        };
        base + ty.index()
    }
}

/// Comparison producing -1, 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum CmpKind {
    /// `lcmp`
    Long,
    /// `fcmpl`
    FloatL,
    /// `fcmpg`
    FloatG,
    /// `dcmpl`
    DoubleL,
    /// `dcmpg`
    DoubleG,
}

impl CmpKind {
    /// Kind of both operands.
    #[must_use]
    pub fn operand_kind(self) -> ValueKind {
        match self {
            CmpKind::Long => ValueKind::Long,
            CmpKind::FloatL | CmpKind::FloatG => ValueKind::Float,
            CmpKind::DoubleL | CmpKind::DoubleG => ValueKind::Double,
        }
    }
}

/// Branch conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum IfCond {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `>`
    Gt,
    /// `<=`
    Le,
}

impl IfCond {
    /// The condition that holds exactly when `self` does not.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            IfCond::Eq => IfCond::Ne,
            IfCond::Ne => IfCond::Eq,
            IfCond::Lt => IfCond::Ge,
            IfCond::Ge => IfCond::Lt,
            IfCond::Gt => IfCond::Le,
            IfCond::Le => IfCond::Gt,
        }
    }

    /// Evaluates the condition on a comparison of `left` with `right`.
    #[must_use]
    pub fn holds(self, left: i64, right: i64) -> bool {
        match self {
            IfCond::Eq => left == right,
            IfCond::Ne => left != right,
            IfCond::Lt => left < right,
            IfCond::Ge => left >= right,
            IfCond::Gt => left > right,
            IfCond::Le => left <= right,
        }
    }

    fn offset(self) -> u8 {
        match self {
            IfCond::Eq => 0,
            IfCond::Ne => 1,
            IfCond::Lt => 2,
            IfCond::Ge => 3,
            IfCond::Gt => 4,
            IfCond::Le => 5,
        }
    }
}

/// Array element kinds of array loads and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum ArrayKind {
    /// `int[]`
    Int,
    /// `long[]`
    Long,
    /// `float[]`
    Float,
    /// `double[]`
    Double,
    /// Reference arrays
    Reference,
    /// `byte[]` and `boolean[]`
    Byte,
    /// `char[]`
    Char,
    /// `short[]`
    Short,
}

impl ArrayKind {
    /// Stack kind of the element.
    #[must_use]
    pub fn value_kind(self) -> ValueKind {
        match self {
            ArrayKind::Long => ValueKind::Long,
            ArrayKind::Float => ValueKind::Float,
            ArrayKind::Double => ValueKind::Double,
            ArrayKind::Reference => ValueKind::Reference,
            _ => ValueKind::Int,
        }
    }

    /// Kind of elements of `array_type`.
    #[must_use]
    pub fn of_array_type(array_type: &TypeRef) -> Option<Self> {
        let element = array_type.element_type()?;
        Some(match element.descriptor() {
            "I" => ArrayKind::Int,
            "J" => ArrayKind::Long,
            "F" => ArrayKind::Float,
            "D" => ArrayKind::Double,
            "B" | "Z" => ArrayKind::Byte,
            "C" => ArrayKind::Char,
            "S" => ArrayKind::Short,
            _ => ArrayKind::Reference,
        })
    }

    fn offset(self) -> u8 {
        match self {
            ArrayKind::Int => 0,
            ArrayKind::Long => 1,
            ArrayKind::Float => 2,
            ArrayKind::Double => 3,
            ArrayKind::Reference => 4,
            ArrayKind::Byte => 5,
            ArrayKind::Char => 6,
            ArrayKind::Short => 7,
        }
    }
}

/// Operand stack manipulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StackOp {
    /// `pop`
    Pop,
    /// `pop2`
    Pop2,
    /// `dup`
    Dup,
    /// `dup_x1`
    DupX1,
    /// `dup_x2`
    DupX2,
    /// `dup2`
    Dup2,
    /// `dup2_x1`
    Dup2X1,
    /// `dup2_x2`
    Dup2X2,
    /// `swap`
    Swap,
}

impl StackOp {
    fn opcode(self) -> u8 {
        match self {
            StackOp::Pop => 0x57,
            StackOp::Pop2 => 0x58,
            StackOp::Dup => 0x59,
            StackOp::DupX1 => 0x5a,
            StackOp::DupX2 => 0x5b,
            StackOp::Dup2 => 0x5c,
            StackOp::Dup2X1 => 0x5d,
            StackOp::Dup2X2 => 0x5e,
            StackOp::Swap => 0x5f,
        }
    }

    /// Slots popped and pushed.
    #[must_use]
    pub fn slot_effect(self) -> (u16, u16) {
        match self {
            StackOp::Pop => (1, 0),
            StackOp::Pop2 => (2, 0),
            StackOp::Dup => (1, 2),
            StackOp::DupX1 => (2, 3),
            StackOp::DupX2 => (3, 4),
            StackOp::Dup2 => (2, 4),
            StackOp::Dup2X1 => (3, 5),
            StackOp::Dup2X2 => (4, 6),
            StackOp::Swap => (2, 2),
        }
    }
}

/// Invoke opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum InvokeKind {
    /// `invokevirtual`
    Virtual,
    /// `invokespecial`
    Special,
    /// `invokestatic`
    Static,
    /// `invokeinterface`
    Interface,
}

/// A stack-machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum CfInstruction {
    // ========================================================================
    // Pseudo instructions
    // ========================================================================
    /// Binds a label to the current position.
    Label(Label),
    /// Stack map frame describing the state at the following instruction.
    Frame(CfFrame),
    /// `nop`
    Nop,

    // ========================================================================
    // Constants, locals and the operand stack
    // ========================================================================
    /// Pushes a constant (`aconst_null`, `iconst_*`, `bipush`, `ldc`, ...).
    Const(ConstValue),
    /// Pushes a local.
    Load {
        /// Value kind, selects `iload`/`lload`/`fload`/`dload`/`aload`
        kind: ValueKind,
        /// Local slot
        local: u16,
    },
    /// Pops into a local.
    Store {
        /// Value kind, selects the `*store` opcode
        kind: ValueKind,
        /// Local slot
        local: u16,
    },
    /// Adds a constant to an `int` local.
    Iinc {
        /// Local slot
        local: u16,
        /// Signed increment
        increment: i16,
    },
    /// Stack manipulation.
    Stack(StackOp),

    // ========================================================================
    // Arithmetic
    // ========================================================================
    /// Binary arithmetic: `..., left, right -> ..., result`
    Arith {
        /// Operator
        op: ArithOp,
        /// Operand type
        ty: NumericType,
    },
    /// Negation.
    Neg(NumericType),
    /// Primitive conversion.
    Convert {
        /// Source type
        from: NumericType,
        /// Target type
        to: NumericType,
    },
    /// Three-way comparison.
    Cmp(CmpKind),

    // ========================================================================
    // Control flow
    // ========================================================================
    /// Compares the top of stack against zero (`Int`) or null (`Reference`).
    If {
        /// Condition
        cond: IfCond,
        /// `Int` or `Reference`
        kind: ValueKind,
        /// Branch target
        target: Label,
    },
    /// Compares the two topmost values.
    IfCmp {
        /// Condition
        cond: IfCond,
        /// `Int` or `Reference`
        kind: ValueKind,
        /// Branch target
        target: Label,
    },
    /// Unconditional jump.
    Goto(Label),
    /// `tableswitch` / `lookupswitch`; `keys` and `targets` are parallel.
    Switch {
        /// Target when no key matches
        default: Label,
        /// Case keys, ascending
        keys: Vec<i32>,
        /// Case targets
        targets: Vec<Label>,
    },
    /// Return, `None` for `void`.
    Return(Option<ValueKind>),
    /// `athrow`
    Throw,

    // ========================================================================
    // Members
    // ========================================================================
    /// Method invocation.
    Invoke {
        /// Invoke kind
        kind: InvokeKind,
        /// Symbolic target
        method: MethodRef,
        /// Whether the target holder is an interface (`InterfaceMethodref`)
        interface: bool,
    },
    /// `invokedynamic`
    InvokeDynamic(CallSite),
    /// `getstatic`
    StaticGet(FieldRef),
    /// `putstatic`
    StaticPut(FieldRef),
    /// `getfield`
    InstanceGet(FieldRef),
    /// `putfield`
    InstancePut(FieldRef),

    // ========================================================================
    // Objects and arrays
    // ========================================================================
    /// `new`
    New(TypeRef),
    /// `newarray` / `anewarray`; carries the array type.
    NewArray(TypeRef),
    /// `multianewarray`
    MultiNewArray {
        /// Array type
        ty: TypeRef,
        /// Dimensions to allocate
        dimensions: u8,
    },
    /// Array element load.
    ArrayLoad(ArrayKind),
    /// Array element store.
    ArrayStore(ArrayKind),
    /// `arraylength`
    ArrayLength,
    /// `checkcast`
    CheckCast(TypeRef),
    /// A `checkcast` proven to succeed; encoded as `checkcast`, never throws.
    SafeCheckCast(TypeRef),
    /// `instanceof`
    InstanceOf(TypeRef),
    /// `monitorenter`
    MonitorEnter,
    /// `monitorexit`
    MonitorExit,
    /// Triggers static initialization of the field's holder by reading the field.
    InitClass(FieldRef),
}

impl CfInstruction {
    /// Returns `true` if executing the instruction may raise an exception.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        match self {
            CfInstruction::Arith { op, ty } => op.can_throw(*ty),
            CfInstruction::Const(value) => matches!(
                value,
                ConstValue::Class(_) | ConstValue::MethodType(_) | ConstValue::MethodHandle(_)
            ),
            CfInstruction::Invoke { .. }
            | CfInstruction::InvokeDynamic(_)
            | CfInstruction::StaticGet(_)
            | CfInstruction::StaticPut(_)
            | CfInstruction::InstanceGet(_)
            | CfInstruction::InstancePut(_)
            | CfInstruction::New(_)
            | CfInstruction::NewArray(_)
            | CfInstruction::MultiNewArray { .. }
            | CfInstruction::ArrayLoad(_)
            | CfInstruction::ArrayStore(_)
            | CfInstruction::ArrayLength
            | CfInstruction::CheckCast(_)
            | CfInstruction::MonitorEnter
            | CfInstruction::MonitorExit
            | CfInstruction::Throw
            | CfInstruction::InitClass(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if control never continues with the next instruction.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            CfInstruction::Goto(_)
                | CfInstruction::Switch { .. }
                | CfInstruction::Return(_)
                | CfInstruction::Throw
        )
    }

    /// Returns `true` for instructions that end a basic block.
    #[must_use]
    pub fn ends_block(&self) -> bool {
        self.is_terminator()
            || matches!(self, CfInstruction::If { .. } | CfInstruction::IfCmp { .. })
    }

    /// Explicit jump targets.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<Label> {
        match self {
            CfInstruction::If { target, .. }
            | CfInstruction::IfCmp { target, .. }
            | CfInstruction::Goto(target) => vec![*target],
            CfInstruction::Switch {
                default, targets, ..
            } => {
                let mut all = Vec::with_capacity(targets.len() + 1);
                all.extend_from_slice(targets);
                all.push(*default);
                all
            }
            _ => Vec::new(),
        }
    }

    /// Returns `true` if the instruction turns into an IR instruction. Labels, frames,
    /// local loads/stores and stack shuffling only move values around.
    #[must_use]
    pub fn emits_ir(&self) -> bool {
        !matches!(
            self,
            CfInstruction::Label(_)
                | CfInstruction::Frame(_)
                | CfInstruction::Nop
                | CfInstruction::Load { .. }
                | CfInstruction::Store { .. }
                | CfInstruction::Stack(_)
        )
    }

    /// Operand stack slots popped and pushed.
    #[must_use]
    pub fn slot_effect(&self) -> (u16, u16) {
        fn slots(kind: ValueKind) -> u16 {
            kind.slots() as u16
        }
        fn args_slots(method: &MethodRef) -> u16 {
            method.proto.parameter_slots() as u16
        }
        match self {
            CfInstruction::Label(_) | CfInstruction::Frame(_) | CfInstruction::Nop => (0, 0),
            CfInstruction::Iinc { .. } | CfInstruction::Goto(_) => (0, 0),
            CfInstruction::Const(value) => (0, if value.is_wide() { 2 } else { 1 }),
            CfInstruction::Load { kind, .. } => (0, slots(*kind)),
            CfInstruction::Store { kind, .. } => (slots(*kind), 0),
            CfInstruction::Stack(op) => op.slot_effect(),
            CfInstruction::Arith { op, ty } => {
                let width = slots(ty.kind());
                let right = if op.is_shift() { 1 } else { width };
                (width + right, width)
            }
            CfInstruction::Neg(ty) => (slots(ty.kind()), slots(ty.kind())),
            CfInstruction::Convert { from, to } => (slots(from.kind()), slots(to.kind())),
            CfInstruction::Cmp(kind) => (2 * slots(kind.operand_kind()), 1),
            CfInstruction::If { .. } => (1, 0),
            CfInstruction::IfCmp { .. } => (2, 0),
            CfInstruction::Switch { .. } => (1, 0),
            CfInstruction::Return(kind) => (kind.map_or(0, slots), 0),
            CfInstruction::Throw => (1, 0),
            CfInstruction::Invoke { kind, method, .. } => {
                let receiver = u16::from(*kind != InvokeKind::Static);
                (
                    args_slots(method) + receiver,
                    slots(method.proto.return_type().kind()),
                )
            }
            CfInstruction::InvokeDynamic(call_site) => (
                call_site.proto.parameter_slots() as u16,
                slots(call_site.proto.return_type().kind()),
            ),
            CfInstruction::StaticGet(field) => (0, slots(field.ty.kind())),
            CfInstruction::StaticPut(field) => (slots(field.ty.kind()), 0),
            CfInstruction::InstanceGet(field) => (1, slots(field.ty.kind())),
            CfInstruction::InstancePut(field) => (1 + slots(field.ty.kind()), 0),
            CfInstruction::New(_) => (0, 1),
            CfInstruction::NewArray(_) => (1, 1),
            CfInstruction::MultiNewArray { dimensions, .. } => (u16::from(*dimensions), 1),
            CfInstruction::ArrayLoad(kind) => (2, slots(kind.value_kind())),
            CfInstruction::ArrayStore(kind) => (2 + slots(kind.value_kind()), 0),
            CfInstruction::ArrayLength => (1, 1),
            CfInstruction::CheckCast(_) | CfInstruction::SafeCheckCast(_) => (1, 1),
            CfInstruction::InstanceOf(_) => (1, 1),
            CfInstruction::MonitorEnter | CfInstruction::MonitorExit => (1, 0),
            CfInstruction::InitClass(_) => (0, 0),
        }
    }

    /// Reports the symbolic references of this instruction.
    ///
    /// # Arguments
    ///
    /// * `registry` - Receiver of the references
    /// * `context` - Holder of the method containing the instruction; `invokespecial` to a
    ///   method of the same holder is a direct call, otherwise a super call
    pub fn register_references(&self, registry: &mut dyn UseRegistry, context: &TypeRef) {
        match self {
            CfInstruction::Const(value) => match value {
                ConstValue::Class(ty) => registry.register_const_class(ty),
                ConstValue::MethodType(proto) => {
                    registry.register_type_reference(proto.return_type());
                    for param in proto.parameters() {
                        registry.register_type_reference(param);
                    }
                }
                ConstValue::MethodHandle(handle) => registry.register_method_handle(handle),
                _ => {}
            },
            CfInstruction::Invoke { kind, method, .. } => match kind {
                InvokeKind::Virtual => registry.register_invoke_virtual(method),
                InvokeKind::Static => registry.register_invoke_static(method),
                InvokeKind::Interface => registry.register_invoke_interface(method),
                InvokeKind::Special => {
                    if method.is_instance_initializer() || method.holder == *context {
                        registry.register_invoke_direct(method);
                    } else {
                        registry.register_invoke_super(method);
                    }
                }
            },
            CfInstruction::InvokeDynamic(call_site) => registry.register_call_site(call_site),
            CfInstruction::StaticGet(field) => registry.register_static_field_read(field),
            CfInstruction::StaticPut(field) => registry.register_static_field_write(field),
            CfInstruction::InstanceGet(field) => registry.register_instance_field_read(field),
            CfInstruction::InstancePut(field) => registry.register_instance_field_write(field),
            CfInstruction::New(ty) => registry.register_new_instance(ty),
            CfInstruction::NewArray(ty) | CfInstruction::MultiNewArray { ty, .. } => {
                registry.register_type_reference(ty);
            }
            CfInstruction::CheckCast(ty) => registry.register_check_cast(ty),
            CfInstruction::SafeCheckCast(ty) => registry.register_safe_check_cast(ty),
            CfInstruction::InstanceOf(ty) => registry.register_instance_of(ty),
            CfInstruction::InitClass(field) => registry.register_init_class(&field.holder),
            _ => {}
        }
    }

    /// The inlining constraint this instruction imposes when its method is inlined into
    /// another class.
    #[must_use]
    pub fn inlining_constraint(
        &self,
        constraints: &InliningConstraints<'_>,
        context: &TypeRef,
    ) -> InliningConstraint {
        match self {
            CfInstruction::Const(ConstValue::Class(ty)) => constraints.for_type(ty),
            CfInstruction::Const(ConstValue::MethodHandle(_) | ConstValue::MethodType(_)) => {
                constraints.for_method_handle()
            }
            CfInstruction::Invoke { kind, method, .. } => match kind {
                InvokeKind::Special
                    if !method.is_instance_initializer() && method.holder != *context =>
                {
                    constraints.for_invoke_super()
                }
                _ => constraints.for_invoke(method),
            },
            CfInstruction::InvokeDynamic(_) => constraints.for_invoke_custom(),
            CfInstruction::StaticGet(field)
            | CfInstruction::StaticPut(field)
            | CfInstruction::InstanceGet(field)
            | CfInstruction::InstancePut(field) => constraints.for_field(field),
            CfInstruction::InitClass(field) => constraints.for_type(&field.holder),
            CfInstruction::New(ty)
            | CfInstruction::NewArray(ty)
            | CfInstruction::MultiNewArray { ty, .. }
            | CfInstruction::CheckCast(ty)
            | CfInstruction::SafeCheckCast(ty)
            | CfInstruction::InstanceOf(ty) => constraints.for_type(ty),
            CfInstruction::MonitorEnter | CfInstruction::MonitorExit => constraints.for_monitor(),
            _ => InliningConstraint::Always,
        }
    }

    /// Encodes the instruction.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not fit its encoding or the writer fails.
    pub fn encode(&self, writer: &mut dyn CodeWriter) -> Result<()> {
        match self {
            CfInstruction::Label(label) => writer.bind_label(*label),
            CfInstruction::Frame(frame) => writer.frame(frame),
            CfInstruction::Nop => writer.opcode(0x00),
            CfInstruction::Const(value) => encode_const(value, writer),
            CfInstruction::Load { kind, local } => encode_local(*kind, *local, 0x15, 0x1a, writer),
            CfInstruction::Store { kind, local } => {
                encode_local(*kind, *local, 0x36, 0x3b, writer)
            }
            CfInstruction::Iinc { local, increment } => {
                match (u8::try_from(*local), i8::try_from(*increment)) {
                    (Ok(local), Ok(increment)) => {
                        writer.opcode(0x84)?;
                        writer.u8(local)?;
                        writer.u8(increment as u8)
                    }
                    _ => {
                        writer.opcode(0xc4)?;
                        writer.opcode(0x84)?;
                        writer.u16(*local)?;
                        writer.u16(*increment as u16)
                    }
                }
            }
            CfInstruction::Stack(op) => writer.opcode(op.opcode()),
            CfInstruction::Arith { op, ty } => writer.opcode(op.opcode(*ty)),
            CfInstruction::Neg(ty) => writer.opcode(0x74 + ty.index()),
            CfInstruction::Convert { from, to } => writer.opcode(conversion_opcode(*from, *to)?),
            CfInstruction::Cmp(kind) => writer.opcode(match kind {
                CmpKind::Long => 0x94,
                CmpKind::FloatL => 0x95,
                CmpKind::FloatG => 0x96,
                CmpKind::DoubleL => 0x97,
                CmpKind::DoubleG => 0x98,
            }),
            CfInstruction::If { cond, kind, target } => {
                let opcode = match (kind, cond) {
                    (ValueKind::Reference, IfCond::Eq) => 0xc6,
                    (ValueKind::Reference, IfCond::Ne) => 0xc7,
                    (ValueKind::Int, cond) => 0x99 + cond.offset(),
                    _ => {
                        return Err(malformed_error!("Invalid if{} on {}", cond, kind));
                    }
                };
                writer.opcode(opcode)?;
                writer.branch(*target)
            }
            CfInstruction::IfCmp { cond, kind, target } => {
                let opcode = match (kind, cond) {
                    (ValueKind::Reference, IfCond::Eq) => 0xa5,
                    (ValueKind::Reference, IfCond::Ne) => 0xa6,
                    (ValueKind::Int, cond) => 0x9f + cond.offset(),
                    _ => {
                        return Err(malformed_error!("Invalid if_cmp{} on {}", cond, kind));
                    }
                };
                writer.opcode(opcode)?;
                writer.branch(*target)
            }
            CfInstruction::Goto(target) => {
                writer.opcode(0xa7)?;
                writer.branch(*target)
            }
            CfInstruction::Switch {
                default,
                keys,
                targets,
            } => writer.switch(*default, keys, targets),
            CfInstruction::Return(kind) => writer.opcode(match kind {
                None => 0xb1,
                Some(ValueKind::Int) => 0xac,
                Some(ValueKind::Long) => 0xad,
                Some(ValueKind::Float) => 0xae,
                Some(ValueKind::Double) => 0xaf,
                Some(ValueKind::Reference) => 0xb0,
                Some(ValueKind::Void) => return Err(malformed_error!("Return of kind void")),
            }),
            CfInstruction::Throw => writer.opcode(0xbf),
            CfInstruction::Invoke {
                kind,
                method,
                interface,
            } => {
                let index = writer.method_constant(method, *interface)?;
                match kind {
                    InvokeKind::Virtual => writer.opcode(0xb6)?,
                    InvokeKind::Special => writer.opcode(0xb7)?,
                    InvokeKind::Static => writer.opcode(0xb8)?,
                    InvokeKind::Interface => writer.opcode(0xb9)?,
                }
                writer.u16(index)?;
                if *kind == InvokeKind::Interface {
                    let count = u8::try_from(method.proto.parameter_slots() + 1)
                        .map_err(|_| malformed_error!("Too many arguments for {:?}", method))?;
                    writer.u8(count)?;
                    writer.u8(0)?;
                }
                Ok(())
            }
            CfInstruction::InvokeDynamic(call_site) => {
                let index = writer.call_site_constant(call_site)?;
                writer.opcode(0xba)?;
                writer.u16(index)?;
                writer.u16(0)
            }
            CfInstruction::StaticGet(field) => encode_field(0xb2, field, writer),
            CfInstruction::StaticPut(field) => encode_field(0xb3, field, writer),
            CfInstruction::InstanceGet(field) => encode_field(0xb4, field, writer),
            CfInstruction::InstancePut(field) => encode_field(0xb5, field, writer),
            CfInstruction::InitClass(field) => {
                encode_field(0xb2, field, writer)?;
                writer.opcode(if field.ty.kind().is_wide() { 0x58 } else { 0x57 })
            }
            CfInstruction::New(ty) => encode_type(0xbb, ty, writer),
            CfInstruction::NewArray(ty) => {
                let Some(element) = ty.element_type() else {
                    return Err(malformed_error!("newarray of non-array type {:?}", ty));
                };
                if element.is_primitive() {
                    let atype = match element.descriptor() {
                        "Z" => 4,
                        "C" => 5,
                        "F" => 6,
                        "D" => 7,
                        "B" => 8,
                        "S" => 9,
                        "I" => 10,
                        _ => 11,
                    };
                    writer.opcode(0xbc)?;
                    writer.u8(atype)
                } else {
                    encode_type(0xbd, &element, writer)
                }
            }
            CfInstruction::MultiNewArray { ty, dimensions } => {
                encode_type(0xc5, ty, writer)?;
                writer.u8(*dimensions)
            }
            CfInstruction::ArrayLoad(kind) => writer.opcode(0x2e + kind.offset()),
            CfInstruction::ArrayStore(kind) => writer.opcode(0x4f + kind.offset()),
            CfInstruction::ArrayLength => writer.opcode(0xbe),
            CfInstruction::CheckCast(ty) | CfInstruction::SafeCheckCast(ty) => {
                encode_type(0xc0, ty, writer)
            }
            CfInstruction::InstanceOf(ty) => encode_type(0xc1, ty, writer),
            CfInstruction::MonitorEnter => writer.opcode(0xc2),
            CfInstruction::MonitorExit => writer.opcode(0xc3),
        }
    }
}

fn encode_const(value: &ConstValue, writer: &mut dyn CodeWriter) -> Result<()> {
    match value {
        ConstValue::Null => writer.opcode(0x01),
        ConstValue::Int(v @ -1..=5) => writer.opcode((0x03 + *v) as u8),
        ConstValue::Int(v) if i8::try_from(*v).is_ok() => {
            writer.opcode(0x10)?;
            writer.u8(*v as i8 as u8)
        }
        ConstValue::Int(v) if i16::try_from(*v).is_ok() => {
            writer.opcode(0x11)?;
            writer.u16(*v as i16 as u16)
        }
        ConstValue::Long(v @ 0..=1) => writer.opcode(0x09 + *v as u8),
        ConstValue::Float(bits) if *bits == 0.0f32.to_bits() => writer.opcode(0x0b),
        ConstValue::Float(bits) if *bits == 1.0f32.to_bits() => writer.opcode(0x0c),
        ConstValue::Float(bits) if *bits == 2.0f32.to_bits() => writer.opcode(0x0d),
        ConstValue::Double(bits) if *bits == 0.0f64.to_bits() => writer.opcode(0x0e),
        ConstValue::Double(bits) if *bits == 1.0f64.to_bits() => writer.opcode(0x0f),
        ConstValue::Long(_) | ConstValue::Double(_) => {
            let index = writer.constant(value)?;
            writer.opcode(0x14)?;
            writer.u16(index)
        }
        _ => {
            let index = writer.constant(value)?;
            match u8::try_from(index) {
                Ok(short) => {
                    writer.opcode(0x12)?;
                    writer.u8(short)
                }
                Err(_) => {
                    writer.opcode(0x13)?;
                    writer.u16(index)
                }
            }
        }
    }
}

fn encode_local(
    kind: ValueKind,
    local: u16,
    base: u8,
    short_base: u8,
    writer: &mut dyn CodeWriter,
) -> Result<()> {
    let offset = match kind {
        ValueKind::Int => 0,
        ValueKind::Long => 1,
        ValueKind::Float => 2,
        ValueKind::Double => 3,
        ValueKind::Reference => 4,
        ValueKind::Void => return Err(malformed_error!("Local of kind void")),
    };
    match u8::try_from(local) {
        Ok(index @ 0..=3) => writer.opcode(short_base + offset * 4 + index),
        Ok(index) => {
            writer.opcode(base + offset)?;
            writer.u8(index)
        }
        Err(_) => {
            writer.opcode(0xc4)?;
            writer.opcode(base + offset)?;
            writer.u16(local)
        }
    }
}

fn encode_field(opcode: u8, field: &FieldRef, writer: &mut dyn CodeWriter) -> Result<()> {
    let index = writer.field_constant(field)?;
    writer.opcode(opcode)?;
    writer.u16(index)
}

fn encode_type(opcode: u8, ty: &TypeRef, writer: &mut dyn CodeWriter) -> Result<()> {
    let index = writer.class_constant(ty)?;
    writer.opcode(opcode)?;
    writer.u16(index)
}

fn conversion_opcode(from: NumericType, to: NumericType) -> Result<u8> {
    use NumericType::{Byte, Char, Double, Float, Int, Long, Short};
    Ok(match (from, to) {
        (Int, Long) => 0x85,
        (Int, Float) => 0x86,
        (Int, Double) => 0x87,
        (Long, Int) => 0x88,
        (Long, Float) => 0x89,
        (Long, Double) => 0x8a,
        (Float, Int) => 0x8b,
        (Float, Long) => 0x8c,
        (Float, Double) => 0x8d,
        (Double, Int) => 0x8e,
        (Double, Long) => 0x8f,
        (Double, Float) => 0x90,
        (Int, Byte) => 0x91,
        (Int, Char) => 0x92,
        (Int, Short) => 0x93,
        _ => return Err(malformed_error!("Invalid conversion {} to {}", from, to)),
    })
}

impl fmt::Display for CfInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CfInstruction::Label(label) => write!(f, "{label}:"),
            CfInstruction::Frame(frame) => write!(f, "frame {frame}"),
            CfInstruction::Nop => f.write_str("nop"),
            CfInstruction::Const(value) => write!(f, "const {value}"),
            CfInstruction::Load { kind, local } => write!(f, "load {kind} {local}"),
            CfInstruction::Store { kind, local } => write!(f, "store {kind} {local}"),
            CfInstruction::Iinc { local, increment } => write!(f, "iinc {local} {increment}"),
            CfInstruction::Stack(op) => write!(f, "{op}"),
            CfInstruction::Arith { op, ty } => write!(f, "{op} {ty}"),
            CfInstruction::Neg(ty) => write!(f, "neg {ty}"),
            CfInstruction::Convert { from, to } => write!(f, "convert {from} -> {to}"),
            CfInstruction::Cmp(kind) => write!(f, "cmp {kind}"),
            CfInstruction::If { cond, kind, target } => write!(f, "if{cond} {kind} {target}"),
            CfInstruction::IfCmp { cond, kind, target } => {
                write!(f, "if_cmp{cond} {kind} {target}")
            }
            CfInstruction::Goto(target) => write!(f, "goto {target}"),
            CfInstruction::Switch {
                default,
                keys,
                targets,
            } => {
                f.write_str("switch {")?;
                for (key, target) in keys.iter().zip(targets) {
                    write!(f, " {key}: {target},")?;
                }
                write!(f, " default: {default} }}")
            }
            CfInstruction::Return(None) => f.write_str("return"),
            CfInstruction::Return(Some(kind)) => write!(f, "return {kind}"),
            CfInstruction::Throw => f.write_str("throw"),
            CfInstruction::Invoke { kind, method, .. } => write!(f, "invoke-{kind} {method:?}"),
            CfInstruction::InvokeDynamic(call_site) => {
                write!(f, "invokedynamic {}{:?}", call_site.name, call_site.proto)
            }
            CfInstruction::StaticGet(field) => write!(f, "getstatic {field:?}"),
            CfInstruction::StaticPut(field) => write!(f, "putstatic {field:?}"),
            CfInstruction::InstanceGet(field) => write!(f, "getfield {field:?}"),
            CfInstruction::InstancePut(field) => write!(f, "putfield {field:?}"),
            CfInstruction::New(ty) => write!(f, "new {ty:?}"),
            CfInstruction::NewArray(ty) => write!(f, "newarray {ty:?}"),
            CfInstruction::MultiNewArray { ty, dimensions } => {
                write!(f, "multianewarray {ty:?} {dimensions}")
            }
            CfInstruction::ArrayLoad(kind) => write!(f, "arrayload {kind}"),
            CfInstruction::ArrayStore(kind) => write!(f, "arraystore {kind}"),
            CfInstruction::ArrayLength => f.write_str("arraylength"),
            CfInstruction::CheckCast(ty) => write!(f, "checkcast {ty:?}"),
            CfInstruction::SafeCheckCast(ty) => write!(f, "safe-checkcast {ty:?}"),
            CfInstruction::InstanceOf(ty) => write!(f, "instanceof {ty:?}"),
            CfInstruction::MonitorEnter => f.write_str("monitorenter"),
            CfInstruction::MonitorExit => f.write_str("monitorexit"),
            CfInstruction::InitClass(field) => write!(f, "init-class {:?}", field.holder),
        }
    }
}

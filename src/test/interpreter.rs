//! A small IR interpreter for checking the behaviour of generated code.
//!
//! Only what unit tests need: integer and reference values, arithmetic, branches, switches,
//! returns, throws with handler lookup, and invokes that are recorded instead of executed.
//! Invokes return the zero value of their return type.

use std::collections::HashMap;

use crate::{
    code::{
        instruction::{ArithOp, IfCond, NumericType},
        ConstValue,
    },
    ir::{
        block::BlockId,
        code::IrCode,
        instruction::IrOp,
        value::ValueId,
    },
    program::{
        descriptor::ValueKind,
        references::{MethodRef, TypeRef},
    },
};

/// A runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    /// `int` or `long`
    Int(i64),
    /// `float` or `double`
    Float(f64),
    /// `null`
    Null,
    /// A string constant
    Str(String),
    /// An object with an identity and a class
    Object(u32, TypeRef),
}

/// How the interpreted method completed.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Normal completion
    Returned(Option<RuntimeValue>),
    /// Abrupt completion with an exception of this type
    Threw(TypeRef),
}

/// Interprets one [`IrCode`].
pub struct Interpreter<'a> {
    code: &'a IrCode,
    values: HashMap<ValueId, RuntimeValue>,
    invocations: Vec<(MethodRef, Vec<RuntimeValue>)>,
    next_object: u32,
    step_limit: usize,
}

fn npe() -> TypeRef {
    TypeRef::class("java/lang/NullPointerException")
}

fn is_caught_by(thrown: &TypeRef, guard: &TypeRef) -> bool {
    if thrown == guard {
        return true;
    }
    let runtime = thrown == &npe()
        || thrown == &TypeRef::class("java/lang/ArithmeticException");
    runtime
        && ["java/lang/RuntimeException", "java/lang/Exception", "java/lang/Throwable"]
            .contains(&guard.internal_name())
}

impl<'a> Interpreter<'a> {
    /// An interpreter for `code`.
    pub fn new(code: &'a IrCode) -> Self {
        Interpreter {
            code,
            values: HashMap::new(),
            invocations: Vec::new(),
            next_object: 1000,
            step_limit: 10_000,
        }
    }

    /// Invokes recorded so far: target and arguments.
    pub fn invocations(&self) -> &[(MethodRef, Vec<RuntimeValue>)] {
        &self.invocations
    }

    /// Runs the method with `arguments` (receiver first).
    pub fn run(&mut self, arguments: Vec<RuntimeValue>) -> Outcome {
        let code = self.code;
        let mut block = code.entry();
        let mut previous: Option<BlockId> = None;
        let mut pending_exception: Option<TypeRef> = None;
        let mut steps = 0;

        loop {
            let current = code
                .block(block)
                .unwrap_or_else(|| panic!("missing block {block}"));
            if let Some(previous) = previous {
                let index = current
                    .predecessor_index(previous)
                    .unwrap_or_else(|| panic!("{previous} is not a predecessor of {block}"));
                let incoming: Vec<(ValueId, RuntimeValue)> = current
                    .phis
                    .iter()
                    .map(|phi| (phi.out, self.get(phi.operands[index])))
                    .collect();
                self.values.extend(incoming);
            }

            let mut next = None;
            for instruction in &current.instructions {
                steps += 1;
                assert!(steps < self.step_limit, "step limit exceeded");
                match self.execute(&instruction.op, &arguments, pending_exception.take()) {
                    Step::Value(value) => {
                        if let Some(out) = instruction.out {
                            self.values.insert(out, value);
                        }
                    }
                    Step::Continue => {}
                    Step::Jump(target) => {
                        next = Some(target);
                        break;
                    }
                    Step::Return(value) => return Outcome::Returned(value),
                    Step::Throw(ty) => {
                        let handler = current
                            .handlers
                            .iter()
                            .find(|h| h.guard.as_ref().map_or(true, |g| is_caught_by(&ty, g)));
                        match handler {
                            Some(handler) => {
                                pending_exception = Some(ty);
                                next = Some(handler.target);
                                break;
                            }
                            None => return Outcome::Threw(ty),
                        }
                    }
                }
            }
            let target = next.unwrap_or_else(|| panic!("{block} has no terminator"));
            previous = Some(block);
            block = target;
        }
    }

    fn get(&self, value: ValueId) -> RuntimeValue {
        self.values
            .get(&value)
            .cloned()
            .unwrap_or_else(|| panic!("{value} read before definition"))
    }

    fn int(&self, value: ValueId) -> i64 {
        match self.get(value) {
            RuntimeValue::Int(v) => v,
            other => panic!("{value} is not an integer: {other:?}"),
        }
    }

    fn execute(
        &mut self,
        op: &IrOp,
        arguments: &[RuntimeValue],
        exception: Option<TypeRef>,
    ) -> Step {
        match op {
            IrOp::Argument(index) => Step::Value(arguments[usize::from(*index)].clone()),
            IrOp::Const(constant) => Step::Value(match constant {
                ConstValue::Null => RuntimeValue::Null,
                ConstValue::Int(v) => RuntimeValue::Int(i64::from(*v)),
                ConstValue::Long(v) => RuntimeValue::Int(*v),
                ConstValue::Float(bits) => RuntimeValue::Float(f64::from(f32::from_bits(*bits))),
                ConstValue::Double(bits) => RuntimeValue::Float(f64::from_bits(*bits)),
                ConstValue::String(s) => RuntimeValue::Str(s.as_str().to_string()),
                other => RuntimeValue::Str(other.to_string()),
            }),
            IrOp::MoveException(ty) => {
                let ty = exception.unwrap_or_else(|| ty.clone());
                Step::Value(self.allocate(ty))
            }
            IrOp::Arith { op, ty, left, right } => self.arith(*op, *ty, *left, *right),
            IrOp::Neg { value, .. } => match self.get(*value) {
                RuntimeValue::Int(v) => Step::Value(RuntimeValue::Int(v.wrapping_neg())),
                RuntimeValue::Float(v) => Step::Value(RuntimeValue::Float(-v)),
                other => panic!("cannot negate {other:?}"),
            },
            IrOp::Goto(target) => Step::Jump(*target),
            IrOp::If {
                cond,
                kind,
                left,
                right,
                target,
                fallthrough,
            } => {
                let holds = if *kind == ValueKind::Reference {
                    let l = self.get(*left);
                    let r = right.map_or(RuntimeValue::Null, |r| self.get(r));
                    match cond {
                        IfCond::Eq => l == r,
                        IfCond::Ne => l != r,
                        other => panic!("reference comparison {other}"),
                    }
                } else {
                    let r = right.map_or(0, |r| self.int(r));
                    cond.holds(self.int(*left), r)
                };
                Step::Jump(if holds { *target } else { *fallthrough })
            }
            IrOp::Switch {
                value,
                keys,
                targets,
                default,
            } => {
                let key = self.int(*value);
                let target = keys
                    .iter()
                    .position(|k| i64::from(*k) == key)
                    .map_or(*default, |i| targets[i]);
                Step::Jump(target)
            }
            IrOp::Return(value) => Step::Return(value.map(|v| self.get(v))),
            IrOp::Throw(value) => match self.get(*value) {
                RuntimeValue::Null => Step::Throw(npe()),
                RuntimeValue::Object(_, ty) => Step::Throw(ty),
                other => panic!("cannot throw {other:?}"),
            },
            IrOp::Invoke {
                kind,
                method,
                arguments,
                ..
            } => {
                let values: Vec<RuntimeValue> = arguments.iter().map(|a| self.get(*a)).collect();
                let has_receiver = *kind != crate::code::instruction::InvokeKind::Static;
                if has_receiver && values.first() == Some(&RuntimeValue::Null) {
                    return Step::Throw(npe());
                }
                self.invocations.push((method.clone(), values));
                Step::Value(zero_of(method.proto.return_type()))
            }
            IrOp::NewInstance(ty) => Step::Value(self.allocate(ty.clone())),
            IrOp::InstanceGet { field, object } => {
                if self.get(*object) == RuntimeValue::Null {
                    return Step::Throw(npe());
                }
                Step::Value(zero_of(&field.ty))
            }
            IrOp::InstancePut { object, .. } | IrOp::ArrayLength(object) => {
                if self.get(*object) == RuntimeValue::Null {
                    return Step::Throw(npe());
                }
                Step::Value(RuntimeValue::Int(0))
            }
            IrOp::StaticGet(field) => Step::Value(zero_of(&field.ty)),
            IrOp::StaticPut { .. } | IrOp::InitClass(_) => Step::Continue,
            IrOp::CheckCast { value, .. } | IrOp::SafeCheckCast { value, .. } => {
                Step::Value(self.get(*value))
            }
            other => panic!("interpreter does not support {other:?}"),
        }
    }

    fn arith(&mut self, op: ArithOp, ty: NumericType, left: ValueId, right: ValueId) -> Step {
        let l = self.get(left);
        let r = self.get(right);
        match (l, r) {
            (RuntimeValue::Int(l), RuntimeValue::Int(r)) => {
                if matches!(op, ArithOp::Div | ArithOp::Rem) && r == 0 {
                    return Step::Throw(TypeRef::class("java/lang/ArithmeticException"));
                }
                let wide = ty == NumericType::Long;
                let shift_mask = if wide { 63 } else { 31 };
                let result = match op {
                    ArithOp::Add => l.wrapping_add(r),
                    ArithOp::Sub => l.wrapping_sub(r),
                    ArithOp::Mul => l.wrapping_mul(r),
                    ArithOp::Div => l.wrapping_div(r),
                    ArithOp::Rem => l.wrapping_rem(r),
                    ArithOp::Shl => l << (r & shift_mask),
                    ArithOp::Shr => l >> (r & shift_mask),
                    ArithOp::Ushr if wide => ((l as u64) >> (r & shift_mask)) as i64,
                    ArithOp::Ushr => i64::from((l as u32) >> (r & shift_mask)),
                    ArithOp::And => l & r,
                    ArithOp::Or => l | r,
                    ArithOp::Xor => l ^ r,
                };
                let result = if wide { result } else { i64::from(result as i32) };
                Step::Value(RuntimeValue::Int(result))
            }
            (RuntimeValue::Float(l), RuntimeValue::Float(r)) => Step::Value(RuntimeValue::Float(
                match op {
                    ArithOp::Add => l + r,
                    ArithOp::Sub => l - r,
                    ArithOp::Mul => l * r,
                    ArithOp::Div => l / r,
                    ArithOp::Rem => l % r,
                    other => panic!("{other:?} on floating point"),
                },
            )),
            (l, r) => panic!("arithmetic on {l:?} and {r:?}"),
        }
    }

    fn allocate(&mut self, ty: TypeRef) -> RuntimeValue {
        self.next_object += 1;
        RuntimeValue::Object(self.next_object, ty)
    }
}

enum Step {
    Value(RuntimeValue),
    Continue,
    Jump(BlockId),
    Return(Option<RuntimeValue>),
    Throw(TypeRef),
}

fn zero_of(ty: &TypeRef) -> RuntimeValue {
    match ty.kind() {
        ValueKind::Int | ValueKind::Long => RuntimeValue::Int(0),
        ValueKind::Float | ValueKind::Double => RuntimeValue::Float(0.0),
        ValueKind::Reference | ValueKind::Void => RuntimeValue::Null,
    }
}

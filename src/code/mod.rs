//! Stack-machine method bodies.
//!
//! [`CfCode`] is a method body as it appears in a class file: a list of
//! [`CfInstruction`]s with symbolic [`Label`]s in place of offsets, plus the try-catch ranges
//! and the local variable table. It is the input of the IR builder and the output of the IR
//! emitter; the [`writer`] turns it into bytes.
//!
//! Besides carrying instructions, `CfCode` answers the questions the shrinker asks of a body
//! without building IR:
//!
//! - [`CfCode::register_references`] - feeds every symbolic use to a [`UseRegistry`]
//! - [`CfCode::compute_inlining_constraint`] - how far the body may travel when inlined
//! - [`CfCode::estimated_size_for_inlining`] - the inliner's size estimate
//! - [`CfCode::collect_parameter_info`] / [`CfCode::argument_uses`] - argument facts

pub mod constant;
pub mod frame;
pub mod instruction;
pub mod writer;

pub use constant::{CallSite, ConstValue, HandleMember, MethodHandleKind, MethodHandleRef};
pub use frame::{CfFrame, FrameType};
pub use instruction::CfInstruction;

use std::{collections::BTreeMap, fmt};

use crate::{
    optimize::inliner::{InliningConstraint, InliningConstraints},
    program::{
        references::{Name, TypeRef},
        MethodDef,
    },
    shaking::UseRegistry,
    utils::BitSet,
};

/// A symbolic code position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// A try-catch range: instructions between `start` and `end` are guarded by the handlers,
/// tried in order. A `None` guard catches everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfTryCatch {
    /// First guarded position
    pub start: Label,
    /// First position after the range
    pub end: Label,
    /// Caught types, `None` for catch-all
    pub guards: Vec<Option<TypeRef>>,
    /// Handler labels, parallel to `guards`
    pub targets: Vec<Label>,
}

/// An entry of the local variable table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableInfo {
    /// Local slot
    pub index: u16,
    /// Source name
    pub name: Name,
    /// Declared type
    pub ty: TypeRef,
    /// Generic signature
    pub signature: Option<Name>,
    /// Start of the live range
    pub start: Label,
    /// End of the live range (exclusive)
    pub end: Label,
}

/// A stack-machine method body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CfCode {
    /// Maximum operand stack depth in slots
    pub max_stack: u16,
    /// Number of local slots
    pub max_locals: u16,
    /// Instructions
    pub instructions: Vec<CfInstruction>,
    /// Exception table, innermost ranges first
    pub try_catch_ranges: Vec<CfTryCatch>,
    /// Local variable table
    pub local_variables: Vec<LocalVariableInfo>,
}

impl CfCode {
    /// Creates a body without exception handlers or debug info.
    #[must_use]
    pub fn new(max_stack: u16, max_locals: u16, instructions: Vec<CfInstruction>) -> Self {
        CfCode {
            max_stack,
            max_locals,
            instructions,
            try_catch_ranges: Vec::new(),
            local_variables: Vec::new(),
        }
    }

    /// Number of instructions that turn into IR.
    #[must_use]
    pub fn estimated_size_for_inlining(&self) -> usize {
        self.instructions.iter().filter(|i| i.emits_ir()).count()
    }

    /// Returns `true` if the body does nothing but return `void`.
    #[must_use]
    pub fn is_empty_void_method(&self) -> bool {
        self.instructions.iter().all(|instruction| {
            matches!(
                instruction,
                CfInstruction::Return(None)
                    | CfInstruction::Label(_)
                    | CfInstruction::Frame(_)
                    | CfInstruction::Nop
            )
        })
    }

    /// Local variable entries describing arguments: entries that start at the first label
    /// of the body and cover an argument slot. The first entry per slot wins.
    #[must_use]
    pub fn collect_parameter_info(&self, method: &MethodDef) -> BTreeMap<u16, &LocalVariableInfo> {
        let mut result = BTreeMap::new();
        let Some(CfInstruction::Label(first)) = self
            .instructions
            .iter()
            .find(|i| !matches!(i, CfInstruction::Frame(_)))
        else {
            return result;
        };
        let info = method.parameter_info();
        for local in &self.local_variables {
            if local.start == *first && info.argument_at_slot(local.index).is_some() {
                result.entry(local.index).or_insert(local);
            }
        }
        result
    }

    /// Arguments (by argument index, receiver included) that the body reads.
    #[must_use]
    pub fn argument_uses(&self, method: &MethodDef) -> BitSet {
        let info = method.parameter_info();
        let mut used = BitSet::new(info.argument_count());
        for instruction in &self.instructions {
            let slot = match instruction {
                CfInstruction::Load { local, .. } | CfInstruction::Iinc { local, .. } => *local,
                _ => continue,
            };
            if let Some(argument) = info.argument_at_slot(slot) {
                used.insert(argument);
            }
        }
        used
    }

    /// Reports every symbolic reference of the body, including the guard types of the
    /// exception table.
    ///
    /// A string constant pushed immediately before an invoke (labels and frames skipped) is
    /// also reported through [`UseRegistry::register_invoke_with_constant_string`].
    pub fn register_references(&self, registry: &mut dyn UseRegistry, context: &TypeRef) {
        let mut previous_string: Option<&Name> = None;
        for instruction in &self.instructions {
            if let CfInstruction::Invoke { method, .. } = instruction {
                if let Some(value) = previous_string {
                    registry.register_invoke_with_constant_string(method, value);
                }
            }
            instruction.register_references(registry, context);
            match instruction {
                CfInstruction::Label(_) | CfInstruction::Frame(_) => {}
                CfInstruction::Const(ConstValue::String(value)) => previous_string = Some(value),
                _ => previous_string = None,
            }
        }
        for range in &self.try_catch_ranges {
            for guard in range.guards.iter().flatten() {
                registry.register_exception_guard(guard);
            }
        }
    }

    /// Meet of the constraints of every instruction.
    ///
    /// A synchronized method starts from the monitor constraint, since inlining it has to
    /// reproduce the implicit monitor. A non-empty exception table adds the move-exception
    /// constraint. The meet stops early once it reaches [`InliningConstraint::Never`].
    #[must_use]
    pub fn compute_inlining_constraint(
        &self,
        method: &MethodDef,
        constraints: &InliningConstraints<'_>,
    ) -> InliningConstraint {
        let context = method.holder();
        let mut result = if method.access.is_synchronized() {
            constraints.for_monitor()
        } else {
            InliningConstraint::Always
        };
        for instruction in &self.instructions {
            if result.is_never() {
                return result;
            }
            let constraint = instruction.inlining_constraint(constraints, context);
            result = constraints.meet(&result, &constraint);
        }
        if !result.is_never() && !self.try_catch_ranges.is_empty() {
            result = constraints.meet(&result, &constraints.for_move_exception());
        }
        result
    }

    /// Recomputes `max_stack` by walking the instructions in order, assuming the stack is
    /// empty at handler entries except for the exception.
    #[must_use]
    pub fn compute_max_stack(&self) -> u16 {
        let mut depth: i32 = 0;
        let mut max: i32 = 0;
        let mut at_label: BTreeMap<Label, i32> = BTreeMap::new();
        for range in &self.try_catch_ranges {
            for target in &range.targets {
                at_label.insert(*target, 1);
            }
        }
        let mut reachable = true;
        for instruction in &self.instructions {
            if let CfInstruction::Label(label) = instruction {
                if let Some(known) = at_label.get(label) {
                    depth = *known;
                    reachable = true;
                }
                continue;
            }
            if !reachable {
                continue;
            }
            let (pops, pushes) = instruction.slot_effect();
            depth = depth - i32::from(pops) + i32::from(pushes);
            max = max.max(depth);
            for target in instruction.branch_targets() {
                at_label.entry(target).or_insert(depth);
            }
            if instruction.is_terminator() {
                reachable = false;
            }
        }
        max.clamp(0, i32::from(u16::MAX)) as u16
    }
}

impl fmt::Display for CfCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "max_stack: {}, max_locals: {}", self.max_stack, self.max_locals)?;
        for instruction in &self.instructions {
            match instruction {
                CfInstruction::Label(_) => writeln!(f, "{instruction}")?,
                _ => writeln!(f, "  {instruction}")?,
            }
        }
        for range in &self.try_catch_ranges {
            write!(f, "try {}..{}", range.start, range.end)?;
            for (guard, target) in range.guards.iter().zip(&range.targets) {
                match guard {
                    Some(ty) => write!(f, " catch {ty} -> {target}")?,
                    None => write!(f, " catch-all -> {target}")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::instruction::InvokeKind;
    use crate::program::{
        descriptor::ValueKind,
        flags::MethodAccessFlags,
        references::{MethodRef, TypeRef},
    };

    fn static_method(descriptor: &str, code: CfCode) -> MethodDef {
        MethodDef::new(
            MethodRef::parse("a/A", "m", descriptor).unwrap(),
            MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        )
        .with_code(code)
    }

    #[test]
    fn test_estimated_size_ignores_moves() {
        let code = CfCode::new(
            2,
            2,
            vec![
                CfInstruction::Label(Label(0)),
                CfInstruction::Load {
                    kind: ValueKind::Int,
                    local: 0,
                },
                CfInstruction::Load {
                    kind: ValueKind::Int,
                    local: 1,
                },
                CfInstruction::Arith {
                    op: instruction::ArithOp::Add,
                    ty: instruction::NumericType::Int,
                },
                CfInstruction::Return(Some(ValueKind::Int)),
            ],
        );
        assert_eq!(code.estimated_size_for_inlining(), 2);
        assert_eq!(code.compute_max_stack(), 2);
    }

    #[test]
    fn test_empty_void_method() {
        let code = CfCode::new(
            0,
            0,
            vec![CfInstruction::Label(Label(0)), CfInstruction::Return(None)],
        );
        assert!(code.is_empty_void_method());
        let code = CfCode::new(0, 0, vec![CfInstruction::Nop, CfInstruction::Throw]);
        assert!(!code.is_empty_void_method());
    }

    #[test]
    fn test_argument_uses_and_parameter_info() {
        let code = CfCode {
            max_stack: 2,
            max_locals: 3,
            instructions: vec![
                CfInstruction::Label(Label(0)),
                CfInstruction::Load {
                    kind: ValueKind::Long,
                    local: 0,
                },
                CfInstruction::Return(Some(ValueKind::Long)),
                CfInstruction::Label(Label(1)),
            ],
            try_catch_ranges: Vec::new(),
            local_variables: vec![
                LocalVariableInfo {
                    index: 0,
                    name: Name::new("a"),
                    ty: TypeRef::long(),
                    signature: None,
                    start: Label(0),
                    end: Label(1),
                },
                LocalVariableInfo {
                    index: 2,
                    name: Name::new("b"),
                    ty: TypeRef::int(),
                    signature: None,
                    start: Label(0),
                    end: Label(1),
                },
            ],
        };
        let method = static_method("(JI)J", code.clone());
        let used = code.argument_uses(&method);
        assert!(used.contains(0));
        assert!(!used.contains(1));
        let params = code.collect_parameter_info(&method);
        assert_eq!(params.len(), 2);
        assert_eq!(params[&2].name.as_str(), "b");
    }

    #[test]
    fn test_register_references_reports_constant_string() {
        #[derive(Default)]
        struct Recorder {
            strings: Vec<String>,
            statics: usize,
            guards: usize,
        }
        impl UseRegistry for Recorder {
            fn register_invoke_static(&mut self, _: &MethodRef) {
                self.statics += 1;
            }
            fn register_exception_guard(&mut self, _: &TypeRef) {
                self.guards += 1;
            }
            fn register_invoke_with_constant_string(&mut self, _: &MethodRef, value: &Name) {
                self.strings.push(value.as_str().to_string());
            }
        }
        let forname = MethodRef::parse(
            "java/lang/Class",
            "forName",
            "(Ljava/lang/String;)Ljava/lang/Class;",
        )
        .unwrap();
        let code = CfCode {
            max_stack: 1,
            max_locals: 0,
            instructions: vec![
                CfInstruction::Label(Label(0)),
                CfInstruction::Const(ConstValue::string("a.B")),
                CfInstruction::Label(Label(1)),
                CfInstruction::Invoke {
                    kind: InvokeKind::Static,
                    method: forname,
                    interface: false,
                },
                CfInstruction::Label(Label(2)),
                CfInstruction::Return(None),
            ],
            try_catch_ranges: vec![CfTryCatch {
                start: Label(0),
                end: Label(2),
                guards: vec![Some(TypeRef::class("java/lang/ClassNotFoundException"))],
                targets: vec![Label(2)],
            }],
            local_variables: Vec::new(),
        };
        let mut recorder = Recorder::default();
        code.register_references(&mut recorder, &TypeRef::class("a/A"));
        assert_eq!(recorder.strings, vec!["a.B".to_string()]);
        assert_eq!(recorder.statics, 1);
        assert_eq!(recorder.guards, 1);
    }
}

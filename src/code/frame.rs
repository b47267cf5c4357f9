//! Stack map frames.
//!
//! Class files of version 50 and later carry a `StackMapTable`; version 51 and later require
//! it. A [`CfFrame`] records the verification types of the locals and the operand stack at a
//! branch target or handler entry. Frames are dropped when reading code and recomputed when
//! writing it.

use std::{collections::BTreeMap, fmt};

use crate::{code::Label, program::references::TypeRef};

/// A verification type (JVMS §4.10.1.2).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Unusable slot
    Top,
    /// `int` and narrower
    Int,
    /// `float`
    Float,
    /// `long`; occupies the following slot as well
    Long,
    /// `double`; occupies the following slot as well
    Double,
    /// The `null` constant
    Null,
    /// `this` inside a constructor before the super constructor call
    UninitializedThis,
    /// The result of the `new` bound right after the label
    Uninitialized(Label),
    /// An initialized reference
    Initialized(TypeRef),
}

impl FrameType {
    /// The verification type of values of `ty`.
    #[must_use]
    pub fn of_type(ty: &TypeRef) -> Self {
        match ty.descriptor() {
            "J" => FrameType::Long,
            "F" => FrameType::Float,
            "D" => FrameType::Double,
            "Z" | "B" | "C" | "S" | "I" => FrameType::Int,
            _ => FrameType::Initialized(ty.clone()),
        }
    }

    /// Returns `true` for `long` and `double`.
    #[must_use]
    pub fn is_wide(&self) -> bool {
        matches!(self, FrameType::Long | FrameType::Double)
    }

    /// Returns `true` for the uninitialized `this` and uninitialized `new` results.
    #[must_use]
    pub fn is_uninitialized(&self) -> bool {
        matches!(
            self,
            FrameType::UninitializedThis | FrameType::Uninitialized(_)
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameType::Top => f.write_str("top"),
            FrameType::Int => f.write_str("int"),
            FrameType::Float => f.write_str("float"),
            FrameType::Long => f.write_str("long"),
            FrameType::Double => f.write_str("double"),
            FrameType::Null => f.write_str("null"),
            FrameType::UninitializedThis => f.write_str("uninitialized-this"),
            FrameType::Uninitialized(label) => write!(f, "uninitialized({label})"),
            FrameType::Initialized(ty) => write!(f, "{ty}"),
        }
    }
}

/// Locals and operand stack at a program point.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CfFrame {
    /// Local slot to type; the second slot of a wide value is implicit
    pub locals: BTreeMap<u16, FrameType>,
    /// Operand stack, bottom first
    pub stack: Vec<FrameType>,
}

impl CfFrame {
    /// Number of local slots the frame covers.
    #[must_use]
    pub fn local_slots(&self) -> u16 {
        self.locals
            .iter()
            .next_back()
            .map_or(0, |(slot, ty)| slot + if ty.is_wide() { 2 } else { 1 })
    }

    /// Number of operand stack slots.
    #[must_use]
    pub fn stack_slots(&self) -> u16 {
        self.stack
            .iter()
            .map(|ty| if ty.is_wide() { 2 } else { 1 })
            .sum()
    }

    /// The locals as a dense list, gaps filled with [`FrameType::Top`] and wide values
    /// taking one entry, as `StackMapTable` stores them.
    #[must_use]
    pub fn dense_locals(&self) -> Vec<FrameType> {
        let mut dense = Vec::with_capacity(self.locals.len());
        let mut next = 0u16;
        for (&slot, ty) in &self.locals {
            while next < slot {
                dense.push(FrameType::Top);
                next += 1;
            }
            dense.push(ty.clone());
            next = slot + if ty.is_wide() { 2 } else { 1 };
        }
        dense
    }
}

impl fmt::Display for CfFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{ locals: [")?;
        for (i, (slot, ty)) in self.locals.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{slot}: {ty}")?;
        }
        f.write_str("], stack: [")?;
        for (i, ty) in self.stack.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        f.write_str("] }")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_locals_fills_gaps() {
        let mut frame = CfFrame::default();
        frame.locals.insert(0, FrameType::Long);
        frame.locals.insert(3, FrameType::Int);
        assert_eq!(
            frame.dense_locals(),
            vec![FrameType::Long, FrameType::Top, FrameType::Int]
        );
        assert_eq!(frame.local_slots(), 4);
    }

    #[test]
    fn test_stack_slots_counts_wide() {
        let frame = CfFrame {
            locals: BTreeMap::new(),
            stack: vec![FrameType::Double, FrameType::Null],
        };
        assert_eq!(frame.stack_slots(), 3);
    }
}

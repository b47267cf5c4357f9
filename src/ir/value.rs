//! IR values.
//!
//! A [`ValueId`] is a dense index into the value table of an [`IrCode`](super::IrCode).
//! Each value is defined exactly once, by an instruction or a phi. The table also records
//! the value's [`TypeElement`] and, when debug info was kept, the source local it was stored
//! to.

use std::fmt;

use crate::{
    ir::types::TypeElement,
    program::references::{Name, TypeRef},
};

/// Identifier of an IR value, unique within one [`IrCode`](super::IrCode).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub(crate) u32);

impl ValueId {
    /// Creates an id from a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        ValueId(index)
    }

    /// The raw index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Source-level local a value was stored to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebugLocal {
    /// Source name
    pub name: Name,
    /// Declared type
    pub ty: TypeRef,
    /// Generic signature
    pub signature: Option<Name>,
}

/// Metadata of one value.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    /// The value's id
    pub id: ValueId,
    /// What the value may hold
    pub ty: TypeElement,
    /// Debug local, if any
    pub local: Option<DebugLocal>,
}

impl Value {
    /// A value without debug info.
    #[must_use]
    pub fn new(id: ValueId, ty: TypeElement) -> Self {
        Value { id, ty, local: None }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.ty)?;
        if let Some(local) = &self.local {
            write!(f, " ({})", local.name)?;
        }
        Ok(())
    }
}

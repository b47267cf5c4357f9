//! Optimization info attached to definitions.
//!
//! Two disciplines coexist here:
//!
//! - [`MethodOptimizationInfo`] is a plain value. Passes compute a new record and publish it
//!   between passes; nobody mutates a record another thread is reading.
//! - [`FieldOptimizationInfo`] is shared by every thread of a pass. All updates are
//!   merge-only (flags and read bits only gain bits, the abstract value and dynamic type are
//!   published at most once), implemented with atomic read-modify-write operations. A reader
//!   racing a writer sees either the old or the new facts; since facts only grow, late readers
//!   always see a superset.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        OnceLock,
    },
};

use crate::program::references::{Name, TypeRef};

/// Abstract value of a field, argument or return value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum AbstractValue {
    /// No value observed yet
    #[default]
    Bottom,
    /// Always `null`
    Null,
    /// Always the given integral constant
    SingleNumber(i64),
    /// Always the given string constant
    SingleString(Name),
    /// Anything
    Unknown,
}

impl AbstractValue {
    /// Least upper bound.
    #[must_use]
    pub fn join(&self, other: &AbstractValue) -> AbstractValue {
        match (self, other) {
            (AbstractValue::Bottom, x) | (x, AbstractValue::Bottom) => x.clone(),
            (a, b) if a == b => a.clone(),
            _ => AbstractValue::Unknown,
        }
    }

    /// Returns `true` for a single known value.
    #[must_use]
    pub fn is_single_value(&self) -> bool {
        matches!(
            self,
            AbstractValue::Null | AbstractValue::SingleNumber(_) | AbstractValue::SingleString(_)
        )
    }

    /// Returns `true` for the top element.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, AbstractValue::Unknown)
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbstractValue::Bottom => f.write_str("⊥"),
            AbstractValue::Null => f.write_str("null"),
            AbstractValue::SingleNumber(n) => write!(f, "{n}"),
            AbstractValue::SingleString(s) => write!(f, "{s:?}"),
            AbstractValue::Unknown => f.write_str("⊤"),
        }
    }
}

/// Dynamic type bounds refined by analysis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DynamicTypeBounds {
    /// Every runtime value is a subtype of this type
    pub upper: TypeRef,
    /// If known, every runtime value is exactly this type or a supertype of it
    pub lower: Option<TypeRef>,
}

/// Per-method optimization facts. Published as a whole between passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodOptimizationInfo {
    /// The method is unreachable after the last liveness computation
    pub is_dead: bool,
    /// Abstract value returned by every normal completion
    pub returned_value: AbstractValue,
    /// Abstract value of each declared argument, joined over all call sites
    pub arguments: Vec<AbstractValue>,
    /// Bound on the dynamic return type
    pub dynamic_return_type: Option<DynamicTypeBounds>,
    /// The method body never completes normally
    pub never_returns_normally: bool,
}

impl MethodOptimizationInfo {
    /// Argument `index` is known to be a single constant.
    #[must_use]
    pub fn constant_argument(&self, index: usize) -> Option<&AbstractValue> {
        self.arguments.get(index).filter(|v| v.is_single_value())
    }
}

/// Concurrently mutated field facts.
#[derive(Debug, Default)]
pub struct FieldOptimizationInfo {
    flags: AtomicU32,
    read_bits: AtomicU64,
    abstract_value: OnceLock<AbstractValue>,
    dynamic_type: OnceLock<DynamicTypeBounds>,
}

impl FieldOptimizationInfo {
    /// The field must not be kept by rules.
    pub const CANNOT_BE_KEPT: u32 = 0x1;
    /// The field is never read.
    pub const IS_DEAD: u32 = 0x2;
    /// The field's single value has been propagated to its readers.
    pub const VALUE_HAS_BEEN_PROPAGATED: u32 = 0x4;

    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `flag` with a compare-and-swap loop. Returns `true` if this call set it.
    pub fn set_flag(&self, flag: u32) -> bool {
        let mut current = self.flags.load(Ordering::Acquire);
        loop {
            if current & flag == flag {
                return false;
            }
            match self.flags.compare_exchange_weak(
                current,
                current | flag,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Returns `true` if `flag` is set.
    #[must_use]
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags.load(Ordering::Acquire) & flag == flag
    }

    /// Raw flags word.
    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags.load(Ordering::Acquire)
    }

    /// Marks the field as not keepable.
    pub fn mark_cannot_be_kept(&self) -> bool {
        self.set_flag(Self::CANNOT_BE_KEPT)
    }

    /// Returns `true` if the field cannot be kept.
    #[must_use]
    pub fn cannot_be_kept(&self) -> bool {
        self.has_flag(Self::CANNOT_BE_KEPT)
    }

    /// Marks the field as dead.
    pub fn mark_dead(&self) -> bool {
        self.set_flag(Self::IS_DEAD)
    }

    /// Returns `true` if the field is dead.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.has_flag(Self::IS_DEAD)
    }

    /// Records that the field value has been propagated.
    pub fn mark_value_propagated(&self) -> bool {
        self.set_flag(Self::VALUE_HAS_BEEN_PROPAGATED)
    }

    /// Returns `true` if the field value has been propagated.
    #[must_use]
    pub fn value_has_been_propagated(&self) -> bool {
        self.has_flag(Self::VALUE_HAS_BEEN_PROPAGATED)
    }

    /// ORs `bits` into the set of bits observed by readers. Returns the previous bits.
    pub fn join_read_bits(&self, bits: u64) -> u64 {
        self.read_bits.fetch_or(bits, Ordering::AcqRel)
    }

    /// Bits of the field value observed by readers.
    #[must_use]
    pub fn read_bits(&self) -> u64 {
        self.read_bits.load(Ordering::Acquire)
    }

    /// Publishes the abstract value. Only the first publication takes effect; returns `true`
    /// if this call published.
    pub fn set_abstract_value(&self, value: AbstractValue) -> bool {
        self.abstract_value.set(value).is_ok()
    }

    /// The published abstract value, [`AbstractValue::Unknown`] if none.
    #[must_use]
    pub fn abstract_value(&self) -> AbstractValue {
        self.abstract_value
            .get()
            .cloned()
            .unwrap_or(AbstractValue::Unknown)
    }

    /// Publishes dynamic type bounds. Only the first publication takes effect.
    pub fn set_dynamic_type(&self, bounds: DynamicTypeBounds) -> bool {
        self.dynamic_type.set(bounds).is_ok()
    }

    /// The published dynamic type bounds.
    #[must_use]
    pub fn dynamic_type(&self) -> Option<&DynamicTypeBounds> {
        self.dynamic_type.get()
    }
}

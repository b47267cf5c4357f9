//! The enqueuer worklist.
//!
//! Every item carries the [`Reason`] it was enqueued for. Items caused by a fact discovered
//! after the affected code was already traced (a class becoming instantiated after a virtual
//! call to one of its methods was seen) are re-dispatches; the worklist keeps an audit log of
//! them so such revisits can be inspected without retracing any code.

use std::{collections::VecDeque, fmt};

use crate::program::references::{FieldRef, MethodRef, Name, TypeRef};

/// Why a definition became live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reason {
    /// Kept by the policy
    KeepRule,
    /// Referenced from the code of a live method
    ReferencedFrom(MethodRef),
    /// Target of a virtual dispatch from a live call site
    DispatchFrom(MethodRef),
    /// A class became instantiated after calls to its supertypes were traced
    ClassInstantiated(TypeRef),
    /// Overrides a method of a library supertype of an instantiated class
    LibraryOverride(MethodRef),
    /// Supertype of a live class
    SupertypeOf(TypeRef),
    /// Static initializer or member of a live class
    HolderLive(TypeRef),
    /// A class name passed as an identifier name string
    ReflectiveName(Name),
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::KeepRule => f.write_str("kept by rule"),
            Reason::ReferencedFrom(method) => write!(f, "referenced from {method}"),
            Reason::DispatchFrom(method) => write!(f, "dispatch from {method}"),
            Reason::ClassInstantiated(ty) => write!(f, "class {ty} instantiated"),
            Reason::LibraryOverride(method) => write!(f, "overrides library method {method}"),
            Reason::SupertypeOf(ty) => write!(f, "supertype of {ty}"),
            Reason::HolderLive(ty) => write!(f, "member of live class {ty}"),
            Reason::ReflectiveName(name) => write!(f, "identifier name string {name:?}"),
        }
    }
}

impl Reason {
    /// Returns `true` for reasons that revisit earlier traced facts.
    #[must_use]
    pub fn is_redispatch(&self) -> bool {
        matches!(self, Reason::ClassInstantiated(_))
    }
}

/// A pending liveness fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// A program class is live
    ClassLive {
        /// The class
        ty: TypeRef,
        /// Why
        reason: Reason,
    },
    /// A program class is instantiated
    Instantiated {
        /// The class
        ty: TypeRef,
        /// Why
        reason: Reason,
    },
    /// A method definition is live
    MethodLive {
        /// The definition (holder is the declaring class)
        method: MethodRef,
        /// Why
        reason: Reason,
    },
    /// A resolved virtual method is targeted; dispatch it on instantiated subtypes
    VirtualTarget {
        /// The resolved definition
        method: MethodRef,
        /// Why
        reason: Reason,
    },
    /// A field definition is accessed
    FieldLive {
        /// The definition
        field: FieldRef,
        /// Read (`true`) or written (`false`)
        read: bool,
        /// Why
        reason: Reason,
    },
}

impl WorkItem {
    /// The reason this item was enqueued.
    #[must_use]
    pub fn reason(&self) -> &Reason {
        match self {
            WorkItem::ClassLive { reason, .. }
            | WorkItem::Instantiated { reason, .. }
            | WorkItem::MethodLive { reason, .. }
            | WorkItem::VirtualTarget { reason, .. }
            | WorkItem::FieldLive { reason, .. } => reason,
        }
    }
}

/// FIFO worklist with a revisit log.
#[derive(Debug, Default)]
pub struct Worklist {
    queue: VecDeque<WorkItem>,
    redispatches: Vec<(MethodRef, Reason)>,
    processed: usize,
}

impl Worklist {
    /// Creates an empty worklist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an item.
    pub fn push(&mut self, item: WorkItem) {
        if let WorkItem::MethodLive { method, reason } = &item {
            if reason.is_redispatch() {
                self.redispatches.push((method.clone(), reason.clone()));
            }
        }
        self.queue.push_back(item);
    }

    /// Takes the oldest item.
    pub fn pop(&mut self) -> Option<WorkItem> {
        let item = self.queue.pop_front();
        if item.is_some() {
            self.processed += 1;
        }
        item
    }

    /// Returns `true` if no item is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Methods enqueued because of facts discovered after their call sites were traced.
    #[must_use]
    pub fn redispatches(&self) -> &[(MethodRef, Reason)] {
        &self.redispatches
    }

    /// Number of items processed so far.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_and_redispatch_log() {
        let method = MethodRef::parse("a/B", "m", "()V").unwrap();
        let mut worklist = Worklist::new();
        worklist.push(WorkItem::ClassLive {
            ty: TypeRef::class("a/B"),
            reason: Reason::KeepRule,
        });
        worklist.push(WorkItem::MethodLive {
            method: method.clone(),
            reason: Reason::ClassInstantiated(TypeRef::class("a/B")),
        });
        assert!(matches!(worklist.pop(), Some(WorkItem::ClassLive { .. })));
        assert!(matches!(worklist.pop(), Some(WorkItem::MethodLive { .. })));
        assert!(worklist.pop().is_none());
        assert_eq!(worklist.processed(), 2);
        assert_eq!(worklist.redispatches().len(), 1);
        assert_eq!(worklist.redispatches()[0].0, method);
    }

    #[test]
    fn test_reason_display() {
        let reason = Reason::ClassInstantiated(TypeRef::class("a/B"));
        assert_eq!(reason.to_string(), format!("class {} instantiated", TypeRef::class("a/B")));
    }
}

//! # cfshrink Prelude
//!
//! The most commonly used types for building a program, declaring keep rules, running the
//! shrinker and reading its result.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cfshrink operations
pub use crate::Error;

/// The result type used throughout cfshrink
pub use crate::Result;

/// Shrinker configuration
pub use crate::config::{ClassFileVersion, ShrinkerOptions};

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The end-to-end pipeline and its output
pub use crate::pipeline::{ShrinkResult, ShrinkStats, Shrinker};

// ================================================================================================
// Program Model
// ================================================================================================

/// References to types, methods and fields
pub use crate::program::references::{FieldRef, MethodRef, Name, ProtoRef, Reference, TypeRef};

/// Definitions and the program graph
pub use crate::program::{ClassDef, ClassKind, FieldDef, MethodDef, ProgramGraph};

/// Access flags
pub use crate::program::flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};

/// Stack code
pub use crate::code::{CfCode, CfInstruction, ConstValue};

// ================================================================================================
// Shrinking and Optimization
// ================================================================================================

/// Keep rules and reachability
pub use crate::shaking::{AppInfoWithLiveness, Enqueuer, KeepPolicy, RootSet, UseRegistry};

/// Rewriting maps
pub use crate::lens::{GraphLens, LensLayer};

/// Pass infrastructure
pub use crate::compiler::{CompilerContext, EventKind, EventLog, IrPass, PassScheduler};

// ================================================================================================
// Tracing and Retracing
// ================================================================================================

/// Reference tracing
pub use crate::tracer::{TraceReferencesConsumer, Tracer};

/// Stack-trace retracing
pub use crate::retrace::{RetraceMapping, Retracer};

//! Compiler infrastructure for IR-based optimization passes.
//!
//! This module sits between tree shaking and re-emission:
//!
//! - [`crate::shaking`] - Reachability, producing the liveness facts passes rely on
//! - [`compiler`](self) - Pass trait, shared context, scheduling, event log
//! - [`crate::optimize`] - The passes themselves (merging, propagation, inlining)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                      Compiler Pipeline                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  CompilerContext              Shared interprocedural state       │
//! │    ├─ Method bodies           (stack code or IR, per method)     │
//! │    ├─ Graph lens snapshot     (copy-on-extend)                   │
//! │    ├─ Optimization info       (per method, per field)            │
//! │    └─ EventLog                                                   │
//! │                                                                  │
//! │  PassScheduler                3-phase fixpoint execution         │
//! │    ├─ Phase 1: Merging        (horizontal class merging)         │
//! │    ├─ Phase 2: Propagation    (constant arguments)               │
//! │    └─ Phase 3: Inlining       (small direct callees)             │
//! │    Each phase: run → cleanup → repeat until stable               │
//! │    Methods run in call-graph waves, in parallel within a wave    │
//! │                                                                  │
//! │  IrPass trait                 Interface for all passes           │
//! │    ├─ run_on_method()         Per-method transformation          │
//! │    ├─ run_global()            Whole-program transformation       │
//! │    ├─ initialize()            One-time setup before each run     │
//! │    └─ finalize()              Cleanup after each run             │
//! │                                                                  │
//! │  EventLog                     Change tracking and diagnostics    │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

mod context;
mod events;
mod pass;
mod scheduler;

pub use context::{CompilerContext, MethodBody};
pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use pass::IrPass;
pub use scheduler::PassScheduler;

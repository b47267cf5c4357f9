// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::too_many_arguments)]

//! # cfshrink
//!
//! A whole-program shrinker and optimizer for JVM class-file bytecode.
//!
//! `cfshrink` takes a closed world of program classes (plus the library and classpath
//! classes they reference) and a set of keep rules, and produces a smaller, faster program:
//!
//! - **Tree shaking** - A worklist fixpoint (the [`shaking::Enqueuer`]) computes which
//!   classes, methods and fields are live; everything else is removed
//! - **SSA optimization** - Live bodies are lifted from stack code to an SSA IR, optimized
//!   and lowered again for the class-file version of their holder
//! - **Interprocedural passes** - Horizontal class merging, constant argument propagation
//!   and inlining, scheduled to a fixpoint
//! - **Graph lens** - Every renaming and retargeting is recorded in a layered
//!   [`lens::GraphLens`], so references can be rewritten lazily and stack traces retraced
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cfshrink::prelude::*;
//!
//! # fn example(program: ProgramGraph) -> cfshrink::Result<()> {
//! let main = MethodRef::parse("app/Main", "main", "([Ljava/lang/String;)V")?;
//! let policy = RootSet::new().keep_method(main);
//!
//! let result = Shrinker::new(program, policy, ShrinkerOptions::default()).run()?;
//! println!("{} classes left, {}", result.classes.len(), result.events.summary());
//!
//! let retracer = result.retracer();
//! for line in retracer.retrace_stack_trace("java.lang.Error\n\tat a.a.a(SourceFile:1)") {
//!     println!("{line}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ProgramGraph ──► Enqueuer ──► prune ──► CompilerContext ──► PassScheduler ──► emit
//!      ▲             │                        │  (IR bodies)       │
//!      │         KeepPolicy               GraphLens ◄──────────────┘
//!      └──────────────────────────── second tree-shaking round ◄──────────────┘
//! ```
//!
//! Reachability only ever reads the program through the [`shaking::UseRegistry`]
//! callbacks, so the same traversal also drives the reference [`tracer`].

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit- and integration-tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use cfshrink::prelude::*;
///
/// let ty = TypeRef::class("app/Main");
/// assert_eq!(ty.java_name(), "app.Main");
/// ```
pub mod prelude;

/// Shrinker configuration and class-file versions.
pub mod config;

/// The program model: references, definitions, access flags and the class hierarchy.
///
/// # Key Types
///
/// - [`program::ProgramGraph`] - All classes of the closed world, with hierarchy and
///   resolution queries
/// - [`program::references`] - Interned type, method and field references
/// - [`program::ClassDef`], [`program::MethodDef`], [`program::FieldDef`] - Definitions
/// - [`program::optinfo`] - Per-method and per-field optimization info
pub mod program;

/// Stack-based class-file code (`Code` attribute contents) and the bytecode writer.
pub mod code;

/// The SSA intermediate representation, the stack-to-IR builder and the IR-to-stack
/// emitter.
pub mod ir;

/// Layered rewriting maps for types, methods and fields.
pub mod lens;

/// Tree shaking: keep rules, the use registry, the enqueuer and pruning.
pub mod shaking;

/// Pass infrastructure: the compiler context, the pass trait, the scheduler and the event
/// log.
pub mod compiler;

/// The interprocedural optimizations.
pub mod optimize;

/// Reference tracing against a target set of classes.
pub mod tracer;

/// Mapping output names and stack traces back to the input.
pub mod retrace;

/// The end-to-end pipeline.
pub mod pipeline;

/// Generic graph algorithms and bit sets.
pub mod utils;

/// `cfshrink` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `cfshrink` Error type
///
/// # Examples
///
/// ```rust,no_run
/// use cfshrink::{prelude::*, Error};
///
/// # fn example(shrinker: Shrinker) {
/// match shrinker.run() {
///     Ok(result) => println!("{} classes", result.classes.len()),
///     Err(Error::MissingDefinitions { count, report }) => println!("{count} missing:\n{report}"),
///     Err(e) => println!("Error: {e}"),
/// }
/// # }
/// ```
pub use error::Error;

pub use config::{ClassFileVersion, ShrinkerOptions};
pub use pipeline::{ShrinkResult, ShrinkStats, Shrinker};

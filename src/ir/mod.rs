//! Value-graph intermediate representation of method bodies.
//!
//! The stack machine of the class file is convenient to store and verify but awkward to
//! optimize: every value flows through an implicit operand stack and reusable local slots.
//! This module converts method bodies into an SSA form with explicit values and explicit
//! control flow, and back.
//!
//! # Architecture
//!
//! - [`types`] - The type lattice attached to every value
//! - [`value`] - Value identifiers and debug-local metadata
//! - [`instruction`] - IR operations, one variant per instruction kind
//! - [`block`] - Basic blocks with phis and catch handlers
//! - [`code`] - A whole method body, consistency check and structural equivalence
//! - [`builder`] - Stack code to IR (Cytron et al.)
//! - [`emitter`] - IR back to stack code, with frames and debug info
//! - [`synthetic`] - Builder for methods the pipeline generates
//! - [`entry_point`] - Constructor dispatch entry points for merged classes
//!
//! # Round Trip
//!
//! Building an unmodified method, emitting it, and building the result again yields IR
//! that [`IrCode::is_equivalent`] to the first build:
//!
//! ```rust
//! use cfshrink::code::{CfCode, CfInstruction};
//! use cfshrink::ir::{IrBuilder, IrEmitter};
//! use cfshrink::program::{flags::MethodAccessFlags, references::MethodRef, MethodDef};
//!
//! let reference = MethodRef::parse("app/Main", "run", "()V")?;
//! let method = MethodDef::new(reference, MethodAccessFlags::STATIC)
//!     .with_code(CfCode::new(0, 0, vec![CfInstruction::Return(None)]));
//!
//! let ir = IrBuilder::new(&method)?.build()?;
//! let emitted = IrEmitter::new(&ir).emit()?;
//! let rebuilt = IrBuilder::for_code(&method, &emitted).build()?;
//! assert!(ir.is_equivalent(&rebuilt));
//! # Ok::<(), cfshrink::Error>(())
//! ```
//!
//! # References
//!
//! - Cytron et al., "Efficiently Computing Static Single Assignment Form and the
//!   Control Dependence Graph", ACM TOPLAS 1991
//! - Briggs et al., "Practical Improvements to the Construction and Destruction of Static
//!   Single Assignment Form", SP&E 1998

pub mod block;
pub mod builder;
pub mod code;
pub mod emitter;
pub mod entry_point;
pub mod instruction;
pub mod synthetic;
pub mod types;
pub mod value;

pub use block::{BasicBlock, BlockId, CatchHandler, Phi};
pub use builder::IrBuilder;
pub use code::{DefSite, IrCode};
pub use emitter::IrEmitter;
pub use entry_point::{entry_point_proto, moved_constructor_name, ConstructorEntryPoint};
pub use instruction::{IrInstruction, IrOp};
pub use synthetic::{SyntheticCode, SyntheticMethod, SyntheticMethodBuilder};
pub use types::TypeElement;
pub use value::{DebugLocal, Value, ValueId};

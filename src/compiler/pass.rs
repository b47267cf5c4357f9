//! The [`IrPass`] trait implemented by every optimization pass.

use crate::{compiler::context::CompilerContext, ir::IrCode, program::references::MethodRef, Result};

/// An optimization pass over IR.
///
/// All passes must be `Send + Sync`: per-method passes are invoked from several rayon
/// threads at once, each thread owning the body it works on and sharing the context.
///
/// # Pass kinds
///
/// A per-method pass implements [`IrPass::run_on_method`]; the scheduler hands it each
/// method body in the current wave. A global pass returns `true` from [`IrPass::is_global`]
/// and implements [`IrPass::run_global`] instead; it runs alone and may replace the program
/// or extend the graph lens.
pub trait IrPass: Send + Sync {
    /// Unique name for logging and error reports.
    fn name(&self) -> &'static str;

    /// Should this pass run on `method`?
    ///
    /// Called before `run_on_method`. Override to skip methods the pass cannot improve.
    fn should_run(&self, _method: &MethodRef, _ctx: &CompilerContext) -> bool {
        true
    }

    /// Runs the pass on a single method body.
    ///
    /// Returns `true` if the body changed. Events should be recorded to `ctx.events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pass fails on this method; the scheduler cancels the rest of
    /// the wave and reports it as [`crate::Error::PassFailed`].
    fn run_on_method(&self, _code: &mut IrCode, _ctx: &CompilerContext) -> Result<bool> {
        Ok(false)
    }

    /// Runs on the whole program (for interprocedural passes).
    ///
    /// # Errors
    ///
    /// Returns an error if the pass fails.
    fn run_global(&self, _ctx: &CompilerContext) -> Result<bool> {
        Ok(false)
    }

    /// Does this pass operate on the whole program?
    fn is_global(&self) -> bool {
        false
    }

    /// Called once before the pass runs.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    fn initialize(&mut self, _ctx: &CompilerContext) -> Result<()> {
        Ok(())
    }

    /// Called once after the pass ran.
    ///
    /// # Errors
    ///
    /// Returns an error if finalization fails.
    fn finalize(&mut self, _ctx: &CompilerContext) -> Result<()> {
        Ok(())
    }

    /// A description of what this pass does.
    fn description(&self) -> &'static str {
        "No description available"
    }
}

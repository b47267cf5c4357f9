//! Pass scheduler for orchestrating IR pass execution.
//!
//! The `PassScheduler` runs the optimization passes in a 3-phase pipeline; each phase runs
//! to fixpoint, with the cleanup passes run to fixpoint after every round that changed
//! something. Per-method passes are processed wave by wave (callees before callers) and in
//! parallel within a wave.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex,
};

use rayon::prelude::*;

use crate::{
    compiler::{context::CompilerContext, events::EventKind, pass::IrPass},
    config::ShrinkerOptions,
    program::references::MethodRef,
    Error, Result,
};

/// Orchestrates IR pass execution in a phased pipeline.
///
/// The scheduler runs passes in a 3-phase pipeline:
///
/// 1. **Merging**: Class merging and the lens rewrite it implies
/// 2. **Propagation**: Argument propagation
/// 3. **Inlining**: Inlining of small callees
///
/// Each phase runs to fixpoint (until no more changes) before proceeding; after every round
/// of a phase that changed something the cleanup passes (field access analysis and dead
/// store removal in the pipeline) run to fixpoint. When no phase changes anything in the
/// first iteration the cleanup passes still run once, so their facts are always published.
/// The entire pipeline is then repeated until global fixpoint or max iterations.
///
/// # Failures
///
/// When a per-method pass fails on one method, the methods of the wave that have not been
/// started are skipped, the remaining phases do not run, and the failure is returned as a
/// single [`Error::PassFailed`] naming the pass and the method.
#[allow(clippy::struct_field_names)]
pub struct PassScheduler {
    /// Maximum iterations for the entire pipeline.
    max_iterations: usize,
    /// Number of stable iterations before stopping.
    stable_iterations: usize,
    /// Maximum iterations for a single phase before moving on.
    max_phase_iterations: usize,
    /// Process the methods of a wave on the rayon pool.
    parallel: bool,
    /// Phase 1: Class merging.
    pub merging: Vec<Box<dyn IrPass>>,
    /// Phase 2: Argument propagation.
    pub propagation: Vec<Box<dyn IrPass>>,
    /// Phase 3: Inlining.
    pub inlining: Vec<Box<dyn IrPass>>,
    /// Cleanup passes, run after each phase round that changed something.
    pub cleanup: Vec<Box<dyn IrPass>>,
}

impl Default for PassScheduler {
    fn default() -> Self {
        Self::new(3, 1, 8)
    }
}

impl PassScheduler {
    /// Creates a new scheduler with the specified iteration limits.
    ///
    /// # Arguments
    ///
    /// * `max_iterations` - Maximum iterations for the entire pipeline before stopping.
    /// * `stable_iterations` - Stop early if no changes for this many iterations.
    /// * `max_phase_iterations` - Maximum iterations for a single phase before moving on.
    #[must_use]
    pub fn new(
        max_iterations: usize,
        stable_iterations: usize,
        max_phase_iterations: usize,
    ) -> Self {
        Self {
            max_iterations,
            stable_iterations,
            max_phase_iterations,
            parallel: true,
            merging: Vec::new(),
            propagation: Vec::new(),
            inlining: Vec::new(),
            cleanup: Vec::new(),
        }
    }

    /// Creates a scheduler with the iteration limits and threading of `options`.
    #[must_use]
    pub fn from_options(options: &ShrinkerOptions) -> Self {
        Self::new(options.max_iterations, 1, options.max_phase_iterations)
            .with_parallel(options.parallel)
    }

    /// Processes the methods of a wave sequentially when `parallel` is unset.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Number of registered passes over all phases.
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.merging.len() + self.propagation.len() + self.inlining.len() + self.cleanup.len()
    }

    /// Runs the cleanup passes until no more changes occur.
    fn cleanup_to_fixpoint(
        ctx: &CompilerContext,
        passes: &mut [Box<dyn IrPass>],
        max_phase_iterations: usize,
        parallel: bool,
    ) -> Result<bool> {
        let mut any_changed = false;

        for _ in 0..max_phase_iterations {
            let changed = Self::run_passes_once(ctx, passes, parallel)?;

            if !changed {
                break;
            }

            any_changed = true;
        }

        Ok(any_changed)
    }

    /// Runs a phase to fixpoint: execute phase passes, then clean up until stable.
    fn phase_to_fixpoint(
        ctx: &CompilerContext,
        phase_passes: &mut [Box<dyn IrPass>],
        cleanup_passes: &mut [Box<dyn IrPass>],
        max_phase_iterations: usize,
        parallel: bool,
    ) -> Result<bool> {
        if phase_passes.is_empty() {
            return Ok(false);
        }

        let mut phase_changed = false;

        for _ in 0..max_phase_iterations {
            let pass_changed = Self::run_passes_once(ctx, phase_passes, parallel)?;
            if !pass_changed {
                break;
            }

            phase_changed = true;

            if !cleanup_passes.is_empty() {
                Self::cleanup_to_fixpoint(
                    ctx,
                    cleanup_passes,
                    max_phase_iterations,
                    parallel,
                )?;
            }
        }

        Ok(phase_changed)
    }

    /// Runs all passes once over all methods.
    ///
    /// Returns `true` if any pass made changes, `false` otherwise.
    fn run_passes_once(
        ctx: &CompilerContext,
        passes: &mut [Box<dyn IrPass>],
        parallel: bool,
    ) -> Result<bool> {
        let mut any_changed = false;

        for pass in passes.iter_mut() {
            pass.initialize(ctx)?;
        }

        // Global passes first, sequentially: they may replace the program and the lens
        for pass in passes.iter() {
            if pass.is_global() && Self::run_global(ctx, pass.as_ref())? {
                any_changed = true;
            }
        }

        for pass in passes.iter() {
            if !pass.is_global() && Self::run_on_methods(ctx, pass.as_ref(), parallel)? > 0 {
                any_changed = true;
            }
        }

        for pass in passes.iter_mut() {
            pass.finalize(ctx)?;
        }

        Ok(any_changed)
    }

    fn run_global(ctx: &CompilerContext, pass: &dyn IrPass) -> Result<bool> {
        let changed = pass.run_global(ctx).map_err(|source| {
            ctx.events
                .record(EventKind::PassFailed)
                .pass(pass.name())
                .message(source.to_string());
            Error::PassFailed {
                pass: pass.name(),
                method: String::from("<global>"),
                source: Box::new(source),
            }
        })?;
        log::debug!("{}: global run, changed = {changed}", pass.name());
        Ok(changed)
    }

    /// Runs a per-method pass over every wave. Returns the number of changed methods.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PassFailed`] for the first method the pass failed on. Methods of
    /// the same wave that had not started yet are skipped, later waves are not run.
    pub fn run_on_methods(
        ctx: &CompilerContext,
        pass: &dyn IrPass,
        parallel: bool,
    ) -> Result<usize> {
        let changed = AtomicUsize::new(0);

        for wave in ctx.waves()? {
            let cancelled = AtomicBool::new(false);
            let failure: Mutex<Option<(MethodRef, Error)>> = Mutex::new(None);

            {
                let process = |method: &MethodRef| {
                    if cancelled.load(Ordering::Acquire) || !pass.should_run(method, ctx) {
                        return;
                    }
                    match Self::run_on_method(ctx, pass, method) {
                        Ok(true) => {
                            changed.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(false) => {}
                        Err(error) => {
                            if !cancelled.swap(true, Ordering::AcqRel) {
                                if let Ok(mut slot) = failure.lock() {
                                    *slot = Some((method.clone(), error));
                                }
                            }
                        }
                    }
                };

                if parallel {
                    wave.par_iter().for_each(process);
                } else {
                    wave.iter().for_each(process);
                }
            }

            if let Some((method, source)) = failure.into_inner().map_err(|_| Error::LockError)? {
                ctx.events
                    .record(EventKind::PassFailed)
                    .method(&method)
                    .pass(pass.name())
                    .message(source.to_string());
                return Err(Error::PassFailed {
                    pass: pass.name(),
                    method: method.to_string(),
                    source: Box::new(source),
                });
            }
        }

        let changed = changed.into_inner();
        log::debug!("{}: {changed} methods changed", pass.name());
        if changed > 0 {
            ctx.events
                .record(EventKind::PassCompleted)
                .pass(pass.name())
                .message(format!("{changed} methods changed"));
        }
        Ok(changed)
    }

    /// Runs `pass` on one body. The body is taken out of the context for the duration of
    /// the pass and always put back; a changed body must still validate.
    fn run_on_method(
        ctx: &CompilerContext,
        pass: &dyn IrPass,
        method: &MethodRef,
    ) -> Result<bool> {
        let Some(mut code) = ctx.take_ir(method)? else {
            return Ok(false);
        };

        let result = pass
            .run_on_method(&mut code, ctx)
            .and_then(|changed| code.validate().map(|()| changed));

        if let Ok(true) = result {
            ctx.processed_methods.insert(code.method().clone());
        }
        ctx.put_ir(code);
        result
    }

    /// Runs the complete optimization pipeline.
    ///
    /// Returns the number of iterations completed. Events are accumulated in `ctx.events`.
    ///
    /// # Errors
    ///
    /// Returns an error if any pass fails during execution.
    pub fn run_pipeline(&mut self, ctx: &CompilerContext) -> Result<usize> {
        let mut stable_count = 0;
        let mut iterations = 0;
        let max_phase = self.max_phase_iterations;
        let parallel = self.parallel;

        for iteration in 0..self.max_iterations {
            iterations = iteration + 1;
            let mut iteration_changed = false;

            for phase in [
                &mut self.merging,
                &mut self.propagation,
                &mut self.inlining,
            ] {
                if Self::phase_to_fixpoint(ctx, phase, &mut self.cleanup, max_phase, parallel)? {
                    iteration_changed = true;
                }
            }

            if iteration == 0 && !iteration_changed && !self.cleanup.is_empty() {
                iteration_changed =
                    Self::cleanup_to_fixpoint(ctx, &mut self.cleanup, max_phase, parallel)?;
            }

            if iteration_changed {
                stable_count = 0;
            } else {
                stable_count += 1;
                if stable_count >= self.stable_iterations {
                    break;
                }
            }
        }

        log::info!(
            "Optimization finished after {iterations} iterations in {:?}: {}",
            ctx.elapsed(),
            ctx.events.summary()
        );
        Ok(iterations)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        compiler::{CompilerContext, EventKind},
        ir::IrCode,
        test::fixtures::{context_for, dispatch_program},
    };

    struct TestPass {
        name: &'static str,
        changes_to_make: usize,
        runs: AtomicUsize,
    }

    impl TestPass {
        fn new(name: &'static str, changes: usize) -> Self {
            Self {
                name,
                changes_to_make: changes,
                runs: AtomicUsize::new(0),
            }
        }
    }

    impl IrPass for TestPass {
        fn name(&self) -> &'static str {
            self.name
        }

        fn run_on_method(&self, code: &mut IrCode, ctx: &CompilerContext) -> Result<bool> {
            self.runs.fetch_add(1, Ordering::Relaxed);
            for i in 0..self.changes_to_make {
                ctx.events
                    .record(EventKind::Info)
                    .at(code.method(), i)
                    .message("test");
            }
            Ok(false)
        }
    }

    struct FailingPass;

    impl IrPass for FailingPass {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn run_on_method(&self, code: &mut IrCode, _ctx: &CompilerContext) -> Result<bool> {
            if code.method().holder.to_string() == "app/B" {
                return Err(Error::IrError("unsupported body".into()));
            }
            Ok(false)
        }
    }

    struct GlobalPass;

    impl IrPass for GlobalPass {
        fn name(&self) -> &'static str {
            "global"
        }

        fn is_global(&self) -> bool {
            true
        }

        fn run_global(&self, ctx: &CompilerContext) -> Result<bool> {
            ctx.events.info("global pass ran");
            Ok(false)
        }
    }

    /// Reports a change on its first `changes` global runs.
    struct ChangingPass {
        changes: AtomicUsize,
    }

    impl IrPass for ChangingPass {
        fn name(&self) -> &'static str {
            "changing"
        }

        fn is_global(&self) -> bool {
            true
        }

        fn run_global(&self, _ctx: &CompilerContext) -> Result<bool> {
            Ok(self
                .changes
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok())
        }
    }

    struct CountingCleanup {
        runs: Arc<AtomicUsize>,
    }

    impl IrPass for CountingCleanup {
        fn name(&self) -> &'static str {
            "cleanup"
        }

        fn is_global(&self) -> bool {
            true
        }

        fn run_global(&self, _ctx: &CompilerContext) -> Result<bool> {
            self.runs.fetch_add(1, Ordering::Relaxed);
            Ok(false)
        }
    }

    #[test]
    fn test_scheduler_iteration_limits() {
        let scheduler = PassScheduler::new(10, 3, 5);
        assert_eq!(scheduler.max_iterations, 10);
        assert_eq!(scheduler.stable_iterations, 3);
        assert_eq!(scheduler.max_phase_iterations, 5);
    }

    #[test]
    fn test_from_options() {
        let options = ShrinkerOptions::default();
        let scheduler = PassScheduler::from_options(&options);
        assert_eq!(scheduler.max_iterations, options.max_iterations);
        assert_eq!(scheduler.max_phase_iterations, options.max_phase_iterations);
        assert_eq!(scheduler.pass_count(), 0);
    }

    #[test]
    fn test_pass_visits_every_body() {
        let ctx = context_for(dispatch_program(), ShrinkerOptions::default());
        let pass = TestPass::new("visit", 1);
        let changed = PassScheduler::run_on_methods(&ctx, &pass, true).unwrap();
        assert_eq!(changed, 0);
        assert_eq!(pass.runs.load(Ordering::Relaxed), ctx.methods().len());
        assert_eq!(ctx.events.count_kind(EventKind::Info), ctx.methods().len());
        assert!(ctx.bodies.iter().all(|entry| entry.value().is_ir()));
    }

    #[test]
    fn test_failure_is_reported_once() {
        for parallel in [true, false] {
            let ctx = context_for(dispatch_program(), ShrinkerOptions::default());
            let bodies = ctx.methods().len();
            let error = PassScheduler::run_on_methods(&ctx, &FailingPass, parallel).unwrap_err();
            match error {
                Error::PassFailed { pass, method, .. } => {
                    assert_eq!(pass, "failing");
                    assert!(method.starts_with("app/B"), "{method}");
                }
                other => panic!("unexpected error {other}"),
            }
            assert_eq!(ctx.events.count_kind(EventKind::PassFailed), 1);
            // Failed bodies are put back.
            assert_eq!(ctx.methods().len(), bodies);
        }
    }

    #[test]
    fn test_pipeline_reaches_fixpoint() {
        let ctx = context_for(dispatch_program(), ShrinkerOptions::default());
        let mut scheduler = PassScheduler::new(5, 1, 3);
        scheduler.merging.push(Box::new(GlobalPass));
        scheduler.inlining.push(Box::new(TestPass::new("noop", 0)));
        let iterations = scheduler.run_pipeline(&ctx).unwrap();
        assert_eq!(iterations, 1);
        assert_eq!(ctx.events.count_kind(EventKind::Info), 1);
    }

    #[test]
    fn test_cleanup_follows_changing_rounds() {
        let ctx = context_for(dispatch_program(), ShrinkerOptions::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PassScheduler::new(5, 1, 8);
        scheduler.propagation.push(Box::new(ChangingPass {
            changes: AtomicUsize::new(2),
        }));
        scheduler.cleanup.push(Box::new(CountingCleanup { runs: runs.clone() }));
        assert_eq!(scheduler.pass_count(), 2);

        // Two changing rounds, then one stable iteration.
        assert_eq!(scheduler.run_pipeline(&ctx).unwrap(), 2);
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_cleanup_runs_once_without_changes() {
        let ctx = context_for(dispatch_program(), ShrinkerOptions::default());
        let runs = Arc::new(AtomicUsize::new(0));
        let mut scheduler = PassScheduler::new(5, 1, 8);
        scheduler.inlining.push(Box::new(TestPass::new("noop", 0)));
        scheduler.cleanup.push(Box::new(CountingCleanup { runs: runs.clone() }));
        assert_eq!(scheduler.run_pipeline(&ctx).unwrap(), 1);
        assert_eq!(runs.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failure_aborts_pipeline() {
        let ctx = context_for(dispatch_program(), ShrinkerOptions::default());
        let mut scheduler = PassScheduler::default().with_parallel(false);
        scheduler.propagation.push(Box::new(FailingPass));
        scheduler.inlining.push(Box::new(GlobalPass));
        assert!(matches!(
            scheduler.run_pipeline(&ctx),
            Err(Error::PassFailed { pass: "failing", .. })
        ));
        assert_eq!(ctx.events.count_kind(EventKind::Info), 0);
    }
}

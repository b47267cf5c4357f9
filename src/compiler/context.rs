//! Shared state of the optimization passes.
//!
//! A [`CompilerContext`] is created once the Enqueuer reached its fixpoint and lives until the
//! optimized bodies are emitted again. Every pass receives it by shared reference; all
//! mutable state is either a concurrent map keyed by method, an append-only log, or a
//! snapshot behind a lock that is replaced as a whole.
//!
//! # Method bodies
//!
//! Bodies start out as the stack code of the input ([`MethodBody::Cf`]) and are converted to
//! IR the first time a pass asks for them. A body is in exactly one representation at a time.
//! Per-method passes take the body out of the map while they work on it and put it back when
//! done, so no lock is held while a pass runs.
//!
//! # Lens
//!
//! The context keeps the current [`GraphLens`]. Readers get a cheap snapshot; global passes
//! replace it with an extended lens. Layers are never modified once published.

use std::{
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use dashmap::{DashMap, DashSet};
use rayon::prelude::*;

use crate::{
    code::CfCode,
    compiler::events::{EventKind, EventLog},
    config::ShrinkerOptions,
    ir::{IrBuilder, IrCode, IrEmitter},
    lens::{FlattenedLens, GraphLens, LensCodeRewriter, LensLayer},
    optimize::{argprop::VirtualRootMethods, inliner::InliningDirectives},
    program::{
        optinfo::{FieldOptimizationInfo, MethodOptimizationInfo},
        references::{FieldRef, MethodRef},
        MethodDef, ProgramGraph,
    },
    shaking::AppInfoWithLiveness,
    Error, Result,
};

/// A method body in one of its two representations.
#[derive(Debug, Clone)]
pub enum MethodBody {
    /// Stack code, shared with the method definition it came from
    Cf(Arc<CfCode>),
    /// IR, owned by the context
    Ir(IrCode),
}

impl MethodBody {
    /// Returns `true` if the body was converted to IR.
    #[must_use]
    pub fn is_ir(&self) -> bool {
        matches!(self, MethodBody::Ir(_))
    }
}

/// Interprocedural state shared by all passes.
pub struct CompilerContext {
    program: RwLock<Arc<ProgramGraph>>,
    liveness: Arc<AppInfoWithLiveness>,
    options: ShrinkerOptions,
    lens: RwLock<GraphLens>,
    waves: RwLock<Vec<Vec<MethodRef>>>,
    virtual_roots: RwLock<Option<Arc<VirtualRootMethods>>>,
    start_time: Instant,

    /// Bodies of the live program methods with code.
    pub bodies: DashMap<MethodRef, MethodBody>,

    /// Published optimization facts per method.
    pub method_info: DashMap<MethodRef, MethodOptimizationInfo>,

    /// Inlining requests and prohibitions.
    pub directives: InliningDirectives,

    /// Everything the passes changed or reported.
    pub events: EventLog,

    /// Methods whose body was changed by some pass and must be emitted again.
    pub processed_methods: DashSet<MethodRef>,
}

impl CompilerContext {
    /// A context over the live methods of `program`.
    #[must_use]
    pub fn new(
        program: Arc<ProgramGraph>,
        liveness: Arc<AppInfoWithLiveness>,
        options: ShrinkerOptions,
    ) -> Self {
        let bodies = DashMap::new();
        for method in program.program_methods() {
            if let Some(code) = &method.code {
                if liveness.is_live_method(&method.reference) {
                    bodies.insert(method.reference.clone(), MethodBody::Cf(code.clone()));
                }
            }
        }
        log::debug!("Compiler context over {} method bodies", bodies.len());

        CompilerContext {
            program: RwLock::new(program),
            liveness,
            options,
            lens: RwLock::new(GraphLens::identity()),
            waves: RwLock::new(Vec::new()),
            virtual_roots: RwLock::new(None),
            start_time: Instant::now(),
            bodies,
            method_info: DashMap::new(),
            directives: InliningDirectives::new(),
            events: EventLog::new(),
            processed_methods: DashSet::new(),
        }
    }

    // ========================================================================
    // Program, liveness, options
    // ========================================================================

    /// The current program.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a writer panicked.
    pub fn program(&self) -> Result<Arc<ProgramGraph>> {
        let program = self.program.read().map_err(|_| Error::LockError)?;
        Ok(program.clone())
    }

    /// Replaces the program, for passes that add, move or remove definitions.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a reader or writer panicked.
    pub fn set_program(&self, program: Arc<ProgramGraph>) -> Result<()> {
        *self.program.write().map_err(|_| Error::LockError)? = program;
        *self.virtual_roots.write().map_err(|_| Error::LockError)? = None;
        Ok(())
    }

    /// Liveness facts of the Enqueuer run this context was created from.
    #[must_use]
    pub fn liveness(&self) -> &AppInfoWithLiveness {
        &self.liveness
    }

    /// Pipeline options.
    #[must_use]
    pub fn options(&self) -> &ShrinkerOptions {
        &self.options
    }

    /// Time since the context was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    // ========================================================================
    // Lens
    // ========================================================================

    /// A snapshot of the current lens.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a writer panicked.
    pub fn lens(&self) -> Result<GraphLens> {
        let lens = self.lens.read().map_err(|_| Error::LockError)?;
        Ok(lens.clone())
    }

    /// Publishes the current lens extended by `layer` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a reader or writer panicked.
    pub fn extend_lens(&self, layer: LensLayer) -> Result<GraphLens> {
        let mut lens = self.lens.write().map_err(|_| Error::LockError)?;
        *lens = lens.extend(layer);
        *self.virtual_roots.write().map_err(|_| Error::LockError)? = None;
        Ok(lens.clone())
    }

    // ========================================================================
    // Processing order
    // ========================================================================

    /// Methods with a body, sorted.
    #[must_use]
    pub fn methods(&self) -> Vec<MethodRef> {
        let mut methods: Vec<MethodRef> = self.bodies.iter().map(|e| e.key().clone()).collect();
        methods.sort();
        methods
    }

    /// Installs the processing waves computed from the call graph.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a reader or writer panicked.
    pub fn set_waves(&self, waves: Vec<Vec<MethodRef>>) -> Result<()> {
        *self.waves.write().map_err(|_| Error::LockError)? = waves;
        Ok(())
    }

    /// Methods grouped in waves; every method of a wave only calls methods of earlier waves
    /// (as far as the call graph knows). Methods with a body that no wave names form a
    /// final wave, so without a call graph everything is one wave.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a writer panicked.
    pub fn waves(&self) -> Result<Vec<Vec<MethodRef>>> {
        let mut waves: Vec<Vec<MethodRef>> = self
            .waves
            .read()
            .map_err(|_| Error::LockError)?
            .iter()
            .map(|wave| {
                wave.iter()
                    .filter(|m| self.bodies.contains_key(*m))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .filter(|wave| !wave.is_empty())
            .collect();

        let scheduled: std::collections::HashSet<&MethodRef> = waves.iter().flatten().collect();
        let rest: Vec<MethodRef> = self
            .methods()
            .into_iter()
            .filter(|m| !scheduled.contains(m))
            .collect();
        if !rest.is_empty() {
            waves.push(rest);
        }
        Ok(waves)
    }

    // ========================================================================
    // Bodies
    // ========================================================================

    /// Converts stack code to IR, honoring `keep_debug_info`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`IrBuilder::build`].
    pub fn build_ir(&self, method: &MethodDef, code: &CfCode) -> Result<IrCode> {
        let program = self.program()?;
        let builder = IrBuilder::for_code(method, code).with_program(&program);
        let ir = if self.options.keep_debug_info {
            builder.build()?
        } else {
            builder.build_with_locals(false)?
        };
        if ir.debug_info_dropped() {
            self.events
                .record(EventKind::DebugInfoDropped)
                .method(&method.reference)
                .message("inconsistent local variable table");
        }
        Ok(ir)
    }

    fn definition_of(&self, program: &ProgramGraph, method: &MethodRef) -> Result<MethodDef> {
        program
            .method_definition(method)
            .cloned()
            .ok_or_else(|| Error::IrError(format!("{method} has a body but no definition")))
    }

    /// Removes the body of `method` from the map, converting it to IR.
    ///
    /// Returns `Ok(None)` if the method has no body (or another thread holds it).
    ///
    /// # Errors
    ///
    /// Returns the errors of [`IrBuilder::build`]. The stack code is put back on failure.
    pub fn take_ir(&self, method: &MethodRef) -> Result<Option<IrCode>> {
        let Some((_, body)) = self.bodies.remove(method) else {
            return Ok(None);
        };
        match body {
            MethodBody::Ir(ir) => Ok(Some(ir)),
            MethodBody::Cf(code) => {
                let program = self.program()?;
                let converted = self
                    .definition_of(&program, method)
                    .and_then(|definition| self.build_ir(&definition, &code));
                match converted {
                    Ok(ir) => Ok(Some(ir)),
                    Err(e) => {
                        self.bodies.insert(method.clone(), MethodBody::Cf(code));
                        Err(e)
                    }
                }
            }
        }
    }

    /// Puts an IR body (back) into the map under its own method reference.
    pub fn put_ir(&self, code: IrCode) {
        self.bodies.insert(code.method().clone(), MethodBody::Ir(code));
    }

    /// A copy of the body of `method` as IR, leaving the stored body untouched.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`IrBuilder::build`].
    pub fn ir_snapshot(&self, method: &MethodRef) -> Result<Option<IrCode>> {
        let body = match self.bodies.get(method) {
            Some(entry) => entry.value().clone(),
            None => return Ok(None),
        };
        match body {
            MethodBody::Ir(ir) => Ok(Some(ir)),
            MethodBody::Cf(code) => {
                let program = self.program()?;
                let definition = self.definition_of(&program, method)?;
                self.build_ir(&definition, &code).map(Some)
            }
        }
    }

    /// Rewrites every body through `lens`, normally the layers a pass just published (see
    /// [`GraphLens::since`]). Bodies are re-keyed by their rewritten method reference.
    ///
    /// Returns the number of bodies that changed.
    ///
    /// # Errors
    ///
    /// Returns the first error of [`LensCodeRewriter::rewrite`] or of the IR conversion.
    pub fn rewrite_bodies(&self, lens: &GraphLens) -> Result<usize> {
        if lens.is_identity() {
            return Ok(0);
        }
        let program = self.program()?;
        let flattened = FlattenedLens::new(lens.clone());
        let rewrite = |method: &MethodRef| -> Result<bool> {
            let Some(mut code) = self.take_ir(method)? else {
                return Ok(false);
            };
            let result = LensCodeRewriter::new(&flattened)
                .with_program(&program)
                .rewrite(&mut code);
            if let Ok(true) = result {
                self.processed_methods.remove(method);
                self.processed_methods.insert(code.method().clone());
                if let Some((_, info)) = self.method_info.remove(method) {
                    self.method_info.insert(code.method().clone(), info);
                }
                self.events
                    .record(EventKind::CodeRewritten)
                    .method(code.method())
                    .message(format!("rewritten from {method}"));
            }
            self.put_ir(code);
            result
        };

        let methods = self.methods();
        let changes: Vec<bool> = if self.options.parallel {
            methods.par_iter().map(rewrite).collect::<Result<_>>()?
        } else {
            methods.iter().map(rewrite).collect::<Result<_>>()?
        };
        let changed = changes.into_iter().filter(|c| *c).count();
        log::debug!("Lens rewrite changed {changed} of {} bodies", methods.len());
        Ok(changed)
    }

    /// Stack code for every body: untouched bodies are returned as they came in, IR is
    /// emitted for the class-file version of its holder.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`IrEmitter::emit`], or [`Error::IrError`] for a body whose
    /// holder is no longer defined.
    pub fn emit_bodies(&self) -> Result<Vec<(MethodRef, Arc<CfCode>)>> {
        let program = self.program()?;
        let mut emitted = Vec::with_capacity(self.bodies.len());
        for method in self.methods() {
            let Some(body) = self.bodies.get(&method).map(|e| e.value().clone()) else {
                continue;
            };
            let code = match body {
                MethodBody::Cf(code) => code,
                MethodBody::Ir(ir) => {
                    let holder = program.definition_for(&method.holder).ok_or_else(|| {
                        Error::IrError(format!("{method}: holder is not defined"))
                    })?;
                    let code = IrEmitter::new(&ir)
                        .with_frames(holder.version, self.options.keep_stack_map_for_v50)
                        .with_debug_info(self.options.keep_debug_info)
                        .emit()?;
                    self.events
                        .record(EventKind::CodeRegenerated)
                        .method(&method)
                        .message(format!("{} instructions", code.instructions.len()));
                    Arc::new(code)
                }
            };
            emitted.push((method, code));
        }
        Ok(emitted)
    }

    // ========================================================================
    // Optimization info
    // ========================================================================

    /// The shared optimization record of a field.
    #[must_use]
    pub fn field_info(&self, field: &FieldRef) -> Option<Arc<FieldOptimizationInfo>> {
        let program = self.program.read().ok()?;
        program
            .field_definition(field)
            .map(|f| f.optimization_info.clone())
    }

    /// Published facts about `method`.
    #[must_use]
    pub fn optimization_info(&self, method: &MethodRef) -> Option<MethodOptimizationInfo> {
        self.method_info.get(method).map(|info| info.clone())
    }

    /// Publishes facts about `method`, replacing earlier ones.
    pub fn set_optimization_info(&self, method: MethodRef, info: MethodOptimizationInfo) {
        self.method_info.insert(method, info);
    }

    /// Virtual roots of the current program, computed on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a reader or writer panicked.
    pub fn virtual_roots(&self) -> Result<Arc<VirtualRootMethods>> {
        if let Some(roots) = self
            .virtual_roots
            .read()
            .map_err(|_| Error::LockError)?
            .as_ref()
        {
            return Ok(roots.clone());
        }
        let program = self.program()?;
        let lens = self.lens()?;
        let roots = Arc::new(VirtualRootMethods::compute_with_liveness_through(
            &program,
            &self.liveness,
            &lens,
        ));
        *self.virtual_roots.write().map_err(|_| Error::LockError)? = Some(roots.clone());
        Ok(roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        shaking::{Enqueuer, RootSet},
        test::fixtures::dispatch_program,
    };

    fn context() -> CompilerContext {
        let program = Arc::new(dispatch_program());
        let main = MethodRef::parse("app/Main", "main", "([Ljava/lang/String;)V").unwrap();
        let policy = RootSet::new().keep_method(main);
        let options = ShrinkerOptions::default();
        let liveness = Enqueuer::new(&program, &policy, &options).run().unwrap();
        CompilerContext::new(program, Arc::new(liveness), options)
    }

    #[test]
    fn test_bodies_of_live_methods() {
        let ctx = context();
        let methods = ctx.methods();
        assert!(methods.iter().any(|m| m.holder.to_string() == "app/Main"));
        assert!(methods.windows(2).all(|w| w[0] < w[1]));
        assert!(ctx.bodies.iter().all(|entry| !entry.value().is_ir()));
    }

    #[test]
    fn test_take_and_put_ir() {
        let ctx = context();
        let main = MethodRef::parse("app/Main", "main", "([Ljava/lang/String;)V").unwrap();
        let ir = ctx.take_ir(&main).unwrap().unwrap();
        assert!(!ctx.bodies.contains_key(&main));
        assert_eq!(ctx.take_ir(&main).unwrap(), None);
        ctx.put_ir(ir);
        assert!(ctx.bodies.get(&main).unwrap().is_ir());

        let emitted = ctx.emit_bodies().unwrap();
        assert_eq!(emitted.len(), ctx.methods().len());
        assert_eq!(ctx.events.count_kind(EventKind::CodeRegenerated), 1);
    }

    #[test]
    fn test_lens_snapshots() {
        let ctx = context();
        let before = ctx.lens().unwrap();
        let mut layer = LensLayer::builder("test");
        layer.map_type(
            crate::program::references::TypeRef::class("app/C"),
            crate::program::references::TypeRef::class("app/A"),
        );
        let after = ctx.extend_lens(layer.build().unwrap()).unwrap();
        assert!(before.is_identity());
        assert_eq!(after.depth(), 1);
        assert!(ctx.lens().unwrap().ptr_eq(&after));
    }

    #[test]
    fn test_waves_cover_every_body() {
        let ctx = context();
        let main = MethodRef::parse("app/Main", "main", "([Ljava/lang/String;)V").unwrap();
        ctx.set_waves(vec![vec![main.clone()]]).unwrap();
        let waves = ctx.waves().unwrap();
        assert_eq!(waves[0], vec![main]);
        let total: usize = waves.iter().map(Vec::len).sum();
        assert_eq!(total, ctx.methods().len());
    }

    #[test]
    fn test_virtual_roots_are_cached() {
        let ctx = context();
        let first = ctx.virtual_roots().unwrap();
        let second = ctx.virtual_roots().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        ctx.set_program(ctx.program().unwrap()).unwrap();
        assert!(!Arc::ptr_eq(&first, &ctx.virtual_roots().unwrap()));
    }
}

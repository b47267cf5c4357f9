//! The shrinker pipeline.
//!
//! [`Shrinker::run`] drives one compilation:
//!
//! 1. The [`Enqueuer`] computes liveness from the keep policy, then verifies the
//!    check-discard rules and reports missing definitions.
//! 2. Dead definitions are pruned.
//! 3. The live bodies move into a [`CompilerContext`] and the [`PassScheduler`] runs class
//!    merging, argument propagation and inlining to a fixpoint. Field access analysis runs
//!    as cleanup after each changing round and drops the stores to fields nobody reads.
//! 4. Every changed body is emitted as stack code for the class-file version of its holder
//!    and installed in the final program.
//! 5. A second tree-shaking round removes what the optimizations made unreachable (callees
//!    that were inlined everywhere, fields without stores or reads, for example).
//!
//! The result keeps the [`GraphLens`] of all optimizations, so a [`Retracer`] can map names
//! of the output back to the input.

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use crate::{
    code::{CfCode, CfInstruction},
    compiler::{CompilerContext, EventKind, EventLog, PassScheduler},
    config::ShrinkerOptions,
    lens::GraphLens,
    optimize::{ArgumentPropagationPass, ClassMergingPass, FieldAccessPass, InliningPass},
    program::{
        references::{FieldRef, MethodRef, TypeRef},
        ClassDef, ProgramGraph,
    },
    retrace::Retracer,
    shaking::{Enqueuer, EnqueuerStats, KeepPolicy, PruneResult},
    Result,
};

/// Counts of what the pipeline removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShrinkStats {
    /// Program classes in the input
    pub input_classes: usize,
    /// Program classes in the output
    pub output_classes: usize,
    /// Classes removed by either tree-shaking round
    pub removed_classes: usize,
    /// Methods removed from surviving classes
    pub removed_methods: usize,
    /// Fields removed from surviving classes
    pub removed_fields: usize,
    /// Optimization rounds run by the scheduler
    pub iterations: usize,
    /// Counters of the first enqueuer run
    pub enqueuer: EnqueuerStats,
}

/// The outcome of [`Shrinker::run`].
#[derive(Debug)]
pub struct ShrinkResult {
    /// The live program classes of the output, sorted by type
    pub classes: Vec<ClassDef>,
    /// The output program including its library classes
    pub program: ProgramGraph,
    /// Every renaming and retargeting the optimizations published
    pub lens: GraphLens,
    /// Everything the passes changed or reported
    pub events: EventLog,
    /// What was removed
    pub stats: ShrinkStats,
}

impl ShrinkResult {
    /// The output definition of `ty`.
    #[must_use]
    pub fn class(&self, ty: &TypeRef) -> Option<&ClassDef> {
        self.classes.iter().find(|class| class.ty == *ty)
    }

    /// A retracer mapping output names back to the input.
    #[must_use]
    pub fn retracer(&self) -> Retracer {
        Retracer::from_lens(&self.lens, &self.program)
    }
}

/// The whole-program shrinker.
///
/// # Examples
///
/// ```rust,no_run
/// use cfshrink::prelude::*;
///
/// # fn example(program: ProgramGraph) -> cfshrink::Result<()> {
/// let policy = RootSet::new().keep_class_and_members(TypeRef::class("app/Main"));
/// let result = Shrinker::new(program, policy, ShrinkerOptions::default()).run()?;
/// for class in &result.classes {
///     println!("{} ({} methods)", class.ty, class.methods.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct Shrinker {
    program: ProgramGraph,
    policy: Box<dyn KeepPolicy>,
    options: ShrinkerOptions,
}

impl Shrinker {
    /// A shrinker over `program` with the roots of `policy`.
    #[must_use]
    pub fn new(
        program: ProgramGraph,
        policy: impl KeepPolicy + 'static,
        options: ShrinkerOptions,
    ) -> Self {
        Shrinker {
            program,
            policy: Box::new(policy),
            options,
        }
    }

    /// Runs the pipeline.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::CheckDiscardFailed`] if a definition required to be discarded is
    ///   live
    /// - [`crate::Error::MissingDefinitions`] for unresolved references, unless
    ///   `ignore_warnings` is set
    /// - [`crate::Error::PassFailed`] if an optimization pass fails on a method
    /// - the IR conversion and emission errors of the bodies that were optimized
    pub fn run(self) -> Result<ShrinkResult> {
        let Shrinker {
            program,
            policy,
            options,
        } = self;
        let input_classes = program.program_classes().count();

        let liveness = Enqueuer::new(&program, policy.as_ref(), &options).run()?;
        let enqueuer = liveness.stats();
        let pruned = liveness.prune(&program);
        let mut stats = ShrinkStats {
            input_classes,
            enqueuer,
            ..ShrinkStats::default()
        };
        count_removed(&mut stats, &pruned);
        log::info!(
            "Tree shaking kept {} of {input_classes} classes",
            input_classes - pruned.removed_classes.len()
        );

        let ctx = CompilerContext::new(Arc::new(pruned.program), Arc::new(liveness), options.clone());
        record_pruned(&ctx.events, &pruned.removed_classes, &pruned.removed_methods, &pruned.removed_fields);

        if options.any_optimization_enabled() {
            let mut scheduler = PassScheduler::from_options(&options);
            scheduler.merging.push(Box::new(ClassMergingPass::new()));
            scheduler
                .propagation
                .push(Box::new(ArgumentPropagationPass::new()));
            scheduler.inlining.push(Box::new(InliningPass::new()));
            scheduler.cleanup.push(Box::new(FieldAccessPass::new()));
            stats.iterations = scheduler.run_pipeline(&ctx)?;
        }

        let emitted: HashMap<MethodRef, Arc<CfCode>> = ctx.emit_bodies()?.into_iter().collect();
        let optimized = install_bodies(&*ctx.program()?, &emitted);
        let lens = ctx.lens()?;

        // Optimizations leave callees without callers; shake once more.
        let program = if stats.iterations > 0 {
            let second = Enqueuer::new(&optimized, policy.as_ref(), &options)
                .compute()
                .prune(&optimized);
            count_removed(&mut stats, &second);
            record_pruned(&ctx.events, &second.removed_classes, &second.removed_methods, &second.removed_fields);
            restore_init_class_fields(&optimized, second.program)
        } else {
            optimized
        };

        let mut classes: Vec<ClassDef> = program
            .program_classes()
            .map(|class| ClassDef::clone(class))
            .collect();
        classes.sort_by(|a, b| a.ty.cmp(&b.ty));
        stats.output_classes = classes.len();
        log::info!(
            "Shrinking done: {} of {input_classes} classes, {} methods and {} fields removed",
            stats.output_classes,
            stats.removed_methods,
            stats.removed_fields
        );

        Ok(ShrinkResult {
            classes,
            program,
            lens,
            events: ctx.events,
            stats,
        })
    }
}

fn count_removed(stats: &mut ShrinkStats, pruned: &PruneResult) {
    stats.removed_classes += pruned.removed_classes.len();
    stats.removed_methods += pruned.removed_methods.len();
    stats.removed_fields += pruned.removed_fields.len();
}

fn record_pruned(events: &EventLog, classes: &[TypeRef], methods: &[MethodRef], fields: &[FieldRef]) {
    for class in classes {
        events
            .record(EventKind::DefinitionPruned)
            .message(format!("class {class}"));
    }
    for method in methods {
        events.record(EventKind::DefinitionPruned).method(method);
    }
    for field in fields {
        events
            .record(EventKind::DefinitionPruned)
            .message(format!("field {field}"));
    }
}

/// `program` with every method body replaced by its emitted code.
fn install_bodies(program: &ProgramGraph, emitted: &HashMap<MethodRef, Arc<CfCode>>) -> ProgramGraph {
    let mut builder = program.to_builder();
    for class in program.program_classes() {
        if !class.methods.iter().any(|m| emitted.contains_key(&m.reference)) {
            continue;
        }
        let mut updated = ClassDef::clone(class);
        for method in &mut updated.methods {
            if let Some(code) = emitted.get(&method.reference) {
                method.code = Some(code.clone());
            }
        }
        builder.replace_class(updated);
    }
    builder.build()
}

/// Fields named by `InitClass` instructions only trigger initialization and are never read,
/// so tree shaking drops them. Puts them back from `before`.
fn restore_init_class_fields(before: &ProgramGraph, after: ProgramGraph) -> ProgramGraph {
    let referenced: BTreeSet<FieldRef> = after
        .program_methods()
        .filter_map(|method| method.code.as_ref())
        .flat_map(|code| code.instructions.iter())
        .filter_map(|instruction| match instruction {
            CfInstruction::InitClass(field) => Some(field.clone()),
            _ => None,
        })
        .collect();
    let missing: Vec<&FieldRef> = referenced
        .iter()
        .filter(|field| after.field_definition(field).is_none())
        .collect();
    if missing.is_empty() {
        return after;
    }

    let mut builder = after.to_builder();
    for field in missing {
        let (Some(definition), Some(class)) = (
            before.field_definition(field),
            builder.get(&field.holder).map(|class| ClassDef::clone(class)),
        ) else {
            continue;
        };
        builder.replace_class(class.with_field(definition.clone()));
    }
    builder.build()
}

//! Pluggable inlining policy.
//!
//! Library-specific knowledge ("never inline this generated accessor", "always inline that
//! builder method") does not belong in the inliner. It is supplied by implementations of
//! [`InliningHeuristics`] registered on the pass. None are built in.

use crate::program::{references::MethodRef, MethodDef, ProgramGraph};

/// A decision hook consulted for every inlining candidate.
pub trait InliningHeuristics: Send + Sync {
    /// Name for logging.
    fn name(&self) -> &'static str;

    /// Returns `true` to veto inlining `callee` into `caller`.
    fn never_inline(
        &self,
        _caller: &MethodRef,
        _callee: &MethodDef,
        _program: &ProgramGraph,
    ) -> bool {
        false
    }

    /// Returns `true` to inline `callee` into `caller` even above the size threshold.
    ///
    /// Legality still applies: a forced candidate whose body may not execute in the caller's
    /// class is not inlined.
    fn force_inline(
        &self,
        _caller: &MethodRef,
        _callee: &MethodDef,
        _program: &ProgramGraph,
    ) -> bool {
        false
    }
}

/// Combined answer of several heuristics: any veto wins over any force.
pub(crate) fn decide(
    heuristics: &[Box<dyn InliningHeuristics>],
    caller: &MethodRef,
    callee: &MethodDef,
    program: &ProgramGraph,
) -> Option<bool> {
    if let Some(h) = heuristics
        .iter()
        .find(|h| h.never_inline(caller, callee, program))
    {
        log::trace!("{}: {} vetoed by {}", caller, callee.reference, h.name());
        return Some(false);
    }
    heuristics
        .iter()
        .any(|h| h.force_inline(caller, callee, program))
        .then_some(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        program::flags::MethodAccessFlags,
        test::fixtures::{class, program_of},
    };

    struct NeverGetters;

    impl InliningHeuristics for NeverGetters {
        fn name(&self) -> &'static str {
            "never-getters"
        }

        fn never_inline(&self, _: &MethodRef, callee: &MethodDef, _: &ProgramGraph) -> bool {
            callee.reference.name.as_str().starts_with("get")
        }
    }

    struct AlwaysAll;

    impl InliningHeuristics for AlwaysAll {
        fn name(&self) -> &'static str {
            "always"
        }

        fn force_inline(&self, _: &MethodRef, _: &MethodDef, _: &ProgramGraph) -> bool {
            true
        }
    }

    #[test]
    fn test_veto_wins_over_force() {
        let program = program_of(vec![class("a/A")]);
        let caller = MethodRef::parse("a/A", "run", "()V").unwrap();
        let getter = MethodDef::new(
            MethodRef::parse("a/A", "getValue", "()I").unwrap(),
            MethodAccessFlags::STATIC,
        );
        let other = MethodDef::new(
            MethodRef::parse("a/A", "value", "()I").unwrap(),
            MethodAccessFlags::STATIC,
        );
        let heuristics: Vec<Box<dyn InliningHeuristics>> =
            vec![Box::new(AlwaysAll), Box::new(NeverGetters)];

        assert_eq!(decide(&heuristics, &caller, &getter, &program), Some(false));
        assert_eq!(decide(&heuristics, &caller, &other, &program), Some(true));
        assert_eq!(decide(&[], &caller, &other, &program), None);
    }
}

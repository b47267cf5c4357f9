//! Explicit inlining requests.

use dashmap::DashSet;

use crate::program::references::MethodRef;

/// Methods the inliner must, must not, or may inline without triggering class
/// initialization.
///
/// Directives are shared by all threads of a pass and may be added while it runs; a
/// directive added mid-pass affects the call sites processed afterwards.
#[derive(Debug, Default)]
pub struct InliningDirectives {
    always: DashSet<MethodRef>,
    never: DashSet<MethodRef>,
    bypass_class_init: DashSet<MethodRef>,
}

impl InliningDirectives {
    /// No directives.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inline `method` regardless of its size.
    pub fn force_inline(&self, method: MethodRef) {
        self.always.insert(method);
    }

    /// Never inline `method`. Wins over [`InliningDirectives::force_inline`].
    pub fn forbid_inline(&self, method: MethodRef) {
        self.never.insert(method);
    }

    /// Inlining the static `method` into another class need not trigger initialization of
    /// its holder.
    pub fn bypass_class_initialization(&self, method: MethodRef) {
        self.bypass_class_init.insert(method);
    }

    /// Returns `true` if `method` must be inlined.
    #[must_use]
    pub fn is_always(&self, method: &MethodRef) -> bool {
        self.always.contains(method) && !self.is_never(method)
    }

    /// Returns `true` if `method` must not be inlined.
    #[must_use]
    pub fn is_never(&self, method: &MethodRef) -> bool {
        self.never.contains(method)
    }

    /// Returns `true` if inlining `method` may skip the class initialization check.
    #[must_use]
    pub fn bypasses_class_init(&self, method: &MethodRef) -> bool {
        self.bypass_class_init.contains(method)
    }

    /// Returns `true` if no directive was given.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.always.is_empty() && self.never.is_empty() && self.bypass_class_init.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_wins() {
        let directives = InliningDirectives::new();
        let method = MethodRef::parse("a/A", "m", "()V").unwrap();
        assert!(directives.is_empty());

        directives.force_inline(method.clone());
        assert!(directives.is_always(&method));

        directives.forbid_inline(method.clone());
        assert!(!directives.is_always(&method));
        assert!(directives.is_never(&method));
        assert!(!directives.bypasses_class_init(&method));
    }
}

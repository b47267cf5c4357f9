//! Missing definition bookkeeping.
//!
//! References that resolve to nothing are not fatal while tracing. They are collected here
//! with the methods that made them, and reported once at the end of the run. `dont_warn`
//! patterns suppress entries by the missing class or by the referencing class.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Write,
};

use crate::{
    program::references::{Reference, TypeRef},
    Error,
};

/// A `dont_warn` class name pattern.
///
/// Patterns use Java names: `**` matches any sequence, `*` any sequence without `.`, and
/// `?` a single character other than `.`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNamePattern {
    pattern: String,
}

impl ClassNamePattern {
    /// Creates a pattern; internal names (`a/b/C`) are accepted too.
    #[must_use]
    pub fn new(pattern: &str) -> Self {
        ClassNamePattern {
            pattern: pattern.replace('/', "."),
        }
    }

    /// Returns `true` if the Java name of `ty` matches.
    #[must_use]
    pub fn matches(&self, ty: &TypeRef) -> bool {
        let base = ty.base_type();
        if !base.is_class() {
            return false;
        }
        glob_match(self.pattern.as_bytes(), base.java_name().as_bytes())
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern {
        [] => text.is_empty(),
        [b'*', b'*', rest @ ..] => (0..=text.len()).any(|i| glob_match(rest, &text[i..])),
        [b'*', rest @ ..] => {
            let segment = text.iter().position(|c| *c == b'.').unwrap_or(text.len());
            (0..=segment).any(|i| glob_match(rest, &text[i..]))
        }
        [b'?', rest @ ..] => match text {
            [c, tail @ ..] if *c != b'.' => glob_match(rest, tail),
            _ => false,
        },
        [p, rest @ ..] => match text {
            [c, tail @ ..] if c == p => glob_match(rest, tail),
            _ => false,
        },
    }
}

/// A set of `dont_warn` patterns.
#[derive(Debug, Clone, Default)]
pub struct DontWarn {
    patterns: Vec<ClassNamePattern>,
}

impl DontWarn {
    /// Parses every pattern.
    #[must_use]
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        DontWarn {
            patterns: patterns
                .iter()
                .map(|p| ClassNamePattern::new(p.as_ref()))
                .collect(),
        }
    }

    /// Returns `true` if any pattern matches `ty`.
    #[must_use]
    pub fn matches(&self, ty: &TypeRef) -> bool {
        self.patterns.iter().any(|p| p.matches(ty))
    }

    /// Returns `true` if a missing `item` referenced from `context` is suppressed: either the
    /// class of the missing item or the referencing class matches.
    #[must_use]
    pub fn suppresses(&self, item: &Reference, context: &TypeRef) -> bool {
        self.matches(item.context_type()) || self.matches(context)
    }
}

/// The missing-definition report after applying `dont_warn`.
#[derive(Debug, Clone, Default)]
pub struct MissingReport {
    /// Missing definitions with every unsuppressed referencing context
    pub reported: BTreeMap<Reference, BTreeSet<Reference>>,
    /// Number of suppressed (definition, context) pairs
    pub suppressed: usize,
}

impl MissingReport {
    /// Returns `true` if nothing needs reporting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reported.is_empty()
    }

    /// Renders one line per missing definition followed by its contexts.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (item, contexts) in &self.reported {
            let kind = match item {
                Reference::Type(_) => "class",
                Reference::Field(_) => "field",
                Reference::Method(_) => "method",
            };
            let _ = writeln!(out, "Missing {kind} {item}");
            for context in contexts {
                let _ = writeln!(out, "  referenced from {context}");
            }
        }
        out
    }

    /// The aggregated error for this report, `None` when empty.
    #[must_use]
    pub fn to_error(&self) -> Option<Error> {
        (!self.is_empty()).then(|| Error::MissingDefinitions {
            count: self.reported.len(),
            report: self.render(),
        })
    }
}

/// Missing classes, fields and methods with their referencing methods.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingReferences {
    entries: BTreeMap<Reference, BTreeSet<Reference>>,
}

impl MissingReferences {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `context` (a method, or a class for supertype references) references the
    /// missing `item`. Returns `true` on the first report of `item`.
    pub fn record(&mut self, item: Reference, context: &Reference) -> bool {
        let fresh = !self.entries.contains_key(&item);
        self.entries.entry(item).or_default().insert(context.clone());
        fresh
    }

    /// Returns `true` if `item` is missing.
    #[must_use]
    pub fn contains(&self, item: &Reference) -> bool {
        self.entries.contains_key(item)
    }

    /// Number of distinct missing definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is missing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Missing definitions in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&Reference, &BTreeSet<Reference>)> + '_ {
        self.entries.iter()
    }

    /// Missing classes in sorted order.
    pub fn classes(&self) -> impl Iterator<Item = &TypeRef> + '_ {
        self.entries.keys().filter_map(|item| match item {
            Reference::Type(ty) => Some(ty),
            _ => None,
        })
    }

    /// Applies `dont_warn` and builds the report.
    #[must_use]
    pub fn report(&self, dont_warn: &DontWarn) -> MissingReport {
        let mut report = MissingReport::default();
        for (item, contexts) in &self.entries {
            let kept: BTreeSet<Reference> = contexts
                .iter()
                .filter(|context| !dont_warn.suppresses(item, context.context_type()))
                .cloned()
                .collect();
            report.suppressed += contexts.len() - kept.len();
            if !kept.is_empty() {
                report.reported.insert(item.clone(), kept);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::references::{FieldRef, MethodRef};

    #[test]
    fn test_patterns() {
        let ty = TypeRef::class("com/example/sub/Thing");
        assert!(ClassNamePattern::new("com.example.**").matches(&ty));
        assert!(!ClassNamePattern::new("com.example.*").matches(&ty));
        assert!(ClassNamePattern::new("com.example.sub.*").matches(&ty));
        assert!(ClassNamePattern::new("com.example.sub.Thing").matches(&ty));
        assert!(ClassNamePattern::new("com/example/sub/Th?ng").matches(&ty));
        assert!(ClassNamePattern::new("**").matches(&ty));
        assert!(!ClassNamePattern::new("**").matches(&TypeRef::int()));
    }

    #[test]
    fn test_report_suppression() {
        let context = Reference::Method(MethodRef::parse("app/Main", "main", "()V").unwrap());
        let other = Reference::Type(TypeRef::class("lib/Glue"));
        let mut missing = MissingReferences::new();
        assert!(missing.record(Reference::Type(TypeRef::class("x/Gone")), &context));
        assert!(!missing.record(Reference::Type(TypeRef::class("x/Gone")), &other));
        missing.record(
            Reference::Field(FieldRef::parse("y/Y", "f", "I").unwrap()),
            &context,
        );

        let report = missing.report(&DontWarn::new(&["lib.**"]));
        assert_eq!(report.reported.len(), 2);
        assert_eq!(report.suppressed, 1);

        let report = missing.report(&DontWarn::new(&["x.*", "y.Y"]));
        assert!(report.is_empty());
        assert!(report.to_error().is_none());

        let error = missing.report(&DontWarn::default()).to_error().unwrap();
        assert!(matches!(error, Error::MissingDefinitions { count: 2, .. }));
    }
}

//! Retracing of class names and stack traces.

use std::fmt;

use crate::{
    lens::GraphLens,
    program::{
        references::{MethodRef, TypeRef},
        ProgramGraph,
    },
    retrace::{mapping::java_type, RetraceMapping},
};

/// An original method, or only its holder and name when the mapping does not know it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetracedMethodReference {
    /// The mapping names the original method
    Known(MethodRef),
    /// Nothing is known beyond the (retraced) holder and the output name
    Unknown {
        /// Retraced holder
        holder: TypeRef,
        /// Name as found in the frame
        name: String,
    },
}

impl RetracedMethodReference {
    /// The original holder.
    #[must_use]
    pub fn holder(&self) -> &TypeRef {
        match self {
            RetracedMethodReference::Known(method) => &method.holder,
            RetracedMethodReference::Unknown { holder, .. } => holder,
        }
    }

    /// The original method name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            RetracedMethodReference::Known(method) => method.name.as_str(),
            RetracedMethodReference::Unknown { name, .. } => name,
        }
    }

    /// Returns `true` if the mapping knew the method.
    #[must_use]
    pub fn is_known(&self) -> bool {
        matches!(self, RetracedMethodReference::Known(_))
    }
}

impl fmt::Display for RetracedMethodReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.holder(), self.name())
    }
}

/// One candidate for a frame, with its position among all candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetracedSingleFrame {
    /// The candidate method
    pub method: RetracedMethodReference,
    /// Position of this candidate, `0` for the first
    pub index: usize,
}

/// A parsed `at holder.method(source)` frame and its candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetracedFrame {
    /// Leading whitespace and `at `
    pub prefix: String,
    /// The parenthesized source position, without the parentheses
    pub source: String,
    /// Every original method the frame may stand for
    pub frames: Vec<RetracedSingleFrame>,
}

impl RetracedFrame {
    /// Returns `true` if more than one original method matches.
    #[must_use]
    pub fn is_ambiguous(&self) -> bool {
        self.frames.len() > 1
    }

    /// The frame as one line per candidate; alternatives are marked with `<OR>`.
    #[must_use]
    pub fn render(&self) -> Vec<String> {
        self.frames
            .iter()
            .map(|frame| {
                let source = retraced_source(&self.source, frame.method.holder());
                let marker = if frame.index == 0 { "" } else { "<OR> " };
                format!("{}{marker}{}({source})", self.prefix, frame.method)
            })
            .collect()
    }
}

/// Replaces the renamed `SourceFile` attribute by the original outermost class' file.
fn retraced_source(source: &str, holder: &TypeRef) -> String {
    let Some(rest) = source.strip_prefix("SourceFile") else {
        return source.to_string();
    };
    let outer = holder.simple_name().split('$').next().unwrap_or_default();
    format!("{outer}.java{rest}")
}

/// Maps output names back to the original program.
///
/// # Examples
///
/// ```rust
/// use cfshrink::retrace::{RetraceMapping, Retracer};
///
/// let mapping = RetraceMapping::parse("com.example.Main -> a.a:\n    void run() -> b\n")?;
/// let retracer = Retracer::new(mapping);
/// let lines = retracer.retrace_stack_trace("java.lang.Error\n\tat a.a.b(SourceFile:3)");
/// assert_eq!(lines[1], "\tat com.example.Main.run(Main.java:3)");
/// # Ok::<(), cfshrink::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Retracer {
    mapping: RetraceMapping,
}

impl Retracer {
    /// A retracer over an explicit mapping.
    #[must_use]
    pub fn new(mapping: RetraceMapping) -> Self {
        Retracer { mapping }
    }

    /// A retracer inverting `lens` over the classes of `program`.
    #[must_use]
    pub fn from_lens(lens: &GraphLens, program: &ProgramGraph) -> Self {
        Retracer::new(RetraceMapping::from_lens(lens, program))
    }

    /// The underlying mapping.
    #[must_use]
    pub fn mapping(&self) -> &RetraceMapping {
        &self.mapping
    }

    /// Original classes of a Java class name (`a.b.C`), sorted.
    #[must_use]
    pub fn retrace_class(&self, name: &str) -> Vec<TypeRef> {
        self.mapping.original_classes(&java_type(name))
    }

    /// Every original method that `holder.name` may stand for, in mapping order.
    ///
    /// A name the mapping does not know yields one unknown candidate per original holder.
    #[must_use]
    pub fn retrace_method(&self, holder: &str, name: &str) -> Vec<RetracedSingleFrame> {
        let current = java_type(holder);
        let known = self.mapping.original_methods(&current, name);
        let methods: Vec<RetracedMethodReference> = if known.is_empty() {
            self.mapping
                .original_classes(&current)
                .into_iter()
                .map(|holder| RetracedMethodReference::Unknown {
                    holder,
                    name: name.to_string(),
                })
                .collect()
        } else {
            known.into_iter().map(RetracedMethodReference::Known).collect()
        };
        methods
            .into_iter()
            .enumerate()
            .map(|(index, method)| RetracedSingleFrame { method, index })
            .collect()
    }

    /// Retraces a stack frame line `at a.b.c(Source:1)`. `None` if `line` is no frame.
    #[must_use]
    pub fn retrace_frame(&self, line: &str) -> Option<RetracedFrame> {
        let start = line.find("at ")?;
        if !line[..start].trim().is_empty() {
            return None;
        }
        let body = &line[start + 3..];
        let open = body.find('(')?;
        let close = body.rfind(')')?;
        if close < open {
            return None;
        }
        let (holder, name) = body[..open].rsplit_once('.')?;
        Some(RetracedFrame {
            prefix: line[..start + 3].to_string(),
            source: body[open + 1..close].to_string(),
            frames: self.retrace_method(holder, name),
        })
    }

    /// Retraces a whole stack trace, line by line.
    ///
    /// Frames expand to one line per candidate. Exception lines (`a.b: message`,
    /// `Caused by: a.b`, `Exception in thread "main" a.b`) get their class retraced when it
    /// maps to a single original. Everything else is copied.
    #[must_use]
    pub fn retrace_stack_trace(&self, trace: &str) -> Vec<String> {
        let mut out = Vec::new();
        for line in trace.lines() {
            if let Some(frame) = self.retrace_frame(line) {
                out.extend(frame.render());
            } else {
                out.push(self.retrace_exception_line(line));
            }
        }
        out
    }

    fn retrace_exception_line(&self, line: &str) -> String {
        let (prefix, rest) = if let Some(rest) = line.strip_prefix("Caused by: ") {
            ("Caused by: ", rest)
        } else if let Some(index) = line.find("\" ").filter(|_| line.starts_with("Exception in thread \"")) {
            line.split_at(index + 2)
        } else {
            ("", line)
        };
        let end = rest.find(':').unwrap_or(rest.len());
        let class = &rest[..end];
        let is_class_name = class.chars().any(char::is_alphabetic)
            && class
                .chars()
                .all(|c| c.is_alphanumeric() || matches!(c, '.' | '$' | '_'));
        if !is_class_name {
            return line.to_string();
        }
        match self.retrace_class(class).as_slice() {
            [original] => format!("{prefix}{original}{}", &rest[end..]),
            _ => line.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lens::LensLayer;

    fn merged() -> Retracer {
        let mut mapping = RetraceMapping::new();
        let current = TypeRef::class("a/a");
        mapping
            .add_class(current.clone(), TypeRef::class("app/First"))
            .add_class(current.clone(), TypeRef::class("app/Second"));
        let m = MethodRef::parse("a/a", "a", "()V").unwrap();
        mapping
            .add_method(&m, MethodRef::parse("app/First", "run", "()V").unwrap())
            .add_method(&m, MethodRef::parse("app/Second", "go", "()V").unwrap());
        Retracer::new(mapping)
    }

    #[test]
    fn test_ambiguous_frame_lists_every_candidate() {
        let retracer = merged();
        let frame = retracer.retrace_frame("\tat a.a.a(SourceFile:7)").unwrap();
        assert!(frame.is_ambiguous());
        assert_eq!(frame.frames[0].index, 0);
        assert_eq!(frame.frames[1].index, 1);
        assert_eq!(
            frame.render(),
            vec![
                "\tat app.First.run(First.java:7)".to_string(),
                "\tat <OR> app.Second.go(Second.java:7)".to_string(),
            ]
        );
    }

    #[test]
    fn test_unknown_method_keeps_its_name() {
        let retracer = merged();
        let frames = retracer.retrace_method("a.a", "zz");
        assert_eq!(frames.len(), 2);
        assert!(!frames[0].method.is_known());
        assert_eq!(frames[0].method.name(), "zz");
    }

    #[test]
    fn test_exception_lines() {
        let mut mapping = RetraceMapping::new();
        mapping.add_class(TypeRef::class("a/b"), TypeRef::class("app/Failure"));
        let retracer = Retracer::new(mapping);
        let lines = retracer.retrace_stack_trace(
            "Exception in thread \"main\" a.b: boom\nCaused by: a.b\n\tat java.lang.Thread.run(Thread.java:1)\n...",
        );
        assert_eq!(lines[0], "Exception in thread \"main\" app.Failure: boom");
        assert_eq!(lines[1], "Caused by: app.Failure");
        assert_eq!(lines[2], "\tat java.lang.Thread.run(Thread.java:1)");
        assert_eq!(lines[3], "...");
    }

    #[test]
    fn test_from_lens() {
        use crate::test::fixtures::{class, empty_virtual, program_of};

        let program = program_of(vec![class("app/A").with_method(empty_virtual("app/A", "a"))]);
        let mut builder = LensLayer::builder("merge");
        builder.map_type(TypeRef::class("app/B"), TypeRef::class("app/A"));
        let lens = GraphLens::identity().extend(builder.build().unwrap());

        let retracer = Retracer::from_lens(&lens, &program);
        assert_eq!(
            retracer.retrace_class("app.A"),
            vec![TypeRef::class("app/A"), TypeRef::class("app/B")]
        );
        let frames = retracer.retrace_method("app.A", "a");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].index, 1);
        assert_eq!(frames[1].method.holder(), &TypeRef::class("app/B"));
    }
}

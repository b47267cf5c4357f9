//! Inverse mapping from output names to original references.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    lens::GraphLens,
    program::{
        references::{MethodRef, Name, ProtoRef, TypeRef},
        ProgramGraph,
    },
    Result,
};

/// Output classes and method names mapped back to every original they stand for.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetraceMapping {
    classes: BTreeMap<TypeRef, BTreeSet<TypeRef>>,
    methods: BTreeMap<(TypeRef, Name), BTreeSet<MethodRef>>,
}

impl RetraceMapping {
    /// An empty mapping: every name retraces to itself.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The inverse of `lens` over the classes and methods of `program`.
    #[must_use]
    pub fn from_lens(lens: &GraphLens, program: &ProgramGraph) -> Self {
        let mut mapping = RetraceMapping::new();
        for class in program.program_classes() {
            for original in lens.original_types(&class.ty) {
                mapping.add_class(class.ty.clone(), original);
            }
            for method in &class.methods {
                for original in lens.original_methods(&method.reference) {
                    mapping.add_method(&method.reference, original);
                }
            }
        }
        log::debug!(
            "Retrace mapping over {} classes and {} method names",
            mapping.classes.len(),
            mapping.methods.len()
        );
        mapping
    }

    /// Records that output class `current` stands for `original`.
    pub fn add_class(&mut self, current: TypeRef, original: TypeRef) -> &mut Self {
        self.classes.entry(current).or_default().insert(original);
        self
    }

    /// Records that output method `current` stands for `original`.
    pub fn add_method(&mut self, current: &MethodRef, original: MethodRef) -> &mut Self {
        self.methods
            .entry((current.holder.clone(), current.name.clone()))
            .or_default()
            .insert(original);
        self
    }

    /// Originals of output class `ty`, sorted. Unmapped classes map to themselves.
    #[must_use]
    pub fn original_classes(&self, ty: &TypeRef) -> Vec<TypeRef> {
        match self.classes.get(ty) {
            Some(originals) => originals.iter().cloned().collect(),
            None => vec![ty.clone()],
        }
    }

    /// Originals of every method named `name` in output class `holder`, sorted.
    #[must_use]
    pub fn original_methods(&self, holder: &TypeRef, name: &str) -> Vec<MethodRef> {
        self.methods
            .get(&(holder.clone(), Name::new(name)))
            .map(|originals| originals.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns `true` if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.methods.is_empty()
    }

    /// Parses a ProGuard-style mapping file.
    ///
    /// ```text
    /// com.example.Original -> a.a:
    ///     int count -> a
    ///     void run(int,java.lang.String) -> b
    ///     1:4:java.lang.String name():10:13 -> c
    /// ```
    ///
    /// Field lines and line ranges are accepted and ignored. Lines starting with `#` are
    /// comments.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a member line before any class line, or for a
    /// line without `->`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut mapping = RetraceMapping::new();
        let mut current: Option<(TypeRef, TypeRef)> = None;

        for (number, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some((original, obfuscated)) = trimmed.split_once(" -> ") else {
                return Err(malformed_error!(
                    "mapping line {}: missing '->': {}",
                    number + 1,
                    trimmed
                ));
            };

            if !line.starts_with(char::is_whitespace) {
                let obfuscated = obfuscated.trim_end_matches(':');
                let original = java_type(original.trim());
                let obfuscated = java_type(obfuscated.trim());
                mapping.add_class(obfuscated.clone(), original.clone());
                current = Some((obfuscated, original));
                continue;
            }

            let Some((obfuscated_holder, original_holder)) = &current else {
                return Err(malformed_error!(
                    "mapping line {}: member outside of a class",
                    number + 1
                ));
            };
            // Fields carry no frames.
            let Some(open) = original.find('(') else {
                continue;
            };
            let signature = strip_line_range(&original[..open]);
            let Some((return_type, name)) = signature.trim().rsplit_once(' ') else {
                return Err(malformed_error!(
                    "mapping line {}: bad method signature {}",
                    number + 1,
                    original
                ));
            };
            let parameters = original[open + 1..]
                .split_once(')')
                .map(|(params, _)| params)
                .unwrap_or_default();
            let parameters: Vec<TypeRef> = parameters
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(java_type)
                .collect();
            let proto = ProtoRef::new(java_type(return_type.trim()), parameters);

            // `Outer.method` names a method moved in from another class.
            let (holder, name) = match name.rsplit_once('.') {
                Some((class, method)) => (java_type(class), method),
                None => (original_holder.clone(), name),
            };
            let current_method =
                MethodRef::new(obfuscated_holder.clone(), obfuscated.trim(), proto.clone());
            mapping.add_method(&current_method, MethodRef::new(holder, name, proto));
        }
        Ok(mapping)
    }
}

/// `10:13:void` -> `void`
fn strip_line_range(signature: &str) -> &str {
    let mut rest = signature.trim();
    while let Some((head, tail)) = rest.split_once(':') {
        if head.chars().all(|c| c.is_ascii_digit()) {
            rest = tail;
        } else {
            break;
        }
    }
    rest
}

/// A type from its Java source spelling: `int`, `java.lang.String[]`.
pub(crate) fn java_type(name: &str) -> TypeRef {
    if let Some(element) = name.strip_suffix("[]") {
        return java_type(element).array_of();
    }
    match name {
        "void" => TypeRef::void(),
        "int" => TypeRef::int(),
        "long" => TypeRef::long(),
        "float" => TypeRef::float(),
        "double" => TypeRef::double(),
        "boolean" => TypeRef::boolean(),
        "byte" => TypeRef::byte(),
        "char" => TypeRef::char(),
        "short" => TypeRef::short(),
        _ => TypeRef::from_java_name(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAPPING: &str = "\
# compiler: cfshrink
com.example.Main -> a.a:
    int count -> a
    void run(int,java.lang.String[]) -> b
    1:4:java.lang.String name():10:13 -> c
    void com.example.Util.helper() -> c
";

    #[test]
    fn test_parse_classes_and_methods() {
        let mapping = RetraceMapping::parse(MAPPING).unwrap();
        let obfuscated = TypeRef::class("a/a");
        assert_eq!(
            mapping.original_classes(&obfuscated),
            vec![TypeRef::class("com/example/Main")]
        );
        assert_eq!(
            mapping.original_methods(&obfuscated, "b"),
            vec![MethodRef::parse("com/example/Main", "run", "(I[Ljava/lang/String;)V").unwrap()]
        );

        let c = mapping.original_methods(&obfuscated, "c");
        assert_eq!(c.len(), 2);
        assert!(c.contains(&MethodRef::parse("com/example/Util", "helper", "()V").unwrap()));
        assert!(c.contains(&MethodRef::parse("com/example/Main", "name", "()Ljava/lang/String;").unwrap()));

        assert!(mapping.original_methods(&obfuscated, "a").is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(RetraceMapping::parse("    void run() -> a\n").is_err());
        assert!(RetraceMapping::parse("com.example.Main a.a\n").is_err());
    }

    #[test]
    fn test_unmapped_class_is_itself() {
        let mapping = RetraceMapping::new();
        let ty = TypeRef::class("x/Y");
        assert_eq!(mapping.original_classes(&ty), vec![ty]);
    }
}

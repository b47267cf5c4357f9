//! JVM descriptor grammar.
//!
//! Field descriptors (`I`, `Ljava/lang/String;`, `[[J`) and method descriptors
//! (`(ILjava/lang/Object;)V`) are validated and split here; the reference types in
//! [`super::references`] keep the validated descriptor text and derive everything else from
//! it on demand.

use crate::Result;

/// Kind of value a descriptor denotes, as seen by the operand stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum ValueKind {
    /// `Z`, `B`, `C`, `S`, `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// Classes and arrays
    Reference,
    /// `V`, only valid as a return type
    Void,
}

impl ValueKind {
    /// Number of local variable / stack slots a value of this kind occupies.
    #[must_use]
    pub const fn slots(self) -> usize {
        match self {
            ValueKind::Long | ValueKind::Double => 2,
            ValueKind::Void => 0,
            _ => 1,
        }
    }

    /// Returns `true` for `long` and `double`.
    #[must_use]
    pub const fn is_wide(self) -> bool {
        matches!(self, ValueKind::Long | ValueKind::Double)
    }

    /// Kind of the first character of a validated descriptor.
    #[must_use]
    pub fn of_descriptor(descriptor: &str) -> ValueKind {
        match descriptor.as_bytes().first() {
            Some(b'J') => ValueKind::Long,
            Some(b'F') => ValueKind::Float,
            Some(b'D') => ValueKind::Double,
            Some(b'V') => ValueKind::Void,
            Some(b'L' | b'[') => ValueKind::Reference,
            _ => ValueKind::Int,
        }
    }
}

/// Splits the first field descriptor off `input`, returning it and the remainder.
fn split_field_type(input: &str) -> Result<(&str, &str)> {
    let bytes = input.as_bytes();
    let mut pos = 0;
    while bytes.get(pos) == Some(&b'[') {
        pos += 1;
    }
    if pos > 255 {
        return Err(malformed_error!(
            "Array descriptor '{}' exceeds 255 dimensions",
            input
        ));
    }
    match bytes.get(pos) {
        Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => {
            Ok((&input[..=pos], &input[pos + 1..]))
        }
        Some(b'L') => {
            let Some(end) = input[pos..].find(';') else {
                return Err(malformed_error!("Unterminated class descriptor '{}'", input));
            };
            let name = &input[pos + 1..pos + end];
            if name.is_empty() || name.contains(['.', '[', '(', ')']) {
                return Err(malformed_error!("Invalid class name in descriptor '{}'", input));
            }
            Ok((&input[..=pos + end], &input[pos + end + 1..]))
        }
        _ => Err(malformed_error!("Invalid field descriptor '{}'", input)),
    }
}

/// Validates a field descriptor.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if `descriptor` is not exactly one field type.
pub fn validate_field_descriptor(descriptor: &str) -> Result<()> {
    let (_, rest) = split_field_type(descriptor)?;
    if !rest.is_empty() {
        return Err(malformed_error!(
            "Trailing characters in field descriptor '{}'",
            descriptor
        ));
    }
    Ok(())
}

/// Validates a return descriptor (a field descriptor or `V`).
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for anything else.
pub fn validate_return_descriptor(descriptor: &str) -> Result<()> {
    if descriptor == "V" {
        return Ok(());
    }
    validate_field_descriptor(descriptor)
}

/// Splits a method descriptor into its parameter descriptors and return descriptor.
///
/// # Arguments
///
/// * `descriptor` - A method descriptor such as `(I[JLjava/lang/String;)V`
///
/// # Returns
///
/// The parameter descriptors in declaration order and the return descriptor.
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] if the descriptor is not well formed.
pub fn split_method_descriptor(descriptor: &str) -> Result<(Vec<&str>, &str)> {
    let Some(mut rest) = descriptor.strip_prefix('(') else {
        return Err(malformed_error!(
            "Method descriptor '{}' does not start with '('",
            descriptor
        ));
    };

    let mut params = Vec::new();
    loop {
        if let Some(after) = rest.strip_prefix(')') {
            rest = after;
            break;
        }
        if rest.is_empty() {
            return Err(malformed_error!(
                "Unterminated parameter list in '{}'",
                descriptor
            ));
        }
        let (param, after) = split_field_type(rest)?;
        params.push(param);
        rest = after;
    }

    validate_return_descriptor(rest)?;
    Ok((params, rest))
}

/// Converts a Java source name (`java.lang.String`) into a class descriptor.
#[must_use]
pub fn java_name_to_descriptor(name: &str) -> String {
    format!("L{};", name.replace('.', "/"))
}

/// Converts a class descriptor (`Ljava/lang/String;`) into a Java source name.
///
/// Array and primitive descriptors are returned with `[]` suffixes and keyword names.
#[must_use]
pub fn descriptor_to_java_name(descriptor: &str) -> String {
    let dims = descriptor.bytes().take_while(|b| *b == b'[').count();
    let base = &descriptor[dims..];
    let mut name = match base {
        "Z" => "boolean".to_string(),
        "B" => "byte".to_string(),
        "C" => "char".to_string(),
        "S" => "short".to_string(),
        "I" => "int".to_string(),
        "J" => "long".to_string(),
        "F" => "float".to_string(),
        "D" => "double".to_string(),
        "V" => "void".to_string(),
        _ => base
            .strip_prefix('L')
            .and_then(|s| s.strip_suffix(';'))
            .unwrap_or(base)
            .replace('/', "."),
    };
    for _ in 0..dims {
        name.push_str("[]");
    }
    name
}

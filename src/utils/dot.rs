//! DOT format helpers for rendering IR control flow graphs with Graphviz.

/// Escapes a label for use inside a quoted DOT record field.
#[must_use]
pub fn escape_dot(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\l"),
            '\r' => {}
            '<' => out.push_str("\\<"),
            '>' => out.push_str("\\>"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '|' => out.push_str("\\|"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_record_characters() {
        assert_eq!(escape_dot("<init>"), "\\<init\\>");
        assert_eq!(escape_dot("a|b"), "a\\|b");
        assert_eq!(escape_dot("say \"hi\""), "say \\\"hi\\\"");
    }

    #[test]
    fn test_escape_newlines_left_justify() {
        assert_eq!(escape_dot("v0 = 1\nreturn v0\n"), "v0 = 1\\lreturn v0\\l");
    }
}

//! Identifier mapping for emitted code.

use crate::asyncapi::{
    upper_first, TYPE_BOOLEAN, TYPE_INTEGER, TYPE_NUMBER, TYPE_STRING,
};

/// Keywords that need raw-identifier escaping in field position.
const KEYWORDS: &[&str] = &[
    "as", "async", "await", "box", "break", "const", "continue", "crate", "dyn", "else", "enum",
    "extern", "fn", "for", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut",
    "pub", "ref", "return", "static", "struct", "super", "trait", "type", "unsafe", "use",
    "where", "while",
];

/// snake_case identifier: `HelloWorld` becomes `hello_world`, `orderId`
/// becomes `order_id`, `user-signup` becomes `user_signup`.
pub(super) fn snake_identifier(s: &str) -> String {
    let mut out = String::new();
    let mut prev_is_lower_or_digit = false;
    for c in s.chars() {
        if !c.is_ascii_alphanumeric() {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_is_lower_or_digit = false;
            continue;
        }
        if c.is_ascii_uppercase() {
            if prev_is_lower_or_digit && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_is_lower_or_digit = false;
        } else {
            out.push(c);
            prev_is_lower_or_digit = true;
        }
    }
    out
}

/// Field identifier, escaping Rust keywords.
pub(super) fn field_identifier(key: &str) -> String {
    let name = snake_identifier(key);
    if KEYWORDS.contains(&name.as_str()) {
        format!("r#{name}")
    } else {
        name
    }
}

/// Rust type for a scalar schema type, when it is one.
pub(super) fn scalar_type(schema_type: &str) -> Option<&'static str> {
    match schema_type {
        TYPE_STRING => Some("String"),
        TYPE_INTEGER => Some("i64"),
        TYPE_NUMBER => Some("f64"),
        TYPE_BOOLEAN => Some("bool"),
        _ => None,
    }
}

/// Emitted type name for a `$ref` target.
pub(super) fn reference_type_name(reference: &str) -> String {
    if let Some(key) = reference.strip_prefix("#/components/schemas/") {
        format!("{}Schema", upper_first(key))
    } else if let Some(key) = reference.strip_prefix("#/components/messages/") {
        format!("{}Message", upper_first(key))
    } else if let Some(key) = reference.strip_prefix("#/components/parameters/") {
        format!("{}Parameter", upper_first(key))
    } else {
        "serde_json::Value".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_identifier() {
        assert_eq!(snake_identifier("HelloWorld"), "hello_world");
        assert_eq!(snake_identifier("orderId"), "order_id");
        assert_eq!(snake_identifier("user-signup"), "user_signup");
        assert_eq!(snake_identifier("V2IssueHello"), "v2_issue_hello");
    }

    #[test]
    fn test_field_identifier_escapes_keywords() {
        assert_eq!(field_identifier("type"), "r#type");
        assert_eq!(field_identifier("flag"), "flag");
    }

    #[test]
    fn test_reference_type_name() {
        assert_eq!(
            reference_type_name("#/components/schemas/flag"),
            "FlagSchema"
        );
        assert_eq!(
            reference_type_name("#/components/messages/ping"),
            "PingMessage"
        );
    }
}

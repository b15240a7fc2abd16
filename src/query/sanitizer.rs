//! # Identifier Sanitizer
//!
//! Guards every value that is spliced into SQL text as a literal.
//!
//! Template-expansion params and the caller identity end up verbatim in a
//! statement, so they are restricted to the identifier grammar below.
//! Bound params never pass through here; the driver escapes those.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

/// Identifier grammar applied to template values and caller identities
pub const IDENTIFIER_PATTERN: &str = "^[A-Za-z][A-Za-z0-9_]*$";

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(IDENTIFIER_PATTERN).expect("identifier pattern is a valid regex")
});

/// A value that failed the identifier grammar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{value}' at '{path}' must match /{IDENTIFIER_PATTERN}/")]
pub struct ValidationError {
    /// Location of the offending key or value within the param tree
    pub path: String,
    /// The rejected text
    pub value: String,
}

/// Returns true when `candidate` satisfies the identifier grammar
pub fn is_identifier(candidate: &str) -> bool {
    IDENTIFIER.is_match(candidate)
}

/// Validate every key and string leaf of a template param map
pub fn validate_map(params: &Map<String, Value>) -> Result<(), ValidationError> {
    walk_map(params, "")
}

/// Validate a single request value, recursing into objects and arrays
pub fn validate(value: &Value) -> Result<(), ValidationError> {
    walk(value, "$")
}

fn walk_map(map: &Map<String, Value>, prefix: &str) -> Result<(), ValidationError> {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if !is_identifier(key) {
            return Err(ValidationError {
                path,
                value: key.clone(),
            });
        }
        walk(value, &path)?;
    }
    Ok(())
}

fn walk(value: &Value, path: &str) -> Result<(), ValidationError> {
    match value {
        Value::String(s) if !is_identifier(s) => Err(ValidationError {
            path: path.to_string(),
            value: s.clone(),
        }),
        Value::Object(map) => walk_map(map, path),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                walk(item, &format!("{path}[{i}]"))?;
            }
            Ok(())
        }
        // Numbers, booleans and null have no textual injection surface
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_identifier_grammar() {
        assert!(is_identifier("users"));
        assert!(is_identifier("a"));
        assert!(is_identifier("Table_2"));

        assert!(!is_identifier(""));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("_hidden"));
        assert!(!is_identifier("drop table"));
        assert!(!is_identifier("users;"));
        assert!(!is_identifier("naïve"));
    }

    #[test]
    fn test_grammar_is_anchored() {
        // An unanchored match would accept the leading identifier
        assert!(!is_identifier("x'); DROP TABLE users;--"));
        assert!(!is_identifier("users\n"));
    }

    #[test]
    fn test_flat_map_passes() {
        let params = map(json!({"table": "orders", "schema": "public", "limit": 10}));
        assert!(validate_map(&params).is_ok());
    }

    #[test]
    fn test_injection_value_rejected() {
        let params = map(json!({"table": "x'); DROP TABLE users;--"}));
        let err = validate_map(&params).unwrap_err();
        assert_eq!(err.path, "table");
        assert_eq!(err.value, "x'); DROP TABLE users;--");
    }

    #[test]
    fn test_bad_key_rejected() {
        let params = map(json!({"bad key": "orders"}));
        let err = validate_map(&params).unwrap_err();
        assert_eq!(err.value, "bad key");
    }

    #[test]
    fn test_every_nested_entry_is_checked() {
        // The offending entry sits after a valid nested object
        let params = map(json!({
            "a": {"col": "int"},
            "z": {"id": "int", "name": "text); DROP TABLE users;--"}
        }));
        let err = validate_map(&params).unwrap_err();
        assert_eq!(err.path, "z.name");
    }

    #[test]
    fn test_nested_key_rejected() {
        let params = map(json!({"body": {"col umn": 1}}));
        let err = validate_map(&params).unwrap_err();
        assert_eq!(err.path, "body.col umn");
    }

    #[test]
    fn test_arrays_are_walked() {
        assert!(validate(&json!(["a", "b"])).is_ok());
        let err = validate(&json!(["a", "b c"])).unwrap_err();
        assert_eq!(err.path, "$[1]");
    }

    #[test]
    fn test_scalars_pass() {
        assert!(validate(&json!(1.5)).is_ok());
        assert!(validate(&json!(true)).is_ok());
        assert!(validate(&Value::Null).is_ok());
    }
}

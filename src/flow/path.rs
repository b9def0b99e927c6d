/// Extraction paths
///
/// Paths are JSONPath expressions evaluated against a document that binds the
/// incoming value as `data`, so `$.data` is the value itself, `$.data.task` a
/// field of it and `$.data.result.*.href` a wildcard projection that always
/// yields an Array.

use crate::flow::types::VALUE_ROOT;
use serde_json::{json, Value};
use thiserror::Error;

/// Why a path could not be applied to a runtime value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("path is not rooted at $.data")]
    NotRooted,
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("path matched nothing in the value")]
    NotFound,
}

/// Whether the path starts at the bound value
pub fn is_rooted(path: &str) -> bool {
    path == VALUE_ROOT
        || path
            .strip_prefix(VALUE_ROOT)
            .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
}

/// Whether the path passes the value through unchanged
pub fn is_identity(path: &str) -> bool {
    path == VALUE_ROOT
}

/// Whether the path may select several values (and therefore yields an Array)
///
/// Wildcards, recursive descent, filters, unions and slices make a projection.
/// Characters inside quoted keys (`$.data['a:b']`) are part of the key.
pub fn is_projection(path: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut depth = 0usize;
    let mut prev = '\0';
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == '\\' {
                chars.next();
            } else if c == q {
                quote = None;
            }
            prev = c;
            continue;
        }
        match c {
            '\'' | '"' if depth > 0 => quote = Some(c),
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '*' => return true,
            '.' if prev == '.' => return true,
            '?' if chars.peek() == Some(&'(') => return true,
            ',' | ':' if depth > 0 => return true,
            _ => {}
        }
        prev = c;
    }
    false
}

/// Apply `path` to `value`
///
/// Definite paths must match exactly one location; projections collect every
/// match, in document order, into an Array (possibly empty).
pub fn extract(value: &Value, path: &str) -> Result<Value, ExtractError> {
    if !is_rooted(path) {
        return Err(ExtractError::NotRooted);
    }
    if is_identity(path) {
        return Ok(value.clone());
    }

    let document = json!({ "data": value });
    let matches = jsonpath_lib::select(&document, path)
        .map_err(|e| ExtractError::InvalidPath(format!("{:?}", e)))?;

    if is_projection(path) {
        return Ok(Value::Array(matches.into_iter().cloned().collect()));
    }

    matches.first().map(|v| (*v).clone()).ok_or(ExtractError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_path_returns_value() {
        let value = json!({ "task": "X" });
        assert_eq!(extract(&value, "$.data").unwrap(), value);
    }

    #[test]
    fn test_field_and_index_access() {
        let value = json!({ "task": "X", "result": [{ "href": "u1" }, { "href": "u2" }] });
        assert_eq!(extract(&value, "$.data.task").unwrap(), json!("X"));
        assert_eq!(extract(&value, "$.data.result[1].href").unwrap(), json!("u2"));
    }

    #[test]
    fn test_wildcard_projection_collects_in_order() {
        let value = json!({ "result": [{ "href": "u1" }, { "href": "u2" }, { "href": "u3" }] });
        assert_eq!(
            extract(&value, "$.data.result.*.href").unwrap(),
            json!(["u1", "u2", "u3"])
        );
        assert_eq!(
            extract(&value, "$.data.result[*].href").unwrap(),
            json!(["u1", "u2", "u3"])
        );
    }

    #[test]
    fn test_missing_field_is_not_found() {
        let value = json!({ "task": "X" });
        assert_eq!(extract(&value, "$.data.now"), Err(ExtractError::NotFound));
    }

    #[test]
    fn test_empty_projection_is_empty_array() {
        let value = json!({ "result": [] });
        assert_eq!(extract(&value, "$.data.result.*.href").unwrap(), json!([]));
    }

    #[test]
    fn test_rooting_rules() {
        assert!(is_rooted("$.data"));
        assert!(is_rooted("$.data.task"));
        assert!(is_rooted("$.data[0]"));
        assert!(!is_rooted("$.database"));
        assert!(!is_rooted("data.task"));
        assert_eq!(extract(&json!({}), "$.task"), Err(ExtractError::NotRooted));
    }

    #[test]
    fn test_projection_detection() {
        assert!(is_projection("$.data.result.*.href"));
        assert!(is_projection("$.data..href"));
        assert!(!is_projection("$.data.result[0].href"));
        assert!(is_projection("$.data.result[0:2]"));
        assert!(is_projection("$.data['a','b']"));
        assert!(is_projection("$.data.result[?(@.href)]"));
    }

    #[test]
    fn test_quoted_keys_are_definite() {
        assert!(!is_projection("$.data['a:b']"));
        assert!(!is_projection("$.data['a,b'].c"));
        assert!(!is_projection("$.data[\"x*y\"]"));
        assert!(!is_projection("$.data['it\\'s..']"));

        let value = json!({ "a:b": "x" });
        assert_eq!(extract(&value, "$.data['a:b']").unwrap(), json!("x"));
    }
}

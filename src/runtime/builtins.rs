/// Built-in marshaling functions
///
/// Small local collaborators that convert between model text and structured
/// values: `string2array` and `string2object` parse JSON text, `array2string`
/// serialises any value back to JSON text with non-ASCII characters kept as-is.

use crate::error::CollaboratorError;
use crate::runtime::invoker::FunctionRegistry;
use serde_json::Value;

pub const STRING_TO_ARRAY: &str = "string2array";
pub const STRING_TO_OBJECT: &str = "string2object";
pub const ARRAY_TO_STRING: &str = "array2string";

/// Register every built-in on a registry
pub fn register_all(registry: &mut FunctionRegistry) {
    registry
        .register(STRING_TO_ARRAY, string_to_array)
        .register(STRING_TO_OBJECT, string_to_object)
        .register(ARRAY_TO_STRING, value_to_string);
}

fn parse_text(function: &str, input: &Value) -> Result<Value, CollaboratorError> {
    let text = input
        .as_str()
        .ok_or_else(|| CollaboratorError::failed(format!("{} expects a String input", function)))?;
    serde_json::from_str(text.trim())
        .map_err(|e| CollaboratorError::failed(format!("{}: input is not valid JSON: {}", function, e)))
}

/// Parse JSON text that must hold an Array
pub fn string_to_array(input: Value) -> Result<Value, CollaboratorError> {
    match parse_text(STRING_TO_ARRAY, &input)? {
        array @ Value::Array(_) => Ok(array),
        _ => Err(CollaboratorError::failed("string2array: JSON text is not an array")),
    }
}

/// Parse JSON text that must hold an Object
pub fn string_to_object(input: Value) -> Result<Value, CollaboratorError> {
    match parse_text(STRING_TO_OBJECT, &input)? {
        object @ Value::Object(_) => Ok(object),
        _ => Err(CollaboratorError::failed("string2object: JSON text is not an object")),
    }
}

/// Serialise any value to compact JSON text
pub fn value_to_string(input: Value) -> Result<Value, CollaboratorError> {
    serde_json::to_string(&input)
        .map(Value::String)
        .map_err(|e| CollaboratorError::failed(format!("array2string: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_to_array() {
        assert_eq!(
            string_to_array(json!(" [\"q1\", \"q2\"] ")).unwrap(),
            json!(["q1", "q2"])
        );
        assert!(string_to_array(json!("{\"a\": 1}")).is_err());
        assert!(string_to_array(json!("not json")).is_err());
        assert!(string_to_array(json!(3)).is_err());
    }

    #[test]
    fn test_string_to_object() {
        assert_eq!(string_to_object(json!("{\"a\": 1}")).unwrap(), json!({ "a": 1 }));
        assert!(string_to_object(json!("[1]")).is_err());
    }

    #[test]
    fn test_value_to_string_keeps_non_ascii() {
        let text = value_to_string(json!(["東京", "x"])).unwrap();
        assert_eq!(text, json!("[\"東京\",\"x\"]"));
    }
}

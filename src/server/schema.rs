//! Generic JSON-schema validation for tool inputs and outputs.
//!
//! One validator covers every tool: the dispatcher validates arguments
//! against the tool's input schema before invoking the handler, and the
//! handler's result against the output schema before wrapping it. The
//! supported subset is what the tool catalogue uses: `type`, `properties`,
//! `required`, `additionalProperties`, `items`, `enum`, numeric ranges, and
//! string/array length bounds.

use serde_json::Value;

/// Validate `value` against `schema`. Returns the first violation found.
pub fn validate(schema: &Value, value: &Value) -> Result<(), String> {
    validate_at(schema, value, "$")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema_obj.get("type").and_then(Value::as_str) {
        if !type_matches(expected, value) {
            return Err(format!(
                "{}: expected {}, got {}",
                path,
                expected,
                type_name(value)
            ));
        }
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return Err(format!("{}: value not in enum", path));
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(minimum) = schema_obj.get("minimum").and_then(Value::as_f64) {
            if number < minimum {
                return Err(format!("{}: {} below minimum {}", path, number, minimum));
            }
        }
        if let Some(maximum) = schema_obj.get("maximum").and_then(Value::as_f64) {
            if number > maximum {
                return Err(format!("{}: {} above maximum {}", path, number, maximum));
            }
        }
    }

    if let Some(text) = value.as_str() {
        let length = text.chars().count();
        if let Some(min_length) = schema_obj.get("minLength").and_then(Value::as_u64) {
            if (length as u64) < min_length {
                return Err(format!("{}: shorter than minLength {}", path, min_length));
            }
        }
        if let Some(max_length) = schema_obj.get("maxLength").and_then(Value::as_u64) {
            if (length as u64) > max_length {
                return Err(format!("{}: longer than maxLength {}", path, max_length));
            }
        }
    }

    if let Some(items) = value.as_array() {
        if let Some(min_items) = schema_obj.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min_items {
                return Err(format!("{}: fewer than minItems {}", path, min_items));
            }
        }
        if let Some(max_items) = schema_obj.get("maxItems").and_then(Value::as_u64) {
            if (items.len() as u64) > max_items {
                return Err(format!("{}: more than maxItems {}", path, max_items));
            }
        }
        if let Some(item_schema) = schema_obj.get("items") {
            for (index, item) in items.iter().enumerate() {
                validate_at(item_schema, item, &format!("{}[{}]", path, index))?;
            }
        }
    }

    if let Some(object) = value.as_object() {
        let properties = schema_obj.get("properties").and_then(Value::as_object);

        if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    return Err(format!("{}: missing required field '{}'", path, name));
                }
            }
        }

        if let Some(properties) = properties {
            for (name, field) in object {
                match properties.get(name) {
                    Some(field_schema) => {
                        // null for an optional field is accepted as absent.
                        if field.is_null() && !is_required(schema_obj, name) {
                            continue;
                        }
                        validate_at(field_schema, field, &format!("{}.{}", path, name))?;
                    }
                    None => {
                        let additional = schema_obj
                            .get("additionalProperties")
                            .and_then(Value::as_bool)
                            .unwrap_or(true);
                        if !additional {
                            return Err(format!("{}: unexpected field '{}'", path, name));
                        }
                    }
                }
            }
        }
    }

    Ok(())
}

fn is_required(schema_obj: &serde_json::Map<String, Value>, name: &str) -> bool {
    schema_obj
        .get("required")
        .and_then(Value::as_array)
        .map(|required| required.iter().any(|r| r.as_str() == Some(name)))
        .unwrap_or(false)
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn capture_schema() -> Value {
        json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["statement", "alternatives"],
            "properties": {
                "statement": {"type": "string", "minLength": 1, "maxLength": 400},
                "alternatives": {"type": "array", "minItems": 1, "items": {"type": "string"}},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1}
            }
        })
    }

    #[test]
    fn test_valid_payload() {
        let args = json!({
            "statement": "Use PostgreSQL",
            "alternatives": ["MongoDB"],
            "confidence": 0.85
        });
        assert!(validate(&capture_schema(), &args).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let args = json!({"statement": "x"});
        let err = validate(&capture_schema(), &args).unwrap_err();
        assert!(err.contains("alternatives"));
    }

    #[test]
    fn test_empty_alternatives_rejected() {
        let args = json!({"statement": "x", "alternatives": []});
        let err = validate(&capture_schema(), &args).unwrap_err();
        assert!(err.contains("minItems"));
    }

    #[test]
    fn test_confidence_out_of_range() {
        let args = json!({"statement": "x", "alternatives": ["y"], "confidence": 1.5});
        let err = validate(&capture_schema(), &args).unwrap_err();
        assert!(err.contains("maximum"));
    }

    #[test]
    fn test_additional_properties_rejected() {
        let args = json!({"statement": "x", "alternatives": ["y"], "extra": true});
        let err = validate(&capture_schema(), &args).unwrap_err();
        assert!(err.contains("unexpected field"));
    }

    #[test]
    fn test_wrong_type() {
        let args = json!({"statement": 42, "alternatives": ["y"]});
        let err = validate(&capture_schema(), &args).unwrap_err();
        assert!(err.contains("expected string"));
    }

    #[test]
    fn test_null_optional_accepted() {
        let args = json!({"statement": "x", "alternatives": ["y"], "confidence": null});
        assert!(validate(&capture_schema(), &args).is_ok());
    }

    #[test]
    fn test_enum() {
        let schema = json!({"type": "string", "enum": ["success", "failure", "partial"]});
        assert!(validate(&schema, &json!("success")).is_ok());
        assert!(validate(&schema, &json!("maybe")).is_err());
    }

    #[test]
    fn test_nested_array_items() {
        let schema = json!({
            "type": "object",
            "properties": {"steps": {"type": "array", "items": {"type": "string", "maxLength": 5}}}
        });
        assert!(validate(&schema, &json!({"steps": ["ok"]})).is_ok());
        assert!(validate(&schema, &json!({"steps": ["too long indeed"]})).is_err());
    }
}

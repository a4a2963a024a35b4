//! Parameter-schema plumbing: building, merging, masking, validating, and
//! coercing call input.
//!
//! Schemas are plain `serde_json::Value` documents in JSON-Schema shape.
//! Typed argument structs go through [`json_schema_for`](crate::json_schema_for);
//! hand-written documents use [`object_schema`]. Validation is backed by the
//! `jsonschema` crate and formats violations so the model can self-correct.

use crate::errors::ToolError;
use serde_json::{Map, Value};

/// Build an object schema from `(name, property-schema)` pairs.
///
/// # Example
///
/// ```
/// use quiver_rs::schema::object_schema;
/// use serde_json::json;
///
/// let schema = object_schema(
///     &[("query", json!({"type": "string", "description": "Search query"}))],
///     &["query"],
/// );
/// assert_eq!(schema["type"], "object");
/// ```
pub fn object_schema(properties: &[(&str, Value)], required: &[&str]) -> Value {
    let props: Map<String, Value> = properties
        .iter()
        .map(|(name, schema)| ((*name).to_string(), schema.clone()))
        .collect();
    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required,
    })
}

/// Recursively merge `extension` onto `base`; extension values win on
/// conflict. Used to fold provider-specific schema extensions into a tool's
/// base parameter document.
pub fn merge_schemas(base: &Value, extension: &Value) -> Value {
    match (base, extension) {
        (Value::Object(b), Value::Object(e)) => {
            let mut merged = b.clone();
            for (key, ext_value) in e {
                match merged.get(key) {
                    Some(base_value) => {
                        let combined = merge_schemas(base_value, ext_value);
                        merged.insert(key.clone(), combined);
                    }
                    None => {
                        merged.insert(key.clone(), ext_value.clone());
                    }
                }
            }
            Value::Object(merged)
        }
        // Non-object extension replaces the base wholesale.
        _ => extension.clone(),
    }
}

/// Remove the named keys from a schema's `properties` and `required` lists.
///
/// This is how preset parameters stay invisible: the model never sees keys
/// the engine injects on its behalf.
pub fn strip_properties(schema: &Value, keys: &[String]) -> Value {
    if keys.is_empty() {
        return schema.clone();
    }
    let mut out = schema.clone();
    if let Some(props) = out.get_mut("properties").and_then(Value::as_object_mut) {
        for key in keys {
            props.remove(key);
        }
    }
    if let Some(required) = out.get_mut("required").and_then(Value::as_array_mut) {
        required.retain(|v| v.as_str().is_none_or(|s| !keys.iter().any(|k| k == s)));
    }
    out
}

/// Validate call arguments against a tool's schema.
///
/// Returns `Ok(())` if valid. Violations are collected one per line with
/// their instance path. If the schema itself does not compile, validation is
/// skipped: a broken schema is a registration problem and must not block
/// calls at runtime.
pub fn validate_arguments(tool: &str, schema: &Value, arguments: &Value) -> Result<(), ToolError> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(v) => v,
        Err(_) => return Ok(()),
    };

    let errors: Vec<String> = validator
        .iter_errors(arguments)
        .map(|e| format!("  - {}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ToolError::ValidationFailed {
            tool: tool.to_string(),
            detail: errors.join("\n"),
        })
    }
}

/// Best-effort coercion of argument values toward their declared property
/// types: exact-type values pass through, strings are parsed into declared
/// numbers/booleans, scalars are formatted into declared strings. Structural
/// conversion of objects and arrays is left to the typed handler layer.
pub fn coerce_arguments(schema: &Value, arguments: Value) -> Value {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return arguments;
    };
    let Value::Object(mut args) = arguments else {
        return arguments;
    };

    for (name, prop) in props {
        let Some(declared) = prop.get("type").and_then(Value::as_str) else {
            continue;
        };
        let Some(value) = args.get(name) else {
            continue;
        };
        if let Some(coerced) = coerce_value(declared, value) {
            args.insert(name.clone(), coerced);
        }
    }
    Value::Object(args)
}

/// Coerce a single value toward a declared primitive type. Returns `None`
/// when the value already matches or cannot be converted.
fn coerce_value(declared: &str, value: &Value) -> Option<Value> {
    match (declared, value) {
        ("integer", Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        ("number", Value::String(s)) => s.trim().parse::<f64>().ok().map(Value::from),
        ("boolean", Value::String(s)) => match s.trim() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        ("string", Value::Number(n)) => Some(Value::String(n.to_string())),
        ("string", Value::Bool(b)) => Some(Value::String(b.to_string())),
        _ => None,
    }
}

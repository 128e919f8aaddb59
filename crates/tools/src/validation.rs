//! Parameter Validation
//!
//! Tool arguments are checked against the descriptor's JSON Schema with the
//! `jsonschema` crate before any handler runs. Every violation is reported,
//! prefixed with the JSON pointer of the offending value, so the planner can
//! fix all of them in one retry.

use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

use crate::error::{ToolError, ToolResultOf};

/// Validate `args` against `schema`.
///
/// Schemas are compiled as draft 7; a `$schema` marker is ignored since the
/// descriptors only use keywords whose meaning is the same across drafts.
pub fn validate_params(schema: &Value, args: &Value) -> ToolResultOf<()> {
    let mut schema = schema.clone();
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
    }

    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .map_err(|e| ToolError::execution(format!("tool declares an unusable schema: {}", e)))?;

    let result = compiled.validate(args);
    if let Err(errors) = result {
        let problems: Vec<String> = errors
            .map(|error| {
                let path = error.instance_path.to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{}: {}", path, error)
                }
            })
            .collect();
        return Err(ToolError::Validation(problems.join("; ")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query_schema() -> Value {
        json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "type": "object",
            "properties": {
                "query": { "type": "string", "minLength": 1, "maxLength": 20 },
                "limit": { "type": "integer", "minimum": 1, "maximum": 100 },
                "order": { "type": "string", "enum": ["asc", "desc"] },
                "params": { "type": "array", "items": { "type": ["string", "number", "null"] } }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    fn problems(args: Value) -> String {
        match validate_params(&query_schema(), &args) {
            Err(ToolError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_arguments() {
        let args = json!({"query": "SELECT 1", "limit": 5, "order": "asc", "params": ["a", 1, null]});
        assert!(validate_params(&query_schema(), &args).is_ok());
    }

    #[test]
    fn test_every_problem_is_reported() {
        let msg = problems(json!({"sql": "x"}));
        assert!(msg.contains("query"), "{}", msg);
        assert!(msg.contains("sql"), "{}", msg);
        assert!(msg.contains("; "), "{}", msg);
    }

    #[test]
    fn test_problems_name_the_field() {
        let msg = problems(json!({"query": 7}));
        assert!(msg.starts_with("/query: "), "{}", msg);

        let msg = problems(json!({"query": "x", "limit": 2.5}));
        assert!(msg.starts_with("/limit: "), "{}", msg);

        let msg = problems(json!({"query": "x", "params": [true]}));
        assert!(msg.starts_with("/params/0: "), "{}", msg);
    }

    #[test]
    fn test_bounds_and_enum() {
        let msg = problems(json!({"query": "", "limit": 500, "order": "sideways"}));
        for field in ["/query", "/limit", "/order"] {
            assert!(msg.contains(field), "{} missing from {}", field, msg);
        }
    }

    #[test]
    fn test_local_refs() {
        let schema = json!({
            "type": "object",
            "properties": {
                "range": { "anyOf": [ { "$ref": "#/$defs/Range" }, { "type": "null" } ] }
            },
            "$defs": {
                "Range": {
                    "type": "object",
                    "properties": { "min": { "type": "integer" } },
                    "required": ["min"]
                }
            }
        });
        assert!(validate_params(&schema, &json!({"range": {"min": 1}})).is_ok());
        assert!(validate_params(&schema, &json!({"range": null})).is_ok());
        assert!(validate_params(&schema, &json!({"range": {"max": 1}})).is_err());
    }

    #[test]
    fn test_broken_schema_is_not_the_callers_fault() {
        let err = validate_params(&json!({"type": 12}), &json!({})).unwrap_err();
        assert!(!err.is_validation());
    }
}

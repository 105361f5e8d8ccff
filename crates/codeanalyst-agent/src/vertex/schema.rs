//! Convert MCP tool input schemas into function-declaration parameters.
//!
//! Function declarations accept an OpenAPI-style subset of JSON Schema.
//! Tool servers commonly emit `$schema`, `additionalProperties` and similar
//! keys which the API rejects, so those are stripped recursively.

use serde_json::{Map as JsonMap, Value as JsonValue, json};

use crate::mcp::ToolSpec;

use super::FunctionDeclaration;

const ALLOWED_KEYS: &[&str] = &[
    "type",
    "format",
    "title",
    "description",
    "nullable",
    "enum",
    "items",
    "properties",
    "required",
    "minItems",
    "maxItems",
    "minimum",
    "maximum",
    "minLength",
    "maxLength",
    "pattern",
    "anyOf",
    "default",
];

pub fn sanitize_schema(schema: &JsonValue) -> JsonValue {
    let Some(obj) = schema.as_object() else {
        return schema.clone();
    };
    let mut out = JsonMap::new();
    for (key, value) in obj {
        if !ALLOWED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let cleaned = match key.as_str() {
            // property names are user data, only their schemas are filtered
            "properties" => match value.as_object() {
                Some(props) => JsonValue::Object(
                    props
                        .iter()
                        .map(|(name, s)| (name.clone(), sanitize_schema(s)))
                        .collect(),
                ),
                None => continue,
            },
            "items" => sanitize_schema(value),
            "anyOf" => match value.as_array() {
                Some(variants) => JsonValue::Array(variants.iter().map(sanitize_schema).collect()),
                None => continue,
            },
            "type" => {
                if is_nullable_union(value) {
                    out.insert("nullable".to_string(), JsonValue::Bool(true));
                }
                collapse_type(value)
            }
            _ => value.clone(),
        };
        out.insert(key.clone(), cleaned);
    }
    JsonValue::Object(out)
}

fn is_nullable_union(value: &JsonValue) -> bool {
    value
        .as_array()
        .is_some_and(|types| types.iter().any(|t| t.as_str() == Some("null")))
}

/// Union types such as `["string", "null"]` are not accepted; keep the first
/// non-null member. Nullability is carried by the sibling `nullable` key.
fn collapse_type(value: &JsonValue) -> JsonValue {
    match value.as_array() {
        Some(types) => types
            .iter()
            .find(|t| t.as_str() != Some("null"))
            .cloned()
            .unwrap_or_else(|| json!("string")),
        None => value.clone(),
    }
}

pub fn declaration_for(tool: &ToolSpec) -> FunctionDeclaration {
    let mut parameters = sanitize_schema(&tool.input_schema);
    if parameters
        .as_object()
        .map(|o| o.get("type").is_none())
        .unwrap_or(true)
    {
        parameters = json!({ "type": "object", "properties": {} });
    }
    FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone().unwrap_or_default(),
        parameters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_unsupported_keys_recursively() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "owner": {"type": "string", "description": "Repository owner"},
                "path": {"type": ["string", "null"], "additionalProperties": false},
                "additionalProperties": {"type": "boolean"},
                "labels": {"type": "array", "items": {"type": "string", "$comment": "x"}}
            },
            "required": ["owner"]
        });
        let clean = sanitize_schema(&schema);
        assert!(clean.get("$schema").is_none());
        assert!(clean.get("additionalProperties").is_none());
        assert_eq!(clean["required"], json!(["owner"]));
        assert_eq!(clean["properties"]["owner"]["description"], "Repository owner");
        assert_eq!(
            clean["properties"]["path"],
            json!({"type": "string", "nullable": true})
        );
        // a property that happens to be named like a schema keyword survives
        assert_eq!(clean["properties"]["additionalProperties"]["type"], "boolean");
        assert_eq!(clean["properties"]["labels"]["items"], json!({"type": "string"}));
    }

    #[test]
    fn union_without_null_stays_non_nullable() {
        let clean = sanitize_schema(&json!({"type": ["integer", "string"]}));
        assert_eq!(clean, json!({"type": "integer"}));
        let only_null = sanitize_schema(&json!({"type": ["null"]}));
        assert_eq!(only_null, json!({"type": "string", "nullable": true}));
    }

    #[test]
    fn declaration_defaults_to_empty_object() {
        let tool = ToolSpec {
            name: "get_me".into(),
            description: None,
            input_schema: json!({"$schema": "x"}),
        };
        let decl = declaration_for(&tool);
        assert_eq!(decl.parameters, json!({"type": "object", "properties": {}}));
        assert_eq!(decl.description, "");
    }
}

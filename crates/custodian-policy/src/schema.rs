//! JSON schema builders for filter and action declarations

use serde_json::{json, Map, Value};

use crate::filters::ops::{Operator, ValueType};

/// Schema for an object declaration of `type_name`
///
/// Unknown properties are rejected, `type` is always required.
pub fn type_schema(type_name: &str, properties: Value, required: &[&str]) -> Value {
    let mut props = Map::new();
    props.insert("type".to_string(), json!({ "enum": [type_name] }));
    if let Value::Object(extra) = properties {
        props.extend(extra);
    }

    let mut req = vec!["type"];
    req.extend_from_slice(required);

    json!({
        "type": "object",
        "additionalProperties": false,
        "required": req,
        "properties": props,
    })
}

/// Accept either `inner` or a resource lookup declaration
pub fn lookup_or(inner: Value) -> Value {
    json!({
        "oneOf": [
            inner,
            {
                "type": "object",
                "additionalProperties": false,
                "required": ["type", "key"],
                "properties": {
                    "type": { "enum": ["resource"] },
                    "key": { "type": "string" },
                    "default-value": {},
                },
            },
        ]
    })
}

/// Properties understood by the value filter, shared by filters that
/// compare a derived value the same way
pub fn value_properties() -> Value {
    json!({
        "key": { "type": "string" },
        "op": { "enum": Operator::NAMES },
        "value": {},
        "value_type": { "enum": ValueType::NAMES },
        "value_regex": { "type": "string" },
    })
}

/// A list of nested filter declarations
pub fn filter_list() -> Value {
    json!({
        "type": "array",
        "items": { "type": ["object", "string"] },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_schema_shape() {
        let schema = type_schema("stop", json!({"force": {"type": "boolean"}}), &[]);
        assert_eq!(schema["required"], json!(["type"]));
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(schema["properties"]["type"], json!({"enum": ["stop"]}));
        assert!(schema["properties"].get("force").is_some());
    }

    #[test]
    fn test_lookup_schema_validates() {
        let schema = json!({
            "type": "object",
            "properties": { "value": lookup_or(json!({"type": "string"})) }
        });
        let validator = jsonschema::validator_for(&schema).unwrap();

        assert!(validator.is_valid(&json!({"value": "v"})));
        assert!(validator.is_valid(&json!({"value": {"type": "resource", "key": "name"}})));
        assert!(!validator.is_valid(&json!({"value": {"type": "resource"}})));
        assert!(!validator.is_valid(&json!({"value": 3})));
    }
}

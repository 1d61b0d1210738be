use serde_json::{Map, Value};

/// Keywords whose value is a map of name to subschema.
const SCHEMA_MAPS: [&str; 5] = [
    "properties",
    "patternProperties",
    "dependentSchemas",
    "$defs",
    "definitions",
];

/// Keywords whose value is a single subschema.
const SCHEMA_SLOTS: [&str; 11] = [
    "propertyNames",
    "additionalProperties",
    "unevaluatedProperties",
    "items",
    "contains",
    "additionalItems",
    "unevaluatedItems",
    "not",
    "if",
    "then",
    "else",
];

/// Keywords whose value is a list of subschemas.
const SCHEMA_LISTS: [&str; 4] = ["prefixItems", "allOf", "anyOf", "oneOf"];

/// Keywords that only make sense on objects; a schema using one of them is
/// treated as an object schema even without `"type": "object"`.
const OBJECT_KEYWORDS: [&str; 8] = [
    "properties",
    "patternProperties",
    "additionalProperties",
    "unevaluatedProperties",
    "required",
    "dependentRequired",
    "dependentSchemas",
    "propertyNames",
];

/// Add `additionalProperties: false` to every object schema in `schema`
/// that does not set it, at any nesting depth.
pub(crate) fn close_objects(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            if describes_object(map) && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            for key in SCHEMA_MAPS {
                if let Some(Value::Object(children)) = map.get_mut(key) {
                    children.values_mut().for_each(close_objects);
                }
            }
            for key in SCHEMA_SLOTS {
                if let Some(child) = map.get_mut(key) {
                    close_objects(child);
                }
            }
            for key in SCHEMA_LISTS {
                if let Some(Value::Array(children)) = map.get_mut(key) {
                    children.iter_mut().for_each(close_objects);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(close_objects),
        _ => {}
    }
}

fn describes_object(map: &Map<String, Value>) -> bool {
    match map.get("type") {
        Some(Value::String(kind)) => kind == "object",
        Some(Value::Array(kinds)) => kinds.iter().any(|kind| kind.as_str() == Some("object")),
        _ => OBJECT_KEYWORDS.iter().any(|keyword| map.contains_key(*keyword)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn closes_top_level_object() {
        let mut schema = json!({"type": "object", "properties": {"id": {"type": "integer"}}});
        close_objects(&mut schema);
        assert_eq!(schema["additionalProperties"], json!(false));
    }

    #[test]
    fn respects_explicit_additional_properties() {
        let mut schema = json!({"type": "object", "additionalProperties": true});
        close_objects(&mut schema);
        assert_eq!(schema["additionalProperties"], json!(true));
    }

    #[test]
    fn closes_nested_and_combined_schemas() {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "inner": {"type": "object", "properties": {"v": {"type": "integer"}}}
            },
            "anyOf": [{"required": ["inner"]}],
            "$defs": {"point": {"type": ["object", "null"]}}
        });
        close_objects(&mut schema);

        assert_eq!(schema["properties"]["inner"]["additionalProperties"], json!(false));
        assert_eq!(schema["anyOf"][0]["additionalProperties"], json!(false));
        assert_eq!(schema["$defs"]["point"]["additionalProperties"], json!(false));
    }

    #[test]
    fn leaves_non_object_schemas_alone() {
        let mut schema = json!({"type": "array", "items": {"type": "string"}});
        let before = schema.clone();
        close_objects(&mut schema);
        assert_eq!(schema, before);
    }
}

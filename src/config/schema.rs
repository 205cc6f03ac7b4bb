use serde_json::{json, Value};
use std::sync::LazyLock;

fn tag_mapping_object() -> Value {
    json!({
        "type": "object",
        "properties": {
            "tag_id": { "type": "string" },
            "mapping": {
                "type": "object",
                "properties": {
                    "tier_1": { "$ref": "#/$defs/tier" },
                    "tier_2": { "$ref": "#/$defs/tier" }
                },
                "additionalProperties": false
            }
        }
    })
}

fn mapping_defs() -> Value {
    json!({
        "tier": {
            "type": "object",
            "properties": {
                "fp": { "$ref": "#/$defs/result" },
                "tp": { "$ref": "#/$defs/result" },
                "unsure": { "$ref": "#/$defs/result" }
            },
            "additionalProperties": false
        },
        "result": {
            "type": "object",
            "required": ["value"],
            "properties": {
                "value": { "type": "string" },
                "suppress": { "type": "boolean" }
            }
        }
    })
}

pub static TAG_MAPPING_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    let mut schema = tag_mapping_object();
    schema["$schema"] = json!("http://json-schema.org/draft-07/schema#");
    schema["$defs"] = mapping_defs();
    schema
});

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "classifier": {
                "type": "object",
                "properties": {
                    "url": { "type": "string", "format": "uri" },
                    "token": { "type": "string" },
                    "project": { "type": "string" },
                    "application": { "type": "string" },
                    "version": { "type": "string" },
                    "timeout_minutes": { "type": "integer", "minimum": 1 },
                    "max_retries": { "type": "integer", "minimum": 0 },
                    "tier": { "type": "string" }
                }
            },
            "audit": {
                "type": "object",
                "properties": {
                    "filter_set": { "type": "string" },
                    "no_filter_set": { "type": "boolean" },
                    "folders": { "type": "array", "items": { "type": "string" } },
                    "priorities": { "type": "array", "items": { "type": "string" } },
                    "annotate_skipped": { "type": "boolean" },
                    "max_per_category": { "type": "integer", "minimum": 1 },
                    "max_total": { "type": "integer", "minimum": 1 },
                    "user_name": { "type": "string" },
                    "auditor_status_tag_id": { "type": "string" },
                    "expected_outcome_tag_id": { "type": "string" }
                }
            },
            "tag_mapping": tag_mapping_object(),
            "remediation": {
                "type": "object",
                "properties": {
                    "source_dir": { "type": "string" }
                }
            }
        },
        "$defs": mapping_defs()
    })
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemas_compile_and_validate() {
        let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA).unwrap();
        let good = json!({ "audit": { "max_total": 3 }, "tag_mapping": { "mapping": { "tier_1": { "fp": { "value": "Not an Issue" } } } } });
        assert!(compiled.is_valid(&good));
        let bad = json!({ "audit": { "max_total": 0 } });
        assert!(!compiled.is_valid(&bad));

        let mapping = jsonschema::JSONSchema::compile(&TAG_MAPPING_SCHEMA).unwrap();
        assert!(!mapping.is_valid(&json!({ "mapping": { "tier_3": {} } })));
        assert!(!mapping.is_valid(&json!({ "mapping": { "tier_1": { "fp": { "suppress": true } } } })));
    }
}

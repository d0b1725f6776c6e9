// conductor-config/src/schema.rs
// ============================================================================
// Module: Config Schema
// Description: A hand-maintained JSON Schema describing `ConductorConfig`,
//              used to validate `conductor.toml` (via its JSON projection)
//              at process start (§6.4 "validated... against a JSON Schema
//              generated from the struct").
// Purpose: Catch unknown keys and gross type mismatches before the typed
//          `serde` deserialization runs, producing one readable error
//          instead of a confusing `toml`/`serde` parse failure.
// Dependencies: serde_json
// ============================================================================

use serde_json::Value;
use serde_json::json;

/// Returns the JSON Schema (draft 2020-12) describing the on-disk shape of
/// [`crate::config::ConductorConfig`]. Every section sets
/// `additionalProperties: false` so a renamed or misspelled key fails
/// loudly instead of being silently ignored.
#[must_use]
pub fn config_schema() -> Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "ConductorConfig",
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "agent_timeouts": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "planner_seconds": { "type": "integer", "minimum": 1 },
                    "implementer_seconds": { "type": "integer", "minimum": 1 },
                    "reviewer_seconds": { "type": "integer", "minimum": 1 },
                    "tester_seconds": { "type": "integer", "minimum": 1 }
                }
            },
            "queues": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "agent": { "$ref": "#/$defs/queue_settings" },
                    "outbox": { "$ref": "#/$defs/queue_settings" },
                    "run": { "$ref": "#/$defs/queue_settings" }
                }
            },
            "comment_rate_limit": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "window_seconds": { "type": "integer", "minimum": 1 },
                    "burst": { "type": "integer", "minimum": 1 },
                    "bypass_event_types": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                }
            },
            "retention": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "stream_events_days": { "type": "integer", "minimum": 1 },
                    "agent_messages_days": { "type": "integer", "minimum": 1 },
                    "terminal_run_cleanup_grace_hours": { "type": "integer", "minimum": 0 },
                    "outbox_processing_grace_minutes": { "type": "integer", "minimum": 0 }
                }
            },
            "sandbox": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "sensitive_path_patterns": {
                        "type": "array",
                        "items": { "type": "string" }
                    },
                    "command_allowlist": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1
                    },
                    "max_read_output_bytes": { "type": "integer", "minimum": 1 },
                    "max_test_output_bytes": { "type": "integer", "minimum": 1 }
                }
            },
            "http": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "bind_address": { "type": "string" },
                    "drain_concurrency": { "type": "integer", "minimum": 1 },
                    "janitor_interval_seconds": { "type": "integer", "minimum": 1 }
                }
            },
            "storage": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "sqlite_path": { "type": "string" }
                }
            }
        },
        "$defs": {
            "queue_settings": {
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "lease_ms": { "type": "integer", "minimum": 1 },
                    "max_attempts": { "type": "integer", "minimum": 1 },
                    "backoff_base_ms": { "type": "integer", "minimum": 0 },
                    "backoff_max_ms": { "type": "integer", "minimum": 0 },
                    "backoff_jitter_fraction": { "type": "number", "minimum": 0.0, "maximum": 1.0 }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::config_schema;
    use crate::config::ConductorConfig;

    #[test]
    fn default_config_matches_schema() {
        let schema = config_schema();
        let compiled = jsonschema::validator_for(&schema).expect("schema compiles");
        let instance = serde_json::to_value(ConductorConfig::default()).expect("serializes");
        let errors: Vec<_> = compiled.iter_errors(&instance).collect();
        assert!(errors.is_empty(), "default config violates schema: {errors:?}");
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let schema = config_schema();
        let compiled = jsonschema::validator_for(&schema).expect("schema compiles");
        let mut instance = serde_json::to_value(ConductorConfig::default()).expect("serializes");
        instance.as_object_mut().expect("object").insert("unexpected_field".to_string(), serde_json::json!(true));
        assert!(!compiled.is_valid(&instance), "unknown top-level key should fail schema validation");
    }

    #[test]
    fn unknown_nested_key_is_rejected() {
        let schema = config_schema();
        let compiled = jsonschema::validator_for(&schema).expect("schema compiles");
        let mut instance = serde_json::to_value(ConductorConfig::default()).expect("serializes");
        instance["sandbox"]
            .as_object_mut()
            .expect("object")
            .insert("unexpected_field".to_string(), serde_json::json!("x"));
        assert!(!compiled.is_valid(&instance), "unknown nested key should fail schema validation");
    }
}

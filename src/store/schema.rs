//! JSON Schema for strategy documents, validated before admission into the store.

/// Draft-07 JSON Schema covering the shape [`crate::model::Strategy`] deserializes.
/// Intentionally permissive on `tool_chain` step shape since [`crate::model::ToolStep`]
/// itself normalizes the legacy/extended step forms.
pub const STRATEGY_SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "type": "object",
  "required": ["meta", "tool_chain"],
  "properties": {
    "meta": {
      "type": "object",
      "required": ["slug", "version", "category", "time_window", "depth"],
      "properties": {
        "slug": { "type": "string", "minLength": 1 },
        "version": { "type": "integer" },
        "category": { "type": "string" },
        "time_window": { "type": "string", "enum": ["day", "week", "month", "year"] },
        "depth": { "type": "string", "enum": ["brief", "overview", "deep", "comprehensive"] }
      }
    },
    "tool_chain": {
      "type": "array",
      "items": { "type": "object" }
    },
    "queries": { "type": "object" },
    "limits": { "type": "object" },
    "filters": { "type": "object" },
    "quorum": { "type": "object" },
    "finalize": { "type": "object" }
  }
}"#;

/// Schema for the index entry (`strategy_index` column) governing selection.
pub const STRATEGY_INDEX_SCHEMA: &str = r#"{
  "$schema": "http://json-schema.org/draft-07/schema#",
  "type": "object",
  "required": ["slug", "category", "time_window", "depth"],
  "properties": {
    "slug": { "type": "string", "minLength": 1 },
    "category": { "type": "string" },
    "time_window": { "type": "string", "enum": ["day", "week", "month", "year"] },
    "depth": { "type": "string", "enum": ["brief", "overview", "deep", "comprehensive"] },
    "priority": { "type": "integer" },
    "active": { "type": "boolean" }
  }
}"#;

//! Test case data model and schema-driven validation.
//!
//! The on-disk shape is defined by `schema/test_case.schema.json`, loaded
//! once at startup. All validation goes through the compiled schema so that
//! schema changes (new enum values, different length bounds) do not require
//! code changes. The Rust types below exist for ergonomic access after a
//! document has already passed schema validation.

use crate::error::{CopilotError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;

/// A single ordered step of a test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    pub expected_outcome: String,
}

/// Category of a test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseKind {
    Functional,
    Integration,
    Ui,
    Api,
    Performance,
    Security,
    Regression,
}

impl CaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseKind::Functional => "functional",
            CaseKind::Integration => "integration",
            CaseKind::Ui => "ui",
            CaseKind::Api => "api",
            CaseKind::Performance => "performance",
            CaseKind::Security => "security",
            CaseKind::Regression => "regression",
        }
    }
}

impl fmt::Display for CaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority bucket, serialized exactly as it appears in documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    #[serde(rename = "P1-Critical")]
    P1Critical,
    #[serde(rename = "P2-High")]
    P2High,
    #[serde(rename = "P3-Medium")]
    P3Medium,
    #[serde(rename = "P4-Low")]
    P4Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P1Critical => "P1-Critical",
            Priority::P2High => "P2-High",
            Priority::P3Medium => "P3-Medium",
            Priority::P4Low => "P4-Low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A structured QA scenario.
///
/// `id` is derived from the filename (`tc_NNN.json`) and never persisted
/// inside the document itself; serde skips it in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(skip)]
    pub id: String,
    pub title: String,
    pub kind: CaseKind,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preconditions: Option<String>,
    pub steps: Vec<Step>,
}

impl TestCase {
    /// JSON view used when embedding a case into a prompt: the persisted
    /// shape plus the id, so the model can reference cases by id.
    pub fn prompt_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(ref mut map) = value {
            map.insert("id".to_string(), Value::String(self.id.clone()));
        }
        value
    }
}

/// Remove transient fields (underscore-prefixed keys) from a raw document.
///
/// Model responses and report plumbing may carry provenance keys like
/// `_relevance_score`; those must never reach schema validation or disk.
pub fn strip_transient_fields(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|key, _| !key.starts_with('_'));
    }
}

/// Compiled JSON Schema validator for test case documents.
pub struct SchemaValidator {
    compiled: jsonschema::JSONSchema,
}

impl SchemaValidator {
    /// Load and compile the schema file. Fails fast at startup if the file
    /// is missing or not a valid schema.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CopilotError::Configuration(format!(
                "failed to read schema file {}: {}",
                path.display(),
                e
            ))
        })?;
        let schema: Value = serde_json::from_str(&raw).map_err(|e| {
            CopilotError::Configuration(format!(
                "schema file {} is not valid JSON: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_value(&schema)
    }

    pub fn from_value(schema: &Value) -> Result<Self> {
        let compiled = jsonschema::JSONSchema::compile(schema)
            .map_err(|e| CopilotError::Configuration(format!("invalid JSON schema: {}", e)))?;
        Ok(Self { compiled })
    }

    /// Validate a raw document. Returns the first validation error as a
    /// human-readable string; transient fields must be stripped by the
    /// caller beforehand.
    pub fn validate(&self, document: &Value) -> std::result::Result<(), String> {
        match self.compiled.validate(document) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let detail = errors
                    .map(|e| format!("{} (at {})", e, e.instance_path))
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(detail)
            }
        }
    }
}

/// Schema fixture shared by module tests across the crate.
#[cfg(test)]
pub(crate) fn test_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "required": ["title", "kind", "priority", "steps"],
        "additionalProperties": false,
        "properties": {
            "title": {"type": "string", "minLength": 5, "maxLength": 300},
            "kind": {"enum": ["functional", "integration", "ui", "api",
                              "performance", "security", "regression"]},
            "priority": {"enum": ["P1-Critical", "P2-High", "P3-Medium", "P4-Low"]},
            "preconditions": {"type": "string"},
            "steps": {
                "type": "array",
                "minItems": 1,
                "items": {
                    "type": "object",
                    "required": ["action", "expected_outcome"],
                    "properties": {
                        "action": {"type": "string", "minLength": 5},
                        "expected_outcome": {"type": "string", "minLength": 3}
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_case() -> TestCase {
        TestCase {
            id: "tc_001".to_string(),
            title: "Shift worker can clock in".to_string(),
            kind: CaseKind::Functional,
            priority: Priority::P2High,
            preconditions: Some("Worker has an assigned shift".to_string()),
            steps: vec![Step {
                action: "Open the shift details screen".to_string(),
                expected_outcome: "Clock-in button is visible".to_string(),
            }],
        }
    }

    #[test]
    fn serialized_case_omits_id() {
        let value = serde_json::to_value(sample_case()).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["title"], "Shift worker can clock in");
    }

    #[test]
    fn prompt_json_includes_id() {
        let value = sample_case().prompt_json();
        assert_eq!(value["id"], "tc_001");
    }

    #[test]
    fn valid_case_passes_schema() {
        let validator = SchemaValidator::from_value(&test_schema()).unwrap();
        let value = serde_json::to_value(sample_case()).unwrap();
        assert!(validator.validate(&value).is_ok());
    }

    #[test]
    fn missing_steps_fails_schema() {
        let validator = SchemaValidator::from_value(&test_schema()).unwrap();
        let mut value = serde_json::to_value(sample_case()).unwrap();
        value.as_object_mut().unwrap().remove("steps");
        let err = validator.validate(&value).unwrap_err();
        assert!(err.contains("steps"), "unexpected detail: {err}");
    }

    #[test]
    fn out_of_enum_priority_fails_schema() {
        let validator = SchemaValidator::from_value(&test_schema()).unwrap();
        let mut value = serde_json::to_value(sample_case()).unwrap();
        value["priority"] = json!("urgent");
        assert!(validator.validate(&value).is_err());
    }

    #[test]
    fn strip_removes_underscore_keys_only() {
        let mut value = json!({
            "title": "ok",
            "_relevance_score": 0.83,
            "_impact_level": "high"
        });
        strip_transient_fields(&mut value);
        let map = value.as_object().unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("title"));
    }
}

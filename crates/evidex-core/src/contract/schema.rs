//! JSON Schema validation for evidence contracts.
//!
//! Contracts are validated against spec/evidence_contract.schema.json before
//! they are deserialized, so structural mistakes come back with an instance
//! path instead of a serde message.

use std::sync::OnceLock;
use thiserror::Error;

/// Embedded contract schema (loaded at compile time).
const CONTRACT_SCHEMA_JSON: &str = include_str!("../../../../spec/evidence_contract.schema.json");

/// Compiled JSON Schema validator (initialized once, reused).
static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

/// Errors from schema validation.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),
}

/// Get or initialize the compiled schema validator.
fn get_validator() -> Result<&'static jsonschema::Validator, SchemaError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(CONTRACT_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        match jsonschema::options().build(&schema_value) {
            Ok(v) => Ok(v),
            Err(e) => Err(format!("Failed to compile schema: {}", e)),
        }
    });

    match result {
        Ok(v) => Ok(v),
        Err(e) => Err(SchemaError::LoadError(e.clone())),
    }
}

/// Validate a contract JSON value against the schema.
///
/// Returns every violation, each tagged with its instance path.
pub fn validate_contract_schema(contract_json: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(contract_json)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_contract_passes_schema() {
        let value = serde_json::json!({
            "contract_version": "1.0",
            "name": "Minimal"
        });
        assert!(validate_contract_schema(&value).is_ok());
    }

    #[test]
    fn test_missing_required_field_fails() {
        let value = serde_json::json!({ "name": "No version" });
        let errors = validate_contract_schema(&value).unwrap_err();
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_invalid_severity_fails() {
        let value = serde_json::json!({
            "contract_version": "1.0",
            "name": "Bad severity",
            "failure_contract": {
                "abort_if": ["any_error"],
                "emit_code": "E1",
                "severity": "FATAL"
            }
        });
        assert!(validate_contract_schema(&value).is_err());
    }

    #[test]
    fn test_unknown_abort_condition_fails() {
        let value = serde_json::json!({
            "contract_version": "1.0",
            "name": "Bad condition",
            "failure_contract": {
                "abort_if": ["sometimes"],
                "emit_code": "E1"
            }
        });
        assert!(validate_contract_schema(&value).is_err());
    }

    #[test]
    fn test_additional_properties_fail() {
        let value = serde_json::json!({
            "contract_version": "1.0",
            "name": "Extra",
            "unknown_field": "should fail"
        });
        assert!(validate_contract_schema(&value).is_err());
    }

    #[test]
    fn test_full_contract_passes() {
        let value = serde_json::json!({
            "contract_version": "1.2.0",
            "name": "Full",
            "description": "All sections",
            "assembly_rules": [
                {
                    "target": "confidence",
                    "sources": ["M1.conf", "M2.conf"],
                    "merge_strategy": "weighted_mean",
                    "weights": [0.7, 0.3],
                    "default": 0.0
                }
            ],
            "validation_rules": {
                "na_policy": "abort_on_critical",
                "rules": [
                    {
                        "field": "elements",
                        "required": true,
                        "type": "array",
                        "min_length": 1,
                        "must_contain": { "elements": ["a"] },
                        "should_contain": [{ "elements": ["b", "c"], "minimum": 1 }]
                    }
                ]
            },
            "failure_contract": {
                "abort_if": ["missing_required_element", "any_error"],
                "emit_code": "ABORT-1",
                "severity": "ERROR"
            }
        });
        assert!(validate_contract_schema(&value).is_ok());
    }
}

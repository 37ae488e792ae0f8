//! Evidence contract parsing from YAML/JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::rules::{AssemblyRule, FailureContract, ValidationRules};
use super::schema::validate_contract_schema;
use crate::assembler::AssemblyError;
use crate::validator::Validator;

/// Errors that can occur when parsing contracts.
#[derive(Error, Debug)]
pub enum ContractError {
    #[error("Failed to read contract file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Contract does not match schema: {}", .0.join("; "))]
    SchemaError(Vec<String>),

    #[error("Contract validation failed: {0}")]
    ValidationError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

/// Assembly rules, validation rules and failure contract for one evidence slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceContract {
    /// Version of this contract (semver)
    pub contract_version: String,

    /// Human-readable name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub assembly_rules: Vec<AssemblyRule>,

    #[serde(default)]
    pub validation_rules: ValidationRules,

    #[serde(default)]
    pub failure_contract: Option<FailureContract>,
}

impl EvidenceContract {
    /// Parse a contract from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ContractError> {
        let value: Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a contract from JSON string.
    pub fn from_json(json: &str) -> Result<Self, ContractError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Parse a contract from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ContractError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a contract from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ContractError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse a contract file, picking the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ContractError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_file(path),
            _ => Self::from_yaml_file(path),
        }
    }

    /// Check a JSON document against the schema, then deserialize and validate it.
    pub fn from_value(value: Value) -> Result<Self, ContractError> {
        validate_contract_schema(&value).map_err(ContractError::SchemaError)?;

        // Surface unknown merge strategies as assembly configuration errors
        if let Some(rules) = value.get("assembly_rules") {
            AssemblyRule::parse_list(rules)?;
        }

        let contract: EvidenceContract = serde_json::from_value(value)?;
        contract.validate()?;
        Ok(contract)
    }

    /// Validate the contract structure.
    fn validate(&self) -> Result<(), ContractError> {
        if self.name.is_empty() {
            return Err(ContractError::MissingField("name".to_string()));
        }

        if let Some(failure) = &self.failure_contract {
            if failure.emit_code.is_empty() {
                return Err(ContractError::MissingField(
                    "failure_contract.emit_code".to_string(),
                ));
            }
        }

        self.validate_unique_targets()?;

        // Patterns must compile
        Validator::new(&self.validation_rules)
            .map_err(|e| ContractError::ValidationError(e.to_string()))?;

        Ok(())
    }

    /// Ensure assembly targets are disjoint.
    fn validate_unique_targets(&self) -> Result<(), ContractError> {
        let mut seen = HashSet::new();

        for rule in &self.assembly_rules {
            if !seen.insert(rule.target.as_str()) {
                return Err(ContractError::ValidationError(format!(
                    "Duplicate assembly target: {}",
                    rule.target
                )));
            }
        }

        Ok(())
    }
}

//! Validator: checks an assembled evidence map against declarative rules.
//!
//! Per rule, checks run in a fixed order:
//! 1. `must_contain` (error per rule, naming every missing element)
//! 2. `should_contain` (warning, never blocking)
//! 3. `required` (an absent field ends the rule here)
//! 4. `type`
//! 5. `min_length`
//! 6. `pattern` (regex search on strings)
//!
//! Severity policy lives after the rule pass. A failure contract, when it
//! matches, decides the outcome on its own; `na_policy` only applies when
//! no contract produced an abort code.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

use crate::contract::{
    AbortCondition, FailureContract, NaPolicy, Severity, TypeTag, ValidationRule, ValidationRules,
};
use crate::path;

/// Raised when validation policy says the pipeline must stop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    #[error("Critical validation failure [{emit_code}]: {}", join_issues(.errors))]
    Critical {
        emit_code: String,
        errors: Vec<ValidationIssue>,
    },

    #[error("Evidence validation failed: {}", join_issues(.errors))]
    Aborted { errors: Vec<ValidationIssue> },

    #[error("Invalid pattern for field {field}: {message}")]
    InvalidPattern { field: String, message: String },
}

/// Category of a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingField,
    MissingElements,
    TypeMismatch,
    TooShort,
    PatternMismatch,
}

/// One validation error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(kind: IssueKind, field: &str, message: String) -> Self {
        Self {
            kind,
            field: field.to_string(),
            message,
        }
    }

    /// Whether this issue falls under a failure contract condition.
    pub fn matches(&self, condition: AbortCondition) -> bool {
        match condition {
            AbortCondition::MissingRequiredElement => {
                matches!(self.kind, IssueKind::MissingField | IssueKind::MissingElements)
            }
            AbortCondition::TypeMismatch => self.kind == IssueKind::TypeMismatch,
            AbortCondition::PatternMismatch => self.kind == IssueKind::PatternMismatch,
            AbortCondition::AnyError => true,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Verdict of a validation run that did not abort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
    pub abort_code: Option<String>,
    pub failure_contract_triggered: bool,
}

impl ValidationReport {
    /// Error messages, in the order they were raised.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }
}

struct CompiledRule<'r> {
    rule: &'r ValidationRule,
    pattern: Option<Regex>,
}

/// Validation rules with their patterns compiled.
pub struct Validator<'r> {
    rules: Vec<CompiledRule<'r>>,
    na_policy: NaPolicy,
}

impl<'r> Validator<'r> {
    /// Compile a rule set. Invalid regex patterns are rejected here.
    pub fn new(rules: &'r ValidationRules) -> Result<Self, ValidationFailure> {
        let compiled = rules
            .rules
            .iter()
            .map(|rule| {
                let pattern = rule
                    .pattern
                    .as_deref()
                    .map(Regex::new)
                    .transpose()
                    .map_err(|e| ValidationFailure::InvalidPattern {
                        field: rule.field.clone(),
                        message: e.to_string(),
                    })?;
                Ok(CompiledRule { rule, pattern })
            })
            .collect::<Result<Vec<_>, ValidationFailure>>()?;

        Ok(Self {
            rules: compiled,
            na_policy: rules.na_policy,
        })
    }

    /// Validate an evidence map.
    ///
    /// Returns `Err` when a CRITICAL failure contract matches, or when
    /// errors remain under `abort_on_critical` with no contract abort code.
    pub fn validate(
        &self,
        evidence: &Map<String, Value>,
        failure_contract: Option<&FailureContract>,
    ) -> Result<ValidationReport, ValidationFailure> {
        let mut report = ValidationReport::default();

        for compiled in &self.rules {
            self.check_rule(compiled, evidence, &mut report);
        }

        if let Some(contract) = failure_contract {
            if !report.errors.is_empty() {
                apply_failure_contract(contract, &mut report)?;
            }
        }

        report.valid = report.errors.is_empty();

        if !report.valid && self.na_policy == NaPolicy::AbortOnCritical && report.abort_code.is_none() {
            tracing::warn!(errors = report.errors.len(), "Validation aborted by na_policy");
            return Err(ValidationFailure::Aborted {
                errors: report.errors,
            });
        }

        Ok(report)
    }

    fn check_rule(
        &self,
        compiled: &CompiledRule<'_>,
        evidence: &Map<String, Value>,
        report: &mut ValidationReport,
    ) {
        let rule = compiled.rule;
        let field = rule.field.as_str();
        let value = path::resolve(evidence, field);

        let present: Vec<&Value> = match value {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => Vec::new(),
        };

        if let Some(must) = &rule.must_contain {
            let missing: Vec<String> = must
                .elements
                .iter()
                .filter(|e| !present.contains(e))
                .map(display_element)
                .collect();
            if !missing.is_empty() {
                report.errors.push(ValidationIssue::new(
                    IssueKind::MissingElements,
                    field,
                    format!("{}: missing required elements: {}", field, missing.join(", ")),
                ));
            }
        }

        for requirement in &rule.should_contain {
            let found = requirement
                .elements
                .iter()
                .filter(|e| present.contains(e))
                .count();
            if found < requirement.minimum {
                report.warnings.push(format!(
                    "{}: expected at least {} of [{}], found {}",
                    field,
                    requirement.minimum,
                    requirement
                        .elements
                        .iter()
                        .map(display_element)
                        .collect::<Vec<_>>()
                        .join(", "),
                    found
                ));
            }
        }

        let Some(value) = value else {
            if rule.required {
                report.errors.push(ValidationIssue::new(
                    IssueKind::MissingField,
                    field,
                    format!("{}: required field is missing", field),
                ));
            }
            return;
        };

        if let Some(tag) = rule.value_type {
            if tag != TypeTag::Any && !tag.matches(value) {
                report.errors.push(ValidationIssue::new(
                    IssueKind::TypeMismatch,
                    field,
                    format!("{}: expected type {}, found {}", field, tag, json_type(value)),
                ));
            }
        }

        if let Some(min) = rule.min_length {
            if let Some(len) = value_len(value) {
                if len < min {
                    report.errors.push(ValidationIssue::new(
                        IssueKind::TooShort,
                        field,
                        format!("{}: length {} is below minimum {}", field, len, min),
                    ));
                }
            }
        }

        if let (Some(regex), Value::String(text)) = (&compiled.pattern, value) {
            if !regex.is_match(text) {
                report.errors.push(ValidationIssue::new(
                    IssueKind::PatternMismatch,
                    field,
                    format!("{}: value does not match pattern {}", field, regex.as_str()),
                ));
            }
        }
    }
}

/// Evaluate `abort_if` conditions in declaration order; the first match decides.
fn apply_failure_contract(
    contract: &FailureContract,
    report: &mut ValidationReport,
) -> Result<(), ValidationFailure> {
    let Some(condition) = contract
        .abort_if
        .iter()
        .copied()
        .find(|c| report.errors.iter().any(|e| e.matches(*c)))
    else {
        return Ok(());
    };

    report.abort_code = Some(contract.emit_code.clone());
    report.failure_contract_triggered = true;
    tracing::warn!(
        condition = ?condition,
        emit_code = %contract.emit_code,
        severity = ?contract.severity,
        "Failure contract triggered"
    );

    if contract.severity == Severity::Critical {
        return Err(ValidationFailure::Critical {
            emit_code: contract.emit_code.clone(),
            errors: report.errors.clone(),
        });
    }

    Ok(())
}

/// Compile `rules` and validate `evidence` in one call.
pub fn validate(
    evidence: &Map<String, Value>,
    rules: &ValidationRules,
    failure_contract: Option<&FailureContract>,
) -> Result<ValidationReport, ValidationFailure> {
    Validator::new(rules)?.validate(evidence, failure_contract)
}

fn display_element(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_len(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//! Typed rule declarations for assembly, validation and failure contracts.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::assembler::AssemblyError;

/// How a set of collected source values is merged into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum MergeStrategy {
    Concat,
    First,
    Last,
    Mean,
    Max,
    Min,
    WeightedMean,
    Majority,
}

impl MergeStrategy {
    pub const ALL: [MergeStrategy; 8] = [
        MergeStrategy::Concat,
        MergeStrategy::First,
        MergeStrategy::Last,
        MergeStrategy::Mean,
        MergeStrategy::Max,
        MergeStrategy::Min,
        MergeStrategy::WeightedMean,
        MergeStrategy::Majority,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Concat => "concat",
            MergeStrategy::First => "first",
            MergeStrategy::Last => "last",
            MergeStrategy::Mean => "mean",
            MergeStrategy::Max => "max",
            MergeStrategy::Min => "min",
            MergeStrategy::WeightedMean => "weighted_mean",
            MergeStrategy::Majority => "majority",
        }
    }
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeStrategy {
    type Err = AssemblyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MergeStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| AssemblyError::UnsupportedStrategy {
                strategy: s.to_string(),
            })
    }
}

impl TryFrom<String> for MergeStrategy {
    type Error = AssemblyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// One declarative merge rule: collect `sources`, merge them into `target`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssemblyRule {
    /// Key written into the evidence map
    pub target: String,

    /// Dotted paths into the method outputs
    #[serde(default)]
    pub sources: Vec<String>,

    pub merge_strategy: MergeStrategy,

    /// Positional weights for `weighted_mean`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,

    /// Result when no usable source value was found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl AssemblyRule {
    pub fn new(
        target: impl Into<String>,
        sources: impl IntoIterator<Item = impl Into<String>>,
        merge_strategy: MergeStrategy,
    ) -> Self {
        Self {
            target: target.into(),
            sources: sources.into_iter().map(Into::into).collect(),
            merge_strategy,
            weights: None,
            default: None,
        }
    }

    pub fn with_weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Build a rule from loosely-typed JSON.
    ///
    /// An unknown `merge_strategy` is reported as
    /// [`AssemblyError::UnsupportedStrategy`] rather than a generic shape error.
    pub fn from_value(value: &Value) -> Result<Self, AssemblyError> {
        if let Some(strategy) = value.get("merge_strategy").and_then(Value::as_str) {
            strategy.parse::<MergeStrategy>()?;
        }
        serde_json::from_value(value.clone()).map_err(|e| AssemblyError::InvalidRule(e.to_string()))
    }

    /// Build a rule list from a JSON array.
    pub fn parse_list(value: &Value) -> Result<Vec<Self>, AssemblyError> {
        let items = value
            .as_array()
            .ok_or_else(|| AssemblyError::InvalidRule("assembly rules must be an array".to_string()))?;
        items.iter().map(Self::from_value).collect()
    }
}

/// Value shape required by a validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    #[serde(alias = "str")]
    String,
    #[serde(alias = "float")]
    Number,
    #[serde(alias = "int")]
    Integer,
    #[serde(alias = "bool")]
    Boolean,
    #[serde(alias = "list")]
    Array,
    #[serde(alias = "dict")]
    Object,
    Any,
}

impl TypeTag {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            TypeTag::String => value.is_string(),
            TypeTag::Number => value.is_number(),
            TypeTag::Integer => value.is_i64() || value.is_u64(),
            TypeTag::Boolean => value.is_boolean(),
            TypeTag::Array => value.is_array(),
            TypeTag::Object => value.is_object(),
            TypeTag::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::Number => "number",
            TypeTag::Integer => "integer",
            TypeTag::Boolean => "boolean",
            TypeTag::Array => "array",
            TypeTag::Object => "object",
            TypeTag::Any => "any",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Elements that must all be present in an array field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ElementSet {
    pub elements: Vec<Value>,
}

/// Soft requirement: at least `minimum` of `elements` should be present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainRequirement {
    pub elements: Vec<Value>,

    #[serde(default = "default_minimum")]
    pub minimum: usize,
}

fn default_minimum() -> usize {
    1
}

/// Checks applied to one evidence field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ValidationRule {
    /// Dotted path into the evidence map
    pub field: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<TypeTag>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,

    /// Regex that must match somewhere in a string value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub must_contain: Option<ElementSet>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should_contain: Vec<ContainRequirement>,
}

impl ValidationRule {
    pub fn field(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn of_type(mut self, tag: TypeTag) -> Self {
        self.value_type = Some(tag);
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn must_contain(mut self, elements: Vec<Value>) -> Self {
        self.must_contain = Some(ElementSet { elements });
        self
    }

    pub fn should_contain(mut self, elements: Vec<Value>, minimum: usize) -> Self {
        self.should_contain.push(ContainRequirement { elements, minimum });
        self
    }
}

/// What to do with a non-empty error list when no failure contract decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NaPolicy {
    /// Raise on any error
    AbortOnCritical,

    /// Report errors and let the caller decide
    #[default]
    Continue,
}

impl From<String> for NaPolicy {
    fn from(value: String) -> Self {
        if value == "abort_on_critical" {
            NaPolicy::AbortOnCritical
        } else {
            NaPolicy::Continue
        }
    }
}

impl From<NaPolicy> for String {
    fn from(value: NaPolicy) -> Self {
        match value {
            NaPolicy::AbortOnCritical => "abort_on_critical".to_string(),
            NaPolicy::Continue => "continue".to_string(),
        }
    }
}

/// The rule object handed to the validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ValidationRules {
    #[serde(default)]
    pub rules: Vec<ValidationRule>,

    #[serde(default)]
    pub na_policy: NaPolicy,
}

impl ValidationRules {
    pub fn new(rules: Vec<ValidationRule>) -> Self {
        Self {
            rules,
            na_policy: NaPolicy::Continue,
        }
    }

    pub fn abort_on_critical(mut self) -> Self {
        self.na_policy = NaPolicy::AbortOnCritical;
        self
    }
}

/// Error categories a failure contract can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortCondition {
    MissingRequiredElement,
    TypeMismatch,
    PatternMismatch,
    AnyError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Error,
    Critical,
}

/// Maps validation failure categories to an emitted abort code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureContract {
    pub abort_if: Vec<AbortCondition>,
    pub emit_code: String,

    #[serde(default)]
    pub severity: Severity,
}

impl FailureContract {
    pub fn new(abort_if: Vec<AbortCondition>, emit_code: impl Into<String>, severity: Severity) -> Self {
        Self {
            abort_if,
            emit_code: emit_code.into(),
            severity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_all_strategies_parse() {
        for strategy in MergeStrategy::ALL {
            let parsed: MergeStrategy = strategy.as_str().parse().unwrap();
            assert_eq!(parsed, strategy);
        }
    }

    #[test]
    fn test_unknown_strategy_is_typed_error() {
        let rule = json!({"target": "x", "sources": ["A.x"], "merge_strategy": "median"});
        let err = AssemblyRule::from_value(&rule).unwrap_err();
        assert!(matches!(
            err,
            AssemblyError::UnsupportedStrategy { ref strategy } if strategy == "median"
        ));
    }

    #[test]
    fn test_rule_shape_error() {
        let rule = json!({"target": "x", "merge_strategy": "first", "weights": "heavy"});
        assert!(matches!(
            AssemblyRule::from_value(&rule),
            Err(AssemblyError::InvalidRule(_))
        ));
    }

    #[test]
    fn test_parse_rule_list() {
        let rules = json!([
            {"target": "confidence", "sources": ["M1.conf"], "merge_strategy": "weighted_mean", "weights": [0.7]},
            {"target": "x", "sources": ["A.x", "B.x"], "merge_strategy": "concat", "default": []}
        ]);
        let parsed = AssemblyRule::parse_list(&rules).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].merge_strategy, MergeStrategy::WeightedMean);
        assert_eq!(parsed[0].weights, Some(vec![0.7]));
        assert_eq!(parsed[1].default, Some(json!([])));
    }

    #[test]
    fn test_type_tag_aliases() {
        let tags: Vec<TypeTag> = serde_json::from_value(json!(["str", "int", "float", "bool", "list", "dict", "any"])).unwrap();
        assert_eq!(
            tags,
            vec![
                TypeTag::String,
                TypeTag::Integer,
                TypeTag::Number,
                TypeTag::Boolean,
                TypeTag::Array,
                TypeTag::Object,
                TypeTag::Any
            ]
        );
    }

    #[test]
    fn test_type_tag_matching() {
        assert!(TypeTag::Integer.matches(&json!(3)));
        assert!(!TypeTag::Integer.matches(&json!(3.5)));
        assert!(TypeTag::Number.matches(&json!(3)));
        assert!(TypeTag::Array.matches(&json!([])));
        assert!(!TypeTag::String.matches(&json!(1)));
    }

    #[test]
    fn test_na_policy_parsing() {
        let rules: ValidationRules =
            serde_json::from_value(json!({"rules": [], "na_policy": "abort_on_critical"})).unwrap();
        assert_eq!(rules.na_policy, NaPolicy::AbortOnCritical);

        let rules: ValidationRules =
            serde_json::from_value(json!({"rules": [], "na_policy": "score_zero"})).unwrap();
        assert_eq!(rules.na_policy, NaPolicy::Continue);

        let rules: ValidationRules = serde_json::from_value(json!({"rules": []})).unwrap();
        assert_eq!(rules.na_policy, NaPolicy::Continue);
    }

    #[test]
    fn test_failure_contract_defaults_to_error_severity() {
        let contract: FailureContract = serde_json::from_value(json!({
            "abort_if": ["type_mismatch", "any_error"],
            "emit_code": "ABORT-Q1"
        }))
        .unwrap();
        assert_eq!(contract.severity, Severity::Error);
        assert_eq!(
            contract.abort_if,
            vec![AbortCondition::TypeMismatch, AbortCondition::AnyError]
        );
    }

    #[test]
    fn test_should_contain_minimum_defaults_to_one() {
        let rule: ValidationRule = serde_json::from_value(json!({
            "field": "elements",
            "should_contain": [{"elements": ["a", "b"]}]
        }))
        .unwrap();
        assert_eq!(rule.should_contain[0].minimum, 1);
        assert!(!rule.required);
    }
}

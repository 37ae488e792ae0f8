//! Assembler: merges named method outputs into one flat evidence map.
//!
//! Assembly is a pure function of its inputs:
//! 1. Each rule's sources are resolved by dotted path (absent sources are skipped)
//! 2. The collected values are merged with the rule's strategy
//! 3. The result lands in `evidence[target]`, the inputs in the trace
//!
//! Missing upstream data never fails assembly; it degrades to the rule's
//! default. Judging whether that is acceptable is the validator's job.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::canonical::hash_value;
use crate::contract::{AssemblyRule, MergeStrategy};
use crate::path;

/// Assembly configuration errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssemblyError {
    #[error("Unsupported merge strategy: {strategy}")]
    UnsupportedStrategy { strategy: String },

    #[error("Invalid assembly rule: {0}")]
    InvalidRule(String),
}

/// Upstream pattern pack that fed the method outputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SignalPack {
    pub pack_id: String,

    /// Scoping context (policy area, dimension, ...)
    #[serde(default)]
    pub scope: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub patterns: Vec<Value>,

    /// Hash of the pack source; derived from `patterns` when absent
    #[serde(default)]
    pub source_hash: Option<String>,
}

/// Observability record of the signal pack, first entry of the trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalProvenance {
    pub pack_id: String,
    pub scope: Option<String>,
    pub version: Option<String>,
    pub pattern_count: usize,
    pub source_hash: String,
}

impl From<&SignalPack> for SignalProvenance {
    fn from(pack: &SignalPack) -> Self {
        let source_hash = pack
            .source_hash
            .clone()
            .unwrap_or_else(|| hash_value(&Value::Array(pack.patterns.clone())));

        Self {
            pack_id: pack.pack_id.clone(),
            scope: pack.scope.clone(),
            version: pack.version.clone(),
            pattern_count: pack.patterns.len(),
            source_hash,
        }
    }
}

/// What went into one evidence target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceEntry {
    pub target: String,
    pub sources: Vec<String>,
    pub strategy: MergeStrategy,

    /// Values collected from the sources, in source order
    pub values: Vec<Value>,
}

/// Audit trace of one assembly run, in rule order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AssemblyTrace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_provenance: Option<SignalProvenance>,

    pub entries: Vec<TraceEntry>,
}

impl AssemblyTrace {
    pub fn get(&self, target: &str) -> Option<&TraceEntry> {
        self.entries.iter().find(|e| e.target == target)
    }
}

/// Output of [`assemble`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AssemblyResult {
    pub evidence: Map<String, Value>,
    pub trace: AssemblyTrace,
}

/// Merge method outputs into an evidence map according to `rules`.
pub fn assemble(
    method_outputs: &Map<String, Value>,
    rules: &[AssemblyRule],
    signal_pack: Option<&SignalPack>,
) -> AssemblyResult {
    let mut result = AssemblyResult {
        evidence: Map::new(),
        trace: AssemblyTrace {
            signal_provenance: signal_pack.map(SignalProvenance::from),
            entries: Vec::with_capacity(rules.len()),
        },
    };

    for rule in rules {
        let values: Vec<Value> = rule
            .sources
            .iter()
            .filter_map(|source| path::resolve(method_outputs, source))
            .cloned()
            .collect();

        let merged = merge(rule, &values);
        tracing::debug!(
            target_key = %rule.target,
            strategy = %rule.merge_strategy,
            collected = values.len(),
            "Assembled evidence target"
        );

        result.evidence.insert(rule.target.clone(), merged);
        result.trace.entries.push(TraceEntry {
            target: rule.target.clone(),
            sources: rule.sources.clone(),
            strategy: rule.merge_strategy,
            values,
        });
    }

    result
}

/// Merge already-collected values with the rule's strategy.
pub fn merge(rule: &AssemblyRule, values: &[Value]) -> Value {
    let fallback = || rule.default.clone().unwrap_or(Value::Null);

    match rule.merge_strategy {
        MergeStrategy::Concat => {
            let mut out = Vec::new();
            for value in values {
                match value {
                    Value::Array(items) => out.extend(items.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Value::Array(out)
        }
        MergeStrategy::First => values.first().cloned().unwrap_or_else(fallback),
        MergeStrategy::Last => values.last().cloned().unwrap_or_else(fallback),
        MergeStrategy::Mean => {
            let numbers = numeric(values);
            if numbers.is_empty() {
                return fallback();
            }
            float_or(numbers.iter().sum::<f64>() / numbers.len() as f64, fallback)
        }
        MergeStrategy::Max => match numeric(values).into_iter().reduce(f64::max) {
            Some(max) => float_or(max, fallback),
            None => fallback(),
        },
        MergeStrategy::Min => match numeric(values).into_iter().reduce(f64::min) {
            Some(min) => float_or(min, fallback),
            None => fallback(),
        },
        MergeStrategy::WeightedMean => {
            let numbers = numeric(values);
            if numbers.is_empty() {
                return fallback();
            }
            let weights = rule
                .weights
                .clone()
                .unwrap_or_else(|| vec![1.0; numbers.len()]);

            // Pair positionally; the longer side is truncated
            let (weighted_sum, weight_total) = numbers
                .iter()
                .zip(weights.iter())
                .fold((0.0, 0.0), |(sum, total), (v, w)| (sum + v * w, total + w));

            if weight_total == 0.0 {
                return fallback();
            }
            float_or(weighted_sum / weight_total, fallback)
        }
        MergeStrategy::Majority => majority(values).unwrap_or_else(fallback),
    }
}

/// Most frequent value; ties go to the value seen first.
fn majority(values: &[Value]) -> Option<Value> {
    // Insertion-ordered counter
    let mut counts: Vec<(&Value, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(seen, _)| *seen == value) {
            Some((_, count)) => *count += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(&Value, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value.clone())
}

/// Numeric view of the values; non-numeric entries are dropped.
fn numeric(values: &[Value]) -> Vec<f64> {
    values
        .iter()
        .filter_map(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|n| n.is_finite())
        .collect()
}

fn float_or(value: f64, fallback: impl FnOnce() -> Value) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn outputs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn rule(strategy: MergeStrategy, sources: &[&str]) -> AssemblyRule {
        AssemblyRule::new("out", sources.iter().copied(), strategy)
    }

    #[test]
    fn test_weighted_mean_example() {
        let method_outputs = outputs(json!({"M1": {"conf": 0.8}, "M2": {"conf": 0.6}}));
        let rules = vec![AssemblyRule::new(
            "confidence",
            ["M1.conf", "M2.conf"],
            MergeStrategy::WeightedMean,
        )
        .with_weights(vec![0.7, 0.3])];

        let result = assemble(&method_outputs, &rules, None);
        let confidence = result.evidence["confidence"].as_f64().unwrap();
        assert!((confidence - 0.74).abs() < 1e-9);
    }

    #[test]
    fn test_concat_example() {
        let method_outputs = outputs(json!({"A": {"x": [1, 2]}, "B": {"x": [3]}}));
        let rules = vec![AssemblyRule::new("x", ["A.x", "B.x"], MergeStrategy::Concat)];

        let result = assemble(&method_outputs, &rules, None);
        assert_eq!(result.evidence["x"], json!([1, 2, 3]));
    }

    #[test]
    fn test_concat_appends_scalars() {
        let values = vec![json!("a"), json!(["b", "c"]), json!(4)];
        assert_eq!(
            merge(&rule(MergeStrategy::Concat, &[]), &values),
            json!(["a", "b", "c", 4])
        );
    }

    #[test]
    fn test_first_and_last_skip_absent_sources() {
        let method_outputs = outputs(json!({"A": {"v": null}, "B": {"v": "b"}, "C": {"v": "c"}}));

        let first = assemble(
            &method_outputs,
            &[rule(MergeStrategy::First, &["A.v", "Z.v", "B.v", "C.v"])],
            None,
        );
        assert_eq!(first.evidence["out"], json!("b"));

        let last = assemble(
            &method_outputs,
            &[rule(MergeStrategy::Last, &["B.v", "C.v", "Z.v"])],
            None,
        );
        assert_eq!(last.evidence["out"], json!("c"));
    }

    #[test]
    fn test_mean_max_min() {
        let values = vec![json!(1), json!("3"), json!("not a number"), json!(true), json!(5.0)];
        assert_eq!(merge(&rule(MergeStrategy::Mean, &[]), &values), json!(3.0));
        assert_eq!(merge(&rule(MergeStrategy::Max, &[]), &values), json!(5.0));
        assert_eq!(merge(&rule(MergeStrategy::Min, &[]), &values), json!(1.0));
    }

    #[test]
    fn test_numeric_strategies_fall_back_to_default() {
        let values = vec![json!("x"), json!({"a": 1})];
        let with_default = rule(MergeStrategy::Mean, &[]).with_default(json!(0.0));
        assert_eq!(merge(&with_default, &values), json!(0.0));
        assert_eq!(merge(&rule(MergeStrategy::Max, &[]), &values), Value::Null);
    }

    #[test]
    fn test_weighted_mean_uniform_without_weights() {
        let values = vec![json!(2.0), json!(4.0)];
        assert_eq!(
            merge(&rule(MergeStrategy::WeightedMean, &[]), &values),
            json!(3.0)
        );
    }

    #[test]
    fn test_weighted_mean_truncates_to_shorter_side() {
        let values = vec![json!(1.0), json!(3.0), json!(100.0)];
        let short = rule(MergeStrategy::WeightedMean, &[]).with_weights(vec![1.0, 1.0]);
        assert_eq!(merge(&short, &values), json!(2.0));

        let long = rule(MergeStrategy::WeightedMean, &[]).with_weights(vec![1.0, 3.0, 5.0, 7.0]);
        let two = vec![json!(1.0), json!(3.0)];
        assert_eq!(merge(&long, &two), json!(2.5));
    }

    #[test]
    fn test_weighted_mean_zero_weights_falls_back() {
        let zero = rule(MergeStrategy::WeightedMean, &[])
            .with_weights(vec![0.0, 0.0])
            .with_default(json!(-1));
        assert_eq!(merge(&zero, &[json!(1.0), json!(2.0)]), json!(-1));
    }

    #[test]
    fn test_majority_first_seen_wins_ties() {
        let values = vec![json!("b"), json!("a"), json!("a"), json!("b"), json!("c")];
        assert_eq!(merge(&rule(MergeStrategy::Majority, &[]), &values), json!("b"));

        let clear = vec![json!(1), json!(2), json!(2)];
        assert_eq!(merge(&rule(MergeStrategy::Majority, &[]), &clear), json!(2));
    }

    #[test]
    fn test_majority_compares_structured_values() {
        let values = vec![json!({"k": 1}), json!([1]), json!({"k": 1})];
        assert_eq!(
            merge(&rule(MergeStrategy::Majority, &[]), &values),
            json!({"k": 1})
        );
    }

    #[test]
    fn test_all_sources_absent_uses_default() {
        let method_outputs = outputs(json!({"A": {}}));
        let rules = vec![rule(MergeStrategy::First, &["A.missing", "B.x"]).with_default(json!("n/a"))];
        let result = assemble(&method_outputs, &rules, None);
        assert_eq!(result.evidence["out"], json!("n/a"));
        assert!(result.trace.get("out").unwrap().values.is_empty());
    }

    #[test]
    fn test_trace_records_sources_and_values() {
        let method_outputs = outputs(json!({"A": {"x": 1}, "B": {"x": 2}}));
        let rules = vec![
            AssemblyRule::new("second", ["B.x"], MergeStrategy::First),
            AssemblyRule::new("first", ["A.x", "B.x"], MergeStrategy::Max),
        ];
        let result = assemble(&method_outputs, &rules, None);

        let targets: Vec<&str> = result.trace.entries.iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["second", "first"]);

        let entry = result.trace.get("first").unwrap();
        assert_eq!(entry.sources, vec!["A.x", "B.x"]);
        assert_eq!(entry.strategy, MergeStrategy::Max);
        assert_eq!(entry.values, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_signal_provenance_leads_trace() {
        let pack = SignalPack {
            pack_id: "PA01".to_string(),
            scope: Some("policy_area:PA01".to_string()),
            version: Some("2.1.0".to_string()),
            patterns: vec![json!("gender gap"), json!("baseline")],
            source_hash: None,
        };
        let result = assemble(&Map::new(), &[], Some(&pack));
        let provenance = result.trace.signal_provenance.unwrap();

        assert_eq!(provenance.pack_id, "PA01");
        assert_eq!(provenance.pattern_count, 2);
        assert_eq!(provenance.source_hash, hash_value(&json!(["gender gap", "baseline"])));

        let serialized = serde_json::to_value(assemble(&Map::new(), &[], Some(&pack)).trace).unwrap();
        assert!(serialized.get("signal_provenance").is_some());
    }

    #[test]
    fn test_supplied_source_hash_is_kept() {
        let pack = SignalPack {
            pack_id: "PA02".to_string(),
            source_hash: Some("abc123".to_string()),
            ..Default::default()
        };
        let provenance = SignalProvenance::from(&pack);
        assert_eq!(provenance.source_hash, "abc123");
        assert_eq!(provenance.pattern_count, 0);
    }

    proptest! {
        #[test]
        fn prop_assembly_is_deterministic(
            a in proptest::collection::vec(-1000i64..1000, 0..6),
            b in proptest::collection::vec(-1000i64..1000, 0..6),
            label in "[a-z]{1,8}",
        ) {
            let method_outputs = outputs(json!({
                "A": {"xs": a, "label": label},
                "B": {"xs": b, "label": "other"}
            }));
            let rules: Vec<AssemblyRule> = MergeStrategy::ALL
                .iter()
                .enumerate()
                .map(|(i, strategy)| {
                    AssemblyRule::new(format!("t{}", i), ["A.xs", "B.xs", "A.label", "B.label"], *strategy)
                })
                .collect();

            let first = serde_json::to_string(&assemble(&method_outputs, &rules, None)).unwrap();
            let second = serde_json::to_string(&assemble(&method_outputs, &rules, None)).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}

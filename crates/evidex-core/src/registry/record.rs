//! Evidence records and their integrity checks.

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

use crate::canonical::{hash_value, to_canonical_json};

/// One immutable, hash-chained ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceRecord {
    /// Content-addressed id, always equal to `content_hash`
    pub evidence_id: String,

    pub evidence_type: String,

    pub payload: Map<String, Value>,

    #[serde(default)]
    pub source_method: Option<String>,

    /// Records this one was derived from; all committed earlier
    #[serde(default)]
    pub parent_evidence_ids: Vec<String>,

    #[serde(default)]
    pub question_id: Option<String>,

    #[serde(default)]
    pub document_id: Option<String>,

    /// Seconds since the Unix epoch
    pub timestamp: f64,

    #[serde(default)]
    pub execution_time_ms: f64,

    pub content_hash: String,

    /// `entry_hash` of the preceding record, empty for the first one
    #[serde(default, deserialize_with = "null_as_empty")]
    pub previous_hash: String,

    pub entry_hash: String,

    /// Annotations outside the integrity envelope
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Input for a new ledger entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewEvidence {
    pub evidence_type: String,
    pub payload: Map<String, Value>,
    pub source_method: Option<String>,
    pub parent_evidence_ids: Vec<String>,
    pub question_id: Option<String>,
    pub document_id: Option<String>,
    pub execution_time_ms: f64,
    pub metadata: Map<String, Value>,
}

impl NewEvidence {
    pub fn new(evidence_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            evidence_type: evidence_type.into(),
            payload,
            ..Default::default()
        }
    }

    pub fn source_method(mut self, method: impl Into<String>) -> Self {
        self.source_method = Some(method.into());
        self
    }

    pub fn parent(mut self, evidence_id: impl Into<String>) -> Self {
        self.parent_evidence_ids.push(evidence_id.into());
        self
    }

    pub fn parents(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.parent_evidence_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn question(mut self, question_id: impl Into<String>) -> Self {
        self.question_id = Some(question_id.into());
        self
    }

    pub fn document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn execution_time_ms(mut self, ms: f64) -> Self {
        self.execution_time_ms = ms;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Why a record failed re-verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityFailure {
    ContentHashMismatch { stored: String, computed: String },
    EvidenceIdMismatch { evidence_id: String, content_hash: String },
    EntryHashMismatch { stored: String, computed: String },
    ChainBreak { previous_hash: String, expected: String },
}

impl fmt::Display for IntegrityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityFailure::ContentHashMismatch { stored, computed } => {
                write!(f, "content hash mismatch (stored {}, computed {})", stored, computed)
            }
            IntegrityFailure::EvidenceIdMismatch { evidence_id, content_hash } => {
                write!(f, "evidence id {} does not match content hash {}", evidence_id, content_hash)
            }
            IntegrityFailure::EntryHashMismatch { stored, computed } => {
                write!(f, "entry hash mismatch (stored {}, computed {})", stored, computed)
            }
            IntegrityFailure::ChainBreak { previous_hash, expected } => {
                write!(f, "previous hash {} does not link to {}", previous_hash, expected)
            }
        }
    }
}

/// SHA-256 of the canonical payload.
pub fn compute_content_hash(payload: &Map<String, Value>) -> String {
    hash_value(&Value::Object(payload.clone()))
}

/// SHA-256 binding the chain fields.
pub fn compute_entry_hash(
    content_hash: &str,
    previous_hash: &str,
    evidence_type: &str,
    timestamp: f64,
) -> String {
    hash_value(&json!({
        "content_hash": content_hash,
        "previous_hash": previous_hash,
        "evidence_type": evidence_type,
        "timestamp": timestamp,
    }))
}

/// Current time as fractional Unix seconds (microsecond resolution).
pub fn now_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

impl EvidenceRecord {
    /// Seal a new entry onto the chain after `previous_hash`.
    pub fn create(entry: NewEvidence, previous_hash: &str, timestamp: f64) -> Self {
        let content_hash = compute_content_hash(&entry.payload);
        let entry_hash =
            compute_entry_hash(&content_hash, previous_hash, &entry.evidence_type, timestamp);

        Self {
            evidence_id: content_hash.clone(),
            evidence_type: entry.evidence_type,
            payload: entry.payload,
            source_method: entry.source_method,
            parent_evidence_ids: entry.parent_evidence_ids,
            question_id: entry.question_id,
            document_id: entry.document_id,
            timestamp,
            execution_time_ms: entry.execution_time_ms,
            content_hash,
            previous_hash: previous_hash.to_string(),
            entry_hash,
            metadata: entry.metadata,
        }
    }

    /// One canonical JSON line, without the trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        to_canonical_json(self)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// Recompute hashes and check linkage to `previous`, reporting the first failure.
    pub fn check_integrity(&self, previous: Option<&EvidenceRecord>) -> Result<(), IntegrityFailure> {
        let computed = compute_content_hash(&self.payload);
        if computed != self.content_hash {
            return Err(IntegrityFailure::ContentHashMismatch {
                stored: self.content_hash.clone(),
                computed,
            });
        }

        if self.evidence_id != self.content_hash {
            return Err(IntegrityFailure::EvidenceIdMismatch {
                evidence_id: self.evidence_id.clone(),
                content_hash: self.content_hash.clone(),
            });
        }

        let computed = compute_entry_hash(
            &self.content_hash,
            &self.previous_hash,
            &self.evidence_type,
            self.timestamp,
        );
        if computed != self.entry_hash {
            return Err(IntegrityFailure::EntryHashMismatch {
                stored: self.entry_hash.clone(),
                computed,
            });
        }

        if let Some(previous) = previous {
            if self.previous_hash != previous.entry_hash {
                return Err(IntegrityFailure::ChainBreak {
                    previous_hash: self.previous_hash.clone(),
                    expected: previous.entry_hash.clone(),
                });
            }
        }

        Ok(())
    }

    pub fn verify_integrity(&self, previous: Option<&EvidenceRecord>) -> bool {
        self.check_integrity(previous).is_ok()
    }

    /// First characters of the id, for labels.
    pub fn short_id(&self) -> &str {
        short_id(&self.evidence_id)
    }
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn sample(previous_hash: &str) -> EvidenceRecord {
        let entry = NewEvidence::new("analysis", payload(json!({"score": 0.74, "label": "baseline"})))
            .source_method("Analyzer.score")
            .question("Q1")
            .execution_time_ms(12.5);
        EvidenceRecord::create(entry, previous_hash, 1_700_000_000.123456)
    }

    #[test]
    fn test_evidence_id_is_content_hash() {
        let record = sample("");
        assert_eq!(record.evidence_id, record.content_hash);
        assert_eq!(record.content_hash.len(), 64);
        assert!(record.verify_integrity(None));
    }

    #[test]
    fn test_content_hash_ignores_key_order() {
        let mut forward = Map::new();
        forward.insert("a".to_string(), json!(1));
        forward.insert("b".to_string(), json!({"y": 2, "x": 3}));
        let mut backward = Map::new();
        backward.insert("b".to_string(), json!({"x": 3, "y": 2}));
        backward.insert("a".to_string(), json!(1));

        assert_eq!(compute_content_hash(&forward), compute_content_hash(&backward));
    }

    #[test]
    fn test_line_round_trip_still_verifies() {
        let first = sample("");
        let second = sample(&first.entry_hash);

        let line = second.to_line().unwrap();
        assert!(line.is_ascii());
        assert!(!line.contains('\n'));

        let parsed = EvidenceRecord::from_line(&line).unwrap();
        assert_eq!(parsed, second);
        assert!(parsed.verify_integrity(Some(&first)));
    }

    #[test]
    fn test_payload_tampering_detected() {
        let mut record = sample("");
        record.payload.insert("score".to_string(), json!(0.99));
        assert!(matches!(
            record.check_integrity(None),
            Err(IntegrityFailure::ContentHashMismatch { .. })
        ));
    }

    #[test]
    fn test_chain_field_tampering_detected() {
        let mut record = sample("");
        record.evidence_type = "extraction".to_string();
        assert!(matches!(
            record.check_integrity(None),
            Err(IntegrityFailure::EntryHashMismatch { .. })
        ));

        let mut record = sample("");
        record.timestamp += 1.0;
        assert!(!record.verify_integrity(None));
    }

    #[test]
    fn test_evidence_id_tampering_detected() {
        let mut record = sample("");
        record.evidence_id = "0".repeat(64);
        assert!(matches!(
            record.check_integrity(None),
            Err(IntegrityFailure::EvidenceIdMismatch { .. })
        ));
    }

    #[test]
    fn test_splice_detected() {
        let first = sample("");
        let unrelated = sample("ffff");
        let second = sample(&first.entry_hash);
        assert!(second.verify_integrity(Some(&first)));
        assert!(matches!(
            second.check_integrity(Some(&unrelated)),
            Err(IntegrityFailure::ChainBreak { .. })
        ));
    }

    #[test]
    fn test_metadata_outside_integrity_envelope() {
        let mut record = sample("");
        record.metadata.insert("note".to_string(), json!("reviewed"));
        assert!(record.verify_integrity(None));
    }

    #[test]
    fn test_null_previous_hash_reads_as_empty() {
        let record = sample("");
        let mut value = serde_json::to_value(&record).unwrap();
        value["previous_hash"] = Value::Null;
        let parsed: EvidenceRecord = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.previous_hash, "");
        assert!(parsed.verify_integrity(None));
    }
}

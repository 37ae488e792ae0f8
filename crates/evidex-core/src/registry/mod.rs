//! Evidence registry: hash-chained ledger plus provenance DAG.
//!
//! All appends go through one exclusive lock, so there is exactly one chain
//! tail at any instant. Queries read derived state behind a read/write lock
//! and never wait on an append's file I/O. Chain verification opens its own
//! read handle and takes no lock at all.

mod dag;
mod ledger;
mod record;

pub use dag::{Lineage, ProvenanceDag, ProvenanceNode};
pub use ledger::{verify_ledger, LedgerLine, LedgerReader, LedgerWriter};
pub use record::{
    compute_content_hash, compute_entry_hash, now_timestamp, EvidenceRecord, IntegrityFailure,
    NewEvidence,
};

use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use thiserror::Error;

use crate::config::LedgerConfig;

lazy_static! {
    /// Lowercase hex id prefix, long enough to be meaningful
    static ref ID_PREFIX_PATTERN: Regex = Regex::new(r"^[0-9a-f]{4,64}$").unwrap();
}

/// Errors from the registry append and query surface.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Ledger I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parent evidence {0} is not in the ledger")]
    UnknownParent(String),

    #[error("Evidence {0} lists itself as a parent")]
    SelfReference(String),

    #[error("Parent {parent} descends from evidence {evidence_id}")]
    Cycle { evidence_id: String, parent: String },

    #[error("Ledger was opened read-only")]
    ReadOnly,

    #[error("Evidence not found: {0}")]
    NotFound(String),

    #[error("Evidence id prefix {prefix} matches {count} records")]
    AmbiguousPrefix { prefix: String, count: usize },

    #[error("Invalid evidence id prefix: {0}")]
    InvalidPrefix(String),

    #[error("Payload must be a JSON object")]
    InvalidPayload,
}

/// Summary of a registry's contents.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerStatistics {
    pub record_count: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_method: BTreeMap<String, usize>,
    pub tail_hash: String,
}

/// Derived, rebuildable view of the ledger.
#[derive(Default)]
struct RegistryState {
    dag: ProvenanceDag,
    records: HashMap<String, EvidenceRecord>,

    /// `entry_hash` of the last record read or appended
    tail_hash: String,
}

impl RegistryState {
    fn add(&mut self, record: EvidenceRecord) {
        self.tail_hash = record.entry_hash.clone();
        if self.dag.insert(&record) {
            self.records.insert(record.evidence_id.clone(), record);
        } else {
            tracing::debug!(
                evidence_id = %record.evidence_id,
                "Duplicate evidence content; merged lineage into first committed node"
            );
        }
    }
}

/// Rebuild derived state from a ledger file without modifying it.
fn load_state(path: &Path) -> Result<RegistryState, RegistryError> {
    let mut state = RegistryState::default();

    let Some(reader) = LedgerReader::open(path)? else {
        return Ok(state);
    };

    for item in reader {
        let (line_no, line) = item?;
        match line {
            LedgerLine::Record(record) => state.add(*record),
            LedgerLine::Malformed(reason) => {
                tracing::warn!(line = line_no, reason = %reason, "Skipping malformed ledger line");
            }
        }
    }

    Ok(state)
}

/// Append-only evidence ledger with lineage queries.
pub struct EvidenceRegistry {
    config: LedgerConfig,

    /// Append handle; `None` for read-only registries
    writer: Option<Mutex<LedgerWriter>>,
    state: RwLock<RegistryState>,
}

impl EvidenceRegistry {
    /// Open (or create) the ledger and rebuild derived state from it.
    pub fn open(config: LedgerConfig) -> Result<Self, RegistryError> {
        let state = load_state(&config.path)?;
        let writer = LedgerWriter::open(&config.path, state.tail_hash.clone(), config.fsync)?;

        tracing::info!(
            path = %config.path.display(),
            records = state.dag.len(),
            "Opened evidence ledger"
        );

        Ok(Self {
            config,
            writer: Some(Mutex::new(writer)),
            state: RwLock::new(state),
        })
    }

    /// Open a ledger for queries only.
    ///
    /// The file is never created or written; a missing ledger reads as
    /// empty and an in-flight trailing line is left alone.
    pub fn open_read_only(config: LedgerConfig) -> Result<Self, RegistryError> {
        let state = load_state(&config.path)?;

        tracing::info!(
            path = %config.path.display(),
            records = state.dag.len(),
            "Opened evidence ledger read-only"
        );

        Ok(Self {
            config,
            writer: None,
            state: RwLock::new(state),
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.writer.is_none()
    }

    pub fn open_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        Self::open(LedgerConfig::new(path.as_ref()))
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Seal `entry` onto the chain and return its evidence id.
    pub fn record_evidence(&self, entry: NewEvidence) -> Result<String, RegistryError> {
        let mut writer = self.writer.as_ref().ok_or(RegistryError::ReadOnly)?.lock();

        let content_hash = compute_content_hash(&entry.payload);
        {
            let state = self.state.read();
            for parent in &entry.parent_evidence_ids {
                if *parent == content_hash {
                    return Err(RegistryError::SelfReference(content_hash));
                }
                if !state.dag.contains(parent) {
                    return Err(RegistryError::UnknownParent(parent.clone()));
                }
            }

            // Repeated content merges into an existing node; its new parents
            // must not already descend from it
            if state.dag.contains(&content_hash) {
                let descendants = state.dag.descendants(&content_hash);
                if let Some(parent) = entry
                    .parent_evidence_ids
                    .iter()
                    .find(|p| descendants.contains(*p))
                {
                    return Err(RegistryError::Cycle {
                        evidence_id: content_hash,
                        parent: parent.clone(),
                    });
                }
            }
        }

        let record = EvidenceRecord::create(entry, writer.tail_hash(), now_timestamp());
        writer.append(&record)?;

        tracing::debug!(
            evidence_id = %record.evidence_id,
            evidence_type = %record.evidence_type,
            parents = record.parent_evidence_ids.len(),
            "Recorded evidence"
        );

        let evidence_id = record.evidence_id.clone();
        self.state.write().add(record);
        Ok(evidence_id)
    }

    /// Record a JSON object payload.
    pub fn record_value(
        &self,
        evidence_type: impl Into<String>,
        payload: Value,
    ) -> Result<String, RegistryError> {
        match payload {
            Value::Object(map) => self.record_evidence(NewEvidence::new(evidence_type, map)),
            _ => Err(RegistryError::InvalidPayload),
        }
    }

    /// Re-verify the whole ledger file, reporting every failing line.
    pub fn verify_chain_integrity(&self) -> (bool, Vec<String>) {
        let (ok, errors) = verify_ledger(&self.config.path);
        if ok {
            tracing::info!(path = %self.config.path.display(), "Ledger chain verified");
        }
        (ok, errors)
    }

    /// Recheck one in-memory record's content hash against its payload.
    pub fn verify_evidence(&self, evidence_id: &str) -> Result<bool, RegistryError> {
        let state = self.state.read();
        let record = state
            .records
            .get(evidence_id)
            .ok_or_else(|| RegistryError::NotFound(evidence_id.to_string()))?;
        Ok(compute_content_hash(&record.payload) == record.content_hash)
    }

    pub fn get_record(&self, evidence_id: &str) -> Option<EvidenceRecord> {
        self.state.read().records.get(evidence_id).cloned()
    }

    pub fn get_ancestors(&self, evidence_id: &str) -> BTreeSet<String> {
        self.state.read().dag.ancestors(evidence_id)
    }

    pub fn get_descendants(&self, evidence_id: &str) -> BTreeSet<String> {
        self.state.read().dag.descendants(evidence_id)
    }

    pub fn get_lineage(&self, evidence_id: &str) -> Result<Lineage, RegistryError> {
        let state = self.state.read();
        if !state.dag.contains(evidence_id) {
            return Err(RegistryError::NotFound(evidence_id.to_string()));
        }
        Ok(state.dag.lineage(evidence_id))
    }

    pub fn node(&self, evidence_id: &str) -> Option<ProvenanceNode> {
        self.state.read().dag.node(evidence_id).cloned()
    }

    /// Expand a unique id prefix to the full evidence id.
    pub fn resolve_id(&self, prefix: &str) -> Result<String, RegistryError> {
        if !ID_PREFIX_PATTERN.is_match(prefix) {
            return Err(RegistryError::InvalidPrefix(prefix.to_string()));
        }

        let state = self.state.read();
        let matches: Vec<&String> = state
            .dag
            .ids()
            .iter()
            .filter(|id| id.starts_with(prefix))
            .collect();

        match matches.as_slice() {
            [only] => Ok((*only).clone()),
            [] => Err(RegistryError::NotFound(prefix.to_string())),
            many => Err(RegistryError::AmbiguousPrefix {
                prefix: prefix.to_string(),
                count: many.len(),
            }),
        }
    }

    pub fn records_by_type(&self, evidence_type: &str) -> Vec<EvidenceRecord> {
        let state = self.state.read();
        Self::collect(&state, state.dag.ids_by_type(evidence_type))
    }

    pub fn records_by_method(&self, method: &str) -> Vec<EvidenceRecord> {
        let state = self.state.read();
        Self::collect(&state, state.dag.ids_by_method(method))
    }

    pub fn records_by_question(&self, question_id: &str) -> Vec<EvidenceRecord> {
        let state = self.state.read();
        Self::collect(&state, state.dag.ids_by_question(question_id))
    }

    fn collect(state: &RegistryState, ids: &[String]) -> Vec<EvidenceRecord> {
        ids.iter()
            .filter_map(|id| state.records.get(id).cloned())
            .collect()
    }

    pub fn export_dot(&self) -> String {
        self.state.read().dag.to_dot()
    }

    pub fn export_json(&self) -> Value {
        self.state.read().dag.to_json()
    }

    pub fn len(&self) -> usize {
        self.state.read().dag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tail_hash(&self) -> String {
        self.state.read().tail_hash.clone()
    }

    pub fn statistics(&self) -> LedgerStatistics {
        let state = self.state.read();
        LedgerStatistics {
            record_count: state.dag.len(),
            by_type: state
                .dag
                .type_counts()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            by_method: state
                .dag
                .method_counts()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            tail_hash: state.tail_hash.clone(),
        }
    }

    /// Discard derived state and rebuild it from the ledger file.
    ///
    /// Holds the append lock so no record lands mid-rebuild.
    pub fn rebuild_dag(&self) -> Result<usize, RegistryError> {
        let _writer = self.writer.as_ref().map(|w| w.lock());
        let state = load_state(&self.config.path)?;
        let count = state.dag.len();
        *self.state.write() = state;

        tracing::info!(records = count, "Rebuilt provenance DAG");
        Ok(count)
    }

    /// Flush the ledger file to disk.
    pub fn sync(&self) -> Result<(), RegistryError> {
        match &self.writer {
            Some(writer) => writer.lock().sync(),
            None => Ok(()),
        }
    }
}

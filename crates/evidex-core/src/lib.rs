//! # evidex-core
//!
//! Evidence assembly, validation and hash-chained provenance ledger.
//!
//! This crate turns per-method analysis outputs into sealed evidence:
//! - Which method outputs feed which evidence field?
//! - Is the assembled evidence complete and well-formed?
//! - Where did a piece of evidence come from, and has it been altered?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same inputs and rules always produce the same evidence
//! 2. **Content-addressed**: An evidence id is the SHA-256 of its canonical payload
//! 3. **Tamper-evident**: Every record is chained to its predecessor
//! 4. **Traceable**: Every evidence field records the values it was merged from
//!
//! ## Example
//!
//! ```rust,ignore
//! use evidex_core::{synthesize, EvidenceContract, EvidenceRegistry, LedgerConfig};
//!
//! let contract = EvidenceContract::from_yaml_file("contract.yaml")?;
//! let registry = EvidenceRegistry::open(LedgerConfig::new("ledger.jsonl"))?;
//! let outcome = synthesize(&registry, &method_outputs, &contract)?;
//!
//! println!("{} valid={}", outcome.evidence_id, outcome.validation.valid);
//! let (ok, errors) = registry.verify_chain_integrity();
//! ```

pub mod assembler;
pub mod canonical;
pub mod config;
pub mod contract;
pub mod path;
pub mod registry;
pub mod validator;

// Re-export main types at crate root
pub use assembler::{
    assemble, AssemblyError, AssemblyResult, AssemblyTrace, SignalPack, SignalProvenance,
    TraceEntry,
};
pub use config::{ConfigError, LedgerConfig};
pub use contract::{
    AbortCondition, AssemblyRule, ContractError, EvidenceContract, FailureContract, MergeStrategy,
    NaPolicy, Severity, TypeTag, ValidationRule, ValidationRules,
};
pub use registry::{
    verify_ledger, EvidenceRecord, EvidenceRegistry, LedgerStatistics, Lineage, NewEvidence,
    ProvenanceDag, ProvenanceNode, RegistryError,
};
pub use validator::{
    validate, IssueKind, ValidationFailure, ValidationIssue, ValidationReport, Validator,
};

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::Instant;
use thiserror::Error;

/// Errors that can occur during synthesis
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),

    #[error("Failed to serialize evidence: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Default record type written by [`synthesize`].
pub const METHOD_RESULT: &str = "method_result";

/// Correlation and lineage for one synthesis run.
#[derive(Debug, Clone, Default)]
pub struct SynthesisContext {
    /// Record type; `method_result` when unset
    pub evidence_type: Option<String>,
    pub source_method: Option<String>,
    pub question_id: Option<String>,
    pub document_id: Option<String>,
    pub parents: Vec<String>,
    pub signal_pack: Option<SignalPack>,
}

/// Result of one synthesis run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SynthesisOutcome {
    /// Id of the record sealed onto the ledger
    pub evidence_id: String,
    pub assembly: AssemblyResult,
    pub validation: ValidationReport,
}

/// Assemble, validate and record method outputs under a contract.
///
/// This is the main entry point for the engine.
///
/// # Returns
///
/// A `SynthesisOutcome` containing:
/// - `evidence_id`: content hash of the recorded payload
/// - `assembly`: evidence map and provenance trace
/// - `validation`: verdict, errors, warnings and abort code
///
/// Nothing is recorded when validation policy aborts.
pub fn synthesize(
    registry: &EvidenceRegistry,
    method_outputs: &Map<String, Value>,
    contract: &EvidenceContract,
) -> Result<SynthesisOutcome, EngineError> {
    synthesize_with_context(registry, method_outputs, contract, &SynthesisContext::default())
}

/// Synthesize with correlation ids, parents and a signal pack.
pub fn synthesize_with_context(
    registry: &EvidenceRegistry,
    method_outputs: &Map<String, Value>,
    contract: &EvidenceContract,
    context: &SynthesisContext,
) -> Result<SynthesisOutcome, EngineError> {
    let started = Instant::now();

    let assembly = assemble(
        method_outputs,
        &contract.assembly_rules,
        context.signal_pack.as_ref(),
    );
    let validation = validate(
        &assembly.evidence,
        &contract.validation_rules,
        contract.failure_contract.as_ref(),
    )?;

    let mut payload = Map::new();
    payload.insert("evidence".to_string(), Value::Object(assembly.evidence.clone()));
    payload.insert("validation".to_string(), serde_json::to_value(&validation)?);
    payload.insert("trace".to_string(), serde_json::to_value(&assembly.trace)?);

    let mut entry = NewEvidence::new(
        context.evidence_type.as_deref().unwrap_or(METHOD_RESULT),
        payload,
    )
    .parents(context.parents.iter().cloned())
    .metadata("contract", json!(contract.name))
    .metadata("contract_version", json!(contract.contract_version));
    if let Some(method) = &context.source_method {
        entry = entry.source_method(method.clone());
    }
    if let Some(question) = &context.question_id {
        entry = entry.question(question.clone());
    }
    if let Some(document) = &context.document_id {
        entry = entry.document(document.clone());
    }
    entry = entry.execution_time_ms(started.elapsed().as_secs_f64() * 1000.0);

    let evidence_id = registry.record_evidence(entry)?;

    tracing::info!(
        evidence_id = %evidence_id,
        contract = %contract.name,
        valid = validation.valid,
        "Synthesized evidence"
    );

    Ok(SynthesisOutcome {
        evidence_id,
        assembly,
        validation,
    })
}

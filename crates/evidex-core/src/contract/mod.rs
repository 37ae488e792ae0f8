//! Evidence contract parsing and validation.
//!
//! Assembly rules, validation rules and failure contracts are authored
//! outside this crate. This module turns them into closed, typed rule sets
//! and loads them from YAML/JSON documents validated against JSON Schema.

mod parser;
mod rules;
mod schema;

pub use parser::{ContractError, EvidenceContract};
pub use rules::{
    AbortCondition, AssemblyRule, ContainRequirement, ElementSet, FailureContract, MergeStrategy,
    NaPolicy, Severity, TypeTag, ValidationRule, ValidationRules,
};
pub use schema::validate_contract_schema;

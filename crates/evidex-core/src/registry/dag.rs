//! Provenance DAG derived from the ledger.
//!
//! The DAG is never persisted. It is rebuilt from the ledger when a
//! registry opens and extended as records are appended. Because parents
//! must be committed before their children, append order is a topological
//! order and the graph is acyclic by construction; traversals still keep a
//! visited set.

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write;

use super::record::{short_id, EvidenceRecord};

/// One evidence record as seen by lineage queries.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProvenanceNode {
    pub evidence_id: String,
    pub evidence_type: String,
    pub source_method: Option<String>,
    pub question_id: Option<String>,
    pub parents: Vec<String>,
    pub children: Vec<String>,
}

/// Ancestors and descendants of one record, both in append order.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct Lineage {
    pub evidence_id: String,
    pub ancestors: Vec<String>,
    pub descendants: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProvenanceDag {
    nodes: HashMap<String, ProvenanceNode>,
    /// Append index of each node
    position: HashMap<String, usize>,
    order: Vec<String>,
    by_method: HashMap<String, Vec<String>>,
    by_type: HashMap<String, Vec<String>>,
    by_question: HashMap<String, Vec<String>>,
}

impl ProvenanceDag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a EvidenceRecord>) -> Self {
        let mut dag = Self::new();
        for record in records {
            dag.insert(record);
        }
        dag
    }

    /// Add a record's node, wire its edges and index it.
    ///
    /// Returns `false` when a node with the same id already exists. The
    /// first committed node keeps its type and method; the new record's
    /// parents and index keys are merged into it.
    pub fn insert(&mut self, record: &EvidenceRecord) -> bool {
        let id = record.evidence_id.clone();
        let is_new = !self.nodes.contains_key(&id);

        if is_new {
            self.position.insert(id.clone(), self.order.len());
            self.order.push(id.clone());
            self.nodes.insert(
                id.clone(),
                ProvenanceNode {
                    evidence_id: id.clone(),
                    evidence_type: record.evidence_type.clone(),
                    source_method: record.source_method.clone(),
                    question_id: record.question_id.clone(),
                    parents: Vec::new(),
                    children: Vec::new(),
                },
            );
        }

        for parent in &record.parent_evidence_ids {
            if *parent == id {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&id) {
                push_unique(&mut node.parents, parent);
            }
            if let Some(node) = self.nodes.get_mut(parent) {
                push_unique(&mut node.children, &id);
            }
        }

        if let Some(method) = &record.source_method {
            push_unique(self.by_method.entry(method.clone()).or_default(), &id);
        }
        push_unique(self.by_type.entry(record.evidence_type.clone()).or_default(), &id);
        if let Some(question) = &record.question_id {
            push_unique(self.by_question.entry(question.clone()).or_default(), &id);
        }

        is_new
    }

    pub fn contains(&self, evidence_id: &str) -> bool {
        self.nodes.contains_key(evidence_id)
    }

    pub fn node(&self, evidence_id: &str) -> Option<&ProvenanceNode> {
        self.nodes.get(evidence_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Node ids in append order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    pub fn ids_by_method(&self, method: &str) -> &[String] {
        self.by_method.get(method).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn ids_by_type(&self, evidence_type: &str) -> &[String] {
        self.by_type.get(evidence_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn ids_by_question(&self, question_id: &str) -> &[String] {
        self.by_question.get(question_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn type_counts(&self) -> HashMap<&str, usize> {
        self.by_type.iter().map(|(k, v)| (k.as_str(), v.len())).collect()
    }

    pub fn method_counts(&self) -> HashMap<&str, usize> {
        self.by_method.iter().map(|(k, v)| (k.as_str(), v.len())).collect()
    }

    /// Transitive closure over parent edges, excluding `evidence_id` itself.
    pub fn ancestors(&self, evidence_id: &str) -> BTreeSet<String> {
        self.walk(evidence_id, |node| &node.parents)
    }

    /// Transitive closure over child edges, excluding `evidence_id` itself.
    pub fn descendants(&self, evidence_id: &str) -> BTreeSet<String> {
        self.walk(evidence_id, |node| &node.children)
    }

    pub fn lineage(&self, evidence_id: &str) -> Lineage {
        Lineage {
            evidence_id: evidence_id.to_string(),
            ancestors: self.in_append_order(self.ancestors(evidence_id)),
            descendants: self.in_append_order(self.descendants(evidence_id)),
        }
    }

    fn walk<F>(&self, start: &str, edges: F) -> BTreeSet<String>
    where
        F: Fn(&ProvenanceNode) -> &Vec<String>,
    {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut found = BTreeSet::new();
        let mut stack: Vec<&str> = match self.nodes.get(start) {
            Some(node) => edges(node).iter().map(String::as_str).collect(),
            None => return found,
        };
        visited.insert(start);

        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            found.insert(id.to_string());
            if let Some(node) = self.nodes.get(id) {
                stack.extend(edges(node).iter().map(String::as_str));
            }
        }

        found
    }

    fn in_append_order(&self, ids: BTreeSet<String>) -> Vec<String> {
        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort_by_key(|id| self.position.get(id).copied().unwrap_or(usize::MAX));
        ids
    }

    /// GraphViz rendering: left-to-right, one node per record, one edge per parent link.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph provenance {\n");
        out.push_str("  rankdir=LR;\n");
        out.push_str("  node [shape=box];\n");

        for id in &self.order {
            let node = &self.nodes[id];
            let _ = writeln!(
                out,
                "  \"{}\" [label=\"{}\\n{}\"];",
                escape_dot(id),
                escape_dot(&node.evidence_type),
                escape_dot(short_id(id))
            );
        }

        for id in &self.order {
            for parent in &self.nodes[id].parents {
                if self.nodes.contains_key(parent) {
                    let _ = writeln!(out, "  \"{}\" -> \"{}\";", escape_dot(parent), escape_dot(id));
                }
            }
        }

        out.push_str("}\n");
        out
    }

    /// Structured export: `{nodes: [...], edges: [{from, to}]}` in append order.
    pub fn to_json(&self) -> Value {
        let nodes: Vec<&ProvenanceNode> = self.order.iter().map(|id| &self.nodes[id]).collect();
        let mut edges: Vec<Value> = Vec::new();
        for id in &self.order {
            for parent in &self.nodes[id].parents {
                if self.nodes.contains_key(parent) {
                    edges.push(json!({"from": parent, "to": id}));
                }
            }
        }

        json!({ "nodes": nodes, "edges": edges })
    }
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|existing| existing == id) {
        ids.push(id.to_string());
    }
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

//! Output of one extraction response.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::entity::Entity;
use crate::types::hyperedge::{HighOrderHyperedge, LowOrderHyperedge};

/// Non-fatal problem found while parsing one record.
///
/// The offending record is skipped; the rest of the response still parses.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParseWarning {
    #[error("unknown record kind `{kind}`")]
    UnknownKind { kind: String, record: String },

    #[error("malformed {kind} record: {reason}")]
    Malformed {
        kind: String,
        reason: String,
        record: String,
    },

    #[error("{kind} record has a blank name")]
    EmptyName { kind: String, record: String },

    #[error("high-order hyperedge needs at least two distinct entities, got {found}")]
    TooFewMembers { found: usize, record: String },
}

impl ParseWarning {
    /// The raw record text that triggered the warning.
    pub fn record(&self) -> &str {
        match self {
            ParseWarning::UnknownKind { record, .. }
            | ParseWarning::Malformed { record, .. }
            | ParseWarning::EmptyName { record, .. }
            | ParseWarning::TooFewMembers { record, .. } => record,
        }
    }
}

/// Typed records parsed from one extraction response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionBatch {
    #[serde(default)]
    pub entities: Vec<Entity>,

    #[serde(default)]
    pub low_order_edges: Vec<LowOrderHyperedge>,

    #[serde(default)]
    pub high_order_edges: Vec<HighOrderHyperedge>,

    /// Themes summarizing the whole source text
    #[serde(default)]
    pub high_level_keywords: IndexSet<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ParseWarning>,
}

impl ExtractionBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of graph records (keywords and warnings excluded).
    pub fn record_count(&self) -> usize {
        self.entities.len() + self.low_order_edges.len() + self.high_order_edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0 && self.high_level_keywords.is_empty()
    }

    /// Append another batch, e.g. the result of a gleaning turn.
    pub fn extend(&mut self, other: ExtractionBatch) {
        self.entities.extend(other.entities);
        self.low_order_edges.extend(other.low_order_edges);
        self.high_order_edges.extend(other.high_order_edges);
        self.high_level_keywords.extend(other.high_level_keywords);
        self.warnings.extend(other.warnings);
    }

    /// Attach `path` to every record that carries no provenance yet.
    pub fn with_default_source(mut self, path: &str) -> Self {
        for entity in &mut self.entities {
            if entity.source_paths.is_empty() {
                entity.source_paths.insert(path.to_string());
            }
        }
        for edge in &mut self.low_order_edges {
            if edge.source_paths.is_empty() {
                edge.source_paths.insert(path.to_string());
            }
        }
        for edge in &mut self.high_order_edges {
            if edge.source_paths.is_empty() {
                edge.source_paths.insert(path.to_string());
            }
        }
        self
    }
}

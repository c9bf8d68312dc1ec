//! Source documents before and after formatting.

use serde::{Deserialize, Serialize};

/// A raw source record: field name to JSON value, in source order.
pub type RawDocument = serde_json::Map<String, serde_json::Value>;

/// Canonical text block ready for extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedDocument {
    /// Content-addressed id (`doc-…`)
    pub id: String,

    /// Metadata header plus main content
    pub text: String,

    /// Provenance attached to records extracted from this document
    pub source_path: String,
}

/// One token window of a formatted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Content-addressed id (`chunk-…`)
    pub id: String,

    pub content: String,

    /// Number of tokens in `content`
    pub tokens: usize,

    /// Position within the parent document
    pub order: usize,

    /// Id of the document this chunk came from
    pub doc_id: String,

    pub source_path: String,
}

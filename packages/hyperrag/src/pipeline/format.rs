//! Document formatting - raw source records to canonical text blocks.
//!
//! Output shape:
//!
//! ```text
//! Document Metadata (JSON):
//! {
//!   "title": "...",
//!   "breadcrumbs": "A > B",
//!   "url_path": "...",
//!   "metadata": { ... }
//! }
//!
//! main_content:
//! <content>
//! ```
//!
//! The header is omitted when every metadata value is empty.

use serde_json::{Map, Value};

use crate::error::{HyperRagError, Result};
use crate::pipeline::prompts::GRAPH_FIELD_SEP;
use crate::types::config::DocumentFormat;
use crate::types::document::{FormattedDocument, RawDocument};
use crate::utils::hash::{content_id, DOC_PREFIX};

/// Joiner for list-valued breadcrumbs.
pub const BREADCRUMB_SEP: &str = " > ";

/// Joiner for list-valued metadata fields.
pub const METADATA_LIST_SEP: &str = ", ";

/// Separator placed between documents combined into one extraction unit.
pub const DOCUMENT_SEPARATOR: &str = "\n\n-----\n\n";

/// Format one raw record.
///
/// Fails with a validation error when the main content field is missing or
/// blank; no partial output is produced.
pub fn format_document(raw: &RawDocument, format: &DocumentFormat) -> Result<FormattedDocument> {
    let text = render_document(raw, format)?;
    let id = content_id(DOC_PREFIX, &text);
    let source_path = raw
        .get(&format.source_path_key)
        .map(|v| normalize_value(v, METADATA_LIST_SEP))
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| id.clone());

    Ok(FormattedDocument {
        id,
        text,
        source_path,
    })
}

/// Render the canonical text of one raw record.
pub fn render_document(raw: &RawDocument, format: &DocumentFormat) -> Result<String> {
    let main_content = raw
        .get(&format.main_content_key)
        .map(|v| normalize_value(v, "\n"))
        .unwrap_or_default();
    if main_content.is_empty() {
        return Err(HyperRagError::validation(
            &format.main_content_key,
            "document must include non-empty main content",
        ));
    }

    let mut header = Map::new();

    let title = first_non_empty(raw, &format.title_keys, BREADCRUMB_SEP);
    if let Some(title) = title {
        header.insert("title".to_string(), Value::String(title));
    }

    if let Some(breadcrumbs) = raw
        .get(&format.breadcrumbs_key)
        .map(|v| normalize_value(v, BREADCRUMB_SEP))
        .filter(|b| !b.is_empty())
    {
        header.insert("breadcrumbs".to_string(), Value::String(breadcrumbs));
    }

    if let Some(url_path) = first_non_empty(raw, &format.url_keys, BREADCRUMB_SEP) {
        header.insert("url_path".to_string(), Value::String(url_path));
    }

    let metadata = collect_metadata(raw, format);
    if !metadata.is_empty() {
        header.insert("metadata".to_string(), Value::Object(metadata));
    }

    let mut sections = Vec::with_capacity(2);
    if !header.is_empty() {
        let json = serde_json::to_string_pretty(&Value::Object(header))?;
        sections.push(format!("Document Metadata (JSON):\n{}", json));
    }
    sections.push(format!("main_content:\n{}", main_content));

    Ok(sections.join("\n\n"))
}

/// Join several formatted documents into one extraction unit.
///
/// The combined id is derived from the joined text and the source paths
/// are kept together, separated by `<SEP>`, so records extracted from the
/// unit point back at every contributing document.
pub fn combine_documents(documents: &[FormattedDocument]) -> Option<FormattedDocument> {
    match documents {
        [] => None,
        [single] => Some(single.clone()),
        many => {
            let text = many
                .iter()
                .map(|d| d.text.as_str())
                .collect::<Vec<_>>()
                .join(DOCUMENT_SEPARATOR);
            let mut paths: Vec<&str> = Vec::with_capacity(many.len());
            for doc in many {
                if !paths.contains(&doc.source_path.as_str()) {
                    paths.push(&doc.source_path);
                }
            }

            Some(FormattedDocument {
                id: content_id(DOC_PREFIX, &text),
                source_path: paths.join(GRAPH_FIELD_SEP),
                text,
            })
        }
    }
}

fn collect_metadata(raw: &RawDocument, format: &DocumentFormat) -> Map<String, Value> {
    let keys: Vec<&String> = match &format.metadata_allow_list {
        Some(allowed) => allowed.iter().collect(),
        None => raw.keys().filter(|k| !format.is_reserved(k)).collect(),
    };

    let mut metadata = Map::new();
    for key in keys {
        let Some(value) = raw.get(key) else {
            continue;
        };
        let value = normalize_value(value, METADATA_LIST_SEP);
        if !value.is_empty() {
            metadata.insert(key.clone(), Value::String(value));
        }
    }
    metadata
}

fn first_non_empty(raw: &RawDocument, keys: &[String], list_sep: &str) -> Option<String> {
    keys.iter()
        .filter_map(|k| raw.get(k))
        .map(|v| normalize_value(v, list_sep))
        .find(|v| !v.is_empty())
}

/// Flatten a JSON value to trimmed text; lists are joined with `list_sep`.
fn normalize_value(value: &Value, list_sep: &str) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| normalize_value(item, list_sep))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(list_sep),
        Value::Object(map) if map.is_empty() => String::new(),
        other => other.to_string(),
    }
}

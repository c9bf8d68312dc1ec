//! Token-window chunking of formatted documents.

use crate::traits::tokenizer::Tokenizer;
use crate::types::document::{Chunk, FormattedDocument};
use crate::utils::hash::{content_id, CHUNK_PREFIX};

/// Split a document into windows of at most `size` tokens, each starting
/// `size - overlap` tokens after the previous one.
///
/// A document that fits in one window yields a single chunk. An overlap
/// at or above `size` is clamped so windows always advance.
pub fn chunk_by_token_size(
    doc: &FormattedDocument,
    size: usize,
    overlap: usize,
    tokenizer: &dyn Tokenizer,
) -> Vec<Chunk> {
    let size = size.max(1);
    let step = size.saturating_sub(overlap).max(1);
    let tokens = tokenizer.encode(&doc.text);

    let mut chunks = Vec::new();
    for start in (0..tokens.len()).step_by(step) {
        let end = (start + size).min(tokens.len());
        let window = &tokens[start..end];
        let content = tokenizer.decode(window).trim().to_string();
        if content.is_empty() {
            continue;
        }

        chunks.push(Chunk {
            id: content_id(CHUNK_PREFIX, &content),
            tokens: window.len(),
            content,
            order: chunks.len(),
            doc_id: doc.id.clone(),
            source_path: doc.source_path.clone(),
        });
    }
    chunks
}

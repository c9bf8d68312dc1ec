//! Content-addressed identifiers.
//!
//! Ids are derived from content so duplicates are detected without a
//! central allocator: the same text always yields the same id.

use sha2::{Digest, Sha256};

pub const ENTITY_PREFIX: &str = "ent-";
pub const RELATION_PREFIX: &str = "rel-";
pub const DOC_PREFIX: &str = "doc-";
pub const CHUNK_PREFIX: &str = "chunk-";

/// Calculate SHA-256 hash of content.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Prefixed content id, e.g. `doc-3a7b...`.
pub fn content_id(prefix: &str, content: &str) -> String {
    format!("{}{}", prefix, hash_content(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_id_is_deterministic() {
        let a = content_id(DOC_PREFIX, "hello");
        let b = content_id(DOC_PREFIX, "hello");
        let c = content_id(DOC_PREFIX, "hello!");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("doc-"));
        assert_eq!(a.len(), DOC_PREFIX.len() + 64);
    }
}

//! Shared helpers: content addressing and string cleanup.

pub mod hash;
pub mod text;

pub use hash::{content_id, hash_content, ENTITY_PREFIX, RELATION_PREFIX, CHUNK_PREFIX, DOC_PREFIX};
pub use text::{clean_str, is_float, normalize_name, pack_history, split_by_markers};

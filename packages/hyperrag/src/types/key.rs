//! Identity keys for graph records.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

use crate::utils::hash::{content_id, ENTITY_PREFIX, RELATION_PREFIX};

/// Unordered pair of entity names, stored sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey(String, String);

impl PairKey {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let (a, b) = (a.into(), b.into());
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }

    pub fn first(&self) -> &str {
        &self.0
    }

    pub fn second(&self) -> &str {
        &self.1
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0 == name || self.1 == name
    }
}

/// Write names joined by `|`, escaping `\` and `|` inside each name so
/// distinct keys never render alike.
fn write_members<'a>(
    f: &mut fmt::Formatter<'_>,
    names: impl IntoIterator<Item = &'a String>,
) -> fmt::Result {
    for (i, name) in names.into_iter().enumerate() {
        if i > 0 {
            f.write_char('|')?;
        }
        for c in name.chars() {
            if matches!(c, '\\' | '|') {
                f.write_char('\\')?;
            }
            f.write_char(c)?;
        }
    }
    Ok(())
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_members(f, [&self.0, &self.1])
    }
}

/// Set of two or more entity names, stored sorted and deduplicated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SetKey(Vec<String>);

impl SetKey {
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
        names.sort();
        names.dedup();
        Self(names)
    }

    pub fn members(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }
}

impl fmt::Display for SetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_members(f, &self.0)
    }
}

/// Identity of any record in the hypergraph.
///
/// Used for per-key merge locks and to link vector entries back to
/// graph records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum RecordKey {
    Entity(String),
    LowOrder(PairKey),
    HighOrder(SetKey),
}

impl RecordKey {
    /// Content-addressed id (`ent-…` / `rel-…`).
    pub fn content_id(&self) -> String {
        match self {
            RecordKey::Entity(name) => content_id(ENTITY_PREFIX, name),
            RecordKey::LowOrder(_) | RecordKey::HighOrder(_) => {
                content_id(RELATION_PREFIX, &self.to_string())
            }
        }
    }

    pub fn is_entity(&self) -> bool {
        matches!(self, RecordKey::Entity(_))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Entity(name) => write!(f, "entity:{}", name),
            RecordKey::LowOrder(pair) => write!(f, "low:{}", pair),
            RecordKey::HighOrder(set) => write!(f, "high:{}", set),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_unordered() {
        assert_eq!(PairKey::new("b", "a"), PairKey::new("a", "b"));
        assert_eq!(PairKey::new("b", "a").first(), "a");
    }

    #[test]
    fn test_set_key_sorts_and_dedups() {
        let key = SetKey::new(["c", "a", "b", "a"]);
        assert_eq!(key.members(), &["a", "b", "c"]);
        assert_eq!(key, SetKey::new(["b", "c", "a"]));
        assert!(key.contains("b"));
        assert!(!key.contains("d"));
    }

    #[test]
    fn test_record_key_ids_differ_by_kind() {
        let entity = RecordKey::Entity("a|b".to_string());
        let pair = RecordKey::LowOrder(PairKey::new("a", "b"));

        assert!(entity.content_id().starts_with("ent-"));
        assert!(pair.content_id().starts_with("rel-"));
        assert_ne!(
            RecordKey::LowOrder(PairKey::new("a", "b")).content_id(),
            RecordKey::HighOrder(SetKey::new(["a", "b"])).content_id()
        );
    }

    #[test]
    fn test_names_containing_separator_stay_distinct() {
        let left = PairKey::new("a|b", "c");
        let right = PairKey::new("a", "b|c");
        assert_eq!(left.to_string(), r"a\|b|c");
        assert_eq!(right.to_string(), r"a|b\|c");
        assert_ne!(
            RecordKey::LowOrder(left).content_id(),
            RecordKey::LowOrder(right).content_id()
        );

        let escaped = SetKey::new([r"x\", "y"]);
        let plain = SetKey::new([r"x\|y"]);
        assert_ne!(escaped.to_string(), plain.to_string());
        assert_ne!(
            RecordKey::HighOrder(SetKey::new(["a|b", "c"])).content_id(),
            RecordKey::HighOrder(SetKey::new(["a", "b|c"])).content_id()
        );
    }
}

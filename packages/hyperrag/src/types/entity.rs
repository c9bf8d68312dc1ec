//! Entity records - named concepts extracted from source text.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::types::key::RecordKey;
use crate::utils::hash::hash_content;
use crate::utils::text::normalize_name;

/// Entity type used when the extraction gives none.
pub const UNKNOWN_TYPE: &str = "unknown";

/// Separator used when fragments are rendered as one string.
pub const FRAGMENT_SEP: &str = "; ";

/// Ordered `key -> value` property fragment.
pub type PropertyMap = IndexMap<String, String>;

/// A named concept with accumulated descriptions and provenance.
///
/// Descriptions and property fragments are appended rather than
/// overwritten; contradictory fragments coexist until a summarization
/// pass collapses them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Normalized identity key (case-folded, whitespace-collapsed, never empty)
    pub name: String,

    /// Open-set category, `unknown` when not provided
    pub entity_type: String,

    /// Description fragments in arrival order
    #[serde(default)]
    pub descriptions: Vec<String>,

    /// Property fragments in arrival order
    #[serde(default)]
    pub additional_properties: Vec<PropertyMap>,

    /// Opaque provenance ids
    #[serde(default)]
    pub source_paths: IndexSet<String>,

    /// Hashes of every fragment ever absorbed, including collapsed ones.
    #[serde(default, skip_serializing_if = "IndexSet::is_empty")]
    pub seen_fragments: IndexSet<String>,
}

impl Entity {
    /// Create an entity; `None` when the name normalizes to empty.
    pub fn new(name: impl AsRef<str>) -> Option<Self> {
        let name = normalize_name(name.as_ref());
        if name.is_empty() {
            return None;
        }

        Some(Self {
            name,
            entity_type: UNKNOWN_TYPE.to_string(),
            descriptions: Vec::new(),
            additional_properties: Vec::new(),
            source_paths: IndexSet::new(),
            seen_fragments: IndexSet::new(),
        })
    }

    /// Set the entity type (blank falls back to `unknown`).
    pub fn with_type(mut self, entity_type: impl AsRef<str>) -> Self {
        let t = normalize_name(entity_type.as_ref());
        self.entity_type = if t.is_empty() {
            UNKNOWN_TYPE.to_string()
        } else {
            t
        };
        self
    }

    /// Add a description fragment.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.add_description(description);
        self
    }

    /// Add a property fragment.
    pub fn with_properties(mut self, properties: PropertyMap) -> Self {
        self.add_properties(properties);
        self
    }

    /// Add a provenance id.
    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_paths.insert(path.into());
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::Entity(self.name.clone())
    }

    pub fn has_known_type(&self) -> bool {
        self.entity_type != UNKNOWN_TYPE
    }

    /// Append a description unless the exact text was absorbed before.
    ///
    /// Returns whether the list changed.
    pub fn add_description(&mut self, description: impl Into<String>) -> bool {
        push_fragment(
            &mut self.descriptions,
            &mut self.seen_fragments,
            "d",
            description.into(),
        )
    }

    /// Append a property fragment unless an identical one was absorbed before.
    pub fn add_properties(&mut self, properties: PropertyMap) -> bool {
        if properties.is_empty() {
            return false;
        }
        let fingerprint = fragment_hash("p", &render_properties(&properties));
        if self.seen_fragments.contains(&fingerprint)
            || self.additional_properties.contains(&properties)
        {
            return false;
        }
        self.seen_fragments.insert(fingerprint);
        self.additional_properties.push(properties);
        true
    }

    /// All description fragments as one string.
    pub fn description(&self) -> String {
        self.descriptions.join(FRAGMENT_SEP)
    }

    /// All property fragments as one string.
    pub fn properties_text(&self) -> String {
        self.additional_properties
            .iter()
            .map(render_properties)
            .collect::<Vec<_>>()
            .join(FRAGMENT_SEP)
    }

    /// Text used to embed this entity for retrieval.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.name, self.description())
    }
}

/// Hash identifying one absorbed fragment.
pub(crate) fn fragment_hash(kind: &str, text: &str) -> String {
    hash_content(&format!("{}:{}", kind, text))
}

/// Append `fragment` to `list` unless blank or already absorbed.
pub(crate) fn push_fragment(
    list: &mut Vec<String>,
    seen: &mut IndexSet<String>,
    kind: &str,
    fragment: String,
) -> bool {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return false;
    }
    let fingerprint = fragment_hash(kind, fragment);
    if seen.contains(&fingerprint) || list.iter().any(|f| f == fragment) {
        return false;
    }
    seen.insert(fingerprint);
    list.push(fragment.to_string());
    true
}

/// Parse `key:value, key:value` into an ordered map.
///
/// Pieces without a colon continue the previous value (values may contain
/// commas); a leading piece without a key is stored under `summary`.
pub fn parse_properties(text: &str) -> PropertyMap {
    let mut map = PropertyMap::new();
    let mut last_key: Option<String> = None;

    for piece in text.split(',') {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }

        match piece.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() && !key.trim().contains(' ') => {
                let key = key.trim().to_string();
                map.insert(key.clone(), value.trim().to_string());
                last_key = Some(key);
            }
            _ => {
                let key = last_key.clone().unwrap_or_else(|| "summary".to_string());
                let entry = map.entry(key.clone()).or_default();
                if !entry.is_empty() {
                    entry.push_str(", ");
                }
                entry.push_str(piece);
                last_key = Some(key);
            }
        }
    }

    map
}

/// Render a property map back to `key:value, key:value`.
pub fn render_properties(properties: &PropertyMap) -> String {
    properties
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_and_rejects_blank() {
        let entity = Entity::new("  Stats_Command ").unwrap();
        assert_eq!(entity.name, "stats_command");
        assert_eq!(entity.entity_type, UNKNOWN_TYPE);

        assert!(Entity::new("  \"\" ").is_none());
    }

    #[test]
    fn test_add_description_dedups_exact_text() {
        let mut entity = Entity::new("join_command").unwrap();

        assert!(entity.add_description("JOIN merges two indices."));
        assert!(!entity.add_description("JOIN merges two indices."));
        assert!(entity.add_description("JOIN needs a shared key."));
        assert!(!entity.add_description("   "));

        assert_eq!(entity.descriptions.len(), 2);
    }

    #[test]
    fn test_seen_fragments_survive_collapse() {
        let mut entity = Entity::new("e").unwrap().with_description("first");
        entity.descriptions = vec!["collapsed".to_string()];

        assert!(!entity.add_description("first"));
        assert_eq!(entity.descriptions, vec!["collapsed"]);
    }

    #[test]
    fn test_parse_properties() {
        let props = parse_properties("syntax:STATS, aggregation:avg, supported_targets:data_streams");
        assert_eq!(props.len(), 3);
        assert_eq!(props["aggregation"], "avg");

        let props = parse_properties("tiers:platinum, gold, growth");
        assert_eq!(props["tiers"], "platinum, gold, growth");

        let props = parse_properties("Used for dashboards, mostly weekly");
        assert_eq!(props["summary"], "Used for dashboards, mostly weekly");

        assert_eq!(
            render_properties(&parse_properties("a:1, b:2")),
            "a:1, b:2"
        );
    }

    #[test]
    fn test_blank_type_defaults_to_unknown() {
        let entity = Entity::new("x").unwrap().with_type("  ");
        assert!(!entity.has_known_type());

        let entity = Entity::new("x").unwrap().with_type("ESQL_Command");
        assert_eq!(entity.entity_type, "esql_command");
    }
}

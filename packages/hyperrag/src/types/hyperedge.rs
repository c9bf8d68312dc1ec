//! Hyperedge records - pairwise and set-wise relations between entities.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::types::entity::{push_fragment, FRAGMENT_SEP};
use crate::types::key::{PairKey, RecordKey, SetKey};
use crate::utils::text::normalize_name;

/// Default strength when the model gives something unparseable.
pub const NEUTRAL_STRENGTH: f64 = 5.0;

/// A relation between exactly two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LowOrderHyperedge {
    /// Endpoint names as first extracted (identity ignores their order)
    pub source: String,
    pub target: String,

    #[serde(default)]
    pub descriptions: Vec<String>,

    #[serde(default)]
    pub keywords: IndexSet<String>,

    /// Expected 0-10 but not range-checked
    pub strength: f64,

    #[serde(default)]
    pub source_paths: IndexSet<String>,

    #[serde(default, skip_serializing_if = "IndexSet::is_empty")]
    pub seen_fragments: IndexSet<String>,
}

impl LowOrderHyperedge {
    /// Create an edge; `None` if either endpoint normalizes to empty.
    pub fn new(source: impl AsRef<str>, target: impl AsRef<str>) -> Option<Self> {
        let source = normalize_name(source.as_ref());
        let target = normalize_name(target.as_ref());
        if source.is_empty() || target.is_empty() {
            return None;
        }

        Some(Self {
            source,
            target,
            descriptions: Vec::new(),
            keywords: IndexSet::new(),
            strength: NEUTRAL_STRENGTH,
            source_paths: IndexSet::new(),
            seen_fragments: IndexSet::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.add_description(description);
        self
    }

    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_paths.insert(path.into());
        self
    }

    pub fn pair(&self) -> PairKey {
        PairKey::new(self.source.clone(), self.target.clone())
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::LowOrder(self.pair())
    }

    pub fn add_description(&mut self, description: impl Into<String>) -> bool {
        push_fragment(
            &mut self.descriptions,
            &mut self.seen_fragments,
            "d",
            description.into(),
        )
    }

    pub fn description(&self) -> String {
        self.descriptions.join(FRAGMENT_SEP)
    }

    pub fn keywords_text(&self) -> String {
        join_keywords(&self.keywords)
    }

    pub fn embedding_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.keywords_text(),
            self.source,
            self.target,
            self.description()
        )
    }
}

/// A relation spanning a set of two or more entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighOrderHyperedge {
    /// Member names, sorted and deduplicated
    pub entities: SetKey,

    #[serde(default)]
    pub descriptions: Vec<String>,

    /// Short summaries of the association
    #[serde(default)]
    pub generalizations: Vec<String>,

    #[serde(default)]
    pub keywords: IndexSet<String>,

    pub strength: f64,

    #[serde(default)]
    pub source_paths: IndexSet<String>,

    #[serde(default, skip_serializing_if = "IndexSet::is_empty")]
    pub seen_fragments: IndexSet<String>,
}

impl HighOrderHyperedge {
    /// Create an edge; `None` unless at least two distinct non-empty names remain.
    pub fn new(names: impl IntoIterator<Item = impl AsRef<str>>) -> Option<Self> {
        let entities = SetKey::new(
            names
                .into_iter()
                .map(|n| normalize_name(n.as_ref()))
                .filter(|n| !n.is_empty()),
        );
        if entities.len() < 2 {
            return None;
        }

        Some(Self {
            entities,
            descriptions: Vec::new(),
            generalizations: Vec::new(),
            keywords: IndexSet::new(),
            strength: NEUTRAL_STRENGTH,
            source_paths: IndexSet::new(),
            seen_fragments: IndexSet::new(),
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.add_description(description);
        self
    }

    pub fn with_generalization(mut self, generalization: impl Into<String>) -> Self {
        self.add_generalization(generalization);
        self
    }

    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_paths.insert(path.into());
        self
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::HighOrder(self.entities.clone())
    }

    pub fn add_description(&mut self, description: impl Into<String>) -> bool {
        push_fragment(
            &mut self.descriptions,
            &mut self.seen_fragments,
            "d",
            description.into(),
        )
    }

    pub fn add_generalization(&mut self, generalization: impl Into<String>) -> bool {
        push_fragment(
            &mut self.generalizations,
            &mut self.seen_fragments,
            "g",
            generalization.into(),
        )
    }

    pub fn description(&self) -> String {
        self.descriptions.join(FRAGMENT_SEP)
    }

    pub fn generalization(&self) -> String {
        self.generalizations.join(FRAGMENT_SEP)
    }

    pub fn keywords_text(&self) -> String {
        join_keywords(&self.keywords)
    }

    pub fn embedding_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.keywords_text(),
            self.entities.members().join(" "),
            self.generalization(),
            self.description()
        )
    }
}

/// Split a comma separated keyword field.
pub fn parse_keywords(text: &str) -> IndexSet<String> {
    text.split(',')
        .map(|k| k.trim().trim_matches(|c| c == '{' || c == '}' || c == '"'))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_keywords(keywords: &IndexSet<String>) -> String {
    keywords.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_order_key_ignores_direction() {
        let ab = LowOrderHyperedge::new("A", "b").unwrap();
        let ba = LowOrderHyperedge::new("b", "a").unwrap();
        assert_eq!(ab.key(), ba.key());
        assert!(LowOrderHyperedge::new("a", " ").is_none());
    }

    #[test]
    fn test_high_order_needs_two_distinct_members() {
        assert!(HighOrderHyperedge::new(["a", "A"]).is_none());
        assert!(HighOrderHyperedge::new(["a", ""]).is_none());

        let edge = HighOrderHyperedge::new(["c", "a", "b"]).unwrap();
        assert_eq!(edge.entities.members(), &["a", "b", "c"]);
        assert_eq!(edge.key(), HighOrderHyperedge::new(["b", "c", "a"]).unwrap().key());
    }

    #[test]
    fn test_parse_keywords() {
        let keywords = parse_keywords("{observability_workflow, latency_thresholds,,data_validation}");
        assert_eq!(
            keywords.into_iter().collect::<Vec<_>>(),
            vec!["observability_workflow", "latency_thresholds", "data_validation"]
        );
    }

    #[test]
    fn test_generalization_and_description_fragments_are_separate() {
        let mut edge = HighOrderHyperedge::new(["a", "b"]).unwrap();
        assert!(edge.add_description("same text"));
        assert!(edge.add_generalization("same text"));
        assert!(!edge.add_description("same text"));
        assert_eq!(edge.descriptions.len(), 1);
        assert_eq!(edge.generalizations.len(), 1);
    }
}

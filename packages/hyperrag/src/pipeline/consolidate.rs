//! Hypergraph consolidation.
//!
//! Folds [`ExtractionBatch`]es into the graph store. Records are grouped by
//! identity key; each key is merged under its own async lock, so concurrent
//! batches touching the same entity serialize while disjoint keys proceed in
//! parallel. A merged record is computed in full, embedded, and written
//! with a single upsert per store while its key lock is held. The vector is
//! written before the graph record, so a failed embedding leaves the graph
//! untouched and replaying the batch repairs both stores.
//!
//! Merging is idempotent: fragments are deduplicated by content hash (even
//! after a summarization collapsed them), source paths and keywords are set
//! unions, and strength only ever takes the maximum.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::try_join_all;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::Result;
use crate::pipeline::governor::{Governor, RetryPolicy};
use crate::pipeline::prompts::PromptTemplates;
use crate::traits::{
    embedding::Embedder,
    llm::LanguageModel,
    store::{GraphStore, VectorRecord, VectorStore},
};
use crate::types::{
    batch::ExtractionBatch,
    config::HyperRagConfig,
    entity::{fragment_hash, parse_properties, render_properties, Entity},
    hyperedge::{parse_keywords, HighOrderHyperedge, LowOrderHyperedge},
    key::{PairKey, RecordKey, SetKey},
};
use crate::utils::text::clean_str;

/// Outcome of one consolidation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    pub entities_created: usize,
    pub entities_updated: usize,

    /// Entities created only because a hyperedge referenced them
    pub placeholders_created: usize,

    pub edges_created: usize,
    pub edges_updated: usize,

    /// Keys whose stored record did not change
    pub unchanged: usize,

    /// Governed summarization calls that collapsed a fragment list
    pub summarizations: usize,

    pub vectors_upserted: usize,
}

impl MergeReport {
    /// Records created or updated.
    pub fn changed(&self) -> usize {
        self.entities_created
            + self.entities_updated
            + self.placeholders_created
            + self.edges_created
            + self.edges_updated
    }

    /// Add another report's counts to this one.
    pub fn absorb(&mut self, other: &MergeReport) {
        self.entities_created += other.entities_created;
        self.entities_updated += other.entities_updated;
        self.placeholders_created += other.placeholders_created;
        self.edges_created += other.edges_created;
        self.edges_updated += other.edges_updated;
        self.unchanged += other.unchanged;
        self.summarizations += other.summarizations;
        self.vectors_upserted += other.vectors_upserted;
    }

    fn record(&mut self, merged: &Merged) {
        self.summarizations += merged.summarizations;
        if merged.change != Change::Unchanged {
            self.vectors_upserted += 1;
        }
        let is_entity = merged.key.is_entity();
        match merged.change {
            Change::Created if is_entity => self.entities_created += 1,
            Change::Created => self.edges_created += 1,
            Change::Updated if is_entity => self.entities_updated += 1,
            Change::Updated => self.edges_updated += 1,
            Change::Placeholder => self.placeholders_created += 1,
            Change::Unchanged => self.unchanged += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Created,
    Placeholder,
    Updated,
    Unchanged,
}

/// Result of merging one key.
#[derive(Debug)]
struct Merged {
    key: RecordKey,
    change: Change,
    summarizations: usize,
}

impl Merged {
    fn new(key: RecordKey, change: Change, summarizations: usize) -> Self {
        Self {
            key,
            change,
            summarizations,
        }
    }
}

/// Holds one key's lock; drops the map entry once nobody else wants it.
struct KeyGuard<'a> {
    locks: &'a DashMap<RecordKey, Arc<Mutex<()>>>,
    key: RecordKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Release before pruning so the count below only sees the map and waiters.
        drop(self.guard.take());
        self.locks.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Merges extraction batches into a [`GraphStore`] and keeps the
/// [`VectorStore`] in step.
pub struct Consolidator {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    governor: Governor,
    policy: RetryPolicy,
    prompts: Arc<PromptTemplates>,
    config: Arc<HyperRagConfig>,
    locks: DashMap<RecordKey, Arc<Mutex<()>>>,
}

impl Consolidator {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        governor: Governor,
        config: Arc<HyperRagConfig>,
    ) -> Self {
        Self {
            graph,
            vectors,
            llm,
            embedder,
            governor,
            policy: RetryPolicy::new(config.retry.clone()),
            prompts: Arc::new(PromptTemplates::default()),
            config,
            locks: DashMap::new(),
        }
    }

    pub fn with_prompts(mut self, prompts: Arc<PromptTemplates>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    pub fn vectors(&self) -> &Arc<dyn VectorStore> {
        &self.vectors
    }

    /// Merge one batch: entities first, then hyperedges of both orders.
    pub async fn merge(&self, batch: ExtractionBatch) -> Result<MergeReport> {
        let mut report = MergeReport::default();

        let mut entity_groups: IndexMap<String, Vec<Entity>> = IndexMap::new();
        for entity in batch.entities {
            entity_groups
                .entry(entity.name.clone())
                .or_default()
                .push(entity);
        }
        let entities = try_join_all(
            entity_groups
                .into_iter()
                .map(|(name, group)| self.merge_entity(name, group)),
        )
        .await?;
        for merged in &entities {
            report.record(merged);
        }

        let mut low_groups: IndexMap<PairKey, Vec<LowOrderHyperedge>> = IndexMap::new();
        for edge in batch.low_order_edges {
            low_groups.entry(edge.pair()).or_default().push(edge);
        }
        let mut high_groups: IndexMap<SetKey, Vec<HighOrderHyperedge>> = IndexMap::new();
        for edge in batch.high_order_edges {
            high_groups
                .entry(edge.entities.clone())
                .or_default()
                .push(edge);
        }

        let (low, high) = futures::try_join!(
            try_join_all(
                low_groups
                    .into_iter()
                    .map(|(pair, group)| self.merge_low_order(pair, group)),
            ),
            try_join_all(
                high_groups
                    .into_iter()
                    .map(|(key, group)| self.merge_high_order(key, group)),
            ),
        )?;
        for merged in low.iter().chain(&high).flatten() {
            report.record(merged);
        }

        info!(
            entities_created = report.entities_created,
            entities_updated = report.entities_updated,
            placeholders = report.placeholders_created,
            edges_created = report.edges_created,
            edges_updated = report.edges_updated,
            summarizations = report.summarizations,
            "Merged extraction batch"
        );
        Ok(report)
    }

    /// Number of keys with a live lock entry.
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    async fn lock_key(&self, key: &RecordKey) -> KeyGuard<'_> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: &self.locks,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    async fn merge_entity(&self, name: String, incoming: Vec<Entity>) -> Result<Merged> {
        let key = RecordKey::Entity(name.clone());
        let _guard = self.lock_key(&key).await;

        let mut incoming = incoming.into_iter();
        let (mut entity, before) = match self.graph.get_entity(&name).await? {
            Some(existing) => (existing.clone(), Some(existing)),
            None => match incoming.next() {
                Some(first) => (first, None),
                None => return Ok(Merged::new(key, Change::Unchanged, 0)),
            },
        };
        for other in incoming {
            absorb_entity(&mut entity, other);
        }

        let summarizations = self.summarize_entity(&mut entity).await?;

        let change = change_of(before.as_ref(), &entity);
        if change != Change::Unchanged {
            self.index_vector(&key, entity.embedding_text()).await?;
            debug!(entity = %entity.name, fragments = entity.descriptions.len(), "Upserting entity");
            self.graph.upsert_entity(entity).await?;
        }
        Ok(Merged::new(key, change, summarizations))
    }

    async fn merge_low_order(
        &self,
        pair: PairKey,
        incoming: Vec<LowOrderHyperedge>,
    ) -> Result<Vec<Merged>> {
        let mut merged = self
            .ensure_endpoints(
                [pair.first(), pair.second()],
                incoming.iter().map(|e| (e.description(), &e.source_paths)),
            )
            .await?;

        let key = RecordKey::LowOrder(pair.clone());
        let _guard = self.lock_key(&key).await;

        let mut incoming = incoming.into_iter();
        let (mut edge, before) = match self.graph.get_low_order_edge(&pair).await? {
            Some(existing) => (existing.clone(), Some(existing)),
            None => match incoming.next() {
                Some(mut first) => {
                    let keywords = std::mem::take(&mut first.keywords);
                    absorb_keywords(&mut first.keywords, &mut first.seen_fragments, keywords);
                    (first, None)
                }
                None => return Ok(merged),
            },
        };
        for other in incoming {
            absorb_low_order(&mut edge, other);
        }

        let name = format!("({}, {})", pair.first(), pair.second());
        let mut summarizations = 0;
        if edge.descriptions.len() > self.config.summary_threshold {
            let prompt = self.prompts.format_summarize_relation_descriptions(
                &name,
                &edge.descriptions,
                self.config.summary_max_tokens,
            );
            let summary = self.summarize(&prompt).await?;
            if collapse(&mut edge.descriptions, &mut edge.seen_fragments, "d", summary) {
                summarizations += 1;
            }
            summarizations += self
                .reselect_keywords(&name, &mut edge.keywords, &mut edge.seen_fragments)
                .await?;
        }

        let change = change_of(before.as_ref(), &edge);
        if change != Change::Unchanged {
            self.index_vector(&key, edge.embedding_text()).await?;
            debug!(relation = %pair, strength = edge.strength, "Upserting low-order hyperedge");
            self.graph.upsert_low_order_edge(edge).await?;
        }
        merged.push(Merged::new(key, change, summarizations));
        Ok(merged)
    }

    async fn merge_high_order(
        &self,
        set: SetKey,
        incoming: Vec<HighOrderHyperedge>,
    ) -> Result<Vec<Merged>> {
        let mut merged = self
            .ensure_endpoints(
                set.members().iter().map(String::as_str),
                incoming.iter().map(|e| (e.description(), &e.source_paths)),
            )
            .await?;

        let key = RecordKey::HighOrder(set.clone());
        let _guard = self.lock_key(&key).await;

        let mut incoming = incoming.into_iter();
        let (mut edge, before) = match self.graph.get_high_order_edge(&set).await? {
            Some(existing) => (existing.clone(), Some(existing)),
            None => match incoming.next() {
                Some(mut first) => {
                    let keywords = std::mem::take(&mut first.keywords);
                    absorb_keywords(&mut first.keywords, &mut first.seen_fragments, keywords);
                    (first, None)
                }
                None => return Ok(merged),
            },
        };
        for other in incoming {
            absorb_high_order(&mut edge, other);
        }

        let name = format!("({})", set.members().join(", "));
        let threshold = self.config.summary_threshold;
        let max_tokens = self.config.summary_max_tokens;
        let mut summarizations = 0;
        if edge.descriptions.len() > threshold {
            let prompt = self.prompts.format_summarize_relation_descriptions(
                &name,
                &edge.descriptions,
                max_tokens,
            );
            let summary = self.summarize(&prompt).await?;
            if collapse(&mut edge.descriptions, &mut edge.seen_fragments, "d", summary) {
                summarizations += 1;
            }
            summarizations += self
                .reselect_keywords(&name, &mut edge.keywords, &mut edge.seen_fragments)
                .await?;
        }
        if edge.generalizations.len() > threshold {
            let prompt = self.prompts.format_summarize_relation_descriptions(
                &name,
                &edge.generalizations,
                max_tokens,
            );
            let summary = self.summarize(&prompt).await?;
            if collapse(&mut edge.generalizations, &mut edge.seen_fragments, "g", summary) {
                summarizations += 1;
            }
        }

        let change = change_of(before.as_ref(), &edge);
        if change != Change::Unchanged {
            self.index_vector(&key, edge.embedding_text()).await?;
            debug!(relation = %set, strength = edge.strength, "Upserting high-order hyperedge");
            self.graph.upsert_high_order_edge(edge).await?;
        }
        merged.push(Merged::new(key, change, summarizations));
        Ok(merged)
    }

    /// Create placeholder entities for any endpoint missing from the graph.
    ///
    /// The placeholder takes the first non-empty edge description and the
    /// union of the edges' source paths.
    async fn ensure_endpoints<'a, 'p>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
        edges: impl Iterator<Item = (String, &'p IndexSet<String>)>,
    ) -> Result<Vec<Merged>> {
        let mut description = String::new();
        let mut source_paths: IndexSet<String> = IndexSet::new();
        for (text, paths) in edges {
            if description.is_empty() {
                description = text;
            }
            source_paths.extend(paths.iter().cloned());
        }

        let mut created = Vec::new();
        for name in names {
            let key = RecordKey::Entity(name.to_string());
            let _guard = self.lock_key(&key).await;

            if self.graph.has_entity(name).await? {
                continue;
            }
            let Some(mut placeholder) = Entity::new(name) else {
                continue;
            };
            placeholder.add_description(description.clone());
            placeholder.source_paths.extend(source_paths.iter().cloned());

            self.index_vector(&key, placeholder.embedding_text()).await?;
            debug!(entity = %placeholder.name, "Creating placeholder entity for hyperedge endpoint");
            self.graph.upsert_entity(placeholder).await?;
            created.push(Merged::new(key, Change::Placeholder, 0));
        }
        Ok(created)
    }

    /// Collapse over-threshold description and property lists.
    async fn summarize_entity(&self, entity: &mut Entity) -> Result<usize> {
        let threshold = self.config.summary_threshold;
        let max_tokens = self.config.summary_max_tokens;
        let mut summarizations = 0;

        if entity.descriptions.len() > threshold {
            let prompt = self.prompts.format_summarize_entity_descriptions(
                &entity.name,
                &entity.descriptions,
                max_tokens,
            );
            let summary = self.summarize(&prompt).await?;
            if collapse(&mut entity.descriptions, &mut entity.seen_fragments, "d", summary) {
                summarizations += 1;
            }
        }

        if entity.additional_properties.len() > threshold {
            let rendered: Vec<String> = entity
                .additional_properties
                .iter()
                .map(render_properties)
                .collect();
            let prompt = self.prompts.format_summarize_entity_additional_properties(
                &entity.name,
                &rendered,
                max_tokens,
            );
            let summary = parse_properties(&self.summarize(&prompt).await?);
            if !summary.is_empty() {
                entity
                    .seen_fragments
                    .insert(fragment_hash("p", &render_properties(&summary)));
                entity.additional_properties = vec![summary];
                summarizations += 1;
            }
        }

        Ok(summarizations)
    }

    /// Replace `keywords` with a model-selected subset of their union.
    async fn reselect_keywords(
        &self,
        relation_name: &str,
        keywords: &mut IndexSet<String>,
        seen: &mut IndexSet<String>,
    ) -> Result<usize> {
        if keywords.is_empty() {
            return Ok(0);
        }
        let current: Vec<String> = keywords.iter().cloned().collect();
        let prompt = self
            .prompts
            .format_summarize_relation_keywords(relation_name, &current);
        let selected = parse_keywords(&self.summarize(&prompt).await?);
        if selected.is_empty() {
            return Ok(0);
        }
        for keyword in &selected {
            seen.insert(fragment_hash("k", keyword));
        }
        *keywords = selected;
        Ok(1)
    }

    async fn summarize(&self, prompt: &str) -> Result<String> {
        let response = self
            .governor
            .complete(self.llm.as_ref(), prompt, None, &[], &self.policy)
            .await?;
        Ok(clean_str(&response))
    }

    /// Embed a changed record and upsert its vector.
    ///
    /// Must run under the record's key lock, before the graph upsert.
    async fn index_vector(&self, key: &RecordKey, text: String) -> Result<()> {
        let texts = [text];
        let embedding = self
            .governor
            .embed(self.embedder.as_ref(), &texts, &self.policy)
            .await?
            .pop()
            .unwrap_or_default();
        let [text] = texts;
        self.vectors
            .upsert_vectors(vec![VectorRecord::new(key.clone(), text, embedding)])
            .await
    }
}

impl std::fmt::Debug for Consolidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consolidator")
            .field("governor", &self.governor)
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

fn change_of<T: PartialEq>(before: Option<&T>, after: &T) -> Change {
    match before {
        None => Change::Created,
        Some(before) if before == after => Change::Unchanged,
        Some(_) => Change::Updated,
    }
}

fn absorb_entity(target: &mut Entity, incoming: Entity) {
    if !target.has_known_type() && incoming.has_known_type() {
        target.entity_type = incoming.entity_type;
    }
    for description in incoming.descriptions {
        target.add_description(description);
    }
    for properties in incoming.additional_properties {
        target.add_properties(properties);
    }
    target.source_paths.extend(incoming.source_paths);
}

fn absorb_low_order(target: &mut LowOrderHyperedge, incoming: LowOrderHyperedge) {
    for description in incoming.descriptions {
        target.add_description(description);
    }
    absorb_keywords(&mut target.keywords, &mut target.seen_fragments, incoming.keywords);
    target.strength = target.strength.max(incoming.strength);
    target.source_paths.extend(incoming.source_paths);
}

fn absorb_high_order(target: &mut HighOrderHyperedge, incoming: HighOrderHyperedge) {
    for description in incoming.descriptions {
        target.add_description(description);
    }
    for generalization in incoming.generalizations {
        target.add_generalization(generalization);
    }
    absorb_keywords(&mut target.keywords, &mut target.seen_fragments, incoming.keywords);
    target.strength = target.strength.max(incoming.strength);
    target.source_paths.extend(incoming.source_paths);
}

/// Union keywords, skipping any the record has absorbed before.
fn absorb_keywords(
    keywords: &mut IndexSet<String>,
    seen: &mut IndexSet<String>,
    incoming: impl IntoIterator<Item = String>,
) {
    for keyword in incoming {
        if seen.insert(fragment_hash("k", &keyword)) {
            keywords.insert(keyword);
        }
    }
}

/// Replace a fragment list with its summary. Blank summaries are ignored.
fn collapse(
    list: &mut Vec<String>,
    seen: &mut IndexSet<String>,
    kind: &str,
    summary: String,
) -> bool {
    let summary = summary.trim();
    if summary.is_empty() {
        return false;
    }
    seen.insert(fragment_hash(kind, summary));
    *list = vec![summary.to_string()];
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::HyperRagError;
    use crate::pipeline::parse::parse_extraction_response;
    use crate::stores::MemoryStore;
    use crate::testing::{MockEmbedder, MockLanguageModel};
    use crate::traits::store::VectorNamespace;
    use crate::types::config::GovernorConfig;
    use crate::types::entity::PropertyMap;

    fn consolidator(
        store: Arc<MemoryStore>,
        llm: Arc<MockLanguageModel>,
        config: HyperRagConfig,
    ) -> Consolidator {
        consolidator_with_embedder(store, llm, MockEmbedder::default(), config)
    }

    fn consolidator_with_embedder(
        store: Arc<MemoryStore>,
        llm: Arc<MockLanguageModel>,
        embedder: MockEmbedder,
        config: HyperRagConfig,
    ) -> Consolidator {
        let governor = Governor::new(&GovernorConfig::default()).unwrap();
        Consolidator::new(
            store.clone(),
            store,
            llm,
            Arc::new(embedder),
            governor,
            Arc::new(config),
        )
    }

    async fn top_score(store: &MemoryStore, namespace: VectorNamespace, text: String) -> f32 {
        let query = MockEmbedder::default().embed(&[text]).await.unwrap();
        let hits = store.search(namespace, &query[0], 1).await.unwrap();
        hits.first().map(|hit| hit.score).unwrap_or_default()
    }

    fn entity(name: &str, entity_type: &str, description: &str) -> Entity {
        Entity::new(name)
            .unwrap()
            .with_type(entity_type)
            .with_description(description)
            .with_source_path("doc-1")
    }

    #[tokio::test]
    async fn test_merge_into_empty_graph() {
        let store = Arc::new(MemoryStore::new());
        let merger = consolidator(
            store.clone(),
            Arc::new(MockLanguageModel::new()),
            HyperRagConfig::default(),
        );

        let batch = ExtractionBatch {
            entities: vec![
                entity("stats_command", "esql_command", "Aggregates rows"),
                entity("avg_function", "esql_function", "Averages a column"),
            ],
            low_order_edges: vec![LowOrderHyperedge::new("stats_command", "avg_function")
                .unwrap()
                .with_description("STATS uses AVG")
                .with_keywords(["aggregation"])
                .with_strength(8.0)],
            ..Default::default()
        };

        let report = merger.merge(batch).await.unwrap();
        assert_eq!(report.entities_created, 2);
        assert_eq!(report.edges_created, 1);
        assert_eq!(report.placeholders_created, 0);
        assert_eq!(report.vectors_upserted, 3);
        assert_eq!(store.entity_count().unwrap(), 2);
        assert_eq!(store.edge_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_type_kept_unless_unknown() {
        let store = Arc::new(MemoryStore::new());
        let merger = consolidator(
            store.clone(),
            Arc::new(MockLanguageModel::new()),
            HyperRagConfig::default(),
        );

        let untyped = Entity::new("where_command")
            .unwrap()
            .with_description("Filters rows");
        merger
            .merge(ExtractionBatch {
                entities: vec![untyped],
                ..Default::default()
            })
            .await
            .unwrap();
        merger
            .merge(ExtractionBatch {
                entities: vec![entity("where_command", "esql_command", "Filters rows")],
                ..Default::default()
            })
            .await
            .unwrap();
        merger
            .merge(ExtractionBatch {
                entities: vec![entity("where_command", "esql_function", "Keeps matches")],
                ..Default::default()
            })
            .await
            .unwrap();

        let stored = store.get_entity("where_command").await.unwrap().unwrap();
        assert_eq!(stored.entity_type, "esql_command");
        assert_eq!(stored.descriptions, vec!["Filters rows", "Keeps matches"]);
        assert!(stored.source_paths.contains("doc-1"));
    }

    #[tokio::test]
    async fn test_conflicting_descriptions_are_both_kept() {
        let store = Arc::new(MemoryStore::new());
        let merger = consolidator(
            store.clone(),
            Arc::new(MockLanguageModel::new()),
            HyperRagConfig::default(),
        );

        for description in ["Groups rows by key", "Computes aggregate values"] {
            merger
                .merge(ExtractionBatch {
                    entities: vec![entity("stats_command", "esql_command", description)],
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        let stored = store.get_entity("stats_command").await.unwrap().unwrap();
        assert_eq!(
            stored.descriptions,
            vec!["Groups rows by key", "Computes aggregate values"]
        );
    }

    #[tokio::test]
    async fn test_edge_strength_is_max_and_keywords_union() {
        let store = Arc::new(MemoryStore::new());
        let merger = consolidator(
            store.clone(),
            Arc::new(MockLanguageModel::new()),
            HyperRagConfig::default(),
        );

        let first = LowOrderHyperedge::new("a", "b")
            .unwrap()
            .with_description("first")
            .with_keywords(["x"])
            .with_strength(7.0);
        let second = LowOrderHyperedge::new("b", "a")
            .unwrap()
            .with_description("second")
            .with_keywords(["y"])
            .with_strength(3.0);
        merger
            .merge(ExtractionBatch {
                low_order_edges: vec![first, second],
                ..Default::default()
            })
            .await
            .unwrap();

        let edge = store
            .get_low_order_edge(&PairKey::new("a", "b"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(edge.strength, 7.0);
        assert_eq!(edge.keywords.iter().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(edge.descriptions, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_missing_endpoints_become_placeholders() {
        let store = Arc::new(MemoryStore::new());
        let merger = consolidator(
            store.clone(),
            Arc::new(MockLanguageModel::new()),
            HyperRagConfig::default(),
        );

        let edge = HighOrderHyperedge::new(["from_command", "where_command", "stats_command"])
            .unwrap()
            .with_description("A typical pipeline")
            .with_source_path("doc-7");
        let report = merger
            .merge(ExtractionBatch {
                entities: vec![entity("stats_command", "esql_command", "Aggregates")],
                high_order_edges: vec![edge],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(report.placeholders_created, 2);
        let placeholder = store.get_entity("from_command").await.unwrap().unwrap();
        assert!(!placeholder.has_known_type());
        assert_eq!(placeholder.descriptions, vec!["A typical pipeline"]);
        assert!(placeholder.source_paths.contains("doc-7"));
        assert_eq!(store.entity_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let merger = consolidator(
            store.clone(),
            Arc::new(MockLanguageModel::new()),
            HyperRagConfig::default(),
        );
        let response = "(\"entity\" | \"stats_command\" | \"esql_command\" | \"Aggregates rows\" | \"syntax: STATS\")\n\
            (\"low-order Hyperedge\" | \"stats_command\" | \"by_clause\" | \"Groups by\" | \"grouping\" | 9)\n\
            (\"high-order Hyperedge\" | \"stats_command\" | \"by_clause\" | \"avg\" | \"Pipeline\" | \"Aggregation\" | \"agg\" | 7)";
        let batch = parse_extraction_response(response, &HyperRagConfig::default());

        merger.merge(batch.clone()).await.unwrap();
        let once = store.snapshot().await.unwrap();

        let report = merger.merge(batch).await.unwrap();
        let twice = store.snapshot().await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(report.changed(), 0);
        assert_eq!(report.vectors_upserted, 0);
    }

    #[tokio::test]
    async fn test_summarization_collapses_and_stays_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(
            MockLanguageModel::new()
                .with_response("Entity: stats_command", "STATS aggregates rows by key."),
        );
        let config = HyperRagConfig::default().with_summary_threshold(2);
        let merger = consolidator(store.clone(), llm.clone(), config);

        let batch = ExtractionBatch {
            entities: vec![
                entity("stats_command", "esql_command", "one"),
                entity("stats_command", "esql_command", "two"),
                entity("stats_command", "esql_command", "three"),
            ],
            ..Default::default()
        };

        let report = merger.merge(batch.clone()).await.unwrap();
        assert_eq!(report.summarizations, 1);
        let stored = store.get_entity("stats_command").await.unwrap().unwrap();
        assert_eq!(stored.descriptions, vec!["STATS aggregates rows by key."]);

        let report = merger.merge(batch).await.unwrap();
        assert_eq!(report.summarizations, 0);
        assert_eq!(report.unchanged, 1);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_property_summarization_parses_result() {
        let store = Arc::new(MemoryStore::new());
        let llm = Arc::new(MockLanguageModel::new().with_default_response("syntax: STATS x BY y"));
        let config = HyperRagConfig::default().with_summary_threshold(1);
        let merger = consolidator(store.clone(), llm, config);

        let props = |value: &str| {
            let mut map = PropertyMap::new();
            map.insert("syntax".to_string(), value.to_string());
            map
        };
        let batch = ExtractionBatch {
            entities: vec![
                Entity::new("stats_command").unwrap().with_properties(props("STATS x")),
                Entity::new("stats_command").unwrap().with_properties(props("STATS x BY y")),
            ],
            ..Default::default()
        };
        merger.merge(batch).await.unwrap();

        let stored = store.get_entity("stats_command").await.unwrap().unwrap();
        assert_eq!(stored.additional_properties, vec![props("STATS x BY y")]);
    }

    #[tokio::test]
    async fn test_changed_records_are_embedded() {
        let store = Arc::new(MemoryStore::new());
        let merger = consolidator(
            store.clone(),
            Arc::new(MockLanguageModel::new()),
            HyperRagConfig::default(),
        );
        merger
            .merge(ExtractionBatch {
                entities: vec![entity("keep_command", "esql_command", "Selects columns")],
                ..Default::default()
            })
            .await
            .unwrap();

        let query = MockEmbedder::default()
            .embed(&["keep_command".to_string()])
            .await
            .unwrap();
        let hits = store
            .search(VectorNamespace::Entities, &query[0], 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, RecordKey::Entity("keep_command".to_string()));
    }

    #[tokio::test]
    async fn test_failed_embedding_leaves_graph_untouched_and_replay_repairs() {
        let store = Arc::new(MemoryStore::new());
        let merger = consolidator_with_embedder(
            store.clone(),
            Arc::new(MockLanguageModel::new()),
            MockEmbedder::default().with_failures(1),
            HyperRagConfig::default(),
        );
        let batch = ExtractionBatch {
            entities: vec![entity("keep_command", "esql_command", "Selects columns")],
            ..Default::default()
        };

        let err = merger.merge(batch.clone()).await.unwrap_err();
        assert!(matches!(err, HyperRagError::Embedding(_)));
        assert_eq!(store.entity_count().unwrap(), 0);
        assert_eq!(store.vector_count().unwrap(), 0);

        let report = merger.merge(batch).await.unwrap();
        assert_eq!(report.entities_created, 1);
        assert_eq!(report.vectors_upserted, 1);
        assert_eq!(store.entity_count().unwrap(), 1);
        assert_eq!(store.vector_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_edge_embedding_is_repaired_on_replay() {
        let store = Arc::new(MemoryStore::new());
        consolidator(
            store.clone(),
            Arc::new(MockLanguageModel::new()),
            HyperRagConfig::default(),
        )
        .merge(ExtractionBatch {
            entities: vec![
                entity("keep_command", "esql_command", "Selects columns"),
                entity("drop_command", "esql_command", "Removes columns"),
            ],
            ..Default::default()
        })
        .await
        .unwrap();

        let merger = consolidator_with_embedder(
            store.clone(),
            Arc::new(MockLanguageModel::new()),
            MockEmbedder::default().with_failures(1),
            HyperRagConfig::default(),
        );
        let batch = ExtractionBatch {
            low_order_edges: vec![LowOrderHyperedge::new("keep_command", "drop_command")
                .unwrap()
                .with_description("Both shape the column list")
                .with_strength(6.0)],
            ..Default::default()
        };

        assert!(merger.merge(batch.clone()).await.is_err());
        assert_eq!(store.edge_count().unwrap(), 0);

        let report = merger.merge(batch).await.unwrap();
        assert_eq!(report.edges_created, 1);
        assert_eq!(store.edge_count().unwrap(), 1);
        assert_eq!(store.vector_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_merges_leave_vector_matching_graph() {
        let store = Arc::new(MemoryStore::new());
        let merger = consolidator_with_embedder(
            store.clone(),
            Arc::new(MockLanguageModel::new()),
            MockEmbedder::default().with_slow_calls(1, Duration::from_millis(100)),
            HyperRagConfig::default(),
        );
        let first = ExtractionBatch {
            entities: vec![entity("eval_command", "esql_command", "Computes columns")],
            ..Default::default()
        };
        let second = ExtractionBatch {
            entities: vec![entity("eval_command", "esql_command", "Appends derived fields")],
            ..Default::default()
        };

        let (a, b) = tokio::join!(merger.merge(first), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            merger.merge(second).await
        });
        a.unwrap();
        b.unwrap();

        let stored = store.get_entity("eval_command").await.unwrap().unwrap();
        assert_eq!(
            stored.descriptions,
            vec!["Computes columns", "Appends derived fields"]
        );
        assert_eq!(store.vector_count().unwrap(), 1);
        let score = top_score(&store, VectorNamespace::Entities, stored.embedding_text()).await;
        assert!(score > 0.9999, "stored vector is stale: {}", score);
    }

    #[tokio::test]
    async fn test_key_locks_are_released_after_merge() {
        let store = Arc::new(MemoryStore::new());
        let merger = consolidator(
            store.clone(),
            Arc::new(MockLanguageModel::new()),
            HyperRagConfig::default(),
        );
        let batch = ExtractionBatch {
            entities: vec![entity("sort_command", "esql_command", "Orders rows")],
            high_order_edges: vec![HighOrderHyperedge::new([
                "sort_command",
                "limit_command",
                "from_command",
            ])
            .unwrap()
            .with_description("Top-N query")],
            ..Default::default()
        };

        let merges = (0..4).map(|_| merger.merge(batch.clone()));
        let mut total = MergeReport::default();
        for report in try_join_all(merges).await.unwrap() {
            total.absorb(&report);
        }
        assert_eq!(total.changed(), 4);
        assert_eq!(total.vectors_upserted, 4);

        assert_eq!(merger.active_locks(), 0);
        assert_eq!(store.entity_count().unwrap(), 3);
    }
}

//! Storage traits for the hypergraph and its vector index.
//!
//! The storage layer is split into focused traits:
//! - `GraphStore`: entities and hyperedges keyed by identity
//! - `VectorStore`: embeddings of merged records for retrieval
//!
//! Writes replace whole records; readers never observe a half-merged one.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{
    entity::Entity,
    hyperedge::{HighOrderHyperedge, LowOrderHyperedge},
    key::{PairKey, RecordKey, SetKey},
};

/// Consistent copy of the whole graph at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub entities: Vec<Entity>,
    pub low_order_edges: Vec<LowOrderHyperedge>,
    pub high_order_edges: Vec<HighOrderHyperedge>,
}

impl GraphSnapshot {
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn low_order_edge(&self, pair: &PairKey) -> Option<&LowOrderHyperedge> {
        self.low_order_edges.iter().find(|e| &e.pair() == pair)
    }

    pub fn high_order_edge(&self, key: &SetKey) -> Option<&HighOrderHyperedge> {
        self.high_order_edges.iter().find(|e| &e.entities == key)
    }
}

/// Hyperedges touching one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityEdges {
    pub low_order: Vec<LowOrderHyperedge>,
    pub high_order: Vec<HighOrderHyperedge>,
}

impl EntityEdges {
    pub fn len(&self) -> usize {
        self.low_order.len() + self.high_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keyed storage for entities and hyperedges.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Get an entity by normalized name.
    async fn get_entity(&self, name: &str) -> Result<Option<Entity>>;

    /// Insert or replace an entity.
    async fn upsert_entity(&self, entity: Entity) -> Result<()>;

    async fn get_low_order_edge(&self, pair: &PairKey) -> Result<Option<LowOrderHyperedge>>;

    async fn upsert_low_order_edge(&self, edge: LowOrderHyperedge) -> Result<()>;

    async fn get_high_order_edge(&self, key: &SetKey) -> Result<Option<HighOrderHyperedge>>;

    async fn upsert_high_order_edge(&self, edge: HighOrderHyperedge) -> Result<()>;

    /// Whether an entity exists.
    async fn has_entity(&self, name: &str) -> Result<bool> {
        Ok(self.get_entity(name).await?.is_some())
    }

    /// Number of hyperedges (either order) touching `name`.
    async fn entity_degree(&self, name: &str) -> Result<usize>;

    /// Every hyperedge touching `name`, sorted by key.
    async fn entity_edges(&self, name: &str) -> Result<EntityEdges>;

    /// Copy of every record, sorted by key.
    async fn snapshot(&self) -> Result<GraphSnapshot>;
}

/// Which family of records a vector belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorNamespace {
    Entities,
    Relations,
}

impl VectorNamespace {
    pub fn of(key: &RecordKey) -> Self {
        if key.is_entity() {
            VectorNamespace::Entities
        } else {
            VectorNamespace::Relations
        }
    }
}

/// One embedded graph record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Content-addressed id of the record
    pub id: String,
    pub key: RecordKey,
    /// Text that was embedded
    pub content: String,
    pub embedding: Vec<f32>,
}

impl VectorRecord {
    pub fn new(key: RecordKey, content: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: key.content_id(),
            key,
            content: content.into(),
            embedding,
        }
    }

    pub fn namespace(&self) -> VectorNamespace {
        VectorNamespace::of(&self.key)
    }
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    pub key: RecordKey,
    pub score: f32,
}

/// Store for record embeddings (semantic search).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records by id.
    async fn upsert_vectors(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Most similar records in `namespace`, highest score first.
    async fn search(
        &self,
        namespace: VectorNamespace,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>>;

    /// Delete records by id; unknown ids are ignored.
    async fn delete_vectors(&self, ids: &[String]) -> Result<()>;
}

/// Cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

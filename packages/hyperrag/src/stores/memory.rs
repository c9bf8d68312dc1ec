//! In-memory storage implementation for testing and development.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{HyperRagError, Result};
use crate::traits::store::{
    cosine_similarity, EntityEdges, GraphSnapshot, GraphStore, VectorMatch, VectorNamespace,
    VectorRecord, VectorStore,
};
use crate::types::{
    entity::Entity,
    hyperedge::{HighOrderHyperedge, LowOrderHyperedge},
    key::{PairKey, SetKey},
};

#[derive(Default)]
struct GraphState {
    entities: BTreeMap<String, Entity>,
    low_order: BTreeMap<PairKey, LowOrderHyperedge>,
    high_order: BTreeMap<SetKey, HighOrderHyperedge>,
}

/// In-memory hypergraph and vector index.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart. Vector search is a linear cosine scan.
pub struct MemoryStore {
    graph: RwLock<GraphState>,
    vectors: RwLock<HashMap<String, VectorRecord>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            graph: RwLock::new(GraphState::default()),
            vectors: RwLock::new(HashMap::new()),
        }
    }

    fn graph(&self) -> Result<RwLockReadGuard<'_, GraphState>> {
        self.graph.read().map_err(|_| poisoned())
    }

    fn graph_mut(&self) -> Result<RwLockWriteGuard<'_, GraphState>> {
        self.graph.write().map_err(|_| poisoned())
    }

    /// Clear all stored data.
    pub fn clear(&self) -> Result<()> {
        *self.graph_mut()? = GraphState::default();
        self.vectors.write().map_err(|_| poisoned())?.clear();
        Ok(())
    }

    pub fn entity_count(&self) -> Result<usize> {
        Ok(self.graph()?.entities.len())
    }

    /// Number of hyperedges of both orders.
    pub fn edge_count(&self) -> Result<usize> {
        let graph = self.graph()?;
        Ok(graph.low_order.len() + graph.high_order.len())
    }

    pub fn vector_count(&self) -> Result<usize> {
        Ok(self.vectors.read().map_err(|_| poisoned())?.len())
    }
}

fn poisoned() -> HyperRagError {
    HyperRagError::Storage("memory store lock poisoned".into())
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn get_entity(&self, name: &str) -> Result<Option<Entity>> {
        Ok(self.graph()?.entities.get(name).cloned())
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<()> {
        self.graph_mut()?.entities.insert(entity.name.clone(), entity);
        Ok(())
    }

    async fn get_low_order_edge(&self, pair: &PairKey) -> Result<Option<LowOrderHyperedge>> {
        Ok(self.graph()?.low_order.get(pair).cloned())
    }

    async fn upsert_low_order_edge(&self, edge: LowOrderHyperedge) -> Result<()> {
        self.graph_mut()?.low_order.insert(edge.pair(), edge);
        Ok(())
    }

    async fn get_high_order_edge(&self, key: &SetKey) -> Result<Option<HighOrderHyperedge>> {
        Ok(self.graph()?.high_order.get(key).cloned())
    }

    async fn upsert_high_order_edge(&self, edge: HighOrderHyperedge) -> Result<()> {
        self.graph_mut()?.high_order.insert(edge.entities.clone(), edge);
        Ok(())
    }

    async fn entity_degree(&self, name: &str) -> Result<usize> {
        let graph = self.graph()?;
        let low = graph.low_order.keys().filter(|k| k.contains(name)).count();
        let high = graph.high_order.keys().filter(|k| k.contains(name)).count();
        Ok(low + high)
    }

    async fn entity_edges(&self, name: &str) -> Result<EntityEdges> {
        let graph = self.graph()?;
        Ok(EntityEdges {
            low_order: graph
                .low_order
                .iter()
                .filter(|(k, _)| k.contains(name))
                .map(|(_, e)| e.clone())
                .collect(),
            high_order: graph
                .high_order
                .iter()
                .filter(|(k, _)| k.contains(name))
                .map(|(_, e)| e.clone())
                .collect(),
        })
    }

    async fn snapshot(&self) -> Result<GraphSnapshot> {
        let graph = self.graph()?;
        Ok(GraphSnapshot {
            entities: graph.entities.values().cloned().collect(),
            low_order_edges: graph.low_order.values().cloned().collect(),
            high_order_edges: graph.high_order.values().cloned().collect(),
        })
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn upsert_vectors(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut vectors = self.vectors.write().map_err(|_| poisoned())?;
        for record in records {
            vectors.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn search(
        &self,
        namespace: VectorNamespace,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let vectors = self.vectors.read().map_err(|_| poisoned())?;

        let mut results: Vec<VectorMatch> = vectors
            .values()
            .filter(|r| r.namespace() == namespace)
            .map(|r| VectorMatch {
                id: r.id.clone(),
                key: r.key.clone(),
                score: cosine_similarity(embedding, &r.embedding),
            })
            .collect();

        // Sort by score descending, id as tie-break for stable output
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(top_k);

        Ok(results)
    }

    async fn delete_vectors(&self, ids: &[String]) -> Result<()> {
        let mut vectors = self.vectors.write().map_err(|_| poisoned())?;
        for id in ids {
            vectors.remove(id);
        }
        Ok(())
    }
}

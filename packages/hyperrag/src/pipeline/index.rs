//! The HyperRag index - main entry point for the library.
//!
//! Wires one governor, one set of prompt templates and one configuration
//! through the ingestor, the consolidator and the query engine, so
//! ingestion and querying share concurrency ceilings and cancellation.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::pipeline::consolidate::{Consolidator, MergeReport};
use crate::pipeline::governor::Governor;
use crate::pipeline::ingest::{IngestReport, Ingestor, PromptPreview};
use crate::pipeline::prompts::PromptTemplates;
use crate::pipeline::query::{QueryContext, QueryEngine};
use crate::traits::{
    embedding::Embedder,
    llm::LanguageModel,
    store::{GraphSnapshot, GraphStore, VectorStore},
};
use crate::types::{
    batch::ExtractionBatch,
    config::{HyperRagConfig, QueryParam},
    document::RawDocument,
};

/// A hypergraph index over ingested documents.
///
/// # Example
///
/// ```rust,ignore
/// let store = Arc::new(MemoryStore::new());
/// let rag = HyperRag::new(llm, embedder, store, HyperRagConfig::from_env()?)?;
///
/// let report = rag.ingest(&documents).await;
/// let answer = rag.query("How do I find slow services?", &QueryParam::default()).await?;
/// ```
pub struct HyperRag {
    config: Arc<HyperRagConfig>,
    governor: Governor,
    consolidator: Arc<Consolidator>,
    ingestor: Ingestor,
    engine: QueryEngine,
}

impl HyperRag {
    /// Build an index over one store serving both graph and vectors.
    pub fn new<S>(
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        store: Arc<S>,
        config: HyperRagConfig,
    ) -> Result<Self>
    where
        S: GraphStore + VectorStore + 'static,
    {
        Self::builder(llm, embedder, store.clone(), store, config).build()
    }

    /// Start building an index with separate graph and vector stores.
    pub fn builder(
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        config: HyperRagConfig,
    ) -> HyperRagBuilder {
        HyperRagBuilder {
            llm,
            embedder,
            graph,
            vectors,
            config,
            prompts: PromptTemplates::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &HyperRagConfig {
        &self.config
    }

    pub fn governor(&self) -> &Governor {
        &self.governor
    }

    /// Stop admitting new model calls; in-flight calls finish.
    pub fn cancel(&self) {
        self.governor.cancel();
    }

    /// Ingest documents; see [`Ingestor::ingest`].
    pub async fn ingest(&self, documents: &[RawDocument]) -> IngestReport {
        self.ingestor.ingest(documents).await
    }

    /// Render extraction prompts without calling the model.
    pub fn preview(&self, documents: &[RawDocument]) -> Vec<PromptPreview> {
        self.ingestor.preview(documents)
    }

    /// Merge an already-parsed batch.
    pub async fn merge(&self, batch: ExtractionBatch) -> Result<MergeReport> {
        self.consolidator.merge(batch).await
    }

    /// Answer a question from the graph.
    pub async fn query(&self, question: &str, param: &QueryParam) -> Result<String> {
        self.engine.query(question, param).await
    }

    /// Retrieve context tables without answering.
    pub async fn retrieve(&self, question: &str, param: &QueryParam) -> Result<QueryContext> {
        self.engine.retrieve(question, param).await
    }

    /// Copy of every entity and hyperedge.
    pub async fn snapshot(&self) -> Result<GraphSnapshot> {
        self.consolidator.graph().snapshot().await
    }
}

impl std::fmt::Debug for HyperRag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperRag")
            .field("governor", &self.governor)
            .field("ingestor", &self.ingestor)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

/// Builder for [`HyperRag`].
pub struct HyperRagBuilder {
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    config: HyperRagConfig,
    prompts: PromptTemplates,
    cancel: CancellationToken,
}

impl HyperRagBuilder {
    pub fn with_prompts(mut self, prompts: PromptTemplates) -> Self {
        self.prompts = prompts;
        self
    }

    /// Share an external cancellation token with the governor.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Validate the configuration and wire the pipeline.
    pub fn build(self) -> Result<HyperRag> {
        self.config.validate()?;

        let config = Arc::new(self.config);
        let prompts = Arc::new(self.prompts);
        let governor = Governor::with_cancellation(&config.governor, self.cancel)?;

        let consolidator = Arc::new(
            Consolidator::new(
                self.graph.clone(),
                self.vectors.clone(),
                self.llm.clone(),
                self.embedder.clone(),
                governor.clone(),
                config.clone(),
            )
            .with_prompts(prompts.clone()),
        );
        let ingestor = Ingestor::new(
            consolidator.clone(),
            self.llm.clone(),
            governor.clone(),
            config.clone(),
        )
        .with_prompts(prompts.clone());
        let engine = QueryEngine::new(
            self.graph,
            self.vectors,
            self.llm,
            self.embedder,
            governor.clone(),
            config.clone(),
        )
        .with_prompts(prompts);

        Ok(HyperRag {
            config,
            governor,
            consolidator,
            ingestor,
            engine,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HyperRagError;
    use crate::stores::MemoryStore;
    use crate::testing::{MockEmbedder, MockLanguageModel};
    use crate::types::config::GovernorConfig;

    #[test]
    fn test_build_rejects_zero_ceiling() {
        let config = HyperRagConfig::default().with_governor(GovernorConfig {
            llm_max_async: 0,
            ..GovernorConfig::default()
        });
        let err = HyperRag::new(
            Arc::new(MockLanguageModel::new()),
            Arc::new(MockEmbedder::default()),
            Arc::new(MemoryStore::new()),
            config,
        )
        .unwrap_err();
        assert!(matches!(err, HyperRagError::Config { .. }));
    }

    #[tokio::test]
    async fn test_external_cancellation_reaches_governor() {
        let cancel = CancellationToken::new();
        let store = Arc::new(MemoryStore::new());
        let rag = HyperRag::builder(
            Arc::new(MockLanguageModel::new()),
            Arc::new(MockEmbedder::default()),
            store.clone(),
            store,
            HyperRagConfig::default(),
        )
        .with_cancellation(cancel.clone())
        .build()
        .unwrap();

        cancel.cancel();
        assert!(rag.governor().is_cancelled());
        let err = rag.query("anything", &QueryParam::default()).await.unwrap_err();
        assert!(matches!(err, HyperRagError::Cancelled));
    }
}

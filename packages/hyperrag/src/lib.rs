//! Hypergraph Retrieval-Augmented Generation
//!
//! Turns a corpus of semi-structured documents into a hypergraph of
//! entities, pairwise (low-order) hyperedges and set-wise (high-order)
//! hyperedges, then answers questions from it.
//!
//! # Design Philosophy
//!
//! - Contradictions are kept as fragments until a summarization pass
//! - Merging is idempotent and atomic per identity key
//! - Every model call goes through one governor (ceilings, quota, retry)
//! - Library handles mechanics, the application supplies models and storage
//!
//! # Usage
//!
//! ```rust,ignore
//! use hyperrag::{HyperRag, HyperRagConfig, MemoryStore, QueryParam};
//!
//! let store = Arc::new(MemoryStore::new());
//! let rag = HyperRag::new(llm, embedder, store, HyperRagConfig::from_env()?)?;
//!
//! let report = rag.ingest(&documents).await;
//! if report.rate_limited {
//!     // lower llm_max_async / embedding_max_async and retry the failed ids
//! }
//!
//! let answer = rag.query("How do I find slow services?", &QueryParam::default()).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (LanguageModel, Embedder, Tokenizer, stores)
//! - [`types`] - Entities, hyperedges, batches and configuration
//! - [`pipeline`] - Formatting, extraction, consolidation, governor and query
//! - [`stores`] - Storage implementations (MemoryStore)
//! - [`utils`] - Content ids and text cleanup
//! - [`testing`] - Mock implementations for testing

pub mod error;
pub mod pipeline;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export core types at crate root
pub use error::{BoxError, CallKind, HyperRagError, RateLimitError, Result};
pub use traits::{
    embedding::Embedder,
    llm::{LanguageModel, Message, Role},
    store::{
        cosine_similarity, EntityEdges, GraphSnapshot, GraphStore, VectorMatch, VectorNamespace,
        VectorRecord, VectorStore,
    },
    tokenizer::{RegexTokenizer, SharedTokenizer, Tokenizer},
};
pub use types::{
    batch::{ExtractionBatch, ParseWarning},
    config::{
        DocumentFormat, ExtractionDelimiters, GovernorConfig, HyperRagConfig, QueryParam,
        RetryConfig,
    },
    context::ContextTable,
    document::{Chunk, FormattedDocument, RawDocument},
    entity::{Entity, PropertyMap},
    hyperedge::{HighOrderHyperedge, LowOrderHyperedge},
    key::{PairKey, RecordKey, SetKey},
};

// Re-export the pipeline entry points
pub use pipeline::{
    // Index
    HyperRag, HyperRagBuilder,
    // Formatting and chunking
    chunk_by_token_size, combine_documents, format_document,
    // Parsing
    parse_extraction_response, parse_query_keywords,
    // Consolidation
    Consolidator, MergeReport,
    // Governor
    Governor, RetryPolicy,
    // Ingest
    IngestReport, Ingestor, PromptPreview,
    // Query
    QueryContext, QueryEngine, QueryKeywords,
    // Context assembly
    combine_contexts, truncate_by_token_budget,
    // Prompts
    PromptTemplates,
};

// Re-export stores
pub use stores::MemoryStore;

// Re-export testing utilities
pub use testing::{MockEmbedder, MockLanguageModel};

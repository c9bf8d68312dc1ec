//! Hypergraph pipeline - the core of the library.
//!
//! The pipeline orchestrates:
//! - Document formatting and token chunking
//! - Entity and hyperedge extraction with gleaning
//! - Response parsing into typed batches
//! - Consolidation into the graph and vector stores
//! - Governed model calls with rate-limit retry
//! - Query-time retrieval and context assembly

pub mod chunk;
pub mod consolidate;
pub mod context;
pub mod format;
pub mod governor;
pub mod index;
pub mod ingest;
pub mod parse;
pub mod prompts;
pub mod query;

pub use chunk::chunk_by_token_size;
pub use consolidate::{Consolidator, MergeReport};
pub use context::{combine_context_tables, combine_contexts, list_to_context, truncate_by_token_budget};
pub use format::{combine_documents, format_document, render_document};
pub use governor::{default_rate_limit_predicate, Governor, LanePermit, RateLimitPredicate, RetryPolicy};
pub use index::{HyperRag, HyperRagBuilder};
pub use ingest::{
    previews_to_jsonl, DocumentIngest, FailedDocument, IngestReport, Ingestor, PromptPreview,
};
pub use parse::{parse_extraction_response, parse_source_paths, parse_strength, RecordKind};
pub use prompts::{PromptTemplates, FAIL_RESPONSE, GRAPH_FIELD_SEP};
pub use query::{parse_query_keywords, QueryContext, QueryEngine, QueryKeywords};

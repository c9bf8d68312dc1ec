//! Ingestion pipeline - format, chunk, extract and consolidate documents.

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use futures::stream::{self, StreamExt};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::pipeline::chunk::chunk_by_token_size;
use crate::pipeline::consolidate::{Consolidator, MergeReport};
use crate::pipeline::format::format_document;
use crate::pipeline::governor::{Governor, RetryPolicy};
use crate::pipeline::parse::parse_extraction_response;
use crate::pipeline::prompts::PromptTemplates;
use crate::traits::llm::{LanguageModel, Message};
use crate::types::{
    batch::ExtractionBatch,
    config::HyperRagConfig,
    document::{Chunk, RawDocument},
};
use crate::utils::text::pack_history;

/// A document that could not be ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDocument {
    /// Document id, or its source path / position when formatting failed
    pub doc_id: String,
    pub error: String,
}

/// Result of an ingest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Number of documents submitted
    pub documents: usize,

    /// Number of documents extracted and merged
    pub documents_ingested: usize,

    pub chunks: usize,

    /// Non-fatal parse warnings across all responses
    pub warnings: usize,

    /// Themes reported by the extraction responses
    pub high_level_keywords: IndexSet<String>,

    pub merge: MergeReport,

    /// Documents that failed; the rest of the run is unaffected
    pub failed: Vec<FailedDocument>,

    /// Whether any failure was a rate-limit exhaustion. Lowering
    /// `llm_max_async` / `embedding_max_async` usually helps.
    pub rate_limited: bool,
}

impl IngestReport {
    /// Create a new empty report.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
            finished_at: None,
            documents: 0,
            documents_ingested: 0,
            chunks: 0,
            warnings: 0,
            high_level_keywords: IndexSet::new(),
            merge: MergeReport::default(),
            failed: Vec::new(),
            rate_limited: false,
        }
    }

    /// Check if the ingest was fully successful.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Default for IngestReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentIngest {
    pub doc_id: String,
    pub chunks: usize,
    pub warnings: usize,
    pub high_level_keywords: IndexSet<String>,
    pub merge: MergeReport,
}

/// A rendered extraction prompt, produced without calling the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptPreview {
    pub doc_id: String,
    pub chunk_id: String,
    pub source_path: String,
    pub prompt: String,

    /// Prompt size under the configured tokenizer
    pub prompt_tokens: usize,
}

/// Serialize previews as JSON Lines.
pub fn previews_to_jsonl(previews: &[PromptPreview]) -> Result<String> {
    let mut out = String::new();
    for preview in previews {
        out.push_str(&serde_json::to_string(preview)?);
        out.push('\n');
    }
    Ok(out)
}

/// Drives documents through formatting, chunking, extraction (with
/// gleaning) and consolidation.
pub struct Ingestor {
    consolidator: Arc<Consolidator>,
    llm: Arc<dyn LanguageModel>,
    governor: Governor,
    policy: RetryPolicy,
    prompts: Arc<PromptTemplates>,
    config: Arc<HyperRagConfig>,

    /// Documents processed at once; model calls are bounded by the governor
    concurrency: usize,
}

impl Ingestor {
    pub fn new(
        consolidator: Arc<Consolidator>,
        llm: Arc<dyn LanguageModel>,
        governor: Governor,
        config: Arc<HyperRagConfig>,
    ) -> Self {
        Self {
            consolidator,
            llm,
            governor,
            policy: RetryPolicy::new(config.retry.clone()),
            prompts: Arc::new(PromptTemplates::default()),
            concurrency: config.governor.llm_max_async.max(1),
            config,
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

    /// Set how many documents are processed at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Ingest documents. Per-document failures are recorded in the report
    /// and never abort the run.
    pub async fn ingest(&self, documents: &[RawDocument]) -> IngestReport {
        let mut report = IngestReport::new();
        report.documents = documents.len();
        info!(run_id = %report.run_id, documents = documents.len(), "Starting ingest");

        let outcomes: Vec<(String, Result<DocumentIngest>)> = stream::iter(documents.iter().enumerate())
            .map(|(index, raw)| async move {
                let label = self.document_label(raw, index);
                (label, self.ingest_document(raw).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (label, outcome) in outcomes {
            match outcome {
                Ok(ingested) => {
                    report.documents_ingested += 1;
                    report.chunks += ingested.chunks;
                    report.warnings += ingested.warnings;
                    report.high_level_keywords.extend(ingested.high_level_keywords);
                    report.merge.absorb(&ingested.merge);
                }
                Err(e) => {
                    warn!(doc_id = %label, error = %e, "Failed to ingest document");
                    report.rate_limited |= e.is_rate_limited();
                    report.failed.push(FailedDocument {
                        doc_id: label,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.finished_at = Some(Utc::now());
        info!(
            run_id = %report.run_id,
            ingested = report.documents_ingested,
            chunks = report.chunks,
            entities_created = report.merge.entities_created,
            edges_created = report.merge.edges_created,
            failed = report.failed.len(),
            rate_limited = report.rate_limited,
            "Ingest complete"
        );
        report
    }

    /// Format, chunk, extract and merge one document.
    pub async fn ingest_document(&self, raw: &RawDocument) -> Result<DocumentIngest> {
        let doc = format_document(raw, &self.config.format)?;
        let chunks = chunk_by_token_size(
            &doc,
            self.config.chunk_token_size,
            self.config.chunk_overlap_tokens,
            &*self.config.tokenizer,
        );

        let batches = try_join_all(chunks.iter().map(|chunk| self.extract_chunk(chunk))).await?;
        let mut batch = ExtractionBatch::new();
        for extracted in batches {
            batch.extend(extracted.with_default_source(&doc.source_path));
        }

        let warnings = batch.warnings.len();
        let high_level_keywords = batch.high_level_keywords.clone();
        let merge = self.consolidator.merge(batch).await?;

        info!(
            doc_id = %doc.id,
            source_path = %doc.source_path,
            chunks = chunks.len(),
            changed = merge.changed(),
            "Ingested document"
        );
        Ok(DocumentIngest {
            doc_id: doc.id,
            chunks: chunks.len(),
            warnings,
            high_level_keywords,
            merge,
        })
    }

    /// Extract records from one chunk, gleaning up to `max_gleaning` times.
    ///
    /// Each gleaning turn asks for missed records with the prior turns as
    /// history; between turns a YES/NO check decides whether to continue.
    pub async fn extract_chunk(&self, chunk: &Chunk) -> Result<ExtractionBatch> {
        let prompt = self.prompts.format_entity_extraction(&self.config, &chunk.content);
        let response = self.complete(&prompt, &[]).await?;
        let mut batch = parse_extraction_response(&response, &self.config);

        let max_gleaning = self.config.max_gleaning;
        let continue_prompt = self.prompts.format_entity_continue_extraction();
        let if_loop_prompt = self.prompts.format_entity_if_loop_extraction();
        let mut turns = vec![prompt, response];

        for round in 0..max_gleaning {
            let gleaned = self
                .complete(&continue_prompt, &pack_history(&turns))
                .await?;
            batch.extend(parse_extraction_response(&gleaned, &self.config));
            turns.push(continue_prompt.clone());
            turns.push(gleaned);

            if round + 1 == max_gleaning {
                break;
            }
            let answer = self
                .complete(&if_loop_prompt, &pack_history(&turns))
                .await?;
            if !wants_more(&answer) {
                break;
            }
        }

        debug!(
            chunk_id = %chunk.id,
            records = batch.record_count(),
            warnings = batch.warnings.len(),
            "Extracted chunk"
        );
        Ok(batch)
    }

    /// Render the extraction prompt for every chunk without calling the
    /// model. Documents that fail formatting are skipped.
    pub fn preview(&self, documents: &[RawDocument]) -> Vec<PromptPreview> {
        let mut previews = Vec::new();
        for (index, raw) in documents.iter().enumerate() {
            let doc = match format_document(raw, &self.config.format) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(doc_id = %self.document_label(raw, index), error = %e, "Skipping preview");
                    continue;
                }
            };
            let chunks = chunk_by_token_size(
                &doc,
                self.config.chunk_token_size,
                self.config.chunk_overlap_tokens,
                &*self.config.tokenizer,
            );
            for chunk in chunks {
                let prompt = self.prompts.format_entity_extraction(&self.config, &chunk.content);
                previews.push(PromptPreview {
                    doc_id: doc.id.clone(),
                    chunk_id: chunk.id,
                    source_path: doc.source_path.clone(),
                    prompt_tokens: self.config.tokenizer.count(&prompt),
                    prompt,
                });
            }
        }
        previews
    }

    async fn complete(&self, prompt: &str, history: &[Message]) -> Result<String> {
        self.governor
            .complete(self.llm.as_ref(), prompt, None, history, &self.policy)
            .await
    }

    fn document_label(&self, raw: &RawDocument, index: usize) -> String {
        raw.get(&self.config.format.source_path_key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("document #{}", index))
    }
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("concurrency", &self.concurrency)
            .field("consolidator", &self.consolidator)
            .finish_non_exhaustive()
    }
}

/// Whether a gleaning check answered yes.
fn wants_more(answer: &str) -> bool {
    answer
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .eq_ignore_ascii_case("yes")
}

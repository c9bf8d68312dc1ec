//! Configuration types for extraction, consolidation and querying.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{HyperRagError, Result};
use crate::traits::tokenizer::SharedTokenizer;

/// Markers of the extraction response grammar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionDelimiters {
    /// Separates fields inside one record. Default: `" | "`.
    pub tuple: String,

    /// Separates records. Default: newline.
    pub record: String,

    /// Terminates the response. Default: `<|COMPLETE|>`.
    pub completion: String,
}

impl Default for ExtractionDelimiters {
    fn default() -> Self {
        Self {
            tuple: " | ".to_string(),
            record: "\n".to_string(),
            completion: "<|COMPLETE|>".to_string(),
        }
    }
}

/// Per-lane concurrency ceilings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Maximum concurrent LLM completion calls. Default: 4.
    pub llm_max_async: usize,

    /// Maximum concurrent embedding calls. Default: 4.
    pub embedding_max_async: usize,

    /// Optional request-per-second quota applied to each lane.
    ///
    /// Unset means admission is bounded only by the ceilings.
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            llm_max_async: 4,
            embedding_max_async: 4,
            requests_per_second: None,
        }
    }
}

/// Exponential backoff for rate-limited calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one. Default: 5.
    pub max_attempts: u32,

    /// Delay before the first retry. Default: 2000ms.
    pub base_delay_ms: u64,

    /// Growth factor between retries. Default: 2.0.
    pub multiplier: f64,

    /// Upper bound for a single delay. Default: 60s.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 2000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryConfig {
    /// Policy that never retries.
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

/// Field mapping for raw source records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFormat {
    /// Required body field. Default: `main_content`.
    pub main_content_key: String,

    /// Candidate title fields, first non-empty wins.
    pub title_keys: Vec<String>,

    /// List-valued navigation trail joined with `" > "`.
    pub breadcrumbs_key: String,

    /// Candidate URL path fields, first non-empty wins.
    pub url_keys: Vec<String>,

    /// Explicit provenance field; a content id is used when absent.
    pub source_path_key: String,

    /// Only these fields go under `metadata` when set.
    #[serde(default)]
    pub metadata_allow_list: Option<Vec<String>>,
}

impl Default for DocumentFormat {
    fn default() -> Self {
        Self {
            main_content_key: "main_content".to_string(),
            title_keys: vec!["title".to_string(), "titles".to_string()],
            breadcrumbs_key: "breadcrumbs".to_string(),
            url_keys: vec!["url_path".to_string(), "url".to_string()],
            source_path_key: "source_path".to_string(),
            metadata_allow_list: None,
        }
    }
}

impl DocumentFormat {
    /// Restrict `metadata` to the given fields.
    pub fn with_metadata_fields(
        mut self,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.metadata_allow_list = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_main_content_key(mut self, key: impl Into<String>) -> Self {
        self.main_content_key = key.into();
        self
    }

    /// Whether `key` is one of the fields handled outside `metadata`.
    pub fn is_reserved(&self, key: &str) -> bool {
        key == self.main_content_key
            || key == self.breadcrumbs_key
            || key == self.source_path_key
            || self.title_keys.iter().any(|k| k == key)
            || self.url_keys.iter().any(|k| k == key)
    }
}

/// Configuration for ingestion and consolidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperRagConfig {
    #[serde(default)]
    pub delimiters: ExtractionDelimiters,

    /// Output language requested from the model. Default: English.
    pub language: String,

    /// Entity types offered to the model (open set).
    #[serde(default)]
    pub entity_types: Vec<String>,

    /// Follow-up extraction turns after the first one. Default: 1.
    pub max_gleaning: usize,

    /// Fragment count above which a list is summarized. Default: 6.
    pub summary_threshold: usize,

    /// Token budget for one summary response. Default: 500.
    pub summary_max_tokens: usize,

    /// Chunk window in tokens. Default: 1200.
    pub chunk_token_size: usize,

    /// Overlap between consecutive chunks. Default: 100.
    pub chunk_overlap_tokens: usize,

    /// Strength used when the model gives an unparseable one. Default: 5.0.
    pub neutral_strength: f64,

    #[serde(default)]
    pub governor: GovernorConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub format: DocumentFormat,

    /// Tokenizer for chunking and budgets; not serialized.
    #[serde(skip)]
    pub tokenizer: SharedTokenizer,
}

impl Default for HyperRagConfig {
    fn default() -> Self {
        Self {
            delimiters: ExtractionDelimiters::default(),
            language: "English".to_string(),
            entity_types: [
                "esql_concept",
                "esql_command",
                "function_reference",
                "configuration_option",
                "use_case",
                "troubleshooting_tip",
                "integration_point",
                "best_practice",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_gleaning: 1,
            summary_threshold: 6,
            summary_max_tokens: 500,
            chunk_token_size: 1200,
            chunk_overlap_tokens: 100,
            neutral_strength: 5.0,
            governor: GovernorConfig::default(),
            retry: RetryConfig::default(),
            format: DocumentFormat::default(),
            tokenizer: SharedTokenizer::default(),
        }
    }
}

impl HyperRagConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load defaults overlaid with `HYPERRAG_*` environment variables.
    ///
    /// A `.env` file is read first when present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`HyperRagConfig::from_env`] but reading from any lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(language) = lookup("HYPERRAG_LANGUAGE") {
            config.language = language;
        }
        if let Some(types) = lookup("HYPERRAG_ENTITY_TYPES") {
            config.entity_types = types
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = parse_var(&lookup, "HYPERRAG_MAX_GLEANING")? {
            config.max_gleaning = v;
        }
        if let Some(v) = parse_var(&lookup, "HYPERRAG_SUMMARY_THRESHOLD")? {
            config.summary_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "HYPERRAG_CHUNK_TOKEN_SIZE")? {
            config.chunk_token_size = v;
        }
        if let Some(v) = parse_var(&lookup, "HYPERRAG_CHUNK_OVERLAP_TOKENS")? {
            config.chunk_overlap_tokens = v;
        }
        if let Some(v) = parse_var(&lookup, "HYPERRAG_LLM_MAX_ASYNC")? {
            config.governor.llm_max_async = v;
        }
        if let Some(v) = parse_var(&lookup, "HYPERRAG_EMBEDDING_MAX_ASYNC")? {
            config.governor.embedding_max_async = v;
        }
        if let Some(v) = parse_var(&lookup, "HYPERRAG_REQUESTS_PER_SECOND")? {
            config.governor.requests_per_second = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "HYPERRAG_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "HYPERRAG_RETRY_BASE_DELAY_MS")? {
            config.retry.base_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "HYPERRAG_RETRY_MAX_DELAY_MS")? {
            config.retry.max_delay_ms = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.governor.llm_max_async == 0 || self.governor.embedding_max_async == 0 {
            return Err(HyperRagError::config("concurrency ceilings must be at least 1"));
        }
        if self.governor.requests_per_second == Some(0) {
            return Err(HyperRagError::config("requests_per_second must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(HyperRagError::config("retry.max_attempts must be at least 1"));
        }
        if self.retry.multiplier < 1.0 {
            return Err(HyperRagError::config("retry.multiplier must be at least 1.0"));
        }
        if self.summary_threshold == 0 {
            return Err(HyperRagError::config("summary_threshold must be at least 1"));
        }
        if self.chunk_token_size == 0 || self.chunk_overlap_tokens >= self.chunk_token_size {
            return Err(HyperRagError::config(
                "chunk_overlap_tokens must be smaller than a non-zero chunk_token_size",
            ));
        }
        if self.delimiters.tuple.is_empty() || self.delimiters.record.is_empty() {
            return Err(HyperRagError::config("tuple and record delimiters must not be empty"));
        }
        Ok(())
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_entity_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.entity_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_delimiters(mut self, delimiters: ExtractionDelimiters) -> Self {
        self.delimiters = delimiters;
        self
    }

    pub fn with_max_gleaning(mut self, max: usize) -> Self {
        self.max_gleaning = max;
        self
    }

    pub fn with_summary_threshold(mut self, threshold: usize) -> Self {
        self.summary_threshold = threshold;
        self
    }

    /// Set the chunk window and overlap in tokens.
    pub fn with_chunking(mut self, size: usize, overlap: usize) -> Self {
        self.chunk_token_size = size;
        self.chunk_overlap_tokens = overlap;
        self
    }

    pub fn with_governor(mut self, governor: GovernorConfig) -> Self {
        self.governor = governor;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_format(mut self, format: DocumentFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: SharedTokenizer) -> Self {
        self.tokenizer = tokenizer;
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| HyperRagError::config(format!("{} must be a valid number, got `{}`", key, raw))),
    }
}

/// Per-query retrieval settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParam {
    /// Candidates fetched per vector search. Default: 60.
    pub top_k: usize,

    /// Token budget for the entity table. Default: 4000.
    pub max_token_for_entity_context: usize,

    /// Token budget for the relation table. Default: 4000.
    pub max_token_for_relation_context: usize,

    /// Requested answer shape. Default: "Multiple Paragraphs".
    pub response_type: String,

    /// Return the assembled context instead of an answer.
    #[serde(default)]
    pub only_need_context: bool,
}

impl Default for QueryParam {
    fn default() -> Self {
        Self {
            top_k: 60,
            max_token_for_entity_context: 4000,
            max_token_for_relation_context: 4000,
            response_type: "Multiple Paragraphs".to_string(),
            only_need_context: false,
        }
    }
}

impl QueryParam {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_response_type(mut self, response_type: impl Into<String>) -> Self {
        self.response_type = response_type.into();
        self
    }

    /// Set both context budgets.
    pub fn with_token_budgets(mut self, entity: usize, relation: usize) -> Self {
        self.max_token_for_entity_context = entity;
        self.max_token_for_relation_context = relation;
        self
    }

    pub fn context_only(mut self) -> Self {
        self.only_need_context = true;
        self
    }
}

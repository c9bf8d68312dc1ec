//! Typed errors for the hyperrag library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.

use std::fmt;

use thiserror::Error;

/// Boxed provider error as returned by [`LanguageModel`](crate::LanguageModel)
/// and [`Embedder`](crate::Embedder) implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Which governed lane an external call went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// LLM completion call
    Completion,
    /// Embedding call
    Embedding,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallKind::Completion => write!(f, "completion"),
            CallKind::Embedding => write!(f, "embedding"),
        }
    }
}

/// Errors that can occur during hypergraph extraction and retrieval.
#[derive(Debug, Error)]
pub enum HyperRagError {
    /// A required input field is missing or blank.
    #[error("validation error on `{field}`: {reason}")]
    Validation { field: String, reason: String },

    /// Provider kept rate limiting until the retry budget ran out.
    #[error(
        "{call} call rate limited after {attempts} attempts; lower the {call} concurrency or wait before retrying: {source}"
    )]
    RateLimited {
        call: CallKind,
        attempts: u32,
        #[source]
        source: BoxError,
    },

    /// LLM completion failed
    #[error("LLM error: {0}")]
    Llm(#[source] BoxError),

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embedding(#[source] BoxError),

    /// Storage operation failed
    #[error("storage error: {0}")]
    Storage(#[source] BoxError),

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// CSV encoding or decoding failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("config error: {reason}")]
    Config { reason: String },
}

impl HyperRagError {
    /// Shorthand for a validation failure.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a configuration failure.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Wrap a provider error according to the lane it came from.
    pub fn provider(call: CallKind, source: BoxError) -> Self {
        match call {
            CallKind::Completion => Self::Llm(source),
            CallKind::Embedding => Self::Embedding(source),
        }
    }

    /// Whether retries were exhausted on a rate limit.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Marker error providers can return to signal a rate limit.
///
/// The default rate-limit predicate recognizes this type, so provider
/// adapters only need to map their own 429s onto it.
#[derive(Debug, Clone, Error)]
#[error("rate limit: {message}")]
pub struct RateLimitError {
    pub message: String,
}

impl RateLimitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type alias for hyperrag operations.
pub type Result<T> = std::result::Result<T, HyperRagError>;

//! Testing utilities including mock implementations.
//!
//! These are useful for testing applications that use the hyperrag library
//! without making real LLM or embedding calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{BoxError, RateLimitError};
use crate::traits::{
    embedding::Embedder,
    llm::{LanguageModel, Message},
};

/// Canned reply for prompts containing a needle.
#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

/// A mock language model for testing.
///
/// Replies are matched by prompt substring in registration order; the
/// first match wins, otherwise the default response is returned.
#[derive(Default)]
pub struct MockLanguageModel {
    /// Predefined replies by prompt substring
    replies: Arc<RwLock<Vec<(String, Reply)>>>,

    /// Returned when no needle matches
    default_response: String,

    /// Number of leading calls that fail with a rate limit
    rate_limit_failures: Arc<AtomicUsize>,

    /// Simulated latency per call
    delay: Option<Duration>,

    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,

    /// Call tracking for assertions
    calls: Arc<RwLock<Vec<MockLlmCall>>>,
}

/// Record of a call made to the mock language model.
#[derive(Debug, Clone, PartialEq)]
pub struct MockLlmCall {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub history: Vec<Message>,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `response` to any prompt containing `needle`.
    pub fn with_response(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.replies
            .write()
            .unwrap()
            .push((needle.into(), Reply::Text(response.into())));
        self
    }

    /// Fail (not rate limited) on any prompt containing `needle`.
    pub fn with_failure(self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.replies
            .write()
            .unwrap()
            .push((needle.into(), Reply::Fail(message.into())));
        self
    }

    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// Fail the first `n` calls with a [`RateLimitError`].
    pub fn with_rate_limit_failures(self, n: usize) -> Self {
        self.rate_limit_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockLlmCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Calls whose prompt contains `needle`.
    pub fn calls_containing(&self, needle: &str) -> usize {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.prompt.contains(needle))
            .count()
    }

    /// Highest number of calls observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Clear call history.
    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }

    fn reply_for(&self, prompt: &str) -> Reply {
        self.replies
            .read()
            .unwrap()
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| Reply::Text(self.default_response.clone()))
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        history: &[Message],
    ) -> std::result::Result<String, BoxError> {
        self.calls.write().unwrap().push(MockLlmCall {
            prompt: prompt.to_string(),
            system_prompt: system_prompt.map(str::to_string),
            history: history.to_vec(),
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let rate_limited = self
            .rate_limit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rate_limited {
            return Err(RateLimitError::new("429 Too Many Requests").into());
        }

        match self.reply_for(prompt) {
            Reply::Text(text) => Ok(text),
            Reply::Fail(message) => Err(message.into()),
        }
    }
}

/// A mock embedder for testing.
///
/// Each lowercase word is hashed into a bucket, so texts sharing words
/// score higher under cosine similarity.
pub struct MockEmbedder {
    dimension: usize,

    /// Predefined embeddings by text
    embeddings: Arc<RwLock<HashMap<String, Vec<f32>>>>,

    /// Number of leading calls that fail (not rate limited)
    failures: Arc<AtomicUsize>,

    /// Number of leading calls that sleep for `slow_delay` first
    slow_calls: Arc<AtomicUsize>,
    slow_delay: Duration,

    calls: Arc<AtomicUsize>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            embeddings: Arc::new(RwLock::new(HashMap::new())),
            failures: Arc::new(AtomicUsize::new(0)),
            slow_calls: Arc::new(AtomicUsize::new(0)),
            slow_delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the first `n` calls with a provider error.
    pub fn with_failures(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    /// Delay the first `n` calls by `delay`; later calls answer at once.
    pub fn with_slow_calls(mut self, n: usize, delay: Duration) -> Self {
        self.slow_calls.store(n, Ordering::SeqCst);
        self.slow_delay = delay;
        self
    }

    /// Add a predefined embedding for a text.
    pub fn with_embedding(self, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        self.embeddings
            .write()
            .unwrap()
            .insert(text.into(), embedding);
        self
    }

    /// Number of `embed` batches requested.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Generate a deterministic embedding based on text.
    fn generate_deterministic_embedding(&self, text: &str) -> Vec<f32> {
        use sha2::{Digest, Sha256};

        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
        {
            let hash = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                hash[0], hash[1], hash[2], hash[3], hash[4], hash[5], hash[6], hash[7],
            ]) as usize
                % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let slow = self
            .slow_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if slow {
            tokio::time::sleep(self.slow_delay).await;
        }
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err("embedding provider unavailable".into());
        }

        let predefined = self.embeddings.read().unwrap();
        Ok(texts
            .iter()
            .map(|text| {
                predefined
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| self.generate_deterministic_embedding(text))
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::store::cosine_similarity;

    #[tokio::test]
    async fn test_mock_llm_matches_needles_in_order() {
        let llm = MockLanguageModel::new()
            .with_response("STATS", "first")
            .with_response("STATS BY", "never reached")
            .with_default_response("fallback");

        assert_eq!(llm.complete("run STATS BY host", None, &[]).await.unwrap(), "first");
        assert_eq!(llm.complete("other", Some("sys"), &[]).await.unwrap(), "fallback");

        let calls = llm.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].system_prompt.as_deref(), Some("sys"));
        assert_eq!(llm.calls_containing("STATS"), 1);
    }

    #[tokio::test]
    async fn test_mock_llm_rate_limits_leading_calls() {
        let llm = MockLanguageModel::new().with_rate_limit_failures(2);

        let first = llm.complete("a", None, &[]).await.unwrap_err();
        assert!(first.downcast_ref::<RateLimitError>().is_some());
        assert!(llm.complete("a", None, &[]).await.is_err());
        assert!(llm.complete("a", None, &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_llm_failure() {
        let llm = MockLanguageModel::new().with_failure("boom", "provider exploded");
        let err = llm.complete("boom", None, &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "provider exploded");
        assert!(err.downcast_ref::<RateLimitError>().is_none());
    }

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new(128);
        let texts = vec![
            "stats_command aggregates rows".to_string(),
            "stats_command aggregates rows".to_string(),
            "completely unrelated words".to_string(),
        ];
        let vectors = embedder.embed(&texts).await.unwrap();

        assert_eq!(vectors[0].len(), 128);
        assert_eq!(vectors[0], vectors[1]);
        assert_ne!(vectors[0], vectors[2]);
        assert_eq!(embedder.call_count(), 1);

        let query = embedder.embed(&["stats_command".to_string()]).await.unwrap();
        assert!(cosine_similarity(&query[0], &vectors[0]) > 0.5);
    }

    #[tokio::test]
    async fn test_mock_embedder_fails_leading_calls() {
        let embedder = MockEmbedder::default().with_failures(1);
        let texts = vec!["keep_command".to_string()];

        let err = embedder.embed(&texts).await.unwrap_err();
        assert!(err.downcast_ref::<RateLimitError>().is_none());
        assert_eq!(embedder.embed(&texts).await.unwrap().len(), 1);
        assert_eq!(embedder.call_count(), 2);
    }
}

//! Concurrency governor for external calls.
//!
//! Every LLM and embedding call goes through a lane: a counting semaphore
//! bounding how many calls are in flight, optionally combined with a
//! requests-per-second quota. Rate-limited calls are retried with
//! exponential backoff; the permit is released while waiting.

use governor::{Quota, RateLimiter};
use regex::Regex;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BoxError, CallKind, HyperRagError, RateLimitError, Result};
use crate::traits::embedding::Embedder;
use crate::traits::llm::{LanguageModel, Message};
use crate::types::config::{GovernorConfig, RetryConfig};

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Classifies a provider error as a rate limit.
pub type RateLimitPredicate = Arc<dyn Fn(&BoxError) -> bool + Send + Sync>;

static RATE_LIMIT_RE: OnceLock<Regex> = OnceLock::new();

/// Recognizes [`RateLimitError`] and messages naming a rate limit, "too many
/// requests", or a 429 status (`HTTP 429`, `status: 429`, a leading `429`).
///
/// A bare `429` elsewhere in the text (sizes, ids) does not count.
pub fn default_rate_limit_predicate() -> RateLimitPredicate {
    Arc::new(|err: &BoxError| {
        if err.downcast_ref::<RateLimitError>().is_some() {
            return true;
        }
        let re = RATE_LIMIT_RE.get_or_init(|| {
            Regex::new(
                r"(?i)rate[\s_-]?limit|too many requests|^\s*429\b|\b(?:status(?:\s+code)?|http(?:/\d(?:\.\d)?)?|code|error)\W{0,3}429\b",
            )
            .expect("static regex is valid")
        });
        re.is_match(&err.to_string())
    })
}

/// When and how often a failed call is retried.
#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    is_rate_limited: RateLimitPredicate,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            is_rate_limited: default_rate_limit_predicate(),
        }
    }

    /// One attempt, no retries (query paths).
    pub fn single_attempt() -> Self {
        Self::new(RetryConfig::single_attempt())
    }

    /// Replace the rate-limit classifier.
    pub fn with_predicate(mut self, predicate: RateLimitPredicate) -> Self {
        self.is_rate_limited = predicate;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn is_rate_limited(&self, err: &BoxError) -> bool {
        (self.is_rate_limited)(err)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

struct Lane {
    kind: CallKind,
    semaphore: Arc<Semaphore>,
    limiter: Option<DirectRateLimiter>,
    in_flight: Arc<AtomicUsize>,
}

impl Lane {
    fn new(kind: CallKind, max_async: usize, requests_per_second: Option<u32>) -> Result<Self> {
        if max_async == 0 {
            return Err(HyperRagError::config(format!(
                "{} concurrency ceiling must be at least 1",
                kind
            )));
        }
        let limiter = match requests_per_second {
            None => None,
            Some(rps) => {
                let rps = NonZeroU32::new(rps)
                    .ok_or_else(|| HyperRagError::config("requests_per_second must be > 0"))?;
                Some(RateLimiter::direct(Quota::per_second(rps)))
            }
        };

        Ok(Self {
            kind,
            semaphore: Arc::new(Semaphore::new(max_async)),
            limiter,
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }
}

/// A granted slot in one lane; dropping it frees the slot.
pub struct LanePermit {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for LanePermit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct GovernorInner {
    completion: Lane,
    embedding: Lane,
    cancel: CancellationToken,
}

/// Shared admission control for completion and embedding calls.
///
/// Cheap to clone; clones share lanes and cancellation.
#[derive(Clone)]
pub struct Governor {
    inner: Arc<GovernorInner>,
}

impl Governor {
    pub fn new(config: &GovernorConfig) -> Result<Self> {
        Self::with_cancellation(config, CancellationToken::new())
    }

    /// Build a governor that stops admitting calls once `cancel` fires.
    pub fn with_cancellation(config: &GovernorConfig, cancel: CancellationToken) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(GovernorInner {
                completion: Lane::new(
                    CallKind::Completion,
                    config.llm_max_async,
                    config.requests_per_second,
                )?,
                embedding: Lane::new(
                    CallKind::Embedding,
                    config.embedding_max_async,
                    config.requests_per_second,
                )?,
                cancel,
            }),
        })
    }

    fn lane(&self, kind: CallKind) -> &Lane {
        match kind {
            CallKind::Completion => &self.inner.completion,
            CallKind::Embedding => &self.inner.embedding,
        }
    }

    /// Stop granting new permits. In-flight calls finish normally.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Calls currently holding a permit in `kind`'s lane.
    pub fn in_flight(&self, kind: CallKind) -> usize {
        self.lane(kind).in_flight.load(Ordering::SeqCst)
    }

    /// Wait for a slot in `kind`'s lane.
    pub async fn acquire(&self, kind: CallKind) -> Result<LanePermit> {
        if self.is_cancelled() {
            return Err(HyperRagError::Cancelled);
        }
        let lane = self.lane(kind);

        let permit = tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => return Err(HyperRagError::Cancelled),
            permit = lane.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| HyperRagError::Cancelled)?
            }
        };

        if let Some(limiter) = &lane.limiter {
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => return Err(HyperRagError::Cancelled),
                _ = limiter.until_ready() => {}
            }
        }

        let now = lane.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(call = %lane.kind, in_flight = now, "Admitted governed call");

        Ok(LanePermit {
            _permit: permit,
            in_flight: lane.in_flight.clone(),
        })
    }

    /// Run `op` under `kind`'s lane, retrying rate limits per `policy`.
    ///
    /// Non-rate-limit failures are returned immediately as
    /// [`HyperRagError::Llm`] / [`HyperRagError::Embedding`]. When every
    /// attempt is rate limited the result is [`HyperRagError::RateLimited`].
    pub async fn run<T, F, Fut>(&self, kind: CallKind, policy: &RetryPolicy, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BoxError>>,
    {
        let max_attempts = policy.config().max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = {
                let _permit = self.acquire(kind).await?;
                op().await
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if policy.is_rate_limited(&err) => err,
                Err(err) => return Err(HyperRagError::provider(kind, err)),
            };

            if attempt >= max_attempts {
                warn!(call = %kind, attempts = attempt, error = %err, "Rate limit retries exhausted");
                return Err(HyperRagError::RateLimited {
                    call: kind,
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = policy.config().delay_for(attempt);
            warn!(
                call = %kind,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Rate limited, backing off"
            );

            tokio::select! {
                _ = self.inner.cancel.cancelled() => return Err(HyperRagError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Governed LLM completion.
    pub async fn complete(
        &self,
        llm: &dyn LanguageModel,
        prompt: &str,
        system_prompt: Option<&str>,
        history: &[Message],
        policy: &RetryPolicy,
    ) -> Result<String> {
        self.run(CallKind::Completion, policy, move || {
            llm.complete(prompt, system_prompt, history)
        })
        .await
    }

    /// Governed embedding; checks one vector comes back per input.
    pub async fn embed(
        &self,
        embedder: &dyn Embedder,
        texts: &[String],
        policy: &RetryPolicy,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self
            .run(CallKind::Embedding, policy, move || embedder.embed(texts))
            .await?;

        if vectors.len() != texts.len() {
            return Err(HyperRagError::Embedding(
                format!(
                    "expected {} embeddings, provider returned {}",
                    texts.len(),
                    vectors.len()
                )
                .into(),
            ));
        }
        Ok(vectors)
    }
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("completion_in_flight", &self.in_flight(CallKind::Completion))
            .field("embedding_in_flight", &self.in_flight(CallKind::Embedding))
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::default()
                .with_max_attempts(max_attempts)
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5)),
        )
    }

    fn governor(llm_max_async: usize) -> Governor {
        Governor::new(&GovernorConfig {
            llm_max_async,
            ..GovernorConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_ceiling_bounds_in_flight_calls() {
        let governor = governor(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy::single_attempt();

        let calls = (0..5).map(|i| {
            let current = current.clone();
            let peak = peak.clone();
            let governor = governor.clone();
            let policy = policy.clone();
            async move {
                governor
                    .run(CallKind::Completion, &policy, || {
                        let current = current.clone();
                        let peak = peak.clone();
                        async move {
                            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            current.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, BoxError>(i)
                        }
                    })
                    .await
            }
        });

        let results = join_all(calls).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(governor.in_flight(CallKind::Completion), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_every_attempt_exhausts_retries() {
        let governor = governor(4);
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<()> = governor
            .run(CallKind::Completion, &fast_policy(5), || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(Box::new(RateLimitError::new("429")) as BoxError)
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 5);
        match result {
            Err(HyperRagError::RateLimited { call, attempts, .. }) => {
                assert_eq!(call, CallKind::Completion);
                assert_eq!(attempts, 5);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_success_on_last_attempt() {
        let governor = governor(4);
        let attempts = Arc::new(AtomicU32::new(0));

        let result = governor
            .run(CallKind::Completion, &fast_policy(3), || {
                let attempts = attempts.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err::<&str, BoxError>("rate limit exceeded".into())
                    } else {
                        Ok("answer")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "answer");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let governor = governor(4);
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<()> = governor
            .run(CallKind::Embedding, &fast_policy(5), || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), BoxError>("invalid api key".into())
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(HyperRagError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_custom_predicate() {
        let governor = governor(4);
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = fast_policy(2).with_predicate(Arc::new(|e: &BoxError| e.to_string().contains("quota")));

        let result: Result<()> = governor
            .run(CallKind::Completion, &policy, || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), BoxError>("quota exceeded".into())
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(result.unwrap_err().is_rate_limited());
    }

    #[tokio::test]
    async fn test_cancelled_governor_admits_nothing() {
        let governor = governor(1);
        let held = governor.acquire(CallKind::Completion).await.unwrap();
        assert_eq!(governor.in_flight(CallKind::Completion), 1);

        governor.cancel();
        assert!(matches!(
            governor.acquire(CallKind::Completion).await,
            Err(HyperRagError::Cancelled)
        ));

        // The permit taken before cancellation is still valid
        drop(held);
        assert_eq!(governor.in_flight(CallKind::Completion), 0);
    }

    #[tokio::test]
    async fn test_requests_per_second_quota_admits() {
        let governor = Governor::new(&GovernorConfig {
            requests_per_second: Some(100),
            ..GovernorConfig::default()
        })
        .unwrap();

        let permit = governor.acquire(CallKind::Embedding).await.unwrap();
        assert_eq!(governor.in_flight(CallKind::Embedding), 1);
        drop(permit);
    }

    #[test]
    fn test_zero_ceiling_is_config_error() {
        let err = Governor::new(&GovernorConfig {
            embedding_max_async: 0,
            ..GovernorConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, HyperRagError::Config { .. }));
    }

    #[test]
    fn test_default_predicate() {
        let predicate = default_rate_limit_predicate();
        assert!(predicate(&(Box::new(RateLimitError::new("slow down")) as BoxError)));
        assert!(predicate(&"HTTP 429".into()));
        assert!(!predicate(&"HTTP 500".into()));
    }

    #[test]
    fn test_default_predicate_needs_status_context_for_429() {
        let predicate = default_rate_limit_predicate();
        for message in [
            "429 Too Many Requests",
            "status: 429",
            "upstream returned status code 429",
            "HTTP/1.1 429",
            "error 429 from provider",
            "Rate-limited by provider",
            "rate_limit_exceeded",
        ] {
            assert!(predicate(&message.into()), "{}", message);
        }
        for message in [
            "read 14290 bytes before the connection reset",
            "request id 429abc failed",
            "chunk 429 of 900 could not be embedded",
            "HTTP 500",
        ] {
            assert!(!predicate(&message.into()), "{}", message);
        }
    }
}

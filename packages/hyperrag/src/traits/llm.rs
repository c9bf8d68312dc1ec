//! Language model contract.
//!
//! The pipeline only needs plain-text completion with an optional system
//! prompt and prior turns. Provider adapters (OpenAI, Anthropic, local
//! models) live in the application and map their rate-limit responses
//! onto [`RateLimitError`](crate::RateLimitError).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BoxError;

/// A chat message for the LLM conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Speaker role in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Text completion provider.
///
/// Must be safe to call concurrently; the governor bounds how many calls
/// are in flight at once.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt`, given an optional system prompt and prior turns.
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        history: &[Message],
    ) -> std::result::Result<String, BoxError>;
}

#[async_trait]
impl<T: LanguageModel + ?Sized> LanguageModel for std::sync::Arc<T> {
    async fn complete(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        history: &[Message],
    ) -> std::result::Result<String, BoxError> {
        (**self).complete(prompt, system_prompt, history).await
    }
}

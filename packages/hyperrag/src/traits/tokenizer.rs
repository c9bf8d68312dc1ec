//! Pluggable tokenizer used for chunking and token budgets.
//!
//! Tokenizers are passed explicitly (see [`HyperRagConfig::tokenizer`]) so
//! differently-configured callers never share hidden state.
//!
//! [`HyperRagConfig::tokenizer`]: crate::HyperRagConfig

use regex::Regex;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Minimal tokenizer surface.
pub trait Tokenizer: Send + Sync {
    /// Split `text` into tokens.
    fn encode(&self, text: &str) -> Vec<String>;

    /// Reconstruct text from tokens.
    fn decode(&self, tokens: &[String]) -> String;

    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }
}

/// Shared, cheaply clonable tokenizer handle.
#[derive(Clone)]
pub struct SharedTokenizer(Arc<dyn Tokenizer>);

impl SharedTokenizer {
    pub fn new(tokenizer: impl Tokenizer + 'static) -> Self {
        Self(Arc::new(tokenizer))
    }
}

impl Default for SharedTokenizer {
    fn default() -> Self {
        Self::new(RegexTokenizer)
    }
}

impl fmt::Debug for SharedTokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedTokenizer")
    }
}

impl std::ops::Deref for SharedTokenizer {
    type Target = dyn Tokenizer;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

/// Vendor-neutral tokenizer: runs of whitespace and runs of non-whitespace
/// are each one token, so `decode(encode(s)) == s`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexTokenizer;

impl Tokenizer for RegexTokenizer {
    fn encode(&self, text: &str) -> Vec<String> {
        let re = TOKEN_RE.get_or_init(|| Regex::new(r"\s+|\S+").expect("static regex is valid"));
        re.find_iter(text).map(|m| m.as_str().to_string()).collect()
    }

    fn decode(&self, tokens: &[String]) -> String {
        tokens.concat()
    }
}

//! Text processing utilities.

use regex::Regex;
use std::sync::OnceLock;

use crate::traits::llm::{Message, Role};

static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();
static CONTROL_RE: OnceLock<Regex> = OnceLock::new();
static FLOAT_RE: OnceLock<Regex> = OnceLock::new();

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("static regex is valid"))
}

fn control_re() -> &'static Regex {
    CONTROL_RE.get_or_init(|| Regex::new(r"[\x00-\x1f\x7f-\x9f]").expect("static regex is valid"))
}

fn float_re() -> &'static Regex {
    FLOAT_RE.get_or_init(|| Regex::new(r"^[-+]?[0-9]*\.?[0-9]+$").expect("static regex is valid"))
}

/// Trim, decode HTML entities and drop control characters.
pub fn clean_str(input: &str) -> String {
    let decoded = html_escape::decode_html_entities(input.trim());
    control_re().replace_all(&decoded, "").trim().to_string()
}

/// Whether `value` is a plain decimal number (`7`, `-0.5`, `.25`).
pub fn is_float(value: &str) -> bool {
    float_re().is_match(value.trim())
}

/// Normalize an entity name into its identity key.
///
/// Strips surrounding quotes, case-folds and collapses whitespace runs into a
/// single space. Returns an empty string for blank input.
pub fn normalize_name(name: &str) -> String {
    let cleaned = clean_str(name);
    let unquoted = cleaned.trim_matches(|c| c == '"' || c == '\'' || c == '`');
    whitespace_re()
        .replace_all(unquoted, " ")
        .trim()
        .to_lowercase()
}

/// Split `content` on any of `markers`, dropping blank pieces.
pub fn split_by_markers<'a>(content: &'a str, markers: &[&str]) -> Vec<&'a str> {
    let markers: Vec<&str> = markers.iter().copied().filter(|m| !m.is_empty()).collect();
    if markers.is_empty() {
        return vec![content.trim()].into_iter().filter(|s| !s.is_empty()).collect();
    }

    let mut pieces = vec![content];
    for marker in markers {
        pieces = pieces
            .into_iter()
            .flat_map(|piece| piece.split(marker))
            .collect();
    }

    pieces
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Pack alternating user/assistant turns into chat history.
pub fn pack_history<S: AsRef<str>>(turns: &[S]) -> Vec<Message> {
    turns
        .iter()
        .enumerate()
        .map(|(i, content)| {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            Message::new(role, content.as_ref())
        })
        .collect()
}

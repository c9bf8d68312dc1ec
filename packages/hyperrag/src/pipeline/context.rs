//! Context assembly and token budgeting.

use indexmap::IndexSet;

use crate::traits::tokenizer::Tokenizer;
use crate::types::context::ContextTable;

/// Merge tables into one, deduplicating rows and renumbering from 1.
///
/// The header comes from the first table with one. Rows are compared on
/// every column except the leading row number; the first occurrence wins.
pub fn combine_context_tables(tables: &[ContextTable]) -> ContextTable {
    let Some(header) = tables.iter().map(|t| &t.header).find(|h| !h.is_empty()) else {
        return ContextTable::default();
    };

    let mut seen: IndexSet<Vec<String>> = IndexSet::new();
    for row in tables.iter().flat_map(|t| t.rows.iter()) {
        let content: Vec<String> = row.iter().skip(1).cloned().collect();
        if content.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        seen.insert(content);
    }

    let mut combined = ContextTable::new(header.iter().cloned());
    for (i, content) in seen.into_iter().enumerate() {
        combined.push_row_lenient(std::iter::once((i + 1).to_string()).chain(content));
    }
    combined
}

/// Merge tables and render them for a prompt (`",\t"` between columns).
///
/// Returns an empty string when there is nothing to combine.
pub fn combine_contexts(tables: &[ContextTable]) -> String {
    let combined = combine_context_tables(tables);
    if combined.header.is_empty() {
        return String::new();
    }
    combined.render()
}

/// Render `rows` under `header`, numbering each row from 1.
pub fn list_to_context(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut table = ContextTable::new(header.iter().copied());
    for (i, row) in rows.iter().enumerate() {
        table.push_row_lenient(std::iter::once((i + 1).to_string()).chain(row.iter().cloned()));
    }
    table.render()
}

/// Longest prefix of `items` whose cumulative token count fits `max_tokens`.
///
/// A zero budget yields nothing; the first item that would overflow the
/// budget and everything after it are dropped.
pub fn truncate_by_token_budget<'a, T, K, F>(
    items: &'a [T],
    key: F,
    max_tokens: usize,
    tokenizer: &dyn Tokenizer,
) -> &'a [T]
where
    K: AsRef<str>,
    F: Fn(&T) -> K,
{
    if max_tokens == 0 {
        return &[];
    }

    let mut total = 0usize;
    for (i, item) in items.iter().enumerate() {
        total += tokenizer.count(key(item).as_ref());
        if total > max_tokens {
            return &items[..i];
        }
    }
    items
}

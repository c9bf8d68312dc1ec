//! Extraction response parsing.
//!
//! Turns the delimited record text produced by the extraction prompt into
//! an [`ExtractionBatch`]. Parsing never fails as a whole: bad records are
//! skipped and reported as [`ParseWarning`]s.

use std::sync::OnceLock;

use indexmap::IndexSet;
use regex::Regex;
use tracing::{debug, warn};

use crate::pipeline::prompts::GRAPH_FIELD_SEP;
use crate::types::batch::{ExtractionBatch, ParseWarning};
use crate::types::config::HyperRagConfig;
use crate::types::entity::{parse_properties, Entity};
use crate::types::hyperedge::{parse_keywords, HighOrderHyperedge, LowOrderHyperedge};
use crate::utils::text::{clean_str, is_float, normalize_name, split_by_markers};

/// Placeholder the model writes when it has no source path.
pub const UNKNOWN_SOURCE: &str = "UNKNOWN";

/// Record kinds of the extraction grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Entity,
    LowOrderHyperedge,
    HighLevelKeywords,
    HighOrderHyperedge,
}

impl RecordKind {
    /// Match a kind field, ignoring case, quotes, hyphens and spacing.
    pub fn parse(field: &str) -> Option<Self> {
        let folded = normalize_name(&field.replace(['-', '_'], " "));
        match folded.as_str() {
            "entity" => Some(Self::Entity),
            "low order hyperedge" => Some(Self::LowOrderHyperedge),
            "high level keywords" => Some(Self::HighLevelKeywords),
            "high order hyperedge" => Some(Self::HighOrderHyperedge),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entity => "Entity",
            Self::LowOrderHyperedge => "Low-order Hyperedge",
            Self::HighLevelKeywords => "High-level keywords",
            Self::HighOrderHyperedge => "High-order Hyperedge",
        }
    }
}

/// Parse a full extraction response.
///
/// Records are split on the record delimiter and the completion marker,
/// unwrapped from their parentheses, split on the tuple delimiter and
/// dispatched on their first field.
pub fn parse_extraction_response(response: &str, config: &HyperRagConfig) -> ExtractionBatch {
    let delimiters = &config.delimiters;
    let mut batch = ExtractionBatch::new();

    let markers = [delimiters.record.as_str(), delimiters.completion.as_str()];
    for record in split_by_markers(response, &markers) {
        let body = unwrap_record(record);
        if body.trim().is_empty() {
            continue;
        }

        let fields: Vec<String> = body
            .split(delimiters.tuple.as_str())
            .map(clean_field)
            .collect();

        let outcome = match RecordKind::parse(&fields[0]) {
            Some(RecordKind::Entity) => parse_entity(&fields[1..], record).map(|e| {
                batch.entities.push(e);
            }),
            Some(RecordKind::LowOrderHyperedge) => {
                parse_low_order(&fields[1..], record, config.neutral_strength).map(|e| {
                    batch.low_order_edges.push(e);
                })
            }
            Some(RecordKind::HighOrderHyperedge) => {
                parse_high_order(&fields[1..], record, config.neutral_strength).map(|e| {
                    batch.high_order_edges.push(e);
                })
            }
            Some(RecordKind::HighLevelKeywords) => {
                batch
                    .high_level_keywords
                    .extend(parse_keywords(&fields[1..].join(",")));
                Ok(())
            }
            None => Err(ParseWarning::UnknownKind {
                kind: fields[0].clone(),
                record: record.to_string(),
            }),
        };

        if let Err(warning) = outcome {
            warn!(warning = %warning, record = %warning.record(), "Skipping extraction record");
            batch.warnings.push(warning);
        }
    }

    debug!(
        entities = batch.entities.len(),
        low_order = batch.low_order_edges.len(),
        high_order = batch.high_order_edges.len(),
        warnings = batch.warnings.len(),
        "Parsed extraction response"
    );

    batch
}

/// Strip surrounding parentheses, tolerating a missing closing one.
fn unwrap_record(record: &str) -> &str {
    let record = record.trim();
    let record = record.strip_prefix('(').unwrap_or(record);
    record.strip_suffix(')').unwrap_or(record)
}

fn clean_field(field: &str) -> String {
    clean_str(field)
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

/// Parse a strength field, falling back to `neutral`.
pub fn parse_strength(field: &str, neutral: f64) -> f64 {
    if is_float(field) {
        field.trim().parse().unwrap_or(neutral)
    } else {
        neutral
    }
}

/// Split a source path field; `UNKNOWN` or blank yields nothing.
pub fn parse_source_paths(field: &str) -> IndexSet<String> {
    let field = field.trim();
    if field.is_empty() || field.eq_ignore_ascii_case(UNKNOWN_SOURCE) {
        return IndexSet::new();
    }

    split_by_markers(field, &[GRAPH_FIELD_SEP, ","])
        .into_iter()
        .filter(|p| !p.eq_ignore_ascii_case(UNKNOWN_SOURCE))
        .map(str::to_string)
        .collect()
}

static FILE_NAME_RE: OnceLock<Regex> = OnceLock::new();

/// Whether a trailing field reads as provenance rather than a strength.
///
/// Matches the `UNKNOWN` placeholder, separator-joined lists, anything with
/// a path separator, and bare file names with a short extension.
fn looks_like_source_path(field: &str) -> bool {
    let field = field.trim();
    if field.is_empty() || is_float(field) {
        return false;
    }
    if field.eq_ignore_ascii_case(UNKNOWN_SOURCE)
        || field.contains(GRAPH_FIELD_SEP)
        || field.contains('/')
        || field.contains('\\')
    {
        return true;
    }
    let re = FILE_NAME_RE
        .get_or_init(|| Regex::new(r"^\S+\.[A-Za-z0-9]{1,5}$").expect("static regex is valid"));
    re.is_match(field)
}

fn malformed(kind: RecordKind, reason: impl Into<String>, record: &str) -> ParseWarning {
    ParseWarning::Malformed {
        kind: kind.as_str().to_string(),
        reason: reason.into(),
        record: record.to_string(),
    }
}

fn parse_entity(fields: &[String], record: &str) -> Result<Entity, ParseWarning> {
    let kind = RecordKind::Entity;
    if fields.len() < 3 {
        return Err(malformed(
            kind,
            format!("expected name, type and description, got {} fields", fields.len()),
            record,
        ));
    }

    let mut entity = Entity::new(&fields[0]).ok_or_else(|| ParseWarning::EmptyName {
        kind: kind.as_str().to_string(),
        record: record.to_string(),
    })?;
    entity = entity.with_type(&fields[1]).with_description(fields[2].as_str());

    if let Some(properties) = fields.get(3) {
        entity = entity.with_properties(parse_properties(properties));
    }
    if let Some(paths) = fields.get(4) {
        entity.source_paths.extend(parse_source_paths(paths));
    }

    Ok(entity)
}

fn parse_low_order(
    fields: &[String],
    record: &str,
    neutral: f64,
) -> Result<LowOrderHyperedge, ParseWarning> {
    let kind = RecordKind::LowOrderHyperedge;
    if fields.len() < 4 {
        return Err(malformed(
            kind,
            format!("expected two entities, description and keywords, got {} fields", fields.len()),
            record,
        ));
    }

    let mut edge = LowOrderHyperedge::new(&fields[0], &fields[1]).ok_or_else(|| {
        ParseWarning::EmptyName {
            kind: kind.as_str().to_string(),
            record: record.to_string(),
        }
    })?;
    if edge.source == edge.target {
        return Err(malformed(kind, "both endpoints name the same entity", record));
    }

    edge = edge
        .with_description(fields[2].as_str())
        .with_keywords(parse_keywords(&fields[3]));
    edge.strength = fields
        .get(4)
        .map(|s| parse_strength(s, neutral))
        .unwrap_or(neutral);
    if let Some(paths) = fields.get(5) {
        edge.source_paths.extend(parse_source_paths(paths));
    }

    Ok(edge)
}

fn parse_high_order(
    fields: &[String],
    record: &str,
    neutral: f64,
) -> Result<HighOrderHyperedge, ParseWarning> {
    let kind = RecordKind::HighOrderHyperedge;

    // Trailing source path: the last field reads as a path, or it is
    // non-numeric right after a numeric strength.
    let (fields, paths) = match fields {
        [rest @ .., before, last]
            if fields.len() >= 6
                && (looks_like_source_path(last) || (is_float(before) && !is_float(last))) =>
        {
            let mut rest = rest.to_vec();
            rest.push(before.clone());
            (rest, Some(last.as_str()))
        }
        _ => (fields.to_vec(), None),
    };

    if fields.len() < 5 {
        return Err(malformed(
            kind,
            format!(
                "expected entities, description, generalization, keywords and strength, got {} fields",
                fields.len()
            ),
            record,
        ));
    }

    let n = fields.len();
    let (members, tail) = fields.split_at(n - 4);
    let mut edge = HighOrderHyperedge::new(members).ok_or_else(|| {
        let found = members
            .iter()
            .map(|m| normalize_name(m))
            .filter(|m| !m.is_empty())
            .collect::<IndexSet<_>>()
            .len();
        ParseWarning::TooFewMembers {
            found,
            record: record.to_string(),
        }
    })?;

    edge = edge
        .with_description(tail[0].as_str())
        .with_generalization(tail[1].as_str())
        .with_keywords(parse_keywords(&tail[2]))
        .with_strength(parse_strength(&tail[3], neutral));
    if let Some(paths) = paths {
        edge.source_paths.extend(parse_source_paths(paths));
    }

    Ok(edge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn config() -> HyperRagConfig {
        HyperRagConfig::default()
    }

    const RESPONSE: &str = r#"("Entity" | stats_command | esql_command | STATS aggregates field values. | syntax:STATS, aggregation:avg)
("Entity" | track_slow_queries | use_case | Finding slow services. | threshold:2s)
("Low-order Hyperedge" | track_slow_queries | stats_command | The use case relies on STATS. | aggregation, performance | 9)
("High-level keywords" | query_performance, aggregation)
("High-order Hyperedge" | track_slow_queries | stats_command | unmapped_field | Full workflow. | slow_query_workflow | monitoring, troubleshooting | 8)<|COMPLETE|>"#;

    #[test]
    fn test_parses_every_kind() {
        let batch = parse_extraction_response(RESPONSE, &config());

        assert_eq!(batch.entities.len(), 2);
        assert_eq!(batch.low_order_edges.len(), 1);
        assert_eq!(batch.high_order_edges.len(), 1);
        assert!(batch.warnings.is_empty());

        let stats = &batch.entities[0];
        assert_eq!(stats.name, "stats_command");
        assert_eq!(stats.entity_type, "esql_command");
        assert_eq!(stats.additional_properties[0]["aggregation"], "avg");

        let low = &batch.low_order_edges[0];
        assert_eq!(low.strength, 9.0);
        assert!(low.keywords.contains("performance"));

        let high = &batch.high_order_edges[0];
        assert_eq!(high.entities.len(), 3);
        assert_eq!(high.generalizations, vec!["slow_query_workflow"]);
        assert_eq!(high.strength, 8.0);

        assert_eq!(
            batch.high_level_keywords.iter().collect::<Vec<_>>(),
            vec!["query_performance", "aggregation"]
        );
    }

    #[test]
    fn test_unknown_kind_and_malformed_are_warnings() {
        let response = "(\"Relationship\" | a | b)\n(\"Entity\" | only_name)\n(\"Entity\" | ok | t | d | )";
        let batch = parse_extraction_response(response, &config());

        assert_eq!(batch.entities.len(), 1);
        assert_eq!(batch.warnings.len(), 2);
        assert!(matches!(batch.warnings[0], ParseWarning::UnknownKind { ref kind, .. } if kind == "Relationship"));
        assert!(matches!(batch.warnings[1], ParseWarning::Malformed { .. }));
    }

    #[test]
    fn test_kind_matching_is_tolerant() {
        let response = "(\" low-order  HYPEREDGE \" | a | b | d | k | 3)";
        let batch = parse_extraction_response(response, &config());
        assert_eq!(batch.low_order_edges.len(), 1);
    }

    #[test]
    fn test_unparseable_strength_is_neutral() {
        let response = "(\"Low-order Hyperedge\" | a | b | d | k | strong)";
        let batch = parse_extraction_response(response, &config());
        assert_eq!(batch.low_order_edges[0].strength, 5.0);

        let custom = HyperRagConfig {
            neutral_strength: 1.0,
            ..HyperRagConfig::default()
        };
        let batch = parse_extraction_response(response, &custom);
        assert_eq!(batch.low_order_edges[0].strength, 1.0);
    }

    #[test]
    fn test_partial_trailing_record() {
        let response = "(\"Entity\" | a | t | first)\n(\"Entity\" | b | t | cut off<|COMPLETE|>";
        let batch = parse_extraction_response(response, &config());
        assert_eq!(batch.entities.len(), 2);
        assert_eq!(batch.entities[1].descriptions, vec!["cut off"]);
    }

    #[test]
    fn test_high_order_trailing_source_path() {
        let response = "(\"High-order Hyperedge\" | a | b | c | desc | gen | kw | 7 | guides/a.md<SEP>guides/b.md)";
        let batch = parse_extraction_response(response, &config());

        let edge = &batch.high_order_edges[0];
        assert_eq!(edge.entities.members(), &["a", "b", "c"]);
        assert_eq!(edge.strength, 7.0);
        assert_eq!(edge.source_paths.len(), 2);
    }

    #[test]
    fn test_high_order_source_path_after_word_strength() {
        let response = "(\"High-order Hyperedge\" | a | b | c | the full workflow. | flow_gen | kw1, kw2 | high | guides/a.md)";
        let batch = parse_extraction_response(response, &config());

        assert!(batch.warnings.is_empty());
        let edge = &batch.high_order_edges[0];
        assert_eq!(edge.entities.members(), &["a", "b", "c"]);
        assert_eq!(edge.description(), "the full workflow.");
        assert_eq!(edge.generalization(), "flow_gen");
        assert_eq!(edge.keywords.iter().collect::<Vec<_>>(), vec!["kw1", "kw2"]);
        assert_eq!(edge.strength, config().neutral_strength);
        assert_eq!(edge.source_paths.iter().collect::<Vec<_>>(), vec!["guides/a.md"]);
    }

    #[test]
    fn test_high_order_unknown_or_bare_file_source() {
        for (source, expected) in [("UNKNOWN", 0), ("lookup-join.md", 1)] {
            let response = format!(
                "(\"High-order Hyperedge\" | a | b | c | d | g | k | strong | {})",
                source
            );
            let batch = parse_extraction_response(&response, &config());
            let edge = &batch.high_order_edges[0];
            assert_eq!(edge.entities.members(), &["a", "b", "c"]);
            assert_eq!(edge.source_paths.len(), expected);
        }
    }

    #[test]
    fn test_source_path_detection() {
        assert!(looks_like_source_path("guides/a.md"));
        assert!(looks_like_source_path("a.md<SEP>b.md"));
        assert!(looks_like_source_path("docs\\esql.md"));
        assert!(looks_like_source_path("unknown"));
        assert!(looks_like_source_path("lookup-join.md"));
        assert!(!looks_like_source_path("8"));
        assert!(!looks_like_source_path("high"));
        assert!(!looks_like_source_path("the full workflow."));
        assert!(!looks_like_source_path("kw1, kw2"));
    }

    #[test]
    fn test_high_order_needs_two_members() {
        let response = "(\"High-order Hyperedge\" | a | A | desc | gen | kw | 7)";
        let batch = parse_extraction_response(response, &config());

        assert!(batch.high_order_edges.is_empty());
        assert!(matches!(batch.warnings[0], ParseWarning::TooFewMembers { found: 1, .. }));
    }

    #[test]
    fn test_source_paths() {
        assert!(parse_source_paths("UNKNOWN").is_empty());
        assert!(parse_source_paths(" unknown ").is_empty());
        assert_eq!(parse_source_paths("a.md<SEP>b.md, c.md").len(), 3);

        let batch = parse_extraction_response("(\"Entity\" | a | t | d | k:v | UNKNOWN)", &config());
        assert!(batch.entities[0].source_paths.is_empty());
    }

    #[test]
    fn test_empty_response() {
        let batch = parse_extraction_response("  <|COMPLETE|>  ", &config());
        assert!(batch.is_empty());
        assert!(batch.warnings.is_empty());
    }

    #[test]
    fn test_html_entities_and_quotes_are_cleaned() {
        let response = "(\"Entity\" | \"Join_Command\" | \"esql_command\" | Joins A &amp; B. | k:v)";
        let batch = parse_extraction_response(response, &config());
        assert_eq!(batch.entities[0].name, "join_command");
        assert_eq!(batch.entities[0].descriptions, vec!["Joins A & B."]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn parsed_counts_match_rendered_records(
            names in prop::collection::btree_set("[a-z][a-z_]{0,11}", 2..12),
            desc in "[A-Za-z ]{1,40}",
        ) {
            let names: Vec<String> = names.into_iter().collect();
            let mut records: Vec<String> = names
                .iter()
                .map(|n| format!("(\"Entity\" | {} | concept | {} | k:v)", n, desc))
                .collect();
            for pair in names.windows(2) {
                records.push(format!(
                    "(\"Low-order Hyperedge\" | {} | {} | {} | kw | 7)",
                    pair[0], pair[1], desc
                ));
            }
            records.push(format!(
                "(\"High-order Hyperedge\" | {} | {} | gen | kw | 8)",
                names.join(" | "),
                desc
            ));
            let response = format!("{}<|COMPLETE|>", records.join("\n"));

            let batch = parse_extraction_response(&response, &HyperRagConfig::default());
            prop_assert_eq!(batch.entities.len(), names.len());
            prop_assert_eq!(batch.low_order_edges.len(), names.len() - 1);
            prop_assert_eq!(batch.high_order_edges.len(), 1);
            prop_assert!(batch.warnings.is_empty());
        }
    }
}

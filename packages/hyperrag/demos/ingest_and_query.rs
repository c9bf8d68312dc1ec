//! Ingest and Query - Reference Wiring
//!
//! Builds an index over an in-memory store, ingests two documentation
//! pages and answers a question from the resulting hypergraph.
//!
//! The scripted `MockLanguageModel` stands in for a real provider so the
//! demo runs offline. Swap it for any `LanguageModel` implementation and
//! tune the ceilings through `HYPERRAG_*` environment variables.
//!
//! ```bash
//! RUST_LOG=hyperrag=debug cargo run --example ingest_and_query
//! ```

use std::sync::Arc;

use hyperrag::pipeline::previews_to_jsonl;
use hyperrag::{
    HyperRag, HyperRagConfig, MemoryStore, MockEmbedder, MockLanguageModel, QueryParam,
    RawDocument, Result,
};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const LOOKUP_EXTRACTION: &str = "(\"Entity\" | lookup_join | esql_command | LOOKUP JOIN adds fields from a lookup index to each row. | syntax:LOOKUP JOIN index ON field)\n\
    (\"Entity\" | lookup_index | esql_concept | An index created with index.mode set to lookup.)\n\
    (\"Low-order Hyperedge\" | lookup_join | lookup_index | LOOKUP JOIN reads rows from a lookup index. | enrichment, join | 9)\n\
    (\"High-level keywords\" | data_enrichment, joins)<|COMPLETE|>";

const THREAT_INTEL_EXTRACTION: &str = "(\"Entity\" | threat_intel_enrichment | use_case | Matching source IPs against known bad addresses.)\n\
    (\"High-order Hyperedge\" | threat_intel_enrichment | lookup_join | lookup_index | Enrich firewall logs with threat data through a lookup index. | ip_enrichment_workflow | security, enrichment | 8)<|COMPLETE|>";

fn document(value: serde_json::Value) -> RawDocument {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hyperrag=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = HyperRagConfig::from_env()?;
    tracing::info!(
        llm_max_async = config.governor.llm_max_async,
        max_gleaning = config.max_gleaning,
        "Configuration loaded"
    );

    let llm = Arc::new(
        MockLanguageModel::new()
            .with_response("reads data from a lookup index", LOOKUP_EXTRACTION)
            .with_response("known bad addresses", THREAT_INTEL_EXTRACTION)
            .with_response(
                "Query: How do I enrich firewall logs",
                r#"{"high_level_keywords": ["enrichment"], "low_level_keywords": ["lookup_join", "lookup_index"]}"#,
            )
            .with_response("MANY entities were missed", "<|COMPLETE|>")
            .with_response("Answer YES | NO", "NO")
            .with_default_response(
                "Create a lookup index of bad IPs, then run LOOKUP JOIN on source.ip.",
            ),
    );
    let store = Arc::new(MemoryStore::new());
    let rag = HyperRag::new(llm, Arc::new(MockEmbedder::default()), store.clone(), config)?;

    let documents = vec![
        document(json!({
            "title": "LOOKUP JOIN",
            "breadcrumbs": ["ES|QL", "Commands", "LOOKUP JOIN"],
            "main_content": "LOOKUP JOIN reads data from a lookup index and appends matching fields.",
            "source_path": "reference/lookup-join.md"
        })),
        document(json!({
            "title": "Threat intel enrichment",
            "main_content": "Flag firewall events whose source IP appears in a list of known bad addresses.",
            "source_path": "guides/threat-intel.md",
            "product": "security"
        })),
    ];

    print!("{}", previews_to_jsonl(&rag.preview(&documents))?);

    let report = rag.ingest(&documents).await;
    tracing::info!(
        ingested = report.documents_ingested,
        entities = store.entity_count()?,
        edges = store.edge_count()?,
        rate_limited = report.rate_limited,
        "Ingest finished"
    );
    for failed in &report.failed {
        tracing::warn!(doc_id = %failed.doc_id, error = %failed.error, "Document failed");
    }

    let question = "How do I enrich firewall logs with threat data?";
    let context = rag.query(question, &QueryParam::new().context_only()).await?;
    println!("{}\n", context);

    let answer = rag.query(question, &QueryParam::default()).await?;
    println!("{}", answer);

    Ok(())
}

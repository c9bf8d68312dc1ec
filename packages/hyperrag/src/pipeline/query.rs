//! Query pipeline - keywords, vector retrieval, context tables, answer.
//!
//! Low-level keywords (specific entities) are matched against entity
//! vectors and expanded to the hyperedges touching those entities.
//! High-level keywords (themes) are matched against hyperedge vectors and
//! expanded to their member entities. Both sides are token-budgeted,
//! combined into one entity table and one relation table, and handed to the
//! model as the answer's system prompt.

use indexmap::{IndexMap, IndexSet};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::error::{HyperRagError, Result};
use crate::pipeline::context::{combine_context_tables, truncate_by_token_budget};
use crate::pipeline::governor::{Governor, RetryPolicy};
use crate::pipeline::prompts::PromptTemplates;
use crate::traits::{
    embedding::Embedder,
    llm::LanguageModel,
    store::{GraphStore, VectorMatch, VectorNamespace, VectorStore},
};
use crate::types::{
    config::{HyperRagConfig, QueryParam},
    context::ContextTable,
    entity::Entity,
    hyperedge::{HighOrderHyperedge, LowOrderHyperedge},
    key::RecordKey,
};

pub const ENTITY_HEADER: [&str; 6] = ["id", "entity", "type", "description", "additional properties", "rank"];
pub const RELATION_HEADER: [&str; 6] = ["id", "entities", "description", "keywords", "weight", "rank"];

static JSON_BODY_RE: OnceLock<Regex> = OnceLock::new();

/// Keywords split out of a user question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryKeywords {
    /// Overarching themes, matched against hyperedges
    pub high_level: Vec<String>,

    /// Concrete entities and terms, matched against entities
    pub low_level: Vec<String>,
}

impl QueryKeywords {
    pub fn is_empty(&self) -> bool {
        self.high_level.is_empty() && self.low_level.is_empty()
    }
}

#[derive(Deserialize)]
struct KeywordsBody {
    #[serde(default)]
    high_level_keywords: Vec<String>,
    #[serde(default)]
    low_level_keywords: Vec<String>,
}

/// Parse a keyword-extraction response.
///
/// The outermost `{...}` span is located first, so prose or code fences
/// around the JSON are tolerated. Missing lists are treated as empty.
pub fn parse_query_keywords(response: &str) -> Result<QueryKeywords> {
    let re = JSON_BODY_RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("static regex is valid"));
    let body = re.find(response).ok_or_else(|| {
        HyperRagError::validation("keywords", "response contains no JSON object")
    })?;

    let parsed: KeywordsBody = serde_json::from_str(body.as_str())?;
    Ok(QueryKeywords {
        high_level: clean_keywords(parsed.high_level_keywords),
        low_level: clean_keywords(parsed.low_level_keywords),
    })
}

fn clean_keywords(keywords: Vec<String>) -> Vec<String> {
    keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect()
}

/// Retrieved context for one question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    pub keywords: QueryKeywords,
    pub entities: ContextTable,
    pub relations: ContextTable,
}

impl QueryContext {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }

    /// Render both tables for the answer prompt.
    pub fn render(&self) -> String {
        format!(
            "-----Entities-----\n```csv\n{}\n```\n-----Relationships-----\n```csv\n{}\n```",
            self.entities.render(),
            self.relations.render()
        )
    }
}

/// A hyperedge of either order, flattened for the relation table.
#[derive(Debug, Clone)]
struct RelationRow {
    key: RecordKey,
    members: Vec<String>,
    description: String,
    keywords: String,
    strength: f64,
    rank: usize,
}

impl From<LowOrderHyperedge> for RelationRow {
    fn from(edge: LowOrderHyperedge) -> Self {
        Self {
            key: edge.key(),
            members: vec![edge.source.clone(), edge.target.clone()],
            description: edge.description(),
            keywords: edge.keywords_text(),
            strength: edge.strength,
            rank: 0,
        }
    }
}

impl From<HighOrderHyperedge> for RelationRow {
    fn from(edge: HighOrderHyperedge) -> Self {
        let description = match edge.generalization() {
            g if g.is_empty() => edge.description(),
            g => format!("{}: {}", g, edge.description()),
        };
        Self {
            key: edge.key(),
            members: edge.entities.members().to_vec(),
            description,
            keywords: edge.keywords_text(),
            strength: edge.strength,
            rank: 0,
        }
    }
}

/// Answers questions from the hypergraph.
pub struct QueryEngine {
    graph: Arc<dyn GraphStore>,
    vectors: Arc<dyn VectorStore>,
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    governor: Governor,
    prompts: Arc<PromptTemplates>,
    config: Arc<HyperRagConfig>,
}

impl QueryEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        vectors: Arc<dyn VectorStore>,
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        governor: Governor,
        config: Arc<HyperRagConfig>,
    ) -> Self {
        Self {
            graph,
            vectors,
            llm,
            embedder,
            governor,
            prompts: Arc::new(PromptTemplates::default()),
            config,
        }
    }

    pub fn with_prompts(mut self, prompts: Arc<PromptTemplates>) -> Self {
        self.prompts = prompts;
        self
    }

    /// Answer `question`.
    ///
    /// Returns the configured fail response when nothing relevant is
    /// retrieved, and the rendered context when `only_need_context` is set.
    pub async fn query(&self, question: &str, param: &QueryParam) -> Result<String> {
        let context = self.retrieve(question, param).await?;
        if context.is_empty() {
            info!(question = %question, "No context retrieved");
            return Ok(self.prompts.fail_response.clone());
        }

        let rendered = context.render();
        if param.only_need_context {
            return Ok(rendered);
        }

        let system_prompt = self.prompts.format_rag_response(&param.response_type, &rendered);
        let answer = self
            .governor
            .complete(
                self.llm.as_ref(),
                question,
                Some(&system_prompt),
                &[],
                &RetryPolicy::single_attempt(),
            )
            .await?;
        Ok(answer.trim().to_string())
    }

    /// Ask the model for high- and low-level keywords.
    pub async fn extract_keywords(&self, question: &str) -> Result<QueryKeywords> {
        let prompt = self.prompts.format_keywords_extraction(question);
        let response = self
            .governor
            .complete(self.llm.as_ref(), &prompt, None, &[], &RetryPolicy::single_attempt())
            .await?;
        parse_query_keywords(&response)
    }

    /// Build the entity and relation tables for `question`.
    pub async fn retrieve(&self, question: &str, param: &QueryParam) -> Result<QueryContext> {
        let keywords = self.extract_keywords(question).await?;
        if keywords.is_empty() {
            return Ok(QueryContext {
                keywords,
                ..Default::default()
            });
        }

        let mut entity_tables = Vec::with_capacity(2);
        let mut relation_tables = Vec::with_capacity(2);

        if !keywords.low_level.is_empty() {
            let (entities, relations) = self
                .local_context(&keywords.low_level.join(", "), param)
                .await?;
            entity_tables.push(entities);
            relation_tables.push(relations);
        }
        if !keywords.high_level.is_empty() {
            let (entities, relations) = self
                .global_context(&keywords.high_level.join(", "), param)
                .await?;
            entity_tables.push(entities);
            relation_tables.push(relations);
        }

        let context = QueryContext {
            keywords,
            entities: combine_context_tables(&entity_tables),
            relations: combine_context_tables(&relation_tables),
        };
        debug!(
            entities = context.entities.len(),
            relations = context.relations.len(),
            "Retrieved query context"
        );
        Ok(context)
    }

    /// Entities matching `keywords`, plus the hyperedges touching them.
    async fn local_context(
        &self,
        keywords: &str,
        param: &QueryParam,
    ) -> Result<(ContextTable, ContextTable)> {
        let mut degrees = HashMap::new();

        let mut entities = Vec::new();
        for hit in self.search(VectorNamespace::Entities, keywords, param.top_k).await? {
            let RecordKey::Entity(name) = &hit.key else {
                continue;
            };
            if let Some(entity) = self.graph.get_entity(name).await? {
                let rank = self.degree(name, &mut degrees).await?;
                entities.push((entity, rank));
            }
        }
        let entities = self.budget_entities(&entities, param);

        let mut relations: IndexMap<RecordKey, RelationRow> = IndexMap::new();
        for (entity, _) in entities {
            let edges = self.graph.entity_edges(&entity.name).await?;
            let rows = edges
                .low_order
                .into_iter()
                .map(RelationRow::from)
                .chain(edges.high_order.into_iter().map(RelationRow::from));
            for row in rows {
                relations.entry(row.key.clone()).or_insert(row);
            }
        }
        let mut relations: Vec<RelationRow> = relations.into_values().collect();
        for row in &mut relations {
            row.rank = self.member_rank(&row.members, &mut degrees).await?;
        }
        relations.sort_by(|a, b| {
            b.rank
                .cmp(&a.rank)
                .then(b.strength.total_cmp(&a.strength))
        });
        let relations = self.budget_relations(&relations, param);

        Ok((entity_table(entities), relation_table(relations)))
    }

    /// Hyperedges matching `keywords`, plus their member entities.
    async fn global_context(
        &self,
        keywords: &str,
        param: &QueryParam,
    ) -> Result<(ContextTable, ContextTable)> {
        let mut degrees = HashMap::new();

        let mut relations = Vec::new();
        for hit in self.search(VectorNamespace::Relations, keywords, param.top_k).await? {
            let row = match &hit.key {
                RecordKey::LowOrder(pair) => self
                    .graph
                    .get_low_order_edge(pair)
                    .await?
                    .map(RelationRow::from),
                RecordKey::HighOrder(set) => self
                    .graph
                    .get_high_order_edge(set)
                    .await?
                    .map(RelationRow::from),
                RecordKey::Entity(_) => None,
            };
            if let Some(mut row) = row {
                row.rank = self.member_rank(&row.members, &mut degrees).await?;
                relations.push(row);
            }
        }
        let relations = self.budget_relations(&relations, param);

        let members: IndexSet<&String> = relations.iter().flat_map(|r| r.members.iter()).collect();
        let mut entities = Vec::new();
        for name in members {
            if let Some(entity) = self.graph.get_entity(name).await? {
                let rank = self.degree(name, &mut degrees).await?;
                entities.push((entity, rank));
            }
        }
        let entities = self.budget_entities(&entities, param);

        Ok((entity_table(entities), relation_table(relations)))
    }

    async fn search(
        &self,
        namespace: VectorNamespace,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let embeddings = self
            .governor
            .embed(
                self.embedder.as_ref(),
                &[text.to_string()],
                &RetryPolicy::single_attempt(),
            )
            .await?;
        let Some(embedding) = embeddings.first() else {
            return Ok(Vec::new());
        };
        self.vectors.search(namespace, embedding, top_k).await
    }

    async fn degree(&self, name: &str, cache: &mut HashMap<String, usize>) -> Result<usize> {
        if let Some(degree) = cache.get(name) {
            return Ok(*degree);
        }
        let degree = self.graph.entity_degree(name).await?;
        cache.insert(name.to_string(), degree);
        Ok(degree)
    }

    async fn member_rank(
        &self,
        members: &[String],
        cache: &mut HashMap<String, usize>,
    ) -> Result<usize> {
        let mut rank = 0;
        for member in members {
            rank += self.degree(member, cache).await?;
        }
        Ok(rank)
    }

    fn budget_entities<'a>(
        &self,
        entities: &'a [(Entity, usize)],
        param: &QueryParam,
    ) -> &'a [(Entity, usize)] {
        truncate_by_token_budget(
            entities,
            |(entity, _)| entity.description(),
            param.max_token_for_entity_context,
            &*self.config.tokenizer,
        )
    }

    fn budget_relations<'a>(
        &self,
        relations: &'a [RelationRow],
        param: &QueryParam,
    ) -> &'a [RelationRow] {
        truncate_by_token_budget(
            relations,
            |row| row.description.clone(),
            param.max_token_for_relation_context,
            &*self.config.tokenizer,
        )
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("governor", &self.governor)
            .finish_non_exhaustive()
    }
}

fn entity_table(entities: &[(Entity, usize)]) -> ContextTable {
    let mut table = ContextTable::new(ENTITY_HEADER);
    for (i, (entity, rank)) in entities.iter().enumerate() {
        table.push_row([
            (i + 1).to_string(),
            entity.name.clone(),
            entity.entity_type.clone(),
            entity.description(),
            entity.properties_text(),
            rank.to_string(),
        ]);
    }
    table
}

fn relation_table(relations: &[RelationRow]) -> ContextTable {
    let mut table = ContextTable::new(RELATION_HEADER);
    for (i, row) in relations.iter().enumerate() {
        table.push_row([
            (i + 1).to_string(),
            row.members.join(", "),
            row.description.clone(),
            row.keywords.clone(),
            row.strength.to_string(),
            row.rank.to_string(),
        ]);
    }
    table
}

//! LLM prompts for extraction, consolidation and answering.
//!
//! Templates use `{placeholder}` substitution. Only the structural
//! contract is fixed (record kinds, field order, delimiters); the wording
//! can be replaced per deployment through [`PromptTemplates`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::config::HyperRagConfig;

/// Separator between fragments inside one prompt field.
pub const GRAPH_FIELD_SEP: &str = "<SEP>";

/// Prompt for extracting entities and hyperedges from one text block.
pub const ENTITY_EXTRACTION_PROMPT: &str = r#"-Goal-
Given a technical document and a list of entity types, identify every entity of those types in the text, then describe how the entities relate to each other, both pairwise and as larger groups.
Use {language} as output language.

-Steps-

1. Identify all entities. For each entity extract:
- entity_name: snake_case name derived from the document context.
- entity_type: one of [{entity_types}] (add a new type only when none fits).
- entity_description: concise description of what the entity is and when it is used.
- additional_properties: other attributes as key:value pairs separated by commas.
Format each entity as ("Entity"{tuple_delimiter}<entity_name>{tuple_delimiter}<entity_type>{tuple_delimiter}<entity_description>{tuple_delimiter}<additional_properties>)

2. From the entities in step 1, identify every pair that is clearly related. For each pair extract:
- source and target entity names, as identified in step 1.
- low_order_relationship_description: how the two entities interact or depend on each other.
- low_order_relationship_keywords: comma separated keywords for the nature of the relationship.
- low_order_relationship_strength: numeric score from 0 to 10.
Format each pair as ("Low-order Hyperedge"{tuple_delimiter}<entity_name1>{tuple_delimiter}<entity_name2>{tuple_delimiter}<low_order_relationship_description>{tuple_delimiter}<low_order_relationship_keywords>{tuple_delimiter}<low_order_relationship_strength>)

3. Extract high-level keywords for the main themes of the text.
Format them as ("High-level keywords"{tuple_delimiter}<high_level_keywords>)

4. Using steps 1 to 3, group entities that take part in one larger workflow or concept into sets of two or more. Do not force everything into a single set. For each set extract:
- the names of all member entities.
- high_order_relationship_description: description covering every member of the set.
- high_order_relationship_generalization: a short summary of the set.
- high_order_relationship_keywords: comma separated keywords for the association.
- high_order_relationship_strength: numeric score from 0 to 10.
Format each set as ("High-order Hyperedge"{tuple_delimiter}<entity_name1>{tuple_delimiter}<entity_name2>{tuple_delimiter}<entity_nameN>{tuple_delimiter}<high_order_relationship_description>{tuple_delimiter}<high_order_relationship_generalization>{tuple_delimiter}<high_order_relationship_keywords>{tuple_delimiter}<high_order_relationship_strength>)

5. Return every record from steps 1 to 4 as one list in {language}, using {record_delimiter} between records.

6. When finished, output {completion_delimiter}

######################
-Examples-
######################
{examples}
######################
-Real Data-
######################
Entity_types: [{entity_types}]
Text: {input_text}
######################
Output:
"#;

/// Worked example embedded in the extraction prompt.
pub const EXTRACTION_EXAMPLE: &str = r#"Example 1:

Entity_types: [esql_command, use_case, troubleshooting_tip]
Text:
Title: Track slow queries
Main_content: Run STATS to average query.duration per service, then filter with WHERE to keep services above 2 seconds. Empty results usually mean the duration field is not mapped.
################
Output:
("Entity"{tuple_delimiter}track_slow_queries{tuple_delimiter}use_case{tuple_delimiter}Finding services whose average query duration exceeds two seconds.{tuple_delimiter}primary_metric:query.duration, threshold:2s){record_delimiter}
("Entity"{tuple_delimiter}stats_command{tuple_delimiter}esql_command{tuple_delimiter}STATS aggregates field values such as averages per group.{tuple_delimiter}aggregation:avg){record_delimiter}
("Entity"{tuple_delimiter}unmapped_duration_field{tuple_delimiter}troubleshooting_tip{tuple_delimiter}Empty results point to a duration field missing from the mapping.{tuple_delimiter}check:field_mapping){record_delimiter}
("Low-order Hyperedge"{tuple_delimiter}track_slow_queries{tuple_delimiter}stats_command{tuple_delimiter}The use case relies on STATS to compute per-service averages.{tuple_delimiter}aggregation, performance{tuple_delimiter}9){record_delimiter}
("High-level keywords"{tuple_delimiter}query_performance, aggregation, field_mapping){record_delimiter}
("High-order Hyperedge"{tuple_delimiter}track_slow_queries{tuple_delimiter}stats_command{tuple_delimiter}unmapped_duration_field{tuple_delimiter}Aggregate durations, isolate slow services and fix missing mappings when nothing comes back.{tuple_delimiter}slow_query_workflow{tuple_delimiter}monitoring, troubleshooting{tuple_delimiter}8){completion_delimiter}
#############################"#;

/// Gleaning turn asking for missed records.
pub const ENTITY_CONTINUE_EXTRACTION_PROMPT: &str =
    "MANY entities were missed in the last extraction. Add them below using the same format:\n";

/// Gleaning check; the model answers YES or NO.
pub const ENTITY_IF_LOOP_EXTRACTION_PROMPT: &str =
    "It appears some entities may have still been missed. Answer YES | NO if there are still entities that need to be added.\n";

pub const SUMMARIZE_ENTITY_DESCRIPTIONS_PROMPT: &str = r#"You are responsible for writing one comprehensive summary of the data below.
Given one entity and a list of its descriptions, combine them into a single description that keeps the information from every item.
If descriptions contradict each other, resolve the contradiction into one coherent statement.
Write in third person and name the entity.
Keep the summary under {max_tokens} tokens.
#######
-Data-
Entity: {entity_name}
Description List: {description_list}
#######
Output:
"#;

pub const SUMMARIZE_ENTITY_ADDITIONAL_PROPERTIES_PROMPT: &str = r#"You are responsible for writing one comprehensive summary of the data below.
Given one entity and a list of its additional properties, combine them into a single set of key:value pairs separated by commas, keeping the information from every item.
If properties contradict each other, keep the most specific value.
Keep the summary under {max_tokens} tokens.
#######
-Data-
Entity: {entity_name}
Additional Properties List: {additional_properties_list}
#######
Output:
"#;

pub const SUMMARIZE_RELATION_DESCRIPTIONS_PROMPT: &str = r#"You are responsible for writing one comprehensive summary of the data below.
Given a set of entities and a list of descriptions of how they relate, combine them into a single description that covers every member of the set.
If descriptions contradict each other, resolve the contradiction into one coherent statement.
Write in third person and name the entities.
Keep the summary under {max_tokens} tokens.
#######
-Data-
Entity Set: {relation_name}
Relation Description List: {relation_description_list}
#######
Output:
"#;

pub const SUMMARIZE_RELATION_KEYWORDS_PROMPT: &str = r#"You are responsible for selecting keywords from the data below.
Given a set of entities and keywords describing how they relate, pick the keywords that best capture the main ideas and themes. Avoid vague terms.
#######
-Data-
Entity Set: {relation_name}
Relation Keywords List: {keywords_list}
#######
Format the keywords separated by ',' as below:
{keyword1,keyword2,keyword3,...,keywordN}
Output:
"#;

/// Prompt for splitting a query into high- and low-level keywords.
pub const KEYWORDS_EXTRACTION_PROMPT: &str = r#"---Role---

You identify high-level and low-level keywords in the user's query.

---Goal---

High-level keywords are overarching concepts or themes. Low-level keywords are specific entities, details or concrete terms.

---Instructions---

Output JSON with two keys:
- "high_level_keywords": list of overarching concepts or themes.
- "low_level_keywords": list of specific entities or details.

Example:
Query: "How do I find slow services with STATS?"
Output:
{
  "high_level_keywords": ["Query performance", "Aggregation"],
  "low_level_keywords": ["STATS", "query.duration", "services"]
}

-Real Data-
Query: {query}
Output:
"#;

/// System prompt for answering from context tables.
pub const RAG_RESPONSE_PROMPT: &str = r#"---Role---

You are a helpful assistant answering questions about the data in the tables provided.

---Goal---

Write a response of the target length and format that answers the user's question from the data tables, adding general knowledge only where relevant.
If you don't know the answer, say so. Do not make anything up.
Do not include information without supporting evidence in the tables.

---Target response length and format---

{response_type}

---Data tables---

{context_data}

Add sections and commentary as appropriate for the length and format. Style the response in markdown.
"#;

/// Answer returned when retrieval finds nothing.
pub const FAIL_RESPONSE: &str = "Sorry, I'm not able to provide an answer to that question.";

/// The full set of templates used by one pipeline.
///
/// Each field is a named template; there is no string-keyed lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplates {
    pub entity_extraction: String,
    pub entity_extraction_examples: String,
    pub entity_continue_extraction: String,
    pub entity_if_loop_extraction: String,
    pub summarize_entity_descriptions: String,
    pub summarize_entity_additional_properties: String,
    pub summarize_relation_descriptions: String,
    pub summarize_relation_keywords: String,
    pub keywords_extraction: String,
    pub rag_response: String,
    pub fail_response: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            entity_extraction: ENTITY_EXTRACTION_PROMPT.to_string(),
            entity_extraction_examples: EXTRACTION_EXAMPLE.to_string(),
            entity_continue_extraction: ENTITY_CONTINUE_EXTRACTION_PROMPT.to_string(),
            entity_if_loop_extraction: ENTITY_IF_LOOP_EXTRACTION_PROMPT.to_string(),
            summarize_entity_descriptions: SUMMARIZE_ENTITY_DESCRIPTIONS_PROMPT.to_string(),
            summarize_entity_additional_properties: SUMMARIZE_ENTITY_ADDITIONAL_PROPERTIES_PROMPT
                .to_string(),
            summarize_relation_descriptions: SUMMARIZE_RELATION_DESCRIPTIONS_PROMPT.to_string(),
            summarize_relation_keywords: SUMMARIZE_RELATION_KEYWORDS_PROMPT.to_string(),
            keywords_extraction: KEYWORDS_EXTRACTION_PROMPT.to_string(),
            rag_response: RAG_RESPONSE_PROMPT.to_string(),
            fail_response: FAIL_RESPONSE.to_string(),
        }
    }
}

impl PromptTemplates {
    /// Hash of every template, for invalidating cached extractions.
    pub fn prompt_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for template in [
            &self.entity_extraction,
            &self.entity_extraction_examples,
            &self.entity_continue_extraction,
            &self.entity_if_loop_extraction,
            &self.summarize_entity_descriptions,
            &self.summarize_entity_additional_properties,
            &self.summarize_relation_descriptions,
            &self.summarize_relation_keywords,
            &self.keywords_extraction,
            &self.rag_response,
            &self.fail_response,
        ] {
            hasher.update(template.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Format the extraction prompt for one text block.
    pub fn format_entity_extraction(&self, config: &HyperRagConfig, input_text: &str) -> String {
        let examples = with_delimiters(&self.entity_extraction_examples, config);
        with_delimiters(&self.entity_extraction, config)
            .replace("{language}", &config.language)
            .replace("{entity_types}", &config.entity_types.join(", "))
            .replace("{examples}", &examples)
            .replace("{input_text}", input_text)
    }

    pub fn format_entity_continue_extraction(&self) -> String {
        self.entity_continue_extraction.clone()
    }

    pub fn format_entity_if_loop_extraction(&self) -> String {
        self.entity_if_loop_extraction.clone()
    }

    pub fn format_summarize_entity_descriptions(
        &self,
        entity_name: &str,
        descriptions: &[String],
        max_tokens: usize,
    ) -> String {
        self.summarize_entity_descriptions
            .replace("{entity_name}", entity_name)
            .replace("{description_list}", &descriptions.join(GRAPH_FIELD_SEP))
            .replace("{max_tokens}", &max_tokens.to_string())
    }

    pub fn format_summarize_entity_additional_properties(
        &self,
        entity_name: &str,
        properties: &[String],
        max_tokens: usize,
    ) -> String {
        self.summarize_entity_additional_properties
            .replace("{entity_name}", entity_name)
            .replace("{additional_properties_list}", &properties.join(GRAPH_FIELD_SEP))
            .replace("{max_tokens}", &max_tokens.to_string())
    }

    pub fn format_summarize_relation_descriptions(
        &self,
        relation_name: &str,
        descriptions: &[String],
        max_tokens: usize,
    ) -> String {
        self.summarize_relation_descriptions
            .replace("{relation_name}", relation_name)
            .replace("{relation_description_list}", &descriptions.join(GRAPH_FIELD_SEP))
            .replace("{max_tokens}", &max_tokens.to_string())
    }

    pub fn format_summarize_relation_keywords(&self, relation_name: &str, keywords: &[String]) -> String {
        self.summarize_relation_keywords
            .replace("{relation_name}", relation_name)
            .replace("{keywords_list}", &keywords.join(", "))
    }

    pub fn format_keywords_extraction(&self, query: &str) -> String {
        self.keywords_extraction.replace("{query}", query)
    }

    pub fn format_rag_response(&self, response_type: &str, context_data: &str) -> String {
        self.rag_response
            .replace("{response_type}", response_type)
            .replace("{context_data}", context_data)
    }
}

fn with_delimiters(template: &str, config: &HyperRagConfig) -> String {
    template
        .replace("{tuple_delimiter}", &config.delimiters.tuple)
        .replace("{record_delimiter}", &config.delimiters.record)
        .replace("{completion_delimiter}", &config.delimiters.completion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_hash_is_consistent() {
        let hash1 = PromptTemplates::default().prompt_hash();
        let hash2 = PromptTemplates::default().prompt_hash();
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64); // SHA-256 hex

        let mut changed = PromptTemplates::default();
        changed.fail_response = "No answer.".to_string();
        assert_ne!(changed.prompt_hash(), hash1);
    }

    #[test]
    fn test_format_entity_extraction_fills_every_placeholder() {
        let config = HyperRagConfig::default().with_entity_types(["command", "use_case"]);
        let prompt = PromptTemplates::default().format_entity_extraction(&config, "STATS avg(x)");

        assert!(prompt.contains("Text: STATS avg(x)"));
        assert!(prompt.contains("[command, use_case]"));
        assert!(prompt.contains("(\"Entity\" | stats_command | esql_command"));
        assert!(prompt.contains("<|COMPLETE|>"));
        for placeholder in [
            "{language}",
            "{entity_types}",
            "{tuple_delimiter}",
            "{record_delimiter}",
            "{completion_delimiter}",
            "{examples}",
            "{input_text}",
        ] {
            assert!(!prompt.contains(placeholder), "unfilled {}", placeholder);
        }
    }

    #[test]
    fn test_format_summarize_includes_name_and_fragments() {
        let prompt = PromptTemplates::default().format_summarize_entity_descriptions(
            "stats_command",
            &["first".to_string(), "second".to_string()],
            500,
        );
        assert!(prompt.contains("Entity: stats_command"));
        assert!(prompt.contains("first<SEP>second"));
        assert!(prompt.contains("under 500 tokens"));
    }

    #[test]
    fn test_format_rag_response() {
        let prompt = PromptTemplates::default().format_rag_response("Single Paragraph", "id,\tentity");
        assert!(prompt.contains("Single Paragraph"));
        assert!(prompt.contains("id,\tentity"));
    }
}

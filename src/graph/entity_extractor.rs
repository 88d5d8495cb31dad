//! LLM-driven graph construction from text (C12): prompts the LLM for
//! entities and relationships as JSON, tolerating a markdown code-fence
//! wrapper, and hands the result to [`KnowledgeGraph`] which enforces I2 by
//! dropping relationships with a missing endpoint. Extraction is soft-fail,
//! matching C9/C10/C11's policy: a parse failure returns empty lists rather
//! than propagating the error.

use anyhow::Result;
use serde::Deserialize;

use crate::graph::KnowledgeGraph;
use crate::llm::{GenerationConfig, LLMProvider};

#[derive(Debug, Deserialize)]
struct ExtractedEntity {
    id: String,
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ExtractedRelationship {
    source: String,
    target: String,
    relation: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize, Default)]
struct ExtractionPayload {
    #[serde(default)]
    entities: Vec<ExtractedEntity>,
    #[serde(default)]
    relationships: Vec<ExtractedRelationship>,
}

const EXTRACTION_PROMPT: &str = r#"Extract entities and relationships from the text below. Respond with ONLY a JSON object (no commentary) of the form:
{"entities": [{"id": "kebab-case-slug", "name": "Display Name", "type": "PERSON|ORG|CONCEPT|...", "description": "one sentence"}], "relationships": [{"source": "entity-id", "target": "entity-id", "relation": "short verb phrase", "description": "one sentence"}]}

Text:
{text}

JSON:"#;

/// Prompt the LLM to extract entities/relationships from `text`, tagging
/// each with `document_id`/`owner_id`. Never errors: on any parse failure
/// this logs and returns empty lists.
pub async fn extract_from_text(
    llm: &dyn LLMProvider,
    text: &str,
    document_id: &str,
    owner_id: &str,
) -> (Vec<(String, String, String, String)>, Vec<(String, String, String, String)>) {
    let prompt = EXTRACTION_PROMPT.replace("{text}", text);
    let config = GenerationConfig {
        max_tokens: 1500,
        temperature: 0.1,
        top_p: 0.9,
        top_k: 40,
        repetition_penalty: 1.1,
        stop_sequences: vec![],
        seed: None,
    };

    let raw = match llm.generate(&prompt, &config).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(document_id = document_id, error = %e, "Entity extraction LLM call failed");
            return (Vec::new(), Vec::new());
        }
    };

    match parse_extraction(&raw) {
        Some(payload) => {
            let entities = payload
                .entities
                .into_iter()
                .map(|e| (e.id, e.name, e.entity_type, e.description))
                .collect();
            let relationships = payload
                .relationships
                .into_iter()
                .map(|r| (r.source, r.target, r.relation, r.description))
                .collect();
            let _ = owner_id; // tagging happens when the caller inserts into the graph
            (entities, relationships)
        }
        None => {
            tracing::warn!(document_id = document_id, "Entity extraction returned unparseable JSON");
            (Vec::new(), Vec::new())
        }
    }
}

/// Tolerates a ```json ... ``` fence around the payload, or stray text
/// before/after the JSON object.
fn parse_extraction(raw: &str) -> Option<ExtractionPayload> {
    let stripped = strip_code_fence(raw);
    if let Ok(payload) = serde_json::from_str::<ExtractionPayload>(stripped) {
        return Some(payload);
    }

    let start = stripped.find('{')?;
    let end = stripped.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&stripped[start..=end]).ok()
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(after_open) = trimmed.strip_prefix("```") {
        let after_open = after_open.strip_prefix("json").unwrap_or(after_open);
        if let Some(body) = after_open.strip_suffix("```") {
            return body.trim();
        }
        return after_open.trim();
    }
    trimmed
}

/// Extraction → graph insertion → community detection → summary generation,
/// as one unit of work under the caller's writer lock (§5). Entities get
/// `document_id`/`owner_id` tagged at insertion; relationships whose
/// endpoints didn't make it in are silently dropped by `add_relationship`.
pub async fn build_graph_for_document(
    graph: &mut KnowledgeGraph,
    llm: &dyn LLMProvider,
    text: &str,
    document_id: &str,
    owner_id: &str,
) -> Result<()> {
    let (entities, relationships) = extract_from_text(llm, text, document_id, owner_id).await;

    for (id, name, entity_type, description) in entities {
        graph.add_entity(&id, &name, &entity_type, &description, owner_id, document_id);
    }
    for (source, target, relation, description) in relationships {
        graph.add_relationship(&source, &target, &relation, &description);
    }

    graph.detect_communities();
    graph.generate_community_summaries(llm).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let raw = r#"{"entities": [{"id": "acme-corp", "name": "Acme Corp", "type": "ORG", "description": "A company"}], "relationships": []}"#;
        let payload = parse_extraction(raw).unwrap();
        assert_eq!(payload.entities.len(), 1);
        assert_eq!(payload.entities[0].id, "acme-corp");
    }

    #[test]
    fn strips_markdown_code_fence() {
        let raw = "```json\n{\"entities\": [], \"relationships\": []}\n```";
        let payload = parse_extraction(raw).unwrap();
        assert!(payload.entities.is_empty());
    }

    #[test]
    fn handles_stray_text_around_json() {
        let raw = "Here is the extraction:\n{\"entities\": [], \"relationships\": []}\nDone.";
        let payload = parse_extraction(raw).unwrap();
        assert!(payload.relationships.is_empty());
    }

    #[test]
    fn garbage_input_returns_none() {
        assert!(parse_extraction("not json at all").is_none());
    }
}

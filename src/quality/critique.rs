//! Self-Critique (C17): an LLM-based support/relevance/usefulness rating
//! that annotates the answer envelope with a confidence score. Never blocks
//! generation — a parse failure or LLM error degrades to a default
//! confidence rather than propagating (§4.17, `RetrievalSoftError`-style).

use std::sync::LazyLock;

use regex::Regex;

use crate::llm::{GenerationConfig, LLMProvider};

const DEFAULT_CONFIDENCE: f32 = 0.8;

#[derive(Debug, Clone)]
pub struct CritiqueResult {
    pub supported: bool,
    pub relevant: bool,
    pub useful: bool,
    pub confidence: f32,
    /// Raw LLM text, kept for the envelope's `critique` metadata field.
    pub raw: String,
}

impl CritiqueResult {
    fn fallback(raw: String) -> Self {
        Self { supported: true, relevant: true, useful: true, confidence: DEFAULT_CONFIDENCE, raw }
    }
}

static SUPPORTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)supported:\s*(yes|no|true|false)").expect("supported regex is valid"));
static RELEVANT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)relevant:\s*(yes|no|true|false)").expect("relevant regex is valid"));
static USEFUL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)useful:\s*(yes|no|true|false)").expect("useful regex is valid"));
static CONFIDENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)confidence:\s*([01](?:\.\d+)?)").expect("confidence regex is valid"));

const CRITIQUE_PROMPT: &str = r#"You are grading an answer against the question it responds to and the source context it was built from.

Question: {query}

Context used:
{context}

Answer:
{response}

Answer exactly these four lines, nothing else:
Supported: yes or no (is every claim backed by the context?)
Relevant: yes or no (does the answer address the question?)
Useful: yes or no (would this genuinely help the asker?)
Confidence: a number between 0 and 1"#;

/// Grades (query, response, top docs) on three binary questions plus a
/// confidence score. Defaults to [`DEFAULT_CONFIDENCE`] with all three
/// questions answered affirmatively on any LLM failure or unparseable
/// response, so a critique failure never tanks the overall quality score.
pub async fn self_critique(
    llm: &dyn LLMProvider,
    query: &str,
    response: &str,
    top_docs: &[String],
) -> CritiqueResult {
    let context = top_docs
        .iter()
        .take(3)
        .enumerate()
        .map(|(i, d)| format!("{}. {}", i + 1, truncate_chars(d, 500)))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = CRITIQUE_PROMPT
        .replace("{query}", query)
        .replace("{context}", &context)
        .replace("{response}", response);

    let config = GenerationConfig {
        max_tokens: 60,
        temperature: 0.0,
        top_p: 1.0,
        top_k: 1,
        repetition_penalty: 1.0,
        stop_sequences: vec![],
        seed: None,
    };

    let raw = match llm.generate(&prompt, &config).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(query = query, error = %e, "Self-critique LLM call failed, using default confidence");
            return CritiqueResult::fallback(String::new());
        }
    };

    parse_critique(&raw)
}

fn parse_critique(raw: &str) -> CritiqueResult {
    let supported = SUPPORTED_RE.captures(raw).map(|c| parse_bool(&c[1]));
    let relevant = RELEVANT_RE.captures(raw).map(|c| parse_bool(&c[1]));
    let useful = USEFUL_RE.captures(raw).map(|c| parse_bool(&c[1]));
    let confidence = CONFIDENCE_RE.captures(raw).and_then(|c| c[1].parse::<f32>().ok());

    match (supported, relevant, useful, confidence) {
        (Some(supported), Some(relevant), Some(useful), Some(confidence)) => CritiqueResult {
            supported,
            relevant,
            useful,
            confidence: confidence.clamp(0.0, 1.0),
            raw: raw.to_string(),
        },
        _ => {
            tracing::debug!(raw = raw, "Self-critique response unparseable, using default confidence");
            CritiqueResult::fallback(raw.to_string())
        }
    }
}

fn parse_bool(token: &str) -> bool {
    matches!(token.to_lowercase().as_str(), "yes" | "true")
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_response() {
        let raw = "Supported: yes\nRelevant: yes\nUseful: no\nConfidence: 0.65";
        let result = parse_critique(raw);
        assert!(result.supported);
        assert!(result.relevant);
        assert!(!result.useful);
        assert_eq!(result.confidence, 0.65);
    }

    #[test]
    fn unparseable_response_falls_back_to_default() {
        let result = parse_critique("I'm not sure how to grade this.");
        assert_eq!(result.confidence, DEFAULT_CONFIDENCE);
        assert!(result.supported);
    }

    #[test]
    fn confidence_is_clamped_to_unit_interval() {
        let raw = "Supported: yes\nRelevant: yes\nUseful: yes\nConfidence: 1.5";
        let result = parse_critique(raw);
        assert!(result.confidence <= 1.0);
    }

    #[test]
    fn accepts_true_false_tokens() {
        let raw = "Supported: true\nRelevant: false\nUseful: true\nConfidence: 0.9";
        let result = parse_critique(raw);
        assert!(result.supported);
        assert!(!result.relevant);
    }
}

//! Retrieval Evaluator & CRAG Controller (C9): grades retrieved evidence and
//! falls back to web search when the grade is weak.
//!
//! The evaluator's fast path short-circuits on a strong fused score without
//! an LLM call; the LLM-banded fallback only runs when that score is
//! ambiguous. This core's fused score is a normalized RRF-style value in
//! `(0, ~1]` where *higher is better* — not a distance metric — so the
//! thresholds below are derived proportionally from `correct_threshold`
//! rather than the source's numeric 0.5/1.2/1.7 bands (§9 open question).

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::collaborators::{WebSearchProvider, WebSearchResult};
use crate::llm::{GenerationConfig, LLMProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetrievalGrade {
    Correct,
    Ambiguous,
    Incorrect,
}

impl RetrievalGrade {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalGrade::Correct => "CORRECT",
            RetrievalGrade::Ambiguous => "AMBIGUOUS",
            RetrievalGrade::Incorrect => "INCORRECT",
        }
    }
}

/// A piece of evidence generic enough to come from local retrieval or web
/// search, so CRAG can union/replace across both sources uniformly.
#[derive(Debug, Clone)]
pub struct Evidence {
    pub content: String,
    pub source_label: String,
    pub score: f32,
}

pub struct RetrievalEvaluator {
    /// Fused-score fast path: at or above this, grade CORRECT with no LLM call.
    pub correct_threshold: f32,
}

impl Default for RetrievalEvaluator {
    fn default() -> Self {
        Self { correct_threshold: 0.5 }
    }
}

static GRADE_TOKEN_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?i)\b(CORRECT|AMBIGUOUS|INCORRECT)\b").expect("grade regex is valid"));

impl RetrievalEvaluator {
    pub fn new(correct_threshold: f32) -> Self {
        Self { correct_threshold }
    }

    /// Grade the best fused score / top snippets. Never errors: an LLM
    /// failure falls through to the score-banded heuristic (`RetrievalSoftError`, §7).
    pub async fn evaluate(
        &self,
        llm: &dyn LLMProvider,
        query: &str,
        top_snippets: &[String],
        best_fused_score: f32,
    ) -> RetrievalGrade {
        if best_fused_score >= self.correct_threshold {
            return RetrievalGrade::Correct;
        }

        if top_snippets.is_empty() {
            return self.score_band(best_fused_score);
        }

        let snippets: Vec<String> = top_snippets
            .iter()
            .take(3)
            .map(|s| truncate_chars(s, 500))
            .collect();

        let prompt = format!(
            "Evaluate whether the following snippets correctly, ambiguously, or incorrectly answer the question. Respond with exactly one word: CORRECT, AMBIGUOUS, or INCORRECT.\n\nQuestion: {}\n\nSnippets:\n{}\n\nVerdict:",
            query,
            snippets
                .iter()
                .enumerate()
                .map(|(i, s)| format!("{}. {}", i + 1, s))
                .collect::<Vec<_>>()
                .join("\n")
        );

        let config = GenerationConfig {
            max_tokens: 10,
            temperature: 0.0,
            top_p: 1.0,
            top_k: 1,
            repetition_penalty: 1.0,
            stop_sequences: vec![],
            seed: None,
        };

        match llm.generate(&prompt, &config).await {
            Ok(text) => match GRADE_TOKEN_RE.captures(&text) {
                Some(caps) => match caps[1].to_uppercase().as_str() {
                    "CORRECT" => RetrievalGrade::Correct,
                    "AMBIGUOUS" => RetrievalGrade::Ambiguous,
                    "INCORRECT" => RetrievalGrade::Incorrect,
                    _ => self.score_band(best_fused_score),
                },
                None => self.score_band(best_fused_score),
            },
            Err(e) => {
                tracing::warn!(query = query, error = %e, "CRAG evaluator LLM call failed, using score band");
                self.score_band(best_fused_score)
            }
        }
    }

    /// Proportional fallback bands below `correct_threshold`: the top half
    /// of the sub-threshold range is ambiguous, the bottom half incorrect.
    fn score_band(&self, score: f32) -> RetrievalGrade {
        let midpoint = self.correct_threshold * 0.5;
        if score >= midpoint {
            RetrievalGrade::Ambiguous
        } else {
            RetrievalGrade::Incorrect
        }
    }
}

pub struct CragOutcome {
    pub evidence: Vec<Evidence>,
    pub grade: RetrievalGrade,
    pub used_web_search: bool,
}

/// Maps a grade to an action: CORRECT keeps retrieved docs untouched;
/// AMBIGUOUS unions them with web-search results; INCORRECT replaces them
/// entirely. A web-search provider failure degrades to empty web results
/// (`WebSearchError`, §7) rather than failing the request.
pub async fn run_crag(
    evaluator: &RetrievalEvaluator,
    llm: &dyn LLMProvider,
    web_search: &dyn WebSearchProvider,
    query: &str,
    retrieved: Vec<Evidence>,
    best_fused_score: f32,
) -> CragOutcome {
    let top_snippets: Vec<String> = retrieved.iter().take(3).map(|e| e.content.clone()).collect();
    let grade = evaluator.evaluate(llm, query, &top_snippets, best_fused_score).await;

    match grade {
        RetrievalGrade::Correct => CragOutcome { evidence: retrieved, grade, used_web_search: false },
        RetrievalGrade::Ambiguous => {
            let web = fetch_web(web_search, query).await;
            let used_web_search = !web.is_empty();
            let mut evidence = retrieved;
            evidence.extend(web);
            CragOutcome { evidence, grade, used_web_search }
        }
        RetrievalGrade::Incorrect => {
            let web = fetch_web(web_search, query).await;
            let used_web_search = !web.is_empty();
            CragOutcome { evidence: web, grade, used_web_search }
        }
    }
}

async fn fetch_web(web_search: &dyn WebSearchProvider, query: &str) -> Vec<Evidence> {
    match web_search.search(query, 5).await {
        Ok(results) => results.into_iter().map(web_result_to_evidence).collect(),
        Err(e) => {
            tracing::warn!(query = query, error = %e, "Web search failed, treating as empty results");
            Vec::new()
        }
    }
}

fn web_result_to_evidence(r: WebSearchResult) -> Evidence {
    Evidence {
        content: r.content,
        source_label: if r.title.is_empty() { r.url.clone() } else { r.title },
        score: r.score,
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_band_splits_ambiguous_from_incorrect() {
        let evaluator = RetrievalEvaluator::new(0.5);
        assert_eq!(evaluator.score_band(0.4), RetrievalGrade::Ambiguous);
        assert_eq!(evaluator.score_band(0.1), RetrievalGrade::Incorrect);
    }

    #[test]
    fn truncate_chars_respects_bound() {
        let long = "a".repeat(1000);
        assert_eq!(truncate_chars(&long, 500).len(), 500);
    }
}

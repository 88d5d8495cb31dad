//! Answer Refiner (C15): a bounded second-pass rewrite that only takes
//! effect when it demonstrably improves the draft without dropping facts.

use std::sync::LazyLock;

use regex::Regex;

use crate::llm::{GenerationConfig, LLMProvider};
use crate::quality::density::FILLER_PHRASES;

use super::schema::{citation_tokens, StructureScore};

const GENERALIZATION_MARKERS: &[&str] = &[
    "in general",
    "typically",
    "most experts agree",
    "generally speaking",
    "as a general rule",
];

static NUMERIC_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:[.,]\d+)*%?").expect("numeric literal regex is valid"));

const REFINER_PROMPT: &str = "Rewrite the following answer to remove filler and verbose phrasing and improve flow. \
You must preserve every fact, every number, and every [Source: ...] citation exactly as written. \
Do not add new claims or generalizations. Return only the rewritten answer.\n\nOriginal answer:\n{draft}";

#[derive(Debug, Clone, Default)]
pub struct RefinementDiff {
    pub words_removed: i64,
    pub fillers_removed: usize,
    pub headings_added: bool,
    pub bullets_added: bool,
}

#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    pub text: String,
    pub applied: bool,
    pub diff: Option<RefinementDiff>,
}

/// Whether the draft needs refinement at all (§4.15): any sub-score below
/// 0.7, or a long draft with weak directness, or a mean below 0.85.
pub fn needs_refinement(draft: &str, score: &StructureScore) -> bool {
    let word_count = draft.split_whitespace().count();
    let any_weak = score.directness < 0.7
        || score.structure < 0.7
        || score.actionability < 0.7
        || score.length < 0.7;
    let long_and_undirect = word_count > 300 && score.directness < 0.7;
    any_weak || long_and_undirect || score.overall() < 0.85
}

/// Runs the refiner LLM call and applies the acceptance criteria of §4.15 /
/// I6 / P4. On any LLM failure, or on a rejected rewrite, the draft is kept
/// unchanged (`ValidationReject`, §7).
pub async fn refine_answer(
    llm: &dyn LLMProvider,
    draft: &str,
    score: &StructureScore,
) -> RefinementOutcome {
    if !needs_refinement(draft, score) {
        return RefinementOutcome { text: draft.to_string(), applied: false, diff: None };
    }

    let prompt = REFINER_PROMPT.replace("{draft}", draft);
    let config = GenerationConfig {
        max_tokens: 1024,
        temperature: 0.2,
        top_p: 0.95,
        top_k: 40,
        repetition_penalty: 1.1,
        stop_sequences: vec![],
        seed: None,
    };

    let candidate = match llm.generate(&prompt, &config).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "Refiner LLM call failed, keeping draft");
            return RefinementOutcome { text: draft.to_string(), applied: false, diff: None };
        }
    };

    if accept_refinement(draft, &candidate) {
        let diff = compute_diff(draft, &candidate);
        tracing::info!(
            words_removed = diff.words_removed,
            fillers_removed = diff.fillers_removed,
            "Refinement accepted"
        );
        RefinementOutcome { text: candidate, applied: true, diff: Some(diff) }
    } else {
        tracing::info!("Refinement rejected, keeping draft");
        RefinementOutcome { text: draft.to_string(), applied: false, diff: None }
    }
}

/// The four acceptance gates of §4.15/I6: length bound, citation superset,
/// numeric-literal preservation ratio, no newly introduced generalization markers.
fn accept_refinement(draft: &str, candidate: &str) -> bool {
    let draft_words = draft.split_whitespace().count().max(1);
    let candidate_words = candidate.split_whitespace().count();
    if candidate_words as f32 > draft_words as f32 * 1.3 {
        return false;
    }

    let draft_citations: Vec<String> = citation_tokens(draft);
    let candidate_citations: Vec<String> = citation_tokens(candidate);
    if !draft_citations.iter().all(|c| candidate_citations.contains(c)) {
        return false;
    }

    if numeric_preservation_ratio(draft, candidate) < 0.7 {
        return false;
    }

    let candidate_lower = candidate.to_lowercase();
    let draft_lower = draft.to_lowercase();
    let introduced_marker = GENERALIZATION_MARKERS
        .iter()
        .any(|m| candidate_lower.contains(m) && !draft_lower.contains(m));
    if introduced_marker {
        return false;
    }

    true
}

fn numeric_preservation_ratio(draft: &str, candidate: &str) -> f32 {
    let draft_numbers: Vec<&str> = NUMERIC_LITERAL_RE.find_iter(draft).map(|m| m.as_str()).collect();
    if draft_numbers.is_empty() {
        return 1.0;
    }
    let candidate_numbers: std::collections::HashSet<&str> =
        NUMERIC_LITERAL_RE.find_iter(candidate).map(|m| m.as_str()).collect();
    let preserved = draft_numbers.iter().filter(|n| candidate_numbers.contains(*n)).count();
    preserved as f32 / draft_numbers.len() as f32
}

fn compute_diff(draft: &str, candidate: &str) -> RefinementDiff {
    let draft_words = draft.split_whitespace().count() as i64;
    let candidate_words = candidate.split_whitespace().count() as i64;
    let headings_added = !draft.contains('#') && candidate.contains('#');
    let bullets_added = !draft.trim_start().starts_with('-') && candidate.lines().any(|l| l.trim_start().starts_with('-'));
    let fillers_removed = count_fillers_removed(draft, candidate);

    RefinementDiff {
        words_removed: (draft_words - candidate_words).max(0),
        fillers_removed,
        headings_added,
        bullets_added,
    }
}

/// Counts, per filler phrase, how many fewer occurrences the candidate has
/// than the draft — phrases the rewrite introduced don't count as "removed".
fn count_fillers_removed(draft: &str, candidate: &str) -> usize {
    let draft_lower = draft.to_lowercase();
    let candidate_lower = candidate.to_lowercase();
    FILLER_PHRASES
        .iter()
        .map(|phrase| {
            let before = draft_lower.matches(phrase).count();
            let after = candidate_lower.matches(phrase).count();
            before.saturating_sub(after)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(directness: f32, structure: f32, actionability: f32, length: f32) -> StructureScore {
        StructureScore { directness, structure, actionability, length }
    }

    #[test]
    fn weak_sub_score_triggers_refinement() {
        assert!(needs_refinement("draft text", &score(0.5, 1.0, 1.0, 1.0)));
    }

    #[test]
    fn strong_scores_skip_refinement() {
        assert!(!needs_refinement("draft text", &score(1.0, 1.0, 1.0, 1.0)));
    }

    #[test]
    fn accepts_when_citations_and_numbers_preserved() {
        let draft = "Revenue grew 42% according to [Source: report.pdf].";
        let candidate = "Revenue grew 42% per [Source: report.pdf].";
        assert!(accept_refinement(draft, candidate));
    }

    #[test]
    fn rejects_when_citation_dropped() {
        let draft = "See [Source: a.pdf] for details about 42%.";
        let candidate = "See the details about 42%.";
        assert!(!accept_refinement(draft, candidate));
    }

    #[test]
    fn rejects_when_too_long() {
        let draft = "short draft";
        let candidate = "a ".repeat(20);
        assert!(!accept_refinement(draft, &candidate));
    }

    #[test]
    fn rejects_when_numeric_literals_lost() {
        let draft = "The value was 10, 20, 30, and 40 across four quarters.";
        let candidate = "The value was 10 across four quarters.";
        assert!(!accept_refinement(draft, candidate));
    }

    #[test]
    fn rejects_newly_introduced_generalization_marker() {
        let draft = "The feature works as described in [Source: a.pdf].";
        let candidate = "Typically, the feature works as described in [Source: a.pdf].";
        assert!(!accept_refinement(draft, candidate));
    }

    #[test]
    fn numeric_preservation_ratio_handles_no_numbers() {
        assert_eq!(numeric_preservation_ratio("no numbers here", "still none"), 1.0);
    }
}

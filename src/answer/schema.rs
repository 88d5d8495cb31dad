//! Answer Schema & Validator (C14): a structural contract keyed by
//! complexity, and a scorer that checks a draft against it.

use std::sync::LazyLock;

use regex::Regex;

use crate::rag::AnswerComplexity;

/// Opening phrases that read as filler rather than a direct answer.
const FORBIDDEN_OPENINGS: &[&str] = &[
    "i think",
    "i believe",
    "it seems",
    "let me",
    "sure,",
    "sure!",
    "certainly,",
    "certainly!",
    "great question",
    "as an ai",
    "i'd be happy to",
    "i would be happy to",
];

const NEXT_STEPS_CUES: &[&str] = &[
    "next steps",
    "next step",
    "you can",
    "you could",
    "to get started",
    "recommend",
    "suggestion",
];

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(#{1,6}\s|\*\*[^*]+\*\*\s*$)").expect("heading regex is valid"));
static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*([-*]|\d+\.)\s+").expect("bullet regex is valid"));
static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[Source:\s*[^\]]+\]").expect("citation regex is valid"));

/// A complexity-keyed structural contract (§4.14): every schema mandates the
/// same four structural checks, differing only in target length band and
/// whether a next-steps section is expected at all.
pub struct AnswerSchema {
    pub complexity: AnswerComplexity,
    pub min_words: usize,
    pub max_words: usize,
    pub requires_next_steps: bool,
}

impl AnswerSchema {
    pub fn for_complexity(complexity: AnswerComplexity) -> Self {
        match complexity {
            AnswerComplexity::Simple => Self {
                complexity,
                min_words: 50,
                max_words: 150,
                requires_next_steps: false,
            },
            AnswerComplexity::SingleHop => Self {
                complexity,
                min_words: 150,
                max_words: 450,
                requires_next_steps: true,
            },
            AnswerComplexity::MultiHop => Self {
                complexity,
                min_words: 300,
                max_words: 1000,
                requires_next_steps: true,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StructureScore {
    pub directness: f32,
    pub structure: f32,
    pub actionability: f32,
    pub length: f32,
}

impl StructureScore {
    /// Overall structure score is the mean of the four sub-dimensions (§4.14).
    pub fn overall(&self) -> f32 {
        (self.directness + self.structure + self.actionability + self.length) / 4.0
    }
}

/// Scores a draft against its complexity's schema. Pure and deterministic
/// (P8): same text and complexity always yield the same score.
pub fn validate_answer_structure(text: &str, complexity: AnswerComplexity) -> StructureScore {
    let schema = AnswerSchema::for_complexity(complexity);
    let word_count = text.split_whitespace().count();

    StructureScore {
        directness: score_directness(text),
        structure: score_structure(text),
        actionability: score_actionability(text, &schema),
        length: score_length(word_count, &schema),
    }
}

fn score_directness(text: &str) -> f32 {
    let head: String = text.chars().take(100).collect::<String>().to_lowercase();
    if FORBIDDEN_OPENINGS.iter().any(|p| head.contains(p)) {
        0.0
    } else {
        1.0
    }
}

fn score_structure(text: &str) -> f32 {
    let has_heading = HEADING_RE.is_match(text);
    let has_bullets = BULLET_RE.is_match(text);
    match (has_heading, has_bullets) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.6,
        (false, false) => 0.0,
    }
}

fn score_actionability(text: &str, schema: &AnswerSchema) -> f32 {
    if !schema.requires_next_steps {
        return 1.0;
    }
    let lower = text.to_lowercase();
    if NEXT_STEPS_CUES.iter().any(|c| lower.contains(c)) {
        1.0
    } else {
        0.0
    }
}

/// Within band scores 1.0; outside it, a linear penalty proportional to how
/// far past the nearer boundary the length falls, floored at 0.
fn score_length(word_count: usize, schema: &AnswerSchema) -> f32 {
    if word_count >= schema.min_words && word_count <= schema.max_words {
        return 1.0;
    }
    let (distance, band) = if word_count < schema.min_words {
        (schema.min_words - word_count, schema.min_words.max(1))
    } else {
        (word_count - schema.max_words, schema.max_words.max(1))
    };
    (1.0 - distance as f32 / band as f32).max(0.0)
}

/// Whether a citation token is present anywhere in the text — used by C14's
/// "source citations when evidence exists" rule and by the refiner's
/// superset check (§4.15).
pub fn citation_tokens(text: &str) -> Vec<String> {
    CITATION_RE.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_opening_scores_full_directness() {
        let text = "Engunity AI is a retrieval-augmented assistant. ".repeat(20);
        let score = validate_answer_structure(&text, AnswerComplexity::SingleHop);
        assert_eq!(score.directness, 1.0);
    }

    #[test]
    fn filler_opening_scores_zero_directness() {
        let text = "Let me explain how this works in detail across the system.".repeat(10);
        let score = validate_answer_structure(&text, AnswerComplexity::SingleHop);
        assert_eq!(score.directness, 0.0);
    }

    #[test]
    fn heading_and_bullets_score_full_structure() {
        let text = "## Overview\n- point one\n- point two\n";
        assert_eq!(score_structure(text), 1.0);
    }

    #[test]
    fn no_structure_markers_scores_zero() {
        assert_eq!(score_structure("just a plain paragraph with no markup"), 0.0);
    }

    #[test]
    fn simple_schema_has_no_next_steps_requirement() {
        let schema = AnswerSchema::for_complexity(AnswerComplexity::Simple);
        assert!(!schema.requires_next_steps);
        assert_eq!(score_actionability("anything at all", &schema), 1.0);
    }

    #[test]
    fn single_hop_without_next_steps_cue_scores_zero_actionability() {
        let schema = AnswerSchema::for_complexity(AnswerComplexity::SingleHop);
        assert_eq!(score_actionability("a description with no cue words", &schema), 0.0);
    }

    #[test]
    fn length_within_band_scores_full() {
        let schema = AnswerSchema::for_complexity(AnswerComplexity::Simple);
        assert_eq!(score_length(100, &schema), 1.0);
    }

    #[test]
    fn length_far_outside_band_is_penalized() {
        let schema = AnswerSchema::for_complexity(AnswerComplexity::Simple);
        let score = score_length(5, &schema);
        assert!(score < 1.0);
        assert!(score >= 0.0);
    }

    #[test]
    fn validation_is_deterministic() {
        let text = "## Heading\nEngunity AI retrieves context. - bullet one. you can try it next.";
        let a = validate_answer_structure(text, AnswerComplexity::SingleHop);
        let b = validate_answer_structure(text, AnswerComplexity::SingleHop);
        assert_eq!(a.overall(), b.overall());
    }

    #[test]
    fn extracts_citation_tokens() {
        let text = "See [Source: a.pdf] and also [Source: b.pdf] for details.";
        let tokens = citation_tokens(text);
        assert_eq!(tokens, vec!["[Source: a.pdf]".to_string(), "[Source: b.pdf]".to_string()]);
    }
}

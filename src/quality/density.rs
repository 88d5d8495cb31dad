//! Density & Language Optimizer (C16): two independent heuristic scorers
//! that feed the overall quality score (§4.18) — `density_score` measures
//! how much of the draft is filler versus signal, `naturalness_score`
//! measures how un-LLM-like the prose reads.

use std::sync::LazyLock;

use regex::Regex;

/// Closed list of filler phrases that add no information. Counted toward
/// `density_score`'s filler-word fraction, and reused by the refiner's diff
/// (§4.15) to count fillers removed by a rewrite.
pub(crate) const FILLER_PHRASES: &[&str] = &[
    "in order to",
    "it is important to note that",
    "it's important to note that",
    "it is worth noting that",
    "it's worth noting that",
    "needless to say",
    "as previously mentioned",
    "as mentioned earlier",
    "at the end of the day",
    "when it comes to",
    "due to the fact that",
    "in the event that",
    "for all intents and purposes",
    "the fact of the matter is",
    "it goes without saying",
    "with that being said",
    "in today's day and age",
    "just to clarify",
    "it should be noted that",
    "in conclusion",
];

/// Verbose constructs with a terser rewrite. Used for the verbose-construct
/// count in [`DensityReport`]; the rewrite itself isn't applied automatically
/// (the refiner, not this scorer, rewrites text).
const VERBOSE_REWRITES: &[(&str, &str)] = &[
    ("in order to", "to"),
    ("due to the fact that", "because"),
    ("in the event that", "if"),
    ("a large number of", "many"),
    ("a majority of", "most"),
    ("in spite of the fact that", "although"),
    ("with regard to", "about"),
    ("in the near future", "soon"),
    ("at this point in time", "now"),
    ("for the purpose of", "for"),
    ("in the process of", "currently"),
    ("it is possible that", "maybe"),
    ("has the ability to", "can"),
];

const LONG_SENTENCE_WORDS: usize = 30;
const LONG_PARAGRAPH_WORDS: usize = 150;

/// AI-ish openings, checked against the first ~150 characters only — these
/// read as filler precisely because they precede the actual content.
const AI_OPENINGS: &[&str] = &[
    "as an ai",
    "i'm here to help",
    "i am here to help",
    "i'd be happy to",
    "i would be happy to",
    "sure, i can help",
    "great question",
    "let me explain",
    "let me break this down",
];

/// Meta-commentary about the response itself, checked anywhere in the text.
const META_COMMENTARY: &[&str] = &[
    "in this response",
    "in this answer",
    "let me know if you have any questions",
    "let me know if you need anything else",
    "i hope this helps",
    "feel free to ask",
    "as you can see",
];

/// Weak hedges — stacked qualifiers that dilute a claim rather than
/// expressing genuine uncertainty about a single fact.
const WEAK_HEDGES: &[&str] = &[
    "might possibly",
    "could potentially",
    "it's possible that",
    "it is possible that",
    "perhaps maybe",
    "may or may not",
];

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+").expect("word regex is valid"));

#[derive(Debug, Clone, Copy, Default)]
pub struct DensityReport {
    pub density_score: f32,
    pub filler_phrase_count: usize,
    pub verbose_construct_count: usize,
    pub long_sentence_count: usize,
    pub long_paragraph_count: usize,
}

/// `density_score = max(0, 1 - filler_words / total_words)` (§4.16). Filler
/// word count sums the word length of every matched filler phrase.
pub fn analyze_density(text: &str) -> DensityReport {
    let lower = text.to_lowercase();
    let total_words = WORD_RE.find_iter(text).count().max(1);

    let mut filler_phrase_count = 0usize;
    let mut filler_words = 0usize;
    for phrase in FILLER_PHRASES {
        let hits = lower.matches(phrase).count();
        if hits > 0 {
            filler_phrase_count += hits;
            filler_words += hits * phrase.split_whitespace().count();
        }
    }

    let verbose_construct_count = VERBOSE_REWRITES
        .iter()
        .map(|(pattern, _)| lower.matches(pattern).count())
        .sum();

    let long_sentence_count = split_sentences(text)
        .iter()
        .filter(|s| s.split_whitespace().count() > LONG_SENTENCE_WORDS)
        .count();

    let long_paragraph_count = text
        .split("\n\n")
        .filter(|p| p.split_whitespace().count() > LONG_PARAGRAPH_WORDS)
        .count();

    let density_score = (1.0 - filler_words as f32 / total_words as f32).max(0.0);

    DensityReport {
        density_score,
        filler_phrase_count,
        verbose_construct_count,
        long_sentence_count,
        long_paragraph_count,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalnessReport {
    pub naturalness_score: f32,
    pub violation_count: usize,
}

/// Naturalness: counts AI-ish openings (first ~150 chars), meta-commentary,
/// and weak hedges anywhere in the text. Each violation costs 5%, floored at
/// 0.5 (§4.16) — unlike density, naturalness never reads as fully broken.
pub fn analyze_naturalness(text: &str) -> NaturalnessReport {
    let lower = text.to_lowercase();
    let head: String = lower.chars().take(150).collect();

    let mut violation_count = AI_OPENINGS.iter().filter(|p| head.contains(*p)).count();
    violation_count += META_COMMENTARY.iter().filter(|p| lower.contains(*p)).count();
    violation_count += WEAK_HEDGES.iter().filter(|p| lower.contains(*p)).count();

    let naturalness_score = (1.0 - 0.05 * violation_count as f32).max(0.5);

    NaturalnessReport { naturalness_score, violation_count }
}

/// Splits on a `.`/`!`/`?` followed by whitespace and then an uppercase
/// letter or digit. `regex` (the only regex dependency here) doesn't support
/// look-around, so the boundary is found by hand rather than with a pattern
/// like `(?<=[.!?])\s+(?=[A-Z\d])`.
fn split_sentences(text: &str) -> Vec<&str> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut splits = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (_, ch) = chars[i];
        if ch == '.' || ch == '!' || ch == '?' {
            let ws_start = i + 1;
            let mut j = ws_start;
            while j < chars.len() && chars[j].1.is_whitespace() {
                j += 1;
            }
            if j > ws_start && j < chars.len() {
                let next_ch = chars[j].1;
                if next_ch.is_uppercase() || next_ch.is_ascii_digit() {
                    splits.push(chars[j].0);
                    i = j;
                    continue;
                }
            }
        }
        i += 1;
    }

    let mut start = 0;
    let mut result = Vec::with_capacity(splits.len() + 1);
    for pos in splits {
        result.push(text[start..pos].trim());
        start = pos;
    }
    result.push(text[start..].trim());
    result.into_iter().filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_scores_full_density() {
        let report = analyze_density("Engunity AI retrieves context and generates grounded answers.");
        assert_eq!(report.density_score, 1.0);
        assert_eq!(report.filler_phrase_count, 0);
    }

    #[test]
    fn filler_heavy_text_lowers_density_score() {
        let text = "In order to understand this, it is important to note that, needless to say, this matters.";
        let report = analyze_density(text);
        assert!(report.density_score < 1.0);
        assert!(report.filler_phrase_count >= 3);
    }

    #[test]
    fn long_sentence_is_counted() {
        let long_sentence = "word ".repeat(35) + ".";
        let report = analyze_density(&long_sentence);
        assert_eq!(report.long_sentence_count, 1);
    }

    #[test]
    fn clean_text_scores_full_naturalness() {
        let report = analyze_naturalness("Engunity AI is a retrieval-augmented assistant.");
        assert_eq!(report.naturalness_score, 1.0);
        assert_eq!(report.violation_count, 0);
    }

    #[test]
    fn ai_ish_opening_is_penalized() {
        let report = analyze_naturalness("As an AI, I can tell you that the answer is 42.");
        assert!(report.violation_count >= 1);
        assert!(report.naturalness_score < 1.0);
    }

    #[test]
    fn naturalness_score_floors_at_half() {
        let text = "As an AI, I'm here to help. In this response, let me know if you have any questions. It might possibly help, it's possible that it won't, may or may not work.";
        let report = analyze_naturalness(text);
        assert!(report.naturalness_score >= 0.5);
    }

    #[test]
    fn verbose_construct_is_counted() {
        let report = analyze_density("Due to the fact that it rained, we stayed in order to stay dry.");
        assert_eq!(report.verbose_construct_count, 2);
    }
}

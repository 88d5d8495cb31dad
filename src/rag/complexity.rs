//! Complexity classification for the pipeline orchestrator's strategy dispatch.
//!
//! Wraps the existing intent classifier: the intent taxonomy already
//! distinguishes chit-chat from factual lookups from multi-hop comparisons,
//! this just collapses that into the three-tier complexity the orchestrator
//! routes on.

use serde::{Deserialize, Serialize};

use super::retrieval_decision::{IntentClassifier, QueryIntent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerComplexity {
    Simple,
    SingleHop,
    MultiHop,
}

impl AnswerComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerComplexity::Simple => "simple",
            AnswerComplexity::SingleHop => "single_hop",
            AnswerComplexity::MultiHop => "multi_hop",
        }
    }
}

pub struct ComplexityClassifier {
    intent_classifier: IntentClassifier,
}

impl ComplexityClassifier {
    pub fn new() -> Self {
        Self {
            intent_classifier: IntentClassifier::new(),
        }
    }

    /// Rule-based fast path mirroring the original classifier: no wh-words
    /// and under 10 tokens short-circuits to Simple before intent
    /// classification is even consulted, since such queries are almost
    /// always chit-chat or a direct factual ask answerable without
    /// retrieval context.
    pub fn classify(&self, query: &str) -> AnswerComplexity {
        let token_count = query.split_whitespace().count();
        let has_wh_word = ["what", "why", "how", "when", "where", "who", "which"]
            .iter()
            .any(|w| query.to_lowercase().split_whitespace().any(|t| t == *w));

        if !has_wh_word && token_count < 10 {
            match self.intent_classifier.classify(query) {
                QueryIntent::Greeting
                | QueryIntent::SimpleAcknowledgment
                | QueryIntent::MetaQuestion
                | QueryIntent::Clarification
                | QueryIntent::FollowUpRequest
                | QueryIntent::CreativeGeneration
                | QueryIntent::Calculation => return AnswerComplexity::Simple,
                _ => {}
            }
        }

        match self.intent_classifier.classify(query) {
            QueryIntent::Greeting
            | QueryIntent::SimpleAcknowledgment
            | QueryIntent::MetaQuestion
            | QueryIntent::Clarification
            | QueryIntent::CreativeGeneration => AnswerComplexity::Simple,

            QueryIntent::ComparativeAnalysis
            | QueryIntent::AggregationQuery
            | QueryIntent::TemporalQuery
            | QueryIntent::MultiHopReasoning => AnswerComplexity::MultiHop,

            QueryIntent::FactualLookup
            | QueryIntent::DocumentSearch
            | QueryIntent::DefinitionQuery
            | QueryIntent::FilteredSearch
            | QueryIntent::FollowUpRequest
            | QueryIntent::ExampleCreation
            | QueryIntent::Calculation
            | QueryIntent::GeneralKnowledge
            | QueryIntent::CurrentEvents
            | QueryIntent::RealTimeInfo => AnswerComplexity::SingleHop,
        }
    }
}

impl Default for ComplexityClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_greeting_is_simple() {
        let c = ComplexityClassifier::new();
        assert_eq!(c.classify("hi there"), AnswerComplexity::Simple);
    }

    #[test]
    fn comparison_is_multi_hop() {
        let c = ComplexityClassifier::new();
        assert_eq!(
            c.classify("compare the difference between plan A and plan B"),
            AnswerComplexity::MultiHop
        );
    }

    #[test]
    fn plain_factual_question_is_single_hop() {
        let c = ComplexityClassifier::new();
        assert_eq!(
            c.classify("what is the capital of France"),
            AnswerComplexity::SingleHop
        );
    }
}

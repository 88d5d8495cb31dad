//! Query intent taxonomy feeding the complexity classifier (C7).
//!
//! Rule-based: a query is matched against closed keyword sets in priority
//! order (greeting, acknowledgment, meta-question, ... down to a default
//! factual/general-knowledge fallback). No LLM call, so this runs on every
//! query before anything more expensive is considered.

use std::sync::LazyLock;

static ARITHMETIC_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\d\s*[+\-*/]\s*\d").expect("arithmetic regex is valid")
});
static YEAR_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\b(19|20)\d{2}\b").expect("year regex is valid")
});

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub enum QueryIntent {
    // No retrieval needed
    Greeting,
    MetaQuestion,
    Clarification,
    SimpleAcknowledgment,
    FollowUpRequest, // "show me that in a chart", "do the same for X"

    // Simple retrieval
    FactualLookup,
    DocumentSearch,
    DefinitionQuery,

    // Complex retrieval
    ComparativeAnalysis,
    AggregationQuery,
    FilteredSearch,
    MultiHopReasoning,
    TemporalQuery,

    // May not need retrieval
    Calculation,
    GeneralKnowledge,

    // No retrieval needed - generative tasks
    CreativeGeneration,
    ExampleCreation,

    // Web search needed
    CurrentEvents,
    RealTimeInfo,
}

pub struct IntentClassifier {}

impl IntentClassifier {
    pub fn new() -> Self {
        Self {}
    }

    pub fn classify(&self, query: &str) -> QueryIntent {
        let query_lower = query.to_lowercase();
        let word_count = query.split_whitespace().count();

        // Greetings (highest priority)
        if self.is_greeting(&query_lower, word_count) {
            return QueryIntent::Greeting;
        }

        // Simple acknowledgments
        if self.is_acknowledgment(&query_lower, word_count) {
            return QueryIntent::SimpleAcknowledgment;
        }

        // Meta questions
        if self.is_meta_question(&query_lower) {
            return QueryIntent::MetaQuestion;
        }

        // Clarification
        if self.is_clarification(&query_lower, word_count) {
            return QueryIntent::Clarification;
        }

        // Follow-up requests (check before document search to avoid false positives)
        if self.is_follow_up(&query_lower) {
            return QueryIntent::FollowUpRequest;
        }

        // Creative/generative queries (check before calculations)
        if self.is_creative_generation(&query_lower) {
            return QueryIntent::CreativeGeneration;
        }

        if self.is_example_creation(&query_lower) {
            return QueryIntent::ExampleCreation;
        }

        // Calculations
        if self.is_calculation(&query_lower) {
            return QueryIntent::Calculation;
        }

        // Current events / real-time info (needs web search)
        if self.is_current_events(&query_lower) {
            return QueryIntent::CurrentEvents;
        }

        if self.is_realtime_info(&query_lower) {
            return QueryIntent::RealTimeInfo;
        }

        // Filtered search (has conditions)
        if self.is_filtered_search(&query_lower) {
            return QueryIntent::FilteredSearch;
        }

        // Comparative analysis
        if self.is_comparative(&query_lower) {
            return QueryIntent::ComparativeAnalysis;
        }

        // Aggregation
        if self.is_aggregation(&query_lower) {
            return QueryIntent::AggregationQuery;
        }

        // Temporal query
        if self.is_temporal(&query_lower) {
            return QueryIntent::TemporalQuery;
        }

        // Multi-hop reasoning
        if self.is_multi_hop(&query_lower) {
            return QueryIntent::MultiHopReasoning;
        }

        // Document search
        if self.is_document_search(&query_lower) {
            return QueryIntent::DocumentSearch;
        }

        // Definition query
        if self.is_definition(&query_lower) {
            return if self.is_document_specific(&query_lower) {
                QueryIntent::DefinitionQuery
            } else {
                QueryIntent::GeneralKnowledge
            };
        }

        // Default: factual lookup if multi-word
        if word_count > 3 {
            QueryIntent::FactualLookup
        } else {
            QueryIntent::GeneralKnowledge
        }
    }

    fn is_greeting(&self, query: &str, word_count: usize) -> bool {
        if word_count > 5 {
            return false;
        }
        let greetings = [
            "hello", "hi", "hey", "greetings", "good morning", "good afternoon",
            "good evening", "namaste", "thanks", "thank you", "bye", "goodbye",
        ];
        greetings.iter().any(|g| query.contains(g))
    }

    fn is_acknowledgment(&self, query: &str, word_count: usize) -> bool {
        if word_count > 3 {
            return false;
        }
        let acks = ["ok", "okay", "yes", "no", "sure", "alright", "got it"];
        acks.iter().any(|a| query == *a || query.starts_with(a))
    }

    fn is_meta_question(&self, query: &str) -> bool {
        // Only match queries explicitly about the assistant itself.
        // Queries with pronouns (this/that/it) should rely on context, not be meta.
        let patterns = [
            "what is your name",
            "who are you",
            "what can you do",
            "how do you work",
            "what are your capabilities",
            "what context do you have",
            "what do you know about me",
            "what have we discussed",
            "what information do you have",
            "tell me about yourself",
            "what are you",
            "what's your role",
        ];
        patterns.iter().any(|p| query.contains(p))
    }

    fn is_clarification(&self, query: &str, word_count: usize) -> bool {
        if word_count > 10 {
            return false;
        }
        let patterns = ["what do you mean", "can you explain", "i don't understand", "clarify"];
        patterns.iter().any(|p| query.contains(p))
    }

    fn is_follow_up(&self, query: &str) -> bool {
        // Detect queries that reference previous context for re-formatting/re-displaying.
        // These should NOT trigger document search or web search. The query
        // must start with a transformation/display command and reference
        // previous context with a pronoun/demonstrative.
        let starts_with_transform = [
            "show me", "display", "visualize", "format as", "convert to",
            "make it", "do the same", "repeat that", "do it again",
        ];
        let has_transform = starts_with_transform.iter().any(|p| query.starts_with(p));

        if !has_transform {
            return false;
        }

        let context_words = [
            "the same", " that", " this", " those", " these", " it ", " them",
            " it.", // end of sentence
        ];
        context_words.iter().any(|w| query.contains(w))
    }

    fn is_creative_generation(&self, query: &str) -> bool {
        // Queries asking to create/generate fictional or example content.
        // "generate a report from my documents" is not creative, it needs
        // retrieval, so queries referencing existing documents/data are excluded.
        let doc_refs = ["from my", "from the", "from document", "from file", "based on my", "using my"];
        let references_docs = doc_refs.iter().any(|r| query.contains(r));
        if references_docs {
            return false;
        }

        let patterns = [
            "create fake", "create a fake", "make up", "invent", "imagine",
            "pretend", "fictional", "fabricate", "simulate", "mock up",
            "come up with", "brainstorm", "suggest some", "give me ideas",
            // Visualization/diagram creation (pure generation, no doc lookup needed)
            "make a flowchart", "make a diagram", "create a flowchart",
            "create a diagram", "draw a", "make a chart", "create a chart",
            "make an infographic",
        ];
        if patterns.iter().any(|p| query.contains(p)) {
            return true;
        }

        // "write a"/"draft a"/"compose a" are creative only when not about existing content
        let write_patterns = ["write a", "write an", "draft a", "draft an", "compose a"];
        if write_patterns.iter().any(|p| query.starts_with(p)) {
            return !query.contains("about my") && !query.contains("summary of");
        }

        false
    }

    fn is_example_creation(&self, query: &str) -> bool {
        let patterns = [
            "example of",
            "give me an example",
            "show me an example",
            "sample data",
            "show me a sample",
            "random data",
            "test data",
            "mock data",
            "dummy data",
            "placeholder",
            "demo data",
            "fake data",
            "synthetic data",
            "for testing",
            "for demo",
        ];
        patterns.iter().any(|p| query.contains(p))
    }

    fn is_calculation(&self, query: &str) -> bool {
        let lower = query.to_lowercase();
        let has_math_keyword = lower.contains("calculate")
            || lower.contains("compute")
            || lower.contains("sum of")
            || lower.contains("average of")
            || lower.contains("multiply")
            || lower.contains("divide");

        // "what is X + Y" with at least 2 numbers and an operator between them
        let has_arithmetic = {
            let num_count = query.chars().filter(|c| c.is_numeric()).count();
            num_count >= 2 && ARITHMETIC_RE.is_match(query)
        };

        has_math_keyword || has_arithmetic
    }

    fn is_filtered_search(&self, query: &str) -> bool {
        query.contains('>')
            || query.contains('<')
            || query.contains("greater than")
            || query.contains("less than")
            || query.contains("more than")
            || query.contains("exceeds")
            || query.contains("below")
            || query.contains("above")
            || (query.contains("where") && query.contains("and"))
            || (query.contains("with") && query.contains("than"))
    }

    fn is_comparative(&self, query: &str) -> bool {
        let patterns = [
            "compare",
            "difference between",
            "vs",
            "versus",
            "better than",
            "worse than",
            "similar to",
            "contrast",
        ];
        patterns.iter().any(|p| query.contains(p))
    }

    fn is_aggregation(&self, query: &str) -> bool {
        let patterns = ["how many", "count", "total", "sum", "average", "mean", "list all", "show all"];
        patterns.iter().any(|p| query.contains(p))
    }

    fn is_temporal(&self, query: &str) -> bool {
        if YEAR_RE.is_match(query) {
            return true;
        }

        let patterns = [
            "last year", "this year", "last month", "this month", "last week",
            "this week", "recent", "latest", "during",
        ];
        patterns.iter().any(|p| query.contains(p))
    }

    fn is_multi_hop(&self, query: &str) -> bool {
        // Multiple explicit questions, or conditional reasoning chains
        let has_conditional = query.contains(" if ") && query.contains(" then ");
        let has_multi_question = query.matches('?').count() > 1;
        let has_comparison = query.contains("compare") || query.contains("difference between");
        has_conditional || has_multi_question || has_comparison
    }

    fn is_document_search(&self, query: &str) -> bool {
        let lower = query.to_lowercase();
        let patterns = [
            "find", "search", "show me", "get me", "retrieve", "fetch", "locate",
            "look up", "pull up", "bring up",
        ];
        patterns.iter().any(|p| lower.starts_with(p) || lower.contains(&format!(" {} ", p)))
    }

    fn is_definition(&self, query: &str) -> bool {
        // Don't match meta questions (already handled by is_meta_question)
        if query.contains("you") || query.contains("your") {
            return false;
        }

        let patterns = ["what is", "what are", "define", "explain", "tell me about"];
        patterns.iter().any(|p| query.starts_with(p))
    }

    fn is_document_specific(&self, query: &str) -> bool {
        let doc_terms = [
            "section", "clause", "provision", "article", "contract", "agreement",
            "document", "file", "paragraph", "page", "schedule", "annexure", "exhibit",
        ];
        doc_terms.iter().any(|t| query.contains(t))
    }

    fn is_current_events(&self, query: &str) -> bool {
        // Don't trigger if query is about documents ("latest in my documents")
        if query.contains("document") || query.contains("file") || query.contains("my") {
            return false;
        }

        let patterns = [
            "news", "breaking", "headline", "happening now", "what's new in",
            "what's happening", "announcement", "current events", "recent events",
        ];
        patterns.iter().any(|p| query.contains(p))
    }

    fn is_realtime_info(&self, query: &str) -> bool {
        let patterns = [
            "weather", "stock price", "live score", "right now", "currently",
            "at the moment", "real-time", "up-to-date",
            // Explicit web search requests
            "search online", "google", "search web", "look up online",
            "find online", "search internet", "web search",
        ];
        patterns.iter().any(|p| query.contains(p))
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_detection() {
        let classifier = IntentClassifier::new();
        assert_eq!(classifier.classify("hello"), QueryIntent::Greeting);
        assert_eq!(classifier.classify("thanks"), QueryIntent::Greeting);
    }

    #[test]
    fn test_filtered_search_detection() {
        let classifier = IntentClassifier::new();
        let intent = classifier.classify("find contracts where payment > 90 days");
        assert_eq!(intent, QueryIntent::FilteredSearch);
    }

    #[test]
    fn test_comparative_detection() {
        let classifier = IntentClassifier::new();
        let intent = classifier.classify("compare contract A vs contract B");
        assert_eq!(intent, QueryIntent::ComparativeAnalysis);
    }
}

//! Query Rewriting Module
//!
//! Rewrites user queries using conversation context for better search results.
//! Uses LLM to expand queries with implicit context from conversation history.

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewrittenQuery {
    pub original_query: String,
    pub rewritten_query: String,
    pub explanation: String,
    pub used_context: bool,
    pub should_retrieve: bool,    // Go/No-go decision
    pub retrieval_reason: String, // Why retrieve or not
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub topic: String,
    pub recent_messages: Vec<String>,
    pub concepts_mentioned: Vec<String>,
    pub files_discussed: Vec<String>,
    pub entities: Vec<String>,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self {
            topic: String::new(),
            recent_messages: Vec::new(),
            concepts_mentioned: Vec::new(),
            files_discussed: Vec::new(),
            entities: Vec::new(),
        }
    }
}

/// Query rewriter that uses conversation context to expand queries
pub struct QueryRewriter {
    /// Enable debug logging
    pub debug: bool,
}

impl QueryRewriter {
    pub fn new() -> Self {
        Self { debug: false }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Decide if query needs document retrieval (go/no-go decision)
    ///
    /// Returns true if the query is asking about documents/information that needs lookup.
    /// Returns false for greetings, meta questions, or conversational queries.
    pub fn should_retrieve_documents(&self, query: &str) -> (bool, String) {
        let query_lower = query.to_lowercase();

        // No-retrieve: only exact or near-exact matches for very short queries
        let word_count = query.split_whitespace().count();

        // Single-word or two-word greetings/acknowledgments
        if word_count <= 2 {
            let exact_no_retrieve = [
                "hello",
                "hi",
                "hey",
                "thanks",
                "thank you",
                "bye",
                "goodbye",
                "ok",
                "okay",
                "yes",
                "no",
                "sure",
                "cool",
                "great",
            ];
            for pattern in &exact_no_retrieve {
                if query_lower == *pattern || query_lower.starts_with(&format!("{} ", pattern)) {
                    return (
                        false,
                        format!("Short greeting/acknowledgment — no documents needed"),
                    );
                }
            }
        }

        // Multi-word meta questions (only when the full query IS the meta question)
        if word_count <= 6 {
            let meta_patterns = [
                "what is your name",
                "who are you",
                "how are you",
                "what can you do",
                "what are you",
            ];
            for pattern in &meta_patterns {
                if query_lower.starts_with(pattern) {
                    return (
                        false,
                        format!("Meta question about assistant — no documents needed"),
                    );
                }
            }
        }

        // Go patterns (definitely need retrieval)
        let retrieve_patterns = [
            "find",
            "search",
            "show me",
            "get",
            "list",
            "what",
            "where",
            "when",
            "how",
            "why",
            "explain",
            "tell me about",
            "information",
            "details",
            "document",
            "file",
            "contract",
            "clause",
            "section",
            "provision",
            "requirement",
            "compliance",
            "audit",
            "liability",
            "payment",
            "terms",
        ];

        for pattern in &retrieve_patterns {
            if query_lower.contains(pattern) {
                return (
                    true,
                    format!(
                        "Query contains '{}' - likely needs document lookup",
                        pattern
                    ),
                );
            }
        }

        // Default: if query is > 3 words, assume it needs retrieval
        if query.split_whitespace().count() > 3 {
            return (true, "Multi-word query - likely informational".to_string());
        }

        // Very short queries without obvious patterns - skip retrieval
        (
            false,
            "Short query without clear retrieval intent".to_string(),
        )
    }

    /// Expand a query into exactly four variants for multi-query retrieval:
    /// three intent-preserving rephrasings plus one broader "step-back"
    /// abstraction. Always returns exactly 4 entries — on any LLM failure,
    /// or a response with fewer than 4 usable lines, the original query
    /// pads out the remainder so callers never have to special-case a
    /// short list.
    pub async fn expand_four<F, Fut>(&self, query: &str, llm_generate: F) -> Vec<String>
    where
        F: FnOnce(String, usize) -> Fut,
        Fut: std::future::Future<Output = Result<String>>,
    {
        let prompt = format!(
            r#"Given the user question below, generate exactly 4 lines of output, one per line, with no numbering or extra commentary:
1. A rephrasing that preserves the exact intent but uses different wording.
2. A second, differently-worded rephrasing preserving the exact intent.
3. A third rephrasing focusing on any specific entities or constraints in the question.
4. A broader "step back" version of the question that asks about the general topic or concept behind it.

Question: "{}"

Output exactly 4 lines:"#,
            query
        );

        let mut variants: Vec<String> = match llm_generate(prompt, 200).await {
            Ok(text) => text
                .lines()
                .map(|l| l.trim().trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')' || c == '-').trim())
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                if self.debug {
                    tracing::warn!(error = %e, "[QueryRewriter] Multi-query expansion failed");
                }
                Vec::new()
            }
        };

        variants.truncate(4);
        while variants.len() < 4 {
            variants.push(query.to_string());
        }
        variants
    }

    /// Conversation-aware query reformulation.
    ///
    /// Resolves coreferences (pronouns, demonstratives, ellipsis) using
    /// conversation history so the search query is self-contained. Also
    /// generates expanded query variants for multi-query retrieval.
    ///
    /// Examples:
    /// - "who is anushree" → "who is anushree" (no change, already explicit)
    /// - "what is her salary" (after discussing anushree) → "what is anushree salary"
    /// - "tell me more" (after salary question) → "tell me more about anushree salary"
    /// - "and the PAN?" (after discussing anushree) → "what is anushree PAN"
    pub fn rewrite_rule_based(&self, query: &str, context: &ConversationContext) -> RewrittenQuery {
        let (should_retrieve, retrieval_reason) = self.should_retrieve_documents(query);

        let mut rewritten = query.to_string();
        let mut changes = Vec::new();
        let query_lower = query.trim().to_lowercase();

        // Detect bare search commands that need context expansion
        let bare_command_patterns = [
            "search online",
            "google",
            "search web",
            "look up online",
            "find online",
            "search internet",
            "web search",
            "search the web",
            "check online",
            "look online",
        ];

        let is_bare_command = bare_command_patterns
            .iter()
            .any(|p| query_lower == *p || query_lower.starts_with(&format!("{} ", p)));

        if is_bare_command {
            if let Some(last_query) = Self::find_last_user_query(&context.recent_messages) {
                rewritten = format!("{} {}", query.trim(), last_query.trim());
                changes.push(format!("Expanded bare command with previous query"));
            }
        }

        // --- Coreference Resolution ---
        // Find the primary entity being discussed (most recently mentioned person/thing)
        let primary_entity = Self::find_primary_entity(context);
        let last_topic = Self::find_last_topic(context);

        // 1. Resolve gendered pronouns: her/his/their → entity name
        let gendered_pronouns = [
            (" her ", " {entity} "),
            (" his ", " {entity} "),
            (" their ", " {entity} "),
            (" she ", " {entity} "),
            (" he ", " {entity} "),
            (" they ", " {entity} "),
            ("her ", "{entity} "),
            ("his ", "{entity} "),
        ];

        if let Some(ref entity) = primary_entity {
            for (pronoun, replacement) in &gendered_pronouns {
                let replacement = replacement.replace("{entity}", entity);
                if let Some(new) = Self::case_insensitive_replace(&rewritten, pronoun, &replacement)
                {
                    rewritten = new;
                    changes.push(format!("Resolved pronoun to '{}'", entity));
                    break; // Only replace once per query
                }
            }
        }

        // 2. Resolve "it"/"this"/"that" → file name if files discussed, else entity
        let demonstratives = [" it ", " this ", " that ", " it?", " this?", " that?"];
        let replacement_target = if !context.files_discussed.is_empty() {
            Some(context.files_discussed[0].clone())
        } else {
            primary_entity.clone()
        };

        if let Some(ref target) = replacement_target {
            for pronoun in &demonstratives {
                let replacement =
                    pronoun.replace(pronoun.trim_matches(|c: char| c == ' ' || c == '?'), target);
                if let Some(new) = Self::case_insensitive_replace(&rewritten, pronoun, &replacement)
                {
                    rewritten = new;
                    changes.push(format!("Resolved demonstrative to '{}'", target));
                    break;
                }
            }
        }

        // 3. Ellipsis resolution: very short follow-ups that reference previous topic
        //    "and the PAN?" → "what is {entity} PAN"
        //    "what about address?" → "what is {entity} address"
        //    "tell me more" → "tell me more about {entity/topic}"
        let word_count = query.split_whitespace().count();
        if word_count <= 5 && !changes.iter().any(|c| c.contains("Resolved")) {
            let ellipsis_patterns = [
                ("and the ", "what is {topic} "),
                ("and ", ""),
                ("what about ", "what is {topic} "),
                ("how about ", "what is {topic} "),
                ("tell me more", "tell me more about {topic}"),
                ("more about", "more about {topic}"),
                ("more details", "more details about {topic}"),
                ("elaborate", "elaborate on {topic}"),
                ("explain", "explain {topic}"),
            ];

            let topic_ref = primary_entity
                .as_deref()
                .or(last_topic.as_deref())
                .unwrap_or("");

            if !topic_ref.is_empty() {
                for (pattern, expansion) in &ellipsis_patterns {
                    if query_lower.starts_with(pattern) || query_lower == *pattern {
                        let expanded = expansion.replace("{topic}", topic_ref);
                        if !expanded.is_empty() {
                            let suffix = &query[pattern.len().min(query.len())..];
                            rewritten = format!("{}{}", expanded, suffix);
                        } else {
                            // "and X" → prepend entity context
                            let suffix = &query[pattern.len().min(query.len())..];
                            rewritten = format!("{} {}", topic_ref, suffix.trim());
                        }
                        changes.push(format!("Resolved ellipsis with topic '{}'", topic_ref));
                        break;
                    }
                }
            }
        }

        // 4. Short queries (1-2 words) with no resolution yet: append entity/topic context
        if word_count <= 2 && changes.is_empty() && !query_lower.is_empty() {
            if let Some(ref entity) = primary_entity {
                rewritten = format!("{} {}", entity, query.trim());
                changes.push(format!("Prepended entity '{}' to short query", entity));
            } else if !context.concepts_mentioned.is_empty() {
                let top_concepts: Vec<&str> = context
                    .concepts_mentioned
                    .iter()
                    .take(3)
                    .map(|c| c.as_str())
                    .collect();
                rewritten = format!("{} {}", query.trim(), top_concepts.join(" "));
                changes.push("Added relevant concepts to short query".to_string());
            }
        }

        let changed = rewritten != query;

        RewrittenQuery {
            original_query: query.to_string(),
            rewritten_query: rewritten,
            explanation: if changed {
                changes.join("; ")
            } else {
                "Query already self-contained".to_string()
            },
            used_context: changed,
            should_retrieve,
            retrieval_reason,
        }
    }

    // --- Internal helpers ---

    /// Find the most recently mentioned person/entity in conversation
    fn find_primary_entity(context: &ConversationContext) -> Option<String> {
        // Entities are already ordered by recency (extracted from recent messages)
        context.entities.first().cloned()
    }

    /// Find the last substantive topic from user messages
    fn find_last_topic(context: &ConversationContext) -> Option<String> {
        for msg in context.recent_messages.iter().rev() {
            // Only look at user messages
            if let Some(content) = msg
                .strip_prefix("user: ")
                .or_else(|| msg.strip_prefix("User: "))
            {
                let word_count = content.split_whitespace().count();
                if word_count >= 3 {
                    // Extract key content words (skip question words)
                    let keywords: Vec<&str> = content
                        .split_whitespace()
                        .filter(|w| {
                            let lower = w.to_lowercase();
                            !matches!(
                                lower.as_str(),
                                "what"
                                    | "is"
                                    | "are"
                                    | "the"
                                    | "a"
                                    | "an"
                                    | "of"
                                    | "in"
                                    | "for"
                                    | "to"
                                    | "and"
                                    | "or"
                                    | "can"
                                    | "you"
                                    | "me"
                                    | "tell"
                                    | "show"
                                    | "find"
                                    | "get"
                                    | "do"
                                    | "does"
                                    | "how"
                                    | "where"
                                    | "when"
                                    | "why"
                                    | "who"
                                    | "which"
                                    | "about"
                            )
                        })
                        .take(5)
                        .collect();

                    if !keywords.is_empty() {
                        return Some(keywords.join(" "));
                    }
                }
            }
        }
        None
    }

    /// Find the last substantive user query in conversation (for bare command expansion)
    fn find_last_user_query(messages: &[String]) -> Option<String> {
        let bare_commands = [
            "search online",
            "google",
            "search web",
            "look up online",
            "tell me more",
            "more details",
            "elaborate",
            "explain",
        ];

        for msg in messages.iter().rev() {
            if let Some(content) = msg
                .strip_prefix("user: ")
                .or_else(|| msg.strip_prefix("User: "))
            {
                let lower = content.trim().to_lowercase();
                let is_command = bare_commands.iter().any(|c| lower.starts_with(c));
                if !is_command && content.trim().len() > 3 {
                    return Some(content.trim().to_string());
                }
            }
        }
        None
    }

    /// Case-insensitive replacement that preserves surrounding context
    fn case_insensitive_replace(text: &str, pattern: &str, replacement: &str) -> Option<String> {
        let text_lower = text.to_lowercase();
        let pattern_lower = pattern.to_lowercase();

        if let Some(pos) = text_lower.find(&pattern_lower) {
            let mut result = String::with_capacity(text.len() + replacement.len());
            result.push_str(&text[..pos]);
            result.push_str(replacement);
            result.push_str(&text[pos + pattern.len()..]);
            Some(result)
        } else {
            None
        }
    }

    /// Strip question words and filler to produce a keyword-only search query.
    /// "what is the salary of anushree" → "salary anushree"
    fn extract_keywords_for_search(query: &str) -> String {
        let stop_words: std::collections::HashSet<&str> = [
            "what", "is", "are", "was", "were", "the", "a", "an", "of", "in", "for", "to", "and",
            "or", "can", "you", "me", "my", "tell", "show", "find", "get", "do", "does", "how",
            "where", "when", "why", "who", "which", "about", "please", "could", "would", "should",
            "there", "their", "from", "with", "that", "this", "have", "has", "had", "be", "been",
            "being", "it", "its", "i",
        ]
        .iter()
        .copied()
        .collect();

        let keywords: Vec<&str> = query
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|w| w.len() > 1 && !stop_words.contains(w))
            .collect();

        keywords.join(" ")
    }

}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_pronoun_replacement() {
        let rewriter = QueryRewriter::new();
        let mut context = ConversationContext::default();
        context
            .files_discussed
            .push("query_rewriter.rs".to_string());

        let result = rewriter.rewrite_rule_based("How does it handle errors?", &context);

        assert!(result.used_context);
        assert!(result.rewritten_query.contains("query_rewriter.rs"));
    }

    #[test]
    fn test_empty_context() {
        let rewriter = QueryRewriter::new();
        let context = ConversationContext::default();

        let result = rewriter.rewrite_rule_based("What is vector search?", &context);

        assert!(!result.used_context);
        assert_eq!(result.original_query, result.rewritten_query);
    }

    #[test]
    fn test_gendered_pronoun_resolution() {
        let rewriter = QueryRewriter::new();
        let mut context = ConversationContext::default();
        context.entities.push("Anushree Sharma".to_string());

        let result = rewriter.rewrite_rule_based("what is her salary", &context);

        assert!(result.used_context);
        assert!(result.rewritten_query.contains("Anushree Sharma"));
        assert!(!result.rewritten_query.contains("her"));
    }

    #[test]
    fn test_ellipsis_resolution() {
        let rewriter = QueryRewriter::new();
        let mut context = ConversationContext::default();
        context.entities.push("Anushree".to_string());
        context
            .recent_messages
            .push("user: who is anushree".to_string());

        let result = rewriter.rewrite_rule_based("and the PAN?", &context);

        assert!(result.used_context);
        assert!(result.rewritten_query.to_lowercase().contains("anushree"));
        assert!(result.rewritten_query.to_lowercase().contains("pan"));
    }

    #[test]
    fn test_tell_me_more_resolution() {
        let rewriter = QueryRewriter::new();
        let mut context = ConversationContext::default();
        context.entities.push("Varun".to_string());
        context
            .recent_messages
            .push("user: what is varun's salary".to_string());

        let result = rewriter.rewrite_rule_based("tell me more", &context);

        assert!(result.used_context);
        assert!(result.rewritten_query.to_lowercase().contains("varun"));
    }

    #[test]
    fn test_keyword_extraction() {
        let keywords = QueryRewriter::extract_keywords_for_search("what is the salary of anushree");
        assert!(keywords.contains("salary"));
        assert!(keywords.contains("anushree"));
        assert!(!keywords.contains("what"));
        assert!(!keywords.contains("the"));
    }
}

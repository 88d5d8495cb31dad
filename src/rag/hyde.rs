//! Hypothetical Document Embeddings.
//!
//! Generates a short hypothetical answer document for a query and embeds
//! that instead of (or alongside) the raw query — the hypothetical answer
//! often sits closer in embedding space to the true answer chunks than the
//! question itself does.

use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::llm::{GenerationConfig, LLMProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HydeStyle {
    Informative,
    Technical,
    Conversational,
}

impl HydeStyle {
    fn prompt_template(&self) -> &'static str {
        match self {
            HydeStyle::Informative => {
                "Write a short, informative passage that directly answers this question, as it might appear in a reference document:\n\n{query}\n\nPassage:"
            }
            HydeStyle::Technical => {
                "Write a short, technical passage that directly answers this question, using precise terminology as it might appear in technical documentation:\n\n{query}\n\nPassage:"
            }
            HydeStyle::Conversational => {
                "Write a short passage in a natural, conversational tone that directly answers this question:\n\n{query}\n\nPassage:"
            }
        }
    }

    fn cache_key_part(&self) -> &'static str {
        match self {
            HydeStyle::Informative => "informative",
            HydeStyle::Technical => "technical",
            HydeStyle::Conversational => "conversational",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HydeTransform {
    pub original_query: String,
    pub hypothetical_document: String,
    pub use_hyde: bool,
}

pub struct HydeEngine {
    cache: Arc<RwLock<HashMap<String, String>>>,
}

impl HydeEngine {
    pub fn new() -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Generate a ≤200-token hypothetical document for `query` at the given
    /// style, caching by `(query, style)`. Falls back to the original query
    /// text on any LLM failure so callers always get *some* document to
    /// embed.
    pub async fn generate_hypothetical_document(
        &self,
        llm: &dyn LLMProvider,
        query: &str,
        style: HydeStyle,
    ) -> String {
        let cache_key = format!("{}_{}", query, style.cache_key_part());
        if let Some(cached) = self.cache.read().get(&cache_key) {
            return cached.clone();
        }

        let prompt = style.prompt_template().replace("{query}", query);
        let config = GenerationConfig {
            max_tokens: 200,
            temperature: 0.3,
            top_p: 0.9,
            top_k: 40,
            repetition_penalty: 1.1,
            stop_sequences: vec![],
            seed: None,
        };

        let document = match llm.generate(&prompt, &config).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!(query = query, error = %e, "HyDE generation failed, falling back to query");
                query.to_string()
            }
        };

        self.cache.write().insert(cache_key, document.clone());
        document
    }

    pub async fn transform(
        &self,
        llm: &dyn LLMProvider,
        query: &str,
        style: HydeStyle,
    ) -> HydeTransform {
        let hypothetical_document = self.generate_hypothetical_document(llm, query, style).await;
        let use_hyde = hypothetical_document != query;
        HydeTransform {
            original_query: query.to_string(),
            hypothetical_document,
            use_hyde,
        }
    }
}

impl Default for HydeEngine {
    fn default() -> Self {
        Self::new()
    }
}

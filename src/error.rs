//! Error taxonomy (§7 / §4.20 ambient): one variant per row of the table,
//! carrying enough context to log meaningfully. Soft variants are built and
//! logged at the call site, then degraded immediately — they never
//! propagate past the component boundary. Only `Config`, `Embed`, and `Llm`
//! (on the draft call) are hard failures that reach `answer()`'s caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Missing model/API key on startup. Fatal; aborts initialization.
    #[error("configuration error: {0}")]
    Config(String),

    /// Embedder failure on an index mutation (add/delete). Surfaced to the caller.
    #[error("embedder failure in {component}: {source}")]
    Embed {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    /// LLM unreachable during the draft/synthesis call. Surfaced to the
    /// caller as an envelope with empty response and error metadata.
    #[error("LLM unreachable in {component}: {source}")]
    Llm {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    /// ANN/BM25/CRAG/compression/critique failure. Logged, then degraded to
    /// an empty result or a skipped stage — never propagated.
    #[error("retrieval degraded in {component}: {source}")]
    RetrievalSoft {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    /// Memory recall/remember failure. Logged, then skipped.
    #[error("memory operation failed in {component}: {source}")]
    MemorySoft {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    /// Web-search provider failure. Treated as empty web results.
    #[error("web search failed: {0}")]
    WebSearch(#[source] anyhow::Error),

    /// Refiner output violated a safety gate (§4.15/I6). The draft is kept.
    #[error("refinement rejected: {0}")]
    ValidationReject(String),

    /// Client cancelled the request. Resources released, no partial state flushed.
    #[error("request cancelled")]
    Cancelled,
}

impl CoreError {
    pub fn retrieval_soft(component: &str, source: anyhow::Error) -> Self {
        tracing::warn!(component = component, error = %source, "retrieval degraded");
        Self::RetrievalSoft { component: component.to_string(), source }
    }

    pub fn memory_soft(component: &str, source: anyhow::Error) -> Self {
        tracing::warn!(component = component, error = %source, "memory operation failed");
        Self::MemorySoft { component: component.to_string(), source }
    }
}

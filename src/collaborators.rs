//! Capability interfaces for collaborators the core consumes but does not
//! define (§6): web search and visual-context description. Codifying these
//! as single-method traits (rather than duck-typed clients) means every
//! consumer in the orchestrator depends on the capability, not a concrete
//! provider (§9 redesign flag).

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchResult {
    pub content: String,
    pub title: String,
    pub url: String,
    pub score: f32,
}

/// External web-search provider (§6, §7 `WebSearchError`). A provider
/// failure is treated as empty web results by the caller, never propagated.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<WebSearchResult>>;
}

/// External visual-context helper: turns image references into a textual
/// description the orchestrator folds into `visual_context` (§4.13 Phase 0).
#[async_trait]
pub trait VisualContextProvider: Send + Sync {
    async fn describe(&self, image_refs: &[String]) -> Result<String>;
}

/// A provider that never returns results — the default when no web-search
/// collaborator is configured, so the orchestrator's CRAG path still works
/// (as "no web results available") rather than needing an `Option` at every
/// call site.
pub struct NoWebSearch;

#[async_trait]
impl WebSearchProvider for NoWebSearch {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<WebSearchResult>> {
        Ok(Vec::new())
    }
}

/// A provider that never produces a description — the default when no
/// visual-context collaborator is configured, so image references are
/// simply ignored rather than needing an `Option` at every call site.
pub struct NoVisualContext;

#[async_trait]
impl VisualContextProvider for NoVisualContext {
    async fn describe(&self, _image_refs: &[String]) -> Result<String> {
        Ok(String::new())
    }
}

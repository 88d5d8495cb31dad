//! Pipeline Orchestrator (C13): the component every other one answers to.
//! Owns no storage or models itself — every collaborator is injected at
//! construction (§9 redesign: no global singletons) — and its only public
//! contract is `answer()`, which never fails: hard errors are turned into an
//! [`AnswerEnvelope::error`] rather than propagated to the caller.

pub mod stream;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock as AsyncRwLock;

use crate::answer::{
    refine_answer, validate_answer_structure, AnswerEnvelope, AnswerMetadata, AnswerSchema,
    EvidenceDocument, QualityTier, Strategy,
};
use crate::collaborators::{NoVisualContext, NoWebSearch, VisualContextProvider, WebSearchProvider};
use crate::graph::KnowledgeGraph;
use crate::llm::{ChatMessage, ChatRole, GenerationConfig, LLMProvider};
use crate::memory::{ConversationTurn, UserMemoryStore, UserProfile};
use crate::quality::{analyze_density, analyze_naturalness, overall_score, self_critique, QualityLogger, QualityRecord};
use crate::rag::{
    compress_chunk, run_crag, AnswerComplexity, ComplexityClassifier, ConversationContext,
    Evidence, HydeEngine, HydeStyle, QueryRewriter, RetrievalEvaluator,
};
use crate::rag_engine::RAGEngine;
use crate::types::ComprehensiveResult;
use crate::reranking::marginal_utility_selection;

const HYDE_ALPHA: f32 = 0.6;
const CANDIDATES_PER_QUERY: usize = 20;
const RERANK_TOP_K: usize = 10;
const DIVERSITY_WEIGHT: f32 = 0.3;
const MAX_EVIDENCE_DOCS: usize = 5;
const MAX_COMMUNITIES: usize = 3;
const MAX_HISTORY_TURNS: usize = 5;
const GRAPH_RAG_CHUNK_POOL: usize = 10;
const GRAPH_RAG_CHUNK_PARTIALS: usize = 5;

/// Forces a particular strategy instead of running the complexity
/// classifier — used by callers that already know which branch they want
/// (e.g. an eval harness comparing strategies on the same query).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyOverride {
    DirectGeneration,
    VectorRag,
    GraphRag,
}

impl StrategyOverride {
    fn complexity(self) -> AnswerComplexity {
        match self {
            StrategyOverride::DirectGeneration => AnswerComplexity::Simple,
            StrategyOverride::VectorRag => AnswerComplexity::SingleHop,
            StrategyOverride::GraphRag => AnswerComplexity::MultiHop,
        }
    }
}

/// One turn's worth of inputs to `answer()` (§4.13). Everything but `query`
/// and `user_id` is optional, matching the spec's "optional" phrasing for
/// session, history, strategy override, image references, and an
/// externally-computed memory summary.
#[derive(Debug, Clone, Default)]
pub struct AnswerRequest {
    pub query: String,
    pub user_id: String,
    pub session_id: Option<String>,
    pub history: Vec<ChatMessage>,
    pub strategy_override: Option<StrategyOverride>,
    pub image_refs: Vec<String>,
    pub memory_summary: Option<String>,
}

impl AnswerRequest {
    pub fn new(query: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

/// Dependency-injected orchestrator (§9): every collaborator below is a
/// trait object or a shared handle passed in at construction, never a
/// global. `rag` and `graph` are wrapped in an async `RwLock` because both
/// are single-writer/many-reader shared mutable state under concurrent
/// requests (§5) — `search_communities` in particular needs a write lock
/// because it caches summary embeddings as it goes.
pub struct PipelineOrchestrator {
    rag: Arc<AsyncRwLock<RAGEngine>>,
    graph: Arc<AsyncRwLock<KnowledgeGraph>>,
    memory: Arc<UserMemoryStore>,
    llm: Arc<dyn LLMProvider>,
    web_search: Arc<dyn WebSearchProvider>,
    visual: Arc<dyn VisualContextProvider>,
    quality_logger: Arc<QualityLogger>,
    query_rewriter: QueryRewriter,
    hyde: HydeEngine,
    complexity_classifier: ComplexityClassifier,
    retrieval_evaluator: RetrievalEvaluator,
}

impl PipelineOrchestrator {
    pub fn new(
        rag: Arc<AsyncRwLock<RAGEngine>>,
        graph: Arc<AsyncRwLock<KnowledgeGraph>>,
        memory: Arc<UserMemoryStore>,
        llm: Arc<dyn LLMProvider>,
        quality_logger: Arc<QualityLogger>,
    ) -> Self {
        Self {
            rag,
            graph,
            memory,
            llm,
            web_search: Arc::new(NoWebSearch),
            visual: Arc::new(NoVisualContext),
            quality_logger,
            query_rewriter: QueryRewriter::new(),
            hyde: HydeEngine::new(),
            complexity_classifier: ComplexityClassifier::new(),
            retrieval_evaluator: RetrievalEvaluator::default(),
        }
    }

    pub fn with_web_search(mut self, web_search: Arc<dyn WebSearchProvider>) -> Self {
        self.web_search = web_search;
        self
    }

    pub fn with_visual_context(mut self, visual: Arc<dyn VisualContextProvider>) -> Self {
        self.visual = visual;
        self
    }

    /// Runs the full pipeline end to end. Never returns `Err` — a hard
    /// failure (LLM unreachable on the draft call) comes back as an
    /// [`AnswerEnvelope`] with `metadata.error` set rather than propagating,
    /// so callers always get a renderable response (§7).
    pub async fn answer(&self, req: AnswerRequest) -> AnswerEnvelope {
        let preamble = self.preamble(&req).await;

        let complexity = req
            .strategy_override
            .map(StrategyOverride::complexity)
            .unwrap_or_else(|| self.complexity_classifier.classify(&preamble.optimized_query));

        let mut envelope = match complexity {
            AnswerComplexity::Simple => self.run_direct(&req, &preamble).await,
            AnswerComplexity::SingleHop => self.run_vector_rag(&req, &preamble).await,
            AnswerComplexity::MultiHop => self.run_graph_rag(&req, &preamble).await,
        };
        envelope.metadata.multi_queries = preamble.multi_queries.clone();

        self.epilogue(&req, &envelope);
        envelope
    }

    /// Phase 0 — recall memory, fold in any supplied image description,
    /// rewrite and expand the query (§4.13 Preamble).
    async fn preamble(&self, req: &AnswerRequest) -> Preamble {
        let memories = self.memory.recall(&req.user_id, &req.query, 3);
        let profile = self.memory.profile(&req.user_id);

        let visual_context = if req.image_refs.is_empty() {
            String::new()
        } else {
            match self.visual.describe(&req.image_refs).await {
                Ok(description) => description,
                Err(e) => {
                    tracing::warn!(error = %e, "Visual context description failed, ignoring images");
                    String::new()
                }
            }
        };

        let memory_context = build_memory_context(&memories, &profile, req.memory_summary.as_deref());

        let enhanced_query = if memory_context.is_empty() {
            req.query.clone()
        } else {
            format!("{memory_context}\n\nCurrent question: {}", req.query)
        };

        let conversation_context = build_conversation_context(&req.history, &profile);
        let rewritten = self.query_rewriter.rewrite_rule_based(&enhanced_query, &conversation_context);
        let optimized_query = clean_rewritten_query(&rewritten.rewritten_query);

        let llm = self.llm.clone();
        let multi_queries = self
            .query_rewriter
            .expand_four(&optimized_query, move |prompt, max_tokens| {
                let llm = llm.clone();
                async move {
                    let config = GenerationConfig {
                        max_tokens,
                        temperature: 0.3,
                        top_p: 0.9,
                        top_k: 40,
                        repetition_penalty: 1.1,
                        stop_sequences: vec![],
                        seed: None,
                    };
                    llm.generate(&prompt, &config).await
                }
            })
            .await;

        Preamble { memory_context, visual_context, optimized_query, multi_queries }
    }

    /// SIMPLE → direct generation, no retrieval at all: history plus the
    /// rewritten query straight to the LLM.
    async fn run_direct(&self, req: &AnswerRequest, preamble: &Preamble) -> AnswerEnvelope {
        let complexity = AnswerComplexity::Simple;
        let mut prompt = String::new();
        for turn in req.history.iter().rev().take(MAX_HISTORY_TURNS).collect::<Vec<_>>().into_iter().rev() {
            if let Some(content) = &turn.content {
                prompt.push_str(&format!("{}: {}\n", role_label(&turn.role), content));
            }
        }
        if !preamble.visual_context.is_empty() {
            prompt.push_str(&format!("Visual context: {}\n", preamble.visual_context));
        }
        prompt.push_str(&format!("User: {}\nAssistant:", preamble.optimized_query));

        let config = GenerationConfig {
            max_tokens: 300,
            temperature: 0.6,
            top_p: 0.9,
            top_k: 40,
            repetition_penalty: 1.1,
            stop_sequences: vec![],
            seed: None,
        };

        match self.llm.generate(&prompt, &config).await {
            Ok(response) => AnswerEnvelope {
                query: preamble.optimized_query.clone(),
                strategy: Strategy::Direct,
                response,
                documents: Vec::new(),
                metadata: AnswerMetadata {
                    complexity,
                    confidence: 0.8,
                    overall_quality_score: 0.8,
                    quality_tier: QualityTier::from_overall(0.8),
                    ..Default::default()
                },
            },
            Err(e) => {
                tracing::error!(error = %e, "Direct generation failed");
                AnswerEnvelope::error(&preamble.optimized_query, Strategy::Direct, complexity, format!("LLM unreachable: {e}"))
            }
        }
    }

    /// SINGLE_HOP → vector-RAG: HyDE-driven hybrid retrieval fan-out across
    /// the four expanded queries, two-stage rerank, CRAG, compression, then
    /// schema-guided generation (§4.13).
    async fn run_vector_rag(&self, req: &AnswerRequest, preamble: &Preamble) -> AnswerEnvelope {
        let complexity = AnswerComplexity::SingleHop;
        let owner = req.user_id.as_str();
        let session = req.session_id.as_deref();

        let queries: Vec<String> = if preamble.multi_queries.is_empty() {
            vec![preamble.optimized_query.clone()]
        } else {
            preamble.multi_queries.clone()
        };

        let batches = futures::future::join_all(
            queries.iter().map(|q| self.hyde_retrieve(q, owner, session)),
        )
        .await;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for batch in batches {
            for doc in batch {
                if seen.insert(normalize_for_dedup(&doc.snippet)) {
                    candidates.push(doc);
                }
            }
        }

        let reranked = self.rerank_top_k(&preamble.optimized_query, candidates).await;
        let best_fused_score = reranked.first().map(|r| r.score).unwrap_or(0.0);
        let evidence: Vec<Evidence> = reranked.iter().map(comprehensive_to_evidence).collect();

        let crag_outcome = run_crag(
            &self.retrieval_evaluator,
            self.llm.as_ref(),
            self.web_search.as_ref(),
            &preamble.optimized_query,
            evidence,
            best_fused_score,
        )
        .await;

        let top_docs: Vec<Evidence> = crag_outcome.evidence.into_iter().take(MAX_EVIDENCE_DOCS).collect();
        let context_text = build_context_text(&preamble.optimized_query, &top_docs);
        let schema = AnswerSchema::for_complexity(complexity);
        let system_prompt = build_system_prompt(&schema, &preamble.memory_context, &preamble.visual_context, &context_text);

        let draft = match self.generate_draft(&system_prompt, &preamble.optimized_query, 900).await {
            Ok(draft) => draft,
            Err(e) => {
                tracing::error!(error = %e, "Vector-RAG draft generation failed");
                return AnswerEnvelope::error(&preamble.optimized_query, Strategy::VectorRag, complexity, format!("LLM unreachable: {e}"));
            }
        };

        let top_doc_texts: Vec<String> = top_docs.iter().map(|d| d.content.clone()).collect();
        let (response, mut metadata) = self
            .finalize_answer(&preamble.optimized_query, draft, complexity, &top_doc_texts)
            .await;
        metadata.retrieval_quality = Some(crag_outcome.grade);
        metadata.used_web_search = crag_outcome.used_web_search;

        AnswerEnvelope {
            query: preamble.optimized_query.clone(),
            strategy: Strategy::VectorRag,
            response,
            documents: top_docs.iter().map(evidence_to_document).collect(),
            metadata,
        }
    }

    /// MULTI_HOP → graph-RAG: retrieve the owner's most relevant knowledge
    /// communities plus the top chunks via HyDE, map-generate a partial
    /// answer per community and per top-5 chunk individually, fold in
    /// `visual_context`/`memory_context` as virtual partials, then reduce
    /// everything into a single synthesis (§4.13).
    async fn run_graph_rag(&self, req: &AnswerRequest, preamble: &Preamble) -> AnswerEnvelope {
        let complexity = AnswerComplexity::MultiHop;
        let owner = req.user_id.as_str();
        let session = req.session_id.as_deref();

        let community_summaries: Vec<(String, String)> = {
            let rag = self.rag.read().await;
            let embedder = Some(rag.embeddings());
            let mut graph = self.graph.write().await;
            graph
                .search_communities(&preamble.optimized_query, embedder, MAX_COMMUNITIES, owner)
                .into_iter()
                .filter_map(|c| c.summary.as_ref().map(|s| (c.id.clone(), s.clone())))
                .collect()
        };

        let mut chunk_hits = self.hyde_retrieve(&preamble.optimized_query, owner, session).await;
        chunk_hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        chunk_hits.truncate(GRAPH_RAG_CHUNK_POOL);
        let chunk_partial_pool: Vec<&ComprehensiveResult> =
            chunk_hits.iter().take(GRAPH_RAG_CHUNK_PARTIALS).collect();

        if community_summaries.is_empty() && chunk_partial_pool.is_empty() {
            // No graph or chunk signal at all — fall back to the vector-RAG
            // path rather than synthesizing from nothing.
            return self.run_vector_rag(req, preamble).await;
        }

        let community_partials_fut = futures::future::join_all(community_summaries.iter().map(|(id, summary)| {
            self.map_partial_answer(&preamble.optimized_query, &format!("community {id}"), summary)
        }));
        let chunk_partials_fut = futures::future::join_all(chunk_partial_pool.iter().map(|hit| {
            self.map_partial_answer(&preamble.optimized_query, &chunk_source_label(hit), &hit.snippet)
        }));
        let (community_partials, chunk_partials) = futures::join!(community_partials_fut, chunk_partials_fut);

        let mut evidence: Vec<Evidence> = Vec::new();
        for ((id, _), partial) in community_summaries.iter().zip(community_partials.iter()) {
            evidence.push(Evidence { content: partial.clone(), source_label: format!("community:{id}"), score: 1.0 });
        }
        for (hit, partial) in chunk_partial_pool.iter().zip(chunk_partials.iter()) {
            evidence.push(Evidence { content: partial.clone(), source_label: chunk_source_label(hit), score: hit.score });
        }
        // Virtual partials (§4.13): the visual/memory context doesn't come
        // from retrieval, but the reduce phase still needs to cite it.
        if !preamble.memory_context.is_empty() {
            evidence.push(Evidence { content: preamble.memory_context.clone(), source_label: "Memory Summary".to_string(), score: 1.0 });
        }
        if !preamble.visual_context.is_empty() {
            evidence.push(Evidence { content: preamble.visual_context.clone(), source_label: "Visual Description".to_string(), score: 1.0 });
        }

        let context_text = build_partial_context_text(&evidence);
        let schema = AnswerSchema::for_complexity(complexity);
        let system_prompt = build_system_prompt(&schema, &preamble.memory_context, &preamble.visual_context, &context_text);

        let draft = match self.generate_draft(&system_prompt, &preamble.optimized_query, 1400).await {
            Ok(draft) => draft,
            Err(e) => {
                tracing::error!(error = %e, "Graph-RAG reduce-phase generation failed");
                return AnswerEnvelope::error(&preamble.optimized_query, Strategy::GraphRag, complexity, format!("LLM unreachable: {e}"));
            }
        };

        let top_doc_texts: Vec<String> = evidence.iter().map(|d| d.content.clone()).collect();
        let (response, metadata) = self
            .finalize_answer(&preamble.optimized_query, draft, complexity, &top_doc_texts)
            .await;

        // `documents` surfaces only real evidence (communities/chunks), not
        // the virtual memory/visual partials, capped to I5/§3's 5-document limit.
        let documents = evidence
            .iter()
            .filter(|e| e.source_label != "Memory Summary" && e.source_label != "Visual Description")
            .take(MAX_EVIDENCE_DOCS)
            .map(evidence_to_document)
            .collect();

        AnswerEnvelope {
            query: preamble.optimized_query.clone(),
            strategy: Strategy::GraphRag,
            response,
            documents,
            metadata,
        }
    }

    /// Map phase: a short partial answer grounded in one community summary
    /// or chunk. LLM failure degrades to the raw source text rather than
    /// dropping it from the reduce phase.
    async fn map_partial_answer(&self, query: &str, label: &str, source_text: &str) -> String {
        let prompt = format!(
            "Using only the following source, answer the question as far as this source allows. \
            If the source is irrelevant, say so in one sentence. Keep the answer under 250 tokens.\n\nSource ({label}):\n{source_text}\n\nQuestion: {query}\n\nPartial answer:"
        );
        let config = GenerationConfig {
            max_tokens: 300,
            temperature: 0.3,
            top_p: 0.9,
            top_k: 40,
            repetition_penalty: 1.1,
            stop_sequences: vec![],
            seed: None,
        };
        match self.llm.generate(&prompt, &config).await {
            Ok(partial) => partial,
            Err(e) => {
                tracing::warn!(label = label, error = %e, "Map-phase generation failed, using raw source text");
                source_text.to_string()
            }
        }
    }

    async fn generate_draft(&self, system_prompt: &str, query: &str, max_tokens: usize) -> anyhow::Result<String> {
        let config = GenerationConfig {
            max_tokens,
            temperature: 0.3,
            top_p: 0.9,
            top_k: 40,
            repetition_penalty: 1.1,
            stop_sequences: vec![],
            seed: None,
        };
        self.llm
            .generate(&format!("{system_prompt}\n\nQuestion: {query}\n\nAnswer:"), &config)
            .await
    }

    /// Fans the HyDE hypothetical document out to the dense side of a
    /// hybrid search while the literal query still drives the sparse side
    /// (§4.2, §4.6). Any failure degrades to an empty batch for this query
    /// variant rather than aborting the whole fan-out.
    async fn hyde_retrieve(&self, query: &str, owner: &str, session: Option<&str>) -> Vec<ComprehensiveResult> {
        let hyde_transform = self.hyde.transform(self.llm.as_ref(), query, HydeStyle::Informative).await;

        let rag = self.rag.read().await;
        let dense_vector = match rag.embeddings().embed_query(&hyde_transform.hypothetical_document) {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(query = query, error = %e, "HyDE embedding failed, skipping this query variant");
                return Vec::new();
            }
        };

        match rag.search_fused(query, &dense_vector, owner, session, CANDIDATES_PER_QUERY, HYDE_ALPHA).await {
            Ok(results) => results,
            Err(e) => {
                tracing::warn!(query = query, error = %e, "Hybrid retrieval failed, degrading to empty");
                Vec::new()
            }
        }
    }

    /// Two-stage C8 rerank: cross-encoder relevance (falling back to the
    /// fused score when no reranker is configured), then marginal-utility
    /// diversity selection over a fresh embedding of each candidate snippet.
    async fn rerank_top_k(&self, query: &str, candidates: Vec<ComprehensiveResult>) -> Vec<ComprehensiveResult> {
        if candidates.is_empty() {
            return candidates;
        }

        let rag = self.rag.read().await;

        let relevance: Vec<f32> = match rag.reranker() {
            Some(reranker) => {
                let pairs: Vec<(String, String)> =
                    candidates.iter().map(|c| (c.id.to_string(), c.snippet.clone())).collect();
                match reranker.rerank(query, &pairs, pairs.len()) {
                    Ok(scored) => {
                        let scores: HashMap<String, f32> = scored.into_iter().collect();
                        candidates.iter().map(|c| *scores.get(&c.id.to_string()).unwrap_or(&c.score)).collect()
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Cross-encoder reranking failed, using fusion scores");
                        candidates.iter().map(|c| c.score).collect()
                    }
                }
            }
            None => candidates.iter().map(|c| c.score).collect(),
        };

        let embeddings: Vec<Vec<f32>> = candidates
            .iter()
            .filter_map(|c| rag.embeddings().embed_document(&c.snippet).ok())
            .collect();
        let embeddings = if embeddings.len() == candidates.len() { embeddings } else { Vec::new() };

        let order = marginal_utility_selection(&relevance, &embeddings, RERANK_TOP_K, DIVERSITY_WEIGHT);
        order
            .into_iter()
            .map(|i| {
                let mut candidate = candidates[i].clone();
                candidate.score = relevance[i];
                candidate
            })
            .collect()
    }

    /// Validate → refine → critique → score, shared by both RAG branches
    /// (§4.14-§4.18).
    async fn finalize_answer(
        &self,
        query: &str,
        draft: String,
        complexity: AnswerComplexity,
        top_docs: &[String],
    ) -> (String, AnswerMetadata) {
        let structure = validate_answer_structure(&draft, complexity);
        let refinement = refine_answer(self.llm.as_ref(), &draft, &structure).await;
        let final_text = refinement.text;

        let density = analyze_density(&final_text);
        let naturalness = analyze_naturalness(&final_text);
        let critique = self_critique(self.llm.as_ref(), query, &final_text, top_docs).await;

        let overall = overall_score(structure.overall(), density.density_score, naturalness.naturalness_score, critique.confidence);
        let tier = QualityTier::from_overall(overall);

        let metadata = AnswerMetadata {
            complexity,
            retrieval_quality: None,
            used_web_search: false,
            confidence: critique.confidence,
            critique: Some(critique.raw),
            multi_queries: Vec::new(),
            structure_score: structure.overall(),
            density_score: density.density_score,
            naturalness_score: naturalness.naturalness_score,
            overall_quality_score: overall,
            quality_tier: tier,
            refinement_applied: refinement.applied,
            error: None,
        };

        (final_text, metadata)
    }

    /// Phase 2 — persist the turn to C11 and append a quality record.
    /// Best-effort: logged failures never surface to the caller.
    fn epilogue(&self, req: &AnswerRequest, envelope: &AnswerEnvelope) {
        let mut meta = HashMap::new();
        meta.insert("strategy".to_string(), envelope.strategy.as_str().to_string());
        if let Some(session_id) = &req.session_id {
            meta.insert("session_id".to_string(), session_id.clone());
        }
        self.memory.remember(&req.user_id, &req.query, &envelope.response, meta);

        let logger = self.quality_logger.clone();
        let record = QualityRecord::from_metadata(&req.query, &envelope.metadata, now());
        tokio::spawn(async move {
            logger.log(&record).await;
        });
    }
}

struct Preamble {
    memory_context: String,
    visual_context: String,
    optimized_query: String,
    multi_queries: Vec<String>,
}

fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

fn role_label(role: &ChatRole) -> &'static str {
    match role {
        ChatRole::System => "System",
        ChatRole::User => "User",
        ChatRole::Assistant => "Assistant",
        ChatRole::Tool => "Tool",
    }
}

fn build_memory_context(memories: &[ConversationTurn], profile: &UserProfile, supplied_summary: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(summary) = supplied_summary {
        if !summary.trim().is_empty() {
            parts.push(summary.trim().to_string());
        }
    }
    if !memories.is_empty() {
        let recalled = memories
            .iter()
            .rev()
            .map(|turn| format!("Q: {}\nA: {}", turn.query, turn.response))
            .collect::<Vec<_>>()
            .join("\n");
        parts.push(format!("Relevant past exchanges:\n{recalled}"));
    }
    if !profile.preferences.is_empty() {
        parts.push(format!("Known preferences: {}", profile.preferences.join("; ")));
    }
    if !profile.facts.is_empty() {
        parts.push(format!("Known facts: {}", profile.facts.join("; ")));
    }
    parts.join("\n\n")
}

fn build_conversation_context(history: &[ChatMessage], profile: &UserProfile) -> ConversationContext {
    let recent_messages: Vec<String> = history
        .iter()
        .rev()
        .take(MAX_HISTORY_TURNS)
        .filter_map(|m| m.content.clone())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();

    ConversationContext {
        recent_messages,
        concepts_mentioned: profile.recent_topics.clone(),
        ..Default::default()
    }
}

/// Deterministic cleaner for the rewriter's output (§4.5): strips known
/// prefixes an LLM-in-the-loop rewrite might prepend, and keeps only the
/// first line so a chatty rewrite can't leak explanation into the query
/// that gets embedded and searched.
fn clean_rewritten_query(rewritten: &str) -> String {
    const KNOWN_PREFIXES: &[&str] = &[
        "optimized query:",
        "rewritten query:",
        "query:",
        "search query:",
        "answer:",
    ];

    let first_line = rewritten.lines().next().unwrap_or(rewritten).trim();
    let lower = first_line.to_lowercase();
    for prefix in KNOWN_PREFIXES {
        if let Some(stripped) = lower.strip_prefix(prefix) {
            let offset = first_line.len() - stripped.len();
            return first_line[offset..].trim().to_string();
        }
    }
    first_line.to_string()
}

fn normalize_for_dedup(text: &str) -> String {
    text.trim().to_lowercase()
}

fn chunk_source_label(result: &ComprehensiveResult) -> String {
    if result.citation.title.is_empty() {
        result.citation.source.clone()
    } else {
        result.citation.title.clone()
    }
}

fn comprehensive_to_evidence(result: &ComprehensiveResult) -> Evidence {
    Evidence { content: result.snippet.clone(), source_label: chunk_source_label(result), score: result.score }
}

/// §4.13's reduce-phase citation convention: `[Source: name]` for real
/// evidence, `[Memory Summary]`/`[Visual Description]` for the two virtual
/// partials that don't come from retrieval.
fn format_citation_tag(source_label: &str) -> String {
    match source_label {
        "Memory Summary" | "Visual Description" => format!("[{source_label}]"),
        other => format!("[Source: {other}]"),
    }
}

fn evidence_to_document(evidence: &Evidence) -> EvidenceDocument {
    EvidenceDocument {
        content: evidence.content.clone(),
        source: evidence.source_label.clone(),
        score: evidence.score,
        metadata: HashMap::new(),
    }
}

/// Compresses each document independently (rather than the coarser
/// `compress_context`) so per-document `[Source: ...]` attribution survives
/// into the prompt (§4.10).
fn build_context_text(query: &str, docs: &[Evidence]) -> String {
    docs.iter()
        .filter_map(|doc| {
            let compressed = compress_chunk(&doc.content, query, 5);
            if compressed.trim().is_empty() {
                None
            } else {
                Some(format!("{}\n{}", format_citation_tag(&doc.source_label), compressed))
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Graph-RAG's reduce-phase context builder: partials are already
/// map-generated (or a short virtual summary), so unlike `build_context_text`
/// this doesn't run them through extractive compression again.
fn build_partial_context_text(partials: &[Evidence]) -> String {
    partials
        .iter()
        .filter(|p| !p.content.trim().is_empty())
        .map(|p| format!("{}\n{}", format_citation_tag(&p.source_label), p.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_system_prompt(schema: &AnswerSchema, memory_context: &str, visual_context: &str, context_text: &str) -> String {
    let mut sections = vec![format!(
        "Answer the user's question directly in the opening sentence, with no filler preamble. \
        Use headings or bullet points to structure the body.{} \
        Cite retrieved evidence inline as [Source: name]. \
        Target a total length between {} and {} words.",
        if schema.requires_next_steps { " End with a short next-steps section." } else { "" },
        schema.min_words,
        schema.max_words,
    )];

    if !memory_context.is_empty() {
        sections.push(format!("Conversation memory:\n{memory_context}"));
    }
    if !visual_context.is_empty() {
        sections.push(format!("Visual context:\n{visual_context}"));
    }
    if context_text.is_empty() {
        sections.push("No retrieved context is available. Answer from general knowledge and say so if uncertain.".to_string());
    } else {
        sections.push(format!("Retrieved context:\n{context_text}"));
    }

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_rewritten_query_strips_known_prefix() {
        assert_eq!(clean_rewritten_query("Optimized Query: what is the refund policy"), "what is the refund policy");
    }

    #[test]
    fn clean_rewritten_query_keeps_first_line_only() {
        let rewritten = "what is the refund policy\nThis resolves the pronoun 'it' to 'refund policy'.";
        assert_eq!(clean_rewritten_query(rewritten), "what is the refund policy");
    }

    #[test]
    fn clean_rewritten_query_passes_through_plain_query() {
        assert_eq!(clean_rewritten_query("what is the refund policy"), "what is the refund policy");
    }

    #[test]
    fn normalize_for_dedup_folds_case_and_whitespace() {
        assert_eq!(normalize_for_dedup("  Refund Policy  "), "refund policy");
        assert_eq!(normalize_for_dedup("refund policy"), "refund policy");
    }

    #[test]
    fn strategy_override_maps_to_expected_complexity() {
        assert_eq!(StrategyOverride::DirectGeneration.complexity(), AnswerComplexity::Simple);
        assert_eq!(StrategyOverride::VectorRag.complexity(), AnswerComplexity::SingleHop);
        assert_eq!(StrategyOverride::GraphRag.complexity(), AnswerComplexity::MultiHop);
    }

    #[test]
    fn build_context_text_skips_docs_that_compress_to_empty() {
        let docs = vec![Evidence { content: String::new(), source_label: "a.pdf".to_string(), score: 0.9 }];
        assert_eq!(build_context_text("query", &docs), "");
    }

    #[test]
    fn build_context_text_includes_source_label() {
        let docs = vec![Evidence {
            content: "The refund window is 30 days from purchase.".to_string(),
            source_label: "policy.pdf".to_string(),
            score: 0.9,
        }];
        let text = build_context_text("refund window", &docs);
        assert!(text.contains("[Source: policy.pdf]"));
    }

    #[test]
    fn answer_request_new_has_empty_optional_fields() {
        let req = AnswerRequest::new("hello", "user-1");
        assert_eq!(req.query, "hello");
        assert_eq!(req.user_id, "user-1");
        assert!(req.session_id.is_none());
        assert!(req.history.is_empty());
        assert!(req.strategy_override.is_none());
    }
}

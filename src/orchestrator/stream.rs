//! Streaming variant of `answer()` (§4.13, §6): the draft/synthesis call is
//! streamed token by token; validation, refinement, critique, and scoring
//! still run once the stream completes, then surface as a terminal event.
//! Retrieval, CRAG, and compression are identical to the non-streaming path
//! — only the final generation call and its delivery differ.

use std::collections::HashSet;

use tokio::sync::mpsc;

use crate::answer::{AnswerEnvelope, AnswerMetadata, EvidenceDocument, Strategy};
use crate::llm::GenerationConfig;
use crate::rag::{run_crag, AnswerComplexity, Evidence};

use super::{
    build_context_text, build_system_prompt, normalize_for_dedup, AnswerRequest,
    PipelineOrchestrator, Preamble, StrategyOverride,
};
use crate::answer::schema::AnswerSchema;

/// One event of a streamed answer. `MetadataStart` fires as soon as the
/// strategy is decided, before any token is produced; `Content` carries one
/// generated token; `Done` carries the final (possibly refined) response and
/// its full metadata; `Error` fires in place of `Done` on a hard failure.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    MetadataStart { strategy: Strategy, complexity: AnswerComplexity },
    Content(String),
    Done { response: String, documents: Vec<EvidenceDocument>, metadata: Box<AnswerMetadata> },
    Error(String),
}

impl PipelineOrchestrator {
    /// Runs the pipeline exactly like `answer()`, but streams the draft
    /// call's tokens to `sink` as they arrive instead of waiting for the
    /// complete string. The receiver end of `sink` is how a caller (an HTTP
    /// SSE handler, a CLI) drives incremental rendering.
    pub async fn stream_answer(&self, req: AnswerRequest, sink: mpsc::Sender<StreamEvent>) {
        let preamble = self.preamble(&req).await;

        let complexity = req
            .strategy_override
            .map(StrategyOverride::complexity)
            .unwrap_or_else(|| self.complexity_classifier.classify(&preamble.optimized_query));

        let strategy = match complexity {
            AnswerComplexity::Simple => Strategy::Direct,
            AnswerComplexity::SingleHop => Strategy::VectorRag,
            AnswerComplexity::MultiHop => Strategy::GraphRag,
        };
        if sink.send(StreamEvent::MetadataStart { strategy, complexity }).await.is_err() {
            return;
        }

        let prepared = match complexity {
            AnswerComplexity::Simple => self.prepare_direct(&req, &preamble),
            AnswerComplexity::SingleHop => self.prepare_vector_rag(&req, &preamble).await,
            AnswerComplexity::MultiHop => self.prepare_graph_rag(&req, &preamble).await,
        };

        let config = GenerationConfig {
            max_tokens: prepared.max_tokens,
            temperature: 0.3,
            top_p: 0.9,
            top_k: 40,
            repetition_penalty: 1.1,
            stop_sequences: vec![],
            seed: None,
        };
        let prompt = format!("{}\n\nQuestion: {}\n\nAnswer:", prepared.system_prompt, preamble.optimized_query);

        let mut token_stream = match self.llm.generate_stream(&prompt, &config).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "Streaming draft generation failed");
                let _ = sink.send(StreamEvent::Error(format!("LLM unreachable: {e}"))).await;
                return;
            }
        };

        let mut draft = String::new();
        while let Some(token) = token_stream.next().await {
            draft.push_str(&token);
            if sink.send(StreamEvent::Content(token)).await.is_err() {
                return;
            }
        }

        let (response, mut metadata) = self
            .finalize_answer(&preamble.optimized_query, draft, complexity, &prepared.top_doc_texts)
            .await;
        metadata.retrieval_quality = prepared.retrieval_quality;
        metadata.used_web_search = prepared.used_web_search;
        metadata.multi_queries = preamble.multi_queries.clone();

        let envelope = AnswerEnvelope {
            query: preamble.optimized_query.clone(),
            strategy,
            response: response.clone(),
            documents: prepared.documents.clone(),
            metadata: metadata.clone(),
        };
        self.epilogue(&req, &envelope);

        let _ = sink
            .send(StreamEvent::Done { response, documents: prepared.documents, metadata: Box::new(metadata) })
            .await;
    }

    fn prepare_direct(&self, req: &AnswerRequest, preamble: &Preamble) -> PreparedGeneration {
        let mut prompt = String::new();
        for turn in &req.history {
            if let Some(content) = &turn.content {
                prompt.push_str(&format!("{content}\n"));
            }
        }
        if !preamble.visual_context.is_empty() {
            prompt.push_str(&format!("Visual context: {}\n", preamble.visual_context));
        }
        PreparedGeneration {
            system_prompt: prompt,
            top_doc_texts: Vec::new(),
            documents: Vec::new(),
            retrieval_quality: None,
            used_web_search: false,
            max_tokens: 300,
        }
    }

    async fn prepare_vector_rag(&self, req: &AnswerRequest, preamble: &Preamble) -> PreparedGeneration {
        let owner = req.user_id.as_str();
        let session = req.session_id.as_deref();

        let queries: Vec<String> = if preamble.multi_queries.is_empty() {
            vec![preamble.optimized_query.clone()]
        } else {
            preamble.multi_queries.clone()
        };

        let batches = futures::future::join_all(queries.iter().map(|q| self.hyde_retrieve(q, owner, session))).await;

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
        let evidence: Vec<Evidence> = reranked.iter().map(super::comprehensive_to_evidence).collect();

        let crag_outcome = run_crag(
            &self.retrieval_evaluator,
            self.llm.as_ref(),
            self.web_search.as_ref(),
            &preamble.optimized_query,
            evidence,
            best_fused_score,
        )
        .await;

        let top_docs: Vec<Evidence> = crag_outcome.evidence.into_iter().take(super::MAX_EVIDENCE_DOCS).collect();
        let context_text = build_context_text(&preamble.optimized_query, &top_docs);
        let schema = AnswerSchema::for_complexity(AnswerComplexity::SingleHop);
        let system_prompt = build_system_prompt(&schema, &preamble.memory_context, &preamble.visual_context, &context_text);

        PreparedGeneration {
            system_prompt,
            top_doc_texts: top_docs.iter().map(|d| d.content.clone()).collect(),
            documents: top_docs.iter().map(super::evidence_to_document).collect(),
            retrieval_quality: Some(crag_outcome.grade),
            used_web_search: crag_outcome.used_web_search,
            max_tokens: 900,
        }
    }

    async fn prepare_graph_rag(&self, req: &AnswerRequest, preamble: &Preamble) -> PreparedGeneration {
        let owner = req.user_id.as_str();
        let session = req.session_id.as_deref();

        let community_summaries: Vec<(String, String)> = {
            let rag = self.rag.read().await;
            let embedder = Some(rag.embeddings());
            let mut graph = self.graph.write().await;
            graph
                .search_communities(&preamble.optimized_query, embedder, super::MAX_COMMUNITIES, owner)
                .into_iter()
                .filter_map(|c| c.summary.as_ref().map(|s| (c.id.clone(), s.clone())))
                .collect()
        };

        let mut chunk_hits = self.hyde_retrieve(&preamble.optimized_query, owner, session).await;
        chunk_hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        chunk_hits.truncate(super::GRAPH_RAG_CHUNK_POOL);
        let chunk_partial_pool: Vec<&crate::types::ComprehensiveResult> =
            chunk_hits.iter().take(super::GRAPH_RAG_CHUNK_PARTIALS).collect();

        if community_summaries.is_empty() && chunk_partial_pool.is_empty() {
            return self.prepare_vector_rag(req, preamble).await;
        }

        let community_partials_fut = futures::future::join_all(community_summaries.iter().map(|(id, summary)| {
            self.map_partial_answer(&preamble.optimized_query, &format!("community {id}"), summary)
        }));
        let chunk_partials_fut = futures::future::join_all(
            chunk_partial_pool
                .iter()
                .map(|hit| self.map_partial_answer(&preamble.optimized_query, &super::chunk_source_label(hit), &hit.snippet)),
        );
        let (community_partials, chunk_partials) = futures::join!(community_partials_fut, chunk_partials_fut);

        let mut evidence: Vec<Evidence> = Vec::new();
        for ((id, _), partial) in community_summaries.iter().zip(community_partials.iter()) {
            evidence.push(Evidence { content: partial.clone(), source_label: format!("community:{id}"), score: 1.0 });
        }
        for (hit, partial) in chunk_partial_pool.iter().zip(chunk_partials.iter()) {
            evidence.push(Evidence { content: partial.clone(), source_label: super::chunk_source_label(hit), score: hit.score });
        }
        if !preamble.memory_context.is_empty() {
            evidence.push(Evidence { content: preamble.memory_context.clone(), source_label: "Memory Summary".to_string(), score: 1.0 });
        }
        if !preamble.visual_context.is_empty() {
            evidence.push(Evidence { content: preamble.visual_context.clone(), source_label: "Visual Description".to_string(), score: 1.0 });
        }

        let context_text = super::build_partial_context_text(&evidence);
        let schema = AnswerSchema::for_complexity(AnswerComplexity::MultiHop);
        let system_prompt = build_system_prompt(&schema, &preamble.memory_context, &preamble.visual_context, &context_text);

        let documents = evidence
            .iter()
            .filter(|e| e.source_label != "Memory Summary" && e.source_label != "Visual Description")
            .take(super::MAX_EVIDENCE_DOCS)
            .map(super::evidence_to_document)
            .collect();

        PreparedGeneration {
            system_prompt,
            top_doc_texts: evidence.iter().map(|d| d.content.clone()).collect(),
            documents,
            retrieval_quality: None,
            used_web_search: false,
            max_tokens: 1400,
        }
    }
}

struct PreparedGeneration {
    system_prompt: String,
    top_doc_texts: Vec<String>,
    documents: Vec<EvidenceDocument>,
    retrieval_quality: Option<crate::rag::RetrievalGrade>,
    used_web_search: bool,
    max_tokens: usize,
}

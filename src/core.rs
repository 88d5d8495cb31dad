//! Top-level facade (§6): wires every collaborator together behind one
//! handle so a host (HTTP server, CLI, desktop shell) never touches the
//! storage/graph/memory internals directly. Grounded on the teacher's
//! `rag_engine.rs` construction idiom (load config, build each collaborator,
//! hand back one struct) lifted onto the dependency-injected
//! [`PipelineOrchestrator`] (§9 redesign: no global singletons).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::RwLock as AsyncRwLock;
use uuid::Uuid;

use crate::answer::AnswerEnvelope;
use crate::collaborators::{VisualContextProvider, WebSearchProvider};
use crate::config::RAGConfig;
use crate::graph::{build_graph_for_document, Community, KnowledgeGraph};
use crate::llm::LLMProvider;
use crate::memory::UserMemoryStore;
use crate::orchestrator::stream::StreamEvent;
use crate::orchestrator::{AnswerRequest, PipelineOrchestrator};
use crate::processing::parser::DocumentParser;
use crate::quality::{AggregateReport, QualityLogger};
use crate::rag_engine::RAGEngine;
use crate::types::{Citation, DocumentFormat, MetadataFilter};

const GRAPH_FILE: &str = "graph.json";
const QUALITY_LOG_FILE: &str = "quality_metrics.jsonl";
/// Upper bound on rows scanned for `stats()`; large enough for any single
/// tenant's corpus without risking an overflow-prone unbounded limit.
const STATS_SCAN_LIMIT: usize = 1_000_000;

/// Per-owner corpus counts returned by [`OmniRagCore::stats`] (§6).
#[derive(Debug, Clone, Serialize)]
pub struct CoreStats {
    pub documents: usize,
    pub chunks: usize,
}

/// Owns the collaborators named in §9's redesign flag and assembles them
/// into the [`PipelineOrchestrator`]. Constructed once at startup; a host
/// holds an `Arc<OmniRagCore>` and drives it through `answer`/
/// `stream_answer` plus the secondary operations in §6.
pub struct OmniRagCore {
    rag: Arc<AsyncRwLock<RAGEngine>>,
    graph: Arc<AsyncRwLock<KnowledgeGraph>>,
    llm: Arc<dyn LLMProvider>,
    parser: DocumentParser,
    orchestrator: PipelineOrchestrator,
    graph_path: std::path::PathBuf,
    quality_logger: Arc<QualityLogger>,
}

impl OmniRagCore {
    /// Builds every collaborator from `config` and loads any persisted
    /// graph from `<data_dir>/graph.json` (§6 persisted state layout).
    /// Fails only if a hard collaborator (the embedder backing the vector
    /// index) cannot initialize — `ConfigError`, fatal per §7.
    pub async fn new(config: RAGConfig, llm: Arc<dyn LLMProvider>) -> Result<Self> {
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        std::fs::create_dir_all(&config.data_dir)
            .context("Failed to create data directory")?;

        let rag_engine = RAGEngine::new(config.clone())
            .await
            .context("Failed to initialize RAG engine")?;
        let rag = Arc::new(AsyncRwLock::new(rag_engine));

        let graph_path = config.data_dir.join(GRAPH_FILE);
        let graph = if graph_path.exists() {
            KnowledgeGraph::load(&graph_path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to load persisted graph, starting empty");
                KnowledgeGraph::new()
            })
        } else {
            KnowledgeGraph::new()
        };
        let graph = Arc::new(AsyncRwLock::new(graph));

        let memory = Arc::new(UserMemoryStore::new(config.data_dir.clone()));
        let quality_logger = Arc::new(QualityLogger::new(config.data_dir.join(QUALITY_LOG_FILE)));

        let orchestrator = PipelineOrchestrator::new(
            rag.clone(),
            graph.clone(),
            memory,
            llm.clone(),
            quality_logger.clone(),
        );

        Ok(Self {
            rag,
            graph,
            llm,
            parser: DocumentParser::new(),
            orchestrator,
            graph_path,
            quality_logger,
        })
    }

    pub fn with_web_search(mut self, web_search: Arc<dyn WebSearchProvider>) -> Self {
        self.orchestrator = self.orchestrator.with_web_search(web_search);
        self
    }

    pub fn with_visual_context(mut self, visual: Arc<dyn VisualContextProvider>) -> Self {
        self.orchestrator = self.orchestrator.with_visual_context(visual);
        self
    }

    /// §6 primary operation.
    pub async fn answer(&self, req: AnswerRequest) -> AnswerEnvelope {
        self.orchestrator.answer(req).await
    }

    /// §6 primary operation, streaming variant.
    pub async fn stream_answer(&self, req: AnswerRequest, sink: mpsc::Sender<StreamEvent>) {
        self.orchestrator.stream_answer(req, sink).await
    }

    /// §6 `ingest_document`: UTF-8 text extraction (C3's front door, binary
    /// decoding is an external collaborator's job per §3 Non-goals),
    /// chunking, embedding, and dual dense/sparse indexing (C2). Acquires
    /// the single-writer lock on the index for the whole
    /// read-modify-write-persist sequence (§5).
    pub async fn ingest_document(
        &self,
        bytes: &[u8],
        filename: &str,
        mut metadata: HashMap<String, String>,
        owner_id: &str,
    ) -> Result<Vec<Uuid>> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("txt")
            .to_lowercase();
        let format = DocumentFormat::from_extension(&extension);

        let content = self.parser.decode_bytes(bytes, &extension)?;

        metadata.entry("title".to_string()).or_insert_with(|| filename.to_string());
        metadata.entry("file_path".to_string()).or_insert_with(|| filename.to_string());

        let citation = Citation {
            title: filename.to_string(),
            source: filename.to_string(),
            ..Citation::default()
        };

        let mut rag = self.rag.write().await;
        rag.add_document(&content, format, metadata, citation, owner_id)
            .await
            .context("Failed to ingest document")
    }

    /// §6 `build_graph_for_document`: entity/relationship extraction,
    /// insertion, and community recomputation as one unit of work under the
    /// graph's writer lock (§5). Soft-fails per C12's policy — LLM/parse
    /// failures leave the graph untouched rather than propagating.
    pub async fn build_graph_for_document(
        &self,
        document_id: &str,
        text: &str,
        owner_id: &str,
    ) -> Result<()> {
        let mut graph = self.graph.write().await;
        build_graph_for_document(&mut graph, self.llm.as_ref(), text, document_id, owner_id).await?;
        graph.save(&self.graph_path).context("Failed to persist graph")
    }

    /// §6 `rebuild_graph`: recompute Louvain communities and regenerate
    /// summaries for every community across the whole store (e.g. after a
    /// batch of `build_graph_for_document` calls, or a membership-changing
    /// deletion). Summaries for communities whose membership is unchanged
    /// are reused (§4.4).
    pub async fn rebuild_graph(&self) -> Result<()> {
        let mut graph = self.graph.write().await;
        graph.detect_communities();
        graph.generate_community_summaries(self.llm.as_ref()).await?;
        graph.save(&self.graph_path).context("Failed to persist graph")
    }

    /// §6 `graph_communities`: communities with at least one member entity
    /// owned by `owner_id` (the coarse any-member-matches filter, §9 Open
    /// Question).
    pub async fn graph_communities(&self, owner_id: &str) -> Vec<Community> {
        let graph = self.graph.read().await;
        graph
            .communities_for_owner(owner_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// §6 `stats`: document/chunk counts scoped to `owner_id` via the same
    /// owner-filter predicate retrieval uses (I4/P1) — never a raw global
    /// count, which would leak corpus size across tenants.
    pub async fn stats(&self, owner_id: &str) -> Result<CoreStats> {
        let rag = self.rag.read().await;
        let filter = MetadataFilter {
            owner_id: Some(owner_id.to_string()),
            ..Default::default()
        };
        let rows = rag
            .list_documents(Some(filter), STATS_SCAN_LIMIT)
            .await
            .context("Failed to compute stats")?;

        let mut doc_ids = std::collections::HashSet::new();
        for row in &rows {
            if let Some(doc_id) = row.metadata.get("doc_id") {
                doc_ids.insert(doc_id.clone());
            }
        }

        Ok(CoreStats {
            documents: doc_ids.len(),
            chunks: rows.len(),
        })
    }

    /// C18's rolling aggregate report — averages per complexity bucket and
    /// the overall refinement rate, read back from `quality_metrics.jsonl`.
    pub async fn quality_report(&self) -> AggregateReport {
        self.quality_logger.aggregate_report().await
    }
}

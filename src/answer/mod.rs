//! Answer Envelope, Schema & Validator (C14): the structural contract every
//! generated answer is checked against, keyed by complexity, plus the typed
//! return value the orchestrator hands back to its caller.

pub mod refiner;
pub mod schema;

pub use refiner::{refine_answer, RefinementOutcome};
pub use schema::{validate_answer_structure, AnswerSchema, StructureScore};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::rag::AnswerComplexity;
use crate::rag::crag::RetrievalGrade;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    Direct,
    VectorRag,
    GraphRag,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::VectorRag => "vector_rag",
            Strategy::GraphRag => "graph_rag",
        }
    }
}

/// One piece of evidence surfaced to the user. A subset of what generation
/// actually consumed (I5/P7) — never the full compressed context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceDocument {
    pub content: String,
    pub source: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityTier {
    Excellent,
    Good,
    Acceptable,
    NeedsImprovement,
}

impl QualityTier {
    pub fn from_overall(overall: f32) -> Self {
        if overall >= 0.85 {
            QualityTier::Excellent
        } else if overall >= 0.70 {
            QualityTier::Good
        } else if overall >= 0.50 {
            QualityTier::Acceptable
        } else {
            QualityTier::NeedsImprovement
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Excellent => "Excellent",
            QualityTier::Good => "Good",
            QualityTier::Acceptable => "Acceptable",
            QualityTier::NeedsImprovement => "Needs-Improvement",
        }
    }
}

/// Typed metadata record (§9 "metadata spread" redesign flag): only these
/// fields are ever populated or persisted, never a free-form map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerMetadata {
    pub complexity: AnswerComplexity,
    pub retrieval_quality: Option<RetrievalGrade>,
    pub used_web_search: bool,
    pub confidence: f32,
    pub critique: Option<String>,
    pub multi_queries: Vec<String>,
    pub structure_score: f32,
    pub density_score: f32,
    pub naturalness_score: f32,
    pub overall_quality_score: f32,
    pub quality_tier: QualityTier,
    pub refinement_applied: bool,
    /// Set only on a hard failure surfaced per §7 (`LLMError`/`EmbedError`).
    pub error: Option<String>,
}

impl Default for AnswerMetadata {
    fn default() -> Self {
        Self {
            complexity: AnswerComplexity::Simple,
            retrieval_quality: None,
            used_web_search: false,
            confidence: 0.5,
            critique: None,
            multi_queries: Vec::new(),
            structure_score: 0.0,
            density_score: 0.0,
            naturalness_score: 0.0,
            overall_quality_score: 0.0,
            quality_tier: QualityTier::NeedsImprovement,
            refinement_applied: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerEnvelope {
    pub query: String,
    pub strategy: Strategy,
    pub response: String,
    /// At most 5 (§3 data model).
    pub documents: Vec<EvidenceDocument>,
    pub metadata: AnswerMetadata,
}

impl AnswerEnvelope {
    /// Error envelope for a hard failure (`LLMError`/`EmbedError`, §7): empty
    /// response, no documents, the failure recorded in metadata.
    pub fn error(query: &str, strategy: Strategy, complexity: AnswerComplexity, message: String) -> Self {
        Self {
            query: query.to_string(),
            strategy,
            response: String::new(),
            documents: Vec::new(),
            metadata: AnswerMetadata {
                complexity,
                retrieval_quality: Some(RetrievalGrade::Incorrect),
                confidence: 0.5,
                error: Some(message),
                ..AnswerMetadata::default()
            },
        }
    }
}

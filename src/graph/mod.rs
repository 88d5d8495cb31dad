pub mod entity_extractor;
pub mod knowledge_graph;

pub use entity_extractor::{build_graph_for_document, extract_from_text};
pub use knowledge_graph::{Community, Entity, KnowledgeGraph, Relationship};

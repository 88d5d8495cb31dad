pub mod cross_encoder;
pub mod diversity;
pub mod llm_reranker;

pub use cross_encoder::CrossEncoderReranker;
pub use diversity::marginal_utility_selection;
pub use llm_reranker::llm_rerank;

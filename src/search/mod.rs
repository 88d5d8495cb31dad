pub mod hybrid;
pub mod text_search;

pub use hybrid::{alpha_rrf, score_aware_rrf, HybridResult, HybridSource};
pub use text_search::TextSearch;

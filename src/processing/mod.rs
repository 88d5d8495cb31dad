pub mod chunker;
pub mod parser;

pub use chunker::{ChunkResult, ContextualChunkResult, TextChunker};
pub use parser::{DocumentParser, ParsedDocument};

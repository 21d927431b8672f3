pub mod chunker;
pub mod lopdf_parser;
pub mod pdf;

pub use chunker::{ChunkSpan, TextChunker};
pub use lopdf_parser::LoPdfParser;
pub use pdf::extract_pages;

pub mod lance_store;

pub use lance_store::{classify_store_error, DimensionMismatch, SearchHit, VectorStore};

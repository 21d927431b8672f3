pub mod hybrid;
pub mod text_search;

pub use hybrid::{union_dedup, HybridSource};
pub use text_search::SparseIndex;

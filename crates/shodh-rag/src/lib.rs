//! A conversational retrieval-augmented question-answering engine over a
//! personal bibliographic PDF library: hybrid dense+sparse retrieval,
//! query condensation, cross-encoder reranking, diversity filtering, and
//! multi-profile data partitioning. See DESIGN.md for the grounding
//! ledger and SPEC_FULL.md for the full requirements this crate
//! implements.

pub mod chat_orchestrator;
pub mod config;
pub mod conversation;
pub mod embeddings;
pub mod error;
pub mod indexing;
pub mod llm;
pub mod processing;
pub mod profile;
pub mod rag;
pub mod reranking;
pub mod search;
pub mod storage;
pub mod types;

pub use chat_orchestrator::ChatOrchestrator;
pub use config::{GenerationParams, ProfileSettings, RagConfig};
pub use conversation::ConversationStore;
pub use embeddings::EmbeddingService;
pub use error::{RagError, RagResult};
pub use indexing::{IndexBuilder, IndexReport};
pub use llm::{provider_for_id, Provider};
pub use profile::ProfileManager;
pub use reranking::CrossEncoderReranker;
pub use search::SparseIndex;
pub use storage::VectorStore;
pub use types::{
    BibliographicItem, ChatTurnResult, Chunk, ChunkMetadata, Citation, Evidence, MetadataFilter,
    Message, Role, Session,
};

//! Error taxonomy for the RAG core.
//!
//! Five kinds, matching the propagation policy: C3 failures are local to
//! their item (never this enum, just a skip reason), C1/C2/C4 failures
//! abort the enclosing retrieval/index call, C6 failures abort the chat
//! turn but leave the user message persisted, C7/C10 validation failures
//! are surfaced with the offending field or resource name.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Embedding dimension or model id disagrees between query and store.
    /// Fatal for the operation; the caller should re-index.
    #[error("configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    /// PDF unreadable or missing. Non-fatal for an index run as a whole —
    /// the index builder turns this into a skip reason and continues.
    #[error("failed to extract {path}: {source}")]
    Extraction {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// Durable read/write failure in the vector or sparse store.
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),

    /// LLM HTTP, authentication, rate-limit, or content-policy failure.
    /// Never masked by falling back to raw snippets as the answer.
    #[error("provider '{provider}' error: {source}")]
    Provider {
        provider: String,
        #[source]
        source: anyhow::Error,
    },

    /// Malformed request, missing session, unknown profile.
    #[error("validation error: {0}")]
    Validation(String),

    /// Generation failed or timed out during synthesis or condensation.
    #[error("generation error: {0}")]
    Generation(String),
}

pub type RagResult<T> = Result<T, RagError>;

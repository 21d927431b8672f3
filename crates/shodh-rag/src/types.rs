//! Core data model: bibliographic items, chunks, citations, messages,
//! sessions. See spec.md §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A reference-manager entry, supplied read-only by an external enumerator.
/// The core never writes to the bibliographic source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BibliographicItem {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub pdf_paths: Vec<String>,
}

/// One page of extracted PDF text. Never persisted — consumed immediately
/// by the chunker.
#[derive(Debug, Clone)]
pub struct PageText {
    pub page_number: usize,
    pub text: String,
}

/// Denormalized bibliographic metadata attached to a chunk for display,
/// so answers stay readable even if the source item is later deleted.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChunkMetadata {
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub pdf_path: String,
}

/// The unit of retrieval: an 800-character-target passage tagged with its
/// originating page.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub item_id: String,
    pub chunk_index: u32,
    pub text: String,
    pub page: usize,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    pub fn chunk_id(&self) -> String {
        format!("{}:{}", self.item_id, self.chunk_index)
    }
}

/// Internal record shape written to the vector store. Mirrors `Chunk` plus
/// the embedding vector and the collection it belongs to.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub item_id: String,
    pub chunk_index: u32,
    pub text: String,
    pub page: i64,
    pub vector: Vec<f32>,
    pub metadata_json: String,
    pub created_at: i64,
}

/// A filter over which source items a query should be restricted to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub item_ids: Option<Vec<String>>,
}

impl MetadataFilter {
    /// Render as a LanceDB SQL-ish predicate, or `None` for no filter.
    pub fn to_predicate(&self) -> Option<String> {
        let ids = self.item_ids.as_ref()?;
        if ids.is_empty() {
            return None;
        }
        let list = ids
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        Some(format!("item_id IN ({list})"))
    }
}

/// A snippet of evidence attached to an assistant message: citation id
/// (1-based, dense, sequential), snippet text, page, denormalized
/// metadata. Ordered relevance-descending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub citation_id: u32,
    pub item_id: String,
    pub chunk_id: String,
    pub snippet: String,
    pub page: usize,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Ordered element of a session. Only assistant messages carry evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Vec<Evidence>>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            created_at: Utc::now(),
            evidence: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
            evidence: None,
        }
    }

    pub fn assistant(content: impl Into<String>, evidence: Vec<Evidence>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
            evidence: Some(evidence),
        }
    }
}

/// A conversation. Owns its messages exclusively; the first message is
/// always the immutable system bootstrap, persisted exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Session {
    pub fn new(title: impl Into<String>, system_prompt: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Count of prior user turns — used by the orchestrator to decide
    /// first-turn vs. follow-up behavior.
    pub fn user_turn_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }
}

/// A citation surfaced to the caller, 1-based and dense within an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub id: u32,
    pub title: String,
    pub authors: Vec<String>,
    pub year: Option<i32>,
    pub pdf_path: String,
}

/// Response returned by the chat orchestrator for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurnResult {
    pub summary: String,
    pub citations: Vec<Citation>,
    pub snippets: Vec<Evidence>,
}

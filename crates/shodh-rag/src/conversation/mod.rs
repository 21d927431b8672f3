//! Conversation store (C7): sessions, append-only messages, and a
//! token-budget-trimmed view of history for prompt assembly. Grounded on
//! the teacher's `SpaceManager` (Mutex-guarded in-memory state mirrored to
//! JSON on disk, migrate-then-load bootstrap), but one JSON file per
//! session rather than one file for the whole store — a session's message
//! list only grows by appending, so there is no reason for concurrent
//! sessions to contend on a single read-modify-write file.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::RagError;
use crate::types::{Evidence, Message, Session};

pub struct ConversationStore {
    sessions_dir: PathBuf,
    cache: Mutex<HashMap<String, Session>>,
}

impl ConversationStore {
    pub fn new(sessions_dir: PathBuf) -> Self {
        std::fs::create_dir_all(&sessions_dir).ok();
        Self {
            sessions_dir,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_dir.join(format!("{id}.json"))
    }

    fn persist(&self, session: &Session) -> Result<(), RagError> {
        let path = self.session_path(&session.id);
        let data = serde_json::to_string_pretty(session)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to serialize session: {e}")))?;
        std::fs::write(&path, data)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to write {}: {e}", path.display())))?;
        Ok(())
    }

    fn load_from_disk(&self, id: &str) -> Result<Session, RagError> {
        let path = self.session_path(id);
        let data = std::fs::read_to_string(&path)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&data)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to parse {}: {e}", path.display())))
    }

    pub fn create_session(&self, title: &str, system_prompt: &str) -> Result<Session, RagError> {
        let session = Session::new(title, system_prompt);
        self.persist(&session)?;
        self.cache.lock().insert(session.id.clone(), session.clone());
        Ok(session)
    }

    pub fn get_session(&self, id: &str) -> Result<Session, RagError> {
        if let Some(session) = self.cache.lock().get(id).cloned() {
            return Ok(session);
        }
        let session = self.load_from_disk(id)?;
        self.cache.lock().insert(id.to_string(), session.clone());
        Ok(session)
    }

    pub fn append_user_message(&self, id: &str, content: impl Into<String>) -> Result<Session, RagError> {
        self.mutate(id, |session| session.messages.push(Message::user(content)))
    }

    pub fn append_assistant_message(
        &self,
        id: &str,
        content: impl Into<String>,
        evidence: Vec<Evidence>,
    ) -> Result<Session, RagError> {
        self.mutate(id, |session| session.messages.push(Message::assistant(content, evidence)))
    }

    fn mutate(&self, id: &str, f: impl FnOnce(&mut Session)) -> Result<Session, RagError> {
        let mut session = self.get_session(id)?;
        f(&mut session);
        session.updated_at = chrono::Utc::now();
        self.persist(&session)?;
        self.cache.lock().insert(id.to_string(), session.clone());
        Ok(session)
    }

    pub fn delete_session(&self, id: &str) -> Result<(), RagError> {
        self.cache.lock().remove(id);
        let path = self.session_path(id);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| RagError::Store(anyhow::anyhow!("failed to delete {}: {e}", path.display())))?;
        }
        Ok(())
    }

    /// List session summaries (id, title, updated_at), most recently
    /// updated first. Reads every session file — fine at the scale of a
    /// personal library's conversation history.
    pub fn list_sessions(&self) -> Result<Vec<Session>, RagError> {
        let mut sessions = Vec::new();
        let entries = std::fs::read_dir(&self.sessions_dir)
            .map_err(|e| RagError::Store(anyhow::anyhow!("failed to read sessions dir: {e}")))?;

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Ok(session) = self.get_session(stem) {
                    sessions.push(session);
                }
            }
        }

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }
}

/// Trim a session's message history to an approximate character budget
/// for prompt assembly. The system bootstrap message is always kept;
/// remaining messages are kept most-recent-first until the budget is
/// exhausted. This is a character-length proxy for a token count — no
/// tokenizer is run just to decide what history fits, since an
/// approximate budget is all the chat orchestrator needs.
pub fn trimmed_history(session: &Session, max_chars: usize) -> Vec<Message> {
    let mut system: Vec<Message> = session
        .messages
        .iter()
        .filter(|m| m.role == crate::types::Role::System)
        .cloned()
        .collect();

    let rest: Vec<&Message> = session
        .messages
        .iter()
        .filter(|m| m.role != crate::types::Role::System)
        .collect();

    let mut budget = max_chars.saturating_sub(system.iter().map(|m| m.content.len()).sum());
    let mut kept: Vec<Message> = Vec::new();
    for message in rest.into_iter().rev() {
        if message.content.len() > budget && !kept.is_empty() {
            break;
        }
        budget = budget.saturating_sub(message.content.len());
        kept.push(message.clone());
    }
    kept.reverse();

    system.append(&mut kept);
    system
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        let dir = tempfile::tempdir().unwrap();
        ConversationStore::new(dir.into_path())
    }

    #[test]
    fn create_and_fetch_round_trips() {
        let store = store();
        let session = store.create_session("My Session", "system prompt").unwrap();
        let fetched = store.get_session(&session.id).unwrap();
        assert_eq!(fetched.title, "My Session");
        assert_eq!(fetched.messages.len(), 1);
    }

    #[test]
    fn append_persists_across_cache_eviction() {
        let store = store();
        let session = store.create_session("S", "sys").unwrap();
        store.append_user_message(&session.id, "hello").unwrap();
        store.cache.lock().clear();
        let reloaded = store.get_session(&session.id).unwrap();
        assert_eq!(reloaded.messages.len(), 2);
        assert_eq!(reloaded.user_turn_count(), 1);
    }

    #[test]
    fn delete_removes_session() {
        let store = store();
        let session = store.create_session("S", "sys").unwrap();
        store.delete_session(&session.id).unwrap();
        assert!(store.get_session(&session.id).is_err());
    }

    #[test]
    fn trimmed_history_always_keeps_system_message() {
        let mut session = Session::new("S", "sys");
        for i in 0..20 {
            session.messages.push(Message::user(format!("message number {i}")));
        }
        let trimmed = trimmed_history(&session, 50);
        assert_eq!(trimmed[0].role, crate::types::Role::System);
        assert!(trimmed.len() < session.messages.len());
    }
}

//! Query condenser (C8): decide whether a follow-up needs rewriting into a
//! standalone retrieval query, and perform that rewrite through an LLM
//! provider. Grounded on `rag::query_rewriter::QueryRewriter`'s heuristic
//! style (`should_retrieve_documents`) and the "caller supplies an LLM
//! generation closure" shape of `rewrite_with_context`, narrowed to the
//! specific pronoun/ellipsis/comparative rule and the C6 `Provider` trait.

use crate::config::GenerationParams;
use crate::error::RagError;
use crate::llm::{ChatMessage, Provider};
use crate::types::{Role, Session};

const PRONOUNS: &[&str] = &["it", "they", "that", "these", "those"];
const ELLIPTICAL_CONNECTORS: &[&str] = &["what about", "how about", "also"];
const COMPARATIVE_TERMS: &[&str] = &["overlap", "versus", "vs", "compare", "relationship"];

const CONDENSE_SYSTEM_PROMPT: &str = "You rewrite a follow-up question into a standalone question using the prior conversation. Output ONLY the standalone question — no explanations.";

/// True when `session` has at least one prior user turn and `query` shows
/// a pronominal reference, an elliptical connector, or short comparative
/// language (spec.md §4.8). Pure — no I/O, unit-testable on its own.
pub fn should_condense(query: &str, session: &Session) -> bool {
    if session.user_turn_count() == 0 {
        return false;
    }

    let query_lower = query.to_lowercase();
    let words: Vec<&str> = query_lower.split_whitespace().collect();

    let has_pronoun = words
        .iter()
        .any(|w| PRONOUNS.contains(&w.trim_matches(|c: char| !c.is_alphanumeric())));
    if has_pronoun {
        return true;
    }

    let has_ellipsis = ELLIPTICAL_CONNECTORS
        .iter()
        .any(|connector| query_lower.contains(connector));
    if has_ellipsis {
        return true;
    }

    let has_comparative = COMPARATIVE_TERMS
        .iter()
        .any(|term| query_lower.contains(term));
    if has_comparative && words.len() < 8 {
        return true;
    }

    false
}

/// Rewrite `query` into a standalone retrieval query using the session's
/// prior turns. The original `query` stays the user-visible message; only
/// the returned string is used for retrieval.
pub async fn condense(
    query: &str,
    session: &Session,
    provider: &dyn Provider,
    credentials: Option<&str>,
) -> Result<String, RagError> {
    let history_text = session
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| format!("{:?}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let user_turn = format!(
        "Conversation so far:\n{history_text}\n\nFollow-up question: \"{query}\"\n\nRewrite the follow-up as a standalone question that makes sense without the conversation."
    );

    let messages = vec![
        ChatMessage {
            role: Role::System,
            content: CONDENSE_SYSTEM_PROMPT.to_string(),
        },
        ChatMessage {
            role: Role::User,
            content: user_turn,
        },
    ];

    let standalone = provider
        .chat(&messages, &GenerationParams::for_condensation(), credentials)
        .await?;

    let trimmed = standalone.trim();
    if trimmed.is_empty() {
        return Ok(query.to_string());
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Session;

    fn session_with_turns(n: usize) -> Session {
        let mut session = Session::new("s", "system");
        for i in 0..n {
            session.messages.push(crate::types::Message::user(format!("turn {i}")));
        }
        session
    }

    #[test]
    fn first_turn_never_condenses() {
        let session = session_with_turns(0);
        assert!(!should_condense("How does it work?", &session));
    }

    #[test]
    fn pronoun_follow_up_condenses() {
        let session = session_with_turns(1);
        assert!(should_condense("How does it work?", &session));
    }

    #[test]
    fn elliptical_connector_condenses() {
        let session = session_with_turns(1);
        assert!(should_condense("What about transfer learning?", &session));
    }

    #[test]
    fn short_comparative_condenses() {
        let session = session_with_turns(1);
        assert!(should_condense("Is there overlap here?", &session));
    }

    #[test]
    fn long_comparative_does_not_condense() {
        let session = session_with_turns(1);
        assert!(!should_condense(
            "Could you describe in detail the overlap between transfer learning and multi-task learning research programs over time?",
            &session
        ));
    }

    #[test]
    fn plain_new_topic_does_not_condense() {
        let session = session_with_turns(1);
        assert!(!should_condense("What is multi-task learning?", &session));
    }
}

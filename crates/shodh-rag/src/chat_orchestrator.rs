//! Chat orchestrator (C9): the coordination core. Grounded on the
//! teacher's `rag_engine.rs` for component wiring and `chat/engine.rs` for
//! turn-taking/tracing-span conventions, reworked entirely around the
//! first-turn (evidence-injected) vs. follow-up (plain question) split,
//! which the teacher's chat engine does not implement.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{GenerationParams, SearchConfig};
use crate::conversation::{trimmed_history, ConversationStore};
use crate::embeddings::EmbeddingService;
use crate::error::RagError;
use crate::llm::{ChatMessage, Provider};
use crate::rag::query_condenser;
use crate::reranking::CrossEncoderReranker;
use crate::search::{union_dedup, SparseIndex};
use crate::storage::VectorStore;
use crate::types::{ChatTurnResult, ChunkMetadata, Citation, Evidence, MetadataFilter};

/// The wall-clock budget for any single suspension point (an LLM call or
/// an embedding call) within one chat turn. Expiry surfaces as
/// `RagError::Generation`, never an automatic retry (spec.md §5, §7).
const SUSPENSION_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ChatOrchestrator {
    vector_store: Arc<VectorStore>,
    sparse_index: Arc<SparseIndex>,
    embeddings: Arc<EmbeddingService>,
    reranker: Arc<CrossEncoderReranker>,
    conversations: Arc<ConversationStore>,
    search_config: SearchConfig,
}

impl ChatOrchestrator {
    pub fn new(
        vector_store: Arc<VectorStore>,
        sparse_index: Arc<SparseIndex>,
        embeddings: Arc<EmbeddingService>,
        reranker: Arc<CrossEncoderReranker>,
        conversations: Arc<ConversationStore>,
        search_config: SearchConfig,
    ) -> Self {
        Self {
            vector_store,
            sparse_index,
            embeddings,
            reranker,
            conversations,
            search_config,
        }
    }

    /// Run one chat turn end to end: load history, condense if needed,
    /// retrieve, rerank, diversify, synthesize, persist.
    pub async fn chat(
        &self,
        session_id: &str,
        query: &str,
        provider: &dyn Provider,
        generation: &GenerationParams,
        credentials: Option<&str>,
        filter: Option<&MetadataFilter>,
    ) -> Result<ChatTurnResult, RagError> {
        let session = self.conversations.get_session(session_id)?;
        let turn = session.user_turn_count();
        let first_turn = turn == 0;

        tracing::info!(session_id, turn, first_turn, "chat turn starting");

        // Step 2: condense a context-dependent follow-up into a standalone
        // retrieval query. The user-visible message always stays `query`.
        let retrieval_query = if !first_turn && query_condenser::should_condense(query, &session) {
            tracing::info!(session_id, turn, "condensing follow-up query");
            with_timeout(
                query_condenser::condense(query, &session, provider, credentials),
                "condensation",
            )
            .await?
        } else {
            query.to_string()
        };

        // Step 3: embed + hybrid retrieve.
        let candidates = self.retrieve(&retrieval_query, filter).await?;

        // Step 4: cross-encoder rerank.
        tracing::info!(session_id, turn, candidates = candidates.len(), "reranking candidates");
        let pairs: Vec<(String, String)> = candidates
            .iter()
            .map(|c| (c.id.clone(), c.text.clone()))
            .collect();
        let reranked = self
            .reranker
            .rerank(&retrieval_query, &pairs, self.search_config.rerank_top_k)
            .map_err(|e| RagError::Store(e))?;

        // Step 5: diversity filter — at most max_per_item per source item,
        // at most max_total overall. Ties broken by score (already sorted
        // descending by the reranker) then by lower page number.
        let admitted = diversify(&self.search_config, &reranked, &candidates);

        // Step 6: build the user message. First turn injects the evidence
        // block; follow-ups stay a plain question so the system prompt
        // (present once) is not reinterpreted as a fresh instruction.
        let evidence = self.build_evidence(&admitted);
        let user_message_body = if first_turn {
            render_first_turn_message(query, &evidence)
        } else {
            query.to_string()
        };

        // Step 7: persist the user turn, call the LLM with trimmed
        // history, persist the assistant turn.
        let session = self
            .conversations
            .append_user_message(session_id, user_message_body)?;
        let history = trimmed_history(&session, HISTORY_CHAR_BUDGET);
        let chat_messages: Vec<ChatMessage> = history
            .into_iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content,
            })
            .collect();

        tracing::info!(session_id, turn, "invoking provider for synthesis");
        let answer = with_timeout(
            provider.chat(&chat_messages, generation, credentials),
            "synthesis",
        )
        .await
        .map_err(|e| match e {
            RagError::Generation(msg) => RagError::Generation(msg),
            other => RagError::Generation(format!("synthesis failed: {other}")),
        })?;

        self.conversations
            .append_assistant_message(session_id, answer.clone(), evidence.clone())?;

        let citations = evidence
            .iter()
            .map(|e| Citation {
                id: e.citation_id,
                title: e.metadata.title.clone(),
                authors: e.metadata.authors.clone(),
                year: e.metadata.year,
                pdf_path: e.metadata.pdf_path.clone(),
            })
            .collect();

        Ok(ChatTurnResult {
            summary: answer,
            citations,
            snippets: evidence,
        })
    }

    async fn retrieve(
        &self,
        retrieval_query: &str,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<crate::storage::SearchHit>, RagError> {
        let query_vec = with_timeout(
            async { self.embeddings.embed_query(retrieval_query) },
            "embedding",
        )
        .await?;

        let predicate = filter.and_then(|f| f.to_predicate());
        let k = self.search_config.hybrid_k;

        let dense_hits = self
            .vector_store
            .vector_search(&query_vec, k, predicate.as_deref())
            .await
            .map_err(crate::storage::classify_store_error)?;
        let dense_scores: Vec<(String, f32)> = dense_hits
            .iter()
            .map(|h| (h.id.clone(), h.score))
            .collect();

        let item_filter = filter.and_then(|f| f.item_ids.clone());
        let sparse_scores = self
            .sparse_index
            .search_filtered(retrieval_query, k, item_filter.as_deref())
            .map_err(RagError::Store)?;

        let merged = union_dedup(dense_scores, sparse_scores);
        let ids: Vec<String> = merged.iter().map(|(id, _, _)| id.clone()).collect();

        // union_dedup only carries ids + scores; pull the chunk bodies and
        // metadata back from the dense store (both indices index the same
        // chunk ids, so a single id-keyed lookup recovers either source's
        // hit).
        let mut hits = self.vector_store.get_by_ids(&ids).await.map_err(RagError::Store)?;
        let order: std::collections::HashMap<&str, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        hits.sort_by_key(|h| order.get(h.id.as_str()).copied().unwrap_or(usize::MAX));
        Ok(hits)
    }

    fn build_evidence(&self, admitted: &[(crate::storage::SearchHit, f32)]) -> Vec<Evidence> {
        admitted
            .iter()
            .enumerate()
            .map(|(i, (hit, _score))| {
                let metadata: ChunkMetadata =
                    serde_json::from_str(&hit.metadata_json).unwrap_or_default();
                Evidence {
                    citation_id: (i + 1) as u32,
                    item_id: hit.item_id.clone(),
                    chunk_id: hit.id.clone(),
                    snippet: hit.text.clone(),
                    page: hit.page as usize,
                    metadata,
                }
            })
            .collect()
    }
}

const HISTORY_CHAR_BUDGET: usize = 12_000;

/// Diversity filter: at most `max_per_item` chunks per source item, at
/// most `max_total` chunks overall. Ties broken by lower page number so
/// the result is deterministic regardless of the reranker's internal
/// ordering of equal scores.
fn diversify(
    search_config: &SearchConfig,
    reranked: &[(String, f32)],
    candidates: &[crate::storage::SearchHit],
) -> Vec<(crate::storage::SearchHit, f32)> {
    let by_id: std::collections::HashMap<&str, &crate::storage::SearchHit> = candidates
        .iter()
        .map(|c| (c.id.as_str(), c))
        .collect();

    let mut ordered: Vec<(&crate::storage::SearchHit, f32)> = reranked
        .iter()
        .filter_map(|(id, score)| by_id.get(id.as_str()).map(|hit| (*hit, *score)))
        .collect();
    ordered.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.page.cmp(&b.0.page))
    });

    let mut per_item: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut admitted = Vec::new();
    for (hit, score) in ordered {
        if admitted.len() >= search_config.max_total {
            break;
        }
        let count = per_item.entry(hit.item_id.clone()).or_insert(0);
        if *count >= search_config.max_per_item {
            continue;
        }
        *count += 1;
        admitted.push((hit.clone(), score));
    }
    admitted
}

fn render_first_turn_message(question: &str, evidence: &[Evidence]) -> String {
    if evidence.is_empty() {
        return question.to_string();
    }
    let mut body = String::new();
    body.push_str(question);
    body.push_str("\n\nEvidence:\n");
    for e in evidence {
        let authors = e.metadata.authors.join(", ");
        let year = e
            .metadata
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "n.d.".to_string());
        body.push_str(&format!(
            "[{}] {} ({}, {}), p.{}: {}\n",
            e.citation_id, e.metadata.title, authors, year, e.page, e.snippet
        ));
    }
    body
}

async fn with_timeout<F, T>(fut: F, step: &str) -> Result<T, RagError>
where
    F: std::future::Future<Output = Result<T, RagError>>,
{
    match tokio::time::timeout(SUSPENSION_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(RagError::Generation(format!("{step} timed out after {SUSPENSION_TIMEOUT:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SearchHit;

    fn hit(id: &str, item_id: &str, page: i64) -> SearchHit {
        SearchHit {
            id: id.to_string(),
            item_id: item_id.to_string(),
            chunk_index: 0,
            text: format!("snippet from {id}"),
            page,
            metadata_json: "{}".to_string(),
            score: 0.0,
        }
    }

    fn search_config(max_per_item: usize, max_total: usize) -> SearchConfig {
        SearchConfig {
            hybrid_k: 20,
            rerank_top_k: 20,
            max_per_item,
            max_total,
        }
    }

    #[test]
    fn diversity_filter_admits_multiple_source_items() {
        // A comparative follow-up ("how does X compare to Y") should be
        // able to surface evidence from both source items, not just the
        // single highest-scoring one.
        let candidates = vec![hit("a:0", "item-a", 1), hit("b:0", "item-b", 1)];
        let reranked = vec![("a:0".to_string(), 0.9), ("b:0".to_string(), 0.8)];
        let admitted = diversify(&search_config(3, 10), &reranked, &candidates);
        let item_ids: Vec<&str> = admitted.iter().map(|(h, _)| h.item_id.as_str()).collect();
        assert!(item_ids.contains(&"item-a"));
        assert!(item_ids.contains(&"item-b"));
    }

    #[test]
    fn diversity_filter_caps_chunks_per_item() {
        let candidates = vec![
            hit("a:0", "item-a", 1),
            hit("a:1", "item-a", 2),
            hit("a:2", "item-a", 3),
        ];
        let reranked = vec![
            ("a:0".to_string(), 0.9),
            ("a:1".to_string(), 0.8),
            ("a:2".to_string(), 0.7),
        ];
        let admitted = diversify(&search_config(2, 10), &reranked, &candidates);
        assert_eq!(admitted.len(), 2);
        assert_eq!(admitted[0].0.id, "a:0");
        assert_eq!(admitted[1].0.id, "a:1");
    }

    #[test]
    fn diversity_filter_caps_total_across_items() {
        let candidates = vec![hit("a:0", "item-a", 1), hit("b:0", "item-b", 1), hit("c:0", "item-c", 1)];
        let reranked = vec![
            ("a:0".to_string(), 0.9),
            ("b:0".to_string(), 0.8),
            ("c:0".to_string(), 0.7),
        ];
        let admitted = diversify(&search_config(5, 2), &reranked, &candidates);
        assert_eq!(admitted.len(), 2);
    }

    #[test]
    fn diversity_filter_breaks_score_ties_by_lower_page() {
        let candidates = vec![hit("a:0", "item-a", 5), hit("a:1", "item-a", 2)];
        let reranked = vec![("a:0".to_string(), 0.5), ("a:1".to_string(), 0.5)];
        let admitted = diversify(&search_config(5, 5), &reranked, &candidates);
        assert_eq!(admitted[0].0.id, "a:1");
        assert_eq!(admitted[0].0.page, 2);
    }

    #[test]
    fn first_turn_message_includes_citations() {
        let evidence = vec![Evidence {
            citation_id: 1,
            item_id: "item-1".to_string(),
            chunk_id: "item-1:0".to_string(),
            snippet: "multi-task learning shares representations across tasks".to_string(),
            page: 3,
            metadata: ChunkMetadata {
                title: "Multi-Task Learning".to_string(),
                authors: vec!["Caruana".to_string()],
                year: Some(1997),
                pdf_path: "mtl.pdf".to_string(),
            },
        }];
        let rendered = render_first_turn_message("What is multi-task learning?", &evidence);
        assert!(rendered.contains("[1]"));
        assert!(rendered.contains("Multi-Task Learning"));
        assert!(rendered.starts_with("What is multi-task learning?"));
    }

    #[test]
    fn follow_up_message_has_no_evidence_block() {
        let evidence = vec![];
        let rendered = render_first_turn_message("How does it work?", &evidence);
        assert_eq!(rendered, "How does it work?");
    }
}

//! Index builder (C5): turns bibliographic items into hybrid dense+sparse
//! index entries. Grounded on the teacher's `indexing.rs` (`IndexingState`
//! cancellation plumbing, per-file error isolation, throttled progress
//! emission) and `chat/mod.rs`'s `EventEmitter` trait shape for the
//! progress sink, reworked around `BibliographicItem` enumeration instead
//! of an arbitrary folder walk (spec.md treats the bibliographic source as
//! an external collaborator, not a filesystem the core scans itself).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::embeddings::EmbeddingService;
use crate::error::RagError;
use crate::processing::{extract_pages, ChunkSpan, TextChunker};
use crate::search::SparseIndex;
use crate::storage::VectorStore;
use crate::types::{BibliographicItem, ChunkMetadata, ChunkRecord};

/// Progress snapshot emitted as each bibliographic item finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexProgress {
    pub current_item: String,
    pub processed: usize,
    pub total: usize,
    pub current_action: String,
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, progress: &IndexProgress);
}

pub struct NoopProgressSink;
impl ProgressSink for NoopProgressSink {
    fn emit(&self, _progress: &IndexProgress) {}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipReason {
    pub item_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReport {
    pub indexed_items: usize,
    pub total_chunks: usize,
    pub skipped: Vec<SkipReason>,
}

/// A `Arc<AtomicBool>` handle shared with the running index task. Setting
/// it stops the run between items, never mid-item (spec.md §5: a
/// cancelled run leaves completed items indexed and rolls back any
/// in-flight partial chunk set).
pub type CancelHandle = Arc<AtomicBool>;

pub struct IndexBuilder {
    vector_store: Arc<VectorStore>,
    sparse_index: Arc<SparseIndex>,
    embeddings: Arc<EmbeddingService>,
    chunker: TextChunker,
}

impl IndexBuilder {
    pub fn new(
        vector_store: Arc<VectorStore>,
        sparse_index: Arc<SparseIndex>,
        embeddings: Arc<EmbeddingService>,
        chunker: TextChunker,
    ) -> Self {
        Self {
            vector_store,
            sparse_index,
            embeddings,
            chunker,
        }
    }

    pub fn new_cancel_handle() -> CancelHandle {
        Arc::new(AtomicBool::new(false))
    }

    pub async fn index(
        &self,
        items: &[BibliographicItem],
        cancel: &CancelHandle,
        sink: &dyn ProgressSink,
    ) -> Result<IndexReport, RagError> {
        let start = Instant::now();
        let total = items.len();
        let mut indexed_items = 0;
        let mut total_chunks = 0;
        let mut skipped = Vec::new();

        for (i, item) in items.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                tracing::info!(processed = i, total, "indexing cancelled between items");
                break;
            }

            sink.emit(&IndexProgress {
                current_item: item.title.clone(),
                processed: i,
                total,
                current_action: "extracting".to_string(),
            });

            match self.index_one(item, cancel).await {
                Ok(Some(chunk_count)) => {
                    indexed_items += 1;
                    total_chunks += chunk_count;
                }
                Ok(None) => {
                    skipped.push(SkipReason {
                        item_id: item.id.clone(),
                        reason: "no extractable text in any of the item's PDFs".to_string(),
                    });
                }
                Err(reason) => {
                    skipped.push(SkipReason {
                        item_id: item.id.clone(),
                        reason,
                    });
                }
            }
        }

        sink.emit(&IndexProgress {
            current_item: "rebuilding sparse index".to_string(),
            processed: total,
            total,
            current_action: "sparse_rebuild".to_string(),
        });
        self.build_sparse_index().await?;

        sink.emit(&IndexProgress {
            current_item: "done".to_string(),
            processed: total,
            total,
            current_action: "complete".to_string(),
        });

        tracing::info!(
            indexed_items,
            total_chunks,
            skipped = skipped.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "index run finished"
        );

        Ok(IndexReport {
            indexed_items,
            total_chunks,
            skipped,
        })
    }

    /// Index one item. `Ok(Some(n))` on success with `n` chunks written,
    /// `Ok(None)` when the item yielded no extractable text (a skip, not
    /// an error), `Err` with a human-readable reason for any other
    /// per-item failure. Chunks are embedded into a local buffer first and
    /// only committed to the stores once the whole item succeeds, so a
    /// cancellation observed mid-item never leaves a partial chunk set
    /// behind.
    async fn index_one(
        &self,
        item: &BibliographicItem,
        cancel: &CancelHandle,
    ) -> Result<Option<usize>, String> {
        let mut spans: Vec<ChunkSpan> = Vec::new();
        let mut extraction_errors: Vec<String> = Vec::new();
        for pdf_path in &item.pdf_paths {
            if cancel.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let path = std::path::Path::new(pdf_path);
            let pages = match extract_pages(path) {
                Ok(pages) => pages,
                Err(e) => {
                    tracing::warn!(item_id = %item.id, pdf_path, error = %e, "skipping unreadable PDF");
                    extraction_errors.push(e.to_string());
                    continue;
                }
            };
            spans.extend(self.chunker.chunk_pages(&pages));
        }

        if spans.is_empty() {
            // Distinguish "every PDF failed to extract" (the path didn't
            // exist, or was unreadable) from "extraction succeeded but
            // yielded no chunkable text" — the former carries the real
            // per-file reason instead of the generic empty-text message.
            if !extraction_errors.is_empty() {
                return Err(format!(
                    "no PDF could be read ({})",
                    extraction_errors.join("; ")
                ));
            }
            return Ok(None);
        }

        let metadata = ChunkMetadata {
            title: item.title.clone(),
            authors: item.authors.clone(),
            year: item.year,
            pdf_path: item.pdf_paths.first().cloned().unwrap_or_default(),
        };
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| format!("failed to serialize chunk metadata: {e}"))?;

        let mut records: Vec<ChunkRecord> = Vec::with_capacity(spans.len());

        for (index, span) in spans.into_iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let vector = self
                .embeddings
                .embed_document(&span.text)
                .map_err(|e| format!("embedding failed: {e}"))?;
            let id = format!("{}:{}", item.id, index);
            records.push(ChunkRecord {
                id,
                item_id: item.id.clone(),
                chunk_index: index as u32,
                text: span.text,
                page: span.page as i64,
                vector,
                metadata_json: metadata_json.clone(),
                created_at: chrono::Utc::now().timestamp(),
            });
        }

        let chunk_count = records.len();

        self.vector_store
            .delete_by_item(&item.id)
            .await
            .map_err(|e| format!("failed to clear previous chunks: {e}"))?;
        self.vector_store
            .upsert_chunks(records)
            .await
            .map_err(|e| format!("failed to store chunks: {e}"))?;

        Ok(Some(chunk_count))
    }

    /// Rebuild the BM25 sparse index from the LanceDB collection's chunk
    /// enumeration. The dense store is authoritative; the sparse index is
    /// always a full reconstruction from it, never maintained incrementally
    /// — that keeps a cancelled run's sparse index trivially consistent
    /// with whatever items actually finished, with no separate rollback
    /// bookkeeping required for the sparse half.
    pub async fn build_sparse_index(&self) -> Result<usize, RagError> {
        self.sparse_index.clear().map_err(RagError::Store)?;
        let chunks = self
            .vector_store
            .list_chunks(None, SPARSE_REBUILD_LIMIT)
            .await
            .map_err(RagError::Store)?;
        let entries: Vec<(String, String, String)> = chunks
            .into_iter()
            .map(|c| (c.id, c.text, c.item_id))
            .collect();
        let rebuilt = entries.len();
        self.sparse_index
            .index_chunks_batch(&entries)
            .map_err(RagError::Store)?;
        self.sparse_index.commit().map_err(RagError::Store)?;
        tracing::info!(chunks = rebuilt, "sparse index rebuilt from dense collection");
        Ok(rebuilt)
    }

    /// Index stats (spec §6): counts from the dense store plus a
    /// comparison against the bibliographic source's current item count,
    /// identifying items that exist in the source but aren't indexed yet.
    pub async fn stats(
        &self,
        source_item_count: usize,
        collection_name: impl Into<String>,
    ) -> Result<IndexStats, RagError> {
        let indexed_items = self.vector_store.count_items().await.map_err(RagError::Store)?;
        let total_chunks = self.vector_store.count().await.map_err(RagError::Store)?;
        Ok(IndexStats {
            indexed_items,
            total_chunks,
            source_items: source_item_count,
            new_items: source_item_count.saturating_sub(indexed_items),
            current_embedding_model: self.embeddings.model_id().to_string(),
            collection_name: collection_name.into(),
        })
    }
}

/// A generous ceiling on chunks enumerated in one `build_sparse_index`
/// pass. A personal bibliographic library's full chunk count is expected
/// to stay well under this; raising it is cheap if it's ever hit.
const SPARSE_REBUILD_LIMIT: usize = 1_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub indexed_items: usize,
    pub total_chunks: usize,
    pub source_items: usize,
    pub new_items: usize,
    pub current_embedding_model: String,
    pub collection_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EmbeddingModel;
    use crate::search::SparseIndex;
    use crate::storage::VectorStore;

    #[test]
    fn progress_sink_noop_is_harmless() {
        let sink = NoopProgressSink;
        sink.emit(&IndexProgress {
            current_item: "x".to_string(),
            processed: 0,
            total: 1,
            current_action: "extracting".to_string(),
        });
    }

    struct UnusedEmbeddingModel;
    impl EmbeddingModel for UnusedEmbeddingModel {
        fn embed_query(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            panic!("embedding should not be invoked for an item with no extractable text");
        }
        fn embed_document(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            panic!("embedding should not be invoked for an item with no extractable text");
        }
        fn dimension(&self) -> usize {
            4
        }
        fn model_id(&self) -> &str {
            "unused"
        }
    }

    async fn builder_with_empty_stores(dir: &std::path::Path) -> IndexBuilder {
        let vector_store = VectorStore::new(dir.join("lance").to_str().unwrap(), 4, "chunks")
            .await
            .expect("vector store init");
        let sparse_index =
            SparseIndex::new(dir.to_str().unwrap(), "sparse").expect("sparse index init");
        let embeddings = EmbeddingService::new(Box::new(UnusedEmbeddingModel));
        IndexBuilder::new(
            Arc::new(vector_store),
            Arc::new(sparse_index),
            Arc::new(embeddings),
            TextChunker::new(500, 50, 50),
        )
    }

    #[tokio::test]
    async fn missing_pdf_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_with_empty_stores(dir.path()).await;

        let item = BibliographicItem {
            id: "item-missing".to_string(),
            title: "Missing PDF".to_string(),
            authors: vec![],
            year: None,
            pdf_paths: vec!["/nonexistent/does-not-exist.pdf".to_string()],
        };

        let result = builder
            .index_one(&item, &IndexBuilder::new_cancel_handle())
            .await;
        let reason = result.expect_err("a missing PDF should be a non-fatal skip, not success");
        assert!(reason.contains("does-not-exist.pdf"));
        assert!(reason.contains("file does not exist"));
    }

    #[tokio::test]
    async fn one_unreadable_item_does_not_abort_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_with_empty_stores(dir.path()).await;

        let items = vec![
            BibliographicItem {
                id: "item-missing".to_string(),
                title: "Missing PDF".to_string(),
                authors: vec![],
                year: None,
                pdf_paths: vec!["/nonexistent/does-not-exist.pdf".to_string()],
            },
            BibliographicItem {
                id: "item-also-missing".to_string(),
                title: "Also Missing".to_string(),
                authors: vec![],
                year: None,
                pdf_paths: vec!["/nonexistent/also-missing.pdf".to_string()],
            },
        ];

        let report = builder
            .index(&items, &IndexBuilder::new_cancel_handle(), &NoopProgressSink)
            .await
            .expect("index run should complete despite unreadable PDFs");

        assert_eq!(report.indexed_items, 0);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(report.skipped[0].item_id, "item-missing");
        assert!(report.skipped[0].reason.contains("does-not-exist.pdf"));
        assert_eq!(report.skipped[1].item_id, "item-also-missing");
        assert!(report.skipped[1].reason.contains("also-missing.pdf"));
    }

    #[tokio::test]
    async fn stats_reports_new_items_not_yet_indexed() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_with_empty_stores(dir.path()).await;

        let stats = builder
            .stats(5, "lib_unused")
            .await
            .expect("stats should succeed against an empty store");

        assert_eq!(stats.indexed_items, 0);
        assert_eq!(stats.total_chunks, 0);
        assert_eq!(stats.source_items, 5);
        assert_eq!(stats.new_items, 5);
        assert_eq!(stats.current_embedding_model, "unused");
        assert_eq!(stats.collection_name, "lib_unused");
    }

    #[tokio::test]
    async fn build_sparse_index_is_a_noop_on_an_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_with_empty_stores(dir.path()).await;
        let rebuilt = builder
            .build_sparse_index()
            .await
            .expect("rebuilding an empty collection should succeed");
        assert_eq!(rebuilt, 0);
    }
}

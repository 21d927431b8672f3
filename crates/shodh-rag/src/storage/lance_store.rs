//! LanceDB-backed dense vector store (C4). Grounded on the teacher's
//! `LanceStore`: same connect/ensure-table/seed-and-delete bootstrap, same
//! Arrow column-building approach for upsert and the `extract_hits_from_batches`
//! helper, retargeted from the teacher's `doc_id`/`space_id`/`title`/`source`
//! schema onto this crate's `item_id`/`metadata_json` chunk model.

use anyhow::{Context, Result};
use arrow_array::{
    Array, Float32Array, FixedSizeListArray, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray, UInt32Array,
};
use arrow_schema::{DataType, Field, Schema};
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;
use thiserror::Error;

use crate::error::RagError;
use crate::types::ChunkRecord;

/// Raised by `check_dim` when a vector's length disagrees with the store's
/// declared dimension. Carried as the downcastable source of the
/// `anyhow::Error` returned by `vector_search`/`upsert_chunks` so
/// `classify_store_error` can tell it apart from an ordinary store failure.
#[derive(Debug, Error)]
#[error("vector length {actual} does not match store dimension {expected}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

fn check_dimension(expected: usize, actual: usize) -> Result<()> {
    if actual != expected {
        return Err(DimensionMismatch { expected, actual }.into());
    }
    Ok(())
}

/// Map a store-layer failure to the right `RagError` kind. A dimension
/// disagreement is a configuration error (spec E4: raised before any
/// search executes), never folded into the generic `Store` variant.
pub fn classify_store_error(err: anyhow::Error) -> RagError {
    if err.downcast_ref::<DimensionMismatch>().is_some() {
        RagError::ConfigurationMismatch(err.to_string())
    } else {
        RagError::Store(err)
    }
}

pub struct VectorStore {
    db: lancedb::Connection,
    dimension: usize,
    table_name: String,
}

impl VectorStore {
    pub async fn new(path: &str, dimension: usize, table_name: impl Into<String>) -> Result<Self> {
        std::fs::create_dir_all(path).ok();
        let db = lancedb::connect(path)
            .execute()
            .await
            .context("failed to connect to LanceDB")?;

        let store = Self {
            db,
            dimension,
            table_name: table_name.into(),
        };

        store.ensure_table().await?;
        Ok(store)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("item_id", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("page", DataType::Int64, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                true,
            ),
            Field::new("metadata_json", DataType::Utf8, false),
            Field::new("created_at", DataType::Int64, false),
        ]))
    }

    async fn ensure_table(&self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if !names.contains(&self.table_name) {
            let schema = self.schema();
            let seed_vec = vec![0.0f32; self.dimension];
            let values = Float32Array::from(seed_vec);
            let vector_field = Field::new("item", DataType::Float32, true);
            let vector_array = FixedSizeListArray::new(
                Arc::new(vector_field),
                self.dimension as i32,
                Arc::new(values) as Arc<dyn Array>,
                None,
            );

            let batch = RecordBatch::try_new(
                schema.clone(),
                vec![
                    Arc::new(StringArray::from(vec!["__seed__"])) as Arc<dyn Array>,
                    Arc::new(StringArray::from(vec!["__seed__"])),
                    Arc::new(UInt32Array::from(vec![0u32])),
                    Arc::new(StringArray::from(vec![""])),
                    Arc::new(Int64Array::from(vec![0i64])),
                    Arc::new(vector_array) as Arc<dyn Array>,
                    Arc::new(StringArray::from(vec!["{}"])),
                    Arc::new(Int64Array::from(vec![0i64])),
                ],
            )
            .context("failed to create seed RecordBatch")?;

            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            self.db
                .create_table(&self.table_name, Box::new(batches))
                .execute()
                .await
                .context("failed to create chunk table")?;

            let table = self.db.open_table(&self.table_name).execute().await?;
            table.delete("id = '__seed__'").await.ok();
        }
        Ok(())
    }

    fn check_dim(&self, vec: &[f32]) -> Result<()> {
        check_dimension(self.dimension, vec.len())
    }

    pub async fn upsert_chunks(&self, chunks: Vec<ChunkRecord>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        for c in &chunks {
            self.check_dim(&c.vector)?;
        }

        let table = self
            .db
            .open_table(&self.table_name)
            .execute()
            .await
            .context("failed to open chunk table")?;

        let len = chunks.len();
        let schema = self.schema();

        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let item_ids: Vec<&str> = chunks.iter().map(|c| c.item_id.as_str()).collect();
        let chunk_indices: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let pages: Vec<i64> = chunks.iter().map(|c| c.page).collect();
        let metadata_jsons: Vec<&str> = chunks.iter().map(|c| c.metadata_json.as_str()).collect();
        let created_ats: Vec<i64> = chunks.iter().map(|c| c.created_at).collect();

        let flat_vectors: Vec<f32> = chunks.iter().flat_map(|c| c.vector.iter().copied()).collect();
        let values = Float32Array::from(flat_vectors);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        );

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(ids)) as Arc<dyn Array>,
                Arc::new(StringArray::from(item_ids)),
                Arc::new(UInt32Array::from(chunk_indices)),
                Arc::new(StringArray::from(texts)),
                Arc::new(Int64Array::from(pages)),
                Arc::new(vector_array) as Arc<dyn Array>,
                Arc::new(StringArray::from(metadata_jsons)),
                Arc::new(Int64Array::from(created_ats)),
            ],
        )
        .context("failed to create RecordBatch")?;

        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .context("failed to insert chunks")?;

        tracing::debug!("inserted {} chunks into LanceDB", len);
        Ok(())
    }

    pub async fn vector_search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        self.check_dim(query)?;
        let table = self.db.open_table(&self.table_name).execute().await?;

        let mut query_builder = table.query().nearest_to(query)?;
        query_builder = query_builder
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k);

        if let Some(predicate) = filter {
            query_builder = query_builder.only_if(predicate);
        }

        let results = query_builder
            .execute()
            .await
            .context("LanceDB vector search failed")?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(extract_hits_from_batches(&batches, 0.0))
    }

    /// Delete every chunk belonging to a source item. Used on re-index.
    pub async fn delete_by_item(&self, item_id: &str) -> Result<usize> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let count_before = table.count_rows(None).await.unwrap_or(0);
        let predicate = format!("item_id = '{}'", item_id.replace('\'', "''"));
        table.delete(&predicate).await?;
        let count_after = table.count_rows(None).await.unwrap_or(0);
        Ok(count_before - count_after)
    }

    pub async fn clear(&self) -> Result<()> {
        let names = self.db.table_names().execute().await?;
        if names.contains(&self.table_name) {
            self.db.drop_table(&self.table_name, &[]).await?;
        }
        self.ensure_table().await?;
        Ok(())
    }

    pub async fn count(&self) -> Result<usize> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        Ok(table.count_rows(None).await?)
    }

    /// Count distinct source items present in the store.
    pub async fn count_items(&self) -> Result<usize> {
        let table = self.db.open_table(&self.table_name).execute().await?;
        let results = table
            .query()
            .select(lancedb::query::Select::columns(&["item_id"]))
            .execute()
            .await
            .context("failed to query item_ids")?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        let mut item_ids = std::collections::HashSet::new();

        for batch in &batches {
            if let Some(col) = batch
                .column_by_name("item_id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            {
                for i in 0..col.len() {
                    let val = col.value(i);
                    if !val.is_empty() && val != "__seed__" {
                        item_ids.insert(val.to_string());
                    }
                }
            }
        }

        Ok(item_ids.len())
    }

    /// List all chunks matching an optional predicate (no vector search).
    /// The correct way to enumerate chunks for sparse-index rebuilds.
    pub async fn list_chunks(&self, predicate: Option<&str>, limit: usize) -> Result<Vec<SearchHit>> {
        let table = self.db.open_table(&self.table_name).execute().await?;

        let mut query = table.query();
        if let Some(pred) = predicate {
            query = query.only_if(pred);
        }
        query = query.limit(limit);

        let results = query.execute().await.context("LanceDB list query failed")?;

        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
        Ok(extract_hits_from_batches(&batches, 0.0))
    }

    pub async fn create_index_if_needed(&self) -> Result<()> {
        let count = self.count().await?;
        if count >= 1_000 {
            let table = self.db.open_table(&self.table_name).execute().await?;
            table
                .create_index(&["vector"], lancedb::index::Index::Auto)
                .execute()
                .await
                .context("failed to create vector index")?;
            tracing::info!("created IVF-PQ index on {} rows", count);
        }
        Ok(())
    }

    /// Look up chunks by their ids (used to hydrate sparse-only hits).
    pub async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<SearchHit>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let table = self.db.open_table(&self.table_name).execute().await?;
        let mut all_hits = Vec::new();

        for chunk in ids.chunks(50) {
            let id_list: Vec<String> = chunk
                .iter()
                .map(|id| format!("'{}'", id.replace('\'', "''")))
                .collect();
            let predicate = format!("id IN ({})", id_list.join(", "));

            let results = table
                .query()
                .only_if(predicate)
                .execute()
                .await
                .context("LanceDB id lookup failed")?;

            let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results).await?;
            all_hits.extend(extract_hits_from_batches(&batches, 0.0));
        }

        Ok(all_hits)
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub item_id: String,
    pub chunk_index: u32,
    pub text: String,
    pub page: i64,
    pub metadata_json: String,
    pub score: f32,
}

/// Extract `SearchHit` records from Arrow RecordBatches. Centralizes the
/// column extraction used by vector_search, list_chunks, and get_by_ids.
fn extract_hits_from_batches(batches: &[RecordBatch], default_score: f32) -> Vec<SearchHit> {
    let mut hits = Vec::new();
    for batch in batches {
        let ids = batch
            .column_by_name("id")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let texts = batch
            .column_by_name("text")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let item_ids = batch
            .column_by_name("item_id")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let chunk_indices = batch
            .column_by_name("chunk_index")
            .and_then(|c| c.as_any().downcast_ref::<UInt32Array>());
        let pages = batch
            .column_by_name("page")
            .and_then(|c| c.as_any().downcast_ref::<Int64Array>());
        let metadata_jsons = batch
            .column_by_name("metadata_json")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>());
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

        let (Some(ids), Some(texts)) = (ids, texts) else {
            continue;
        };

        for i in 0..batch.num_rows() {
            let score = if let Some(d) = distances {
                (1.0 - d.value(i)).max(0.0)
            } else {
                default_score
            };

            hits.push(SearchHit {
                id: ids.value(i).to_string(),
                item_id: item_ids.map(|d| d.value(i).to_string()).unwrap_or_default(),
                chunk_index: chunk_indices.map(|c| c.value(i)).unwrap_or(0),
                text: texts.value(i).to_string(),
                page: pages.map(|p| p.value(i)).unwrap_or(0),
                metadata_json: metadata_jsons
                    .map(|m| m.value(i).to_string())
                    .unwrap_or_else(|| "{}".to_string()),
                score,
            });
        }
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_dimension_passes() {
        assert!(check_dimension(768, 768).is_ok());
    }

    #[test]
    fn mismatched_dimension_classifies_as_configuration_mismatch() {
        let err = check_dimension(768, 384).unwrap_err();
        assert!(matches!(
            classify_store_error(err),
            RagError::ConfigurationMismatch(_)
        ));
    }

    #[test]
    fn other_store_failures_classify_as_store_error() {
        let err = anyhow::anyhow!("table not found");
        assert!(matches!(classify_store_error(err), RagError::Store(_)));
    }
}

//! Vector Index Adapter — LanceDB-backed `VectorIndex`.
//!
//! Grounded on `storage/lance_store.rs::LanceStore`: same connect/ensure-table/
//! `nearest_to` query shape, generalised to carry full `Chunk` metadata and to
//! honour `allowed_doc_ids` via an `only_if` predicate, and to enforce the
//! embedding-dimension-mismatch-fails-loudly decision.

use std::sync::Arc;

use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::query::{ExecutableQuery, QueryBase};

use super::{IndexHit, VectorIndex};
use crate::error::GovRagError;
use crate::types::{Chunk, ChunkKind};

pub struct LanceVectorIndex {
    db: lancedb::Connection,
    dimension: usize,
    table_name: String,
}

impl LanceVectorIndex {
    pub async fn open(path: &std::path::Path, dimension: usize) -> Result<Self, GovRagError> {
        std::fs::create_dir_all(path)?;
        let db = lancedb::connect(path.to_string_lossy().as_ref())
            .execute()
            .await?;
        let store = Self {
            db,
            dimension,
            table_name: "chunks".to_string(),
        };
        store.ensure_table().await?;
        Ok(store)
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new("doc_id", DataType::Utf8, false),
            Field::new("page", DataType::UInt32, false),
            Field::new("char_start", DataType::UInt64, false),
            Field::new("char_end", DataType::UInt64, false),
            Field::new("kind", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), self.dimension as i32),
                true,
            ),
        ]))
    }

    async fn ensure_table(&self) -> Result<(), GovRagError> {
        let names = self.db.table_names().execute().await?;
        if !names.contains(&self.table_name) {
            let schema = self.schema();
            let seed = self.record_batch(&[Chunk {
                chunk_id: "__seed__".into(),
                doc_id: "__seed__".into(),
                page: 0,
                char_start: 0,
                char_end: 0,
                kind: ChunkKind::Body,
                text: String::new(),
                backlink_id: None,
            }], &[vec![0.0f32; self.dimension]])?;
            let batches = RecordBatchIterator::new(vec![Ok(seed)], schema);
            self.db
                .create_table(&self.table_name, Box::new(batches))
                .execute()
                .await?;
            let table = self.db.open_table(&self.table_name).execute().await?;
            table.delete("chunk_id = '__seed__'").await.ok();
        }
        Ok(())
    }

    fn record_batch(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<RecordBatch, GovRagError> {
        let kind_label = |k: ChunkKind| match k {
            ChunkKind::Body => "body",
            ChunkKind::Table => "table",
            ChunkKind::Footnote => "footnote",
        };
        let chunk_ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        let doc_ids: Vec<&str> = chunks.iter().map(|c| c.doc_id.as_str()).collect();
        let pages: Vec<u32> = chunks.iter().map(|c| c.page).collect();
        let char_starts: Vec<u64> = chunks.iter().map(|c| c.char_start as u64).collect();
        let char_ends: Vec<u64> = chunks.iter().map(|c| c.char_end as u64).collect();
        let kinds: Vec<&str> = chunks.iter().map(|c| kind_label(c.kind)).collect();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();

        let flat: Vec<f32> = vectors.iter().flat_map(|v| v.iter().copied()).collect();
        let values = Float32Array::from(flat);
        let vector_field = Field::new("item", DataType::Float32, true);
        let vector_array = FixedSizeListArray::new(
            Arc::new(vector_field),
            self.dimension as i32,
            Arc::new(values) as Arc<dyn Array>,
            None,
        );

        Ok(RecordBatch::try_new(
            self.schema(),
            vec![
                Arc::new(StringArray::from(chunk_ids)) as Arc<dyn Array>,
                Arc::new(StringArray::from(doc_ids)),
                Arc::new(UInt32Array::from(pages)),
                Arc::new(UInt64Array::from(char_starts)),
                Arc::new(UInt64Array::from(char_ends)),
                Arc::new(StringArray::from(kinds)),
                Arc::new(StringArray::from(texts)),
                Arc::new(vector_array) as Arc<dyn Array>,
            ],
        )
        .map_err(|e| GovRagError::Internal(format!("arrow record batch: {e}")))?)
    }

    pub async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), GovRagError> {
        if chunks.is_empty() {
            return Ok(());
        }
        if vectors.iter().any(|v| v.len() != self.dimension) {
            return Err(GovRagError::RetrievalUnavailable {
                reason: format!("embedding dimension mismatch: index expects {}", self.dimension),
            });
        }
        let table = self.db.open_table(&self.table_name).execute().await?;
        let schema = self.schema();
        let batch = self.record_batch(chunks, vectors)?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table.add(Box::new(batches)).execute().await?;
        Ok(())
    }

    fn doc_ids_predicate(allowed_doc_ids: &[String]) -> String {
        let escaped: Vec<String> = allowed_doc_ids
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect();
        format!("doc_id IN ({})", escaped.join(", "))
    }

    fn batches_to_chunks(batches: &[RecordBatch]) -> Vec<Chunk> {
        let mut out = Vec::new();
        for batch in batches {
            let chunk_ids = batch.column_by_name("chunk_id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let doc_ids = batch.column_by_name("doc_id").and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let pages = batch.column_by_name("page").and_then(|c| c.as_any().downcast_ref::<UInt32Array>());
            let starts = batch.column_by_name("char_start").and_then(|c| c.as_any().downcast_ref::<UInt64Array>());
            let ends = batch.column_by_name("char_end").and_then(|c| c.as_any().downcast_ref::<UInt64Array>());
            let kinds = batch.column_by_name("kind").and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let texts = batch.column_by_name("text").and_then(|c| c.as_any().downcast_ref::<StringArray>());
            let (Some(chunk_ids), Some(doc_ids), Some(pages), Some(starts), Some(ends), Some(kinds), Some(texts)) =
                (chunk_ids, doc_ids, pages, starts, ends, kinds, texts)
            else {
                continue;
            };
            for i in 0..batch.num_rows() {
                let kind = match kinds.value(i) {
                    "table" => ChunkKind::Table,
                    "footnote" => ChunkKind::Footnote,
                    _ => ChunkKind::Body,
                };
                out.push(Chunk {
                    chunk_id: chunk_ids.value(i).to_string(),
                    doc_id: doc_ids.value(i).to_string(),
                    page: pages.value(i),
                    char_start: starts.value(i) as usize,
                    char_end: ends.value(i) as usize,
                    kind,
                    text: texts.value(i).to_string(),
                    backlink_id: None,
                });
            }
        }
        out
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        allowed_doc_ids: Option<&[String]>,
    ) -> Result<Vec<IndexHit>, GovRagError> {
        if embedding.len() != self.dimension {
            return Err(GovRagError::RetrievalUnavailable {
                reason: format!(
                    "query embedding dimension {} does not match index dimension {}",
                    embedding.len(),
                    self.dimension
                ),
            });
        }

        let table = self.db.open_table(&self.table_name).execute().await?;
        let mut query_builder = table
            .query()
            .nearest_to(embedding)
            .map_err(|e| GovRagError::RetrievalUnavailable { reason: e.to_string() })?;
        query_builder = query_builder.distance_type(lancedb::DistanceType::Cosine).limit(k);

        if let Some(ids) = allowed_doc_ids {
            if !ids.is_empty() {
                query_builder = query_builder.only_if(Self::doc_ids_predicate(ids));
            }
        }

        let results = query_builder.execute().await?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e: lancedb::Error| GovRagError::from(e))?;

        let chunks = Self::batches_to_chunks(&batches);
        let hits = chunks
            .into_iter()
            .enumerate()
            .map(|(rank, chunk)| IndexHit {
                chunk_id: chunk.chunk_id,
                // LanceDB returns results already ranked by distance; we
                // surface rank-derived score since the raw distance column
                // is consumed internally by `nearest_to`'s ordering.
                score: 1.0 / (1.0 + rank as f32),
                rank,
            })
            .collect();
        Ok(hits)
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, GovRagError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let table = self.db.open_table(&self.table_name).execute().await?;
        let escaped: Vec<String> = ids.iter().map(|id| format!("'{}'", id.replace('\'', "''"))).collect();
        let predicate = format!("chunk_id IN ({})", escaped.join(", "));
        let results = table.query().only_if(predicate).execute().await?;
        let batches: Vec<RecordBatch> = futures::TryStreamExt::try_collect(results)
            .await
            .map_err(|e: lancedb::Error| GovRagError::from(e))?;
        Ok(Self::batches_to_chunks(&batches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dimension_mismatch_fails_loudly_rather_than_degrading() {
        let dir = tempfile::tempdir().unwrap();
        let index = LanceVectorIndex::open(dir.path(), 8).await.unwrap();
        let bad_query = vec![0.0f32; 4];
        let result = index.search(&bad_query, 5, None).await;
        assert!(matches!(result, Err(GovRagError::RetrievalUnavailable { .. })));
    }

    #[tokio::test]
    async fn upsert_rejects_mismatched_vector_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let index = LanceVectorIndex::open(dir.path(), 8).await.unwrap();
        let chunk = Chunk {
            chunk_id: "c1".into(),
            doc_id: "D1".into(),
            page: 1,
            char_start: 0,
            char_end: 10,
            kind: ChunkKind::Body,
            text: "text".into(),
            backlink_id: None,
        };
        let result = index.upsert(&[chunk], &[vec![0.0f32; 4]]).await;
        assert!(result.is_err());
    }
}

//! Index Adapters.
//!
//! The lexical and vector index *engines* are external collaborators; these
//! traits are the thin seams this crate owns, one per backend.

mod lexical;
mod vector;

pub use lexical::TantivyLexicalIndex;
pub use vector::LanceVectorIndex;

use async_trait::async_trait;

use crate::error::GovRagError;
use crate::types::Chunk;

/// One hit from a single-source search, before fusion.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub chunk_id: String,
    pub score: f32,
    /// 0-based rank within this source's result list.
    pub rank: usize,
}

#[async_trait]
pub trait LexicalIndex: Send + Sync {
    async fn search(
        &self,
        query: &str,
        k: usize,
        allowed_doc_ids: Option<&[String]>,
    ) -> Result<Vec<IndexHit>, GovRagError>;

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, GovRagError>;
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn dimension(&self) -> usize;

    async fn search(
        &self,
        embedding: &[f32],
        k: usize,
        allowed_doc_ids: Option<&[String]>,
    ) -> Result<Vec<IndexHit>, GovRagError>;

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, GovRagError>;
}

/// External embedding-model collaborator. Deterministic and
/// cacheable by text hash; no concrete implementation ships in this crate.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, GovRagError>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GovRagError>;
}

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::GovRagError;
use crate::index::{IndexHit, LexicalIndex, VectorIndex};
use crate::types::{Chunk, Evidence};

/// Reciprocal Rank Fusion over raw `IndexHit` lists
/// rather than `(id, score)` pairs, used by `HybridRetriever`.
fn rrf_over_hits(lexical: &[IndexHit], vector: &[IndexHit], rrf_k: f32) -> HashMap<String, (f32, f32, f32)> {
    // chunk_id -> (rrf_score, score_lexical, score_vector)
    let mut scores: HashMap<String, (f32, f32, f32)> = HashMap::new();
    for hit in lexical {
        let rrf = 1.0 / (rrf_k + hit.rank as f32 + 1.0);
        let entry = scores.entry(hit.chunk_id.clone()).or_insert((0.0, 0.0, 0.0));
        entry.0 += rrf;
        entry.1 = hit.score;
    }
    for hit in vector {
        let rrf = 1.0 / (rrf_k + hit.rank as f32 + 1.0);
        let entry = scores.entry(hit.chunk_id.clone()).or_insert((0.0, 0.0, 0.0));
        entry.0 += rrf;
        entry.2 = hit.score;
    }
    scores
}

/// The Hybrid Retriever: concurrent lexical + vector search,
/// Reciprocal Rank Fusion, diversity clamp, minimum-score floor.
pub struct HybridRetriever {
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

/// Outcome of a retrieval call, including degradation metadata.
pub struct RetrievalOutcome {
    pub evidences: Vec<Evidence>,
    pub degraded_lexical_only: bool,
    pub degraded_vector_only: bool,
}

impl HybridRetriever {
    pub fn new(lexical: Arc<dyn LexicalIndex>, vector: Arc<dyn VectorIndex>, config: RetrievalConfig) -> Self {
        Self {
            lexical,
            vector,
            config,
        }
    }

    /// `query_embedding` is pre-computed by the caller via the external
    /// Embedder collaborator — the retriever itself never embeds.
    pub async fn retrieve(
        &self,
        query_text: &str,
        query_embedding: Option<&[f32]>,
        allowed_doc_ids: Option<&[String]>,
    ) -> Result<RetrievalOutcome, GovRagError> {
        let lexical_fut = self.lexical.search(query_text, self.config.topk_bm25, allowed_doc_ids);
        let vector_fut = async {
            match query_embedding {
                Some(emb) => self.vector.search(emb, self.config.topk_vector, allowed_doc_ids).await.map(Some),
                None => Ok(None),
            }
        };

        let (lexical_result, vector_result) = tokio::join!(lexical_fut, vector_fut);

        let (lexical_hits, lexical_failed) = match lexical_result {
            Ok(hits) => (hits, false),
            Err(_) => (Vec::new(), true),
        };
        let (vector_hits, vector_failed) = match vector_result {
            Ok(Some(hits)) => (hits, false),
            Ok(None) => (Vec::new(), true),
            Err(_) => (Vec::new(), true),
        };

        if lexical_failed && vector_failed {
            return Err(GovRagError::RetrievalUnavailable {
                reason: "both lexical and vector indexes unavailable".into(),
            });
        }

        let fused = rrf_over_hits(&lexical_hits, &vector_hits, self.config.rrf_k);
        let mut ranked: Vec<(String, f32, f32, f32)> = fused
            .into_iter()
            .map(|(id, (rrf, lex, vec))| (id, rrf, lex, vec))
            .collect();

        // RRF rank is authoritative; `w_bm25`/`w_vector` over min-max
        // normalised sub-scores only break exact RRF ties.
        let max_lex = ranked.iter().map(|(_, _, lex, _)| *lex).fold(0.0_f32, f32::max);
        let max_vec = ranked.iter().map(|(_, _, _, vec)| *vec).fold(0.0_f32, f32::max);
        let w_lex = self.config.w_bm25;
        let w_vec = self.config.w_vector;
        let weighted = |lex: f32, vec: f32| {
            let norm_lex = if max_lex > 0.0 { lex / max_lex } else { 0.0 };
            let norm_vec = if max_vec > 0.0 { vec / max_vec } else { 0.0 };
            w_lex * norm_lex + w_vec * norm_vec
        };
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| weighted(b.2, b.3).partial_cmp(&weighted(a.2, a.3)).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| a.0.cmp(&b.0))
        });

        let chunk_ids: Vec<String> = ranked.iter().map(|(id, ..)| id.clone()).collect();
        let chunks = if !lexical_failed {
            self.lexical.get_chunks(&chunk_ids).await?
        } else {
            self.vector.get_chunks(&chunk_ids).await?
        };
        let chunk_by_id: HashMap<String, crate::types::Chunk> =
            chunks.into_iter().map(|c| (c.chunk_id.clone(), c)).collect();

        let mut evidences: Vec<Evidence> = ranked
            .into_iter()
            .filter_map(|(id, rrf, lex, vec)| {
                chunk_by_id.get(&id).cloned().map(|chunk| Evidence {
                    chunk,
                    score_lexical: lex,
                    score_vector: vec,
                    score_rrf: rrf,
                    score_rerank: None,
                    rank_final: 0,
                })
            })
            .collect();

        self.apply_diversity_clamp(&mut evidences);
        self.apply_score_floor(&mut evidences);

        for (i, ev) in evidences.iter_mut().enumerate() {
            ev.rank_final = i + 1;
        }

        Ok(RetrievalOutcome {
            evidences,
            degraded_lexical_only: vector_failed && !lexical_failed,
            degraded_vector_only: lexical_failed && !vector_failed,
        })
    }

    /// No more than `max_per_doc` chunks from any single doc_id; excess
    /// chunks drop in ascending RRF score order.
    fn apply_diversity_clamp(&self, evidences: &mut Vec<Evidence>) {
        let max_per_doc = self.config.max_per_doc;
        let mut counts: HashMap<String, usize> = HashMap::new();
        // Evidences are assumed already sorted by descending RRF score.
        evidences.retain(|ev| {
            let count = counts.entry(ev.chunk.doc_id.clone()).or_insert(0);
            *count += 1;
            *count <= max_per_doc
        });
    }

    /// Drop evidences whose RRF score falls below `s_top * floor_ratio`.
    fn apply_score_floor(&self, evidences: &mut Vec<Evidence>) {
        let Some(top) = evidences.first().map(|e| e.score_rrf) else {
            return;
        };
        let floor = top * self.config.floor_ratio;
        evidences.retain(|e| e.score_rrf >= floor);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::types::ChunkKind;

    fn chunk(id: &str, doc_id: &str) -> Chunk {
        Chunk {
            chunk_id: id.into(),
            doc_id: doc_id.into(),
            page: 1,
            char_start: 0,
            char_end: 10,
            kind: ChunkKind::Body,
            text: format!("text {id}"),
            backlink_id: None,
        }
    }

    struct MockLexical {
        hits: Vec<IndexHit>,
        chunks: Vec<Chunk>,
        fail: bool,
    }

    #[async_trait]
    impl LexicalIndex for MockLexical {
        async fn search(
            &self,
            _query: &str,
            _k: usize,
            _allowed_doc_ids: Option<&[String]>,
        ) -> Result<Vec<IndexHit>, GovRagError> {
            if self.fail {
                return Err(GovRagError::RetrievalUnavailable { reason: "down".into() });
            }
            Ok(self.hits.clone())
        }

        async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, GovRagError> {
            Ok(self.chunks.iter().filter(|c| ids.contains(&c.chunk_id)).cloned().collect())
        }
    }

    struct MockVector {
        hits: Vec<IndexHit>,
        chunks: Vec<Chunk>,
        fail: bool,
    }

    #[async_trait]
    impl VectorIndex for MockVector {
        fn dimension(&self) -> usize {
            768
        }

        async fn search(
            &self,
            _embedding: &[f32],
            _k: usize,
            _allowed_doc_ids: Option<&[String]>,
        ) -> Result<Vec<IndexHit>, GovRagError> {
            if self.fail {
                return Err(GovRagError::RetrievalUnavailable { reason: "down".into() });
            }
            Ok(self.hits.clone())
        }

        async fn get_chunks(&self, ids: &[String]) -> Result<Vec<Chunk>, GovRagError> {
            Ok(self.chunks.iter().filter(|c| ids.contains(&c.chunk_id)).cloned().collect())
        }
    }

    fn config() -> RetrievalConfig {
        RetrievalConfig {
            w_bm25: 0.5,
            w_vector: 0.5,
            w_rerank: 1.0,
            rrf_k: 60.0,
            topk_bm25: 50,
            topk_vector: 50,
            topk_rerank: 20,
            max_per_doc: 2,
            floor_ratio: 0.3,
            evidence_set_size: 8,
        }
    }

    #[tokio::test]
    async fn fuses_and_dense_ranks_chunks_seen_by_both_sources() {
        let lexical = Arc::new(MockLexical {
            hits: vec![
                IndexHit { chunk_id: "a".into(), score: 5.0, rank: 0 },
                IndexHit { chunk_id: "b".into(), score: 4.0, rank: 1 },
            ],
            chunks: vec![chunk("a", "D1"), chunk("b", "D1")],
            fail: false,
        });
        let vector = Arc::new(MockVector {
            hits: vec![
                IndexHit { chunk_id: "b".into(), score: 0.9, rank: 0 },
                IndexHit { chunk_id: "a".into(), score: 0.8, rank: 1 },
            ],
            chunks: vec![chunk("a", "D1"), chunk("b", "D1")],
            fail: false,
        });
        let retriever = HybridRetriever::new(lexical, vector, config());
        let outcome = retriever.retrieve("query", Some(&[0.0; 768]), None).await.unwrap();

        assert_eq!(outcome.evidences.len(), 2);
        assert!(!outcome.degraded_lexical_only);
        assert!(!outcome.degraded_vector_only);
        for (i, ev) in outcome.evidences.iter().enumerate() {
            assert_eq!(ev.rank_final, i + 1);
        }
    }

    #[tokio::test]
    async fn rrf_ties_break_by_weighted_normalised_sub_scores_not_chunk_id() {
        // "a" and "b" land on the exact same RRF score (symmetric ranks
        // across sources), so the tie-break must fall to the weighted
        // combination of normalised sub-scores, not chunk_id order.
        let lexical = Arc::new(MockLexical {
            hits: vec![
                IndexHit { chunk_id: "a".into(), score: 5.0, rank: 0 },
                IndexHit { chunk_id: "b".into(), score: 4.0, rank: 1 },
            ],
            chunks: vec![chunk("a", "D1"), chunk("b", "D1")],
            fail: false,
        });
        let vector = Arc::new(MockVector {
            hits: vec![
                IndexHit { chunk_id: "b".into(), score: 0.9, rank: 0 },
                IndexHit { chunk_id: "a".into(), score: 0.8, rank: 1 },
            ],
            chunks: vec![chunk("a", "D1"), chunk("b", "D1")],
            fail: false,
        });
        let mut vector_heavy = config();
        vector_heavy.w_bm25 = 0.0;
        vector_heavy.w_vector = 1.0;
        let retriever = HybridRetriever::new(lexical, vector, vector_heavy);
        let outcome = retriever.retrieve("query", Some(&[0.0; 768]), None).await.unwrap();

        // "b" has the higher normalised vector sub-score (0.9 vs 0.8) and
        // wins under a pure-vector weighting despite sorting after "a"
        // alphabetically.
        assert_eq!(outcome.evidences[0].chunk.chunk_id, "b");
        assert_eq!(outcome.evidences[1].chunk.chunk_id, "a");
    }

    #[tokio::test]
    async fn degrades_to_lexical_only_when_vector_search_fails() {
        let lexical = Arc::new(MockLexical {
            hits: vec![IndexHit { chunk_id: "a".into(), score: 5.0, rank: 0 }],
            chunks: vec![chunk("a", "D1")],
            fail: false,
        });
        let vector = Arc::new(MockVector { hits: vec![], chunks: vec![], fail: true });
        let retriever = HybridRetriever::new(lexical, vector, config());
        let outcome = retriever.retrieve("query", Some(&[0.0; 768]), None).await.unwrap();

        assert!(outcome.degraded_lexical_only);
        assert_eq!(outcome.evidences.len(), 1);
    }

    #[tokio::test]
    async fn fails_when_both_sources_unavailable() {
        let lexical = Arc::new(MockLexical { hits: vec![], chunks: vec![], fail: true });
        let vector = Arc::new(MockVector { hits: vec![], chunks: vec![], fail: true });
        let retriever = HybridRetriever::new(lexical, vector, config());
        let result = retriever.retrieve("query", Some(&[0.0; 768]), None).await;

        assert!(matches!(result, Err(GovRagError::RetrievalUnavailable { .. })));
    }

    #[tokio::test]
    async fn diversity_clamp_drops_excess_chunks_from_a_dominant_doc() {
        let hits: Vec<IndexHit> = (0..5)
            .map(|i| IndexHit { chunk_id: format!("c{i}"), score: 5.0 - i as f32, rank: i })
            .collect();
        let chunks: Vec<Chunk> = (0..5).map(|i| chunk(&format!("c{i}"), "D1")).collect();
        let lexical = Arc::new(MockLexical { hits: hits.clone(), chunks: chunks.clone(), fail: false });
        let vector = Arc::new(MockVector { hits: vec![], chunks: vec![], fail: true });
        let retriever = HybridRetriever::new(lexical, vector, config());
        let outcome = retriever.retrieve("query", None, None).await.unwrap();

        // max_per_doc = 2, all five chunks share doc_id "D1".
        assert_eq!(outcome.evidences.len(), 2);
        assert!(outcome.evidences.iter().all(|e| e.chunk.doc_id == "D1"));
    }

    #[tokio::test]
    async fn score_floor_drops_low_scoring_chunks() {
        let lexical = Arc::new(MockLexical {
            hits: vec![
                IndexHit { chunk_id: "a".into(), score: 5.0, rank: 0 },
                IndexHit { chunk_id: "b".into(), score: 0.001, rank: 500 },
            ],
            chunks: vec![chunk("a", "D1"), chunk("b", "D2")],
            fail: false,
        });
        let vector = Arc::new(MockVector { hits: vec![], chunks: vec![], fail: true });
        let retriever = HybridRetriever::new(lexical, vector, config());
        let outcome = retriever.retrieve("query", None, None).await.unwrap();

        assert_eq!(outcome.evidences.len(), 1);
        assert_eq!(outcome.evidences[0].chunk.chunk_id, "a");
    }
}

//! The Reranker component: cross-encoder scoring of the
//! hybrid-retrieval shortlist, with deterministic pass-through fallback.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::reranking::CrossEncoderReranker;
use crate::types::Evidence;

/// Outcome of a rerank pass, including whether it actually ran.
pub struct RerankOutcome {
    pub evidences: Vec<Evidence>,
    pub rerank_skipped: bool,
}

/// Wraps an ONNX `CrossEncoderReranker` with pass-through fallback and
/// deterministic tie-break behaviour. `None` means "reranker disabled or
/// unavailable" — every call then passes the input through unchanged.
pub struct Reranker {
    engine: Option<Arc<CrossEncoderReranker>>,
}

impl Reranker {
    pub fn new(engine: Option<Arc<CrossEncoderReranker>>) -> Self {
        Self { engine }
    }

    pub fn disabled() -> Self {
        Self { engine: None }
    }

    /// Score `candidates` (already truncated by the caller to `TOPK_RERANK`)
    /// against `query`. On any backend failure the original order is kept
    /// and `rerank_skipped=true` is reported rather than erroring the turn
    ///.
    pub fn rerank(&self, query: &str, mut candidates: Vec<Evidence>) -> RerankOutcome {
        let Some(engine) = &self.engine else {
            return RerankOutcome {
                evidences: candidates,
                rerank_skipped: true,
            };
        };

        let pairs: Vec<(String, String)> = candidates
            .iter()
            .map(|e| (e.chunk.chunk_id.clone(), e.chunk.text.clone()))
            .collect();

        let scored = match engine.rerank_batch(query, &pairs, pairs.len()) {
            Ok(scored) => scored,
            Err(e) => {
                tracing::warn!(error = %e, "reranker backend failed, passing through");
                return RerankOutcome {
                    evidences: candidates,
                    rerank_skipped: true,
                };
            }
        };

        let mut score_by_id: std::collections::HashMap<String, f32> = scored.into_iter().collect();
        for ev in &mut candidates {
            ev.score_rerank = score_by_id.remove(&ev.chunk.chunk_id);
        }

        // Deterministic tie-break: rerank score desc, then RRF
        // score desc, then (doc_id, char_start) asc. Candidates the
        // cross-encoder failed to score (tokenization failure) sort as if
        // scored f32::MIN, i.e. last.
        candidates.sort_by(|a, b| {
            let ra = a.score_rerank.unwrap_or(f32::MIN);
            let rb = b.score_rerank.unwrap_or(f32::MIN);
            rb.partial_cmp(&ra)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.score_rrf.partial_cmp(&a.score_rrf).unwrap_or(Ordering::Equal))
                .then_with(|| a.chunk.doc_id.cmp(&b.chunk.doc_id))
                .then_with(|| a.chunk.char_start.cmp(&b.chunk.char_start))
        });

        RerankOutcome {
            evidences: candidates,
            rerank_skipped: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkKind};

    fn ev(id: &str, doc: &str, rrf: f32) -> Evidence {
        Evidence {
            chunk: Chunk {
                chunk_id: id.into(),
                doc_id: doc.into(),
                page: 1,
                char_start: 0,
                char_end: 10,
                kind: ChunkKind::Body,
                text: "text".into(),
                backlink_id: None,
            },
            score_lexical: 0.0,
            score_vector: 0.0,
            score_rrf: rrf,
            score_rerank: None,
            rank_final: 0,
        }
    }

    #[test]
    fn disabled_reranker_passes_through_and_marks_skipped() {
        let reranker = Reranker::disabled();
        let input = vec![ev("c1", "D1", 0.5), ev("c2", "D1", 0.3)];
        let out = reranker.rerank("query", input.clone());
        assert!(out.rerank_skipped);
        assert_eq!(out.evidences.len(), 2);
        assert_eq!(out.evidences[0].chunk.chunk_id, "c1");
    }

    #[test]
    fn tie_break_falls_back_to_rrf_then_doc_id_then_char_start() {
        let mut a = ev("a", "D2", 0.9);
        a.score_rerank = Some(1.0);
        let mut b = ev("b", "D1", 0.8);
        b.score_rerank = Some(1.0);
        let mut evidences = vec![a, b];
        evidences.sort_by(|x, y| {
            y.score_rerank
                .unwrap()
                .partial_cmp(&x.score_rerank.unwrap())
                .unwrap()
                .then_with(|| y.score_rrf.partial_cmp(&x.score_rrf).unwrap())
                .then_with(|| x.chunk.doc_id.cmp(&y.chunk.doc_id))
        });
        assert_eq!(evidences[0].chunk.chunk_id, "a");
    }
}

//! Evidence Set Builder.
//!
//! Truncates/extends the reranked shortlist to the top-N evidences, assigns
//! dense 1-based `rank_final`, re-enforces `max_per_doc` (reranking can
//! reorder chunks such that the pre-rerank diversity clamp no longer holds),
//! and computes keyword coverage for the Topic Detector and `TurnMetadata`.

use std::collections::HashMap;

use crate::types::Evidence;

/// The finished evidence set plus metadata useful to later stages.
pub struct EvidenceSet {
    pub evidences: Vec<Evidence>,
    /// Fraction of the query's keyword set present across evidence text.
    pub coverage: f32,
}

pub struct EvidenceSetBuilder {
    pub max_per_doc: usize,
    pub evidence_set_size: usize,
}

impl EvidenceSetBuilder {
    pub fn new(max_per_doc: usize, evidence_set_size: usize) -> Self {
        Self {
            max_per_doc,
            evidence_set_size,
        }
    }

    /// `ranked` must already be in final order (post-rerank or, if the
    /// reranker was skipped, post-RRF).
    pub fn build(&self, query: &str, ranked: Vec<Evidence>) -> EvidenceSet {
        let mut per_doc: HashMap<String, usize> = HashMap::new();
        let mut kept: Vec<Evidence> = Vec::with_capacity(self.evidence_set_size.min(ranked.len()));

        for ev in ranked {
            if kept.len() >= self.evidence_set_size {
                break;
            }
            let count = per_doc.entry(ev.chunk.doc_id.clone()).or_insert(0);
            if *count >= self.max_per_doc {
                continue;
            }
            *count += 1;
            kept.push(ev);
        }

        for (i, ev) in kept.iter_mut().enumerate() {
            ev.rank_final = i + 1;
        }

        let coverage = keyword_coverage(query, &kept);

        EvidenceSet {
            evidences: kept,
            coverage,
        }
    }
}

/// Fraction of distinct query keywords (tokens of length > 1) present in the
/// concatenated evidence text, case-insensitively.
fn keyword_coverage(query: &str, evidences: &[Evidence]) -> f32 {
    let keywords: Vec<String> = query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.chars().count() > 1)
        .collect();
    if keywords.is_empty() {
        return 1.0;
    }

    let corpus: String = evidences
        .iter()
        .map(|e| e.chunk.text.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let hits = keywords.iter().filter(|kw| corpus.contains(kw.as_str())).count();
    hits as f32 / keywords.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkKind};

    fn ev(id: &str, doc: &str, text: &str, rrf: f32) -> Evidence {
        Evidence {
            chunk: Chunk {
                chunk_id: id.into(),
                doc_id: doc.into(),
                page: 1,
                char_start: 0,
                char_end: text.len(),
                kind: ChunkKind::Body,
                text: text.into(),
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
    fn rank_final_is_dense_and_one_based() {
        let builder = EvidenceSetBuilder::new(3, 5);
        let set = builder.build(
            "예산",
            vec![ev("a", "D1", "예산 내역", 0.9), ev("b", "D2", "다른 문서", 0.5)],
        );
        let ranks: Vec<usize> = set.evidences.iter().map(|e| e.rank_final).collect();
        assert_eq!(ranks, vec![1, 2]);
    }

    #[test]
    fn max_per_doc_enforced_after_rerank_reordering() {
        let builder = EvidenceSetBuilder::new(1, 10);
        let ranked = vec![ev("a", "D1", "x", 0.9), ev("b", "D1", "y", 0.8), ev("c", "D2", "z", 0.7)];
        let set = builder.build("q", ranked);
        let doc_ids: Vec<&str> = set.evidences.iter().map(|e| e.chunk.doc_id.as_str()).collect();
        assert_eq!(doc_ids, vec!["D1", "D2"]);
    }

    #[test]
    fn coverage_counts_present_keywords() {
        let builder = EvidenceSetBuilder::new(3, 5);
        let set = builder.build("2024년 예산", vec![ev("a", "D1", "2024년 예산은 100억 원", 0.9)]);
        assert!(set.coverage > 0.9);
    }

    #[test]
    fn empty_evidence_set_still_builds() {
        let builder = EvidenceSetBuilder::new(3, 5);
        let set = builder.build("q", vec![]);
        assert!(set.evidences.is_empty());
    }
}

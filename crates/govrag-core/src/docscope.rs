//! Doc-Scope Resolver.
//!
//! Produces the effective `DocScope` for a turn from the session's
//! follow-up/topic-change state and any client-supplied document ids.

use crate::topic::TopicVerdict;
use crate::types::{DocScope, DocScopeMode, Session};

pub struct DocScopeResolver {
    /// `retrieval.floor_ratio`: when the follow-up+topic-change probe's
    /// average RRF score falls below `top_probe_rrf * floor_ratio`, scope
    /// expands to the full corpus.
    floor_ratio: f32,
}

/// Results of the quick probe retrieval the orchestrator runs against the
/// session's prior scope before calling `resolve` in the
/// follow-up-and-topic-change branch.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeProbe {
    pub avg_rrf: f32,
    pub top_rrf: f32,
}

impl DocScopeResolver {
    pub fn new(floor_ratio: f32) -> Self {
        Self { floor_ratio }
    }

    pub fn resolve(
        &self,
        session: Option<&Session>,
        client_doc_ids: &[String],
        topic_verdict: TopicVerdict,
        probe: Option<ScopeProbe>,
    ) -> DocScope {
        if !client_doc_ids.is_empty() {
            let inherits_session = session
                .map(|s| s.recent_source_doc_ids.as_slice() == client_doc_ids)
                .unwrap_or(false);
            return DocScope {
                mode: Some(if inherits_session { DocScopeMode::InheritFirst } else { DocScopeMode::Expanded }),
                allowed_doc_ids: client_doc_ids.to_vec(),
                topic_change_detected: topic_verdict.topic_change_detected,
                suggested_doc_ids: Vec::new(),
            };
        }

        let is_followup = session.map(|s| s.is_followup()).unwrap_or(false);

        if is_followup && !topic_verdict.topic_change_detected {
            return DocScope {
                mode: Some(DocScopeMode::InheritFirst),
                allowed_doc_ids: session.map(|s| s.recent_source_doc_ids.clone()).unwrap_or_default(),
                topic_change_detected: false,
                suggested_doc_ids: Vec::new(),
            };
        }

        if is_followup && topic_verdict.topic_change_detected {
            let session_ids = session.map(|s| s.recent_source_doc_ids.clone()).unwrap_or_default();
            let floor = probe.map(|p| p.top_rrf * self.floor_ratio).unwrap_or(0.0);
            let below_floor = probe.map(|p| p.avg_rrf < floor).unwrap_or(true);

            return if below_floor {
                DocScope {
                    mode: Some(DocScopeMode::Expanded),
                    allowed_doc_ids: Vec::new(),
                    topic_change_detected: true,
                    suggested_doc_ids: session_ids,
                }
            } else {
                DocScope {
                    mode: Some(DocScopeMode::SessionDocs),
                    allowed_doc_ids: session_ids,
                    topic_change_detected: true,
                    suggested_doc_ids: Vec::new(),
                }
            };
        }

        DocScope {
            mode: Some(DocScopeMode::FullCorpus),
            allowed_doc_ids: Vec::new(),
            topic_change_detected: topic_verdict.topic_change_detected,
            suggested_doc_ids: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_change() -> TopicVerdict {
        TopicVerdict { topic_change_detected: false, signals_fired: 0 }
    }
    fn changed() -> TopicVerdict {
        TopicVerdict { topic_change_detected: true, signals_fired: 2 }
    }

    fn test_evidence() -> crate::types::Evidence {
        use crate::types::{Chunk, ChunkKind, Evidence};
        Evidence {
            chunk: Chunk {
                chunk_id: "c1".into(),
                doc_id: "D1".into(),
                page: 1,
                char_start: 0,
                char_end: 10,
                kind: ChunkKind::Body,
                text: "text".into(),
                backlink_id: None,
            },
            score_lexical: 0.0,
            score_vector: 0.0,
            score_rrf: 1.0,
            score_rerank: None,
            rank_final: 1,
        }
    }

    #[test]
    fn client_doc_ids_always_win() {
        let resolver = DocScopeResolver::new(0.3);
        let scope = resolver.resolve(None, &["D9".to_string()], no_change(), None);
        assert_eq!(scope.allowed_doc_ids, vec!["D9".to_string()]);
        assert_eq!(scope.mode, Some(DocScopeMode::Expanded));
    }

    #[test]
    fn cold_session_is_full_corpus() {
        let resolver = DocScopeResolver::new(0.3);
        let scope = resolver.resolve(None, &[], no_change(), None);
        assert_eq!(scope.mode, Some(DocScopeMode::FullCorpus));
        assert!(scope.allowed_doc_ids.is_empty());
    }

    #[test]
    fn followup_without_topic_change_inherits_session_scope() {
        let resolver = DocScopeResolver::new(0.3);
        let mut session = Session::new(None);
        session.recent_source_doc_ids = vec!["D1".to_string()];
        session.turns.push(crate::types::Turn {
            turn_id: uuid::Uuid::new_v4(),
            role: crate::types::TurnRole::Assistant,
            content: "a".into(),
            timestamp: chrono::Utc::now(),
            evidences: Some(vec![]),
            citation_map: None,
            metadata: Default::default(),
        });
        // is_followup requires non-empty evidences; patch directly.
        session.turns[0].evidences = Some(vec![test_evidence()]);

        let scope = resolver.resolve(Some(&session), &[], no_change(), None);
        assert_eq!(scope.mode, Some(DocScopeMode::InheritFirst));
        assert_eq!(scope.allowed_doc_ids, vec!["D1".to_string()]);
    }

    #[test]
    fn followup_with_topic_change_expands_below_floor() {
        let resolver = DocScopeResolver::new(0.5);
        let mut session = Session::new(None);
        session.recent_source_doc_ids = vec!["D1".to_string()];
        session.turns.push(crate::types::Turn {
            turn_id: uuid::Uuid::new_v4(),
            role: crate::types::TurnRole::Assistant,
            content: "a".into(),
            timestamp: chrono::Utc::now(),
            evidences: Some(vec![test_evidence()]),
            citation_map: None,
            metadata: Default::default(),
        });

        let probe = ScopeProbe { avg_rrf: 0.01, top_rrf: 1.0 };
        let scope = resolver.resolve(Some(&session), &[], changed(), Some(probe));
        assert_eq!(scope.mode, Some(DocScopeMode::Expanded));
        assert_eq!(scope.suggested_doc_ids, vec!["D1".to_string()]);
    }

    #[test]
    fn followup_with_topic_change_keeps_session_scope_above_floor() {
        let resolver = DocScopeResolver::new(0.3);
        let mut session = Session::new(None);
        session.recent_source_doc_ids = vec!["D1".to_string()];
        session.turns.push(crate::types::Turn {
            turn_id: uuid::Uuid::new_v4(),
            role: crate::types::TurnRole::Assistant,
            content: "a".into(),
            timestamp: chrono::Utc::now(),
            evidences: Some(vec![test_evidence()]),
            citation_map: None,
            metadata: Default::default(),
        });

        let probe = ScopeProbe { avg_rrf: 0.8, top_rrf: 1.0 };
        let scope = resolver.resolve(Some(&session), &[], changed(), Some(probe));
        assert_eq!(scope.mode, Some(DocScopeMode::SessionDocs));
        assert_eq!(scope.allowed_doc_ids, vec!["D1".to_string()]);
    }
}

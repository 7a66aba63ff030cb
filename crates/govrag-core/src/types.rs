use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of content an indexed `Chunk` represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Body,
    Table,
    Footnote,
}

/// An indexed unit of text.
///
/// `(doc_id, char_start, char_end)` uniquely identifies the chunk within a
/// document; chunks are immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub page: u32,
    pub char_start: usize,
    pub char_end: usize,
    pub kind: ChunkKind,
    pub text: String,
    pub backlink_id: Option<String>,
}

impl Chunk {
    pub fn span_len(&self) -> usize {
        self.char_end.saturating_sub(self.char_start)
    }
}

/// A `Chunk` materialised for a query, carrying its retrieval scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub chunk: Chunk,
    pub score_lexical: f32,
    pub score_vector: f32,
    pub score_rrf: f32,
    pub score_rerank: Option<f32>,
    /// 1-based, dense over the evidence set.
    pub rank_final: usize,
}

impl Evidence {
    pub fn doc_id(&self) -> &str {
        &self.chunk.doc_id
    }
}

/// A source locator: where a citation ordinal points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Locator {
    pub page: u32,
    pub char_start: usize,
    pub char_end: usize,
}

/// Mapping from citation ordinal (as it appears in answer text) to a source
/// locator. Injective within a session's first answer; frozen ordinals never
/// retarget in later turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationMap {
    /// Ordinal -> (doc_id, locator), insertion order is ordinal order.
    pub entries: Vec<(u32, String, Locator)>,
}

impl CitationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ordinal: u32) -> Option<(&str, &Locator)> {
        self.entries
            .iter()
            .find(|(n, ..)| *n == ordinal)
            .map(|(_, doc_id, loc)| (doc_id.as_str(), loc))
    }

    pub fn max_ordinal(&self) -> u32 {
        self.entries.iter().map(|(n, ..)| *n).max().unwrap_or(0)
    }

    /// Find an existing ordinal already bound to this exact locator, if any.
    pub fn find_ordinal_for(&self, doc_id: &str, loc: &Locator) -> Option<u32> {
        self.entries
            .iter()
            .find(|(_, d, l)| d == doc_id && l == loc)
            .map(|(n, ..)| *n)
    }

    /// Append a new source, assigning the next free ordinal. Returns it.
    pub fn append(&mut self, doc_id: String, loc: Locator) -> u32 {
        let next = self.max_ordinal() + 1;
        self.entries.push((next, doc_id, loc));
        next
    }

    /// True if every ordinal 1..=max is present exactly once (density + injectivity).
    pub fn is_dense_and_injective(&self) -> bool {
        let mut seen: Vec<u32> = self.entries.iter().map(|(n, ..)| *n).collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len() == self.entries.len() && seen.iter().enumerate().all(|(i, n)| *n == (i as u32) + 1)
    }
}

/// Role of a `Turn` in a session's transcript.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    SystemNotice,
}

/// Rewrite-stage metadata attached to a turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewriteInfo {
    pub original_query: String,
    pub rewritten_query: String,
    pub used_context: bool,
    pub used_fallback: bool,
}

/// Doc-scope metadata attached to a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocScopeInfo {
    pub mode: DocScopeMode,
    pub allowed_doc_ids: Vec<String>,
    pub topic_change_detected: bool,
}

/// Enforcer verdict attached to a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroundingVerdict {
    Accepted,
    Regenerated,
    InsufficientEvidence,
}

/// Per-state elapsed milliseconds, accumulated by the Chat Orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LatencyBreakdown {
    pub rewriting_ms: u64,
    pub resolving_scope_ms: u64,
    pub retrieving_ms: u64,
    pub reranking_ms: u64,
    pub composing_ms: u64,
    pub generating_ms: u64,
    pub enforcing_ms: u64,
    pub citing_ms: u64,
    pub formatting_ms: u64,
    pub persisting_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DegradedFlags {
    pub lexical_only: bool,
    pub vector_only: bool,
    pub rerank_skipped: bool,
}

/// Explicit tagged-variant replacement for the original source's dynamically
/// typed turn metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnMetadata {
    pub rewrite: Option<RewriteInfo>,
    pub doc_scope: Option<DocScopeInfo>,
    pub grounding: Option<GroundingVerdict>,
    pub latency_ms: LatencyBreakdown,
    pub degraded: DegradedFlags,
    pub persisted: bool,
}

/// One entry in a session's transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub turn_id: Uuid,
    pub role: TurnRole,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub evidences: Option<Vec<Evidence>>,
    pub citation_map: Option<CitationMap>,
    pub metadata: TurnMetadata,
}

/// The effective retrieval scope for a turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocScopeMode {
    InheritFirst,
    SessionDocs,
    Expanded,
    FullCorpus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocScope {
    pub mode: Option<DocScopeMode>,
    pub allowed_doc_ids: Vec<String>,
    pub topic_change_detected: bool,
    pub suggested_doc_ids: Vec<String>,
}

/// Process-durable multi-turn conversation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub title: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub turns: Vec<Turn>,
    pub recent_source_doc_ids: Vec<String>,
    pub first_response_evidences: Option<Vec<Evidence>>,
    pub first_response_citation_map: Option<CitationMap>,
    pub conversation_summary: Option<ConversationSummary>,
    pub recent_entities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub text: String,
    pub confidence: f32,
}

impl Session {
    pub fn new(title: Option<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            title,
            created_at: now,
            updated_at: now,
            turns: Vec::new(),
            recent_source_doc_ids: Vec::new(),
            first_response_evidences: None,
            first_response_citation_map: None,
            conversation_summary: None,
            recent_entities: Vec::new(),
        }
    }

    /// The most recent turn with non-empty evidences, if any — used by the
    /// Doc-Scope Resolver's `is_followup` heuristic.
    pub fn last_evidenced_turn(&self) -> Option<&Turn> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant && t.evidences.as_ref().is_some_and(|e| !e.is_empty()))
    }

    pub fn is_followup(&self) -> bool {
        self.last_evidenced_turn().is_some()
    }

    /// Record document ids referenced by an answer, preserving insertion
    /// order, deduplicated, capped at `cap`.
    pub fn record_recent_doc_ids(&mut self, doc_ids: impl IntoIterator<Item = String>, cap: usize) {
        for id in doc_ids {
            if !self.recent_source_doc_ids.contains(&id) {
                self.recent_source_doc_ids.push(id);
            }
        }
        if self.recent_source_doc_ids.len() > cap {
            let drop = self.recent_source_doc_ids.len() - cap;
            self.recent_source_doc_ids.drain(0..drop);
        }
    }
}

#[cfg(test)]
mod domain_tests {
    use super::*;

    fn loc(a: usize, b: usize) -> Locator {
        Locator {
            page: 1,
            char_start: a,
            char_end: b,
        }
    }

    #[test]
    fn citation_map_append_assigns_next_free_ordinal() {
        let mut map = CitationMap::new();
        assert_eq!(map.append("D1".into(), loc(0, 10)), 1);
        assert_eq!(map.append("D2".into(), loc(0, 10)), 2);
        assert!(map.is_dense_and_injective());
    }

    #[test]
    fn citation_map_finds_existing_ordinal_for_same_locator() {
        let mut map = CitationMap::new();
        let l = loc(120, 260);
        map.append("D1".into(), l);
        assert_eq!(map.find_ordinal_for("D1", &l), Some(1));
        assert_eq!(map.find_ordinal_for("D1", &loc(0, 1)), None);
    }

    #[test]
    fn non_dense_map_is_detected() {
        let map = CitationMap {
            entries: vec![(1, "D1".into(), loc(0, 1)), (3, "D2".into(), loc(0, 1))],
        };
        assert!(!map.is_dense_and_injective());
    }

    #[test]
    fn session_records_recent_doc_ids_dedup_and_capped() {
        let mut s = Session::new(None);
        s.record_recent_doc_ids(["D1".to_string(), "D2".to_string(), "D1".to_string()], 2);
        assert_eq!(s.recent_source_doc_ids, vec!["D1".to_string(), "D2".to_string()]);
        s.record_recent_doc_ids(["D3".to_string()], 2);
        assert_eq!(s.recent_source_doc_ids, vec!["D2".to_string(), "D3".to_string()]);
    }

    #[test]
    fn fresh_session_has_no_followup() {
        let s = Session::new(Some("t".into()));
        assert!(!s.is_followup());
    }
}

//! Citation Tracker.
//!
//! Parses `[i]` markers the Generator produced, using precompiled
//! `LazyLock<Regex>` bracket-citation patterns, strips any `[N]` where
//! `N > num_sources || N == 0`, then resolves what remains against a frozen
//! per-session `CitationMap`, rewriting conflicting ordinals and dropping
//! orphans.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::types::{CitationMap, Evidence, Locator};

static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("citation regex is valid"));

/// Result of tracking one turn's citations.
pub struct TrackedAnswer {
    /// The answer text with every `[i]` marker rewritten to its resolved
    /// ordinal.
    pub text: String,
    /// The ordinals actually cited in `text`, in ascending order — this is
    /// what the Answer Formatter renders as the turn's sources list.
    pub cited_map: CitationMap,
    /// The cumulative map (frozen entries plus any newly appended this
    /// turn), for the session to persist/extend.
    pub updated_map: CitationMap,
}

pub struct CitationTracker;

impl CitationTracker {
    pub fn new() -> Self {
        Self
    }

    /// `evidences` must be the same evidence set the Prompt Composer handed
    /// the generator, so that `rank_final` lines up with the `[i]` markers
    /// the model was told to use.
    pub fn track(&self, answer: &str, evidences: &[Evidence], frozen: Option<&CitationMap>) -> TrackedAnswer {
        let mut working = frozen.cloned().unwrap_or_default();
        let mut cited_ordinals: HashSet<u32> = HashSet::new();

        // Collect replacements first (byte ranges are relative to `answer`),
        // then rebuild the string once, left to right.
        let mut replacements: Vec<(usize, usize, String)> = Vec::new();

        for m in CITATION_RE.captures_iter(answer) {
            let whole = m.get(0).unwrap();
            let marker_num: usize = m[1].parse().unwrap_or(0);

            let sentence = enclosing_sentence(answer, whole.start());
            let resolved = resolve_evidence(marker_num, sentence, evidences);

            let Some(evidence) = resolved else {
                // Orphan: no evidence could plausibly back this marker — drop it.
                replacements.push((whole.start(), whole.end(), String::new()));
                continue;
            };

            let loc = Locator {
                page: evidence.chunk.page,
                char_start: evidence.chunk.char_start,
                char_end: evidence.chunk.char_end,
            };
            let ordinal = working
                .find_ordinal_for(evidence.doc_id(), &loc)
                .unwrap_or_else(|| working.append(evidence.doc_id().to_string(), loc));

            cited_ordinals.insert(ordinal);
            replacements.push((whole.start(), whole.end(), format!("[{ordinal}]")));
        }

        let text = apply_replacements(answer, &replacements);

        let mut cited_entries: Vec<(u32, String, Locator)> =
            working.entries.iter().filter(|(n, ..)| cited_ordinals.contains(n)).cloned().collect();
        cited_entries.sort_by_key(|(n, ..)| *n);

        TrackedAnswer {
            text,
            cited_map: CitationMap { entries: cited_entries },
            updated_map: working,
        }
    }
}

impl Default for CitationTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// The sentence (delimited by `.`, `!`, `?`, or string boundaries) that
/// contains the byte offset `pos`.
fn enclosing_sentence(text: &str, pos: usize) -> &str {
    let start = text[..pos]
        .rfind(['.', '!', '?', '\n'])
        .map(|i| i + 1)
        .unwrap_or(0);
    let end = text[pos..]
        .find(['.', '!', '?', '\n'])
        .map(|i| pos + i + 1)
        .unwrap_or(text.len());
    &text[start..end]
}

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.union(b).count();
    inter as f32 / union as f32
}

/// Resolve a `[marker_num]` occurrence to the evidence it actually refers
/// to. Defaults to the evidence whose `rank_final == marker_num` (the
/// common case — the model used the label exactly as given in the prompt),
/// but overrides to a better content match when the enclosing sentence
/// overlaps another evidence's text substantially more.
fn resolve_evidence<'a>(marker_num: usize, sentence: &str, evidences: &'a [Evidence]) -> Option<&'a Evidence> {
    if evidences.is_empty() {
        return None;
    }
    let sentence_tokens = word_set(sentence);
    let default_ev = evidences.iter().find(|e| e.rank_final == marker_num);
    let default_score = default_ev.map(|e| jaccard(&sentence_tokens, &word_set(&e.chunk.text))).unwrap_or(0.0);

    let mut best: Option<(&Evidence, f32)> = None;
    for ev in evidences {
        let score = jaccard(&sentence_tokens, &word_set(&ev.chunk.text));
        if best.map(|(_, b)| score > b).unwrap_or(true) {
            best = Some((ev, score));
        }
    }

    match (default_ev, best) {
        (Some(default), Some((candidate, score))) if score > default_score + 0.15 => Some(candidate),
        (Some(default), _) => Some(default),
        (None, Some((candidate, score))) if score > 0.0 => Some(candidate),
        _ => None,
    }
}

fn apply_replacements(text: &str, replacements: &[(usize, usize, String)]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (start, end, rep) in replacements {
        out.push_str(&text[cursor..*start]);
        out.push_str(rep);
        cursor = *end;
    }
    out.push_str(&text[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkKind};

    fn ev(rank: usize, doc: &str, text: &str) -> Evidence {
        Evidence {
            chunk: Chunk {
                chunk_id: format!("c{rank}"),
                doc_id: doc.into(),
                page: rank as u32,
                char_start: 0,
                char_end: text.len(),
                kind: ChunkKind::Body,
                text: text.into(),
                backlink_id: None,
            },
            score_lexical: 0.0,
            score_vector: 0.0,
            score_rrf: 1.0,
            score_rerank: None,
            rank_final: rank,
        }
    }

    #[test]
    fn first_turn_assigns_ordinals_in_citation_order() {
        let tracker = CitationTracker::new();
        let evidences = vec![ev(1, "D1", "2024년 예산은 100억 원")];
        let out = tracker.track("예산은 100억 원이다 [1].", &evidences, None);
        assert_eq!(out.text, "예산은 100억 원이다 [1].");
        assert_eq!(out.cited_map.entries.len(), 1);
        assert_eq!(out.cited_map.entries[0].1, "D1");
    }

    #[test]
    fn reuses_frozen_ordinal_for_the_same_locator() {
        let tracker = CitationTracker::new();
        let mut frozen = CitationMap::new();
        frozen.append("D1".into(), Locator { page: 1, char_start: 0, char_end: 13 });

        let evidences = vec![ev(1, "D1", "2024년 예산은 100억 원")];
        let out = tracker.track("같은 예산입니다 [1].", &evidences, Some(&frozen));
        assert_eq!(out.text, "같은 예산입니다 [1].");
        assert!(out.updated_map.is_dense_and_injective());
    }

    #[test]
    fn appends_new_source_as_next_ordinal_when_topic_changes() {
        let tracker = CitationTracker::new();
        let mut frozen = CitationMap::new();
        frozen.append("D1".into(), Locator { page: 1, char_start: 0, char_end: 13 });

        let evidences = vec![ev(1, "D2", "감천문화마을은 부산에 있다")];
        let out = tracker.track("감천문화마을 위치 [1].", &evidences, Some(&frozen));
        // rank_final=1 still maps to a *new* locator (D2) distinct from the
        // frozen D1 entry, so it must get a fresh ordinal, not reuse [1].
        assert_eq!(out.text, "감천문화마을 위치 [2].");
        assert_eq!(out.updated_map.max_ordinal(), 2);
    }

    #[test]
    fn orphan_marker_with_no_evidence_is_dropped() {
        let tracker = CitationTracker::new();
        let out = tracker.track("근거 없는 문장 [1].", &[], None);
        assert_eq!(out.text, "근거 없는 문장 .");
        assert!(out.cited_map.entries.is_empty());
    }
}

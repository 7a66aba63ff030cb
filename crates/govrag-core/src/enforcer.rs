//! Evidence Enforcer.
//!
//! Checks a generated answer against its evidence set before it is allowed
//! to reach the client. Combines a whole-answer lexical Jaccard check, regex
//! rules for numbers/dates/legal-article patterns (precompiled
//! `LazyLock<Regex>` statics), and per-sentence grounding via citation +
//! span overlap (no concrete embedder ships in this crate — see
//! DESIGN.md — so the cosine-similarity leg of the per-sentence check is
//! approximated by token-overlap against the cited evidence's span; an
//! `Embedder` can be wired in later without changing this module's shape).

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::ThresholdConfig;
use crate::types::Evidence;

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d[\d,.]*").expect("number regex is valid"));
static ISO_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("iso date regex is valid"));
static LEGAL_ARTICLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"제\s?\d+\s?조(의\s?\d+)?").expect("legal article regex is valid"));
static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[(\d+)\]").expect("citation regex is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementOutcome {
    Accepted,
    Regenerate,
    InsufficientEvidence,
}

pub struct EnforcementReport {
    pub outcome: EnforcementOutcome,
    pub jaccard: f32,
    pub ungrounded_sentences: Vec<String>,
    pub unsupported_tokens: Vec<String>,
}

pub struct EvidenceEnforcer {
    thresholds: ThresholdConfig,
}

impl EvidenceEnforcer {
    pub fn new(thresholds: ThresholdConfig) -> Self {
        Self { thresholds }
    }

    /// `is_retry` must be `true` when this is the enforcer's second look at
    /// an answer in the same turn — the enforcer never asks for more than
    /// one retry.
    pub fn check(&self, answer: &str, evidences: &[Evidence], is_retry: bool) -> EnforcementReport {
        if evidences.is_empty() {
            return EnforcementReport {
                outcome: EnforcementOutcome::InsufficientEvidence,
                jaccard: 0.0,
                ungrounded_sentences: Vec::new(),
                unsupported_tokens: Vec::new(),
            };
        }

        let evidence_text: String = evidences.iter().map(|e| e.chunk.text.as_str()).collect::<Vec<_>>().join(" ");
        let jaccard = token_jaccard(answer, &evidence_text);

        let unsupported_tokens = unsupported_factual_tokens(answer, &evidence_text);
        let ungrounded_sentences = ungrounded_sentences(answer, evidences, &self.thresholds);

        let passes = jaccard >= self.thresholds.evidence_jaccard
            && unsupported_tokens.is_empty()
            && ungrounded_sentences.is_empty();

        let outcome = if passes {
            EnforcementOutcome::Accepted
        } else if is_retry {
            EnforcementOutcome::InsufficientEvidence
        } else {
            EnforcementOutcome::Regenerate
        };

        EnforcementReport {
            outcome,
            jaccard,
            ungrounded_sentences,
            unsupported_tokens,
        }
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

fn token_jaccard(answer: &str, evidence_text: &str) -> f32 {
    let a = tokenize(answer);
    let b = tokenize(evidence_text);
    if a.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(&b).count();
    let union = a.union(&b).count();
    if union == 0 {
        0.0
    } else {
        inter as f32 / union as f32
    }
}

/// Numbers, ISO dates, and legal-article references appearing in the answer
/// must each appear verbatim in at least one evidence.
fn unsupported_factual_tokens(answer: &str, evidence_text: &str) -> Vec<String> {
    let mut unsupported = Vec::new();
    for re in [&*NUMBER_RE, &*ISO_DATE_RE, &*LEGAL_ARTICLE_RE] {
        for m in re.find_iter(answer) {
            let token = m.as_str();
            if !evidence_text.contains(token) {
                unsupported.push(token.to_string());
            }
        }
    }
    unsupported
}

/// For each answer sentence, it is grounded if it carries a `[i]` citation
/// whose resolved evidence shares enough lexical overlap with it (a proxy
/// for span IoU — see module docs), OR it is a structural line (a "Sources:"
/// line, a bare heading) that carries no factual claim.
fn ungrounded_sentences(answer: &str, evidences: &[Evidence], thresholds: &ThresholdConfig) -> Vec<String> {
    let mut ungrounded = Vec::new();
    for sentence in answer.split(['.', '!', '?', '\n']) {
        let sentence = sentence.trim();
        if sentence.is_empty() || sentence.len() < 6 {
            continue;
        }
        if sentence.starts_with("Sources:") || sentence.starts_with('#') {
            continue;
        }

        let citations: Vec<usize> = CITATION_RE
            .captures_iter(sentence)
            .filter_map(|c| c[1].parse::<usize>().ok())
            .collect();

        if citations.is_empty() {
            ungrounded.push(sentence.to_string());
            continue;
        }

        let sentence_tokens = tokenize(sentence);
        let grounded = citations.iter().any(|n| {
            evidences
                .iter()
                .find(|e| e.rank_final == *n)
                .map(|e| token_jaccard_sets(&sentence_tokens, &tokenize(&e.chunk.text)) >= thresholds.citation_span_iou)
                .unwrap_or(false)
        });

        if !grounded {
            ungrounded.push(sentence.to_string());
        }
    }
    ungrounded
}

fn token_jaccard_sets(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.union(b).count();
    inter as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkKind};

    fn thresholds() -> ThresholdConfig {
        ThresholdConfig {
            evidence_jaccard: 0.55,
            citation_sent_sim: 0.90,
            citation_span_iou: 0.20,
            confidence_min: 0.2,
        }
    }

    fn ev(rank: usize, text: &str) -> Evidence {
        Evidence {
            chunk: Chunk {
                chunk_id: format!("c{rank}"),
                doc_id: "D1".into(),
                page: 1,
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
    fn no_evidence_is_insufficient_evidence_immediately() {
        let enforcer = EvidenceEnforcer::new(thresholds());
        let report = enforcer.check("아무 답변", &[], false);
        assert_eq!(report.outcome, EnforcementOutcome::InsufficientEvidence);
    }

    #[test]
    fn well_grounded_answer_is_accepted() {
        let enforcer = EvidenceEnforcer::new(thresholds());
        let evidences = vec![ev(1, "2024년 예산은 100억 원이다")];
        let answer = "2024년 예산은 100억 원이다 [1].";
        let report = enforcer.check(answer, &evidences, false);
        assert_eq!(report.outcome, EnforcementOutcome::Accepted);
    }

    #[test]
    fn unsupported_number_triggers_regenerate_once_then_insufficient() {
        let enforcer = EvidenceEnforcer::new(thresholds());
        let evidences = vec![ev(1, "예산은 비공개 문서에 있다")];
        let answer = "예산은 9999억 원이다 [1].";
        let first = enforcer.check(answer, &evidences, false);
        assert_eq!(first.outcome, EnforcementOutcome::Regenerate);
        let second = enforcer.check(answer, &evidences, true);
        assert_eq!(second.outcome, EnforcementOutcome::InsufficientEvidence);
    }

    #[test]
    fn uncited_sentence_is_flagged_ungrounded() {
        let enforcer = EvidenceEnforcer::new(thresholds());
        let evidences = vec![ev(1, "예산은 100억 원이다 관련 내용")];
        let answer = "예산은 전혀 다른 이야기이다 없는 내용을 지어냄";
        let report = enforcer.check(answer, &evidences, false);
        assert!(!report.ungrounded_sentences.is_empty());
    }
}

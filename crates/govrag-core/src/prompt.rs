//! Prompt Composer.
//!
//! Assembles the evidence-only system/user prompt with the fixed output
//! schema. Structurally grounded on `chat::RAG_SYSTEM_PROMPT` (evidence-only,
//! anti-hallucination, citation-format policy) and `chat::estimate_tokens`
//! (chars/4 heuristic), reauthored for this domain's citation block syntax.

use crate::summarizer::{compress_history, format_compressed_history};
use crate::types::{Evidence, Session};

pub const GOVRAG_SYSTEM_PROMPT: &str = r#"You are a research assistant answering questions strictly from the evidence blocks provided below. You have no other knowledge of the documents.

Rules:
- Only state facts that are present in the evidences below.
- Quote numbers, dates, and legal/article citations verbatim from the evidence text.
- If the evidences do not contain the answer, say so plainly — never invent a document name, page, or fact.
- Every factual claim in your core answer and key facts must carry one or more bracketed citation markers like [1] or [1][2], each referring to an evidence block index.

You MUST answer using exactly this structure:
1. A one-to-two-sentence core answer.
2. 3 to 5 bullet points of key facts, each with at least one [i] citation.
3. An optional short elaboration paragraph (omit if nothing more to add).
4. A "Sources:" section listing one line per cited evidence: "[i] -> (doc_id, page, char_start, char_end)".
"#;

const HISTORY_HEADER: &str = "\nConversation History (for topic continuity ONLY — NOT a source of facts):";

pub struct ComposedPrompt {
    pub system: String,
    pub user: String,
}

pub struct PromptComposer {
    /// Rough token budget for the assembled prompt (chars/4 heuristic).
    pub max_prompt_tokens: usize,
}

impl PromptComposer {
    pub fn new(max_prompt_tokens: usize) -> Self {
        Self { max_prompt_tokens }
    }

    /// `session` is consulted only for `conversation_summary` / recent
    /// entities — never as a source of evidence.
    pub fn compose(&self, query: &str, evidences: &[Evidence], session: Option<&Session>) -> ComposedPrompt {
        let mut kept = evidences.to_vec();
        kept.sort_by_key(|e| e.rank_final);

        // Trim lowest-rank_final evidences first if the assembled prompt
        // would exceed the token budget.
        loop {
            let user = self.render_user_block(query, &kept, session);
            let tokens = estimate_tokens(&user) + estimate_tokens(GOVRAG_SYSTEM_PROMPT);
            if tokens <= self.max_prompt_tokens || kept.len() <= 1 {
                return ComposedPrompt {
                    system: GOVRAG_SYSTEM_PROMPT.to_string(),
                    user,
                };
            }
            kept.pop();
        }
    }

    fn render_user_block(&self, query: &str, evidences: &[Evidence], session: Option<&Session>) -> String {
        let mut out = String::new();
        out.push_str("Question: ");
        out.push_str(query);
        out.push_str("\n\nEvidences:\n");

        for ev in evidences {
            out.push_str(&format!(
                "[{}] doc_id={}, page={}, span=[{}..{}]\n{}\n\n",
                ev.rank_final, ev.chunk.doc_id, ev.chunk.page, ev.chunk.char_start, ev.chunk.char_end, ev.chunk.text
            ));
        }

        if let Some(session) = session {
            if session.conversation_summary.is_some() || !session.recent_entities.is_empty() {
                let messages: Vec<(String, String)> = session
                    .turns
                    .iter()
                    .map(|t| (format!("{:?}", t.role), t.content.clone()))
                    .collect();
                let compressed = compress_history(&messages, 4);
                let rendered = format_compressed_history(&compressed);
                if !rendered.trim().is_empty() {
                    out.push_str(&rendered);
                } else if let Some(summary) = &session.conversation_summary {
                    out.push_str(HISTORY_HEADER);
                    out.push_str("\nSummary: ");
                    out.push_str(&summary.text);
                    out.push('\n');
                }
                if !session.recent_entities.is_empty() {
                    out.push_str(&format!("Entities mentioned so far: {}\n", session.recent_entities.join(", ")));
                }
            }
        }

        out
    }
}

/// chars/4 heuristic, matching `chat::estimate_tokens`.
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, ChunkKind};

    fn ev(rank: usize, text: &str) -> Evidence {
        Evidence {
            chunk: Chunk {
                chunk_id: format!("c{rank}"),
                doc_id: "D1".into(),
                page: 2,
                char_start: 0,
                char_end: text.len(),
                kind: ChunkKind::Body,
                text: text.into(),
                backlink_id: None,
            },
            score_lexical: 0.0,
            score_vector: 0.0,
            score_rrf: 1.0 / rank as f32,
            score_rerank: None,
            rank_final: rank,
        }
    }

    #[test]
    fn user_block_includes_citation_headers() {
        let composer = PromptComposer::new(100_000);
        let composed = composer.compose("2024년 예산은 얼마야?", &[ev(1, "2024년 예산은 100억 원")], None);
        assert!(composed.user.contains("[1] doc_id=D1, page=2, span=[0..13]"));
        assert!(composed.system.contains("Sources:"));
    }

    #[test]
    fn trims_lowest_rank_evidences_over_budget() {
        let composer = PromptComposer::new(40);
        let evidences = vec![ev(1, "short"), ev(2, "a very very very long piece of evidence text")];
        let composed = composer.compose("q", &evidences, None);
        assert!(!composed.user.contains("[2]"));
    }

    #[test]
    fn never_cites_conversation_history_as_evidence() {
        let mut session = Session::new(None);
        session.conversation_summary = Some(crate::types::ConversationSummary {
            text: "Previous questions: budget".into(),
            confidence: 0.8,
        });
        let composer = PromptComposer::new(100_000);
        let composed = composer.compose("q", &[ev(1, "text")], Some(&session));
        assert!(composed.user.contains("NOT a source of facts"));
    }
}

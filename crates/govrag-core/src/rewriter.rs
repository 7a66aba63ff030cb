//! Query Rewriter.
//!
//! Rule-based pronoun/demonstrative resolution runs first
//! (`rewrite_rule_based`), then an LLM pass via a generic async closure
//! (`rewrite_with_context`) with a strict, short-output prompt. A
//! destructive-rewrite length-ratio guard discards any rewrite that drops
//! more than `MIN_LENGTH_RATIO` of the original query's token count, in
//! favour of the rule-based (or original) query.

use anyhow::Result;

use crate::types::{RewriteInfo, Session, TurnRole};

/// Below this fraction of the original query's token count, an LLM rewrite
/// is considered destructive and discarded.
const MIN_LENGTH_RATIO: f32 = 0.4;

pub struct RewriteOutcome {
    pub rewritten_query: String,
    pub info: RewriteInfo,
}

pub struct QueryRewriter;

impl QueryRewriter {
    pub fn new() -> Self {
        Self
    }

    /// Pronoun/demonstrative resolution against the most recently mentioned
    /// entities — runs with no LLM call, always available as a fallback.
    pub fn rewrite_rule_based(&self, query: &str, session: Option<&Session>) -> String {
        let Some(session) = session else {
            return query.to_string();
        };
        if session.recent_entities.is_empty() {
            return query.to_string();
        }

        let anchor = &session.recent_entities[session.recent_entities.len() - 1];
        let demonstratives = ["그", "그것", "그거", "이것", "이거", "저것"];
        let mut rewritten = query.to_string();
        for d in demonstratives {
            if rewritten.contains(d) {
                rewritten = rewritten.replacen(d, anchor, 1);
                break;
            }
        }
        rewritten
    }

    /// `llm_generate` is a generic closure
    /// (`FnOnce(String, usize) -> Future<Output = Result<String>>`) so this
    /// module stays decoupled from any concrete `LLMProvider`.
    pub async fn rewrite<F, Fut>(&self, query: &str, session: Option<&Session>, llm_generate: F) -> RewriteOutcome
    where
        F: FnOnce(String, usize) -> Fut,
        Fut: std::future::Future<Output = Result<String>>,
    {
        let rule_based = self.rewrite_rule_based(query, session);

        let has_context = session
            .map(|s| s.conversation_summary.is_some() || !s.recent_entities.is_empty() || !s.turns.is_empty())
            .unwrap_or(false);

        if !has_context {
            return RewriteOutcome {
                rewritten_query: query.to_string(),
                info: RewriteInfo {
                    original_query: query.to_string(),
                    rewritten_query: query.to_string(),
                    used_context: false,
                    used_fallback: false,
                },
            };
        }

        let prompt = build_rewrite_prompt(query, session);

        let candidate = match llm_generate(prompt, 150).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "query rewrite LLM call failed, falling back");
                return RewriteOutcome {
                    rewritten_query: rule_based.clone(),
                    info: RewriteInfo {
                        original_query: query.to_string(),
                        rewritten_query: rule_based,
                        used_context: false,
                        used_fallback: true,
                    },
                };
            }
        };

        if candidate.is_empty() || destructive_rewrite(query, &candidate) {
            return RewriteOutcome {
                rewritten_query: rule_based.clone(),
                info: RewriteInfo {
                    original_query: query.to_string(),
                    rewritten_query: rule_based,
                    used_context: false,
                    used_fallback: true,
                },
            };
        }

        RewriteOutcome {
            rewritten_query: candidate.clone(),
            info: RewriteInfo {
                original_query: query.to_string(),
                rewritten_query: candidate,
                used_context: true,
                used_fallback: false,
            },
        }
    }
}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self::new()
    }
}

fn destructive_rewrite(original: &str, rewritten: &str) -> bool {
    let orig_len = original.split_whitespace().count().max(1);
    let new_len = rewritten.split_whitespace().count();
    (new_len as f32 / orig_len as f32) < MIN_LENGTH_RATIO
}

fn build_rewrite_prompt(query: &str, session: Option<&Session>) -> String {
    let mut context_parts = Vec::new();
    if let Some(session) = session {
        if let Some(summary) = &session.conversation_summary {
            context_parts.push(format!("Summary: {}", summary.text));
        }
        if !session.recent_entities.is_empty() {
            context_parts.push(format!("Entities: {}", session.recent_entities.join(", ")));
        }
        let recent: Vec<String> = session
            .turns
            .iter()
            .rev()
            .take(4)
            .rev()
            .filter(|t| t.role != TurnRole::SystemNotice)
            .map(|t| format!("{:?}: {}", t.role, t.content))
            .collect();
        if !recent.is_empty() {
            context_parts.push(format!("Recent turns:\n{}", recent.join("\n")));
        }
    }
    let context_str = context_parts.join("\n");

    format!(
        r#"You are a query rewriting assistant. Given a user's query and conversation context, rewrite the query to be a standalone, specific, searchable question.

Conversation Context:
{context_str}

User's Query: "{query}"

Rewrite the query to:
1. Replace pronouns and demonstratives with the specific entity they refer to.
2. Keep it concise (max one sentence).
3. Do not invent facts not present in the context.

Rewritten Query:"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_session_returns_original_query() {
        let rewriter = QueryRewriter::new();
        assert_eq!(rewriter.rewrite_rule_based("그 예산은?", None), "그 예산은?");
    }

    #[test]
    fn demonstrative_is_replaced_with_recent_entity() {
        let rewriter = QueryRewriter::new();
        let mut session = Session::new(None);
        session.recent_entities = vec!["2024년 예산".to_string()];
        assert_eq!(rewriter.rewrite_rule_based("그 담당 부서는?", Some(&session)), "2024년 예산 담당 부서는?");
    }

    #[tokio::test]
    async fn no_context_skips_llm_call_entirely() {
        let rewriter = QueryRewriter::new();
        let outcome = rewriter
            .rewrite("예산이 얼마야?", None, |_, _| async { unreachable!("should not call LLM") })
            .await;
        assert!(!outcome.info.used_context);
        assert_eq!(outcome.rewritten_query, "예산이 얼마야?");
    }

    #[tokio::test]
    async fn destructive_rewrite_falls_back_to_rule_based() {
        let rewriter = QueryRewriter::new();
        let mut session = Session::new(None);
        session.recent_entities = vec!["2024년 예산".to_string()];
        let outcome = rewriter
            .rewrite("그 담당 부서는 어디인가요?", Some(&session), |_, _| async { Ok("예".to_string()) })
            .await;
        assert!(outcome.info.used_fallback);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_rule_based() {
        let rewriter = QueryRewriter::new();
        let mut session = Session::new(None);
        session.recent_entities = vec!["2024년 예산".to_string()];
        let outcome = rewriter
            .rewrite("그 담당 부서는?", Some(&session), |_, _| async { Err(anyhow::anyhow!("timeout")) })
            .await;
        assert!(outcome.info.used_fallback);
        assert_eq!(outcome.rewritten_query, "2024년 예산 담당 부서는?");
    }
}

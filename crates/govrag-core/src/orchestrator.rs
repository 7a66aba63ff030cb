//! Chat Orchestrator.
//!
//! The per-request state machine wiring Query Rewriter -> Doc-Scope Resolver
//! -> Hybrid Retriever -> Reranker -> Evidence Set Builder -> Prompt
//! Composer -> Generator Adapter -> Evidence Enforcer -> Citation Tracker ->
//! Answer Formatter -> Session Store. Owns cancellation, per-state timeouts,
//! per-session turn serialisation, and streaming.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::citation::CitationTracker;
use crate::config::GovRagConfig;
use crate::docscope::{DocScopeResolver, ScopeProbe};
use crate::enforcer::{EnforcementOutcome, EvidenceEnforcer};
use crate::evidence::EvidenceSetBuilder;
use crate::error::GovRagError;
use crate::formatter::{AnswerFormatter, SourceLocator};
use crate::generator::{GenDelta, GeneratorAdapter};
use crate::index::{Embedder, LexicalIndex, VectorIndex};
use crate::llm::LLMProvider;
use crate::prompt::PromptComposer;
use crate::rewriter::QueryRewriter;
use crate::search::HybridRetriever;
use crate::session::SessionStore;
use crate::reranking::Reranker;
use crate::topic::{TopicDetector, TopicSignals};
use crate::types::{
    CitationMap, DegradedFlags, DocScopeInfo, Evidence, GroundingVerdict, LatencyBreakdown,
    RewriteInfo, Session, Turn, TurnMetadata, TurnRole,
};

/// Canonical "evidence not found" answer.
const INSUFFICIENT_EVIDENCE_ANSWER: &str = "제공된 문서에서 해당 정보를 찾을 수 없습니다.";

/// How many recent-entity anchors a session keeps for the Query Rewriter's
/// demonstrative substitution.
const RECENT_ENTITIES_CAP: usize = 10;

/// Per-request state. `Debug` is required by
/// `GovRagError::Timeout { state }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    Rewriting,
    ResolvingScope,
    Retrieving,
    Reranking,
    Composing,
    Generating,
    Enforcing,
    Regenerating,
    Citing,
    Formatting,
    Persisting,
    Done,
    Cancelled,
    Failed,
    InsufficientEvidence,
}

pub struct ChatTurnRequest {
    pub session_id: Uuid,
    pub query: String,
    pub doc_ids: Vec<String>,
    pub reset_context: bool,
}

pub struct ChatTurnResponse {
    pub answer: String,
    pub sources: Vec<SourceLocator>,
    pub metadata: TurnMetadata,
}

/// One NDJSON-serialisable event of the streaming surface.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Status(String),
    Content(String),
    Complete { answer: String, sources: Vec<SourceLocator>, metadata: TurnMetadata },
    Error { error: String, message: String },
}

/// Everything the orchestrator needs to drive one turn end to end. All
/// fields are shared, read-only collaborators; the only private mutable
/// state is the turn-serialisation and interrupt bookkeeping below.
pub struct ChatOrchestrator {
    lexical: Arc<dyn LexicalIndex>,
    vector: Arc<dyn VectorIndex>,
    embedder: Option<Arc<dyn Embedder>>,
    retriever: HybridRetriever,
    reranker: Reranker,
    evidence_builder: EvidenceSetBuilder,
    prompt_composer: PromptComposer,
    generator: GeneratorAdapter,
    rewrite_llm: Arc<dyn LLMProvider>,
    enforcer: EvidenceEnforcer,
    citation_tracker: CitationTracker,
    formatter: AnswerFormatter,
    rewriter: QueryRewriter,
    topic_detector: TopicDetector,
    docscope_resolver: DocScopeResolver,
    session_store: Arc<SessionStore>,
    config: GovRagConfig,

    /// One in-flight turn per session: a busy session rejects new
    /// turns rather than interleaving them.
    turn_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    /// Cancellation token for whatever turn is currently in flight for a
    /// session, looked up by the interrupt endpoint.
    active_cancels: DashMap<Uuid, CancellationToken>,
    /// Bounds concurrent LLM calls across all sessions.
    llm_semaphore: Arc<Semaphore>,
    request_timeout: Duration,
}

impl ChatOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lexical: Arc<dyn LexicalIndex>,
        vector: Arc<dyn VectorIndex>,
        embedder: Option<Arc<dyn Embedder>>,
        reranker_engine: Option<Arc<crate::reranking::CrossEncoderReranker>>,
        generator_llm: Arc<dyn LLMProvider>,
        session_store: Arc<SessionStore>,
        config: GovRagConfig,
    ) -> Self {
        let retriever = HybridRetriever::new(lexical.clone(), vector.clone(), config.retrieval.clone());
        let reranker = match &reranker_engine {
            Some(_) if config.reranker.enabled => Reranker::new(reranker_engine),
            _ => Reranker::disabled(),
        };
        let generator = GeneratorAdapter::new(generator_llm.clone(), config.llm.max_tokens);

        Self {
            lexical,
            vector,
            embedder,
            retriever,
            reranker,
            evidence_builder: EvidenceSetBuilder::new(config.retrieval.max_per_doc, config.retrieval.evidence_set_size),
            prompt_composer: PromptComposer::new(estimate_prompt_budget(&config)),
            generator,
            rewrite_llm: generator_llm,
            enforcer: EvidenceEnforcer::new(config.thresholds.clone()),
            citation_tracker: CitationTracker::new(),
            formatter: AnswerFormatter::new(),
            rewriter: QueryRewriter::new(),
            topic_detector: TopicDetector::new(config.topic.clone()),
            docscope_resolver: DocScopeResolver::new(config.retrieval.floor_ratio),
            session_store,
            request_timeout: Duration::from_secs(config.server.request_timeout_s),
            llm_semaphore: Arc::new(Semaphore::new(config.server.max_queue.max(1))),
            turn_locks: DashMap::new(),
            active_cancels: DashMap::new(),
            config,
        }
    }

    /// Explicit interrupt: cancels whatever turn
    /// is currently in flight for the session, if any. Idempotent.
    pub fn interrupt(&self, session_id: Uuid) {
        if let Some(token) = self.active_cancels.get(&session_id) {
            token.cancel();
        }
    }

    fn lock_for(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        self.turn_locks.entry(session_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Whole-response mode.
    pub async fn handle_turn(
        &self,
        req: ChatTurnRequest,
        cancel: CancellationToken,
    ) -> Result<ChatTurnResponse, GovRagError> {
        let lock = self.lock_for(req.session_id);
        let _guard = lock.try_lock().map_err(|_| GovRagError::SessionBusy { session_id: req.session_id.to_string() })?;

        self.active_cancels.insert(req.session_id, cancel.clone());
        let session_id = req.session_id;
        let original_query = req.query.clone();
        let result = self.run_timed(req, cancel.clone(), None).await;
        if let Err(GovRagError::Cancelled) = &result {
            self.persist_interrupted_notice(session_id, &original_query).await;
        }
        self.active_cancels.remove(&req.session_id);
        result
    }

    /// Streaming mode. Returns a channel
    /// the caller drains and serialises as newline-delimited JSON. Requires
    /// `self` behind an `Arc` (as the HTTP layer always holds it) so the
    /// spawned task can keep the orchestrator, its session-lock registry,
    /// and its interrupt registry alive for the stream's lifetime.
    pub async fn handle_turn_streaming(
        self: Arc<Self>,
        req: ChatTurnRequest,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>, GovRagError> {
        let lock = self.lock_for(req.session_id);
        let _guard = lock.try_lock().map_err(|_| GovRagError::SessionBusy { session_id: req.session_id.to_string() })?;
        // Held only long enough to prove no other turn is in flight; the
        // spawned task below re-acquires it for the duration of the stream.
        drop(_guard);

        let (tx, rx) = mpsc::channel(64);
        self.active_cancels.insert(req.session_id, cancel.clone());

        let session_id = req.session_id;
        let original_query = req.query.clone();
        tokio::spawn(async move {
            let lock = self.lock_for(session_id);
            let _guard = lock.lock().await;
            let result = self.run_timed(req, cancel, Some(tx.clone())).await;
            match result {
                Ok(resp) => {
                    let _ = tx.send(StreamEvent::Complete { answer: resp.answer, sources: resp.sources, metadata: resp.metadata }).await;
                }
                Err(GovRagError::Cancelled) => {
                    self.persist_interrupted_notice(session_id, &original_query).await;
                    let _ = tx.send(StreamEvent::Status("interrupted".into())).await;
                }
                Err(e) => {
                    let _ = tx.send(StreamEvent::Error { error: e.code().to_string(), message: e.user_message() }).await;
                }
            }
            self.active_cancels.remove(&session_id);
        });

        Ok(rx)
    }

    /// Records that a turn was interrupted: appends a single `system_notice`
    /// turn to the transcript. Never touches the session's frozen
    /// first-answer citation map — cancellation always short-circuits
    /// before the Persisting state that would freeze it.
    async fn persist_interrupted_notice(&self, session_id: Uuid, original_query: &str) {
        let notice = Turn {
            turn_id: Uuid::new_v4(),
            role: TurnRole::SystemNotice,
            content: format!("interrupted: {original_query}"),
            timestamp: chrono::Utc::now(),
            evidences: None,
            citation_map: None,
            metadata: TurnMetadata::default(),
        };
        if let Err(e) = self.session_store.append_turn(session_id, notice).await {
            tracing::warn!(session_id = %session_id, error = %e, "failed to persist interrupted system notice");
        }
    }

    async fn run_timed(
        &self,
        req: ChatTurnRequest,
        cancel: CancellationToken,
        stream: Option<mpsc::Sender<StreamEvent>>,
    ) -> Result<ChatTurnResponse, GovRagError> {
        let state = Arc::new(parking_lot::Mutex::new(OrchestratorState::Idle));
        let deadline = tokio::time::sleep(self.request_timeout);
        tokio::pin!(deadline);

        tokio::select! {
            biased;
            _ = &mut deadline => {
                cancel.cancel();
                Err(GovRagError::Timeout { state: *state.lock() })
            }
            result = self.run_turn(req, cancel.clone(), stream, state.clone()) => result,
        }
    }

    async fn run_turn(
        &self,
        req: ChatTurnRequest,
        cancel: CancellationToken,
        stream: Option<mpsc::Sender<StreamEvent>>,
        state: Arc<parking_lot::Mutex<OrchestratorState>>,
    ) -> Result<ChatTurnResponse, GovRagError> {
        let mut latency = LatencyBreakdown::default();
        let mut degraded = DegradedFlags::default();

        if req.query.trim().is_empty() {
            return Err(GovRagError::InvalidInput { reason: "query must not be empty".into() });
        }

        let session = self
            .session_store
            .fetch(req.session_id)
            .await
            .ok_or_else(|| GovRagError::SessionNotFound { session_id: req.session_id.to_string() })?;
        let session_ref = if req.reset_context { None } else { Some(&session) };

        if cancel.is_cancelled() {
            return Err(GovRagError::Cancelled);
        }

        // --- Rewriting -------------------------------------------------
        *state.lock() = OrchestratorState::Rewriting;
        let t0 = Instant::now();
        let rewrite_outcome = {
            let rewrite_llm = self.rewrite_llm.clone();
            let permit = self.llm_semaphore.clone().acquire_owned().await.map_err(|_| GovRagError::Overloaded)?;
            let outcome = self
                .rewriter
                .rewrite(&req.query, session_ref, |prompt, max_tokens| async move {
                    let config = crate::llm::GenerationConfig {
                        max_tokens,
                        temperature: 0.0,
                        top_p: 1.0,
                        top_k: 1,
                        repetition_penalty: 1.0,
                        stop_sequences: Vec::new(),
                        seed: Some(0),
                    };
                    rewrite_llm.generate(&prompt, &config).await
                })
                .await;
            drop(permit);
            outcome
        };
        latency.rewriting_ms = t0.elapsed().as_millis() as u64;
        let rewritten_query = rewrite_outcome.rewritten_query.clone();

        if let Some(tx) = &stream {
            let _ = tx.send(StreamEvent::Status("retrieving".into())).await;
        }

        // --- Resolving-Scope --------------------------------------------
        *state.lock() = OrchestratorState::ResolvingScope;
        let t0 = Instant::now();
        let (topic_verdict, scope_probe) = self.probe_topic(session_ref, &rewritten_query, &cancel).await?;
        let doc_scope = self.docscope_resolver.resolve(session_ref, &req.doc_ids, topic_verdict, scope_probe);
        latency.resolving_scope_ms = t0.elapsed().as_millis() as u64;

        if cancel.is_cancelled() {
            return Err(GovRagError::Cancelled);
        }

        // --- Retrieving ---------------------------------------------------
        *state.lock() = OrchestratorState::Retrieving;
        let t0 = Instant::now();
        let query_embedding = match &self.embedder {
            Some(embedder) => Some(embedder.embed_query(&rewritten_query).await?),
            None => None,
        };
        let allowed = (!doc_scope.allowed_doc_ids.is_empty()).then_some(doc_scope.allowed_doc_ids.as_slice());
        let retrieval = self.retriever.retrieve(&rewritten_query, query_embedding.as_deref(), allowed).await?;
        degraded.lexical_only = retrieval.degraded_lexical_only;
        degraded.vector_only = retrieval.degraded_vector_only;
        latency.retrieving_ms = t0.elapsed().as_millis() as u64;

        if cancel.is_cancelled() {
            return Err(GovRagError::Cancelled);
        }

        // --- Reranking ------------------------------------------------
        *state.lock() = OrchestratorState::Reranking;
        let t0 = Instant::now();
        let mut shortlist = retrieval.evidences;
        shortlist.truncate(self.config.retrieval.topk_rerank);
        let rerank_outcome = self.reranker.rerank(&rewritten_query, shortlist);
        degraded.rerank_skipped = rerank_outcome.rerank_skipped;
        latency.reranking_ms = t0.elapsed().as_millis() as u64;

        // --- Composing (Evidence Set Builder + Prompt Composer) -------
        *state.lock() = OrchestratorState::Composing;
        let t0 = Instant::now();
        let evidence_set = self.evidence_builder.build(&rewritten_query, rerank_outcome.evidences);
        let composed = self.prompt_composer.compose(&rewritten_query, &evidence_set.evidences, session_ref);
        latency.composing_ms = t0.elapsed().as_millis() as u64;

        if cancel.is_cancelled() {
            return Err(GovRagError::Cancelled);
        }

        // --- Generating -------------------------------------------------
        *state.lock() = OrchestratorState::Generating;
        let t0 = Instant::now();
        if let Some(tx) = &stream {
            let _ = tx.send(StreamEvent::Status("generating".into())).await;
        }
        let full_prompt = format!("{}\n\n{}", composed.system, composed.user);
        let mut raw_answer = self.generate(&full_prompt, &cancel, stream.as_ref()).await?;
        latency.generating_ms = t0.elapsed().as_millis() as u64;

        // --- Enforcing (+ at most one Regenerating pass) ----------------
        *state.lock() = OrchestratorState::Enforcing;
        let t0 = Instant::now();
        let mut report = self.enforcer.check(&raw_answer, &evidence_set.evidences, false);
        if report.outcome == EnforcementOutcome::Regenerate {
            *state.lock() = OrchestratorState::Regenerating;
            if let Some(tx) = &stream {
                let _ = tx.send(StreamEvent::Status("regenerating".into())).await;
            }
            let strengthened = format!(
                "{}\n\nYour previous answer was not sufficiently grounded in the evidences above. \
                 Answer again, quoting only facts and citation markers that are directly present in the evidences.",
                full_prompt
            );
            raw_answer = self.generate(&strengthened, &cancel, stream.as_ref()).await?;
            report = self.enforcer.check(&raw_answer, &evidence_set.evidences, true);
        }
        latency.enforcing_ms = t0.elapsed().as_millis() as u64;

        let grounding_verdict = match report.outcome {
            EnforcementOutcome::Accepted => GroundingVerdict::Accepted,
            EnforcementOutcome::Regenerate => GroundingVerdict::Regenerated,
            EnforcementOutcome::InsufficientEvidence => GroundingVerdict::InsufficientEvidence,
        };
        let (final_answer, final_evidences): (String, &[Evidence]) = if grounding_verdict == GroundingVerdict::InsufficientEvidence {
            (INSUFFICIENT_EVIDENCE_ANSWER.to_string(), &[])
        } else {
            (raw_answer, &evidence_set.evidences)
        };

        // --- Citing -------------------------------------------------------
        *state.lock() = OrchestratorState::Citing;
        let t0 = Instant::now();
        let frozen = session.first_response_citation_map.clone();
        let tracked = self.citation_tracker.track(&final_answer, final_evidences, frozen.as_ref());
        latency.citing_ms = t0.elapsed().as_millis() as u64;

        // --- Formatting -----------------------------------------------
        *state.lock() = OrchestratorState::Formatting;
        let t0 = Instant::now();
        let formatted = self.formatter.format(&tracked.text, &tracked.cited_map);
        latency.formatting_ms = t0.elapsed().as_millis() as u64;

        // --- Persisting -------------------------------------------------
        *state.lock() = OrchestratorState::Persisting;
        let t0 = Instant::now();
        let persisted = self
            .persist_turn(
                &req,
                &session,
                &rewrite_outcome.info,
                &doc_scope,
                grounding_verdict,
                latency.clone(),
                degraded.clone(),
                final_evidences,
                &tracked.cited_map,
                &tracked.updated_map,
                &formatted.text,
                &rewritten_query,
            )
            .await;
        latency.persisting_ms = t0.elapsed().as_millis() as u64;

        *state.lock() = if grounding_verdict == GroundingVerdict::InsufficientEvidence {
            OrchestratorState::InsufficientEvidence
        } else {
            OrchestratorState::Done
        };

        let metadata = TurnMetadata {
            rewrite: Some(rewrite_outcome.info),
            doc_scope: Some(DocScopeInfo {
                mode: doc_scope.mode.unwrap_or(crate::types::DocScopeMode::FullCorpus),
                allowed_doc_ids: doc_scope.allowed_doc_ids.clone(),
                topic_change_detected: doc_scope.topic_change_detected,
            }),
            grounding: Some(grounding_verdict),
            latency_ms: latency,
            degraded,
            persisted,
        };

        Ok(ChatTurnResponse { answer: formatted.text, sources: formatted.sources, metadata })
    }

    async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
        stream: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<String, GovRagError> {
        let _permit = self.llm_semaphore.acquire().await.map_err(|_| GovRagError::Overloaded)?;
        match stream {
            None => self.generator.generate_whole(prompt, cancel).await,
            Some(tx) => {
                use futures::StreamExt;
                let mut deltas = self.generator.generate_stream(prompt, cancel.clone()).await?;
                let mut full = String::new();
                while let Some(delta) = deltas.next().await {
                    match delta {
                        GenDelta::Content(text) => {
                            full.push_str(&text);
                            let _ = tx.send(StreamEvent::Content(text)).await;
                        }
                        GenDelta::Interrupted => return Err(GovRagError::Cancelled),
                    }
                }
                Ok(full)
            }
        }
    }

    /// Quick probe retrieval against the session's previous scope, used by
    /// the Topic Detector when the turn is a follow-up. Absent
    /// a prior scope, topic change is never signalled and no probe runs.
    async fn probe_topic(
        &self,
        session: Option<&Session>,
        rewritten_query: &str,
        cancel: &CancellationToken,
    ) -> Result<(crate::topic::TopicVerdict, Option<ScopeProbe>), GovRagError> {
        let Some(session) = session else {
            return Ok((crate::topic::TopicVerdict { topic_change_detected: false, signals_fired: 0 }, None));
        };
        if !session.is_followup() {
            return Ok((crate::topic::TopicVerdict { topic_change_detected: false, signals_fired: 0 }, None));
        }
        if cancel.is_cancelled() {
            return Err(GovRagError::Cancelled);
        }

        let previous_scope = (!session.recent_source_doc_ids.is_empty()).then_some(session.recent_source_doc_ids.as_slice());
        let embedding = match &self.embedder {
            Some(embedder) => Some(embedder.embed_query(rewritten_query).await?),
            None => None,
        };
        let probe = self.retriever.retrieve(rewritten_query, embedding.as_deref(), previous_scope).await;
        let probe = match probe {
            Ok(p) => p,
            Err(_) => return Ok((crate::topic::TopicVerdict { topic_change_detected: true, signals_fired: 3 }, None)),
        };

        let top_rrf = probe.evidences.first().map(|e| e.score_rrf).unwrap_or(0.0);
        let avg_rrf = if probe.evidences.is_empty() {
            0.0
        } else {
            probe.evidences.iter().map(|e| e.score_rrf).sum::<f32>() / probe.evidences.len() as f32
        };
        let coverage = self.evidence_builder.build(rewritten_query, probe.evidences.clone()).coverage;

        let signals = TopicSignals {
            embedding_similarity: None,
            retrieval_confidence: coverage,
            top_rrf_score: top_rrf,
        };
        let verdict = self.topic_detector.detect(signals);
        Ok((verdict, Some(ScopeProbe { avg_rrf, top_rrf })))
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_turn(
        &self,
        req: &ChatTurnRequest,
        session: &Session,
        rewrite_info: &RewriteInfo,
        doc_scope: &crate::types::DocScope,
        grounding_verdict: GroundingVerdict,
        latency: LatencyBreakdown,
        degraded: DegradedFlags,
        evidences: &[Evidence],
        cited_map: &CitationMap,
        updated_map: &CitationMap,
        answer_text: &str,
        rewritten_query: &str,
    ) -> bool {
        let now = chrono::Utc::now();
        let user_turn = Turn {
            turn_id: Uuid::new_v4(),
            role: TurnRole::User,
            content: req.query.clone(),
            timestamp: now,
            evidences: None,
            citation_map: None,
            metadata: TurnMetadata::default(),
        };
        let assistant_turn = Turn {
            turn_id: Uuid::new_v4(),
            role: TurnRole::Assistant,
            content: answer_text.to_string(),
            timestamp: chrono::Utc::now(),
            evidences: Some(evidences.to_vec()),
            citation_map: Some(cited_map.clone()),
            metadata: TurnMetadata {
                rewrite: Some(rewrite_info.clone()),
                doc_scope: Some(DocScopeInfo {
                    mode: doc_scope.mode.unwrap_or(crate::types::DocScopeMode::FullCorpus),
                    allowed_doc_ids: doc_scope.allowed_doc_ids.clone(),
                    topic_change_detected: doc_scope.topic_change_detected,
                }),
                grounding: Some(grounding_verdict),
                latency_ms: latency,
                degraded,
                persisted: true,
            },
        };

        let mut ok = true;
        if let Err(e) = self.session_store.append_turn(req.session_id, user_turn).await {
            tracing::warn!(session_id = %req.session_id, error = %e, "failed to persist user turn");
            ok = false;
        }
        if let Err(e) = self.session_store.append_turn(req.session_id, assistant_turn).await {
            tracing::warn!(session_id = %req.session_id, error = %e, "failed to persist assistant turn");
            ok = false;
        }

        if grounding_verdict != GroundingVerdict::InsufficientEvidence {
            let cited_doc_ids: Vec<String> = cited_map.entries.iter().map(|(_, doc_id, _)| doc_id.clone()).collect();
            if !cited_doc_ids.is_empty() {
                if let Err(e) = self.session_store.record_recent_doc_ids(req.session_id, cited_doc_ids).await {
                    tracing::warn!(session_id = %req.session_id, error = %e, "failed to record recent doc ids");
                    ok = false;
                }
            }

            if session.first_response_citation_map.is_none() {
                if let Err(e) = self
                    .session_store
                    .freeze_citation_map(req.session_id, evidences.to_vec(), updated_map.clone())
                    .await
                {
                    tracing::warn!(session_id = %req.session_id, error = %e, "failed to freeze citation map");
                    ok = false;
                }
            }

            let mut entities = session.recent_entities.clone();
            let anchor = rewritten_query.chars().take(60).collect::<String>();
            if entities.last().map(|e| e.as_str()) != Some(anchor.as_str()) {
                entities.push(anchor);
                if entities.len() > RECENT_ENTITIES_CAP {
                    let drop = entities.len() - RECENT_ENTITIES_CAP;
                    entities.drain(0..drop);
                }
                if let Err(e) = self.session_store.update_entities(req.session_id, entities).await {
                    tracing::warn!(session_id = %req.session_id, error = %e, "failed to update recent entities");
                    ok = false;
                }
            }
        }

        ok
    }
}

/// Rough character-budget for the assembled prompt, leaving headroom in the
/// model's context window for the generated answer.
fn estimate_prompt_budget(config: &GovRagConfig) -> usize {
    config.llm.max_tokens.saturating_mul(3)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_state_is_debuggable_for_timeout_errors() {
        let state = OrchestratorState::Retrieving;
        assert_eq!(format!("{state:?}"), "Retrieving");
    }
}

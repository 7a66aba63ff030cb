//! Topic Detector.
//!
//! Multi-threshold confidence dispatch: several independent float signals
//! compared against named constants, combined into an explicit 3-signal
//! voting rule rather than a single blended score.

use crate::config::TopicConfig;

/// The three independent signals voted on to decide a topic change.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicSignals {
    /// Cosine similarity between the current and previous query embeddings.
    /// `None` when no embedder is wired in (see DESIGN.md) — that signal
    /// simply does not vote.
    pub embedding_similarity: Option<f32>,
    /// Retrieval confidence of the previous-scope evidences against the
    /// current query (e.g. top RRF score normalised, or evidence coverage).
    pub retrieval_confidence: f32,
    /// Top RRF score from a quick probe retrieval against the previous scope.
    pub top_rrf_score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicVerdict {
    pub topic_change_detected: bool,
    pub signals_fired: u8,
}

pub struct TopicDetector {
    config: TopicConfig,
}

impl TopicDetector {
    pub fn new(config: TopicConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, signals: TopicSignals) -> TopicVerdict {
        if !self.config.enabled {
            return TopicVerdict { topic_change_detected: false, signals_fired: 0 };
        }

        let mut fired = 0u8;
        if let Some(sim) = signals.embedding_similarity {
            if sim < self.config.similarity_threshold {
                fired += 1;
            }
        }
        if signals.retrieval_confidence < self.config.confidence_threshold {
            fired += 1;
        }
        if signals.top_rrf_score < self.config.min_score_threshold {
            fired += 1;
        }

        TopicVerdict { topic_change_detected: fired >= 2, signals_fired: fired }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TopicConfig {
        TopicConfig { enabled: true, similarity_threshold: 0.30, confidence_threshold: 0.15, min_score_threshold: 0.05 }
    }

    #[test]
    fn two_of_three_signals_declares_topic_change() {
        let detector = TopicDetector::new(config());
        let verdict = detector.detect(TopicSignals {
            embedding_similarity: Some(0.10),
            retrieval_confidence: 0.05,
            top_rrf_score: 0.20,
        });
        assert!(verdict.topic_change_detected);
        assert_eq!(verdict.signals_fired, 2);
    }

    #[test]
    fn single_signal_does_not_declare_topic_change() {
        let detector = TopicDetector::new(config());
        let verdict = detector.detect(TopicSignals {
            embedding_similarity: Some(0.80),
            retrieval_confidence: 0.50,
            top_rrf_score: 0.01,
        });
        assert!(!verdict.topic_change_detected);
        assert_eq!(verdict.signals_fired, 1);
    }

    #[test]
    fn missing_embedding_signal_still_votes_with_remaining_two() {
        let detector = TopicDetector::new(config());
        let verdict = detector.detect(TopicSignals {
            embedding_similarity: None,
            retrieval_confidence: 0.01,
            top_rrf_score: 0.01,
        });
        assert!(verdict.topic_change_detected);
    }

    #[test]
    fn disabled_detector_never_fires() {
        let mut cfg = config();
        cfg.enabled = false;
        let detector = TopicDetector::new(cfg);
        let verdict = detector.detect(TopicSignals {
            embedding_similarity: Some(0.0),
            retrieval_confidence: 0.0,
            top_rrf_score: 0.0,
        });
        assert!(!verdict.topic_change_detected);
    }
}

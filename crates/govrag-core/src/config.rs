use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Process-wide configuration, loaded once and passed explicitly into every
/// component constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovRagConfig {
    pub server: ServerConfig,
    pub index: IndexConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub reranker: RerankerConfig,
    pub llm: LlmConfig,
    pub thresholds: ThresholdConfig,
    pub topic: TopicConfig,
    pub session: SessionConfig,
    pub privacy: PrivacyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub request_timeout_s: u64,
    pub max_queue: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub data_dir: PathBuf,
    pub lexical_index_path: PathBuf,
    pub vector_index_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub primary_model: String,
    pub secondary_model: Option<String>,
    pub fallback_model: Option<String>,
    pub dimension: usize,
    pub batch_size: usize,
    pub max_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub w_bm25: f32,
    pub w_vector: f32,
    pub w_rerank: f32,
    pub rrf_k: f32,
    pub topk_bm25: usize,
    pub topk_vector: usize,
    pub topk_rerank: usize,
    pub max_per_doc: usize,
    pub floor_ratio: f32,
    pub evidence_set_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    pub model_identifier: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub evidence_jaccard: f32,
    pub citation_sent_sim: f32,
    pub citation_span_iou: f32,
    pub confidence_min: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    pub enabled: bool,
    pub similarity_threshold: f32,
    pub confidence_threshold: f32,
    pub min_score_threshold: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_timeout_s: u64,
    pub audit_retention_days: u32,
    pub recent_doc_ids_cap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    pub mask_pii: bool,
}

impl GovRagConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_s == 0 {
            return Err("server.request_timeout_s must be > 0".into());
        }
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be > 0".into());
        }
        if self.embedding.batch_size == 0 {
            return Err("embedding.batch_size must be > 0".into());
        }
        if self.retrieval.topk_bm25 == 0 || self.retrieval.topk_vector == 0 {
            return Err("retrieval.topk_bm25 and topk_vector must be > 0".into());
        }
        if self.retrieval.max_per_doc == 0 {
            return Err("retrieval.max_per_doc must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.retrieval.floor_ratio) {
            return Err("retrieval.floor_ratio must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.thresholds.evidence_jaccard) {
            return Err("thresholds.evidence_jaccard must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.thresholds.citation_sent_sim) {
            return Err("thresholds.citation_sent_sim must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.thresholds.citation_span_iou) {
            return Err("thresholds.citation_span_iou must be in [0.0, 1.0]".into());
        }
        if self.llm.temperature != 0.0 {
            return Err("llm.temperature must be 0 (deterministic decoding)".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, validating before returning.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for GovRagConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("govrag");

        Self {
            server: ServerConfig {
                port: 8787,
                request_timeout_s: 30,
                max_queue: 64,
            },
            index: IndexConfig {
                lexical_index_path: data_dir.join("lexical"),
                vector_index_path: data_dir.join("vector"),
                data_dir,
            },
            embedding: EmbeddingConfig {
                primary_model: "multilingual-e5-base".into(),
                secondary_model: None,
                fallback_model: None,
                dimension: 768,
                batch_size: 32,
                max_wait_ms: 20,
            },
            retrieval: RetrievalConfig {
                w_bm25: 0.5,
                w_vector: 0.5,
                w_rerank: 1.0,
                rrf_k: 60.0,
                topk_bm25: 50,
                topk_vector: 50,
                topk_rerank: 20,
                max_per_doc: 3,
                floor_ratio: 0.3,
                evidence_set_size: 8,
            },
            reranker: RerankerConfig {
                model_identifier: "cross-encoder".into(),
                enabled: true,
            },
            llm: LlmConfig {
                endpoint: "http://localhost:8000/v1/chat/completions".into(),
                model: "default".into(),
                temperature: 0.0,
                top_p: 1.0,
                max_tokens: 1024,
            },
            thresholds: ThresholdConfig {
                evidence_jaccard: 0.55,
                citation_sent_sim: 0.90,
                citation_span_iou: 0.50,
                confidence_min: 0.2,
            },
            topic: TopicConfig {
                enabled: true,
                similarity_threshold: 0.30,
                confidence_threshold: 0.15,
                min_score_threshold: 0.05,
            },
            session: SessionConfig {
                session_timeout_s: 3600,
                audit_retention_days: 30,
                recent_doc_ids_cap: 20,
            },
            privacy: PrivacyConfig { mask_pii: false },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(GovRagConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_port_is_rejected() {
        let mut cfg = GovRagConfig::default();
        cfg.server.port = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn nonzero_temperature_is_rejected() {
        let mut cfg = GovRagConfig::default();
        cfg.llm.temperature = 0.7;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn floor_ratio_out_of_range_is_rejected() {
        let mut cfg = GovRagConfig::default();
        cfg.retrieval.floor_ratio = 1.5;
        assert!(cfg.validate().is_err());
    }
}

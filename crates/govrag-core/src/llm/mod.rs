//! LLM backend adapter.
//!
//! The large-language-model backend itself is an external collaborator
//!; this module is the thin trait seam plus the HTTP-based
//! provider that reaches it, consumed by `generator::GeneratorAdapter`.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod external;
pub mod streaming;

pub use external::ExternalProvider;
pub use streaming::{StreamingResponse, TokenStream};

/// External API providers reachable over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiProvider {
    OpenAI,
    Anthropic,
    OpenRouter,
    Together,
    Grok,
    Perplexity,
    Google,
    Replicate,
    Baseten,
    Ollama,
    HuggingFace { model_id: String },
    Custom { endpoint: String },
}

/// Core trait for LLM providers.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion.
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String>;

    /// Generate with streaming.
    async fn generate_stream(&self, prompt: &str, config: &GenerationConfig) -> Result<TokenStream>;

    /// Generate with evidence context prepended via `format_rag_prompt`.
    async fn generate_with_context(
        &self,
        query: &str,
        context: Vec<String>,
        config: &GenerationConfig,
    ) -> Result<String>;

    /// Provider info (model, context window, streaming support).
    fn info(&self) -> ProviderInfo;

    /// Whether the provider is reachable.
    async fn is_ready(&self) -> bool;

    /// Local resource usage (always zero for an HTTP-only provider).
    fn memory_usage(&self) -> MemoryUsage;
}

/// Generation configuration passed to every `LLMProvider` call. The Generator
/// Adapter always constructs this with `temperature: 0.0,
/// top_p: 1.0` for deterministic decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: usize,
    pub repetition_penalty: f32,
    pub stop_sequences: Vec<String>,
    pub seed: Option<u64>,
}

/// Provider information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub context_window: usize,
    pub supports_streaming: bool,
    pub supports_functions: bool,
    pub is_local: bool,
}

/// Memory usage stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub ram_mb: usize,
    pub vram_mb: Option<usize>,
    pub model_size_mb: usize,
}

/// Build a flat prompt from a query plus evidence context strings, used by
/// `generate_with_context`. The Prompt Composer (`prompt.rs`) builds the
/// full evidence-only prompt for the Chat Orchestrator's path; this helper
/// remains for direct single-shot callers (e.g. the Query Rewriter's LLM
/// call) that just need a query glued to some context lines.
pub fn format_rag_prompt(query: &str, context: &[String], system_prompt: Option<&str>) -> String {
    let mut prompt = String::new();
    if let Some(sys) = system_prompt {
        prompt.push_str(sys);
        prompt.push_str("\n\n");
    }
    if !context.is_empty() {
        prompt.push_str("Context:\n");
        for c in context {
            prompt.push_str(c);
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    prompt.push_str("Question: ");
    prompt.push_str(query);
    prompt
}

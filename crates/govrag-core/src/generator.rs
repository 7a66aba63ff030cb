//! Generator Adapter.
//!
//! Wraps an `LLMProvider` with deterministic decoding, whole/stream modes,
//! `<think>...</think>` span filtering, and cooperative cancellation.
//! Generalizes `llm::external::ExternalProvider`'s HTTP-streaming-to-`mpsc`
//! pattern and `llm::streaming::TokenStream`.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::GovRagError;
use crate::llm::{GenerationConfig, LLMProvider};

/// One item of a generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenDelta {
    Content(String),
    Interrupted,
}

pub struct GeneratorAdapter {
    provider: Arc<dyn LLMProvider>,
    max_tokens: usize,
}

impl GeneratorAdapter {
    pub fn new(provider: Arc<dyn LLMProvider>, max_tokens: usize) -> Self {
        Self { provider, max_tokens }
    }

    fn config(&self) -> GenerationConfig {
        // Deterministic decoding: temperature 0, top-p 1.
        GenerationConfig {
            max_tokens: self.max_tokens,
            temperature: 0.0,
            top_p: 1.0,
            top_k: 1,
            repetition_penalty: 1.0,
            stop_sequences: Vec::new(),
            seed: Some(0),
        }
    }

    /// Whole-response mode: returns the full string with think-spans
    /// stripped.
    pub async fn generate_whole(&self, prompt: &str, cancel: &CancellationToken) -> Result<String, GovRagError> {
        if cancel.is_cancelled() {
            return Err(GovRagError::Cancelled);
        }
        let config = self.config();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GovRagError::Cancelled),
            r = self.provider.generate(prompt, &config) => r,
        };
        let raw = result.map_err(|e| GovRagError::ModelUnavailable { reason: e.to_string() })?;
        Ok(strip_think_spans(&raw))
    }

    /// Streaming mode: produces sanitised content deltas, appending a final
    /// `Interrupted` delta exactly once if cancelled mid-stream.
    pub async fn generate_stream(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<impl Stream<Item = GenDelta>, GovRagError> {
        let config = self.config();
        let inner = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GovRagError::Cancelled),
            r = self.provider.generate_stream(prompt, &config) => r,
        }
        .map_err(|e| GovRagError::ModelUnavailable { reason: e.to_string() })?;

        let (tx, rx) = mpsc::channel(100);
        tokio::spawn(think_filter_task(inner, cancel, tx));
        Ok(DeltaStream { receiver: rx })
    }
}

/// `futures::Stream` wrapper over an `mpsc::Receiver`, matching the shape of
/// `llm::streaming::TokenStream`.
struct DeltaStream {
    receiver: mpsc::Receiver<GenDelta>,
}

impl Stream for DeltaStream {
    type Item = GenDelta;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

async fn think_filter_task(
    mut inner: crate::llm::TokenStream,
    cancel: CancellationToken,
    tx: mpsc::Sender<GenDelta>,
) {
    let mut filter = ThinkTagFilter::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = tx.send(GenDelta::Interrupted).await;
                return;
            }
            next = inner.next() => {
                match next {
                    Some(token) => {
                        if let Some(visible) = filter.push(&token) {
                            if !visible.is_empty() && tx.send(GenDelta::Content(visible)).await.is_err() {
                                return;
                            }
                        }
                    }
                    None => {
                        let tail = filter.flush();
                        if !tail.is_empty() {
                            let _ = tx.send(GenDelta::Content(tail)).await;
                        }
                        return;
                    }
                }
            }
        }
    }
}

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Largest byte offset `<= idx` that falls on a UTF-8 char boundary of `s`.
/// `idx` may exceed `s.len()`; the search still terminates at 0.
fn floor_char_boundary(s: &str, idx: usize) -> usize {
    let mut idx = idx.min(s.len());
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Small buffering state machine that filters `<think>...</think>` spans out
/// of a token stream without ever leaking a partial sentinel.
/// Buffers up to the longest sentinel length (`<think>`/`</think>`, 8 bytes).
struct ThinkTagFilter {
    buf: String,
    inside_think: bool,
}

impl ThinkTagFilter {
    fn new() -> Self {
        Self {
            buf: String::new(),
            inside_think: false,
        }
    }

    /// Feed a new token; returns the text (possibly empty) that is now safe
    /// to emit.
    fn push(&mut self, token: &str) -> Option<String> {
        self.buf.push_str(token);
        Some(self.drain_safe())
    }

    /// Flush whatever remains at end-of-stream (a trailing partial sentinel
    /// with no continuation is emitted as-is rather than swallowed).
    fn flush(&mut self) -> String {
        let rest = std::mem::take(&mut self.buf);
        if self.inside_think {
            String::new()
        } else {
            rest
        }
    }

    fn drain_safe(&mut self) -> String {
        let max_sentinel_len = THINK_OPEN.len().max(THINK_CLOSE.len());
        let mut out = String::new();
        loop {
            if self.inside_think {
                if let Some(pos) = self.buf.find(THINK_CLOSE) {
                    self.buf.drain(..pos + THINK_CLOSE.len());
                    self.inside_think = false;
                    continue;
                }
                // Keep only a potential partial-close tail buffered.
                let keep_from = floor_char_boundary(&self.buf, self.buf.len().saturating_sub(max_sentinel_len - 1));
                self.buf.drain(..keep_from);
                break;
            } else if let Some(pos) = self.buf.find(THINK_OPEN) {
                out.push_str(&self.buf[..pos]);
                self.buf.drain(..pos + THINK_OPEN.len());
                self.inside_think = true;
                continue;
            } else {
                // No full sentinel found; hold back a tail that could be the
                // start of one, emit the rest.
                let safe_len = floor_char_boundary(&self.buf, self.buf.len().saturating_sub(max_sentinel_len - 1));
                out.push_str(&self.buf[..safe_len]);
                self.buf.drain(..safe_len);
                break;
            }
        }
        out
    }
}

/// Non-streaming equivalent of `ThinkTagFilter`, for whole-string responses.
fn strip_think_spans(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(THINK_OPEN) {
        out.push_str(&rest[..start]);
        rest = &rest[start + THINK_OPEN.len()..];
        match rest.find(THINK_CLOSE) {
            Some(end) => rest = &rest[end + THINK_CLOSE.len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_think_spans_removes_full_span() {
        let out = strip_think_spans("core <think>internal reasoning</think> answer");
        assert_eq!(out, "core  answer");
    }

    #[test]
    fn strip_think_spans_drops_unterminated_span() {
        let out = strip_think_spans("core <think>internal reasoning without close");
        assert_eq!(out, "core ");
    }

    #[test]
    fn think_tag_filter_never_leaks_partial_sentinel_across_tokens() {
        let mut filter = ThinkTagFilter::new();
        let mut out = String::new();
        for token in ["hello <thi", "nk>hidden</th", "ink> world"] {
            out.push_str(&filter.push(token).unwrap());
        }
        out.push_str(&filter.flush());
        assert_eq!(out, "hello  world");
    }

    #[test]
    fn think_tag_filter_never_panics_on_multibyte_korean_tokens() {
        let mut filter = ThinkTagFilter::new();
        let mut out = String::new();
        for token in ["2024년 ", "예산은 ", "<think>내부 추론", "</think>", "100억 원", "입니다"] {
            out.push_str(&filter.push(token).unwrap());
        }
        out.push_str(&filter.flush());
        assert_eq!(out, "2024년 예산은 100억 원입니다");
    }

    #[test]
    fn think_tag_filter_passes_through_plain_text() {
        let mut filter = ThinkTagFilter::new();
        let mut out = String::new();
        for token in ["no ", "think ", "tags here"] {
            out.push_str(&filter.push(token).unwrap());
        }
        out.push_str(&filter.flush());
        assert_eq!(out, "no think tags here");
    }
}

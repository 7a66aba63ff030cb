//! Answer Formatter.
//!
//! Renders the final four-part structured answer with a machine-parseable
//! sources section matching the `{n, doc_id, page, char_start, char_end}`
//! locator shape. A structure-detection + bullet-conversion pass turns loose
//! model output into a strict, idempotent, well-formatted answer.

use crate::types::CitationMap;

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceLocator {
    pub n: u32,
    pub doc_id: String,
    pub page: u32,
    pub char_start: usize,
    pub char_end: usize,
}

pub struct FormattedAnswer {
    pub text: String,
    pub sources: Vec<SourceLocator>,
}

pub struct AnswerFormatter;

impl AnswerFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Pure, deterministic: calling `format` twice with the same
    /// `(raw_answer, citation_map)` yields byte-identical output.
    pub fn format(&self, raw_answer: &str, citation_map: &CitationMap) -> FormattedAnswer {
        let sanitized = sanitize(raw_answer);
        let body = strip_existing_sources_section(&sanitized);
        let body = force_bullet_format(&body);

        let mut sources: Vec<SourceLocator> = citation_map
            .entries
            .iter()
            .map(|(n, doc_id, loc)| SourceLocator {
                n: *n,
                doc_id: doc_id.clone(),
                page: loc.page,
                char_start: loc.char_start,
                char_end: loc.char_end,
            })
            .collect();
        sources.sort_by_key(|s| s.n);

        let text = if sources.is_empty() {
            body.trim_end().to_string()
        } else {
            format!("{}\n\n{}", body.trim_end(), render_sources_block(&sources))
        };

        FormattedAnswer { text, sources }
    }
}

impl Default for AnswerFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn render_sources_block(sources: &[SourceLocator]) -> String {
    let mut out = String::from("Sources:\n");
    for s in sources {
        out.push_str(&format!("[{}] -> ({}, {}, {}, {})\n", s.n, s.doc_id, s.page, s.char_start, s.char_end));
    }
    out.trim_end().to_string()
}

/// Removes a model-written "Sources:" section (and everything after it) —
/// the formatter always renders its own from `citation_map` instead, since
/// the model's own rendering isn't guaranteed machine-parseable.
fn strip_existing_sources_section(text: &str) -> String {
    if let Some(idx) = text.find("Sources:") {
        text[..idx].to_string()
    } else {
        text.to_string()
    }
}

/// Strips C0/C1 control codepoints (except `\n`/`\t`) and Unicode
/// private-use-area codepoints that upstream parsing sometimes introduces.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter(|c| {
            let is_control = c.is_control() && *c != '\n' && *c != '\t';
            let is_private_use = matches!(*c as u32, 0xE000..=0xF8FF | 0xF0000..=0xFFFFD | 0x100000..=0x10FFFD);
            !is_control && !is_private_use
        })
        .collect()
}

/// Force bullet formatting when the model returns a wall of unstructured
/// text (adapted from `chat::force_bullet_format`).
fn force_bullet_format(content: &str) -> String {
    let has_headers = content.contains("## ") || content.contains("# ");
    let has_bullets = content.contains("\n- ") || content.contains("\n* ") || content.contains("\n1.");
    let has_paragraphs = content.matches("\n\n").count() >= 2;

    if has_headers || has_bullets || has_paragraphs {
        return content.replace("\n\n\n", "\n\n");
    }

    let sentences: Vec<&str> = content
        .split(['.', '!', '?'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && s.len() > 10)
        .collect();

    if sentences.is_empty() {
        return content.to_string();
    }

    let mut formatted = String::new();
    for sentence in &sentences {
        if sentence.chars().all(|c| c.is_whitespace() || c == '[' || c == ']' || c.is_numeric() || c == ',') {
            continue;
        }
        formatted.push_str(&format!("- {}.\n", sentence.trim()));
    }

    if formatted.is_empty() {
        content.to_string()
    } else {
        formatted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Locator;

    fn map() -> CitationMap {
        let mut m = CitationMap::new();
        m.append("D1".into(), Locator { page: 2, char_start: 120, char_end: 260 });
        m
    }

    #[test]
    fn sources_section_is_machine_parseable() {
        let formatter = AnswerFormatter::new();
        let out = formatter.format("- 예산은 100억 원이다 [1].\n", &map());
        assert!(out.text.contains("Sources:\n[1] -> (D1, 2, 120, 260)"));
        assert_eq!(out.sources[0].doc_id, "D1");
    }

    #[test]
    fn model_written_sources_section_is_discarded() {
        let formatter = AnswerFormatter::new();
        let out = formatter.format("- 답변입니다 [1].\n\nSources:\n[1] -> totally made up\n", &map());
        assert_eq!(out.text.matches("Sources:").count(), 1);
    }

    #[test]
    fn formatting_twice_is_byte_identical() {
        let formatter = AnswerFormatter::new();
        let first = formatter.format("- 예산은 100억 원이다 [1].\n", &map());
        let second = formatter.format("- 예산은 100억 원이다 [1].\n", &map());
        assert_eq!(first.text, second.text);
    }

    #[test]
    fn private_use_codepoints_are_stripped() {
        let formatter = AnswerFormatter::new();
        let out = formatter.format("답변\u{E000}입니다 [1].", &map());
        assert!(!out.text.contains('\u{E000}'));
    }
}

//! Summarization port: prompt construction and tolerant response parsing.
//!
//! The [`Summarizer`] trait is the seam between the pipeline and whatever
//! model backs it (one concrete adapter lives in [`crate::llm`]; tests use
//! stubs). The prompt asks for a strict JSON object; the parser forgives
//! the usual model quirks anyway (code fences, prose around the object) by
//! fishing out the first balanced `{...}` and parsing that.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{Post, RawContent, RetrievedDoc, Summary};

#[derive(Debug, Error)]
pub enum SummarizeError {
    /// The model reply could not be turned into a valid summary.
    #[error("failed to parse summary for post {post_id}: {detail}")]
    ParseFailed { post_id: String, detail: String },

    /// The request never produced a usable reply (network, timeout).
    #[error("LLM request failed: {0}")]
    Request(String),

    /// The model API answered with a non-2xx status.
    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },
}

impl SummarizeError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ParseFailed { .. } => false,
            Self::Request(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// The two model-facing operations: structured summarization of an article
/// and grounded answering over retrieved documents.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, post: &Post, raw: &RawContent) -> Result<Summary, SummarizeError>;

    async fn answer(
        &self,
        question: &str,
        docs: &[RetrievedDoc],
    ) -> Result<String, SummarizeError>;
}

/// Build the summarization prompt.
///
/// The article text is truncated to `max_text_chars`; sections are appended
/// afterwards while the same budget allows, so a heavily structured post
/// still shows its outline without blowing up the prompt.
pub fn build_summary_prompt(raw: &RawContent, max_text_chars: usize) -> String {
    let mut text: String = raw.text.chars().take(max_text_chars).collect();
    if raw.text.chars().count() > max_text_chars {
        text.push_str("...");
    }

    let mut prompt = format!(
        "You are an expert technical writer summarizing engineering blog posts.\n\
         Analyze the following post and produce a structured summary.\n\n\
         Title: {}\n\
         URL: {}\n\n\
         Content:\n{}\n",
        raw.title, raw.url, text
    );

    if !raw.sections.is_empty() {
        let mut budget = max_text_chars;
        let mut section_block = String::new();
        for (i, section) in raw.sections.iter().enumerate() {
            let len = section.chars().count();
            if len > budget {
                break;
            }
            budget -= len;
            section_block.push_str(&format!("Section {}:\n{}\n\n", i + 1, section));
        }
        if !section_block.is_empty() {
            prompt.push_str("\nStructured sections:\n");
            prompt.push_str(&section_block);
        }
    }

    prompt.push_str(
        "\nRespond with a single JSON object with exactly these keys:\n\
         {\n\
         \x20 \"executive_summary\": \"1-3 sentences, accessible to non-technical readers (at least 10 characters)\",\n\
         \x20 \"technical_summary\": \"2-5 paragraphs of technical detail (at least 50 characters)\",\n\
         \x20 \"bullet_points\": [\"key takeaway\", \"...\"],\n\
         \x20 \"keywords\": [\"lowercase keyword\", \"...\"]\n\
         }\n\
         Return ONLY valid JSON. No markdown, no code fences, no text outside the object.\n",
    );

    prompt
}

/// Build the grounded-answer prompt: the question plus one header-and-snippet
/// block per retrieved document, with an instruction to answer only from the
/// provided context.
pub fn build_answer_prompt(question: &str, docs: &[RetrievedDoc]) -> String {
    let mut context = String::new();
    for (i, doc) in docs.iter().enumerate() {
        context.push_str(&format!(
            "Document {} — {} ({})\n{}\n\n",
            i + 1,
            doc.title,
            doc.url,
            doc.snippet
        ));
    }

    format!(
        "Answer the question using ONLY the blog post excerpts below. \
         If the excerpts do not contain the answer, say that the blog posts \
         do not cover it. Cite post titles where relevant.\n\n\
         Question: {}\n\n\
         Excerpts:\n{}",
        question, context
    )
}

/// Parse a model reply into a [`Summary`].
///
/// Accepts fenced, prefixed, or suffixed JSON. Missing `bullet_points` /
/// `keywords` default to empty; a missing or undersized summary field, or a
/// reply with no parseable object at all, is a parse failure for this post.
pub fn parse_summary_json(
    raw: &RawContent,
    response: &str,
    published_at: Option<DateTime<Utc>>,
    source: &str,
) -> Result<Summary, SummarizeError> {
    let parse_failed = |detail: String| SummarizeError::ParseFailed {
        post_id: raw.post_id.clone(),
        detail,
    };

    let cleaned = strip_code_fences(response);
    let object = first_balanced_object(cleaned)
        .ok_or_else(|| parse_failed("no JSON object found in response".to_string()))?;

    let value: serde_json::Value =
        serde_json::from_str(object).map_err(|e| parse_failed(format!("invalid JSON: {}", e)))?;

    let executive = value
        .get("executive_summary")
        .and_then(|v| v.as_str())
        .ok_or_else(|| parse_failed("missing executive_summary".to_string()))?;
    let technical = value
        .get("technical_summary")
        .and_then(|v| v.as_str())
        .ok_or_else(|| parse_failed("missing technical_summary".to_string()))?;

    let bullets = string_array(&value, "bullet_points");
    let keywords = string_array(&value, "keywords");

    Summary::new(
        &raw.post_id,
        &raw.title,
        &raw.url,
        published_at,
        executive,
        technical,
        bullets,
        keywords,
        source,
    )
    .map_err(|e| parse_failed(e.to_string()))
}

fn string_array(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Strip a leading/trailing markdown code fence of any language tag.
fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence line itself ("```json", "```", ...).
    let rest = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    rest.trim().strip_suffix("```").unwrap_or(rest).trim()
}

/// Locate the first balanced `{...}` substring, string- and escape-aware.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

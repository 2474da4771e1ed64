//! Chat-completions adapter for the summarizer port.
//!
//! Calls an OpenAI-compatible `/chat/completions` endpoint. Requires the
//! `OPENAI_API_KEY` environment variable; model, base URL, timeout, and the
//! prompt truncation budget come from [`LlmConfig`]. Rate limits and server
//! errors surface as transient [`SummarizeError`]s so the pipeline's retry
//! policy applies.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::models::{Post, RawContent, RetrievedDoc, Summary};
use crate::summarize::{
    build_answer_prompt, build_summary_prompt, parse_summary_json, SummarizeError, Summarizer,
};

pub struct ChatModel {
    client: reqwest::Client,
    model: String,
    api_base: String,
    summary_budget_chars: usize,
    source: String,
}

impl ChatModel {
    pub fn new(config: &LlmConfig, source: &str) -> Result<Self, SummarizeError> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(SummarizeError::Request(
                "OPENAI_API_KEY environment variable not set".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SummarizeError::Request(e.to_string()))?;

        Ok(Self {
            client,
            model: config.model.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            summary_budget_chars: config.summary_budget_chars,
            source: source.to_string(),
        })
    }

    async fn complete(&self, prompt: &str) -> Result<String, SummarizeError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| SummarizeError::Request("OPENAI_API_KEY not set".to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| SummarizeError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(SummarizeError::Api {
                status: status.as_u16(),
                body: body_text.chars().take(500).collect(),
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SummarizeError::Request(e.to_string()))?;

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                SummarizeError::Request("chat response missing choices[0].message.content".to_string())
            })
    }
}

#[async_trait]
impl Summarizer for ChatModel {
    async fn summarize(&self, post: &Post, raw: &RawContent) -> Result<Summary, SummarizeError> {
        let prompt = build_summary_prompt(raw, self.summary_budget_chars);
        let reply = self.complete(&prompt).await?;
        parse_summary_json(raw, &reply, post.published_at, &self.source)
    }

    async fn answer(
        &self,
        question: &str,
        docs: &[RetrievedDoc],
    ) -> Result<String, SummarizeError> {
        let prompt = build_answer_prompt(question, docs);
        self.complete(&prompt).await
    }
}

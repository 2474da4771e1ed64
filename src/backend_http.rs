//! Generic HTTP RAG backend.
//!
//! Speaks the two-endpoint protocol of a self-hosted RAG service:
//! `POST {base}/add_doc` to index a document and `POST {base}/query` to
//! retrieve, with optional bearer authorization. Transient failures are
//! retried here so callers see only the final outcome.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

use crate::backend::{api_key_from_env, BackendError, RetrievalBackend};
use crate::config::HttpBackendConfig;
use crate::models::{RetrievedDoc, Summary};
use crate::retry::{retry, RetryPolicy};

pub struct HttpRagBackend {
    client: reqwest::Client,
    base_url: String,
    corpus_id: String,
    api_key: Option<String>,
    retry_policy: RetryPolicy,
    doc_counter: AtomicU64,
}

impl HttpRagBackend {
    pub fn new(
        config: &HttpBackendConfig,
        corpus_id: &str,
        timeout: Duration,
        retry_policy: RetryPolicy,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            corpus_id: corpus_id.to_string(),
            api_key: api_key_from_env(config.api_key_env.as_deref()),
            retry_policy,
            doc_counter: AtomicU64::new(0),
        })
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value, BackendError> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .json(payload);
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::Request(e.to_string()))
    }
}

/// Ingestion payload for `POST /add_doc`.
pub fn build_ingest_payload(summary: &Summary, corpus_id: &str, doc_index: u64) -> Value {
    json!({
        "document": summary.to_indexable_document(),
        "doc_index": doc_index,
        "doc_metadata": summary.to_metadata(),
        "uuid": corpus_id,
    })
}

/// Query payload for `POST /query`.
pub fn build_query_payload(question: &str, corpus_id: &str, top_k: usize) -> Value {
    json!({
        "question": question,
        "uuid": corpus_id,
        "top_k": top_k,
    })
}

/// Map one `results[]` entry to a [`RetrievedDoc`], or `None` for a
/// malformed entry. Scores are clamped, never rejected.
pub fn map_result_item(item: &Value) -> Option<RetrievedDoc> {
    let snippet = item.get("page_content").and_then(|v| v.as_str())?;
    let score = item.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let metadata = item.get("metadata").cloned().unwrap_or_else(|| json!({}));

    let post_id = metadata
        .get("post_id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let title = metadata
        .get("title")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let url = metadata
        .get("url")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    RetrievedDoc::from_parts(post_id, title, url, snippet, score, metadata)
}

#[async_trait]
impl RetrievalBackend for HttpRagBackend {
    async fn ingest(&self, summary: &Summary) -> Result<(), BackendError> {
        let doc_index = self.doc_counter.fetch_add(1, Ordering::Relaxed);
        let payload = build_ingest_payload(summary, &self.corpus_id, doc_index);
        // Transient ingest failures are the pipeline's retry concern; raise.
        self.post_json("/add_doc", &payload).await?;
        Ok(())
    }

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedDoc>, BackendError> {
        let payload = build_query_payload(query, &self.corpus_id, k);

        let response = retry(&self.retry_policy, BackendError::is_transient, || {
            let payload = &payload;
            async move { self.post_json("/query", payload).await }
        })
        .await?;

        let results = response
            .get("results")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();

        let mut docs = Vec::new();
        for item in &results {
            match map_result_item(item) {
                Some(doc) => docs.push(doc),
                None => warn!("skipping malformed retrieval entry"),
            }
        }
        docs.truncate(k);
        Ok(docs)
    }
}

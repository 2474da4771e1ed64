//! Managed-corpus backend.
//!
//! Ingestion writes two objects per summary to the configured bucket,
//! `{prefix}{post_id}.txt` (the indexable document) and
//! `{prefix}{post_id}.metadata.json`, and a managed indexer outside this
//! system picks them up. Re-ingesting a post id overwrites both objects in
//! place, which is what makes ingest idempotent here. Retrieval queries the
//! corpus API and maps its context entries back into [`RetrievedDoc`]s;
//! metadata gaps are filled from the rendered document itself (`Title:` /
//! `URL:` lines) or the source object's file stem.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use crate::backend::{api_key_from_env, BackendError, RetrievalBackend};
use crate::config::ManagedBackendConfig;
use crate::models::{clamp_score, RetrievedDoc, Summary};
use crate::object_store::{parse_s3_uri, ObjectStoreClient};
use crate::retry::{retry, RetryPolicy};

pub struct ManagedBackend {
    store: ObjectStoreClient,
    prefix: String,
    client: reqwest::Client,
    query_endpoint: String,
    corpus_id: String,
    api_key: Option<String>,
    retry_policy: RetryPolicy,
}

impl ManagedBackend {
    pub fn new(
        config: &ManagedBackendConfig,
        corpus_id: &str,
        timeout: Duration,
        retry_policy: RetryPolicy,
    ) -> Result<Self, BackendError> {
        let (bucket, prefix) = parse_s3_uri(&config.docs_bucket).ok_or_else(|| {
            BackendError::Config(format!("invalid docs_bucket URI: {}", config.docs_bucket))
        })?;
        let prefix = if prefix.is_empty() || prefix.ends_with('/') {
            prefix
        } else {
            format!("{}/", prefix)
        };

        let store = ObjectStoreClient::new(
            &bucket,
            &config.region,
            config.endpoint_url.as_deref(),
            timeout,
        )?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;

        Ok(Self {
            store,
            prefix,
            client,
            query_endpoint: config.query_endpoint.trim_end_matches('/').to_string(),
            corpus_id: corpus_id.to_string(),
            api_key: api_key_from_env(config.api_key_env.as_deref()),
            retry_policy,
        })
    }

    pub fn document_key(&self, post_id: &str) -> String {
        document_object_key(&self.prefix, post_id)
    }

    pub fn metadata_key(&self, post_id: &str) -> String {
        metadata_object_key(&self.prefix, post_id)
    }

    async fn query_corpus(&self, payload: &Value) -> Result<Value, BackendError> {
        let url = format!(
            "{}/corpora/{}:retrieveContexts",
            self.query_endpoint, self.corpus_id
        );
        let mut request = self
            .client
            .post(&url)
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

/// Object key for a summary's indexable document.
pub fn document_object_key(prefix: &str, post_id: &str) -> String {
    format!("{}{}.txt", prefix, post_id)
}

/// Object key for a summary's metadata mapping.
pub fn metadata_object_key(prefix: &str, post_id: &str) -> String {
    format!("{}{}.metadata.json", prefix, post_id)
}

/// Query payload for the corpus API.
pub fn build_query_payload(question: &str, top_k: usize) -> Value {
    json!({
        "query": {
            "text": question,
            "similarity_top_k": top_k,
        }
    })
}

/// The API nests its context list one level deep, but some deployments
/// return it flat; accept both.
pub fn context_entries(response: &Value) -> Vec<Value> {
    match response.get("contexts") {
        Some(Value::Object(obj)) => obj
            .get("contexts")
            .and_then(|c| c.as_array())
            .cloned()
            .unwrap_or_default(),
        Some(Value::Array(list)) => list.clone(),
        _ => Vec::new(),
    }
}

/// Map one context entry to a [`RetrievedDoc`].
///
/// The corpus reports distance (lower is better); score is `1 − distance`,
/// clamped. Title and URL prefer explicit metadata, then the rendered
/// document's own header lines; the post id falls back to the source
/// object's file stem. Entries that still lack a usable title, URL, or
/// snippet are skipped.
pub fn map_context_item(item: &Value) -> Option<RetrievedDoc> {
    let text = item.get("text").and_then(|v| v.as_str()).unwrap_or("");
    let distance = item.get("distance").and_then(|v| v.as_f64()).unwrap_or(1.0);
    let metadata = item.get("metadata").cloned().unwrap_or_else(|| json!({}));
    let source_uri = item.get("sourceUri").and_then(|v| v.as_str()).unwrap_or("");

    let title = metadata
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| header_line(text, "Title:"))?;

    let url = metadata
        .get("url")
        .and_then(|v| v.as_str())
        .filter(|u| u.starts_with("http"))
        .map(|s| s.to_string())
        .or_else(|| header_line(text, "URL:"))?;

    let post_id = metadata
        .get("post_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| file_stem(source_uri))
        .unwrap_or_default();

    RetrievedDoc::from_parts(post_id, title, url, text, clamp_score(1.0 - distance), metadata)
}

/// Pull the value of a `Header: value` line out of a rendered document.
fn header_line(text: &str, header: &str) -> Option<String> {
    text.lines().find_map(|line| {
        line.trim()
            .strip_prefix(header)
            .map(|rest| rest.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}

/// `gs://bucket/abc123.txt` → `abc123`; any URI-ish path works.
fn file_stem(uri: &str) -> Option<String> {
    let name = uri.rsplit('/').next()?;
    let stem = name.strip_suffix(".txt").unwrap_or(name);
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

#[async_trait]
impl RetrievalBackend for ManagedBackend {
    async fn ingest(&self, summary: &Summary) -> Result<(), BackendError> {
        let document = summary.to_indexable_document();
        let metadata = serde_json::to_string_pretty(&summary.to_metadata())
            .map_err(|e| BackendError::Request(e.to_string()))?;

        // Two writes per post, overwriting in place. Transient failures are
        // the pipeline's retry concern; raise.
        self.store
            .put_object(
                &self.document_key(&summary.post_id),
                document.as_bytes(),
                "text/plain",
            )
            .await?;
        self.store
            .put_object(
                &self.metadata_key(&summary.post_id),
                metadata.as_bytes(),
                "application/json",
            )
            .await?;

        Ok(())
    }

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedDoc>, BackendError> {
        let payload = build_query_payload(query, k);

        let response = retry(&self.retry_policy, BackendError::is_transient, || {
            let payload = &payload;
            async move { self.query_corpus(payload).await }
        })
        .await?;

        let mut docs = Vec::new();
        for item in context_entries(&response) {
            match map_context_item(&item) {
                Some(doc) => docs.push(doc),
                None => warn!("skipping malformed corpus context entry"),
            }
        }
        docs.truncate(k);
        Ok(docs)
    }
}

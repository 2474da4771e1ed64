//! Retrieval backend port.
//!
//! One contract, two implementations selected once at startup:
//!
//! | Kind | Module | Ingest | Retrieve |
//! |------|--------|--------|----------|
//! | `http` | [`crate::backend_http`] | `POST {base}/add_doc` | `POST {base}/query` |
//! | `managed` | [`crate::backend_managed`] | object-store writes | corpus query API |
//!
//! Invariants every implementation upholds: `retrieve` returns at most `k`
//! docs with scores clamped into `[0, 1]`, malformed result entries are
//! skipped rather than raised, and ingest is idempotent by post id.

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::config::Config;
use crate::models::{RetrievedDoc, Summary};
use crate::object_store::ObjectStoreError;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The request never completed (network, timeout).
    #[error("backend request failed: {0}")]
    Request(String),

    /// The backend answered with a non-2xx status.
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error("backend misconfigured: {0}")]
    Config(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::ObjectStore(err) => err.is_transient(),
            Self::Config(_) => false,
        }
    }
}

/// The retrieval corpus as the rest of the system sees it.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Index one summary. Re-ingesting an already-present post id must not
    /// produce a duplicate retrievable document.
    async fn ingest(&self, summary: &Summary) -> Result<(), BackendError>;

    /// Return up to `k` documents relevant to the query, best first.
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedDoc>, BackendError>;
}

/// Construct the configured backend. Called once at startup; no call path
/// afterwards branches on which implementation is active.
pub fn create_backend(config: &Config) -> Result<Box<dyn RetrievalBackend>> {
    let retry_policy: RetryPolicy = config.retry.to_policy();
    match config.backend.kind.as_str() {
        "http" => {
            let http = config
                .backend
                .http
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("[backend.http] section missing"))?;
            Ok(Box::new(crate::backend_http::HttpRagBackend::new(
                http,
                &config.backend.corpus_id,
                config.backend_timeout(),
                retry_policy,
            )?))
        }
        "managed" => {
            let managed = config
                .backend
                .managed
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("[backend.managed] section missing"))?;
            Ok(Box::new(crate::backend_managed::ManagedBackend::new(
                managed,
                &config.backend.corpus_id,
                config.backend_timeout(),
                retry_policy,
            )?))
        }
        other => anyhow::bail!("Unknown backend kind: {}", other),
    }
}

/// Read a bearer token from the environment variable named in config, if any.
pub(crate) fn api_key_from_env(var: Option<&str>) -> Option<String> {
    var.and_then(|name| std::env::var(name).ok())
        .filter(|v| !v.is_empty())
}

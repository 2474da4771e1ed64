//! Article HTML fetching.
//!
//! One small port: `fetch_html(url) -> String`. Network errors, timeouts,
//! and non-2xx statuses all collapse into [`FetchError::Failed`] so the
//! pipeline can drop the one post and keep going.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch {url}: {cause}")]
    Failed { url: String, cause: String },
}

impl FetchError {
    pub fn failed(url: &str, cause: impl std::fmt::Display) -> Self {
        Self::Failed {
            url: url.to_string(),
            cause: cause.to_string(),
        }
    }

    /// Whether the failure is worth retrying: timeouts, connection errors,
    /// and 408/429/5xx statuses. Other HTTP statuses are permanent.
    pub fn is_transient(&self) -> bool {
        let Self::Failed { cause, .. } = self;
        if cause.contains("timed out") || cause.contains("timeout") || cause.contains("connect") {
            return true;
        }
        if let Some(status) = cause.strip_prefix("HTTP ") {
            if let Ok(code) = status.trim().parse::<u16>() {
                return code == 408 || code == 429 || code >= 500;
            }
        }
        false
    }
}

/// Port for fetching article HTML. The pipeline only ever sees this trait;
/// tests substitute canned fetchers.
#[async_trait]
pub trait HtmlFetcher: Send + Sync {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError>;
}

/// reqwest-backed fetcher with an enforced per-request deadline.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; blog-harness/0.3)")
            .build()
            .map_err(|e| FetchError::failed("<client>", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HtmlFetcher for HttpFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::failed(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::failed(url, format!("HTTP {}", status.as_u16())));
        }

        response.text().await.map_err(|e| FetchError::failed(url, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_5xx_is_transient() {
        let err = FetchError::failed("https://x", "HTTP 503");
        assert!(err.is_transient());
    }

    #[test]
    fn http_429_is_transient() {
        assert!(FetchError::failed("https://x", "HTTP 429").is_transient());
    }

    #[test]
    fn http_404_is_permanent() {
        assert!(!FetchError::failed("https://x", "HTTP 404").is_transient());
    }

    #[test]
    fn timeout_is_transient() {
        assert!(FetchError::failed("https://x", "operation timed out").is_transient());
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub feed: FeedConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub url: String,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "tech_blog".to_string()
}

/// Retrieval backend selection. Exactly one of the two variants is active,
/// chosen by `kind` at startup; nothing downstream inspects it again.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub kind: String,
    pub corpus_id: String,
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub http: Option<HttpBackendConfig>,
    #[serde(default)]
    pub managed: Option<ManagedBackendConfig>,
}

fn default_backend_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpBackendConfig {
    pub base_url: String,
    /// Environment variable holding the bearer token, if the service needs one.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ManagedBackendConfig {
    /// Object-store location the managed indexer watches, as `s3://bucket/prefix`.
    pub docs_bucket: String,
    /// Base URL of the managed corpus query API.
    pub query_endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Environment variable holding the query API bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_api_base")]
    pub api_base: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Prompt truncation threshold for article text, in characters.
    #[serde(default = "default_summary_budget_chars")]
    pub summary_budget_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            api_base: default_llm_api_base(),
            timeout_secs: default_llm_timeout_secs(),
            summary_budget_chars: default_summary_budget_chars(),
        }
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_summary_budget_chars() -> usize {
    4000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
    #[serde(default = "default_summarize_concurrency")]
    pub summarize_concurrency: usize,
    #[serde(default = "default_ingest_concurrency")]
    pub ingest_concurrency: usize,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_history_max_entries")]
    pub history_max_entries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: default_fetch_concurrency(),
            summarize_concurrency: default_summarize_concurrency(),
            ingest_concurrency: default_ingest_concurrency(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            history_max_entries: default_history_max_entries(),
        }
    }
}

fn default_fetch_concurrency() -> usize {
    8
}
fn default_summarize_concurrency() -> usize {
    4
}
fn default_ingest_concurrency() -> usize {
    4
}
fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_history_max_entries() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: default_cache_max_size(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_max_size() -> usize {
    1000
}
fn default_cache_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_session_log_max")]
    pub log_max: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            log_max: default_session_log_max(),
        }
    }
}

fn default_session_ttl_secs() -> u64 {
    86_400
}
fn default_session_log_max() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retry_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_retry_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            multiplier: default_retry_multiplier(),
            jitter: default_retry_jitter(),
        }
    }
}

fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_retry_max_delay_ms() -> u64 {
    10_000
}
fn default_retry_multiplier() -> f64 {
    2.0
}
fn default_retry_jitter() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    /// Local file path or `s3://bucket/key` URI.
    #[serde(default = "default_state_path")]
    pub path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> String {
    "state.json".to_string()
}

impl Config {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline.fetch_timeout_secs)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.timeout_secs)
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.feed.url.trim().is_empty() {
        anyhow::bail!("feed.url must not be empty");
    }

    match config.backend.kind.as_str() {
        "http" => {
            if config.backend.http.is_none() {
                anyhow::bail!("backend.kind = \"http\" requires a [backend.http] section");
            }
        }
        "managed" => {
            let managed = config.backend.managed.as_ref().ok_or_else(|| {
                anyhow::anyhow!("backend.kind = \"managed\" requires a [backend.managed] section")
            })?;
            if !managed.docs_bucket.starts_with("s3://") {
                anyhow::bail!(
                    "backend.managed.docs_bucket must be an s3://bucket/prefix URI, got '{}'",
                    managed.docs_bucket
                );
            }
        }
        other => anyhow::bail!("Unknown backend kind: '{}'. Must be http or managed.", other),
    }

    if config.backend.corpus_id.trim().is_empty() {
        anyhow::bail!("backend.corpus_id must not be empty");
    }

    if config.pipeline.fetch_concurrency == 0
        || config.pipeline.summarize_concurrency == 0
        || config.pipeline.ingest_concurrency == 0
    {
        anyhow::bail!("pipeline concurrency bounds must be >= 1");
    }

    if !(0.0..=1.0).contains(&config.retry.jitter) {
        anyhow::bail!("retry.jitter must be in [0.0, 1.0]");
    }

    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("blogh.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn minimal_http_config_loads_with_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[feed]
url = "https://example.org/feed.xml"

[backend]
kind = "http"
corpus_id = "corpus-1"

[backend.http]
base_url = "https://rag.example.org"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.feed.source, "tech_blog");
        assert_eq!(config.pipeline.fetch_concurrency, 8);
        assert_eq!(config.pipeline.summarize_concurrency, 4);
        assert_eq!(config.cache.max_size, 1000);
        assert_eq!(config.session.log_max, 50);
        assert_eq!(config.llm.summary_budget_chars, 4000);
        assert_eq!(config.state.path, "state.json");
    }

    #[test]
    fn managed_backend_requires_s3_uri() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[feed]
url = "https://example.org/feed.xml"

[backend]
kind = "managed"
corpus_id = "corpus-1"

[backend.managed]
docs_bucket = "not-a-uri"
query_endpoint = "https://rag.example.org"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn unknown_backend_kind_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[feed]
url = "https://example.org/feed.xml"

[backend]
kind = "vector9000"
corpus_id = "corpus-1"
"#,
        );
        assert!(load_config(&path).is_err());
    }
}

//! Core data models for the blog harness.
//!
//! These types represent the records that flow through the ingestion and
//! retrieval pipeline. The data lifecycle is:
//!
//! ```text
//! feed text → parse → Post → fetch+extract → RawContent
//!                                                 ↓
//!                                         summarize → Summary
//!                                                 ↓
//!                                          ingest → corpus
//!                                                 ↓
//!                                        retrieve → RetrievedDoc
//! ```
//!
//! Posts, raw contents, and summaries are created once per pipeline stage
//! and never mutated. [`AppState`] is mutated only at the commit boundary
//! of an ingest run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// Derive the stable post id for a URL: SHA-256 of the URL bytes, hex-encoded.
///
/// Equal URLs always produce equal ids, across runs and processes.
pub fn post_id_for_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A discovered feed entry.
///
/// Created by the feed parser, one per valid entry, in feed order.
/// `inline_content` carries full HTML harvested from the feed itself
/// (Atom `<content>` or RSS `content:encoded`); when present, the pipeline
/// skips the per-post fetch entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    /// Stable identifier, a hash of the URL. See [`post_id_for_url`].
    pub id: String,
    /// Absolute URL of the post.
    pub url: String,
    /// Non-empty, trimmed title.
    pub title: String,
    /// Publication timestamp, best-effort parsed.
    pub published_at: Option<DateTime<Utc>>,
    /// Tags or categories, trimmed, order preserved.
    pub tags: Vec<String>,
    /// Source label, defaulting to the configured feed name.
    pub source: String,
    /// Full HTML content harvested from the feed, when available.
    pub inline_content: Option<String>,
}

impl Post {
    pub fn new(url: impl Into<String>, title: impl Into<String>, source: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: post_id_for_url(&url),
            url,
            title: title.into(),
            published_at: None,
            tags: Vec::new(),
            source: source.into(),
            inline_content: None,
        }
    }
}

/// A fetched and extracted article body.
///
/// `html` is the original input unchanged; `text` is cleaned plain text and
/// is never empty (the extractor substitutes the title when the source
/// yields nothing). `sections` are heading-segmented blocks and may be empty.
#[derive(Debug, Clone, PartialEq)]
pub struct RawContent {
    pub post_id: String,
    pub url: String,
    pub title: String,
    pub html: String,
    pub text: String,
    pub sections: Vec<String>,
}

/// The structured LLM output for one post.
///
/// Constructed only through [`Summary::new`], which enforces the length
/// floors and normalizes keywords. Instances are immutable after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub post_id: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub executive_summary: String,
    pub technical_summary: String,
    pub bullets: Vec<String>,
    pub keywords: Vec<String>,
    pub source: String,
}

/// Reasons a [`Summary`] cannot be constructed. These are contract
/// violations on the model output, not runtime conditions.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SummaryFieldError {
    #[error("executive_summary must be at least 10 characters")]
    ExecutiveTooShort,
    #[error("technical_summary must be at least 50 characters")]
    TechnicalTooShort,
}

impl Summary {
    /// Build a summary, enforcing field invariants.
    ///
    /// Keywords are lowercased, trimmed, and deduplicated preserving
    /// first-seen order. Empty keywords and bullets are dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        post_id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        published_at: Option<DateTime<Utc>>,
        executive_summary: impl Into<String>,
        technical_summary: impl Into<String>,
        bullets: Vec<String>,
        keywords: Vec<String>,
        source: impl Into<String>,
    ) -> Result<Self, SummaryFieldError> {
        let executive_summary: String = executive_summary.into();
        let executive_summary = executive_summary.trim().to_string();
        let technical_summary: String = technical_summary.into();
        let technical_summary = technical_summary.trim().to_string();

        if executive_summary.chars().count() < 10 {
            return Err(SummaryFieldError::ExecutiveTooShort);
        }
        if technical_summary.chars().count() < 50 {
            return Err(SummaryFieldError::TechnicalTooShort);
        }

        let bullets: Vec<String> = bullets
            .into_iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();

        let mut seen = std::collections::HashSet::new();
        let mut normalized = Vec::new();
        for kw in keywords {
            let kw = kw.trim().to_lowercase();
            if !kw.is_empty() && seen.insert(kw.clone()) {
                normalized.push(kw);
            }
        }

        Ok(Self {
            post_id: post_id.into(),
            title: title.into(),
            url: url.into(),
            published_at,
            executive_summary,
            technical_summary,
            bullets,
            keywords: normalized,
            source: source.into(),
        })
    }

    /// Deterministic text rendering written into the retrieval corpus.
    pub fn to_indexable_document(&self) -> String {
        let mut parts = vec![
            format!("Title: {}", self.title),
            format!("URL: {}", self.url),
        ];

        if let Some(ts) = self.published_at {
            parts.push(format!("Published: {}", ts.to_rfc3339()));
        }

        parts.push(String::new());
        parts.push("Executive Summary:".to_string());
        parts.push(self.executive_summary.clone());
        parts.push(String::new());
        parts.push("Technical Summary:".to_string());
        parts.push(self.technical_summary.clone());

        if !self.bullets.is_empty() {
            parts.push(String::new());
            parts.push("Key Points:".to_string());
            for bullet in &self.bullets {
                parts.push(format!("- {}", bullet));
            }
        }

        if !self.keywords.is_empty() {
            parts.push(String::new());
            parts.push(format!("Keywords: {}", self.keywords.join(", ")));
        }

        parts.join("\n")
    }

    /// Fixed-key metadata mapping stored alongside the indexable document.
    pub fn to_metadata(&self) -> Value {
        json!({
            "post_id": self.post_id,
            "title": self.title,
            "url": self.url,
            "published_at": self.published_at.map(|ts| ts.to_rfc3339()),
            "keywords": self.keywords,
            "source": self.source,
        })
    }
}

/// A retrieval result mapped from a backend response.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedDoc {
    pub post_id: String,
    pub title: String,
    pub url: String,
    /// Non-empty snippet of the indexed document.
    pub snippet: String,
    /// Relevance in `[0, 1]`; out-of-range input is clamped on ingress.
    pub score: f64,
    pub metadata: Value,
}

impl RetrievedDoc {
    /// Build a doc from backend fields, skipping malformed entries.
    ///
    /// Returns `None` when url, title, or snippet is missing or blank.
    /// Scores are clamped into `[0, 1]`, never rejected.
    pub fn from_parts(
        post_id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        snippet: impl Into<String>,
        score: f64,
        metadata: Value,
    ) -> Option<Self> {
        let title: String = title.into();
        let title = title.trim().to_string();
        let url: String = url.into();
        let url = url.trim().to_string();
        let snippet: String = snippet.into();
        let snippet = snippet.trim().to_string();

        if title.is_empty() || url.is_empty() || snippet.is_empty() {
            return None;
        }

        Some(Self {
            post_id: post_id.into(),
            title,
            url,
            snippet,
            score: clamp_score(score),
            metadata,
        })
    }
}

/// Clamp a relevance score into `[0, 1]`. NaN maps to 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 1.0)
}

/// Per-run record of one ingest: both the pipeline's return value and the
/// atomic unit of persisted history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionResult {
    pub discovered_count: usize,
    pub new_count: usize,
    pub summarized_count: usize,
    pub ingested_count: usize,
    pub new_post_ids: Vec<String>,
    pub finished_at: DateTime<Utc>,
}

/// Durable application state: the watermark of seen post ids plus a bounded
/// history of recent runs.
///
/// `last_seen_post_ids` is an ordered sequence on disk but behaves as a set:
/// [`AppState::record_run`] only appends ids that are not already present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    #[serde(rename = "app:last_seen_post_ids", default)]
    pub last_seen_post_ids: Vec<String>,
    #[serde(
        rename = "app:last_result",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_result: Option<IngestionResult>,
    #[serde(rename = "app:history", default)]
    pub history: Vec<IngestionResult>,
}

impl AppState {
    pub fn is_seen(&self, post_id: &str) -> bool {
        self.last_seen_post_ids.iter().any(|id| id == post_id)
    }

    /// Apply a finished run: extend the watermark with the run's new ids,
    /// replace `last_result`, and append to history, dropping the oldest
    /// entries once `history_max` is exceeded.
    pub fn record_run(&mut self, result: IngestionResult, history_max: usize) {
        for id in &result.new_post_ids {
            if !self.is_seen(id) {
                self.last_seen_post_ids.push(id.clone());
            }
        }
        self.history.push(result.clone());
        if self.history.len() > history_max {
            let drop = self.history.len() - history_max;
            self.history.drain(..drop);
        }
        self.last_result = Some(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_summary() -> Summary {
        Summary::new(
            "id-1",
            "GPU Scheduling Deep Dive",
            "https://example.org/gpu-scheduling",
            Some(Utc.with_ymd_and_hms(2025, 3, 4, 12, 0, 0).unwrap()),
            "A short overview of GPU scheduling.",
            "A detailed look at how the scheduler partitions streaming multiprocessors across tenants.",
            vec!["SM partitioning".to_string(), String::new()],
            vec![
                "GPU".to_string(),
                "Scheduling".to_string(),
                "gpu".to_string(),
            ],
            "tech_blog",
        )
        .unwrap()
    }

    #[test]
    fn post_id_is_deterministic() {
        let a = post_id_for_url("https://example.org/a");
        let b = post_id_for_url("https://example.org/a");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, post_id_for_url("https://example.org/b"));
    }

    #[test]
    fn keywords_lowercased_and_deduped_in_order() {
        let summary = sample_summary();
        assert_eq!(summary.keywords, vec!["gpu", "scheduling"]);
    }

    #[test]
    fn empty_bullets_dropped() {
        let summary = sample_summary();
        assert_eq!(summary.bullets, vec!["SM partitioning"]);
    }

    #[test]
    fn short_summaries_rejected() {
        let err = Summary::new(
            "id",
            "t",
            "https://example.org",
            None,
            "short",
            "long enough technical summary with plenty of detail to pass the floor",
            vec![],
            vec![],
            "s",
        )
        .unwrap_err();
        assert_eq!(err, SummaryFieldError::ExecutiveTooShort);

        let err = Summary::new(
            "id",
            "t",
            "https://example.org",
            None,
            "long enough executive",
            "too short",
            vec![],
            vec![],
            "s",
        )
        .unwrap_err();
        assert_eq!(err, SummaryFieldError::TechnicalTooShort);
    }

    #[test]
    fn indexable_document_contains_all_fields() {
        let doc = sample_summary().to_indexable_document();
        assert!(doc.contains("Title: GPU Scheduling Deep Dive"));
        assert!(doc.contains("URL: https://example.org/gpu-scheduling"));
        assert!(doc.contains("Executive Summary:"));
        assert!(doc.contains("Technical Summary:"));
        assert!(doc.contains("- SM partitioning"));
        assert!(doc.contains("Keywords: gpu, scheduling"));
        // Deterministic rendering.
        assert_eq!(doc, sample_summary().to_indexable_document());
    }

    #[test]
    fn metadata_has_fixed_keys() {
        let meta = sample_summary().to_metadata();
        for key in ["post_id", "title", "url", "published_at", "keywords", "source"] {
            assert!(meta.get(key).is_some(), "missing key {}", key);
        }
    }

    #[test]
    fn retrieved_doc_clamps_score() {
        let doc = RetrievedDoc::from_parts("id", "t", "https://x", "snippet", 1.7, json!({}));
        assert_eq!(doc.unwrap().score, 1.0);
        let doc = RetrievedDoc::from_parts("id", "t", "https://x", "snippet", -0.2, json!({}));
        assert_eq!(doc.unwrap().score, 0.0);
    }

    #[test]
    fn retrieved_doc_skips_malformed() {
        assert!(RetrievedDoc::from_parts("id", "", "https://x", "s", 0.5, json!({})).is_none());
        assert!(RetrievedDoc::from_parts("id", "t", "", "s", 0.5, json!({})).is_none());
        assert!(RetrievedDoc::from_parts("id", "t", "https://x", "  ", 0.5, json!({})).is_none());
    }

    #[test]
    fn record_run_extends_watermark_without_duplicates() {
        let mut state = AppState::default();
        let run = IngestionResult {
            discovered_count: 2,
            new_count: 2,
            summarized_count: 2,
            ingested_count: 2,
            new_post_ids: vec!["a".to_string(), "b".to_string()],
            finished_at: Utc::now(),
        };
        state.record_run(run.clone(), 10);
        state.record_run(run, 10);
        assert_eq!(state.last_seen_post_ids, vec!["a", "b"]);
        assert_eq!(state.history.len(), 2);
    }

    #[test]
    fn history_bounded_dropping_oldest() {
        let mut state = AppState::default();
        for i in 0..5 {
            let run = IngestionResult {
                discovered_count: i,
                new_count: 0,
                summarized_count: 0,
                ingested_count: 0,
                new_post_ids: vec![],
                finished_at: Utc::now(),
            };
            state.record_run(run, 3);
        }
        assert_eq!(state.history.len(), 3);
        // Newest last; the two oldest runs were discarded.
        assert_eq!(state.history[0].discovered_count, 2);
        assert_eq!(state.history[2].discovered_count, 4);
    }

    #[test]
    fn app_state_roundtrips_through_json() {
        let mut state = AppState::default();
        state.record_run(
            IngestionResult {
                discovered_count: 1,
                new_count: 1,
                summarized_count: 1,
                ingested_count: 1,
                new_post_ids: vec!["abc".to_string()],
                finished_at: Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap(),
            },
            10,
        );
        let encoded = serde_json::to_string_pretty(&state).unwrap();
        assert!(encoded.contains("app:last_seen_post_ids"));
        assert!(encoded.contains("app:history"));
        let decoded: AppState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, state);
    }
}

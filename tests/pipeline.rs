//! End-to-end pipeline tests over in-memory implementations of the ports.
//!
//! Everything external (state store, fetcher, summarizer, retrieval
//! backend) is replaced with a scripted fake, so these tests exercise the
//! real staging, diffing, ordering, retry, and commit logic without any
//! network.

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use blog_harness::backend::{BackendError, RetrievalBackend};
use blog_harness::fetch::{FetchError, HtmlFetcher};
use blog_harness::models::{
    post_id_for_url, AppState, Post, RawContent, RetrievedDoc, Summary,
};
use blog_harness::pipeline::{run_ingest, PipelineError, PipelineOptions};
use blog_harness::retry::RetryPolicy;
use blog_harness::state::{StateError, StateStore};
use blog_harness::summarize::{SummarizeError, Summarizer};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryStore {
    state: Mutex<AppState>,
    saves: AtomicUsize,
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<AppState, StateError> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn save(&self, state: &AppState) -> Result<(), StateError> {
        *self.state.lock().unwrap() = state.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedFetcher {
    pages: HashMap<String, String>,
    missing: HashSet<String>,
    calls: AtomicUsize,
}

#[async_trait]
impl HtmlFetcher for ScriptedFetcher {
    async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.missing.contains(url) {
            return Err(FetchError::failed(url, "HTTP 404"));
        }
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::failed(url, "HTTP 404"))
    }
}

/// Deterministic summarizer: records the extracted text it saw per post and
/// can be scripted to fail parsing for specific post ids.
#[derive(Default)]
struct StubSummarizer {
    seen_texts: Mutex<HashMap<String, String>>,
    fail_post_ids: HashSet<String>,
    calls: AtomicUsize,
}

#[async_trait]
impl Summarizer for StubSummarizer {
    async fn summarize(&self, post: &Post, raw: &RawContent) -> Result<Summary, SummarizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_texts
            .lock()
            .unwrap()
            .insert(raw.post_id.clone(), raw.text.clone());

        if self.fail_post_ids.contains(&raw.post_id) {
            return Err(SummarizeError::ParseFailed {
                post_id: raw.post_id.clone(),
                detail: "unterminated JSON".to_string(),
            });
        }

        Summary::new(
            &raw.post_id,
            &raw.title,
            &raw.url,
            post.published_at,
            format!("Summary of {}", raw.title),
            format!(
                "A technical summary of '{}' long enough to clear the validation floor. {}",
                raw.title, raw.text
            ),
            vec![],
            vec![raw.title.to_lowercase()],
            &post.source,
        )
        .map_err(|e| SummarizeError::ParseFailed {
            post_id: raw.post_id.clone(),
            detail: e.to_string(),
        })
    }

    async fn answer(
        &self,
        question: &str,
        docs: &[RetrievedDoc],
    ) -> Result<String, SummarizeError> {
        Ok(format!("Grounded in {} docs: {}", docs.len(), question))
    }
}

/// In-memory corpus keyed by post id, with scriptable transient failures.
#[derive(Default)]
struct RecordingBackend {
    docs: Mutex<BTreeMap<String, String>>,
    ingest_calls: AtomicUsize,
    transient_failures: Mutex<HashMap<String, u32>>,
}

#[async_trait]
impl RetrievalBackend for RecordingBackend {
    async fn ingest(&self, summary: &Summary) -> Result<(), BackendError> {
        self.ingest_calls.fetch_add(1, Ordering::SeqCst);

        let mut failures = self.transient_failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&summary.post_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(BackendError::Status {
                    status: 429,
                    body: "rate limited".to_string(),
                });
            }
        }
        drop(failures);

        self.docs
            .lock()
            .unwrap()
            .insert(summary.post_id.clone(), summary.to_indexable_document());
        Ok(())
    }

    async fn retrieve(&self, _query: &str, k: usize) -> Result<Vec<RetrievedDoc>, BackendError> {
        let docs = self.docs.lock().unwrap();
        Ok(docs
            .iter()
            .take(k)
            .filter_map(|(id, document)| {
                RetrievedDoc::from_parts(
                    id.clone(),
                    format!("Title of {}", id),
                    format!("https://example.org/{}", id),
                    document.clone(),
                    0.9,
                    json!({}),
                )
            })
            .collect())
    }
}

fn test_options() -> PipelineOptions {
    PipelineOptions {
        source: "tech_blog".to_string(),
        fetch_concurrency: 8,
        summarize_concurrency: 4,
        ingest_concurrency: 4,
        history_max_entries: 10,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        },
    }
}

fn atom_feed_with_inline_content() -> String {
    let body_a = format!("<p>{}</p>", "Post A inline body text. ".repeat(10));
    let body_b = format!("<p>{}</p>", "Post B inline body text. ".repeat(10));
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>Post A</title>
    <link rel="alternate" href="https://example.org/a"/>
    <updated>2025-05-01T08:00:00Z</updated>
    <content type="html">{}</content>
  </entry>
  <entry>
    <title>Post B</title>
    <link rel="alternate" href="https://example.org/b"/>
    <updated>2025-05-02T08:00:00Z</updated>
    <content type="html">{}</content>
  </entry>
</feed>"#,
        html_escape(&body_a),
        html_escape(&body_b)
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_ingest_over_atom_feed_with_inline_content() {
    let feed = atom_feed_with_inline_content();
    let store = MemoryStore::default();
    let fetcher = ScriptedFetcher::default();
    let summarizer = StubSummarizer::default();
    let backend = RecordingBackend::default();
    let cancel = CancellationToken::new();

    let result = run_ingest(
        &feed,
        &store,
        &fetcher,
        &summarizer,
        &backend,
        &test_options(),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(result.discovered_count, 2);
    assert_eq!(result.new_count, 2);
    assert_eq!(result.summarized_count, 2);
    assert_eq!(result.ingested_count, 2);

    let id_a = post_id_for_url("https://example.org/a");
    let id_b = post_id_for_url("https://example.org/b");
    // Feed order reconstructed at commit.
    assert_eq!(result.new_post_ids, vec![id_a.clone(), id_b.clone()]);

    // Inline content means the fetcher is never consulted.
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);

    let state = store.state.lock().unwrap().clone();
    assert_eq!(state.last_seen_post_ids, vec![id_a.clone(), id_b.clone()]);
    assert_eq!(state.history.len(), 1);
    assert_eq!(state.last_result.unwrap().ingested_count, 2);

    let docs = backend.docs.lock().unwrap();
    assert_eq!(docs.len(), 2);
    assert!(docs.get(&id_a).unwrap().contains("Title: Post A"));
    assert!(docs.get(&id_b).unwrap().contains("Title: Post B"));
}

#[tokio::test]
async fn reingest_same_feed_discovers_but_ingests_nothing() {
    let feed = atom_feed_with_inline_content();
    let store = MemoryStore::default();
    let fetcher = ScriptedFetcher::default();
    let summarizer = StubSummarizer::default();
    let backend = RecordingBackend::default();
    let cancel = CancellationToken::new();
    let opts = test_options();

    run_ingest(&feed, &store, &fetcher, &summarizer, &backend, &opts, &cancel)
        .await
        .unwrap();
    let ingest_calls_after_first = backend.ingest_calls.load(Ordering::SeqCst);

    let second = run_ingest(&feed, &store, &fetcher, &summarizer, &backend, &opts, &cancel)
        .await
        .unwrap();

    assert_eq!(second.discovered_count, 2);
    assert_eq!(second.new_count, 0);
    assert_eq!(second.summarized_count, 0);
    assert_eq!(second.ingested_count, 0);
    assert!(second.new_post_ids.is_empty());

    let state = store.state.lock().unwrap().clone();
    assert_eq!(state.last_seen_post_ids.len(), 2);
    assert_eq!(state.history.len(), 2);
    // No extra backend writes on the second pass.
    assert_eq!(backend.ingest_calls.load(Ordering::SeqCst), ingest_calls_after_first);
}

#[tokio::test]
async fn rss_content_encoded_skips_fetcher_and_extracts_text() {
    let feed = r#"<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
<channel><item>
  <title>Hello Post</title>
  <link>https://example.org/hello</link>
  <content:encoded><![CDATA[<p>hello</p>]]></content:encoded>
</item></channel></rss>"#;

    let store = MemoryStore::default();
    let fetcher = ScriptedFetcher::default();
    let summarizer = StubSummarizer::default();
    let backend = RecordingBackend::default();
    let cancel = CancellationToken::new();

    let result = run_ingest(
        feed,
        &store,
        &fetcher,
        &summarizer,
        &backend,
        &test_options(),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(result.ingested_count, 1);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);

    let id = post_id_for_url("https://example.org/hello");
    let seen = summarizer.seen_texts.lock().unwrap();
    assert_eq!(seen.get(&id).unwrap(), "hello");
}

#[tokio::test]
async fn fetch_failure_drops_only_that_item_and_leaves_it_unseen() {
    let feed = r#"<rss version="2.0"><channel>
      <item><title>Good</title><link>https://example.org/good</link></item>
      <item><title>Bad</title><link>https://example.org/bad</link></item>
    </channel></rss>"#;

    let mut fetcher = ScriptedFetcher::default();
    fetcher.pages.insert(
        "https://example.org/good".to_string(),
        "<article><p>Good article body.</p></article>".to_string(),
    );
    fetcher.missing.insert("https://example.org/bad".to_string());

    let store = MemoryStore::default();
    let summarizer = StubSummarizer::default();
    let backend = RecordingBackend::default();
    let cancel = CancellationToken::new();
    let opts = test_options();

    let result = run_ingest(feed, &store, &fetcher, &summarizer, &backend, &opts, &cancel)
        .await
        .unwrap();

    assert_eq!(result.discovered_count, 2);
    assert_eq!(result.new_count, 2);
    assert_eq!(result.summarized_count, 1);
    assert_eq!(result.ingested_count, 1);

    let good_id = post_id_for_url("https://example.org/good");
    let bad_id = post_id_for_url("https://example.org/bad");
    let state = store.state.lock().unwrap().clone();
    assert!(state.is_seen(&good_id));
    // The failed post stays unseen so a later run can retry it.
    assert!(!state.is_seen(&bad_id));

    // HTTP 404 is permanent: exactly one fetch attempt for the bad URL.
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

    // A later run retries only the failed post.
    let second = run_ingest(feed, &store, &fetcher, &summarizer, &backend, &opts, &cancel)
        .await
        .unwrap();
    assert_eq!(second.new_count, 1);
    assert_eq!(second.ingested_count, 0);
}

#[tokio::test]
async fn transient_backend_failure_is_retried_within_the_run() {
    let feed = atom_feed_with_inline_content();
    let store = MemoryStore::default();
    let fetcher = ScriptedFetcher::default();
    let summarizer = StubSummarizer::default();
    let backend = RecordingBackend::default();
    let cancel = CancellationToken::new();

    let id_a = post_id_for_url("https://example.org/a");
    // Two 429s, then success: inside the 3-attempt budget.
    backend
        .transient_failures
        .lock()
        .unwrap()
        .insert(id_a.clone(), 2);

    let result = run_ingest(
        &feed,
        &store,
        &fetcher,
        &summarizer,
        &backend,
        &test_options(),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(result.ingested_count, 2);
    assert!(result.new_post_ids.contains(&id_a));
    // Post A took 3 attempts, post B one.
    assert_eq!(backend.ingest_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn exhausted_backend_retries_count_as_a_loss_without_poisoning_others() {
    let feed = atom_feed_with_inline_content();
    let store = MemoryStore::default();
    let fetcher = ScriptedFetcher::default();
    let summarizer = StubSummarizer::default();
    let backend = RecordingBackend::default();
    let cancel = CancellationToken::new();

    let id_a = post_id_for_url("https://example.org/a");
    let id_b = post_id_for_url("https://example.org/b");
    // More failures than the attempt budget.
    backend
        .transient_failures
        .lock()
        .unwrap()
        .insert(id_a.clone(), 10);

    let result = run_ingest(
        &feed,
        &store,
        &fetcher,
        &summarizer,
        &backend,
        &test_options(),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(result.summarized_count, 2);
    assert_eq!(result.ingested_count, 1);
    assert_eq!(result.new_post_ids, vec![id_b.clone()]);

    let state = store.state.lock().unwrap().clone();
    assert!(state.is_seen(&id_b));
    assert!(!state.is_seen(&id_a));
}

#[tokio::test]
async fn malformed_summary_drops_item_but_run_continues() {
    let feed = atom_feed_with_inline_content();
    let store = MemoryStore::default();
    let fetcher = ScriptedFetcher::default();
    let mut summarizer = StubSummarizer::default();
    let id_a = post_id_for_url("https://example.org/a");
    summarizer.fail_post_ids.insert(id_a.clone());
    let backend = RecordingBackend::default();
    let cancel = CancellationToken::new();

    let result = run_ingest(
        &feed,
        &store,
        &fetcher,
        &summarizer,
        &backend,
        &test_options(),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(result.new_count, 2);
    assert_eq!(result.summarized_count, 1);
    assert_eq!(result.ingested_count, 1);
    // Parse failures are permanent: no retry for the bad item.
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);

    let id_b = post_id_for_url("https://example.org/b");
    assert_eq!(result.new_post_ids, vec![id_b]);
}

#[tokio::test]
async fn empty_feed_commits_a_zero_count_history_entry() {
    let store = MemoryStore::default();
    let fetcher = ScriptedFetcher::default();
    let summarizer = StubSummarizer::default();
    let backend = RecordingBackend::default();
    let cancel = CancellationToken::new();

    let result = run_ingest(
        "",
        &store,
        &fetcher,
        &summarizer,
        &backend,
        &test_options(),
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(result.discovered_count, 0);
    assert_eq!(result.ingested_count, 0);

    let state = store.state.lock().unwrap().clone();
    assert!(state.last_seen_post_ids.is_empty());
    assert_eq!(state.history.len(), 1);
    assert_eq!(store.saves.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn feed_with_one_valid_and_one_malformed_entry() {
    let feed = r#"<rss version="2.0"><channel>
      <item><title>Valid</title><link>https://example.org/valid</link>
        <description>inline body</description></item>
      <item><title>No link at all</title></item>
    </channel></rss>"#;

    let store = MemoryStore::default();
    let fetcher = ScriptedFetcher::default();
    let summarizer = StubSummarizer::default();
    let backend = RecordingBackend::default();
    let cancel = CancellationToken::new();

    let result = run_ingest(
        feed,
        &store,
        &fetcher,
        &summarizer,
        &backend,
        &test_options(),
        &cancel,
    )
    .await
    .unwrap();

    // The malformed entry is dropped at parse time, silently.
    assert_eq!(result.discovered_count, 1);
    assert_eq!(result.ingested_count, 1);
}

#[tokio::test]
async fn cancelled_run_commits_nothing() {
    let feed = atom_feed_with_inline_content();
    let store = MemoryStore::default();
    let fetcher = ScriptedFetcher::default();
    let summarizer = StubSummarizer::default();
    let backend = RecordingBackend::default();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run_ingest(
        &feed,
        &store,
        &fetcher,
        &summarizer,
        &backend,
        &test_options(),
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    assert_eq!(store.saves.load(Ordering::SeqCst), 0);
    let state = store.state.lock().unwrap().clone();
    assert!(state.history.is_empty());
}

#[tokio::test]
async fn history_respects_configured_bound() {
    let feed = atom_feed_with_inline_content();
    let store = MemoryStore::default();
    let fetcher = ScriptedFetcher::default();
    let summarizer = StubSummarizer::default();
    let backend = RecordingBackend::default();
    let cancel = CancellationToken::new();
    let mut opts = test_options();
    opts.history_max_entries = 3;

    for _ in 0..5 {
        run_ingest(&feed, &store, &fetcher, &summarizer, &backend, &opts, &cancel)
            .await
            .unwrap();
    }

    let state = store.state.lock().unwrap().clone();
    assert_eq!(state.history.len(), 3);
    // Oldest entries dropped from the front: the survivors are re-runs.
    assert!(state.history.iter().all(|run| run.new_count == 0 || run.new_count == 2));
}

#[tokio::test]
async fn ingest_then_ask_end_to_end() {
    use blog_harness::cache::AnswerService;
    use blog_harness::config::{CacheConfig, SessionConfig};
    use blog_harness::qa::{QaEngine, NO_CONTEXT_ANSWER};

    let feed = atom_feed_with_inline_content();
    let store = MemoryStore::default();
    let fetcher = ScriptedFetcher::default();
    let summarizer = Arc::new(StubSummarizer::default());
    let backend = Arc::new(RecordingBackend::default());
    let cancel = CancellationToken::new();

    let engine = QaEngine::new(backend.clone(), summarizer.clone());
    let service = AnswerService::new(engine, &CacheConfig::default(), &SessionConfig::default());

    // Empty corpus: fixed refusal, nothing cached.
    let refusal = service.answer("what is post A about?", 8, None).await.unwrap();
    assert_eq!(refusal.answer, NO_CONTEXT_ANSWER);
    assert_eq!(service.stats().size, 0);

    run_ingest(
        &feed,
        &store,
        &fetcher,
        summarizer.as_ref(),
        backend.as_ref(),
        &test_options(),
        &cancel,
    )
    .await
    .unwrap();

    let answer = service.answer("what is post A about?", 8, Some("s1")).await.unwrap();
    assert!(answer.is_grounded());
    assert_eq!(answer.docs.len(), 2);
    assert!(answer.answer.contains("Grounded in 2 docs"));

    // Second identical ask is served from cache.
    let again = service.answer("What is Post A about?", 8, Some("s2")).await.unwrap();
    assert_eq!(again, answer);
    assert_eq!(service.stats().hits, 1);
    assert_eq!(service.session_history("s1").unwrap().len(), 1);
    assert_eq!(service.session_history("s2").unwrap().len(), 1);
}

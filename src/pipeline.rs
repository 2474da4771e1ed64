//! The staged ingestion pipeline.
//!
//! One call runs one feed through discover → diff → fetch+extract →
//! summarize → ingest → commit. The pipeline owns no persistent handles:
//! it borrows the state store, fetcher, summarizer, and backend for the
//! duration of the run, which keeps it reentrant and trivially testable.
//!
//! Concurrency: fetch, summarize, and ingest each fan out under their own
//! semaphore so a slow dependency cannot starve the others. Items carry
//! their feed-order index through every stage and are re-sorted at commit,
//! so `new_post_ids` is deterministic however the fan-out interleaved.
//!
//! Failure policy: a failed item is logged and dropped; the run itself
//! succeeds whenever it finishes, and a zero-ingest run still commits so
//! history records the attempt. Cancellation is the one exception: a
//! cancelled run commits nothing.

use chrono::Utc;
use futures::future::join_all;
use std::future::Future;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::{BackendError, RetrievalBackend};
use crate::config::Config;
use crate::extract::extract;
use crate::feed::discover_posts;
use crate::fetch::{FetchError, HtmlFetcher};
use crate::models::{IngestionResult, Post, RawContent, Summary};
use crate::retry::{retry, RetryPolicy};
use crate::state::{StateError, StateStore};
use crate::summarize::{SummarizeError, Summarizer};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// The run was cancelled; state was not committed.
    #[error("ingest run cancelled")]
    Cancelled,

    #[error(transparent)]
    State(#[from] StateError),
}

/// Per-run knobs, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub source: String,
    pub fetch_concurrency: usize,
    pub summarize_concurrency: usize,
    pub ingest_concurrency: usize,
    pub history_max_entries: usize,
    pub retry: RetryPolicy,
}

impl PipelineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source: config.feed.source.clone(),
            fetch_concurrency: config.pipeline.fetch_concurrency,
            summarize_concurrency: config.pipeline.summarize_concurrency,
            ingest_concurrency: config.pipeline.ingest_concurrency,
            history_max_entries: config.pipeline.history_max_entries,
            retry: config.retry.to_policy(),
        }
    }
}

/// Race a future against cancellation. `None` means the run was cancelled.
async fn unless_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        value = fut => Some(value),
    }
}

/// Run one full ingest over an already-fetched feed document.
pub async fn run_ingest(
    feed_text: &str,
    store: &dyn StateStore,
    fetcher: &dyn HtmlFetcher,
    summarizer: &dyn Summarizer,
    backend: &dyn RetrievalBackend,
    opts: &PipelineOptions,
    cancel: &CancellationToken,
) -> Result<IngestionResult, PipelineError> {
    // Stage 1: discover.
    let discovered = discover_posts(feed_text, &opts.source);
    let discovered_count = discovered.len();

    // Stage 2: diff against the watermark, preserving feed order.
    let mut state = store.load().await?;
    let new_posts: Vec<Post> = discovered
        .into_iter()
        .filter(|post| !state.is_seen(&post.id))
        .collect();
    let new_count = new_posts.len();
    info!(discovered_count, new_count, "feed discovery complete");

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    // Stage 3: fetch and extract, bounded fan-out. Posts with inline feed
    // content skip the fetcher entirely.
    let fetch_sem = Semaphore::new(opts.fetch_concurrency);
    let contents: Vec<(usize, &Post, RawContent)> =
        join_all(new_posts.iter().enumerate().map(|(idx, post)| {
            let fetch_sem = &fetch_sem;
            async move {
                let _permit = fetch_sem.acquire().await.ok()?;
                let raw =
                    unless_cancelled(cancel, obtain_content(post, fetcher, &opts.retry)).await??;
                Some((idx, post, raw))
            }
        }))
        .await
        .into_iter()
        .flatten()
        .collect();

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    // Stage 4: summarize, bounded fan-out. The LLM is the scarce resource,
    // so this bound is typically the lowest.
    let summarize_sem = Semaphore::new(opts.summarize_concurrency);
    let summaries: Vec<(usize, Summary)> = join_all(contents.iter().map(|(idx, post, raw)| {
        let summarize_sem = &summarize_sem;
        async move {
            let _permit = summarize_sem.acquire().await.ok()?;
            let result = unless_cancelled(
                cancel,
                retry(&opts.retry, SummarizeError::is_transient, || {
                    summarizer.summarize(post, raw)
                }),
            )
            .await?;
            match result {
                Ok(summary) => Some((*idx, summary)),
                Err(err) => {
                    warn!(post_id = %raw.post_id, error = %err, "summarization failed; dropping item");
                    None
                }
            }
        }
    }))
    .await
    .into_iter()
    .flatten()
    .collect();
    let summarized_count = summaries.len();

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    // Stage 5: ingest, bounded fan-out with transient retry.
    let ingest_sem = Semaphore::new(opts.ingest_concurrency);
    let mut ingested: Vec<(usize, String)> = join_all(summaries.iter().map(|(idx, summary)| {
        let ingest_sem = &ingest_sem;
        async move {
            let _permit = ingest_sem.acquire().await.ok()?;
            let result = unless_cancelled(
                cancel,
                retry(&opts.retry, BackendError::is_transient, || {
                    backend.ingest(summary)
                }),
            )
            .await?;
            match result {
                Ok(()) => Some((*idx, summary.post_id.clone())),
                Err(err) => {
                    warn!(post_id = %summary.post_id, error = %err, "ingest failed; dropping item");
                    None
                }
            }
        }
    }))
    .await
    .into_iter()
    .flatten()
    .collect();

    if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }

    // Stage 6: commit. Reconstruct feed order so the result is
    // deterministic for a given input.
    ingested.sort_by_key(|(idx, _)| *idx);
    let new_post_ids: Vec<String> = ingested.into_iter().map(|(_, id)| id).collect();

    let result = IngestionResult {
        discovered_count,
        new_count,
        summarized_count,
        ingested_count: new_post_ids.len(),
        new_post_ids,
        finished_at: Utc::now(),
    };

    state.record_run(result.clone(), opts.history_max_entries);
    store.save(&state).await?;

    info!(
        discovered = result.discovered_count,
        new = result.new_count,
        summarized = result.summarized_count,
        ingested = result.ingested_count,
        "ingest run committed"
    );

    Ok(result)
}

/// Produce the article content for a post: inline feed content when the
/// feed carried it, otherwise a retried fetch. `None` drops the post.
async fn obtain_content(
    post: &Post,
    fetcher: &dyn HtmlFetcher,
    retry_policy: &RetryPolicy,
) -> Option<RawContent> {
    if let Some(ref inline) = post.inline_content {
        return Some(extract(post, inline));
    }

    let html = retry(retry_policy, FetchError::is_transient, || {
        fetcher.fetch_html(&post.url)
    })
    .await;

    match html {
        Ok(html) => Some(extract(post, &html)),
        Err(err) => {
            warn!(url = %post.url, error = %err, "fetch failed; dropping item");
            None
        }
    }
}

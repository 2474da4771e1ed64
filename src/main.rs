//! # Blog Harness CLI (`blogh`)
//!
//! Thin command-line surface over the library. All engine behavior
//! (parsing, pipeline staging, retrieval, caching) lives in the library;
//! the binary wires configured implementations together and prints results.
//!
//! ```bash
//! blogh --config ./config/blogh.toml ingest
//! blogh --config ./config/blogh.toml ask "what's new in inference?"
//! blogh --config ./config/blogh.toml history
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use blog_harness::backend::create_backend;
use blog_harness::cache::AnswerService;
use blog_harness::config::{load_config, Config};
use blog_harness::fetch::{HtmlFetcher, HttpFetcher};
use blog_harness::llm::ChatModel;
use blog_harness::pipeline::{run_ingest, PipelineOptions};
use blog_harness::qa::{QaEngine, DEFAULT_TOP_K};
use blog_harness::state::open_state_store;

/// Blog Harness: discover, summarize, index, and answer questions about
/// a technical blog feed.
#[derive(Parser)]
#[command(
    name = "blogh",
    about = "Feed-driven blog intelligence: ingest posts into a retrieval corpus and ask grounded questions",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/blogh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the configured feed and run one ingestion pass.
    Ingest {
        /// Read the feed document from a file instead of fetching it.
        #[arg(long)]
        feed_file: Option<PathBuf>,
    },

    /// Ask a question grounded in the ingested summaries.
    Ask {
        question: String,

        /// Maximum documents to retrieve.
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        /// Session id for the query log.
        #[arg(long)]
        session: Option<String>,
    },

    /// Print the persisted ingestion history.
    History,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("BLOGH_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest { feed_file } => cmd_ingest(&config, feed_file).await,
        Commands::Ask {
            question,
            top_k,
            session,
        } => cmd_ask(&config, &question, top_k, session.as_deref()).await,
        Commands::History => cmd_history(&config).await,
    }
}

async fn cmd_ingest(config: &Config, feed_file: Option<PathBuf>) -> Result<()> {
    let fetcher = HttpFetcher::new(config.fetch_timeout())?;

    let feed_text = match feed_file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read feed file: {}", path.display()))?,
        None => fetcher.fetch_html(&config.feed.url).await?,
    };

    let store = open_state_store(
        &config.state.path,
        state_region(config),
        state_endpoint(config),
        config.backend_timeout(),
    )?;
    let summarizer = ChatModel::new(&config.llm, &config.feed.source)?;
    let backend = create_backend(config)?;
    let opts = PipelineOptions::from_config(config);

    let cancel = CancellationToken::new();
    let result = run_ingest(
        &feed_text,
        store.as_ref(),
        &fetcher,
        &summarizer,
        backend.as_ref(),
        &opts,
        &cancel,
    )
    .await?;

    println!("ingest {}", config.feed.url);
    println!("  discovered: {}", result.discovered_count);
    println!("  new: {}", result.new_count);
    println!("  summarized: {}", result.summarized_count);
    println!("  ingested: {}", result.ingested_count);
    println!("ok");
    Ok(())
}

async fn cmd_ask(
    config: &Config,
    question: &str,
    top_k: usize,
    session: Option<&str>,
) -> Result<()> {
    let backend: Arc<_> = create_backend(config)?.into();
    let model = Arc::new(ChatModel::new(&config.llm, &config.feed.source)?);
    let engine = QaEngine::new(backend, model);
    let service = AnswerService::new(engine, &config.cache, &config.session);

    let response = service.answer(question, top_k, session).await?;

    println!("{}", response.answer);
    if !response.docs.is_empty() {
        println!();
        println!("Sources:");
        for doc in &response.docs {
            println!("  [{:.2}] {} — {}", doc.score, doc.title, doc.url);
        }
    }
    Ok(())
}

async fn cmd_history(config: &Config) -> Result<()> {
    let store = open_state_store(
        &config.state.path,
        state_region(config),
        state_endpoint(config),
        config.backend_timeout(),
    )?;
    let state = store.load().await?;

    if state.history.is_empty() {
        println!("No ingestion runs recorded.");
        return Ok(());
    }

    for run in &state.history {
        println!(
            "{}  discovered: {}  new: {}  summarized: {}  ingested: {}",
            run.finished_at.to_rfc3339(),
            run.discovered_count,
            run.new_count,
            run.summarized_count,
            run.ingested_count
        );
    }
    println!("seen posts: {}", state.last_seen_post_ids.len());
    Ok(())
}

fn state_region(config: &Config) -> &str {
    config
        .backend
        .managed
        .as_ref()
        .map(|m| m.region.as_str())
        .unwrap_or("us-east-1")
}

fn state_endpoint(config: &Config) -> Option<&str> {
    config
        .backend
        .managed
        .as_ref()
        .and_then(|m| m.endpoint_url.as_deref())
}

//! # Blog Harness
//!
//! **A feed-driven intelligence pipeline over a technical blog.**
//!
//! Blog Harness periodically discovers new posts from an RSS/Atom feed,
//! extracts clean article text, asks an LLM for a structured summary of
//! each, indexes those summaries in a retrieval corpus, and answers
//! free-form questions grounded in the retrieved summaries.
//!
//! ## Data Flow
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌───────────┐   ┌─────────────┐
//! │ Feed     │──▶│ Pipeline       │──▶│ Summarizer│──▶│ Retrieval   │
//! │ Atom/RSS │   │ diff+fetch+    │   │ (LLM)     │   │ backend     │
//! │ /HTML    │   │ extract        │   └───────────┘   │ http/managed│
//! └──────────┘   └──────┬─────────┘                   └─────┬───────┘
//!                       │ commit                            │ retrieve
//!                  ┌────▼─────┐                      ┌──────▼──────┐
//!                  │ State    │                      │ QA + cache  │
//!                  │ watermark│                      │ single-flight│
//!                  └──────────┘                      └─────────────┘
//! ```
//!
//! 1. The **feed parser** ([`feed`]) turns Atom, RSS 2.0, or an HTML index
//!    page into [`models::Post`]s, harvesting inline content when present.
//! 2. The **pipeline** ([`pipeline`]) diffs posts against the persisted
//!    watermark ([`state`]), fetches and extracts article text
//!    ([`fetch`], [`extract`]), summarizes ([`summarize`], [`llm`]), and
//!    ingests into the configured **retrieval backend** ([`backend`]).
//! 3. The **QA path** ([`qa`]) retrieves summaries and grounds an answer,
//!    fronted by a TTL/LRU cache with single-flight coalescing and a
//!    session query log ([`cache`]).
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core types: `Post`, `RawContent`, `Summary`, `RetrievedDoc`, `IngestionResult`, `AppState` |
//! | [`feed`] | Atom / RSS 2.0 / HTML-index feed parsing |
//! | [`html`] | Tolerant HTML scanning shared by feed parsing and extraction |
//! | [`fetch`] | Article HTML fetching with timeout and error mapping |
//! | [`extract`] | Article root selection, text cleaning, section cutting |
//! | [`summarize`] | Summarizer port: prompts and tolerant JSON parsing |
//! | [`llm`] | Chat-completions adapter implementing the summarizer port |
//! | [`backend`] | Retrieval backend port and startup selection |
//! | [`backend_http`] | Generic HTTP RAG backend (`/add_doc`, `/query`) |
//! | [`backend_managed`] | Object-store ingestion + managed corpus queries |
//! | [`object_store`] | SigV4-signed S3-compatible GET/PUT client |
//! | [`pipeline`] | Staged, bounded-concurrency ingestion orchestration |
//! | [`qa`] | Retrieve-then-ground question answering |
//! | [`cache`] | Response cache, single-flight, session overlay |
//! | [`state`] | Durable watermark + history, local file or object store |
//! | [`retry`] | Bounded exponential backoff with jitter |

pub mod backend;
pub mod backend_http;
pub mod backend_managed;
pub mod cache;
pub mod config;
pub mod extract;
pub mod feed;
pub mod fetch;
pub mod html;
pub mod llm;
pub mod models;
pub mod object_store;
pub mod pipeline;
pub mod qa;
pub mod retry;
pub mod state;
pub mod summarize;

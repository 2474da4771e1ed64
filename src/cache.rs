//! Response cache, single-flight coalescing, and the session overlay.
//!
//! [`AnswerService`] sits between the serving surface and the QA engine:
//!
//! - **Cache**: keyed by the normalized question plus `k`, TTL-bounded,
//!   capacity-bounded with least-recently-used eviction. Refusals (empty
//!   retrieval) are never cached.
//! - **Single-flight**: concurrent callers asking the same cold key share
//!   one in-flight computation instead of stampeding the backend and the
//!   model. The slot is cleared on success and on failure; failures are
//!   not cached.
//! - **Sessions**: an observational per-session query log with an idle TTL.
//!   The log never feeds back into prompts.
//!
//! Cache keys deliberately exclude the session id, so a hit is shared
//! across sessions.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::{CacheConfig, SessionConfig};
use crate::qa::{QaEngine, QaError, QaResponse};

type CacheKey = (String, usize);

/// Lowercase, trim, and collapse interior whitespace so trivially different
/// phrasings of the same question share a cache slot.
pub fn normalize_question(question: &str) -> String {
    question
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

struct CacheEntry {
    response: QaResponse,
    inserted: Instant,
    last_used: Instant,
}

struct Session {
    last_activity: Instant,
    log: VecDeque<SessionQuery>,
}

/// One entry of a session's query log.
#[derive(Debug, Clone)]
pub struct SessionQuery {
    pub ts: DateTime<Utc>,
    pub question: String,
    pub answer_len: usize,
    pub doc_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    pub max_size: usize,
}

pub struct AnswerService {
    engine: QaEngine,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
    flights: Mutex<HashMap<CacheKey, Arc<OnceCell<QaResponse>>>>,
    sessions: Mutex<HashMap<String, Session>>,
    cache_ttl: Duration,
    cache_max: usize,
    session_ttl: Duration,
    session_log_max: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AnswerService {
    pub fn new(engine: QaEngine, cache: &CacheConfig, session: &SessionConfig) -> Self {
        Self {
            engine,
            cache: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            cache_ttl: Duration::from_secs(cache.ttl_secs),
            cache_max: cache.max_size.max(1),
            session_ttl: Duration::from_secs(session.ttl_secs),
            session_log_max: session.log_max.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Answer a question through the cache.
    ///
    /// On a hit the QA engine is not invoked at all. On a cold key,
    /// concurrent callers coalesce onto one computation. A `session_id`
    /// appends the outcome to that session's query log either way.
    pub async fn answer(
        &self,
        question: &str,
        k: usize,
        session_id: Option<&str>,
    ) -> Result<QaResponse, QaError> {
        let key: CacheKey = (normalize_question(question), k);

        if let Some(response) = self.cache_get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.log_to_session(session_id, question, &response);
            return Ok(response);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let cell = {
            let mut flights = self.flights.lock().unwrap();
            flights
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let outcome = cell
            .get_or_try_init(|| self.engine.answer(question, k))
            .await
            .map(|response| response.clone());

        // Clear the slot whether the computation succeeded or failed, but
        // only if it is still ours: a later caller may have opened a fresh
        // flight for the same key in the meantime.
        {
            let mut flights = self.flights.lock().unwrap();
            if let Some(current) = flights.get(&key) {
                if Arc::ptr_eq(current, &cell) {
                    flights.remove(&key);
                }
            }
        }

        let response = outcome?;

        if response.is_grounded() {
            self.cache_put(key, response.clone());
        } else {
            debug!("refusal response not cached");
        }
        self.log_to_session(session_id, question, &response);
        Ok(response)
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.lock().unwrap();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: cache.len(),
            max_size: self.cache_max,
        }
    }

    /// The query log for a session, if it exists and has not idled out.
    pub fn session_history(&self, session_id: &str) -> Option<Vec<SessionQuery>> {
        let mut sessions = self.sessions.lock().unwrap();
        let expired = sessions
            .get(session_id)
            .map(|s| s.last_activity.elapsed() > self.session_ttl)
            .unwrap_or(false);
        if expired {
            sessions.remove(session_id);
            return None;
        }
        sessions
            .get(session_id)
            .map(|s| s.log.iter().cloned().collect())
    }

    fn cache_get(&self, key: &CacheKey) -> Option<QaResponse> {
        let mut cache = self.cache.lock().unwrap();
        let expired = cache
            .get(key)
            .map(|entry| entry.inserted.elapsed() > self.cache_ttl)
            .unwrap_or(false);
        if expired {
            cache.remove(key);
            return None;
        }
        cache.get_mut(key).map(|entry| {
            entry.last_used = Instant::now();
            entry.response.clone()
        })
    }

    fn cache_put(&self, key: CacheKey, response: QaResponse) {
        let mut cache = self.cache.lock().unwrap();

        cache.retain(|_, entry| entry.inserted.elapsed() <= self.cache_ttl);

        if cache.len() >= self.cache_max && !cache.contains_key(&key) {
            if let Some(oldest) = cache
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest);
            }
        }

        let now = Instant::now();
        cache.insert(
            key,
            CacheEntry {
                response,
                inserted: now,
                last_used: now,
            },
        );
    }

    fn log_to_session(&self, session_id: Option<&str>, question: &str, response: &QaResponse) {
        let Some(session_id) = session_id else { return };

        let mut sessions = self.sessions.lock().unwrap();
        let ttl = self.session_ttl;
        sessions.retain(|_, session| session.last_activity.elapsed() <= ttl);

        let session = sessions.entry(session_id.to_string()).or_insert(Session {
            last_activity: Instant::now(),
            log: VecDeque::new(),
        });

        session.log.push_back(SessionQuery {
            ts: Utc::now(),
            question: question.to_string(),
            answer_len: response.answer.len(),
            doc_count: response.docs.len(),
        });
        while session.log.len() > self.session_log_max {
            session.log.pop_front();
        }
        session.last_activity = Instant::now();
    }
}

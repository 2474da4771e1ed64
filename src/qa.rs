//! Question answering: retrieve, then ground.
//!
//! The orchestrator is deliberately small. It retrieves up to `k` docs,
//! refuses outright when there is nothing to ground an answer in (without
//! spending a model call), and otherwise hands the docs to the model
//! untrimmed; token budgeting is the model adapter's concern, reranking
//! is the backend's.

use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::backend::{BackendError, RetrievalBackend};
use crate::models::RetrievedDoc;
use crate::summarize::{SummarizeError, Summarizer};

/// Fixed reply when retrieval comes back empty (or the question is blank).
pub const NO_CONTEXT_ANSWER: &str =
    "I couldn't find any blog posts related to that question. \
     Try rephrasing it or asking about a different topic.";

pub const DEFAULT_TOP_K: usize = 8;

#[derive(Debug, Error)]
pub enum QaError {
    #[error(transparent)]
    Retrieval(#[from] BackendError),

    #[error(transparent)]
    Model(#[from] SummarizeError),
}

/// An answer plus the documents it was grounded in. `docs` is empty exactly
/// when the answer is the refusal string.
#[derive(Debug, Clone, PartialEq)]
pub struct QaResponse {
    pub answer: String,
    pub docs: Vec<RetrievedDoc>,
}

impl QaResponse {
    pub fn is_grounded(&self) -> bool {
        !self.docs.is_empty()
    }
}

pub struct QaEngine {
    backend: Arc<dyn RetrievalBackend>,
    model: Arc<dyn Summarizer>,
}

impl QaEngine {
    pub fn new(backend: Arc<dyn RetrievalBackend>, model: Arc<dyn Summarizer>) -> Self {
        Self { backend, model }
    }

    /// Answer `question` from at most `k` retrieved documents.
    pub async fn answer(&self, question: &str, k: usize) -> Result<QaResponse, QaError> {
        let question = question.trim();
        if question.is_empty() {
            return Ok(QaResponse {
                answer: NO_CONTEXT_ANSWER.to_string(),
                docs: Vec::new(),
            });
        }

        let docs = self.backend.retrieve(question, k).await?;
        if docs.is_empty() {
            debug!("retrieval empty; refusing without a model call");
            return Ok(QaResponse {
                answer: NO_CONTEXT_ANSWER.to_string(),
                docs: Vec::new(),
            });
        }

        let answer = self.model.answer(question, &docs).await?;
        Ok(QaResponse { answer, docs })
    }
}

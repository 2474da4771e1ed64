//! Durable application state.
//!
//! [`AppState`] (the seen-post watermark plus bounded run history) is
//! persisted as a single JSON blob. Two stores implement the contract:
//! a local file written atomically via sibling-temp-then-rename, and an
//! object-store key written in one request. `open_state_store` dispatches
//! on the path shape, so `state_path` can be either `./state.json` or
//! `s3://bucket/key`.
//!
//! The store is not shared process-wide: the pipeline loads before a run
//! and saves at commit, which gives last-writer-wins across concurrent
//! runs without any locking.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::models::AppState;
use crate::object_store::{parse_s3_uri, ObjectStoreClient, ObjectStoreError};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to read state: {0}")]
    Read(String),

    #[error("failed to write state: {0}")]
    Write(String),

    #[error("state is not valid JSON: {0}")]
    Corrupt(String),

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the persisted state, or the empty state if none exists yet.
    async fn load(&self) -> Result<AppState, StateError>;

    /// Persist the state atomically: readers never observe a partial write.
    async fn save(&self, state: &AppState) -> Result<(), StateError>;
}

/// Local JSON file store. Saves go to a sibling `.tmp` file first and are
/// renamed into place, so a crash mid-write leaves the previous state intact.
pub struct LocalFileStore {
    path: PathBuf,
}

impl LocalFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StateStore for LocalFileStore {
    async fn load(&self) -> Result<AppState, StateError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|e| StateError::Corrupt(e.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppState::default()),
            Err(e) => Err(StateError::Read(e.to_string())),
        }
    }

    async fn save(&self, state: &AppState) -> Result<(), StateError> {
        let encoded = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::Write(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StateError::Write(e.to_string()))?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, encoded.as_bytes())
            .await
            .map_err(|e| StateError::Write(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StateError::Write(e.to_string()))?;
        Ok(())
    }
}

/// Object-store state: the whole blob lives under one key, and a PUT
/// replaces it in a single request.
pub struct ObjectStateStore {
    store: ObjectStoreClient,
    key: String,
}

impl ObjectStateStore {
    pub fn new(store: ObjectStoreClient, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }
}

#[async_trait]
impl StateStore for ObjectStateStore {
    async fn load(&self) -> Result<AppState, StateError> {
        match self.store.get_object(&self.key).await? {
            Some(content) => {
                serde_json::from_str(&content).map_err(|e| StateError::Corrupt(e.to_string()))
            }
            None => Ok(AppState::default()),
        }
    }

    async fn save(&self, state: &AppState) -> Result<(), StateError> {
        let encoded = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::Write(e.to_string()))?;
        self.store
            .put_object(&self.key, encoded.as_bytes(), "application/json")
            .await?;
        Ok(())
    }
}

/// Build the store matching the configured path: `s3://bucket/key` URIs get
/// the object store, anything else is treated as a local file path.
pub fn open_state_store(
    state_path: &str,
    region: &str,
    endpoint_url: Option<&str>,
    timeout: Duration,
) -> Result<Box<dyn StateStore>, StateError> {
    if let Some((bucket, key)) = parse_s3_uri(state_path) {
        if key.is_empty() {
            return Err(StateError::Read(format!(
                "state URI '{}' is missing an object key",
                state_path
            )));
        }
        let store = ObjectStoreClient::new(&bucket, region, endpoint_url, timeout)?;
        return Ok(Box::new(ObjectStateStore::new(store, key)));
    }
    Ok(Box::new(LocalFileStore::new(state_path)))
}

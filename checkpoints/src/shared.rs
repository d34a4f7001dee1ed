//! Async handle over a [`CheckpointStore`] for hosts running on tokio.
//!
//! Repository work is blocking, so every call runs on the blocking pool.
//! One store serves one root directory, so calls are serialized.

use crate::error::{CheckpointError, CheckpointResult};
use crate::model::{Checkpoint, HistoryEntry};
use crate::store::CheckpointStore;
use std::sync::{Arc, Mutex};
use tracing::warn;
use vcs::{GitBackend, VersionControlBackend};

pub struct SharedCheckpointStore<B: VersionControlBackend = GitBackend> {
    inner: Arc<Mutex<CheckpointStore<B>>>,
}

impl<B: VersionControlBackend> Clone for SharedCheckpointStore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: VersionControlBackend + 'static> SharedCheckpointStore<B> {
    pub fn new(store: CheckpointStore<B>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    async fn run<T, F>(&self, f: F) -> CheckpointResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut CheckpointStore<B>) -> CheckpointResult<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            // A panicked call leaves the repository as it was on disk.
            let mut store = inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut store)
        })
        .await?
    }

    pub async fn create_checkpoint(&self, path: impl Into<String>) -> CheckpointResult<Checkpoint> {
        let path = path.into();
        self.run(move |store| store.create_checkpoint(&path)).await
    }

    pub async fn restore_checkpoint(
        &self,
        id: impl Into<String>,
        path: impl Into<String>,
    ) -> CheckpointResult<()> {
        let (id, path) = (id.into(), path.into());
        self.run(move |store| store.restore_checkpoint(&id, &path))
            .await
    }

    pub async fn rename_checkpoint(
        &self,
        old_path: impl Into<String>,
        new_path: impl Into<String>,
    ) -> CheckpointResult<()> {
        let (old_path, new_path) = (old_path.into(), new_path.into());
        self.run(move |store| store.rename_checkpoint(&old_path, &new_path))
            .await
    }

    pub async fn delete_checkpoint(
        &self,
        id: impl Into<String>,
        path: impl Into<String>,
    ) -> CheckpointResult<()> {
        let (id, path) = (id.into(), path.into());
        self.run(move |store| store.delete_checkpoint(&id, &path))
            .await
    }

    pub async fn list_checkpoints(&self, path: impl Into<String>) -> Vec<Checkpoint> {
        let path = path.into();
        self.run(move |store| Ok(store.list_checkpoints(&path)))
            .await
            .unwrap_or_else(|e: CheckpointError| {
                warn!("Listing checkpoints failed: {}", e);
                Vec::new()
            })
    }

    pub async fn list_checkpoints_limited(
        &self,
        path: impl Into<String>,
        limit: usize,
    ) -> Vec<Checkpoint> {
        let path = path.into();
        self.run(move |store| Ok(store.list_checkpoints_limited(&path, limit)))
            .await
            .unwrap_or_else(|e: CheckpointError| {
                warn!("Listing checkpoints failed: {}", e);
                Vec::new()
            })
    }

    pub async fn history(&self, path: impl Into<String>) -> Vec<HistoryEntry> {
        let path = path.into();
        self.run(move |store| Ok(store.history(&path)))
            .await
            .unwrap_or_else(|e: CheckpointError| {
                warn!("Reading history failed: {}", e);
                Vec::new()
            })
    }

    pub async fn history_limited(&self, path: impl Into<String>, limit: usize) -> Vec<HistoryEntry> {
        let path = path.into();
        self.run(move |store| Ok(store.history_limited(&path, limit)))
            .await
            .unwrap_or_else(|e: CheckpointError| {
                warn!("Reading history failed: {}", e);
                Vec::new()
            })
    }

    pub async fn branch(&self) -> CheckpointResult<String> {
        self.run(|store| Ok(store.branch().to_string())).await
    }
}

//! File-backed saga state store.
//!
//! Each saga lives in its own `<saga_id>.json` file so writes are
//! independent. Saves write through immediately; a background task
//! flushes all in-memory snapshots on an interval and a final flush runs
//! on shutdown. Write failures are logged, never propagated: the next
//! flush retries, and the in-memory state stays authoritative.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use common::SagaId;

use crate::error::{Result, StateStoreError};
use crate::snapshot::SagaSnapshot;

/// Durable store with one file per active saga.
pub struct FileStateStore {
    dir: PathBuf,
    snapshots: RwLock<HashMap<SagaId, SagaSnapshot>>,
    /// Serializes file writes so no file is written by two tasks at once.
    write_lock: Mutex<()>,
}

impl FileStateStore {
    /// Opens the store, creating the directory if needed and recovering
    /// every snapshot already on disk.
    ///
    /// Unreadable or unparseable files are skipped with a warning.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StateStoreError::Directory {
                dir: dir.clone(),
                source,
            })?;

        let snapshots = recover(&dir).await?;
        tracing::info!(
            dir = %dir.display(),
            recovered = snapshots.len(),
            "saga state store opened"
        );

        Ok(Arc::new(Self {
            dir,
            snapshots: RwLock::new(snapshots),
            write_lock: Mutex::new(()),
        }))
    }

    /// Saves a snapshot: updates memory and writes its file immediately.
    pub async fn save(&self, snapshot: SagaSnapshot) {
        let saga_id = snapshot.saga_id;
        self.snapshots
            .write()
            .await
            .insert(saga_id, snapshot.clone());
        self.persist(&snapshot).await;
    }

    /// Removes a saga's record from memory and disk.
    ///
    /// Called after successful completion or successful compensation.
    pub async fn remove(&self, saga_id: SagaId) {
        self.snapshots.write().await.remove(&saga_id);
        let path = self.path_for(saga_id);
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(%saga_id, "saga record removed"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                tracing::warn!(%saga_id, %error, "failed to remove saga record");
            }
        }
    }

    /// Returns the snapshot for a saga, if present.
    pub async fn get(&self, saga_id: SagaId) -> Option<SagaSnapshot> {
        self.snapshots.read().await.get(&saga_id).cloned()
    }

    /// Returns every active snapshot.
    pub async fn active(&self) -> Vec<SagaSnapshot> {
        self.snapshots.read().await.values().cloned().collect()
    }

    /// Returns the number of active sagas.
    pub async fn active_count(&self) -> usize {
        self.snapshots.read().await.len()
    }

    /// Writes every in-memory snapshot to disk.
    ///
    /// Returns the number of snapshots written.
    pub async fn flush_all(&self) -> usize {
        let snapshots = self.active().await;
        let count = snapshots.len();
        for snapshot in snapshots {
            self.persist(&snapshot).await;
        }
        if count > 0 {
            tracing::debug!(count, "flushed saga snapshots");
        }
        count
    }

    /// Spawns the periodic flusher; it performs a final flush when the
    /// shutdown signal arrives.
    pub fn spawn_flusher(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.reset();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        store.flush_all().await;
                    }
                    _ = shutdown.recv() => {
                        store.flush_all().await;
                        break;
                    }
                }
            }
        })
    }

    /// Returns the state directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, saga_id: SagaId) -> PathBuf {
        self.dir.join(format!("{saga_id}.json"))
    }

    async fn persist(&self, snapshot: &SagaSnapshot) {
        let path = self.path_for(snapshot.saga_id);
        let bytes = match serde_json::to_vec_pretty(snapshot) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(saga_id = %snapshot.saga_id, %error, "failed to serialize snapshot");
                return;
            }
        };
        let _guard = self.write_lock.lock().await;
        if let Err(error) = tokio::fs::write(&path, bytes).await {
            tracing::warn!(
                saga_id = %snapshot.saga_id,
                path = %path.display(),
                %error,
                "failed to persist snapshot, will retry on next flush"
            );
        }
    }
}

async fn recover(dir: &Path) -> Result<HashMap<SagaId, SagaSnapshot>> {
    let mut snapshots = HashMap::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|source| StateStoreError::Directory {
            dir: dir.to_path_buf(),
            source,
        })?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        match read_snapshot(&path).await {
            Ok(snapshot) => {
                tracing::info!(
                    saga_id = %snapshot.saga_id,
                    state = %snapshot.state,
                    "recovered saga record"
                );
                snapshots.insert(snapshot.saga_id, snapshot);
            }
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    %error,
                    "skipping unreadable saga record"
                );
            }
        }
    }

    Ok(snapshots)
}

async fn read_snapshot(path: &Path) -> Result<SagaSnapshot> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

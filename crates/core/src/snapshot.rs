//! Durable JSON snapshots of task metadata.
//!
//! Each domain store is mirrored to one file holding a JSON array of
//! [`TaskSnapshot`] records (subscriber channels are never persisted).
//! Snapshots recover *visibility* after a restart, not execution:
//! reloaded tasks have no runner attached, so any task persisted as
//! `pending` or `running` is marked `failed` with
//! `"interrupted by restart"` during reload.
//!
//! A corrupt or missing file is logged and treated as an empty store,
//! never a startup failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::CoreError;
use crate::store::TaskStore;
use crate::task::{TaskSnapshot, TaskStatus};

/// How long the writer waits after a dirty notification before
/// rewriting the file, coalescing bursts of mutations.
const COALESCE_INTERVAL: Duration = Duration::from_millis(500);

/// Load a store's snapshot file and insert every record.
///
/// Orphaned tasks (persisted while `pending`/`running`) are rewritten
/// as `failed` before insertion — their execution did not survive the
/// restart and no runner will be reattached.
pub fn load_store(store: &TaskStore, path: &Path) -> usize {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read snapshot file, starting empty");
            return 0;
        }
    };

    let snapshots: Vec<TaskSnapshot> = match serde_json::from_slice(&raw) {
        Ok(snapshots) => snapshots,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Corrupt snapshot file, starting empty");
            return 0;
        }
    };

    let count = snapshots.len();
    for mut snap in snapshots {
        if !snap.status.is_terminal() {
            snap.status = TaskStatus::Failed;
            snap.error = Some("interrupted by restart".to_string());
            snap.completed_at = Some(chrono::Utc::now());
        }
        store.insert_reloaded(snap);
    }

    tracing::info!(path = %path.display(), count, kind = %store.kind(), "Loaded task snapshot");
    count
}

/// Serialize the store's current tasks to `path`.
///
/// Writes to a sibling temp file first, then renames, so a crash
/// mid-write never leaves a truncated snapshot behind.
pub fn save_store(store: &TaskStore, path: &Path) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CoreError::Internal(format!("Failed to create snapshot dir: {e}")))?;
    }

    let snapshots = store.list(None);
    let json = serde_json::to_vec_pretty(&snapshots)
        .map_err(|e| CoreError::Internal(format!("Failed to serialize snapshot: {e}")))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)
        .map_err(|e| CoreError::Internal(format!("Failed to write snapshot: {e}")))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| CoreError::Internal(format!("Failed to replace snapshot: {e}")))?;
    Ok(())
}

/// Background service mirroring one store to its snapshot file.
///
/// Waits on the store's dirty signal, coalesces further mutations for a
/// short interval, then rewrites the file. On cancellation it flushes
/// one final snapshot before exiting.
pub struct SnapshotWriter {
    store: Arc<TaskStore>,
    path: PathBuf,
}

impl SnapshotWriter {
    pub fn new(store: Arc<TaskStore>, path: PathBuf) -> Self {
        Self { store, path }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let dirty = self.store.dirty_signal();
        loop {
            tokio::select! {
                _ = dirty.notified() => {
                    tokio::time::sleep(COALESCE_INTERVAL).await;
                    self.flush();
                }
                _ = cancel.cancelled() => {
                    self.flush();
                    tracing::info!(path = %self.path.display(), "Snapshot writer shut down");
                    break;
                }
            }
        }
    }

    fn flush(&self) {
        if let Err(e) = save_store(&self.store, &self.path) {
            tracing::error!(path = %self.path.display(), error = %e, "Failed to persist task snapshot");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Concurrency-safe task registry for one job domain.
//!
//! The store's mutex covers map structure only (create, lookup,
//! delete); task field mutation is the exclusive concern of the task's
//! runner. Lookups never suspend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::task::{Task, TaskSnapshot, TaskStatus};
use crate::types::{TaskId, TaskKind};

/// Registry of all live tasks for one [`TaskKind`].
///
/// Designed to be wrapped in `Arc` and shared across handlers and
/// runners. One instance per domain is constructed at process start and
/// injected explicitly; there is no ambient singleton.
pub struct TaskStore {
    kind: TaskKind,
    tasks: Mutex<HashMap<TaskId, Arc<Task>>>,
    /// Notified after every registry or task mutation; the snapshot
    /// writer coalesces these into periodic file rewrites.
    dirty: Arc<Notify>,
}

impl TaskStore {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            tasks: Mutex::new(HashMap::new()),
            dirty: Arc::new(Notify::new()),
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Handle the snapshot writer waits on to observe mutations.
    pub fn dirty_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.dirty)
    }

    /// Create a new `pending` task capturing `payload` verbatim.
    pub fn create(&self, payload: serde_json::Value) -> Arc<Task> {
        let task = Arc::new(Task::new(self.kind, payload, Some(Arc::clone(&self.dirty))));
        self.tasks
            .lock()
            .expect("task registry poisoned")
            .insert(task.id.clone(), Arc::clone(&task));
        self.dirty.notify_one();
        task
    }

    /// Insert a task rebuilt from a persisted snapshot (restart path).
    pub fn insert_reloaded(&self, snapshot: TaskSnapshot) {
        let task = Arc::new(Task::from_snapshot(snapshot, Some(Arc::clone(&self.dirty))));
        self.tasks
            .lock()
            .expect("task registry poisoned")
            .insert(task.id.clone(), task);
    }

    pub fn get(&self, id: &str) -> Option<Arc<Task>> {
        self.tasks
            .lock()
            .expect("task registry poisoned")
            .get(id)
            .cloned()
    }

    /// Remove a task. Returns `false` (not an error) for unknown ids.
    pub fn delete(&self, id: &str) -> bool {
        let removed = self
            .tasks
            .lock()
            .expect("task registry poisoned")
            .remove(id)
            .is_some();
        if removed {
            self.dirty.notify_one();
        }
        removed
    }

    /// Remove every listed id that exists, returning the count removed.
    pub fn delete_many(&self, ids: &[TaskId]) -> usize {
        let mut tasks = self.tasks.lock().expect("task registry poisoned");
        let count = ids.iter().filter(|id| tasks.remove(*id).is_some()).count();
        drop(tasks);
        if count > 0 {
            self.dirty.notify_one();
        }
        count
    }

    /// Remove all tasks, or only those matching `status`. Returns the
    /// count removed.
    pub fn clear(&self, status: Option<TaskStatus>) -> usize {
        let mut tasks = self.tasks.lock().expect("task registry poisoned");
        let count = match status {
            None => {
                let count = tasks.len();
                tasks.clear();
                count
            }
            Some(status) => {
                let before = tasks.len();
                tasks.retain(|_, task| task.status() != status);
                before - tasks.len()
            }
        };
        drop(tasks);
        if count > 0 {
            self.dirty.notify_one();
        }
        count
    }

    /// Snapshots of all tasks, optionally filtered by status. Order is
    /// unspecified; callers sort as needed.
    pub fn list(&self, status: Option<TaskStatus>) -> Vec<TaskSnapshot> {
        self.tasks
            .lock()
            .expect("task registry poisoned")
            .values()
            .filter(|task| status.map_or(true, |s| task.status() == s))
            .map(|task| task.snapshot())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().expect("task registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Schedule TTL deletion for every task that is already terminal.
    ///
    /// Used after a snapshot reload: reloaded tasks have no runner to
    /// schedule their expiry, and the orphan policy makes them all
    /// terminal.
    pub fn expire_terminal_after(self: &Arc<Self>, ttl: Duration) {
        let ids: Vec<TaskId> = self
            .tasks
            .lock()
            .expect("task registry poisoned")
            .values()
            .filter(|task| task.is_terminal())
            .map(|task| task.id.clone())
            .collect();
        for id in ids {
            self.expire_after(id, ttl);
        }
    }

    /// Delete `id` after `ttl` elapses. Spawned after a task reaches a
    /// terminal state; idempotent — if the task was already deleted
    /// explicitly, the deferred delete is a harmless no-op.
    pub fn expire_after(self: &Arc<Self>, id: TaskId, ttl: Duration) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if store.delete(&id) {
                tracing::debug!(task_id = %id, kind = %store.kind, "Expired task removed");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

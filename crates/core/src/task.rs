//! The task unit: lifecycle state machine and per-task progress fan-out.
//!
//! A [`Task`] has exactly one writer — the runner supervising its
//! execution — which drives it through
//! `pending → running → {completed|failed|cancelled}`. Every other
//! actor only reads [`TaskSnapshot`]s or sets the cancel flag. All
//! transitions attempted from a terminal state are no-ops; this guards
//! against double-finalization races without escalating them.
//!
//! Progress delivery is lossy by design: each subscriber gets a bounded
//! channel and a full channel silently drops the event rather than
//! blocking the publisher. Terminal events are never permanently
//! missed — the last one is retained and replayed to late joiners.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};

use crate::types::{TaskId, TaskKind, Timestamp};

/// Bounded capacity of each subscriber channel.
pub const SUBSCRIBER_CAPACITY: usize = 200;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a task. `Completed`, `Failed`, and `Cancelled`
/// are terminal: once reached, no further transition is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::error::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(crate::error::CoreError::Validation(format!(
                "Invalid status: \"{other}\" (expected pending, running, completed, failed, or cancelled)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskEvent
// ---------------------------------------------------------------------------

/// Event published on a task's progress bus and relayed to stream
/// subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    /// One of `status`, `progress`, `completed`, `failed`, `cancelled`
    /// (plus `snapshot`, emitted only by the streaming layer on attach).
    #[serde(rename = "type")]
    pub event_type: String,
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// TaskSnapshot
// ---------------------------------------------------------------------------

/// Read-only projection of a task's metadata.
///
/// This is what poll endpoints return and what the snapshot file
/// persists (subscriber channels are ephemeral and never serialized).
/// Callers must not assume a snapshot remains current.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The originating request, captured verbatim at creation.
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A live subscription to a task's progress bus.
///
/// Dropping the receiver closes the channel; the publisher prunes
/// closed channels on the next publish. Call
/// [`Task::detach`] with `id` for eager removal.
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<TaskEvent>,
}

/// Mutable task state, guarded by one mutex. Held only for map-free,
/// non-suspending sections; never across an `.await`.
struct TaskState {
    status: TaskStatus,
    progress: u8,
    message: Option<String>,
    result: Option<serde_json::Value>,
    error: Option<String>,
    started_at: Option<Timestamp>,
    completed_at: Option<Timestamp>,
    cancel_requested: bool,
    final_event: Option<TaskEvent>,
    subscribers: Vec<(u64, mpsc::Sender<TaskEvent>)>,
    next_subscriber_id: u64,
}

/// One unit of submitted generative work.
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Originating request, never mutated after creation.
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
    state: Mutex<TaskState>,
    /// Pinged after every mutation so the snapshot writer can coalesce
    /// persistence. `None` for stores without persistence (tests).
    persist: Option<Arc<Notify>>,
}

impl Task {
    /// Create a new task in `pending` with progress 0.
    pub fn new(kind: TaskKind, payload: serde_json::Value, persist: Option<Arc<Notify>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            kind,
            payload,
            created_at: chrono::Utc::now(),
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                progress: 0,
                message: None,
                result: None,
                error: None,
                started_at: None,
                completed_at: None,
                cancel_requested: false,
                final_event: None,
                subscribers: Vec::new(),
                next_subscriber_id: 0,
            }),
            persist,
        }
    }

    /// Rebuild a task from a persisted snapshot (restart recovery).
    ///
    /// No runner is attached to reloaded tasks; the store applies the
    /// orphan policy to any reloaded `pending`/`running` task.
    pub fn from_snapshot(snap: TaskSnapshot, persist: Option<Arc<Notify>>) -> Self {
        Self {
            id: snap.task_id,
            kind: snap.kind,
            payload: snap.payload,
            created_at: snap.created_at,
            state: Mutex::new(TaskState {
                status: snap.status,
                progress: snap.progress,
                message: snap.message,
                result: snap.result,
                error: snap.error,
                started_at: snap.started_at,
                completed_at: snap.completed_at,
                cancel_requested: false,
                final_event: None,
                subscribers: Vec::new(),
                next_subscriber_id: 0,
            }),
            persist,
        }
    }

    // -- reads --------------------------------------------------------------

    pub fn status(&self) -> TaskStatus {
        self.state.lock().expect("task state poisoned").status
    }

    pub fn progress(&self) -> u8 {
        self.state.lock().expect("task state poisoned").progress
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn cancel_requested(&self) -> bool {
        self.state
            .lock()
            .expect("task state poisoned")
            .cancel_requested
    }

    /// The retained terminal event, if the task has finished.
    pub fn final_event(&self) -> Option<TaskEvent> {
        self.state
            .lock()
            .expect("task state poisoned")
            .final_event
            .clone()
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let state = self.state.lock().expect("task state poisoned");
        TaskSnapshot {
            task_id: self.id.clone(),
            kind: self.kind,
            status: state.status,
            progress: state.progress,
            message: state.message.clone(),
            payload: self.payload.clone(),
            result: state.result.clone(),
            error: state.error.clone(),
            created_at: self.created_at,
            started_at: state.started_at,
            completed_at: state.completed_at,
        }
    }

    // -- subscriptions ------------------------------------------------------

    /// Attach a new bounded subscriber channel.
    ///
    /// If the task is already terminal, the retained final event is
    /// replayed into the channel exactly once, so late joiners never
    /// miss the terminal notification.
    pub fn attach(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let mut state = self.state.lock().expect("task state poisoned");
        if let Some(final_event) = &state.final_event {
            // Capacity is fresh, the send cannot fail.
            let _ = tx.try_send(final_event.clone());
        }
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;
        state.subscribers.push((id, tx));
        Subscription { id, receiver: rx }
    }

    /// Remove a subscriber channel. Unknown ids are no-ops.
    pub fn detach(&self, subscription_id: u64) {
        let mut state = self.state.lock().expect("task state poisoned");
        state.subscribers.retain(|(id, _)| *id != subscription_id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .expect("task state poisoned")
            .subscribers
            .len()
    }

    // -- transitions (runner only) ------------------------------------------

    /// `pending → running`. Sets `started_at` and publishes a `status`
    /// event.
    pub fn start(&self) {
        let mut state = self.state.lock().expect("task state poisoned");
        if state.status != TaskStatus::Pending {
            tracing::debug!(task_id = %self.id, status = %state.status, "Ignoring start on non-pending task");
            return;
        }
        state.status = TaskStatus::Running;
        state.started_at = Some(chrono::Utc::now());
        let event = self.event(&state, "status");
        Self::publish(&mut state, event);
        drop(state);
        self.mark_dirty();
    }

    /// Relay a progress report while running.
    ///
    /// Upstream percentages that regress or repeat are clamped to the
    /// current value, so published progress is monotonically
    /// non-decreasing for the task's lifetime.
    pub fn update_progress(&self, progress: u8, message: Option<String>) {
        let mut state = self.state.lock().expect("task state poisoned");
        if state.status != TaskStatus::Running {
            tracing::debug!(task_id = %self.id, status = %state.status, "Ignoring progress on non-running task");
            return;
        }
        state.progress = state.progress.max(progress.min(100));
        if message.is_some() {
            state.message = message;
        }
        let event = self.event(&state, "progress");
        Self::publish(&mut state, event);
        drop(state);
        self.mark_dirty();
    }

    /// Terminal transition to `completed`. Forces progress to 100 and
    /// sets the result exactly once.
    pub fn complete(&self, result: serde_json::Value, message: Option<String>) {
        self.finalize(TaskStatus::Completed, "completed", |state| {
            state.progress = 100;
            state.result = Some(result);
            state.message = message;
        });
    }

    /// Terminal transition to `failed`. Sets the error message exactly
    /// once.
    pub fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        self.finalize(TaskStatus::Failed, "failed", |state| {
            state.message = Some(format!("Generation failed: {error}"));
            state.error = Some(error);
        });
    }

    /// Request cooperative cancellation. Observed by the runner at its
    /// next checkpoint; callable by anyone, any number of times.
    pub fn request_cancel(&self) {
        let mut state = self.state.lock().expect("task state poisoned");
        state.cancel_requested = true;
    }

    /// Terminal transition to `cancelled`, driven by the runner once it
    /// observes the cancel flag.
    pub fn finish_cancelled(&self) {
        self.finalize(TaskStatus::Cancelled, "cancelled", |state| {
            state.message = Some("Task cancelled".to_string());
        });
    }

    // -- internals ----------------------------------------------------------

    /// Apply a terminal transition: set fields via `apply`, stamp
    /// `completed_at`, publish and retain the final event. A no-op if
    /// the task is already terminal.
    fn finalize(&self, status: TaskStatus, event_type: &str, apply: impl FnOnce(&mut TaskState)) {
        let mut state = self.state.lock().expect("task state poisoned");
        if state.status.is_terminal() {
            tracing::debug!(
                task_id = %self.id,
                current = %state.status,
                attempted = %status,
                "Ignoring transition on terminal task",
            );
            return;
        }
        state.status = status;
        state.completed_at = Some(chrono::Utc::now());
        apply(&mut state);
        let event = self.event(&state, event_type);
        state.final_event = Some(event.clone());
        Self::publish(&mut state, event);
        drop(state);
        self.mark_dirty();
    }

    /// Fan an event out to every attached subscriber with a
    /// non-blocking send. Full channels drop the event; closed channels
    /// are pruned.
    fn publish(state: &mut TaskState, event: TaskEvent) {
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        for (_, tx) in &state.subscribers {
            let _ = tx.try_send(event.clone());
        }
    }

    fn event(&self, state: &TaskState, event_type: &str) -> TaskEvent {
        TaskEvent {
            event_type: event_type.to_string(),
            task_id: self.id.clone(),
            status: state.status,
            progress: state.progress,
            message: state.message.clone(),
            result: state.result.clone(),
            error: state.error.clone(),
        }
    }

    fn mark_dirty(&self) {
        if let Some(persist) = &self.persist {
            persist.notify_one();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

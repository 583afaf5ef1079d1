//! The task runner: one supervised execution per submitted task.
//!
//! The runner is the task's single writer. It leases a credential,
//! submits the job to the generation backend, relays the event stream
//! into the task's state machine, and finalizes exactly one terminal
//! transition. Every failure path lands in `fail`; nothing escapes to
//! the HTTP caller, who already received 202.
//!
//! Cancellation is cooperative: the cancel flag is checked at every
//! stream checkpoint and a per-task `CancellationToken` is raced
//! against the backend I/O so an idle stream cannot delay it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use genrelay_backend::{
    BackendEvent, CostClass, Credential, CredentialPool, GenerationBackend, JobSpec,
};
use genrelay_core::extract;
use genrelay_core::store::TaskStore;
use genrelay_core::task::Task;
use genrelay_core::types::{TaskId, TaskKind};
use tokio_util::sync::CancellationToken;

/// Progress ceiling while the artifact is still outstanding. Only a
/// terminal completion may report 100.
const PRE_ARTIFACT_CAP: u8 = 99;

/// Supervises backend executions for submitted tasks.
pub struct TaskRunner {
    backend: Arc<dyn GenerationBackend>,
    credentials: Arc<dyn CredentialPool>,
    /// How long a terminal task stays visible before TTL deletion.
    ttl: Duration,
    /// Cancellation tokens of in-flight executions.
    active: Mutex<HashMap<TaskId, CancellationToken>>,
}

impl TaskRunner {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        credentials: Arc<dyn CredentialPool>,
        ttl: Duration,
    ) -> Self {
        Self {
            backend,
            credentials,
            ttl,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Start supervising `task`. Returns immediately; the execution
    /// runs on its own tokio task and schedules the TTL deletion once
    /// it reaches a terminal state.
    pub fn spawn(self: &Arc<Self>, store: Arc<TaskStore>, task: Arc<Task>, spec: JobSpec) {
        let runner = Arc::clone(self);
        let cancel = CancellationToken::new();
        self.active
            .lock()
            .expect("active map poisoned")
            .insert(task.id.clone(), cancel.clone());

        tokio::spawn(async move {
            runner.execute(&task, spec, &cancel).await;
            runner
                .active
                .lock()
                .expect("active map poisoned")
                .remove(&task.id);
            store.expire_after(task.id.clone(), runner.ttl);
        });
    }

    /// Request cooperative cancellation of `task`. Sets the cancel flag
    /// and fires the execution's token so a suspended backend call
    /// observes it immediately. Safe to call at any time.
    pub fn cancel(&self, task: &Task) {
        task.request_cancel();
        if let Some(token) = self
            .active
            .lock()
            .expect("active map poisoned")
            .get(&task.id)
        {
            token.cancel();
        }
        tracing::info!(task_id = %task.id, "Cancellation requested");
    }

    async fn execute(&self, task: &Arc<Task>, spec: JobSpec, cancel: &CancellationToken) {
        if task.cancel_requested() {
            task.finish_cancelled();
            return;
        }

        let Some(credential) = self.credentials.lease(task.kind.as_str()).await else {
            task.fail(format!(
                "rate limited: no credential available for {} generation",
                task.kind
            ));
            return;
        };

        task.start();

        let stream = tokio::select! {
            _ = cancel.cancelled() => {
                task.finish_cancelled();
                return;
            }
            result = self.backend.submit(&credential, &spec) => match result {
                Ok(stream) => stream,
                Err(e) => {
                    task.fail(e.to_string());
                    return;
                }
            },
        };

        let mut stream = stream;
        // Accumulated delta text, mined for progress pushes and, if the
        // stream ends without a structured artifact, the artifact URL.
        let mut transcript = String::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    task.finish_cancelled();
                    return;
                }
                next = stream.next() => next,
            };
            if task.cancel_requested() {
                task.finish_cancelled();
                return;
            }

            match next {
                None => break,
                Some(Err(e)) => {
                    task.fail(e.to_string());
                    return;
                }
                Some(Ok(BackendEvent::Progress { percent, message })) => {
                    task.update_progress(percent.min(PRE_ARTIFACT_CAP), message);
                }
                Some(Ok(BackendEvent::Delta { text })) => {
                    transcript.push_str(&text);
                    if let Some(percent) = extract::progress_from_text(&transcript) {
                        let percent = percent.min(PRE_ARTIFACT_CAP);
                        task.update_progress(
                            percent,
                            Some(format!("Generating, {percent}% complete")),
                        );
                    }
                }
                Some(Ok(BackendEvent::Artifact { artifact })) => {
                    self.finish(task, &credential, artifact).await;
                    return;
                }
                Some(Ok(BackendEvent::Done)) => break,
            }
        }

        // Stream ended without a structured artifact; fall back to the
        // extraction heuristics over the accumulated text.
        match extract::artifact_from_content(&transcript) {
            Some(artifact) => self.finish(task, &credential, artifact).await,
            None => task.fail("Backend stream ended without an artifact"),
        }
    }

    /// Complete the task with `artifact` and report credential
    /// consumption. A consumption failure is logged; the task stays
    /// completed.
    async fn finish(&self, task: &Arc<Task>, credential: &Credential, artifact: extract::Artifact) {
        let result = serde_json::to_value(&artifact)
            .unwrap_or_else(|_| serde_json::json!({ "url": artifact.url }));
        task.complete(result, Some("Generation complete".to_string()));
        tracing::info!(task_id = %task.id, kind = %task.kind, "Task completed");

        let cost = match task.kind {
            TaskKind::Video => CostClass::High,
            TaskKind::Image => CostClass::Low,
        };
        if let Err(e) = self.credentials.consume(credential, cost).await {
            tracing::warn!(task_id = %task.id, error = %e, "Failed to record credential usage");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;

    use genrelay_backend::{BackendError, EventStream, StaticCredentialPool};
    use genrelay_core::task::TaskStatus;

    /// Backend yielding pre-scripted event streams, one per submission.
    /// An empty queue yields a stream that never produces.
    struct ScriptedBackend {
        scripts: Mutex<VecDeque<Vec<Result<BackendEvent, BackendError>>>>,
    }

    impl ScriptedBackend {
        fn new(scripts: Vec<Vec<Result<BackendEvent, BackendError>>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
            })
        }
    }

    #[async_trait::async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn submit(
            &self,
            _credential: &Credential,
            _spec: &JobSpec,
        ) -> Result<EventStream, BackendError> {
            match self.scripts.lock().unwrap().pop_front() {
                Some(events) => Ok(Box::pin(futures::stream::iter(events))),
                None => Ok(Box::pin(futures::stream::pending())),
            }
        }
    }

    fn pool_with_default() -> Arc<StaticCredentialPool> {
        let mut pools = HashMap::new();
        pools.insert("default".to_string(), vec![Credential::new("key-1")]);
        Arc::new(StaticCredentialPool::new(pools))
    }

    fn spec() -> JobSpec {
        JobSpec {
            model: "gen-video-1".to_string(),
            prompt: "a cat".to_string(),
            image_url: None,
            options: serde_json::Value::Null,
        }
    }

    fn runner(
        backend: Arc<dyn GenerationBackend>,
        credentials: Arc<dyn CredentialPool>,
    ) -> Arc<TaskRunner> {
        Arc::new(TaskRunner::new(
            backend,
            credentials,
            Duration::from_secs(3600),
        ))
    }

    async fn wait_terminal(task: &Arc<Task>) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !task.is_terminal() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("task should reach a terminal state");
    }

    #[tokio::test]
    async fn structured_events_drive_task_to_completion() {
        let backend = ScriptedBackend::new(vec![vec![
            Ok(BackendEvent::Progress {
                percent: 42,
                message: None,
            }),
            Ok(BackendEvent::Artifact {
                artifact: extract::Artifact {
                    url: "https://x/out.mp4".to_string(),
                    thumbnail_url: None,
                },
            }),
        ]]);
        let store = Arc::new(TaskStore::new(TaskKind::Video));
        let task = store.create(serde_json::json!({"prompt": "a cat"}));
        runner(backend, pool_with_default()).spawn(Arc::clone(&store), Arc::clone(&task), spec());

        wait_terminal(&task).await;
        let snap = task.snapshot();
        assert_eq!(snap.status, TaskStatus::Completed);
        assert_eq!(snap.progress, 100);
        assert_eq!(snap.result.unwrap()["url"], "https://x/out.mp4");
    }

    #[tokio::test]
    async fn delta_text_yields_progress_and_extracted_artifact() {
        let backend = ScriptedBackend::new(vec![vec![
            Ok(BackendEvent::Delta {
                text: "进度 35%...".to_string(),
            }),
            Ok(BackendEvent::Delta {
                text: " done [video](https://x/clip.mp4)".to_string(),
            }),
            Ok(BackendEvent::Done),
        ]]);
        let store = Arc::new(TaskStore::new(TaskKind::Video));
        let task = store.create(serde_json::json!({}));
        runner(backend, pool_with_default()).spawn(Arc::clone(&store), Arc::clone(&task), spec());

        wait_terminal(&task).await;
        let snap = task.snapshot();
        assert_eq!(snap.status, TaskStatus::Completed);
        assert_eq!(snap.result.unwrap()["url"], "https://x/clip.mp4");
    }

    #[tokio::test]
    async fn stream_without_artifact_fails_the_task() {
        let backend = ScriptedBackend::new(vec![vec![Ok(BackendEvent::Done)]]);
        let store = Arc::new(TaskStore::new(TaskKind::Video));
        let task = store.create(serde_json::json!({}));
        runner(backend, pool_with_default()).spawn(Arc::clone(&store), Arc::clone(&task), spec());

        wait_terminal(&task).await;
        let snap = task.snapshot();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert!(snap.error.unwrap().contains("without an artifact"));
    }

    #[tokio::test]
    async fn stream_error_fails_the_task() {
        let backend = ScriptedBackend::new(vec![vec![
            Ok(BackendEvent::Progress {
                percent: 10,
                message: None,
            }),
            Err(BackendError::Stream("connection reset".to_string())),
        ]]);
        let store = Arc::new(TaskStore::new(TaskKind::Video));
        let task = store.create(serde_json::json!({}));
        runner(backend, pool_with_default()).spawn(Arc::clone(&store), Arc::clone(&task), spec());

        wait_terminal(&task).await;
        let snap = task.snapshot();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert!(snap.error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn exhausted_pool_fails_with_rate_limit_classification() {
        let backend = ScriptedBackend::new(vec![]);
        let empty_pool = Arc::new(StaticCredentialPool::new(HashMap::new()));
        let store = Arc::new(TaskStore::new(TaskKind::Video));
        let task = store.create(serde_json::json!({}));
        runner(backend, empty_pool).spawn(Arc::clone(&store), Arc::clone(&task), spec());

        wait_terminal(&task).await;
        let snap = task.snapshot();
        assert_eq!(snap.status, TaskStatus::Failed);
        assert!(snap.error.unwrap().starts_with("rate limited"));
    }

    #[tokio::test]
    async fn cancel_interrupts_a_hanging_stream() {
        // No script: the backend's stream never yields.
        let backend = ScriptedBackend::new(vec![]);
        let store = Arc::new(TaskStore::new(TaskKind::Video));
        let task = store.create(serde_json::json!({}));
        let runner = runner(backend, pool_with_default());
        runner.spawn(Arc::clone(&store), Arc::clone(&task), spec());

        tokio::time::timeout(Duration::from_secs(2), async {
            while task.status() != TaskStatus::Running {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("task should start running");

        runner.cancel(&task);
        wait_terminal(&task).await;
        assert_eq!(task.status(), TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn completion_consumes_the_credential() {
        let backend = ScriptedBackend::new(vec![vec![Ok(BackendEvent::Artifact {
            artifact: extract::Artifact {
                url: "https://x/out.mp4".to_string(),
                thumbnail_url: None,
            },
        })]]);
        let pool = pool_with_default();
        let store = Arc::new(TaskStore::new(TaskKind::Video));
        let task = store.create(serde_json::json!({}));
        runner(backend, Arc::clone(&pool) as Arc<dyn CredentialPool>)
            .spawn(Arc::clone(&store), Arc::clone(&task), spec());

        wait_terminal(&task).await;
        assert_eq!(
            pool.usage_of(&Credential::new("key-1")),
            CostClass::High.weight()
        );
    }
}

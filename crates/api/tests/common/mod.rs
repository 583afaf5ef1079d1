//! Shared helpers for API integration tests.
//!
//! Builds the real application router (same middleware stack as
//! `main.rs`) over in-memory stores, a scripted generation backend,
//! and a static credential pool.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use genrelay_api::config::ServerConfig;
use genrelay_api::router::build_app_router;
use genrelay_api::runner::TaskRunner;
use genrelay_api::state::AppState;
use genrelay_backend::{
    BackendError, BackendEvent, Credential, EventStream, GenerationBackend, JobSpec,
    StaticCredentialPool,
};
use genrelay_core::extract::Artifact;
use genrelay_core::store::TaskStore;
use genrelay_core::types::TaskKind;
use genrelay_core::TaskDirectory;

/// Build a test `ServerConfig` with safe defaults. No app keys, so
/// auth is disabled unless a test opts in.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        backend_url: "http://localhost:8080".to_string(),
        snapshot_dir: std::path::PathBuf::from("data"),
        task_ttl_secs: 3600,
        stream_heartbeat_secs: 15,
        app_keys: Vec::new(),
        credentials: HashMap::new(),
    }
}

/// One `video` and one `default` credential.
pub fn default_pools() -> HashMap<String, Vec<Credential>> {
    let mut pools = HashMap::new();
    pools.insert("video".to_string(), vec![Credential::new("test-video-key")]);
    pools.insert("default".to_string(), vec![Credential::new("test-key")]);
    pools
}

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

/// Backend yielding pre-scripted event streams, one per submission, in
/// order. Once the scripts run out, further submissions get a stream
/// that never yields (useful for cancellation tests).
pub struct ScriptedBackend {
    scripts: Mutex<VecDeque<Vec<Result<BackendEvent, BackendError>>>>,
}

impl ScriptedBackend {
    pub fn new(scripts: Vec<Vec<Result<BackendEvent, BackendError>>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
        })
    }

    /// A backend whose streams never produce anything.
    pub fn hanging() -> Arc<Self> {
        Self::new(Vec::new())
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

/// Progress 42, then a final artifact at `url`.
pub fn completing_script(url: &str) -> Vec<Result<BackendEvent, BackendError>> {
    vec![
        Ok(BackendEvent::Progress {
            percent: 42,
            message: None,
        }),
        Ok(BackendEvent::Artifact {
            artifact: Artifact {
                url: url.to_string(),
                thumbnail_url: None,
            },
        }),
    ]
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

/// Build the full application router over the given backend, with the
/// default pools and test config.
pub fn build_test_app(backend: Arc<dyn GenerationBackend>) -> Router {
    build_test_app_with(backend, default_pools(), test_config())
}

/// Build the full application router with explicit pools and config.
///
/// This mirrors the construction in `main.rs` so integration tests
/// exercise the same middleware stack (CORS, request ID, timeout,
/// tracing, panic recovery) that production uses.
pub fn build_test_app_with(
    backend: Arc<dyn GenerationBackend>,
    pools: HashMap<String, Vec<Credential>>,
    config: ServerConfig,
) -> Router {
    let video_store = Arc::new(TaskStore::new(TaskKind::Video));
    let image_store = Arc::new(TaskStore::new(TaskKind::Image));
    let directory = Arc::new(TaskDirectory::new(vec![video_store, image_store]));

    let credentials = Arc::new(StaticCredentialPool::new(pools));
    let runner = Arc::new(TaskRunner::new(
        backend,
        credentials,
        Duration::from_secs(config.task_ttl_secs),
    ));

    let state = AppState {
        directory,
        runner,
        config: Arc::new(config.clone()),
    };
    build_app_router(state, &config)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post_json_with_key(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    key: &str,
) -> Response {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {key}"))
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn delete(app: Router, uri: &str) -> Response {
    app.oneshot(
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Poll the status endpoint until the task is terminal, returning the
/// final body. Panics after ~2 seconds.
pub async fn wait_for_terminal(app: &Router, uri: &str) -> serde_json::Value {
    for _ in 0..200 {
        let response = get(app.clone(), uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let status = json["data"]["status"].as_str().unwrap().to_string();
        if matches!(status.as_str(), "completed" | "failed" | "cancelled") {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task at {uri} did not reach a terminal state");
}

//! Handlers for the per-domain `/{kind}/tasks` resource.
//!
//! Submission is asynchronous: the handler validates, registers the
//! task, spawns its runner, and answers 202 with the id before any
//! backend work happens. Mutating endpoints require an application key
//! via [`AppKey`]; reads and the SSE stream are public.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::Stream;
use genrelay_backend::JobSpec;
use genrelay_core::error::CoreError;
use genrelay_core::task::{TaskSnapshot, TaskStatus};
use genrelay_core::types::{TaskId, TaskKind};
use serde::Deserialize;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AppKey;
use crate::response::DataResponse;
use crate::state::AppState;
use crate::stream;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// The validated shape of a submission payload. The raw payload is
/// stored on the task verbatim; this type only gates what we accept.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(min = 1, message = "model must not be empty"))]
    pub model: String,
    #[validate(length(min = 1, message = "prompt must not be empty"))]
    pub prompt: String,
    /// Reference image for image-to-video jobs.
    #[serde(default)]
    #[validate(url(message = "image_url must be a valid URL"))]
    pub image_url: Option<String>,
    /// Domain-specific generation options, passed through to the
    /// backend untouched.
    #[serde(default)]
    pub options: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchDeleteRequest {
    pub task_ids: Vec<TaskId>,
}

#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Validate a raw submission payload into the backend [`JobSpec`].
pub(crate) fn parse_request(payload: &serde_json::Value) -> AppResult<JobSpec> {
    let request: CreateTaskRequest = serde_json::from_value(payload.clone())
        .map_err(|e| AppError::Core(CoreError::Validation(format!("Invalid request body: {e}"))))?;
    request
        .validate()
        .map_err(|e| AppError::Core(CoreError::Validation(e.to_string())))?;

    Ok(JobSpec {
        model: request.model,
        prompt: request.prompt,
        image_url: request.image_url,
        options: request.options,
    })
}

/// Register the task, spawn its runner, and build the 202 response
/// with `Location`/`Operation-Location` pointing at the status
/// endpoint. Shared by the domain and admin create handlers.
pub(crate) fn submit(
    state: &AppState,
    kind: TaskKind,
    payload: serde_json::Value,
    spec: JobSpec,
) -> AppResult<Response> {
    let store = store_for(state, kind)?;
    let task = store.create(payload);
    state
        .runner
        .spawn(Arc::clone(store), Arc::clone(&task), spec);

    tracing::info!(task_id = %task.id, kind = %kind, model = %task.payload["model"], "Task submitted");

    let location = format!("/api/v1/{kind}/tasks/{}", task.id);
    let headers = [
        (header::LOCATION, location.clone()),
        (HeaderName::from_static("operation-location"), location),
    ];
    let body = Json(DataResponse {
        data: serde_json::json!({ "task_id": task.id }),
    });
    Ok((StatusCode::ACCEPTED, headers, body).into_response())
}

fn store_for(state: &AppState, kind: TaskKind) -> AppResult<&Arc<genrelay_core::TaskStore>> {
    state.directory.store(kind).ok_or_else(|| {
        AppError::InternalError(format!("No store registered for kind {kind}"))
    })
}

fn find_task(state: &AppState, kind: TaskKind, id: &str) -> AppResult<Arc<genrelay_core::Task>> {
    store_for(state, kind)?.get(id).ok_or_else(|| {
        AppError::Core(CoreError::NotFound {
            entity: "Task",
            id: id.to_string(),
        })
    })
}

fn parse_status(raw: Option<&str>) -> AppResult<Option<TaskStatus>> {
    raw.map(|s| s.parse::<TaskStatus>().map_err(AppError::Core))
        .transpose()
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/{kind}/tasks
///
/// Validate and register a new task. Returns 202 with the allocated id
/// and `Location`/`Operation-Location` headers; execution continues in
/// the background. A validation failure allocates nothing.
pub async fn create_task(
    _auth: AppKey,
    State(state): State<AppState>,
    Path(kind): Path<TaskKind>,
    Json(payload): Json<serde_json::Value>,
) -> AppResult<Response> {
    let spec = parse_request(&payload)?;
    submit(&state, kind, payload, spec)
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/{kind}/tasks
///
/// List this domain's tasks, optionally filtered by `?status=`.
/// Newest first.
pub async fn list_tasks(
    State(state): State<AppState>,
    Path(kind): Path<TaskKind>,
    Query(params): Query<ListParams>,
) -> AppResult<impl IntoResponse> {
    let status = parse_status(params.status.as_deref())?;
    let mut tasks = store_for(&state, kind)?.list(status);
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(DataResponse { data: tasks }))
}

// ---------------------------------------------------------------------------
// Status / result
// ---------------------------------------------------------------------------

/// GET /api/v1/{kind}/tasks/{id}
///
/// Full status snapshot of one task.
pub async fn get_task(
    State(state): State<AppState>,
    Path((kind, id)): Path<(TaskKind, TaskId)>,
) -> AppResult<Json<DataResponse<TaskSnapshot>>> {
    let task = find_task(&state, kind, &id)?;
    Ok(Json(DataResponse {
        data: task.snapshot(),
    }))
}

/// GET /api/v1/{kind}/tasks/{id}/result
///
/// Result-focused view: id, status, progress, and the result or error
/// once terminal.
pub async fn get_result(
    State(state): State<AppState>,
    Path((kind, id)): Path<(TaskKind, TaskId)>,
) -> AppResult<impl IntoResponse> {
    let snap = find_task(&state, kind, &id)?.snapshot();
    Ok(Json(DataResponse {
        data: serde_json::json!({
            "task_id": snap.task_id,
            "status": snap.status,
            "progress": snap.progress,
            "result": snap.result,
            "error": snap.error,
        }),
    }))
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// GET /api/v1/{kind}/tasks/{id}/stream
///
/// SSE event stream: one `snapshot` frame, then live progress and
/// terminal events, with `: ping` heartbeats over quiet intervals. The
/// stream ends after the terminal event.
pub async fn stream_task(
    State(state): State<AppState>,
    Path((kind, id)): Path<(TaskKind, TaskId)>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let task = find_task(&state, kind, &id)?;
    Ok(stream::task_event_stream(
        task,
        Duration::from_secs(state.config.stream_heartbeat_secs),
    ))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/{kind}/tasks/{id}/cancel
///
/// Request cooperative cancellation. Always succeeds for a known task;
/// the runner finalizes `cancelled` at its next checkpoint, and a
/// request against an already-terminal task changes nothing.
pub async fn cancel_task(
    _auth: AppKey,
    State(state): State<AppState>,
    Path((kind, id)): Path<(TaskKind, TaskId)>,
) -> AppResult<impl IntoResponse> {
    let task = find_task(&state, kind, &id)?;
    state.runner.cancel(&task);
    Ok(Json(DataResponse {
        data: serde_json::json!({
            "task_id": task.id,
            "status": task.status(),
        }),
    }))
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// DELETE /api/v1/{kind}/tasks/{id}
///
/// Remove one task. 404 for unknown ids, 204 on success.
pub async fn delete_task(
    _auth: AppKey,
    State(state): State<AppState>,
    Path((kind, id)): Path<(TaskKind, TaskId)>,
) -> AppResult<impl IntoResponse> {
    if !store_for(&state, kind)?.delete(&id) {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "Task",
            id,
        }));
    }
    tracing::info!(task_id = %id, kind = %kind, "Task deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/{kind}/tasks/batch-delete
///
/// Delete every listed id that exists; unknown ids are skipped, never
/// an error. Returns the count removed.
pub async fn batch_delete_tasks(
    _auth: AppKey,
    State(state): State<AppState>,
    Path(kind): Path<TaskKind>,
    Json(request): Json<BatchDeleteRequest>,
) -> AppResult<impl IntoResponse> {
    let deleted = store_for(&state, kind)?.delete_many(&request.task_ids);
    tracing::info!(kind = %kind, requested = request.task_ids.len(), deleted, "Batch delete");
    Ok(Json(DataResponse {
        data: serde_json::json!({ "deleted": deleted }),
    }))
}

/// POST /api/v1/{kind}/tasks/clear
///
/// Remove all of this domain's tasks, or only those matching
/// `{"status": ...}`. Returns the count removed.
pub async fn clear_tasks(
    _auth: AppKey,
    State(state): State<AppState>,
    Path(kind): Path<TaskKind>,
    Json(request): Json<ClearRequest>,
) -> AppResult<impl IntoResponse> {
    let status = parse_status(request.status.as_deref())?;
    let deleted = store_for(&state, kind)?.clear(status);
    tracing::info!(kind = %kind, deleted, "Store cleared");
    Ok(Json(DataResponse {
        data: serde_json::json!({ "deleted": deleted }),
    }))
}

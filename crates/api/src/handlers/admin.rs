//! Handlers for the aggregated `/admin/tasks` view.
//!
//! These operate across every domain store through the
//! [`TaskDirectory`](genrelay_core::TaskDirectory): merged listing with
//! filter/sort/pagination, cross-store lookup, and bulk deletion. All
//! admin endpoints require an application key.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use genrelay_core::aggregate::{ListQuery, SortOrder};
use genrelay_core::error::CoreError;
use genrelay_core::task::TaskStatus;
use genrelay_core::types::{TaskId, TaskKind};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::handlers::tasks;
use crate::middleware::auth::AppKey;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AdminListParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub status: Option<String>,
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub page: Option<usize>,
    pub size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AdminCreateRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct AdminBatchDeleteRequest {
    pub task_ids: Vec<TaskId>,
}

#[derive(Debug, Deserialize)]
pub struct AdminClearRequest {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

fn parse_kind(raw: Option<&str>) -> AppResult<Option<TaskKind>> {
    raw.map(|s| s.parse::<TaskKind>().map_err(AppError::Core))
        .transpose()
}

fn parse_status(raw: Option<&str>) -> AppResult<Option<TaskStatus>> {
    raw.map(|s| s.parse::<TaskStatus>().map_err(AppError::Core))
        .transpose()
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/admin/tasks
///
/// Aggregated task list across all stores: optional `type`/`status`
/// filters, `sort_by=created_at` with `order=asc|desc`, `page`/`size`
/// pagination applied after the full filter and sort.
pub async fn list_tasks(
    _auth: AppKey,
    State(state): State<AppState>,
    Query(params): Query<AdminListParams>,
) -> AppResult<impl IntoResponse> {
    if let Some(sort_by) = params.sort_by.as_deref() {
        if sort_by != "created_at" {
            return Err(AppError::Core(CoreError::Validation(format!(
                "Unsupported sort_by: \"{sort_by}\" (only \"created_at\")"
            ))));
        }
    }

    let query = ListQuery {
        kind: parse_kind(params.kind.as_deref())?,
        status: parse_status(params.status.as_deref())?,
        order: params
            .order
            .as_deref()
            .map(|s| s.parse::<SortOrder>().map_err(AppError::Core))
            .transpose()?
            .unwrap_or_default(),
        page: params.page.unwrap_or(1),
        size: params.size.unwrap_or(20),
    };

    Ok(Json(DataResponse {
        data: state.directory.list(&query),
    }))
}

// ---------------------------------------------------------------------------
// Get
// ---------------------------------------------------------------------------

/// GET /api/v1/admin/tasks/{id}
///
/// Detail for one task, probing the stores in their fixed order.
pub async fn get_task(
    _auth: AppKey,
    State(state): State<AppState>,
    Path(id): Path<TaskId>,
) -> AppResult<impl IntoResponse> {
    let snap = state
        .directory
        .find(&id)
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Task",
            id,
        }))?;
    Ok(Json(DataResponse { data: snap }))
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /api/v1/admin/tasks
///
/// Submit a task into a named domain: `{"type": "video"|"image",
/// "payload": {...}}`. Same 202 semantics as the domain endpoint.
pub async fn create_task(
    _auth: AppKey,
    State(state): State<AppState>,
    Json(request): Json<AdminCreateRequest>,
) -> AppResult<Response> {
    let kind: TaskKind = request.kind.parse().map_err(AppError::Core)?;
    let spec = tasks::parse_request(&request.payload)?;
    tasks::submit(&state, kind, request.payload, spec)
}

// ---------------------------------------------------------------------------
// Bulk deletion
// ---------------------------------------------------------------------------

/// POST /api/v1/admin/tasks/batch/delete
///
/// Delete the listed ids wherever they live, summing successes.
pub async fn batch_delete_tasks(
    _auth: AppKey,
    State(state): State<AppState>,
    Json(request): Json<AdminBatchDeleteRequest>,
) -> AppResult<impl IntoResponse> {
    let deleted = state.directory.delete_many(&request.task_ids);
    tracing::info!(requested = request.task_ids.len(), deleted, "Admin batch delete");
    Ok(Json(DataResponse {
        data: serde_json::json!({ "deleted": deleted }),
    }))
}

/// POST /api/v1/admin/tasks/clear
///
/// Clear tasks across stores, optionally scoped by `type` and/or
/// `status`. Returns the count removed.
pub async fn clear_tasks(
    _auth: AppKey,
    State(state): State<AppState>,
    Json(request): Json<AdminClearRequest>,
) -> AppResult<impl IntoResponse> {
    let kind = parse_kind(request.kind.as_deref())?;
    let status = parse_status(request.status.as_deref())?;
    let deleted = state.directory.clear(kind, status);
    tracing::info!(deleted, "Admin clear");
    Ok(Json(DataResponse {
        data: serde_json::json!({ "deleted": deleted }),
    }))
}

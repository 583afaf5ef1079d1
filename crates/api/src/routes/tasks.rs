//! Route definitions for the per-domain `/{kind}/tasks` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;

/// Routes mounted at `/{kind}/tasks`.
///
/// ```text
/// GET    /                 -> list_tasks
/// POST   /                 -> create_task
/// POST   /batch-delete     -> batch_delete_tasks
/// POST   /clear            -> clear_tasks
/// GET    /{id}             -> get_task
/// DELETE /{id}             -> delete_task
/// GET    /{id}/result      -> get_result
/// GET    /{id}/stream      -> stream_task
/// POST   /{id}/cancel      -> cancel_task
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(tasks::list_tasks).post(tasks::create_task))
        .route("/batch-delete", post(tasks::batch_delete_tasks))
        .route("/clear", post(tasks::clear_tasks))
        .route("/{id}", get(tasks::get_task).delete(tasks::delete_task))
        .route("/{id}/result", get(tasks::get_result))
        .route("/{id}/stream", get(tasks::stream_task))
        .route("/{id}/cancel", post(tasks::cancel_task))
}

//! Route definitions for the aggregated `/admin/tasks` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::admin;
use crate::state::AppState;

/// Routes mounted at `/admin/tasks`.
///
/// ```text
/// GET    /                 -> list_tasks
/// POST   /                 -> create_task
/// GET    /{id}             -> get_task
/// POST   /batch/delete     -> batch_delete_tasks
/// POST   /clear            -> clear_tasks
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(admin::list_tasks).post(admin::create_task))
        .route("/batch/delete", post(admin::batch_delete_tasks))
        .route("/clear", post(admin::clear_tasks))
        .route("/{id}", get(admin::get_task))
}

pub mod admin;
pub mod health;
pub mod tasks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /admin/tasks                      aggregated list, create
/// /admin/tasks/{id}                 cross-store detail
/// /admin/tasks/batch/delete         bulk delete
/// /admin/tasks/clear                scoped clear
///
/// /{kind}/tasks                     list, create        ({kind}: video|image)
/// /{kind}/tasks/batch-delete        bulk delete
/// /{kind}/tasks/clear               clear
/// /{kind}/tasks/{id}                status, delete
/// /{kind}/tasks/{id}/result         result view
/// /{kind}/tasks/{id}/stream         SSE event stream
/// /{kind}/tasks/{id}/cancel         cooperative cancel
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Aggregated admin view (static segment wins over {kind}).
        .nest("/admin/tasks", admin::router())
        // Per-domain task resources.
        .nest("/{kind}/tasks", tasks::router())
}

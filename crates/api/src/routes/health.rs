use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Tasks currently held across all stores.
    pub tasks: usize,
}

/// GET /health -- returns service health and the live task count.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let tasks = state
        .directory
        .stores()
        .iter()
        .map(|store| store.len())
        .sum();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tasks,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

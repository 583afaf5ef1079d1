use std::sync::Arc;

use genrelay_core::TaskDirectory;

use crate::config::ServerConfig;
use crate::runner::TaskRunner;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// All domain stores, composed in probe order.
    pub directory: Arc<TaskDirectory>,
    /// Supervises one execution per submitted task.
    pub runner: Arc<TaskRunner>,
    /// Server configuration (accessed by middleware and handlers).
    pub config: Arc<ServerConfig>,
}

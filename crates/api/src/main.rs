use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genrelay_api::config::ServerConfig;
use genrelay_api::router::build_app_router;
use genrelay_api::runner::TaskRunner;
use genrelay_api::state::AppState;
use genrelay_backend::{HttpGenerationBackend, StaticCredentialPool};
use genrelay_core::snapshot::{self, SnapshotWriter};
use genrelay_core::store::TaskStore;
use genrelay_core::types::TaskKind;
use genrelay_core::TaskDirectory;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genrelay_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Stores + snapshot recovery ---
    let video_store = Arc::new(TaskStore::new(TaskKind::Video));
    let image_store = Arc::new(TaskStore::new(TaskKind::Image));

    let video_path = config.snapshot_dir.join("video_tasks.json");
    let image_path = config.snapshot_dir.join("image_tasks.json");
    snapshot::load_store(&video_store, &video_path);
    snapshot::load_store(&image_store, &image_path);

    // Reloaded tasks are all terminal and have no runner, so their TTL
    // deletion is scheduled here.
    let ttl = Duration::from_secs(config.task_ttl_secs);
    video_store.expire_terminal_after(ttl);
    image_store.expire_terminal_after(ttl);

    // --- Snapshot writers ---
    let snapshot_cancel = CancellationToken::new();
    let video_writer = tokio::spawn(
        SnapshotWriter::new(Arc::clone(&video_store), video_path).run(snapshot_cancel.clone()),
    );
    let image_writer = tokio::spawn(
        SnapshotWriter::new(Arc::clone(&image_store), image_path).run(snapshot_cancel.clone()),
    );
    tracing::info!(dir = %config.snapshot_dir.display(), "Snapshot writers started");

    // --- Backend + credentials + runner ---
    let backend = Arc::new(HttpGenerationBackend::new(config.backend_url.clone()));
    let credentials = Arc::new(StaticCredentialPool::new(config.credential_pools()));
    let runner = Arc::new(TaskRunner::new(
        backend,
        credentials,
        Duration::from_secs(config.task_ttl_secs),
    ));

    // --- App state ---
    let directory = Arc::new(TaskDirectory::new(vec![
        Arc::clone(&video_store),
        Arc::clone(&image_store),
    ]));
    let state = AppState {
        directory,
        runner,
        config: Arc::new(config.clone()),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop the snapshot writers; each flushes a final snapshot first.
    snapshot_cancel.cancel();
    let flush_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    let _ = tokio::time::timeout(flush_timeout, video_writer).await;
    let _ = tokio::time::timeout(flush_timeout, image_writer).await;
    tracing::info!("Snapshot writers stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

use std::collections::HashMap;
use std::path::PathBuf;

use genrelay_backend::Credential;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`). Does not apply
    /// to SSE streams, which outlive it by design.
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Base URL of the upstream generation backend.
    pub backend_url: String,
    /// Directory holding the per-domain task snapshot files.
    pub snapshot_dir: PathBuf,
    /// Seconds a terminal task stays visible before TTL deletion
    /// (default: 24 hours).
    pub task_ttl_secs: u64,
    /// Seconds of stream silence before a `: ping` heartbeat comment.
    pub stream_heartbeat_secs: u64,
    /// Application keys accepted by the auth extractor. Empty disables
    /// the check (dev mode).
    pub app_keys: Vec<String>,
    /// Backend credentials per named pool (`video`, `image`, `default`).
    pub credentials: HashMap<String, Vec<String>>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                    |
    /// |-------------------------|----------------------------|
    /// | `HOST`                  | `0.0.0.0`                  |
    /// | `PORT`                  | `3000`                     |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                       |
    /// | `BACKEND_URL`           | `http://localhost:8080`    |
    /// | `SNAPSHOT_DIR`          | `data`                     |
    /// | `TASK_TTL_SECS`         | `86400`                    |
    /// | `STREAM_HEARTBEAT_SECS` | `15`                       |
    /// | `APP_KEYS`              | (empty, auth disabled)     |
    /// | `VIDEO_CREDENTIALS`     | (empty)                    |
    /// | `IMAGE_CREDENTIALS`     | (empty)                    |
    /// | `DEFAULT_CREDENTIALS`   | (empty)                    |
    ///
    /// Credential env vars are comma-separated secrets.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins = split_csv(
            &std::env::var("CORS_ORIGINS").unwrap_or_else(|_| "http://localhost:5173".into()),
        );

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let backend_url =
            std::env::var("BACKEND_URL").unwrap_or_else(|_| "http://localhost:8080".into());

        let snapshot_dir =
            PathBuf::from(std::env::var("SNAPSHOT_DIR").unwrap_or_else(|_| "data".into()));

        let task_ttl_secs: u64 = std::env::var("TASK_TTL_SECS")
            .unwrap_or_else(|_| "86400".into())
            .parse()
            .expect("TASK_TTL_SECS must be a valid u64");

        let stream_heartbeat_secs: u64 = std::env::var("STREAM_HEARTBEAT_SECS")
            .unwrap_or_else(|_| "15".into())
            .parse()
            .expect("STREAM_HEARTBEAT_SECS must be a valid u64");

        let app_keys = split_csv(&std::env::var("APP_KEYS").unwrap_or_default());

        let mut credentials = HashMap::new();
        for (pool, var) in [
            ("video", "VIDEO_CREDENTIALS"),
            ("image", "IMAGE_CREDENTIALS"),
            ("default", "DEFAULT_CREDENTIALS"),
        ] {
            let secrets = split_csv(&std::env::var(var).unwrap_or_default());
            if !secrets.is_empty() {
                credentials.insert(pool.to_string(), secrets);
            }
        }

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            backend_url,
            snapshot_dir,
            task_ttl_secs,
            stream_heartbeat_secs,
            app_keys,
            credentials,
        }
    }

    /// The configured credentials as named pools for the
    /// [`StaticCredentialPool`](genrelay_backend::StaticCredentialPool).
    pub fn credential_pools(&self) -> HashMap<String, Vec<Credential>> {
        self.credentials
            .iter()
            .map(|(pool, secrets)| {
                (
                    pool.clone(),
                    secrets.iter().map(Credential::new).collect(),
                )
            })
            .collect()
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

//! Application-key authentication extractor for Axum handlers.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use genrelay_core::error::CoreError;

use crate::error::AppError;
use crate::state::AppState;

/// Proof that the request carried a configured application key.
///
/// Use this as an extractor parameter in any handler that mutates
/// state:
///
/// ```ignore
/// async fn my_handler(_auth: AppKey) -> AppResult<Json<()>> {
///     Ok(Json(()))
/// }
/// ```
///
/// The key is read from `Authorization: Bearer <key>` and checked
/// against `ServerConfig::app_keys`. When no keys are configured the
/// check is disabled, so local development needs no setup.
#[derive(Debug, Clone, Copy)]
pub struct AppKey;

impl FromRequestParts<AppState> for AppKey {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if state.config.app_keys.is_empty() {
            return Ok(AppKey);
        }

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(
                    "Missing Authorization header".into(),
                ))
            })?;

        let key = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Core(CoreError::Unauthorized(
                "Invalid Authorization format. Expected: Bearer <key>".into(),
            ))
        })?;

        if state.config.app_keys.iter().any(|k| k == key) {
            Ok(AppKey)
        } else {
            Err(AppError::Core(CoreError::Unauthorized(
                "Invalid application key".into(),
            )))
        }
    }
}

//! Shared-secret gate for the administrative surface.
//!
//! Code creation/listing/deactivation and the manual processing trigger
//! require the `X-Admin-Secret` header to match the configured secret. The
//! comparison is constant-time.

use crate::error::AppError;
use crate::startup::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;

/// Extractor proving the caller presented the admin secret.
#[derive(Debug, Clone, Copy)]
pub struct AdminAuth;

#[async_trait]
impl FromRequestParts<AppState> for AdminAuth {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get("X-Admin-Secret")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::unauthorized("admin_auth_required", "Missing X-Admin-Secret header")
            })?;

        let expected = state.config.admin.secret.expose_secret();
        let matches: bool = provided
            .as_bytes()
            .ct_eq(expected.as_bytes())
            .into();
        if !matches {
            tracing::warn!("Rejected request with invalid admin secret");
            return Err(AppError::unauthorized(
                "invalid_admin_secret",
                "Invalid admin secret",
            ));
        }

        Ok(AdminAuth)
    }
}

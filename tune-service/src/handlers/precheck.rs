//! Log precheck endpoint.
//!
//! Unauthenticated and advisory: clients call this before checkout to learn
//! whether their log is usable. Nothing is persisted.

use crate::error::AppError;
use crate::services::metrics::record_precheck;
use crate::services::precheck::{PrecheckReport, PrecheckStatus};
use crate::startup::AppState;
use axum::{
    extract::{Multipart, State},
    Json,
};

pub async fn precheck_log(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PrecheckReport>, AppError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| {
            AppError::bad_request("invalid_upload", format!("Failed to read multipart field: {}", e))
        })?
        .ok_or_else(|| AppError::bad_request("missing_file", "No file uploaded"))?;

    let filename = field.file_name().unwrap_or("unnamed").to_string();
    let data = field
        .bytes()
        .await
        .map_err(|e| AppError::bad_request("invalid_upload", format!("Failed to read file bytes: {}", e)))?;

    let report = state.precheck.check(&filename, &data).await;

    let status = match report.status {
        PrecheckStatus::Ok => "ok",
        PrecheckStatus::Warn => "warn",
        PrecheckStatus::Fail => "fail",
    };
    record_precheck(status);

    tracing::info!(
        filename = %filename,
        size = data.len(),
        status = %status,
        issues = report.issues.len(),
        "Precheck finished"
    );

    Ok(Json(report))
}

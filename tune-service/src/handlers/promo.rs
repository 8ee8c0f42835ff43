//! Promo code endpoints: public validation plus the admin surface.

use crate::dtos::{
    CreatePromoRequest, PromoCodeListResponse, PromoCodeResponse, ValidatePromoRequest,
};
use crate::error::AppError;
use crate::middleware::AdminAuth;
use crate::services::promo::{NewPromoCode, PromoValidation};
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use mongodb::bson::DateTime;

/// Public pre-checkout validation so the client can show the promo state
/// before submitting an order. Consumes nothing.
pub async fn validate_code(
    State(state): State<AppState>,
    Json(payload): Json<ValidatePromoRequest>,
) -> Result<Json<PromoValidation>, AppError> {
    let validation = state.promo.validate(&payload.code).await?;
    Ok(Json(validation))
}

pub async fn create_code(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Json(payload): Json<CreatePromoRequest>,
) -> Result<(StatusCode, Json<PromoCodeResponse>), AppError> {
    let promo = state
        .promo
        .create(NewPromoCode {
            code: payload.code,
            code_type: payload.code_type,
            max_uses: payload.max_uses,
            valid_from: payload.valid_from.map(DateTime::from_chrono),
            valid_until: payload.valid_until.map(DateTime::from_chrono),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(PromoCodeResponse::from(promo))))
}

pub async fn list_codes(
    State(state): State<AppState>,
    _admin: AdminAuth,
) -> Result<Json<PromoCodeListResponse>, AppError> {
    let codes = state.promo.list().await?;
    let codes: Vec<PromoCodeResponse> = codes.into_iter().map(PromoCodeResponse::from).collect();
    let total = codes.len();
    Ok(Json(PromoCodeListResponse { codes, total }))
}

pub async fn deactivate_code(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(code): Path<String>,
) -> Result<StatusCode, AppError> {
    state.promo.deactivate(&code).await?;
    Ok(StatusCode::NO_CONTENT)
}

//! Checkout, order query facade, and the manual processing trigger.

use crate::dtos::{
    CheckoutDetails, CheckoutFields, CheckoutResponse, OrderResponse, ProcessRequest,
};
use crate::error::AppError;
use crate::middleware::AdminAuth;
use crate::models::{OrderStatus, TuneOrder};
use crate::services::metrics::record_order_transition;
use crate::services::precheck::{
    has_log_signature, ISSUE_FILE_TOO_SMALL, ISSUE_INVALID_LOG_FORMAT,
};
use crate::services::processor::ProcessOutcome;
use crate::services::repository::is_duplicate_key_error;
use crate::startup::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use mongodb::bson::DateTime;
use uuid::Uuid;
use validator::Validate;

const MAX_LOG_BYTES: usize = 50 * 1024 * 1024;
const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// Create an order from an uploaded log plus checkout fields (multipart).
///
/// With a valid promo code the order is born, redeemed and marked paid in one
/// request and processing starts in the background; otherwise the response
/// carries the provider checkout details and the order waits in `pending`
/// for the payment webhook. Redemption runs before anything is persisted, so
/// a losing promo attempt returns the promo error with no order, stored log
/// or session left behind.
pub async fn checkout(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<CheckoutResponse>), AppError> {
    let (fields, filename, data) = read_checkout_multipart(&mut multipart).await?;
    fields.validate()?;

    // The hard precheck gates apply here too: checkout is never permitted
    // for a log the advisory precheck would hard-fail.
    if (data.len() as u64) < state.config.precheck.min_bytes {
        return Err(AppError::bad_request(
            ISSUE_FILE_TOO_SMALL,
            "Log file is too small to contain a usable flight segment",
        ));
    }
    if !has_log_signature(&data) {
        return Err(AppError::bad_request(
            ISSUE_INVALID_LOG_FORMAT,
            "File does not look like a blackbox log container",
        ));
    }

    let order_id = Uuid::new_v4();
    let log_storage_key = format!("logs/{}/{}", order_id, filename);

    let wants_promo = fields
        .promo_code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    let mut order = TuneOrder {
        id: order_id,
        order_number: TuneOrder::generate_order_number(),
        email: fields.email,
        locale: fields.locale.unwrap_or_else(|| "en".to_string()),
        log_filename: filename,
        log_size_bytes: data.len() as i64,
        log_storage_key: log_storage_key.clone(),
        problem_description: fields.problem_description,
        tuning_goals: fields.tuning_goals,
        flying_style: fields.flying_style,
        frame_description: fields.frame_description,
        cli_dump: fields.cli_dump,
        promo_code: None,
        checkout_ref: None,
        status: OrderStatus::Pending,
        error_message: None,
        analysis_result: None,
        cli_commands: None,
        report_storage_key: None,
        created_at: DateTime::now(),
        paid_at: None,
        completed_at: None,
        delivered_at: None,
    };

    // Redemption is the atomic gate and it runs first: a losing racer gets
    // the promo error back while nothing has been uploaded or inserted yet.
    let redeemed = match wants_promo {
        Some(code) => {
            let promo = state.promo.redeem(&code, &order).await?;
            order.promo_code = Some(promo.code);
            true
        }
        None => false,
    };

    state.storage.upload(&log_storage_key, data).await?;

    // Without a promo, register a checkout session so the order is inserted
    // with its provider reference already attached.
    let checkout_session = if !redeemed && state.payment.is_configured() {
        let session = state
            .payment
            .create_checkout(
                state.config.payment.amount_minor,
                &state.config.payment.currency,
                &order_id.to_string(),
            )
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to create checkout session");
                AppError::bad_gateway("checkout_failed", "Failed to create payment session")
            })?;
        order.checkout_ref = Some(session.id.clone());
        Some(session)
    } else {
        if !redeemed {
            tracing::warn!("Payment gateway not configured; order created without checkout session");
        }
        None
    };

    insert_with_fresh_number(&state, &mut order).await?;
    record_order_transition("pending");

    tracing::info!(
        order_number = %order.order_number,
        email = %order.email,
        size = order.log_size_bytes,
        promo = redeemed,
        "Order created"
    );

    let mut status = OrderStatus::Pending;
    if redeemed
        && state
            .repository
            .mark_paid(order.id)
            .await
            .map_err(AppError::DatabaseError)?
    {
        record_order_transition("paid");
        status = OrderStatus::Paid;
        state.processor.clone().spawn_process(order.id);
    }

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            order_number: order.order_number,
            status,
            checkout: checkout_session.map(|s| CheckoutDetails {
                checkout_ref: s.id,
                key_id: state.config.payment.key_id.clone(),
                amount_minor: s.amount,
                currency: s.currency,
            }),
        }),
    ))
}

async fn read_checkout_multipart(
    multipart: &mut Multipart,
) -> Result<(CheckoutFields, String, Vec<u8>), AppError> {
    let mut fields = CheckoutFields::default();
    let mut file: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::bad_request("invalid_upload", format!("Failed to read multipart field: {}", e))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("log.bbl").to_string();
                let data = field.bytes().await.map_err(|e| {
                    AppError::bad_request(
                        "invalid_upload",
                        format!("Failed to read file bytes: {}", e),
                    )
                })?;
                if data.len() > MAX_LOG_BYTES {
                    return Err(AppError::bad_request(
                        "file_too_large",
                        format!("Log exceeds the {} MB limit", MAX_LOG_BYTES / (1024 * 1024)),
                    ));
                }
                file = Some((filename, data.to_vec()));
            }
            other => {
                let value = field.text().await.map_err(|e| {
                    AppError::bad_request(
                        "invalid_upload",
                        format!("Failed to read field '{}': {}", other, e),
                    )
                })?;
                let value = Some(value).filter(|v| !v.trim().is_empty());
                match other {
                    "email" => fields.email = value.unwrap_or_default(),
                    "locale" => fields.locale = value,
                    "problem_description" => fields.problem_description = value,
                    "tuning_goals" => fields.tuning_goals = value,
                    "flying_style" => fields.flying_style = value,
                    "frame_description" => fields.frame_description = value,
                    "cli_dump" => fields.cli_dump = value,
                    "promo_code" => fields.promo_code = value,
                    _ => {}
                }
            }
        }
    }

    let (filename, data) =
        file.ok_or_else(|| AppError::bad_request("missing_file", "No log file uploaded"))?;
    Ok((fields, filename, data))
}

/// Insert the order, regenerating the order number on the (rare) unique-index
/// collision.
async fn insert_with_fresh_number(state: &AppState, order: &mut TuneOrder) -> Result<(), AppError> {
    for _ in 0..ORDER_NUMBER_ATTEMPTS {
        match state.repository.insert_order(order).await {
            Ok(()) => return Ok(()),
            Err(e) if is_duplicate_key_error(&e) => {
                order.order_number = TuneOrder::generate_order_number();
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(AppError::InternalError(anyhow::anyhow!(
        "Failed to generate a unique order number after {} attempts",
        ORDER_NUMBER_ATTEMPTS
    )))
}

/// Query/diff facade: read-only projection of one order, including the
/// computed config diff once completed.
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state
        .repository
        .find_order_by_number(&order_number)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(|| AppError::not_found("order_not_found", "Unknown order number"))?;

    Ok(Json(OrderResponse::from_order(order)))
}

/// Manual/forced processing trigger for operators.
pub async fn process_order(
    State(state): State<AppState>,
    _admin: AdminAuth,
    Path(order_number): Path<String>,
    body: Option<Json<ProcessRequest>>,
) -> Result<Json<ProcessOutcome>, AppError> {
    let force = body.map(|Json(b)| b.force).unwrap_or(false);

    let order = state
        .repository
        .find_order_by_number(&order_number)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(|| AppError::not_found("order_not_found", "Unknown order number"))?;

    let outcome = state.processor.process(order.id, force).await?;

    tracing::info!(
        order_number = %order_number,
        force = force,
        outcome = ?outcome,
        "Manual processing trigger finished"
    );

    Ok(Json(outcome))
}

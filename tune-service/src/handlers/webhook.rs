//! Payment provider webhook.
//!
//! The callback supplies the order's checkout reference and a success
//! signal, authenticated by an HMAC signature over the raw body. Duplicate
//! deliveries are expected: a replay finds the order already past `pending`
//! and is acknowledged without re-triggering anything.

use crate::error::AppError;
use crate::services::metrics::record_order_transition;
use crate::startup::AppState;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};

pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get("X-Payment-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Missing X-Payment-Signature header");
            AppError::unauthorized("invalid_signature", "Missing webhook signature")
        })?;

    let is_valid = state
        .payment
        .verify_webhook_signature(&body, signature)
        .map_err(|e| {
            tracing::error!(error = %e, "Webhook signature verification error");
            AppError::unauthorized("invalid_signature", "Malformed webhook signature")
        })?;
    if !is_valid {
        tracing::warn!("Invalid webhook signature");
        return Err(AppError::unauthorized(
            "invalid_signature",
            "Invalid webhook signature",
        ));
    }

    let event = state.payment.parse_webhook_event(&body).map_err(|e| {
        tracing::error!(error = %e, "Failed to parse webhook event");
        AppError::bad_request("invalid_payload", "Invalid webhook payload")
    })?;

    tracing::info!(
        event_type = %event.event,
        checkout_ref = %event.checkout_ref,
        "Processing payment webhook"
    );

    match event.event.as_str() {
        "payment.captured" | "order.paid" => {
            let order = state
                .repository
                .find_order_by_checkout_ref(&event.checkout_ref)
                .await
                .map_err(AppError::DatabaseError)?;

            match order {
                Some(order) => {
                    // CAS pending -> paid; a replay loses this write and is
                    // acknowledged without starting a second run.
                    if state
                        .repository
                        .mark_paid(order.id)
                        .await
                        .map_err(AppError::DatabaseError)?
                    {
                        record_order_transition("paid");
                        tracing::info!(order_number = %order.order_number, "Order paid; processing triggered");
                        state.processor.clone().spawn_process(order.id);
                    } else {
                        tracing::info!(
                            order_number = %order.order_number,
                            "Duplicate payment signal ignored"
                        );
                    }
                }
                None => {
                    tracing::warn!(
                        checkout_ref = %event.checkout_ref,
                        "Webhook for unknown checkout reference"
                    );
                }
            }
        }
        "payment.failed" => {
            tracing::info!(checkout_ref = %event.checkout_ref, "Payment failed; order stays pending");
        }
        _ => {
            tracing::debug!(event_type = %event.event, "Unhandled webhook event type");
        }
    }

    // Always acknowledge so the provider stops redelivering.
    Ok(StatusCode::OK)
}

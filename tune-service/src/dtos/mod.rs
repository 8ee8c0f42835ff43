use crate::models::{AnalysisResult, OrderStatus, PromoCode, PromoCodeType, TuneOrder};
use crate::services::diff::ConfigDiff;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Fields accompanying the log upload at checkout (multipart text parts).
#[derive(Debug, Deserialize, Validate, Default)]
pub struct CheckoutFields {
    #[validate(email)]
    pub email: String,
    pub locale: Option<String>,
    pub problem_description: Option<String>,
    pub tuning_goals: Option<String>,
    pub flying_style: Option<String>,
    pub frame_description: Option<String>,
    pub cli_dump: Option<String>,
    pub promo_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_number: String,
    pub status: OrderStatus,
    /// Present when payment is required (no promo redeemed).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout: Option<CheckoutDetails>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutDetails {
    pub checkout_ref: String,
    pub key_id: String,
    pub amount_minor: u64,
    pub currency: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ProcessRequest {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct ValidatePromoRequest {
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePromoRequest {
    pub code: Option<String>,
    pub code_type: PromoCodeType,
    pub max_uses: Option<i64>,
    pub valid_from: Option<chrono::DateTime<chrono::Utc>>,
    pub valid_until: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize)]
pub struct PromoCodeResponse {
    pub code: String,
    pub code_type: PromoCodeType,
    pub max_uses: Option<i64>,
    pub used_count: i64,
    pub remaining_uses: Option<i64>,
    pub is_active: bool,
    pub valid_from: Option<String>,
    pub valid_until: Option<String>,
    pub created_at: String,
}

impl From<PromoCode> for PromoCodeResponse {
    fn from(p: PromoCode) -> Self {
        Self {
            remaining_uses: p.remaining_uses(),
            code: p.code,
            code_type: p.code_type,
            max_uses: p.max_uses,
            used_count: p.used_count,
            is_active: p.is_active,
            valid_from: p.valid_from.map(|d| d.to_string()),
            valid_until: p.valid_until.map(|d| d.to_string()),
            created_at: p.created_at.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PromoCodeListResponse {
    pub codes: Vec<PromoCodeResponse>,
    pub total: usize,
}

/// Client-facing projection of an order, assembled by the query facade.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order_number: String,
    pub status: OrderStatus,
    pub email: String,
    pub locale: String,
    pub log_filename: String,
    pub log_size_bytes: i64,
    pub problem_description: Option<String>,
    pub tuning_goals: Option<String>,
    pub flying_style: Option<String>,
    pub frame_description: Option<String>,
    pub promo_code: Option<String>,
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cli_commands: Option<String>,
    /// Structural diff between the original configuration and the generated
    /// commands; present once the order is completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_diff: Option<ConfigDiff>,
    pub created_at: String,
    pub paid_at: Option<String>,
    pub completed_at: Option<String>,
    pub delivered_at: Option<String>,
}

impl OrderResponse {
    pub fn from_order(order: TuneOrder) -> Self {
        // The dedicated commands field wins; older results carried the
        // commands only inside the analysis payload.
        let commands_text = order
            .cli_commands
            .clone()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| {
                order
                    .analysis_result
                    .as_ref()
                    .and_then(|r| r.cli_commands.clone())
            });

        let config_diff = if order.status == OrderStatus::Completed {
            let original = order.cli_dump.as_deref().unwrap_or_default();
            let updated = commands_text.as_deref().unwrap_or_default();
            Some(crate::services::diff::diff(original, updated))
        } else {
            None
        };

        Self {
            order_number: order.order_number,
            status: order.status,
            email: order.email,
            locale: order.locale,
            log_filename: order.log_filename,
            log_size_bytes: order.log_size_bytes,
            problem_description: order.problem_description,
            tuning_goals: order.tuning_goals,
            flying_style: order.flying_style,
            frame_description: order.frame_description,
            promo_code: order.promo_code,
            error_message: order.error_message,
            analysis_result: order.analysis_result,
            cli_commands: commands_text,
            config_diff,
            created_at: order.created_at.to_string(),
            paid_at: order.paid_at.map(|d| d.to_string()),
            completed_at: order.completed_at.map(|d| d.to_string()),
            delivered_at: order.delivered_at.map(|d| d.to_string()),
        }
    }
}

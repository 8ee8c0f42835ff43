//! Promo redemption ledger.
//!
//! Owns creation, validation and consumption of access codes. The capacity
//! guarantee does not live here; it lives in the repository's guarded atomic
//! increment. This layer orders the validation checks, maps losing outcomes
//! to stable error codes, and appends the usage audit trail.

use crate::error::AppError;
use crate::models::{PromoCode, PromoCodeType, PromoCodeUsage, TuneOrder};
use crate::services::repository::{is_duplicate_key_error, TuneRepository};
use mongodb::bson::DateTime;
use rand::Rng;
use serde::Serialize;
use uuid::Uuid;

const GENERATED_CODE_LEN: usize = 8;
const CREATE_ATTEMPTS: usize = 5;
const AUDIT_ATTEMPTS: usize = 3;

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Generate a shareable code from the unambiguous alphabet.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..crate::models::order::UNAMBIGUOUS_ALPHABET.len());
            crate::models::order::UNAMBIGUOUS_ALPHABET[idx] as char
        })
        .collect()
}

#[derive(Debug, Serialize, Clone)]
pub struct PromoValidation {
    pub code: String,
    pub code_type: PromoCodeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_uses: Option<i64>,
}

pub struct NewPromoCode {
    pub code: Option<String>,
    pub code_type: PromoCodeType,
    pub max_uses: Option<i64>,
    pub valid_from: Option<DateTime>,
    pub valid_until: Option<DateTime>,
}

#[derive(Clone)]
pub struct PromoLedger {
    repository: TuneRepository,
}

impl PromoLedger {
    pub fn new(repository: TuneRepository) -> Self {
        Self { repository }
    }

    /// Validation checks in order, short-circuiting on the first failure:
    /// exists and active, window start, window end, capacity.
    pub async fn validate(&self, code: &str) -> Result<PromoValidation, AppError> {
        let normalized = normalize_code(code);
        let promo = self
            .repository
            .find_code(&normalized)
            .await
            .map_err(AppError::DatabaseError)?
            .ok_or_else(|| AppError::not_found("promo_not_found", "Unknown promo code"))?;

        self.check_usable(&promo)?;

        Ok(PromoValidation {
            remaining_uses: promo.remaining_uses(),
            code: promo.code,
            code_type: promo.code_type,
        })
    }

    fn check_usable(&self, promo: &PromoCode) -> Result<(), AppError> {
        if !promo.is_active {
            return Err(AppError::bad_request(
                "promo_inactive",
                "Promo code has been deactivated",
            ));
        }
        let now = DateTime::now();
        if let Some(from) = promo.valid_from {
            if now < from {
                return Err(AppError::bad_request(
                    "promo_not_yet_valid",
                    "Promo code is not valid yet",
                ));
            }
        }
        if let Some(until) = promo.valid_until {
            if now > until {
                return Err(AppError::bad_request("promo_expired", "Promo code has expired"));
            }
        }
        if let Some(max) = promo.max_uses {
            if promo.used_count >= max {
                return Err(AppError::conflict(
                    "promo_exhausted",
                    "Promo code has no remaining uses",
                ));
            }
        }
        Ok(())
    }

    /// Consume one use of a code for an order.
    ///
    /// The repository performs the check-and-increment as a single
    /// store-evaluated update; when it matches nothing, the code is re-read
    /// only to say *why* the redemption lost, never to retry the increment.
    pub async fn redeem(&self, code: &str, order: &TuneOrder) -> Result<PromoCode, AppError> {
        let normalized = normalize_code(code);
        let redeemed = self
            .repository
            .redeem_code(&normalized)
            .await
            .map_err(AppError::DatabaseError)?;

        let promo = match redeemed {
            Some(promo) => promo,
            None => {
                // Lost the race or never eligible; classify for the caller.
                let current = self
                    .repository
                    .find_code(&normalized)
                    .await
                    .map_err(AppError::DatabaseError)?
                    .ok_or_else(|| AppError::not_found("promo_not_found", "Unknown promo code"))?;
                self.check_usable(&current)?;
                // Usable on re-read means another caller consumed the last
                // use between our update and this read.
                return Err(AppError::conflict(
                    "promo_exhausted",
                    "Promo code has no remaining uses",
                ));
            }
        };

        let usage = PromoCodeUsage {
            id: Uuid::new_v4(),
            promo_code_id: promo.id,
            order_id: order.id,
            email: order.email.clone(),
            used_at: DateTime::now(),
        };
        // The redemption already won; the audit insert is retried a few times
        // for transient write errors, then logged rather than failing the order.
        for attempt in 1..=AUDIT_ATTEMPTS {
            match self.repository.record_usage(&usage).await {
                Ok(()) => break,
                Err(e) if attempt < AUDIT_ATTEMPTS => {
                    tracing::warn!(
                        code = %promo.code,
                        attempt,
                        error = %e,
                        "Retrying promo usage audit insert"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        code = %promo.code,
                        order_number = %order.order_number,
                        error = %e,
                        "Failed to record promo usage audit entry"
                    );
                }
            }
        }

        tracing::info!(
            code = %promo.code,
            order_number = %order.order_number,
            used_count = promo.used_count,
            "Promo code redeemed"
        );
        crate::services::metrics::record_promo_redemption(&promo.code);

        Ok(promo)
    }

    /// Create a code, generating one when none is supplied. A supplied code
    /// that already exists (after normalization) is a conflict; a generated
    /// collision just rolls again.
    pub async fn create(&self, new: NewPromoCode) -> Result<PromoCode, AppError> {
        if new.code_type == PromoCodeType::Limited
            && new.max_uses.map_or(true, |m| m < 1)
        {
            return Err(AppError::bad_request(
                "promo_invalid_max_uses",
                "Limited codes require max_uses >= 1",
            ));
        }

        let supplied = new.code.as_deref().map(normalize_code);
        if let Some(code) = &supplied {
            if code.is_empty() {
                return Err(AppError::bad_request(
                    "promo_invalid_code",
                    "Promo code must not be empty",
                ));
            }
        }
        let max_uses = PromoCode::effective_max_uses(new.code_type, new.max_uses);

        for _ in 0..CREATE_ATTEMPTS {
            let code = supplied.clone().unwrap_or_else(generate_code);
            let promo = PromoCode {
                id: Uuid::new_v4(),
                code: code.clone(),
                code_type: new.code_type,
                max_uses,
                used_count: 0,
                valid_from: new.valid_from,
                valid_until: new.valid_until,
                is_active: true,
                created_at: DateTime::now(),
            };

            match self.repository.insert_code(&promo).await {
                Ok(()) => {
                    tracing::info!(code = %promo.code, code_type = ?promo.code_type, "Promo code created");
                    return Ok(promo);
                }
                Err(e) if is_duplicate_key_error(&e) => {
                    if supplied.is_some() {
                        return Err(AppError::conflict(
                            "promo_exists",
                            format!("Promo code {} already exists", code),
                        ));
                    }
                    // Generated collision: roll a new code.
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(AppError::InternalError(anyhow::anyhow!(
            "Failed to generate a unique promo code after {} attempts",
            CREATE_ATTEMPTS
        )))
    }

    pub async fn list(&self) -> Result<Vec<PromoCode>, AppError> {
        self.repository.list_codes().await.map_err(AppError::DatabaseError)
    }

    /// Soft-deactivation only; audit history stays intact.
    pub async fn deactivate(&self, code: &str) -> Result<(), AppError> {
        let normalized = normalize_code(code);
        let found = self
            .repository
            .deactivate_code(&normalized)
            .await
            .map_err(AppError::DatabaseError)?;
        if !found {
            return Err(AppError::not_found("promo_not_found", "Unknown promo code"));
        }
        tracing::info!(code = %normalized, "Promo code deactivated");
        Ok(())
    }
}

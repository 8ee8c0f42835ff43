use mongodb::bson::DateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Consumption semantics of a promo code.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PromoCodeType {
    /// One redemption ever (`max_uses` is always 1).
    Single,
    /// Up to `max_uses` redemptions.
    Limited,
    /// No cap (`max_uses` is None).
    Unlimited,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PromoCode {
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// Stored uppercase; lookups normalize before matching.
    pub code: String,
    pub code_type: PromoCodeType,
    pub max_uses: Option<i64>,
    /// Monotonic; only ever mutated by the guarded atomic increment.
    pub used_count: i64,
    pub valid_from: Option<DateTime>,
    pub valid_until: Option<DateTime>,
    /// Soft-delete flag. Codes are never hard-deleted.
    pub is_active: bool,
    pub created_at: DateTime,
}

impl PromoCode {
    pub fn remaining_uses(&self) -> Option<i64> {
        self.max_uses.map(|max| (max - self.used_count).max(0))
    }

    /// Normalize the cap for a type: `single` always caps at one use,
    /// `unlimited` never carries one.
    pub fn effective_max_uses(code_type: PromoCodeType, max_uses: Option<i64>) -> Option<i64> {
        match code_type {
            PromoCodeType::Single => Some(1),
            PromoCodeType::Limited => max_uses,
            PromoCodeType::Unlimited => None,
        }
    }
}

/// Append-only audit record for one successful redemption. Never mutated.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PromoCodeUsage {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub promo_code_id: Uuid,
    pub order_id: Uuid,
    pub email: String,
    pub used_at: DateTime,
}

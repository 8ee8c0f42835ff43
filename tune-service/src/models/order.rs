use mongodb::bson::DateTime;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Characters used in order-number suffixes and generated promo codes.
/// Excludes visually ambiguous glyphs (0/O, 1/I/L).
pub const UNAMBIGUOUS_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

const ORDER_NUMBER_PREFIX: &str = "TUNE";

/// Workflow position of an order. Single source of truth: every transition
/// is written conditionally on the expected prior value of this field.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TuneOrder {
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// Human-facing identifier, `TUNE-yyyymmdd-RANDOM6`. Immutable once assigned.
    pub order_number: String,
    pub email: String,
    pub locale: String,

    // Uploaded log reference
    pub log_filename: String,
    pub log_size_bytes: i64,
    pub log_storage_key: String,

    // Free-text descriptors forwarded to the analysis collaborator
    pub problem_description: Option<String>,
    pub tuning_goals: Option<String>,
    pub flying_style: Option<String>,
    pub frame_description: Option<String>,

    /// Customer's original configuration dump, diffed against the output.
    pub cli_dump: Option<String>,

    /// Promo code consumed instead of payment, if any.
    pub promo_code: Option<String>,
    /// Checkout reference at the payment provider, matched by the webhook.
    pub checkout_ref: Option<String>,

    pub status: OrderStatus,
    pub error_message: Option<String>,

    // Outputs
    pub analysis_result: Option<AnalysisResult>,
    pub cli_commands: Option<String>,
    pub report_storage_key: Option<String>,

    pub created_at: DateTime,
    pub paid_at: Option<DateTime>,
    pub completed_at: Option<DateTime>,
    pub delivered_at: Option<DateTime>,
}

/// Structured result returned by the analysis collaborator.
///
/// The `pid` block is fully typed; `filters` and `other` intentionally stay
/// schema-agnostic JSON so new firmware parameters pass through untouched.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalysisResult {
    pub analysis: AnalysisNotes,
    pub pid: PidValues,
    #[serde(default)]
    pub filters: serde_json::Value,
    #[serde(default)]
    pub other: serde_json::Value,
    #[serde(default)]
    pub cli_commands: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalysisNotes {
    pub summary: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PidValues {
    pub roll: AxisPid,
    pub pitch: AxisPid,
    pub yaw: AxisPid,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct AxisPid {
    pub p: f64,
    pub i: f64,
    pub d: f64,
    pub f: f64,
}

impl TuneOrder {
    /// Generate a human-facing order number: `TUNE-yyyymmdd-RANDOM6`.
    pub fn generate_order_number() -> String {
        let date = chrono::Utc::now().format("%Y%m%d");
        let mut rng = rand::thread_rng();
        let suffix: String = (0..6)
            .map(|_| {
                let idx = rng.gen_range(0..UNAMBIGUOUS_ALPHABET.len());
                UNAMBIGUOUS_ALPHABET[idx] as char
            })
            .collect();
        format!("{}-{}-{}", ORDER_NUMBER_PREFIX, date, suffix)
    }
}

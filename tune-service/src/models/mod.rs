pub mod order;
pub mod promo;

pub use order::{AnalysisNotes, AnalysisResult, AxisPid, OrderStatus, PidValues, TuneOrder};
pub use promo::{PromoCode, PromoCodeType, PromoCodeUsage};

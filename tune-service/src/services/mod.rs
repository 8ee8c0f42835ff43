pub mod analysis;
pub mod decoder;
pub mod diff;
pub mod mailer;
pub mod metrics;
pub mod payment;
pub mod precheck;
pub mod processor;
pub mod promo;
pub mod repository;
pub mod storage;

pub use analysis::{AnalysisClient, HttpAnalysisClient};
pub use decoder::{DecoderClient, HttpDecoderClient};
pub use mailer::Mailer;
pub use metrics::{get_metrics, init_metrics};
pub use payment::PaymentGateway;
pub use precheck::PrecheckGate;
pub use processor::{OrderProcessor, ProcessOutcome};
pub use promo::PromoLedger;
pub use repository::TuneRepository;
pub use storage::{LocalStorage, Storage};

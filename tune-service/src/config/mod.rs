use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use std::env;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub decoder: DecoderConfig,
    pub analysis: AnalysisConfig,
    pub payment: PaymentConfig,
    pub smtp: SmtpConfig,
    pub admin: AdminConfig,
    pub precheck: PrecheckConfig,
    pub service_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StorageConfig {
    pub local_path: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DecoderConfig {
    pub endpoint: String,
    /// Timeout for the state machine's decode call.
    pub timeout_secs: u64,
    /// Tighter timeout for the advisory precheck path.
    pub precheck_timeout_secs: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct AnalysisConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct PaymentConfig {
    pub key_id: String,
    pub key_secret: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub endpoint: String,
    /// Price of one tuning pass in the smallest currency unit.
    pub amount_minor: u64,
    pub currency: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SmtpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct AdminConfig {
    pub secret: Secret<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct PrecheckConfig {
    /// Files below this size cannot contain a meaningful flight segment.
    pub min_bytes: u64,
    pub min_duration_secs: f64,
    pub min_sample_rate_hz: f64,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let host = env_or("TUNE_SERVICE_HOST", "0.0.0.0");
        let port = env_or("TUNE_SERVICE_PORT", "3010").parse()?;

        let db_url = env_or("TUNE_DATABASE_URL", "mongodb://localhost:27017");
        let db_name = env_or("TUNE_DATABASE_NAME", "tune_db");

        let storage_path = env_or("TUNE_STORAGE_PATH", "data/logs");

        let decoder_endpoint = env_or("TUNE_DECODER_ENDPOINT", "http://localhost:8090");
        let decoder_timeout = env_or("TUNE_DECODER_TIMEOUT_SECS", "60").parse()?;
        let precheck_timeout = env_or("TUNE_PRECHECK_TIMEOUT_SECS", "20").parse()?;

        let analysis_endpoint = env_or("TUNE_ANALYSIS_ENDPOINT", "http://localhost:8091");
        let analysis_timeout = env_or("TUNE_ANALYSIS_TIMEOUT_SECS", "120").parse()?;

        let payment_key_id = env_or("TUNE_PAYMENT_KEY_ID", "");
        let payment_key_secret = env_or("TUNE_PAYMENT_KEY_SECRET", "");
        let payment_webhook_secret = env_or("TUNE_PAYMENT_WEBHOOK_SECRET", "dev-webhook-secret");
        let payment_endpoint = env_or("TUNE_PAYMENT_ENDPOINT", "https://api.razorpay.com/v1");
        let payment_amount = env_or("TUNE_PRICE_MINOR", "1999").parse()?;
        let payment_currency = env_or("TUNE_PRICE_CURRENCY", "EUR");

        let smtp_enabled = env_or("TUNE_SMTP_ENABLED", "false").parse().unwrap_or(false);
        let smtp_host = env_or("TUNE_SMTP_HOST", "localhost");
        let smtp_port = env_or("TUNE_SMTP_PORT", "587").parse()?;
        let smtp_user = env_or("TUNE_SMTP_USER", "");
        let smtp_password = env_or("TUNE_SMTP_PASSWORD", "");
        let from_email = env_or("TUNE_SMTP_FROM_EMAIL", "tunes@example.com");
        let from_name = env_or("TUNE_SMTP_FROM_NAME", "Tune Service");

        let admin_secret = env_or("TUNE_ADMIN_SECRET", "dev-admin-secret");

        let min_bytes = env_or("TUNE_PRECHECK_MIN_BYTES", "10240").parse()?;
        let min_duration = env_or("TUNE_PRECHECK_MIN_DURATION_SECS", "30").parse()?;
        let min_sample_rate = env_or("TUNE_PRECHECK_MIN_SAMPLE_RATE_HZ", "500").parse()?;

        Ok(Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig {
                url: Secret::new(db_url),
                db_name,
            },
            storage: StorageConfig {
                local_path: storage_path,
            },
            decoder: DecoderConfig {
                endpoint: decoder_endpoint,
                timeout_secs: decoder_timeout,
                precheck_timeout_secs: precheck_timeout,
            },
            analysis: AnalysisConfig {
                endpoint: analysis_endpoint,
                timeout_secs: analysis_timeout,
            },
            payment: PaymentConfig {
                key_id: payment_key_id,
                key_secret: Secret::new(payment_key_secret),
                webhook_secret: Secret::new(payment_webhook_secret),
                endpoint: payment_endpoint,
                amount_minor: payment_amount,
                currency: payment_currency,
            },
            smtp: SmtpConfig {
                enabled: smtp_enabled,
                host: smtp_host,
                port: smtp_port,
                user: smtp_user,
                password: smtp_password,
                from_email,
                from_name,
            },
            admin: AdminConfig {
                secret: Secret::new(admin_secret),
            },
            precheck: PrecheckConfig {
                min_bytes,
                min_duration_secs: min_duration,
                min_sample_rate_hz: min_sample_rate,
            },
            service_name: "tune-service".to_string(),
        })
    }
}

//! Blackbox decoder collaborator client.
//!
//! The decoder is an external service that turns raw flight-log bytes into
//! structured metrics. It is called with a bounded timeout; the precheck path
//! treats failures as advisory, the order state machine treats them as fatal
//! for the run.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("Decoder API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Decoder request timed out")]
    Timeout,

    #[error("Decoder network error: {0}")]
    NetworkError(String),

    #[error("Decoder returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Metrics extracted from a decoded log container.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DecodedMeta {
    pub duration_s: f64,
    pub sample_rate_hz: f64,
    #[serde(default)]
    pub segments_found: u32,
    #[serde(default)]
    pub logs_found: u32,
    #[serde(default)]
    pub firmware: Option<String>,
    #[serde(default)]
    pub board: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DecodedLog {
    pub meta: DecodedMeta,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub features: serde_json::Value,
}

#[async_trait]
pub trait DecoderClient: Send + Sync {
    async fn decode(&self, raw_log: Vec<u8>) -> Result<DecodedLog, DecoderError>;
}

#[derive(Clone)]
pub struct HttpDecoderClient {
    client: Client,
    endpoint: String,
}

impl HttpDecoderClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl DecoderClient for HttpDecoderClient {
    async fn decode(&self, raw_log: Vec<u8>) -> Result<DecodedLog, DecoderError> {
        let url = format!("{}/decode", self.endpoint);

        tracing::debug!(bytes = raw_log.len(), "Sending log to decoder");

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/octet-stream")
            .body(raw_log)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DecoderError::Timeout
                } else {
                    DecoderError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DecoderError::ApiError { status, body });
        }

        response
            .json::<DecodedLog>()
            .await
            .map_err(|e| DecoderError::InvalidResponse(e.to_string()))
    }
}

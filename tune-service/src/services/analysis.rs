//! Tuning analysis collaborator client.
//!
//! Sends decoded metrics, the customer's original configuration and their
//! free-text descriptors to the external analysis engine, and expects back a
//! structured [`AnalysisResult`].

use crate::models::AnalysisResult;
use crate::services::decoder::DecodedLog;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Analysis API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Analysis request timed out")]
    Timeout,

    #[error("Analysis network error: {0}")]
    NetworkError(String),

    #[error("Analysis returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Serialize, Clone)]
pub struct AnalysisRequest {
    pub metrics: DecodedLog,
    pub original_config: Option<String>,
    pub problem_description: Option<String>,
    pub tuning_goals: Option<String>,
    pub flying_style: Option<String>,
    pub frame_description: Option<String>,
    pub locale: String,
}

#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisResult, AnalysisError>;
}

#[derive(Clone)]
pub struct HttpAnalysisClient {
    client: Client,
    endpoint: String,
}

impl HttpAnalysisClient {
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
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        let url = format!("{}/analyze", self.endpoint);

        tracing::debug!(
            duration_s = request.metrics.meta.duration_s,
            locale = %request.locale,
            "Sending decoded metrics to analysis engine"
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout
                } else {
                    AnalysisError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::ApiError { status, body });
        }

        response
            .json::<AnalysisResult>()
            .await
            .map_err(|e| AnalysisError::InvalidResponse(e.to_string()))
    }
}

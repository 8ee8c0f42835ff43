//! Precheck gate.
//!
//! Advisory validation of an uploaded log before checkout. Purely
//! read-only: nothing is persisted, no auth or payment required. Hard
//! failures (wrong container, hopelessly small file) block checkout; every
//! decoded shortcoming, including an unreachable decoder, only degrades the
//! report to `warn` so the advisory check can never block the paid flow.

use crate::config::PrecheckConfig;
use crate::services::decoder::{DecodedMeta, DecoderClient};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

// Hard-failure codes (uppercase), advisory tags (lowercase).
pub const ISSUE_FILE_TOO_SMALL: &str = "FILE_TOO_SMALL";
pub const ISSUE_INVALID_LOG_FORMAT: &str = "INVALID_LOG_FORMAT";
pub const ISSUE_SHORT_DURATION: &str = "short_duration";
pub const ISSUE_LOW_SAMPLE_RATE: &str = "low_sample_rate";
pub const ISSUE_MULTIPLE_LOGS: &str = "multiple_logs";
pub const ISSUE_DECODER_FAILED: &str = "decoder_failed";

/// Blackbox log containers open with this header line.
const LOG_SIGNATURE: &[u8] = b"H Product:Blackbox";

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PrecheckStatus {
    Ok,
    Warn,
    Fail,
}

#[derive(Debug, Serialize, Clone)]
pub struct PrecheckIssue {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct PrecheckReport {
    pub status: PrecheckStatus,
    pub issues: Vec<PrecheckIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<DecodedMeta>,
}

pub fn has_log_signature(data: &[u8]) -> bool {
    data.starts_with(LOG_SIGNATURE)
}

/// Hard gates, evaluated before the decoder is ever contacted.
fn hard_issues(config: &PrecheckConfig, data: &[u8]) -> Vec<PrecheckIssue> {
    let mut issues = Vec::new();
    if (data.len() as u64) < config.min_bytes {
        issues.push(PrecheckIssue {
            code: ISSUE_FILE_TOO_SMALL,
            message: format!(
                "File is {} bytes; a log below {} bytes cannot contain a usable flight segment",
                data.len(),
                config.min_bytes
            ),
        });
    }
    if !has_log_signature(data) {
        issues.push(PrecheckIssue {
            code: ISSUE_INVALID_LOG_FORMAT,
            message: "File does not look like a blackbox log container".to_string(),
        });
    }
    issues
}

/// Usability hints from the decoded metrics. None of these block checkout.
fn advisory_issues(config: &PrecheckConfig, meta: &DecodedMeta) -> Vec<PrecheckIssue> {
    let mut issues = Vec::new();
    if meta.duration_s < config.min_duration_secs {
        issues.push(PrecheckIssue {
            code: ISSUE_SHORT_DURATION,
            message: format!(
                "Decoded flight is {:.1}s; at least {:.0}s gives a much better tune",
                meta.duration_s, config.min_duration_secs
            ),
        });
    }
    if meta.sample_rate_hz < config.min_sample_rate_hz {
        issues.push(PrecheckIssue {
            code: ISSUE_LOW_SAMPLE_RATE,
            message: format!(
                "Sample rate {:.0} Hz is below the recommended {:.0} Hz",
                meta.sample_rate_hz, config.min_sample_rate_hz
            ),
        });
    }
    if meta.segments_found > 1 || meta.logs_found > 1 {
        issues.push(PrecheckIssue {
            code: ISSUE_MULTIPLE_LOGS,
            message: "Container holds more than one flight; only the longest will be analyzed"
                .to_string(),
        });
    }
    issues
}

#[derive(Clone)]
pub struct PrecheckGate {
    decoder: Arc<dyn DecoderClient>,
    config: PrecheckConfig,
    decoder_timeout: Duration,
}

impl PrecheckGate {
    pub fn new(
        decoder: Arc<dyn DecoderClient>,
        config: PrecheckConfig,
        decoder_timeout: Duration,
    ) -> Self {
        Self {
            decoder,
            config,
            decoder_timeout,
        }
    }

    pub async fn check(&self, filename: &str, data: &[u8]) -> PrecheckReport {
        let issues = hard_issues(&self.config, data);
        if !issues.is_empty() {
            tracing::info!(
                filename = %filename,
                size = data.len(),
                codes = ?issues.iter().map(|i| i.code).collect::<Vec<_>>(),
                "Precheck hard failure"
            );
            return PrecheckReport {
                status: PrecheckStatus::Fail,
                issues,
                meta: None,
            };
        }

        let decode = tokio::time::timeout(self.decoder_timeout, self.decoder.decode(data.to_vec()));
        let (mut issues, meta) = match decode.await {
            Ok(Ok(decoded)) => (advisory_issues(&self.config, &decoded.meta), Some(decoded.meta)),
            Ok(Err(e)) => {
                tracing::warn!(filename = %filename, error = %e, "Decoder failed during precheck");
                (
                    vec![PrecheckIssue {
                        code: ISSUE_DECODER_FAILED,
                        message: "Decoder is unavailable; the log looks structurally valid"
                            .to_string(),
                    }],
                    None,
                )
            }
            Err(_) => {
                tracing::warn!(filename = %filename, "Decoder timed out during precheck");
                (
                    vec![PrecheckIssue {
                        code: ISSUE_DECODER_FAILED,
                        message: "Decoder timed out; the log looks structurally valid".to_string(),
                    }],
                    None,
                )
            }
        };

        let status = if issues.is_empty() {
            PrecheckStatus::Ok
        } else {
            PrecheckStatus::Warn
        };
        issues.sort_by_key(|i| i.code);

        PrecheckReport {
            status,
            issues,
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PrecheckConfig {
        PrecheckConfig {
            min_bytes: 1024,
            min_duration_secs: 30.0,
            min_sample_rate_hz: 500.0,
        }
    }

    fn log_of(size: usize) -> Vec<u8> {
        let mut data = b"H Product:Blackbox flight data recorder\n".to_vec();
        data.resize(size, b'x');
        data
    }

    #[test]
    fn small_file_fails_hard() {
        let issues = hard_issues(&config(), &log_of(100));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, ISSUE_FILE_TOO_SMALL);
    }

    #[test]
    fn wrong_signature_fails_hard() {
        let data = vec![0u8; 4096];
        let issues = hard_issues(&config(), &data);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, ISSUE_INVALID_LOG_FORMAT);
    }

    #[test]
    fn small_and_malformed_accumulate() {
        let issues = hard_issues(&config(), b"not a log");
        let codes: Vec<&str> = issues.iter().map(|i| i.code).collect();
        assert!(codes.contains(&ISSUE_FILE_TOO_SMALL));
        assert!(codes.contains(&ISSUE_INVALID_LOG_FORMAT));
    }

    #[test]
    fn valid_log_passes_hard_gates() {
        assert!(hard_issues(&config(), &log_of(4096)).is_empty());
    }

    #[test]
    fn short_duration_is_advisory() {
        let meta = DecodedMeta {
            duration_s: 10.0,
            sample_rate_hz: 2000.0,
            segments_found: 1,
            logs_found: 1,
            firmware: None,
            board: None,
        };
        let issues = advisory_issues(&config(), &meta);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, ISSUE_SHORT_DURATION);
    }

    #[test]
    fn multiple_segments_tagged_once() {
        let meta = DecodedMeta {
            duration_s: 60.0,
            sample_rate_hz: 2000.0,
            segments_found: 3,
            logs_found: 1,
            firmware: None,
            board: None,
        };
        let issues = advisory_issues(&config(), &meta);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].code, ISSUE_MULTIPLE_LOGS);
    }
}

use crate::config::SmtpConfig;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailerError {
    #[error("Mailer configuration error: {0}")]
    Configuration(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Failed to send email: {0}")]
    SendFailed(String),
}

/// Async SMTP delivery. With `enabled = false` (dev environments) sends are
/// logged and skipped instead of failing the order.
pub struct Mailer {
    config: SmtpConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl Mailer {
    pub fn new(config: SmtpConfig) -> Result<Self, MailerError> {
        if !config.enabled {
            return Ok(Self {
                config,
                transport: None,
            });
        }

        let creds = Credentials::new(config.user.clone(), config.password.clone());
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| MailerError::Configuration(format!("Failed to create SMTP relay: {}", e)))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self {
            config,
            transport: Some(transport),
        })
    }

    pub async fn send(&self, to: &str, subject: &str, body_text: &str) -> Result<(), MailerError> {
        if !self.config.enabled {
            tracing::info!(to = %to, subject = %subject, "SMTP disabled; skipping email delivery");
            return Ok(());
        }

        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| MailerError::Configuration("SMTP transport not initialized".into()))?;

        let from_mailbox: Mailbox =
            format!("{} <{}>", self.config.from_name, self.config.from_email)
                .parse()
                .map_err(|e| MailerError::Configuration(format!("Invalid from address: {}", e)))?;
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| MailerError::InvalidRecipient(format!("Invalid recipient: {}", e)))?;

        let message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body_text.to_string())
            .map_err(|e| MailerError::SendFailed(format!("Failed to build message: {}", e)))?;

        transport
            .send(message)
            .await
            .map_err(|e| MailerError::SendFailed(e.to_string()))?;

        tracing::info!(to = %to, subject = %subject, "Email sent");
        Ok(())
    }
}

//! Payment provider client.
//!
//! Creates checkout sessions and verifies webhook callbacks. The provider's
//! own protocol is not this service's concern beyond two things: the checkout
//! reference it hands back at session creation, and the HMAC signature it
//! puts on callback deliveries.

use crate::config::PaymentConfig;
use anyhow::{anyhow, Result};
use hmac::{Hmac, Mac};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct PaymentGateway {
    client: Client,
    config: PaymentConfig,
}

#[derive(Debug, Serialize)]
struct CreateCheckoutRequest {
    amount: u64,
    currency: String,
    receipt: String,
}

/// Checkout session registered at the provider. `id` is the checkout
/// reference later matched by the webhook.
#[derive(Debug, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub amount: u64,
    pub currency: String,
    #[serde(default)]
    pub status: String,
}

/// Callback payload the provider posts to `/webhooks/payment`.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhookEvent {
    pub event: String,
    pub checkout_ref: String,
}

impl PaymentGateway {
    pub fn new(config: PaymentConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Check if provider credentials are set.
    pub fn is_configured(&self) -> bool {
        !self.config.key_id.is_empty() && !self.config.key_secret.expose_secret().is_empty()
    }

    /// Register a checkout session for an order.
    pub async fn create_checkout(
        &self,
        amount_minor: u64,
        currency: &str,
        receipt: &str,
    ) -> Result<CheckoutSession> {
        if !self.is_configured() {
            return Err(anyhow!("Payment gateway is not configured"));
        }

        let url = format!("{}/orders", self.config.endpoint);
        let request = CreateCheckoutRequest {
            amount: amount_minor,
            currency: currency.to_string(),
            receipt: receipt.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.key_id, Some(self.config.key_secret.expose_secret()))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Checkout creation failed ({}): {}", status, body));
        }

        let session = response.json::<CheckoutSession>().await?;
        Ok(session)
    }

    /// Verify the HMAC-SHA256 hex signature over the raw webhook body.
    /// `Mac::verify_slice` compares in constant time.
    pub fn verify_webhook_signature(&self, body: &str, signature_hex: &str) -> Result<bool> {
        let expected = hex::decode(signature_hex.trim())
            .map_err(|_| anyhow!("Webhook signature is not valid hex"))?;

        let mut mac =
            HmacSha256::new_from_slice(self.config.webhook_secret.expose_secret().as_bytes())
                .map_err(|e| anyhow!("Failed to initialize HMAC: {}", e))?;
        mac.update(body.as_bytes());

        Ok(mac.verify_slice(&expected).is_ok())
    }

    pub fn parse_webhook_event(&self, body: &str) -> Result<PaymentWebhookEvent> {
        let event = serde_json::from_str(body)?;
        Ok(event)
    }
}

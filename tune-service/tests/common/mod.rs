//! Test helper module for tune-service integration tests.
//!
//! Spawns the full application against a per-test MongoDB database with the
//! decoder, analysis and payment collaborators replaced by wiremock stubs.

#![allow(dead_code)]

use hmac::{Hmac, Mac};
use secrecy::Secret;
use sha2::Sha256;
use tune_service::config::{
    AdminConfig, AnalysisConfig, Config, DatabaseConfig, DecoderConfig, PaymentConfig,
    PrecheckConfig, ServerConfig, SmtpConfig, StorageConfig,
};
use tune_service::startup::{AppState, Application};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_ADMIN_SECRET: &str = "test-admin-secret";
pub const TEST_WEBHOOK_SECRET: &str = "test-webhook-secret";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub db_name: String,
    pub state: AppState,
    pub decoder: MockServer,
    pub analysis: MockServer,
    pub payment: MockServer,
    pub client: reqwest::Client,
    storage_path: String,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with a config tweak applied before the application is built.
    pub async fn spawn_with(customize: impl FnOnce(&mut Config)) -> Self {
        let decoder = MockServer::start().await;
        let analysis = MockServer::start().await;
        let payment = MockServer::start().await;

        let db_name = format!("tune_test_{}", Uuid::new_v4().simple());
        let storage_path = format!("target/test-storage-{}", Uuid::new_v4());

        let mut config = Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Random port for testing
            },
            database: DatabaseConfig {
                url: Secret::new(
                    std::env::var("TUNE_DATABASE_URL")
                        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
                ),
                db_name: db_name.clone(),
            },
            storage: StorageConfig {
                local_path: storage_path.clone(),
            },
            decoder: DecoderConfig {
                endpoint: decoder.uri(),
                timeout_secs: 5,
                precheck_timeout_secs: 2,
            },
            analysis: AnalysisConfig {
                endpoint: analysis.uri(),
                timeout_secs: 5,
            },
            payment: PaymentConfig {
                key_id: "test-key".to_string(),
                key_secret: Secret::new("test-key-secret".to_string()),
                webhook_secret: Secret::new(TEST_WEBHOOK_SECRET.to_string()),
                endpoint: payment.uri(),
                amount_minor: 1999,
                currency: "EUR".to_string(),
            },
            smtp: SmtpConfig {
                enabled: false,
                host: "localhost".to_string(),
                port: 587,
                user: String::new(),
                password: String::new(),
                from_email: "tunes@example.com".to_string(),
                from_name: "Tune Service".to_string(),
            },
            admin: AdminConfig {
                secret: Secret::new(TEST_ADMIN_SECRET.to_string()),
            },
            precheck: PrecheckConfig {
                min_bytes: 1024,
                min_duration_secs: 30.0,
                min_sample_rate_hz: 500.0,
            },
            service_name: "tune-service".to_string(),
        };
        customize(&mut config);

        // Default checkout-session stub; individual tests may add stricter mocks.
        Mock::given(method("POST"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": format!("chk_{}", Uuid::new_v4().simple()),
                "amount": 1999,
                "currency": "EUR",
                "status": "created"
            })))
            .mount(&payment)
            .await;

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let state = app.state();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            db_name,
            state,
            decoder,
            analysis,
            payment,
            client,
            storage_path,
        }
    }

    /// A structurally valid blackbox log of the given size.
    pub fn valid_log(size: usize) -> Vec<u8> {
        let mut data = b"H Product:Blackbox flight data recorder by Nicholas Sherlock\n".to_vec();
        data.resize(size.max(data.len()), b'x');
        data
    }

    /// Mount a decoder stub returning the given metrics.
    pub async fn stub_decoder(&self, duration_s: f64, sample_rate_hz: f64, segments: u32) {
        Mock::given(method("POST"))
            .and(path("/decode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "meta": {
                    "duration_s": duration_s,
                    "sample_rate_hz": sample_rate_hz,
                    "segments_found": segments,
                    "logs_found": 1,
                    "firmware": "4.5.1",
                    "board": "TESTF7"
                },
                "config": {},
                "features": {}
            })))
            .mount(&self.decoder)
            .await;
    }

    /// Mount an analysis stub returning a complete result with the given
    /// CLI commands block.
    pub async fn stub_analysis(&self, cli_commands: &str) {
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(Self::analysis_body(cli_commands)),
            )
            .mount(&self.analysis)
            .await;
    }

    pub fn analysis_body(cli_commands: &str) -> serde_json::Value {
        serde_json::json!({
            "analysis": {
                "summary": "Roll axis shows mild mid-throttle oscillation.",
                "issues": ["roll P slightly high"],
                "recommendations": ["raise D on pitch"]
            },
            "pid": {
                "roll":  { "p": 45.0, "i": 80.0, "d": 30.0, "f": 120.0 },
                "pitch": { "p": 47.0, "i": 84.0, "d": 34.0, "f": 125.0 },
                "yaw":   { "p": 40.0, "i": 90.0, "d": 0.0,  "f": 110.0 }
            },
            "filters": { "gyro_lpf1_static_hz": 250 },
            "other": {},
            "cli_commands": cli_commands
        })
    }

    /// Submit a checkout with a valid log. Returns the parsed response body
    /// after asserting the expected status code.
    pub async fn checkout(
        &self,
        promo_code: Option<&str>,
        cli_dump: Option<&str>,
        expect_status: u16,
    ) -> serde_json::Value {
        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(Self::valid_log(4096)).file_name("flight.bbl"),
            )
            .text("email", "pilot@example.com")
            .text("locale", "en")
            .text("tuning_goals", "smooth freestyle");
        if let Some(code) = promo_code {
            form = form.text("promo_code", code.to_string());
        }
        if let Some(dump) = cli_dump {
            form = form.text("cli_dump", dump.to_string());
        }

        let response = self
            .client
            .post(format!("{}/orders", self.address))
            .multipart(form)
            .send()
            .await
            .expect("Failed to execute checkout request");
        assert_eq!(response.status().as_u16(), expect_status);
        response.json().await.expect("Checkout response was not JSON")
    }

    /// Fetch the order projection.
    pub async fn get_order(&self, order_number: &str) -> reqwest::Response {
        self.client
            .get(format!("{}/orders/{}", self.address, order_number))
            .send()
            .await
            .expect("Failed to execute get-order request")
    }

    /// Poll the facade until the order reaches one of the given statuses.
    pub async fn wait_for_status(
        &self,
        order_number: &str,
        statuses: &[&str],
    ) -> serde_json::Value {
        for _ in 0..100 {
            let body: serde_json::Value = self
                .get_order(order_number)
                .await
                .json()
                .await
                .expect("Order response was not JSON");
            let status = body["status"].as_str().unwrap_or_default().to_string();
            if statuses.contains(&status.as_str()) {
                return body;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
        }
        panic!(
            "Order {} never reached any of {:?}",
            order_number, statuses
        );
    }

    /// Sign a webhook body the way the payment provider does.
    pub fn sign_webhook(body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(TEST_WEBHOOK_SECRET.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Deliver a signed payment webhook for the given checkout reference.
    pub async fn send_payment_webhook(&self, checkout_ref: &str) -> reqwest::Response {
        let body = serde_json::json!({
            "event": "payment.captured",
            "checkout_ref": checkout_ref
        })
        .to_string();
        let signature = Self::sign_webhook(&body);

        self.client
            .post(format!("{}/webhooks/payment", self.address))
            .header("X-Payment-Signature", signature)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .expect("Failed to deliver webhook")
    }

    pub async fn create_promo(
        &self,
        code: Option<&str>,
        code_type: &str,
        max_uses: Option<i64>,
    ) -> reqwest::Response {
        let mut body = serde_json::json!({ "code_type": code_type });
        if let Some(code) = code {
            body["code"] = serde_json::json!(code);
        }
        if let Some(max) = max_uses {
            body["max_uses"] = serde_json::json!(max);
        }

        self.client
            .post(format!("{}/admin/promo-codes", self.address))
            .header("X-Admin-Secret", TEST_ADMIN_SECRET)
            .json(&body)
            .send()
            .await
            .expect("Failed to execute create-promo request")
    }

    /// Cleanup test resources (database and storage).
    pub async fn cleanup(&self) {
        let _ = self.state.db.drop(None).await;
        let _ = tokio::fs::remove_dir_all(&self.storage_path).await;
    }
}

//! Application assembly and lifecycle.

use crate::config::Config;
use crate::error::AppError;
use crate::handlers;
use crate::services::{
    HttpAnalysisClient, HttpDecoderClient, LocalStorage, Mailer, OrderProcessor, PaymentGateway,
    PrecheckGate, PromoLedger, Storage, TuneRepository,
};
use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{delete, get, post},
    Router,
};
use mongodb::{options::ClientOptions, Client};
use secrecy::ExposeSecret;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

// Uploads may exceed axum's 2 MB default body limit by a wide margin.
const BODY_LIMIT_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub db: mongodb::Database,
    pub config: Config,
    pub repository: TuneRepository,
    pub storage: Arc<dyn Storage>,
    pub precheck: PrecheckGate,
    pub promo: PromoLedger,
    pub processor: Arc<OrderProcessor>,
    pub payment: PaymentGateway,
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let mut client_options = ClientOptions::parse(config.database.url.expose_secret())
            .await
            .map_err(|e| {
                tracing::error!("Failed to parse MongoDB connection string: {}", e);
                AppError::DatabaseError(e.into())
            })?;
        client_options.app_name = Some("tune-service".to_string());

        let client = Client::with_options(client_options).map_err(|e| {
            tracing::error!("Failed to create MongoDB client: {}", e);
            AppError::DatabaseError(e.into())
        })?;
        let db = client.database(&config.database.db_name);

        let repository = TuneRepository::new(&db);
        repository.init_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            AppError::DatabaseError(e)
        })?;

        let storage: Arc<dyn Storage> =
            Arc::new(LocalStorage::new(&config.storage.local_path).await.map_err(|e| {
                tracing::error!(
                    "Failed to initialize local storage at {}: {}",
                    config.storage.local_path,
                    e
                );
                e
            })?);

        let decoder = Arc::new(HttpDecoderClient::new(
            &config.decoder.endpoint,
            Duration::from_secs(config.decoder.timeout_secs),
        ));
        let precheck = PrecheckGate::new(
            decoder.clone(),
            config.precheck.clone(),
            Duration::from_secs(config.decoder.precheck_timeout_secs),
        );

        let analysis = Arc::new(HttpAnalysisClient::new(
            &config.analysis.endpoint,
            Duration::from_secs(config.analysis.timeout_secs),
        ));

        let mailer = Arc::new(
            Mailer::new(config.smtp.clone())
                .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?,
        );
        if !config.smtp.enabled {
            tracing::warn!("SMTP disabled - delivery emails will be logged and skipped");
        }

        let payment = PaymentGateway::new(config.payment.clone());
        if payment.is_configured() {
            tracing::info!("Payment gateway client initialized");
        } else {
            tracing::warn!("Payment gateway not configured - orders require promo codes");
        }

        let promo = PromoLedger::new(repository.clone());
        let processor = Arc::new(OrderProcessor::new(
            repository.clone(),
            storage.clone(),
            decoder,
            analysis,
            mailer,
        ));

        let state = AppState {
            db,
            config: config.clone(),
            repository,
            storage,
            precheck,
            promo,
            processor,
            payment,
        };

        let app = Router::new()
            .route("/health", get(handlers::health::health_check))
            .route("/ready", get(handlers::health::readiness_check))
            .route("/metrics", get(handlers::health::metrics_endpoint))
            .route("/precheck", post(handlers::precheck::precheck_log))
            .route("/orders", post(handlers::orders::checkout))
            .route("/orders/:order_number", get(handlers::orders::get_order))
            .route(
                "/orders/:order_number/process",
                post(handlers::orders::process_order),
            )
            .route("/webhooks/payment", post(handlers::webhook::payment_webhook))
            .route("/promo-codes/validate", post(handlers::promo::validate_code))
            .route(
                "/admin/promo-codes",
                post(handlers::promo::create_code).get(handlers::promo::list_codes),
            )
            .route(
                "/admin/promo-codes/:code",
                delete(handlers::promo::deactivate_code),
            )
            .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
            .layer(TraceLayer::new_for_http())
            .with_state(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn db(&self) -> &mongodb::Database {
        &self.state.db
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

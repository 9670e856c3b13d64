pub mod config;
pub mod database;
pub mod redis_client;
pub mod error;
pub mod models;
pub mod controllers;
pub mod middleware;
pub mod cache;
pub mod catalog;
pub mod services;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use catalog::{CatalogError, RegionTable};
use services::{
    mail::{MailError, MailService},
    notifier::AdminNotifier,
    payment::{PaymentError, PaymentGatewayClient},
};

#[derive(Debug, Error)]
pub enum InitError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("payment client: {0}")]
    Payment(#[from] PaymentError),
    #[error("mail client: {0}")]
    Mail(#[from] MailError),
    #[error("region table: {0}")]
    Catalog(#[from] CatalogError),
}

// Shared state для всего приложения
pub struct AppState {
    pub db: database::Database,
    pub redis: redis_client::RedisClient,
    pub cache: cache::CacheService,
    pub config: config::Config,
    pub payments: PaymentGatewayClient,
    pub mailer: MailService,
    pub notifier: AdminNotifier,
    pub regions: RegionTable,
}

impl AppState {
    pub async fn new(config: config::Config) -> Result<Arc<Self>, InitError> {
        let regions = RegionTable::load_default()?;
        info!("Region table loaded: {} pages", regions.page_count());

        let db = database::Database::connect(&config.database).await?;
        db.run_migrations().await?;

        let redis = redis_client::RedisClient::connect(&config.redis).await?;
        let cache = cache::CacheService::new(redis.clone());

        let payments = PaymentGatewayClient::from_config(&config.payment, &config.circuit_breaker)?;
        let mailer = MailService::new(
            &config.mail,
            config.features.enable_email,
            &config.app.public_api_url,
        )?;
        if !mailer.is_enabled() {
            warn!("Mail is not configured or disabled, emails will be skipped");
        }

        Ok(Arc::new(Self {
            db,
            redis,
            cache,
            config,
            payments,
            mailer,
            notifier: AdminNotifier::new(),
            regions,
        }))
    }
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let origin = match HeaderValue::from_str(frontend_url.trim_end_matches('/')) {
        Ok(origin) => AllowOrigin::exact(origin),
        Err(_) => {
            warn!("FRONTEND_URL '{}' is not a valid origin, allowing any", frontend_url);
            AllowOrigin::any()
        }
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

async fn health(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    let database = state.db.ping().await;
    let redis = state.redis.ping().await;
    Json(json!({
        "status": if database { "ok" } else { "degraded" },
        "database": database,
        "redis": redis,
        "payment_circuit": format!("{:?}", state.payments.circuit_breaker().state()),
        "admin_connections": state.notifier.connected(),
    }))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Travel Booking API v1.0" }))
        .route("/health", get(health))
        .nest("/api", controllers::routes())
        .layer(cors_layer(&state.config.app.frontend_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub mod abacatepay;
pub mod config;
pub mod status_handler;
pub mod store;

use axum::{
    http::{header, HeaderValue},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

use config::{CheckerConfig, ConfigError};
use status_handler::{check_payment_status_handler, PaymentStatusChecker};
use store::SupabaseStore;

pub const CORS_ALLOW_ORIGIN: &str = "*";
pub const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
pub const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization, x-client-info, apikey";

/// Shared by every request. A configuration failure is kept so each
/// request can report it.
pub struct AppState {
    pub checker: Result<PaymentStatusChecker, ConfigError>,
}

impl AppState {
    pub fn new(checker: Result<PaymentStatusChecker, ConfigError>) -> Self {
        Self { checker }
    }

    /// Wires the AbacatePay client and the Supabase store from configuration.
    pub fn from_config(config: Result<CheckerConfig, ConfigError>) -> Self {
        let checker = config.map(|config| {
            let http_client = reqwest::Client::new();
            let store = Arc::new(SupabaseStore::new(config.supabase.clone(), http_client.clone()));
            PaymentStatusChecker::from_config(&config, http_client, store)
        });
        Self::new(checker)
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Only GET /health is reserved; other methods on it reach the checker.
        .route(
            "/health",
            get(|| async { "OK" }).fallback(check_payment_status_handler),
        )
        .fallback(check_payment_status_handler)
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static(CORS_ALLOW_ORIGIN),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        ))
        .layer(TraceLayer::new_for_http())
}

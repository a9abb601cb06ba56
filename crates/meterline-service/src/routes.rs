//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, coupons, health, meter, wallet, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for metering endpoints.
const METER_MAX_CONCURRENT_REQUESTS: usize = 200;

/// Maximum concurrent requests for user and admin endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Metering (service API key)
/// - `POST /v1/meter/start` - Pre-flight access check
/// - `POST /v1/meter/end` - Debit a completed call
///
/// ## Wallet (user JWT)
/// - `GET /v1/wallet` - Balance and entitlement
/// - `GET /v1/wallet/ledger` - Ledger entries, newest first
/// - `POST /v1/wallet/initial-grant` - Apply the onboarding grant
/// - `POST /v1/coupons/validate` - Quote a coupon
///
/// ## Admin (admin API key)
/// - `PUT /v1/admin/packages` - Create or update a package
/// - `PUT /v1/admin/package-plans` - Create or update a package-plan
/// - `POST /v1/admin/packages/:id/plans` - Add plans to a package
/// - `PUT /v1/admin/packages/:id/plans` - Replace a package's plan list
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/payments` - Payment status updates
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout = Duration::from_secs(state.config.request_timeout_seconds);

    let state = Arc::new(state);

    let meter_routes = Router::new()
        .route("/start", post(meter::start))
        .route("/end", post(meter::end))
        .layer(ConcurrencyLimitLayer::new(METER_MAX_CONCURRENT_REQUESTS));

    let admin_routes = Router::new()
        .route("/packages", put(admin::upsert_package))
        .route("/package-plans", put(admin::upsert_package_plan))
        .route(
            "/packages/:id/plans",
            post(admin::create_package_plans).put(admin::reconcile_package_plans),
        );

    let api_routes = Router::new()
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/ledger", get(wallet::get_ledger))
        .route("/wallet/initial-grant", post(wallet::initial_grant))
        .route("/coupons/validate", post(coupons::validate_coupon))
        .nest("/admin", admin_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        .nest("/meter", meter_routes);

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(origins)
    }
}

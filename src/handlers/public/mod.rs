mod pricing;

pub use pricing::*;

use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::db::AppState;
use crate::rate_limit;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router(rate_limit: RateLimitConfig) -> Router<AppState> {
    let pricing_routes = Router::new().route("/api/pricing", get(list_pricing));
    let pricing_routes = rate_limit::apply(
        pricing_routes,
        rate_limit::standard_layer(rate_limit.standard_rpm),
    );

    Router::new()
        .route("/health", get(health))
        .merge(pricing_routes)
}

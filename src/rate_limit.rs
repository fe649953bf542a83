//! Per-IP rate limiting for the public API.
//!
//! Tiers:
//! - Strict: /api/checkout, /api/create-portal - each hit calls the payment provider
//! - Standard: /api/pricing and the rest of the authenticated API
//!
//! Webhooks and /health are never limited; the provider retries on 429.
//!
//! Configure via environment variables:
//! - RATE_LIMIT_STRICT_RPM (default: 10)
//! - RATE_LIMIT_STANDARD_RPM (default: 60)
//!
//! A value of 0 disables the tier.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;

/// Rate limiter layer type alias using governor types directly
pub type RateLimitLayer = GovernorLayer<
    tower_governor::key_extractor::PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
    axum::body::Body,
>;

/// Creates a rate limiter layer with the specified requests per minute.
/// Returns `None` when the tier is disabled.
fn create_layer(requests_per_minute: u32) -> Option<RateLimitLayer> {
    if requests_per_minute == 0 {
        return None;
    }

    let period_secs = 60 / requests_per_minute as u64;
    let config = GovernorConfigBuilder::default()
        .period(Duration::from_secs(period_secs.max(1)))
        .burst_size(requests_per_minute)
        .finish()?;

    Some(GovernorLayer::new(Arc::new(config)))
}

/// Strict tier: endpoints that call the payment provider.
pub fn strict_layer(requests_per_minute: u32) -> Option<RateLimitLayer> {
    create_layer(requests_per_minute)
}

/// Standard tier: DB-backed endpoints.
pub fn standard_layer(requests_per_minute: u32) -> Option<RateLimitLayer> {
    create_layer(requests_per_minute)
}

/// Apply `layer` to every route in `router` when the tier is enabled.
///
/// The server must be started with `into_make_service_with_connect_info`
/// for the peer-IP key extractor to work.
pub fn apply<S>(router: Router<S>, layer: Option<RateLimitLayer>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    match layer {
        Some(layer) => router.layer(layer),
        None => router,
    }
}

pub mod account;
pub mod public;
pub mod webhooks;

use axum::Router;

use crate::config::RateLimitConfig;
use crate::db::AppState;

/// Every route the server exposes, without the trace layer.
pub fn router(state: AppState, rate_limit: RateLimitConfig) -> Router<AppState> {
    Router::new()
        // Health and pricing (no auth)
        .merge(public::router(rate_limit))
        // Webhook endpoints (signature auth)
        .merge(webhooks::router())
        // Account, billing and premium (session auth)
        .merge(account::router(state, rate_limit))
}

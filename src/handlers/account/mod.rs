mod billing;
mod premium;
mod profile;

pub use billing::*;
pub use premium::*;
pub use profile::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::config::RateLimitConfig;
use crate::db::AppState;
use crate::middleware::{require_premium, session_auth};
use crate::rate_limit;

/// Authenticated API. Rate limits sit outside session verification.
pub fn router(state: AppState, rate_limit: RateLimitConfig) -> Router<AppState> {
    // Each hit calls the payment provider
    let billing_routes = Router::new()
        .route("/api/checkout", post(create_checkout))
        .route("/api/create-portal", get(create_portal))
        .layer(middleware::from_fn_with_state(state.clone(), session_auth));

    let premium_routes = Router::new()
        .route("/api/premium/{feature}", get(premium_feature))
        .layer(middleware::from_fn_with_state(state.clone(), require_premium));

    let account_routes = Router::new()
        .route("/api/user", get(get_user))
        .route("/api/user/update", post(update_user))
        .route("/api/user/notifications", post(update_notifications))
        .route("/api/subscription", get(get_subscription_summary))
        .route("/api/subscriptions", get(list_subscriptions))
        .merge(premium_routes)
        .layer(middleware::from_fn_with_state(state, session_auth));

    Router::new()
        .merge(rate_limit::apply(
            billing_routes,
            rate_limit::strict_layer(rate_limit.strict_rpm),
        ))
        .merge(rate_limit::apply(
            account_routes,
            rate_limit::standard_layer(rate_limit.standard_rpm),
        ))
}

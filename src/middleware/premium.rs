use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::error::AppError;
use crate::models::Subscription;

use super::CurrentUser;

/// The active subscription that let the request through `require_premium`.
#[derive(Debug, Clone)]
pub struct ActiveSubscription(pub Subscription);

/// Where users without a subscription are sent.
pub fn premium_required_url(site_url: &str) -> String {
    format!("{}/pricing?notice=premium_required", site_url)
}

/// Gate a route on an active subscription. Must run after `session_auth`.
pub async fn require_premium(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = request
        .extensions()
        .get::<CurrentUser>()
        .map(|u| u.0.id.clone())
        .ok_or(AppError::Unauthorized)?;

    let subscription = {
        let conn = state.db.get()?;
        queries::get_active_subscription_for_user(&conn, &user)?
    };

    let Some(subscription) = subscription else {
        tracing::debug!("Premium route denied for user {}", user);
        return Err(AppError::PremiumRequired(premium_required_url(&state.site_url)));
    };

    request.extensions_mut().insert(ActiveSubscription(subscription));

    Ok(next.run(request).await)
}

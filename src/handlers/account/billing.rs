use axum::{extract::State, response::Redirect};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::catalog;
use crate::db::{AppState, queries};
use crate::error::{AppError, OptionExt, Result, msg};
use crate::extractors::{Json, Query};
use crate::middleware::CurrentUser;
use crate::models::{Subscription, SubscriptionSummary, placeholder_email};
use crate::payments::CheckoutRequest;

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    #[serde(default, rename = "priceId", alias = "price_id")]
    pub price_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
    pub session_id: String,
}

pub async fn create_checkout(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CheckoutBody>,
) -> Result<Json<CheckoutResponse>> {
    let price_id = body
        .price_id
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::BadRequest(msg::PRICE_ID_REQUIRED.into()))?;

    let price = catalog::ensure_price(&state.db, &state.stripe, &price_id).await?;

    {
        let conn = state.db.get()?;
        if queries::has_active_subscription_for_price(&conn, &user.id, &price.id)? {
            return Err(AppError::BadRequest(msg::ALREADY_SUBSCRIBED.into()));
        }
    }

    // Webhook-created users only have a placeholder address
    let customer_email = (user.email != placeholder_email(&user.external_id)).then(|| user.email.clone());

    let session = state
        .stripe
        .create_checkout_session(&CheckoutRequest {
            price_id: price.id.clone(),
            user_external_id: user.external_id.clone(),
            customer_email,
            success_url: format!("{}/dashboard?success=true", state.site_url),
            cancel_url: format!("{}/pricing?canceled=true", state.site_url),
        })
        .await?;

    tracing::info!(
        "Checkout session {} created for user {} (price {})",
        session.id,
        user.id,
        price.id
    );

    Ok(Json(CheckoutResponse {
        url: session.url,
        session_id: session.id,
    }))
}

#[derive(Debug, Deserialize)]
pub struct PortalQuery {
    pub redirect: Option<String>,
}

/// Portal return target: the billing page, flagged when the user went to cancel.
pub fn portal_return_url(site_url: &str, redirect: Option<&str>) -> Result<String> {
    let mut url = Url::parse(&format!("{}/dashboard/billing", site_url))
        .map_err(|e| AppError::Internal(format!("Invalid site URL: {}", e)))?;
    if redirect == Some("cancel") {
        url.query_pairs_mut().append_pair("canceled", "true");
    }
    Ok(url.to_string())
}

pub async fn create_portal(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<PortalQuery>,
) -> Result<Redirect> {
    let subscription = {
        let conn = state.db.get()?;
        queries::get_active_subscription_for_user(&conn, &user.id)?
            .or_not_found(msg::NO_ACTIVE_SUBSCRIPTION)?
    };
    let customer_id = subscription
        .customer_id
        .as_deref()
        .or_not_found(msg::NO_BILLING_CUSTOMER)?;

    let return_url = portal_return_url(&state.site_url, query.redirect.as_deref())?;
    let portal_url = state
        .stripe
        .create_portal_session(customer_id, &return_url)
        .await?;

    Ok(Redirect::to(&portal_url))
}

/// Dashboard view of the user's current plan.
pub async fn get_subscription_summary(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<SubscriptionSummary>> {
    let conn = state.db.get()?;
    let subscription = queries::get_active_subscription_for_user(&conn, &user.id)?;
    let price = match subscription.as_ref().and_then(|s| s.price_id.as_deref()) {
        Some(price_id) => queries::get_price(&conn, price_id)?,
        None => None,
    };

    Ok(Json(SubscriptionSummary::new(subscription, price)))
}

/// Every subscription the user has had, newest first.
pub async fn list_subscriptions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Subscription>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_subscriptions_for_user(&conn, &user.id)?))
}

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
};

use crate::catalog;
use crate::db::{AppState, queries};
use crate::error::AppError;
use crate::payments::{StripeCheckoutSession, StripeEvent, StripeSubscription};

use super::common::{
    CheckoutData, DeletionData, EventMeta, WebhookEvent, WebhookResult, process_checkout,
    process_subscription_change, process_subscription_deleted, webhook_response,
};

fn extract_signature(headers: &HeaderMap) -> Result<String, WebhookResult> {
    headers
        .get("stripe-signature")
        .ok_or((StatusCode::BAD_REQUEST, "Missing stripe-signature header"))?
        .to_str()
        .map(|s| s.to_string())
        .map_err(|e| {
            tracing::debug!("Invalid UTF-8 in Stripe signature header: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid signature header")
        })
}

fn verify_signature(state: &AppState, body: &Bytes, signature: &str) -> Result<(), WebhookResult> {
    match state.stripe.verify_webhook_signature(body, signature) {
        Ok(true) => Ok(()),
        Ok(false) => Err((StatusCode::BAD_REQUEST, "Invalid signature")),
        Err(e) => {
            tracing::warn!("Stripe signature verification error: {}", e);
            Err((StatusCode::BAD_REQUEST, "Invalid signature header"))
        }
    }
}

/// Parse the envelope and map it onto a `WebhookEvent`.
pub fn parse_event(body: &[u8]) -> Result<(EventMeta, WebhookEvent), WebhookResult> {
    let event: StripeEvent = serde_json::from_slice(body).map_err(|e| {
        tracing::error!("Failed to parse Stripe webhook: {}", e);
        (StatusCode::BAD_REQUEST, "Invalid JSON")
    })?;

    let meta = EventMeta {
        id: event.id.clone(),
        event_type: event.event_type.clone(),
        created: event.created,
    };

    let parsed = match event.event_type.as_str() {
        "checkout.session.completed" => parse_checkout_completed(&event)?,
        "customer.subscription.created" | "customer.subscription.updated" => {
            WebhookEvent::SubscriptionChanged(Box::new(parse_subscription(&event)?))
        }
        "customer.subscription.deleted" => parse_subscription_deleted(&event)?,
        _ => WebhookEvent::Ignored,
    };

    Ok((meta, parsed))
}

fn parse_checkout_completed(event: &StripeEvent) -> Result<WebhookEvent, WebhookResult> {
    let session: StripeCheckoutSession = serde_json::from_value(event.data.object.clone())
        .map_err(|e| {
            tracing::error!("Failed to parse checkout session: {}", e);
            (StatusCode::BAD_REQUEST, "Invalid checkout session")
        })?;

    // One-off payments carry no subscription to mirror
    let Some(subscription_id) = session.subscription else {
        tracing::debug!("Checkout {} has no subscription, ignoring", session.id);
        return Ok(WebhookEvent::Ignored);
    };

    let user_external_id = session
        .metadata
        .get("user_id")
        .filter(|id| !id.is_empty())
        .cloned()
        .ok_or_else(|| {
            tracing::error!("Checkout {} is missing user_id metadata", session.id);
            (StatusCode::BAD_REQUEST, "Missing user_id in checkout metadata")
        })?;

    Ok(WebhookEvent::CheckoutCompleted(CheckoutData {
        session_id: session.id,
        user_external_id,
        subscription_id,
        price_id: session.metadata.get("price_id").filter(|p| !p.is_empty()).cloned(),
    }))
}

fn parse_subscription(event: &StripeEvent) -> Result<StripeSubscription, WebhookResult> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        tracing::error!("Failed to parse subscription: {}", e);
        (StatusCode::BAD_REQUEST, "Invalid subscription")
    })
}

fn parse_subscription_deleted(event: &StripeEvent) -> Result<WebhookEvent, WebhookResult> {
    let subscription = parse_subscription(event)?;
    Ok(WebhookEvent::SubscriptionDeleted(DeletionData {
        subscription_id: subscription.id,
        ended_at: subscription.ended_at,
        canceled_at: subscription.canceled_at,
    }))
}

fn provider_error(context: &'static str) -> impl FnOnce(AppError) -> WebhookResult {
    move |e| {
        tracing::error!("{}: {}", context, e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Payment provider error")
    }
}

/// Mirror the price a subscription's first item points at, so the
/// subscription row can reference it. A price the provider no longer knows
/// is dropped.
async fn mirror_subscription_price(
    state: &AppState,
    subscription: &StripeSubscription,
) -> Result<Option<String>, WebhookResult> {
    let Some(price) = subscription.price() else {
        return Ok(None);
    };

    match catalog::mirror_remote_price(&state.db, &state.stripe, price).await {
        Ok(price) => Ok(Some(price.id)),
        Err(AppError::NotFound(_)) => {
            tracing::warn!("Price for subscription {} not found at provider", subscription.id);
            Ok(None)
        }
        Err(e) => Err(provider_error("Failed to mirror subscription price")(e)),
    }
}

/// Price for a completed checkout: the one recorded in the session
/// metadata, else the subscription's item price.
async fn mirror_checkout_price(
    state: &AppState,
    subscription: &StripeSubscription,
    metadata_price_id: Option<&str>,
) -> Result<Option<String>, WebhookResult> {
    if let Some(price_id) = metadata_price_id {
        match catalog::ensure_price(&state.db, &state.stripe, price_id).await {
            Ok(price) => return Ok(Some(price.id)),
            Err(AppError::NotFound(_)) => {
                tracing::warn!(
                    "Checkout price {} not found at provider, using subscription item",
                    price_id
                );
            }
            Err(e) => return Err(provider_error("Failed to mirror checkout price")(e)),
        }
    }

    mirror_subscription_price(state, subscription).await
}

fn already_processed(state: &AppState, event_id: &str) -> Result<bool, WebhookResult> {
    let conn = state.db.get().map_err(|e| {
        tracing::error!("DB connection error: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;
    queries::get_webhook_event(&conn, event_id)
        .map(|e| e.is_some())
        .map_err(|e| {
            tracing::error!("Failed to look up webhook event: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        })
}

async fn handle_checkout(
    state: &AppState,
    meta: &EventMeta,
    data: CheckoutData,
) -> Result<WebhookResult, WebhookResult> {
    let subscription = state
        .stripe
        .get_subscription(&data.subscription_id)
        .await
        .map_err(provider_error("Failed to fetch checkout subscription"))?;

    let price_id = mirror_checkout_price(state, &subscription, data.price_id.as_deref()).await?;

    let mut conn = state.db.get().map_err(|e| {
        tracing::error!("DB connection error: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    // user_id is filled in once the user row is resolved inside the transaction
    let snapshot = subscription.to_upsert("", price_id, meta.created);
    process_checkout(&mut conn, meta, &data, snapshot)
}

async fn handle_subscription_change(
    state: &AppState,
    meta: &EventMeta,
    subscription: StripeSubscription,
) -> Result<WebhookResult, WebhookResult> {
    let price_id = mirror_subscription_price(state, &subscription).await?;

    let mut conn = state.db.get().map_err(|e| {
        tracing::error!("DB connection error: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;

    let snapshot = subscription.to_upsert("", price_id, meta.created);
    process_subscription_change(&mut conn, meta, subscription.user_external_id(), snapshot)
}

fn handle_subscription_deleted(
    state: &AppState,
    meta: &EventMeta,
    data: DeletionData,
) -> Result<WebhookResult, WebhookResult> {
    let mut conn = state.db.get().map_err(|e| {
        tracing::error!("DB connection error: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })?;
    process_subscription_deleted(&mut conn, meta, &data)
}

async fn process(state: &AppState, headers: &HeaderMap, body: &Bytes) -> WebhookResult {
    let signature = match extract_signature(headers) {
        Ok(s) => s,
        Err(e) => return e,
    };

    if let Err(e) = verify_signature(state, body, &signature) {
        return e;
    }

    let (meta, event) = match parse_event(body) {
        Ok(parsed) => parsed,
        Err(e) => return e,
    };

    if matches!(event, WebhookEvent::Ignored) {
        tracing::debug!("Ignoring Stripe event {} ({})", meta.id, meta.event_type);
        return (StatusCode::OK, "Event ignored");
    }

    // Early exit before provider calls; the in-transaction claim is authoritative
    match already_processed(state, &meta.id) {
        Ok(true) => return (StatusCode::OK, "Already processed"),
        Ok(false) => {}
        Err(e) => return e,
    }

    let result = match event {
        WebhookEvent::CheckoutCompleted(data) => handle_checkout(state, &meta, data).await,
        WebhookEvent::SubscriptionChanged(subscription) => {
            handle_subscription_change(state, &meta, *subscription).await
        }
        WebhookEvent::SubscriptionDeleted(data) => handle_subscription_deleted(state, &meta, data),
        WebhookEvent::Ignored => Ok((StatusCode::OK, "Event ignored")),
    };

    result.unwrap_or_else(|e| e)
}

/// Axum handler for Stripe webhooks.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    webhook_response(process(&state, &headers, &body).await)
}

//! Provider-agnostic webhook plumbing: parsed event shapes, the result
//! pair every step returns, and the transactional apply functions.
//!
//! Every apply function claims the event id inside the same DB transaction
//! as the writes it causes, so a failed apply rolls the claim back and the
//! provider's redelivery gets a clean retry.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rusqlite::Connection;

use crate::db::queries;
use crate::models::{Subscription, UpsertSubscription};
use crate::payments::StripeSubscription;

/// Result type for webhook operations.
pub type WebhookResult = (StatusCode, &'static str);

/// Render a webhook outcome as JSON: `{received, message}` on 2xx,
/// `{error}` otherwise.
pub fn webhook_response((status, message): WebhookResult) -> Response {
    if status.is_success() {
        (
            status,
            Json(serde_json::json!({ "received": true, "message": message })),
        )
            .into_response()
    } else {
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Envelope fields shared by every event.
#[derive(Debug, Clone)]
pub struct EventMeta {
    pub id: String,
    pub event_type: String,
    /// Provider creation time; orders updates to the same subscription
    pub created: i64,
}

/// Data extracted from a completed checkout.
#[derive(Debug)]
pub struct CheckoutData {
    pub session_id: String,
    /// Identity provider subject stored in checkout metadata
    pub user_external_id: String,
    pub subscription_id: String,
    /// Price recorded at checkout; preferred over the subscription's item price
    pub price_id: Option<String>,
}

/// Data extracted from a subscription deletion.
#[derive(Debug)]
pub struct DeletionData {
    pub subscription_id: String,
    pub ended_at: Option<i64>,
    pub canceled_at: Option<i64>,
}

/// Parsed webhook event.
#[derive(Debug)]
pub enum WebhookEvent {
    /// Checkout finished - creates the user (if needed) and the subscription row
    CheckoutCompleted(CheckoutData),
    /// Subscription created or changed on the provider side
    SubscriptionChanged(Box<StripeSubscription>),
    /// Subscription ended
    SubscriptionDeleted(DeletionData),
    /// Event type not relevant to billing state
    Ignored,
}

/// Claim the event id inside `tx`. `Ok(false)` means it was already applied.
fn claim(tx: &Connection, meta: &EventMeta) -> Result<bool, WebhookResult> {
    queries::try_claim_webhook_event(tx, &meta.id, &meta.event_type).map_err(|e| {
        tracing::error!("Failed to record webhook event {}: {}", meta.id, e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })
}

fn db_error(context: &'static str) -> impl FnOnce(crate::error::AppError) -> WebhookResult {
    move |e| {
        tracing::error!("{}: {}", context, e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    }
}

fn begin(conn: &mut Connection) -> Result<rusqlite::Transaction<'_>, WebhookResult> {
    conn.transaction().map_err(|e| {
        tracing::error!("Failed to start transaction: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })
}

fn commit(tx: rusqlite::Transaction<'_>) -> Result<(), WebhookResult> {
    tx.commit().map_err(|e| {
        tracing::error!("Failed to commit webhook transaction: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    })
}

/// Apply a completed checkout ATOMICALLY: event claim, user creation and
/// subscription upsert commit together or not at all.
///
/// `snapshot` is the subscription as fetched from the provider, with
/// `user_id` left for this function to fill in.
pub fn process_checkout(
    conn: &mut Connection,
    meta: &EventMeta,
    data: &CheckoutData,
    mut snapshot: UpsertSubscription,
) -> Result<WebhookResult, WebhookResult> {
    let tx = begin(conn)?;

    if !claim(&tx, meta)? {
        return Ok((StatusCode::OK, "Already processed"));
    }

    let user = queries::get_or_create_user_by_external_id(&tx, &data.user_external_id)
        .map_err(db_error("Failed to resolve checkout user"))?;

    snapshot.user_id = user.id.clone();
    let written = queries::upsert_subscription(&tx, &snapshot)
        .map_err(db_error("Failed to upsert subscription"))?;

    commit(tx)?;

    tracing::info!(
        "Checkout completed: session={}, subscription={}, user={}, status={}{}",
        data.session_id,
        snapshot.id,
        user.id,
        snapshot.status,
        if written { "" } else { " (newer state already stored)" }
    );

    Ok((StatusCode::OK, "OK"))
}

/// Apply a subscription create/update ATOMICALLY.
///
/// Existing rows keep their owner. A row seen for the first time is only
/// created when the subscription metadata names the user.
pub fn process_subscription_change(
    conn: &mut Connection,
    meta: &EventMeta,
    user_external_id: Option<&str>,
    mut snapshot: UpsertSubscription,
) -> Result<WebhookResult, WebhookResult> {
    let tx = begin(conn)?;

    if !claim(&tx, meta)? {
        return Ok((StatusCode::OK, "Already processed"));
    }

    let existing: Option<Subscription> = queries::get_subscription(&tx, &snapshot.id)
        .map_err(db_error("Failed to load subscription"))?;

    snapshot.user_id = match (existing, user_external_id) {
        (Some(existing), _) => existing.user_id,
        (None, Some(external_id)) => {
            queries::get_or_create_user_by_external_id(&tx, external_id)
                .map_err(db_error("Failed to resolve subscription user"))?
                .id
        }
        (None, None) => {
            tracing::warn!(
                "Subscription {} is unknown and carries no user_id metadata, skipping",
                snapshot.id
            );
            commit(tx)?;
            return Ok((StatusCode::OK, "Subscription owner unknown"));
        }
    };

    let written = queries::upsert_subscription(&tx, &snapshot)
        .map_err(db_error("Failed to upsert subscription"))?;

    commit(tx)?;

    if written {
        tracing::info!(
            "Subscription synced: subscription={}, user={}, status={}, event={}",
            snapshot.id,
            snapshot.user_id,
            snapshot.status,
            meta.id
        );
        Ok((StatusCode::OK, "OK"))
    } else {
        tracing::info!(
            "Stale event {} skipped for subscription {}",
            meta.id,
            snapshot.id
        );
        Ok((StatusCode::OK, "Stale event ignored"))
    }
}

/// Mark a subscription ended ATOMICALLY. Missing timestamps default to now.
pub fn process_subscription_deleted(
    conn: &mut Connection,
    meta: &EventMeta,
    data: &DeletionData,
) -> Result<WebhookResult, WebhookResult> {
    let now = chrono::Utc::now().timestamp();
    let tx = begin(conn)?;

    if !claim(&tx, meta)? {
        return Ok((StatusCode::OK, "Already processed"));
    }

    let updated = queries::mark_subscription_deleted(
        &tx,
        &data.subscription_id,
        data.ended_at.unwrap_or(now),
        data.canceled_at.unwrap_or(now),
        meta.created,
    )
    .map_err(db_error("Failed to mark subscription deleted"))?;

    let exists = updated
        || queries::get_subscription(&tx, &data.subscription_id)
            .map_err(db_error("Failed to load subscription"))?
            .is_some();

    commit(tx)?;

    match (updated, exists) {
        (true, _) => {
            tracing::info!("Subscription canceled: subscription={}", data.subscription_id);
            Ok((StatusCode::OK, "OK"))
        }
        (false, true) => {
            tracing::info!(
                "Stale deletion {} skipped for subscription {}",
                meta.id,
                data.subscription_id
            );
            Ok((StatusCode::OK, "Stale event ignored"))
        }
        (false, false) => {
            tracing::warn!(
                "Deletion for unknown subscription {}",
                data.subscription_id
            );
            Ok((StatusCode::OK, "Subscription not found"))
        }
    }
}

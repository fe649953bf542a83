use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, types::Value};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    PRICE_COLS, PRODUCT_COLS, SUBSCRIPTION_COLS, USER_COLS, WEBHOOK_EVENT_COLS, query_all,
    query_one,
};

/// SQL filter matching `SubscriptionStatus::ACTIVE`.
const ACTIVE_STATUS_FILTER: &str = "status IN ('active', 'trialing')";

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

fn json_text(value: &Option<serde_json::Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

/// Builder for dynamic UPDATE statements with optional fields.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Returns whether a row matched. A tracked `updated_at` counts as a
    /// field, so an update with nothing else set still touches the row.
    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() && !self.track_updated_at {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        let sql = format!("UPDATE {} SET {} WHERE id = ?", self.table, sets.join(", "));
        let affected = conn.execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Users ============

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        &[&id],
    )
}

pub fn get_user_by_external_id(conn: &Connection, external_id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE external_id = ?1", USER_COLS),
        &[&external_id],
    )
}

/// Return the local user for an identity, creating it on first sight.
///
/// Existing rows keep their locally edited name and avatar. The one
/// exception is a placeholder email (user first seen through a webhook),
/// which is replaced once a real email is known.
pub fn get_or_create_user(conn: &Connection, profile: &IdentityProfile) -> Result<User> {
    let now = now();
    let email = profile.email_or_placeholder();

    conn.execute(
        "INSERT INTO users (id, external_id, email, name, avatar_url, notification_preferences, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, '{}', ?6, ?6)
         ON CONFLICT(external_id) DO NOTHING",
        params![
            gen_id(),
            &profile.external_id,
            &email,
            &profile.name,
            &profile.avatar_url,
            now
        ],
    )?;

    let placeholder = placeholder_email(&profile.external_id);
    if email != placeholder {
        conn.execute(
            "UPDATE users SET email = ?1, updated_at = ?2 WHERE external_id = ?3 AND email = ?4",
            params![&email, now, &profile.external_id, &placeholder],
        )?;
    }

    get_user_by_external_id(conn, &profile.external_id)?.ok_or_else(|| {
        crate::error::AppError::Internal(format!(
            "User {} missing after insert",
            profile.external_id
        ))
    })
}

/// Webhook path: the only thing known about the user is the external id.
pub fn get_or_create_user_by_external_id(conn: &Connection, external_id: &str) -> Result<User> {
    get_or_create_user(conn, &IdentityProfile::placeholder(external_id))
}

pub fn update_user_profile(conn: &Connection, id: &str, input: &UpdateUser) -> Result<bool> {
    UpdateBuilder::new("users", id)
        .with_updated_at()
        .set_opt("name", input.name.as_ref().map(|n| n.trim().to_string()))
        .set_opt("email", input.email.as_ref().map(|e| e.trim().to_lowercase()))
        .execute(conn)
}

pub fn update_notification_preferences(
    conn: &Connection,
    id: &str,
    prefs: &NotificationPreferences,
) -> Result<bool> {
    let text = serde_json::to_string(prefs)?;
    UpdateBuilder::new("users", id)
        .with_updated_at()
        .set("notification_preferences", text)
        .execute(conn)
}

pub fn count_users(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?)
}

// ============ Catalog ============

pub fn get_product(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        &[&id],
    )
}

pub fn upsert_product(conn: &Connection, input: &UpsertProduct) -> Result<Product> {
    let now = now();
    conn.execute(
        "INSERT INTO products (id, active, name, description, image, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT(id) DO UPDATE SET
            active = excluded.active,
            name = excluded.name,
            description = excluded.description,
            image = excluded.image,
            metadata = excluded.metadata,
            updated_at = excluded.updated_at",
        params![
            &input.id,
            input.active,
            &input.name,
            &input.description,
            &input.image,
            json_text(&input.metadata),
            now
        ],
    )?;
    get_product(conn, &input.id)?
        .ok_or_else(|| crate::error::AppError::Internal(format!("Product {} missing after upsert", input.id)))
}

pub fn get_price(conn: &Connection, id: &str) -> Result<Option<Price>> {
    query_one(
        conn,
        &format!("SELECT {} FROM prices WHERE id = ?1", PRICE_COLS),
        &[&id],
    )
}

pub fn upsert_price(conn: &Connection, input: &UpsertPrice) -> Result<Price> {
    let now = now();
    conn.execute(
        "INSERT INTO prices (id, product_id, active, description, unit_amount, currency, price_type,
                             interval, interval_count, trial_period_days, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
         ON CONFLICT(id) DO UPDATE SET
            product_id = excluded.product_id,
            active = excluded.active,
            description = excluded.description,
            unit_amount = excluded.unit_amount,
            currency = excluded.currency,
            price_type = excluded.price_type,
            interval = excluded.interval,
            interval_count = excluded.interval_count,
            trial_period_days = excluded.trial_period_days,
            metadata = excluded.metadata,
            updated_at = excluded.updated_at",
        params![
            &input.id,
            &input.product_id,
            input.active,
            &input.description,
            input.unit_amount,
            &input.currency,
            &input.price_type,
            &input.interval,
            input.interval_count,
            input.trial_period_days,
            json_text(&input.metadata),
            now
        ],
    )?;
    get_price(conn, &input.id)?
        .ok_or_else(|| crate::error::AppError::Internal(format!("Price {} missing after upsert", input.id)))
}

/// Active prices of active products from the local mirror, cheapest first.
pub fn list_active_plans(conn: &Connection) -> Result<Vec<Plan>> {
    let mut stmt = conn.prepare(
        "SELECT p.id, p.name, p.description, pr.id, pr.unit_amount, pr.currency, pr.interval
         FROM prices pr
         JOIN products p ON p.id = pr.product_id
         WHERE pr.active = 1 AND p.active = 1
         ORDER BY pr.unit_amount IS NULL, pr.unit_amount ASC",
    )?;
    let plans = stmt
        .query_map([], |row| {
            Ok(Plan {
                product_id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                price_id: row.get(3)?,
                unit_amount: row.get(4)?,
                currency: row.get(5)?,
                interval: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(plans)
}

// ============ Subscriptions ============

pub fn get_subscription(conn: &Connection, id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!("SELECT {} FROM subscriptions WHERE id = ?1", SUBSCRIPTION_COLS),
        &[&id],
    )
}

/// Insert or refresh a subscription mirror, keyed by the provider's id.
///
/// The row is only overwritten when `event_at` is not older than the
/// row's `last_event_at`. Ownership (`user_id`) and `created` never change
/// after insert. Returns false when the write was skipped as stale.
pub fn upsert_subscription(conn: &Connection, input: &UpsertSubscription) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO subscriptions (id, user_id, status, price_id, quantity, cancel_at_period_end, created,
                                    current_period_start, current_period_end, ended_at, cancel_at, canceled_at,
                                    trial_start, trial_end, customer_id, metadata, last_event_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
         ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            price_id = COALESCE(excluded.price_id, subscriptions.price_id),
            quantity = excluded.quantity,
            cancel_at_period_end = excluded.cancel_at_period_end,
            current_period_start = excluded.current_period_start,
            current_period_end = excluded.current_period_end,
            ended_at = excluded.ended_at,
            cancel_at = excluded.cancel_at,
            canceled_at = excluded.canceled_at,
            trial_start = excluded.trial_start,
            trial_end = excluded.trial_end,
            customer_id = COALESCE(excluded.customer_id, subscriptions.customer_id),
            metadata = COALESCE(excluded.metadata, subscriptions.metadata),
            last_event_at = excluded.last_event_at,
            updated_at = excluded.updated_at
         WHERE excluded.last_event_at >= subscriptions.last_event_at",
        params![
            &input.id,
            &input.user_id,
            &input.status,
            &input.price_id,
            input.quantity,
            input.cancel_at_period_end,
            input.created,
            input.current_period_start,
            input.current_period_end,
            input.ended_at,
            input.cancel_at,
            input.canceled_at,
            input.trial_start,
            input.trial_end,
            &input.customer_id,
            json_text(&input.metadata),
            input.event_at,
            now()
        ],
    )?;
    Ok(affected > 0)
}

/// Mark a subscription as ended. Returns false if the row does not exist
/// or a newer event has already been applied.
pub fn mark_subscription_deleted(
    conn: &Connection,
    id: &str,
    ended_at: i64,
    canceled_at: i64,
    event_at: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE subscriptions
         SET status = 'canceled', cancel_at_period_end = 0, ended_at = ?1, canceled_at = ?2,
             last_event_at = ?3, updated_at = ?4
         WHERE id = ?5 AND last_event_at <= ?3",
        params![ended_at, canceled_at, event_at, now(), id],
    )?;
    Ok(affected > 0)
}

/// The user's current subscription: the active one ending last.
pub fn get_active_subscription_for_user(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE user_id = ?1 AND {}
             ORDER BY current_period_end DESC, created DESC LIMIT 1",
            SUBSCRIPTION_COLS, ACTIVE_STATUS_FILTER
        ),
        &[&user_id],
    )
}

pub fn has_active_subscription_for_price(
    conn: &Connection,
    user_id: &str,
    price_id: &str,
) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!(
                "SELECT 1 FROM subscriptions WHERE user_id = ?1 AND price_id = ?2 AND {} LIMIT 1",
                ACTIVE_STATUS_FILTER
            ),
            params![user_id, price_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn list_subscriptions_for_user(conn: &Connection, user_id: &str) -> Result<Vec<Subscription>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE user_id = ?1 ORDER BY created DESC",
            SUBSCRIPTION_COLS
        ),
        &[&user_id],
    )
}

// ============ Webhook events ============

/// Atomically record a provider event id.
/// Returns true if this call recorded it, false if it was already recorded.
/// Call inside the same transaction as the writes the event causes so a
/// failed apply releases the claim.
pub fn try_claim_webhook_event(conn: &Connection, id: &str, event_type: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, event_type, received_at) VALUES (?1, ?2, ?3)",
        params![id, event_type, now()],
    )?;
    Ok(affected == 1)
}

pub fn get_webhook_event(conn: &Connection, id: &str) -> Result<Option<WebhookEventRecord>> {
    query_one(
        conn,
        &format!("SELECT {} FROM webhook_events WHERE id = ?1", WEBHOOK_EVENT_COLS),
        &[&id],
    )
}

/// Delete event ids older than `retention_days`. Providers stop
/// redelivering long before any sane retention, so this is safe.
pub fn prune_webhook_events(conn: &Connection, retention_days: i64) -> Result<usize> {
    let cutoff = now() - retention_days * 86400;
    Ok(conn.execute(
        "DELETE FROM webhook_events WHERE received_at < ?1",
        params![cutoff],
    )?)
}

//! Row mapping trait and helpers for reducing boilerplate in queries.
//!
//! Models implement `FromRow` to define how they are built from a row,
//! and the `*_COLS` constants keep SELECT lists in the same column order.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a nullable TEXT column holding JSON.
///
/// Corrupt JSON becomes a column type error instead of a panic.
fn parse_json(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<Option<serde_json::Value>> {
    row.get::<_, Option<String>>(col)?
        .map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|_| {
            rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
        })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const USER_COLS: &str =
    "id, external_id, email, name, avatar_url, notification_preferences, created_at, updated_at";

pub const PRODUCT_COLS: &str =
    "id, active, name, description, image, metadata, created_at, updated_at";

pub const PRICE_COLS: &str = "id, product_id, active, description, unit_amount, currency, price_type, interval, interval_count, trial_period_days, metadata, created_at, updated_at";

pub const SUBSCRIPTION_COLS: &str = "id, user_id, status, price_id, quantity, cancel_at_period_end, created, current_period_start, current_period_end, ended_at, cancel_at, canceled_at, trial_start, trial_end, customer_id, metadata, last_event_at, updated_at";

pub const WEBHOOK_EVENT_COLS: &str = "id, event_type, received_at";

// ============ FromRow Implementations ============

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let prefs = match parse_json(row, 5, "notification_preferences")? {
            Some(serde_json::Value::Object(map)) => NotificationPreferences(map),
            _ => NotificationPreferences::default(),
        };
        Ok(User {
            id: row.get(0)?,
            external_id: row.get(1)?,
            email: row.get(2)?,
            name: row.get(3)?,
            avatar_url: row.get(4)?,
            notification_preferences: prefs,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            id: row.get(0)?,
            active: row.get::<_, i32>(1)? != 0,
            name: row.get(2)?,
            description: row.get(3)?,
            image: row.get(4)?,
            metadata: parse_json(row, 5, "metadata")?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl FromRow for Price {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Price {
            id: row.get(0)?,
            product_id: row.get(1)?,
            active: row.get::<_, i32>(2)? != 0,
            description: row.get(3)?,
            unit_amount: row.get(4)?,
            currency: row.get(5)?,
            price_type: row.get(6)?,
            interval: row.get(7)?,
            interval_count: row.get(8)?,
            trial_period_days: row.get(9)?,
            metadata: parse_json(row, 10, "metadata")?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            status: row.get(2)?,
            price_id: row.get(3)?,
            quantity: row.get(4)?,
            cancel_at_period_end: row.get::<_, i32>(5)? != 0,
            created: row.get(6)?,
            current_period_start: row.get(7)?,
            current_period_end: row.get(8)?,
            ended_at: row.get(9)?,
            cancel_at: row.get(10)?,
            canceled_at: row.get(11)?,
            trial_start: row.get(12)?,
            trial_end: row.get(13)?,
            customer_id: row.get(14)?,
            metadata: parse_json(row, 15, "metadata")?,
            last_event_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }
}

impl FromRow for WebhookEventRecord {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(WebhookEventRecord {
            id: row.get(0)?,
            event_type: row.get(1)?,
            received_at: row.get(2)?,
        })
    }
}

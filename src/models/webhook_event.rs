use serde::Serialize;

/// A provider event id that has been applied. Presence of the row is what
/// makes redelivery a no-op.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEventRecord {
    pub id: String,
    pub event_type: String,
    pub received_at: i64,
}

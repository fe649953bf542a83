use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::Price;

/// Subscription statuses the payment provider reports.
/// Rows store the raw string so unknown future values still round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
}

impl SubscriptionStatus {
    /// Statuses that grant premium access.
    pub const ACTIVE: [SubscriptionStatus; 2] = [SubscriptionStatus::Active, SubscriptionStatus::Trialing];

    pub fn grants_access(&self) -> bool {
        Self::ACTIVE.contains(self)
    }
}

/// Local mirror of a provider subscription. `id` is the provider's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub price_id: Option<String>,
    pub quantity: i64,
    pub cancel_at_period_end: bool,
    pub created: i64,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub ended_at: Option<i64>,
    pub cancel_at: Option<i64>,
    pub canceled_at: Option<i64>,
    pub trial_start: Option<i64>,
    pub trial_end: Option<i64>,
    /// Provider customer id, needed to open the billing portal
    pub customer_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// `created` of the newest provider event applied to this row
    pub last_event_at: i64,
    pub updated_at: i64,
}

impl Subscription {
    pub fn status_kind(&self) -> Option<SubscriptionStatus> {
        self.status.parse().ok()
    }

    pub fn is_active(&self) -> bool {
        self.status_kind().is_some_and(|s| s.grants_access())
    }
}

/// Every mirrored field of a provider subscription, as written by a sync.
#[derive(Debug, Clone)]
pub struct UpsertSubscription {
    pub id: String,
    pub user_id: String,
    pub status: String,
    pub price_id: Option<String>,
    pub quantity: i64,
    pub cancel_at_period_end: bool,
    pub created: i64,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub ended_at: Option<i64>,
    pub cancel_at: Option<i64>,
    pub canceled_at: Option<i64>,
    pub trial_start: Option<i64>,
    pub trial_end: Option<i64>,
    pub customer_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub event_at: i64,
}

/// What the billing dashboard shows for the signed-in user.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionSummary {
    pub is_premium: bool,
    pub plan_name: String,
    pub next_billing_date: Option<i64>,
    pub cancel_at_period_end: bool,
    pub subscription: Option<Subscription>,
    pub price: Option<Price>,
}

impl SubscriptionSummary {
    pub const FREE_PLAN: &'static str = "Free plan";
    pub const PAID_PLAN: &'static str = "Premium plan";

    pub fn new(subscription: Option<Subscription>, price: Option<Price>) -> Self {
        match subscription {
            None => Self {
                is_premium: false,
                plan_name: Self::FREE_PLAN.to_string(),
                next_billing_date: None,
                cancel_at_period_end: false,
                subscription: None,
                price: None,
            },
            Some(sub) => Self {
                is_premium: true,
                plan_name: price
                    .as_ref()
                    .and_then(|p| p.description.clone())
                    .unwrap_or_else(|| Self::PAID_PLAN.to_string()),
                next_billing_date: sub.current_period_end,
                cancel_at_period_end: sub.cancel_at_period_end,
                subscription: Some(sub),
                price,
            },
        }
    }
}

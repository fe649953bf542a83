use serde::{Deserialize, Serialize};

/// Mirror of a payment-provider product. `id` is the provider's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub active: bool,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields written when mirroring a product.
#[derive(Debug, Clone)]
pub struct UpsertProduct {
    pub id: String,
    pub active: bool,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Mirror of a payment-provider price. `id` is the provider's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Price {
    pub id: String,
    pub product_id: Option<String>,
    pub active: bool,
    /// Provider nickname, shown as the plan name
    pub description: Option<String>,
    /// Amount in the currency's minor unit
    pub unit_amount: Option<i64>,
    pub currency: Option<String>,
    /// "one_time" or "recurring"
    pub price_type: Option<String>,
    /// "day" | "week" | "month" | "year" for recurring prices
    pub interval: Option<String>,
    pub interval_count: Option<i64>,
    pub trial_period_days: Option<i64>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct UpsertPrice {
    pub id: String,
    pub product_id: Option<String>,
    pub active: bool,
    pub description: Option<String>,
    pub unit_amount: Option<i64>,
    pub currency: Option<String>,
    pub price_type: Option<String>,
    pub interval: Option<String>,
    pub interval_count: Option<i64>,
    pub trial_period_days: Option<i64>,
    pub metadata: Option<serde_json::Value>,
}

/// A purchasable plan as shown on the pricing page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub product_id: String,
    pub name: String,
    pub description: Option<String>,
    pub price_id: String,
    pub unit_amount: Option<i64>,
    pub currency: Option<String>,
    pub interval: Option<String>,
}

impl Plan {
    /// Sort plans cheapest first; prices without an amount go last.
    pub fn sort(plans: &mut [Plan]) {
        plans.sort_by_key(|p| (p.unit_amount.is_none(), p.unit_amount.unwrap_or(0)));
    }
}

use std::collections::HashMap;
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result, msg};
use crate::models::{UpsertPrice, UpsertProduct, UpsertSubscription};

use super::StripeConfig;

type HmacSha256 = Hmac<Sha256>;

/// Inputs for a subscription checkout.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub price_id: String,
    /// Identity provider subject; echoed back in webhook metadata
    pub user_external_id: String,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct PortalSessionResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
    api_base: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(20))
                .build()
                .unwrap_or_default(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.api_base, path)
    }

    async fn read_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorBody>(&error_text)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or(error_text);
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(AppError::NotFound(message));
            }
            return Err(AppError::Payment(format!("Stripe API error ({}): {}", status, message)));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Payment(format!("Failed to parse Stripe response: {}", e)))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .basic_auth(&self.secret_key, None::<&str>)
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::Payment(format!("Stripe API error: {}", e)))?;
        Self::read_response(response).await
    }

    async fn post_form<T: DeserializeOwned>(&self, path: &str, form: &[(&str, &str)]) -> Result<T> {
        let response = self
            .client
            .post(self.url(path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Payment(format!("Stripe API error: {}", e)))?;
        Self::read_response(response).await
    }

    /// Create a subscription-mode checkout session for one pre-configured price.
    ///
    /// The user's external id is stored both on the session and on the
    /// subscription it creates, so later subscription events can be tied
    /// back to the user without a checkout event.
    pub async fn create_checkout_session(&self, req: &CheckoutRequest) -> Result<CheckoutSession> {
        let mut form = vec![
            ("mode", "subscription"),
            ("success_url", req.success_url.as_str()),
            ("cancel_url", req.cancel_url.as_str()),
            ("line_items[0][price]", req.price_id.as_str()),
            ("line_items[0][quantity]", "1"),
            ("metadata[user_id]", req.user_external_id.as_str()),
            ("metadata[price_id]", req.price_id.as_str()),
            ("subscription_data[metadata][user_id]", req.user_external_id.as_str()),
        ];
        if let Some(ref email) = req.customer_email {
            form.push(("customer_email", email.as_str()));
        }

        self.post_form("checkout/sessions", &form).await
    }

    /// Create a billing portal session and return its URL.
    pub async fn create_portal_session(&self, customer_id: &str, return_url: &str) -> Result<String> {
        let session: PortalSessionResponse = self
            .post_form(
                "billing_portal/sessions",
                &[("customer", customer_id), ("return_url", return_url)],
            )
            .await?;
        Ok(session.url)
    }

    pub async fn get_subscription(&self, id: &str) -> Result<StripeSubscription> {
        self.get(&format!("subscriptions/{}", id), &[]).await
    }

    pub async fn get_price(&self, id: &str) -> Result<StripePrice> {
        self.get(&format!("prices/{}", id), &[]).await
    }

    pub async fn get_product(&self, id: &str) -> Result<StripeProduct> {
        self.get(&format!("products/{}", id), &[]).await
    }

    /// Active products with their default price expanded.
    pub async fn list_active_products(&self) -> Result<Vec<StripeProduct>> {
        let list: StripeList<StripeProduct> = self
            .get(
                "products",
                &[
                    ("active", "true"),
                    ("limit", "100"),
                    ("expand[]", "data.default_price"),
                ],
            )
            .await?;
        Ok(list.data)
    }

    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    /// Stripe recommends 300 seconds (5 minutes).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Allowed clock skew for timestamps from the future (in seconds).
    const WEBHOOK_FUTURE_SKEW_SECS: i64 = 60;

    /// Check a `stripe-signature` header (`t=timestamp,v1=signature[,v1=...]`).
    ///
    /// Malformed headers are errors; a wrong or stale signature is `Ok(false)`.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        let mut timestamp = None;
        let mut candidates = Vec::new();

        for part in signature.split(',') {
            let part = part.trim();
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                candidates.push(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        if candidates.is_empty() {
            return Err(AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()));
        }

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let age = chrono::Utc::now().timestamp() - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        if age < -Self::WEBHOOK_FUTURE_SKEW_SECS {
            tracing::warn!("Stripe webhook rejected: timestamp in the future (age={}s)", age);
            return Ok(false);
        }

        if self.webhook_secret.is_empty() {
            return Err(AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()));
        }

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());
        let expected_bytes = expected.as_bytes();

        // Signature length is not secret (always 64 hex chars), only the bytes are
        Ok(candidates.iter().any(|provided| {
            let provided_bytes = provided.as_bytes();
            provided_bytes.len() == expected_bytes.len()
                && bool::from(expected_bytes.ct_eq(provided_bytes))
        }))
    }
}

// ============ Webhook envelope ============

/// Stripe webhook event; `data.object` is parsed based on `event_type`.
#[derive(Debug, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix time the event was created; orders competing updates
    pub created: i64,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

/// A field Stripe returns either as an id or, when expanded, as the object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

impl<T: HasId> Expandable<T> {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object(obj) => obj.id(),
        }
    }

    pub fn as_object(&self) -> Option<&T> {
        match self {
            Expandable::Id(_) => None,
            Expandable::Object(obj) => Some(obj),
        }
    }
}

pub trait HasId {
    fn id(&self) -> &str;
}

fn metadata_value(metadata: &HashMap<String, String>) -> Option<serde_json::Value> {
    if metadata.is_empty() {
        None
    } else {
        serde_json::to_value(metadata).ok()
    }
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub mode: Option<String>,
    pub customer: Option<String>,
    pub customer_email: Option<String>,
    /// Present for subscription mode
    pub subscription: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

// ============ Catalog ============

#[derive(Debug, Clone, Deserialize)]
pub struct StripeProduct {
    pub id: String,
    #[serde(default)]
    pub active: bool,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub default_price: Option<Expandable<StripePrice>>,
}

impl HasId for StripeProduct {
    fn id(&self) -> &str {
        &self.id
    }
}

impl StripeProduct {
    pub fn to_upsert(&self) -> UpsertProduct {
        UpsertProduct {
            id: self.id.clone(),
            active: self.active,
            name: self.name.clone(),
            description: self.description.clone(),
            image: self.images.first().cloned(),
            metadata: metadata_value(&self.metadata),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeRecurring {
    pub interval: String,
    pub interval_count: Option<i64>,
    pub trial_period_days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
    #[serde(default)]
    pub active: bool,
    pub product: Option<Expandable<StripeProduct>>,
    pub nickname: Option<String>,
    pub unit_amount: Option<i64>,
    pub currency: Option<String>,
    /// "one_time" or "recurring"
    #[serde(rename = "type")]
    pub price_type: Option<String>,
    pub recurring: Option<StripeRecurring>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl HasId for StripePrice {
    fn id(&self) -> &str {
        &self.id
    }
}

impl StripePrice {
    pub fn product_id(&self) -> Option<&str> {
        self.product.as_ref().map(|p| p.id())
    }

    pub fn to_upsert(&self) -> UpsertPrice {
        UpsertPrice {
            id: self.id.clone(),
            product_id: self.product_id().map(str::to_string),
            active: self.active,
            description: self.nickname.clone(),
            unit_amount: self.unit_amount,
            currency: self.currency.clone(),
            price_type: self.price_type.clone(),
            interval: self.recurring.as_ref().map(|r| r.interval.clone()),
            interval_count: self.recurring.as_ref().and_then(|r| r.interval_count),
            trial_period_days: self.recurring.as_ref().and_then(|r| r.trial_period_days),
            metadata: metadata_value(&self.metadata),
        }
    }
}

// ============ customer.subscription.* ============

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    pub price: StripePrice,
    pub quantity: Option<i64>,
    // Newer API versions report billing periods per item
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: Option<String>,
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub created: i64,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub ended_at: Option<i64>,
    pub cancel_at: Option<i64>,
    pub canceled_at: Option<i64>,
    pub trial_start: Option<i64>,
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub items: StripeList<StripeSubscriptionItem>,
}

impl StripeSubscription {
    pub fn first_item(&self) -> Option<&StripeSubscriptionItem> {
        self.items.data.first()
    }

    pub fn price(&self) -> Option<&StripePrice> {
        self.first_item().map(|i| &i.price)
    }

    /// External user id written by checkout into the subscription metadata.
    pub fn user_external_id(&self) -> Option<&str> {
        self.metadata
            .get("user_id")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn period_start(&self) -> Option<i64> {
        self.current_period_start
            .or_else(|| self.first_item().and_then(|i| i.current_period_start))
    }

    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end
            .or_else(|| self.first_item().and_then(|i| i.current_period_end))
    }

    /// Every mirrored field, owned by `user_id`, as of provider event time `event_at`.
    /// `price_id` must already be mirrored (or `None`).
    pub fn to_upsert(&self, user_id: &str, price_id: Option<String>, event_at: i64) -> UpsertSubscription {
        UpsertSubscription {
            id: self.id.clone(),
            user_id: user_id.to_string(),
            status: self.status.clone(),
            price_id,
            quantity: self.first_item().and_then(|i| i.quantity).unwrap_or(1),
            cancel_at_period_end: self.cancel_at_period_end,
            created: self.created,
            current_period_start: self.period_start(),
            current_period_end: self.period_end(),
            ended_at: self.ended_at,
            cancel_at: self.cancel_at,
            canceled_at: self.canceled_at,
            trial_start: self.trial_start,
            trial_end: self.trial_end,
            customer_id: self.customer.clone(),
            metadata: metadata_value(&self.metadata),
            event_at,
        }
    }
}

//! Test utilities and fixtures for saaskit integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use jwt_simple::prelude::*;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use serde_json::{Value, json};
use tower::ServiceExt;

pub use saaskit::config::RateLimitConfig;
pub use saaskit::db::{AppState, DbPool, init_db, queries};
pub use saaskit::identity::{JwksCache, SessionClaims, SessionVerifier};
pub use saaskit::models::*;
pub use saaskit::payments::{StripeClient, StripeConfig};

pub const TEST_ISSUER: &str = "https://identity.test";
pub const TEST_JWKS_URL: &str = "https://identity.test/.well-known/jwks.json";
pub const TEST_KID: &str = "test-key-1";
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const TEST_SITE_URL: &str = "https://app.test";

// ============ Database ============

/// Create a pool over a private in-memory database with the schema applied.
///
/// Shared cache keeps the database alive across the pool's connections, so
/// tests can hold a connection while a request runs.
pub fn setup_test_pool() -> DbPool {
    let uri = format!("file:saaskit-test-{}?mode=memory&cache=shared", uuid::Uuid::new_v4());
    let manager = SqliteConnectionManager::file(uri)
        .with_flags(
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )
        .with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .expect("Failed to create test pool");
    {
        let conn = pool.get().expect("Failed to get test connection");
        init_db(&conn).expect("Failed to initialize schema");
    }
    pool
}

/// Create a user the way a first signed-in request would.
pub fn create_test_user(conn: &rusqlite::Connection, external_id: &str, email: &str) -> User {
    queries::get_or_create_user(
        conn,
        &IdentityProfile {
            external_id: external_id.to_string(),
            email: Some(email.to_string()),
            name: Some(format!("Test {}", external_id)),
            avatar_url: None,
        },
    )
    .expect("Failed to create test user")
}

/// Mirror a monthly price (and its product).
pub fn create_test_price(
    conn: &rusqlite::Connection,
    price_id: &str,
    product_id: &str,
    unit_amount: i64,
) -> Price {
    queries::upsert_product(
        conn,
        &UpsertProduct {
            id: product_id.to_string(),
            active: true,
            name: format!("Product {}", product_id),
            description: None,
            image: None,
            metadata: None,
        },
    )
    .expect("Failed to create test product");
    queries::upsert_price(
        conn,
        &UpsertPrice {
            id: price_id.to_string(),
            product_id: Some(product_id.to_string()),
            active: true,
            description: Some(format!("{} monthly", product_id)),
            unit_amount: Some(unit_amount),
            currency: Some("usd".to_string()),
            price_type: Some("recurring".to_string()),
            interval: Some("month".to_string()),
            interval_count: Some(1),
            trial_period_days: None,
            metadata: None,
        },
    )
    .expect("Failed to create test price")
}

/// Build a subscription upsert with sensible defaults.
pub fn test_subscription(id: &str, user_id: &str, status: &str, price_id: Option<&str>) -> UpsertSubscription {
    let now = chrono::Utc::now().timestamp();
    UpsertSubscription {
        id: id.to_string(),
        user_id: user_id.to_string(),
        status: status.to_string(),
        price_id: price_id.map(str::to_string),
        quantity: 1,
        cancel_at_period_end: false,
        created: now - 86400,
        current_period_start: Some(now - 86400),
        current_period_end: Some(now + 29 * 86400),
        ended_at: None,
        cancel_at: None,
        canceled_at: None,
        trial_start: None,
        trial_end: None,
        customer_id: Some(format!("cus_{}", user_id)),
        metadata: None,
        event_at: 1,
    }
}

pub fn create_test_subscription(
    conn: &rusqlite::Connection,
    id: &str,
    user_id: &str,
    status: &str,
    price_id: Option<&str>,
) -> Subscription {
    queries::upsert_subscription(conn, &test_subscription(id, user_id, status, price_id))
        .expect("Failed to create test subscription");
    queries::get_subscription(conn, id)
        .expect("Failed to load test subscription")
        .expect("Test subscription should exist")
}

// ============ Sessions ============

/// Signing key for test session tokens, generated once per test binary.
pub fn test_key_pair() -> &'static RS256KeyPair {
    static KEY: OnceLock<RS256KeyPair> = OnceLock::new();
    KEY.get_or_init(|| {
        RS256KeyPair::generate(2048)
            .expect("Failed to generate RSA key")
            .with_key_id(TEST_KID)
    })
}

pub fn test_session_verifier() -> SessionVerifier {
    let mut keys = HashMap::new();
    keys.insert(TEST_KID.to_string(), test_key_pair().public_key());
    SessionVerifier::new(
        saaskit::identity::IdentityConfig {
            issuer: TEST_ISSUER.to_string(),
            jwks_url: TEST_JWKS_URL.to_string(),
            audience: None,
        },
        JwksCache::new().with_static_keys(TEST_JWKS_URL, keys),
    )
}

/// Sign a session token for `external_id`.
pub fn session_token(external_id: &str, email: Option<&str>) -> String {
    let custom = SessionClaims {
        email: email.map(str::to_string),
        first_name: Some("Test".to_string()),
        last_name: Some("User".to_string()),
        ..Default::default()
    };
    let claims = Claims::with_custom_claims(custom, Duration::from_mins(10))
        .with_issuer(TEST_ISSUER)
        .with_subject(external_id);
    test_key_pair().sign(claims).expect("Failed to sign session token")
}

// ============ Payment provider mock ============

/// In-process stand-in for the payment provider's REST API.
#[derive(Default)]
pub struct MockStripe {
    pub prices: Mutex<HashMap<String, Value>>,
    pub products: Mutex<HashMap<String, Value>>,
    pub subscriptions: Mutex<HashMap<String, Value>>,
    /// (path, form body) of every POST received
    pub posts: Mutex<Vec<(String, String)>>,
    /// When set, every endpoint answers 500
    pub failing: Mutex<bool>,
}

impl MockStripe {
    pub fn add_price(&self, price: Value) {
        let id = price["id"].as_str().expect("price id").to_string();
        self.prices.lock().unwrap().insert(id, price);
    }

    pub fn add_product(&self, product: Value) {
        let id = product["id"].as_str().expect("product id").to_string();
        self.products.lock().unwrap().insert(id, product);
    }

    pub fn add_subscription(&self, subscription: Value) {
        let id = subscription["id"].as_str().expect("subscription id").to_string();
        self.subscriptions.lock().unwrap().insert(id, subscription);
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn posts_to(&self, path: &str) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, body)| body.clone())
            .collect()
    }

    fn is_failing(&self) -> bool {
        *self.failing.lock().unwrap()
    }
}

fn not_found(kind: &str, id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": {"message": format!("No such {}: '{}'", kind, id)}})),
    )
        .into_response()
}

fn mock_failure() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": {"message": "mock failure"}})),
    )
        .into_response()
}

async fn mock_get_price(State(mock): State<Arc<MockStripe>>, Path(id): Path<String>) -> Response {
    if mock.is_failing() {
        return mock_failure();
    }
    match mock.prices.lock().unwrap().get(&id) {
        Some(price) => Json(price.clone()).into_response(),
        None => not_found("price", &id),
    }
}

async fn mock_get_product(State(mock): State<Arc<MockStripe>>, Path(id): Path<String>) -> Response {
    if mock.is_failing() {
        return mock_failure();
    }
    match mock.products.lock().unwrap().get(&id) {
        Some(product) => Json(product.clone()).into_response(),
        None => not_found("product", &id),
    }
}

async fn mock_list_products(State(mock): State<Arc<MockStripe>>) -> Response {
    if mock.is_failing() {
        return mock_failure();
    }
    let prices = mock.prices.lock().unwrap().clone();
    let data: Vec<Value> = mock
        .products
        .lock()
        .unwrap()
        .values()
        .filter(|p| p["active"].as_bool().unwrap_or(false))
        .map(|p| {
            let mut product = p.clone();
            if let Some(price_id) = p["default_price"].as_str()
                && let Some(price) = prices.get(price_id)
            {
                product["default_price"] = price.clone();
            }
            product
        })
        .collect();
    Json(json!({"object": "list", "data": data, "has_more": false})).into_response()
}

async fn mock_get_subscription(
    State(mock): State<Arc<MockStripe>>,
    Path(id): Path<String>,
) -> Response {
    if mock.is_failing() {
        return mock_failure();
    }
    match mock.subscriptions.lock().unwrap().get(&id) {
        Some(subscription) => Json(subscription.clone()).into_response(),
        None => not_found("subscription", &id),
    }
}

async fn mock_create_checkout(State(mock): State<Arc<MockStripe>>, body: String) -> Response {
    if mock.is_failing() {
        return mock_failure();
    }
    mock.posts
        .lock()
        .unwrap()
        .push(("/v1/checkout/sessions".to_string(), body));
    Json(json!({"id": "cs_test_123", "url": "https://checkout.stripe.test/c/cs_test_123"})).into_response()
}

async fn mock_create_portal(State(mock): State<Arc<MockStripe>>, body: String) -> Response {
    if mock.is_failing() {
        return mock_failure();
    }
    mock.posts
        .lock()
        .unwrap()
        .push(("/v1/billing_portal/sessions".to_string(), body));
    Json(json!({"id": "bps_test_123", "url": "https://billing.stripe.test/p/session_123"})).into_response()
}

/// Start the mock provider on an ephemeral port. Returns its API base URL.
pub async fn spawn_mock_stripe(mock: Arc<MockStripe>) -> String {
    let app = Router::new()
        .route("/v1/prices/{id}", get(mock_get_price))
        .route("/v1/products", get(mock_list_products))
        .route("/v1/products/{id}", get(mock_get_product))
        .route("/v1/subscriptions/{id}", get(mock_get_subscription))
        .route("/v1/checkout/sessions", post(mock_create_checkout))
        .route("/v1/billing_portal/sessions", post(mock_create_portal))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock provider");
    let addr = listener.local_addr().expect("Mock provider address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

/// Fixture JSON for a monthly provider price.
pub fn stripe_price_json(id: &str, product_id: &str, unit_amount: i64) -> Value {
    json!({
        "id": id,
        "object": "price",
        "active": true,
        "product": product_id,
        "nickname": format!("{} monthly", product_id),
        "unit_amount": unit_amount,
        "currency": "usd",
        "type": "recurring",
        "recurring": {"interval": "month", "interval_count": 1, "trial_period_days": null},
        "metadata": {}
    })
}

pub fn stripe_product_json(id: &str, name: &str, default_price: Option<&str>) -> Value {
    json!({
        "id": id,
        "object": "product",
        "active": true,
        "name": name,
        "description": format!("{} plan", name),
        "images": [],
        "metadata": {},
        "default_price": default_price
    })
}

/// Fixture JSON for a provider subscription with one item.
pub fn stripe_subscription_json(
    id: &str,
    status: &str,
    customer: &str,
    user_id: Option<&str>,
    price: Value,
) -> Value {
    let now = chrono::Utc::now().timestamp();
    let metadata = match user_id {
        Some(user_id) => json!({"user_id": user_id}),
        None => json!({}),
    };
    json!({
        "id": id,
        "object": "subscription",
        "customer": customer,
        "status": status,
        "cancel_at_period_end": false,
        "created": now - 60,
        "current_period_start": now - 60,
        "current_period_end": now + 30 * 86400,
        "ended_at": null,
        "cancel_at": null,
        "canceled_at": null,
        "trial_start": null,
        "trial_end": null,
        "metadata": metadata,
        "items": {"object": "list", "data": [{
            "id": format!("si_{}", id),
            "quantity": 1,
            "price": price
        }]}
    })
}

// ============ App ============

/// Everything a test needs: the router state, the provider mock and its pool.
pub struct TestContext {
    pub state: AppState,
    pub stripe: Arc<MockStripe>,
}

impl TestContext {
    pub async fn new() -> Self {
        let stripe = Arc::new(MockStripe::default());
        let api_base = spawn_mock_stripe(stripe.clone()).await;
        let state = AppState {
            db: setup_test_pool(),
            stripe: StripeClient::new(&StripeConfig {
                secret_key: "sk_test_xxx".to_string(),
                webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
                api_base,
            }),
            sessions: Arc::new(test_session_verifier()),
            site_url: TEST_SITE_URL.to_string(),
            premium_features: Arc::new(vec![
                "premium-feature".to_string(),
                "analytics".to_string(),
                "export".to_string(),
            ]),
        };
        Self { state, stripe }
    }

    pub fn conn(&self) -> r2d2::PooledConnection<SqliteConnectionManager> {
        self.state.db.get().expect("Failed to get test connection")
    }

    /// Full router without rate limiting (oneshot requests carry no peer address).
    pub fn app(&self) -> Router {
        self.app_with_rate_limit(RateLimitConfig {
            strict_rpm: 0,
            standard_rpm: 0,
        })
    }

    /// Full router with the given tiers. Limiter state lives in the router,
    /// so clone one instance per test instead of rebuilding it per request.
    pub fn app_with_rate_limit(&self, rate_limit: RateLimitConfig) -> Router {
        saaskit::handlers::router(self.state.clone(), rate_limit).with_state(self.state.clone())
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app().oneshot(request).await.expect("Request failed");
        read_json(response).await
    }
}

pub async fn read_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).expect("Response should be valid JSON")
    };
    (status, json)
}

pub fn get_request(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).expect("Failed to build request")
}

pub fn post_json_request(uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("Failed to build request")
}

// ============ Webhooks ============

pub fn compute_stripe_signature(payload: &[u8], secret: &str, timestamp: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(signed_payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// A signed `stripe-signature` header for `payload`, timestamped now.
pub fn stripe_signature_header(payload: &[u8]) -> String {
    let timestamp = chrono::Utc::now().timestamp().to_string();
    let signature = compute_stripe_signature(payload, TEST_WEBHOOK_SECRET, &timestamp);
    format!("t={},v1={}", timestamp, signature)
}

/// Wrap `object` in an event envelope.
pub fn stripe_event(id: &str, event_type: &str, created: i64, object: Value) -> Value {
    json!({
        "id": id,
        "object": "event",
        "type": event_type,
        "created": created,
        "data": {"object": object}
    })
}

pub fn webhook_request(event: &Value) -> Request<Body> {
    let payload = event.to_string();
    Request::builder()
        .method("POST")
        .uri("/api/webhook/stripe")
        .header(header::CONTENT_TYPE, "application/json")
        .header("stripe-signature", stripe_signature_header(payload.as_bytes()))
        .body(Body::from(payload))
        .expect("Failed to build webhook request")
}

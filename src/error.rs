use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// User-facing error messages shared by handlers and tests.
pub mod msg {
    pub const USER_NOT_FOUND: &str = "User not found";
    pub const PRICE_ID_REQUIRED: &str = "priceId is required";
    pub const PRICE_NOT_FOUND: &str = "Price not found";
    pub const ALREADY_SUBSCRIBED: &str = "You already have an active subscription for this plan";
    pub const NO_ACTIVE_SUBSCRIPTION: &str = "No active subscription found";
    pub const NO_BILLING_CUSTOMER: &str = "Subscription has no billing customer";
    pub const FEATURE_NOT_FOUND: &str = "Feature not found";
    pub const INVALID_EMAIL_FORMAT: &str = "Please enter a valid email address";
    pub const NAME_EMPTY: &str = "Name cannot be empty";
    pub const NOTIFICATIONS_NOT_OBJECT: &str = "Notification preferences must be a JSON object";
    pub const MISSING_SESSION: &str = "Missing session token";
    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature";
    pub const INVALID_WEBHOOK_SECRET: &str = "Invalid webhook secret";
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Session invalid: {0}")]
    SessionInvalid(String),

    /// Route requires an active subscription. Carries the pricing URL.
    #[error("Premium required")]
    PremiumRequired(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payment provider error: {0}")]
    Payment(String),

    #[error("JWKS fetch failed: {0}")]
    JwksFetchFailed(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone())),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::SessionInvalid(msg) => {
                tracing::debug!("Session rejected: {}", msg);
                (StatusCode::UNAUTHORIZED, "Unauthorized", None)
            }
            AppError::PremiumRequired(pricing_url) => (
                StatusCode::FORBIDDEN,
                "Premium required",
                Some(pricing_url.clone()),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Payment(msg) => {
                tracing::error!("Payment provider error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Payment provider error", None)
            }
            AppError::JwksFetchFailed(msg) => {
                tracing::error!("JWKS fetch failed: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Identity provider unavailable", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Converts `Option<T>` lookups into `NotFound` errors.
pub trait OptionExt<T> {
    fn or_not_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(msg.to_string()))
    }
}

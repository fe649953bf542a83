mod stripe;

pub use stripe::*;

/// Credentials and endpoint for the payment provider.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    /// API root, overridable so tests can point at a local mock
    pub api_base: String,
}

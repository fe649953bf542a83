use std::env;

use crate::identity::IdentityConfig;
use crate::payments::StripeConfig;

/// Rate limit configuration for the public API.
/// A value of 0 disables the tier.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Checkout and billing portal (each hit calls the payment provider)
    pub strict_rpm: u32,
    /// Everything else under /api except webhooks
    pub standard_rpm: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            strict_rpm: 10,
            standard_rpm: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Public site URL used to build checkout and portal redirect targets
    pub site_url: String,
    pub dev_mode: bool,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    pub identity_issuer: String,
    pub identity_jwks_url: String,
    pub identity_audience: Option<String>,
    pub rate_limit: RateLimitConfig,
    /// Days to keep processed webhook event ids (0 = never prune)
    pub webhook_event_retention_days: i64,
    /// Feature slugs served under /api/premium/{feature}
    pub premium_features: Vec<String>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("SAASKIT_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env_or("HOST", "127.0.0.1");
        let port: u16 = env_parse("PORT", 3000);

        let site_url = env::var("SITE_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let stripe_secret_key = env::var("STRIPE_SECRET_KEY").unwrap_or_default();
        let stripe_webhook_secret = env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        if stripe_secret_key.is_empty() {
            tracing::warn!("STRIPE_SECRET_KEY is not set - checkout and portal will fail");
        }
        if stripe_webhook_secret.is_empty() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET is not set - all webhooks will be rejected");
        }

        let identity_issuer = env::var("IDENTITY_ISSUER")
            .map(|i| i.trim_end_matches('/').to_string())
            .unwrap_or_default();
        if identity_issuer.is_empty() {
            tracing::warn!("IDENTITY_ISSUER is not set - every session will be rejected");
        }
        let identity_jwks_url = env::var("IDENTITY_JWKS_URL")
            .unwrap_or_else(|_| format!("{}/.well-known/jwks.json", identity_issuer));

        let premium_features = env::var("PREMIUM_FEATURES")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| {
                vec![
                    "premium-feature".to_string(),
                    "analytics".to_string(),
                    "export".to_string(),
                ]
            });

        let defaults = RateLimitConfig::default();

        Self {
            host,
            port,
            database_path: env_or("DATABASE_PATH", "saaskit.db"),
            site_url,
            dev_mode,
            stripe_secret_key,
            stripe_webhook_secret,
            stripe_api_base: env_or("STRIPE_API_BASE", "https://api.stripe.com"),
            identity_issuer,
            identity_jwks_url,
            identity_audience: env::var("IDENTITY_AUDIENCE").ok().filter(|a| !a.is_empty()),
            rate_limit: RateLimitConfig {
                strict_rpm: env_parse("RATE_LIMIT_STRICT_RPM", defaults.strict_rpm),
                standard_rpm: env_parse("RATE_LIMIT_STANDARD_RPM", defaults.standard_rpm),
            },
            webhook_event_retention_days: env_parse("WEBHOOK_EVENT_RETENTION_DAYS", 30),
            premium_features,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn stripe_config(&self) -> StripeConfig {
        StripeConfig {
            secret_key: self.stripe_secret_key.clone(),
            webhook_secret: self.stripe_webhook_secret.clone(),
            api_base: self.stripe_api_base.clone(),
        }
    }

    pub fn identity_config(&self) -> IdentityConfig {
        IdentityConfig {
            issuer: self.identity_issuer.clone(),
            jwks_url: self.identity_jwks_url.clone(),
            audience: self.identity_audience.clone(),
        }
    }
}

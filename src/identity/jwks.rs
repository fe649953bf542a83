//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! The identity provider publishes its session signing keys at a JWKS URL.
//! Keys are cached per URL for an hour; an unknown key id on a stale cache
//! triggers a refetch.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use jwt_simple::prelude::*;
use serde::Deserialize;

use crate::error::{AppError, Result};

/// Cache duration for JWKS keys (1 hour)
const CACHE_DURATION: Duration = Duration::from_secs(3600);

struct CachedJwks {
    /// Map from key ID (kid) to public key
    keys: HashMap<String, RS256PublicKey>,
    fetched_at: Option<Instant>,
}

impl CachedJwks {
    /// Pinned key sets (no fetch time) never go stale.
    fn is_stale(&self) -> bool {
        self.fetched_at
            .is_some_and(|at| at.elapsed() > CACHE_DURATION)
    }
}

/// Cache for JWKS keys, shared across requests.
pub struct JwksCache {
    cache: RwLock<HashMap<String, CachedJwks>>,
    client: reqwest::Client,
}

impl Default for JwksCache {
    fn default() -> Self {
        Self::new()
    }
}

impl JwksCache {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Pin a key set for `jwks_url` without fetching it.
    /// Used for local development and tests.
    pub fn with_static_keys(self, jwks_url: &str, keys: HashMap<String, RS256PublicKey>) -> Self {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(
                jwks_url.to_string(),
                CachedJwks {
                    keys,
                    fetched_at: None,
                },
            );
        }
        self
    }

    /// Get a public key for a given JWKS URL and key ID.
    /// Fetches and caches the JWKS if not present or stale.
    pub async fn get_key(&self, jwks_url: &str, kid: &str) -> Result<RS256PublicKey> {
        {
            let cache = self
                .cache
                .read()
                .map_err(|_| AppError::Internal("JWKS cache poisoned".into()))?;
            if let Some(cached) = cache.get(jwks_url)
                && !cached.is_stale()
            {
                // Fresh cache without this kid: don't refetch on every bad token
                return cached.keys.get(kid).cloned().ok_or_else(|| {
                    AppError::SessionInvalid(format!("Key ID '{}' not found in JWKS", kid))
                });
            }
        }

        let keys = self.fetch_jwks(jwks_url).await?;

        let key = keys.get(kid).cloned().ok_or_else(|| {
            AppError::SessionInvalid(format!("Key ID '{}' not found in JWKS", kid))
        })?;

        {
            let mut cache = self
                .cache
                .write()
                .map_err(|_| AppError::Internal("JWKS cache poisoned".into()))?;
            cache.insert(
                jwks_url.to_string(),
                CachedJwks {
                    keys,
                    fetched_at: Some(Instant::now()),
                },
            );
        }

        Ok(key)
    }

    async fn fetch_jwks(&self, url: &str) -> Result<HashMap<String, RS256PublicKey>> {
        tracing::debug!("Fetching JWKS from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::JwksFetchFailed(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::JwksFetchFailed(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let jwks: JwksResponse = response
            .json()
            .await
            .map_err(|e| AppError::JwksFetchFailed(format!("Failed to parse JWKS JSON: {}", e)))?;

        let keys = parse_jwks(jwks);

        if keys.is_empty() {
            return Err(AppError::JwksFetchFailed(
                "No valid RS256 keys found in JWKS".to_string(),
            ));
        }

        Ok(keys)
    }
}

/// JWKS response structure (RFC 7517)
#[derive(Debug, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: Option<String>,
    pub alg: Option<String>,
    /// RSA modulus (base64url encoded)
    #[serde(default)]
    pub n: String,
    /// RSA exponent (base64url encoded)
    #[serde(default)]
    pub e: String,
}

/// Keep RSA keys usable for RS256 that carry a key id.
pub fn parse_jwks(jwks: JwksResponse) -> HashMap<String, RS256PublicKey> {
    let mut keys = HashMap::new();

    for jwk in jwks.keys {
        if jwk.kty != "RSA" {
            continue;
        }
        if let Some(ref alg) = jwk.alg
            && alg != "RS256"
        {
            continue;
        }
        let Some(kid) = jwk.kid.clone() else {
            continue;
        };

        match parse_rsa_public_key(&jwk.n, &jwk.e) {
            Ok(public_key) => {
                keys.insert(kid, public_key);
            }
            Err(e) => {
                tracing::warn!("Failed to parse JWK with kid '{}': {}", kid, e);
            }
        }
    }

    keys
}

/// Parse an RSA public key from base64url-encoded n and e components.
fn parse_rsa_public_key(n_b64: &str, e_b64: &str) -> Result<RS256PublicKey> {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let n = URL_SAFE_NO_PAD
        .decode(n_b64)
        .map_err(|e| AppError::JwksFetchFailed(format!("Invalid base64url for 'n': {}", e)))?;
    let e = URL_SAFE_NO_PAD
        .decode(e_b64)
        .map_err(|e| AppError::JwksFetchFailed(format!("Invalid base64url for 'e': {}", e)))?;

    RS256PublicKey::from_components(&n, &e)
        .map_err(|e| AppError::JwksFetchFailed(format!("Failed to parse RSA key: {}", e)))
}

//! Identity provider session validation.
//!
//! End users authenticate with the identity provider, which issues RS256
//! session JWTs. We verify them against the provider's JWKS and map the
//! claims onto a local `IdentityProfile`.

mod jwks;

pub use jwks::{Jwk, JwksCache, JwksResponse, parse_jwks};

use std::collections::HashSet;

use jwt_simple::algorithms::RSAPublicKeyLike;
use jwt_simple::prelude::{Token, VerificationOptions};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::IdentityProfile;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Expected `iss` claim
    pub issuer: String,
    pub jwks_url: String,
    /// Expected `aud` claim, if the provider sets one
    pub audience: Option<String>,
}

/// Non-standard claims the identity provider may add to session tokens.
/// Standard claims (iss, sub, aud, exp, nbf) are handled by jwt-simple.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

impl SessionClaims {
    /// `name`, or "first last" when only the parts are present.
    pub fn display_name(&self) -> Option<String> {
        if let Some(ref name) = self.name
            && !name.trim().is_empty()
        {
            return Some(name.trim().to_string());
        }
        let joined = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let joined = joined.trim();
        (!joined.is_empty()).then(|| joined.to_string())
    }
}

/// Verifies session tokens for one configured issuer.
pub struct SessionVerifier {
    config: IdentityConfig,
    jwks: JwksCache,
}

impl SessionVerifier {
    pub fn new(config: IdentityConfig, jwks: JwksCache) -> Self {
        Self { config, jwks }
    }

    /// Verify a session token and return the identity it represents.
    pub async fn verify(&self, token: &str) -> Result<IdentityProfile> {
        if self.config.issuer.is_empty() {
            return Err(AppError::SessionInvalid("No identity issuer configured".into()));
        }

        let metadata = Token::decode_metadata(token)
            .map_err(|e| AppError::SessionInvalid(format!("Invalid token format: {}", e)))?;
        let kid = metadata
            .key_id()
            .ok_or_else(|| AppError::SessionInvalid("Token has no key id".into()))?;

        let public_key = self.jwks.get_key(&self.config.jwks_url, kid).await?;

        let mut allowed_issuers = HashSet::new();
        allowed_issuers.insert(self.config.issuer.clone());

        let allowed_audiences = self.config.audience.as_ref().map(|aud| {
            let mut set = HashSet::new();
            set.insert(aud.clone());
            set
        });

        let options = VerificationOptions {
            allowed_issuers: Some(allowed_issuers),
            allowed_audiences,
            ..Default::default()
        };

        let verified = public_key
            .verify_token::<SessionClaims>(token, Some(options))
            .map_err(|e| AppError::SessionInvalid(format!("Token verification failed: {}", e)))?;

        let external_id = verified
            .subject
            .filter(|s| !s.is_empty())
            .ok_or_else(|| AppError::SessionInvalid("Missing 'sub' claim".into()))?;

        let claims = verified.custom;
        Ok(IdentityProfile {
            external_id,
            name: claims.display_name(),
            email: claims.email,
            avatar_url: claims.picture,
        })
    }
}

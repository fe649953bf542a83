use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result, msg};

/// Loose email check, matching what the settings form enforces.
/// Anything with an `@` and no whitespace passes.
fn validate_email_format(email: &str) -> Result<()> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') || email.contains(char::is_whitespace) {
        return Err(AppError::BadRequest(msg::INVALID_EMAIL_FORMAT.into()));
    }
    Ok(())
}

/// Local mirror of an identity-provider user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Subject of the identity provider's session token
    pub external_id: String,
    pub email: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub notification_preferences: NotificationPreferences,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Free-form preference blob owned by the settings page.
/// Stored as a JSON object; keys are not interpreted server-side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationPreferences(pub serde_json::Map<String, serde_json::Value>);

impl NotificationPreferences {
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(Self(map)),
            _ => Err(AppError::BadRequest(msg::NOTIFICATIONS_NOT_OBJECT.into())),
        }
    }
}

/// Profile fields taken from a verified session token.
/// `email` falls back to a placeholder when the token carries none.
#[derive(Debug, Clone)]
pub struct IdentityProfile {
    pub external_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

impl IdentityProfile {
    /// Minimal profile for users first seen through a webhook.
    pub fn placeholder(external_id: &str) -> Self {
        Self {
            external_id: external_id.to_string(),
            email: None,
            name: Some(format!("User {}", external_id)),
            avatar_url: None,
        }
    }

    pub fn email_or_placeholder(&self) -> String {
        self.email
            .as_deref()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| placeholder_email(&self.external_id))
    }
}

pub fn placeholder_email(external_id: &str) -> String {
    format!("user-{}@example.com", external_id)
}

#[derive(Debug, Deserialize)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
}

impl UpdateUser {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref email) = self.email {
            validate_email_format(email)?;
        }
        if let Some(ref name) = self.name
            && name.trim().is_empty()
        {
            return Err(AppError::BadRequest(msg::NAME_EMPTY.into()));
        }
        Ok(())
    }
}

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;

use crate::db::{AppState, queries};
use crate::error::{AppError, msg};
use crate::models::User;

/// Cookie the identity provider's frontend SDK stores the session token in.
pub const SESSION_COOKIE: &str = "__session";

/// The signed-in user, resolved by `session_auth`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// Session token from `Authorization: Bearer …`, else the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|t| !t.is_empty())
}

/// Verify the session and attach the local user, creating it on first sight.
pub async fn session_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = session_token(request.headers())
        .ok_or_else(|| AppError::SessionInvalid(msg::MISSING_SESSION.into()))?;

    let profile = state.sessions.verify(&token).await?;

    let user = {
        let conn = state.db.get()?;
        queries::get_or_create_user(&conn, &profile)?
    };

    request.extensions_mut().insert(CurrentUser(user));

    Ok(next.run(request).await)
}

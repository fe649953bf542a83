use axum::extract::State;
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result, msg};
use crate::extractors::Json;
use crate::middleware::CurrentUser;
use crate::models::{NotificationPreferences, UpdateUser, User};

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

pub async fn get_user(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

pub async fn update_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<UpdateUser>,
) -> Result<Json<SuccessResponse>> {
    input.validate()?;

    let conn = state.db.get()?;
    if queries::update_user_profile(&conn, &user.id, &input)? {
        tracing::info!("Profile updated for user {}", user.id);
    } else {
        tracing::warn!("Profile update matched no row for user {}", user.id);
        return Err(AppError::NotFound(msg::USER_NOT_FOUND.into()));
    }

    Ok(Json(SuccessResponse { success: true }))
}

pub async fn update_notifications(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<SuccessResponse>> {
    let prefs = NotificationPreferences::from_value(body)?;

    let conn = state.db.get()?;
    if !queries::update_notification_preferences(&conn, &user.id, &prefs)? {
        return Err(AppError::NotFound(msg::USER_NOT_FOUND.into()));
    }

    Ok(Json(SuccessResponse { success: true }))
}

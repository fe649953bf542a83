use axum::{Extension, extract::State};
use serde::Serialize;

use crate::db::AppState;
use crate::error::{AppError, Result, msg};
use crate::extractors::{Json, Path};
use crate::middleware::ActiveSubscription;

#[derive(Debug, Serialize)]
pub struct PremiumFeatureResponse {
    pub feature: String,
    pub price_id: Option<String>,
    pub status: String,
}

/// A premium feature endpoint. Only reachable through `require_premium`.
pub async fn premium_feature(
    State(state): State<AppState>,
    Extension(ActiveSubscription(subscription)): Extension<ActiveSubscription>,
    Path(feature): Path<String>,
) -> Result<Json<PremiumFeatureResponse>> {
    if !state.premium_features.iter().any(|f| f == &feature) {
        return Err(AppError::NotFound(msg::FEATURE_NOT_FOUND.into()));
    }

    Ok(Json(PremiumFeatureResponse {
        feature,
        price_id: subscription.price_id,
        status: subscription.status,
    }))
}

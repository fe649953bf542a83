use axum::extract::State;
use serde::Serialize;

use crate::catalog;
use crate::db::AppState;
use crate::error::Result;
use crate::extractors::Json;
use crate::models::Plan;

#[derive(Debug, Serialize)]
pub struct PricingResponse {
    pub plans: Vec<Plan>,
}

/// Active plans, cheapest first.
pub async fn list_pricing(State(state): State<AppState>) -> Result<Json<PricingResponse>> {
    let plans = catalog::list_plans(&state.db, &state.stripe).await?;
    Ok(Json(PricingResponse { plans }))
}

//! Plan catalog

use axum::extract::State;
use axum::Json;

use membergate_payments::{Category, Plan};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<Plan>>> {
    let plans = state.payments.plans.list_active_plans().await?;
    Ok(Json(plans))
}

pub async fn list_categories(State(state): State<AppState>) -> ApiResult<Json<Vec<Category>>> {
    let categories = state.payments.plans.list_categories().await?;
    Ok(Json(categories))
}

//! Subscription queries

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use membergate_payments::{CategorySummary, Subscription, SubscriptionHistoryEntry};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RemainingDaysResponse {
    pub user_id: i64,
    pub category_id: i32,
    pub remaining_days: i64,
}

/// Total remaining whole days for a user in a category, derived on demand.
pub async fn remaining_days(
    State(state): State<AppState>,
    Path((user_id, category_id)): Path<(i64, i32)>,
) -> ApiResult<Json<RemainingDaysResponse>> {
    let remaining_days = state
        .payments
        .ledger
        .remaining_days(user_id, category_id)
        .await?;

    Ok(Json(RemainingDaysResponse {
        user_id,
        category_id,
        remaining_days,
    }))
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsResponse {
    pub active: Vec<Subscription>,
    pub by_category: Vec<CategorySummary>,
}

pub async fn list_subscriptions(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> ApiResult<Json<SubscriptionsResponse>> {
    let active = state.payments.ledger.active_subscriptions(user_id).await?;
    let by_category = state.payments.ledger.category_breakdown(user_id).await?;

    Ok(Json(SubscriptionsResponse {
        active,
        by_category,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    20
}

pub async fn subscription_history(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Vec<SubscriptionHistoryEntry>>> {
    let entries = state
        .payments
        .ledger
        .subscription_history(user_id, params.limit.clamp(1, 200))
        .await?;
    Ok(Json(entries))
}

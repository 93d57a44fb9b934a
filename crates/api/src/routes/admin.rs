//! Admin endpoints: review queue, verification control, invariants

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use membergate_payments::{
    ApplyRequest, InvariantCheckSummary, ReviewItem, Subscription, VerificationStats,
};
use membergate_shared::{PaymentMethod, ReviewResolution};

use crate::error::ApiResult;
use crate::state::AppState;

/// Open escalations awaiting a human decision.
pub async fn list_review_queue(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ReviewItem>>> {
    let items = state.payments.review.list_open().await?;
    Ok(Json(items))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub decision: ReviewResolution,
    pub admin_id: i64,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub payment_id: Uuid,
    pub decision: ReviewResolution,
    /// Present when the decision was an approval.
    pub subscription: Option<Subscription>,
}

/// Resolve an escalated payment. Approvals apply the subscription through
/// the same path as automatic accepts.
pub async fn resolve_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<Json<ResolveResponse>> {
    let subscription = state
        .payments
        .engine
        .resolve_manually(payment_id, req.decision, req.admin_id)
        .await?;

    Ok(Json(ResolveResponse {
        payment_id,
        decision: req.decision,
        subscription,
    }))
}

#[derive(Debug, Serialize)]
pub struct RunVerificationResponse {
    pub resolved: Vec<Uuid>,
}

/// Trigger a verification pass outside the worker's schedule.
pub async fn run_verification(
    State(state): State<AppState>,
) -> ApiResult<Json<RunVerificationResponse>> {
    let resolved = state.payments.engine.poll_pending_claims().await?;
    Ok(Json(RunVerificationResponse { resolved }))
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    #[serde(default = "default_stats_window")]
    pub hours: i64,
}

fn default_stats_window() -> i64 {
    24
}

pub async fn verification_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> ApiResult<Json<VerificationStats>> {
    let stats = state
        .payments
        .log
        .stats_since(params.hours.clamp(1, 24 * 90))
        .await?;
    Ok(Json(stats))
}

pub async fn run_invariants(
    State(state): State<AppState>,
) -> ApiResult<Json<InvariantCheckSummary>> {
    let summary = state.payments.invariants.run_all_checks().await?;
    Ok(Json(summary))
}

/// Current verifier configuration as the engine will see it next cycle
/// (typed, with defaults applied).
pub async fn get_verifier_settings(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let config = state.payments.settings.load_verification_config().await?;
    Ok(Json(serde_json::json!({
        "auto_crypto_verify": config.auto_crypto_verify,
        "crypto_tolerance_percent": config.crypto_tolerance_percent,
        "max_auto_verify_usdt": config.max_auto_verify_usdt,
        "auto_approve_after_hours": config.auto_approve_after_hours,
        "max_tx_age_hours": config.max_tx_age_hours,
        "tron_min_confirmations": config.tron_min_confirmations,
    })))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingRequest {
    pub value: String,
}

/// Update one verifier setting. Unknown keys are rejected; the new value
/// takes effect on the next polling cycle.
pub async fn update_verifier_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<UpdateSettingRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if !membergate_payments::settings::VERIFIER_SETTING_KEYS.contains(&key.as_str()) {
        return Err(crate::error::ApiError::BadRequest(format!(
            "unknown setting key: {key}"
        )));
    }

    state.payments.settings.set(&key, &req.value).await?;
    Ok(Json(serde_json::json!({ "key": key, "value": req.value })))
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub user_id: i64,
    pub plan_id: i32,
    pub admin_id: i64,
}

/// Grant a plan directly (admin comp or free-plan activation). Free plans
/// stay subject to the one-per-user guard.
pub async fn grant_subscription(
    State(state): State<AppState>,
    Json(req): Json<GrantRequest>,
) -> ApiResult<Json<Subscription>> {
    let plan = state.payments.plans.get_plan(req.plan_id).await?;
    let payment_method = if plan.is_free() {
        PaymentMethod::Free
    } else {
        PaymentMethod::Admin
    };

    let subscription = state
        .payments
        .ledger
        .apply(&ApplyRequest {
            user_id: req.user_id,
            plan_id: req.plan_id,
            payment_method,
            payment_id: None,
            discount: None,
            admin_id: Some(req.admin_id),
        })
        .await?;

    Ok(Json(subscription))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub admin_id: i64,
}

pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<i64>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .payments
        .ledger
        .cancel(subscription_id, Some(req.admin_id))
        .await?;
    Ok(Json(subscription))
}

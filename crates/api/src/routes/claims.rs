//! Claim submission and status

use axum::extract::{Path, State};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use membergate_payments::{PaymentClaim, VerificationAttempt};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitClaimRequest {
    pub user_id: i64,
    pub plan_id: i32,
    pub tx_hash: String,
    pub claimed_amount: Decimal,
    #[serde(default)]
    pub discount_id: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct SubmitClaimResponse {
    pub payment_id: Uuid,
}

/// Register a crypto payment claim for verification.
pub async fn submit_claim(
    State(state): State<AppState>,
    Json(req): Json<SubmitClaimRequest>,
) -> ApiResult<Json<SubmitClaimResponse>> {
    let payment_id = state
        .payments
        .claims
        .submit_crypto_claim(
            req.user_id,
            req.plan_id,
            &req.tx_hash,
            req.claimed_amount,
            req.discount_id,
        )
        .await?;

    Ok(Json(SubmitClaimResponse { payment_id }))
}

#[derive(Debug, Serialize)]
pub struct ClaimDetailResponse {
    pub claim: PaymentClaim,
    pub attempts: Vec<VerificationAttempt>,
}

/// Claim status plus its verification attempt history.
pub async fn get_claim(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<Json<ClaimDetailResponse>> {
    let claim = state.payments.claims.get_claim(payment_id).await?;
    let attempts = state.payments.log.attempts_for_payment(payment_id).await?;

    Ok(Json(ClaimDetailResponse { claim, attempts }))
}

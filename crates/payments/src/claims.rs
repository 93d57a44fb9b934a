//! Payment claims
//!
//! A claim is a user's assertion that a specific on-chain transaction paid
//! for a specific plan. Claims are immutable after creation except for the
//! status machinery owned by the verifier; all terminal transitions go
//! through guarded conditional updates so the polling cycle and manual
//! resolution can never both consume the same claim.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use membergate_shared::{ClaimStatus, RejectReason};

use crate::error::{is_unique_violation, PaymentError, PaymentResult};

/// A candidate crypto payment awaiting (or past) verification.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct PaymentClaim {
    pub payment_id: Uuid,
    pub user_id: i64,
    pub plan_id: i32,
    pub discount_id: Option<i32>,
    pub tx_hash: String,
    pub claimed_amount: Decimal,
    pub method: String,
    pub status: String,
    pub escalation_reason: Option<String>,
    pub escalated_at: Option<OffsetDateTime>,
    pub verified_amount: Option<Decimal>,
    pub verified_tx_hash: Option<String>,
    pub reject_reason: Option<String>,
    pub submitted_at: OffsetDateTime,
    pub resolved_at: Option<OffsetDateTime>,
}

impl PaymentClaim {
    pub fn status(&self) -> PaymentResult<ClaimStatus> {
        self.status
            .parse()
            .map_err(|e: membergate_shared::ParseEnumError| PaymentError::Database(e.to_string()))
    }
}

const CLAIM_COLUMNS: &str = r#"
    payment_id, user_id, plan_id, discount_id, tx_hash, claimed_amount,
    method, status, escalation_reason, escalated_at, verified_amount,
    verified_tx_hash, reject_reason, submitted_at, resolved_at
"#;

/// TRON transaction hashes are 64 hex characters.
fn is_valid_tx_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Clone)]
pub struct ClaimService {
    pool: PgPool,
}

impl ClaimService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register a new crypto payment claim and return its `payment_id`.
    ///
    /// Only shape validation happens here; everything that needs chain data
    /// is deferred to the verification cycle.
    pub async fn submit_crypto_claim(
        &self,
        user_id: i64,
        plan_id: i32,
        tx_hash: &str,
        claimed_amount: Decimal,
        discount_id: Option<i32>,
    ) -> PaymentResult<Uuid> {
        let tx_hash = tx_hash.trim();
        if !is_valid_tx_hash(tx_hash) {
            return Err(PaymentError::Validation(
                "transaction hash must be 64 hex characters".to_string(),
            ));
        }
        if claimed_amount <= Decimal::ZERO {
            return Err(PaymentError::Validation(
                "claimed amount must be positive".to_string(),
            ));
        }

        let plan_exists: Option<bool> =
            sqlx::query_scalar("SELECT is_active FROM plans WHERE id = $1")
                .bind(plan_id)
                .fetch_optional(&self.pool)
                .await?;
        match plan_exists {
            None => return Err(PaymentError::PlanNotFound(plan_id)),
            Some(false) => {
                return Err(PaymentError::Validation(format!(
                    "plan {plan_id} is not purchasable"
                )))
            }
            Some(true) => {}
        }

        let payment_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO payment_claims
                (payment_id, user_id, plan_id, discount_id, tx_hash, claimed_amount, method)
            VALUES ($1, $2, $3, $4, $5, $6, 'crypto')
            "#,
        )
        .bind(payment_id)
        .bind(user_id)
        .bind(plan_id)
        .bind(discount_id)
        .bind(tx_hash)
        .bind(claimed_amount)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            payment_id = %payment_id,
            user_id = user_id,
            plan_id = plan_id,
            amount = %claimed_amount,
            "Crypto payment claim submitted"
        );

        Ok(payment_id)
    }

    pub async fn get_claim(&self, payment_id: Uuid) -> PaymentResult<PaymentClaim> {
        let claim: Option<PaymentClaim> = sqlx::query_as(&format!(
            "SELECT {CLAIM_COLUMNS} FROM payment_claims WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        claim.ok_or(PaymentError::ClaimNotFound(payment_id))
    }

    /// Pending claims, oldest first, bounded per polling pass.
    pub async fn pending_claims(&self, limit: i64) -> PaymentResult<Vec<PaymentClaim>> {
        let claims = sqlx::query_as(&format!(
            r#"
            SELECT {CLAIM_COLUMNS} FROM payment_claims
            WHERE status = 'pending'
            ORDER BY submitted_at
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(claims)
    }

    /// Escalations still unresolved after the grace cutoff.
    pub async fn aged_escalations(
        &self,
        escalated_before: OffsetDateTime,
    ) -> PaymentResult<Vec<PaymentClaim>> {
        let claims = sqlx::query_as(&format!(
            r#"
            SELECT {CLAIM_COLUMNS} FROM payment_claims
            WHERE status = 'escalated' AND escalated_at <= $1
            ORDER BY escalated_at
            "#
        ))
        .bind(escalated_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(claims)
    }

    /// True if some *other* approved claim already consumed this tx hash.
    pub async fn tx_hash_already_consumed(
        &self,
        tx_hash: &str,
        payment_id: Uuid,
    ) -> PaymentResult<bool> {
        let exists: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM payment_claims
            WHERE verified_tx_hash = $1 AND payment_id != $2
            LIMIT 1
            "#,
        )
        .bind(tx_hash)
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(exists.is_some())
    }

    /// Flip `pending -> escalated`. Returns false if another actor already
    /// moved the claim.
    pub async fn mark_escalated_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment_id: Uuid,
        reason: RejectReason,
    ) -> PaymentResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE payment_claims
            SET status = 'escalated', escalation_reason = $2, escalated_at = NOW()
            WHERE payment_id = $1 AND status = 'pending'
            "#,
        )
        .bind(payment_id)
        .bind(reason.as_str())
        .execute(&mut **tx)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    /// Terminal transition to `approved`, recording the authoritative
    /// amount and hash. Only wins from `pending` or `escalated`: whichever
    /// actor flips the row first owns the resolution.
    pub async fn mark_approved_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment_id: Uuid,
        verified_amount: Decimal,
        verified_tx_hash: &str,
    ) -> PaymentResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE payment_claims
            SET status = 'approved', verified_amount = $2, verified_tx_hash = $3,
                resolved_at = NOW()
            WHERE payment_id = $1 AND status IN ('pending', 'escalated')
            "#,
        )
        .bind(payment_id)
        .bind(verified_amount)
        .bind(verified_tx_hash)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            // The partial unique index on verified_tx_hash is the last line
            // of defense against one transaction paying for two claims.
            if is_unique_violation(&e) {
                PaymentError::Validation(format!(
                    "transaction {verified_tx_hash} already consumed by another payment"
                ))
            } else {
                e.into()
            }
        })?
        .rows_affected();
        Ok(rows > 0)
    }

    /// Terminal transition to `rejected` with a stable reason code.
    pub async fn mark_rejected_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment_id: Uuid,
        reason: RejectReason,
    ) -> PaymentResult<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE payment_claims
            SET status = 'rejected', reject_reason = $2, resolved_at = NOW()
            WHERE payment_id = $1 AND status IN ('pending', 'escalated')
            "#,
        )
        .bind(payment_id)
        .bind(reason.as_str())
        .execute(&mut **tx)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_hash_validation() {
        let valid = "a".repeat(64);
        assert!(is_valid_tx_hash(&valid));
        assert!(is_valid_tx_hash(
            "0f2b3a92cc9e54da3f77d2fe9d9cbb1f2a0d6f1f37a9f4a1b2c3d4e5f6a7b8c9"
        ));
        assert!(!is_valid_tx_hash("abc"));
        assert!(!is_valid_tx_hash(&"z".repeat(64)));
        assert!(!is_valid_tx_hash(&"a".repeat(65)));
    }
}

//! Verification log
//!
//! Append-only record of every terminal verification outcome. Audit and
//! idempotency both hang off this table: a `success` row is the durable
//! proof that a payment was applied, and a partial unique index guarantees
//! there is never more than one per payment.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use membergate_shared::{AttemptMethod, AttemptStatus};

use crate::error::PaymentResult;

/// One row per terminal evaluation of a payment claim.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct VerificationAttempt {
    pub id: i64,
    pub payment_id: Uuid,
    pub user_id: i64,
    pub tx_hash: String,
    pub amount: Decimal,
    pub status: String,
    pub method: String,
    pub reason: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Aggregate counters over a time window (admin reporting).
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerificationStats {
    pub total_attempts: i64,
    pub success: i64,
    pub failed: i64,
    pub subscription_error: i64,
    pub automatic: i64,
    pub automatic_grace: i64,
    pub manual: i64,
}

#[derive(Clone)]
pub struct VerificationLog {
    pool: PgPool,
}

impl VerificationLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Does this payment already have a successful attempt?
    ///
    /// Checked before every evaluation: an existing success short-circuits
    /// to accept without re-applying side effects.
    pub async fn has_success(&self, payment_id: Uuid) -> PaymentResult<bool> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM verification_attempts WHERE payment_id = $1 AND status = 'success' LIMIT 1",
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(exists.is_some())
    }

    /// Record an attempt outside any surrounding transaction (failure paths).
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        payment_id: Uuid,
        user_id: i64,
        tx_hash: &str,
        amount: Decimal,
        status: AttemptStatus,
        method: AttemptMethod,
        reason: Option<&str>,
    ) -> PaymentResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO verification_attempts
                (payment_id, user_id, tx_hash, amount, status, method, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(payment_id)
        .bind(user_id)
        .bind(tx_hash)
        .bind(amount)
        .bind(status.as_str())
        .bind(method.as_str())
        .bind(reason)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Record an attempt inside the caller's transaction (success path: the
    /// attempt commits or aborts together with the subscription writes).
    #[allow(clippy::too_many_arguments)]
    pub async fn record_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment_id: Uuid,
        user_id: i64,
        tx_hash: &str,
        amount: Decimal,
        status: AttemptStatus,
        method: AttemptMethod,
        reason: Option<&str>,
    ) -> PaymentResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO verification_attempts
                (payment_id, user_id, tx_hash, amount, status, method, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(payment_id)
        .bind(user_id)
        .bind(tx_hash)
        .bind(amount)
        .bind(status.as_str())
        .bind(method.as_str())
        .bind(reason)
        .fetch_one(&mut **tx)
        .await?;
        Ok(id)
    }

    pub async fn attempts_for_payment(
        &self,
        payment_id: Uuid,
    ) -> PaymentResult<Vec<VerificationAttempt>> {
        let attempts = sqlx::query_as(
            r#"
            SELECT id, payment_id, user_id, tx_hash, amount, status, method,
                   reason, created_at
            FROM verification_attempts
            WHERE payment_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(attempts)
    }

    /// Counters for the admin dashboard over the trailing window.
    pub async fn stats_since(&self, window_hours: i64) -> PaymentResult<VerificationStats> {
        let row: (i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE status = 'success'),
                COUNT(*) FILTER (WHERE status = 'failed'),
                COUNT(*) FILTER (WHERE status = 'subscription_error'),
                COUNT(*) FILTER (WHERE method = 'automatic'),
                COUNT(*) FILTER (WHERE method = 'automatic_grace'),
                COUNT(*) FILTER (WHERE method = 'manual')
            FROM verification_attempts
            WHERE created_at > NOW() - ($1 || ' hours')::INTERVAL
            "#,
        )
        .bind(window_hours.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(VerificationStats {
            total_attempts: row.0,
            success: row.1,
            failed: row.2,
            subscription_error: row.3,
            automatic: row.4,
            automatic_grace: row.5,
            manual: row.6,
        })
    }
}

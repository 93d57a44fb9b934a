//! Manual review queue
//!
//! Escalated claims wait here for an administrator. Queue rows carry the
//! escalation reason and a JSONB snapshot of the claim as it looked when it
//! was escalated; resolution always flows back through the verifier's
//! terminal-write path so manual and automatic approvals never diverge.

use serde::Serialize;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use membergate_shared::RejectReason;

use crate::claims::PaymentClaim;
use crate::error::{PaymentError, PaymentResult};

/// A queue entry awaiting (or past) human resolution.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ReviewItem {
    pub payment_id: Uuid,
    pub reason: String,
    pub claim_snapshot: Json<serde_json::Value>,
    pub created_at: OffsetDateTime,
    pub resolved_at: Option<OffsetDateTime>,
    pub resolved_by: Option<i64>,
    pub resolution: Option<String>,
}

#[derive(Clone)]
pub struct ReviewQueue {
    pool: PgPool,
}

impl ReviewQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue an escalated claim inside the escalation transaction.
    ///
    /// Idempotent: re-escalating a claim that already has an open entry is
    /// a no-op.
    pub async fn enqueue_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        claim: &PaymentClaim,
        reason: RejectReason,
    ) -> PaymentResult<()> {
        let snapshot = serde_json::to_value(claim)
            .map_err(|e| PaymentError::Validation(format!("unserializable claim: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO manual_review_queue (payment_id, reason, claim_snapshot)
            VALUES ($1, $2, $3)
            ON CONFLICT (payment_id) DO NOTHING
            "#,
        )
        .bind(claim.payment_id)
        .bind(reason.as_str())
        .bind(snapshot)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Close the queue entry as part of a terminal resolution transaction.
    /// No-op when the claim never reached the queue.
    pub async fn close_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        payment_id: Uuid,
        resolution: &str,
        resolved_by: Option<i64>,
    ) -> PaymentResult<()> {
        sqlx::query(
            r#"
            UPDATE manual_review_queue
            SET resolved_at = NOW(), resolved_by = $3, resolution = $2
            WHERE payment_id = $1 AND resolved_at IS NULL
            "#,
        )
        .bind(payment_id)
        .bind(resolution)
        .bind(resolved_by)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Open entries, oldest first.
    pub async fn list_open(&self) -> PaymentResult<Vec<ReviewItem>> {
        let items = sqlx::query_as(
            r#"
            SELECT payment_id, reason, claim_snapshot, created_at,
                   resolved_at, resolved_by, resolution
            FROM manual_review_queue
            WHERE resolved_at IS NULL
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn get(&self, payment_id: Uuid) -> PaymentResult<ReviewItem> {
        let item: Option<ReviewItem> = sqlx::query_as(
            r#"
            SELECT payment_id, reason, claim_snapshot, created_at,
                   resolved_at, resolved_by, resolution
            FROM manual_review_queue
            WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;
        item.ok_or(PaymentError::ClaimNotFound(payment_id))
    }
}

//! Subscription ledger
//!
//! Owns subscription creation, extension chains, and category-level
//! aggregation of remaining time. The extension chain is an append-only log:
//! extending never mutates the prior window's dates. A new row is written
//! with `previous_subscription_id` pointing back, and the prior row flips
//! `active -> superseded`.
//!
//! All writes for one application happen in a single transaction serialized
//! per user and category by a Postgres advisory transaction lock, so two
//! concurrent applications can neither both create fresh subscriptions nor
//! both extend from a stale end date.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use membergate_shared::{HistoryAction, PaymentMethod};

use crate::error::{PaymentError, PaymentResult};
use crate::guards::{Discount, DiscountGuard, FreePlanGuard};
use crate::plans::Plan;

/// A user's membership window.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub plan_id: i32,
    pub category_id: Option<i32>,
    pub status: String,
    pub start_date: OffsetDateTime,
    pub end_date: Option<OffsetDateTime>,
    pub previous_subscription_id: Option<i64>,
    pub is_extension: bool,
    pub payment_method: String,
    pub payment_id: Option<Uuid>,
    pub created_at: OffsetDateTime,
}

/// Immutable audit entry for a subscription mutation.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SubscriptionHistoryEntry {
    pub id: i64,
    pub subscription_id: i64,
    pub user_id: i64,
    pub plan_id: i32,
    pub category_id: Option<i32>,
    pub action: String,
    pub old_end_date: Option<OffsetDateTime>,
    pub new_end_date: Option<OffsetDateTime>,
    pub days_added: Option<i32>,
    pub created_by: Option<i64>,
    pub notes: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Per-category rollup of a user's active time.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CategorySummary {
    pub category_id: Option<i32>,
    pub category_name: Option<String>,
    pub active_count: i64,
    pub total_remaining_days: i64,
    pub latest_end: Option<OffsetDateTime>,
}

/// A discount being consumed as part of an application.
#[derive(Debug, Clone)]
pub struct DiscountApplication {
    pub discount: Discount,
    pub amount_discounted: Option<Decimal>,
}

/// Everything needed to apply one verified payment (or grant) to a user.
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub user_id: i64,
    pub plan_id: i32,
    pub payment_method: PaymentMethod,
    pub payment_id: Option<Uuid>,
    pub discount: Option<DiscountApplication>,
    pub admin_id: Option<i64>,
}

/// Advisory lock key for the `(user, category)` critical section.
///
/// FNV-1a over the raw ids: deterministic across binaries, so the API and
/// worker processes contend on the same key. Uncategorized plans fall back
/// to a per-plan scope, mirroring the extension lookup.
fn apply_lock_key(user_id: i64, scope: i64) -> i64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in user_id
        .to_le_bytes()
        .into_iter()
        .chain(scope.to_le_bytes())
    {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash as i64
}

/// Compute the window for a new subscription.
///
/// Extensions start where the prior window ends, unless that end has already
/// passed (or is unbounded), in which case they start now. The returned end
/// is always `start + duration`, so extending can never shorten total time.
fn extension_window(
    prior_end: Option<OffsetDateTime>,
    duration_days: i32,
    now: OffsetDateTime,
) -> (OffsetDateTime, OffsetDateTime) {
    let start = match prior_end {
        Some(end) if end > now => end,
        _ => now,
    };
    (start, start + Duration::days(i64::from(duration_days)))
}

#[derive(Clone)]
pub struct SubscriptionLedger {
    pool: PgPool,
}

impl SubscriptionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply a plan to a user as a standalone atomic unit.
    ///
    /// A genuine write race is retried once with a fresh read before being
    /// surfaced as `ConcurrentModification`.
    pub async fn apply(&self, req: &ApplyRequest) -> PaymentResult<Subscription> {
        for attempt in 0..2 {
            let mut tx = self.pool.begin().await?;
            match Self::apply_in_tx(&mut tx, req).await {
                Ok(subscription) => {
                    tx.commit().await?;
                    return Ok(subscription);
                }
                Err(PaymentError::ConcurrentModification(detail)) if attempt == 0 => {
                    tracing::warn!(
                        user_id = req.user_id,
                        plan_id = req.plan_id,
                        detail = %detail,
                        "Subscription apply raced, retrying once"
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(PaymentError::ConcurrentModification(
            "subscription apply raced twice".to_string(),
        ))
    }

    /// Apply a plan inside the caller's transaction.
    ///
    /// Used by the verifier so the claim approval, the subscription writes,
    /// the guard reservations, and the success attempt all commit together.
    pub async fn apply_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        req: &ApplyRequest,
    ) -> PaymentResult<Subscription> {
        let plan: Option<Plan> = sqlx::query_as(
            r#"
            SELECT id, name, category_id, price, price_tether, base_price,
                   duration_days, is_active
            FROM plans
            WHERE id = $1
            "#,
        )
        .bind(req.plan_id)
        .fetch_optional(&mut **tx)
        .await?;
        let plan = plan.ok_or(PaymentError::PlanNotFound(req.plan_id))?;

        // Serialize all applications for this user in this category
        let scope = match plan.category_id {
            Some(category_id) => i64::from(category_id),
            None => -i64::from(plan.id),
        };
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(apply_lock_key(req.user_id, scope))
            .execute(&mut **tx)
            .await?;

        // Fail fast before writing anything; the reservation insert below is
        // still the authoritative check.
        if plan.is_free() && FreePlanGuard::already_used(tx, req.user_id, plan.id).await? {
            return Err(PaymentError::AlreadyUsedFreePlan);
        }

        let now = OffsetDateTime::now_utc();
        let prior = Self::active_subscription_for_update(tx, req.user_id, &plan).await?;

        let subscription = match prior {
            Some(prior) => {
                let (start, end) = extension_window(prior.end_date, plan.duration_days, now);

                let superseded = sqlx::query(
                    "UPDATE subscriptions SET status = 'superseded' WHERE id = $1 AND status = 'active'",
                )
                .bind(prior.id)
                .execute(&mut **tx)
                .await?
                .rows_affected();
                if superseded == 0 {
                    return Err(PaymentError::ConcurrentModification(format!(
                        "subscription {} no longer active",
                        prior.id
                    )));
                }

                let subscription = Self::insert_subscription(
                    tx,
                    req,
                    &plan,
                    start,
                    Some(end),
                    Some(prior.id),
                    true,
                )
                .await?;

                Self::insert_history(
                    tx,
                    &subscription,
                    HistoryAction::Extended,
                    prior.end_date,
                    Some(end),
                    Some(plan.duration_days),
                    req.admin_id,
                    &format!("Extended with plan: {}", plan.name),
                )
                .await?;

                subscription
            }
            None => {
                let end = now + Duration::days(i64::from(plan.duration_days));
                let subscription =
                    Self::insert_subscription(tx, req, &plan, now, Some(end), None, false).await?;

                Self::insert_history(
                    tx,
                    &subscription,
                    HistoryAction::Created,
                    None,
                    Some(end),
                    Some(plan.duration_days),
                    req.admin_id,
                    &format!("New subscription: {}", plan.name),
                )
                .await?;

                subscription
            }
        };

        if plan.is_free() {
            FreePlanGuard::check_and_reserve(tx, req.user_id, plan.id, subscription.id).await?;
        }

        if let Some(application) = &req.discount {
            DiscountGuard::check_and_reserve(
                tx,
                req.user_id,
                &application.discount,
                Some(plan.id),
                req.payment_id,
                application.amount_discounted,
            )
            .await?;
        }

        tracing::info!(
            user_id = req.user_id,
            plan_id = plan.id,
            subscription_id = subscription.id,
            is_extension = subscription.is_extension,
            end_date = ?subscription.end_date,
            payment_method = %req.payment_method,
            "Subscription applied"
        );

        Ok(subscription)
    }

    /// The user's current active, unlapsed subscription in the plan's scope,
    /// locked for the remainder of the transaction.
    async fn active_subscription_for_update(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        plan: &Plan,
    ) -> PaymentResult<Option<Subscription>> {
        let subscription: Option<Subscription> = if let Some(category_id) = plan.category_id {
            sqlx::query_as(
                r#"
                SELECT id, user_id, plan_id, category_id, status, start_date, end_date,
                       previous_subscription_id, is_extension, payment_method, payment_id,
                       created_at
                FROM subscriptions
                WHERE user_id = $1 AND category_id = $2 AND status = 'active'
                  AND (end_date IS NULL OR end_date > NOW())
                ORDER BY end_date DESC
                LIMIT 1
                FOR UPDATE
                "#,
            )
            .bind(user_id)
            .bind(category_id)
            .fetch_optional(&mut **tx)
            .await?
        } else {
            // Uncategorized plans only chain onto themselves
            sqlx::query_as(
                r#"
                SELECT id, user_id, plan_id, category_id, status, start_date, end_date,
                       previous_subscription_id, is_extension, payment_method, payment_id,
                       created_at
                FROM subscriptions
                WHERE user_id = $1 AND plan_id = $2 AND status = 'active'
                  AND (end_date IS NULL OR end_date > NOW())
                ORDER BY end_date DESC
                LIMIT 1
                FOR UPDATE
                "#,
            )
            .bind(user_id)
            .bind(plan.id)
            .fetch_optional(&mut **tx)
            .await?
        };
        Ok(subscription)
    }

    async fn insert_subscription(
        tx: &mut Transaction<'_, Postgres>,
        req: &ApplyRequest,
        plan: &Plan,
        start: OffsetDateTime,
        end: Option<OffsetDateTime>,
        previous_subscription_id: Option<i64>,
        is_extension: bool,
    ) -> PaymentResult<Subscription> {
        let subscription = sqlx::query_as(
            r#"
            INSERT INTO subscriptions
                (user_id, plan_id, category_id, status, start_date, end_date,
                 previous_subscription_id, is_extension, payment_method, payment_id)
            VALUES ($1, $2, $3, 'active', $4, $5, $6, $7, $8, $9)
            RETURNING id, user_id, plan_id, category_id, status, start_date, end_date,
                      previous_subscription_id, is_extension, payment_method, payment_id,
                      created_at
            "#,
        )
        .bind(req.user_id)
        .bind(plan.id)
        .bind(plan.category_id)
        .bind(start)
        .bind(end)
        .bind(previous_subscription_id)
        .bind(is_extension)
        .bind(req.payment_method.as_str())
        .bind(req.payment_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(subscription)
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_history(
        tx: &mut Transaction<'_, Postgres>,
        subscription: &Subscription,
        action: HistoryAction,
        old_end_date: Option<OffsetDateTime>,
        new_end_date: Option<OffsetDateTime>,
        days_added: Option<i32>,
        created_by: Option<i64>,
        notes: &str,
    ) -> PaymentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscription_history
                (subscription_id, user_id, plan_id, category_id, action,
                 old_end_date, new_end_date, days_added, created_by, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(subscription.id)
        .bind(subscription.user_id)
        .bind(subscription.plan_id)
        .bind(subscription.category_id)
        .bind(action.as_str())
        .bind(old_end_date)
        .bind(new_end_date)
        .bind(days_added)
        .bind(created_by)
        .bind(notes)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Total remaining whole days for a user in a category.
    ///
    /// Derived on demand from the active rows, never stored. Partial days
    /// truncate toward zero. Unbounded subscriptions (no end date) do not
    /// contribute finite days.
    pub async fn remaining_days(&self, user_id: i64, category_id: i32) -> PaymentResult<i64> {
        let days: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(FLOOR(EXTRACT(EPOCH FROM (end_date - NOW())) / 86400))::BIGINT, 0)
            FROM subscriptions
            WHERE user_id = $1 AND category_id = $2 AND status = 'active'
              AND end_date > NOW()
            "#,
        )
        .bind(user_id)
        .bind(category_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(days)
    }

    /// Per-category rollup used by the profile/status surfaces.
    pub async fn category_breakdown(&self, user_id: i64) -> PaymentResult<Vec<CategorySummary>> {
        let summaries = sqlx::query_as(
            r#"
            SELECT
                s.category_id,
                c.name AS category_name,
                COUNT(*) AS active_count,
                COALESCE(SUM(FLOOR(EXTRACT(EPOCH FROM (s.end_date - NOW())) / 86400))::BIGINT, 0)
                    AS total_remaining_days,
                MAX(s.end_date) AS latest_end
            FROM subscriptions s
            LEFT JOIN categories c ON c.id = s.category_id
            WHERE s.user_id = $1 AND s.status = 'active'
              AND (s.end_date IS NULL OR s.end_date > NOW())
            GROUP BY s.category_id, c.name
            ORDER BY c.name NULLS LAST
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(summaries)
    }

    /// All of a user's active, unlapsed subscriptions.
    pub async fn active_subscriptions(&self, user_id: i64) -> PaymentResult<Vec<Subscription>> {
        let subscriptions = sqlx::query_as(
            r#"
            SELECT id, user_id, plan_id, category_id, status, start_date, end_date,
                   previous_subscription_id, is_extension, payment_method, payment_id,
                   created_at
            FROM subscriptions
            WHERE user_id = $1 AND status = 'active'
              AND (end_date IS NULL OR end_date > NOW())
            ORDER BY end_date DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(subscriptions)
    }

    /// Recent audit trail for a user.
    pub async fn subscription_history(
        &self,
        user_id: i64,
        limit: i64,
    ) -> PaymentResult<Vec<SubscriptionHistoryEntry>> {
        let entries = sqlx::query_as(
            r#"
            SELECT id, subscription_id, user_id, plan_id, category_id, action,
                   old_end_date, new_end_date, days_added, created_by, notes, created_at
            FROM subscription_history
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    /// Flip lapsed active subscriptions to `expired`, writing history rows.
    /// Returns how many were expired.
    pub async fn expire_outdated_subscriptions(&self) -> PaymentResult<u64> {
        let expired = sqlx::query(
            r#"
            WITH expired AS (
                UPDATE subscriptions
                SET status = 'expired'
                WHERE status = 'active' AND end_date IS NOT NULL AND end_date < NOW()
                RETURNING id, user_id, plan_id, category_id, end_date
            )
            INSERT INTO subscription_history
                (subscription_id, user_id, plan_id, category_id, action, old_end_date, notes)
            SELECT id, user_id, plan_id, category_id, 'expired', end_date,
                   'Auto-expired by system'
            FROM expired
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();

        if expired > 0 {
            tracing::info!(count = expired, "Expired lapsed subscriptions");
        }
        Ok(expired)
    }

    /// Administrator cancellation of an active subscription.
    pub async fn cancel(
        &self,
        subscription_id: i64,
        admin_id: Option<i64>,
    ) -> PaymentResult<Subscription> {
        let mut tx = self.pool.begin().await?;

        let subscription: Option<Subscription> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled'
            WHERE id = $1 AND status = 'active'
            RETURNING id, user_id, plan_id, category_id, status, start_date, end_date,
                      previous_subscription_id, is_extension, payment_method, payment_id,
                      created_at
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&mut *tx)
        .await?;

        let subscription = subscription.ok_or_else(|| {
            PaymentError::Validation(format!("subscription {subscription_id} is not active"))
        })?;

        Self::insert_history(
            &mut tx,
            &subscription,
            HistoryAction::Cancelled,
            subscription.end_date,
            None,
            None,
            admin_id,
            "Cancelled by administrator",
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            subscription_id = subscription_id,
            admin_id = ?admin_id,
            "Subscription cancelled"
        );

        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_starts_at_prior_end_when_unlapsed() {
        let now = OffsetDateTime::now_utc();
        let prior_end = now + Duration::days(10);

        let (start, end) = extension_window(Some(prior_end), 30, now);
        assert_eq!(start, prior_end);
        assert_eq!(end, prior_end + Duration::days(30));
    }

    #[test]
    fn test_extension_starts_now_when_prior_lapsed() {
        let now = OffsetDateTime::now_utc();
        let prior_end = now - Duration::days(12);

        let (start, end) = extension_window(Some(prior_end), 30, now);
        assert_eq!(start, now);
        assert_eq!(end, now + Duration::days(30));
    }

    #[test]
    fn test_extension_never_shortens() {
        let now = OffsetDateTime::now_utc();
        for prior_end in [
            Some(now + Duration::days(29)),
            Some(now - Duration::days(150)),
            None,
        ] {
            let (_, end) = extension_window(prior_end, 7, now);
            if let Some(prior) = prior_end {
                assert!(end >= prior, "extension shortened the window");
            }
            assert!(end >= now + Duration::days(7));
        }
    }

    #[test]
    fn test_unbounded_prior_starts_now() {
        let now = OffsetDateTime::now_utc();
        let (start, end) = extension_window(None, 14, now);
        assert_eq!(start, now);
        assert_eq!(end, now + Duration::days(14));
    }

    #[test]
    fn test_lock_key_is_stable_and_scoped() {
        let a = apply_lock_key(42, 7);
        assert_eq!(a, apply_lock_key(42, 7));
        assert_ne!(a, apply_lock_key(42, 8));
        assert_ne!(a, apply_lock_key(43, 7));
    }
}

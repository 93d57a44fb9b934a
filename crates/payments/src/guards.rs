//! Usage guards
//!
//! One-time-use constraints enforced transactionally alongside subscription
//! creation. Both guards run inside the ledger's apply transaction: the
//! reservation insert and the subscription write commit or abort together.

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{PaymentError, PaymentResult};

/// Whether a discount may be reused by the same user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountUsePolicy {
    /// Usage is recorded for audit but never blocks.
    Unconditional,
    /// Atomic check-then-insert keyed on `(user_id, discount_id)`.
    PerUserOnce,
}

/// A discount code definition.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Discount {
    pub id: i32,
    pub code: String,
    pub discount_type: String,
    pub value: Decimal,
    pub single_use_per_user: bool,
    pub max_uses: Option<i32>,
    pub uses_count: i32,
    pub is_active: bool,
}

impl Discount {
    pub fn policy(&self) -> DiscountUsePolicy {
        if self.single_use_per_user {
            DiscountUsePolicy::PerUserOnce
        } else {
            DiscountUsePolicy::Unconditional
        }
    }

    /// Amount taken off a base price, clamped to the base itself.
    pub fn discount_amount(&self, base: Decimal) -> Decimal {
        let raw = match self.discount_type.as_str() {
            "percentage" => base * self.value / Decimal::from(100),
            _ => self.value,
        };
        raw.min(base).max(Decimal::ZERO)
    }
}

/// Free-plan guard: one activation per `(user_id, plan_id)`, ever.
pub struct FreePlanGuard;

impl FreePlanGuard {
    /// Reserve the free plan for this user inside the caller's transaction.
    ///
    /// The UNIQUE(user_id, plan_id) constraint is the last line of defense:
    /// a conflicting insert means the plan was already consumed, regardless
    /// of what any earlier check observed.
    pub async fn check_and_reserve(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        plan_id: i32,
        subscription_id: i64,
    ) -> PaymentResult<()> {
        let reserved: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO free_plan_usage (user_id, plan_id, subscription_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, plan_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(plan_id)
        .bind(subscription_id)
        .fetch_optional(&mut **tx)
        .await?;

        if reserved.is_none() {
            return Err(PaymentError::AlreadyUsedFreePlan);
        }
        Ok(())
    }

    /// Read-only pre-check used to fail fast before any row is written.
    pub async fn already_used(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        plan_id: i32,
    ) -> PaymentResult<bool> {
        let exists: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM free_plan_usage WHERE user_id = $1 AND plan_id = $2 LIMIT 1",
        )
        .bind(user_id)
        .bind(plan_id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(exists.is_some())
    }
}

/// Discount guard: conditional per-user uniqueness plus usage bookkeeping.
pub struct DiscountGuard;

impl DiscountGuard {
    /// Record (and, for single-use discounts, reserve) a discount use.
    ///
    /// Conditional uniqueness cannot be a structural constraint, so the
    /// discount row itself is locked `FOR UPDATE` first; that serializes
    /// concurrent uses of the same code and makes the check-then-insert
    /// race-free within the surrounding transaction.
    pub async fn check_and_reserve(
        tx: &mut Transaction<'_, Postgres>,
        user_id: i64,
        discount: &Discount,
        plan_id: Option<i32>,
        payment_id: Option<Uuid>,
        amount_discounted: Option<Decimal>,
    ) -> PaymentResult<()> {
        sqlx::query("SELECT id FROM discounts WHERE id = $1 FOR UPDATE")
            .bind(discount.id)
            .execute(&mut **tx)
            .await?;

        if discount.policy() == DiscountUsePolicy::PerUserOnce {
            let used: Option<i32> = sqlx::query_scalar(
                "SELECT 1 FROM discount_usage WHERE user_id = $1 AND discount_id = $2 LIMIT 1",
            )
            .bind(user_id)
            .bind(discount.id)
            .fetch_optional(&mut **tx)
            .await?;

            if used.is_some() {
                return Err(PaymentError::AlreadyUsedDiscount);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO discount_usage
                (user_id, discount_id, plan_id, payment_id, amount_discounted)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(user_id)
        .bind(discount.id)
        .bind(plan_id)
        .bind(payment_id)
        .bind(amount_discounted)
        .execute(&mut **tx)
        .await?;

        sqlx::query("UPDATE discounts SET uses_count = uses_count + 1 WHERE id = $1")
            .bind(discount.id)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    pub async fn get_discount(pool: &PgPool, discount_id: i32) -> PaymentResult<Discount> {
        let discount: Option<Discount> = sqlx::query_as(
            r#"
            SELECT id, code, discount_type, value, single_use_per_user,
                   max_uses, uses_count, is_active
            FROM discounts
            WHERE id = $1
            "#,
        )
        .bind(discount_id)
        .fetch_optional(pool)
        .await?;

        discount.ok_or(PaymentError::DiscountNotFound(discount_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn discount(single_use: bool) -> Discount {
        Discount {
            id: 7,
            code: "WELCOME".to_string(),
            discount_type: "percentage".to_string(),
            value: dec!(50),
            single_use_per_user: single_use,
            max_uses: None,
            uses_count: 0,
            is_active: true,
        }
    }

    #[test]
    fn test_policy_follows_flag() {
        assert_eq!(discount(true).policy(), DiscountUsePolicy::PerUserOnce);
        assert_eq!(discount(false).policy(), DiscountUsePolicy::Unconditional);
    }

    #[test]
    fn test_discount_amounts() {
        // 50% of 30 USDT
        assert_eq!(discount(false).discount_amount(dec!(30)), dec!(15));

        let mut fixed = discount(false);
        fixed.discount_type = "fixed".to_string();
        fixed.value = dec!(5);
        assert_eq!(fixed.discount_amount(dec!(30)), dec!(5));
        // Never discounts below zero total
        assert_eq!(fixed.discount_amount(dec!(3)), dec!(3));
    }
}

//! Plan and category lookups

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;

use crate::error::{PaymentError, PaymentResult};

/// A purchasable subscription definition.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Plan {
    pub id: i32,
    pub name: String,
    pub category_id: Option<i32>,
    /// Fiat price.
    pub price: Option<Decimal>,
    /// Crypto (USDT) price.
    pub price_tether: Option<Decimal>,
    pub base_price: Option<Decimal>,
    pub duration_days: i32,
    pub is_active: bool,
}

impl Plan {
    /// A plan with every price field zero or NULL is a free plan; it may be
    /// granted at most once per user.
    pub fn is_free(&self) -> bool {
        fn zero_or_none(value: &Option<Decimal>) -> bool {
            value.map(|v| v.is_zero()).unwrap_or(true)
        }
        zero_or_none(&self.price)
            && zero_or_none(&self.price_tether)
            && zero_or_none(&self.base_price)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Category {
    pub id: i32,
    pub name: String,
}

#[derive(Clone)]
pub struct PlanService {
    pool: PgPool,
}

impl PlanService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_plan(&self, plan_id: i32) -> PaymentResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as(
            r#"
            SELECT id, name, category_id, price, price_tether, base_price,
                   duration_days, is_active
            FROM plans
            WHERE id = $1
            "#,
        )
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or(PaymentError::PlanNotFound(plan_id))
    }

    pub async fn list_active_plans(&self) -> PaymentResult<Vec<Plan>> {
        let plans = sqlx::query_as(
            r#"
            SELECT id, name, category_id, price, price_tether, base_price,
                   duration_days, is_active
            FROM plans
            WHERE is_active = TRUE
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(plans)
    }

    pub async fn list_categories(&self) -> PaymentResult<Vec<Category>> {
        let categories = sqlx::query_as("SELECT id, name FROM categories ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(categories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn plan(price: Option<Decimal>, tether: Option<Decimal>, base: Option<Decimal>) -> Plan {
        Plan {
            id: 1,
            name: "test".to_string(),
            category_id: None,
            price,
            price_tether: tether,
            base_price: base,
            duration_days: 30,
            is_active: true,
        }
    }

    #[test]
    fn test_free_plan_detection() {
        assert!(plan(None, None, None).is_free());
        assert!(plan(Some(dec!(0)), Some(dec!(0.0)), None).is_free());
        assert!(!plan(Some(dec!(10)), None, None).is_free());
        assert!(!plan(None, Some(dec!(4.99)), None).is_free());
        assert!(!plan(None, None, Some(dec!(12))).is_free());
    }
}

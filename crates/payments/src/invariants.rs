//! Payments Invariants Module
//!
//! Provides runnable consistency checks for the payment verification and
//! subscription lifecycle engine. These invariants can be run after any
//! mutation or on a schedule to ensure the system is in a valid state.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write
//! 4. **Complete**: Covers the critical payment/subscription consistency requirements

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::PaymentResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - payments may be applied incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

/// Row type for duplicate success violation
#[derive(Debug, sqlx::FromRow)]
struct DuplicateSuccessRow {
    payment_id: Uuid,
    success_count: i64,
}

/// Row type for approved-without-log violation
#[derive(Debug, sqlx::FromRow)]
struct UnloggedApprovalRow {
    payment_id: Uuid,
    user_id: i64,
    resolved_at: Option<OffsetDateTime>,
}

/// Row type for orphaned free-plan usage violation
#[derive(Debug, sqlx::FromRow)]
struct OrphanFreeUsageRow {
    user_id: i64,
    plan_id: i32,
}

/// Row type for broken extension chain violation
#[derive(Debug, sqlx::FromRow)]
struct BrokenChainRow {
    subscription_id: i64,
    user_id: i64,
    previous_subscription_id: Option<i64>,
    previous_user_id: Option<i64>,
}

/// Row type for multiple active subscriptions violation
#[derive(Debug, sqlx::FromRow)]
struct MultipleActiveRow {
    user_id: i64,
    category_id: Option<i32>,
    sub_count: i64,
}

/// Row type for unqueued escalation violation
#[derive(Debug, sqlx::FromRow)]
struct UnqueuedEscalationRow {
    payment_id: Uuid,
    escalated_at: Option<OffsetDateTime>,
}

/// Service for running payments invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> PaymentResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        // Run all checks
        violations.extend(self.check_one_success_per_payment().await?);
        violations.extend(self.check_approved_claims_logged().await?);
        violations.extend(self.check_free_usage_backed_by_subscription().await?);
        violations.extend(self.check_extension_chain_integrity().await?);
        violations.extend(self.check_single_active_per_category().await?);
        violations.extend(self.check_escalations_queued().await?);

        let checks_run = 6;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: At most one successful attempt per payment
    ///
    /// A second success would mean a payment was applied twice.
    async fn check_one_success_per_payment(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<DuplicateSuccessRow> = sqlx::query_as(
            r#"
            SELECT payment_id, COUNT(*) as success_count
            FROM verification_attempts
            WHERE status = 'success'
            GROUP BY payment_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "one_success_per_payment".to_string(),
                description: format!(
                    "Payment {} has {} successful attempts (expected at most 1)",
                    row.payment_id, row.success_count
                ),
                context: serde_json::json!({
                    "payment_id": row.payment_id,
                    "success_count": row.success_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Approved claims have a success attempt
    ///
    /// Audit state and user-visible state must never diverge: every approved
    /// claim was durably logged before being reported.
    async fn check_approved_claims_logged(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<UnloggedApprovalRow> = sqlx::query_as(
            r#"
            SELECT c.payment_id, c.user_id, c.resolved_at
            FROM payment_claims c
            WHERE c.status = 'approved'
              AND NOT EXISTS (
                  SELECT 1 FROM verification_attempts a
                  WHERE a.payment_id = c.payment_id AND a.status = 'success'
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "approved_claims_logged".to_string(),
                description: format!(
                    "Payment {} is approved but has no success attempt in the log",
                    row.payment_id
                ),
                context: serde_json::json!({
                    "payment_id": row.payment_id,
                    "user_id": row.user_id,
                    "resolved_at": row.resolved_at,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 3: Free-plan usage is backed by a subscription
    ///
    /// A usage record without its subscription means the guard insert and
    /// the subscription write did not commit together.
    async fn check_free_usage_backed_by_subscription(
        &self,
    ) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<OrphanFreeUsageRow> = sqlx::query_as(
            r#"
            SELECT u.user_id, u.plan_id
            FROM free_plan_usage u
            WHERE u.subscription_id IS NULL
               OR NOT EXISTS (
                   SELECT 1 FROM subscriptions s WHERE s.id = u.subscription_id
               )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "free_usage_backed_by_subscription".to_string(),
                description: format!(
                    "Free-plan usage for user {} plan {} has no backing subscription",
                    row.user_id, row.plan_id
                ),
                context: serde_json::json!({
                    "user_id": row.user_id,
                    "plan_id": row.plan_id,
                }),
                severity: ViolationSeverity::Medium,
            })
            .collect())
    }

    /// Invariant 4: Extension chains are well-formed
    ///
    /// An extension must reference a prior subscription of the same user.
    async fn check_extension_chain_integrity(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<BrokenChainRow> = sqlx::query_as(
            r#"
            SELECT
                s.id as subscription_id,
                s.user_id,
                s.previous_subscription_id,
                p.user_id as previous_user_id
            FROM subscriptions s
            LEFT JOIN subscriptions p ON p.id = s.previous_subscription_id
            WHERE s.is_extension = TRUE
              AND (s.previous_subscription_id IS NULL OR p.user_id != s.user_id)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "extension_chain_integrity".to_string(),
                description: format!(
                    "Subscription {} is an extension but its chain link is broken",
                    row.subscription_id
                ),
                context: serde_json::json!({
                    "subscription_id": row.subscription_id,
                    "user_id": row.user_id,
                    "previous_subscription_id": row.previous_subscription_id,
                    "previous_user_id": row.previous_user_id,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 5: At most one active unlapsed subscription per user and category
    ///
    /// Two active windows in the same category would make extensions chain
    /// from a stale end date.
    async fn check_single_active_per_category(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleActiveRow> = sqlx::query_as(
            r#"
            SELECT user_id, category_id, COUNT(*) as sub_count
            FROM subscriptions
            WHERE status = 'active'
              AND (end_date IS NULL OR end_date > NOW())
              AND category_id IS NOT NULL
            GROUP BY user_id, category_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_per_category".to_string(),
                description: format!(
                    "User {} has {} active subscriptions in category {:?} (expected 1)",
                    row.user_id, row.sub_count, row.category_id
                ),
                context: serde_json::json!({
                    "user_id": row.user_id,
                    "category_id": row.category_id,
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 6: Escalated claims are in the review queue
    ///
    /// An escalated claim nobody can see will only ever resolve via the
    /// grace fallback.
    async fn check_escalations_queued(&self) -> PaymentResult<Vec<InvariantViolation>> {
        let rows: Vec<UnqueuedEscalationRow> = sqlx::query_as(
            r#"
            SELECT c.payment_id, c.escalated_at
            FROM payment_claims c
            WHERE c.status = 'escalated'
              AND NOT EXISTS (
                  SELECT 1 FROM manual_review_queue q
                  WHERE q.payment_id = c.payment_id AND q.resolved_at IS NULL
              )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "escalations_queued".to_string(),
                description: format!(
                    "Payment {} is escalated but has no open review queue entry",
                    row.payment_id
                ),
                context: serde_json::json!({
                    "payment_id": row.payment_id,
                    "escalated_at": row.escalated_at,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> PaymentResult<Vec<InvariantViolation>> {
        match name {
            "one_success_per_payment" => self.check_one_success_per_payment().await,
            "approved_claims_logged" => self.check_approved_claims_logged().await,
            "free_usage_backed_by_subscription" => {
                self.check_free_usage_backed_by_subscription().await
            }
            "extension_chain_integrity" => self.check_extension_chain_integrity().await,
            "single_active_per_category" => self.check_single_active_per_category().await,
            "escalations_queued" => self.check_escalations_queued().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "one_success_per_payment",
            "approved_claims_logged",
            "free_usage_backed_by_subscription",
            "extension_chain_integrity",
            "single_active_per_category",
            "escalations_queued",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"one_success_per_payment"));
        assert!(checks.contains(&"extension_chain_integrity"));
    }
}

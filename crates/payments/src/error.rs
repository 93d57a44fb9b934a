//! Error types for the payments engine

use thiserror::Error;
use uuid::Uuid;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Errors surfaced by the payments engine.
///
/// Rejections and escalations of a claim are *decisions*, not errors; they
/// live in [`crate::verifier::Decision`]. Everything here is either a caller
/// mistake, a guard violation, or an infrastructure failure.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// Malformed claim, rejected before any verification runs.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("payment claim {0} not found")]
    ClaimNotFound(Uuid),

    #[error("plan {0} not found")]
    PlanNotFound(i32),

    #[error("discount {0} not found")]
    DiscountNotFound(i32),

    /// The user already consumed this free plan; no subscription was created.
    #[error("free plan already used by this user")]
    AlreadyUsedFreePlan,

    /// Single-use discount already consumed by this user.
    #[error("discount already used by this user")]
    AlreadyUsedDiscount,

    /// The claim was resolved by another actor (admin vs. polling race).
    #[error("payment {0} is already resolved")]
    AlreadyResolved(Uuid),

    /// A genuine write race that survived one retry.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Chain-data collaborator unreachable. Never terminal for a claim on
    /// its own; the claim stays pending and is retried with backoff.
    #[error("chain data source unavailable: {0}")]
    ChainUnavailable(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for PaymentError {
    fn from(err: sqlx::Error) -> Self {
        // Serialization failures and deadlocks are retryable races, not
        // generic storage errors.
        if is_serialization_conflict(&err) {
            return PaymentError::ConcurrentModification(err.to_string());
        }
        PaymentError::Database(err.to_string())
    }
}

/// True when the error is a storage-layer unique constraint violation.
///
/// Guard inserts treat this as the last line of defense: a failed unique
/// insert is a domain conflict, not a generic storage error.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

/// True when the error is a serialization failure or deadlock that is safe
/// to retry once with a fresh read.
pub fn is_serialization_conflict(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code == "40001" || code == "40P01")
        .unwrap_or(false)
}

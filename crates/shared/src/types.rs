//! Core domain enums
//!
//! Every enum here is persisted as lowercase snake_case TEXT and round-trips
//! through `as_str`/`FromStr`. The database CHECK constraints in the payments
//! crate migrations must stay in sync with these variants.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Error returned when a persisted status string has no matching variant.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Lifecycle of a crypto payment claim.
///
/// `Pending` claims are picked up by the polling cycle. `Escalated` claims
/// sit in the manual review queue (and may still auto-approve after the
/// configured grace delay). `Approved`/`Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Escalated,
    Approved,
    Rejected,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Escalated => "escalated",
            ClaimStatus::Approved => "approved",
            ClaimStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ClaimStatus::Approved | ClaimStatus::Rejected)
    }
}

impl FromStr for ClaimStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ClaimStatus::Pending),
            "escalated" => Ok(ClaimStatus::Escalated),
            "approved" => Ok(ClaimStatus::Approved),
            "rejected" => Ok(ClaimStatus::Rejected),
            other => Err(ParseEnumError {
                kind: "claim status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a subscription window.
///
/// `Superseded` marks a subscription that was logically closed by an
/// extension chaining onto it; the row is retained for history and the
/// `previous_subscription_id` link of its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
    Superseded,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Superseded => "superseded",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "superseded" => Ok(SubscriptionStatus::Superseded),
            other => Err(ParseEnumError {
                kind: "subscription status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a subscription was paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Crypto,
    Gateway,
    Free,
    Admin,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Crypto => "crypto",
            PaymentMethod::Gateway => "gateway",
            PaymentMethod::Free => "free",
            PaymentMethod::Admin => "admin",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single verification attempt.
///
/// `SubscriptionError` means the payment verified but applying it to the
/// ledger failed; the claim stays retryable and is never marked consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Failed,
    SubscriptionError,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failed => "failed",
            AttemptStatus::SubscriptionError => "subscription_error",
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which actor produced a verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptMethod {
    /// Regular polling-cycle decision.
    Automatic,
    /// Aged escalation auto-resolved after the grace delay.
    AutomaticGrace,
    /// Administrator resolution from the review queue.
    Manual,
}

impl AttemptMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptMethod::Automatic => "automatic",
            AttemptMethod::AutomaticGrace => "automatic_grace",
            AttemptMethod::Manual => "manual",
        }
    }
}

impl std::fmt::Display for AttemptMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stable reason codes for rejections and escalations.
///
/// These are the only codes surfaced to the user-facing layer; raw internal
/// errors never leak through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    WrongRecipient,
    InsufficientConfirmations,
    TransactionTooOld,
    AmountMismatch,
    ExceedsAutoCeiling,
    AutoVerifyDisabled,
    DuplicateTxHash,
    TransactionNotFound,
    DeniedByAdmin,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::WrongRecipient => "wrong_recipient",
            RejectReason::InsufficientConfirmations => "insufficient_confirmations",
            RejectReason::TransactionTooOld => "transaction_too_old",
            RejectReason::AmountMismatch => "amount_mismatch",
            RejectReason::ExceedsAutoCeiling => "exceeds_auto_ceiling",
            RejectReason::AutoVerifyDisabled => "auto_verify_disabled",
            RejectReason::DuplicateTxHash => "duplicate_tx_hash",
            RejectReason::TransactionNotFound => "transaction_not_found",
            RejectReason::DeniedByAdmin => "denied_by_admin",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit action recorded in subscription history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    Created,
    Extended,
    Expired,
    Cancelled,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::Extended => "extended",
            HistoryAction::Expired => "expired",
            HistoryAction::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Administrator decision on an escalated payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewResolution {
    Approve,
    Deny,
}

impl ReviewResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewResolution::Approve => "approve",
            ReviewResolution::Deny => "deny",
        }
    }
}

impl FromStr for ReviewResolution {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(ReviewResolution::Approve),
            "deny" => Ok(ReviewResolution::Deny),
            other => Err(ParseEnumError {
                kind: "review resolution",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ReviewResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_status_terminality() {
        assert!(!ClaimStatus::Pending.is_terminal());
        assert!(!ClaimStatus::Escalated.is_terminal());
        assert!(ClaimStatus::Approved.is_terminal());
        assert!(ClaimStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_claim_status_round_trip() {
        for status in [
            ClaimStatus::Pending,
            ClaimStatus::Escalated,
            ClaimStatus::Approved,
            ClaimStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<ClaimStatus>().unwrap(), status);
        }
        assert!("paid".parse::<ClaimStatus>().is_err());
    }

    #[test]
    fn test_reason_codes_are_snake_case() {
        assert_eq!(RejectReason::WrongRecipient.to_string(), "wrong_recipient");
        assert_eq!(
            RejectReason::ExceedsAutoCeiling.to_string(),
            "exceeds_auto_ceiling"
        );
        assert_eq!(AttemptMethod::AutomaticGrace.to_string(), "automatic_grace");
        assert_eq!(
            AttemptStatus::SubscriptionError.to_string(),
            "subscription_error"
        );
    }
}

// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Membergate Shared Types
//!
//! Domain vocabulary used across the API, payments engine, and worker:
//! claim/subscription/attempt state machines and the stable reason codes
//! surfaced to users and admins.

pub mod types;

pub use types::{
    AttemptMethod, AttemptStatus, ClaimStatus, HistoryAction, ParseEnumError, PaymentMethod,
    RejectReason, ReviewResolution, SubscriptionStatus,
};

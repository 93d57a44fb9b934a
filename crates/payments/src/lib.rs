// Payments crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Attempt/history writers take full audit context
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Membergate Payments Module
//!
//! Automatic payment verification and subscription lifecycle engine.
//!
//! ## Features
//!
//! - **Payment Verification**: Classify crypto payment claims as accepted,
//!   rejected, or escalated using tolerance windows, confirmation counts,
//!   and monetary ceilings
//! - **Subscription Ledger**: Create, extend, and chain subscriptions per
//!   category, with an append-only extension log and full audit history
//! - **Usage Guards**: One free plan per user per plan, single-use discount
//!   codes, enforced transactionally with subscription creation
//! - **Manual Review Queue**: Escalated payments wait for an administrator;
//!   unresolved escalations auto-approve after a configurable grace delay
//! - **Verification Log**: Append-only attempt record, at most one success
//!   per payment
//! - **Invariants**: Runnable consistency checks over the whole engine

pub mod attempts;
pub mod chain;
pub mod claims;
pub mod error;
pub mod guards;
pub mod invariants;
pub mod ledger;
pub mod notify;
pub mod plans;
pub mod review;
pub mod settings;
pub mod verifier;

#[cfg(test)]
mod edge_case_tests;

// Attempts
pub use attempts::{VerificationAttempt, VerificationLog, VerificationStats};

// Chain
pub use chain::{ChainDataSource, ChainTransaction, TronScanClient};

// Claims
pub use claims::{ClaimService, PaymentClaim};

// Error
pub use error::{PaymentError, PaymentResult};

// Guards
pub use guards::{Discount, DiscountGuard, DiscountUsePolicy, FreePlanGuard};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Ledger
pub use ledger::{
    ApplyRequest, CategorySummary, DiscountApplication, Subscription, SubscriptionHistoryEntry,
    SubscriptionLedger,
};

// Notify
pub use notify::{LogNotifier, NotificationSink, PaymentEvent};

// Plans
pub use plans::{Category, Plan, PlanService};

// Review
pub use review::{ReviewItem, ReviewQueue};

// Settings
pub use settings::{SettingsStore, VerificationConfig};

// Verifier
pub use verifier::{
    amount_deviation_percent, evaluate, ChainObservation, Decision, VerificationEngine,
};

use std::sync::Arc;

use sqlx::PgPool;

/// Main payments service that combines all engine functionality
pub struct PaymentsService {
    pub settings: SettingsStore,
    pub plans: PlanService,
    pub claims: ClaimService,
    pub ledger: SubscriptionLedger,
    pub log: VerificationLog,
    pub review: ReviewQueue,
    pub engine: VerificationEngine,
    pub invariants: InvariantChecker,
}

impl PaymentsService {
    /// Create a new payments service with explicit collaborators.
    pub fn new(
        pool: PgPool,
        chain: Arc<dyn ChainDataSource>,
        notifier: Arc<dyn NotificationSink>,
        wallet_address: String,
    ) -> Self {
        Self {
            settings: SettingsStore::new(pool.clone()),
            plans: PlanService::new(pool.clone()),
            claims: ClaimService::new(pool.clone()),
            ledger: SubscriptionLedger::new(pool.clone()),
            log: VerificationLog::new(pool.clone()),
            review: ReviewQueue::new(pool.clone()),
            invariants: InvariantChecker::new(pool.clone()),
            engine: VerificationEngine::new(pool, chain, notifier, wallet_address),
        }
    }

    /// Create a new payments service from environment variables.
    ///
    /// Requires `CRYPTO_WALLET_ADDRESS`; `TRONSCAN_API_URL` defaults to the
    /// public explorer.
    pub fn from_env(pool: PgPool) -> PaymentResult<Self> {
        let wallet_address = std::env::var("CRYPTO_WALLET_ADDRESS")
            .map_err(|_| PaymentError::Config("CRYPTO_WALLET_ADDRESS must be set".to_string()))?;
        let explorer_url = std::env::var("TRONSCAN_API_URL")
            .unwrap_or_else(|_| "https://apilist.tronscanapi.com".to_string());

        let chain: Arc<dyn ChainDataSource> = Arc::new(TronScanClient::new(explorer_url));
        let notifier: Arc<dyn NotificationSink> = Arc::new(LogNotifier);

        Ok(Self::new(pool, chain, notifier, wallet_address))
    }

    /// Apply pending schema migrations.
    pub async fn run_migrations(pool: &PgPool) -> PaymentResult<()> {
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| PaymentError::Database(e.to_string()))?;
        Ok(())
    }
}

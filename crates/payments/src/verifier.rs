//! Payment verifier
//!
//! The decision engine for crypto payment claims. Decisions themselves are a
//! pure function of the injected configuration, the claim, and the chain
//! observation; everything stateful (attempt logging, claim transitions,
//! ledger application, queue management) lives on [`VerificationEngine`].
//!
//! Terminal transitions are exactly-once: the conditional status flip on the
//! claim row decides which actor (polling cycle, grace pass, administrator)
//! owns a resolution, and the success attempt row commits atomically with
//! the subscription writes.

use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use time::{Duration, OffsetDateTime};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use membergate_shared::{AttemptMethod, AttemptStatus, PaymentMethod, RejectReason};

use crate::attempts::VerificationLog;
use crate::chain::{ChainDataSource, ChainTransaction};
use crate::claims::{ClaimService, PaymentClaim};
use crate::error::{PaymentError, PaymentResult};
use crate::guards::DiscountGuard;
use crate::ledger::{ApplyRequest, DiscountApplication, Subscription, SubscriptionLedger};
use crate::notify::{self, NotificationSink, PaymentEvent};
use crate::plans::PlanService;
use crate::review::ReviewQueue;
use crate::settings::{SettingsStore, VerificationConfig};

/// Claims evaluated per polling pass.
const POLL_BATCH_SIZE: i64 = 50;

/// Bounded backoff for chain lookups: 3 tries, ~200ms then ~400ms between them.
const CHAIN_FETCH_RETRIES: usize = 2;
const CHAIN_FETCH_DELAY_FACTOR_MS: u64 = 100;

/// What the chain collaborator reported for a claimed transaction.
#[derive(Debug, Clone)]
pub struct ChainObservation {
    pub on_chain_amount: Decimal,
    pub confirmations: i64,
    pub tx_timestamp: OffsetDateTime,
    pub recipient_matches: bool,
}

/// Outcome of evaluating one claim.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Auto-accept; the on-chain amount is authoritative.
    Accept { amount: Decimal },
    /// Terminal rejection with a stable reason code.
    Reject { reason: RejectReason },
    /// Defer to a human reviewer.
    Escalate { reason: RejectReason },
    /// Not enough confirmations yet; retry on a later cycle without
    /// consuming the attempt.
    AwaitConfirmations { have: i64, need: i64 },
}

/// Relative deviation between claimed and on-chain amounts, in percent.
pub fn amount_deviation_percent(claimed: Decimal, on_chain: Decimal) -> Decimal {
    if claimed.is_zero() {
        // Claims are validated positive at submission; a zero here can only
        // mean corrupted data, which should never auto-accept.
        return Decimal::MAX;
    }
    (on_chain - claimed).abs() / claimed * dec!(100)
}

/// Classify a claim. Rules run in order; the first match wins.
pub fn evaluate(
    config: &VerificationConfig,
    claimed_amount: Decimal,
    observation: &ChainObservation,
    now: OffsetDateTime,
) -> Decision {
    if !observation.recipient_matches {
        return Decision::Reject {
            reason: RejectReason::WrongRecipient,
        };
    }

    if observation.confirmations < config.tron_min_confirmations {
        return Decision::AwaitConfirmations {
            have: observation.confirmations,
            need: config.tron_min_confirmations,
        };
    }

    if now - observation.tx_timestamp > Duration::hours(config.max_tx_age_hours) {
        return Decision::Reject {
            reason: RejectReason::TransactionTooOld,
        };
    }

    // With auto-verification off, every claim that survives the hard checks
    // above goes to a human, regardless of deviation.
    if !config.auto_crypto_verify {
        return Decision::Escalate {
            reason: RejectReason::AutoVerifyDisabled,
        };
    }

    let deviation = amount_deviation_percent(claimed_amount, observation.on_chain_amount);
    if deviation > config.crypto_tolerance_percent {
        return Decision::Escalate {
            reason: RejectReason::AmountMismatch,
        };
    }

    if observation.on_chain_amount > config.max_auto_verify_usdt {
        return Decision::Escalate {
            reason: RejectReason::ExceedsAutoCeiling,
        };
    }

    Decision::Accept {
        amount: observation.on_chain_amount,
    }
}

/// Stateful verification engine driving claims to resolution.
pub struct VerificationEngine {
    pool: sqlx::PgPool,
    settings: SettingsStore,
    claims: ClaimService,
    plans: PlanService,
    log: VerificationLog,
    review: ReviewQueue,
    chain: Arc<dyn ChainDataSource>,
    notifier: Arc<dyn NotificationSink>,
    /// Receiving wallet claims must have paid into.
    wallet_address: String,
}

impl VerificationEngine {
    pub fn new(
        pool: sqlx::PgPool,
        chain: Arc<dyn ChainDataSource>,
        notifier: Arc<dyn NotificationSink>,
        wallet_address: String,
    ) -> Self {
        Self {
            settings: SettingsStore::new(pool.clone()),
            claims: ClaimService::new(pool.clone()),
            plans: PlanService::new(pool.clone()),
            log: VerificationLog::new(pool.clone()),
            review: ReviewQueue::new(pool.clone()),
            pool,
            chain,
            notifier,
            wallet_address,
        }
    }

    /// One polling pass over pending claims and aged escalations.
    ///
    /// Idempotent and safe to run concurrently: every terminal transition is
    /// a conditional update that only one caller can win. Returns the
    /// payment ids resolved in this pass.
    pub async fn poll_pending_claims(&self) -> PaymentResult<Vec<Uuid>> {
        let config = self.settings.load_verification_config().await?;
        let now = OffsetDateTime::now_utc();
        let mut resolved = Vec::new();

        // Grace-period fallback: escalations nobody resolved in time
        // auto-accept at the claimed amount.
        let cutoff = now - Duration::hours(config.auto_approve_after_hours);
        for claim in self.claims.aged_escalations(cutoff).await? {
            let payment_id = claim.payment_id;
            let tx_hash = claim.tx_hash.clone();
            let amount = claim.claimed_amount;
            match self
                .approve(claim, amount, &tx_hash, AttemptMethod::AutomaticGrace, None)
                .await
            {
                Ok(Some(_)) => {
                    tracing::info!(
                        payment_id = %payment_id,
                        "Escalation aged out, auto-approved at claimed amount"
                    );
                    resolved.push(payment_id);
                }
                Ok(None) => {} // a human got there first
                Err(e) => {
                    tracing::error!(payment_id = %payment_id, error = %e, "Grace approval failed");
                }
            }
        }

        for claim in self.claims.pending_claims(POLL_BATCH_SIZE).await? {
            let payment_id = claim.payment_id;
            match self.process_pending_claim(&config, claim, now).await {
                Ok(true) => resolved.push(payment_id),
                Ok(false) => {}
                Err(PaymentError::ChainUnavailable(detail)) => {
                    // Claim stays pending; retried on the next cycle.
                    tracing::warn!(
                        payment_id = %payment_id,
                        detail = %detail,
                        "Chain data source unavailable, deferring claim"
                    );
                }
                Err(e) => {
                    tracing::error!(payment_id = %payment_id, error = %e, "Claim processing failed");
                }
            }
        }

        Ok(resolved)
    }

    /// Evaluate one pending claim. Returns true when a terminal state was
    /// reached in this pass.
    async fn process_pending_claim(
        &self,
        config: &VerificationConfig,
        claim: PaymentClaim,
        now: OffsetDateTime,
    ) -> PaymentResult<bool> {
        // Exactly-once application: an existing success means the payment
        // was already applied, whatever the claim row says.
        if self.log.has_success(claim.payment_id).await? {
            tracing::warn!(
                payment_id = %claim.payment_id,
                "Pending claim already has a successful attempt, finalizing without side effects"
            );
            self.finalize_from_log(&claim).await?;
            return Ok(true);
        }

        if self
            .claims
            .tx_hash_already_consumed(&claim.tx_hash, claim.payment_id)
            .await?
        {
            return self
                .reject(
                    &claim,
                    RejectReason::DuplicateTxHash,
                    AttemptMethod::Automatic,
                    None,
                )
                .await;
        }

        let Some(chain_tx) = self.fetch_with_backoff(&claim.tx_hash).await? else {
            // Unknown to the explorer. Give the transaction the same window
            // it would get for being old, then reject.
            if now - claim.submitted_at > Duration::hours(config.max_tx_age_hours) {
                return self
                    .reject(
                        &claim,
                        RejectReason::TransactionNotFound,
                        AttemptMethod::Automatic,
                        None,
                    )
                    .await;
            }
            tracing::debug!(
                payment_id = %claim.payment_id,
                "Transaction not visible on chain yet, will retry"
            );
            return Ok(false);
        };

        let observation = self.observe(&chain_tx);
        let decision = evaluate(config, claim.claimed_amount, &observation, now);

        tracing::debug!(
            payment_id = %claim.payment_id,
            decision = ?decision,
            on_chain_amount = %observation.on_chain_amount,
            confirmations = observation.confirmations,
            "Evaluated pending claim"
        );

        match decision {
            Decision::Accept { amount } => {
                let tx_hash = chain_tx.tx_hash.clone();
                match self
                    .approve(claim, amount, &tx_hash, AttemptMethod::Automatic, None)
                    .await?
                {
                    Some(_) => Ok(true),
                    None => Ok(false),
                }
            }
            Decision::Reject { reason } => {
                self.reject(&claim, reason, AttemptMethod::Automatic, None)
                    .await
            }
            Decision::Escalate { reason } => {
                self.escalate(&claim, reason).await?;
                Ok(false)
            }
            Decision::AwaitConfirmations { have, need } => {
                tracing::debug!(
                    payment_id = %claim.payment_id,
                    have = have,
                    need = need,
                    "Awaiting confirmations"
                );
                Ok(false)
            }
        }
    }

    /// Administrator resolution of an escalated (or still pending) claim.
    ///
    /// Approvals re-enter the ledger through the identical path as automatic
    /// accepts; denials write a `failed` attempt. Returns the subscription
    /// for approvals, `None` for denials.
    pub async fn resolve_manually(
        &self,
        payment_id: Uuid,
        resolution: membergate_shared::ReviewResolution,
        admin_id: i64,
    ) -> PaymentResult<Option<Subscription>> {
        let claim = self.claims.get_claim(payment_id).await?;
        if claim.status()?.is_terminal() {
            return Err(PaymentError::AlreadyResolved(payment_id));
        }

        match resolution {
            membergate_shared::ReviewResolution::Approve => {
                let amount = claim.claimed_amount;
                let tx_hash = claim.tx_hash.clone();
                let subscription = self
                    .approve(claim, amount, &tx_hash, AttemptMethod::Manual, Some(admin_id))
                    .await?
                    .ok_or(PaymentError::AlreadyResolved(payment_id))?;
                Ok(Some(subscription))
            }
            membergate_shared::ReviewResolution::Deny => {
                let resolved = self
                    .reject(
                        &claim,
                        RejectReason::DeniedByAdmin,
                        AttemptMethod::Manual,
                        Some(admin_id),
                    )
                    .await?;
                if !resolved {
                    return Err(PaymentError::AlreadyResolved(payment_id));
                }
                Ok(None)
            }
        }
    }

    /// Accept a payment and apply it to the user's subscription state.
    ///
    /// The claim flip, subscription writes, guard reservations, success
    /// attempt, and queue closure commit in one transaction. Returns
    /// `Ok(None)` when another actor already resolved the claim.
    async fn approve(
        &self,
        claim: PaymentClaim,
        amount: Decimal,
        tx_hash: &str,
        method: AttemptMethod,
        admin_id: Option<i64>,
    ) -> PaymentResult<Option<Subscription>> {
        let request = self.build_apply_request(&claim, admin_id).await?;

        for attempt in 0..2 {
            match self
                .try_approve_once(&claim, amount, tx_hash, method, admin_id, &request)
                .await
            {
                Ok(outcome) => {
                    if let Some(subscription) = &outcome {
                        self.notify_approved(&claim, amount, tx_hash, subscription);
                    }
                    return Ok(outcome);
                }
                Err(PaymentError::ConcurrentModification(detail)) if attempt == 0 => {
                    tracing::warn!(
                        payment_id = %claim.payment_id,
                        detail = %detail,
                        "Approval raced, retrying once"
                    );
                    continue;
                }
                Err(e) => {
                    // Verified but not applied: record the failure, leave the
                    // claim retryable, never mark it consumed.
                    if let Err(log_err) = self
                        .log
                        .record(
                            claim.payment_id,
                            claim.user_id,
                            tx_hash,
                            amount,
                            AttemptStatus::SubscriptionError,
                            method,
                            Some(&e.to_string()),
                        )
                        .await
                    {
                        tracing::error!(
                            payment_id = %claim.payment_id,
                            error = %log_err,
                            "Failed to record subscription_error attempt"
                        );
                    }
                    return Err(e);
                }
            }
        }
        Err(PaymentError::ConcurrentModification(
            "approval raced twice".to_string(),
        ))
    }

    async fn try_approve_once(
        &self,
        claim: &PaymentClaim,
        amount: Decimal,
        tx_hash: &str,
        method: AttemptMethod,
        admin_id: Option<i64>,
        request: &ApplyRequest,
    ) -> PaymentResult<Option<Subscription>> {
        let mut tx = self.pool.begin().await?;

        let won = self
            .claims
            .mark_approved_in_tx(&mut tx, claim.payment_id, amount, tx_hash)
            .await?;
        if !won {
            tx.rollback().await?;
            return Ok(None);
        }

        let subscription = SubscriptionLedger::apply_in_tx(&mut tx, request).await?;

        self.log
            .record_in_tx(
                &mut tx,
                claim.payment_id,
                claim.user_id,
                tx_hash,
                amount,
                AttemptStatus::Success,
                method,
                None,
            )
            .await?;

        let resolution = match method {
            AttemptMethod::AutomaticGrace => "auto_grace",
            _ => "approve",
        };
        self.review
            .close_in_tx(&mut tx, claim.payment_id, resolution, admin_id)
            .await?;

        tx.commit().await?;

        tracing::info!(
            payment_id = %claim.payment_id,
            user_id = claim.user_id,
            amount = %amount,
            method = %method,
            subscription_id = subscription.id,
            "Payment approved and applied"
        );

        Ok(Some(subscription))
    }

    /// Terminally reject a claim. Returns false when another actor already
    /// resolved it.
    async fn reject(
        &self,
        claim: &PaymentClaim,
        reason: RejectReason,
        method: AttemptMethod,
        admin_id: Option<i64>,
    ) -> PaymentResult<bool> {
        let mut tx = self.pool.begin().await?;

        let won = self
            .claims
            .mark_rejected_in_tx(&mut tx, claim.payment_id, reason)
            .await?;
        if !won {
            tx.rollback().await?;
            return Ok(false);
        }

        self.log
            .record_in_tx(
                &mut tx,
                claim.payment_id,
                claim.user_id,
                &claim.tx_hash,
                claim.claimed_amount,
                AttemptStatus::Failed,
                method,
                Some(reason.as_str()),
            )
            .await?;

        self.review
            .close_in_tx(&mut tx, claim.payment_id, "deny", admin_id)
            .await?;

        tx.commit().await?;

        tracing::info!(
            payment_id = %claim.payment_id,
            user_id = claim.user_id,
            reason = %reason,
            method = %method,
            "Payment rejected"
        );

        notify::dispatch(
            &self.notifier,
            claim.user_id,
            PaymentEvent::PaymentRejected {
                payment_id: claim.payment_id,
                reason,
            },
        );

        Ok(true)
    }

    /// Move a pending claim into the manual review queue. No attempt row is
    /// written; the terminal row comes with the eventual resolution.
    async fn escalate(&self, claim: &PaymentClaim, reason: RejectReason) -> PaymentResult<()> {
        let mut tx = self.pool.begin().await?;

        let won = self
            .claims
            .mark_escalated_in_tx(&mut tx, claim.payment_id, reason)
            .await?;
        if !won {
            tx.rollback().await?;
            return Ok(());
        }

        self.review.enqueue_in_tx(&mut tx, claim, reason).await?;
        tx.commit().await?;

        tracing::info!(
            payment_id = %claim.payment_id,
            user_id = claim.user_id,
            reason = %reason,
            "Payment escalated to manual review"
        );

        notify::dispatch(
            &self.notifier,
            claim.user_id,
            PaymentEvent::PaymentEscalated {
                payment_id: claim.payment_id,
                reason,
            },
        );

        Ok(())
    }

    /// Reconcile a claim whose success attempt exists but whose row is not
    /// terminal (should not happen under normal operation; both commit
    /// together). Applies no subscription side effects.
    async fn finalize_from_log(&self, claim: &PaymentClaim) -> PaymentResult<()> {
        let attempts = self.log.attempts_for_payment(claim.payment_id).await?;
        let Some(success) = attempts.iter().find(|a| a.status == "success") else {
            return Ok(());
        };

        let mut tx = self.pool.begin().await?;
        self.claims
            .mark_approved_in_tx(&mut tx, claim.payment_id, success.amount, &success.tx_hash)
            .await?;
        self.review
            .close_in_tx(&mut tx, claim.payment_id, "approve", None)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn build_apply_request(
        &self,
        claim: &PaymentClaim,
        admin_id: Option<i64>,
    ) -> PaymentResult<ApplyRequest> {
        let discount = match claim.discount_id {
            Some(discount_id) => {
                let discount = DiscountGuard::get_discount(&self.pool, discount_id).await?;
                let plan = self.plans.get_plan(claim.plan_id).await?;
                let base = plan.price_tether.unwrap_or(claim.claimed_amount);
                let amount_discounted = discount.discount_amount(base);
                Some(DiscountApplication {
                    discount,
                    amount_discounted: Some(amount_discounted),
                })
            }
            None => None,
        };

        Ok(ApplyRequest {
            user_id: claim.user_id,
            plan_id: claim.plan_id,
            payment_method: PaymentMethod::Crypto,
            payment_id: Some(claim.payment_id),
            discount,
            admin_id,
        })
    }

    fn observe(&self, chain_tx: &ChainTransaction) -> ChainObservation {
        ChainObservation {
            on_chain_amount: chain_tx.amount,
            confirmations: chain_tx.confirmations,
            tx_timestamp: chain_tx.timestamp,
            recipient_matches: chain_tx.recipient.trim() == self.wallet_address.trim(),
        }
    }

    /// Fetch chain data with bounded exponential backoff. Holding no locks
    /// here is deliberate; this is the only suspending step in the cycle.
    async fn fetch_with_backoff(&self, tx_hash: &str) -> PaymentResult<Option<ChainTransaction>> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(CHAIN_FETCH_DELAY_FACTOR_MS)
            .map(jitter)
            .take(CHAIN_FETCH_RETRIES);

        Retry::spawn(strategy, || self.chain.fetch_transaction(tx_hash)).await
    }

    fn notify_approved(
        &self,
        claim: &PaymentClaim,
        amount: Decimal,
        tx_hash: &str,
        subscription: &Subscription,
    ) {
        notify::dispatch(
            &self.notifier,
            claim.user_id,
            PaymentEvent::PaymentApproved {
                payment_id: claim.payment_id,
                amount,
                tx_hash: tx_hash.to_string(),
            },
        );
        let event = if subscription.is_extension {
            PaymentEvent::SubscriptionExtended {
                subscription_id: subscription.id,
                category_id: subscription.category_id,
                end_date: subscription.end_date,
            }
        } else {
            PaymentEvent::SubscriptionCreated {
                subscription_id: subscription.id,
                category_id: subscription.category_id,
                end_date: subscription.end_date,
            }
        };
        notify::dispatch(&self.notifier, claim.user_id, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VerificationConfig {
        VerificationConfig::default()
    }

    fn observation(amount: Decimal) -> ChainObservation {
        ChainObservation {
            on_chain_amount: amount,
            confirmations: 5,
            tx_timestamp: OffsetDateTime::now_utc() - Duration::hours(1),
            recipient_matches: true,
        }
    }

    #[test]
    fn test_accept_within_tolerance_uses_on_chain_amount() {
        // 100 claimed, 103 on-chain, 5% tolerance: 3% deviation, accept at 103
        let decision = evaluate(
            &config(),
            dec!(100),
            &observation(dec!(103)),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(decision, Decision::Accept { amount: dec!(103) });
    }

    #[test]
    fn test_escalates_beyond_tolerance() {
        // 100 claimed, 120 on-chain: 20% deviation
        let decision = evaluate(
            &config(),
            dec!(100),
            &observation(dec!(120)),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(
            decision,
            Decision::Escalate {
                reason: RejectReason::AmountMismatch
            }
        );
    }

    #[test]
    fn test_wrong_recipient_rejects_first() {
        let mut obs = observation(dec!(100));
        obs.recipient_matches = false;
        // Even with too few confirmations, wrong recipient wins
        obs.confirmations = 0;
        let decision = evaluate(&config(), dec!(100), &obs, OffsetDateTime::now_utc());
        assert_eq!(
            decision,
            Decision::Reject {
                reason: RejectReason::WrongRecipient
            }
        );
    }

    #[test]
    fn test_insufficient_confirmations_is_not_terminal() {
        let mut cfg = config();
        cfg.tron_min_confirmations = 19;
        let mut obs = observation(dec!(100));
        obs.confirmations = 3;
        let decision = evaluate(&cfg, dec!(100), &obs, OffsetDateTime::now_utc());
        assert_eq!(decision, Decision::AwaitConfirmations { have: 3, need: 19 });
    }

    #[test]
    fn test_old_transaction_rejected() {
        let mut obs = observation(dec!(100));
        obs.tx_timestamp = OffsetDateTime::now_utc() - Duration::hours(25);
        let decision = evaluate(&config(), dec!(100), &obs, OffsetDateTime::now_utc());
        assert_eq!(
            decision,
            Decision::Reject {
                reason: RejectReason::TransactionTooOld
            }
        );
    }

    #[test]
    fn test_auto_verify_disabled_escalates_everything() {
        let mut cfg = config();
        cfg.auto_crypto_verify = false;
        // Exact amount match still escalates
        let decision = evaluate(
            &cfg,
            dec!(100),
            &observation(dec!(100)),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(
            decision,
            Decision::Escalate {
                reason: RejectReason::AutoVerifyDisabled
            }
        );
    }

    #[test]
    fn test_ceiling_escalates_even_when_amount_matches() {
        let decision = evaluate(
            &config(),
            dec!(5000),
            &observation(dec!(5000)),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(
            decision,
            Decision::Escalate {
                reason: RejectReason::ExceedsAutoCeiling
            }
        );
    }

    #[test]
    fn test_tolerance_boundary_is_inclusive() {
        // Exactly 5% deviation is within a 5.0 tolerance
        let decision = evaluate(
            &config(),
            dec!(100),
            &observation(dec!(105)),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(decision, Decision::Accept { amount: dec!(105) });

        // One cent past is not
        let decision = evaluate(
            &config(),
            dec!(100),
            &observation(dec!(105.01)),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(
            decision,
            Decision::Escalate {
                reason: RejectReason::AmountMismatch
            }
        );
    }

    #[test]
    fn test_underpayment_counts_as_deviation() {
        let decision = evaluate(
            &config(),
            dec!(100),
            &observation(dec!(90)),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(
            decision,
            Decision::Escalate {
                reason: RejectReason::AmountMismatch
            }
        );
    }

    #[test]
    fn test_deviation_math() {
        assert_eq!(amount_deviation_percent(dec!(100), dec!(103)), dec!(3));
        assert_eq!(amount_deviation_percent(dec!(100), dec!(120)), dec!(20));
        assert_eq!(amount_deviation_percent(dec!(100), dec!(97)), dec!(3));
        assert_eq!(amount_deviation_percent(dec!(50), dec!(50)), dec!(0));
        assert_eq!(amount_deviation_percent(dec!(0), dec!(10)), Decimal::MAX);
    }
}

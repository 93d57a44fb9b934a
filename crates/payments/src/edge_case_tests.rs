// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Payment Verification Engine
//!
//! Tests critical boundary conditions in:
//! - Decision rule ordering (PAY-D01 to PAY-D06)
//! - Tolerance arithmetic (PAY-T01 to PAY-T05)
//! - Ceiling and age boundaries (PAY-B01 to PAY-B04)
//! - Settings parsing (PAY-S01 to PAY-S03)

#[cfg(test)]
mod decision_order_tests {
    use crate::settings::VerificationConfig;
    use crate::verifier::{evaluate, ChainObservation, Decision};
    use membergate_shared::RejectReason;
    use rust_decimal_macros::dec;
    use time::{Duration, OffsetDateTime};

    fn fresh_observation() -> ChainObservation {
        ChainObservation {
            on_chain_amount: dec!(100),
            confirmations: 10,
            tx_timestamp: OffsetDateTime::now_utc() - Duration::minutes(30),
            recipient_matches: true,
        }
    }

    // =========================================================================
    // PAY-D01: Wrong recipient beats every other condition
    // =========================================================================
    #[test]
    fn test_wrong_recipient_wins_over_everything() {
        let mut config = VerificationConfig::default();
        config.auto_crypto_verify = false;
        config.tron_min_confirmations = 100;

        let mut obs = fresh_observation();
        obs.recipient_matches = false;
        obs.confirmations = 0;
        obs.tx_timestamp = OffsetDateTime::now_utc() - Duration::days(30);
        obs.on_chain_amount = dec!(999999);

        let decision = evaluate(&config, dec!(100), &obs, OffsetDateTime::now_utc());
        assert_eq!(
            decision,
            Decision::Reject {
                reason: RejectReason::WrongRecipient
            }
        );
    }

    // =========================================================================
    // PAY-D02: Confirmations are checked before transaction age
    // =========================================================================
    #[test]
    fn test_confirmations_checked_before_age() {
        let config = VerificationConfig::default();
        let mut obs = fresh_observation();
        obs.confirmations = 0;
        obs.tx_timestamp = OffsetDateTime::now_utc() - Duration::days(5);

        let decision = evaluate(&config, dec!(100), &obs, OffsetDateTime::now_utc());
        // An unconfirmed old transaction waits rather than rejecting; the age
        // check only fires once confirmations clear
        assert!(matches!(decision, Decision::AwaitConfirmations { .. }));
    }

    // =========================================================================
    // PAY-D03: Age check fires before tolerance
    // =========================================================================
    #[test]
    fn test_age_checked_before_tolerance() {
        let config = VerificationConfig::default();
        let mut obs = fresh_observation();
        obs.tx_timestamp = OffsetDateTime::now_utc() - Duration::hours(48);
        obs.on_chain_amount = dec!(120); // would otherwise escalate

        let decision = evaluate(&config, dec!(100), &obs, OffsetDateTime::now_utc());
        assert_eq!(
            decision,
            Decision::Reject {
                reason: RejectReason::TransactionTooOld
            }
        );
    }

    // =========================================================================
    // PAY-D04: Disabled auto-verify escalates before the deviation is looked at
    // =========================================================================
    #[test]
    fn test_disabled_auto_verify_beats_tolerance_and_ceiling() {
        let mut config = VerificationConfig::default();
        config.auto_crypto_verify = false;

        let decision = evaluate(
            &config,
            dec!(100),
            &fresh_observation(),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(
            decision,
            Decision::Escalate {
                reason: RejectReason::AutoVerifyDisabled
            }
        );
    }

    // =========================================================================
    // PAY-D05: Tolerance escalation fires before the ceiling
    // =========================================================================
    #[test]
    fn test_mismatch_reported_over_ceiling() {
        let config = VerificationConfig::default();
        let mut obs = fresh_observation();
        obs.on_chain_amount = dec!(2000); // both over ceiling and >5% off 100

        let decision = evaluate(&config, dec!(100), &obs, OffsetDateTime::now_utc());
        assert_eq!(
            decision,
            Decision::Escalate {
                reason: RejectReason::AmountMismatch
            }
        );
    }

    // =========================================================================
    // PAY-D06: All rules pass - accept with the on-chain amount
    // =========================================================================
    #[test]
    fn test_clean_claim_accepts_on_chain_amount() {
        let config = VerificationConfig::default();
        let mut obs = fresh_observation();
        obs.on_chain_amount = dec!(101.5);

        let decision = evaluate(&config, dec!(100), &obs, OffsetDateTime::now_utc());
        assert_eq!(
            decision,
            Decision::Accept {
                amount: dec!(101.5)
            }
        );
    }
}

#[cfg(test)]
mod tolerance_tests {
    use crate::settings::VerificationConfig;
    use crate::verifier::{amount_deviation_percent, evaluate, ChainObservation, Decision};
    use membergate_shared::RejectReason;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use time::{Duration, OffsetDateTime};

    fn obs(amount: Decimal) -> ChainObservation {
        ChainObservation {
            on_chain_amount: amount,
            confirmations: 10,
            tx_timestamp: OffsetDateTime::now_utc() - Duration::minutes(5),
            recipient_matches: true,
        }
    }

    // =========================================================================
    // PAY-T01: Zero tolerance accepts only the exact amount
    // =========================================================================
    #[test]
    fn test_zero_tolerance_exact_match_only() {
        let mut config = VerificationConfig::default();
        config.crypto_tolerance_percent = dec!(0);

        let now = OffsetDateTime::now_utc();
        assert_eq!(
            evaluate(&config, dec!(100), &obs(dec!(100)), now),
            Decision::Accept { amount: dec!(100) }
        );
        assert_eq!(
            evaluate(&config, dec!(100), &obs(dec!(100.000001)), now),
            Decision::Escalate {
                reason: RejectReason::AmountMismatch
            }
        );
    }

    // =========================================================================
    // PAY-T02: Deviation is symmetric for over- and underpayment
    // =========================================================================
    #[test]
    fn test_deviation_symmetry() {
        assert_eq!(
            amount_deviation_percent(dec!(200), dec!(210)),
            amount_deviation_percent(dec!(200), dec!(190))
        );
    }

    // =========================================================================
    // PAY-T03: Micropayment precision (USDT has 6 decimal places)
    // =========================================================================
    #[test]
    fn test_micropayment_precision() {
        // 0.000001 off a 1 USDT claim is 0.0001%
        let deviation = amount_deviation_percent(dec!(1), dec!(1.000001));
        assert_eq!(deviation, dec!(0.0001));
        assert!(deviation < dec!(5.0));
    }

    // =========================================================================
    // PAY-T04: Zero claimed amount never auto-accepts
    // =========================================================================
    #[test]
    fn test_zero_claimed_amount_never_accepts() {
        let config = VerificationConfig::default();
        let decision = evaluate(
            &config,
            dec!(0),
            &obs(dec!(10)),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(
            decision,
            Decision::Escalate {
                reason: RejectReason::AmountMismatch
            }
        );
    }

    // =========================================================================
    // PAY-T05: Large tolerance admits large deviation
    // =========================================================================
    #[test]
    fn test_wide_tolerance() {
        let mut config = VerificationConfig::default();
        config.crypto_tolerance_percent = dec!(50);

        let decision = evaluate(
            &config,
            dec!(100),
            &obs(dec!(140)),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(decision, Decision::Accept { amount: dec!(140) });
    }
}

#[cfg(test)]
mod boundary_tests {
    use crate::settings::VerificationConfig;
    use crate::verifier::{evaluate, ChainObservation, Decision};
    use membergate_shared::RejectReason;
    use rust_decimal_macros::dec;
    use time::{Duration, OffsetDateTime};

    fn obs() -> ChainObservation {
        ChainObservation {
            on_chain_amount: dec!(100),
            confirmations: 1,
            tx_timestamp: OffsetDateTime::now_utc() - Duration::minutes(5),
            recipient_matches: true,
        }
    }

    // =========================================================================
    // PAY-B01: Exactly the minimum confirmations proceeds
    // =========================================================================
    #[test]
    fn test_exact_minimum_confirmations_proceeds() {
        let mut config = VerificationConfig::default();
        config.tron_min_confirmations = 19;

        let mut observation = obs();
        observation.confirmations = 19;
        let decision = evaluate(&config, dec!(100), &observation, OffsetDateTime::now_utc());
        assert_eq!(decision, Decision::Accept { amount: dec!(100) });

        observation.confirmations = 18;
        let decision = evaluate(&config, dec!(100), &observation, OffsetDateTime::now_utc());
        assert_eq!(
            decision,
            Decision::AwaitConfirmations { have: 18, need: 19 }
        );
    }

    // =========================================================================
    // PAY-B02: Transaction exactly max_tx_age_hours old is still acceptable
    // =========================================================================
    #[test]
    fn test_age_boundary_is_inclusive() {
        let config = VerificationConfig::default();
        let now = OffsetDateTime::now_utc();

        let mut observation = obs();
        observation.tx_timestamp = now - Duration::hours(24);
        let decision = evaluate(&config, dec!(100), &observation, now);
        assert_eq!(decision, Decision::Accept { amount: dec!(100) });

        observation.tx_timestamp = now - Duration::hours(24) - Duration::seconds(1);
        let decision = evaluate(&config, dec!(100), &observation, now);
        assert_eq!(
            decision,
            Decision::Reject {
                reason: RejectReason::TransactionTooOld
            }
        );
    }

    // =========================================================================
    // PAY-B03: Exactly the auto-verify ceiling is still automatic
    // =========================================================================
    #[test]
    fn test_ceiling_boundary_is_inclusive() {
        let config = VerificationConfig::default();
        let now = OffsetDateTime::now_utc();

        let mut observation = obs();
        observation.on_chain_amount = dec!(1000);
        let decision = evaluate(&config, dec!(1000), &observation, now);
        assert_eq!(decision, Decision::Accept { amount: dec!(1000) });

        observation.on_chain_amount = dec!(1000.000001);
        let decision = evaluate(&config, dec!(1000.000001), &observation, now);
        assert_eq!(
            decision,
            Decision::Escalate {
                reason: RejectReason::ExceedsAutoCeiling
            }
        );
    }

    // =========================================================================
    // PAY-B04: Ceiling applies to the on-chain amount, not the claimed one
    // =========================================================================
    #[test]
    fn test_ceiling_uses_on_chain_amount() {
        let config = VerificationConfig::default();
        let mut observation = obs();
        // Claimed under the ceiling, paid just over it but within tolerance
        observation.on_chain_amount = dec!(1010);
        let decision = evaluate(&config, dec!(990), &observation, OffsetDateTime::now_utc());
        assert_eq!(
            decision,
            Decision::Escalate {
                reason: RejectReason::ExceedsAutoCeiling
            }
        );
    }
}

#[cfg(test)]
mod settings_tests {
    use crate::settings::{self, VerificationConfig};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    // =========================================================================
    // PAY-S01: Empty settings table yields the documented defaults
    // =========================================================================
    #[test]
    fn test_empty_settings_are_defaults() {
        let config = VerificationConfig::from_settings(&HashMap::new());
        assert_eq!(config, VerificationConfig::default());
    }

    // =========================================================================
    // PAY-S02: Legacy "0"/"1" boolean encoding is honored
    // =========================================================================
    #[test]
    fn test_legacy_boolean_encoding() {
        let mut raw = HashMap::new();
        raw.insert(settings::AUTO_CRYPTO_VERIFY.to_string(), "1".to_string());
        assert!(VerificationConfig::from_settings(&raw).auto_crypto_verify);

        raw.insert(settings::AUTO_CRYPTO_VERIFY.to_string(), "0".to_string());
        assert!(!VerificationConfig::from_settings(&raw).auto_crypto_verify);
    }

    // =========================================================================
    // PAY-S03: Per-key fallback - one bad value does not poison the rest
    // =========================================================================
    #[test]
    fn test_per_key_fallback() {
        let mut raw = HashMap::new();
        raw.insert(
            settings::CRYPTO_TOLERANCE_PERCENT.to_string(),
            "not-a-number".to_string(),
        );
        raw.insert(settings::MAX_AUTO_VERIFY_USDT.to_string(), "500".to_string());

        let config = VerificationConfig::from_settings(&raw);
        assert_eq!(config.crypto_tolerance_percent, dec!(5.0));
        assert_eq!(config.max_auto_verify_usdt, dec!(500));
    }
}

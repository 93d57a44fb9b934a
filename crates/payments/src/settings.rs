//! Settings store and typed verification configuration
//!
//! Engine behavior is tuned through the `settings` key/value table. The
//! verifier never reads settings ambiently: a [`VerificationConfig`] is
//! loaded per polling cycle and passed in explicitly, so decisions are
//! testable with injected configurations.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::PgPool;

use crate::error::PaymentResult;

/// Setting keys understood by the verifier.
pub const AUTO_CRYPTO_VERIFY: &str = "auto_crypto_verify";
pub const CRYPTO_TOLERANCE_PERCENT: &str = "crypto_tolerance_percent";
pub const MAX_AUTO_VERIFY_USDT: &str = "max_auto_verify_usdt";
pub const AUTO_APPROVE_AFTER_HOURS: &str = "auto_approve_after_hours";
pub const MAX_TX_AGE_HOURS: &str = "max_tx_age_hours";
pub const TRON_MIN_CONFIRMATIONS: &str = "tron_min_confirmations";

/// All keys the verifier reads, in one place for loading and validation.
pub const VERIFIER_SETTING_KEYS: &[&str] = &[
    AUTO_CRYPTO_VERIFY,
    CRYPTO_TOLERANCE_PERCENT,
    MAX_AUTO_VERIFY_USDT,
    AUTO_APPROVE_AFTER_HOURS,
    MAX_TX_AGE_HOURS,
    TRON_MIN_CONFIRMATIONS,
];

/// Typed snapshot of the verifier settings.
///
/// Missing or unparsable values fall back to these defaults:
///
/// | key                        | default |
/// |----------------------------|---------|
/// | `auto_crypto_verify`       | enabled |
/// | `crypto_tolerance_percent` | 5.0     |
/// | `max_auto_verify_usdt`     | 1000.0  |
/// | `auto_approve_after_hours` | 24      |
/// | `max_tx_age_hours`         | 24      |
/// | `tron_min_confirmations`   | 1       |
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationConfig {
    /// When disabled, every claim escalates to manual review regardless of
    /// amount deviation.
    pub auto_crypto_verify: bool,
    /// Maximum allowed relative deviation (percent) between claimed and
    /// on-chain amounts for auto-acceptance.
    pub crypto_tolerance_percent: Decimal,
    /// Payments above this on-chain amount always get human eyes.
    pub max_auto_verify_usdt: Decimal,
    /// Unresolved escalations auto-accept after this many hours.
    pub auto_approve_after_hours: i64,
    /// Transactions mined longer ago than this are rejected.
    pub max_tx_age_hours: i64,
    /// Minimum network confirmations before a decision is made.
    pub tron_min_confirmations: i64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            auto_crypto_verify: true,
            crypto_tolerance_percent: dec!(5.0),
            max_auto_verify_usdt: dec!(1000.0),
            auto_approve_after_hours: 24,
            max_tx_age_hours: 24,
            tron_min_confirmations: 1,
        }
    }
}

impl VerificationConfig {
    /// Build a config from raw setting rows, falling back per key.
    pub fn from_settings(raw: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            auto_crypto_verify: raw
                .get(AUTO_CRYPTO_VERIFY)
                .and_then(|v| parse_bool(v))
                .unwrap_or(defaults.auto_crypto_verify),
            crypto_tolerance_percent: raw
                .get(CRYPTO_TOLERANCE_PERCENT)
                .and_then(|v| v.trim().parse::<Decimal>().ok())
                .unwrap_or(defaults.crypto_tolerance_percent),
            max_auto_verify_usdt: raw
                .get(MAX_AUTO_VERIFY_USDT)
                .and_then(|v| v.trim().parse::<Decimal>().ok())
                .unwrap_or(defaults.max_auto_verify_usdt),
            auto_approve_after_hours: raw
                .get(AUTO_APPROVE_AFTER_HOURS)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(defaults.auto_approve_after_hours),
            max_tx_age_hours: raw
                .get(MAX_TX_AGE_HOURS)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(defaults.max_tx_age_hours),
            tron_min_confirmations: raw
                .get(TRON_MIN_CONFIRMATIONS)
                .and_then(|v| v.trim().parse::<i64>().ok())
                .unwrap_or(defaults.tron_min_confirmations),
        }
    }
}

/// Parse a stored boolean. Accepts the forms historically written by the
/// admin tooling ("1"/"0", "true"/"false", "on"/"off", "yes"/"no").
fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" | "enabled" => Some(true),
        "0" | "false" | "off" | "no" | "disabled" => Some(false),
        _ => None,
    }
}

/// Key/value settings store backed by the `settings` table.
#[derive(Clone)]
pub struct SettingsStore {
    pool: PgPool,
}

impl SettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Fetch a single setting value.
    pub async fn get(&self, key: &str) -> PaymentResult<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM settings WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value)
    }

    /// Upsert a setting value.
    pub async fn set(&self, key: &str, value: &str) -> PaymentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load the verifier configuration, applying typed defaults for missing
    /// or unparsable values.
    pub async fn load_verification_config(&self) -> PaymentResult<VerificationConfig> {
        let keys: Vec<String> = VERIFIER_SETTING_KEYS.iter().map(|k| k.to_string()).collect();
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM settings WHERE key = ANY($1)")
                .bind(keys)
                .fetch_all(&self.pool)
                .await?;

        let raw: HashMap<String, String> = rows.into_iter().collect();
        Ok(VerificationConfig::from_settings(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VerificationConfig::default();
        assert!(config.auto_crypto_verify);
        assert_eq!(config.crypto_tolerance_percent, dec!(5.0));
        assert_eq!(config.max_auto_verify_usdt, dec!(1000.0));
        assert_eq!(config.auto_approve_after_hours, 24);
        assert_eq!(config.max_tx_age_hours, 24);
        assert_eq!(config.tron_min_confirmations, 1);
    }

    #[test]
    fn test_from_settings_overrides() {
        let mut raw = HashMap::new();
        raw.insert(AUTO_CRYPTO_VERIFY.to_string(), "0".to_string());
        raw.insert(CRYPTO_TOLERANCE_PERCENT.to_string(), "2.5".to_string());
        raw.insert(MAX_AUTO_VERIFY_USDT.to_string(), "250".to_string());
        raw.insert(TRON_MIN_CONFIRMATIONS.to_string(), "19".to_string());

        let config = VerificationConfig::from_settings(&raw);
        assert!(!config.auto_crypto_verify);
        assert_eq!(config.crypto_tolerance_percent, dec!(2.5));
        assert_eq!(config.max_auto_verify_usdt, dec!(250));
        assert_eq!(config.tron_min_confirmations, 19);
        // Untouched keys keep their defaults
        assert_eq!(config.max_tx_age_hours, 24);
    }

    #[test]
    fn test_from_settings_garbage_falls_back() {
        let mut raw = HashMap::new();
        raw.insert(CRYPTO_TOLERANCE_PERCENT.to_string(), "lots".to_string());
        raw.insert(AUTO_APPROVE_AFTER_HOURS.to_string(), "soon".to_string());
        raw.insert(AUTO_CRYPTO_VERIFY.to_string(), "maybe".to_string());

        let config = VerificationConfig::from_settings(&raw);
        assert_eq!(config, VerificationConfig::default());
    }

    #[test]
    fn test_parse_bool_forms() {
        for v in ["1", "true", "ON", "Yes", "enabled"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["0", "false", "OFF", "no", "disabled"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }
}

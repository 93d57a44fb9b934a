//! Blockchain data source seam
//!
//! The engine consumes confirmation counts and on-chain amounts as opaque
//! trusted input through [`ChainDataSource`]. The bundled [`TronScanClient`]
//! is a thin HTTP adapter over a TronScan-compatible explorer API; tests
//! inject their own implementations.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::{PaymentError, PaymentResult};

/// One confirmed transfer as seen by the explorer.
#[derive(Debug, Clone)]
pub struct ChainTransaction {
    pub tx_hash: String,
    /// Transfer amount in whole USDT (decimals already applied).
    pub amount: Decimal,
    pub confirmations: i64,
    /// When the transaction was mined.
    pub timestamp: OffsetDateTime,
    /// Receiving wallet address.
    pub recipient: String,
}

/// Read-only view of chain data.
///
/// `Ok(None)` means the hash is unknown to the explorer (not yet propagated
/// or simply wrong); transport and parsing failures are
/// [`PaymentError::ChainUnavailable`] and leave the claim pending.
#[async_trait]
pub trait ChainDataSource: Send + Sync {
    async fn fetch_transaction(&self, tx_hash: &str) -> PaymentResult<Option<ChainTransaction>>;
}

/// TronScan-compatible explorer client.
pub struct TronScanClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TransactionInfoResponse {
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    confirmations: i64,
    #[serde(default)]
    confirmed: bool,
    /// Milliseconds since epoch.
    #[serde(default)]
    timestamp: i64,
    #[serde(default, rename = "contractRet")]
    contract_ret: Option<String>,
    #[serde(default, rename = "trc20TransferInfo")]
    trc20_transfers: Vec<Trc20Transfer>,
}

#[derive(Debug, Deserialize)]
struct Trc20Transfer {
    #[serde(default, rename = "to_address")]
    to_address: String,
    #[serde(default)]
    amount_str: String,
    #[serde(default)]
    decimals: u32,
}

impl TronScanClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn transfer_amount(raw: &str, decimals: u32) -> Option<Decimal> {
        let mut amount: Decimal = raw.trim().parse().ok()?;
        amount.set_scale(decimals).ok()?;
        Some(amount.normalize())
    }
}

#[async_trait]
impl ChainDataSource for TronScanClient {
    async fn fetch_transaction(&self, tx_hash: &str) -> PaymentResult<Option<ChainTransaction>> {
        let url = format!("{}/api/transaction-info", self.base_url.trim_end_matches('/'));

        let response = self
            .http
            .get(&url)
            .query(&[("hash", tx_hash)])
            .send()
            .await
            .map_err(|e| PaymentError::ChainUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PaymentError::ChainUnavailable(format!(
                "explorer returned HTTP {}",
                response.status()
            )));
        }

        let info: TransactionInfoResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::ChainUnavailable(format!("bad explorer payload: {e}")))?;

        // The explorer answers unknown hashes with an empty object
        if info.hash.is_none() || info.timestamp == 0 {
            return Ok(None);
        }

        // A reverted contract call never pays anyone
        if let Some(ret) = &info.contract_ret {
            if ret != "SUCCESS" {
                return Ok(None);
            }
        }

        let Some(transfer) = info.trc20_transfers.first() else {
            return Ok(None);
        };

        let Some(amount) = Self::transfer_amount(&transfer.amount_str, transfer.decimals) else {
            return Err(PaymentError::ChainUnavailable(format!(
                "unparsable transfer amount: {:?}",
                transfer.amount_str
            )));
        };

        let timestamp = OffsetDateTime::from_unix_timestamp(info.timestamp / 1000)
            .map_err(|e| PaymentError::ChainUnavailable(format!("bad timestamp: {e}")))?;

        // Some explorer deployments only flip `confirmed` without reporting a
        // count; treat a confirmed transaction as having at least one.
        let confirmations = if info.confirmations == 0 && info.confirmed {
            1
        } else {
            info.confirmations
        };

        Ok(Some(ChainTransaction {
            tx_hash: tx_hash.to_string(),
            amount,
            confirmations,
            timestamp,
            recipient: transfer.to_address.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transfer_amount_applies_decimals() {
        assert_eq!(
            TronScanClient::transfer_amount("103000000", 6),
            Some(dec!(103))
        );
        assert_eq!(
            TronScanClient::transfer_amount("1500000", 6),
            Some(dec!(1.5))
        );
        assert_eq!(TronScanClient::transfer_amount("garbage", 6), None);
    }

    #[test]
    fn test_unknown_hash_parses_to_empty() {
        let info: TransactionInfoResponse = serde_json::from_str("{}").unwrap();
        assert!(info.hash.is_none());
        assert_eq!(info.timestamp, 0);
    }

    #[test]
    fn test_full_response_parses() {
        let body = r#"{
            "hash": "abc123",
            "confirmations": 20,
            "confirmed": true,
            "timestamp": 1700000000000,
            "contractRet": "SUCCESS",
            "trc20TransferInfo": [
                {"to_address": "TWallet1", "amount_str": "103000000", "decimals": 6}
            ]
        }"#;
        let info: TransactionInfoResponse = serde_json::from_str(body).unwrap();
        assert_eq!(info.confirmations, 20);
        assert_eq!(info.trc20_transfers.len(), 1);
        assert_eq!(info.trc20_transfers[0].to_address, "TWallet1");
    }
}

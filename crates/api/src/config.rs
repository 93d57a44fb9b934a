//! API server configuration

use crate::error::{ApiError, ApiResult};

/// Environment-driven configuration for the API process.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    /// Receiving wallet for crypto payments.
    pub wallet_address: String,
    /// Base URL of the TronScan-compatible explorer.
    pub explorer_url: String,
}

impl Config {
    pub fn from_env() -> ApiResult<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ApiError::Config("DATABASE_URL must be set".to_string()))?;
        let wallet_address = std::env::var("CRYPTO_WALLET_ADDRESS")
            .map_err(|_| ApiError::Config("CRYPTO_WALLET_ADDRESS must be set".to_string()))?;

        let host = std::env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = std::env::var("API_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ApiError::Config("API_PORT must be a port number".to_string()))?;
        let explorer_url = std::env::var("TRONSCAN_API_URL")
            .unwrap_or_else(|_| "https://apilist.tronscanapi.com".to_string());

        Ok(Self {
            database_url,
            host,
            port,
            wallet_address,
            explorer_url,
        })
    }
}

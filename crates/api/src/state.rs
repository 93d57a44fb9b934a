//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use membergate_payments::{
    ChainDataSource, LogNotifier, NotificationSink, PaymentsService, TronScanClient,
};

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub payments: Arc<PaymentsService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let chain: Arc<dyn ChainDataSource> =
            Arc::new(TronScanClient::new(config.explorer_url.clone()));
        let notifier: Arc<dyn NotificationSink> = Arc::new(LogNotifier);

        let payments = Arc::new(PaymentsService::new(
            pool.clone(),
            chain,
            notifier,
            config.wallet_address.clone(),
        ));
        tracing::info!("Payments service initialized");

        Self {
            pool,
            config,
            payments,
        }
    }
}
